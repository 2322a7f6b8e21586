use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, Broker, Currency, Transaction, TransactionId, TransactionType,
};

use super::MIGRATION_001_INITIAL;

/// Database transaction spanning one logical operation.
pub type UnitOfWork = sqlx::Transaction<'static, Sqlite>;

/// How long a unit of work waits for another writer before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const ACCOUNT_COLUMNS: &str = "id, name, broker, currency, current_balance, initial_capital, target_balance, withdrawal_threshold, total_deposits, total_withdrawals, total_profits, total_losses, is_active, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, type, amount, currency, date, description, source, target_account_id, exchange_rate, created_at";

/// Filters for listing accounts.
#[derive(Debug, Clone, Default)]
pub struct AccountQuery {
    pub broker: Option<Broker>,
    pub currency: Option<Currency>,
    pub active: Option<bool>,
}

/// Filters for listing ledger entries.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    /// Entries sourced by or transferred to this account
    pub account_id: Option<AccountId>,
    pub kind: Option<TransactionType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Statistics for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub account_count: i64,
    pub transaction_count: i64,
    pub orphan_sources: i64,
    pub dangling_transfers: i64,
}

/// Repository for persisting and querying accounts and ledger entries.
///
/// Reads that must see uncommitted writes of an ongoing operation take a
/// connection (`&mut *uow`); the `&self` variants borrow one from the pool.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    /// WAL lets readers proceed while a unit of work holds the write lock.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start a unit of work. Nothing it writes is visible until commit.
    ///
    /// The write lock is taken up front: units of work on different accounts
    /// queue on it instead of failing to upgrade a read lock.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to begin database transaction")
    }

    /// Borrow a pooled connection for reads outside a unit of work.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .context("Failed to acquire connection")
    }

    // ========================
    // Account operations
    // ========================

    pub async fn insert_account(&self, conn: &mut SqliteConnection, account: &Account) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO accounts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ACCOUNT_COLUMNS
        ))
        .bind(account.id.to_string())
        .bind(&account.name)
        .bind(account.broker.as_str())
        .bind(account.currency.as_str())
        .bind(account.current_balance.to_string())
        .bind(account.initial_capital.to_string())
        .bind(account.target_balance.to_string())
        .bind(account.withdrawal_threshold.to_string())
        .bind(account.total_deposits.to_string())
        .bind(account.total_withdrawals.to_string())
        .bind(account.total_profits.to_string())
        .bind(account.total_losses.to_string())
        .bind(account.is_active)
        .bind(account.created_at.to_rfc3339())
        .bind(account.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Overwrite every mutable column of an account.
    pub async fn update_account(&self, conn: &mut SqliteConnection, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET
                name = ?, broker = ?, current_balance = ?, initial_capital = ?,
                target_balance = ?, withdrawal_threshold = ?, total_deposits = ?,
                total_withdrawals = ?, total_profits = ?, total_losses = ?,
                is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&account.name)
        .bind(account.broker.as_str())
        .bind(account.current_balance.to_string())
        .bind(account.initial_capital.to_string())
        .bind(account.target_balance.to_string())
        .bind(account.withdrawal_threshold.to_string())
        .bind(account.total_deposits.to_string())
        .bind(account.total_withdrawals.to_string())
        .bind(account.total_profits.to_string())
        .bind(account.total_losses.to_string())
        .bind(account.is_active)
        .bind(account.updated_at.to_rfc3339())
        .bind(account.id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update account")?;
        Ok(())
    }

    /// Persist only the cached balance.
    pub async fn set_current_balance(
        &self,
        conn: &mut SqliteConnection,
        id: AccountId,
        balance: Decimal,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET current_balance = ?, updated_at = ? WHERE id = ?")
            .bind(balance.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to store balance")?;
        Ok(())
    }

    /// Delete an account together with the entries it sourced.
    pub async fn delete_account(&self, conn: &mut SqliteConnection, id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM transactions WHERE account_id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete account transactions")?;

        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete account")?;
        Ok(())
    }

    pub async fn fetch_account(
        &self,
        conn: &mut SqliteConnection,
        id: AccountId,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let mut conn = self.acquire().await?;
        self.fetch_account(&mut conn, id).await
    }

    /// Get an account by name.
    pub async fn get_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        let mut conn = self.acquire().await?;
        self.fetch_account_by_name(&mut conn, name).await
    }

    pub async fn fetch_account_by_name(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE name = ?", ACCOUNT_COLUMNS))
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch account by name")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// List accounts matching the query, ordered by name.
    pub async fn list_accounts(&self, query: &AccountQuery) -> Result<Vec<Account>> {
        let mut sql = format!("SELECT {} FROM accounts WHERE 1=1", ACCOUNT_COLUMNS);
        if query.broker.is_some() {
            sql.push_str(" AND broker = ?");
        }
        if query.currency.is_some() {
            sql.push_str(" AND currency = ?");
        }
        if query.active.is_some() {
            sql.push_str(" AND is_active = ?");
        }
        sql.push_str(" ORDER BY name");

        let mut sql_query = sqlx::query(&sql);
        if let Some(broker) = query.broker {
            sql_query = sql_query.bind(broker.as_str());
        }
        if let Some(currency) = query.currency {
            sql_query = sql_query.bind(currency.as_str());
        }
        if let Some(active) = query.active {
            sql_query = sql_query.bind(active);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let broker_str: String = row.get("broker");
        let currency_str: String = row.get("currency");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            name: row.get("name"),
            broker: Broker::from_str(&broker_str)?,
            currency: Currency::from_str(&currency_str)?,
            current_balance: decimal_column(row, "current_balance")?,
            initial_capital: decimal_column(row, "initial_capital")?,
            target_balance: decimal_column(row, "target_balance")?,
            withdrawal_threshold: decimal_column(row, "withdrawal_threshold")?,
            total_deposits: decimal_column(row, "total_deposits")?,
            total_withdrawals: decimal_column(row, "total_withdrawals")?,
            total_profits: decimal_column(row, "total_profits")?,
            total_losses: decimal_column(row, "total_losses")?,
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
            updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
        })
    }

    // ========================
    // Transaction operations
    // ========================

    pub async fn insert_transaction(
        &self,
        conn: &mut SqliteConnection,
        entry: &Transaction,
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TRANSACTION_COLUMNS
        ))
        .bind(entry.id.to_string())
        .bind(entry.account_id.to_string())
        .bind(entry.kind.as_str())
        .bind(entry.amount.to_string())
        .bind(entry.currency.as_str())
        .bind(entry.date.to_rfc3339())
        .bind(&entry.description)
        .bind(&entry.source)
        .bind(entry.target_account_id.map(|id| id.to_string()))
        .bind(entry.exchange_rate.map(|rate| rate.to_string()))
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save transaction")?;
        Ok(())
    }

    pub async fn update_transaction(
        &self,
        conn: &mut SqliteConnection,
        entry: &Transaction,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transactions SET
                type = ?, amount = ?, currency = ?, date = ?, description = ?,
                source = ?, target_account_id = ?, exchange_rate = ?
            WHERE id = ?
            "#,
        )
        .bind(entry.kind.as_str())
        .bind(entry.amount.to_string())
        .bind(entry.currency.as_str())
        .bind(entry.date.to_rfc3339())
        .bind(&entry.description)
        .bind(&entry.source)
        .bind(entry.target_account_id.map(|id| id.to_string()))
        .bind(entry.exchange_rate.map(|rate| rate.to_string()))
        .bind(entry.id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update transaction")?;
        Ok(())
    }

    pub async fn delete_transaction(&self, conn: &mut SqliteConnection, id: TransactionId) -> Result<()> {
        sqlx::query("DELETE FROM transactions WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete transaction")?;
        Ok(())
    }

    pub async fn fetch_transaction(
        &self,
        conn: &mut SqliteConnection,
        id: TransactionId,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = ?",
            TRANSACTION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch transaction")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let mut conn = self.acquire().await?;
        self.fetch_transaction(&mut conn, id).await
    }

    /// Entries whose source is the account.
    pub async fn list_sourced(
        &self,
        conn: &mut SqliteConnection,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE account_id = ? ORDER BY date",
            TRANSACTION_COLUMNS
        ))
        .bind(account_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list account transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Transfers received by the account.
    pub async fn list_incoming_transfers(
        &self,
        conn: &mut SqliteConnection,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE target_account_id = ? AND type = 'transfer' ORDER BY date",
            TRANSACTION_COLUMNS
        ))
        .bind(account_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list incoming transfers")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Distinct accounts that received transfers from the account.
    pub async fn transfer_recipients(
        &self,
        conn: &mut SqliteConnection,
        account_id: AccountId,
    ) -> Result<Vec<AccountId>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT target_account_id
            FROM transactions
            WHERE account_id = ? AND type = 'transfer' AND target_account_id IS NOT NULL
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list transfer recipients")?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("target_account_id");
                Uuid::parse_str(&id).context("Invalid target account ID")
            })
            .collect()
    }

    /// List entries with optional filters, most recent first.
    pub async fn list_transactions(&self, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        let mut sql = format!("SELECT {} FROM transactions WHERE 1=1", TRANSACTION_COLUMNS);

        // Collect all string bindings first so they live long enough
        let account_id_str = query.account_id.map(|id| id.to_string());
        let from_date_str = query.from_date.map(|dt| dt.to_rfc3339());
        let to_date_str = query.to_date.map(|dt| dt.to_rfc3339());

        if account_id_str.is_some() {
            sql.push_str(" AND (account_id = ? OR target_account_id = ?)");
        }
        if query.kind.is_some() {
            sql.push_str(" AND type = ?");
        }
        if from_date_str.is_some() {
            sql.push_str(" AND date >= ?");
        }
        if to_date_str.is_some() {
            sql.push_str(" AND date <= ?");
        }

        sql.push_str(" ORDER BY date DESC, created_at DESC");

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut sql_query = sqlx::query(&sql);
        if let Some(ref id) = account_id_str {
            sql_query = sql_query.bind(id).bind(id);
        }
        if let Some(kind) = query.kind {
            sql_query = sql_query.bind(kind.as_str());
        }
        if let Some(ref from) = from_date_str {
            sql_query = sql_query.bind(from);
        }
        if let Some(ref to) = to_date_str {
            sql_query = sql_query.bind(to);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let account_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM accounts")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let transaction_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM transactions")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let orphan_sources: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM transactions t
            WHERE NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = t.account_id)
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        // Allowed, but worth reporting: the source is still debited
        let dangling_transfers: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM transactions t
            WHERE t.type = 'transfer'
              AND NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = t.target_account_id)
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        Ok(IntegrityStats {
            account_count,
            transaction_count,
            orphan_sources,
            dangling_transfers,
        })
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let account_str: String = row.get("account_id");
        let type_str: String = row.get("type");
        let currency_str: String = row.get("currency");
        let date_str: String = row.get("date");
        let created_at_str: String = row.get("created_at");
        let target_str: Option<String> = row.get("target_account_id");
        let rate_str: Option<String> = row.get("exchange_rate");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            account_id: Uuid::parse_str(&account_str).context("Invalid account ID")?,
            kind: TransactionType::from_str(&type_str)?,
            amount: decimal_column(row, "amount")?,
            currency: Currency::from_str(&currency_str)?,
            date: parse_timestamp(&date_str).context("Invalid date")?,
            description: row.get("description"),
            source: row.get("source"),
            target_account_id: target_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid target account ID")?,
            exchange_rate: rate_str
                .map(|s| Decimal::from_str(&s))
                .transpose()
                .context("Invalid exchange rate")?,
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at")?,
        })
    }
}

/// True when a repository error comes from a UNIQUE constraint.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

fn decimal_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.get(column);
    Decimal::from_str(&raw).with_context(|| format!("Invalid decimal in column {}", column))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

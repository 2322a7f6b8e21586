use std::collections::BTreeSet;

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::{
    compute_all_balances, default_tier_rule_sets, exchange_rate, monthly_net_results,
    progress_to_next_level, recommend, recommend_tiered, reduce_balance, total_balance_in,
    Account, AccountId, AccountMetrics, AccountSummary, Amount, BalanceDrift, Broker, Currency,
    LedgerTotals, MonthlyNetResult, StatusBreakdown, StepProgress, TierRuleSet,
    TieredRecommendation, Transaction, TransactionId, TransactionType, WithdrawalRecommendation,
    WithdrawalStep, DEFAULT_WITHDRAWAL_PLAN,
};
use crate::storage::{is_unique_violation, AccountQuery, Repository, TransactionQuery};

use super::{
    AccountDeletion, AccountLocks, AccountReport, AppError, IntegrityReport, PortfolioReport,
    TotalsDrift, WithdrawalAlert,
};

/// Longest window `net_result_history` accepts.
pub const MAX_HISTORY_MONTHS: u32 = 1200;

/// Application service providing high-level operations on accounts and their ledger.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// Every mutation holds the locks of the accounts it touches and runs in a
/// single database transaction: totals, the entry itself and the recomputed
/// balances are committed together or not at all.
pub struct TrackerService {
    repo: Repository,
    locks: AccountLocks,
    plan: Vec<WithdrawalStep>,
    tiers: Vec<TierRuleSet>,
}

/// Input for creating an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub broker: Broker,
    pub currency: Currency,
    pub initial_capital: Amount,
    pub target_balance: Amount,
    pub withdrawal_threshold: Amount,
    /// Seeded balance; defaults to the initial capital
    pub current_balance: Option<Amount>,
    /// Record the initial capital as a deposit so the ledger accounts for it
    pub opening_deposit: bool,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, broker: Broker, currency: Currency, initial_capital: Amount) -> Self {
        Self {
            name: name.into(),
            broker,
            currency,
            initial_capital,
            target_balance: Decimal::ZERO,
            withdrawal_threshold: Decimal::ZERO,
            current_balance: None,
            opening_deposit: false,
        }
    }
}

/// Editable account fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub broker: Option<Broker>,
    pub initial_capital: Option<Amount>,
    pub target_balance: Option<Amount>,
    pub withdrawal_threshold: Option<Amount>,
    pub is_active: Option<bool>,
}

/// Input for recording a ledger entry.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub kind: TransactionType,
    pub amount: Amount,
    /// Defaults to now
    pub date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub target_account_id: Option<AccountId>,
    /// Filled from the static table for cross-currency transfers when absent
    pub exchange_rate: Option<Decimal>,
    /// Skip the balance check for debits
    pub force: bool,
}

impl NewTransaction {
    pub fn new(account_id: AccountId, kind: TransactionType, amount: Amount) -> Self {
        Self {
            account_id,
            kind,
            amount,
            date: None,
            description: None,
            source: None,
            target_account_id: None,
            exchange_rate: None,
            force: false,
        }
    }

    pub fn transfer(from: AccountId, to: AccountId, amount: Amount) -> Self {
        let mut input = Self::new(from, TransactionType::Transfer, amount);
        input.target_account_id = Some(to);
        input
    }
}

/// Editable entry fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TransactionUpdate {
    pub kind: Option<TransactionType>,
    pub amount: Option<Amount>,
    pub date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub target_account_id: Option<AccountId>,
    pub exchange_rate: Option<Decimal>,
    pub force: bool,
}

impl TrackerService {
    /// Create a new service with the given repository and the default plans.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            locks: AccountLocks::new(),
            plan: DEFAULT_WITHDRAWAL_PLAN.to_vec(),
            tiers: default_tier_rule_sets(),
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Replace the withdrawal plan. Steps must be ordered by increasing goal.
    pub fn with_plan(mut self, plan: Vec<WithdrawalStep>) -> Self {
        self.plan = plan;
        self
    }

    pub fn plan(&self) -> &[WithdrawalStep] {
        &self.plan
    }

    pub fn tier_rule_sets(&self) -> &[TierRuleSet] {
        &self.tiers
    }

    // ========================
    // Account operations
    // ========================

    /// Create a new account.
    pub async fn create_account(&self, input: NewAccount) -> Result<Account, AppError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::InvalidInput("account name cannot be empty".into()));
        }
        for (field, value) in [
            ("initial capital", input.initial_capital),
            ("target balance", input.target_balance),
            ("withdrawal threshold", input.withdrawal_threshold),
        ] {
            if value < Decimal::ZERO {
                return Err(AppError::InvalidAmount(format!("{} cannot be negative", field)));
            }
        }

        let mut account = Account::new(name, input.broker, input.currency, input.initial_capital)
            .with_target_balance(input.target_balance)
            .with_withdrawal_threshold(input.withdrawal_threshold);
        if let Some(balance) = input.current_balance {
            account = account.with_current_balance(balance);
        }

        let _guard = self.locks.acquire(&[account.id]).await;
        let mut uow = self.repo.begin().await?;
        if self.repo.fetch_account_by_name(&mut uow, &account.name).await?.is_some() {
            return Err(AppError::AccountAlreadyExists(account.name));
        }
        self.repo
            .insert_account(&mut uow, &account)
            .await
            .map_err(|err| name_conflict(err, &account.name))?;

        if input.opening_deposit && account.initial_capital > Decimal::ZERO {
            let deposit = Transaction::new(
                account.id,
                TransactionType::Deposit,
                account.initial_capital,
                account.currency,
                account.created_at,
            )
            .with_description("Opening balance");
            account.apply_totals(deposit.kind, deposit.amount)?;
            self.repo.update_account(&mut uow, &account).await?;
            self.repo.insert_transaction(&mut uow, &deposit).await?;
            account.current_balance = self.persist_balance(&mut uow, &account).await?;
        }

        uow.commit().await?;

        tracing::info!(
            account = %account.name,
            broker = %account.broker,
            currency = %account.currency,
            balance = %account.current_balance,
            "account created"
        );
        Ok(account)
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))
    }

    /// Get an account by name.
    pub async fn get_account_by_name(&self, name: &str) -> Result<Account, AppError> {
        self.repo
            .get_account_by_name(name)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(name.to_string()))
    }

    /// Look an account up by ID or, failing that, by name.
    pub async fn resolve_account(&self, key: &str) -> Result<Account, AppError> {
        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(account) = self.repo.get_account(id).await? {
                return Ok(account);
            }
        }
        self.get_account_by_name(key).await
    }

    /// List accounts, ordered by name.
    pub async fn list_accounts(&self, filter: &AccountQuery) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts(filter).await?)
    }

    /// Edit account settings. Balances and totals are owned by the ledger.
    pub async fn update_account(&self, id: AccountId, update: AccountUpdate) -> Result<Account, AppError> {
        let _guard = self.locks.acquire(&[id]).await;

        let mut uow = self.repo.begin().await?;
        let mut account = self
            .repo
            .fetch_account(&mut uow, id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::InvalidInput("account name cannot be empty".into()));
            }
            if name != account.name
                && self.repo.fetch_account_by_name(&mut uow, &name).await?.is_some()
            {
                return Err(AppError::AccountAlreadyExists(name));
            }
            account.name = name;
        }
        if let Some(broker) = update.broker {
            account.broker = broker;
        }
        if let Some(capital) = update.initial_capital {
            account.initial_capital = non_negative("initial capital", capital)?;
        }
        if let Some(target) = update.target_balance {
            account.target_balance = non_negative("target balance", target)?;
        }
        if let Some(threshold) = update.withdrawal_threshold {
            account.withdrawal_threshold = non_negative("withdrawal threshold", threshold)?;
        }
        if let Some(active) = update.is_active {
            account.is_active = active;
        }
        account.updated_at = Utc::now();

        self.repo
            .update_account(&mut uow, &account)
            .await
            .map_err(|err| name_conflict(err, &account.name))?;
        uow.commit().await?;

        tracing::info!(account = %account.name, "account updated");
        Ok(account)
    }

    /// Delete an account and the entries it sourced. Accounts that received
    /// transfers from it are recomputed; transfers it received stay on the
    /// senders' ledgers.
    pub async fn delete_account(&self, id: AccountId) -> Result<AccountDeletion, AppError> {
        loop {
            let recipients = {
                let mut conn = self.repo.acquire().await?;
                self.repo.transfer_recipients(&mut conn, id).await?
            };
            let mut ids = recipients.clone();
            ids.push(id);
            let guard = self.locks.acquire(&ids).await;

            let mut uow = self.repo.begin().await?;
            let account = self
                .repo
                .fetch_account(&mut uow, id)
                .await?
                .ok_or_else(|| AppError::AccountNotFound(id.to_string()))?;

            // A transfer committed between the lookup and the lock: start over.
            let recipients = self.repo.transfer_recipients(&mut uow, id).await?;
            if !guard.covers(&recipients) {
                continue;
            }

            let removed_transactions = self.repo.list_sourced(&mut uow, id).await?.len();
            self.repo.delete_account(&mut uow, id).await?;
            let recomputed = self.refresh_balances(&mut uow, &recipients).await?;
            uow.commit().await?;

            tracing::info!(
                account = %account.name,
                removed_transactions,
                recomputed = recomputed.len(),
                "account deleted"
            );
            return Ok(AccountDeletion {
                account,
                removed_transactions,
                recomputed,
            });
        }
    }

    // ========================
    // Transaction operations
    // ========================

    /// Record a ledger entry and update every account it touches.
    pub async fn record_transaction(&self, input: NewTransaction) -> Result<Transaction, AppError> {
        let mut ids = vec![input.account_id];
        ids.extend(input.target_account_id);
        let _guard = self.locks.acquire(&ids).await;

        let mut uow = self.repo.begin().await?;
        let mut account = self
            .repo
            .fetch_account(&mut uow, input.account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(input.account_id.to_string()))?;

        let date = input.date.unwrap_or_else(Utc::now);
        let mut entry = Transaction::new(account.id, input.kind, input.amount, account.currency, date);
        entry.target_account_id = input.target_account_id;
        entry.exchange_rate = input.exchange_rate;
        entry.description = input.description;
        entry.source = input.source;
        entry.validate()?;

        if let Some(target_id) = entry.target_account_id {
            let target = self
                .repo
                .fetch_account(&mut uow, target_id)
                .await?
                .ok_or_else(|| AppError::AccountNotFound(target_id.to_string()))?;
            if entry.exchange_rate.is_none() && target.currency != account.currency {
                entry.exchange_rate = Some(exchange_rate(account.currency, target.currency));
            }
        }

        if entry.kind.is_debit() && !input.force {
            let balance = self.ledger_balance(&mut uow, account.id).await?;
            if balance < entry.amount {
                return Err(AppError::InsufficientBalance {
                    account_name: account.name,
                    balance,
                    required: entry.amount,
                    currency: account.currency,
                });
            }
        }

        account.apply_totals(entry.kind, entry.amount)?;
        account.updated_at = Utc::now();
        self.repo.update_account(&mut uow, &account).await?;
        self.repo.insert_transaction(&mut uow, &entry).await?;
        self.refresh_balances(&mut uow, &entry.affected_accounts()).await?;
        uow.commit().await?;

        tracing::info!(
            id = %entry.id,
            account = %account.name,
            kind = %entry.kind,
            amount = %entry.amount,
            currency = %entry.currency,
            "transaction recorded"
        );
        Ok(entry)
    }

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))
    }

    /// List entries, most recent first.
    pub async fn list_transactions(&self, filter: &TransactionQuery) -> Result<Vec<Transaction>, AppError> {
        Ok(self.repo.list_transactions(filter).await?)
    }

    /// Edit an entry. The old effect on the source account's totals is
    /// reverted and the new one applied; every account touched before or
    /// after the edit is recomputed.
    pub async fn update_transaction(
        &self,
        id: TransactionId,
        update: TransactionUpdate,
    ) -> Result<Transaction, AppError> {
        loop {
            let current = self.get_transaction(id).await?;
            let mut ids = current.affected_accounts();
            ids.extend(update.target_account_id);
            let guard = self.locks.acquire(&ids).await;

            let mut uow = self.repo.begin().await?;
            let old = self
                .repo
                .fetch_transaction(&mut uow, id)
                .await?
                .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))?;
            // Edited concurrently onto another account: start over.
            if !guard.covers(&old.affected_accounts()) {
                continue;
            }

            let mut account = self
                .repo
                .fetch_account(&mut uow, old.account_id)
                .await?
                .ok_or_else(|| AppError::AccountNotFound(old.account_id.to_string()))?;

            let mut entry = old.clone();
            if let Some(kind) = update.kind {
                entry.kind = kind;
            }
            if let Some(amount) = update.amount {
                entry.amount = amount;
            }
            if let Some(date) = update.date {
                entry.date = date;
            }
            if let Some(description) = update.description.clone() {
                entry.description = Some(description);
            }
            if let Some(source) = update.source.clone() {
                entry.source = Some(source);
            }

            if entry.kind == TransactionType::Transfer {
                entry.target_account_id = update.target_account_id.or(old.target_account_id);
                entry.exchange_rate = match update.exchange_rate {
                    Some(rate) => Some(rate),
                    None if entry.target_account_id == old.target_account_id => old.exchange_rate,
                    None => None,
                };
            } else {
                entry.target_account_id = update.target_account_id;
                entry.exchange_rate = update.exchange_rate;
            }
            entry.validate()?;

            if let Some(target_id) = entry.target_account_id {
                let target = self
                    .repo
                    .fetch_account(&mut uow, target_id)
                    .await?
                    .ok_or_else(|| AppError::AccountNotFound(target_id.to_string()))?;
                if entry.exchange_rate.is_none() && target.currency != account.currency {
                    entry.exchange_rate = Some(exchange_rate(account.currency, target.currency));
                }
            }

            account.revert_totals(old.kind, old.amount)?;
            account.apply_totals(entry.kind, entry.amount)?;
            account.updated_at = Utc::now();
            self.repo.update_account(&mut uow, &account).await?;
            self.repo.update_transaction(&mut uow, &entry).await?;

            let touched: Vec<AccountId> = old
                .affected_accounts()
                .into_iter()
                .chain(entry.affected_accounts())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let refreshed = self.refresh_balances(&mut uow, &touched).await?;

            if entry.kind.is_debit() && !update.force {
                let balance = refreshed
                    .iter()
                    .find(|a| a.id == account.id)
                    .map(|a| a.current_balance)
                    .unwrap_or_default();
                if balance < Decimal::ZERO {
                    return Err(AppError::InsufficientBalance {
                        account_name: account.name,
                        balance: balance + entry.amount,
                        required: entry.amount,
                        currency: account.currency,
                    });
                }
            }

            uow.commit().await?;

            tracing::info!(
                id = %entry.id,
                account = %account.name,
                kind = %entry.kind,
                old_amount = %old.amount,
                amount = %entry.amount,
                "transaction updated"
            );
            return Ok(entry);
        }
    }

    /// Delete an entry, reverting its effect.
    pub async fn delete_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        loop {
            let current = self.get_transaction(id).await?;
            let guard = self.locks.acquire(&current.affected_accounts()).await;

            let mut uow = self.repo.begin().await?;
            let entry = self
                .repo
                .fetch_transaction(&mut uow, id)
                .await?
                .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))?;
            if !guard.covers(&entry.affected_accounts()) {
                continue;
            }

            if let Some(mut account) = self.repo.fetch_account(&mut uow, entry.account_id).await? {
                account.revert_totals(entry.kind, entry.amount)?;
                account.updated_at = Utc::now();
                self.repo.update_account(&mut uow, &account).await?;
            }
            self.repo.delete_transaction(&mut uow, id).await?;
            self.refresh_balances(&mut uow, &entry.affected_accounts()).await?;
            uow.commit().await?;

            tracing::info!(
                id = %entry.id,
                kind = %entry.kind,
                amount = %entry.amount,
                "transaction deleted"
            );
            return Ok(entry);
        }
    }

    // ========================
    // Balance reduction
    // ========================

    /// Reduce the account's ledger without touching the stored balance.
    pub async fn compute_balance(&self, id: AccountId) -> Result<Amount, AppError> {
        let mut conn = self.repo.acquire().await?;
        self.repo
            .fetch_account(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))?;
        self.ledger_balance(&mut conn, id).await
    }

    /// Reduce the account's ledger and store the result as its balance.
    pub async fn recompute_balance(&self, id: AccountId) -> Result<Amount, AppError> {
        let _guard = self.locks.acquire(&[id]).await;

        let mut uow = self.repo.begin().await?;
        let account = self
            .repo
            .fetch_account(&mut uow, id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))?;
        let balance = self.ledger_balance(&mut uow, id).await?;
        self.repo.set_current_balance(&mut uow, id, balance).await?;
        uow.commit().await?;

        if balance != account.current_balance {
            tracing::warn!(
                account = %account.name,
                cached = %account.current_balance,
                computed = %balance,
                "corrected drifted balance"
            );
        }
        Ok(balance)
    }

    /// Recompute every account. Returns the balances that had drifted.
    pub async fn recompute_all_balances(&self) -> Result<Vec<BalanceDrift>, AppError> {
        let accounts = self.repo.list_accounts(&AccountQuery::default()).await?;
        let ids: Vec<AccountId> = accounts.iter().map(|a| a.id).collect();
        let _guard = self.locks.acquire(&ids).await;

        let mut uow = self.repo.begin().await?;
        let mut drifts = Vec::new();
        for id in ids {
            // Deleted while waiting for the locks
            let Some(account) = self.repo.fetch_account(&mut uow, id).await? else {
                continue;
            };
            let computed = self.persist_balance(&mut uow, &account).await?;
            if computed != account.current_balance {
                tracing::warn!(
                    account = %account.name,
                    cached = %account.current_balance,
                    %computed,
                    "corrected drifted balance"
                );
                drifts.push(BalanceDrift {
                    account_id: account.id,
                    account_name: account.name,
                    cached: account.current_balance,
                    computed,
                });
            }
        }
        uow.commit().await?;

        tracing::info!(corrected = drifts.len(), "balances recomputed");
        Ok(drifts)
    }

    /// Ledger reduction for one account inside the caller's unit of work.
    async fn ledger_balance(&self, conn: &mut SqliteConnection, id: AccountId) -> Result<Amount, AppError> {
        let sourced = self.repo.list_sourced(conn, id).await?;
        let incoming = self.repo.list_incoming_transfers(conn, id).await?;
        Ok(reduce_balance(id, &sourced, &incoming)?)
    }

    async fn persist_balance(&self, conn: &mut SqliteConnection, account: &Account) -> Result<Amount, AppError> {
        let balance = self.ledger_balance(conn, account.id).await?;
        self.repo.set_current_balance(conn, account.id, balance).await?;
        Ok(balance)
    }

    /// Recompute and persist the given accounts, skipping deleted ones.
    async fn refresh_balances(
        &self,
        conn: &mut SqliteConnection,
        ids: &[AccountId],
    ) -> Result<Vec<Account>, AppError> {
        let mut refreshed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(mut account) = self.repo.fetch_account(conn, *id).await? else {
                continue;
            };
            let balance = self.persist_balance(conn, &account).await?;
            tracing::debug!(
                account = %account.name,
                previous = %account.current_balance,
                %balance,
                "balance refreshed"
            );
            account.current_balance = balance;
            refreshed.push(account);
        }
        Ok(refreshed)
    }

    // ========================
    // Withdrawals
    // ========================

    /// Step-plan recommendation for one account.
    pub async fn recommend_withdrawal(&self, id: AccountId) -> Result<Option<WithdrawalRecommendation>, AppError> {
        let account = self.get_account(id).await?;
        Ok(recommend(&account, &self.plan))
    }

    /// Recommendations for every active account that has one.
    pub async fn withdrawal_alerts(&self) -> Result<Vec<WithdrawalAlert>, AppError> {
        let accounts = self
            .repo
            .list_accounts(&AccountQuery {
                active: Some(true),
                ..Default::default()
            })
            .await?;

        Ok(accounts
            .into_iter()
            .filter_map(|account| {
                recommend(&account, &self.plan).map(|recommendation| WithdrawalAlert {
                    account_name: account.name,
                    recommendation,
                })
            })
            .collect())
    }

    pub async fn withdrawal_progress(&self, id: AccountId) -> Result<StepProgress, AppError> {
        let account = self.get_account(id).await?;
        Ok(progress_to_next_level(&account, &self.plan))
    }

    /// Recommendation from the per-currency capital-range rules.
    pub async fn recommend_tiered(&self, id: AccountId) -> Result<Option<TieredRecommendation>, AppError> {
        let account = self.get_account(id).await?;
        Ok(recommend_tiered(&account, &self.tiers))
    }

    // ========================
    // Analytics
    // ========================

    pub async fn account_report(&self, id: AccountId) -> Result<AccountReport, AppError> {
        let account = self.get_account(id).await?;
        let transaction_count = self
            .repo
            .list_transactions(&TransactionQuery {
                account_id: Some(id),
                ..Default::default()
            })
            .await?
            .len();

        Ok(AccountReport {
            metrics: AccountMetrics::for_account(&account),
            recommendation: recommend(&account, &self.plan),
            progress: progress_to_next_level(&account, &self.plan),
            tiered: recommend_tiered(&account, &self.tiers),
            transaction_count,
            account,
        })
    }

    pub async fn account_metrics(&self, id: AccountId) -> Result<AccountMetrics, AppError> {
        let account = self.get_account(id).await?;
        Ok(AccountMetrics::for_account(&account))
    }

    /// Sum of all balances expressed in one currency.
    pub async fn total_balance_in(&self, currency: Currency) -> Result<Amount, AppError> {
        let accounts = self.repo.list_accounts(&AccountQuery::default()).await?;
        Ok(total_balance_in(&accounts, currency))
    }

    pub async fn portfolio_report(&self) -> Result<PortfolioReport, AppError> {
        let accounts = self.repo.list_accounts(&AccountQuery::default()).await?;

        Ok(PortfolioReport {
            as_of: Utc::now(),
            summary: AccountSummary::from_accounts(&accounts),
            total_usd: total_balance_in(&accounts, Currency::Usd),
            total_eur: total_balance_in(&accounts, Currency::Eur),
            breakdowns: Currency::ALL
                .into_iter()
                .map(|currency| StatusBreakdown::from_accounts(&accounts, currency))
                .collect(),
        })
    }

    /// Profit minus loss per month over the last `months` months, oldest first.
    pub async fn net_result_history(&self, months: u32) -> Result<Vec<MonthlyNetResult>, AppError> {
        if months > MAX_HISTORY_MONTHS {
            return Err(AppError::InvalidInput(format!(
                "history is limited to {} months, got {}",
                MAX_HISTORY_MONTHS, months
            )));
        }

        let now = Utc::now();
        let from_date = now
            .checked_sub_months(Months::new(months))
            .ok_or_else(|| AppError::InvalidInput(format!("{} months reaches before any date", months)))?;
        let entries = self
            .repo
            .list_transactions(&TransactionQuery {
                from_date: Some(from_date),
                ..Default::default()
            })
            .await?;
        Ok(monthly_net_results(&entries, now, months)?)
    }

    // ========================
    // Integrity
    // ========================

    /// Compare every cached balance and running total with the ledger,
    /// without fixing anything.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let stats = self.repo.get_integrity_stats().await?;
        let accounts = self.repo.list_accounts(&AccountQuery::default()).await?;
        let entries = self.repo.list_transactions(&TransactionQuery::default()).await?;
        let balances = compute_all_balances(&entries)?;

        let mut drifts = Vec::new();
        let mut totals_drifts = Vec::new();
        for account in accounts {
            let computed = balances.get(&account.id).copied().unwrap_or(Decimal::ZERO);
            if computed != account.current_balance {
                tracing::warn!(
                    account = %account.name,
                    cached = %account.current_balance,
                    %computed,
                    "cached balance differs from ledger"
                );
                drifts.push(BalanceDrift {
                    account_id: account.id,
                    account_name: account.name.clone(),
                    cached: account.current_balance,
                    computed,
                });
            }

            let cached = LedgerTotals {
                deposits: account.total_deposits,
                withdrawals: account.total_withdrawals,
                profits: account.total_profits,
                losses: account.total_losses,
            };
            let computed = LedgerTotals::from_entries(account.id, &entries)?;
            if cached != computed {
                tracing::warn!(account = %account.name, "running totals differ from ledger");
                totals_drifts.push(TotalsDrift {
                    account_id: account.id,
                    account_name: account.name,
                    cached,
                    computed,
                });
            }
        }

        Ok(IntegrityReport {
            account_count: stats.account_count,
            transaction_count: stats.transaction_count,
            orphan_sources: stats.orphan_sources,
            dangling_transfers: stats.dangling_transfers,
            drifts,
            totals_drifts,
        })
    }
}

fn name_conflict(err: anyhow::Error, name: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::AccountAlreadyExists(name.to_string())
    } else {
        AppError::Database(err)
    }
}

fn non_negative(field: &str, value: Amount) -> Result<Amount, AppError> {
    if value < Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!("{} cannot be negative", field)));
    }
    Ok(value)
}

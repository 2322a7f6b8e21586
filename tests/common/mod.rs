// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;
use tradetracker::application::{NewAccount, NewTransaction, TrackerService};
use tradetracker::domain::{Account, AccountId, Broker, Currency, Transaction, TransactionType};

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(TrackerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = TrackerService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Record a non-transfer entry, skipping the balance check.
pub async fn record(
    service: &TrackerService,
    account: AccountId,
    kind: TransactionType,
    amount: Decimal,
) -> Result<Transaction> {
    let mut input = NewTransaction::new(account, kind, amount);
    input.force = true;
    Ok(service.record_transaction(input).await?)
}

/// Record a transfer with an optional explicit exchange rate.
pub async fn transfer(
    service: &TrackerService,
    from: AccountId,
    to: AccountId,
    amount: Decimal,
    rate: Option<Decimal>,
) -> Result<Transaction> {
    let mut input = NewTransaction::transfer(from, to, amount);
    input.exchange_rate = rate;
    Ok(service.record_transaction(input).await?)
}

/// Test fixture: standard account setup
pub struct StandardAccounts;

impl StandardAccounts {
    /// Two empty accounts: "Robo USD" (USD) and "IC EUR" (EUR)
    pub async fn create_pair(service: &TrackerService) -> Result<(Account, Account)> {
        let usd = service
            .create_account(NewAccount::new(
                "Robo USD",
                Broker::Roboforex,
                Currency::Usd,
                Decimal::ZERO,
            ))
            .await?;
        let eur = service
            .create_account(NewAccount::new(
                "IC EUR",
                Broker::IcMarkets,
                Currency::Eur,
                Decimal::ZERO,
            ))
            .await?;
        Ok((usd, eur))
    }

    /// Account whose ledger opens with its capital as a deposit
    pub async fn create_funded(
        service: &TrackerService,
        name: &str,
        currency: Currency,
        capital: Decimal,
        target: Decimal,
    ) -> Result<Account> {
        let mut input = NewAccount::new(name, Broker::Other, currency, capital);
        input.target_balance = target;
        input.opening_deposit = true;
        Ok(service.create_account(input).await?)
    }
}

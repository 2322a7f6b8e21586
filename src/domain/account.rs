use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, Currency, EntryError, ParseEnumError, TransactionType};

pub type AccountId = Uuid;

/// Broker holding the trading account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Broker {
    Roboforex,
    #[serde(rename = "IC Markets")]
    IcMarkets,
    Other,
}

impl Broker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Broker::Roboforex => "Roboforex",
            Broker::IcMarkets => "IC Markets",
            Broker::Other => "Other",
        }
    }
}

impl FromStr for Broker {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "roboforex" => Ok(Broker::Roboforex),
            "icmarkets" => Ok(Broker::IcMarkets),
            "other" => Ok(Broker::Other),
            _ => Err(ParseEnumError::new("broker", s)),
        }
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A currency-denominated trading account.
///
/// `current_balance` is a cache of the ledger reduction over the account's
/// entries; the service rewrites it after every mutation and on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub broker: Broker,
    pub currency: Currency,
    pub current_balance: Amount,
    /// Baseline for profit calculation
    pub initial_capital: Amount,
    /// Balance goal
    pub target_balance: Amount,
    /// Balance above which a withdrawal alert is raised
    pub withdrawal_threshold: Amount,
    pub total_deposits: Amount,
    pub total_withdrawals: Amount,
    pub total_profits: Amount,
    pub total_losses: Amount,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(name: String, broker: Broker, currency: Currency, initial_capital: Amount) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            broker,
            currency,
            current_balance: initial_capital,
            initial_capital,
            target_balance: Decimal::ZERO,
            withdrawal_threshold: Decimal::ZERO,
            total_deposits: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
            total_profits: Decimal::ZERO,
            total_losses: Decimal::ZERO,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_target_balance(mut self, target: Amount) -> Self {
        self.target_balance = target;
        self
    }

    pub fn with_withdrawal_threshold(mut self, threshold: Amount) -> Self {
        self.withdrawal_threshold = threshold;
        self
    }

    pub fn with_current_balance(mut self, balance: Amount) -> Self {
        self.current_balance = balance;
        self
    }

    pub fn with_totals(
        mut self,
        deposits: Amount,
        withdrawals: Amount,
        profits: Amount,
        losses: Amount,
    ) -> Self {
        self.total_deposits = deposits;
        self.total_withdrawals = withdrawals;
        self.total_profits = profits;
        self.total_losses = losses;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Net trading result: profits minus losses.
    pub fn net_result(&self) -> Amount {
        self.total_profits - self.total_losses
    }

    /// Add a ledger entry's effect to the running totals.
    /// Transfers move capital between accounts and leave the totals alone.
    pub fn apply_totals(&mut self, kind: TransactionType, amount: Amount) -> Result<(), EntryError> {
        self.adjust_totals(kind, amount)
    }

    /// Exact inverse of [`Account::apply_totals`].
    pub fn revert_totals(&mut self, kind: TransactionType, amount: Amount) -> Result<(), EntryError> {
        self.adjust_totals(kind, -amount)
    }

    fn adjust_totals(&mut self, kind: TransactionType, delta: Amount) -> Result<(), EntryError> {
        let total = match kind {
            TransactionType::Deposit => &mut self.total_deposits,
            TransactionType::Withdrawal => &mut self.total_withdrawals,
            TransactionType::Profit => &mut self.total_profits,
            TransactionType::Loss => &mut self.total_losses,
            TransactionType::Transfer => return Ok(()),
        };
        *total = total.checked_add(delta).ok_or(EntryError::Overflow)?;
        Ok(())
    }
}

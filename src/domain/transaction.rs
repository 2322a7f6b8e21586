use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount, Currency, ParseEnumError};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Profit,
    Loss,
    /// Moves funds to another account, possibly in another currency
    Transfer,
}

impl TransactionType {
    pub const ALL: [TransactionType; 5] = [
        TransactionType::Deposit,
        TransactionType::Withdrawal,
        TransactionType::Profit,
        TransactionType::Loss,
        TransactionType::Transfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Profit => "profit",
            TransactionType::Loss => "loss",
            TransactionType::Transfer => "transfer",
        }
    }

    /// True for entries that take money out of the source account.
    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            TransactionType::Withdrawal | TransactionType::Loss | TransactionType::Transfer
        )
    }
}

impl FromStr for TransactionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "profit" => Ok(TransactionType::Profit),
            "loss" => Ok(TransactionType::Loss),
            "transfer" => Ok(TransactionType::Transfer),
            _ => Err(ParseEnumError::new("transaction type", s)),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger entry. A transfer is one record read two ways: a debit at face
/// value on `account_id`, a credit scaled by `exchange_rate` on `target_account_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    /// Source account
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Always non-negative; the type carries the direction
    pub amount: Amount,
    /// Currency of the source account
    pub currency: Currency,
    /// When the operation happened
    pub date: DateTime<Utc>,
    pub description: Option<String>,
    /// Origin of the funds (bank, card, ...) for deposits and withdrawals
    pub source: Option<String>,
    /// Transfers only: receiving account
    pub target_account_id: Option<AccountId>,
    /// Transfers only: multiplier applied on the receiving side
    pub exchange_rate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        account_id: AccountId,
        kind: TransactionType,
        amount: Amount,
        currency: Currency,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            kind,
            amount,
            currency,
            date,
            description: None,
            source: None,
            target_account_id: None,
            exchange_rate: None,
            created_at: Utc::now(),
        }
    }

    pub fn transfer(
        from: AccountId,
        to: AccountId,
        amount: Amount,
        currency: Currency,
        date: DateTime<Utc>,
        exchange_rate: Option<Decimal>,
    ) -> Self {
        let mut entry = Self::new(from, TransactionType::Transfer, amount, currency, date);
        entry.target_account_id = Some(to);
        entry.exchange_rate = exchange_rate;
        entry
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Signed contribution to the source account's balance.
    pub fn source_effect(&self) -> Amount {
        if self.kind.is_debit() {
            -self.amount
        } else {
            self.amount
        }
    }

    /// Contribution to the receiving account's balance, for transfers.
    pub fn destination_credit(&self) -> Result<Option<Amount>, EntryError> {
        if self.kind != TransactionType::Transfer || self.target_account_id.is_none() {
            return Ok(None);
        }
        match self.exchange_rate {
            Some(rate) => self
                .amount
                .checked_mul(rate)
                .map(Some)
                .ok_or(EntryError::Overflow),
            None => Ok(Some(self.amount)),
        }
    }

    /// Accounts whose balance this entry changes.
    pub fn affected_accounts(&self) -> Vec<AccountId> {
        let mut ids = vec![self.account_id];
        if self.kind == TransactionType::Transfer {
            if let Some(target) = self.target_account_id.filter(|t| *t != self.account_id) {
                ids.push(target);
            }
        }
        ids
    }

    /// Check the shape of the entry independently of any account state.
    pub fn validate(&self) -> Result<(), EntryError> {
        if self.amount <= Decimal::ZERO {
            return Err(EntryError::NonPositiveAmount(self.amount));
        }

        match self.kind {
            TransactionType::Transfer => {
                let target = self.target_account_id.ok_or(EntryError::MissingTarget)?;
                if target == self.account_id {
                    return Err(EntryError::SelfTransfer);
                }
                if let Some(rate) = self.exchange_rate.filter(|r| *r <= Decimal::ZERO) {
                    return Err(EntryError::InvalidExchangeRate(rate));
                }
                self.destination_credit()?;
            }
            _ => {
                if self.target_account_id.is_some() || self.exchange_rate.is_some() {
                    return Err(EntryError::TargetOnNonTransfer(self.kind));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    NonPositiveAmount(Amount),
    MissingTarget,
    SelfTransfer,
    InvalidExchangeRate(Decimal),
    TargetOnNonTransfer(TransactionType),
    /// A balance, total or credited amount does not fit in a decimal
    Overflow,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryError::NonPositiveAmount(amount) => {
                write!(f, "amount must be positive, got {}", amount)
            }
            EntryError::MissingTarget => write!(f, "transfer requires a target account"),
            EntryError::SelfTransfer => write!(f, "cannot transfer to the same account"),
            EntryError::InvalidExchangeRate(rate) => {
                write!(f, "exchange rate must be positive, got {}", rate)
            }
            EntryError::TargetOnNonTransfer(kind) => {
                write!(f, "a {} cannot carry a target account or exchange rate", kind)
            }
            EntryError::Overflow => write!(f, "amount out of range"),
        }
    }
}

impl std::error::Error for EntryError {}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn ids() -> (AccountId, AccountId) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_source_effect_sign() {
        let (a, _) = ids();
        let now = Utc::now();
        for kind in TransactionType::ALL {
            let entry = Transaction::new(a, kind, dec!(10), Currency::Usd, now);
            let expected = if kind.is_debit() { dec!(-10) } else { dec!(10) };
            assert_eq!(entry.source_effect(), expected, "{}", kind);
        }
    }

    #[test]
    fn test_destination_credit_applies_rate() {
        let (a, b) = ids();
        let entry = Transaction::transfer(a, b, dec!(40), Currency::Usd, Utc::now(), Some(dec!(0.9)));
        assert_eq!(entry.destination_credit(), Ok(Some(dec!(36.0))));
        assert_eq!(entry.affected_accounts(), vec![a, b]);

        let plain = Transaction::transfer(a, b, dec!(40), Currency::Usd, Utc::now(), None);
        assert_eq!(plain.destination_credit(), Ok(Some(dec!(40))));

        let deposit = Transaction::new(a, TransactionType::Deposit, dec!(5), Currency::Usd, Utc::now());
        assert_eq!(deposit.destination_credit(), Ok(None));
    }

    #[test]
    fn test_credit_overflow_is_rejected() {
        let (a, b) = ids();
        let huge = Transaction::transfer(a, b, Decimal::MAX, Currency::Eur, Utc::now(), Some(dec!(1.1)));
        assert_eq!(huge.destination_credit(), Err(EntryError::Overflow));
        assert_eq!(huge.validate(), Err(EntryError::Overflow));
    }

    #[test]
    fn test_validate() {
        let (a, b) = ids();
        let now = Utc::now();

        let zero = Transaction::new(a, TransactionType::Deposit, dec!(0), Currency::Eur, now);
        assert_eq!(zero.validate(), Err(EntryError::NonPositiveAmount(dec!(0))));

        let mut missing = Transaction::transfer(a, b, dec!(5), Currency::Eur, now, None);
        missing.target_account_id = None;
        assert_eq!(missing.validate(), Err(EntryError::MissingTarget));

        let own = Transaction::transfer(a, a, dec!(5), Currency::Eur, now, None);
        assert_eq!(own.validate(), Err(EntryError::SelfTransfer));

        let bad_rate = Transaction::transfer(a, b, dec!(5), Currency::Eur, now, Some(dec!(0)));
        assert!(matches!(bad_rate.validate(), Err(EntryError::InvalidExchangeRate(_))));

        let mut stray = Transaction::new(a, TransactionType::Profit, dec!(5), Currency::Eur, now);
        stray.target_account_id = Some(b);
        assert!(matches!(stray.validate(), Err(EntryError::TargetOnNonTransfer(_))));

        assert!(Transaction::transfer(a, b, dec!(5), Currency::Eur, now, None).validate().is_ok());
    }

    #[test]
    fn test_type_roundtrip() {
        for kind in TransactionType::ALL {
            assert_eq!(kind.as_str().parse::<TransactionType>(), Ok(kind));
        }
        assert!("refund".parse::<TransactionType>().is_err());
    }
}

use thiserror::Error;

use crate::domain::{Amount, Currency, EntryError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] EntryError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance in account {account_name}: balance {balance} {currency}, required {required}")]
    InsufficientBalance {
        account_name: String,
        balance: Amount,
        required: Amount,
        currency: Currency,
    },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    /// Referenced account or transaction does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::AccountNotFound(_) | AppError::TransactionNotFound(_)
        )
    }

    /// Storage failure; the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Database(_))
    }

    /// Malformed or out-of-range input.
    pub fn is_validation(&self) -> bool {
        !self.is_not_found() && !self.is_transient()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.into())
    }
}

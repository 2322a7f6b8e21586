use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Account, AccountId, AccountMetrics, AccountSummary, Amount, BalanceDrift, LedgerTotals,
    StatusBreakdown, StepProgress, TieredRecommendation, WithdrawalRecommendation,
};

/// Everything known about one account, as shown by `account show`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReport {
    pub account: Account,
    pub metrics: AccountMetrics,
    pub recommendation: Option<WithdrawalRecommendation>,
    pub progress: StepProgress,
    pub tiered: Option<TieredRecommendation>,
    pub transaction_count: usize,
}

/// An active account that has a withdrawal to act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalAlert {
    pub account_name: String,
    pub recommendation: WithdrawalRecommendation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioReport {
    pub as_of: DateTime<Utc>,
    pub summary: AccountSummary,
    /// Whole portfolio expressed in USD
    pub total_usd: Amount,
    /// Whole portfolio expressed in EUR
    pub total_eur: Amount,
    pub breakdowns: Vec<StatusBreakdown>,
}

/// Result of deleting an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeletion {
    pub account: Account,
    pub removed_transactions: usize,
    /// Transfer recipients whose balance was recomputed
    pub recomputed: Vec<Account>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub account_count: i64,
    pub transaction_count: i64,
    /// Entries whose source account no longer exists
    pub orphan_sources: i64,
    /// Transfers whose receiving account no longer exists
    pub dangling_transfers: i64,
    pub drifts: Vec<BalanceDrift>,
    pub totals_drifts: Vec<TotalsDrift>,
}

impl IntegrityReport {
    /// Dangling transfers are expected after an account delete and do not count.
    pub fn is_healthy(&self) -> bool {
        self.orphan_sources == 0 && self.drifts.is_empty() && self.totals_drifts.is_empty()
    }
}

/// Running totals that no longer match the entries the account sourced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsDrift {
    pub account_id: AccountId,
    pub account_name: String,
    pub cached: LedgerTotals,
    pub computed: LedgerTotals,
}

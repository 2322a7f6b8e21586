use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    convert, percent_of, round2, Account, AccountId, Amount, Currency, EntryError, Transaction, TransactionType,
};

/// Per-account figures shown on the account detail view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetrics {
    pub account_id: AccountId,
    /// Balance as a percentage of the target
    pub performance: Decimal,
    /// Profits minus losses
    pub profit_loss: Amount,
    /// Profit/loss as a percentage of the initial capital
    pub roi: Decimal,
    /// Amount above the withdrawal threshold
    pub threshold_excess: Amount,
}

impl AccountMetrics {
    pub fn for_account(account: &Account) -> Self {
        let performance = if account.target_balance > Decimal::ZERO {
            round2(percent_of(account.current_balance, account.target_balance))
        } else {
            Decimal::ZERO
        };

        let profit_loss = account.net_result();
        let roi = if account.initial_capital > Decimal::ZERO {
            round2(percent_of(profit_loss, account.initial_capital))
        } else {
            Decimal::ZERO
        };

        let threshold_excess = if account.current_balance > account.withdrawal_threshold {
            round2(account.current_balance.saturating_sub(account.withdrawal_threshold))
        } else {
            Decimal::ZERO
        };

        Self {
            account_id: account.id,
            performance,
            profit_loss: round2(profit_loss),
            roi,
            threshold_excess,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencySummary {
    pub currency: Currency,
    pub total_balance: Amount,
    pub total_target: Amount,
    /// Balance over target, in percent
    pub performance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub total_accounts: usize,
    pub active_accounts: usize,
    pub by_currency: Vec<CurrencySummary>,
}

impl AccountSummary {
    pub fn from_accounts(accounts: &[Account]) -> Self {
        let by_currency = Currency::ALL
            .into_iter()
            .map(|currency| {
                let (balance, target) = accounts
                    .iter()
                    .filter(|a| a.currency == currency)
                    .fold((Decimal::ZERO, Decimal::ZERO), |(b, t), a| {
                        (
                            b.saturating_add(a.current_balance),
                            t.saturating_add(a.target_balance),
                        )
                    });
                let performance = if target > Decimal::ZERO {
                    round2(percent_of(balance, target))
                } else {
                    Decimal::ZERO
                };
                CurrencySummary {
                    currency,
                    total_balance: round2(balance),
                    total_target: round2(target),
                    performance,
                }
            })
            .collect();

        Self {
            total_accounts: accounts.len(),
            active_accounts: accounts.iter().filter(|a| a.is_active).count(),
            by_currency,
        }
    }
}

/// Sum of all balances expressed in one currency with the static rates.
pub fn total_balance_in(accounts: &[Account], currency: Currency) -> Amount {
    round2(
        accounts
            .iter()
            .map(|a| convert(a.current_balance, a.currency, currency))
            .fold(Decimal::ZERO, Decimal::saturating_add),
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFigures {
    pub count: usize,
    pub current_balance: Amount,
    pub net_result: Amount,
    pub total_deposits: Amount,
    pub total_withdrawals: Amount,
}

/// Active versus inactive accounts, amounts converted to one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBreakdown {
    pub currency: Currency,
    pub active: StatusFigures,
    pub inactive: StatusFigures,
    pub total: StatusFigures,
}

impl StatusBreakdown {
    pub fn from_accounts(accounts: &[Account], currency: Currency) -> Self {
        let figures = |filter: &dyn Fn(&Account) -> bool| {
            let mut f = accounts
                .iter()
                .filter(|a| filter(*a))
                .fold(StatusFigures::default(), |mut f, a| {
                    let c = |v| convert(v, a.currency, currency);
                    f.count += 1;
                    f.current_balance = f.current_balance.saturating_add(c(a.current_balance));
                    f.net_result = f.net_result.saturating_add(c(a.net_result()));
                    f.total_deposits = f.total_deposits.saturating_add(c(a.total_deposits));
                    f.total_withdrawals = f.total_withdrawals.saturating_add(c(a.total_withdrawals));
                    f
                });
            f.current_balance = round2(f.current_balance);
            f.net_result = round2(f.net_result);
            f.total_deposits = round2(f.total_deposits);
            f.total_withdrawals = round2(f.total_withdrawals);
            f
        };

        Self {
            currency,
            active: figures(&|a| a.is_active),
            inactive: figures(&|a| !a.is_active),
            total: figures(&|_| true),
        }
    }
}

/// Trading result (profits minus losses) of one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyNetResult {
    /// First day of the month
    pub month: NaiveDate,
    pub usd: Amount,
    pub eur: Amount,
}

fn month_start(date: DateTime<Utc>) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or_else(|| date.date_naive())
}

/// Net results of the `months` calendar months ending with the one containing `now`,
/// oldest first. Months without profit or loss entries report zero.
pub fn monthly_net_results(
    entries: &[Transaction],
    now: DateTime<Utc>,
    months: u32,
) -> Result<Vec<MonthlyNetResult>, EntryError> {
    let last = month_start(now);
    let mut history: Vec<MonthlyNetResult> = (0..months)
        .rev()
        .filter_map(|back| last.checked_sub_months(Months::new(back)))
        .map(|month| MonthlyNetResult {
            month,
            usd: Decimal::ZERO,
            eur: Decimal::ZERO,
        })
        .collect();

    for entry in entries {
        let delta = match entry.kind {
            TransactionType::Profit => entry.amount,
            TransactionType::Loss => -entry.amount,
            _ => continue,
        };
        let month = month_start(entry.date);
        if let Some(slot) = history.iter_mut().find(|h| h.month == month) {
            let total = match entry.currency {
                Currency::Usd => &mut slot.usd,
                Currency::Eur => &mut slot.eur,
            };
            *total = total.checked_add(delta).ok_or(EntryError::Overflow)?;
        }
    }

    for slot in &mut history {
        slot.usd = round2(slot.usd);
        slot.eur = round2(slot.eur);
    }
    Ok(history)
}

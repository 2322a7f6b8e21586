use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{percent_of, round2, Account, AccountId, Amount, Currency};

/// One tier of the withdrawal plan: once the balance has grown `percent_goal`
/// percent over the initial capital, `withdrawal_rate` of the profit may be taken out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalStep {
    pub percent_goal: Decimal,
    pub withdrawal_rate: Decimal,
}

impl WithdrawalStep {
    pub const fn new(percent_goal: Decimal, withdrawal_rate: Decimal) -> Self {
        Self {
            percent_goal,
            withdrawal_rate,
        }
    }

    /// Balance at which this step is reached.
    pub fn threshold(&self, initial_capital: Amount) -> Amount {
        initial_capital.saturating_mul(Decimal::ONE + self.percent_goal / Decimal::ONE_HUNDRED)
    }
}

/// Plan shared by every account and currency, ordered by increasing goal.
pub const DEFAULT_WITHDRAWAL_PLAN: [WithdrawalStep; 6] = [
    WithdrawalStep::new(dec!(20), dec!(0.15)),
    WithdrawalStep::new(dec!(40), dec!(0.25)),
    WithdrawalStep::new(dec!(60), dec!(0.30)),
    WithdrawalStep::new(dec!(80), dec!(0.35)),
    WithdrawalStep::new(dec!(90), dec!(0.40)),
    WithdrawalStep::new(dec!(100), dec!(0.50)),
];

/// Recommendations below one unit of currency are not worth acting on.
pub const MIN_WITHDRAWAL: Amount = Decimal::ONE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecommendation {
    pub account_id: AccountId,
    /// Goal of the step reached
    pub percent_goal: Decimal,
    pub profit: Amount,
    pub amount: Amount,
    pub currency: Currency,
}

/// Profit available for withdrawal decisions: balance over initial capital.
pub fn profit_over_capital(account: &Account) -> Amount {
    account.current_balance.saturating_sub(account.initial_capital)
}

/// True when the account has the capital, target and profit a plan needs.
fn is_eligible(account: &Account) -> bool {
    account.initial_capital > Decimal::ZERO
        && account.target_balance > account.initial_capital
        && profit_over_capital(account) > Decimal::ZERO
}

/// Index of the highest step whose threshold the balance has reached.
fn reached_step_index(account: &Account, steps: &[WithdrawalStep]) -> Option<usize> {
    steps
        .iter()
        .enumerate()
        .rev()
        .find(|(_, step)| step.threshold(account.initial_capital) <= account.current_balance)
        .map(|(index, _)| index)
}

/// Suggest how much profit to take out of an account.
///
/// Pure: depends only on the account figures and the plan. `None` is a
/// valid answer, not an error.
pub fn recommend(account: &Account, steps: &[WithdrawalStep]) -> Option<WithdrawalRecommendation> {
    if !is_eligible(account) {
        tracing::debug!(account = %account.name, "not eligible for a withdrawal plan");
        return None;
    }

    let profit = profit_over_capital(account);
    let step = steps[reached_step_index(account, steps)?];

    let ceiling = profit.saturating_mul(step.withdrawal_rate);
    let amount = round2(ceiling.saturating_sub(account.total_withdrawals).max(Decimal::ZERO));
    tracing::debug!(
        account = %account.name,
        goal = %step.percent_goal,
        %profit,
        %ceiling,
        withdrawn = %account.total_withdrawals,
        "withdrawal step reached"
    );

    if amount < MIN_WITHDRAWAL {
        return None;
    }

    Some(WithdrawalRecommendation {
        account_id: account.id,
        percent_goal: step.percent_goal,
        profit: round2(profit),
        amount,
        currency: account.currency,
    })
}

/// Where an account stands between two steps of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    pub current_level: Decimal,
    pub next_level: Decimal,
    /// 0 to 100, one decimal
    pub progress_percent: Decimal,
}

/// Progress from the step reached toward the next one.
pub fn progress_to_next_level(account: &Account, steps: &[WithdrawalStep]) -> StepProgress {
    let first_goal = steps.first().map(|s| s.percent_goal).unwrap_or_default();
    let not_started = StepProgress {
        current_level: Decimal::ZERO,
        next_level: first_goal,
        progress_percent: Decimal::ZERO,
    };

    if steps.is_empty() || !is_eligible(account) {
        return not_started;
    }

    let reached = reached_step_index(account, steps);
    let next_index = reached.map_or(0, |i| i + 1);

    let Some(next) = steps.get(next_index) else {
        let top = steps[steps.len() - 1].percent_goal;
        return StepProgress {
            current_level: top,
            next_level: top,
            progress_percent: Decimal::ONE_HUNDRED,
        };
    };

    let (current_level, current_threshold) = match reached {
        Some(i) => (
            steps[i].percent_goal,
            steps[i].threshold(account.initial_capital),
        ),
        None => (Decimal::ZERO, account.initial_capital),
    };
    let next_threshold = next.threshold(account.initial_capital);

    let span = next_threshold.saturating_sub(current_threshold);
    let raw = if span > Decimal::ZERO {
        percent_of(account.current_balance.saturating_sub(current_threshold), span)
    } else {
        Decimal::ZERO
    };

    StepProgress {
        current_level,
        next_level: next.percent_goal,
        progress_percent: raw
            .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(1, rust_decimal::RoundingStrategy::MidpointAwayFromZero),
    }
}

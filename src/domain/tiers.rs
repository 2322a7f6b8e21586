use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{percent_of, profit_over_capital, round2, Account, AccountId, Amount, Currency};

/// Rule of a tier ladder: at `target_percentage` of the target balance,
/// withdraw `profit_percentage` percent of the profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierRule {
    pub target_percentage: Decimal,
    pub profit_percentage: Decimal,
}

/// Target-balance band with its own rule ladder (ascending target percentage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalRange {
    pub min_amount: Amount,
    pub max_amount: Amount,
    pub rules: Vec<TierRule>,
}

impl CapitalRange {
    fn contains(&self, target: Amount) -> bool {
        target >= self.min_amount && target <= self.max_amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierRuleSet {
    pub currency: Currency,
    pub ranges: Vec<CapitalRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieredRecommendation {
    pub account_id: AccountId,
    pub current_balance: Amount,
    pub target_balance: Amount,
    pub progress_percentage: Decimal,
    pub amount: Amount,
    pub remaining_balance: Amount,
    pub applied_rule: TierRule,
    pub applied_range_min: Amount,
    pub applied_range_max: Amount,
}

fn ladder(percentages: [Decimal; 6]) -> Vec<TierRule> {
    [dec!(20), dec!(40), dec!(60), dec!(80), dec!(90), dec!(100)]
        .into_iter()
        .zip(percentages)
        .map(|(target_percentage, profit_percentage)| TierRule {
            target_percentage,
            profit_percentage,
        })
        .collect()
}

fn default_ranges() -> Vec<CapitalRange> {
    let standard = [dec!(10), dec!(15), dec!(20), dec!(25), dec!(30), dec!(33)];
    vec![
        CapitalRange {
            min_amount: dec!(100),
            max_amount: dec!(1000),
            rules: ladder(standard),
        },
        CapitalRange {
            min_amount: dec!(1000),
            max_amount: dec!(10000),
            rules: ladder(standard),
        },
        CapitalRange {
            min_amount: dec!(10000),
            max_amount: dec!(100000),
            rules: ladder([dec!(15), dec!(25), dec!(30), dec!(35), dec!(40), dec!(50)]),
        },
        CapitalRange {
            min_amount: dec!(100000),
            max_amount: dec!(1000000),
            rules: ladder([dec!(20), dec!(30), dec!(35), dec!(40), dec!(50), dec!(60)]),
        },
    ]
}

/// Default rule sets; USD and EUR share the same ranges.
pub fn default_tier_rule_sets() -> Vec<TierRuleSet> {
    Currency::ALL
        .into_iter()
        .map(|currency| TierRuleSet {
            currency,
            ranges: default_ranges(),
        })
        .collect()
}

/// Tiered recommendation keyed on progress toward the target balance.
/// Profit is measured over the initial capital, like [`super::recommend`].
pub fn recommend_tiered(account: &Account, rule_sets: &[TierRuleSet]) -> Option<TieredRecommendation> {
    if account.target_balance <= Decimal::ZERO {
        return None;
    }

    let rule_set = rule_sets.iter().find(|rs| rs.currency == account.currency)?;
    let range = rule_set
        .ranges
        .iter()
        .find(|range| range.contains(account.target_balance))?;

    let progress = percent_of(account.current_balance, account.target_balance);
    let rule = *range
        .rules
        .iter()
        .rev()
        .find(|rule| progress >= rule.target_percentage)?;

    let profit = profit_over_capital(account);
    if profit <= Decimal::ZERO {
        return None;
    }

    let amount = profit.saturating_mul(rule.profit_percentage / Decimal::ONE_HUNDRED);

    Some(TieredRecommendation {
        account_id: account.id,
        current_balance: account.current_balance,
        target_balance: account.target_balance,
        progress_percentage: round2(progress),
        amount: round2(amount),
        remaining_balance: round2(account.current_balance.saturating_sub(amount)),
        applied_rule: rule,
        applied_range_min: range.min_amount,
        applied_range_max: range.max_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Broker;

    fn account(capital: Decimal, target: Decimal, balance: Decimal) -> Account {
        Account::new("Tiered".into(), Broker::IcMarkets, Currency::Eur, capital)
            .with_target_balance(target)
            .with_current_balance(balance)
    }

    #[test]
    fn test_defaults_cover_both_currencies() {
        let sets = default_tier_rule_sets();
        assert_eq!(sets.len(), 2);
        assert!(sets.iter().all(|s| s.ranges.len() == 4));
        assert_eq!(sets[0].ranges[3].rules[5].profit_percentage, dec!(60));
    }

    #[test]
    fn test_recommend_in_second_range() {
        // target 5000 -> 1 000..10 000 range, progress 64% -> 60% rule (20%)
        let acc = account(dec!(2500), dec!(5000), dec!(3200));
        let rec = recommend_tiered(&acc, &default_tier_rule_sets()).unwrap();

        assert_eq!(rec.progress_percentage, dec!(64));
        assert_eq!(rec.applied_rule.target_percentage, dec!(60));
        assert_eq!(rec.amount, dec!(140.00));
        assert_eq!(rec.remaining_balance, dec!(3060.00));
        assert_eq!(rec.applied_range_min, dec!(1000));
    }

    #[test]
    fn test_no_rule_reached() {
        let acc = account(dec!(500), dec!(5000), dec!(900));
        assert_eq!(recommend_tiered(&acc, &default_tier_rule_sets()), None);
    }

    #[test]
    fn test_target_outside_ranges() {
        let acc = account(dec!(10), dec!(50), dec!(45));
        assert_eq!(recommend_tiered(&acc, &default_tier_rule_sets()), None);
    }

    #[test]
    fn test_no_profit() {
        let acc = account(dec!(4000), dec!(5000), dec!(3900));
        assert_eq!(recommend_tiered(&acc, &default_tier_rule_sets()), None);
    }
}

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{round2, AccountId, Amount, EntryError, Transaction, TransactionType};

fn add(total: Amount, delta: Amount) -> Result<Amount, EntryError> {
    total.checked_add(delta).ok_or(EntryError::Overflow)
}

/// Reduce an account's ledger into its current balance.
///
/// `sourced` are the entries whose source is the account, `incoming` the
/// transfers it receives. Entries that do not touch the account on the
/// matching side are ignored. The sum is exact; only the result is rounded.
pub fn reduce_balance(
    account_id: AccountId,
    sourced: &[Transaction],
    incoming: &[Transaction],
) -> Result<Amount, EntryError> {
    let mut balance = Decimal::ZERO;

    for entry in sourced.iter().filter(|entry| entry.account_id == account_id) {
        balance = add(balance, entry.source_effect())?;
    }

    for entry in incoming
        .iter()
        .filter(|entry| entry.target_account_id == Some(account_id))
    {
        if let Some(credit) = entry.destination_credit()? {
            balance = add(balance, credit)?;
        }
    }

    Ok(round2(balance))
}

/// Compute one account's balance from a mixed list of entries.
pub fn compute_balance(account_id: AccountId, entries: &[Transaction]) -> Result<Amount, EntryError> {
    reduce_balance(account_id, entries, entries)
}

/// Compute balances for every account referenced by the entries.
/// Accounts with no entries are absent from the map (balance = 0).
pub fn compute_all_balances(entries: &[Transaction]) -> Result<HashMap<AccountId, Amount>, EntryError> {
    let mut balances: HashMap<AccountId, Amount> = HashMap::new();

    for entry in entries {
        let source = balances.entry(entry.account_id).or_default();
        *source = add(*source, entry.source_effect())?;
        if let (Some(target), Some(credit)) = (entry.target_account_id, entry.destination_credit()?) {
            let target = balances.entry(target).or_default();
            *target = add(*target, credit)?;
        }
    }

    Ok(balances
        .into_iter()
        .map(|(id, balance)| (id, round2(balance)))
        .collect())
}

/// Running totals of an account rebuilt from the entries it sourced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub deposits: Amount,
    pub withdrawals: Amount,
    pub profits: Amount,
    pub losses: Amount,
}

impl LedgerTotals {
    pub fn from_entries(account_id: AccountId, entries: &[Transaction]) -> Result<Self, EntryError> {
        entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .try_fold(Self::default(), |mut totals, entry| -> Result<Self, EntryError> {
                let slot = match entry.kind {
                    TransactionType::Deposit => &mut totals.deposits,
                    TransactionType::Withdrawal => &mut totals.withdrawals,
                    TransactionType::Profit => &mut totals.profits,
                    TransactionType::Loss => &mut totals.losses,
                    TransactionType::Transfer => return Ok(totals),
                };
                *slot = add(*slot, entry.amount)?;
                Ok(totals)
            })
    }
}

/// A cached balance that no longer matches the reduction of its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub account_id: AccountId,
    pub account_name: String,
    pub cached: Amount,
    pub computed: Amount,
}

impl BalanceDrift {
    pub fn difference(&self) -> Amount {
        self.cached - self.computed
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::domain::Currency;

    fn entry(account: AccountId, kind: TransactionType, amount: Amount) -> Transaction {
        Transaction::new(account, kind, amount, Currency::Usd, Utc::now())
    }

    #[test]
    fn test_empty_ledger_is_zero() {
        let account = Uuid::new_v4();
        assert_eq!(reduce_balance(account, &[], &[]).unwrap(), dec!(0.00));
        assert_eq!(compute_balance(account, &[]).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_credits_sum_and_round() {
        let account = Uuid::new_v4();
        let entries = vec![
            entry(account, TransactionType::Deposit, dec!(0.1)),
            entry(account, TransactionType::Profit, dec!(0.2)),
            entry(account, TransactionType::Deposit, dec!(100.004)),
            entry(account, TransactionType::Profit, dec!(0.001)),
        ];
        assert_eq!(compute_balance(account, &entries).unwrap(), dec!(100.31));
    }

    #[test]
    fn test_debits_subtract() {
        let account = Uuid::new_v4();
        let other = Uuid::new_v4();
        let entries = vec![
            entry(account, TransactionType::Deposit, dec!(500)),
            entry(account, TransactionType::Withdrawal, dec!(50)),
            entry(account, TransactionType::Loss, dec!(25.5)),
            Transaction::transfer(account, other, dec!(100), Currency::Usd, Utc::now(), None),
        ];
        assert_eq!(compute_balance(account, &entries).unwrap(), dec!(324.50));
        assert_eq!(compute_balance(other, &entries).unwrap(), dec!(100));
    }

    #[test]
    fn test_order_independent() {
        let account = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut entries = vec![
            entry(account, TransactionType::Deposit, dec!(1000.333)),
            entry(account, TransactionType::Loss, dec!(12.127)),
            entry(account, TransactionType::Profit, dec!(77.7)),
            Transaction::transfer(other, account, dec!(10), Currency::Eur, Utc::now(), Some(dec!(1.1))),
            entry(account, TransactionType::Withdrawal, dec!(3.005)),
        ];
        let forward = compute_balance(account, &entries).unwrap();
        entries.reverse();
        assert_eq!(compute_balance(account, &entries).unwrap(), forward);
        entries.swap(0, 3);
        entries.swap(1, 2);
        assert_eq!(compute_balance(account, &entries).unwrap(), forward);
    }

    #[test]
    fn test_transfer_is_asymmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let transfer = Transaction::transfer(a, b, dec!(40), Currency::Usd, Utc::now(), Some(dec!(0.9)));
        let entries = vec![entry(a, TransactionType::Deposit, dec!(100)), transfer];

        assert_eq!(compute_balance(a, &entries).unwrap(), dec!(60.00));
        assert_eq!(compute_balance(b, &entries).unwrap(), dec!(36.00));
    }

    #[test]
    fn test_reduce_ignores_unrelated_entries() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let stray = entry(b, TransactionType::Deposit, dec!(999));
        let sourced = vec![entry(a, TransactionType::Deposit, dec!(10)), stray.clone()];
        let incoming = vec![stray];
        assert_eq!(reduce_balance(a, &sourced, &incoming).unwrap(), dec!(10));
    }

    #[test]
    fn test_outgoing_transfer_to_unknown_account_still_debits() {
        let a = Uuid::new_v4();
        let gone = Uuid::new_v4();
        let entries = vec![
            entry(a, TransactionType::Deposit, dec!(100)),
            Transaction::transfer(a, gone, dec!(30), Currency::Usd, Utc::now(), Some(dec!(2))),
        ];
        assert_eq!(reduce_balance(a, &entries, &[]).unwrap(), dec!(70));
    }

    #[test]
    fn test_compute_all_balances_matches_single() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let entries = vec![
            entry(a, TransactionType::Deposit, dec!(100)),
            Transaction::transfer(a, b, dec!(40), Currency::Usd, Utc::now(), Some(dec!(0.9))),
            entry(b, TransactionType::Profit, dec!(4.005)),
        ];

        let balances = compute_all_balances(&entries).unwrap();
        assert_eq!(balances.get(&a), Some(&compute_balance(a, &entries).unwrap()));
        assert_eq!(balances.get(&b), Some(&dec!(40.01)));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let a = Uuid::new_v4();
        let huge = dec!(50000000000000000000000000000);
        let entries = vec![
            entry(a, TransactionType::Deposit, huge),
            entry(a, TransactionType::Deposit, huge),
        ];
        assert_eq!(compute_balance(a, &entries), Err(EntryError::Overflow));
        assert_eq!(compute_all_balances(&entries), Err(EntryError::Overflow));
        assert_eq!(LedgerTotals::from_entries(a, &entries), Err(EntryError::Overflow));
    }

    #[test]
    fn test_totals_from_entries() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let entries = vec![
            entry(a, TransactionType::Deposit, dec!(100)),
            entry(a, TransactionType::Deposit, dec!(50)),
            entry(a, TransactionType::Withdrawal, dec!(20)),
            entry(a, TransactionType::Profit, dec!(7)),
            entry(a, TransactionType::Loss, dec!(3)),
            Transaction::transfer(a, b, dec!(10), Currency::Usd, Utc::now(), None),
            entry(b, TransactionType::Deposit, dec!(1000)),
        ];

        let totals = LedgerTotals::from_entries(a, &entries).unwrap();
        assert_eq!(
            totals,
            LedgerTotals {
                deposits: dec!(150),
                withdrawals: dec!(20),
                profits: dec!(7),
                losses: dec!(3),
            }
        );
    }
}

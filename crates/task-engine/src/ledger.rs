//! Reward ledger: pure, stateless arithmetic over reward and budget
//! schedules. All sums are checked against the fixed-width amount domains;
//! nothing here mutates task state.

use crate::types::{NativeRewardEntry, RewardEntry};
use task_types::{NativeAmount, Result, TaskError, TokenAmount};

/// Validates a native reward schedule against the native budget and returns
/// its checked total.
pub fn validate_native_reward(
    native_budget: NativeAmount,
    reward: &[NativeRewardEntry],
) -> Result<NativeAmount> {
    let total = checked_native_sum(reward.iter().map(|entry| entry.amount))?;
    if total > native_budget {
        return Err(TaskError::RewardAboveBudget);
    }
    Ok(total)
}

/// Validates a flat token reward schedule against the budget entries and
/// returns the per-budget-entry totals.
///
/// The schedule is partitioned by `next_token` markers: entries accumulate
/// against the current budget token, and a marker entry (which itself still
/// pays to the current token) closes the group and advances to the next
/// budget entry in declaration order. A non-empty schedule must end with a
/// marker, and groups may not outnumber budget entries.
pub fn validate_reward_schedule(
    budget: &[TokenAmount],
    reward: &[RewardEntry],
) -> Result<Vec<TokenAmount>> {
    let mut totals = vec![TokenAmount::ZERO; budget.len()];
    let mut budget_index = 0usize;
    let mut group_open = false;

    for entry in reward {
        if budget_index >= budget.len() {
            return Err(TaskError::RewardAboveBudget);
        }
        group_open = true;
        totals[budget_index] = totals[budget_index]
            .checked_add(entry.amount)
            .ok_or(TaskError::Overflow)?;
        if totals[budget_index] > budget[budget_index] {
            return Err(TaskError::RewardAboveBudget);
        }
        if entry.next_token {
            budget_index += 1;
            group_open = false;
        }
    }

    if group_open {
        return Err(TaskError::RewardDoesntEndWithNextToken);
    }
    Ok(totals)
}

pub fn checked_native_sum<I>(amounts: I) -> Result<NativeAmount>
where
    I: IntoIterator<Item = NativeAmount>,
{
    let mut total = NativeAmount::ZERO;
    for amount in amounts {
        total = total.checked_add(amount).ok_or(TaskError::Overflow)?;
    }
    Ok(total)
}

pub fn checked_token_sum<I>(amounts: I) -> Result<TokenAmount>
where
    I: IntoIterator<Item = TokenAmount>,
{
    let mut total = TokenAmount::ZERO;
    for amount in amounts {
        total = total.checked_add(amount).ok_or(TaskError::Overflow)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_types::Address;

    fn native(units: u128) -> NativeAmount {
        NativeAmount::from_base_units(units).unwrap()
    }

    fn token(units: u128) -> TokenAmount {
        TokenAmount::from_base_units(units).unwrap()
    }

    fn entry(next_token: bool, units: u128) -> RewardEntry {
        RewardEntry {
            next_token,
            to: Address::from_bytes([7; 32]),
            amount: token(units),
        }
    }

    #[test]
    fn test_empty_schedule_is_valid() {
        let totals = validate_reward_schedule(&[token(100)], &[]).unwrap();
        assert_eq!(totals, vec![TokenAmount::ZERO]);
    }

    #[test]
    fn test_single_token_group() {
        let totals =
            validate_reward_schedule(&[token(100)], &[entry(false, 40), entry(true, 60)]).unwrap();
        assert_eq!(totals, vec![token(100)]);
    }

    #[test]
    fn test_schedule_must_end_with_marker() {
        let err = validate_reward_schedule(&[token(100)], &[entry(false, 40)]).unwrap_err();
        assert_eq!(err, TaskError::RewardDoesntEndWithNextToken);
    }

    #[test]
    fn test_marker_partitions_across_budget_entries() {
        let budget = [token(50), token(80)];
        let schedule = [entry(true, 50), entry(false, 30), entry(true, 50)];
        let totals = validate_reward_schedule(&budget, &schedule).unwrap();
        assert_eq!(totals, vec![token(50), token(80)]);
    }

    #[test]
    fn test_group_above_budget_rejected() {
        let err =
            validate_reward_schedule(&[token(50)], &[entry(true, 51)]).unwrap_err();
        assert_eq!(err, TaskError::RewardAboveBudget);
    }

    #[test]
    fn test_more_groups_than_budget_entries_rejected() {
        let err = validate_reward_schedule(&[token(50)], &[entry(true, 10), entry(true, 10)])
            .unwrap_err();
        assert_eq!(err, TaskError::RewardAboveBudget);
    }

    #[test]
    fn test_native_reward_bounds() {
        let reward = [
            NativeRewardEntry {
                to: Address::from_bytes([1; 32]),
                amount: native(60),
            },
            NativeRewardEntry {
                to: Address::from_bytes([2; 32]),
                amount: native(40),
            },
        ];
        assert_eq!(validate_native_reward(native(100), &reward).unwrap(), native(100));
        assert_eq!(
            validate_native_reward(native(99), &reward).unwrap_err(),
            TaskError::RewardAboveBudget
        );
    }

    #[test]
    fn test_checked_sum_overflow() {
        let err =
            checked_token_sum([TokenAmount::MAX, token(1)]).unwrap_err();
        assert_eq!(err, TaskError::Overflow);
    }
}

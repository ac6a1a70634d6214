//! Per-task escrow accounting.
//!
//! The escrow tracks, for the native budget and for every token budget
//! entry, how much has been committed and how much has been paid out. The
//! money-conservation invariant — paid never exceeds committed — is enforced
//! here, before any funds move.

use crate::funds::FundsTransfer;
use crate::ledger;
use crate::types::{BudgetEntry, Task};
use serde::{Deserialize, Serialize};
use task_types::{Address, NativeAmount, Result, TaskError, TokenAmount};

/// Committed/paid bookkeeping for one token budget entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEscrow {
    pub token: Address,
    pub committed: TokenAmount,
    pub paid: TokenAmount,
}

/// The committed-but-not-yet-paid pool backing a task's budget.
///
/// Created when the task is created, settled to zero (fully disbursed or
/// refunded) exactly when the task closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAccount {
    pub native_committed: NativeAmount,
    pub native_paid: NativeAmount,
    pub entries: Vec<TokenEscrow>,
}

impl EscrowAccount {
    pub fn new(native_budget: NativeAmount, budget: &[BudgetEntry]) -> Self {
        Self {
            native_committed: native_budget,
            native_paid: NativeAmount::ZERO,
            entries: budget
                .iter()
                .map(|entry| TokenEscrow {
                    token: entry.token,
                    committed: entry.amount,
                    paid: TokenAmount::ZERO,
                })
                .collect(),
        }
    }

    pub fn commit_native(&mut self, amount: NativeAmount) -> Result<()> {
        self.native_committed = self
            .native_committed
            .checked_add(amount)
            .ok_or(TaskError::Overflow)?;
        Ok(())
    }

    pub fn commit_token(&mut self, index: usize, amount: TokenAmount) -> Result<()> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(TaskError::BudgetLengthMismatch)?;
        entry.committed = entry
            .committed
            .checked_add(amount)
            .ok_or(TaskError::Overflow)?;
        Ok(())
    }

    pub fn record_native_payout(&mut self, amount: NativeAmount) -> Result<()> {
        let paid = self
            .native_paid
            .checked_add(amount)
            .ok_or(TaskError::Overflow)?;
        if paid > self.native_committed {
            return Err(TaskError::Overflow);
        }
        self.native_paid = paid;
        Ok(())
    }

    pub fn record_token_payout(&mut self, index: usize, amount: TokenAmount) -> Result<()> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(TaskError::BudgetLengthMismatch)?;
        let paid = entry.paid.checked_add(amount).ok_or(TaskError::Overflow)?;
        if paid > entry.committed {
            return Err(TaskError::Overflow);
        }
        entry.paid = paid;
        Ok(())
    }

    pub fn native_remaining(&self) -> NativeAmount {
        self.native_committed.saturating_sub(self.native_paid)
    }

    pub fn token_remaining(&self, index: usize) -> TokenAmount {
        self.entries
            .get(index)
            .map(|entry| entry.committed.saturating_sub(entry.paid))
            .unwrap_or(TokenAmount::ZERO)
    }

    /// Committed token amounts, in budget declaration order. Reward schedule
    /// validation runs against these.
    pub fn committed_tokens(&self) -> Vec<TokenAmount> {
        self.entries.iter().map(|entry| entry.committed).collect()
    }
}

// ---- payout planning -------------------------------------------------------
//
// Settlements are planned (validated, no mutation), then executed against the
// funds boundary inside a transaction, then applied to the accounting. A
// failed transfer rolls the whole settlement back with no escrow mutation.

#[derive(Debug, Clone)]
pub(crate) struct NativePayout {
    /// Index into the executor's native reward schedule; `None` for refunds.
    pub reward_index: Option<usize>,
    pub to: Address,
    pub amount: NativeAmount,
}

#[derive(Debug, Clone)]
pub(crate) struct TokenPayout {
    /// Index into the executor's token reward schedule; `None` for refunds.
    pub reward_index: Option<usize>,
    pub budget_index: usize,
    pub token: Address,
    pub to: Address,
    pub amount: TokenAmount,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PlannedPayout {
    pub native: Vec<NativePayout>,
    pub tokens: Vec<TokenPayout>,
}

/// Plans a prefix/subset payout of the executor's reward schedule.
///
/// The partial arrays are positional prefixes of the executor's native and
/// token reward schedules; each element must not exceed that entry's
/// remaining amount.
pub(crate) fn plan_partial_payout(
    task: &Task,
    partial_native: &[NativeAmount],
    partial: &[TokenAmount],
) -> Result<PlannedPayout> {
    let application = task.executor()?;

    if partial_native.len() > application.native_reward.len()
        || partial.len() > application.reward.len()
    {
        return Err(TaskError::PartialRewardAboveFullReward);
    }

    let mut plan = PlannedPayout::default();

    for (index, (entry, amount)) in application
        .native_reward
        .iter()
        .zip(partial_native.iter().copied())
        .enumerate()
    {
        if amount > entry.amount {
            return Err(TaskError::PartialRewardAboveFullReward);
        }
        if amount.is_zero() {
            continue;
        }
        plan.native.push(NativePayout {
            reward_index: Some(index),
            to: entry.to,
            amount,
        });
    }

    // Walk the flat schedule tracking which budget token each entry pays
    // from. The schedule was validated to end with a marker, so the index
    // stays within the budget entries.
    let mut budget_index = 0usize;
    for (index, entry) in application.reward.iter().enumerate() {
        if index < partial.len() {
            let amount = partial[index];
            if amount > entry.amount {
                return Err(TaskError::PartialRewardAboveFullReward);
            }
            if !amount.is_zero() {
                let token = task
                    .escrow
                    .entries
                    .get(budget_index)
                    .ok_or(TaskError::Overflow)?
                    .token;
                plan.tokens.push(TokenPayout {
                    reward_index: Some(index),
                    budget_index,
                    token,
                    to: entry.to,
                    amount,
                });
            }
        }
        if entry.next_token {
            budget_index += 1;
        }
    }

    Ok(plan)
}

/// Plans a payout of everything still owed by the executor's schedule.
pub(crate) fn plan_full_payout(task: &Task) -> Result<PlannedPayout> {
    let application = task.executor()?;
    let partial_native: Vec<NativeAmount> = application
        .native_reward
        .iter()
        .map(|entry| entry.amount)
        .collect();
    let partial: Vec<TokenAmount> = application.reward.iter().map(|entry| entry.amount).collect();
    plan_partial_payout(task, &partial_native, &partial)
}

/// Extends a payout plan with refunds of every remaining escrow balance to
/// the task creator, so the escrow settles to zero at close.
pub(crate) fn plan_refund_remainder(task: &Task, plan: &mut PlannedPayout) -> Result<()> {
    let paid_native =
        ledger::checked_native_sum(plan.native.iter().map(|payout| payout.amount))?;
    let refund_native = task
        .escrow
        .native_remaining()
        .checked_sub(paid_native)
        .ok_or(TaskError::Overflow)?;
    if !refund_native.is_zero() {
        plan.native.push(NativePayout {
            reward_index: None,
            to: task.creator,
            amount: refund_native,
        });
    }

    for (budget_index, entry) in task.escrow.entries.iter().enumerate() {
        let paid = ledger::checked_token_sum(
            plan.tokens
                .iter()
                .filter(|payout| payout.budget_index == budget_index)
                .map(|payout| payout.amount),
        )?;
        let refund = task
            .escrow
            .token_remaining(budget_index)
            .checked_sub(paid)
            .ok_or(TaskError::Overflow)?;
        if !refund.is_zero() {
            plan.tokens.push(TokenPayout {
                reward_index: None,
                budget_index,
                token: entry.token,
                to: task.creator,
                amount: refund,
            });
        }
    }

    Ok(())
}

/// Moves the planned funds through the transfer boundary as one transaction.
/// On any failure the transaction is rolled back and no escrow state has
/// been touched yet.
pub(crate) async fn settle(funds: &dyn FundsTransfer, plan: &PlannedPayout) -> Result<()> {
    if plan.native.is_empty() && plan.tokens.is_empty() {
        return Ok(());
    }

    funds.begin_transaction().await?;

    for payout in &plan.native {
        if let Err(err) = funds.release_native(payout.to, payout.amount).await {
            funds.rollback_transaction().await?;
            return Err(err);
        }
    }
    for payout in &plan.tokens {
        if let Err(err) = funds
            .release_token(payout.token, payout.to, payout.amount)
            .await
        {
            funds.rollback_transaction().await?;
            return Err(err);
        }
    }

    funds.commit_transaction().await
}

/// Records an executed settlement: decrements the executor's remaining
/// reward entries and books the payouts against the escrow.
pub(crate) fn apply_payout(task: &mut Task, plan: &PlannedPayout) -> Result<()> {
    for payout in &plan.native {
        if let Some(index) = payout.reward_index {
            let id = task.executor_application.ok_or(TaskError::TaskNotTaken)?;
            let application = task.application_mut(id)?;
            let entry = application
                .native_reward
                .get_mut(index)
                .ok_or(TaskError::PartialRewardAboveFullReward)?;
            entry.amount = entry
                .amount
                .checked_sub(payout.amount)
                .ok_or(TaskError::Overflow)?;
        }
        task.escrow.record_native_payout(payout.amount)?;
    }

    for payout in &plan.tokens {
        if let Some(index) = payout.reward_index {
            let id = task.executor_application.ok_or(TaskError::TaskNotTaken)?;
            let application = task.application_mut(id)?;
            let entry = application
                .reward
                .get_mut(index)
                .ok_or(TaskError::PartialRewardAboveFullReward)?;
            entry.amount = entry
                .amount
                .checked_sub(payout.amount)
                .ok_or(TaskError::Overflow)?;
        }
        task.escrow.record_token_payout(payout.budget_index, payout.amount)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(units: u128) -> NativeAmount {
        NativeAmount::from_base_units(units).unwrap()
    }

    fn token(units: u128) -> TokenAmount {
        TokenAmount::from_base_units(units).unwrap()
    }

    #[test]
    fn test_paid_never_exceeds_committed() {
        let budget = [BudgetEntry {
            token: Address::from_bytes([4; 32]),
            amount: token(100),
        }];
        let mut escrow = EscrowAccount::new(native(50), &budget);

        escrow.record_token_payout(0, token(60)).unwrap();
        assert_eq!(escrow.token_remaining(0), token(40));

        // 60 + 50 > 100 committed
        assert_eq!(
            escrow.record_token_payout(0, token(50)).unwrap_err(),
            TaskError::Overflow
        );
        assert_eq!(escrow.token_remaining(0), token(40));

        escrow.record_token_payout(0, token(40)).unwrap();
        assert_eq!(escrow.token_remaining(0), TokenAmount::ZERO);

        escrow.record_native_payout(native(50)).unwrap();
        assert_eq!(
            escrow.record_native_payout(native(1)).unwrap_err(),
            TaskError::Overflow
        );
    }

    #[test]
    fn test_budget_increase_is_monotonic() {
        let budget = [BudgetEntry {
            token: Address::from_bytes([4; 32]),
            amount: token(10),
        }];
        let mut escrow = EscrowAccount::new(NativeAmount::ZERO, &budget);

        escrow.commit_token(0, token(5)).unwrap();
        assert_eq!(escrow.token_remaining(0), token(15));

        assert_eq!(
            escrow.commit_token(1, token(5)).unwrap_err(),
            TaskError::BudgetLengthMismatch
        );
    }
}

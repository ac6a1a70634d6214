//! Dispute settlement: the dispute manager's power to force-close a taken
//! task with an imposed partial payout.

use crate::escrow;
use crate::events::{self, EventBus, TaskEvent};
use crate::funds::FundsTransfer;
use crate::types::{SharedTasks, TaskCompletionSource, TaskState};
use std::sync::Arc;
use task_types::{Address, NativeAmount, Result, TaskError, TaskId, TokenAmount};
use tracing::info;

pub struct DisputeResolver {
    tasks: SharedTasks,
    funds: Arc<dyn FundsTransfer>,
    events: Arc<EventBus>,
}

impl DisputeResolver {
    pub(crate) fn new(
        tasks: SharedTasks,
        funds: Arc<dyn FundsTransfer>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            tasks,
            funds,
            events,
        }
    }

    /// Settles the task at the dispute manager's verdict: the given partial
    /// amounts go to the executor's reward recipients, everything else in
    /// escrow refunds to the creator, and the task closes. Pending unjudged
    /// submissions stay unjudged.
    pub async fn complete_by_dispute(
        &self,
        caller: Address,
        task_id: TaskId,
        partial_native: &[NativeAmount],
        partial: &[TokenAmount],
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_taken()?;
        task.ensure_dispute_manager(caller)?;

        let mut plan = escrow::plan_partial_payout(task, partial_native, partial)?;
        escrow::plan_refund_remainder(task, &mut plan)?;
        escrow::settle(self.funds.as_ref(), &plan).await?;
        escrow::apply_payout(task, &plan)?;
        task.state = TaskState::Closed;

        info!(task_id = %task_id, dispute_manager = %caller, "Task completed by dispute");
        self.events.emit(TaskEvent::TaskCompleted {
            task_id,
            source: TaskCompletionSource::Dispute,
            timestamp: events::now(),
        });
        Ok(())
    }
}

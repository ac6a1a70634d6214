//! Submissions: executor deliverables and the manager's judgement, including
//! the full settlement that closes a task on acceptance.

use crate::escrow;
use crate::events::{self, EventBus, TaskEvent};
use crate::funds::FundsTransfer;
use crate::ledger;
use crate::types::{
    SharedTasks, Submission, SubmissionJudgement, TaskCompletionSource, TaskState,
};
use std::sync::Arc;
use task_types::{Address, NativeAmount, Result, SubmissionId, TaskError, TaskId, TokenAmount};
use tracing::info;

pub struct SubmissionManager {
    tasks: SharedTasks,
    funds: Arc<dyn FundsTransfer>,
    events: Arc<EventBus>,
}

impl SubmissionManager {
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

    /// Records a deliverable from the executor. Submissions start unjudged.
    pub async fn create_submission(
        &self,
        caller: Address,
        task_id: TaskId,
        metadata: String,
    ) -> Result<SubmissionId> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_taken()?;
        task.ensure_executor(caller)?;

        let submission_id =
            SubmissionId::next(task.submissions.len()).ok_or(TaskError::Overflow)?;
        task.submissions.push(Submission {
            metadata,
            feedback: String::new(),
            judgement: SubmissionJudgement::None,
        });

        info!(task_id = %task_id, submission_id = %submission_id, "Submission created");
        self.events.emit(TaskEvent::SubmissionCreated {
            task_id,
            submission_id,
            timestamp: events::now(),
        });
        Ok(submission_id)
    }

    /// Judges a submission. Each submission is judged at most once and the
    /// verdict is final. Acceptance pays out the executor's full remaining
    /// reward, refunds the remainder to the creator and closes the task;
    /// rejection only records the verdict and feedback.
    pub async fn review_submission(
        &self,
        caller: Address,
        task_id: TaskId,
        submission_id: SubmissionId,
        judgement: SubmissionJudgement,
        feedback: String,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_taken()?;
        task.ensure_manager(caller)?;

        let submission = task
            .submissions
            .get(submission_id.index())
            .ok_or(TaskError::SubmissionDoesNotExist)?;
        if judgement == SubmissionJudgement::None {
            return Err(TaskError::JudgementNone);
        }
        if submission.judgement != SubmissionJudgement::None {
            return Err(TaskError::SubmissionAlreadyJudged);
        }

        if judgement == SubmissionJudgement::Accepted {
            let mut plan = escrow::plan_full_payout(task)?;
            escrow::plan_refund_remainder(task, &mut plan)?;
            escrow::settle(self.funds.as_ref(), &plan).await?;
            escrow::apply_payout(task, &plan)?;
            task.state = TaskState::Closed;
        }

        // The settlement either committed or bailed above; only now record
        // the verdict.
        let submission = task
            .submissions
            .get_mut(submission_id.index())
            .ok_or(TaskError::SubmissionDoesNotExist)?;
        submission.judgement = judgement;
        submission.feedback = feedback;

        info!(task_id = %task_id, submission_id = %submission_id, ?judgement, "Submission reviewed");
        self.events.emit(TaskEvent::SubmissionReviewed {
            task_id,
            submission_id,
            judgement,
            timestamp: events::now(),
        });
        if judgement == SubmissionJudgement::Accepted {
            self.events.emit(TaskEvent::TaskCompleted {
                task_id,
                source: TaskCompletionSource::SubmissionJudged,
                timestamp: events::now(),
            });
        }
        Ok(())
    }

    /// Pays out a prefix of the executor's reward schedules early, without
    /// changing the task state. The paid amounts are deducted from the
    /// remaining entitlements.
    pub async fn partial_payment(
        &self,
        caller: Address,
        task_id: TaskId,
        partial_native: &[NativeAmount],
        partial: &[TokenAmount],
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_taken()?;
        task.ensure_manager(caller)?;

        let plan = escrow::plan_partial_payout(task, partial_native, partial)?;
        let native_paid =
            ledger::checked_native_sum(plan.native.iter().map(|payout| payout.amount))?;
        escrow::settle(self.funds.as_ref(), &plan).await?;
        escrow::apply_payout(task, &plan)?;

        info!(task_id = %task_id, native_paid = %native_paid, "Partial payment settled");
        self.events.emit(TaskEvent::PartialPayment {
            task_id,
            native_paid,
            tokens_paid: partial.to_vec(),
            timestamp: events::now(),
        });
        Ok(())
    }
}

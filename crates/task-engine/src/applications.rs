//! Applications: offers to execute a task, acceptance by the manager, and
//! the take step that binds an accepted applicant as executor.

use crate::events::{self, EventBus, TaskEvent};
use crate::ledger;
use crate::types::{Application, NativeRewardEntry, RewardEntry, SharedTasks, TaskState};
use std::sync::Arc;
use task_types::{
    Address, ApplicationId, NativeAmount, Result, TaskError, TaskId, TokenAmount,
};
use tracing::info;

pub struct ApplicationManager {
    tasks: SharedTasks,
    events: Arc<EventBus>,
}

impl ApplicationManager {
    pub(crate) fn new(tasks: SharedTasks, events: Arc<EventBus>) -> Self {
        Self { tasks, events }
    }

    /// Registers an offer to execute the task for the stated reward split.
    /// Anyone may apply while the task is open; the schedules must fit the
    /// budget at application time.
    pub async fn apply_for_task(
        &self,
        caller: Address,
        task_id: TaskId,
        metadata: String,
        native_reward: Vec<NativeRewardEntry>,
        reward: Vec<RewardEntry>,
    ) -> Result<ApplicationId> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_open()?;

        ledger::validate_native_reward(task.escrow.native_remaining(), &native_reward)?;
        ledger::validate_reward_schedule(&task.escrow.committed_tokens(), &reward)?;

        let application_id =
            ApplicationId::next(task.applications.len()).ok_or(TaskError::Overflow)?;
        task.applications.push(Application {
            metadata: metadata.clone(),
            applicant: caller,
            accepted: false,
            native_reward: native_reward.clone(),
            reward: reward.clone(),
        });

        info!(task_id = %task_id, application_id = %application_id, applicant = %caller, "Application created");
        self.events.emit(TaskEvent::ApplicationCreated {
            task_id,
            application_id,
            applicant: caller,
            metadata,
            native_reward,
            reward,
            timestamp: events::now(),
        });
        Ok(application_id)
    }

    /// Marks applications as accepted. Manager only; acceptance is not a
    /// selection, it only allows the applicants to take the task.
    pub async fn accept_applications(
        &self,
        caller: Address,
        task_id: TaskId,
        application_ids: &[ApplicationId],
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_open()?;
        task.ensure_manager(caller)?;

        // Validate the full batch before mutating anything.
        for id in application_ids {
            task.application(*id)?;
        }
        for id in application_ids {
            task.application_mut(*id)?.accepted = true;
        }

        for id in application_ids {
            self.events.emit(TaskEvent::ApplicationAccepted {
                task_id,
                application_id: *id,
                timestamp: events::now(),
            });
        }
        Ok(())
    }

    /// Binds the caller's accepted application as the task's executor and
    /// moves the task to `Taken`.
    pub async fn take_task(
        &self,
        caller: Address,
        task_id: TaskId,
        application_id: ApplicationId,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_open()?;

        let application = task.application(application_id)?;
        if application.applicant != caller {
            return Err(TaskError::NotYourApplication);
        }
        if !application.accepted {
            return Err(TaskError::ApplicationNotAccepted);
        }

        task.executor_application = Some(application_id);
        task.state = TaskState::Taken;

        info!(task_id = %task_id, application_id = %application_id, executor = %caller, "Task taken");
        self.events.emit(TaskEvent::TaskTaken {
            task_id,
            application_id,
            executor: caller,
            timestamp: events::now(),
        });
        Ok(())
    }

    /// Raises the reward entries of the caller's own application. The
    /// increase arrays are positional prefixes of the existing entries; the
    /// raised schedule must still fit the current budget.
    pub async fn increase_reward(
        &self,
        caller: Address,
        task_id: TaskId,
        application_id: ApplicationId,
        native_increase: &[NativeAmount],
        increase: &[TokenAmount],
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_open()?;

        let application = task.application(application_id)?;
        if application.applicant != caller {
            return Err(TaskError::NotYourApplication);
        }
        if native_increase.len() > application.native_reward.len()
            || increase.len() > application.reward.len()
        {
            return Err(TaskError::BudgetLengthMismatch);
        }

        // Compute the raised schedules without touching the stored ones, so
        // a failed validation leaves the application unchanged.
        let mut native_reward = application.native_reward.clone();
        for (entry, amount) in native_reward.iter_mut().zip(native_increase.iter().copied()) {
            entry.amount = entry.amount.checked_add(amount).ok_or(TaskError::Overflow)?;
        }
        let mut reward = application.reward.clone();
        for (entry, amount) in reward.iter_mut().zip(increase.iter().copied()) {
            entry.amount = entry.amount.checked_add(amount).ok_or(TaskError::Overflow)?;
        }

        ledger::validate_native_reward(task.escrow.native_remaining(), &native_reward)
            .map_err(raised_above_budget)?;
        ledger::validate_reward_schedule(&task.escrow.committed_tokens(), &reward)
            .map_err(raised_above_budget)?;

        let application = task.application_mut(application_id)?;
        application.native_reward = native_reward;
        application.reward = reward;

        info!(task_id = %task_id, application_id = %application_id, "Application reward increased");
        self.events.emit(TaskEvent::RewardIncreased {
            task_id,
            application_id,
            timestamp: events::now(),
        });
        Ok(())
    }
}

/// A raised reward that no longer fits signals that the budget must grow
/// first, not that the schedule is malformed.
fn raised_above_budget(err: TaskError) -> TaskError {
    match err {
        TaskError::RewardAboveBudget => TaskError::ManualBudgetIncreaseNeeded,
        other => other,
    }
}

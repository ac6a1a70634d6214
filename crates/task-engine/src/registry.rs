//! Task registry: allocates task ids, owns the shared record set and
//! composes the per-concern managers behind one facade.

use crate::applications::ApplicationManager;
use crate::dispute::DisputeResolver;
use crate::escrow::{self, EscrowAccount};
use crate::events::{self, EventBus, TaskEvent};
use crate::funds::FundsTransfer;
use crate::ledger;
use crate::requests::RequestProtocol;
use crate::submissions::SubmissionManager;
use crate::types::{
    Application, BudgetEntry, NativeRewardEntry, PreapprovedApplication, Request, RequestAction,
    RequestKind, RewardEntry, SharedTasks, SubmissionJudgement, Task, TaskState,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use task_types::{
    Address, ApplicationId, NativeAmount, RequestId, Result, SubmissionId, TaskError, TaskId,
    TokenAmount,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Account allowed to rescue funds stuck in escrow after a task closed.
    pub owner: Address,
}

pub struct TaskRegistry {
    config: RegistryConfig,
    tasks: SharedTasks,
    next_id: AtomicU64,
    funds: Arc<dyn FundsTransfer>,
    events: Arc<EventBus>,
    applications: ApplicationManager,
    submissions: SubmissionManager,
    requests: RequestProtocol,
    disputes: DisputeResolver,
}

impl TaskRegistry {
    pub fn new(config: RegistryConfig, funds: Arc<dyn FundsTransfer>) -> Self {
        let tasks: SharedTasks = Arc::new(RwLock::new(HashMap::new()));
        let events = Arc::new(EventBus::default());
        Self {
            config,
            applications: ApplicationManager::new(tasks.clone(), events.clone()),
            submissions: SubmissionManager::new(tasks.clone(), funds.clone(), events.clone()),
            requests: RequestProtocol::new(tasks.clone(), funds.clone(), events.clone()),
            disputes: DisputeResolver::new(tasks.clone(), funds.clone(), events.clone()),
            tasks,
            next_id: AtomicU64::new(0),
            funds,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Creates a task, pulling the full budget from the caller into escrow.
    /// Preapproved applications are registered already accepted, so the
    /// named applicants can take the task immediately.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        caller: Address,
        metadata: String,
        deadline: u64,
        manager: Address,
        dispute_manager: Address,
        native_budget: NativeAmount,
        budget: Vec<BudgetEntry>,
        preapproved: Vec<PreapprovedApplication>,
    ) -> Result<TaskId> {
        if deadline <= Utc::now().timestamp() as u64 {
            return Err(TaskError::DeadlineInPast);
        }
        let budget_amounts: Vec<TokenAmount> =
            budget.iter().map(|entry| entry.amount).collect();
        for application in &preapproved {
            ledger::validate_native_reward(native_budget, &application.native_reward)?;
            ledger::validate_reward_schedule(&budget_amounts, &application.reward)?;
        }

        let mut tasks = self.tasks.write().await;
        self.escrow_budget(caller, native_budget, &budget).await?;

        let task_id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let applications = preapproved
            .into_iter()
            .map(|application| Application {
                metadata: String::new(),
                applicant: application.applicant,
                accepted: true,
                native_reward: application.native_reward,
                reward: application.reward,
            })
            .collect();
        tasks.insert(
            task_id,
            Task {
                metadata,
                deadline,
                manager,
                dispute_manager,
                creator: caller,
                state: TaskState::Open,
                executor_application: None,
                escrow: EscrowAccount::new(native_budget, &budget),
                applications,
                submissions: Vec::new(),
                requests: HashMap::new(),
            },
        );

        info!(task_id = %task_id, creator = %caller, manager = %manager, "Task created");
        self.events.emit(TaskEvent::TaskCreated {
            task_id,
            creator: caller,
            manager,
            native_budget,
            timestamp: events::now(),
        });
        Ok(task_id)
    }

    async fn escrow_budget(
        &self,
        from: Address,
        native: NativeAmount,
        budget: &[BudgetEntry],
    ) -> Result<()> {
        self.funds.begin_transaction().await?;
        if let Err(err) = self.funds.escrow_native(from, native).await {
            self.funds.rollback_transaction().await?;
            return Err(err);
        }
        for entry in budget {
            if let Err(err) = self.funds.escrow_token(entry.token, from, entry.amount).await {
                self.funds.rollback_transaction().await?;
                return Err(err);
            }
        }
        self.funds.commit_transaction().await
    }

    pub async fn edit_metadata(
        &self,
        caller: Address,
        task_id: TaskId,
        metadata: String,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_not_closed()?;
        task.ensure_manager(caller)?;
        task.metadata = metadata.clone();

        self.events.emit(TaskEvent::MetadataChanged {
            task_id,
            metadata,
            timestamp: events::now(),
        });
        Ok(())
    }

    /// Pushes the deadline further out. The extension is relative and must
    /// be non-zero; deadlines never move earlier.
    pub async fn extend_deadline(
        &self,
        caller: Address,
        task_id: TaskId,
        extension: u64,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_not_closed()?;
        task.ensure_manager(caller)?;
        if extension == 0 {
            return Err(TaskError::DeadlineNotExtended);
        }
        task.deadline = task
            .deadline
            .checked_add(extension)
            .ok_or(TaskError::Overflow)?;
        let deadline = task.deadline;

        self.events.emit(TaskEvent::DeadlineChanged {
            task_id,
            deadline,
            timestamp: events::now(),
        });
        Ok(())
    }

    /// Adds funds to the task budget. Anyone may top up; the increase
    /// arrays are positional over the existing budget entries and the added
    /// funds escrow from the caller.
    pub async fn increase_budget(
        &self,
        caller: Address,
        task_id: TaskId,
        native_increase: NativeAmount,
        increase: &[TokenAmount],
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_not_closed()?;
        if increase.len() != task.escrow.entries.len() {
            return Err(TaskError::BudgetLengthMismatch);
        }

        // Every commit must fit the fixed-width domains before any funds
        // move; a cap hit after the escrow transfer would strand the
        // caller's money in the pool with no record.
        task.escrow
            .native_committed
            .checked_add(native_increase)
            .ok_or(TaskError::Overflow)?;
        for (entry, amount) in task.escrow.entries.iter().zip(increase.iter().copied()) {
            entry.committed.checked_add(amount).ok_or(TaskError::Overflow)?;
        }

        let budget: Vec<BudgetEntry> = task
            .escrow
            .entries
            .iter()
            .zip(increase.iter().copied())
            .map(|(entry, amount)| BudgetEntry {
                token: entry.token,
                amount,
            })
            .collect();
        self.escrow_budget(caller, native_increase, &budget).await?;

        task.escrow.commit_native(native_increase)?;
        for (index, amount) in increase.iter().copied().enumerate() {
            task.escrow.commit_token(index, amount)?;
        }

        info!(task_id = %task_id, from = %caller, "Budget increased");
        self.events.emit(TaskEvent::BudgetChanged {
            task_id,
            timestamp: events::now(),
        });
        Ok(())
    }

    /// Cancels the task. While open this refunds the escrow to the creator
    /// and closes immediately; while taken it files a cancel request for the
    /// executor to accept, returning its id.
    pub async fn cancel_task(
        &self,
        caller: Address,
        task_id: TaskId,
        metadata: String,
    ) -> Result<Option<RequestId>> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_not_closed()?;
        task.ensure_manager(caller)?;

        match task.state {
            TaskState::Open => {
                let mut plan = escrow::PlannedPayout::default();
                escrow::plan_refund_remainder(task, &mut plan)?;
                escrow::settle(self.funds.as_ref(), &plan).await?;
                escrow::apply_payout(task, &plan)?;
                task.state = TaskState::Closed;

                info!(task_id = %task_id, "Task cancelled");
                self.events.emit(TaskEvent::TaskCancelled {
                    task_id,
                    timestamp: events::now(),
                });
                Ok(None)
            }
            TaskState::Taken => {
                let pending = task.requests_mut(RequestKind::CancelTask);
                let request_id = RequestId::next(pending.len()).ok_or(TaskError::Overflow)?;
                pending.push(Request::new(RequestAction::Cancel { metadata }));

                info!(task_id = %task_id, request_id = %request_id, "Cancel requested");
                self.events.emit(TaskEvent::CancelTaskRequested {
                    task_id,
                    request_id,
                    timestamp: events::now(),
                });
                Ok(Some(request_id))
            }
            TaskState::Closed => Err(TaskError::TaskClosed),
        }
    }

    /// Hands management to another account. Immediate while the task is
    /// open; while taken it files a transfer request for the executor to
    /// accept, returning its id.
    pub async fn transfer_management(
        &self,
        caller: Address,
        task_id: TaskId,
        new_manager: Address,
    ) -> Result<Option<RequestId>> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_not_closed()?;
        task.ensure_manager(caller)?;

        match task.state {
            TaskState::Open => {
                task.manager = new_manager;
                self.events.emit(TaskEvent::ManagerChanged {
                    task_id,
                    manager: new_manager,
                    timestamp: events::now(),
                });
                Ok(None)
            }
            TaskState::Taken => {
                let pending = task.requests_mut(RequestKind::TransferManagement);
                let request_id = RequestId::next(pending.len()).ok_or(TaskError::Overflow)?;
                pending.push(Request::new(RequestAction::TransferManagement {
                    new_manager,
                }));

                self.events.emit(TaskEvent::ManagementTransferRequested {
                    task_id,
                    request_id,
                    new_manager,
                    timestamp: events::now(),
                });
                Ok(Some(request_id))
            }
            TaskState::Closed => Err(TaskError::TaskClosed),
        }
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Task> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&task_id)
            .cloned()
            .ok_or(TaskError::TaskDoesNotExist)
    }

    pub async fn get_tasks(&self, task_ids: &[TaskId]) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        task_ids
            .iter()
            .map(|id| tasks.get(id).cloned().ok_or(TaskError::TaskDoesNotExist))
            .collect()
    }

    /// Number of tasks ever created.
    pub fn task_count(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Owner escape hatch for token funds stranded in escrow after a task
    /// closed (a transfer that can never succeed, a recipient gone away).
    pub async fn rescue(
        &self,
        caller: Address,
        task_id: TaskId,
        token: Address,
        to: Address,
        amount: TokenAmount,
    ) -> Result<()> {
        if caller != self.config.owner {
            return Err(TaskError::NotOwner);
        }
        let tasks = self.tasks.read().await;
        let task = tasks.get(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_closed()?;

        warn!(task_id = %task_id, token = %token, to = %to, amount = %amount, "Rescuing stranded token funds");
        self.funds.release_token(token, to, amount).await
    }

    /// Owner escape hatch for native funds stranded after a task closed.
    pub async fn rescue_native(
        &self,
        caller: Address,
        task_id: TaskId,
        to: Address,
        amount: NativeAmount,
    ) -> Result<()> {
        if caller != self.config.owner {
            return Err(TaskError::NotOwner);
        }
        let tasks = self.tasks.read().await;
        let task = tasks.get(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_closed()?;

        warn!(task_id = %task_id, to = %to, amount = %amount, "Rescuing stranded native funds");
        self.funds.release_native(to, amount).await
    }

    // ---- delegated operations ----------------------------------------------

    pub async fn apply_for_task(
        &self,
        caller: Address,
        task_id: TaskId,
        metadata: String,
        native_reward: Vec<NativeRewardEntry>,
        reward: Vec<RewardEntry>,
    ) -> Result<ApplicationId> {
        self.applications
            .apply_for_task(caller, task_id, metadata, native_reward, reward)
            .await
    }

    pub async fn accept_applications(
        &self,
        caller: Address,
        task_id: TaskId,
        application_ids: &[ApplicationId],
    ) -> Result<()> {
        self.applications
            .accept_applications(caller, task_id, application_ids)
            .await
    }

    pub async fn take_task(
        &self,
        caller: Address,
        task_id: TaskId,
        application_id: ApplicationId,
    ) -> Result<()> {
        self.applications
            .take_task(caller, task_id, application_id)
            .await
    }

    pub async fn increase_reward(
        &self,
        caller: Address,
        task_id: TaskId,
        application_id: ApplicationId,
        native_increase: &[NativeAmount],
        increase: &[TokenAmount],
    ) -> Result<()> {
        self.applications
            .increase_reward(caller, task_id, application_id, native_increase, increase)
            .await
    }

    pub async fn create_submission(
        &self,
        caller: Address,
        task_id: TaskId,
        metadata: String,
    ) -> Result<SubmissionId> {
        self.submissions
            .create_submission(caller, task_id, metadata)
            .await
    }

    pub async fn review_submission(
        &self,
        caller: Address,
        task_id: TaskId,
        submission_id: SubmissionId,
        judgement: SubmissionJudgement,
        feedback: String,
    ) -> Result<()> {
        self.submissions
            .review_submission(caller, task_id, submission_id, judgement, feedback)
            .await
    }

    pub async fn partial_payment(
        &self,
        caller: Address,
        task_id: TaskId,
        partial_native: &[NativeAmount],
        partial: &[TokenAmount],
    ) -> Result<()> {
        self.submissions
            .partial_payment(caller, task_id, partial_native, partial)
            .await
    }

    pub async fn accept_request(
        &self,
        caller: Address,
        task_id: TaskId,
        kind: RequestKind,
        request_id: RequestId,
        execute: bool,
    ) -> Result<()> {
        self.requests
            .accept_request(caller, task_id, kind, request_id, execute)
            .await
    }

    pub async fn execute_request(
        &self,
        caller: Address,
        task_id: TaskId,
        kind: RequestKind,
        request_id: RequestId,
    ) -> Result<()> {
        self.requests
            .execute_request(caller, task_id, kind, request_id)
            .await
    }

    pub async fn complete_by_dispute(
        &self,
        caller: Address,
        task_id: TaskId,
        partial_native: &[NativeAmount],
        partial: &[TokenAmount],
    ) -> Result<()> {
        self.disputes
            .complete_by_dispute(caller, task_id, partial_native, partial)
            .await
    }
}

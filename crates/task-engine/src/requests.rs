//! Two-phase request protocol for manager actions on a taken task.
//!
//! While a task is taken, cancelling it or handing off management needs the
//! executor's consent: the manager files a request, the executor accepts it,
//! and either party executes it. Requests are append-only per kind and each
//! one is accepted and executed at most once.

use crate::escrow;
use crate::events::{self, EventBus, TaskEvent};
use crate::funds::FundsTransfer;
use crate::types::{RequestAction, RequestKind, SharedTasks, Task, TaskState};
use std::sync::Arc;
use task_types::{Address, RequestId, Result, TaskError, TaskId};
use tracing::info;

pub struct RequestProtocol {
    tasks: SharedTasks,
    funds: Arc<dyn FundsTransfer>,
    events: Arc<EventBus>,
}

impl RequestProtocol {
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

    /// Executor consent to a pending request. With `execute` set the request
    /// is carried out in the same call; if that execute step fails the
    /// consent rolls back with it and the call has no effect.
    pub async fn accept_request(
        &self,
        caller: Address,
        task_id: TaskId,
        kind: RequestKind,
        request_id: RequestId,
        execute: bool,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_taken()?;
        task.ensure_executor(caller)?;

        let request = task
            .requests_mut(kind)
            .get_mut(request_id.index())
            .ok_or(TaskError::RequestDoesNotExist)?;
        if request.accepted {
            return Err(TaskError::RequestAlreadyAccepted);
        }
        request.accepted = true;

        let mut effects = Vec::new();
        if execute {
            match self.execute_effects(caller, task_id, task, kind, request_id).await {
                Ok(out) => effects = out,
                Err(err) => {
                    if let Some(request) = task.requests_mut(kind).get_mut(request_id.index()) {
                        request.accepted = false;
                    }
                    return Err(err);
                }
            }
        }

        info!(task_id = %task_id, ?kind, request_id = %request_id, "Request accepted");
        self.events.emit(TaskEvent::RequestAccepted {
            task_id,
            kind,
            request_id,
            timestamp: events::now(),
        });
        for event in effects {
            self.events.emit(event);
        }
        Ok(())
    }

    /// Carries out an accepted request. Manager or executor may call.
    pub async fn execute_request(
        &self,
        caller: Address,
        task_id: TaskId,
        kind: RequestKind,
        request_id: RequestId,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(TaskError::TaskDoesNotExist)?;
        task.ensure_taken()?;
        if task.ensure_manager(caller).is_err() && task.ensure_executor(caller).is_err() {
            return Err(TaskError::NotManager);
        }

        let effects = self
            .execute_effects(caller, task_id, task, kind, request_id)
            .await?;
        for event in effects {
            self.events.emit(event);
        }
        Ok(())
    }

    /// Performs the request's effect and returns the events to publish.
    /// Emission is deferred to the caller so nothing reaches subscribers
    /// when a later step of the enclosing operation fails.
    async fn execute_effects(
        &self,
        caller: Address,
        task_id: TaskId,
        task: &mut Task,
        kind: RequestKind,
        request_id: RequestId,
    ) -> Result<Vec<TaskEvent>> {
        let request = task
            .requests(kind)
            .get(request_id.index())
            .ok_or(TaskError::RequestDoesNotExist)?;
        if !request.accepted {
            return Err(TaskError::RequestNotAccepted);
        }
        if request.executed {
            return Err(TaskError::RequestAlreadyExecuted);
        }
        let action = request.action.clone();

        let mut out = Vec::new();
        match &action {
            RequestAction::Cancel { .. } => {
                // Refund everything still in escrow to the creator, then
                // close.
                let mut plan = escrow::PlannedPayout::default();
                escrow::plan_refund_remainder(task, &mut plan)?;
                escrow::settle(self.funds.as_ref(), &plan).await?;
                escrow::apply_payout(task, &plan)?;
                task.state = TaskState::Closed;
            }
            RequestAction::TransferManagement { new_manager } => {
                task.manager = *new_manager;
                out.push(TaskEvent::ManagerChanged {
                    task_id,
                    manager: *new_manager,
                    timestamp: events::now(),
                });
            }
        }

        let request = task
            .requests_mut(kind)
            .get_mut(request_id.index())
            .ok_or(TaskError::RequestDoesNotExist)?;
        request.executed = true;

        info!(task_id = %task_id, ?kind, request_id = %request_id, by = %caller, "Request executed");
        out.push(TaskEvent::RequestExecuted {
            task_id,
            kind,
            request_id,
            by: caller,
            timestamp: events::now(),
        });
        if matches!(action, RequestAction::Cancel { .. }) {
            out.push(TaskEvent::TaskCancelled {
                task_id,
                timestamp: events::now(),
            });
        }
        Ok(out)
    }
}

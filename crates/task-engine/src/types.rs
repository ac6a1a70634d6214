use crate::escrow::EscrowAccount;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use task_types::{
    Address, ApplicationId, NativeAmount, RequestId, Result, SubmissionId, TaskError, TaskId,
    TokenAmount,
};
use tokio::sync::RwLock;

/// Shared task record set. Every state-changing operation takes the write
/// lock for its full duration, so operations on the same task never
/// interleave and each either commits fully or fails with no effect.
pub(crate) type SharedTasks = Arc<RwLock<HashMap<TaskId, Task>>>;

/// Task lifecycle states. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Open,
    Taken,
    Closed,
}

/// Manager verdict on a submission. Terminal once set to a non-`None` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionJudgement {
    None,
    Accepted,
    Rejected,
}

/// How a task reached `Closed` through completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskCompletionSource {
    SubmissionJudged,
    Dispute,
}

/// Kinds of manager-gated actions routed through the request protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    CancelTask,
    TransferManagement,
}

/// Effect payload carried by a pending request, applied at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestAction {
    Cancel { metadata: String },
    TransferManagement { new_manager: Address },
}

impl RequestAction {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestAction::Cancel { .. } => RequestKind::CancelTask,
            RequestAction::TransferManagement { .. } => RequestKind::TransferManagement,
        }
    }
}

/// Generic two-phase approval envelope: proposed -> accepted -> executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub accepted: bool,
    pub executed: bool,
    pub action: RequestAction,
}

impl Request {
    pub fn new(action: RequestAction) -> Self {
        Self {
            accepted: false,
            executed: false,
            action,
        }
    }
}

/// One `(token, amount)` commitment backing a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub token: Address,
    pub amount: TokenAmount,
}

/// One native-currency payout an executor is entitled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRewardEntry {
    pub to: Address,
    pub amount: NativeAmount,
}

/// One token payout in a flat reward schedule. `next_token = true` closes
/// the current budget-token group and advances to the next budget entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub next_token: bool,
    pub to: Address,
    pub amount: TokenAmount,
}

/// Application registered as accepted at task creation, skipping the
/// normal application step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreapprovedApplication {
    pub applicant: Address,
    pub native_reward: Vec<NativeRewardEntry>,
    pub reward: Vec<RewardEntry>,
}

/// An applicant's offer to execute the task for the stated reward split.
///
/// Reward entry amounts are the *remaining* entitlement: partial payments
/// decrement them in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub metadata: String,
    pub applicant: Address,
    pub accepted: bool,
    pub native_reward: Vec<NativeRewardEntry>,
    pub reward: Vec<RewardEntry>,
}

/// A deliverable submitted by the executor, judged at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub metadata: String,
    pub feedback: String,
    pub judgement: SubmissionJudgement,
}

/// Authoritative task record. Owned exclusively by the registry;
/// applications, submissions and requests are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub metadata: String,
    pub deadline: u64,
    pub manager: Address,
    pub dispute_manager: Address,
    pub creator: Address,
    pub state: TaskState,
    pub executor_application: Option<ApplicationId>,
    pub escrow: EscrowAccount,
    pub applications: Vec<Application>,
    pub submissions: Vec<Submission>,
    pub requests: HashMap<RequestKind, Vec<Request>>,
}

impl Task {
    pub fn requests(&self, kind: RequestKind) -> &[Request] {
        self.requests.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn requests_mut(&mut self, kind: RequestKind) -> &mut Vec<Request> {
        self.requests.entry(kind).or_default()
    }

    pub fn application(&self, id: ApplicationId) -> Result<&Application> {
        self.applications
            .get(id.index())
            .ok_or(TaskError::ApplicationDoesNotExist)
    }

    pub(crate) fn application_mut(&mut self, id: ApplicationId) -> Result<&mut Application> {
        self.applications
            .get_mut(id.index())
            .ok_or(TaskError::ApplicationDoesNotExist)
    }

    /// The accepted application selected to execute the task.
    pub fn executor(&self) -> Result<&Application> {
        let id = self.executor_application.ok_or(TaskError::TaskNotTaken)?;
        self.application(id)
    }

    // ---- capability checks -------------------------------------------------
    //
    // Authorization is an explicit check per operation, never ambient: the
    // caller identity is threaded in from the identity boundary and compared
    // against the role recorded on the task.

    pub fn ensure_manager(&self, caller: Address) -> Result<()> {
        if caller != self.manager {
            return Err(TaskError::NotManager);
        }
        Ok(())
    }

    pub fn ensure_dispute_manager(&self, caller: Address) -> Result<()> {
        if caller != self.dispute_manager {
            return Err(TaskError::NotDisputeManager);
        }
        Ok(())
    }

    pub fn ensure_executor(&self, caller: Address) -> Result<()> {
        if self.executor()?.applicant != caller {
            return Err(TaskError::NotExecutor);
        }
        Ok(())
    }

    pub fn ensure_open(&self) -> Result<()> {
        match self.state {
            TaskState::Open => Ok(()),
            TaskState::Taken => Err(TaskError::TaskNotOpen),
            TaskState::Closed => Err(TaskError::TaskClosed),
        }
    }

    pub fn ensure_taken(&self) -> Result<()> {
        match self.state {
            TaskState::Taken => Ok(()),
            TaskState::Open => Err(TaskError::TaskNotTaken),
            TaskState::Closed => Err(TaskError::TaskClosed),
        }
    }

    pub fn ensure_not_closed(&self) -> Result<()> {
        if self.state == TaskState::Closed {
            return Err(TaskError::TaskClosed);
        }
        Ok(())
    }

    pub fn ensure_closed(&self) -> Result<()> {
        if self.state != TaskState::Closed {
            return Err(TaskError::TaskNotClosed);
        }
        Ok(())
    }
}

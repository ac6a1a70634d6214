//! Engine event stream.
//!
//! Every state-changing operation emits exactly one event describing what
//! changed, after the change is fully applied. Subscribers get a broadcast
//! receiver; a lagging subscriber drops old events rather than blocking the
//! engine.

use crate::types::{
    NativeRewardEntry, RequestKind, RewardEntry, SubmissionJudgement, TaskCompletionSource,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use task_types::{
    Address, ApplicationId, NativeAmount, RequestId, SubmissionId, TaskId, TokenAmount,
};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskCreated {
        task_id: TaskId,
        creator: Address,
        manager: Address,
        native_budget: NativeAmount,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    MetadataChanged {
        task_id: TaskId,
        metadata: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    DeadlineChanged {
        task_id: TaskId,
        deadline: u64,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    ManagerChanged {
        task_id: TaskId,
        manager: Address,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    BudgetChanged {
        task_id: TaskId,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    ApplicationCreated {
        task_id: TaskId,
        application_id: ApplicationId,
        applicant: Address,
        metadata: String,
        native_reward: Vec<NativeRewardEntry>,
        reward: Vec<RewardEntry>,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    ApplicationAccepted {
        task_id: TaskId,
        application_id: ApplicationId,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    RewardIncreased {
        task_id: TaskId,
        application_id: ApplicationId,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    TaskTaken {
        task_id: TaskId,
        application_id: ApplicationId,
        executor: Address,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    SubmissionCreated {
        task_id: TaskId,
        submission_id: SubmissionId,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    SubmissionReviewed {
        task_id: TaskId,
        submission_id: SubmissionId,
        judgement: SubmissionJudgement,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    PartialPayment {
        task_id: TaskId,
        native_paid: NativeAmount,
        tokens_paid: Vec<TokenAmount>,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    CancelTaskRequested {
        task_id: TaskId,
        request_id: RequestId,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    ManagementTransferRequested {
        task_id: TaskId,
        request_id: RequestId,
        new_manager: Address,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    RequestAccepted {
        task_id: TaskId,
        kind: RequestKind,
        request_id: RequestId,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    RequestExecuted {
        task_id: TaskId,
        kind: RequestKind,
        request_id: RequestId,
        by: Address,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    TaskCancelled {
        task_id: TaskId,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        source: TaskCompletionSource,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::TaskCreated { .. } => "task_created",
            TaskEvent::MetadataChanged { .. } => "metadata_changed",
            TaskEvent::DeadlineChanged { .. } => "deadline_changed",
            TaskEvent::ManagerChanged { .. } => "manager_changed",
            TaskEvent::BudgetChanged { .. } => "budget_changed",
            TaskEvent::ApplicationCreated { .. } => "application_created",
            TaskEvent::ApplicationAccepted { .. } => "application_accepted",
            TaskEvent::RewardIncreased { .. } => "reward_increased",
            TaskEvent::TaskTaken { .. } => "task_taken",
            TaskEvent::SubmissionCreated { .. } => "submission_created",
            TaskEvent::SubmissionReviewed { .. } => "submission_reviewed",
            TaskEvent::PartialPayment { .. } => "partial_payment",
            TaskEvent::CancelTaskRequested { .. } => "cancel_task_requested",
            TaskEvent::ManagementTransferRequested { .. } => "management_transfer_requested",
            TaskEvent::RequestAccepted { .. } => "request_accepted",
            TaskEvent::RequestExecuted { .. } => "request_executed",
            TaskEvent::TaskCancelled { .. } => "task_cancelled",
            TaskEvent::TaskCompleted { .. } => "task_completed",
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::TaskCreated { task_id, .. }
            | TaskEvent::MetadataChanged { task_id, .. }
            | TaskEvent::DeadlineChanged { task_id, .. }
            | TaskEvent::ManagerChanged { task_id, .. }
            | TaskEvent::BudgetChanged { task_id, .. }
            | TaskEvent::ApplicationCreated { task_id, .. }
            | TaskEvent::ApplicationAccepted { task_id, .. }
            | TaskEvent::RewardIncreased { task_id, .. }
            | TaskEvent::TaskTaken { task_id, .. }
            | TaskEvent::SubmissionCreated { task_id, .. }
            | TaskEvent::SubmissionReviewed { task_id, .. }
            | TaskEvent::PartialPayment { task_id, .. }
            | TaskEvent::CancelTaskRequested { task_id, .. }
            | TaskEvent::ManagementTransferRequested { task_id, .. }
            | TaskEvent::RequestAccepted { task_id, .. }
            | TaskEvent::RequestExecuted { task_id, .. }
            | TaskEvent::TaskCancelled { task_id, .. }
            | TaskEvent::TaskCompleted { task_id, .. } => *task_id,
        }
    }
}

/// Fan-out bus for engine events.
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
    emitted: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Emits an event to all subscribers. Send errors (no subscribers) are
    /// ignored; the engine does not require listeners.
    pub fn emit(&self, event: TaskEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_type = event.event_type(),
            task_id = %event.task_id(),
            "Emitting task event"
        );
        let _ = self.sender.send(event);
    }

    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

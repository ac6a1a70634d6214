//! Task marketplace engine: task lifecycle, escrowed budgets and reward
//! settlement.
//!
//! A creator funds a task, applicants offer reward splits, the manager
//! accepts applications, an accepted applicant takes the task and submits
//! work, and the manager's judgement (or a dispute verdict) settles the
//! escrow and closes the task. Committed funds either reach a reward
//! recipient or refund to the creator; nothing is minted or lost.

pub mod applications;
pub mod dispute;
pub mod escrow;
pub mod events;
pub mod funds;
pub mod ledger;
pub mod registry;
pub mod requests;
pub mod submissions;
pub mod types;

pub use applications::ApplicationManager;
pub use dispute::DisputeResolver;
pub use escrow::{EscrowAccount, TokenEscrow};
pub use events::{EventBus, TaskEvent};
pub use funds::{FundsTransfer, MemoryFunds, MemoryFundsConfig};
pub use registry::{RegistryConfig, TaskRegistry};
pub use requests::RequestProtocol;
pub use submissions::SubmissionManager;
pub use types::{
    Application, BudgetEntry, NativeRewardEntry, PreapprovedApplication, Request, RequestAction,
    RequestKind, RewardEntry, Submission, SubmissionJudgement, Task, TaskCompletionSource,
    TaskState,
};

use crate::Address;
use thiserror::Error;

/// Task engine error taxonomy.
///
/// Every operation reports failure synchronously with one of these kinds and
/// leaves no partial effect behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    // Not-found
    #[error("Task does not exist")]
    TaskDoesNotExist,

    #[error("Application does not exist")]
    ApplicationDoesNotExist,

    #[error("Submission does not exist")]
    SubmissionDoesNotExist,

    #[error("Request does not exist")]
    RequestDoesNotExist,

    // Authorization
    #[error("Caller is not the task manager")]
    NotManager,

    #[error("Caller is not the executor")]
    NotExecutor,

    #[error("Caller is not the applicant of this application")]
    NotYourApplication,

    #[error("Caller is not the dispute manager")]
    NotDisputeManager,

    #[error("Caller is not the engine owner")]
    NotOwner,

    // State-mismatch
    #[error("Task is not open")]
    TaskNotOpen,

    #[error("Task is not taken")]
    TaskNotTaken,

    #[error("Task is closed")]
    TaskClosed,

    #[error("Task is not closed")]
    TaskNotClosed,

    #[error("Application has not been accepted")]
    ApplicationNotAccepted,

    // Schedule-malformed
    #[error("Reward schedule does not end with a next-token marker")]
    RewardDoesntEndWithNextToken,

    #[error("Reward exceeds the task budget")]
    RewardAboveBudget,

    #[error("Partial reward exceeds the full reward")]
    PartialRewardAboveFullReward,

    #[error("Amount array length does not match the target entry count")]
    BudgetLengthMismatch,

    #[error("Reward increase requires a manual budget increase first")]
    ManualBudgetIncreaseNeeded,

    // Double-action
    #[error("Request already accepted")]
    RequestAlreadyAccepted,

    #[error("Request already executed")]
    RequestAlreadyExecuted,

    #[error("Request has not been accepted")]
    RequestNotAccepted,

    #[error("Submission already judged")]
    SubmissionAlreadyJudged,

    #[error("Judgement may not be the none verdict")]
    JudgementNone,

    // Arithmetic
    #[error("Fixed-width amount overflow")]
    Overflow,

    // Transfer
    #[error("Native currency transfer failed")]
    NativeTransferFailed,

    #[error("Token transfer failed: {token}")]
    TokenTransferFailed { token: Address },

    // Validation
    #[error("Deadline is in the past")]
    DeadlineInPast,

    #[error("Deadline extension must be non-zero")]
    DeadlineNotExtended,
}

pub type Result<T> = std::result::Result<T, TaskError>;

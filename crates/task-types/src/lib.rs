pub mod address;
pub mod amounts;
pub mod error;
pub mod ids;

pub use address::Address;
pub use amounts::{NativeAmount, TokenAmount};
pub use error::{Result, TaskError};
pub use ids::{ApplicationId, RequestId, SubmissionId, TaskId};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry-wide task identifier, allocated monotonically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-task application counter, bounded to the 32-bit domain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ApplicationId(pub u32);

impl ApplicationId {
    /// Next sequential id for a collection of the given length, if any remain.
    pub fn next(len: usize) -> Option<Self> {
        u32::try_from(len).ok().map(Self)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-task submission counter, bounded to the 8-bit domain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SubmissionId(pub u8);

impl SubmissionId {
    pub fn next(len: usize) -> Option<Self> {
        u8::try_from(len).ok().map(Self)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-task, per-kind request counter, bounded to the 8-bit domain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RequestId(pub u8);

impl RequestId {
    pub fn next(len: usize) -> Option<Self> {
        u8::try_from(len).ok().map(Self)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_allocation() {
        assert_eq!(SubmissionId::next(0), Some(SubmissionId(0)));
        assert_eq!(SubmissionId::next(255), Some(SubmissionId(255)));
        assert_eq!(SubmissionId::next(256), None);

        assert_eq!(ApplicationId::next(u32::MAX as usize), Some(ApplicationId(u32::MAX)));
        assert_eq!(ApplicationId::next(u32::MAX as usize + 1), None);
    }
}

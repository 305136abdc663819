//! Defines error types.
use std::fmt;
use thiserror::Error;

/// Crate result type (re-exported).
pub type Result<T> = std::result::Result<T, Error>;

/// Error types. None of these are faults of the queue itself, they only report why an
/// operation could not complete right now (or ever, in case of `InvalidSize`).
#[derive(Error, Debug, Eq, PartialEq, Clone, Copy)]
pub enum Error {
    /// Requested write does not currently fit, the consumer has not caught up yet.
    #[error("queue is full")]
    Full,
    /// No committed record is available.
    #[error("queue is empty")]
    Empty,
    /// Requested payload (plus frame header) can never fit within the queue capacity.
    #[error("invalid size, requested: {0}, max payload: {1}")]
    InvalidSize(usize, usize),
    /// The peer is known to have stopped. Only produced by the [`crate::shutdown`] layer.
    #[error("peer disconnected")]
    Disconnected,
}

impl Error {
    /// Returns `true` if retrying the same operation later can succeed.
    #[inline]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Error::Full | Error::Empty)
    }
}

/// Returned by typed push operations. Carries the value that could not be enqueued
/// so that the caller can retry without cloning it.
#[derive(Error)]
#[error("{error}")]
pub struct PushError<T> {
    /// Reason the value was rejected.
    pub error: Error,
    /// The rejected value.
    pub value: T,
}

impl<T> PushError<T> {
    #[inline]
    pub(crate) const fn new(error: Error, value: T) -> Self {
        Self { error, value }
    }

    /// Take back the rejected value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushError").field("error", &self.error).finish_non_exhaustive()
    }
}

#[cold]
#[inline(never)]
pub(crate) const fn invalid_size(requested: usize, max: usize) -> Error {
    Error::InvalidSize(requested, max)
}

#[cold]
#[inline(never)]
pub(crate) const fn disconnected() -> Error {
    Error::Disconnected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_format_errors() {
        assert_eq!("queue is full", Error::Full.to_string());
        assert_eq!("queue is empty", Error::Empty.to_string());
        assert_eq!("invalid size, requested: 100, max payload: 56", invalid_size(100, 56).to_string());
        assert_eq!("peer disconnected", disconnected().to_string());
    }

    #[test]
    fn should_classify_transient_errors() {
        assert!(Error::Full.is_transient());
        assert!(Error::Empty.is_transient());
        assert!(!Error::InvalidSize(1, 0).is_transient());
        assert!(!Error::Disconnected.is_transient());
    }

    #[test]
    fn should_hand_back_rejected_value() {
        struct NotDebug(u32);
        let err = PushError::new(Error::Full, NotDebug(7));
        assert_eq!("queue is full", err.to_string());
        assert!(format!("{err:?}").contains("Full"));
        assert_eq!(7, err.into_inner().0);
    }
}

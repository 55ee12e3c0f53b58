//! Retry outcome errors
//!
//! Error codes:
//! - CAUSELOG_RETRY_FATAL (the wrapped error is not recoverable)
//! - CAUSELOG_RETRY_EXHAUSTED (every attempt failed)
//! - CAUSELOG_RETRY_TIMEOUT (the overall deadline passed)

use std::fmt;

use thiserror::Error;

use crate::error::FailureKind;

/// Whether an error is worth another attempt
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;

    /// Kind recorded against health when this error ends the operation
    fn failure_kind(&self) -> FailureKind {
        if self.is_recoverable() {
            FailureKind::StorageTransientFailure
        } else {
            FailureKind::StorageFatalFailure
        }
    }
}

/// Terminal failure of a retried operation
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    /// Not recoverable; surfaced without retrying
    #[error("{0}")]
    Fatal(E),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("timed out after {elapsed_ms}ms ({attempts} attempts)")]
    TimedOut {
        attempts: u32,
        elapsed_ms: u64,
        last: Option<E>,
    },
}

impl<E: fmt::Display> RetryError<E> {
    pub fn code(&self) -> &'static str {
        match self {
            RetryError::Fatal(_) => "CAUSELOG_RETRY_FATAL",
            RetryError::Exhausted { .. } => "CAUSELOG_RETRY_EXHAUSTED",
            RetryError::TimedOut { .. } => "CAUSELOG_RETRY_TIMEOUT",
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal(_) => 1,
            RetryError::Exhausted { attempts, .. } | RetryError::TimedOut { attempts, .. } => *attempts,
        }
    }

    /// The last error the operation returned, if any
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Fatal(e) => Some(e),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::TimedOut { last, .. } => last.as_ref(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RetryError::Fatal(_))
    }
}

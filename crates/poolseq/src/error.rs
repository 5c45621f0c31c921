//! Error types for sequence allocation.
//!
//! This module defines the central [`Error`] enum, which captures every
//! failure the allocator can report, and [`BackendError`], the opaque error
//! the external collaborators (cache, lock service, durable counter) hand
//! back.
//!
//! ## Error Cases
//! - `LockAcquisition`: the distributed lock was not granted within the wait
//!   bound. Retryable.
//! - `Reconciliation`: startup reconciliation failed; the allocator stays
//!   inactive until a later reconciliation succeeds.
//! - `InvariantViolation`: a pool window with `current_id > reset_on_id` was
//!   observed. Indicates a coordination bug.
//! - `Cache`, `Lock`, `Store`: a collaborator round trip failed. Retryable.

use core::time::Duration;

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Opaque failure reported by an external collaborator.
///
/// Collaborator implementations map their native errors (connection resets,
/// protocol errors, timeouts) into this type with enough context to log.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{context}")]
pub struct BackendError {
    context: String,
}

impl BackendError {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }
}

/// Unified error type for the sequence allocator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The named lock could not be acquired within the configured wait.
    #[error("failed to acquire lock '{name}' within {waited:?}")]
    LockAcquisition { name: String, waited: Duration },

    /// Startup (or configuration-change) reconciliation failed.
    #[error("reconciliation failed: {source}")]
    Reconciliation {
        #[source]
        source: Box<Error>,
    },

    /// The pool window overran its upper bound.
    #[error("pool invariant violated: current id {current_id} exceeds reset-on id {reset_on_id}")]
    InvariantViolation { current_id: u64, reset_on_id: u64 },

    /// Distributed allocation is switched off or was never reconciled.
    #[error("distributed sequence allocation is disabled")]
    Disabled,

    /// No pool window exists under the expected cache key.
    #[error("pool window '{key}' is missing from the shared cache")]
    WindowMissing { key: String },

    /// A cached value could not be decoded.
    #[error("corrupted data in key '{key}': {reason}")]
    CorruptedData { key: String, reason: String },

    /// `low + pool_size` does not fit in a `u64`.
    #[error("sequence exhausted: cannot reserve {pool_size} ids above {low}")]
    SequenceExhausted { low: u64, pool_size: u64 },

    /// A configuration value was present but malformed or out of range.
    #[error("invalid configuration for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    /// Retries were exhausted; carries the last failure.
    #[error("gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    /// Shared cache round trip failed.
    #[error("shared cache error: {0}")]
    Cache(#[source] BackendError),

    /// Lock service round trip failed.
    #[error("lock service error: {0}")]
    Lock(#[source] BackendError),

    /// Durable counter round trip failed.
    #[error("durable counter error: {0}")]
    Store(#[source] BackendError),
}

impl Error {
    /// Whether the caller may retry the same operation, ideally with backoff.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockAcquisition { .. } | Self::Cache(_) | Self::Lock(_) | Self::Store(_)
        )
    }

    pub(crate) fn invalid_config(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            Error::LockAcquisition {
                name: "app-KEY-GEN-LOCK".into(),
                waited: Duration::from_millis(5),
            }
            .is_retryable()
        );
        assert!(Error::Store(BackendError::new("down")).is_retryable());
        assert!(!Error::Disabled.is_retryable());
        assert!(
            !Error::InvariantViolation {
                current_id: 11,
                reset_on_id: 10,
            }
            .is_retryable()
        );
    }

    #[test]
    fn reconciliation_keeps_its_cause() {
        let err = Error::Reconciliation {
            source: Box::new(Error::Cache(BackendError::new("connection reset"))),
        };
        assert_eq!(
            err.to_string(),
            "reconciliation failed: shared cache error: connection reset"
        );
        let source = core::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("shared cache error: connection reset")
        );
    }
}

//! Structured error types for the reaction engine.
//!
//! `ReactorError` provides pattern-matchable errors instead of generic `anyhow::Error`.
//! Reactors, correctors and operations return `anyhow::Result`, so typed errors
//! travel inside `anyhow::Error` and are recovered with [`ReactorError::find`].
//!
//! # Expected Outcomes
//!
//! `AlreadyExists`, `NotExists` and `AlreadyInState` are business outcomes, not
//! failures of the engine. Call sites offering idempotent "toggle" semantics
//! catch exactly these three and convert them to a boolean:
//!
//! ```ignore
//! match engine.raise(&ctx, GroupMembership::add(group, user)).await {
//!     Ok(()) => Ok(true),
//!     Err(e) if ReactorError::is_expected(&e) => Ok(false),
//!     Err(e) => Err(e),
//! }
//! ```
//!
//! # Compensation Failures
//!
//! When a reaction fails and one of the compensating cancellations fails too,
//! the original error is returned with a [`CompensationFailed`] context
//! attached. Downcasting to the original typed error keeps working.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Error category for sanitized exposure through a protocol layer.
///
/// Internal error details are NEVER exposed - only the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeErrorCategory {
    /// Invalid input or an object used after disposal.
    Validation,
    /// Resource not found - safe to expose.
    NotFound,
    /// Resource exists or is already in the requested state - safe to expose.
    Conflict,
    /// Authorization failure - NEVER expose details.
    Unauthorized,
    /// Internal error - NEVER expose details.
    InternalError,
}

impl fmt::Display for SafeErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafeErrorCategory::Validation => write!(f, "validation_error"),
            SafeErrorCategory::NotFound => write!(f, "not_found"),
            SafeErrorCategory::Conflict => write!(f, "conflict"),
            SafeErrorCategory::Unauthorized => write!(f, "unauthorized"),
            SafeErrorCategory::InternalError => write!(f, "internal_error"),
        }
    }
}

/// Structured error type for reaction engine and entity operations.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The object a reactor was asked to create already exists.
    #[error("{what} already exists")]
    AlreadyExists { what: String },

    /// The object a reactor was asked to act on does not exist.
    #[error("{what} does not exist")]
    NotExists { what: String },

    /// The object is already in the requested state.
    #[error("{what} is already {state}")]
    AlreadyInState { what: String, state: String },

    /// The acting identity is not allowed to raise this event.
    #[error("access denied: {kind}")]
    AccessDenied { kind: String },

    /// A disposed shadow was accessed.
    #[error("{entity} #{key} has been destroyed")]
    ObjectDestroyed { entity: &'static str, key: i64 },

    /// An operation was invoked outside its required lifecycle phase.
    #[error("wrong phase: {operation} requires {required}")]
    WrongPhase {
        operation: &'static str,
        required: &'static str,
    },

    /// The event type was never registered with the engine.
    #[error("event type {type_name} is not registered")]
    NotRegistered { type_name: String },

    /// A row did not match the schema of its table.
    #[error("schema violation in {table}: {message}")]
    SchemaViolation { table: String, message: String },

    /// The storage collaborator failed.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// A serializable transaction lost against a concurrent one. Safe to
    /// retry from the start of the transaction.
    #[error("serialization failure: {message}")]
    SerializationFailure { message: String },
}

impl ReactorError {
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    pub fn not_exists(what: impl Into<String>) -> Self {
        Self::NotExists { what: what.into() }
    }

    pub fn already_in_state(what: impl Into<String>, state: impl Into<String>) -> Self {
        Self::AlreadyInState {
            what: what.into(),
            state: state.into(),
        }
    }

    pub fn access_denied(kind: impl Into<String>) -> Self {
        Self::AccessDenied { kind: kind.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn serialization_failure(message: impl Into<String>) -> Self {
        Self::SerializationFailure {
            message: message.into(),
        }
    }

    /// True if rerunning the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReactorError::SerializationFailure { .. })
    }

    /// Find a `ReactorError` inside an `anyhow::Error`, looking through any
    /// context that was attached on the way up.
    pub fn find(error: &anyhow::Error) -> Option<&ReactorError> {
        error.downcast_ref::<ReactorError>()
    }

    /// True if the error is one of the expected, non-fatal business outcomes
    /// (`AlreadyExists`, `NotExists`, `AlreadyInState`).
    pub fn is_expected(error: &anyhow::Error) -> bool {
        matches!(
            Self::find(error),
            Some(
                ReactorError::AlreadyExists { .. }
                    | ReactorError::NotExists { .. }
                    | ReactorError::AlreadyInState { .. }
            )
        )
    }

    /// True if the error is an access denial.
    pub fn is_access_denied(error: &anyhow::Error) -> bool {
        matches!(Self::find(error), Some(ReactorError::AccessDenied { .. }))
    }

    /// Return the safe category for this error.
    pub fn category(&self) -> SafeErrorCategory {
        match self {
            ReactorError::AlreadyExists { .. } | ReactorError::AlreadyInState { .. } => {
                SafeErrorCategory::Conflict
            }
            ReactorError::NotExists { .. } => SafeErrorCategory::NotFound,
            ReactorError::AccessDenied { .. } => SafeErrorCategory::Unauthorized,
            ReactorError::ObjectDestroyed { .. } => SafeErrorCategory::Validation,
            ReactorError::WrongPhase { .. }
            | ReactorError::NotRegistered { .. }
            | ReactorError::SchemaViolation { .. }
            | ReactorError::Storage { .. }
            | ReactorError::SerializationFailure { .. } => SafeErrorCategory::InternalError,
        }
    }

    /// Return a sanitized, user-safe message.
    ///
    /// Only `NotFound`, `Conflict` and `Validation` errors expose details.
    pub fn safe_message(&self) -> Cow<'static, str> {
        match self.category() {
            SafeErrorCategory::NotFound
            | SafeErrorCategory::Conflict
            | SafeErrorCategory::Validation => self.to_string().into(),
            SafeErrorCategory::Unauthorized => "Access denied".into(),
            SafeErrorCategory::InternalError => "An internal error occurred".into(),
        }
    }
}

/// A single cancellation that failed during a compensation cascade.
#[derive(Debug, Clone)]
pub struct FailedCancellation {
    /// Id of the event whose effect could not be undone.
    pub event_id: Uuid,
    /// Kind of that event.
    pub kind: &'static str,
    /// Rendered error of the failing cancellation.
    pub error: String,
}

/// Context attached to a reaction error when its compensation cascade was
/// incomplete.
#[derive(Debug, Clone)]
pub struct CompensationFailed {
    pub failures: Vec<FailedCancellation>,
}

impl fmt::Display for CompensationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compensation incomplete, {} cancellation(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {} {}: {}", failure.kind, failure.event_id, failure.error)?;
        }
        Ok(())
    }
}

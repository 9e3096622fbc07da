//! Core error taxonomy.
//!
//! Each variant carries its own recovery policy:
//!
//! | Variant | Recovery |
//! |---------|----------|
//! | [`StoreError::Provider`] | per-item skip during batch ingestion; request failure during query |
//! | [`StoreError::CorruptState`] | fall back to empty defaults at load time, never fatal |
//! | [`StoreError::Validation`] | request-level failure, no state mutation |
//! | [`StoreError::InvariantViolation`] | abort the mutating operation loudly |

use thiserror::Error;

/// Errors produced by the embedding store core.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedding provider call failed or timed out.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// Persisted files were missing, unreadable, or misaligned.
    #[error("corrupt persisted state: {0}")]
    CorruptState(String),

    /// A request payload was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The store's parallel structures disagree about length or membership.
    /// This is a programming-defect class: the mutating operation is rolled
    /// back and the error surfaced rather than silently patched.
    #[error("store invariant violation: {0}")]
    InvariantViolation(String),
}

//! Error types for the classification core

use thiserror::Error;

/// Failure to access shared classifier state.
///
/// Locks are acquired with a bounded timeout. Hitting it means a writer never
/// released the lock, which is a programming defect, so the ingestion loop
/// treats this as fatal instead of classifying against stale state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("timed out acquiring {mode} lock on {resource}")]
    LockTimeout {
        resource: &'static str,
        mode: &'static str,
    },
}

impl StateError {
    pub fn read(resource: &'static str) -> Self {
        Self::LockTimeout {
            resource,
            mode: "read",
        }
    }

    pub fn write(resource: &'static str) -> Self {
        Self::LockTimeout {
            resource,
            mode: "write",
        }
    }
}

/// Rejected runtime settings override
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting: {0}")]
    UnknownKey(String),

    #[error("invalid value {value} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: f64,
        reason: &'static str,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors surfaced by the classification pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    State(#[from] StateError),
}

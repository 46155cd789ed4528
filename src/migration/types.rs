//! Types for the migration orchestrator.

use crate::stage::MigrationStage;
use crate::store::StoreError;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error types for orchestrator operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("No migration in progress")]
    NoMigrationInProgress,

    #[error("Invalid migration stage: expected {expected} but was {actual}")]
    InvalidStage {
        expected: MigrationStage,
        actual: MigrationStage,
    },

    #[error("Invalid migration stage when {operation}: {actual}")]
    StageNotAllowed {
        operation: &'static str,
        actual: MigrationStage,
    },

    #[error("Invalid stage transition from {from} to {to}")]
    InvalidStageTransition {
        from: MigrationStage,
        to: MigrationStage,
    },
}

impl MigrationError {
    /// Stage precondition failures, as opposed to storage failures.
    pub fn is_stage_error(&self) -> bool {
        matches!(
            self,
            MigrationError::InvalidStage { .. }
                | MigrationError::StageNotAllowed { .. }
                | MigrationError::InvalidStageTransition { .. }
        )
    }
}

/// Why a migration moved to an error stage.
#[derive(Debug, Clone)]
pub enum FailureCause {
    Message(String),
    Error(Arc<dyn StdError + Send + Sync>),
}

impl FailureCause {
    pub fn error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        FailureCause::Error(Arc::new(error))
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Message(message) => f.write_str(message),
            FailureCause::Error(error) => write!(f, "{}", error),
        }
    }
}

impl From<String> for FailureCause {
    fn from(message: String) -> Self {
        FailureCause::Message(message)
    }
}

impl From<&str> for FailureCause {
    fn from(message: &str) -> Self {
        FailureCause::Message(message.to_string())
    }
}

impl From<Arc<dyn StdError + Send + Sync>> for FailureCause {
    fn from(error: Arc<dyn StdError + Send + Sync>) -> Self {
        FailureCause::Error(error)
    }
}

impl From<MigrationError> for FailureCause {
    fn from(error: MigrationError) -> Self {
        FailureCause::error(error)
    }
}

/// Published on every change of the current migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    Created {
        migration_id: u64,
        stage: MigrationStage,
    },
    StageTransition {
        migration_id: u64,
        from: MigrationStage,
        to: MigrationStage,
    },
}

// Service Error Types
// Crate-level error aggregating every subsystem failure the entry point can return

use crate::artifacts::ArtifactError;
use crate::chain::ChainError;
use crate::execution::graph::GraphError;
use crate::journal::reducer::InvariantViolation;
use crate::journal::JournalError;
use crate::loader::LoaderError;

use std::io;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by the deployment service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The module could not be turned into a valid execution plan
    #[error("planning failed: {0}")]
    Planning(#[from] GraphError),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("deployment loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Internal consistency check failed; always a bug
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("deployment was recorded on chain {recorded}, but the client is connected to chain {current}")]
    ChainIdMismatch { recorded: u64, current: u64 },

    #[error("cannot wipe future {future_id}: {reason}")]
    Wipe { future_id: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

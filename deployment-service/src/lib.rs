// Deployment Service Library
// Crash-recoverable orchestration of declarative on-chain deployment modules

pub mod artifacts;
pub mod chain;
pub mod config;
pub mod deployer;
pub mod error;
pub mod execution;
pub mod journal;
pub mod loader;
pub mod module;
pub mod reconciliation;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

pub use deployer::{Deployer, DeploymentResult, ExecutionSummary};
pub use config::DeployConfig;

// Re-export module definition types
pub use module::{
    Argument, DeploymentParameters, FutureDefinition, FutureKind, ModuleDefinition, ModuleParser,
    SubmoduleUse,
};

// Re-export execution types
pub use execution::{
    Batcher, DeploymentGraph, ExecutionEngine, ExecutionEvent, GraphError, GraphErrorKind,
    NetworkInteractionDriver, ProgressSender,
};

// Re-export persistence and collaborator types
pub use artifacts::{AbiCoder, Artifact, ArtifactResolver};
pub use chain::{ChainClient, FeeParams};
pub use journal::{FileJournal, Journal, JournalMessage, MemoryJournal};
pub use loader::{DeploymentLoader, FileDeploymentLoader, MemoryDeploymentLoader};
pub use reconciliation::{ReconciliationFailure, ReconciliationResult, Reconciler};
pub use state::{DeploymentState, ExecutionResult, ExecutionState, ExecutionStatus};

// Execution Module
// Graph construction, batching, input resolution and the execution engine

pub mod batcher;
pub mod context;
pub mod driver;
pub mod events;
pub mod executor;
pub mod graph;
pub mod timer;

// Re-export key types
pub use batcher::Batcher;
pub use context::{ResolutionContext, ResolutionError};
pub use driver::{DriverError, NetworkInteractionDriver};
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use executor::{ExecutionEngine, ExecutionOutcome};
pub use graph::{ArgumentValue, DeploymentGraph, Future, FutureSpec, GraphError, GraphErrorKind};
pub use timer::TransactionTrackingTimer;

// Execution Events
// Progress reporting for deployment runs

use crate::state::{ExecutionStatus, FutureId};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a deployment
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// Deployment run started
    DeploymentStarted {
        module_id: String,
        total_batches: usize,
    },

    /// Deployment run finished
    DeploymentCompleted {
        module_id: String,
        success: bool,
        duration: Duration,
    },

    BatchStarted {
        batch_index: usize,
        futures: Vec<FutureId>,
    },

    BatchCompleted {
        batch_index: usize,
        duration: Duration,
    },

    /// A future was initialized in the journal
    FutureStarted { future_id: FutureId },

    /// A future reached a terminal status
    FutureCompleted {
        future_id: FutureId,
        status: ExecutionStatus,
    },

    /// A future was not run because a dependency did not succeed
    FutureSkipped { future_id: FutureId, reason: String },

    TransactionSent { future_id: FutureId, hash: String },

    FeeBumped { future_id: FutureId, hash: String },

    /// Previously executed future missing from the current module
    ReconciliationWarning { future_id: FutureId, message: String },

    /// Log message
    Log { level: LogLevel, message: String },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn deployment_started(module_id: impl Into<String>, total_batches: usize) -> Self {
        Self::DeploymentStarted {
            module_id: module_id.into(),
            total_batches,
        }
    }

    pub fn deployment_completed(
        module_id: impl Into<String>,
        success: bool,
        duration: Duration,
    ) -> Self {
        Self::DeploymentCompleted {
            module_id: module_id.into(),
            success,
            duration,
        }
    }

    pub fn batch_started(batch_index: usize, futures: Vec<FutureId>) -> Self {
        Self::BatchStarted {
            batch_index,
            futures,
        }
    }

    pub fn batch_completed(batch_index: usize, duration: Duration) -> Self {
        Self::BatchCompleted {
            batch_index,
            duration,
        }
    }

    pub fn future_skipped(future_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FutureSkipped {
            future_id: future_id.into(),
            reason: reason.into(),
        }
    }

    pub fn reconciliation_warning(
        future_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ReconciliationWarning {
            future_id: future_id.into(),
            message: message.into(),
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

// Reconciliation
// Checks that a recorded deployment can be safely resumed against the current module

use crate::artifacts::ArtifactMap;
use crate::execution::context::ResolutionContext;
use crate::execution::graph::{DeploymentGraph, Future};
use crate::state::{DeploymentState, ExecutionState, ExecutionStatus, FutureId};

use std::fmt;

/// A recorded future that cannot be resumed as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationFailure {
    pub future_id: FutureId,
    pub reason: String,
}

impl fmt::Display for ReconciliationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.future_id, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub failures: Vec<ReconciliationFailure>,
    /// Completed futures no longer part of the module
    pub missing_executed_futures: Vec<FutureId>,
}

impl ReconciliationResult {
    /// True when resuming is safe
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Compares recorded execution states with a freshly built graph.
///
/// This is a pure check: nothing is fetched from the network and nothing is
/// written. Inputs are compared only for futures that already touched the
/// network or finished, since a future that was merely initialized has not
/// committed to anything yet.
pub struct Reconciler;

impl Reconciler {
    pub fn reconcile(
        graph: &DeploymentGraph,
        state: &DeploymentState,
        accounts: &[String],
        current: &ArtifactMap,
        stored: &ArtifactMap,
    ) -> ReconciliationResult {
        let context = ResolutionContext::new(state, accounts);
        let mut result = ReconciliationResult::default();

        for (id, execution) in &state.execution_states {
            let Some(future) = graph.get(id) else {
                if execution.status == ExecutionStatus::Success {
                    result.missing_executed_futures.push(id.clone());
                } else {
                    result.failures.push(ReconciliationFailure {
                        future_id: id.clone(),
                        reason: format!(
                            "future was removed from the module while {:?}",
                            execution.status
                        ),
                    });
                }
                continue;
            };

            for reason in Self::check_future(future, execution, &context, current, stored) {
                result.failures.push(ReconciliationFailure {
                    future_id: id.clone(),
                    reason,
                });
            }
        }

        result
    }

    fn check_future(
        future: &Future,
        execution: &ExecutionState,
        context: &ResolutionContext<'_>,
        current: &ArtifactMap,
        stored: &ArtifactMap,
    ) -> Vec<String> {
        if execution.kind != future.kind {
            return vec![format!(
                "kind changed from {:?} to {:?}",
                execution.kind, future.kind
            )];
        }

        let mut reasons = Vec::new();
        let committed =
            !execution.network_interactions.is_empty() || execution.status == ExecutionStatus::Success;

        if future.kind.is_contract() {
            match (current.get(&future.id), stored.get(&future.id)) {
                (None, _) => reasons.push("no artifact available for the contract".to_string()),
                (Some(now), Some(before)) if !before.has_same_interface(now) => {
                    reasons.push(format!(
                        "artifact interface changed ({} -> {})",
                        before.contract_name, now.contract_name
                    ));
                }
                (Some(now), Some(before))
                    if committed && future.kind.is_deployment() && before.bytecode != now.bytecode =>
                {
                    reasons.push("bytecode changed after the deployment was sent".to_string());
                }
                _ => {}
            }
        }

        if committed {
            match context.resolve_inputs(future) {
                Ok(inputs) => {
                    for field in execution.inputs.differences(&inputs) {
                        reasons.push(format!("{} changed", field));
                    }
                }
                Err(e) => reasons.push(format!("inputs can no longer be resolved: {}", e)),
            }
        }

        reasons
    }
}

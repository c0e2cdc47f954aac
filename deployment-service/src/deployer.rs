// Deployer
// Entry point: plans, reconciles and executes a module deployment

use crate::artifacts::{AbiCoder, Artifact, ArtifactMap, ArtifactResolver};
use crate::chain::ChainClient;
use crate::config::DeployConfig;
use crate::execution::batcher::Batcher;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::executor::{ExecutionEngine, ExecutionOutcome};
use crate::execution::graph::{DeploymentGraph, FutureSpec};
use crate::journal::{load_state, reduce, JournalMessage};
use crate::loader::{DeploymentLoader, LoaderError};
use crate::module::{DeploymentParameters, ModuleDefinition};
use crate::reconciliation::{ReconciliationFailure, Reconciler};
use crate::state::{DeploymentState, ExecutionResult, ExecutionStatus, FutureId};
use crate::{ServiceError, ServiceResult};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of a deployment run
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentResult {
    /// Every future succeeded; results of the root module's futures by name
    Success {
        results: BTreeMap<String, ExecutionResult>,
    },

    ExecutionFailure(ExecutionSummary),

    /// The recorded deployment cannot be resumed against this module
    ReconciliationFailure {
        failures: Vec<ReconciliationFailure>,
        missing_executed_futures: Vec<FutureId>,
    },
}

impl DeploymentResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeploymentResult::Success { .. })
    }
}

/// Per-status breakdown of a run that did not fully succeed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub successful: Vec<FutureId>,
    /// Failed futures with their error or revert reason
    pub failed: Vec<(FutureId, String)>,
    pub timed_out: Vec<FutureId>,
    pub held: Vec<(FutureId, String)>,
    /// Futures never started because a dependency did not succeed
    pub skipped: Vec<FutureId>,
}

impl ExecutionSummary {
    fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && self.timed_out.is_empty()
            && self.held.is_empty()
            && self.skipped.is_empty()
    }
}

/// Deploys modules against one network and one deployment directory
pub struct Deployer {
    artifacts: Arc<dyn ArtifactResolver>,
    coder: Arc<dyn AbiCoder>,
    loader: Arc<dyn DeploymentLoader>,
    client: Arc<dyn ChainClient>,
    config: DeployConfig,
    event_tx: Option<ProgressSender>,
}

impl Deployer {
    pub fn new(
        artifacts: Arc<dyn ArtifactResolver>,
        coder: Arc<dyn AbiCoder>,
        loader: Arc<dyn DeploymentLoader>,
        client: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            artifacts,
            coder,
            loader,
            client,
            config: DeployConfig::default(),
            event_tx: None,
        }
    }

    /// Create with custom configuration
    pub fn with_config(mut self, config: DeployConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Deploy a module, resuming whatever the journal already recorded
    pub async fn deploy(
        &self,
        module: &ModuleDefinition,
        parameters: &DeploymentParameters,
        accounts: &[String],
    ) -> ServiceResult<DeploymentResult> {
        if accounts.is_empty() {
            return Err(ServiceError::InvalidInput(
                "at least one account is required".to_string(),
            ));
        }

        let start = Instant::now();
        let graph = DeploymentGraph::build(module, parameters)?;
        let mut state = load_state(self.loader.journal()).await?;

        let chain_id = self.client.chain_id().await?;
        if let Some(recorded) = state.chain_id {
            if recorded != chain_id {
                return Err(ServiceError::ChainIdMismatch {
                    recorded,
                    current: chain_id,
                });
            }
        }

        let current = self.load_current_artifacts(&graph).await?;
        let stored = self.load_stored_artifacts(&state).await?;

        let reconciliation = Reconciler::reconcile(&graph, &state, accounts, &current, &stored);
        for id in &reconciliation.missing_executed_futures {
            warn!(future = %id, "executed future is no longer part of the module");
            self.event_tx.send_event(ExecutionEvent::reconciliation_warning(
                id.clone(),
                "executed future is no longer part of the module",
            ));
        }
        if !reconciliation.is_ok() {
            for failure in &reconciliation.failures {
                warn!(future = %failure.future_id, reason = %failure.reason, "reconciliation failed");
            }
            return Ok(DeploymentResult::ReconciliationFailure {
                failures: reconciliation.failures,
                missing_executed_futures: reconciliation.missing_executed_futures,
            });
        }

        let batches = Batcher::batch(&graph, &state.completed_futures())?;
        info!(
            module = %graph.root_module_id(),
            futures = graph.len(),
            batches = batches.len(),
            "starting deployment"
        );
        self.event_tx.send_event(ExecutionEvent::deployment_started(
            graph.root_module_id(),
            batches.len(),
        ));

        let run_start = JournalMessage::RunStart { chain_id };
        state = reduce(state, &run_start)?;
        self.loader.journal().append(&run_start).await?;

        let mut engine = ExecutionEngine::new(
            self.client.clone(),
            self.coder.clone(),
            self.loader.clone(),
            self.config.clone(),
        );
        if let Some(tx) = &self.event_tx {
            engine = engine.with_progress(tx.clone());
        }

        let outcome = engine
            .execute(&graph, &batches, &current, accounts, state)
            .await?;
        let result = summarize(&graph, &outcome);

        info!(
            module = %graph.root_module_id(),
            success = result.is_success(),
            "deployment finished"
        );
        self.event_tx.send_event(ExecutionEvent::deployment_completed(
            graph.root_module_id(),
            result.is_success(),
            start.elapsed(),
        ));

        Ok(result)
    }

    /// Forget the recorded state of a future so the next run starts it over
    pub async fn wipe(&self, future_id: &str) -> ServiceResult<()> {
        let state = load_state(self.loader.journal()).await?;

        if state.get(future_id).is_none() {
            return Err(ServiceError::Wipe {
                future_id: future_id.to_string(),
                reason: "no recorded state".to_string(),
            });
        }

        let dependents: Vec<&str> = state
            .execution_states
            .values()
            .filter(|execution| execution.dependencies.contains(future_id))
            .map(|execution| execution.id.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(ServiceError::Wipe {
                future_id: future_id.to_string(),
                reason: format!("recorded futures depend on it: {}", dependents.join(", ")),
            });
        }

        let message = JournalMessage::Wipe {
            future_id: future_id.to_string(),
        };
        reduce(state, &message)?;
        self.loader.journal().append(&message).await?;
        info!(future = %future_id, "future wiped");
        Ok(())
    }

    /// Artifacts of every contract-producing future, by future id
    async fn load_current_artifacts(&self, graph: &DeploymentGraph) -> ServiceResult<ArtifactMap> {
        let mut by_name: HashMap<String, Artifact> = HashMap::new();
        let mut artifacts = ArtifactMap::new();

        for future in graph.futures() {
            let name = match &future.spec {
                FutureSpec::ContractDeploy { contract_name, .. }
                | FutureSpec::ContractAt { contract_name, .. } => contract_name,
                FutureSpec::LibraryDeploy { library_name, .. } => library_name,
                _ => continue,
            };

            let artifact = match by_name.get(name) {
                Some(artifact) => artifact.clone(),
                None => {
                    let artifact = self.artifacts.load_artifact(name).await?;
                    by_name.insert(name.clone(), artifact.clone());
                    artifact
                }
            };
            artifacts.insert(future.id.clone(), artifact);
        }

        Ok(artifacts)
    }

    /// Artifacts bound to recorded futures in earlier runs
    async fn load_stored_artifacts(&self, state: &DeploymentState) -> ServiceResult<ArtifactMap> {
        let mut artifacts = ArtifactMap::new();

        for execution in state.execution_states.values() {
            if !execution.kind.is_contract() {
                continue;
            }
            match self.loader.load_artifact(&execution.id).await {
                Ok(artifact) => {
                    artifacts.insert(execution.id.clone(), artifact);
                }
                Err(LoaderError::ArtifactNotStored(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(artifacts)
    }
}

fn summarize(graph: &DeploymentGraph, outcome: &ExecutionOutcome) -> DeploymentResult {
    let mut summary = ExecutionSummary::default();

    for future in graph.futures() {
        let Some(execution) = outcome.state.get(&future.id) else {
            summary.skipped.push(future.id.clone());
            continue;
        };

        let detail = match &execution.result {
            Some(ExecutionResult::Error { message }) => message.clone(),
            Some(ExecutionResult::Revert { reason }) => reason.clone(),
            _ => String::new(),
        };

        match execution.status {
            ExecutionStatus::Success => summary.successful.push(future.id.clone()),
            ExecutionStatus::Failed => summary.failed.push((future.id.clone(), detail)),
            ExecutionStatus::Timeout => summary.timed_out.push(future.id.clone()),
            ExecutionStatus::Hold => summary.held.push((future.id.clone(), detail)),
            ExecutionStatus::Started => summary
                .failed
                .push((future.id.clone(), "did not complete".to_string())),
        }
    }

    if !summary.is_clean() {
        return DeploymentResult::ExecutionFailure(summary);
    }

    let results = graph
        .root_futures()
        .iter()
        .filter_map(|(name, id)| {
            outcome
                .state
                .get(id)
                .and_then(|execution| execution.result.clone())
                .map(|result| (name.clone(), result))
        })
        .collect();

    DeploymentResult::Success { results }
}

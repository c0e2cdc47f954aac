// Execution Engine
// Runs batches of futures to completion through polling rounds

use crate::artifacts::{AbiCoder, ArtifactMap};
use crate::chain::ChainClient;
use crate::config::DeployConfig;
use crate::execution::context::ResolutionContext;
use crate::execution::driver::{DriverError, NetworkInteractionDriver};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::{DeploymentGraph, Future};
use crate::journal::{reduce, JournalMessage};
use crate::loader::DeploymentLoader;
use crate::module::FutureKind;
use crate::state::{
    DeploymentState, ExecutionResult, ExecutionState, ExecutionStatus, FutureId,
    NetworkInteraction, OnchainInteraction, ResolvedInputs, StaticCall,
};
use crate::ServiceResult;

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// State left by a run
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub state: DeploymentState,
    /// Futures not started because a dependency did not succeed
    pub skipped: Vec<FutureId>,
}

/// Executes batches of futures.
///
/// The engine is the only writer of the journal during a run: every message
/// is appended before it is folded into the in-memory state.
pub struct ExecutionEngine {
    config: DeployConfig,
    driver: NetworkInteractionDriver,
    coder: Arc<dyn AbiCoder>,
    loader: Arc<dyn DeploymentLoader>,
    event_tx: Option<ProgressSender>,
}

impl ExecutionEngine {
    pub fn new(
        client: Arc<dyn ChainClient>,
        coder: Arc<dyn AbiCoder>,
        loader: Arc<dyn DeploymentLoader>,
        config: DeployConfig,
    ) -> Self {
        Self {
            driver: NetworkInteractionDriver::new(client, coder.clone(), &config),
            config,
            coder,
            loader,
            event_tx: None,
        }
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run every batch in order, starting from the recorded state
    pub async fn execute(
        &self,
        graph: &DeploymentGraph,
        batches: &[Vec<FutureId>],
        artifacts: &ArtifactMap,
        accounts: &[String],
        mut state: DeploymentState,
    ) -> ServiceResult<ExecutionOutcome> {
        let mut skipped = Vec::new();

        for (batch_index, batch) in batches.iter().enumerate() {
            let start = Instant::now();
            info!(batch = batch_index, futures = batch.len(), "starting batch");
            self.event_tx
                .send_event(ExecutionEvent::batch_started(batch_index, batch.clone()));

            let mut runnable = Vec::new();
            for id in batch {
                let Some(future) = graph.get(id) else {
                    continue;
                };

                let blocked: Vec<&FutureId> = future
                    .dependencies
                    .iter()
                    .filter(|dep| {
                        state.get(dep.as_str()).map(|s| s.status) != Some(ExecutionStatus::Success)
                    })
                    .collect();

                if blocked.is_empty() {
                    runnable.push(future);
                } else {
                    let reason = format!(
                        "Dependencies failed: {}",
                        blocked
                            .iter()
                            .map(|dep| dep.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    warn!(future = %id, %reason, "skipping future");
                    self.event_tx
                        .send_event(ExecutionEvent::future_skipped(id.clone(), reason));
                    skipped.push(id.clone());
                }
            }

            state = self.run_batch(&runnable, artifacts, accounts, state).await?;

            self.event_tx.send_event(ExecutionEvent::batch_completed(
                batch_index,
                start.elapsed(),
            ));
        }

        Ok(ExecutionOutcome { state, skipped })
    }

    /// Poll the futures of one batch until each reaches a terminal status
    async fn run_batch(
        &self,
        futures: &[&Future],
        artifacts: &ArtifactMap,
        accounts: &[String],
        mut state: DeploymentState,
    ) -> ServiceResult<DeploymentState> {
        loop {
            let pending: Vec<&Future> = futures
                .iter()
                .copied()
                .filter(|future| {
                    state
                        .get(&future.id)
                        .map_or(true, |execution| !execution.status.is_terminal())
                })
                .collect();

            if pending.is_empty() {
                return Ok(state);
            }

            let steps = join_all(
                pending
                    .iter()
                    .map(|future| self.step_future(future, &state, artifacts, accounts)),
            )
            .await;

            // siblings may have broadcast already; record them before failing
            let mut progressed = false;
            let mut first_error = None;
            for step in steps {
                match step {
                    Ok(messages) => {
                        for message in messages {
                            state = self.record(state, message).await?;
                            progressed = true;
                        }
                    }
                    Err(e) => {
                        warn!("future step failed: {}", e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }

            if !progressed {
                tokio::time::sleep(self.config.block_polling_interval).await;
            }
        }
    }

    /// Messages produced by one poll of a future
    async fn step_future(
        &self,
        future: &Future,
        state: &DeploymentState,
        artifacts: &ArtifactMap,
        accounts: &[String],
    ) -> ServiceResult<Vec<JournalMessage>> {
        match state.get(&future.id) {
            None => self.initialize(future, state, artifacts, accounts).await,
            Some(execution) if execution.status == ExecutionStatus::Started => {
                Ok(self.advance(future, execution, state, artifacts).await)
            }
            Some(_) => Ok(Vec::new()),
        }
    }

    async fn initialize(
        &self,
        future: &Future,
        state: &DeploymentState,
        artifacts: &ArtifactMap,
        accounts: &[String],
    ) -> ServiceResult<Vec<JournalMessage>> {
        let initialize = |inputs: ResolvedInputs| JournalMessage::ExecutionStateInitialize {
            future_id: future.id.clone(),
            kind: future.kind,
            dependencies: future.dependencies.clone(),
            inputs,
            artifact_id: artifact_binding(future),
            planned_interactions: planned_interactions(future.kind),
        };

        let inputs = match ResolutionContext::new(state, accounts).resolve_inputs(future) {
            Ok(inputs) => inputs,
            Err(e) => {
                return Ok(vec![
                    initialize(ResolvedInputs::default()),
                    failed(future, e.to_string()),
                ]);
            }
        };

        if future.kind.is_contract() {
            if let Some(artifact) = artifacts.get(&future.id) {
                self.loader.store_artifact(&future.id, artifact).await?;
            }
        }

        let next = self.plan_next(future, &inputs, 1, state, artifacts);
        Ok(vec![initialize(inputs), next])
    }

    async fn advance(
        &self,
        future: &Future,
        execution: &ExecutionState,
        state: &DeploymentState,
        artifacts: &ArtifactMap,
    ) -> Vec<JournalMessage> {
        if execution.pending_interaction().is_none() {
            let started = execution.network_interactions.len();
            if started < execution.planned_interactions || execution.planned_interactions == 0 {
                return vec![self.plan_next(future, &execution.inputs, started + 1, state, artifacts)];
            }
            return Vec::new();
        }

        let artifact = execution
            .artifact_id
            .as_ref()
            .and_then(|id| artifacts.get(id));

        match self.driver.step(execution, artifact).await {
            Ok(message) => message.into_iter().collect(),
            Err(DriverError::Transport(message)) => {
                warn!(future = %future.id, error = %message, "transport error, retrying next round");
                self.event_tx.send_event(ExecutionEvent::warning(format!(
                    "{}: transport error: {}",
                    future.id, message
                )));
                Vec::new()
            }
            Err(e @ DriverError::AllTransactionsDropped { .. }) => {
                warn!(future = %future.id, "holding future: {}", e);
                vec![JournalMessage::ExecutionStateHold {
                    future_id: future.id.clone(),
                    reason: e.to_string(),
                }]
            }
            Err(e) => vec![failed(future, e.to_string())],
        }
    }

    /// The next step of a future that has no pending interaction
    fn plan_next(
        &self,
        future: &Future,
        inputs: &ResolvedInputs,
        interaction_id: usize,
        state: &DeploymentState,
        artifacts: &ArtifactMap,
    ) -> JournalMessage {
        let artifact = artifact_binding(future).and_then(|id| artifacts.get(&id));
        let from = inputs.from.clone().unwrap_or_default();

        let planned = match future.kind {
            FutureKind::ContractAt => match &inputs.to {
                Some(address) => Ok(JournalMessage::ExecutionStateSucceeded {
                    future_id: future.id.clone(),
                    result: ExecutionResult::Deployed {
                        address: address.clone(),
                    },
                }),
                None => Err("no address to bind".to_string()),
            },

            FutureKind::ReadEventArgument => self
                .read_event_argument(future, inputs, state, artifacts)
                .map(|value| JournalMessage::ExecutionStateSucceeded {
                    future_id: future.id.clone(),
                    result: ExecutionResult::Value { value },
                }),

            FutureKind::ContractDeploy | FutureKind::LibraryDeploy => artifact
                .ok_or_else(|| format!("no artifact for {}", future.id))
                .and_then(|artifact| {
                    self.coder
                        .encode_deployment(artifact, &inputs.args, &inputs.libraries)
                        .map_err(|e| e.to_string())
                })
                .map(|data| onchain_request(future, interaction_id, None, data, inputs.value, from)),

            FutureKind::Call => artifact
                .ok_or_else(|| format!("no artifact for {}", future.id))
                .and_then(|artifact| {
                    self.coder
                        .encode_function_call(
                            artifact,
                            inputs.method.as_deref().unwrap_or_default(),
                            &inputs.args,
                        )
                        .map_err(|e| e.to_string())
                })
                .map(|data| {
                    onchain_request(future, interaction_id, inputs.to.clone(), data, inputs.value, from)
                }),

            FutureKind::SendData => Ok(onchain_request(
                future,
                interaction_id,
                inputs.to.clone(),
                inputs.data.clone().unwrap_or_else(|| "0x".to_string()),
                inputs.value,
                from,
            )),

            FutureKind::StaticCall => artifact
                .ok_or_else(|| format!("no artifact for {}", future.id))
                .and_then(|artifact| {
                    self.coder
                        .encode_function_call(
                            artifact,
                            inputs.method.as_deref().unwrap_or_default(),
                            &inputs.args,
                        )
                        .map_err(|e| e.to_string())
                })
                .map(|data| JournalMessage::NetworkInteractionRequest {
                    future_id: future.id.clone(),
                    interaction: NetworkInteraction::StaticCall(StaticCall {
                        id: interaction_id,
                        to: inputs.to.clone().unwrap_or_default(),
                        data,
                        from,
                        result: None,
                    }),
                }),
        };

        planned.unwrap_or_else(|error| failed(future, error))
    }

    fn read_event_argument(
        &self,
        future: &Future,
        inputs: &ResolvedInputs,
        state: &DeploymentState,
        artifacts: &ArtifactMap,
    ) -> Result<serde_json::Value, String> {
        let artifact = artifact_binding(future)
            .and_then(|id| artifacts.get(&id))
            .ok_or_else(|| format!("no artifact for the emitter of {}", future.id))?;

        let hash = inputs.source_transaction.as_deref().unwrap_or_default();
        let receipt = state
            .execution_states
            .values()
            .flat_map(|execution| &execution.network_interactions)
            .filter_map(|interaction| match interaction {
                NetworkInteraction::Onchain(onchain) => onchain.confirmed_transaction(),
                NetworkInteraction::StaticCall(_) => None,
            })
            .find(|transaction| transaction.hash == hash)
            .and_then(|transaction| transaction.receipt.as_ref())
            .ok_or_else(|| format!("no receipt for transaction {}", hash))?;

        self.coder
            .decode_event_argument(
                artifact,
                inputs.event.as_deref().unwrap_or_default(),
                inputs.event_index,
                inputs.argument.as_deref().unwrap_or_default(),
                &receipt.logs,
            )
            .map_err(|e| e.to_string())
    }

    /// Fold a message into the state, durably recording it first
    async fn record(
        &self,
        state: DeploymentState,
        message: JournalMessage,
    ) -> ServiceResult<DeploymentState> {
        let future_id = message.future_id().map(str::to_string);
        let was_running = future_id
            .as_deref()
            .and_then(|id| state.get(id))
            .map_or(true, |execution| !execution.status.is_terminal());

        let next = reduce(state, &message)?;
        self.loader.journal().append(&message).await?;
        debug!(?message, "journal message recorded");

        match &message {
            JournalMessage::ExecutionStateInitialize { future_id, .. } => {
                self.event_tx.send_event(ExecutionEvent::FutureStarted {
                    future_id: future_id.clone(),
                });
            }
            JournalMessage::TransactionSend {
                future_id,
                transaction,
                ..
            } => {
                self.event_tx.send_event(ExecutionEvent::TransactionSent {
                    future_id: future_id.clone(),
                    hash: transaction.hash.clone(),
                });
            }
            JournalMessage::OnchainInteractionBumpFees {
                future_id,
                transaction,
                ..
            } => {
                info!(future = %future_id, hash = %transaction.hash, "fees bumped");
                self.event_tx.send_event(ExecutionEvent::FeeBumped {
                    future_id: future_id.clone(),
                    hash: transaction.hash.clone(),
                });
            }
            _ => {}
        }

        if let Some(execution) = future_id.as_deref().and_then(|id| next.get(id)) {
            if was_running && execution.status.is_terminal() {
                self.report_completion(execution);
            }
        }

        Ok(next)
    }

    fn report_completion(&self, execution: &ExecutionState) {
        match (&execution.status, &execution.result) {
            (ExecutionStatus::Success, _) => {
                info!(future = %execution.id, "future succeeded");
            }
            (status, result) => {
                let detail = match result {
                    Some(ExecutionResult::Error { message }) => message.clone(),
                    Some(ExecutionResult::Revert { reason }) => reason.clone(),
                    _ => format!("{:?}", status),
                };
                warn!(future = %execution.id, ?status, %detail, "future did not succeed");
                self.event_tx.send_event(ExecutionEvent::error(format!(
                    "{}: {}",
                    execution.id, detail
                )));
            }
        }

        self.event_tx.send_event(ExecutionEvent::FutureCompleted {
            future_id: execution.id.clone(),
            status: execution.status,
        });
    }
}

/// Future whose artifact a future uses
fn artifact_binding(future: &Future) -> Option<FutureId> {
    use crate::execution::graph::FutureSpec;

    match &future.spec {
        FutureSpec::ContractDeploy { .. }
        | FutureSpec::LibraryDeploy { .. }
        | FutureSpec::ContractAt { .. } => Some(future.id.clone()),
        FutureSpec::Call { contract, .. } | FutureSpec::StaticCall { contract, .. } => {
            Some(contract.clone())
        }
        FutureSpec::ReadEventArgument { emitter, .. } => Some(emitter.clone()),
        FutureSpec::SendData { .. } => None,
    }
}

fn planned_interactions(kind: FutureKind) -> usize {
    match kind {
        FutureKind::ContractAt | FutureKind::ReadEventArgument => 0,
        _ => 1,
    }
}

fn onchain_request(
    future: &Future,
    id: usize,
    to: Option<String>,
    data: String,
    value: u128,
    from: String,
) -> JournalMessage {
    JournalMessage::NetworkInteractionRequest {
        future_id: future.id.clone(),
        interaction: NetworkInteraction::Onchain(OnchainInteraction {
            id,
            to,
            data,
            value,
            from,
            transactions: Vec::new(),
            timed_out: false,
        }),
    }
}

fn failed(future: &Future, error: String) -> JournalMessage {
    JournalMessage::ExecutionStateFailed {
        future_id: future.id.clone(),
        error,
    }
}

// Network Interaction Driver
// Advances the pending network interaction of a single future by one poll

use crate::artifacts::{AbiCoder, Artifact, CodecError};
use crate::chain::{CallOutcome, CallRequest, ChainClient, ChainError, TransactionPayload};
use crate::config::DeployConfig;
use crate::execution::timer::TransactionTrackingTimer;
use crate::journal::JournalMessage;
use crate::state::{
    ExecutionState, NetworkInteraction, OnchainInteraction, StaticCall, StaticCallResult,
    Transaction,
};

use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Percentage by which fees are raised on each bump
const FEE_BUMP_PERCENT: u128 = 10;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// Transient network failure; the interaction is polled again later
    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// Every transaction of the interaction vanished from the network
    #[error("all transactions of interaction {network_interaction_id} of {future_id} were dropped")]
    AllTransactionsDropped {
        future_id: String,
        network_interaction_id: usize,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("no artifact available for {0}")]
    MissingArtifact(String),
}

impl From<ChainError> for DriverError {
    fn from(error: ChainError) -> Self {
        match error {
            ChainError::Transport(message) => DriverError::Transport(message),
            ChainError::Rejected(message) => DriverError::Rejected(message),
        }
    }
}

/// Drives submission, confirmation, fee bumping and timeout of interactions.
///
/// Each call to [`step`](Self::step) inspects the network once and returns
/// the message describing what happened, or `None` when there is nothing to
/// record yet.
pub struct NetworkInteractionDriver {
    client: Arc<dyn ChainClient>,
    coder: Arc<dyn AbiCoder>,
    timer: Mutex<TransactionTrackingTimer>,
    required_confirmations: u64,
    fee_bump_delay: Duration,
    max_fee_bumps: usize,
}

impl NetworkInteractionDriver {
    pub fn new(client: Arc<dyn ChainClient>, coder: Arc<dyn AbiCoder>, config: &DeployConfig) -> Self {
        Self {
            client,
            coder,
            timer: Mutex::new(TransactionTrackingTimer::new()),
            required_confirmations: config.required_confirmations,
            fee_bump_delay: config.fee_bump_delay,
            max_fee_bumps: config.max_fee_bumps,
        }
    }

    /// Advance the last unresolved interaction of a future
    pub async fn step(
        &self,
        state: &ExecutionState,
        artifact: Option<&Artifact>,
    ) -> Result<Option<JournalMessage>, DriverError> {
        match state.pending_interaction() {
            Some(NetworkInteraction::StaticCall(call)) => {
                self.run_static_call(state, call, artifact).await.map(Some)
            }
            Some(NetworkInteraction::Onchain(onchain)) if onchain.transactions.is_empty() => {
                self.send_transaction(state, onchain).await.map(Some)
            }
            Some(NetworkInteraction::Onchain(onchain)) => self.check_transactions(state, onchain).await,
            None => Ok(None),
        }
    }

    async fn run_static_call(
        &self,
        state: &ExecutionState,
        call: &StaticCall,
        artifact: Option<&Artifact>,
    ) -> Result<JournalMessage, DriverError> {
        let request = CallRequest {
            from: call.from.clone(),
            to: call.to.clone(),
            data: call.data.clone(),
        };

        let result = match self.client.call(&request).await? {
            CallOutcome::Success { return_data } => {
                let artifact =
                    artifact.ok_or_else(|| DriverError::MissingArtifact(state.id.clone()))?;
                let method = state.inputs.method.as_deref().unwrap_or_default();
                let value = self.coder.decode_function_result(
                    artifact,
                    method,
                    state.inputs.output.as_deref(),
                    &return_data,
                )?;
                StaticCallResult::Success { return_data, value }
            }
            CallOutcome::Revert { return_data } => {
                let reason = self.coder.decode_revert_reason(&return_data);
                debug!(future = %state.id, ?reason, "static call reverted");
                StaticCallResult::Revert {
                    return_data,
                    reason,
                }
            }
        };

        Ok(JournalMessage::StaticCallComplete {
            future_id: state.id.clone(),
            network_interaction_id: call.id,
            result,
        })
    }

    async fn send_transaction(
        &self,
        state: &ExecutionState,
        onchain: &OnchainInteraction,
    ) -> Result<JournalMessage, DriverError> {
        let fees = self.client.network_fees().await?;
        let payload = payload(onchain, None);
        let submitted = self.client.submit_transaction(&payload, &fees).await?;

        self.timer.lock().await.add_transaction(&submitted.hash);
        debug!(future = %state.id, hash = %submitted.hash, "transaction sent");

        Ok(JournalMessage::TransactionSend {
            future_id: state.id.clone(),
            network_interaction_id: onchain.id,
            transaction: Transaction {
                hash: submitted.hash,
                nonce: submitted.nonce,
                fees,
                receipt: None,
            },
        })
    }

    async fn check_transactions(
        &self,
        state: &ExecutionState,
        onchain: &OnchainInteraction,
    ) -> Result<Option<JournalMessage>, DriverError> {
        let block = self.client.get_latest_block().await?;

        let found = try_join_all(
            onchain
                .transactions
                .iter()
                .map(|tx| self.client.get_transaction(&tx.hash)),
        )
        .await?;

        if found.iter().all(Option::is_none) {
            return Err(DriverError::AllTransactionsDropped {
                future_id: state.id.clone(),
                network_interaction_id: onchain.id,
            });
        }

        for (tx, _) in onchain
            .transactions
            .iter()
            .zip(&found)
            .filter(|(_, network)| network.is_some())
        {
            let Some(receipt) = self.client.get_transaction_receipt(&tx.hash).await? else {
                continue;
            };

            let confirmations = (block.number + 1).saturating_sub(receipt.block_number);
            if confirmations >= self.required_confirmations {
                debug!(future = %state.id, hash = %tx.hash, confirmations, "transaction confirmed");
                return Ok(Some(JournalMessage::TransactionConfirm {
                    future_id: state.id.clone(),
                    network_interaction_id: onchain.id,
                    hash: tx.hash.clone(),
                    receipt,
                }));
            }

            debug!(
                future = %state.id,
                hash = %tx.hash,
                confirmations,
                required = self.required_confirmations,
                "waiting for confirmations"
            );
            return Ok(None);
        }

        // nothing mined yet; the newest transaction decides
        let Some(newest) = onchain.transactions.last() else {
            return Ok(None);
        };
        let outstanding = self.timer.lock().await.tracking_time(&newest.hash);
        if outstanding < self.fee_bump_delay {
            return Ok(None);
        }

        if onchain.transactions.len() > self.max_fee_bumps {
            debug!(future = %state.id, attempts = onchain.transactions.len(), "interaction timed out");
            return Ok(Some(JournalMessage::OnchainInteractionTimeout {
                future_id: state.id.clone(),
                network_interaction_id: onchain.id,
            }));
        }

        let network_fees = self.client.network_fees().await?;
        let fees = newest.fees.bumped(FEE_BUMP_PERCENT).max(&network_fees);
        let nonce = onchain.transactions[0].nonce;

        let submitted = self
            .client
            .submit_transaction(&payload(onchain, Some(nonce)), &fees)
            .await?;
        self.timer.lock().await.add_transaction(&submitted.hash);
        debug!(
            future = %state.id,
            hash = %submitted.hash,
            replaces = %newest.hash,
            "fees bumped"
        );

        Ok(Some(JournalMessage::OnchainInteractionBumpFees {
            future_id: state.id.clone(),
            network_interaction_id: onchain.id,
            transaction: Transaction {
                hash: submitted.hash,
                nonce: submitted.nonce,
                fees,
                receipt: None,
            },
        }))
    }
}

fn payload(onchain: &OnchainInteraction, nonce: Option<u64>) -> TransactionPayload {
    TransactionPayload {
        from: onchain.from.clone(),
        to: onchain.to.clone(),
        data: onchain.data.clone(),
        value: onchain.value,
        nonce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FeeParams;
    use crate::journal::reduce;
    use crate::module::FutureKind;
    use crate::state::{DeploymentState, ResolvedInputs};
    use crate::testing::{test_artifact, MockChainClient, TextCoder};
    use std::collections::BTreeSet;

    const FUTURE: &str = "M#Token";

    fn config() -> DeployConfig {
        DeployConfig::default()
            .with_required_confirmations(3)
            .with_fee_bump_delay(Duration::from_secs(60))
            .with_max_fee_bumps(2)
    }

    fn driver(client: &Arc<MockChainClient>) -> NetworkInteractionDriver {
        NetworkInteractionDriver::new(client.clone(), Arc::new(TextCoder), &config())
    }

    fn apply(state: DeploymentState, message: &JournalMessage) -> DeploymentState {
        reduce(state, message).unwrap()
    }

    fn deployment_state() -> DeploymentState {
        let state = apply(
            DeploymentState::default(),
            &JournalMessage::ExecutionStateInitialize {
                future_id: FUTURE.to_string(),
                kind: FutureKind::ContractDeploy,
                dependencies: BTreeSet::new(),
                inputs: ResolvedInputs::default(),
                artifact_id: Some(FUTURE.to_string()),
                planned_interactions: 1,
            },
        );
        apply(
            state,
            &JournalMessage::NetworkInteractionRequest {
                future_id: FUTURE.to_string(),
                interaction: NetworkInteraction::Onchain(OnchainInteraction {
                    id: 1,
                    to: None,
                    data: "deploy:0x60:[]".to_string(),
                    value: 0,
                    from: "0xA0".to_string(),
                    transactions: vec![],
                    timed_out: false,
                }),
            },
        )
    }

    /// Step once and fold the produced message
    async fn step(
        driver: &NetworkInteractionDriver,
        state: DeploymentState,
    ) -> (DeploymentState, Option<JournalMessage>) {
        let message = driver.step(state.get(FUTURE).unwrap(), None).await.unwrap();
        let state = match &message {
            Some(message) => apply(state, message),
            None => state,
        };
        (state, message)
    }

    fn transactions(state: &DeploymentState) -> &[Transaction] {
        match &state.get(FUTURE).unwrap().network_interactions[0] {
            NetworkInteraction::Onchain(onchain) => &onchain.transactions,
            NetworkInteraction::StaticCall(_) => panic!("expected an onchain interaction"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submits_first_transaction() {
        let client = Arc::new(MockChainClient::new());
        let driver = driver(&client);

        let (state, message) = step(&driver, deployment_state()).await;

        assert!(matches!(message, Some(JournalMessage::TransactionSend { .. })));
        assert_eq!(transactions(&state).len(), 1);
        assert_eq!(transactions(&state)[0].fees, client.fees());
        assert_eq!(client.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_threshold() {
        let client = Arc::new(MockChainClient::new());
        let driver = driver(&client);

        let (state, _) = step(&driver, deployment_state()).await;
        let hash = transactions(&state)[0].hash.clone();

        // mined at block 10, head at 11: two confirmations
        client.mine(&hash, 10, Some("0xC0"));
        client.set_block_number(11);
        let (state, message) = step(&driver, state).await;
        assert!(message.is_none());

        // head at 12: exactly the three required
        client.set_block_number(12);
        let (state, message) = step(&driver, state).await;
        assert!(matches!(
            message,
            Some(JournalMessage::TransactionConfirm { hash: confirmed, .. }) if confirmed == hash
        ));
        assert_eq!(
            state.get(FUTURE).unwrap().status,
            crate::state::ExecutionStatus::Success
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_before_bumping_fees() {
        let client = Arc::new(MockChainClient::new());
        let driver = driver(&client);

        let (state, _) = step(&driver, deployment_state()).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        let (state, message) = step(&driver, state).await;
        assert!(message.is_none());
        assert_eq!(transactions(&state).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fee_bump_appends_transaction() {
        let client = Arc::new(MockChainClient::new());
        let driver = driver(&client);

        let (state, _) = step(&driver, deployment_state()).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        let (state, message) = step(&driver, state).await;

        assert!(matches!(
            message,
            Some(JournalMessage::OnchainInteractionBumpFees { .. })
        ));
        let sent = transactions(&state);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].nonce, sent[0].nonce);
        assert!(sent[1].fees.max_fee_per_gas > sent[0].fees.max_fee_per_gas);
        assert!(sent[1].fees.max_priority_fee_per_gas > sent[0].fees.max_priority_fee_per_gas);

        let resubmitted = client.submitted();
        assert_eq!(resubmitted[1].0.nonce, Some(sent[0].nonce));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_fee_bumps() {
        let client = Arc::new(MockChainClient::new());
        let driver = driver(&client);

        let (mut state, _) = step(&driver, deployment_state()).await;
        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(60)).await;
            let (next, message) = step(&driver, state).await;
            assert!(matches!(
                message,
                Some(JournalMessage::OnchainInteractionBumpFees { .. })
            ));
            state = next;
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        let (state, message) = step(&driver, state).await;

        assert!(matches!(
            message,
            Some(JournalMessage::OnchainInteractionTimeout { .. })
        ));
        assert_eq!(transactions(&state).len(), 3);
        assert_eq!(
            state.get(FUTURE).unwrap().status,
            crate::state::ExecutionStatus::Timeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_transactions_dropped() {
        let client = Arc::new(MockChainClient::new());
        let driver = driver(&client);

        let (state, _) = step(&driver, deployment_state()).await;
        client.drop_transaction(&transactions(&state)[0].hash);

        let err = driver
            .step(state.get(FUTURE).unwrap(), None)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DriverError::AllTransactionsDropped {
                future_id: FUTURE.to_string(),
                network_interaction_id: 1,
            }
        );
        assert_eq!(client.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_older_transaction_after_bump() {
        let client = Arc::new(MockChainClient::new());
        let driver = driver(&client);

        let (state, _) = step(&driver, deployment_state()).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        let (state, _) = step(&driver, state).await;

        let original = transactions(&state)[0].hash.clone();
        client.drop_transaction(&transactions(&state)[1].hash);
        client.mine(&original, 5, Some("0xC0"));
        client.set_block_number(20);

        let (_, message) = step(&driver, state).await;
        assert!(matches!(
            message,
            Some(JournalMessage::TransactionConfirm { hash, .. }) if hash == original
        ));
    }

    #[tokio::test]
    async fn test_transport_errors_surface() {
        let client = Arc::new(MockChainClient::new());
        client.fail_next_requests(1);
        let driver = driver(&client);

        let state = deployment_state();
        let err = driver
            .step(state.get(FUTURE).unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Transport(_)));
    }

    #[tokio::test]
    async fn test_static_call_revert_is_a_result() {
        let client = Arc::new(MockChainClient::new());
        client.set_call_outcome(
            "call:paused:[]",
            CallOutcome::Revert {
                return_data: "revert:contract is paused".to_string(),
            },
        );
        let driver = driver(&client);

        let mut state = DeploymentState::default();
        for message in [
            JournalMessage::ExecutionStateInitialize {
                future_id: FUTURE.to_string(),
                kind: FutureKind::StaticCall,
                dependencies: BTreeSet::new(),
                inputs: ResolvedInputs {
                    method: Some("paused".to_string()),
                    ..Default::default()
                },
                artifact_id: None,
                planned_interactions: 1,
            },
            JournalMessage::NetworkInteractionRequest {
                future_id: FUTURE.to_string(),
                interaction: NetworkInteraction::StaticCall(StaticCall {
                    id: 1,
                    to: "0xC0".to_string(),
                    data: "call:paused:[]".to_string(),
                    from: "0xA0".to_string(),
                    result: None,
                }),
            },
        ] {
            state = apply(state, &message);
        }

        let artifact = test_artifact("Token");
        let message = driver
            .step(state.get(FUTURE).unwrap(), Some(&artifact))
            .await
            .unwrap();

        assert_eq!(
            message,
            Some(JournalMessage::StaticCallComplete {
                future_id: FUTURE.to_string(),
                network_interaction_id: 1,
                result: StaticCallResult::Revert {
                    return_data: "revert:contract is paused".to_string(),
                    reason: Some("contract is paused".to_string()),
                },
            })
        );
    }

    #[test]
    fn test_bumped_fees_never_below_network() {
        let previous = FeeParams::new(100, 10);
        let network = FeeParams::new(500, 5);
        let fees = previous.bumped(FEE_BUMP_PERCENT).max(&network);
        assert_eq!(fees, FeeParams::new(500, 11));
    }
}

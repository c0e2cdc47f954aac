// State Reducer
// Pure fold of journal messages into the deployment state

use crate::journal::messages::JournalMessage;
use crate::state::{
    DeploymentState, ExecutionResult, ExecutionState, ExecutionStatus, NetworkInteraction,
    OnchainInteraction, StaticCallResult,
};

use thiserror::Error;

/// A message could not be applied to the state it was folded into.
/// Always a bug or a corrupted journal, never recovered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invariant violation: {0}")]
pub struct InvariantViolation(pub String);

fn violation(message: impl Into<String>) -> InvariantViolation {
    InvariantViolation(message.into())
}

/// Replay a message sequence from the empty state
pub fn replay<'a, I>(messages: I) -> Result<DeploymentState, InvariantViolation>
where
    I: IntoIterator<Item = &'a JournalMessage>,
{
    messages
        .into_iter()
        .try_fold(DeploymentState::default(), reduce)
}

/// Apply one message
pub fn reduce(
    mut state: DeploymentState,
    message: &JournalMessage,
) -> Result<DeploymentState, InvariantViolation> {
    match message {
        JournalMessage::RunStart { chain_id } => {
            if let Some(recorded) = state.chain_id {
                if recorded != *chain_id {
                    return Err(violation(format!(
                        "run started on chain {} but the journal belongs to chain {}",
                        chain_id, recorded
                    )));
                }
            }
            state.chain_id = Some(*chain_id);
        }

        JournalMessage::ExecutionStateInitialize {
            future_id,
            kind,
            dependencies,
            inputs,
            artifact_id,
            planned_interactions,
        } => {
            if state.execution_states.contains_key(future_id) {
                return Err(violation(format!("future {} initialized twice", future_id)));
            }
            state.execution_states.insert(
                future_id.clone(),
                ExecutionState {
                    id: future_id.clone(),
                    kind: *kind,
                    status: ExecutionStatus::Started,
                    dependencies: dependencies.clone(),
                    inputs: inputs.clone(),
                    artifact_id: artifact_id.clone(),
                    planned_interactions: *planned_interactions,
                    network_interactions: Vec::new(),
                    result: None,
                },
            );
        }

        JournalMessage::NetworkInteractionRequest {
            future_id,
            interaction,
        } => {
            let execution = started_state(&mut state, future_id)?;

            if execution.network_interactions.len() >= execution.planned_interactions {
                return Err(violation(format!(
                    "future {} requested more than {} interactions",
                    future_id, execution.planned_interactions
                )));
            }
            if execution
                .network_interactions
                .last()
                .is_some_and(|last| !last.is_resolved())
            {
                return Err(violation(format!(
                    "future {} requested an interaction while another is unresolved",
                    future_id
                )));
            }
            let expected = execution.network_interactions.len() + 1;
            if interaction.id() != expected || !interaction.is_fresh() {
                return Err(violation(format!(
                    "future {} requested interaction {} but the next one is {}",
                    future_id,
                    interaction.id(),
                    expected
                )));
            }

            execution.network_interactions.push(interaction.clone());
        }

        JournalMessage::TransactionSend {
            future_id,
            network_interaction_id,
            transaction,
        } => {
            let execution = started_state(&mut state, future_id)?;
            let onchain = onchain_interaction(execution, *network_interaction_id)?;

            if !onchain.transactions.is_empty() {
                return Err(violation(format!(
                    "future {} sent a first transaction twice on interaction {}",
                    future_id, network_interaction_id
                )));
            }
            onchain.transactions.push(transaction.clone());
        }

        JournalMessage::OnchainInteractionBumpFees {
            future_id,
            network_interaction_id,
            transaction,
        } => {
            let execution = started_state(&mut state, future_id)?;
            let onchain = onchain_interaction(execution, *network_interaction_id)?;

            if onchain.transactions.is_empty() || onchain.is_resolved() {
                return Err(violation(format!(
                    "future {} bumped fees on interaction {} without a pending transaction",
                    future_id, network_interaction_id
                )));
            }
            onchain.transactions.push(transaction.clone());
        }

        JournalMessage::TransactionConfirm {
            future_id,
            network_interaction_id,
            hash,
            receipt,
        } => {
            let execution = started_state(&mut state, future_id)?;
            let planned = execution.planned_interactions;
            let kind = execution.kind;

            let onchain = onchain_interaction(execution, *network_interaction_id)?;
            if onchain.is_resolved() {
                return Err(violation(format!(
                    "future {} confirmed interaction {} twice",
                    future_id, network_interaction_id
                )));
            }
            let transaction = onchain
                .transactions
                .iter_mut()
                .find(|tx| &tx.hash == hash)
                .ok_or_else(|| {
                    violation(format!(
                        "future {} confirmed unknown transaction {}",
                        future_id, hash
                    ))
                })?;
            transaction.receipt = Some(receipt.clone());

            if *network_interaction_id == planned {
                let result = if !receipt.status {
                    ExecutionResult::Revert {
                        reason: format!("transaction {} reverted", hash),
                    }
                } else if kind.is_deployment() {
                    match &receipt.contract_address {
                        Some(address) => ExecutionResult::Deployed {
                            address: address.clone(),
                        },
                        None => ExecutionResult::Error {
                            message: format!(
                                "deployment transaction {} has no contract address",
                                hash
                            ),
                        },
                    }
                } else {
                    ExecutionResult::Transaction { hash: hash.clone() }
                };
                complete(execution, result);
            }
        }

        JournalMessage::OnchainInteractionTimeout {
            future_id,
            network_interaction_id,
        } => {
            let execution = started_state(&mut state, future_id)?;
            let onchain = onchain_interaction(execution, *network_interaction_id)?;

            if onchain.is_resolved() {
                return Err(violation(format!(
                    "future {} timed out on resolved interaction {}",
                    future_id, network_interaction_id
                )));
            }
            onchain.timed_out = true;
            execution.status = ExecutionStatus::Timeout;
        }

        JournalMessage::StaticCallComplete {
            future_id,
            network_interaction_id,
            result,
        } => {
            let execution = started_state(&mut state, future_id)?;
            let planned = execution.planned_interactions;

            let call = match execution.network_interactions.last_mut() {
                Some(NetworkInteraction::StaticCall(call)) if call.id == *network_interaction_id => {
                    call
                }
                _ => {
                    return Err(violation(format!(
                        "future {} has no pending static call {}",
                        future_id, network_interaction_id
                    )))
                }
            };
            if call.result.is_some() {
                return Err(violation(format!(
                    "future {} completed static call {} twice",
                    future_id, network_interaction_id
                )));
            }
            call.result = Some(result.clone());

            if *network_interaction_id == planned {
                let outcome = match result {
                    StaticCallResult::Success { value, .. } => ExecutionResult::Value {
                        value: value.clone(),
                    },
                    StaticCallResult::Revert { reason, .. } => ExecutionResult::Revert {
                        reason: reason
                            .clone()
                            .unwrap_or_else(|| "static call reverted".to_string()),
                    },
                };
                complete(execution, outcome);
            }
        }

        JournalMessage::ExecutionStateSucceeded { future_id, result } => {
            let execution = started_state(&mut state, future_id)?;
            if !result.is_success() {
                return Err(violation(format!(
                    "future {} succeeded with a failure result",
                    future_id
                )));
            }
            complete(execution, result.clone());
        }

        JournalMessage::ExecutionStateFailed { future_id, error } => {
            let execution = started_state(&mut state, future_id)?;
            execution.status = ExecutionStatus::Failed;
            execution.result = Some(ExecutionResult::Error {
                message: error.clone(),
            });
        }

        JournalMessage::ExecutionStateHold { future_id, reason } => {
            let execution = started_state(&mut state, future_id)?;
            execution.status = ExecutionStatus::Hold;
            execution.result = Some(ExecutionResult::Error {
                message: reason.clone(),
            });
        }

        JournalMessage::Wipe { future_id } => {
            if state.execution_states.remove(future_id).is_none() {
                return Err(violation(format!(
                    "cannot wipe future {} without recorded state",
                    future_id
                )));
            }
        }
    }

    Ok(state)
}

fn started_state<'a>(
    state: &'a mut DeploymentState,
    future_id: &str,
) -> Result<&'a mut ExecutionState, InvariantViolation> {
    let execution = state
        .execution_states
        .get_mut(future_id)
        .ok_or_else(|| violation(format!("future {} has no execution state", future_id)))?;

    if execution.status != ExecutionStatus::Started {
        return Err(violation(format!(
            "future {} is already {:?}",
            future_id, execution.status
        )));
    }
    Ok(execution)
}

/// The last interaction, which must be the on-chain interaction `id`
fn onchain_interaction(
    execution: &mut ExecutionState,
    id: usize,
) -> Result<&mut OnchainInteraction, InvariantViolation> {
    let future_id = execution.id.clone();
    match execution.network_interactions.last_mut() {
        Some(NetworkInteraction::Onchain(onchain)) if onchain.id == id => Ok(onchain),
        _ => Err(violation(format!(
            "future {} has no pending onchain interaction {}",
            future_id, id
        ))),
    }
}

fn complete(execution: &mut ExecutionState, result: ExecutionResult) {
    execution.status = if result.is_success() {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Failed
    };
    execution.result = Some(result);
}

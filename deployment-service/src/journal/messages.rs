// Journal Messages
// Append-only vocabulary of execution state transitions

use crate::chain::Receipt;
use crate::module::FutureKind;
use crate::state::{
    ExecutionResult, FutureId, NetworkInteraction, ResolvedInputs, StaticCallResult, Transaction,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalMessage {
    /// A run started against the given chain
    RunStart { chain_id: u64 },

    ExecutionStateInitialize {
        future_id: FutureId,
        kind: FutureKind,
        dependencies: BTreeSet<FutureId>,
        inputs: ResolvedInputs,
        artifact_id: Option<FutureId>,
        planned_interactions: usize,
    },

    NetworkInteractionRequest {
        future_id: FutureId,
        interaction: NetworkInteraction,
    },

    TransactionSend {
        future_id: FutureId,
        network_interaction_id: usize,
        transaction: Transaction,
    },

    TransactionConfirm {
        future_id: FutureId,
        network_interaction_id: usize,
        hash: String,
        receipt: Receipt,
    },

    /// Replacement transaction with escalated fees
    OnchainInteractionBumpFees {
        future_id: FutureId,
        network_interaction_id: usize,
        transaction: Transaction,
    },

    OnchainInteractionTimeout {
        future_id: FutureId,
        network_interaction_id: usize,
    },

    StaticCallComplete {
        future_id: FutureId,
        network_interaction_id: usize,
        result: StaticCallResult,
    },

    ExecutionStateSucceeded {
        future_id: FutureId,
        result: ExecutionResult,
    },

    ExecutionStateFailed { future_id: FutureId, error: String },

    ExecutionStateHold { future_id: FutureId, reason: String },

    Wipe { future_id: FutureId },
}

impl JournalMessage {
    /// The future this message belongs to, if any
    pub fn future_id(&self) -> Option<&str> {
        match self {
            JournalMessage::RunStart { .. } => None,
            JournalMessage::ExecutionStateInitialize { future_id, .. }
            | JournalMessage::NetworkInteractionRequest { future_id, .. }
            | JournalMessage::TransactionSend { future_id, .. }
            | JournalMessage::TransactionConfirm { future_id, .. }
            | JournalMessage::OnchainInteractionBumpFees { future_id, .. }
            | JournalMessage::OnchainInteractionTimeout { future_id, .. }
            | JournalMessage::StaticCallComplete { future_id, .. }
            | JournalMessage::ExecutionStateSucceeded { future_id, .. }
            | JournalMessage::ExecutionStateFailed { future_id, .. }
            | JournalMessage::ExecutionStateHold { future_id, .. }
            | JournalMessage::Wipe { future_id } => Some(future_id),
        }
    }
}

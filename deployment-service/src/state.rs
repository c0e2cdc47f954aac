// Execution State Model
// Per-future state machines reconstructed by folding the journal

use crate::chain::{quantity, FeeParams, Receipt};
use crate::module::FutureKind;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Globally unique future id (`<module instance>#<local name>`)
pub type FutureId = String;

/// Status of a future's execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    Success,
    Failed,
    Timeout,
    /// Stopped without a safe automatic recovery; needs a wipe to retry
    Hold,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Started)
    }
}

/// One submission attempt of an on-chain interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub nonce: u64,
    pub fees: FeeParams,
    #[serde(default)]
    pub receipt: Option<Receipt>,
}

/// A transaction and all of its fee-bumped replacements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainInteraction {
    pub id: usize,
    /// `None` for contract creation
    pub to: Option<String>,
    pub data: String,
    #[serde(with = "quantity")]
    pub value: u128,
    pub from: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub timed_out: bool,
}

impl OnchainInteraction {
    /// The transaction that received a receipt, if any
    pub fn confirmed_transaction(&self) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.receipt.is_some())
    }

    pub fn is_resolved(&self) -> bool {
        self.timed_out || self.confirmed_transaction().is_some()
    }
}

/// Result of a read-only call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StaticCallResult {
    Success { return_data: String, value: Value },
    Revert { return_data: String, reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticCall {
    pub id: usize,
    pub to: String,
    pub data: String,
    pub from: String,
    #[serde(default)]
    pub result: Option<StaticCallResult>,
}

/// One discrete exchange with the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkInteraction {
    Onchain(OnchainInteraction),
    StaticCall(StaticCall),
}

impl NetworkInteraction {
    pub fn id(&self) -> usize {
        match self {
            NetworkInteraction::Onchain(onchain) => onchain.id,
            NetworkInteraction::StaticCall(call) => call.id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self {
            NetworkInteraction::Onchain(onchain) => onchain.is_resolved(),
            NetworkInteraction::StaticCall(call) => call.result.is_some(),
        }
    }

    /// Nothing has happened on this interaction yet
    pub fn is_fresh(&self) -> bool {
        match self {
            NetworkInteraction::Onchain(onchain) => {
                onchain.transactions.is_empty() && !onchain.timed_out
            }
            NetworkInteraction::StaticCall(call) => call.result.is_none(),
        }
    }
}

/// Final outcome of a future
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Address of a deployed or bound contract
    Deployed { address: String },
    /// Hash of the confirmed transaction
    Transaction { hash: String },
    /// Value read from the chain
    Value { value: Value },
    Revert { reason: String },
    Error { message: String },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExecutionResult::Deployed { .. }
                | ExecutionResult::Transaction { .. }
                | ExecutionResult::Value { .. }
        )
    }

    /// The value a dependent future sees when it references this one
    pub fn as_value(&self) -> Option<Value> {
        match self {
            ExecutionResult::Deployed { address } => Some(Value::String(address.clone())),
            ExecutionResult::Transaction { hash } => Some(Value::String(hash.clone())),
            ExecutionResult::Value { value } => Some(value.clone()),
            ExecutionResult::Revert { .. } | ExecutionResult::Error { .. } => None,
        }
    }
}

/// Fully resolved inputs a future was executed with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolvedInputs {
    pub contract_name: Option<String>,
    pub to: Option<String>,
    pub method: Option<String>,
    pub args: Vec<Value>,
    /// Library name -> linked address
    pub libraries: BTreeMap<String, String>,
    #[serde(with = "quantity")]
    pub value: u128,
    pub from: Option<String>,
    pub data: Option<String>,
    pub output: Option<String>,
    pub event: Option<String>,
    pub argument: Option<String>,
    pub event_index: usize,
    /// Confirmed transaction a read-event-argument future reads from
    pub source_transaction: Option<String>,
}

impl ResolvedInputs {
    /// Names of the fields that differ between two resolutions
    pub fn differences(&self, other: &ResolvedInputs) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.contract_name != other.contract_name {
            fields.push("contract name");
        }
        if self.to != other.to {
            fields.push("target address");
        }
        if self.method != other.method {
            fields.push("method");
        }
        if self.args != other.args {
            fields.push("arguments");
        }
        if self.libraries != other.libraries {
            fields.push("libraries");
        }
        if self.value != other.value {
            fields.push("value");
        }
        if self.from != other.from {
            fields.push("sender");
        }
        if self.data != other.data {
            fields.push("data");
        }
        if self.output != other.output {
            fields.push("output");
        }
        if self.event != other.event
            || self.argument != other.argument
            || self.event_index != other.event_index
        {
            fields.push("event");
        }
        if self.source_transaction != other.source_transaction {
            fields.push("source transaction");
        }
        fields
    }
}

/// Execution state of one future
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: FutureId,
    pub kind: FutureKind,
    pub status: ExecutionStatus,
    pub dependencies: BTreeSet<FutureId>,
    pub inputs: ResolvedInputs,
    /// Future whose stored artifact this future uses
    pub artifact_id: Option<FutureId>,
    /// Number of network interactions the future needs to complete
    pub planned_interactions: usize,
    pub network_interactions: Vec<NetworkInteraction>,
    pub result: Option<ExecutionResult>,
}

impl ExecutionState {
    /// The last interaction, if it is still unresolved
    pub fn pending_interaction(&self) -> Option<&NetworkInteraction> {
        self.network_interactions
            .last()
            .filter(|interaction| !interaction.is_resolved())
    }
}

/// Projection of the whole journal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub chain_id: Option<u64>,
    pub execution_states: BTreeMap<FutureId, ExecutionState>,
}

impl DeploymentState {
    pub fn get(&self, future_id: &str) -> Option<&ExecutionState> {
        self.execution_states.get(future_id)
    }

    /// Ids of the futures that finished successfully
    pub fn completed_futures(&self) -> BTreeSet<FutureId> {
        self.execution_states
            .values()
            .filter(|state| state.status == ExecutionStatus::Success)
            .map(|state| state.id.clone())
            .collect()
    }
}

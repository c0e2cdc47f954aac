// Chain Client Interface
// Network collaborator used to submit, track and query on-chain interactions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a chain client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Connectivity or RPC failure; retried on the next poll
    #[error("transport error: {0}")]
    Transport(String),

    /// The node refused the request (e.g. insufficient funds)
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// EIP-1559 style fee parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeParams {
    #[serde(with = "quantity")]
    pub max_fee_per_gas: u128,
    #[serde(with = "quantity")]
    pub max_priority_fee_per_gas: u128,
}

/// Wei amounts are journaled as decimal strings; tagged enums buffer their
/// content and cannot carry 128-bit integers
pub(crate) mod quantity {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct QuantityVisitor;

        impl<'de> Visitor<'de> for QuantityVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

impl FeeParams {
    pub fn new(max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        Self {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }
    }

    /// Raise both fields by `percent`, and by at least one unit
    pub fn bumped(&self, percent: u128) -> Self {
        let bump = |fee: u128| fee.saturating_add((fee.saturating_mul(percent) / 100).max(1));
        Self {
            max_fee_per_gas: bump(self.max_fee_per_gas),
            max_priority_fee_per_gas: bump(self.max_priority_fee_per_gas),
        }
    }

    /// Field-wise maximum of two fee sets
    pub fn max(&self, other: &FeeParams) -> Self {
        Self {
            max_fee_per_gas: self.max_fee_per_gas.max(other.max_fee_per_gas),
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .max(other.max_priority_fee_per_gas),
        }
    }
}

/// Chain head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: String,
}

/// Event log attached to a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: String,
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub block_number: u64,
    pub block_hash: String,
    /// Whether execution succeeded (false for reverted transactions)
    pub status: bool,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

/// Transaction as seen by the network (mined or pending)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: String,
    pub nonce: u64,
    pub block_number: Option<u64>,
}

/// Transaction to be signed and broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPayload {
    pub from: String,
    /// `None` for contract creation
    pub to: Option<String>,
    pub data: String,
    pub value: u128,
    /// Set when replacing an earlier transaction; the client assigns one otherwise
    pub nonce: Option<u64>,
}

/// Handle of a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub hash: String,
    pub nonce: u64,
}

/// Read-only call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: String,
    pub to: String,
    pub data: String,
}

/// Outcome of a read-only call; a revert is a response, not an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success { return_data: String },
    Revert { return_data: String },
}

/// Low-level network client
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Currently recommended fees
    async fn network_fees(&self) -> Result<FeeParams, ChainError>;

    /// Sign and broadcast a transaction
    async fn submit_transaction(
        &self,
        payload: &TransactionPayload,
        fees: &FeeParams,
    ) -> Result<SubmittedTransaction, ChainError>;

    /// Look up a transaction; `None` if the network does not know it
    async fn get_transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, ChainError>;

    /// Receipt of a mined transaction; `None` while pending
    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<Receipt>, ChainError>;

    async fn get_latest_block(&self) -> Result<Block, ChainError>;

    async fn call(&self, request: &CallRequest) -> Result<CallOutcome, ChainError>;
}

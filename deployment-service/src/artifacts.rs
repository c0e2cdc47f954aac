// Artifact Resolution and ABI Coding
// External collaborators mapping contract names to artifacts and encoding calls

use crate::chain::Log;
use crate::state::FutureId;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Artifacts keyed by the id of the future they are bound to
pub type ArtifactMap = BTreeMap<FutureId, Artifact>;

/// Binary and interface descriptor of a contract or library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    #[serde(default)]
    pub source_name: Option<String>,
    pub abi: Value,
    pub bytecode: String,
}

impl Artifact {
    /// Same contract name and same interface
    pub fn has_same_interface(&self, other: &Artifact) -> bool {
        self.contract_name == other.contract_name && self.abi == other.abi
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("failed to load artifact {name}: {message}")]
    Load { name: String, message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("decoding failed: {0}")]
    Decode(String),
}

/// Resolves a logical contract name to its artifact
#[async_trait::async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn load_artifact(&self, contract_name: &str) -> Result<Artifact, ArtifactError>;
}

/// ABI encoding and decoding of deployment data, calls, results and events
pub trait AbiCoder: Send + Sync {
    /// Creation bytecode with constructor arguments and linked libraries
    fn encode_deployment(
        &self,
        artifact: &Artifact,
        args: &[Value],
        libraries: &BTreeMap<String, String>,
    ) -> Result<String, CodecError>;

    fn encode_function_call(
        &self,
        artifact: &Artifact,
        method: &str,
        args: &[Value],
    ) -> Result<String, CodecError>;

    /// Decode a call's return data, optionally selecting a named output
    fn decode_function_result(
        &self,
        artifact: &Artifact,
        method: &str,
        output: Option<&str>,
        return_data: &str,
    ) -> Result<Value, CodecError>;

    /// Human readable revert reason, if the data carries one
    fn decode_revert_reason(&self, return_data: &str) -> Option<String>;

    /// Read one argument of the `event_index`-th matching event in `logs`
    fn decode_event_argument(
        &self,
        artifact: &Artifact,
        event: &str,
        event_index: usize,
        argument: &str,
        logs: &[Log],
    ) -> Result<Value, CodecError>;
}

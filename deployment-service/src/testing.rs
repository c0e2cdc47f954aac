// Test Support
// In-memory chain, artifact source and a readable text codec for unit tests

use crate::artifacts::{AbiCoder, Artifact, ArtifactError, ArtifactMap, ArtifactResolver, CodecError};
use crate::chain::{
    Block, CallOutcome, CallRequest, ChainClient, ChainError, ChainTransaction, FeeParams, Log,
    Receipt, SubmittedTransaction, TransactionPayload,
};
use crate::execution::graph::{DeploymentGraph, FutureSpec};

use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

pub const TEST_CHAIN_ID: u64 = 31337;

/// Artifact whose bytecode is derived from the contract name
pub fn test_artifact(name: &str) -> Artifact {
    Artifact {
        contract_name: name.to_string(),
        source_name: Some(format!("contracts/{}.sol", name)),
        abi: json!([{ "type": "constructor", "inputs": [] }]),
        bytecode: format!("0x6080{}", name.len()),
    }
}

/// Test artifacts for every contract-producing future of a graph
pub fn artifacts_for(graph: &DeploymentGraph) -> ArtifactMap {
    graph
        .futures()
        .filter_map(|future| match &future.spec {
            FutureSpec::ContractDeploy { contract_name, .. }
            | FutureSpec::ContractAt { contract_name, .. } => {
                Some((future.id.clone(), test_artifact(contract_name)))
            }
            FutureSpec::LibraryDeploy { library_name, .. } => {
                Some((future.id.clone(), test_artifact(library_name)))
            }
            _ => None,
        })
        .collect()
}

/// Serves [`test_artifact`]s for a fixed set of contract names
#[derive(Debug, Default)]
pub struct MemoryArtifactResolver {
    artifacts: Mutex<HashMap<String, Artifact>>,
}

impl MemoryArtifactResolver {
    pub fn with_contracts(names: &[&str]) -> Self {
        let resolver = Self::default();
        for name in names {
            resolver.insert(test_artifact(name));
        }
        resolver
    }

    pub fn insert(&self, artifact: Artifact) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(artifact.contract_name.clone(), artifact);
    }
}

#[async_trait::async_trait]
impl ArtifactResolver for MemoryArtifactResolver {
    async fn load_artifact(&self, contract_name: &str) -> Result<Artifact, ArtifactError> {
        self.artifacts
            .lock()
            .unwrap()
            .get(contract_name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(contract_name.to_string()))
    }
}

/// Codec producing human readable data.
///
/// Deployments encode as `deploy:<contract>:<args>`, calls as
/// `call:<method>:<args>` (args as JSON), call results are JSON and revert
/// data is `revert:<reason>`. Logs match on `topics[0] == event` and carry a
/// JSON object of arguments.
#[derive(Debug, Clone, Copy)]
pub struct TextCoder;

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
}

impl AbiCoder for TextCoder {
    fn encode_deployment(
        &self,
        artifact: &Artifact,
        args: &[Value],
        libraries: &BTreeMap<String, String>,
    ) -> Result<String, CodecError> {
        let mut data = format!("deploy:{}:{}", artifact.contract_name, to_json(&args)?);
        if !libraries.is_empty() {
            data.push(':');
            data.push_str(&to_json(libraries)?);
        }
        Ok(data)
    }

    fn encode_function_call(
        &self,
        _artifact: &Artifact,
        method: &str,
        args: &[Value],
    ) -> Result<String, CodecError> {
        if method.is_empty() {
            return Err(CodecError::Encode("missing method name".to_string()));
        }
        Ok(format!("call:{}:{}", method, to_json(&args)?))
    }

    fn decode_function_result(
        &self,
        _artifact: &Artifact,
        method: &str,
        output: Option<&str>,
        return_data: &str,
    ) -> Result<Value, CodecError> {
        let value: Value = serde_json::from_str(return_data)
            .map_err(|e| CodecError::Decode(format!("{}: {}", method, e)))?;

        match output {
            Some(name) => value
                .get(name)
                .cloned()
                .ok_or_else(|| CodecError::Decode(format!("{} has no output {}", method, name))),
            None => Ok(value),
        }
    }

    fn decode_revert_reason(&self, return_data: &str) -> Option<String> {
        return_data.strip_prefix("revert:").map(str::to_string)
    }

    fn decode_event_argument(
        &self,
        _artifact: &Artifact,
        event: &str,
        event_index: usize,
        argument: &str,
        logs: &[Log],
    ) -> Result<Value, CodecError> {
        let log = logs
            .iter()
            .filter(|log| log.topics.first().map(String::as_str) == Some(event))
            .nth(event_index)
            .ok_or_else(|| {
                CodecError::Decode(format!("no {} event at index {}", event, event_index))
            })?;

        let fields: Value =
            serde_json::from_str(&log.data).map_err(|e| CodecError::Decode(e.to_string()))?;
        fields
            .get(argument)
            .cloned()
            .ok_or_else(|| CodecError::Decode(format!("{} has no argument {}", event, argument)))
    }
}

#[derive(Debug, Clone)]
struct MockTransaction {
    nonce: u64,
    block_number: Option<u64>,
    receipt: Option<Receipt>,
}

#[derive(Debug)]
struct MockChain {
    chain_id: u64,
    block_number: u64,
    fees: FeeParams,
    transactions: HashMap<String, MockTransaction>,
    next_hash: u64,
    nonces: HashMap<String, u64>,
    dropped: HashSet<String>,
    call_outcomes: HashMap<String, CallOutcome>,
    reverting: HashSet<String>,
    events: HashMap<String, Vec<Log>>,
    failures: usize,
    auto_mine: bool,
    deployed: usize,
    submitted: Vec<(TransactionPayload, FeeParams)>,
}

/// Scriptable in-memory network.
///
/// Transactions stay pending until mined with [`mine`](Self::mine), unless
/// auto-mining is on, in which case each submission is mined in a new block.
#[derive(Debug)]
pub struct MockChainClient {
    chain: Mutex<MockChain>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(MockChain {
                chain_id: TEST_CHAIN_ID,
                block_number: 0,
                fees: FeeParams::new(100, 10),
                transactions: HashMap::new(),
                next_hash: 0,
                nonces: HashMap::new(),
                dropped: HashSet::new(),
                call_outcomes: HashMap::new(),
                reverting: HashSet::new(),
                events: HashMap::new(),
                failures: 0,
                auto_mine: false,
                deployed: 0,
                submitted: Vec::new(),
            }),
        }
    }

    pub fn with_auto_mine(self) -> Self {
        self.chain.lock().unwrap().auto_mine = true;
        self
    }

    pub fn with_chain_id(self, chain_id: u64) -> Self {
        self.chain.lock().unwrap().chain_id = chain_id;
        self
    }

    pub fn fees(&self) -> FeeParams {
        self.chain.lock().unwrap().fees
    }

    pub fn set_fees(&self, fees: FeeParams) {
        self.chain.lock().unwrap().fees = fees;
    }

    /// Every submission, in order
    pub fn submitted(&self) -> Vec<(TransactionPayload, FeeParams)> {
        self.chain.lock().unwrap().submitted.clone()
    }

    pub fn set_block_number(&self, number: u64) {
        self.chain.lock().unwrap().block_number = number;
    }

    /// Include a transaction in `block`
    pub fn mine(&self, hash: &str, block: u64, contract_address: Option<&str>) {
        let mut chain = self.chain.lock().unwrap();
        let receipt = Receipt {
            block_number: block,
            block_hash: format!("0xb{}", block),
            status: true,
            contract_address: contract_address.map(str::to_string),
            logs: Vec::new(),
        };
        if let Some(tx) = chain.transactions.get_mut(hash) {
            tx.block_number = Some(block);
            tx.receipt = Some(receipt);
        }
    }

    /// Make the network forget a transaction
    pub fn drop_transaction(&self, hash: &str) {
        self.chain.lock().unwrap().dropped.insert(hash.to_string());
    }

    /// Fail the next `count` requests with a transport error
    pub fn fail_next_requests(&self, count: usize) {
        self.chain.lock().unwrap().failures = count;
    }

    pub fn set_call_outcome(&self, data: &str, outcome: CallOutcome) {
        self.chain
            .lock()
            .unwrap()
            .call_outcomes
            .insert(data.to_string(), outcome);
    }

    /// Auto-mined transactions carrying `data` revert
    pub fn revert_data(&self, data: &str) {
        self.chain.lock().unwrap().reverting.insert(data.to_string());
    }

    /// Auto-mined transactions carrying `data` emit `event` with `fields`
    pub fn emit_event(&self, data: &str, event: &str, fields: Value) {
        self.chain
            .lock()
            .unwrap()
            .events
            .entry(data.to_string())
            .or_default()
            .push(Log {
                address: String::new(),
                topics: vec![event.to_string()],
                data: fields.to_string(),
            });
    }

    fn request(&self) -> Result<std::sync::MutexGuard<'_, MockChain>, ChainError> {
        let mut chain = self.chain.lock().unwrap();
        if chain.failures > 0 {
            chain.failures -= 1;
            return Err(ChainError::Transport("connection reset".to_string()));
        }
        Ok(chain)
    }
}

#[async_trait::async_trait]
impl ChainClient for MockChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.request()?.chain_id)
    }

    async fn network_fees(&self) -> Result<FeeParams, ChainError> {
        Ok(self.request()?.fees)
    }

    async fn submit_transaction(
        &self,
        payload: &TransactionPayload,
        fees: &FeeParams,
    ) -> Result<SubmittedTransaction, ChainError> {
        let mut chain = self.request()?;

        let nonce = match payload.nonce {
            Some(nonce) => nonce,
            None => {
                let next = chain.nonces.entry(payload.from.clone()).or_insert(0);
                let nonce = *next;
                *next += 1;
                nonce
            }
        };

        chain.next_hash += 1;
        let hash = format!("0x{:x}", chain.next_hash);
        chain.submitted.push((payload.clone(), *fees));

        let mut tx = MockTransaction {
            nonce,
            block_number: None,
            receipt: None,
        };

        if chain.auto_mine {
            chain.block_number += 1;
            let block = chain.block_number;
            let contract_address = if payload.to.is_none() {
                chain.deployed += 1;
                Some(format!("0xC{}", chain.deployed))
            } else {
                None
            };

            tx.block_number = Some(block);
            tx.receipt = Some(Receipt {
                block_number: block,
                block_hash: format!("0xb{}", block),
                status: !chain.reverting.contains(&payload.data),
                contract_address,
                logs: chain.events.get(&payload.data).cloned().unwrap_or_default(),
            });
        }

        chain.transactions.insert(hash.clone(), tx);
        Ok(SubmittedTransaction { hash, nonce })
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, ChainError> {
        let chain = self.request()?;
        if chain.dropped.contains(hash) {
            return Ok(None);
        }
        Ok(chain.transactions.get(hash).map(|tx| ChainTransaction {
            hash: hash.to_string(),
            nonce: tx.nonce,
            block_number: tx.block_number,
        }))
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<Receipt>, ChainError> {
        let chain = self.request()?;
        if chain.dropped.contains(hash) {
            return Ok(None);
        }
        Ok(chain.transactions.get(hash).and_then(|tx| tx.receipt.clone()))
    }

    async fn get_latest_block(&self) -> Result<Block, ChainError> {
        let chain = self.request()?;
        Ok(Block {
            number: chain.block_number,
            hash: format!("0xb{}", chain.block_number),
        })
    }

    async fn call(&self, request: &CallRequest) -> Result<CallOutcome, ChainError> {
        let chain = self.request()?;
        Ok(chain
            .call_outcomes
            .get(&request.data)
            .cloned()
            .unwrap_or(CallOutcome::Success {
                return_data: "null".to_string(),
            }))
    }
}

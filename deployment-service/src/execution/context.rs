// Resolution Context
// Turns a future's graph inputs into concrete values from the recorded state

use crate::execution::graph::{ArgumentValue, Future, FutureSpec};
use crate::state::{DeploymentState, ExecutionResult, NetworkInteraction, ResolvedInputs};

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("future {0} has no usable result")]
    UnresolvedFuture(String),

    #[error("account #{0} was not supplied")]
    UnknownAccount(usize),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Values available when a future starts: results recorded so far and the
/// accounts supplied to the deployment
pub struct ResolutionContext<'a> {
    state: &'a DeploymentState,
    accounts: &'a [String],
}

impl<'a> ResolutionContext<'a> {
    pub fn new(state: &'a DeploymentState, accounts: &'a [String]) -> Self {
        Self { state, accounts }
    }

    /// Resolve every input of a future
    pub fn resolve_inputs(&self, future: &Future) -> Result<ResolvedInputs, ResolutionError> {
        let inputs = match &future.spec {
            FutureSpec::ContractDeploy {
                contract_name,
                args,
                value,
                libraries,
                from,
            } => ResolvedInputs {
                contract_name: Some(contract_name.clone()),
                args: self.values(args)?,
                libraries: self.libraries(libraries)?,
                value: self.amount(value.as_ref())?,
                from: Some(self.sender(from.as_ref())?),
                ..Default::default()
            },
            FutureSpec::LibraryDeploy {
                library_name,
                libraries,
                from,
            } => ResolvedInputs {
                contract_name: Some(library_name.clone()),
                libraries: self.libraries(libraries)?,
                from: Some(self.sender(from.as_ref())?),
                ..Default::default()
            },
            FutureSpec::ContractAt {
                contract_name,
                address,
            } => ResolvedInputs {
                contract_name: Some(contract_name.clone()),
                to: Some(self.address(address)?),
                ..Default::default()
            },
            FutureSpec::Call {
                contract,
                method,
                args,
                value,
                from,
            } => ResolvedInputs {
                to: Some(self.contract_address(contract)?),
                method: Some(method.clone()),
                args: self.values(args)?,
                value: self.amount(value.as_ref())?,
                from: Some(self.sender(from.as_ref())?),
                ..Default::default()
            },
            FutureSpec::StaticCall {
                contract,
                method,
                args,
                output,
                from,
            } => ResolvedInputs {
                to: Some(self.contract_address(contract)?),
                method: Some(method.clone()),
                args: self.values(args)?,
                output: output.clone(),
                from: Some(self.sender(from.as_ref())?),
                ..Default::default()
            },
            FutureSpec::SendData {
                to,
                data,
                value,
                from,
            } => ResolvedInputs {
                to: Some(self.address(to)?),
                data: Some(data.clone().unwrap_or_else(|| "0x".to_string())),
                value: self.amount(value.as_ref())?,
                from: Some(self.sender(from.as_ref())?),
                ..Default::default()
            },
            FutureSpec::ReadEventArgument {
                future: source,
                emitter,
                event,
                argument,
                event_index,
            } => ResolvedInputs {
                to: Some(self.contract_address(emitter)?),
                event: Some(event.clone()),
                argument: Some(argument.clone()),
                event_index: *event_index,
                source_transaction: Some(self.confirmed_transaction(source)?),
                ..Default::default()
            },
        };

        Ok(inputs)
    }

    pub fn value(&self, argument: &ArgumentValue) -> Result<Value, ResolutionError> {
        match argument {
            ArgumentValue::Literal(value) => Ok(value.clone()),
            ArgumentValue::Future(id) => self
                .state
                .get(id)
                .and_then(|state| state.result.as_ref())
                .and_then(ExecutionResult::as_value)
                .ok_or_else(|| ResolutionError::UnresolvedFuture(id.clone())),
            ArgumentValue::Account(index) => self
                .accounts
                .get(*index)
                .map(|account| Value::String(account.clone()))
                .ok_or(ResolutionError::UnknownAccount(*index)),
        }
    }

    fn values(&self, args: &[ArgumentValue]) -> Result<Vec<Value>, ResolutionError> {
        args.iter().map(|argument| self.value(argument)).collect()
    }

    fn address(&self, argument: &ArgumentValue) -> Result<String, ResolutionError> {
        match self.value(argument)? {
            Value::String(address) => Ok(address),
            other => Err(ResolutionError::InvalidAddress(other.to_string())),
        }
    }

    /// Address of a contract-producing future
    fn contract_address(&self, id: &str) -> Result<String, ResolutionError> {
        match self.state.get(id).and_then(|state| state.result.as_ref()) {
            Some(ExecutionResult::Deployed { address }) => Ok(address.clone()),
            _ => Err(ResolutionError::UnresolvedFuture(id.to_string())),
        }
    }

    fn libraries(
        &self,
        libraries: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ResolutionError> {
        let mut resolved = BTreeMap::new();
        for (name, id) in libraries {
            resolved.insert(name.clone(), self.contract_address(id)?);
        }
        Ok(resolved)
    }

    fn amount(&self, argument: Option<&ArgumentValue>) -> Result<u128, ResolutionError> {
        let Some(argument) = argument else {
            return Ok(0);
        };

        match self.value(argument)? {
            Value::Number(number) => number
                .as_u64()
                .map(u128::from)
                .ok_or_else(|| ResolutionError::InvalidAmount(number.to_string())),
            Value::String(text) => text
                .parse()
                .map_err(|_| ResolutionError::InvalidAmount(text.clone())),
            other => Err(ResolutionError::InvalidAmount(other.to_string())),
        }
    }

    /// Explicit sender, or the first account
    fn sender(&self, from: Option<&ArgumentValue>) -> Result<String, ResolutionError> {
        match from {
            Some(argument) => self.address(argument),
            None => self
                .accounts
                .first()
                .cloned()
                .ok_or(ResolutionError::UnknownAccount(0)),
        }
    }

    /// Hash of the transaction that completed an on-chain future
    fn confirmed_transaction(&self, id: &str) -> Result<String, ResolutionError> {
        self.state
            .get(id)
            .and_then(|state| state.network_interactions.last())
            .and_then(|interaction| match interaction {
                NetworkInteraction::Onchain(onchain) => onchain.confirmed_transaction(),
                NetworkInteraction::StaticCall(_) => None,
            })
            .map(|transaction| transaction.hash.clone())
            .ok_or_else(|| ResolutionError::UnresolvedFuture(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::DeploymentGraph;
    use crate::module::{Argument, DeploymentParameters, FutureDefinition, ModuleDefinition};
    use crate::state::{ExecutionState, ExecutionStatus};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn accounts() -> Vec<String> {
        vec!["0xA0".to_string(), "0xA1".to_string()]
    }

    fn deployed(id: &str, address: &str) -> ExecutionState {
        ExecutionState {
            id: id.to_string(),
            kind: crate::module::FutureKind::ContractDeploy,
            status: ExecutionStatus::Success,
            dependencies: BTreeSet::new(),
            inputs: ResolvedInputs::default(),
            artifact_id: Some(id.to_string()),
            planned_interactions: 1,
            network_interactions: vec![],
            result: Some(ExecutionResult::Deployed {
                address: address.to_string(),
            }),
        }
    }

    fn graph() -> DeploymentGraph {
        let module = ModuleDefinition::new("M")
            .with_future(FutureDefinition::contract("Token", "Token", vec![]))
            .with_future(FutureDefinition::call(
                "transfer",
                "Token",
                "transfer",
                vec![Argument::account(1), Argument::literal("250")],
            ));
        DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap()
    }

    #[test]
    fn test_resolve_call_inputs() {
        let mut state = DeploymentState::default();
        state
            .execution_states
            .insert("M#Token".to_string(), deployed("M#Token", "0xC0"));
        let accounts = accounts();
        let context = ResolutionContext::new(&state, &accounts);

        let graph = graph();
        let inputs = context
            .resolve_inputs(graph.get("M#transfer").unwrap())
            .unwrap();

        assert_eq!(inputs.to.as_deref(), Some("0xC0"));
        assert_eq!(inputs.method.as_deref(), Some("transfer"));
        assert_eq!(inputs.args, vec![json!("0xA1"), json!("250")]);
        assert_eq!(inputs.from.as_deref(), Some("0xA0"));
        assert_eq!(inputs.value, 0);
    }

    #[test]
    fn test_unresolved_dependency() {
        let state = DeploymentState::default();
        let accounts = accounts();
        let context = ResolutionContext::new(&state, &accounts);

        let graph = graph();
        let err = context
            .resolve_inputs(graph.get("M#transfer").unwrap())
            .unwrap_err();
        assert_eq!(err, ResolutionError::UnresolvedFuture("M#Token".to_string()));
    }

    #[test]
    fn test_amounts_and_accounts() {
        let state = DeploymentState::default();
        let accounts = accounts();
        let context = ResolutionContext::new(&state, &accounts);

        let amount = |value: Value| context.amount(Some(&ArgumentValue::Literal(value)));
        assert_eq!(amount(json!(7)), Ok(7));
        assert_eq!(amount(json!("340282366920938463463374607431768211455")), Ok(u128::MAX));
        assert!(amount(json!(-1)).is_err());

        assert_eq!(
            context.value(&ArgumentValue::Account(5)),
            Err(ResolutionError::UnknownAccount(5))
        );
    }
}

// Deployment Graph (DAG) Builder
// Flattens a module definition into uniquely identified futures and dependency edges

use crate::module::{Argument, DeploymentParameters, FutureAction, FutureKind, ModuleDefinition};
use crate::state::FutureId;

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Two futures resolve to the same id
    DuplicateFutureId,
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to an unknown future or submodule
    UnknownDependency,
    /// A module parameter has no value
    MissingParameter,
    /// Invalid module structure
    InvalidStructure,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn duplicate_future(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::DuplicateFutureId,
        }
    }

    pub fn cyclic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::CyclicDependency,
        }
    }

    pub fn unknown_dependency(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownDependency,
        }
    }

    pub fn missing_parameter(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::MissingParameter,
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
        }
    }
}

/// An argument with parameters and references resolved
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Literal(Value),
    /// Result of another future
    Future(FutureId),
    /// Index into the accounts supplied to the deployment
    Account(usize),
}

impl ArgumentValue {
    /// Stable textual form used in instance ids
    pub fn canonical(&self) -> String {
        match self {
            ArgumentValue::Literal(value) => value.to_string(),
            ArgumentValue::Future(id) => id.clone(),
            ArgumentValue::Account(index) => format!("account({})", index),
        }
    }
}

/// What a future does, with every input resolved to a value or a future id
#[derive(Debug, Clone, PartialEq)]
pub enum FutureSpec {
    ContractDeploy {
        contract_name: String,
        args: Vec<ArgumentValue>,
        value: Option<ArgumentValue>,
        libraries: BTreeMap<String, FutureId>,
        from: Option<ArgumentValue>,
    },
    LibraryDeploy {
        library_name: String,
        libraries: BTreeMap<String, FutureId>,
        from: Option<ArgumentValue>,
    },
    ContractAt {
        contract_name: String,
        address: ArgumentValue,
    },
    Call {
        contract: FutureId,
        method: String,
        args: Vec<ArgumentValue>,
        value: Option<ArgumentValue>,
        from: Option<ArgumentValue>,
    },
    StaticCall {
        contract: FutureId,
        method: String,
        args: Vec<ArgumentValue>,
        output: Option<String>,
        from: Option<ArgumentValue>,
    },
    SendData {
        to: ArgumentValue,
        data: Option<String>,
        value: Option<ArgumentValue>,
        from: Option<ArgumentValue>,
    },
    ReadEventArgument {
        future: FutureId,
        /// Contract whose interface decodes the event
        emitter: FutureId,
        event: String,
        argument: String,
        event_index: usize,
    },
}

/// A planned operation in the flattened graph
#[derive(Debug, Clone, PartialEq)]
pub struct Future {
    pub id: FutureId,
    /// Id of the module instance that declared the future
    pub module_id: String,
    /// Local name within the module
    pub name: String,
    pub kind: FutureKind,
    pub spec: FutureSpec,
    pub dependencies: BTreeSet<FutureId>,
}

/// Flat dependency graph of every future of a deployment
#[derive(Debug, Clone)]
pub struct DeploymentGraph {
    root_module_id: String,
    futures: BTreeMap<FutureId, Future>,
    root_futures: BTreeMap<String, FutureId>,
}

impl DeploymentGraph {
    /// Build and validate the graph of a module definition
    pub fn build(
        module: &ModuleDefinition,
        parameters: &DeploymentParameters,
    ) -> Result<Self, GraphError> {
        let mut builder = GraphBuilder::new(parameters);
        let root = builder.instantiate(module, BTreeMap::new())?;

        let graph = Self {
            root_module_id: module.id.clone(),
            root_futures: builder.instances[root].futures.clone(),
            futures: builder.futures,
        };

        graph.validate()?;

        Ok(graph)
    }

    pub fn root_module_id(&self) -> &str {
        &self.root_module_id
    }

    pub fn get(&self, id: &str) -> Option<&Future> {
        self.futures.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.futures.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// All futures, ordered by id
    pub fn futures(&self) -> impl Iterator<Item = &Future> {
        self.futures.values()
    }

    pub fn dependencies(&self, id: &str) -> Option<&BTreeSet<FutureId>> {
        self.futures.get(id).map(|future| &future.dependencies)
    }

    /// Futures declared by the root module, keyed by local name
    pub fn root_futures(&self) -> &BTreeMap<String, FutureId> {
        &self.root_futures
    }

    /// Validate the graph (unknown dependencies, reference kinds and cycles)
    pub fn validate(&self) -> Result<(), GraphError> {
        for future in self.futures.values() {
            for dep in &future.dependencies {
                if !self.futures.contains_key(dep) {
                    return Err(GraphError::unknown_dependency(format!(
                        "future '{}' depends on unknown future '{}'",
                        future.id, dep
                    )));
                }
            }
            self.validate_references(future)?;
        }

        self.detect_cycles()
    }

    fn validate_references(&self, future: &Future) -> Result<(), GraphError> {
        let require = |target: &str, allowed: fn(&FutureKind) -> bool, what: &str| {
            match self.futures.get(target) {
                Some(referenced) if allowed(&referenced.kind) => Ok(()),
                Some(referenced) => Err(GraphError::invalid_structure(format!(
                    "future '{}' expects {} but '{}' is a {}",
                    future.id, what, target, referenced.kind
                ))),
                None => Err(GraphError::unknown_dependency(format!(
                    "future '{}' references unknown future '{}'",
                    future.id, target
                ))),
            }
        };

        match &future.spec {
            FutureSpec::ContractDeploy { libraries, .. }
            | FutureSpec::LibraryDeploy { libraries, .. } => {
                for library in libraries.values() {
                    require(library, FutureKind::is_contract, "a library")?;
                }
            }
            FutureSpec::Call { contract, .. } | FutureSpec::StaticCall { contract, .. } => {
                require(contract, FutureKind::is_contract, "a contract")?;
            }
            FutureSpec::ReadEventArgument {
                future: source,
                emitter,
                ..
            } => {
                require(source, FutureKind::is_onchain, "a transaction")?;
                require(emitter, FutureKind::is_contract, "a contract")?;
            }
            FutureSpec::ContractAt { .. } | FutureSpec::SendData { .. } => {}
        }

        Ok(())
    }

    /// Detect cycles in future dependencies using DFS
    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for id in self.futures.keys() {
            if !visited.contains(id.as_str()) {
                if let Some(cycle) = self.dfs_cycle(id, &mut visited, &mut rec_stack) {
                    return Err(GraphError::cyclic(format!(
                        "circular dependency detected: {}",
                        cycle.join(" -> ")
                    )));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        rec_stack.insert(id);

        if let Some(future) = self.futures.get(id) {
            for dep in &future.dependencies {
                if !visited.contains(dep.as_str()) {
                    if let Some(mut cycle) = self.dfs_cycle(dep, visited, rec_stack) {
                        cycle.insert(0, id.to_string());
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep.as_str()) {
                    return Some(vec![id.to_string(), dep.clone()]);
                }
            }
        }

        rec_stack.remove(id);
        None
    }

    /// Futures in topological order (dependencies first).
    ///
    /// Shorter than the graph if it contains a cycle.
    pub fn topological_order(&self) -> Vec<&Future> {
        // Kahn's algorithm for topological sort
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for future in self.futures.values() {
            in_degree.entry(future.id.as_str()).or_insert(0);

            for dep in &future.dependencies {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(future.id.as_str());
                *in_degree.entry(future.id.as_str()).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut result = Vec::new();

        while let Some(id) = queue.pop_front() {
            if let Some(future) = self.futures.get(id) {
                result.push(future);
            }

            if let Some(neighbors) = dependents.get(id) {
                for &neighbor in neighbors {
                    if let Some(deg) = in_degree.get_mut(neighbor) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(neighbor);
                        }
                    }
                }
            }
        }

        result
    }
}

/// A module instantiated with one parameter binding
struct Instance<'a> {
    id: String,
    module: &'a ModuleDefinition,
    binding: BTreeMap<String, ArgumentValue>,
    /// Local name -> future id
    futures: BTreeMap<String, FutureId>,
    /// Alias -> instance index
    submodules: BTreeMap<String, usize>,
}

struct GraphBuilder<'a> {
    parameters: &'a DeploymentParameters,
    instances: Vec<Instance<'a>>,
    /// (module id, canonical binding) -> instance index
    memo: HashMap<(String, String), usize>,
    definitions: HashMap<&'a str, &'a ModuleDefinition>,
    futures: BTreeMap<FutureId, Future>,
}

impl<'a> GraphBuilder<'a> {
    fn new(parameters: &'a DeploymentParameters) -> Self {
        Self {
            parameters,
            instances: Vec::new(),
            memo: HashMap::new(),
            definitions: HashMap::new(),
            futures: BTreeMap::new(),
        }
    }

    /// Instantiate a module once per distinct binding
    fn instantiate(
        &mut self,
        module: &'a ModuleDefinition,
        binding: BTreeMap<String, ArgumentValue>,
    ) -> Result<usize, GraphError> {
        match self.definitions.get(module.id.as_str()) {
            Some(existing) if *existing != module => {
                return Err(GraphError::invalid_structure(format!(
                    "module id '{}' is used by two different definitions",
                    module.id
                )));
            }
            Some(_) => {}
            None => {
                self.definitions.insert(module.id.as_str(), module);
            }
        }

        let canonical = binding
            .iter()
            .map(|(name, value)| format!("{}={}", name, value.canonical()))
            .collect::<Vec<_>>()
            .join(",");
        let key = (module.id.clone(), canonical);
        if let Some(&index) = self.memo.get(&key) {
            return Ok(index);
        }

        let instance_id = if key.1.is_empty() {
            module.id.clone()
        } else {
            format!("{}({})", module.id, key.1)
        };

        let mut local = BTreeMap::new();
        for future in &module.futures {
            let id = format!("{}#{}", instance_id, future.name);
            if self.futures.contains_key(&id)
                || local.insert(future.name.clone(), id.clone()).is_some()
            {
                return Err(GraphError::duplicate_future(format!(
                    "future id '{}' is declared twice",
                    id
                )));
            }
        }

        let index = self.instances.len();
        self.instances.push(Instance {
            id: instance_id.clone(),
            module,
            binding,
            futures: local.clone(),
            submodules: BTreeMap::new(),
        });
        self.memo.insert(key, index);

        for submodule in &module.submodules {
            let mut inputs = BTreeSet::new();
            let mut sub_binding = BTreeMap::new();
            for (name, argument) in &submodule.parameters {
                let value = self.resolve_argument(index, argument, &mut inputs)?;
                sub_binding.insert(name.clone(), value);
            }
            for reference in &submodule.after {
                inputs.extend(self.resolve_after(index, reference)?);
            }

            let child = self.instantiate(&submodule.module, sub_binding)?;
            self.instances[index]
                .submodules
                .insert(submodule.alias.clone(), child);
            self.add_inputs(child, &inputs);
        }

        let mut default_emitters = Vec::new();
        for definition in &module.futures {
            let id = local[&definition.name].clone();
            let mut dependencies = BTreeSet::new();
            for reference in &definition.after {
                dependencies.extend(self.resolve_after(index, reference)?);
            }

            if let FutureAction::ReadEventArgument { emitter: None, .. } = definition.action {
                default_emitters.push(id.clone());
            }
            let spec = self.resolve_action(index, &definition.action, &mut dependencies)?;

            self.futures.insert(
                id.clone(),
                Future {
                    id,
                    module_id: instance_id.clone(),
                    name: definition.name.clone(),
                    kind: definition.action.kind(),
                    spec,
                    dependencies,
                },
            );
        }

        for id in default_emitters {
            self.default_emitter(&id)?;
        }

        Ok(index)
    }

    fn resolve_action(
        &self,
        index: usize,
        action: &FutureAction,
        deps: &mut BTreeSet<FutureId>,
    ) -> Result<FutureSpec, GraphError> {
        let spec = match action {
            FutureAction::Contract {
                contract,
                args,
                value,
                libraries,
                from,
            } => FutureSpec::ContractDeploy {
                contract_name: contract.clone(),
                args: self.resolve_arguments(index, args, deps)?,
                value: self.resolve_optional(index, value.as_ref(), deps)?,
                libraries: self.resolve_libraries(index, libraries, deps)?,
                from: self.resolve_optional(index, from.as_ref(), deps)?,
            },
            FutureAction::Library {
                library,
                libraries,
                from,
            } => FutureSpec::LibraryDeploy {
                library_name: library.clone(),
                libraries: self.resolve_libraries(index, libraries, deps)?,
                from: self.resolve_optional(index, from.as_ref(), deps)?,
            },
            FutureAction::ContractAt { contract, address } => FutureSpec::ContractAt {
                contract_name: contract.clone(),
                address: self.resolve_argument(index, address, deps)?,
            },
            FutureAction::Call {
                contract,
                method,
                args,
                value,
                from,
            } => FutureSpec::Call {
                contract: self.resolve_dependency(index, contract, deps)?,
                method: method.clone(),
                args: self.resolve_arguments(index, args, deps)?,
                value: self.resolve_optional(index, value.as_ref(), deps)?,
                from: self.resolve_optional(index, from.as_ref(), deps)?,
            },
            FutureAction::StaticCall {
                contract,
                method,
                args,
                output,
                from,
            } => FutureSpec::StaticCall {
                contract: self.resolve_dependency(index, contract, deps)?,
                method: method.clone(),
                args: self.resolve_arguments(index, args, deps)?,
                output: output.clone(),
                from: self.resolve_optional(index, from.as_ref(), deps)?,
            },
            FutureAction::SendData {
                to,
                data,
                value,
                from,
            } => FutureSpec::SendData {
                to: self.resolve_argument(index, to, deps)?,
                data: data.clone(),
                value: self.resolve_optional(index, value.as_ref(), deps)?,
                from: self.resolve_optional(index, from.as_ref(), deps)?,
            },
            FutureAction::ReadEventArgument {
                future,
                emitter,
                event,
                argument,
                event_index,
            } => {
                let source = self.resolve_dependency(index, future, deps)?;
                let emitter = match emitter {
                    Some(reference) => self.resolve_dependency(index, reference, deps)?,
                    // replaced once every local future exists
                    None => source.clone(),
                };
                FutureSpec::ReadEventArgument {
                    future: source,
                    emitter,
                    event: event.clone(),
                    argument: argument.clone(),
                    event_index: *event_index,
                }
            }
        };

        Ok(spec)
    }

    /// Events of a call are decoded with the called contract's interface
    fn default_emitter(&mut self, id: &str) -> Result<(), GraphError> {
        let source = match self.futures.get(id).map(|future| &future.spec) {
            Some(FutureSpec::ReadEventArgument { future, .. }) => future.clone(),
            _ => return Ok(()),
        };

        let emitter = match self.futures.get(&source).map(|future| &future.spec) {
            Some(FutureSpec::Call { contract, .. }) => contract.clone(),
            Some(FutureSpec::SendData { .. }) => {
                return Err(GraphError::invalid_structure(format!(
                    "future '{}' reads an event of '{}' and must name its emitter",
                    id, source
                )));
            }
            _ => source,
        };

        if let Some(future) = self.futures.get_mut(id) {
            if let FutureSpec::ReadEventArgument {
                emitter: current, ..
            } = &mut future.spec
            {
                *current = emitter.clone();
            }
            future.dependencies.insert(emitter);
        }

        Ok(())
    }

    fn resolve_arguments(
        &self,
        index: usize,
        args: &[Argument],
        deps: &mut BTreeSet<FutureId>,
    ) -> Result<Vec<ArgumentValue>, GraphError> {
        args.iter()
            .map(|argument| self.resolve_argument(index, argument, deps))
            .collect()
    }

    fn resolve_optional(
        &self,
        index: usize,
        argument: Option<&Argument>,
        deps: &mut BTreeSet<FutureId>,
    ) -> Result<Option<ArgumentValue>, GraphError> {
        argument
            .map(|argument| self.resolve_argument(index, argument, deps))
            .transpose()
    }

    fn resolve_libraries(
        &self,
        index: usize,
        libraries: &BTreeMap<String, String>,
        deps: &mut BTreeSet<FutureId>,
    ) -> Result<BTreeMap<String, FutureId>, GraphError> {
        let mut resolved = BTreeMap::new();
        for (name, reference) in libraries {
            resolved.insert(name.clone(), self.resolve_dependency(index, reference, deps)?);
        }
        Ok(resolved)
    }

    fn resolve_argument(
        &self,
        index: usize,
        argument: &Argument,
        deps: &mut BTreeSet<FutureId>,
    ) -> Result<ArgumentValue, GraphError> {
        let value = match argument {
            Argument::Future { future } => {
                ArgumentValue::Future(self.resolve_dependency(index, future, deps)?)
            }
            Argument::Parameter { param, default } => {
                let value = self.resolve_parameter(index, param, default.as_ref())?;
                if let ArgumentValue::Future(id) = &value {
                    deps.insert(id.clone());
                }
                value
            }
            Argument::Account { account } => ArgumentValue::Account(*account),
            Argument::Literal(value) => ArgumentValue::Literal(value.clone()),
        };

        Ok(value)
    }

    /// Binding, then deployment parameters, then module default, then inline default
    fn resolve_parameter(
        &self,
        index: usize,
        name: &str,
        inline_default: Option<&Value>,
    ) -> Result<ArgumentValue, GraphError> {
        let instance = &self.instances[index];

        if let Some(bound) = instance.binding.get(name) {
            return Ok(bound.clone());
        }

        let supplied = self
            .parameters
            .get(&instance.module.id)
            .and_then(|parameters| parameters.get(name));
        let declared = instance
            .module
            .parameters
            .get(name)
            .and_then(|default| default.as_ref());

        supplied
            .or(declared)
            .or(inline_default)
            .map(|value| ArgumentValue::Literal(value.clone()))
            .ok_or_else(|| {
                GraphError::missing_parameter(format!(
                    "parameter '{}' of module '{}' has no value",
                    name, instance.id
                ))
            })
    }

    fn resolve_dependency(
        &self,
        index: usize,
        reference: &str,
        deps: &mut BTreeSet<FutureId>,
    ) -> Result<FutureId, GraphError> {
        let id = self.resolve_reference(index, reference)?;
        deps.insert(id.clone());
        Ok(id)
    }

    /// `Name` is a local future, `Alias.Name` a future of a used submodule
    fn resolve_reference(&self, index: usize, reference: &str) -> Result<FutureId, GraphError> {
        let instance = &self.instances[index];
        let resolved = match reference.split_once('.') {
            Some((alias, rest)) => match instance.submodules.get(alias) {
                Some(&child) => return self.resolve_reference(child, rest),
                None => None,
            },
            None => instance.futures.get(reference).cloned(),
        };

        resolved.ok_or_else(|| {
            GraphError::unknown_dependency(format!(
                "module '{}' has no future or submodule '{}'",
                instance.id, reference
            ))
        })
    }

    /// An ordering hint names a future or a whole submodule
    fn resolve_after(&self, index: usize, reference: &str) -> Result<Vec<FutureId>, GraphError> {
        if let Ok(id) = self.resolve_reference(index, reference) {
            return Ok(vec![id]);
        }

        let mut current = index;
        for alias in reference.split('.') {
            current = *self.instances[current]
                .submodules
                .get(alias)
                .ok_or_else(|| {
                    GraphError::unknown_dependency(format!(
                        "module '{}' has no future or submodule '{}'",
                        self.instances[index].id, reference
                    ))
                })?;
        }

        Ok(self.instance_futures(current))
    }

    /// Every future of an instance and of the instances it uses
    fn instance_futures(&self, index: usize) -> Vec<FutureId> {
        let instance = &self.instances[index];
        let mut ids: Vec<FutureId> = instance.futures.values().cloned().collect();
        for &child in instance.submodules.values() {
            ids.extend(self.instance_futures(child));
        }
        ids
    }

    /// Make every future of a submodule instance depend on the inputs of a use site
    fn add_inputs(&mut self, index: usize, inputs: &BTreeSet<FutureId>) {
        if inputs.is_empty() {
            return;
        }
        for id in self.instance_futures(index) {
            if let Some(future) = self.futures.get_mut(&id) {
                future.dependencies.extend(inputs.iter().cloned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{FutureDefinition, SubmoduleUse};
    use serde_json::json;

    fn token_module() -> ModuleDefinition {
        ModuleDefinition::new("TokenModule")
            .with_parameter("supply", Some(json!(1000)))
            .with_future(FutureDefinition::contract(
                "Token",
                "Token",
                vec![Argument::param("supply")],
            ))
    }

    #[test]
    fn test_simple_module() {
        let module = token_module().with_future(FutureDefinition::call(
            "mint",
            "Token",
            "mint",
            vec![Argument::account(0), Argument::literal(5)],
        ));

        let graph = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap();

        assert_eq!(graph.len(), 2);
        let mint = graph.get("TokenModule#mint").unwrap();
        assert_eq!(mint.kind, FutureKind::Call);
        assert!(mint.dependencies.contains("TokenModule#Token"));
        assert_eq!(
            graph.get("TokenModule#Token").unwrap().spec,
            FutureSpec::ContractDeploy {
                contract_name: "Token".to_string(),
                args: vec![ArgumentValue::Literal(json!(1000))],
                value: None,
                libraries: BTreeMap::new(),
                from: None,
            }
        );
        assert_eq!(
            graph.root_futures().get("mint").map(String::as_str),
            Some("TokenModule#mint")
        );
    }

    #[test]
    fn test_parameter_resolution_order() {
        let mut parameters = DeploymentParameters::new();
        parameters.insert(
            "TokenModule".to_string(),
            BTreeMap::from([("supply".to_string(), json!(42))]),
        );

        let graph = DeploymentGraph::build(&token_module(), &parameters).unwrap();
        let FutureSpec::ContractDeploy { args, .. } = &graph.get("TokenModule#Token").unwrap().spec
        else {
            panic!("expected a contract deployment");
        };
        assert_eq!(args, &vec![ArgumentValue::Literal(json!(42))]);
    }

    #[test]
    fn test_missing_parameter() {
        let module = ModuleDefinition::new("M").with_future(FutureDefinition::contract(
            "Token",
            "Token",
            vec![Argument::param("owner")],
        ));

        let err = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::MissingParameter);
    }

    #[test]
    fn test_duplicate_future_id() {
        let module = ModuleDefinition::new("M")
            .with_future(FutureDefinition::library("Lib", "Math"))
            .with_future(FutureDefinition::library("Lib", "Strings"));

        let err = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::DuplicateFutureId);
    }

    #[test]
    fn test_cycle_detection() {
        let module = ModuleDefinition::new("M")
            .with_future(FutureDefinition::library("A", "A").after("B"))
            .with_future(FutureDefinition::library("B", "B").after("C"))
            .with_future(FutureDefinition::library("C", "C").after("A"));

        let err = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::CyclicDependency);
        assert!(err.message.contains("M#A"));
    }

    #[test]
    fn test_unknown_reference() {
        let module = ModuleDefinition::new("M").with_future(FutureDefinition::call(
            "mint",
            "Missing",
            "mint",
            vec![],
        ));

        let err = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::UnknownDependency);
    }

    #[test]
    fn test_call_on_non_contract_is_invalid() {
        let module = ModuleDefinition::new("M")
            .with_future(FutureDefinition::send_data(
                "fund",
                Argument::literal("0xF"),
                None,
            ))
            .with_future(FutureDefinition::call("mint", "fund", "mint", vec![]));

        let err = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::InvalidStructure);
    }

    #[test]
    fn test_submodule_instantiated_once_per_binding() {
        let registry = ModuleDefinition::new("RegistryModule")
            .with_parameter("token", None)
            .with_future(FutureDefinition::contract(
                "Registry",
                "Registry",
                vec![Argument::param("token")],
            ));

        let module = token_module()
            .with_submodule(
                SubmoduleUse::new("First", registry.clone()).bind("token", Argument::future("Token")),
            )
            .with_submodule(
                SubmoduleUse::new("Second", registry.clone())
                    .bind("token", Argument::future("Token")),
            )
            .with_submodule(
                SubmoduleUse::new("Other", registry).bind("token", Argument::literal("0xT")),
            )
            .with_future(FutureDefinition::call(
                "register",
                "First.Registry",
                "register",
                vec![Argument::future("Second.Registry")],
            ));

        let graph = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap();

        // Token, shared registry, literal-bound registry, register
        assert_eq!(graph.len(), 4);

        let shared = "RegistryModule(token=TokenModule#Token)#Registry";
        let registry = graph.get(shared).unwrap();
        assert!(registry.dependencies.contains("TokenModule#Token"));
        assert!(graph.contains("RegistryModule(token=\"0xT\")#Registry"));

        let register = graph.get("TokenModule#register").unwrap();
        assert_eq!(
            register.dependencies,
            BTreeSet::from([shared.to_string()])
        );
    }

    #[test]
    fn test_submodule_after_applies_to_every_future() {
        let sub = ModuleDefinition::new("Sub")
            .with_future(FutureDefinition::library("A", "A"))
            .with_future(FutureDefinition::library("B", "B"));

        let module = ModuleDefinition::new("Root")
            .with_future(FutureDefinition::library("First", "First"))
            .with_submodule(SubmoduleUse::new("S", sub).after("First"))
            .with_future(FutureDefinition::library("Last", "Last").after("S"));

        let graph = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap();

        for id in ["Sub#A", "Sub#B"] {
            assert!(graph.dependencies(id).unwrap().contains("Root#First"));
        }
        assert_eq!(
            graph.dependencies("Root#Last").unwrap(),
            &BTreeSet::from(["Sub#A".to_string(), "Sub#B".to_string()])
        );
    }

    #[test]
    fn test_conflicting_module_definitions() {
        let module = ModuleDefinition::new("Root")
            .with_submodule(SubmoduleUse::new("A", ModuleDefinition::new("Shared")))
            .with_submodule(SubmoduleUse::new(
                "B",
                ModuleDefinition::new("Shared").with_future(FutureDefinition::library("L", "L")),
            ));

        let err = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::InvalidStructure);
    }

    #[test]
    fn test_read_event_emitter_defaults_to_called_contract() {
        let module = token_module()
            .with_future(FutureDefinition::call("mint", "Token", "mint", vec![]))
            .with_future(FutureDefinition::read_event_argument(
                "minted", "mint", "Transfer", "value",
            ));

        let graph = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap();
        let minted = graph.get("TokenModule#minted").unwrap();

        let FutureSpec::ReadEventArgument { emitter, .. } = &minted.spec else {
            panic!("expected a read event argument");
        };
        assert_eq!(emitter, "TokenModule#Token");
        assert!(minted.dependencies.contains("TokenModule#mint"));
        assert!(minted.dependencies.contains("TokenModule#Token"));
    }

    #[test]
    fn test_topological_order() {
        let module = ModuleDefinition::new("M")
            .with_future(FutureDefinition::library("C", "C").after("B"))
            .with_future(FutureDefinition::library("B", "B").after("A"))
            .with_future(FutureDefinition::library("A", "A"));

        let graph = DeploymentGraph::build(&module, &DeploymentParameters::new()).unwrap();
        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|future| future.name.as_str())
            .collect();

        assert_eq!(order, vec!["A", "B", "C"]);
    }
}

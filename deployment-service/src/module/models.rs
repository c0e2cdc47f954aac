// Deployment Module Data Models
// Declarative definition of futures, submodule uses and parameter bindings

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Deployment parameters keyed by module id, then by parameter name
pub type DeploymentParameters = BTreeMap<String, BTreeMap<String, Value>>;

/// A declarative deployment module: a named collection of futures plus the
/// submodules it uses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    /// Module id, shared by every use of the same definition
    pub id: String,

    /// Declared parameters and their default values (`~` for no default)
    #[serde(default)]
    pub parameters: BTreeMap<String, Option<Value>>,

    /// Futures declared directly in this module
    #[serde(default)]
    pub futures: Vec<FutureDefinition>,

    /// Submodules used by this module
    #[serde(default)]
    pub submodules: Vec<SubmoduleUse>,
}

/// A single planned operation inside a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureDefinition {
    /// Local name, unique within the module
    pub name: String,

    /// Explicit ordering hints: future references or submodule aliases
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(flatten)]
    pub action: FutureAction,
}

/// What a future does, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FutureAction {
    /// Deploy a contract
    Contract {
        contract: String,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default)]
        value: Option<Argument>,
        /// Library name -> future reference
        #[serde(default)]
        libraries: BTreeMap<String, String>,
        #[serde(default)]
        from: Option<Argument>,
    },

    /// Deploy a library
    Library {
        library: String,
        #[serde(default)]
        libraries: BTreeMap<String, String>,
        #[serde(default)]
        from: Option<Argument>,
    },

    /// Bind an already deployed contract
    ContractAt { contract: String, address: Argument },

    /// Send a transaction calling a contract method
    Call {
        contract: String,
        method: String,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default)]
        value: Option<Argument>,
        #[serde(default)]
        from: Option<Argument>,
    },

    /// Read a value through a read-only call
    StaticCall {
        contract: String,
        method: String,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default)]
        output: Option<String>,
        #[serde(default)]
        from: Option<Argument>,
    },

    /// Send raw data (and/or value) to an address
    SendData {
        to: Argument,
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        value: Option<Argument>,
        #[serde(default)]
        from: Option<Argument>,
    },

    /// Read an argument of an event emitted by another future's transaction
    ReadEventArgument {
        future: String,
        #[serde(default)]
        emitter: Option<String>,
        event: String,
        argument: String,
        #[serde(default)]
        event_index: usize,
    },
}

/// An input to a future
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    /// The result of another future
    Future { future: String },
    /// A module parameter
    Parameter {
        param: String,
        #[serde(default)]
        default: Option<Value>,
    },
    /// One of the accounts supplied to the deployment
    Account { account: usize },
    /// Any literal value
    Literal(Value),
}

/// Use of a submodule with a parameter binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmoduleUse {
    /// Name under which the parent refers to the submodule's futures
    pub alias: String,

    pub module: ModuleDefinition,

    /// Parameter bindings, resolved in the parent's scope
    #[serde(default)]
    pub parameters: BTreeMap<String, Argument>,

    /// Ordering hints applied to every future of the submodule
    #[serde(default)]
    pub after: Vec<String>,
}

/// Kind of a future
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FutureKind {
    ContractDeploy,
    LibraryDeploy,
    ContractAt,
    Call,
    StaticCall,
    SendData,
    ReadEventArgument,
}

impl FutureKind {
    /// Whether the future produces a contract address bound to an artifact
    pub fn is_contract(&self) -> bool {
        matches!(
            self,
            FutureKind::ContractDeploy | FutureKind::LibraryDeploy | FutureKind::ContractAt
        )
    }

    /// Whether the future deploys new bytecode
    pub fn is_deployment(&self) -> bool {
        matches!(self, FutureKind::ContractDeploy | FutureKind::LibraryDeploy)
    }

    /// Whether the future sends a transaction
    pub fn is_onchain(&self) -> bool {
        matches!(
            self,
            FutureKind::ContractDeploy
                | FutureKind::LibraryDeploy
                | FutureKind::Call
                | FutureKind::SendData
        )
    }
}

impl fmt::Display for FutureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FutureKind::ContractDeploy => "contract deployment",
            FutureKind::LibraryDeploy => "library deployment",
            FutureKind::ContractAt => "contract at",
            FutureKind::Call => "call",
            FutureKind::StaticCall => "static call",
            FutureKind::SendData => "send data",
            FutureKind::ReadEventArgument => "read event argument",
        };
        write!(f, "{}", name)
    }
}

impl FutureAction {
    pub fn kind(&self) -> FutureKind {
        match self {
            FutureAction::Contract { .. } => FutureKind::ContractDeploy,
            FutureAction::Library { .. } => FutureKind::LibraryDeploy,
            FutureAction::ContractAt { .. } => FutureKind::ContractAt,
            FutureAction::Call { .. } => FutureKind::Call,
            FutureAction::StaticCall { .. } => FutureKind::StaticCall,
            FutureAction::SendData { .. } => FutureKind::SendData,
            FutureAction::ReadEventArgument { .. } => FutureKind::ReadEventArgument,
        }
    }
}

impl ModuleDefinition {
    /// Create an empty module
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parameters: BTreeMap::new(),
            futures: Vec::new(),
            submodules: Vec::new(),
        }
    }

    /// Declare a parameter with an optional default
    pub fn with_parameter(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        self.parameters.insert(name.into(), default);
        self
    }

    /// Add a future
    pub fn with_future(mut self, future: FutureDefinition) -> Self {
        self.futures.push(future);
        self
    }

    /// Add a submodule use
    pub fn with_submodule(mut self, submodule: SubmoduleUse) -> Self {
        self.submodules.push(submodule);
        self
    }
}

impl FutureDefinition {
    pub fn new(name: impl Into<String>, action: FutureAction) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            action,
        }
    }

    /// Contract deployment with the given arguments
    pub fn contract(name: impl Into<String>, contract: impl Into<String>, args: Vec<Argument>) -> Self {
        Self::new(
            name,
            FutureAction::Contract {
                contract: contract.into(),
                args,
                value: None,
                libraries: BTreeMap::new(),
                from: None,
            },
        )
    }

    pub fn library(name: impl Into<String>, library: impl Into<String>) -> Self {
        Self::new(
            name,
            FutureAction::Library {
                library: library.into(),
                libraries: BTreeMap::new(),
                from: None,
            },
        )
    }

    pub fn contract_at(name: impl Into<String>, contract: impl Into<String>, address: Argument) -> Self {
        Self::new(
            name,
            FutureAction::ContractAt {
                contract: contract.into(),
                address,
            },
        )
    }

    pub fn call(
        name: impl Into<String>,
        contract: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Argument>,
    ) -> Self {
        Self::new(
            name,
            FutureAction::Call {
                contract: contract.into(),
                method: method.into(),
                args,
                value: None,
                from: None,
            },
        )
    }

    pub fn static_call(
        name: impl Into<String>,
        contract: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Argument>,
    ) -> Self {
        Self::new(
            name,
            FutureAction::StaticCall {
                contract: contract.into(),
                method: method.into(),
                args,
                output: None,
                from: None,
            },
        )
    }

    pub fn send_data(name: impl Into<String>, to: Argument, data: Option<String>) -> Self {
        Self::new(
            name,
            FutureAction::SendData {
                to,
                data,
                value: None,
                from: None,
            },
        )
    }

    pub fn read_event_argument(
        name: impl Into<String>,
        future: impl Into<String>,
        event: impl Into<String>,
        argument: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            FutureAction::ReadEventArgument {
                future: future.into(),
                emitter: None,
                event: event.into(),
                argument: argument.into(),
                event_index: 0,
            },
        )
    }

    /// Add an explicit ordering hint
    pub fn after(mut self, reference: impl Into<String>) -> Self {
        self.after.push(reference.into());
        self
    }
}

impl Argument {
    pub fn future(reference: impl Into<String>) -> Self {
        Argument::Future {
            future: reference.into(),
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Argument::Parameter {
            param: name.into(),
            default: None,
        }
    }

    pub fn account(index: usize) -> Self {
        Argument::Account { account: index }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Argument::Literal(value.into())
    }
}

impl SubmoduleUse {
    pub fn new(alias: impl Into<String>, module: ModuleDefinition) -> Self {
        Self {
            alias: alias.into(),
            module,
            parameters: BTreeMap::new(),
            after: Vec::new(),
        }
    }

    /// Bind a submodule parameter
    pub fn bind(mut self, name: impl Into<String>, argument: Argument) -> Self {
        self.parameters.insert(name.into(), argument);
        self
    }

    pub fn after(mut self, reference: impl Into<String>) -> Self {
        self.after.push(reference.into());
        self
    }
}

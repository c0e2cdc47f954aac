// Deployment Module Definitions
// Declarative module model and YAML/JSON loading

pub mod models;
pub mod parser;

pub use models::{
    Argument, DeploymentParameters, FutureAction, FutureDefinition, FutureKind, ModuleDefinition,
    SubmoduleUse,
};
pub use parser::ModuleParser;

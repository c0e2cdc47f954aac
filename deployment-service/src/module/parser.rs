use crate::module::models::{DeploymentParameters, FutureAction, ModuleDefinition};
use crate::{ServiceError, ServiceResult};

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parser for module definition and deployment parameter files.
///
/// Both YAML and JSON are accepted; JSON documents are parsed through the
/// YAML parser.
pub struct ModuleParser;

impl ModuleParser {
    /// Parse a module definition from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<ModuleDefinition> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a module definition from a YAML string.
    pub fn parse(content: &str) -> ServiceResult<ModuleDefinition> {
        let module: ModuleDefinition = serde_yaml::from_str(content)?;
        Self::validate(&module)?;
        Ok(module)
    }

    /// Parse deployment parameters (module id -> parameter name -> value).
    pub fn parameters_from_file<P: AsRef<Path>>(path: P) -> ServiceResult<DeploymentParameters> {
        let content = fs::read_to_string(path)?;
        Self::parse_parameters(&content)
    }

    pub fn parse_parameters(content: &str) -> ServiceResult<DeploymentParameters> {
        if content.trim().is_empty() {
            return Ok(DeploymentParameters::new());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check the naming rules ids and references rely on.
    ///
    /// Duplicate names are left to the graph builder, which reports them
    /// with the fully qualified future id.
    pub fn validate(module: &ModuleDefinition) -> ServiceResult<()> {
        check_name("module id", &module.id)?;

        for future in &module.futures {
            check_name("future name", &future.name)?;

            if let FutureAction::ReadEventArgument { event, argument, .. } = &future.action {
                if event.is_empty() || argument.is_empty() {
                    return Err(ServiceError::InvalidInput(format!(
                        "future '{}' in module '{}' must name an event and an argument",
                        future.name, module.id
                    )));
                }
            }
        }

        let mut aliases = HashSet::new();
        for submodule in &module.submodules {
            check_name("submodule alias", &submodule.alias)?;
            if !aliases.insert(submodule.alias.as_str()) {
                return Err(ServiceError::InvalidInput(format!(
                    "submodule alias '{}' is used twice in module '{}'",
                    submodule.alias, module.id
                )));
            }
            Self::validate(&submodule.module)?;
        }

        Ok(())
    }
}

fn check_name(what: &str, name: &str) -> ServiceResult<()> {
    if name.is_empty() {
        return Err(ServiceError::InvalidInput(format!("{} must not be empty", what)));
    }

    if let Some(c) = name.chars().find(|c| matches!(c, '.' | '#' | '/' | '(' | ')')) {
        return Err(ServiceError::InvalidInput(format!(
            "{} '{}' contains reserved character '{}'",
            what, name, c
        )));
    }

    Ok(())
}

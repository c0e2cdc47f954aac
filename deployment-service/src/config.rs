// Deployment Configuration
// Polling, confirmation and fee escalation settings

use crate::{ServiceError, ServiceResult};

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BLOCK_POLLING_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_FEE_BUMP_DELAY: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 5;
pub const DEFAULT_MAX_FEE_BUMPS: usize = 4;

/// Configuration for a deployment run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Pause between polling rounds when nothing progressed
    pub block_polling_interval: Duration,

    /// How long a transaction may stay unmined before its fees are bumped
    pub fee_bump_delay: Duration,

    /// Blocks (including the inclusion block) before a receipt counts
    pub required_confirmations: u64,

    /// Replacement transactions allowed per interaction before timing out
    pub max_fee_bumps: usize,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            block_polling_interval: DEFAULT_BLOCK_POLLING_INTERVAL,
            fee_bump_delay: DEFAULT_FEE_BUMP_DELAY,
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
            max_fee_bumps: DEFAULT_MAX_FEE_BUMPS,
        }
    }
}

/// On-disk form; intervals are in milliseconds
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawDeployConfig {
    block_polling_interval: Option<u64>,
    #[serde(alias = "feeBumpDelay")]
    transaction_timeout_interval: Option<u64>,
    required_confirmations: Option<u64>,
    max_fee_bumps: Option<usize>,
}

impl DeployConfig {
    pub fn from_yaml_str(content: &str) -> ServiceResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::from_raw(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> ServiceResult<Self> {
        Self::from_raw(serde_json::from_str(content)?)
    }

    /// Load from a `.json` file, or YAML for any other extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    fn from_raw(raw: RawDeployConfig) -> ServiceResult<Self> {
        let defaults = Self::default();

        let config = Self {
            block_polling_interval: raw
                .block_polling_interval
                .map(Duration::from_millis)
                .unwrap_or(defaults.block_polling_interval),
            fee_bump_delay: raw
                .transaction_timeout_interval
                .map(Duration::from_millis)
                .unwrap_or(defaults.fee_bump_delay),
            required_confirmations: raw
                .required_confirmations
                .unwrap_or(defaults.required_confirmations),
            max_fee_bumps: raw.max_fee_bumps.unwrap_or(defaults.max_fee_bumps),
        };

        if config.required_confirmations == 0 {
            return Err(ServiceError::InvalidInput(
                "requiredConfirmations must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn with_block_polling_interval(mut self, interval: Duration) -> Self {
        self.block_polling_interval = interval;
        self
    }

    pub fn with_fee_bump_delay(mut self, delay: Duration) -> Self {
        self.fee_bump_delay = delay;
        self
    }

    pub fn with_required_confirmations(mut self, confirmations: u64) -> Self {
        self.required_confirmations = confirmations.max(1);
        self
    }

    pub fn with_max_fee_bumps(mut self, max_fee_bumps: usize) -> Self {
        self.max_fee_bumps = max_fee_bumps;
        self
    }
}

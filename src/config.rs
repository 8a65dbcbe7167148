//! Runtime configuration.
//!
//! Defaults for every handle created by a [`Runtime`](crate::runtime::Runtime). All
//! fields are optional in TOML:
//!
//! ```toml
//! default_node = 4
//! default_timeout_ms = 500
//! default_retries = 3
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::BridgeResult;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Node used when a lookup does not name one.
    #[serde(default)]
    pub default_node: u16,
    /// Remote transaction timeout.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Attempts per remote transaction.
    #[serde(default = "default_retries")]
    pub default_retries: u32,
    /// Parameter protocol version for remote transactions.
    #[serde(default = "default_paramver")]
    pub paramver: u8,
    /// Log list membership changes at info level instead of debug.
    #[serde(default)]
    pub verbose: bool,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_retries() -> u32 {
    1
}

fn default_paramver() -> u8 {
    2
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_node: 0,
            default_timeout_ms: default_timeout_ms(),
            default_retries: default_retries(),
            paramver: default_paramver(),
            verbose: false,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(source: &str) -> BridgeResult<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

//! Configuration file
//!
//! ```toml
//! [device]
//! candidates = ["/dev/ttyUSB0"]   # default: scan serial ports
//! # input = "/dev/input/event5"   # single button read from an input device
//! # trigger = [125, 88]
//!
//! [modules.vm]
//! pkg = "virt"
//! address = "10.0.0.2:16509"
//!
//! [[buttons]]
//! module = "vm"
//! domain = "win10"
//! ```
//!
//! Buttons are numbered in file order. `module` names an entry under
//! `[modules]`, whose `pkg` names the registered module. Both keys are
//! removed before the rest of the table goes to the module.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use panel_transport::event_parser::DEFAULT_TRIGGER;
use panel_transport::protocol::{serial, MAX_BUTTONS};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::registry::Registry;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PanelConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    /// Module instances by name
    #[serde(default)]
    pub modules: BTreeMap<String, toml::Table>,
    /// Button bindings, in button order
    #[serde(default)]
    pub buttons: Vec<toml::Table>,
}

/// How to find the panel
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Serial paths to try; empty scans the system
    #[serde(default)]
    pub candidates: Vec<String>,
    /// Kernel input device to read a single button from instead
    #[serde(default)]
    pub input: Option<PathBuf>,
    /// Key codes that make up one press on the input device
    #[serde(default = "default_trigger")]
    pub trigger: Vec<u16>,
    /// Pause between attempts to (re)open the panel
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
    /// Wait after the handshake before the panel accepts LED commands
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_trigger() -> Vec<u16> {
    DEFAULT_TRIGGER.to_vec()
}
fn default_retry_secs() -> u64 {
    5
}
fn default_settle_ms() -> u64 {
    serial::SETTLE_DELAY.as_millis() as u64
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            input: None,
            trigger: default_trigger(),
            retry_secs: default_retry_secs(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl DeviceConfig {
    pub fn retry_pause(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl PanelConfig {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Check references and package names without constructing anything
    pub fn validate(&self, registry: &Registry) -> Result<(), ConfigError> {
        if self.buttons.len() > MAX_BUTTONS as usize {
            return Err(ConfigError::TooManyButtons {
                count: self.buttons.len(),
                max: MAX_BUTTONS,
            });
        }

        for (index, button) in self.buttons.iter().enumerate() {
            let module = string_key(button, "module")?;
            let definition = self
                .modules
                .get(module)
                .ok_or_else(|| ConfigError::UnknownModuleRef(module.to_string()))?;
            let pkg = string_key(definition, "pkg")?;
            if !registry.contains(pkg) {
                return Err(ConfigError::Invalid {
                    section: format!("button {index}"),
                    message: format!(
                        "module '{module}' uses unknown pkg '{pkg}' (only {})",
                        registry.names().join(", ")
                    ),
                });
            }
        }
        Ok(())
    }
}

fn string_key<'a>(table: &'a toml::Table, key: &str) -> Result<&'a str, ConfigError> {
    let value = table
        .get(key)
        .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
    value.as_str().ok_or_else(|| ConfigError::NotAString {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Remove `key` from `table` and return it as a string
pub fn extract_key(table: &mut toml::Table, key: &str) -> Result<String, ConfigError> {
    let value = string_key(table, key)?.to_string();
    table.remove(key);
    Ok(value)
}

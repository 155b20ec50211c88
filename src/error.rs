//! Error types for configuration, modules and the panel supervisor

use std::path::PathBuf;

use panel_transport::LinkError;
use thiserror::Error;
use virt_rpc::VirtError;

/// Problems with the configuration file; always fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("The '{0}' key isn't present")]
    MissingKey(String),

    #[error("The '{key}' key value ({value}) isn't a string")]
    NotAString { key: String, value: String },

    #[error("No module config of the name '{0}'")]
    UnknownModuleRef(String),

    /// Keys present but missing, mistyped or unknown for the module
    #[error("Invalid {section} config: {message}")]
    Invalid { section: String, message: String },

    #[error("{count} buttons configured, a panel has at most {max}")]
    TooManyButtons { count: usize, max: u8 },
}

/// Errors raised by modules while configuring or running
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("No loaded module of the name '{name}' (only {available})")]
    UnknownPackage { name: String, available: String },

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("The domain {domain} does not exist: {source}")]
    DomainNotFound {
        domain: String,
        #[source]
        source: VirtError,
    },

    #[error("Hypervisor error: {0}")]
    Hypervisor(#[from] VirtError),

    /// The module's run loop cannot continue
    #[error("{0}")]
    Run(String),
}

/// Errors surfaced by the panel supervisor
#[derive(Error, Debug)]
pub enum PanelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Button {index} ({module}): {source}")]
    Module {
        index: usize,
        module: String,
        #[source]
        source: ModuleError,
    },

    #[error(transparent)]
    Link(#[from] LinkError),
}

// Real Button - Shared Library
// Button panel supervisor, LED engine and control modules

pub mod config;
pub mod dispatch;
pub mod error;
pub mod led;
pub mod module;
pub mod modules;
pub mod panel;
pub mod registry;

pub use config::{DeviceConfig, PanelConfig};
pub use error::{ConfigError, ModuleError, PanelError};
pub use led::{LedEngine, LedOutput, LedState};
pub use module::{Configured, Module, ModuleFactory, Press};
pub use panel::{Panel, PanelHandle};
pub use registry::Registry;

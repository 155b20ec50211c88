//! Module contract
//!
//! A module is configured once per button it is bound to. Configuring yields
//! the channel pair the rest of the system talks to it through, plus the
//! future that does the module's work for that button.

use async_trait::async_trait;
use futures::future::BoxFuture;
use panel_transport::ButtonIndex;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};

use crate::error::{ConfigError, ModuleError};
use crate::led::LedState;

/// A debounced press of the button a module is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Press;

/// Buffered presses per configured button
pub const PRESS_BUFFER: usize = 4;
/// Buffered LED states per configured button
pub const LED_BUFFER: usize = 8;

/// Module run loop for one button
pub type RunFuture = BoxFuture<'static, Result<(), ModuleError>>;

/// A module bound to one button
pub struct Configured {
    /// LED states for the button's engine; closing it ends the engine
    pub leds: mpsc::Receiver<LedState>,
    /// Where debounced presses go
    pub presses: mpsc::Sender<Press>,
    /// Resolves on a fatal error, or with `Ok` once the module is closed
    pub run: RunFuture,
}

impl std::fmt::Debug for Configured {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configured").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Module: Send + Sync {
    /// Registered package name
    fn pkg(&self) -> &'static str;

    /// Bind to `button` with the button-level `params`
    async fn configure(
        &self,
        button: ButtonIndex,
        params: toml::Table,
    ) -> Result<Configured, ModuleError>;

    /// Release resources; every run loop of this module finishes
    async fn close(&self);
}

/// Constructor registered under a package name
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    fn pkg(&self) -> &'static str;

    /// Build a module instance from its module-level `params`
    async fn create(
        &self,
        params: toml::Table,
    ) -> Result<std::sync::Arc<dyn Module>, ModuleError>;
}

/// Deserialize a parameter table into a module's typed config
pub fn parse_params<T: DeserializeOwned>(
    section: &str,
    params: toml::Table,
) -> Result<T, ConfigError> {
    toml::Value::Table(params)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Invalid {
            section: section.to_string(),
            message: e.message().to_string(),
        })
}

/// Close signal shared by a module and its run loops
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> Closed {
        Closed(self.tx.subscribe())
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`CloseSignal`]
#[derive(Debug, Clone)]
pub struct Closed(watch::Receiver<bool>);

impl Closed {
    /// Resolve once the module is closed (immediately if it already is)
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        domain: String,
    }

    fn table(src: &str) -> toml::Table {
        src.parse().unwrap()
    }

    #[test]
    fn test_parse_params() {
        let sample: Sample = parse_params("button 0", table(r#"domain = "win10""#)).unwrap();
        assert_eq!(sample.domain, "win10");
    }

    #[test]
    fn test_parse_params_rejects_missing_and_mistyped() {
        let err = parse_params::<Sample>("button 0", toml::Table::new()).unwrap_err();
        assert!(err.to_string().contains("domain"), "{err}");

        let err = parse_params::<Sample>("button 0", table("domain = 3")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err =
            parse_params::<Sample>("button 0", table("domain = \"a\"\nextra = 1")).unwrap_err();
        assert!(err.to_string().contains("extra"), "{err}");
    }

    #[tokio::test]
    async fn test_close_signal() {
        let signal = CloseSignal::new();
        let mut early = signal.subscribe();
        signal.close();
        early.wait().await;

        // Subscribers after the fact see it too
        let mut late = signal.subscribe();
        late.wait().await;
        assert!(signal.is_closed());
    }
}

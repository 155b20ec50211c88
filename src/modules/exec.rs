//! Exec module: run a command on every press.
//!
//! The LED flashes blue while the command runs, turns off when it exits
//! successfully and shows the error state otherwise. Presses during a run
//! queue up behind it.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use panel_transport::ButtonIndex;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{ConfigError, ModuleError};
use crate::led::LedState;
use crate::module::{
    parse_params, CloseSignal, Closed, Configured, Module, ModuleFactory, Press, LED_BUFFER,
    PRESS_BUFFER,
};

pub const PKG: &str = "exec";

/// Module-level parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecModuleConfig {
    /// Kill the command after this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Button-level parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecButtonConfig {
    /// Program followed by its arguments
    pub command: Vec<String>,
}

pub struct ExecFactory;

#[async_trait]
impl ModuleFactory for ExecFactory {
    fn pkg(&self) -> &'static str {
        PKG
    }

    async fn create(&self, params: toml::Table) -> Result<Arc<dyn Module>, ModuleError> {
        let config: ExecModuleConfig = parse_params("exec module", params)?;
        Ok(Arc::new(ExecModule::new(config)))
    }
}

#[derive(Debug, Default)]
pub struct ExecModule {
    config: ExecModuleConfig,
    closed: CloseSignal,
}

impl ExecModule {
    pub fn new(config: ExecModuleConfig) -> Self {
        Self {
            config,
            closed: CloseSignal::new(),
        }
    }
}

#[async_trait]
impl Module for ExecModule {
    fn pkg(&self) -> &'static str {
        PKG
    }

    async fn configure(
        &self,
        button: ButtonIndex,
        params: toml::Table,
    ) -> Result<Configured, ModuleError> {
        let section = format!("button {button}");
        let config: ExecButtonConfig = parse_params(&section, params)?;
        if config.command.is_empty() {
            return Err(ConfigError::Invalid {
                section,
                message: "command must name a program".to_string(),
            }
            .into());
        }

        let (led_tx, leds) = mpsc::channel(LED_BUFFER);
        let (presses, press_rx) = mpsc::channel(PRESS_BUFFER);
        let runner = Runner {
            button,
            command: config.command,
            timeout: self.config.timeout_secs.map(Duration::from_secs),
            leds: led_tx,
        };
        let run = runner.run(press_rx, self.closed.subscribe()).boxed();

        Ok(Configured {
            leds,
            presses,
            run,
        })
    }

    async fn close(&self) {
        self.closed.close();
    }
}

struct Runner {
    button: ButtonIndex,
    command: Vec<String>,
    timeout: Option<Duration>,
    leds: mpsc::Sender<LedState>,
}

impl Runner {
    async fn run(
        self,
        mut presses: mpsc::Receiver<Press>,
        mut closed: Closed,
    ) -> Result<(), ModuleError> {
        loop {
            tokio::select! {
                _ = closed.wait() => return Ok(()),
                press = presses.recv() => {
                    if press.is_none() {
                        return Ok(());
                    }
                    let _ = self.leds.send(LedState::PERFORMING).await;
                    // Closing mid-run kills the child (kill_on_drop)
                    let outcome = tokio::select! {
                        _ = closed.wait() => return Ok(()),
                        outcome = self.execute() => outcome,
                    };
                    let led = match outcome {
                        Ok(()) => LedState::OFF,
                        Err(e) => {
                            warn!("Button {}: {}", self.button, e);
                            LedState::ERROR
                        }
                    };
                    let _ = self.leds.send(led).await;
                }
            }
        }
    }

    async fn execute(&self) -> Result<(), String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| "empty command".to_string())?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("couldn't run {program}: {e}"))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| format!("{program} timed out after {limit:?}"))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| format!("waiting for {program}: {e}"))?;

        if output.status.success() {
            info!("Button {} pressed, {} called", self.button, program);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "{program} failed ({}): {}",
                output.status,
                stderr.trim()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> toml::Table {
        let mut table = toml::Table::new();
        table.insert(
            "command".into(),
            toml::Value::Array(args.iter().map(|a| toml::Value::from(*a)).collect()),
        );
        table
    }

    async fn next(leds: &mut mpsc::Receiver<LedState>) -> LedState {
        tokio::time::timeout(Duration::from_secs(10), leds.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_turns_led_off() {
        let module = ExecModule::default();
        let mut configured = module.configure(0, command(&["true"])).await.unwrap();
        tokio::spawn(configured.run);

        configured.presses.send(Press).await.unwrap();
        assert_eq!(next(&mut configured.leds).await, LedState::PERFORMING);
        assert_eq!(next(&mut configured.leds).await, LedState::OFF);
    }

    #[tokio::test]
    async fn test_failure_shows_error() {
        let module = ExecModule::default();
        let mut configured = module.configure(1, command(&["false"])).await.unwrap();
        tokio::spawn(configured.run);

        configured.presses.send(Press).await.unwrap();
        assert_eq!(next(&mut configured.leds).await, LedState::PERFORMING);
        assert_eq!(next(&mut configured.leds).await, LedState::ERROR);
    }

    #[tokio::test]
    async fn test_missing_program_shows_error() {
        let module = ExecModule::default();
        let mut configured = module
            .configure(0, command(&["/nonexistent/real-button-test"]))
            .await
            .unwrap();
        tokio::spawn(configured.run);

        configured.presses.send(Press).await.unwrap();
        assert_eq!(next(&mut configured.leds).await, LedState::PERFORMING);
        assert_eq!(next(&mut configured.leds).await, LedState::ERROR);
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let module = ExecModule::new(ExecModuleConfig {
            timeout_secs: Some(1),
        });
        let mut configured = module.configure(0, command(&["sleep", "30"])).await.unwrap();
        tokio::spawn(configured.run);

        configured.presses.send(Press).await.unwrap();
        assert_eq!(next(&mut configured.leds).await, LedState::PERFORMING);
        assert_eq!(next(&mut configured.leds).await, LedState::ERROR);
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let module = ExecModule::default();
        assert!(matches!(
            module.configure(0, command(&[])).await,
            Err(ModuleError::InvalidConfig(ConfigError::Invalid { .. }))
        ));
    }
}

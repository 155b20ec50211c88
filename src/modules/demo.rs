//! Demo module: each press shows the next color in a fixed cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use panel_transport::ButtonIndex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ModuleError;
use crate::led::LedState;
use crate::module::{
    parse_params, CloseSignal, Closed, Configured, Module, ModuleFactory, Press, LED_BUFFER,
    PRESS_BUFFER,
};

pub const PKG: &str = "demo";

/// Colors shown in order, wrapping around
pub const COLORS: [LedState; 3] = [
    LedState::RED.flashing(Duration::from_secs(1)),
    LedState::GREEN.flashing(Duration::from_millis(500)),
    LedState::BLUE
        .flashing(Duration::from_millis(250))
        .expiring(Duration::from_secs(2)),
];

/// The demo module takes no parameters
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DemoParams {}

pub struct DemoFactory;

#[async_trait]
impl ModuleFactory for DemoFactory {
    fn pkg(&self) -> &'static str {
        PKG
    }

    async fn create(&self, params: toml::Table) -> Result<Arc<dyn Module>, ModuleError> {
        let _: DemoParams = parse_params("demo module", params)?;
        Ok(Arc::new(DemoModule::new()))
    }
}

#[derive(Debug, Default)]
pub struct DemoModule {
    closed: CloseSignal,
}

impl DemoModule {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Module for DemoModule {
    fn pkg(&self) -> &'static str {
        PKG
    }

    async fn configure(
        &self,
        button: ButtonIndex,
        params: toml::Table,
    ) -> Result<Configured, ModuleError> {
        let _: DemoParams = parse_params(&format!("button {button}"), params)?;

        let (led_tx, leds) = mpsc::channel(LED_BUFFER);
        let (presses, press_rx) = mpsc::channel(PRESS_BUFFER);

        let closed = self.closed.subscribe();
        let run = cycle_colors(button, press_rx, led_tx, closed).boxed();

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

async fn cycle_colors(
    button: ButtonIndex,
    mut presses: mpsc::Receiver<Press>,
    leds: mpsc::Sender<LedState>,
    mut closed: Closed,
) -> Result<(), ModuleError> {
    let mut color = 0;
    loop {
        tokio::select! {
            _ = closed.wait() => return Ok(()),
            press = presses.recv() => {
                if press.is_none() {
                    return Ok(());
                }
                debug!("Demo button {}: color {}", button, color);
                if leds.send(COLORS[color]).await.is_err() {
                    return Ok(());
                }
                color = (color + 1) % COLORS.len();
            }
        }
    }
}

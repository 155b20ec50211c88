//! Virtual machine power button
//!
//! Binds a button to one libvirt domain. The LED mirrors the domain's state
//! (from its lifecycle events) and a press moves the domain towards the
//! opposite power state:
//!
//! | state                    | press                              |
//! |--------------------------|------------------------------------|
//! | running                  | shutdown, after a confirming press |
//! | paused                   | resume                             |
//! | shutdown/shutoff/crashed | start                              |
//! | pm-suspended             | wake up                            |
//! | blocked                  | error LED                          |
//! | no state                 | nothing                            |

pub mod confirm;
pub mod hypervisor;
pub mod mapping;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use panel_transport::ButtonIndex;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use virt_rpc::{Domain, DomainState, Libvirt, LifecycleEvent, VirtError, DEFAULT_URI};

use crate::error::ModuleError;
use crate::led::engine::sleep_until_opt;
use crate::led::LedState;
use crate::module::{
    parse_params, CloseSignal, Closed, Configured, Module, ModuleFactory, Press, LED_BUFFER,
    PRESS_BUFFER,
};

pub use confirm::ConfirmationTable;
pub use hypervisor::Hypervisor;
pub use mapping::{event_led, state_led};

pub const PKG: &str = "virt";

/// How long an armed action waits for its confirming press
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Module-level parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtModuleConfig {
    /// libvirtd TCP endpoint, `host:port`
    pub address: String,
    /// URI to open on the daemon (default `qemu:///system`)
    #[serde(default)]
    pub uri: Option<String>,
}

impl VirtModuleConfig {
    async fn connect(&self) -> Result<Libvirt, VirtError> {
        let uri = self.uri.as_deref().unwrap_or(DEFAULT_URI);
        Libvirt::connect_uri(&self.address, Some(uri)).await
    }
}

/// Button-level parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtButtonConfig {
    /// Domain name
    pub domain: String,
}

pub struct VirtFactory;

#[async_trait]
impl ModuleFactory for VirtFactory {
    fn pkg(&self) -> &'static str {
        PKG
    }

    async fn create(&self, params: toml::Table) -> Result<Arc<dyn Module>, ModuleError> {
        let config: VirtModuleConfig = parse_params("virt module", params)?;
        let client = config.connect().await?;
        Ok(Arc::new(VirtModule::with_reconnect(Arc::new(client), config)))
    }
}

/// Actions that need a confirming press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Shutdown,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Shutdown => "shutdown",
        }
    }
}

pub struct VirtModule {
    hypervisor: Mutex<Arc<dyn Hypervisor>>,
    /// Where to reconnect when the connection has dropped
    reconnect: Option<VirtModuleConfig>,
    closed: CloseSignal,
}

impl VirtModule {
    pub fn new(hypervisor: Arc<dyn Hypervisor>) -> Self {
        Self {
            hypervisor: Mutex::new(hypervisor),
            reconnect: None,
            closed: CloseSignal::new(),
        }
    }

    pub fn with_reconnect(hypervisor: Arc<dyn Hypervisor>, config: VirtModuleConfig) -> Self {
        Self {
            reconnect: Some(config),
            ..Self::new(hypervisor)
        }
    }

    /// Current connection, re-established first if it has dropped
    async fn hypervisor(&self) -> Result<Arc<dyn Hypervisor>, ModuleError> {
        let current = Arc::clone(&*self.hypervisor.lock());
        let Some(config) = self.reconnect.as_ref().filter(|_| current.is_closed()) else {
            return Ok(current);
        };

        info!("Reconnecting to libvirt at {}", config.address);
        let fresh: Arc<dyn Hypervisor> = Arc::new(config.connect().await?);
        *self.hypervisor.lock() = Arc::clone(&fresh);
        Ok(fresh)
    }
}

#[async_trait]
impl Module for VirtModule {
    fn pkg(&self) -> &'static str {
        PKG
    }

    async fn configure(
        &self,
        button: ButtonIndex,
        params: toml::Table,
    ) -> Result<Configured, ModuleError> {
        let config: VirtButtonConfig = parse_params(&format!("button {button}"), params)?;
        let hypervisor = self.hypervisor().await?;

        let domain = hypervisor
            .lookup(&config.domain)
            .await
            .map_err(|source| ModuleError::DomainNotFound {
                domain: config.domain.clone(),
                source,
            })?;
        info!(
            "Button {} controls {} ({})",
            button,
            domain.name,
            domain.uuid_string()
        );
        // Subscribe before the first state read so no transition is missed
        let events = hypervisor.lifecycle_events().await?;

        let (led_tx, leds) = mpsc::channel(LED_BUFFER);
        let (presses, press_rx) = mpsc::channel(PRESS_BUFFER);

        let vm = VirtButton {
            index: button,
            hypervisor,
            domain,
            leds: led_tx,
            confirmations: ConfirmationTable::new(),
        };
        let run = vm.run(press_rx, events, self.closed.subscribe()).boxed();

        Ok(Configured {
            leds,
            presses,
            run,
        })
    }

    async fn close(&self) {
        self.closed.close();
        let hypervisor = Arc::clone(&*self.hypervisor.lock());
        if let Err(e) = hypervisor.disconnect().await {
            debug!("libvirt disconnect: {}", e);
        }
    }
}

/// One button bound to one domain
struct VirtButton {
    index: ButtonIndex,
    hypervisor: Arc<dyn Hypervisor>,
    domain: Domain,
    leds: mpsc::Sender<LedState>,
    confirmations: ConfirmationTable,
}

impl VirtButton {
    async fn run(
        mut self,
        mut presses: mpsc::Receiver<Press>,
        mut events: broadcast::Receiver<LifecycleEvent>,
        mut closed: Closed,
    ) -> Result<(), ModuleError> {
        self.show_state().await?;

        loop {
            let deadline = self.confirmations.next_deadline();
            tokio::select! {
                _ = closed.wait() => return Ok(()),
                press = presses.recv() => match press {
                    Some(Press) => self.on_press().await,
                    None => return Ok(()),
                },
                event = events.recv() => match event {
                    Ok(event) => self.on_event(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Button {}: missed {} lifecycle events", self.index, missed);
                        if let Err(e) = self.show_state().await {
                            warn!("Button {}: {}", self.index, e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        return Err(ModuleError::Run(format!(
                            "lifecycle events for {} stopped",
                            self.domain.name
                        )));
                    }
                },
                _ = sleep_until_opt(deadline) => self.on_confirm_timeout().await,
            }
        }
    }

    async fn show(&self, led: LedState) {
        if self.leds.send(led).await.is_err() {
            debug!("Button {}: LED engine gone", self.index);
        }
    }

    /// Show the LED for the domain's current state
    async fn show_state(&self) -> Result<(), VirtError> {
        let state = self.hypervisor.state(&self.domain).await?;
        info!("{} is {}", self.domain.name, state);
        if let Some(led) = state_led(state) {
            self.show(led).await;
        }
        Ok(())
    }

    async fn on_press(&mut self) {
        // A deadline that passed together with this press still counts as passed
        self.on_confirm_timeout().await;

        let state = match self.hypervisor.state(&self.domain).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Couldn't read the state of {}: {}", self.domain.name, e);
                self.show(LedState::ERROR).await;
                return;
            }
        };
        info!("Button {} pressed, {} is {}", self.index, self.domain.name, state);

        match state {
            DomainState::Running => self.confirm(Action::Shutdown).await,
            DomainState::Paused => {
                let result = self.hypervisor.resume(&self.domain).await;
                self.report("resume", result).await;
            }
            DomainState::Shutdown | DomainState::Shutoff | DomainState::Crashed => {
                let result = self.hypervisor.start(&self.domain).await;
                self.report("start", result).await;
            }
            DomainState::PmSuspended => {
                let result = self.hypervisor.wake(&self.domain).await;
                self.report("wake", result).await;
            }
            DomainState::Blocked => {
                warn!("{} is blocked, nothing to do", self.domain.name);
                self.show(LedState::ERROR).await;
            }
            DomainState::NoState => {
                info!("{} has no state, ignoring press", self.domain.name);
            }
        }
    }

    /// First press arms `action`, a second one before the deadline performs it
    async fn confirm(&mut self, action: Action) {
        if self.confirmations.disarm(action.name()) {
            info!("{} of {} confirmed", action.name(), self.domain.name);
            let result = self.perform(action).await;
            self.report(action.name(), result).await;
            return;
        }

        info!(
            "Press again within {:?} to {} {}",
            CONFIRM_TIMEOUT,
            action.name(),
            self.domain.name
        );
        self.show(LedState::AWAITING_CONFIRMATION).await;
        self.confirmations
            .arm(action.name(), Instant::now() + CONFIRM_TIMEOUT);
    }

    async fn perform(&self, action: Action) -> Result<(), VirtError> {
        match action {
            Action::Shutdown => self.hypervisor.shutdown(&self.domain).await,
        }
    }

    async fn report(&self, what: &str, result: Result<(), VirtError>) {
        match result {
            Ok(()) => self.show(LedState::PERFORMING).await,
            Err(e) => {
                warn!("Couldn't {} {}: {}", what, self.domain.name, e);
                self.show(LedState::ERROR).await;
            }
        }
    }

    async fn on_confirm_timeout(&mut self) {
        let expired = self.confirmations.expire(Instant::now());
        if expired.is_empty() {
            return;
        }
        info!(
            "{} of {} not confirmed",
            expired.join(", "),
            self.domain.name
        );
        if let Err(e) = self.show_state().await {
            warn!("Couldn't read the state of {}: {}", self.domain.name, e);
            self.show(LedState::ERROR).await;
        }
    }

    async fn on_event(&self, event: &LifecycleEvent) {
        if event.domain.uuid != self.domain.uuid {
            return;
        }
        match event.event.and_then(event_led) {
            Some(led) => {
                info!("{}: {:?}", self.domain.name, event.event);
                self.show(led).await;
            }
            None => debug!(
                "{}: lifecycle event {} detail {}",
                self.domain.name, event.raw_event, event.detail
            ),
        }
    }
}

//! Panel supervisor
//!
//! Ties configured modules to physical buttons:
//!
//! ```text
//!   device ──raw index──► dispatch ──Press──► button supervisor ──► module
//!                                                                    │
//!   device ◄── LedOutput ◄── LedEngine (one per button) ◄─LedState───┘
//! ```
//!
//! Modules, supervisors and engines live for the whole process. Device
//! sessions come and go underneath them: when the panel disappears the
//! supervisor keeps looking for it and reattaches the same buttons.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use panel_transport::protocol::{led_off, MAX_BUTTONS};
use panel_transport::{
    ButtonIndex, InputLink, LedSink, LinkError, PanelSession, SerialDiscovery,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{extract_key, DeviceConfig, PanelConfig};
use crate::dispatch::{dispatch, INPUT_DEBOUNCE};
use crate::error::{ConfigError, PanelError};
use crate::led::{LedEngine, LedOutput};
use crate::module::{Configured, Module, Press};
use crate::registry::Registry;

/// Pause before a failed module is configured again
pub const RESTART_PAUSE: Duration = Duration::from_secs(5);

/// Presses queued per button between dispatch and its module
const BUTTON_QUEUE: usize = 16;

/// How long closing waits for each button to wind down
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One configured button
struct Binding {
    index: ButtonIndex,
    name: String,
    module: Arc<dyn Module>,
    params: toml::Table,
    configured: Configured,
}

/// Buttons bound to configured modules, not yet running
pub struct Panel {
    bindings: Vec<Binding>,
    modules: BTreeMap<String, Arc<dyn Module>>,
    restart_pause: Duration,
}

impl Panel {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            modules: BTreeMap::new(),
            restart_pause: RESTART_PAUSE,
        }
    }

    pub fn with_restart_pause(mut self, pause: Duration) -> Self {
        self.restart_pause = pause;
        self
    }

    /// Instantiate and bind everything a configuration describes.
    ///
    /// Module instances are shared by every button that names them.
    pub async fn from_config(config: &PanelConfig, registry: &Registry) -> Result<Self, PanelError> {
        let mut panel = Self::new();

        for definition in &config.buttons {
            let mut params = definition.clone();
            let name = extract_key(&mut params, "module")?;

            let module = match panel.modules.get(&name) {
                Some(module) => Arc::clone(module),
                None => {
                    let mut module_params = config
                        .modules
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| ConfigError::UnknownModuleRef(name.clone()))?;
                    let pkg = extract_key(&mut module_params, "pkg")?;
                    info!("Loading module {} ({})", name, pkg);
                    registry
                        .instantiate(&pkg, module_params)
                        .await
                        .map_err(|source| PanelError::Module {
                            index: panel.bindings.len(),
                            module: name.clone(),
                            source,
                        })?
                }
            };

            panel.bind(&name, module, params).await?;
        }

        Ok(panel)
    }

    /// Bind the next button to `module`
    pub async fn bind(
        &mut self,
        name: &str,
        module: Arc<dyn Module>,
        params: toml::Table,
    ) -> Result<(), PanelError> {
        let index = self.bindings.len();
        if index >= MAX_BUTTONS as usize {
            return Err(ConfigError::TooManyButtons {
                count: index + 1,
                max: MAX_BUTTONS,
            }
            .into());
        }

        let configured = module
            .configure(index as ButtonIndex, params.clone())
            .await
            .map_err(|source| PanelError::Module {
                index,
                module: name.to_string(),
                source,
            })?;
        debug!("Button {} bound to {} ({})", index, name, module.pkg());

        self.modules
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&module));
        self.bindings.push(Binding {
            index: index as ButtonIndex,
            name: name.to_string(),
            module,
            params,
            configured,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Start every button's supervisor and LED engine
    pub fn start(self) -> PanelHandle {
        let output = Arc::new(LedOutput::new());
        let mut buttons = Vec::with_capacity(self.bindings.len());
        let mut supervisors = Vec::with_capacity(self.bindings.len());

        for binding in self.bindings {
            let (tx, rx) = mpsc::channel(BUTTON_QUEUE);
            buttons.push(tx);

            let supervisor = ButtonSupervisor {
                index: binding.index,
                name: binding.name,
                module: binding.module,
                params: binding.params,
                output: Arc::clone(&output) as Arc<dyn LedSink>,
                restart_pause: self.restart_pause,
            };
            supervisors.push(tokio::spawn(supervisor.run(binding.configured, rx)));
        }

        info!("{} buttons ready", buttons.len());
        PanelHandle {
            buttons,
            output,
            modules: self.modules,
            supervisors,
        }
    }
}

impl Default for Panel {
    fn default() -> Self {
        Self::new()
    }
}

/// A started panel; feed it device sessions
pub struct PanelHandle {
    buttons: Vec<mpsc::Sender<Press>>,
    output: Arc<LedOutput>,
    modules: BTreeMap<String, Arc<dyn Module>>,
    supervisors: Vec<JoinHandle<()>>,
}

impl PanelHandle {
    /// Keep (re)opening the panel and serving it. Never returns.
    pub async fn run(&self, device: &DeviceConfig) {
        let pause = device.retry_pause();
        loop {
            match open_session(device).await {
                Ok(session) => {
                    self.serve(session).await;
                    warn!("Panel went away, looking again in {:?}", pause);
                }
                Err(e) if e.is_retryable() => {
                    warn!("{}, retrying in {:?}", e, pause);
                }
                Err(e) => {
                    error!("Couldn't open the panel: {}, retrying in {:?}", e, pause);
                }
            }
            tokio::time::sleep(pause).await;
        }
    }

    /// Serve one device session until its press stream ends
    pub async fn serve(&self, session: PanelSession) {
        let PanelSession {
            info,
            presses,
            leds,
        } = session;

        info!(
            "Connected and ready: {} {} on {}",
            info.button_count,
            info.button_noun(),
            info.device_path
        );
        if (info.button_count as usize) < self.buttons.len() {
            warn!(
                "{} buttons configured but the panel only has {}",
                self.buttons.len(),
                info.button_count
            );
        }
        if !info.link_type.has_leds() {
            info!("{} has no LEDs", info.device_path);
        }

        if let Err(e) = self.output.attach(leds) {
            warn!("Couldn't restore LEDs: {}", e);
        }

        let window = if info.link_type.is_hardware_debounced() {
            Duration::ZERO
        } else {
            INPUT_DEBOUNCE
        };
        dispatch(presses, self.buttons.clone(), window).await;

        self.output.detach();
    }

    /// Close every module, wait for the buttons to stop and turn the LEDs off
    pub async fn close(self) {
        for (name, module) in &self.modules {
            debug!("Closing module {}", name);
            module.close().await;
        }
        drop(self.buttons);

        for (index, mut task) in self.supervisors.into_iter().enumerate() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("Button {} didn't stop in time", index);
                task.abort();
            }
            if let Err(e) = self.output.write_command(led_off(index as ButtonIndex)) {
                debug!("Couldn't turn LED {} off: {}", index, e);
            }
        }
        self.output.detach();
    }
}

/// Open the panel the device config describes
pub async fn open_session(device: &DeviceConfig) -> Result<PanelSession, LinkError> {
    match &device.input {
        Some(path) => Ok(InputLink::new(path, &device.trigger)
            .with_reopen_pause(device.retry_pause())
            .open()),
        None => {
            SerialDiscovery::new(device.candidates.clone())
                .with_settle_delay(device.settle_delay())
                .open()
                .await
        }
    }
}

/// Forwards one button's presses to its module and restarts the module
/// when its run loop fails
struct ButtonSupervisor {
    index: ButtonIndex,
    name: String,
    module: Arc<dyn Module>,
    params: toml::Table,
    output: Arc<dyn LedSink>,
    restart_pause: Duration,
}

impl ButtonSupervisor {
    async fn run(self, first: Configured, mut presses: mpsc::Receiver<Press>) {
        let mut configured = first;

        loop {
            let Configured {
                leds,
                presses: module_presses,
                mut run,
            } = configured;
            let engine = LedEngine::new(self.index, Arc::clone(&self.output)).spawn(leds);

            let mut forwarding = true;
            let outcome = loop {
                tokio::select! {
                    result = &mut run => break result,
                    press = presses.recv(), if forwarding => match press {
                        Some(press) => {
                            if module_presses.try_send(press).is_err() {
                                warn!("Button {} ({}) busy, press dropped", self.index, self.name);
                            }
                        }
                        None => forwarding = false,
                    },
                }
            };
            drop(run);
            drop(module_presses);
            // The engine drains what the module left queued, then stops
            if let Err(e) = engine.await {
                warn!("Button {} LED engine ended abnormally: {}", self.index, e);
            }

            match outcome {
                Ok(()) => {
                    info!("Button {} ({}) finished", self.index, self.name);
                    return;
                }
                Err(e) => {
                    error!(
                        "Button {} ({}) failed: {}; restarting in {:?}",
                        self.index, self.name, e, self.restart_pause
                    );
                }
            }

            match self.reconfigure(&mut presses).await {
                Some(next) => configured = next,
                None => return,
            }
        }
    }

    /// Configure the module again, retrying until it works or the panel closes
    async fn reconfigure(&self, presses: &mut mpsc::Receiver<Press>) -> Option<Configured> {
        loop {
            tokio::time::sleep(self.restart_pause).await;

            // Presses made while the module was down are stale
            loop {
                match presses.try_recv() {
                    Ok(_) => continue,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return None,
                }
            }

            match self.module.configure(self.index, self.params.clone()).await {
                Ok(configured) => {
                    info!("Button {} ({}) restarted", self.index, self.name);
                    return Some(configured);
                }
                Err(e) => error!(
                    "Button {} ({}) couldn't be configured: {}; retrying in {:?}",
                    self.index, self.name, e, self.restart_pause
                ),
            }
        }
    }
}

//! Engine task and the handle used to talk to it.

use super::Engine;
use crate::error::{CoolingError, Result};
use crate::events::EventLog;
use crate::hub::HubEvent;
use crate::sensors::TemperatureSensor;
use crate::settings::{CoolingConfig, TimestampedLog};
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 16;

/// Requests from the settings page and the process.
#[derive(Debug)]
pub enum Command {
    AutoAdjust {
        config: CoolingConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    ListSensors {
        reply: oneshot::Sender<Result<Vec<TemperatureSensor>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: EventLog,
}

impl EngineHandle {
    /// Validate and apply a configuration.
    pub async fn auto_adjust_cooling(&self, config: CoolingConfig) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AutoAdjust { config, reply }).await?;
        rx.await.map_err(|_| CoolingError::EngineStopped)?
    }

    /// Candidate outdoor temperature sources.
    pub async fn list_temperature_sensors(&self) -> Result<Vec<TemperatureSensor>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ListSensors { reply }).await?;
        rx.await.map_err(|_| CoolingError::EngineStopped)?
    }

    /// Tear everything down and stop the engine task.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| CoolingError::EngineStopped)
    }

    /// Live feed of the observability stream.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<TimestampedLog> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CoolingError::EngineStopped)
    }
}

impl Engine {
    /// Run the engine on its own task.
    ///
    /// The persisted configuration is applied once the reload delay elapsed
    /// without a device topology change.
    pub fn spawn(
        self,
        hub_events: mpsc::UnboundedReceiver<HubEvent>,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = EngineHandle {
            commands: tx,
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(hub_events, rx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut hub_events: mpsc::UnboundedReceiver<HubEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let delay = self.config.reload_delay();
        let reload = time::sleep(delay);
        tokio::pin!(reload);
        let mut reload_pending = true;
        let mut hub_open = true;

        loop {
            tokio::select! {
                () = &mut reload, if reload_pending => {
                    reload_pending = false;
                    self.reload().await;
                }
                event = hub_events.recv(), if hub_open => match event {
                    Some(event) if event.is_topology_change() => {
                        debug!("[Engine] {:?}, reload in {:?}", event, delay);
                        reload.as_mut().reset(Instant::now() + delay);
                        reload_pending = true;
                    }
                    Some(event) => self.handle_hub_event(event).await,
                    None => {
                        warn!("[Engine] Hub event stream closed");
                        hub_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::AutoAdjust { config, reply }) => {
                        let result = self.auto_adjust_cooling(config).await;
                        if let Err(e) = &result {
                            warn!("[Engine] Configuration rejected: {}", e);
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::ListSensors { reply }) => {
                        let _ = reply.send(self.list_temperature_sensors().await);
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }
        info!("[Engine] Stopped");
    }
}

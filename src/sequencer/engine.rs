//! Event loop serialising user commands and step completions

use super::builder::{SequenceSnapshot, StepDescriptor, StepsBuilder};
use crate::adapter::{AdapterResolver, StepInput};
use crate::config::SequencerConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::step::{StepEvent, StepRegistry};
use crate::wallet::WalletHub;

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<BridgeResult<T>>;

/// User actions accepted by the sequencer
pub enum SequencerCommand {
    AddStep { reply: Reply<StepDescriptor> },
    RemoveStep { index: usize, reply: Reply<StepDescriptor> },
    SelectStepType { index: usize, title: String, reply: Reply<StepDescriptor> },
    SetInput { index: usize, input: StepInput, reply: Reply<()> },
    Execute { reply: Reply<()> },
    Reset { reply: Reply<()> },
    Snapshot { reply: Reply<SequenceSnapshot> },
}

/// Single task owning the `StepsBuilder`
pub struct SequencerEngine {
    builder: StepsBuilder,
    commands: mpsc::Receiver<SequencerCommand>,
    events: mpsc::UnboundedReceiver<StepEvent>,
    shutdown: CancellationToken,
}

impl SequencerEngine {
    pub fn new(
        registry: Arc<StepRegistry>,
        adapters: Arc<dyn AdapterResolver>,
        wallets: Arc<WalletHub>,
        config: &SequencerConfig,
        shutdown: CancellationToken,
    ) -> (Self, SequencerHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let builder = StepsBuilder::new(registry, adapters, wallets, event_tx, config.halt_on_failure);

        (
            Self {
                builder,
                commands: command_rx,
                events: event_rx,
                shutdown,
            },
            SequencerHandle {
                commands: command_tx,
            },
        )
    }

    /// Main sequencer loop
    pub async fn run(mut self) -> BridgeResult<()> {
        info!("Sequencer started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                Some(event) = self.events.recv() => {
                    match event {
                        StepEvent::Executed { step_id, status } => {
                            self.builder.on_executed(step_id, status).await;
                        }
                    }
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All sequencer handles dropped");
                        break;
                    }
                },
            }
        }

        info!("Sequencer stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: SequencerCommand) {
        // a dropped reply receiver only means the caller went away
        match command {
            SequencerCommand::AddStep { reply } => {
                let _ = reply.send(self.builder.add_step());
            }
            SequencerCommand::RemoveStep { index, reply } => {
                let _ = reply.send(self.builder.remove_step(index).await);
            }
            SequencerCommand::SelectStepType { index, title, reply } => {
                let _ = reply.send(self.builder.select_step_type(index, &title).await);
            }
            SequencerCommand::SetInput { index, input, reply } => {
                let _ = reply.send(self.builder.set_input(index, input).await);
            }
            SequencerCommand::Execute { reply } => {
                let _ = reply.send(self.builder.execute().await);
            }
            SequencerCommand::Reset { reply } => {
                let _ = reply.send(self.builder.reset().await);
            }
            SequencerCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.builder.snapshot().await));
            }
        }
    }
}

/// Cloneable client of the sequencer task
#[derive(Clone)]
pub struct SequencerHandle {
    commands: mpsc::Sender<SequencerCommand>,
}

impl SequencerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SequencerCommand,
    ) -> BridgeResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| BridgeError::Internal("Sequencer is not running".to_string()))?;
        response
            .await
            .map_err(|_| BridgeError::Internal("Sequencer dropped the request".to_string()))?
    }

    pub async fn add_step(&self) -> BridgeResult<StepDescriptor> {
        self.request(|reply| SequencerCommand::AddStep { reply }).await
    }

    pub async fn remove_step(&self, index: usize) -> BridgeResult<StepDescriptor> {
        self.request(|reply| SequencerCommand::RemoveStep { index, reply })
            .await
    }

    pub async fn select_step_type(&self, index: usize, title: impl Into<String>) -> BridgeResult<StepDescriptor> {
        let title = title.into();
        self.request(|reply| SequencerCommand::SelectStepType { index, title, reply })
            .await
    }

    pub async fn set_input(&self, index: usize, input: StepInput) -> BridgeResult<()> {
        self.request(|reply| SequencerCommand::SetInput { index, input, reply })
            .await
    }

    pub async fn execute(&self) -> BridgeResult<()> {
        self.request(|reply| SequencerCommand::Execute { reply }).await
    }

    pub async fn reset(&self) -> BridgeResult<()> {
        self.request(|reply| SequencerCommand::Reset { reply }).await
    }

    pub async fn snapshot(&self) -> BridgeResult<SequenceSnapshot> {
        self.request(|reply| SequencerCommand::Snapshot { reply }).await
    }
}

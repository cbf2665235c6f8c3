//! Registry actor implementation
//!
//! The single owner of the connection registry. Handlers talk to it through
//! a cloneable `RegistryHandle`; every command is processed to completion
//! before the next one, which is what makes admission atomic.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::ConnectionRecord;
use crate::error::RegistryError;
use crate::registry::Registry;
use crate::types::{Color, ConnectionId};

/// Commands sent from handlers to the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Reserve a name/color pair
    Admit {
        record: ConnectionRecord,
        reply: oneshot::Sender<Result<ConnectionRecord, RegistryError>>,
    },
    /// Remove an entry by name, optionally only if it belongs to `id`
    Remove {
        name: String,
        id: Option<ConnectionId>,
        reply: oneshot::Sender<bool>,
    },
    /// Colors not held by anyone
    AvailableColors {
        reply: oneshot::Sender<Vec<Color>>,
    },
    /// All live records
    Snapshot {
        reply: oneshot::Sender<Vec<ConnectionRecord>>,
    },
    /// Ask one session to close
    Close {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    /// Ask every session to close
    CloseAll {
        reply: oneshot::Sender<usize>,
    },
}

/// The registry actor
///
/// Owns the `Registry` and processes commands from connection handlers.
pub struct RegistryServer {
    /// Live connections
    registry: Registry,
    /// Command receiver channel
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl RegistryServer {
    /// Create a new RegistryServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            registry: Registry::new(),
            receiver,
        }
    }

    /// Start the actor on the current runtime and return a handle to it
    pub fn spawn(buffer: usize) -> (RegistryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer);
        let task = tokio::spawn(Self::new(receiver).run());
        (RegistryHandle { sender }, task)
    }

    /// Run the registry event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("Registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Registry shutting down");
    }

    /// Process a single command
    ///
    /// A dropped reply channel means the caller gave up; that is not an error.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Admit { record, reply } => {
                let _ = reply.send(self.handle_admit(record));
            }
            RegistryCommand::Remove { name, id, reply } => {
                let _ = reply.send(self.handle_remove(&name, id));
            }
            RegistryCommand::AvailableColors { reply } => {
                let _ = reply.send(self.registry.available_colors());
            }
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            RegistryCommand::Close { name, reply } => {
                let found = self.registry.close(&name);
                debug!("Close requested for '{}' (live: {})", name, found);
                let _ = reply.send(found);
            }
            RegistryCommand::CloseAll { reply } => {
                let count = self.registry.close_all();
                info!("Closing all {} connections", count);
                let _ = reply.send(count);
            }
        }
    }

    /// Handle an admission attempt
    fn handle_admit(
        &mut self,
        record: ConnectionRecord,
    ) -> Result<ConnectionRecord, RegistryError> {
        let result = self.registry.try_admit(record);
        match &result {
            Ok(record) => {
                info!(
                    "Admitted '{}' ({}) as connection {}",
                    record.name, record.color, record.id
                );
                debug!("Total connections: {}", self.registry.len());
            }
            Err(e) => debug!("Admission refused: {}", e),
        }
        result
    }

    /// Handle removal
    fn handle_remove(&mut self, name: &str, id: Option<ConnectionId>) -> bool {
        let removed = match id {
            Some(id) => self.registry.remove_connection(name, id),
            None => self.registry.remove(name),
        };
        if let Some(record) = &removed {
            info!("Removed '{}' ({})", record.name, record.color);
            debug!("Total connections: {}", self.registry.len());
        }
        removed.is_some()
    }
}

/// Cloneable handle to the registry actor
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Atomically reserve the record's name and color
    pub async fn try_admit(
        &self,
        record: ConnectionRecord,
    ) -> Result<ConnectionRecord, RegistryError> {
        self.request(|reply| RegistryCommand::Admit { record, reply })
            .await?
    }

    /// Remove the entry for `name`; removing an absent name is a no-op
    pub async fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        let name = name.to_string();
        self.request(|reply| RegistryCommand::Remove { name, id: None, reply })
            .await
    }

    /// Remove the entry for `name` only if it still belongs to `id`
    pub async fn remove_connection(
        &self,
        name: &str,
        id: ConnectionId,
    ) -> Result<bool, RegistryError> {
        let name = name.to_string();
        self.request(|reply| RegistryCommand::Remove {
            name,
            id: Some(id),
            reply,
        })
        .await
    }

    /// Consistent snapshot of the unused colors
    pub async fn available_colors(&self) -> Result<Vec<Color>, RegistryError> {
        self.request(|reply| RegistryCommand::AvailableColors { reply })
            .await
    }

    /// All live records, oldest first
    pub async fn snapshot(&self) -> Result<Vec<ConnectionRecord>, RegistryError> {
        self.request(|reply| RegistryCommand::Snapshot { reply })
            .await
    }

    /// Ask the session named `name` to close
    pub async fn close(&self, name: &str) -> Result<bool, RegistryError> {
        let name = name.to_string();
        self.request(|reply| RegistryCommand::Close { name, reply })
            .await
    }

    /// Ask every live session to close
    pub async fn close_all(&self) -> Result<usize, RegistryError> {
        self.request(|reply| RegistryCommand::CloseAll { reply })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| RegistryError::Unavailable)?;
        response.await.map_err(|_| RegistryError::Unavailable)
    }
}

/// Periodically log the live connections until `shutdown` fires
///
/// The count is logged at info level whenever it changes; each connection's
/// age is logged at debug level on every tick.
pub async fn monitor_connections(
    registry: RegistryHandle,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    let mut last_count = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Ok(snapshot) = registry.snapshot().await else {
            break;
        };

        if last_count != Some(snapshot.len()) {
            last_count = Some(snapshot.len());
            info!("Current connections: {}", snapshot.len());
        }
        for record in &snapshot {
            debug!(
                "Connection: {} ({}) - {}s",
                record.name,
                record.color,
                record.age().as_secs()
            );
        }
    }

    debug!("Connection monitor stopped");
}

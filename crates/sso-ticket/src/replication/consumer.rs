use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{PublisherIdentifier, TicketCommand, TicketMessageBus};
use crate::error::TicketResult;
use crate::registry::TicketRegistry;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Applied to the local registry.
    Applied,
    /// Published by this node; already applied locally.
    OwnCommand,
    /// Could not be parsed; dropped.
    Malformed,
    /// Parsed but the local registry rejected it.
    Failed,
}

/// Applies commands published by other nodes to the local registry.
pub struct ReplicationConsumer {
    local: Arc<dyn TicketRegistry>,
    bus: Arc<dyn TicketMessageBus>,
    publisher_id: PublisherIdentifier,
}

impl ReplicationConsumer {
    /// `publisher_id` must be the identity this node publishes with, so its
    /// own echoed commands are skipped.
    #[must_use]
    pub fn new(
        local: Arc<dyn TicketRegistry>,
        bus: Arc<dyn TicketMessageBus>,
        publisher_id: PublisherIdentifier,
    ) -> Self {
        Self {
            local,
            bus,
            publisher_id,
        }
    }

    /// Handles one message from the bus. Never fails: malformed or rejected
    /// commands are logged and dropped.
    pub async fn handle(&self, message: &[u8]) -> ConsumeOutcome {
        let command = match TicketCommand::from_bytes(message) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, bytes = message.len(), "Dropping malformed replication command");
                return ConsumeOutcome::Malformed;
            }
        };

        if command.publisher_id == self.publisher_id {
            return ConsumeOutcome::OwnCommand;
        }

        match command.apply(self.local.as_ref()).await {
            Ok(()) => {
                debug!(
                    publisher = %command.publisher_id,
                    command = ?command.command_type,
                    ticket_id = command.ticket_id.as_deref().unwrap_or(""),
                    "Applied replication command"
                );
                ConsumeOutcome::Applied
            }
            Err(e) => {
                warn!(
                    error = %e,
                    publisher = %command.publisher_id,
                    command = ?command.command_type,
                    "Failed to apply replication command"
                );
                ConsumeOutcome::Failed
            }
        }
    }

    /// Subscribes and starts consuming in a background task.
    ///
    /// The first subscription happens before this returns, so commands
    /// published afterwards are not missed. Lost subscriptions are re-opened
    /// with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial subscription fails.
    pub async fn start(self) -> TicketResult<ReplicationHandle> {
        let subscription = self.bus.subscribe().await?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(publisher = %self.publisher_id, "Replication consumer started");
            let mut subscription = Some(subscription);
            let mut backoff = INITIAL_BACKOFF;

            loop {
                let messages = match subscription.take() {
                    Some(messages) => messages,
                    None => match self.bus.subscribe().await {
                        Ok(messages) => {
                            info!("Replication subscription re-established");
                            backoff = INITIAL_BACKOFF;
                            messages
                        }
                        Err(e) => {
                            error!(
                                error = %e,
                                backoff_secs = backoff.as_secs(),
                                "Replication subscription failed, retrying..."
                            );
                            if sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                                break;
                            }
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                            continue;
                        }
                    },
                };

                if self.consume(messages, &mut shutdown_rx).await {
                    break;
                }

                warn!(
                    backoff_secs = backoff.as_secs(),
                    "Replication subscription closed, reconnecting..."
                );
                if sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                    break;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }

            info!("Replication consumer stopped");
        });

        Ok(ReplicationHandle { shutdown_tx, task })
    }

    /// Consumes until the stream ends (`false`) or shutdown is requested (`true`).
    async fn consume(
        &self,
        mut messages: BoxStream<'static, Vec<u8>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            tokio::select! {
                message = messages.next() => match message {
                    Some(message) => {
                        self.handle(&message).await;
                    }
                    None => return false,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return true;
                    }
                }
            }
        }
    }
}

/// Sleeps for `delay`; returns `true` if shutdown was requested meanwhile or
/// the handle was dropped.
async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
    }
}

/// Handle to a running replication consumer.
pub struct ReplicationHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReplicationHandle {
    /// Stops the consumer and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

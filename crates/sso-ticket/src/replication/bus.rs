use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::broadcast;

use crate::error::TicketResult;

/// Transport carrying serialized [`TicketCommand`](super::TicketCommand)s
/// between nodes.
///
/// Delivery is at-least-once and ordered per publisher. Subscribers also
/// receive their own node's messages; consumers filter them by publisher id.
#[async_trait]
pub trait TicketMessageBus: Send + Sync {
    /// Publishes one message to every subscriber.
    async fn publish(&self, message: Vec<u8>) -> TicketResult<()>;

    /// Opens a subscription. The stream ends when the connection is lost.
    async fn subscribe(&self) -> TicketResult<BoxStream<'static, Vec<u8>>>;
}

/// In-process bus over a Tokio broadcast channel.
///
/// Connects registries living in the same process: tests, embedded clusters
/// and single-binary deployments with several logical nodes.
#[derive(Debug, Clone)]
pub struct BroadcastMessageBus {
    sender: broadcast::Sender<Vec<u8>>,
}

impl BroadcastMessageBus {
    /// Creates a bus buffering up to `capacity` messages per slow subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastMessageBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl TicketMessageBus for BroadcastMessageBus {
    async fn publish(&self, message: Vec<u8>) -> TicketResult<()> {
        // No subscribers is not an error: nobody needs the update.
        let _ = self.sender.send(message);
        Ok(())
    }

    async fn subscribe(&self) -> TicketResult<BoxStream<'static, Vec<u8>>> {
        let receiver = self.sender.subscribe();
        let messages = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Replication subscriber lagged, commands dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(messages.boxed())
    }
}

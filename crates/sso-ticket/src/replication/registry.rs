use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::{PublisherIdentifier, TicketCommand, TicketMessageBus};
use crate::error::TicketResult;
use crate::registry::TicketRegistry;
use crate::ticket::AnyTicket;

/// Registry decorator that mirrors every local mutation onto a message bus.
///
/// Reads are served from the local registry. Writes go to the local registry
/// first and are then published; a failed publish is logged and does not
/// fail the write, so a bus outage degrades the cluster to per-node state
/// instead of failing logins.
pub struct ReplicatedTicketRegistry {
    local: Arc<dyn TicketRegistry>,
    bus: Arc<dyn TicketMessageBus>,
    publisher_id: PublisherIdentifier,
}

impl ReplicatedTicketRegistry {
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

    #[must_use]
    pub fn publisher_id(&self) -> &PublisherIdentifier {
        &self.publisher_id
    }

    /// Registry the consumer applies remote commands to.
    #[must_use]
    pub fn local(&self) -> Arc<dyn TicketRegistry> {
        Arc::clone(&self.local)
    }

    async fn publish(&self, command: TicketCommand) {
        let command_type = command.command_type;
        let result = match command.to_bytes() {
            Ok(bytes) => self.bus.publish(bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                command = ?command_type,
                "Failed to publish ticket registry command"
            );
        }
    }
}

#[async_trait]
impl TicketRegistry for ReplicatedTicketRegistry {
    async fn add_ticket(&self, ticket: &AnyTicket) -> TicketResult<()> {
        self.local.add_ticket(ticket).await?;
        self.publish(TicketCommand::add(self.publisher_id.clone(), ticket.clone()))
            .await;
        Ok(())
    }

    async fn get_ticket(&self, ticket_id: &str) -> TicketResult<Option<AnyTicket>> {
        self.local.get_ticket(ticket_id).await
    }

    async fn update_ticket(&self, ticket: &AnyTicket) -> TicketResult<()> {
        self.local.update_ticket(ticket).await?;
        self.publish(TicketCommand::update(self.publisher_id.clone(), ticket.clone()))
            .await;
        Ok(())
    }

    async fn delete_single_ticket(&self, ticket_id: &str) -> TicketResult<bool> {
        let removed = self.local.delete_single_ticket(ticket_id).await?;
        // Published even when absent locally: other nodes may still hold it.
        self.publish(TicketCommand::delete(self.publisher_id.clone(), ticket_id.to_string()))
            .await;
        Ok(removed)
    }

    async fn delete_all(&self) -> TicketResult<u64> {
        let removed = self.local.delete_all().await?;
        self.publish(TicketCommand::delete_all(self.publisher_id.clone()))
            .await;
        Ok(removed)
    }

    fn get_tickets(&self) -> BoxStream<'_, TicketResult<AnyTicket>> {
        self.local.get_tickets()
    }

    async fn session_count(&self) -> TicketResult<u64> {
        self.local.session_count().await
    }

    async fn service_ticket_count(&self) -> TicketResult<u64> {
        self.local.service_ticket_count().await
    }
}

//! Ticket registry SPI.
//!
//! A registry stores tickets and nothing else: it does not filter expired
//! tickets, does not serialize concurrent writers and does not know about
//! replication. Every backend (in-memory map, relational table, replicated
//! decorator) implements [`TicketRegistry`] and is a drop-in replacement for
//! the others.
//!
//! Backends implement only single-ticket deletes. [`TicketRegistry::delete_ticket`]
//! layers the cascade on top: deleting a session also deletes the service
//! tickets and proxy-granting tickets it owns.

mod memory;

pub use memory::InMemoryTicketRegistry;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::error::TicketResult;
use crate::ticket::{AnyTicket, Ticket, TicketKind};

/// Storage contract for tickets.
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Stores a ticket. Idempotent for the same logical ticket.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if a different ticket already uses this id, or
    /// `RegistryUnavailable` if the backend cannot be reached.
    async fn add_ticket(&self, ticket: &AnyTicket) -> TicketResult<()>;

    /// Looks up a ticket. Unknown ids yield `Ok(None)`; expired tickets are
    /// returned as stored.
    ///
    /// # Errors
    ///
    /// Returns `RegistryUnavailable` if the backend cannot be reached. A
    /// backend outage is never reported as `Ok(None)`.
    async fn get_ticket(&self, ticket_id: &str) -> TicketResult<Option<AnyTicket>>;

    /// Persists a mutated ticket. Last writer wins.
    async fn update_ticket(&self, ticket: &AnyTicket) -> TicketResult<()>;

    /// Removes one ticket without touching its children.
    ///
    /// Returns `true` if the ticket existed.
    async fn delete_single_ticket(&self, ticket_id: &str) -> TicketResult<bool>;

    /// Removes every ticket and returns how many were removed.
    async fn delete_all(&self) -> TicketResult<u64>;

    /// Lazily enumerates the whole registry. Each call starts a new pass.
    ///
    /// Expensive; meant for the cleaner and diagnostics.
    fn get_tickets(&self) -> BoxStream<'_, TicketResult<AnyTicket>>;

    /// Removes a ticket and, for granting tickets, every service ticket and
    /// proxy-granting ticket it owns, recursively.
    ///
    /// Returns `true` iff the ticket itself existed. Repeated deletes return
    /// `false`.
    async fn delete_ticket(&self, ticket_id: &str) -> TicketResult<bool> {
        let Some(ticket) = self.get_ticket(ticket_id).await? else {
            return Ok(false);
        };

        let mut pending = ticket.child_ticket_ids();
        while let Some(child_id) = pending.pop() {
            if TicketKind::from_ticket_id(&child_id).is_some_and(TicketKind::is_granting) {
                if let Some(child) = self.get_ticket(&child_id).await? {
                    pending.extend(child.child_ticket_ids());
                }
            }
            tracing::debug!(ticket_id = %child_id, "Removing child ticket from the registry");
            self.delete_single_ticket(&child_id).await?;
        }

        tracing::debug!(ticket_id = %ticket.id(), "Removing ticket from the registry");
        self.delete_single_ticket(ticket_id).await
    }

    /// Number of ticket-granting tickets (`TGT` prefix).
    async fn session_count(&self) -> TicketResult<u64> {
        count_kind(self.get_tickets(), TicketKind::TicketGranting).await
    }

    /// Number of service tickets (`ST` prefix).
    async fn service_ticket_count(&self) -> TicketResult<u64> {
        count_kind(self.get_tickets(), TicketKind::Service).await
    }
}

async fn count_kind(
    mut tickets: BoxStream<'_, TicketResult<AnyTicket>>,
    kind: TicketKind,
) -> TicketResult<u64> {
    let mut count = 0;
    while let Some(ticket) = tickets.next().await {
        if ticket?.kind() == kind {
            count += 1;
        }
    }
    Ok(count)
}

/// Typed and filtered lookups on top of [`TicketRegistry::get_ticket`].
#[async_trait]
pub trait TicketRegistryExt: TicketRegistry {
    /// Looks up a ticket and returns it only if `predicate` accepts it.
    async fn get_ticket_matching<P>(
        &self,
        ticket_id: &str,
        predicate: P,
    ) -> TicketResult<Option<AnyTicket>>
    where
        P: FnOnce(&AnyTicket) -> bool + Send;

    /// Looks up a ticket of type `T`. A ticket of another kind yields
    /// `Ok(None)`; is-a applies, so a PGT satisfies a TGT lookup.
    async fn get_ticket_as<T>(&self, ticket_id: &str) -> TicketResult<Option<T>>
    where
        T: TryFrom<AnyTicket> + Send;
}

#[async_trait]
impl<R: TicketRegistry + ?Sized> TicketRegistryExt for R {
    async fn get_ticket_matching<P>(
        &self,
        ticket_id: &str,
        predicate: P,
    ) -> TicketResult<Option<AnyTicket>>
    where
        P: FnOnce(&AnyTicket) -> bool + Send,
    {
        Ok(self.get_ticket(ticket_id).await?.filter(predicate))
    }

    async fn get_ticket_as<T>(&self, ticket_id: &str) -> TicketResult<Option<T>>
    where
        T: TryFrom<AnyTicket> + Send,
    {
        Ok(self
            .get_ticket(ticket_id)
            .await?
            .and_then(|ticket| T::try_from(ticket).ok()))
    }
}

//! In-memory ticket registry.
//!
//! Per-node storage backed by a [`DashMap`]. On its own it is suitable for a
//! single node; clusters wrap it in a
//! [`ReplicatedTicketRegistry`](crate::replication::ReplicatedTicketRegistry).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};

use super::TicketRegistry;
use crate::codec::{EncodedTicket, JsonTicketCodec, TicketCodec};
use crate::error::{TicketError, TicketResult};
use crate::ticket::{AnyTicket, Ticket, TicketKind};

/// Ticket registry held in process memory.
#[derive(Debug)]
pub struct InMemoryTicketRegistry {
    tickets: DashMap<String, EncodedTicket>,
    codec: Arc<dyn TicketCodec>,
}

impl Default for InMemoryTicketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTicketRegistry {
    /// Creates an empty registry storing plain JSON payloads.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonTicketCodec))
    }

    /// Creates an empty registry with the given payload codec.
    #[must_use]
    pub fn with_codec(codec: Arc<dyn TicketCodec>) -> Self {
        Self {
            tickets: DashMap::new(),
            codec,
        }
    }

    /// Number of stored tickets of every kind.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    fn count_kind(&self, kind: TicketKind) -> u64 {
        self.tickets.iter().filter(|e| e.value().kind == kind).count() as u64
    }

    fn upsert(&self, ticket: &AnyTicket) -> TicketResult<()> {
        let encoded = self.codec.encode(ticket)?;
        match self.tickets.entry(encoded.id.clone()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_same_logical_ticket(&encoded) {
                    tracing::warn!(
                        kind = %encoded.kind,
                        "Rejected ticket whose id collides with a different stored ticket"
                    );
                    return Err(TicketError::duplicate_id(ticket.id()));
                }
                existing.insert(encoded);
            }
            Entry::Vacant(slot) => {
                slot.insert(encoded);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TicketRegistry for InMemoryTicketRegistry {
    async fn add_ticket(&self, ticket: &AnyTicket) -> TicketResult<()> {
        tracing::debug!(ticket_id = %ticket.id(), "Adding ticket to the registry");
        self.upsert(ticket)
    }

    async fn get_ticket(&self, ticket_id: &str) -> TicketResult<Option<AnyTicket>> {
        let key = self.codec.encode_id(ticket_id);
        // Clone out of the map so no shard lock is held while decoding.
        let encoded = self.tickets.get(&key).map(|e| e.value().clone());
        encoded.map(|e| self.codec.decode(&e)).transpose()
    }

    async fn update_ticket(&self, ticket: &AnyTicket) -> TicketResult<()> {
        tracing::trace!(ticket_id = %ticket.id(), "Updating ticket in the registry");
        self.upsert(ticket)
    }

    async fn delete_single_ticket(&self, ticket_id: &str) -> TicketResult<bool> {
        let key = self.codec.encode_id(ticket_id);
        Ok(self.tickets.remove(&key).is_some())
    }

    async fn delete_all(&self) -> TicketResult<u64> {
        let keys: Vec<String> = self.tickets.iter().map(|e| e.key().clone()).collect();
        let removed = keys
            .iter()
            .filter(|key| self.tickets.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    fn get_tickets(&self) -> BoxStream<'_, TicketResult<AnyTicket>> {
        let snapshot: Vec<EncodedTicket> = self.tickets.iter().map(|e| e.value().clone()).collect();
        let codec = Arc::clone(&self.codec);
        stream::iter(snapshot)
            .map(move |encoded| codec.decode(&encoded))
            .boxed()
    }

    async fn session_count(&self) -> TicketResult<u64> {
        Ok(self.count_kind(TicketKind::TicketGranting))
    }

    async fn service_ticket_count(&self) -> TicketResult<u64> {
        Ok(self.count_kind(TicketKind::Service))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::TryStreamExt;

    use super::*;
    use crate::authentication::{Authentication, Principal, Service};
    use crate::expiration::ExpirationPolicy;
    use crate::registry::TicketRegistryExt;
    use crate::ticket::{ServiceTicket, TicketGrantingTicket};

    fn tgt(id: &str) -> TicketGrantingTicket {
        TicketGrantingTicket::new(
            id,
            Authentication::new(Principal::new("casuser")),
            ExpirationPolicy::NeverExpires,
        )
    }

    fn st_policy() -> ExpirationPolicy {
        ExpirationPolicy::multi_time_use_or_timeout(1, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let registry = InMemoryTicketRegistry::new();
        let ticket = AnyTicket::from(tgt("TGT-1"));
        registry.add_ticket(&ticket).await.unwrap();

        assert_eq!(registry.get_ticket("TGT-1").await.unwrap(), Some(ticket));
        assert_eq!(registry.get_ticket("TGT-404").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_twice_is_idempotent() {
        let registry = InMemoryTicketRegistry::new();
        let ticket = AnyTicket::from(tgt("TGT-1"));
        registry.add_ticket(&ticket).await.unwrap();
        registry.add_ticket(&ticket).await.unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_colliding_id_is_rejected() {
        let registry = InMemoryTicketRegistry::new();
        registry.add_ticket(&tgt("TGT-1").into()).await.unwrap();

        let mut other = tgt("TGT-1");
        other.state.creation_time += time::Duration::seconds(1);
        let err = registry.add_ticket(&other.into()).await.unwrap_err();
        assert!(err.is_duplicate_id());
    }

    #[tokio::test]
    async fn test_update_persists_counters() {
        let registry = InMemoryTicketRegistry::new();
        let mut ticket = tgt("TGT-1");
        registry.add_ticket(&ticket.clone().into()).await.unwrap();

        ticket.record_use();
        registry.update_ticket(&ticket.clone().into()).await.unwrap();

        let stored = registry
            .get_ticket_as::<TicketGrantingTicket>("TGT-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.count_of_uses(), 1);
    }

    #[tokio::test]
    async fn test_expired_tickets_are_returned() {
        let registry = InMemoryTicketRegistry::new();
        let mut ticket = tgt("TGT-1");
        ticket.mark_ticket_expired();
        registry.add_ticket(&ticket.into()).await.unwrap();

        let stored = registry.get_ticket("TGT-1").await.unwrap().unwrap();
        assert!(stored.is_expired());
    }

    #[tokio::test]
    async fn test_typed_lookup_filters_kind() {
        let registry = InMemoryTicketRegistry::new();
        registry.add_ticket(&tgt("TGT-1").into()).await.unwrap();

        assert!(
            registry
                .get_ticket_as::<ServiceTicket>("TGT-1")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            registry
                .get_ticket_matching("TGT-1", |t| t.kind() == TicketKind::Service)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_cascades_to_services() {
        let registry = InMemoryTicketRegistry::new();
        let mut session = tgt("TGT-1");
        let st1 = session
            .grant_service_ticket("ST-1", Service::new("https://a"), st_policy(), false, false)
            .unwrap();
        let st2 = session
            .grant_service_ticket("ST-2", Service::new("https://b"), st_policy(), false, false)
            .unwrap();
        registry.add_ticket(&session.into()).await.unwrap();
        registry.add_ticket(&st1.into()).await.unwrap();
        registry.add_ticket(&st2.into()).await.unwrap();
        registry.add_ticket(&tgt("TGT-2").into()).await.unwrap();

        assert!(registry.delete_ticket("TGT-1").await.unwrap());
        assert_eq!(registry.len(), 1);
        assert!(!registry.delete_ticket("TGT-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_all_returns_count() {
        let registry = InMemoryTicketRegistry::new();
        for i in 0..5 {
            registry.add_ticket(&tgt(&format!("TGT-{i}")).into()).await.unwrap();
        }
        assert_eq!(registry.delete_all().await.unwrap(), 5);
        assert_eq!(registry.delete_all().await.unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_counts_and_enumeration() {
        let registry = InMemoryTicketRegistry::new();
        let mut session = tgt("TGT-1");
        let st = session
            .grant_service_ticket("ST-1", Service::new("https://a"), st_policy(), false, false)
            .unwrap();
        registry.add_ticket(&session.into()).await.unwrap();
        registry.add_ticket(&st.into()).await.unwrap();

        assert_eq!(registry.session_count().await.unwrap(), 1);
        assert_eq!(registry.service_ticket_count().await.unwrap(), 1);

        let all: Vec<AnyTicket> = registry.get_tickets().try_collect().await.unwrap();
        assert_eq!(all.len(), 2);
        // Restartable
        let again: Vec<AnyTicket> = registry.get_tickets().try_collect().await.unwrap();
        assert_eq!(again.len(), 2);
    }
}

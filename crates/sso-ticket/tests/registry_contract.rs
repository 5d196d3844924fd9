//! Registry contract checks.
//!
//! Every backend must behave the same way; these run the suite against the
//! in-memory registry with plain and encrypted payloads.

use std::sync::Arc;

use futures_util::StreamExt;
use sso_ticket::{
    AnyTicket, Authentication, EncryptedTicketCodec, ExpirationPolicy, InMemoryTicketRegistry,
    Principal, ProxyGrantingTicket, ProxyTicket, Service, ServiceTicket, Ticket,
    TicketGrantingTicket, TicketKind, TicketRegistry, TicketRegistryExt,
};

fn registries() -> Vec<(&'static str, Arc<dyn TicketRegistry>)> {
    let key = [7u8; 32];
    vec![
        ("plain", Arc::new(InMemoryTicketRegistry::new())),
        (
            "encrypted",
            Arc::new(InMemoryTicketRegistry::with_codec(Arc::new(
                EncryptedTicketCodec::new(&key, "test"),
            ))),
        ),
    ]
}

fn tgt(id: &str) -> TicketGrantingTicket {
    TicketGrantingTicket::new(
        id,
        Authentication::new(Principal::new("casuser")),
        ExpirationPolicy::ticket_granting_ticket(
            std::time::Duration::from_secs(8 * 3600),
            std::time::Duration::from_secs(2 * 3600),
        ),
    )
}

fn st_policy() -> ExpirationPolicy {
    ExpirationPolicy::multi_time_use_or_timeout(1, std::time::Duration::from_secs(10))
}

/// TGT-1 with ST-1, PGT-1 (from ST-1) and PT-1 (from PGT-1).
fn hierarchy() -> (TicketGrantingTicket, ServiceTicket, ProxyGrantingTicket, ProxyTicket) {
    let mut tgt = tgt("TGT-1");
    let mut st = tgt
        .grant_service_ticket("ST-1", Service::new("https://proxy.example.org"), st_policy(), true, true)
        .unwrap();
    let mut pgt = st
        .grant_proxy_granting_ticket(
            "PGT-1",
            "PGTIOU-1",
            Authentication::new(Principal::new("https://proxy.example.org/callback")),
            ExpirationPolicy::timeout(std::time::Duration::from_secs(3600)),
            &mut tgt,
        )
        .unwrap();
    let pt = pgt
        .grant_proxy_ticket("PT-1", Service::new("https://backend.example.org"), st_policy(), true)
        .unwrap();
    (tgt, st, pgt, pt)
}

#[tokio::test]
async fn test_round_trip_every_kind() {
    for (name, registry) in registries() {
        let (tgt, st, pgt, pt) = hierarchy();
        let tickets: Vec<AnyTicket> = vec![tgt.into(), st.into(), pgt.into(), pt.into()];

        for ticket in &tickets {
            registry.add_ticket(ticket).await.unwrap();
        }
        for ticket in &tickets {
            let stored = registry.get_ticket(ticket.id()).await.unwrap();
            assert_eq!(stored.as_ref(), Some(ticket), "{name}: {}", ticket.id());
        }
    }
}

#[tokio::test]
async fn test_missing_ticket_is_none() {
    for (name, registry) in registries() {
        assert!(registry.get_ticket("TGT-missing").await.unwrap().is_none(), "{name}");
        assert!(!registry.delete_single_ticket("TGT-missing").await.unwrap(), "{name}");
        assert!(!registry.delete_ticket("TGT-missing").await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn test_add_is_idempotent_for_same_ticket() {
    for (name, registry) in registries() {
        let ticket: AnyTicket = tgt("TGT-1").into();
        registry.add_ticket(&ticket).await.unwrap();
        registry.add_ticket(&ticket).await.unwrap();
        assert_eq!(registry.session_count().await.unwrap(), 1, "{name}");
    }
}

#[tokio::test]
async fn test_add_rejects_different_ticket_with_same_id() {
    for (name, registry) in registries() {
        registry.add_ticket(&tgt("TGT-1").into()).await.unwrap();

        let mut other = tgt("TGT-1");
        other.state.creation_time -= time::Duration::seconds(5);
        let err = registry.add_ticket(&other.into()).await.unwrap_err();
        assert!(err.is_duplicate_id(), "{name}: {err}");
    }
}

#[tokio::test]
async fn test_update_replaces_state() {
    for (name, registry) in registries() {
        let mut ticket: AnyTicket = tgt("TGT-1").into();
        registry.add_ticket(&ticket).await.unwrap();

        ticket.record_use();
        registry.update_ticket(&ticket).await.unwrap();

        let stored = registry.get_ticket("TGT-1").await.unwrap().unwrap();
        assert_eq!(stored.count_of_uses(), 1, "{name}");
    }
}

#[tokio::test]
async fn test_typed_lookup_follows_is_a() {
    for (name, registry) in registries() {
        let (tgt, st, pgt, pt) = hierarchy();
        for ticket in [AnyTicket::from(tgt), st.into(), pgt.into(), pt.into()] {
            registry.add_ticket(&ticket).await.unwrap();
        }

        assert!(registry.get_ticket_as::<TicketGrantingTicket>("TGT-1").await.unwrap().is_some());
        assert!(registry.get_ticket_as::<TicketGrantingTicket>("PGT-1").await.unwrap().is_some());
        assert!(registry.get_ticket_as::<ServiceTicket>("PT-1").await.unwrap().is_some());
        assert!(registry.get_ticket_as::<ProxyGrantingTicket>("TGT-1").await.unwrap().is_none(), "{name}");
        assert!(registry.get_ticket_as::<ServiceTicket>("TGT-1").await.unwrap().is_none(), "{name}");

        let matching = registry
            .get_ticket_matching("ST-1", |t| t.kind() == TicketKind::Service)
            .await
            .unwrap();
        assert!(matching.is_some(), "{name}");
        let filtered = registry
            .get_ticket_matching("ST-1", |t| t.is_expired())
            .await
            .unwrap();
        assert!(filtered.is_none(), "{name}");
    }
}

#[tokio::test]
async fn test_cascading_delete() {
    for (name, registry) in registries() {
        let (root, st, pgt, pt) = hierarchy();
        let mut other = tgt("TGT-2");
        let unrelated = other
            .grant_service_ticket("ST-2", Service::new("https://app.example.org"), st_policy(), true, true)
            .unwrap();
        for ticket in [
            AnyTicket::from(root),
            st.into(),
            pgt.into(),
            pt.into(),
            other.into(),
            unrelated.into(),
        ] {
            registry.add_ticket(&ticket).await.unwrap();
        }

        assert!(registry.delete_ticket("TGT-1").await.unwrap(), "{name}");
        for id in ["TGT-1", "ST-1", "PGT-1", "PT-1"] {
            assert!(registry.get_ticket(id).await.unwrap().is_none(), "{name}: {id}");
        }
        assert!(registry.get_ticket("TGT-2").await.unwrap().is_some(), "{name}");
        assert!(registry.get_ticket("ST-2").await.unwrap().is_some(), "{name}");

        assert!(!registry.delete_ticket("TGT-1").await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn test_enumeration_and_counts() {
    for (name, registry) in registries() {
        let (tgt, st, pgt, pt) = hierarchy();
        for ticket in [AnyTicket::from(tgt), st.into(), pgt.into(), pt.into()] {
            registry.add_ticket(&ticket).await.unwrap();
        }

        let mut ids: Vec<String> = registry
            .get_tickets()
            .map(|t| t.unwrap().id().to_string())
            .collect()
            .await;
        ids.sort();
        assert_eq!(ids, vec!["PGT-1", "PT-1", "ST-1", "TGT-1"], "{name}");

        // Counts are strictly by kind.
        assert_eq!(registry.session_count().await.unwrap(), 1, "{name}");
        assert_eq!(registry.service_ticket_count().await.unwrap(), 1, "{name}");

        assert_eq!(registry.delete_all().await.unwrap(), 4, "{name}");
        assert_eq!(registry.get_tickets().count().await, 0, "{name}");
        assert_eq!(registry.delete_all().await.unwrap(), 0, "{name}");
    }
}

#[tokio::test]
async fn test_expired_tickets_are_returned_as_stored() {
    for (name, registry) in registries() {
        let ticket = TicketGrantingTicket::new(
            "TGT-old",
            Authentication::new(Principal::new("casuser")),
            ExpirationPolicy::AlwaysExpires,
        );
        registry.add_ticket(&ticket.into()).await.unwrap();

        let stored = registry.get_ticket("TGT-old").await.unwrap().unwrap();
        assert!(stored.is_expired(), "{name}");
    }
}

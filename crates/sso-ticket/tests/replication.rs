//! Two nodes sharing an in-process bus.

use std::sync::Arc;
use std::time::Duration;

use sso_ticket::{
    Authentication, BroadcastMessageBus, DefaultTicketFactory, ExpirationPolicy,
    InMemoryTicketRegistry, Principal, PublisherIdentifier, ReplicatedTicketRegistry,
    ReplicationConsumer, ReplicationHandle, Service, Ticket, TicketConfig, TicketGrantingTicket,
    TicketRegistry, TicketingService,
};

struct Node {
    local: Arc<InMemoryTicketRegistry>,
    registry: Arc<ReplicatedTicketRegistry>,
    consumer: ReplicationHandle,
}

async fn node(name: &str, bus: &Arc<BroadcastMessageBus>) -> Node {
    let local = Arc::new(InMemoryTicketRegistry::new());
    let publisher = PublisherIdentifier::new(name);
    let registry = Arc::new(ReplicatedTicketRegistry::new(
        local.clone(),
        bus.clone(),
        publisher.clone(),
    ));
    let consumer = ReplicationConsumer::new(local.clone(), bus.clone(), publisher)
        .start()
        .await
        .unwrap();
    Node {
        local,
        registry,
        consumer,
    }
}

/// Polls until `check` holds or a second has passed.
async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn session(id: &str) -> TicketGrantingTicket {
    TicketGrantingTicket::new(
        id,
        Authentication::new(Principal::new("casuser")),
        ExpirationPolicy::NeverExpires,
    )
}

#[tokio::test]
async fn test_mutations_converge() {
    let bus = Arc::new(BroadcastMessageBus::default());
    let a = node("node-a", &bus).await;
    let b = node("node-b", &bus).await;

    a.registry.add_ticket(&session("TGT-1").into()).await.unwrap();
    assert!(eventually(|| b.local.len() == 1).await);

    let mut ticket = b.registry.get_ticket("TGT-1").await.unwrap().unwrap();
    ticket.record_use();
    b.registry.update_ticket(&ticket).await.unwrap();

    let mut converged = false;
    for _ in 0..100 {
        let seen = a.registry.get_ticket("TGT-1").await.unwrap().unwrap();
        if seen.count_of_uses() == 1 {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(converged);

    b.registry.delete_single_ticket("TGT-1").await.unwrap();
    assert!(eventually(|| a.local.is_empty()).await);

    for i in 0..5 {
        a.registry.add_ticket(&session(&format!("TGT-{i}")).into()).await.unwrap();
    }
    assert!(eventually(|| b.local.len() == 5).await);
    b.registry.delete_all().await.unwrap();
    assert!(eventually(|| a.local.is_empty()).await);

    a.consumer.shutdown().await;
    b.consumer.shutdown().await;
}

#[tokio::test]
async fn test_cascading_delete_replicates_children() {
    let bus = Arc::new(BroadcastMessageBus::default());
    let a = node("node-a", &bus).await;
    let b = node("node-b", &bus).await;

    let mut tgt = session("TGT-1");
    let st = tgt
        .grant_service_ticket(
            "ST-1",
            Service::new("https://app.example.org"),
            ExpirationPolicy::NeverExpires,
            true,
            true,
        )
        .unwrap();
    a.registry.add_ticket(&tgt.into()).await.unwrap();
    a.registry.add_ticket(&st.into()).await.unwrap();
    assert!(eventually(|| b.local.len() == 2).await);

    assert!(a.registry.delete_ticket("TGT-1").await.unwrap());
    assert!(eventually(|| b.local.is_empty()).await);

    a.consumer.shutdown().await;
    b.consumer.shutdown().await;
}

#[tokio::test]
async fn test_service_ticket_granted_on_one_node_validates_on_another() {
    let bus = Arc::new(BroadcastMessageBus::default());
    let a = node("node-a", &bus).await;
    let b = node("node-b", &bus).await;

    let factory = || Arc::new(DefaultTicketFactory::from_config(&TicketConfig::default()).unwrap());
    let on_a = TicketingService::new(a.registry.clone(), factory());
    let on_b = TicketingService::new(b.registry.clone(), factory());
    let app = Service::new("https://app.example.org");

    let tgt = on_a
        .create_ticket_granting_ticket(Authentication::new(Principal::new("casuser")))
        .await
        .unwrap();
    assert!(eventually(|| b.local.len() == 1).await);

    let st = on_b.grant_service_ticket(tgt.id(), &app, false).await.unwrap();
    assert!(eventually(|| a.local.len() == 2).await);

    let assertion = on_a.validate_service_ticket(st.id(), &app).await.unwrap();
    assert_eq!(assertion.primary_authentication.principal.id, "casuser");

    // The consumed ticket disappears everywhere.
    assert!(eventually(|| b.local.len() == 1).await);

    a.consumer.shutdown().await;
    b.consumer.shutdown().await;
}

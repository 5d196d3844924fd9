//! Cleaner end-to-end against a real clock.

use std::sync::Arc;
use std::time::Duration;

use sso_ticket::{
    Authentication, ExpirationPolicy, InMemoryTicketRegistry, Principal, TicketGrantingTicket,
    TicketRegistry, TicketRegistryCleaner,
};

fn session(id: String, policy: ExpirationPolicy) -> TicketGrantingTicket {
    TicketGrantingTicket::new(id, Authentication::new(Principal::new("casuser")), policy)
}

#[tokio::test]
async fn test_sweep_removes_exactly_the_expired_tickets() {
    let registry = Arc::new(InMemoryTicketRegistry::new());
    for i in 0..10 {
        let short = session(
            format!("TGT-short-{i}"),
            ExpirationPolicy::hard_timeout(Duration::from_millis(50)),
        );
        let long = session(
            format!("TGT-long-{i}"),
            ExpirationPolicy::timeout(Duration::from_millis(5000)),
        );
        registry.add_ticket(&short.into()).await.unwrap();
        registry.add_ticket(&long.into()).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(60)).await;

    let cleaner = TicketRegistryCleaner::new(registry.clone());
    let report = cleaner.clean().await.unwrap();

    assert_eq!(report.scanned, 20);
    assert_eq!(report.expired, 10);
    assert_eq!(report.deleted, 10);
    assert_eq!(report.failed, 0);
    assert_eq!(registry.len(), 10);
    for i in 0..10 {
        assert!(registry.get_ticket(&format!("TGT-short-{i}")).await.unwrap().is_none());
        assert!(registry.get_ticket(&format!("TGT-long-{i}")).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_scheduled_cleaner_runs_and_stops() {
    let registry = Arc::new(InMemoryTicketRegistry::new());
    registry
        .add_ticket(&session("TGT-1".into(), ExpirationPolicy::AlwaysExpires).into())
        .await
        .unwrap();

    let handle = Arc::new(TicketRegistryCleaner::new(registry.clone()))
        .start(Duration::from_millis(10), Duration::from_millis(20));

    for _ in 0..100 {
        if registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(registry.is_empty());

    handle.shutdown().await;
}

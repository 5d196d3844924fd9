//! Expired ticket sweep.
//!
//! [`TicketRegistryCleaner::clean`] runs one sweep: it enumerates the
//! registry, and for every expired ticket deletes the tickets it owns and then
//! the ticket itself. Individual delete failures are logged and counted; they
//! never abort the sweep.
//!
//! In a cluster sharing one registry, a [`LockingStrategy`] makes sure only
//! one node sweeps at a time.
//!
//! # Example
//!
//! ```ignore
//! let cleaner = Arc::new(TicketRegistryCleaner::new(registry));
//! let handle = cleaner.start(Duration::from_secs(20), Duration::from_secs(120));
//! // ...
//! handle.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::TicketResult;
use crate::registry::TicketRegistry;
use crate::ticket::{AnyTicket, Ticket};

// =============================================================================
// Locking Strategy
// =============================================================================

/// Cluster-wide mutual exclusion for the sweep.
#[async_trait]
pub trait LockingStrategy: Send + Sync {
    /// Tries to take the cleaner lock. Returns `false` if another node holds it.
    async fn acquire(&self) -> TicketResult<bool>;

    /// Releases the lock taken by [`acquire`](Self::acquire).
    async fn release(&self) -> TicketResult<()>;
}

/// Always grants the lock. For registries that are not shared between nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLockingStrategy;

#[async_trait]
impl LockingStrategy for NoOpLockingStrategy {
    async fn acquire(&self) -> TicketResult<bool> {
        Ok(true)
    }

    async fn release(&self) -> TicketResult<()> {
        Ok(())
    }
}

// =============================================================================
// Cleaner
// =============================================================================

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Tickets enumerated.
    pub scanned: u64,
    /// Tickets found expired.
    pub expired: u64,
    /// Expired tickets removed (children not included).
    pub deleted: u64,
    /// Enumeration or delete failures.
    pub failed: u64,
    /// The sweep did not run because another node holds the lock.
    pub skipped: bool,
}

/// Periodic sweep removing expired tickets from a registry.
pub struct TicketRegistryCleaner {
    registry: Arc<dyn TicketRegistry>,
    locking: Arc<dyn LockingStrategy>,
}

impl TicketRegistryCleaner {
    /// Creates a cleaner without cluster locking.
    #[must_use]
    pub fn new(registry: Arc<dyn TicketRegistry>) -> Self {
        Self {
            registry,
            locking: Arc::new(NoOpLockingStrategy),
        }
    }

    #[must_use]
    pub fn with_locking_strategy(mut self, locking: Arc<dyn LockingStrategy>) -> Self {
        self.locking = locking;
        self
    }

    /// Runs one sweep against the current time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock cannot be queried.
    pub async fn clean(&self) -> TicketResult<CleanupReport> {
        self.clean_at(OffsetDateTime::now_utc()).await
    }

    /// Runs one sweep treating `now` as the current time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock cannot be queried.
    #[instrument(skip(self))]
    pub async fn clean_at(&self, now: OffsetDateTime) -> TicketResult<CleanupReport> {
        if !self.locking.acquire().await? {
            debug!("Cleaner lock held by another node, skipping sweep");
            return Ok(CleanupReport {
                skipped: true,
                ..CleanupReport::default()
            });
        }

        let report = self.sweep(now).await;

        if let Err(e) = self.locking.release().await {
            warn!(error = %e, "Failed to release cleaner lock");
        }

        if report.expired > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                deleted = report.deleted,
                failed = report.failed,
                "Ticket registry sweep finished"
            );
        }
        Ok(report)
    }

    async fn sweep(&self, now: OffsetDateTime) -> CleanupReport {
        let mut report = CleanupReport::default();

        // Collect first so deletes do not run against an open enumeration.
        let mut expired: Vec<AnyTicket> = Vec::new();
        let mut tickets = self.registry.get_tickets();
        while let Some(ticket) = tickets.next().await {
            report.scanned += 1;
            match ticket {
                Ok(ticket) if ticket.is_expired_at(now) => expired.push(ticket),
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "Failed to read ticket during sweep");
                }
            }
        }
        drop(tickets);

        report.expired = expired.len() as u64;
        for ticket in expired {
            for child_id in ticket.child_ticket_ids() {
                if let Err(e) = self.registry.delete_ticket(&child_id).await {
                    report.failed += 1;
                    warn!(error = %e, kind = %ticket.kind(), "Failed to delete child ticket of expired ticket");
                }
            }

            match self.registry.delete_single_ticket(ticket.id()).await {
                Ok(true) => {
                    report.deleted += 1;
                    debug!(ticket_id = %ticket.id(), "Deleted expired ticket");
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, kind = %ticket.kind(), "Failed to delete expired ticket");
                }
            }
        }

        report
    }

    /// Starts sweeping in a background task: first after `start_delay`, then
    /// every `repeat_interval`.
    #[must_use]
    pub fn start(self: Arc<Self>, start_delay: Duration, repeat_interval: Duration) -> CleanerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(
                start_delay_ms = start_delay.as_millis() as u64,
                repeat_interval_ms = repeat_interval.as_millis() as u64,
                "Ticket registry cleaner started"
            );

            tokio::select! {
                _ = tokio::time::sleep(start_delay) => {}
                _ = shutdown_rx.changed() => {
                    info!("Ticket registry cleaner stopped");
                    return;
                }
            }

            let mut ticker = tokio::time::interval(repeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.clean().await {
                            warn!(error = %e, "Ticket registry sweep failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        // A dropped handle stops the cleaner too.
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Ticket registry cleaner stopped");
                            break;
                        }
                    }
                }
            }
        });

        CleanerHandle { shutdown_tx, task }
    }
}

/// Handle to a running cleaner task.
pub struct CleanerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanerHandle {
    /// Stops the cleaner and waits for the running sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

//! Process assembly: builds the registry stack from configuration and owns
//! the background tasks.

use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use sso_ticket::{
    CleanerHandle, InMemoryTicketRegistry, LockingStrategy, NoOpLockingStrategy,
    PublisherIdentifier, ReloadableTicketFactory, ReplicatedTicketRegistry, ReplicationConsumer,
    ReplicationHandle, TicketRegistry, TicketRegistryCleaner, TicketingService, codec_from_config,
};
use sso_ticket_postgres::{PostgresLockingStrategy, PostgresTicketRegistry, create_pool, migrations};
use sso_ticket_redis::{RedisBusConfig, RedisMessageBus};
use tracing::info;

use crate::admin::{AdminState, build_admin_router};
use crate::config::{AppConfig, RegistryBackend};

/// Lock name shared by every node sweeping the same database.
pub const CLEANER_LOCK_NAME: &str = "sso-ticket-cleaner";

pub struct TicketServer {
    config: Arc<ArcSwap<AppConfig>>,
    factory: ReloadableTicketFactory,
    registry: Arc<dyn TicketRegistry>,
    ticketing: Arc<TicketingService>,
    cleaner: Option<CleanerHandle>,
    replication: Option<ReplicationHandle>,
}

impl TicketServer {
    /// Connects the configured backend and starts the cleaner and, when
    /// enabled, the replication consumer.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let node_id = config.node_id();
        let codec = codec_from_config(&config.tickets.crypto)
            .context("ticket payload codec")?;

        let (local, locking): (Arc<dyn TicketRegistry>, Arc<dyn LockingStrategy>) =
            match config.registry.backend {
                RegistryBackend::Memory => (
                    Arc::new(InMemoryTicketRegistry::with_codec(codec)),
                    Arc::new(NoOpLockingStrategy),
                ),
                RegistryBackend::Postgres => {
                    let pool = create_pool(&config.postgres)
                        .await
                        .context("PostgreSQL connection")?;
                    if config.postgres.run_migrations {
                        migrations::run(&pool).await.context("PostgreSQL migrations")?;
                    }
                    let registry = PostgresTicketRegistry::new(pool.clone())
                        .with_codec(codec)
                        .with_operation_timeout(config.registry.operation_timeout);
                    let lock = PostgresLockingStrategy::new(pool, CLEANER_LOCK_NAME, &node_id);
                    (Arc::new(registry), Arc::new(lock))
                }
            };

        let (registry, replication): (Arc<dyn TicketRegistry>, _) = if config.replication.enabled {
            let bus = Arc::new(
                RedisMessageBus::new(&RedisBusConfig {
                    url: config.replication.redis_url.clone(),
                    channel: config.replication.channel.clone(),
                    timeout: config.registry.operation_timeout,
                    ..RedisBusConfig::default()
                })
                .context("Redis replication bus")?,
            );
            let publisher = PublisherIdentifier::new(&node_id);
            let handle = ReplicationConsumer::new(local.clone(), bus.clone(), publisher.clone())
                .start()
                .await
                .context("replication subscription")?;
            info!(
                node_id = %node_id,
                channel = %config.replication.channel,
                "Registry replication enabled"
            );
            (
                Arc::new(ReplicatedTicketRegistry::new(local, bus, publisher)),
                Some(handle),
            )
        } else {
            (local, None)
        };

        let cleaner = config.tickets.cleaner.enabled.then(|| {
            Arc::new(
                TicketRegistryCleaner::new(registry.clone()).with_locking_strategy(locking),
            )
            .start(
                config.tickets.cleaner.start_delay,
                config.tickets.cleaner.repeat_interval,
            )
        });

        let factory =
            ReloadableTicketFactory::from_config(&config.tickets).context("ticket factory")?;
        let ticketing = Arc::new(TicketingService::new(
            registry.clone(),
            Arc::new(factory.clone()),
        ));

        info!(
            backend = ?config.registry.backend,
            node_id = %node_id,
            cleaner = cleaner.is_some(),
            "Ticket registry ready"
        );

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            factory,
            registry,
            ticketing,
            cleaner,
            replication,
        })
    }

    pub fn ticketing(&self) -> Arc<TicketingService> {
        self.ticketing.clone()
    }

    pub fn registry(&self) -> Arc<dyn TicketRegistry> {
        self.registry.clone()
    }

    /// Factory that configuration reloads are applied to.
    pub fn factory(&self) -> ReloadableTicketFactory {
        self.factory.clone()
    }

    /// Configuration currently in effect, swapped on reload.
    pub fn shared_config(&self) -> Arc<ArcSwap<AppConfig>> {
        self.config.clone()
    }

    /// Serves the admin router, if enabled, until Ctrl+C, then stops the
    /// background tasks.
    pub async fn run(self) -> anyhow::Result<()> {
        let admin_addr = self.config.load().admin_addr();
        match admin_addr {
            Some(addr) => {
                let app = build_admin_router(AdminState {
                    registry: self.registry.clone(),
                });
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("bind admin listener on {addr}"))?;
                info!("admin listening on {}", addr);
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal())
                    .await?;
            }
            None => shutdown_signal().await,
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stops the cleaner and the replication consumer.
    pub async fn shutdown(self) {
        if let Some(cleaner) = self.cleaner {
            cleaner.shutdown().await;
        }
        if let Some(replication) = self.replication {
            replication.shutdown().await;
        }
        info!("Ticket server stopped");
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

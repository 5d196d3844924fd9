//! Redis Pub/Sub transport for ticket registry replication.
//!
//! [`RedisMessageBus`] implements [`sso_ticket::TicketMessageBus`] over a
//! single Redis channel. Publishing goes through a pooled connection;
//! every subscription opens its own dedicated Pub/Sub connection.
//!
//! ```ignore
//! use std::sync::Arc;
//! use sso_ticket::{InMemoryTicketRegistry, PublisherIdentifier, ReplicatedTicketRegistry};
//! use sso_ticket_redis::{RedisBusConfig, RedisMessageBus};
//!
//! let bus = Arc::new(RedisMessageBus::new(&RedisBusConfig::default())?);
//! let local = Arc::new(InMemoryTicketRegistry::new());
//! let registry = ReplicatedTicketRegistry::new(local, bus, PublisherIdentifier::new("cas-node-1"));
//! ```

pub mod bus;
pub mod config;
pub mod error;

pub use bus::RedisMessageBus;
pub use config::RedisBusConfig;
pub use error::{RedisBusError, Result};

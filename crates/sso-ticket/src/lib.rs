//! # sso-ticket
//!
//! Ticketing core of the single sign-on server.
//!
//! This crate provides:
//! - The ticket hierarchy: ticket-granting, service, proxy-granting and proxy tickets
//! - Expiration policies and ticket id generation
//! - A configurable, hot-reloadable ticket factory
//! - The ticket registry contract with an in-memory backend
//! - A scheduled cleaner for expired tickets
//! - Command-based replication for per-node registries
//!
//! ## Overview
//!
//! A login creates a ticket-granting ticket (the SSO session). Requests for a
//! service against that session produce single-use service tickets, which the
//! service validates to obtain the chained authentication. Services allowed to
//! proxy obtain proxy-granting tickets and, from them, proxy tickets. The
//! [`TicketingService`] drives these flows over any [`TicketRegistry`].
//!
//! ## Modules
//!
//! - [`ticket`] - Ticket types and their shared state
//! - [`expiration`] - Expiration policies
//! - [`id`] - Unique ticket id generation
//! - [`factory`] - Ticket construction
//! - [`registry`] - Registry contract and in-memory backend
//! - [`codec`] - Stored payload encoding and encryption
//! - [`cleaner`] - Expired ticket eviction
//! - [`replication`] - Cross-node registry replication
//! - [`ticketing`] - Grant, validate, proxy and logout flows
//! - [`config`] - Ticketing configuration

pub mod authentication;
pub mod cleaner;
pub mod codec;
pub mod config;
pub mod error;
pub mod expiration;
pub mod factory;
pub mod id;
pub mod registry;
pub mod replication;
pub mod ticket;
pub mod ticketing;

pub use authentication::{Authentication, Principal, REMEMBER_ME_ATTRIBUTE, Service};
pub use cleaner::{
    CleanerHandle, CleanupReport, LockingStrategy, NoOpLockingStrategy, TicketRegistryCleaner,
};
pub use codec::{
    EncodedTicket, EncryptedTicketCodec, JsonTicketCodec, TicketCodec, codec_from_config,
};
pub use config::{ConfigError, TicketConfig};
pub use error::{ErrorCategory, TicketError, TicketResult};
pub use expiration::ExpirationPolicy;
pub use factory::{DefaultTicketFactory, ReloadableTicketFactory, TicketFactory};
pub use id::{HostNameBasedUniqueTicketIdGenerator, UniqueTicketIdGenerator};
pub use registry::{InMemoryTicketRegistry, TicketRegistry, TicketRegistryExt};
pub use replication::{
    BroadcastMessageBus, ConsumeOutcome, PublisherIdentifier, ReplicatedTicketRegistry,
    ReplicationConsumer, ReplicationHandle, TicketCommand, TicketMessageBus,
};
pub use ticket::{
    AnyTicket, ProxyGrantingTicket, ProxyTicket, ServiceTicket, SessionChain, Ticket,
    TicketGrantingTicket, TicketKind, TicketState,
};
pub use ticketing::{Assertion, TicketingService};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sso_ticket::prelude::*;
/// ```
pub mod prelude {
    pub use crate::authentication::{Authentication, Principal, Service};
    pub use crate::error::{TicketError, TicketResult};
    pub use crate::expiration::ExpirationPolicy;
    pub use crate::factory::TicketFactory;
    pub use crate::registry::{TicketRegistry, TicketRegistryExt};
    pub use crate::ticket::{
        AnyTicket, ProxyGrantingTicket, ProxyTicket, ServiceTicket, Ticket, TicketGrantingTicket,
    };
    pub use crate::ticketing::TicketingService;
}

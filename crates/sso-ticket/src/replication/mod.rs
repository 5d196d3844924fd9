//! Cross-node replication for registries that are not natively shared.
//!
//! Each node keeps its own registry (usually [`InMemoryTicketRegistry`](crate::InMemoryTicketRegistry))
//! and wraps it in a [`ReplicatedTicketRegistry`], which publishes every
//! mutation as a [`TicketCommand`] on a [`TicketMessageBus`]. A
//! [`ReplicationConsumer`] on every node applies the commands of the other
//! nodes to its local registry.
//!
//! ```text
//! node A: add_ticket(TGT-1) ─► local registry A
//!                          └─► bus: {publisherId: A, commandType: Add, ...}
//!                                   │
//! node B: ReplicationConsumer ◄─────┘ ─► local registry B
//! node A: ReplicationConsumer ◄───────── skipped (own publisher id)
//! ```
//!
//! The cluster is eventually consistent: a node may briefly serve a ticket
//! that another node already deleted. Callers treat "not found" and
//! "expired" as the same outcome.

mod bus;
mod command;
mod consumer;
mod registry;

pub use bus::{BroadcastMessageBus, TicketMessageBus};
pub use command::{CommandType, PublisherIdentifier, TicketCommand};
pub use consumer::{ConsumeOutcome, ReplicationConsumer, ReplicationHandle};
pub use registry::ReplicatedTicketRegistry;

//! Ticket hierarchy.
//!
//! Every ticket owns a [`TicketState`] with its id, usage counters and
//! [`ExpirationPolicy`]. Kind-specific data lives in the concrete types:
//!
//! - [`TicketGrantingTicket`] (`TGT`): an SSO session
//! - [`ServiceTicket`] (`ST`): a single-service grant against a TGT
//! - [`ProxyGrantingTicket`] (`PGT`): a TGT obtained through proxy callback
//! - [`ProxyTicket`] (`PT`): a service ticket granted by a PGT
//!
//! [`AnyTicket`] is the tagged union stored by registries and carried by
//! replication commands.

mod granting;
mod service;

pub use granting::{ProxyGrantingTicket, SessionChain, TicketGrantingTicket};
pub use service::{ProxyTicket, ServiceTicket};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::expiration::ExpirationPolicy;

/// Prefix of proxy-granting ticket IOUs.
pub const PROXY_GRANTING_TICKET_IOU_PREFIX: &str = "PGTIOU";

/// Prefix of UMA permission tickets, a sibling kind sharing the id format.
pub const PERMISSION_TICKET_PREFIX: &str = "UMAP";

// =============================================================================
// Ticket Kind
// =============================================================================

/// Discriminator of the ticket hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    #[serde(rename = "TGT")]
    TicketGranting,
    #[serde(rename = "ST")]
    Service,
    #[serde(rename = "PGT")]
    ProxyGranting,
    #[serde(rename = "PT")]
    Proxy,
}

impl TicketKind {
    /// All kinds, in registry enumeration order.
    pub const ALL: [TicketKind; 4] = [
        TicketKind::TicketGranting,
        TicketKind::Service,
        TicketKind::ProxyGranting,
        TicketKind::Proxy,
    ];

    /// Id prefix of this kind.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => "TGT",
            Self::Service => "ST",
            Self::ProxyGranting => "PGT",
            Self::Proxy => "PT",
        }
    }

    /// Parses a kind from its prefix.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }

    /// Infers the kind of a ticket id from its prefix.
    #[must_use]
    pub fn from_ticket_id(id: &str) -> Option<Self> {
        let (prefix, _) = id.split_once('-')?;
        Self::from_prefix(prefix)
    }

    /// Returns `true` for kinds that own child tickets.
    #[must_use]
    pub fn is_granting(self) -> bool {
        matches!(self, Self::TicketGranting | Self::ProxyGranting)
    }
}

impl std::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

// =============================================================================
// Ticket State
// =============================================================================

/// Fields shared by every ticket kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketState {
    /// Globally unique id, starts with the kind prefix and `-`.
    pub id: String,

    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub last_time_used: OffsetDateTime,

    /// Value of `last_time_used` before the most recent use.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub previous_time_used: Option<OffsetDateTime>,

    pub count_of_uses: u32,

    pub expiration_policy: ExpirationPolicy,

    /// Force-expired flag set by logout. Never cleared.
    #[serde(default)]
    pub expired: bool,
}

impl TicketState {
    /// Creates state for a ticket created now.
    #[must_use]
    pub fn new(id: impl Into<String>, expiration_policy: ExpirationPolicy) -> Self {
        Self::new_at(id, expiration_policy, OffsetDateTime::now_utc())
    }

    /// Creates state for a ticket created at `creation_time`.
    #[must_use]
    pub fn new_at(
        id: impl Into<String>,
        expiration_policy: ExpirationPolicy,
        creation_time: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            creation_time,
            last_time_used: creation_time,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            expired: false,
        }
    }

    /// Force-expired flag first, then the policy.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expired || self.expiration_policy.is_expired_at(Some(self), now)
    }

    pub fn increment_count_of_uses(&mut self) {
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    pub fn update_last_time_used(&mut self) {
        self.update_last_time_used_at(OffsetDateTime::now_utc());
    }

    pub fn update_last_time_used_at(&mut self, now: OffsetDateTime) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
    }
}

// =============================================================================
// Ticket Trait
// =============================================================================

/// Behaviour common to every ticket kind.
pub trait Ticket {
    /// Shared ticket fields.
    fn state(&self) -> &TicketState;

    /// Mutable access to shared ticket fields.
    fn state_mut(&mut self) -> &mut TicketState;

    /// Kind of this ticket.
    fn kind(&self) -> TicketKind;

    fn id(&self) -> &str {
        &self.state().id
    }

    fn prefix(&self) -> &'static str {
        self.kind().prefix()
    }

    fn creation_time(&self) -> OffsetDateTime {
        self.state().creation_time
    }

    fn count_of_uses(&self) -> u32 {
        self.state().count_of_uses
    }

    /// Returns `true` if the ticket is expired now. Side-effect free.
    fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Returns `true` if the ticket is expired as of `now`.
    fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.state().is_expired_at(now)
    }

    /// Counts one use. Call exactly once per logical use; use-count policies
    /// expire tickets early when this is called twice.
    fn increment_count_of_uses(&mut self) {
        self.state_mut().increment_count_of_uses();
    }

    /// Shifts `last_time_used` into `previous_time_used` and stamps now.
    fn update_last_time_used(&mut self) {
        self.state_mut().update_last_time_used();
    }

    /// Records one use: timestamp update followed by the use count.
    fn record_use(&mut self) {
        self.update_last_time_used();
        self.increment_count_of_uses();
    }

    /// Expires the ticket regardless of its policy. Irreversible.
    fn mark_ticket_expired(&mut self) {
        self.state_mut().expired = true;
    }
}

// =============================================================================
// Any Ticket
// =============================================================================

/// Tagged union of all ticket kinds, as stored and replicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AnyTicket {
    #[serde(rename = "TGT")]
    TicketGranting(TicketGrantingTicket),
    #[serde(rename = "ST")]
    Service(ServiceTicket),
    #[serde(rename = "PGT")]
    ProxyGranting(ProxyGrantingTicket),
    #[serde(rename = "PT")]
    Proxy(ProxyTicket),
}

impl AnyTicket {
    /// Borrows the ticket as a granting ticket (TGT or PGT).
    #[must_use]
    pub fn as_ticket_granting(&self) -> Option<&TicketGrantingTicket> {
        match self {
            Self::TicketGranting(t) => Some(t),
            Self::ProxyGranting(t) => Some(&**t),
            _ => None,
        }
    }

    /// Mutable counterpart of [`as_ticket_granting`](Self::as_ticket_granting).
    pub fn as_ticket_granting_mut(&mut self) -> Option<&mut TicketGrantingTicket> {
        match self {
            Self::TicketGranting(t) => Some(t),
            Self::ProxyGranting(t) => Some(&mut **t),
            _ => None,
        }
    }

    /// Borrows the ticket as a service ticket (ST or PT).
    #[must_use]
    pub fn as_service(&self) -> Option<&ServiceTicket> {
        match self {
            Self::Service(t) => Some(t),
            Self::Proxy(t) => Some(&**t),
            _ => None,
        }
    }

    /// Mutable counterpart of [`as_service`](Self::as_service).
    pub fn as_service_mut(&mut self) -> Option<&mut ServiceTicket> {
        match self {
            Self::Service(t) => Some(t),
            Self::Proxy(t) => Some(&mut **t),
            _ => None,
        }
    }

    /// Ids of tickets owned by this one: granted service tickets and
    /// proxy-granting tickets.
    #[must_use]
    pub fn child_ticket_ids(&self) -> Vec<String> {
        match self.as_ticket_granting() {
            Some(tgt) => tgt
                .services()
                .keys()
                .chain(tgt.proxy_granting_tickets().keys())
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns `true` if both values describe the same issued ticket, possibly
    /// at different usage states.
    #[must_use]
    pub fn is_same_logical_ticket(&self, other: &AnyTicket) -> bool {
        self.id() == other.id()
            && self.kind() == other.kind()
            && self.creation_time() == other.creation_time()
    }
}

impl Ticket for AnyTicket {
    fn state(&self) -> &TicketState {
        match self {
            Self::TicketGranting(t) => t.state(),
            Self::Service(t) => t.state(),
            Self::ProxyGranting(t) => t.state(),
            Self::Proxy(t) => t.state(),
        }
    }

    fn state_mut(&mut self) -> &mut TicketState {
        match self {
            Self::TicketGranting(t) => t.state_mut(),
            Self::Service(t) => t.state_mut(),
            Self::ProxyGranting(t) => t.state_mut(),
            Self::Proxy(t) => t.state_mut(),
        }
    }

    fn kind(&self) -> TicketKind {
        match self {
            Self::TicketGranting(_) => TicketKind::TicketGranting,
            Self::Service(_) => TicketKind::Service,
            Self::ProxyGranting(_) => TicketKind::ProxyGranting,
            Self::Proxy(_) => TicketKind::Proxy,
        }
    }

    fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        match self {
            Self::TicketGranting(t) => t.is_expired_at(now),
            Self::Service(t) => t.is_expired_at(now),
            Self::ProxyGranting(t) => t.is_expired_at(now),
            Self::Proxy(t) => t.is_expired_at(now),
        }
    }
}

impl From<TicketGrantingTicket> for AnyTicket {
    fn from(ticket: TicketGrantingTicket) -> Self {
        Self::TicketGranting(ticket)
    }
}

impl From<ServiceTicket> for AnyTicket {
    fn from(ticket: ServiceTicket) -> Self {
        Self::Service(ticket)
    }
}

impl From<ProxyGrantingTicket> for AnyTicket {
    fn from(ticket: ProxyGrantingTicket) -> Self {
        Self::ProxyGranting(ticket)
    }
}

impl From<ProxyTicket> for AnyTicket {
    fn from(ticket: ProxyTicket) -> Self {
        Self::Proxy(ticket)
    }
}

// Typed lookups follow is-a semantics: a PGT is a TGT, a PT is an ST.

impl TryFrom<AnyTicket> for TicketGrantingTicket {
    type Error = AnyTicket;

    fn try_from(ticket: AnyTicket) -> Result<Self, Self::Error> {
        match ticket {
            AnyTicket::TicketGranting(t) => Ok(t),
            AnyTicket::ProxyGranting(t) => Ok(t.into_ticket_granting_ticket()),
            other => Err(other),
        }
    }
}

impl TryFrom<AnyTicket> for ServiceTicket {
    type Error = AnyTicket;

    fn try_from(ticket: AnyTicket) -> Result<Self, Self::Error> {
        match ticket {
            AnyTicket::Service(t) => Ok(t),
            AnyTicket::Proxy(t) => Ok(t.into_service_ticket()),
            other => Err(other),
        }
    }
}

impl TryFrom<AnyTicket> for ProxyGrantingTicket {
    type Error = AnyTicket;

    fn try_from(ticket: AnyTicket) -> Result<Self, Self::Error> {
        match ticket {
            AnyTicket::ProxyGranting(t) => Ok(t),
            other => Err(other),
        }
    }
}

impl TryFrom<AnyTicket> for ProxyTicket {
    type Error = AnyTicket;

    fn try_from(ticket: AnyTicket) -> Result<Self, Self::Error> {
        match ticket {
            AnyTicket::Proxy(t) => Ok(t),
            other => Err(other),
        }
    }
}

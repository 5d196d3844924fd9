//! Ticket construction.
//!
//! The factory is the only place that creates tickets. It wires each ticket
//! kind to its id generator and expiration policy.
//!
//! # Example
//!
//! ```ignore
//! use sso_ticket::{DefaultTicketFactory, TicketConfig, TicketFactory};
//!
//! let factory = DefaultTicketFactory::from_config(&TicketConfig::default())?;
//! let mut tgt = factory.create_ticket_granting_ticket(authentication);
//! let st = factory.create_service_ticket(&mut tgt, &service, true)?;
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::authentication::{Authentication, Service};
use crate::config::TicketConfig;
use crate::error::{TicketError, TicketResult};
use crate::expiration::ExpirationPolicy;
use crate::id::{HostNameBasedUniqueTicketIdGenerator, UniqueTicketIdGenerator, local_hostname};
use crate::ticket::{
    PROXY_GRANTING_TICKET_IOU_PREFIX, ProxyGrantingTicket, ProxyTicket, ServiceTicket, Ticket,
    TicketGrantingTicket, TicketKind,
};

/// Creates well-formed tickets of every kind.
pub trait TicketFactory: Send + Sync {
    /// Creates a session for a successful authentication.
    fn create_ticket_granting_ticket(&self, authentication: Authentication) -> TicketGrantingTicket;

    /// Grants a service ticket from `tgt` and records it in the session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if `tgt` is expired.
    fn create_service_ticket(
        &self,
        tgt: &mut TicketGrantingTicket,
        service: &Service,
        credentials_provided: bool,
    ) -> TicketResult<ServiceTicket>;

    /// Issues a proxy-granting ticket from a validated service ticket.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the service ticket already granted a PGT
    /// or `parent` is not its granting ticket.
    fn create_proxy_granting_ticket(
        &self,
        service_ticket: &mut ServiceTicket,
        parent: &mut TicketGrantingTicket,
        authentication: Authentication,
    ) -> TicketResult<ProxyGrantingTicket>;

    /// Grants a proxy ticket from `pgt`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if `pgt` is expired.
    fn create_proxy_ticket(
        &self,
        pgt: &mut ProxyGrantingTicket,
        service: &Service,
    ) -> TicketResult<ProxyTicket>;
}

// =============================================================================
// Default Factory
// =============================================================================

/// Factory backed by per-kind id generators and policies.
pub struct DefaultTicketFactory {
    tgt_ids: Arc<dyn UniqueTicketIdGenerator>,
    st_ids: Arc<dyn UniqueTicketIdGenerator>,
    pt_ids: Arc<dyn UniqueTicketIdGenerator>,
    pgt_ids: Arc<dyn UniqueTicketIdGenerator>,
    tgt_policy: ExpirationPolicy,
    st_policy: ExpirationPolicy,
    pt_policy: ExpirationPolicy,
    only_track_most_recent_session: bool,
}

impl std::fmt::Debug for DefaultTicketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultTicketFactory")
            .field("tgt_policy", &self.tgt_policy)
            .field("st_policy", &self.st_policy)
            .field("pt_policy", &self.pt_policy)
            .field("only_track_most_recent_session", &self.only_track_most_recent_session)
            .finish_non_exhaustive()
    }
}

impl DefaultTicketFactory {
    /// Builds a factory from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration does not validate.
    pub fn from_config(config: &TicketConfig) -> TicketResult<Self> {
        config.validate()?;

        let suffix = config.host.name.clone().unwrap_or_else(local_hostname);
        let generator = |len: usize| -> Arc<dyn UniqueTicketIdGenerator> {
            Arc::new(HostNameBasedUniqueTicketIdGenerator::new(len, Some(&suffix)))
        };

        Ok(Self {
            tgt_ids: generator(config.tgt.max_length),
            st_ids: generator(config.st.max_length),
            pt_ids: generator(config.pt.max_length),
            pgt_ids: generator(config.pgt.max_length),
            tgt_policy: config.ticket_granting_ticket_policy(),
            st_policy: config.service_ticket_policy(),
            pt_policy: config.proxy_ticket_policy(),
            only_track_most_recent_session: config.tgt.only_track_most_recent_session,
        })
    }

    /// Replaces the id generator used for every ticket kind.
    #[must_use]
    pub fn with_id_generator(mut self, generator: Arc<dyn UniqueTicketIdGenerator>) -> Self {
        self.tgt_ids = Arc::clone(&generator);
        self.st_ids = Arc::clone(&generator);
        self.pt_ids = Arc::clone(&generator);
        self.pgt_ids = generator;
        self
    }

    /// Policy template for new sessions.
    #[must_use]
    pub fn ticket_granting_ticket_policy(&self) -> &ExpirationPolicy {
        &self.tgt_policy
    }

    #[must_use]
    pub fn service_ticket_policy(&self) -> &ExpirationPolicy {
        &self.st_policy
    }
}

impl TicketFactory for DefaultTicketFactory {
    fn create_ticket_granting_ticket(&self, authentication: Authentication) -> TicketGrantingTicket {
        let id = self.tgt_ids.new_ticket_id(TicketKind::TicketGranting.prefix());
        let policy = self.tgt_policy.for_authentication(&authentication);
        tracing::debug!(ticket_id = %id, policy = policy.name(), "Created ticket-granting ticket");
        TicketGrantingTicket::new(id, authentication, policy)
    }

    fn create_service_ticket(
        &self,
        tgt: &mut TicketGrantingTicket,
        service: &Service,
        credentials_provided: bool,
    ) -> TicketResult<ServiceTicket> {
        let id = self.st_ids.new_ticket_id(TicketKind::Service.prefix());
        tgt.grant_service_ticket(
            id,
            service.clone(),
            self.st_policy.clone(),
            credentials_provided,
            self.only_track_most_recent_session,
        )
        .ok_or_else(|| TicketError::invalid_ticket(tgt.id()))
    }

    fn create_proxy_granting_ticket(
        &self,
        service_ticket: &mut ServiceTicket,
        parent: &mut TicketGrantingTicket,
        authentication: Authentication,
    ) -> TicketResult<ProxyGrantingTicket> {
        let id = self.pgt_ids.new_ticket_id(TicketKind::ProxyGranting.prefix());
        let iou = self.pgt_ids.new_ticket_id(PROXY_GRANTING_TICKET_IOU_PREFIX);
        // Proxy sessions inherit the parent session's policy.
        let policy = self.tgt_policy.for_authentication(&authentication);
        service_ticket.grant_proxy_granting_ticket(id, iou, authentication, policy, parent)
    }

    fn create_proxy_ticket(
        &self,
        pgt: &mut ProxyGrantingTicket,
        service: &Service,
    ) -> TicketResult<ProxyTicket> {
        let id = self.pt_ids.new_ticket_id(TicketKind::Proxy.prefix());
        pgt.grant_proxy_ticket(
            id,
            service.clone(),
            self.pt_policy.clone(),
            self.only_track_most_recent_session,
        )
        .ok_or_else(|| TicketError::invalid_ticket(pgt.id()))
    }
}

// =============================================================================
// Reloadable Factory
// =============================================================================

/// Factory whose configuration can be swapped at runtime.
///
/// Each call takes a lock-free snapshot of the current factory, so a reload
/// never affects a ticket that is being built.
#[derive(Clone)]
pub struct ReloadableTicketFactory {
    inner: Arc<ArcSwap<DefaultTicketFactory>>,
}

impl ReloadableTicketFactory {
    #[must_use]
    pub fn new(factory: DefaultTicketFactory) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(factory)),
        }
    }

    /// Builds the initial factory from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration does not validate.
    pub fn from_config(config: &TicketConfig) -> TicketResult<Self> {
        Ok(Self::new(DefaultTicketFactory::from_config(config)?))
    }

    /// Current factory snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<DefaultTicketFactory> {
        self.inner.load_full()
    }

    /// Rebuilds the factory from `config` and swaps it in.
    ///
    /// On error the previous factory stays active.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the new configuration does not validate.
    pub fn reload(&self, config: &TicketConfig) -> TicketResult<()> {
        let factory = DefaultTicketFactory::from_config(config)?;
        self.inner.store(Arc::new(factory));
        tracing::info!("Ticket factory configuration reloaded");
        Ok(())
    }
}

impl TicketFactory for ReloadableTicketFactory {
    fn create_ticket_granting_ticket(&self, authentication: Authentication) -> TicketGrantingTicket {
        self.current().create_ticket_granting_ticket(authentication)
    }

    fn create_service_ticket(
        &self,
        tgt: &mut TicketGrantingTicket,
        service: &Service,
        credentials_provided: bool,
    ) -> TicketResult<ServiceTicket> {
        self.current()
            .create_service_ticket(tgt, service, credentials_provided)
    }

    fn create_proxy_granting_ticket(
        &self,
        service_ticket: &mut ServiceTicket,
        parent: &mut TicketGrantingTicket,
        authentication: Authentication,
    ) -> TicketResult<ProxyGrantingTicket> {
        self.current()
            .create_proxy_granting_ticket(service_ticket, parent, authentication)
    }

    fn create_proxy_ticket(
        &self,
        pgt: &mut ProxyGrantingTicket,
        service: &Service,
    ) -> TicketResult<ProxyTicket> {
        self.current().create_proxy_ticket(pgt, service)
    }
}

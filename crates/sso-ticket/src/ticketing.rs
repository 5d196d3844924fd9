//! Ticket lifecycle orchestration.
//!
//! [`TicketingService`] combines a [`TicketFactory`] and a [`TicketRegistry`]
//! into the flows a protocol layer needs: login, service ticket grant,
//! validation, proxy granting and logout.
//!
//! Flows read a ticket, mutate the copy and write it back. No lock is held
//! across registry calls, so a slow backend read only delays the request
//! that issued it. Concurrent writers to one ticket are last-writer-wins at
//! the registry, on one node as across nodes.
//!
//! A proxied session is only as alive as its ancestors. Its parents are
//! resolved from the registry into a [`SessionChain`] whenever the session
//! is used.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::authentication::{Authentication, Service};
use crate::error::{TicketError, TicketResult};
use crate::factory::TicketFactory;
use crate::registry::TicketRegistry;
use crate::ticket::{
    AnyTicket, ProxyGrantingTicket, ProxyTicket, ServiceTicket, SessionChain, Ticket,
    TicketGrantingTicket,
};

/// Outcome of a successful service ticket validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    /// Service the ticket was validated for.
    pub service: Service,

    /// Authentication of the root session.
    pub primary_authentication: Authentication,

    /// Every authentication from the granting session up to the root,
    /// leaf first.
    pub chained_authentications: Vec<Authentication>,

    pub from_new_login: bool,

    /// Services that proxied on the way to this ticket, innermost first.
    /// Empty for tickets granted directly from a login session.
    pub proxied_by: Vec<Service>,
}

impl Assertion {
    /// Returns `true` if the ticket was obtained through proxy authentication.
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        !self.proxied_by.is_empty()
    }
}

/// Login, grant, validate and logout flows over a registry.
pub struct TicketingService {
    registry: Arc<dyn TicketRegistry>,
    factory: Arc<dyn TicketFactory>,
}

impl TicketingService {
    #[must_use]
    pub fn new(registry: Arc<dyn TicketRegistry>, factory: Arc<dyn TicketFactory>) -> Self {
        Self { registry, factory }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    /// Resolves the ancestors of `leaf` from the registry.
    ///
    /// Returns `None` if an ancestor is no longer stored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if the stored parents form a loop.
    pub async fn session_chain(
        &self,
        leaf: TicketGrantingTicket,
    ) -> TicketResult<Option<SessionChain>> {
        let mut chain = SessionChain::new(leaf);
        while let Some(parent_id) = chain.next_parent_id().map(str::to_owned) {
            let Some(parent) = self
                .registry
                .get_ticket(&parent_id)
                .await?
                .and_then(|t| TicketGrantingTicket::try_from(t).ok())
            else {
                debug!(parent = %parent_id, "Parent session cannot be found in the registry");
                return Ok(None);
            };
            chain.push_parent(parent)?;
        }
        Ok(Some(chain))
    }

    /// Returns `true` if `session`, or any session it was proxied from, is
    /// expired or gone.
    async fn is_session_expired(&self, session: &TicketGrantingTicket) -> TicketResult<bool> {
        if session.is_expired() {
            return Ok(true);
        }
        if session.is_root() {
            return Ok(false);
        }
        Ok(self
            .session_chain(session.clone())
            .await?
            .is_none_or(|chain| chain.is_expired()))
    }

    /// Deletes an expired ticket found on a request path and reports it as
    /// invalid.
    async fn reject_expired(&self, ticket: &AnyTicket) -> TicketError {
        debug!(ticket_id = %ticket.id(), "Ticket has expired, removing it from the registry");
        if let Err(e) = self.registry.delete_ticket(ticket.id()).await {
            tracing::warn!(error = %e, ticket_id = %ticket.id(), "Failed to remove expired ticket");
        }
        TicketError::invalid_ticket(ticket.id())
    }

    /// Starts an SSO session.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the new ticket.
    #[instrument(level = "debug", skip_all)]
    pub async fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> TicketResult<TicketGrantingTicket> {
        let tgt = self.factory.create_ticket_granting_ticket(authentication);
        self.registry.add_ticket(&tgt.clone().into()).await?;
        info!(
            principal = %tgt.authentication.principal.id,
            "Created ticket-granting ticket"
        );
        Ok(tgt)
    }

    /// Grants a service ticket against an existing session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if the session does not exist or has expired.
    #[instrument(level = "debug", skip(self, service), fields(service = %service))]
    pub async fn grant_service_ticket(
        &self,
        ticket_granting_ticket_id: &str,
        service: &Service,
        credentials_provided: bool,
    ) -> TicketResult<ServiceTicket> {
        let mut ticket = self
            .registry
            .get_ticket(ticket_granting_ticket_id)
            .await?
            .filter(|t| matches!(t, AnyTicket::TicketGranting(_)))
            .ok_or_else(|| TicketError::invalid_ticket(ticket_granting_ticket_id))?;

        let AnyTicket::TicketGranting(tgt) = &mut ticket else {
            return Err(TicketError::invalid_ticket(ticket_granting_ticket_id));
        };
        if self.is_session_expired(tgt).await? {
            return Err(self.reject_expired(&ticket).await);
        }
        let st = self
            .factory
            .create_service_ticket(tgt, service, credentials_provided)?;
        let principal = tgt.authentication.principal.id.clone();

        self.registry.add_ticket(&st.clone().into()).await?;
        self.registry.update_ticket(&ticket).await?;

        info!(principal = %principal, service = %service, "Granted service ticket");
        Ok(st)
    }

    /// Validates a service or proxy ticket for `service`.
    ///
    /// Every validation counts as a use. A ticket that is expired after the
    /// use is removed from the registry, even when the service does not
    /// match. A ticket whose granting session is expired or gone counts as
    /// expired.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if the ticket does not exist, the ticket or
    /// its granting session has expired, and `ServiceMismatch` if it was
    /// issued for another service.
    #[instrument(level = "debug", skip(self, service), fields(service = %service))]
    pub async fn validate_service_ticket(
        &self,
        service_ticket_id: &str,
        service: &Service,
    ) -> TicketResult<Assertion> {
        let mut ticket = self
            .registry
            .get_ticket(service_ticket_id)
            .await?
            .filter(|t| t.as_service().is_some())
            .ok_or_else(|| TicketError::invalid_ticket(service_ticket_id))?;
        if ticket.is_expired() {
            return Err(self.reject_expired(&ticket).await);
        }

        let granting_id = ticket
            .as_service()
            .map(|st| st.ticket_granting_ticket.clone())
            .ok_or_else(|| TicketError::invalid_ticket(service_ticket_id))?;
        let chain = match self
            .registry
            .get_ticket(&granting_id)
            .await?
            .and_then(|t| TicketGrantingTicket::try_from(t).ok())
        {
            Some(granting) => self.session_chain(granting).await?,
            None => None,
        };
        let Some(chain) = chain.filter(|chain| !chain.is_expired()) else {
            debug!(granting = %granting_id, "Granting session is missing or expired");
            return Err(self.reject_expired(&ticket).await);
        };

        ticket.record_use();
        if ticket.is_expired() {
            self.registry.delete_single_ticket(service_ticket_id).await?;
        } else {
            self.registry.update_ticket(&ticket).await?;
        }

        let Some(st) = ticket.as_service() else {
            return Err(TicketError::invalid_ticket(service_ticket_id));
        };
        if !st.is_valid_for(service) {
            debug!(
                ticket_service = %st.service,
                "Service ticket does not match the supplied service"
            );
            return Err(TicketError::service_mismatch(service_ticket_id, service.to_string()));
        }

        Ok(Assertion {
            service: st.service.clone(),
            primary_authentication: chain.root().authentication.clone(),
            chained_authentications: chain.authentications().into_iter().cloned().collect(),
            from_new_login: st.from_new_login,
            proxied_by: chain.proxied_by(),
        })
    }

    /// Issues a proxy-granting ticket from an unexpired service or proxy
    /// ticket. The granting ticket of `service_ticket_id` becomes the parent
    /// of the new session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if the ticket or its granting ticket is missing
    /// or expired, and `InvalidRequest` if the ticket already granted a PGT.
    #[instrument(level = "debug", skip(self, authentication))]
    pub async fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        authentication: Authentication,
    ) -> TicketResult<ProxyGrantingTicket> {
        let mut ticket = self
            .registry
            .get_ticket(service_ticket_id)
            .await?
            .filter(|t| t.as_service().is_some())
            .ok_or_else(|| TicketError::invalid_ticket(service_ticket_id))?;
        if ticket.is_expired() {
            return Err(self.reject_expired(&ticket).await);
        }
        let parent_id = ticket
            .as_service()
            .map(|st| st.ticket_granting_ticket.clone())
            .ok_or_else(|| TicketError::invalid_ticket(service_ticket_id))?;

        let mut parent = self
            .registry
            .get_ticket(&parent_id)
            .await?
            .filter(|t| t.as_ticket_granting().is_some())
            .ok_or_else(|| TicketError::invalid_ticket(&parent_id))?;
        let Some(session) = parent.as_ticket_granting() else {
            return Err(TicketError::invalid_ticket(&parent_id));
        };
        if self.is_session_expired(session).await? {
            return Err(self.reject_expired(&parent).await);
        }

        let (Some(st), Some(parent_tgt)) =
            (ticket.as_service_mut(), parent.as_ticket_granting_mut())
        else {
            return Err(TicketError::invalid_ticket(service_ticket_id));
        };
        let pgt = self
            .factory
            .create_proxy_granting_ticket(st, parent_tgt, authentication)?;

        self.registry.add_ticket(&pgt.clone().into()).await?;
        self.registry.update_ticket(&ticket).await?;
        self.registry.update_ticket(&parent).await?;

        debug!(pgt = %pgt.id(), parent = %parent_id, "Created proxy-granting ticket");
        Ok(pgt)
    }

    /// Grants a proxy ticket from a proxy-granting ticket.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if the PGT, or a session it was proxied from,
    /// does not exist or has expired.
    #[instrument(level = "debug", skip(self, service), fields(service = %service))]
    pub async fn grant_proxy_ticket(
        &self,
        proxy_granting_ticket_id: &str,
        service: &Service,
    ) -> TicketResult<ProxyTicket> {
        let mut ticket = self
            .registry
            .get_ticket(proxy_granting_ticket_id)
            .await?
            .filter(|t| matches!(t, AnyTicket::ProxyGranting(_)))
            .ok_or_else(|| TicketError::invalid_ticket(proxy_granting_ticket_id))?;

        let AnyTicket::ProxyGranting(pgt) = &mut ticket else {
            return Err(TicketError::invalid_ticket(proxy_granting_ticket_id));
        };
        if self.is_session_expired(pgt).await? {
            return Err(self.reject_expired(&ticket).await);
        }
        let pt = self.factory.create_proxy_ticket(pgt, service)?;

        self.registry.add_ticket(&pt.clone().into()).await?;
        self.registry.update_ticket(&ticket).await?;

        info!(service = %service, "Granted proxy ticket");
        Ok(pt)
    }

    /// Authentication of an active session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry fails.
    pub async fn get_authentication(
        &self,
        ticket_granting_ticket_id: &str,
    ) -> TicketResult<Option<Authentication>> {
        let Some(tgt) = self
            .registry
            .get_ticket(ticket_granting_ticket_id)
            .await?
            .and_then(|t| TicketGrantingTicket::try_from(t).ok())
        else {
            return Ok(None);
        };
        if self.is_session_expired(&tgt).await? {
            return Ok(None);
        }
        Ok(Some(tgt.authentication))
    }

    /// Ends a session and every ticket it owns.
    ///
    /// Returns the services the session granted tickets for, so the caller
    /// can notify them. An unknown session yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry fails.
    #[instrument(level = "debug", skip(self))]
    pub async fn destroy_ticket_granting_ticket(
        &self,
        ticket_granting_ticket_id: &str,
    ) -> TicketResult<BTreeMap<String, Service>> {
        let Some(ticket) = self
            .registry
            .get_ticket(ticket_granting_ticket_id)
            .await?
            .filter(|t| t.as_ticket_granting().is_some())
        else {
            debug!("Ticket-granting ticket cannot be found in the registry");
            return Ok(BTreeMap::new());
        };

        let services = ticket
            .as_ticket_granting()
            .map(|tgt| tgt.services().clone())
            .unwrap_or_default();

        self.registry.delete_ticket(ticket_granting_ticket_id).await?;
        info!(services = services.len(), "Destroyed ticket-granting ticket");
        Ok(services)
    }
}

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use super::{ProxyGrantingTicket, Ticket, TicketGrantingTicket, TicketKind, TicketState};
use crate::authentication::{Authentication, Service};
use crate::error::{TicketError, TicketResult};
use crate::expiration::ExpirationPolicy;

// =============================================================================
// Service Ticket
// =============================================================================

/// A grant for one service, issued against a ticket-granting ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTicket {
    pub state: TicketState,

    /// Service this ticket was issued for.
    pub service: Service,

    /// Id of the granting TGT (or PGT for proxy tickets).
    pub ticket_granting_ticket: String,

    /// Issued right after primary credentials were submitted.
    pub credentials_provided: bool,

    /// Issued as part of a fresh login rather than SSO reuse.
    pub from_new_login: bool,

    /// Set once a proxy-granting ticket has been issued from this ticket.
    #[serde(default)]
    pub granted_ticket_already: bool,
}

impl ServiceTicket {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        service: Service,
        ticket_granting_ticket: String,
        expiration_policy: ExpirationPolicy,
        credentials_provided: bool,
        from_new_login: bool,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration_policy),
            service,
            ticket_granting_ticket,
            credentials_provided,
            from_new_login,
            granted_ticket_already: false,
        }
    }

    /// Returns `true` if `service` may validate this ticket.
    #[must_use]
    pub fn is_valid_for(&self, service: &Service) -> bool {
        self.service.matches(service)
    }

    /// Issues a proxy-granting ticket for this ticket's service.
    ///
    /// `parent` must be the session this ticket was granted from; it records
    /// the new PGT so that destroying the session cascades to it. A service
    /// ticket grants at most one PGT.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if a PGT was already granted or `parent` is not
    /// this ticket's granting ticket.
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: impl Into<String>,
        iou: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        parent: &mut TicketGrantingTicket,
    ) -> TicketResult<ProxyGrantingTicket> {
        if self.granted_ticket_already {
            return Err(TicketError::invalid_request(format!(
                "a proxy-granting ticket was already issued for {}",
                self.id()
            )));
        }
        if parent.id() != self.ticket_granting_ticket {
            return Err(TicketError::invalid_request(format!(
                "{} was not granted by {}",
                self.id(),
                parent.id()
            )));
        }

        self.granted_ticket_already = true;

        let id = id.into();
        parent.record_proxy_granting_ticket(id.clone(), self.service.clone());
        let tgt = TicketGrantingTicket::new_proxied(
            id,
            authentication,
            expiration_policy,
            self.service.clone(),
            parent.id(),
        );

        Ok(ProxyGrantingTicket::new(tgt, iou))
    }
}

impl Ticket for ServiceTicket {
    fn state(&self) -> &TicketState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TicketState {
        &mut self.state
    }

    fn kind(&self) -> TicketKind {
        TicketKind::Service
    }
}

// =============================================================================
// Proxy Ticket
// =============================================================================

/// A service ticket granted by a proxy-granting ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyTicket(ServiceTicket);

impl ProxyTicket {
    #[must_use]
    pub fn new(ticket: ServiceTicket) -> Self {
        Self(ticket)
    }

    #[must_use]
    pub fn into_service_ticket(self) -> ServiceTicket {
        self.0
    }
}

impl Deref for ProxyTicket {
    type Target = ServiceTicket;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ProxyTicket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Ticket for ProxyTicket {
    fn state(&self) -> &TicketState {
        &self.0.state
    }

    fn state_mut(&mut self) -> &mut TicketState {
        &mut self.0.state
    }

    fn kind(&self) -> TicketKind {
        TicketKind::Proxy
    }
}

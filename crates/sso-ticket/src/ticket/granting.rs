use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{ProxyTicket, ServiceTicket, Ticket, TicketKind, TicketState};
use crate::authentication::{Authentication, Service};
use crate::error::{TicketError, TicketResult};
use crate::expiration::ExpirationPolicy;

// =============================================================================
// Ticket Granting Ticket
// =============================================================================

/// An SSO session.
///
/// A TGT without a parent is a root. TGTs created through proxy
/// authentication record the id of their parent session and the proxying
/// service in `proxied_by`. The parent itself lives in the registry; use a
/// [`SessionChain`] to judge the session together with its ancestors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketGrantingTicket {
    pub state: TicketState,

    /// Primary authentication that opened the session.
    pub authentication: Authentication,

    /// Authentications added later in the same session, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supplemental_authentications: Vec<Authentication>,

    /// Service tickets granted from this session, keyed by ticket id.
    #[serde(default)]
    services: BTreeMap<String, Service>,

    /// Proxy-granting tickets derived from this session, keyed by ticket id.
    #[serde(default)]
    proxy_granting_tickets: BTreeMap<String, Service>,

    /// Service that obtained the PGT this session was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxied_by: Option<Service>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
}

impl TicketGrantingTicket {
    /// Creates a root session.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration_policy),
            authentication,
            supplemental_authentications: Vec::new(),
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            proxied_by: None,
            parent_id: None,
        }
    }

    /// Creates a session chained under the session `parent_id`.
    #[must_use]
    pub fn new_proxied(
        id: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        proxied_by: Service,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            proxied_by: Some(proxied_by),
            parent_id: Some(parent_id.into()),
            ..Self::new(id, authentication, expiration_policy)
        }
    }

    /// Grants a service ticket for `service`.
    ///
    /// Returns `None` when this session is expired. Otherwise the grant counts
    /// as a use of the session and the new ticket is recorded in
    /// [`services`](Self::services). With `only_track_most_recent_session`,
    /// earlier entries for a matching service are replaced.
    pub fn grant_service_ticket(
        &mut self,
        id: impl Into<String>,
        service: Service,
        expiration_policy: ExpirationPolicy,
        credentials_provided: bool,
        only_track_most_recent_session: bool,
    ) -> Option<ServiceTicket> {
        if self.is_expired() {
            return None;
        }

        let from_new_login = credentials_provided || self.count_of_uses() == 0;
        self.record_use();

        let ticket = ServiceTicket::new(
            id,
            service.clone(),
            self.id().to_string(),
            expiration_policy,
            credentials_provided,
            from_new_login,
        );

        if only_track_most_recent_session {
            self.services.retain(|_, existing| !existing.matches(&service));
        }
        self.services.insert(ticket.id().to_string(), service);

        Some(ticket)
    }

    /// Service tickets granted from this session.
    #[must_use]
    pub fn services(&self) -> &BTreeMap<String, Service> {
        &self.services
    }

    /// Forgets all granted services. The service tickets themselves stay in
    /// the registry.
    pub fn remove_all_services(&mut self) {
        self.services.clear();
    }

    /// Proxy-granting tickets derived from this session.
    #[must_use]
    pub fn proxy_granting_tickets(&self) -> &BTreeMap<String, Service> {
        &self.proxy_granting_tickets
    }

    pub(crate) fn record_proxy_granting_ticket(&mut self, id: String, service: Service) {
        self.proxy_granting_tickets.insert(id, service);
    }

    pub fn add_supplemental_authentication(&mut self, authentication: Authentication) {
        self.supplemental_authentications.push(authentication);
    }

    /// Id of the session this one was proxied from.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

impl Ticket for TicketGrantingTicket {
    fn state(&self) -> &TicketState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TicketState {
        &mut self.state
    }

    fn kind(&self) -> TicketKind {
        TicketKind::TicketGranting
    }
}

// =============================================================================
// Session Chain
// =============================================================================

/// A session together with its ancestors, leaf first.
///
/// Ancestors are read from the registry as they are now, so a parent that
/// keeps being used keeps the chain alive. The chain is expired as soon as
/// any session in it is.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionChain {
    sessions: Vec<TicketGrantingTicket>,
}

impl SessionChain {
    #[must_use]
    pub fn new(leaf: TicketGrantingTicket) -> Self {
        Self {
            sessions: vec![leaf],
        }
    }

    /// Id of the next ancestor to resolve, `None` once the root is reached.
    #[must_use]
    pub fn next_parent_id(&self) -> Option<&str> {
        self.sessions.last().and_then(TicketGrantingTicket::parent_id)
    }

    /// Appends the ancestor named by [`next_parent_id`](Self::next_parent_id).
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if `parent` is not the expected ancestor or is
    /// already part of the chain.
    pub fn push_parent(&mut self, parent: TicketGrantingTicket) -> TicketResult<()> {
        if self.next_parent_id() != Some(parent.id()) {
            return Err(TicketError::invalid_ticket(parent.id()));
        }
        if self.sessions.iter().any(|s| s.id() == parent.id()) {
            return Err(TicketError::invalid_ticket(parent.id()));
        }
        self.sessions.push(parent);
        Ok(())
    }

    #[must_use]
    pub fn leaf(&self) -> &TicketGrantingTicket {
        &self.sessions[0]
    }

    #[must_use]
    pub fn root(&self) -> &TicketGrantingTicket {
        &self.sessions[self.sessions.len() - 1]
    }

    /// Sessions from the leaf up to the root.
    pub fn iter(&self) -> impl Iterator<Item = &TicketGrantingTicket> {
        self.sessions.iter()
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.sessions.iter().any(|s| s.is_expired_at(now))
    }

    /// Every authentication from the leaf up to the root.
    ///
    /// For each session the primary authentication comes before its
    /// supplemental authentications.
    #[must_use]
    pub fn authentications(&self) -> Vec<&Authentication> {
        self.sessions
            .iter()
            .flat_map(|s| std::iter::once(&s.authentication).chain(&s.supplemental_authentications))
            .collect()
    }

    /// Services that proxied along the chain, innermost first.
    #[must_use]
    pub fn proxied_by(&self) -> Vec<Service> {
        self.sessions
            .iter()
            .filter_map(|s| s.proxied_by.clone())
            .collect()
    }
}

// =============================================================================
// Proxy Granting Ticket
// =============================================================================

/// A session obtained by a proxying service.
///
/// Behaves as a [`TicketGrantingTicket`] (through `Deref`) and additionally
/// carries the IOU handed to the proxy callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyGrantingTicket {
    pub ticket_granting_ticket: TicketGrantingTicket,

    /// Correlation id for the proxy callback handshake.
    pub proxy_granting_ticket_iou: String,
}

impl ProxyGrantingTicket {
    #[must_use]
    pub fn new(ticket_granting_ticket: TicketGrantingTicket, iou: impl Into<String>) -> Self {
        Self {
            ticket_granting_ticket,
            proxy_granting_ticket_iou: iou.into(),
        }
    }

    /// Grants a proxy ticket for `service`. `None` if this PGT is expired.
    pub fn grant_proxy_ticket(
        &mut self,
        id: impl Into<String>,
        service: Service,
        expiration_policy: ExpirationPolicy,
        only_track_most_recent_session: bool,
    ) -> Option<ProxyTicket> {
        self.ticket_granting_ticket
            .grant_service_ticket(
                id,
                service,
                expiration_policy,
                false,
                only_track_most_recent_session,
            )
            .map(ProxyTicket::new)
    }

    #[must_use]
    pub fn into_ticket_granting_ticket(self) -> TicketGrantingTicket {
        self.ticket_granting_ticket
    }
}

impl Deref for ProxyGrantingTicket {
    type Target = TicketGrantingTicket;

    fn deref(&self) -> &Self::Target {
        &self.ticket_granting_ticket
    }
}

impl DerefMut for ProxyGrantingTicket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ticket_granting_ticket
    }
}

impl Ticket for ProxyGrantingTicket {
    fn state(&self) -> &TicketState {
        &self.ticket_granting_ticket.state
    }

    fn state_mut(&mut self) -> &mut TicketState {
        &mut self.ticket_granting_ticket.state
    }

    fn kind(&self) -> TicketKind {
        TicketKind::ProxyGranting
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::authentication::Principal;

    fn auth(user: &str) -> Authentication {
        Authentication::new(Principal::new(user))
    }

    fn root() -> TicketGrantingTicket {
        TicketGrantingTicket::new("TGT-1", auth("casuser"), ExpirationPolicy::NeverExpires)
    }

    fn st_policy() -> ExpirationPolicy {
        ExpirationPolicy::multi_time_use_or_timeout(1, Duration::from_secs(10))
    }

    fn proxied(id: &str, user: &str, parent_id: &str) -> TicketGrantingTicket {
        TicketGrantingTicket::new_proxied(
            id,
            auth(user),
            ExpirationPolicy::NeverExpires,
            Service::new("https://proxy"),
            parent_id,
        )
    }

    #[test]
    fn test_root_and_chain() {
        let parent = root();
        let child = proxied("TGT-2", "proxied", "TGT-1");

        assert!(parent.is_root());
        assert!(!child.is_root());
        assert_eq!(child.parent_id(), Some("TGT-1"));

        let mut chain = SessionChain::new(child);
        assert_eq!(chain.next_parent_id(), Some("TGT-1"));
        chain.push_parent(parent).unwrap();
        assert_eq!(chain.next_parent_id(), None);
        assert_eq!(chain.leaf().id(), "TGT-2");
        assert_eq!(chain.root().id(), "TGT-1");

        let users: Vec<&str> = chain
            .authentications()
            .iter()
            .map(|a| a.principal.id.as_str())
            .collect();
        assert_eq!(users, vec!["proxied", "casuser"]);
        assert_eq!(chain.proxied_by(), vec![Service::new("https://proxy")]);
    }

    #[test]
    fn test_chain_includes_supplemental_authentications() {
        let mut parent = root();
        parent.add_supplemental_authentication(auth("mfa"));
        let mut chain = SessionChain::new(proxied("TGT-2", "proxied", "TGT-1"));
        chain.push_parent(parent).unwrap();

        let users: Vec<&str> = chain
            .authentications()
            .iter()
            .map(|a| a.principal.id.as_str())
            .collect();
        assert_eq!(users, vec!["proxied", "casuser", "mfa"]);
    }

    #[test]
    fn test_chain_rejects_unrelated_or_repeated_parent() {
        let mut chain = SessionChain::new(proxied("TGT-2", "proxied", "TGT-1"));
        let stranger = TicketGrantingTicket::new("TGT-9", auth("x"), ExpirationPolicy::NeverExpires);
        assert!(chain.push_parent(stranger).unwrap_err().is_invalid_ticket());

        let mut looped = SessionChain::new(proxied("TGT-2", "proxied", "TGT-3"));
        looped.push_parent(proxied("TGT-3", "middle", "TGT-2")).unwrap();
        let again = proxied("TGT-2", "proxied", "TGT-3");
        assert!(looped.push_parent(again).unwrap_err().is_invalid_ticket());
    }

    #[test]
    fn test_expired_parent_expires_chain_not_child() {
        let mut parent = root();
        parent.mark_ticket_expired();
        let child = proxied("TGT-2", "proxied", "TGT-1");
        assert!(!child.is_expired());

        let mut chain = SessionChain::new(child);
        chain.push_parent(parent).unwrap();
        assert!(chain.is_expired());
    }

    #[test]
    fn test_chain_follows_parent_activity() {
        let policy = ExpirationPolicy::ticket_granting_ticket(
            Duration::from_secs(8 * 3600),
            Duration::from_secs(2 * 3600),
        );
        let t0 = OffsetDateTime::now_utc();
        let t1 = t0 + Duration::from_secs(3600);
        let t2 = t0 + Duration::from_secs(2 * 3600 + 60);

        let mut parent = TicketGrantingTicket::new("TGT-1", auth("casuser"), policy.clone());
        parent.state = TicketState::new_at("TGT-1", policy.clone(), t0);
        let mut child = TicketGrantingTicket::new_proxied(
            "PGT-1",
            auth("proxied"),
            policy.clone(),
            Service::new("https://proxy"),
            "TGT-1",
        );
        child.state = TicketState::new_at("PGT-1", policy, t0);

        // Both sessions stay in use after the PGT was issued.
        parent.state.last_time_used = t1;
        child.state.last_time_used = t1;

        let mut chain = SessionChain::new(child);
        chain.push_parent(parent).unwrap();
        assert!(!chain.is_expired_at(t2));
        assert!(!chain.leaf().is_expired_at(t2));
    }

    #[test]
    fn test_grant_records_service_and_counts_use() {
        let mut tgt = root();
        let st = tgt
            .grant_service_ticket("ST-1", Service::new("https://app"), st_policy(), false, false)
            .unwrap();

        assert_eq!(st.ticket_granting_ticket, "TGT-1");
        assert!(st.from_new_login);
        assert_eq!(tgt.count_of_uses(), 1);
        assert_eq!(tgt.services().get("ST-1"), Some(&Service::new("https://app")));

        let st2 = tgt
            .grant_service_ticket("ST-2", Service::new("https://app"), st_policy(), false, false)
            .unwrap();
        assert!(!st2.from_new_login);

        let st3 = tgt
            .grant_service_ticket("ST-3", Service::new("https://app"), st_policy(), true, false)
            .unwrap();
        assert!(st3.from_new_login);
        assert!(st3.credentials_provided);
    }

    #[test]
    fn test_expired_ticket_grants_nothing() {
        let mut tgt = root();
        tgt.mark_ticket_expired();
        assert!(
            tgt.grant_service_ticket("ST-1", Service::new("https://app"), st_policy(), false, false)
                .is_none()
        );
        assert!(tgt.services().is_empty());
    }

    #[test]
    fn test_remove_all_services() {
        let mut tgt = root();
        tgt.grant_service_ticket("ST-1", Service::new("https://a"), st_policy(), false, false);
        tgt.grant_service_ticket("ST-2", Service::new("https://b"), st_policy(), false, false);
        assert_eq!(tgt.services().len(), 2);

        tgt.remove_all_services();
        assert!(tgt.services().is_empty());
    }

    #[test]
    fn test_only_track_most_recent_session_same_service() {
        let mut tgt = root();
        tgt.grant_service_ticket("ST-1", Service::new("http://www.example.org/"), st_policy(), false, true);
        tgt.grant_service_ticket("ST-2", Service::new("http://www.example.org/"), st_policy(), false, true);

        assert_eq!(tgt.services().len(), 1);
        assert!(tgt.services().contains_key("ST-2"));
    }

    #[test]
    fn test_only_track_most_recent_session_similar_urls() {
        let mut tgt = root();
        tgt.grant_service_ticket("ST-1", Service::new("http://www.example.org/?test"), st_policy(), false, true);
        tgt.grant_service_ticket(
            "ST-2",
            Service::new("http://www.example.org/;JSESSIONID=xxx"),
            st_policy(),
            false,
            true,
        );
        assert_eq!(tgt.services().len(), 1);

        tgt.grant_service_ticket("ST-3", Service::new("http://www.example.org/pages/"), st_policy(), false, true);
        assert_eq!(tgt.services().len(), 2);
    }

    #[test]
    fn test_track_all_sessions_when_disabled() {
        let mut tgt = root();
        tgt.grant_service_ticket("ST-1", Service::new("http://www.example.org/"), st_policy(), false, false);
        tgt.grant_service_ticket("ST-2", Service::new("http://www.example.org/"), st_policy(), false, false);
        assert_eq!(tgt.services().len(), 2);
    }

    #[test]
    fn test_pgt_grants_proxy_tickets() {
        let mut pgt = ProxyGrantingTicket::new(
            TicketGrantingTicket::new("PGT-1", auth("proxy"), ExpirationPolicy::NeverExpires),
            "PGTIOU-1",
        );
        let pt = pgt
            .grant_proxy_ticket("PT-1", Service::new("https://backend"), st_policy(), false)
            .unwrap();

        assert_eq!(pt.kind(), TicketKind::Proxy);
        assert_eq!(pt.ticket_granting_ticket, "PGT-1");
        assert!(!pt.credentials_provided);
        assert!(pgt.services().contains_key("PT-1"));
        assert_eq!(pgt.kind(), TicketKind::ProxyGranting);
    }
}

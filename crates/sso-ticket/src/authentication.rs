//! Authentication results and services carried by tickets.
//!
//! These are the boundary types handed to the ticketing core by the
//! authentication layer. The core never inspects credentials; it only stores
//! the resulting [`Authentication`] and replays it on validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Authentication attribute that marks a remember-me login.
pub const REMEMBER_ME_ATTRIBUTE: &str = "rememberMe";

/// Authenticated subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Principal identifier (e.g. username).
    pub id: String,

    /// Released principal attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Principal {
    /// Creates a principal without attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Outcome of a successful authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    /// The authenticated principal.
    pub principal: Principal,

    /// Authentication metadata (handler names, remember-me flag, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// When the authentication happened.
    #[serde(with = "time::serde::rfc3339")]
    pub authentication_date: OffsetDateTime,
}

impl Authentication {
    /// Creates an authentication for `principal` dated now.
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            attributes: BTreeMap::new(),
            authentication_date: OffsetDateTime::now_utc(),
        }
    }

    /// Adds an authentication attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Marks the authentication as a remember-me login.
    #[must_use]
    pub fn remember_me(self) -> Self {
        self.with_attribute(REMEMBER_ME_ATTRIBUTE, serde_json::Value::Bool(true))
    }

    /// Returns `true` if the user asked to be remembered.
    #[must_use]
    pub fn is_remember_me(&self) -> bool {
        matches!(
            self.attributes.get(REMEMBER_ME_ATTRIBUTE),
            Some(serde_json::Value::Bool(true))
        )
    }
}

/// Target application a service ticket is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service URL as presented by the client.
    pub id: String,
}

impl Service {
    /// Creates a service from its URL.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Service URL without query string, fragment or `;` path parameters.
    #[must_use]
    pub fn normalized_id(&self) -> &str {
        let end = self
            .id
            .find(['?', '#', ';'])
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Returns `true` if both services address the same application endpoint.
    ///
    /// Session ids and query parameters are ignored, so
    /// `https://app/?a=1` matches `https://app/;jsessionid=X`.
    #[must_use]
    pub fn matches(&self, other: &Service) -> bool {
        self.normalized_id() == other.normalized_id()
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

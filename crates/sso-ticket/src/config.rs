//! Ticketing configuration.
//!
//! Per-kind lifetimes, id lengths, cleaner schedule and payload encryption.
//!
//! # Example (TOML)
//!
//! ```toml
//! [tickets.tgt]
//! max_time_to_live = "8h"
//! time_to_kill = "2h"
//!
//! [tickets.st]
//! number_of_uses = 1
//! time_to_kill = "10s"
//!
//! [tickets.cleaner]
//! start_delay = "20s"
//! repeat_interval = "2m"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::expiration::ExpirationPolicy;
use crate::id::{
    DEFAULT_PROXY_GRANTING_TICKET_ID_LENGTH, DEFAULT_SERVICE_TICKET_ID_LENGTH,
    DEFAULT_TICKET_GRANTING_TICKET_ID_LENGTH,
};

/// Root ticketing configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Ticket-granting ticket (SSO session) settings.
    pub tgt: TicketGrantingTicketConfig,

    /// Service ticket settings.
    pub st: ServiceTicketConfig,

    /// Proxy ticket settings.
    pub pt: ServiceTicketConfig,

    /// Proxy-granting ticket settings.
    pub pgt: ProxyGrantingTicketConfig,

    /// Node identity embedded in ticket ids.
    pub host: HostConfig,

    /// Expired ticket sweep.
    pub cleaner: CleanerConfig,

    /// Payload encryption at rest.
    pub crypto: CryptoConfig,
}

/// Ticket-granting ticket settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TicketGrantingTicketConfig {
    /// Hard lifetime since creation. Zero disables the ceiling.
    #[serde(with = "humantime_serde")]
    pub max_time_to_live: Duration,

    /// Idle timeout since last use. Zero disables the idle check.
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,

    /// Use a hard timeout policy instead of the session policy.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub hard_timeout: Option<Duration>,

    /// Use a throttling policy instead of the session policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttled: Option<ThrottledConfig>,

    /// Long-lived sessions for remember-me logins.
    pub remember_me: RememberMeConfig,

    /// Length of the random id component.
    pub max_length: usize,

    /// Keep only the most recent service ticket per service in the session.
    pub only_track_most_recent_session: bool,
}

impl Default for TicketGrantingTicketConfig {
    fn default() -> Self {
        Self {
            max_time_to_live: Duration::from_secs(8 * 60 * 60),
            time_to_kill: Duration::from_secs(2 * 60 * 60),
            hard_timeout: None,
            throttled: None,
            remember_me: RememberMeConfig::default(),
            max_length: DEFAULT_TICKET_GRANTING_TICKET_ID_LENGTH,
            only_track_most_recent_session: true,
        }
    }
}

/// Throttling policy settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThrottledConfig {
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,

    #[serde(with = "humantime_serde")]
    pub time_in_between_uses: Duration,
}

/// Remember-me session settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RememberMeConfig {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
}

impl Default for RememberMeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time_to_kill: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

/// Service and proxy ticket settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceTicketConfig {
    /// Validations allowed before the ticket expires.
    pub number_of_uses: u32,

    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,

    /// Length of the random id component.
    pub max_length: usize,
}

impl Default for ServiceTicketConfig {
    fn default() -> Self {
        Self {
            number_of_uses: 1,
            time_to_kill: Duration::from_secs(10),
            max_length: DEFAULT_SERVICE_TICKET_ID_LENGTH,
        }
    }
}

/// Proxy-granting ticket settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyGrantingTicketConfig {
    /// Length of the random id component.
    pub max_length: usize,
}

impl Default for ProxyGrantingTicketConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_PROXY_GRANTING_TICKET_ID_LENGTH,
        }
    }
}

/// Node identity settings.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Suffix for ticket ids. Defaults to the machine hostname.
    pub name: Option<String>,
}

/// Expired ticket sweep settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanerConfig {
    pub enabled: bool,

    /// Delay before the first sweep.
    #[serde(with = "humantime_serde")]
    pub start_delay: Duration,

    /// Interval between sweeps.
    #[serde(with = "humantime_serde")]
    pub repeat_interval: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay: Duration::from_secs(20),
            repeat_interval: Duration::from_secs(120),
        }
    }
}

/// Payload encryption settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub enabled: bool,

    /// AES-256 key, 64 hex characters or base64 of 32 bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Identifier recorded with encrypted payloads.
    pub key_id: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: None,
            key_id: "primary".to_string(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl From<ConfigError> for crate::error::TicketError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl TicketConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - A service or proxy ticket allows zero uses or has a zero lifetime
    /// - An id length is zero
    /// - Both throttling and a hard timeout are configured for sessions
    /// - The cleaner repeat interval is zero
    ///
    /// Returns `ConfigError::Missing` if encryption is enabled without a key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, st) in [("st", &self.st), ("pt", &self.pt)] {
            if st.number_of_uses == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "tickets.{name}.number_of_uses must be at least 1"
                )));
            }
            if st.time_to_kill.is_zero() {
                return Err(ConfigError::InvalidValue(format!(
                    "tickets.{name}.time_to_kill must be greater than zero"
                )));
            }
        }

        for (name, len) in [
            ("tgt", self.tgt.max_length),
            ("st", self.st.max_length),
            ("pt", self.pt.max_length),
            ("pgt", self.pgt.max_length),
        ] {
            if len == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "tickets.{name}.max_length must be greater than zero"
                )));
            }
        }

        if self.tgt.hard_timeout.is_some() && self.tgt.throttled.is_some() {
            return Err(ConfigError::InvalidValue(
                "tickets.tgt.hard_timeout and tickets.tgt.throttled are mutually exclusive".into(),
            ));
        }

        if self.tgt.remember_me.enabled && self.tgt.remember_me.time_to_kill.is_zero() {
            return Err(ConfigError::InvalidValue(
                "tickets.tgt.remember_me.time_to_kill must be greater than zero".into(),
            ));
        }

        if self.cleaner.enabled && self.cleaner.repeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "tickets.cleaner.repeat_interval must be greater than zero".into(),
            ));
        }

        if self.crypto.enabled && self.crypto.key.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("tickets.crypto.key".into()));
        }

        Ok(())
    }

    /// Session policy, in order of precedence:
    ///
    /// 1. `hard_timeout` set: hard timeout
    /// 2. `throttled` set: throttled use and timeout
    /// 3. both lifetimes zero: never expires
    /// 4. both lifetimes set: session policy
    /// 5. one lifetime set: timeout with that lifetime
    ///
    /// With remember-me enabled the result becomes the default branch of a
    /// remember-me policy.
    #[must_use]
    pub fn ticket_granting_ticket_policy(&self) -> ExpirationPolicy {
        let tgt = &self.tgt;

        let base = if let Some(hard) = tgt.hard_timeout {
            ExpirationPolicy::hard_timeout(hard)
        } else if let Some(throttled) = &tgt.throttled {
            ExpirationPolicy::throttled_use_and_timeout(
                throttled.time_to_kill,
                throttled.time_in_between_uses,
            )
        } else {
            match (tgt.max_time_to_live.is_zero(), tgt.time_to_kill.is_zero()) {
                (true, true) => {
                    tracing::warn!("Ticket-granting tickets are configured to never expire");
                    ExpirationPolicy::NeverExpires
                }
                (false, false) => {
                    ExpirationPolicy::ticket_granting_ticket(tgt.max_time_to_live, tgt.time_to_kill)
                }
                (false, true) => ExpirationPolicy::timeout(tgt.max_time_to_live),
                (true, false) => ExpirationPolicy::timeout(tgt.time_to_kill),
            }
        };

        if tgt.remember_me.enabled {
            ExpirationPolicy::remember_me(
                ExpirationPolicy::hard_timeout(tgt.remember_me.time_to_kill),
                base,
            )
        } else {
            base
        }
    }

    /// Service ticket policy.
    #[must_use]
    pub fn service_ticket_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::multi_time_use_or_timeout(self.st.number_of_uses, self.st.time_to_kill)
    }

    /// Proxy ticket policy.
    #[must_use]
    pub fn proxy_ticket_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::multi_time_use_or_timeout(self.pt.number_of_uses, self.pt.time_to_kill)
    }
}

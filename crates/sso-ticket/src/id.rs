//! Unique ticket id generation.
//!
//! Ids have the form `PREFIX-<counter>-<random>-<suffix>`. The random part is
//! drawn from the thread-local CSPRNG and carries the uniqueness guarantee;
//! the counter and the node suffix only help operators trace a ticket to the
//! node that issued it.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Default length of the random component of TGT ids.
pub const DEFAULT_TICKET_GRANTING_TICKET_ID_LENGTH: usize = 50;

/// Default length of the random component of ST and PT ids.
pub const DEFAULT_SERVICE_TICKET_ID_LENGTH: usize = 20;

/// Default length of the random component of PGT ids.
pub const DEFAULT_PROXY_GRANTING_TICKET_ID_LENGTH: usize = 50;

/// Source of ticket ids. Implementations must be safe to call concurrently.
pub trait UniqueTicketIdGenerator: Send + Sync {
    /// Returns a new id starting with `prefix` and `-`.
    fn new_ticket_id(&self, prefix: &str) -> String;
}

/// Generator embedding a node suffix, by default the machine hostname.
#[derive(Debug)]
pub struct HostNameBasedUniqueTicketIdGenerator {
    max_length: usize,
    suffix: Option<String>,
    counter: AtomicU64,
}

impl HostNameBasedUniqueTicketIdGenerator {
    /// Creates a generator with a random component of `max_length` characters
    /// and the given node suffix.
    #[must_use]
    pub fn new(max_length: usize, suffix: Option<&str>) -> Self {
        Self {
            max_length: max_length.max(1),
            suffix: suffix.map(sanitize_suffix).filter(|s| !s.is_empty()),
            counter: AtomicU64::new(1),
        }
    }

    /// Creates a generator suffixed with this machine's hostname.
    #[must_use]
    pub fn with_hostname(max_length: usize) -> Self {
        Self::new(max_length, Some(&local_hostname()))
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

impl UniqueTicketIdGenerator for HostNameBasedUniqueTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.max_length)
            .map(char::from)
            .collect();

        match &self.suffix {
            Some(suffix) => format!("{prefix}-{sequence}-{random}-{suffix}"),
            None => format!("{prefix}-{sequence}-{random}"),
        }
    }
}

/// Hostname of this machine, or `localhost` if it cannot be determined.
#[must_use]
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Keeps suffixes URL- and log-safe.
fn sanitize_suffix(suffix: &str) -> String {
    suffix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

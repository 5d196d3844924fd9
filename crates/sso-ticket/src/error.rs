//! Ticketing error types.
//!
//! Only unrecoverable conditions are errors. A ticket that is absent from the
//! registry is reported as `Ok(None)` by lookups; an expired ticket is still
//! returned and callers decide through [`Ticket::is_expired`](crate::Ticket::is_expired).
//! Protocol-level flows (see [`TicketingService`](crate::TicketingService))
//! fold both outcomes into [`TicketError::InvalidTicket`] so that "never
//! existed" and "expired" stay indistinguishable to external callers.

use std::fmt;

/// Errors that can occur while issuing, storing or replicating tickets.
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    /// The ticket does not exist, was deleted, or is expired.
    #[error("Invalid ticket: {ticket_id}")]
    InvalidTicket {
        /// Id of the rejected ticket.
        ticket_id: String,
    },

    /// A service ticket was presented by a service it was not issued for.
    #[error("Ticket {ticket_id} was not issued for service {service}")]
    ServiceMismatch {
        /// Id of the presented ticket.
        ticket_id: String,
        /// Service that presented it.
        service: String,
    },

    /// The request is structurally valid but not allowed in the ticket's state.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the rejected request.
        message: String,
    },

    /// A different logical ticket already occupies this id.
    #[error("Duplicate ticket id: {ticket_id}")]
    DuplicateId {
        /// The colliding id.
        ticket_id: String,
    },

    /// The storage backend could not be reached or timed out.
    #[error("Ticket registry unavailable: {message}")]
    RegistryUnavailable {
        /// Description of the backend failure.
        message: String,
    },

    /// Ticket payload could not be encoded, decoded, encrypted or decrypted.
    #[error("Codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// A replication command could not be parsed or is inconsistent.
    #[error("Malformed replication command: {message}")]
    MalformedCommand {
        /// Description of the defect.
        message: String,
    },

    /// Invalid ticketing configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl TicketError {
    // -------------------------------------------------------------------------
    // Constructor Methods
    // -------------------------------------------------------------------------

    /// Creates an `InvalidTicket` error.
    #[must_use]
    pub fn invalid_ticket(ticket_id: impl Into<String>) -> Self {
        Self::InvalidTicket {
            ticket_id: ticket_id.into(),
        }
    }

    /// Creates a `ServiceMismatch` error.
    #[must_use]
    pub fn service_mismatch(ticket_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self::ServiceMismatch {
            ticket_id: ticket_id.into(),
            service: service.into(),
        }
    }

    /// Creates an `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a `DuplicateId` error.
    #[must_use]
    pub fn duplicate_id(ticket_id: impl Into<String>) -> Self {
        Self::DuplicateId {
            ticket_id: ticket_id.into(),
        }
    }

    /// Creates a `RegistryUnavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::RegistryUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `Codec` error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a `MalformedCommand` error.
    #[must_use]
    pub fn malformed_command(message: impl Into<String>) -> Self {
        Self::MalformedCommand {
            message: message.into(),
        }
    }

    /// Creates a `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Predicate Methods
    // -------------------------------------------------------------------------

    /// Returns `true` if the ticket was rejected as unknown or expired.
    #[must_use]
    pub fn is_invalid_ticket(&self) -> bool {
        matches!(self, Self::InvalidTicket { .. })
    }

    /// Returns `true` if the backend could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::RegistryUnavailable { .. })
    }

    /// Returns `true` if this is a `DuplicateId` error.
    #[must_use]
    pub fn is_duplicate_id(&self) -> bool {
        matches!(self, Self::DuplicateId { .. })
    }

    /// Returns `true` if the caller's input caused the failure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTicket { .. }
                | Self::ServiceMismatch { .. }
                | Self::InvalidRequest { .. }
                | Self::MalformedCommand { .. }
        )
    }

    /// Returns `true` if the failure is on the server side.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId { .. }
                | Self::RegistryUnavailable { .. }
                | Self::Codec { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns the category of this error for logging and metrics.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTicket { .. } => ErrorCategory::Validation,
            Self::ServiceMismatch { .. } => ErrorCategory::Validation,
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::DuplicateId { .. } => ErrorCategory::Storage,
            Self::RegistryUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::Codec { .. } => ErrorCategory::Storage,
            Self::MalformedCommand { .. } => ErrorCategory::Replication,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for TicketError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}

/// Category of ticketing errors for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Ticket validation failures.
    Validation,
    /// Stored data errors (collisions, encoding).
    Storage,
    /// Backend connectivity errors.
    Infrastructure,
    /// Replication protocol errors.
    Replication,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Storage => write!(f, "storage"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Replication => write!(f, "replication"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Result type for ticketing operations.
pub type TicketResult<T> = Result<T, TicketError>;

//! Error types for the PostgreSQL ticket registry.

use std::time::Duration;

use sqlx_core::error::Error as SqlxError;
use sso_ticket::TicketError;

/// Errors specific to the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    /// The operation did not finish within the configured timeout.
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored row cannot be mapped back to a ticket.
    #[error("Invalid stored row: {message}")]
    InvalidRow { message: String },
}

impl PostgresError {
    #[must_use]
    pub fn invalid_row(message: impl Into<String>) -> Self {
        Self::InvalidRow {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for TicketError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Database(e) => TicketError::unavailable(e.to_string()),
            PostgresError::Timeout(after) => {
                TicketError::unavailable(format!("operation timed out after {after:?}"))
            }
            PostgresError::Migration(e) => TicketError::internal(format!("Migration error: {e}")),
            PostgresError::InvalidRow { message } => TicketError::codec(message),
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_to_ticket_errors() {
        let timeout: TicketError = PostgresError::Timeout(Duration::from_secs(1)).into();
        assert!(timeout.is_unavailable());

        let pool: TicketError = PostgresError::Database(SqlxError::PoolTimedOut).into();
        assert!(pool.is_unavailable());

        let row: TicketError = PostgresError::invalid_row("unknown kind").into();
        assert!(matches!(row, TicketError::Codec { .. }));
    }
}

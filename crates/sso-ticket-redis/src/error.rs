use std::time::Duration;

use sso_ticket::TicketError;
use thiserror::Error;

/// Result type for Redis transport operations.
pub type Result<T> = std::result::Result<T, RedisBusError>;

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("Failed to get Redis connection: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<RedisBusError> for TicketError {
    fn from(err: RedisBusError) -> Self {
        match err {
            RedisBusError::CreatePool(e) => TicketError::configuration(e.to_string()),
            other => TicketError::unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_unavailable() {
        let err = RedisBusError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )));
        let ticket_error: TicketError = err.into();
        assert!(ticket_error.is_unavailable());
    }

    #[test]
    fn test_timeout_is_unavailable() {
        let ticket_error: TicketError = RedisBusError::Timeout(Duration::from_secs(5)).into();
        assert!(ticket_error.is_unavailable());
        assert!(ticket_error.to_string().contains("5s"));
    }
}

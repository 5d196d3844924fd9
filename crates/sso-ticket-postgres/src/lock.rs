//! Table-based cluster lock for the ticket registry cleaner.
//!
//! Each application id owns at most one row in `sso_ticket_locks`. A node
//! acquires the lock by inserting the row, taking over a row it already owns,
//! or replacing a row whose holder let it expire. The expiration bounds how
//! long a crashed node can block the sweep.

use std::time::Duration;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_postgres::PgPool;
use sso_ticket::{LockingStrategy, TicketResult};
use tracing::debug;

use crate::error::PostgresError;

/// Default lock lifetime.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3600);

const ACQUIRE_LOCK: &str = r#"
    INSERT INTO sso_ticket_locks (application_id, unique_id, expiration_date)
    VALUES ($1, $2, now() + make_interval(secs => $3))
    ON CONFLICT (application_id) DO UPDATE
    SET unique_id = EXCLUDED.unique_id, expiration_date = EXCLUDED.expiration_date
    WHERE sso_ticket_locks.unique_id = EXCLUDED.unique_id
       OR sso_ticket_locks.expiration_date < now()
"#;

const RELEASE_LOCK: &str =
    "DELETE FROM sso_ticket_locks WHERE application_id = $1 AND unique_id = $2";

/// [`LockingStrategy`] backed by a row in `sso_ticket_locks`.
#[derive(Debug, Clone)]
pub struct PostgresLockingStrategy {
    pool: PgPool,
    application_id: String,
    unique_id: String,
    lock_timeout: Duration,
}

impl PostgresLockingStrategy {
    /// `application_id` names the lock shared by the cluster; `unique_id`
    /// identifies this node as its holder.
    #[must_use]
    pub fn new(
        pool: PgPool,
        application_id: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            application_id: application_id.into(),
            unique_id: unique_id.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

#[async_trait]
impl LockingStrategy for PostgresLockingStrategy {
    async fn acquire(&self) -> TicketResult<bool> {
        let result = query(ACQUIRE_LOCK)
            .bind(&self.application_id)
            .bind(&self.unique_id)
            .bind(self.lock_timeout.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        let acquired = result.rows_affected() > 0;
        debug!(
            application_id = %self.application_id,
            holder = %self.unique_id,
            acquired,
            "Cleaner lock acquisition"
        );
        Ok(acquired)
    }

    async fn release(&self) -> TicketResult<()> {
        query(RELEASE_LOCK)
            .bind(&self.application_id)
            .bind(&self.unique_id)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;
        Ok(())
    }
}

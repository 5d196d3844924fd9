//! Ticket registry stored in a PostgreSQL table.
//!
//! One row per ticket in `sso_tickets`. The row key is the codec storage key,
//! so with encryption enabled neither ids nor payloads are readable in the
//! database. Kind and creation time are kept in clear for counts and for
//! telling an idempotent re-add from an id collision.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx_core::error::Error as SqlxError;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use sso_ticket::{
    AnyTicket, EncodedTicket, JsonTicketCodec, Ticket, TicketCodec, TicketError, TicketKind,
    TicketRegistry, TicketResult,
};
use time::OffsetDateTime;
use tracing::{debug, trace, warn};

use crate::error::PostgresError;

/// Default upper bound for a single registry operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// (id, kind, created_at, payload)
type TicketRow = (String, String, OffsetDateTime, Vec<u8>);

// Updates only rows holding the same logical ticket; zero affected rows
// means the id belongs to another ticket.
const UPSERT_TICKET: &str = r#"
    INSERT INTO sso_tickets (id, kind, created_at, payload, updated_at)
    VALUES ($1, $2, $3, $4, now())
    ON CONFLICT (id) DO UPDATE
    SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at
    WHERE sso_tickets.kind = EXCLUDED.kind
      AND sso_tickets.created_at = EXCLUDED.created_at
"#;

const SELECT_TICKET: &str =
    "SELECT id, kind, created_at, payload FROM sso_tickets WHERE id = $1";

const SELECT_ALL_TICKETS: &str = "SELECT id, kind, created_at, payload FROM sso_tickets";

const COUNT_KIND: &str = "SELECT COUNT(*) FROM sso_tickets WHERE kind = $1";

/// PostgreSQL-backed [`TicketRegistry`].
pub struct PostgresTicketRegistry {
    pool: PgPool,
    codec: Arc<dyn TicketCodec>,
    operation_timeout: Duration,
}

impl PostgresTicketRegistry {
    /// Creates a registry storing plain JSON payloads. The schema must exist;
    /// see [`migrations::run`](crate::migrations::run).
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            codec: Arc::new(JsonTicketCodec),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn TicketCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Bounds every database round trip. An operation exceeding it fails
    /// with `RegistryUnavailable`.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn timed<T, F>(&self, operation: F) -> TicketResult<T>
    where
        F: Future<Output = Result<T, SqlxError>>,
    {
        match tokio::time::timeout(self.operation_timeout, operation).await {
            Ok(result) => result.map_err(|e| PostgresError::from(e).into()),
            Err(_) => Err(PostgresError::Timeout(self.operation_timeout).into()),
        }
    }

    async fn upsert(&self, ticket: &AnyTicket) -> TicketResult<()> {
        let encoded = self.codec.encode(ticket)?;
        let result = self
            .timed(
                query(UPSERT_TICKET)
                    .bind(&encoded.id)
                    .bind(encoded.kind.prefix())
                    .bind(encoded.created_at)
                    .bind(&encoded.payload)
                    .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            warn!(
                kind = %encoded.kind,
                "Rejected ticket whose id collides with a different stored ticket"
            );
            return Err(TicketError::duplicate_id(ticket.id()));
        }
        Ok(())
    }

    async fn count_kind(&self, kind: TicketKind) -> TicketResult<u64> {
        let count: i64 = self
            .timed(query_scalar(COUNT_KIND).bind(kind.prefix()).fetch_one(&self.pool))
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn decode_row(codec: &dyn TicketCodec, row: TicketRow) -> TicketResult<AnyTicket> {
    let (id, kind, created_at, payload) = row;
    let kind = TicketKind::from_prefix(&kind)
        .ok_or_else(|| PostgresError::invalid_row(format!("unknown ticket kind '{kind}'")))?;
    codec.decode(&EncodedTicket {
        id,
        kind,
        created_at,
        payload,
    })
}

#[async_trait]
impl TicketRegistry for PostgresTicketRegistry {
    async fn add_ticket(&self, ticket: &AnyTicket) -> TicketResult<()> {
        debug!(ticket_id = %ticket.id(), "Adding ticket to the registry");
        self.upsert(ticket).await
    }

    async fn get_ticket(&self, ticket_id: &str) -> TicketResult<Option<AnyTicket>> {
        let key = self.codec.encode_id(ticket_id);
        let row: Option<TicketRow> = self
            .timed(query_as(SELECT_TICKET).bind(&key).fetch_optional(&self.pool))
            .await?;
        row.map(|row| decode_row(self.codec.as_ref(), row)).transpose()
    }

    async fn update_ticket(&self, ticket: &AnyTicket) -> TicketResult<()> {
        trace!(ticket_id = %ticket.id(), "Updating ticket in the registry");
        self.upsert(ticket).await
    }

    async fn delete_single_ticket(&self, ticket_id: &str) -> TicketResult<bool> {
        let key = self.codec.encode_id(ticket_id);
        let result = self
            .timed(
                query("DELETE FROM sso_tickets WHERE id = $1")
                    .bind(&key)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self) -> TicketResult<u64> {
        let result = self
            .timed(query("DELETE FROM sso_tickets").execute(&self.pool))
            .await?;
        Ok(result.rows_affected())
    }

    fn get_tickets(&self) -> BoxStream<'_, TicketResult<AnyTicket>> {
        let codec = Arc::clone(&self.codec);
        query_as::<_, TicketRow>(SELECT_ALL_TICKETS)
            .fetch(&self.pool)
            .map(move |row| -> TicketResult<AnyTicket> {
                let row = row.map_err(PostgresError::from)?;
                decode_row(codec.as_ref(), row)
            })
            .boxed()
    }

    async fn session_count(&self) -> TicketResult<u64> {
        self.count_kind(TicketKind::TicketGranting).await
    }

    async fn service_ticket_count(&self) -> TicketResult<u64> {
        self.count_kind(TicketKind::Service).await
    }
}

//! # sso-ticket-postgres
//!
//! PostgreSQL backend for the SSO ticket registry.
//!
//! - [`PostgresTicketRegistry`] - shared ticket storage for every node of a cluster
//! - [`PostgresLockingStrategy`] - cluster lock so only one node sweeps expired tickets
//! - [`migrations`] - embedded schema migrations
//!
//! ```ignore
//! let pool = create_pool(&PostgresConfig::new(url)).await?;
//! migrations::run(&pool).await?;
//! let registry = PostgresTicketRegistry::new(pool).with_codec(codec);
//! ```

pub mod config;
pub mod error;
pub mod lock;
pub mod migrations;
pub mod pool;
pub mod registry;

pub use config::PostgresConfig;
pub use error::{PostgresError, Result};
pub use lock::PostgresLockingStrategy;
pub use pool::{PgPoolOptions, create_pool};
pub use registry::PostgresTicketRegistry;

pub use sqlx_postgres::PgPool;

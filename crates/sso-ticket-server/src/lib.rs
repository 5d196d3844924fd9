//! Hosting process for the SSO ticket registry.
//!
//! Loads [`AppConfig`](config::AppConfig), assembles the registry stack
//! (in-memory or PostgreSQL, optionally replicated over Redis), runs the
//! expired ticket cleaner and serves a small admin API.

pub mod admin;
pub mod app;
pub mod config;
pub mod config_watch;
pub mod observability;

pub use app::TicketServer;
pub use config::{AppConfig, RegistryBackend};

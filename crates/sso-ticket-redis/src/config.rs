use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Redis transport settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisBusConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Pub/Sub channel shared by every node of the cluster.
    pub channel: String,

    /// Publishing connection pool size
    pub pool_size: usize,

    /// How long a publish waits for a pooled connection.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            channel: "sso:tickets".to_string(),
            pool_size: 4,
            timeout: Duration::from_secs(5),
        }
    }
}

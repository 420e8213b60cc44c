//! Configuration for the asset cache.

use std::time::Duration;

/// Configuration for downloads and asset writes.
#[derive(Debug, Clone)]
pub struct AssetCacheConfig {
    /// How long a verified asset may be revalidated conditionally.
    ///
    /// Past this, requests carry no `If-Modified-Since` and the origin
    /// resends the full body.
    pub cache_expiration: Duration,
    /// Whether transfers may use expensive (e.g. cellular) networks.
    pub allows_expensive_network_access: bool,
    /// Whether transfers may use constrained (low data mode) networks.
    pub allows_constrained_network_access: bool,
    /// Upload size hint per transfer, in bytes.
    pub expected_bytes_to_send: u64,
    /// Identifier of the background transfer session.
    pub session_identifier: String,
}

impl AssetCacheConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            cache_expiration: Duration::from_secs(60 * 60 * 12),
            allows_expensive_network_access: true,
            allows_constrained_network_access: false,
            expected_bytes_to_send: 1024,
            session_identifier: "nestkit.user-data-assets".into(),
        }
    }

    /// Sets the cache expiration.
    pub fn with_cache_expiration(mut self, expiration: Duration) -> Self {
        self.cache_expiration = expiration;
        self
    }

    /// Sets whether expensive networks may be used.
    pub fn with_expensive_network_access(mut self, allowed: bool) -> Self {
        self.allows_expensive_network_access = allowed;
        self
    }

    /// Sets whether constrained networks may be used.
    pub fn with_constrained_network_access(mut self, allowed: bool) -> Self {
        self.allows_constrained_network_access = allowed;
        self
    }

    /// Sets the session identifier.
    pub fn with_session_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.session_identifier = identifier.into();
        self
    }

    pub(crate) fn expiration_delta(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::from_std(self.cache_expiration).unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

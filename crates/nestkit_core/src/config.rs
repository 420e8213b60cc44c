//! History configuration.

/// Configuration for the in-memory change history.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum number of transactions retained before the oldest are dropped.
    ///
    /// Readers whose cursor falls behind the retained window receive
    /// [`crate::CoreError::LogUnavailable`].
    pub max_history: usize,

    /// Capacity of the store-changed broadcast channel.
    pub notifier_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            notifier_capacity: 64,
        }
    }
}

impl HistoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retained history size.
    #[must_use]
    pub const fn max_history(mut self, value: usize) -> Self {
        self.max_history = value;
        self
    }

    /// Sets the notifier channel capacity.
    #[must_use]
    pub const fn notifier_capacity(mut self, value: usize) -> Self {
        self.notifier_capacity = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_pattern() {
        let config = HistoryConfig::new().max_history(5).notifier_capacity(2);
        assert_eq!(config.max_history, 5);
        assert_eq!(config.notifier_capacity, 2);
    }
}

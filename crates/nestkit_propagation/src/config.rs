//! Configuration for the propagation engine.

use std::time::Duration;

/// When the cursor is persisted relative to consumer completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorAdvance {
    /// Persist as soon as the batch is read (at-most-once).
    ///
    /// A crash mid-cycle drops that batch's reactions; nothing is ever
    /// delivered twice.
    #[default]
    BeforeConsumers,
    /// Persist after every consumer settled (at-least-once).
    ///
    /// A crash mid-cycle re-delivers the batch on the next trigger.
    AfterConsumers,
}

/// Configuration for propagation cycles.
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    /// Snapshots older than this are not notified about.
    pub notification_freshness_window: Duration,
    /// Cursor persistence policy.
    pub cursor_advance: CursorAdvance,
    /// Category attached to every notification.
    pub notification_category: String,
}

impl PropagationConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            notification_freshness_window: Duration::from_secs(60 * 60),
            cursor_advance: CursorAdvance::default(),
            notification_category: "NewAccountData".into(),
        }
    }

    /// Sets the notification freshness window.
    pub fn with_notification_freshness_window(mut self, window: Duration) -> Self {
        self.notification_freshness_window = window;
        self
    }

    /// Sets the cursor advance policy.
    pub fn with_cursor_advance(mut self, advance: CursorAdvance) -> Self {
        self.cursor_advance = advance;
        self
    }

    /// Sets the notification category.
    pub fn with_notification_category(mut self, category: impl Into<String>) -> Self {
        self.notification_category = category.into();
        self
    }

    /// Returns the freshness window as a signed time delta.
    pub(crate) fn freshness_delta(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::from_std(self.notification_freshness_window)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PropagationConfig::default();
        assert_eq!(config.notification_freshness_window, Duration::from_secs(3600));
        assert_eq!(config.cursor_advance, CursorAdvance::BeforeConsumers);
        assert_eq!(config.notification_category, "NewAccountData");
    }

    #[test]
    fn builder() {
        let config = PropagationConfig::new()
            .with_notification_freshness_window(Duration::from_secs(60))
            .with_cursor_advance(CursorAdvance::AfterConsumers)
            .with_notification_category("Other");

        assert_eq!(config.freshness_delta(), chrono::TimeDelta::seconds(60));
        assert_eq!(config.cursor_advance, CursorAdvance::AfterConsumers);
        assert_eq!(config.notification_category, "Other");
    }
}

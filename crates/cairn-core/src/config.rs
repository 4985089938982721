//! Store configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a store session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Current release context. Release-scoped operations that receive no
    /// explicit release fall back to this; `None` means unscoped.
    pub release: Option<String>,
    /// Recorded as the author of new versions, tags and archive records.
    /// Defaults to the `USER` environment variable.
    pub created_by: Option<String>,
    /// Bounded retry budget for version-number allocation races (default: 3).
    pub retry_attempts: u32,
    /// SQLite busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            release: None,
            created_by: None,
            retry_attempts: 3,
            busy_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    /// The user name recorded on rows written under this configuration.
    pub fn effective_user(&self) -> String {
        self.created_by
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Builder: set the release context.
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    /// Builder: set the recorded author.
    pub fn with_created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(config.release.is_none());
    }

    #[test]
    fn test_effective_user_prefers_explicit() {
        let config = StoreConfig::default().with_created_by("dba");
        assert_eq!(config.effective_user(), "dba");
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::default().with_release("v4r2");
        assert_eq!(config.release.as_deref(), Some("v4r2"));
    }
}

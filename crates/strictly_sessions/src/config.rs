//! Runtime settings.

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Coordinator and server settings, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct Settings {
    /// Wall-clock budget for one computed move, in milliseconds.
    #[serde(default = "default_compute_budget_ms")]
    compute_budget_ms: u64,

    /// Whether the non-human participant approves undo/reset proposals.
    #[serde(default = "default_agent_accepts_requests")]
    agent_accepts_requests: bool,

    /// SQLite database file. `None` keeps sessions in memory.
    #[serde(default)]
    database_path: Option<String>,

    /// Address the HTTP server binds to.
    #[serde(default = "default_host")]
    host: String,

    /// Port the HTTP server binds to.
    #[serde(default = "default_port")]
    port: u16,

    /// Remote move-computation service. `None` plays the first legal move.
    #[serde(default)]
    computer_url: Option<String>,
}

fn default_compute_budget_ms() -> u64 {
    5_000
}

fn default_agent_accepts_requests() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            compute_budget_ms: default_compute_budget_ms(),
            agent_accepts_requests: default_agent_accepts_requests(),
            database_path: None,
            host: default_host(),
            port: default_port(),
            computer_url: None,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading settings from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid settings TOML.
    #[instrument(skip(content))]
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;
        if settings.compute_budget_ms == 0 {
            return Err(ConfigError::new("compute_budget_ms must be positive"));
        }
        info!(
            compute_budget_ms = settings.compute_budget_ms,
            persistent = settings.database_path.is_some(),
            "Settings loaded"
        );
        Ok(settings)
    }

    /// Budget for one computed move.
    pub fn compute_budget(&self) -> Duration {
        Duration::from_millis(self.compute_budget_ms)
    }

    /// Overrides the compute budget.
    pub fn with_compute_budget(mut self, budget: Duration) -> Self {
        self.compute_budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Overrides whether the agent approves requests.
    pub fn with_agent_accepts_requests(mut self, accepts: bool) -> Self {
        self.agent_accepts_requests = accepts;
        self
    }

    /// Overrides the database path.
    pub fn with_database_path(mut self, path: Option<String>) -> Self {
        self.database_path = path;
        self
    }

    /// Overrides the listen address.
    pub fn with_address(mut self, host: String, port: u16) -> Self {
        self.host = host;
        self.port = port;
        self
    }

    /// Overrides the remote computer URL.
    pub fn with_computer_url(mut self, url: Option<String>) -> Self {
        self.computer_url = url;
        self
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = Settings::from_toml("").expect("Parse");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.compute_budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_overrides() {
        let settings = Settings::from_toml(
            r#"
            compute_budget_ms = 250
            agent_accepts_requests = false
            database_path = "games.db"
            "#,
        )
        .expect("Parse");
        assert_eq!(*settings.compute_budget_ms(), 250);
        assert!(!settings.agent_accepts_requests());
        assert_eq!(settings.database_path().as_deref(), Some("games.db"));
        assert_eq!(*settings.port(), 3000);
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(Settings::from_toml("compute_budget_ms = 0").is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Settings::from_file("/definitely/not/here.toml").is_err());
    }
}

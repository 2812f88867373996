use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    /// Identifies this execution context in lock records and change notifications
    pub context_id: String,
    pub policy: PolicyConfig,
    pub verifier: VerifierConfig,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub timeout_ms: u64,
    /// Endpoint answering "who am I" for a bearer credential
    pub url: String,
}

/// Timing policy for the verification coordinator.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// How often a context waiting on a foreign lock re-reads it
    pub lock_poll_interval_ms: u64,
    /// A lock older than this is ownerless and may be overridden
    pub lock_stale_after_ms: u64,
    /// Minimum age of `verified_at` before an unforced verify hits the network
    pub recheck_interval_ms: u64,
    /// Background refresh period (0 disables the refresh task)
    pub refresh_interval_ms: u64,
    /// Two rejections closer than this force a logout
    pub rejection_window_ms: u64,
}

impl PolicyConfig {
    pub fn lock_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::milliseconds(self.lock_stale_after_ms as i64)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::milliseconds(self.recheck_interval_ms as i64)
    }

    pub fn refresh_interval(&self) -> Option<std::time::Duration> {
        (self.refresh_interval_ms > 0)
            .then(|| std::time::Duration::from_millis(self.refresh_interval_ms))
    }

    pub fn rejection_window(&self) -> Duration {
        Duration::milliseconds(self.rejection_window_ms as i64)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval_ms: 100,
            lock_stale_after_ms: 10_000,
            recheck_interval_ms: 60_000,
            refresh_interval_ms: 300_000, // 5 minutes
            rejection_window_ms: 10_000,
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            url: "http://127.0.0.1:8080/api/auth/me".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let context_id =
            std::env::var("CONTEXT_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let defaults = VerifierConfig::default();
        let url = std::env::var("VERIFY_URL").unwrap_or(defaults.url);
        let timeout_ms = env_u64("VERIFY_TIMEOUT_MS").unwrap_or(defaults.timeout_ms);

        let defaults = PolicyConfig::default();
        let policy = PolicyConfig {
            lock_poll_interval_ms: env_u64("LOCK_POLL_INTERVAL_MS")
                .unwrap_or(defaults.lock_poll_interval_ms),
            lock_stale_after_ms: env_u64("LOCK_STALE_AFTER_MS")
                .unwrap_or(defaults.lock_stale_after_ms),
            recheck_interval_ms: env_u64("RECHECK_INTERVAL_MS")
                .unwrap_or(defaults.recheck_interval_ms),
            refresh_interval_ms: env_u64("REFRESH_INTERVAL_MS")
                .unwrap_or(defaults.refresh_interval_ms),
            rejection_window_ms: env_u64("REJECTION_WINDOW_MS")
                .unwrap_or(defaults.rejection_window_ms),
        };

        let config = Config {
            cache: CacheConfig { data_dir },
            context_id,
            policy,
            verifier: VerifierConfig { timeout_ms, url },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "CONTEXT_ID cannot be empty".to_string(),
            ));
        }

        match reqwest::Url::parse(&self.verifier.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::ValidationError(format!(
                    "VERIFY_URL must be http or https, got scheme '{}'",
                    url.scheme()
                )));
            }
            Err(e) => {
                return Err(ConfigError::ValidationError(format!(
                    "VERIFY_URL is not a valid URL: {e}"
                )));
            }
        }

        if self.policy.lock_stale_after_ms == 0 {
            return Err(ConfigError::ValidationError(
                "LOCK_STALE_AFTER_MS must be greater than 0".to_string(),
            ));
        }
        if self.policy.rejection_window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "REJECTION_WINDOW_MS must be greater than 0".to_string(),
            ));
        }
        if self.policy.lock_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "LOCK_POLL_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        if self.policy.lock_stale_after_ms < self.verifier.timeout_ms {
            tracing::warn!(
                "Lock staleness timeout ({}ms) is shorter than the verification timeout ({}ms). \
                 Another context may override a lock whose request is still running.",
                self.policy.lock_stale_after_ms,
                self.verifier.timeout_ms
            );
        }

        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

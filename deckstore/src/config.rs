//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and defaults used throughout the store, plus the runtime configuration
//! read from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

// ===== Storage Keys =====

/// Root key for the versioned snapshot of the persisted store
pub const DEFAULT_STORE_NAME: &str = "presentation-generator-storage";

/// Key of the store written by the previous (non-versioned) persistence layer
pub const LEGACY_STORE_NAME: &str = "presentation-generator-legacy-storage";

/// Table used by the remote storage backend
pub const REMOTE_STORE_TABLE: &str = "presentation_store";

/// Schema version stamped on every persisted envelope
pub const STORE_SCHEMA_VERSION: u32 = 1;

// ===== Persistence Defaults =====

/// Debounce window for persisted writes in milliseconds
pub const DEFAULT_THROTTLE_MS: u64 = 1_000;

/// Lower bound for the debounce window (anything shorter thrashes storage)
pub const MIN_THROTTLE_MS: u64 = 100;

/// Upper bound for the debounce window (one minute)
pub const MAX_THROTTLE_MS: u64 = 60_000;

/// Versions kept per presentation by a bare persistence layer
pub const DEFAULT_MAX_VERSIONS: usize = 10;

/// Versions kept per presentation by the application store
pub const APP_MAX_VERSIONS: usize = 20;

/// Hard ceiling on retained versions per presentation
pub const MAX_VERSIONS_LIMIT: usize = 200;

/// Interval between unconditional auto-saves in milliseconds
pub const DEFAULT_AUTO_SAVE_INTERVAL_MS: u64 = 60_000;

// ===== Generation Defaults =====

/// Retries allowed per task through `retry_task`
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-call timeout for generation requests in milliseconds
pub const DEFAULT_ABORT_TIMEOUT_MS: u64 = 30_000;

/// Credits granted to a fresh, unsubscribed session
pub const DEFAULT_CREDITS: u32 = 100;

/// Credits consumed by an image task
pub const IMAGE_CREDIT_COST: u32 = 5;

/// Credits consumed by any text task
pub const TEXT_CREDIT_COST: u32 = 1;

// ===== AI Service =====

/// AI service base URL when nothing is configured
pub const DEFAULT_AI_SERVICE_URL: &str = "http://127.0.0.1:8000";

/// Attempts per AI request, including the first one
pub const API_MAX_ATTEMPTS: u32 = 3;

/// First backoff delay between AI request attempts
pub const API_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Minimum topic length accepted by the AI service
pub const MIN_TOPIC_LENGTH: usize = 3;

/// Accepted length range for language codes
pub const MIN_LANG_LENGTH: usize = 2;
pub const MAX_LANG_LENGTH: usize = 10;

/// Runtime configuration assembled from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub ai_service_url: String,
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,
    pub remote_user_id: Option<String>,
    pub throttle: Duration,
    /// `None` disables the auto-save timer
    pub auto_save_interval: Option<Duration>,
    pub max_versions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".deckstore"),
            ai_service_url: DEFAULT_AI_SERVICE_URL.to_string(),
            remote_url: None,
            remote_api_key: None,
            remote_user_id: None,
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            auto_save_interval: Some(Duration::from_millis(DEFAULT_AUTO_SAVE_INTERVAL_MS)),
            max_versions: APP_MAX_VERSIONS,
        }
    }
}

impl AppConfig {
    /// Read configuration from `DECKSTORE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Out-of-range numbers are clamped and unparsable ones fall back to the
    /// defaults, so a bad variable never prevents startup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty("DECKSTORE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = non_empty("DECKSTORE_AI_SERVICE_URL") {
            config.ai_service_url = numeric_loopback(url.trim_end_matches('/'));
        }
        config.remote_url = non_empty("DECKSTORE_REMOTE_URL").map(|u| u.trim_end_matches('/').to_string());
        config.remote_api_key = non_empty("DECKSTORE_REMOTE_API_KEY");
        config.remote_user_id = non_empty("DECKSTORE_REMOTE_USER_ID");

        if let Some(ms) = non_empty("DECKSTORE_THROTTLE_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            config.throttle = Duration::from_millis(ms.clamp(MIN_THROTTLE_MS, MAX_THROTTLE_MS));
        }
        if let Some(ms) = non_empty("DECKSTORE_AUTOSAVE_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            config.auto_save_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(max) = non_empty("DECKSTORE_MAX_VERSIONS").and_then(|v| v.trim().parse::<usize>().ok()) {
            config.max_versions = max.clamp(1, MAX_VERSIONS_LIMIT);
        }

        config
    }

    /// Remote backend is only usable with both an endpoint and a key
    pub fn remote_enabled(&self) -> bool {
        self.remote_url.is_some() && self.remote_api_key.is_some()
    }
}

/// Swap a `localhost` host for `127.0.0.1`; numeric loopback avoids
/// resolver stalls on some hosts. Other hosts are left alone.
fn numeric_loopback(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) if parsed.host_str() == Some("localhost") => {
            if parsed.set_host(Some("127.0.0.1")).is_err() {
                return url.to_string();
            }
            parsed.as_str().trim_end_matches('/').to_string()
        }
        _ => url.to_string(),
    }
}

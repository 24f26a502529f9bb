//! Client Configuration
//!
//! Backend location, credentials and flow timing. Loaded from a TOML file,
//! then overridden by `FLOWSPLIT_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Versioned API base, e.g. "http://localhost:8000/api/v1"
    pub api_base_url: String,

    /// Bearer token sent with every request
    pub access_token: Option<String>,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,

    /// Interval between plan status polls (seconds)
    pub poll_interval_secs: u64,

    /// Give up waiting on a bucket after this many polls (None = poll until settled)
    pub max_poll_attempts: Option<u32>,

    /// Pause between a fully successful run and the complete step (milliseconds)
    pub completion_delay_ms: u64,

    /// Local state directory (sled database)
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/v1".to_string(),
            access_token: None,
            timeout_ms: 10_000,
            poll_interval_secs: 2,
            max_poll_attempts: None,
            completion_delay_ms: 800,
            data_dir: PathBuf::from("./flowsplit-data"),
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file, writing the defaults if it is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();

        if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read client config: {}", e))?;
            Self::from_toml(&content)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }
        fs::write(path, self.to_toml()?)
            .map_err(|e| format!("Failed to write client config: {}", e))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize to TOML: {}", e))
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse TOML: {}", e))
    }

    /// Apply `FLOWSPLIT_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from any key lookup (environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("FLOWSPLIT_API_URL") {
            self.api_base_url = val.trim().to_string();
        }

        if let Some(val) = lookup("FLOWSPLIT_TOKEN") {
            let token = val.trim().to_string();
            self.access_token = if token.is_empty() { None } else { Some(token) };
        }

        if let Some(num) = lookup("FLOWSPLIT_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.timeout_ms = num;
        }

        if let Some(num) = lookup("FLOWSPLIT_POLL_SECS").and_then(|v| v.trim().parse().ok()) {
            self.poll_interval_secs = num;
        }

        if let Some(val) = lookup("FLOWSPLIT_MAX_POLLS") {
            // "0" or empty means unbounded
            self.max_poll_attempts = val.trim().parse::<u32>().ok().filter(|n| *n > 0);
        }

        if let Some(num) =
            lookup("FLOWSPLIT_COMPLETION_DELAY_MS").and_then(|v| v.trim().parse().ok())
        {
            self.completion_delay_ms = num;
        }

        if let Some(val) = lookup("FLOWSPLIT_DATA_DIR") {
            self.data_dir = PathBuf::from(val.trim());
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    /// Validate the config before building a client
    pub fn validate(&self) -> Result<(), String> {
        if self.api_base_url.trim().is_empty() {
            return Err("api_base_url must be set".to_string());
        }

        let parsed = url::Url::parse(&self.api_base_url)
            .map_err(|e| format!("Invalid api_base_url {}: {}", self.api_base_url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!(
                "Invalid api_base_url {}: scheme must be http or https",
                self.api_base_url
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be at least 1".to_string());
        }

        if self.timeout_ms == 0 {
            return Err("timeout_ms must be at least 1".to_string());
        }

        Ok(())
    }
}

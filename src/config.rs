use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::enrich::client::{EnrichError, ProviderClient, RetryPolicy};
use crate::features::MomentumWeights;
use crate::pipeline::EnrichOptions;

/// Environment variable holding the enrichment provider's refresh
/// credential. Kept out of the config file so it never lands in dotfiles.
pub const REFRESH_TOKEN_ENV: &str = "CHARTPULSE_REFRESH_TOKEN";

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Chart source settings.
    pub source: SourceConfig,
    /// Enrichment provider settings.
    pub provider: ProviderConfig,
    /// Momentum-score component weights.
    pub momentum_weights: MomentumWeights,
    /// Extra major-label name variants (merged with the built-in list).
    pub major_labels: Vec<String>,
}

/// Chart source settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL serving `{code}_{period}.json` chart documents.
    pub base_url: String,
    /// Delay between sequential backfill requests in milliseconds.
    pub request_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://charts-mirror.chartpulse.dev/v1".to_string(),
            request_delay_ms: 2_000,
        }
    }
}

/// Enrichment provider settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Tracks enriched concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches in milliseconds.
    pub batch_pause_ms: u64,
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry in milliseconds.
    pub base_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff multiplier per retry.
    pub backoff_multiplier: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.chartmetric.com/api".to_string(),
            timeout_secs: 10,
            batch_size: 5,
            batch_pause_ms: 100,
            max_attempts: 4,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/chartpulse/config.toml`.
    /// Returns default config if the file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        let config = match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        };

        let weight_sum = config.momentum_weights.sum();
        if (weight_sum - 1.0).abs() > 0.25 {
            log::warn!(
                "Momentum weights sum to {weight_sum:.2}; scores drift from the 50-neutral \
                 interpretation when the weights stray far from 1.0"
            );
        }
        config
    }

    /// Build the provider client from config plus the refresh token in the
    /// environment. Returns `None` (with a warning) when the token is
    /// unset: the pipeline then runs without resolution or enrichment.
    pub fn provider_client(&self) -> Option<ProviderClient> {
        let token = std::env::var(REFRESH_TOKEN_ENV).unwrap_or_default();
        let retry = RetryPolicy {
            max_attempts: self.provider.max_attempts,
            base_delay_ms: self.provider.base_backoff_ms,
            max_delay_ms: self.provider.max_backoff_ms,
            multiplier: self.provider.backoff_multiplier,
        };
        match ProviderClient::new(&self.provider.base_url, token, self.provider.timeout_secs, retry)
        {
            Ok(client) => Some(client),
            Err(EnrichError::NotConfigured) => {
                log::warn!("{REFRESH_TOKEN_ENV} not set, enrichment disabled");
                None
            }
            Err(e) => {
                log::warn!("Provider client unavailable: {e}");
                None
            }
        }
    }

    pub fn enrich_options(&self) -> EnrichOptions {
        EnrichOptions {
            batch_size: self.provider.batch_size,
            batch_pause_ms: self.provider.batch_pause_ms,
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("chartpulse.db")
    } else {
        // Fallback: current directory
        PathBuf::from("chartpulse.db")
    }
}

//! Bot configuration
//!
//! Tunables for the warning system, loaded from a YAML file with environment
//! overrides for secrets.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::warning::{
    InternalUserId, Severity, ViolationType, WarningError, WarningResult,
};

/// Config file read when `WARDEN_CONFIG` is unset
pub const CONFIG_FILE: &str = "data/warning_config.yaml";

/// A value per severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityTable<T> {
    pub low: T,
    pub medium: T,
    pub high: T,
    pub critical: T,
}

impl<T: Copy> SeverityTable<T> {
    #[must_use]
    pub fn get(&self, severity: Severity) -> T {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }
}

/// Severity score at which each standing tier begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingThresholds {
    pub limited: u32,
    pub very_limited: u32,
    pub at_risk: u32,
    pub suspended: u32,
}

impl Default for StandingThresholds {
    fn default() -> Self {
        Self {
            limited: 1,
            very_limited: 6,
            at_risk: 15,
            suspended: 30,
        }
    }
}

/// Message throttle applied to rate-limited users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_messages: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 3,
            window_secs: 60,
        }
    }
}

/// Replaces the built-in expiration rule for one (type, severity) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationOverride {
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub first_offense_days: u32,
    pub repeat_offense_days: u32,
    pub use_discord_timeout: bool,
}

/// Warning system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningConfig {
    /// Base URL of the violations backend
    pub backend_url: String,
    /// Bearer token for the backend
    pub backend_token: Option<String>,
    /// Deadline for a single backend call
    pub rpc_timeout_secs: u64,
    /// Interval between expiration sweeps
    pub sweep_interval_secs: u64,
    /// Crash-recovery snapshot of the restriction cache
    pub snapshot_path: String,
    /// Channel receiving audit notices
    pub modlog_channel_id: Option<u64>,
    /// Channel mentioned in suspension notices for appeals
    pub appeal_channel_id: Option<u64>,
    /// Internal id recorded as `expiredBy` for automatic expiry
    pub system_actor_id: InternalUserId,
    /// Window in which a same-type violation counts as a repeat offense
    pub repeat_offense_window_days: u32,
    pub rate_limit: RateLimitConfig,
    /// Fallback duration per severity when no rule exists, 0 = permanent
    pub default_durations: SeverityTable<u32>,
    pub severity_weights: SeverityTable<u32>,
    pub standing_thresholds: StandingThresholds,
    pub expiration_overrides: Vec<ExpirationOverride>,
    /// Component custom ids starting with one of these add reactions
    pub reaction_component_prefixes: Vec<String>,
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:3000/rpc".to_string(),
            backend_token: None,
            rpc_timeout_secs: 10,
            sweep_interval_secs: 30 * 60,
            snapshot_path: "data/restrictions.json".to_string(),
            modlog_channel_id: None,
            appeal_channel_id: None,
            system_actor_id: InternalUserId(0),
            repeat_offense_window_days: 90,
            rate_limit: RateLimitConfig::default(),
            default_durations: SeverityTable {
                low: 7,
                medium: 30,
                high: 90,
                critical: 0,
            },
            severity_weights: SeverityTable {
                low: 1,
                medium: 3,
                high: 7,
                critical: 15,
            },
            standing_thresholds: StandingThresholds::default(),
            expiration_overrides: Vec::new(),
            reaction_component_prefixes: vec!["react".to_string(), "reaction".to_string()],
        }
    }
}

impl WarningConfig {
    /// Load configuration from a YAML file
    ///
    /// A missing file yields the defaults. `WARDEN_BACKEND_URL` and
    /// `WARDEN_BACKEND_TOKEN` override the file.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the resulting configuration is invalid.
    pub async fn load(path: impl AsRef<Path>) -> WarningResult<Self> {
        let path = path.as_ref();

        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_yaml(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(WarningError::Persistence(e)),
        };

        if let Ok(url) = env::var("WARDEN_BACKEND_URL") {
            config.backend_url = url;
        }
        if let Ok(token) = env::var("WARDEN_BACKEND_TOKEN") {
            config.backend_token = Some(token);
        }

        config.validate()?;
        info!(path = %path.display(), "Warning config loaded");
        Ok(config)
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    /// Returns `Config` if the YAML is malformed.
    pub fn from_yaml(content: &str) -> WarningResult<Self> {
        serde_yaml::from_str(content).map_err(|e| WarningError::Config(e.to_string()))
    }

    /// Check invariants the rest of the system relies on
    ///
    /// # Errors
    /// Returns `Config` if standing thresholds are not strictly ascending and
    /// positive, or a severity weight is zero.
    pub fn validate(&self) -> WarningResult<()> {
        let t = self.standing_thresholds;
        if !(0 < t.limited && t.limited < t.very_limited && t.very_limited < t.at_risk && t.at_risk < t.suspended)
        {
            return Err(WarningError::Config(format!(
                "standing thresholds must be strictly ascending and positive: {t:?}"
            )));
        }

        if Severity::ALL
            .iter()
            .any(|severity| self.severity_weights.get(*severity) == 0)
        {
            return Err(WarningError::Config(
                "severity weights must be non-zero".to_string(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(WarningError::Config(
                "rate limit window must be non-zero".to_string(),
            ));
        }

        if self.modlog_channel_id == Some(0) || self.appeal_channel_id == Some(0) {
            return Err(WarningError::Config(
                "channel ids must be non-zero snowflakes".to_string(),
            ));
        }

        Ok(())
    }
}

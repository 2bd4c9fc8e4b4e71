/// Service configuration.
///
/// Settings come from a TOML file; the portal login comes from the
/// environment (`TANKMON_USERNAME`, `TANKMON_PASSWORD`), with a `.env` file
/// loaded first if present. Example:
///
/// ```toml
/// region = "us"
/// poll_interval_secs = 3600
/// adaptive_thresholds = true
/// include_unmonitored_tanks = false
/// state_path = "/var/lib/tankmon/state.json"
///
/// [logging]
/// level = "info"
/// timestamps = true
/// ```

use crate::consumption::thresholds::ThresholdPolicy;
use crate::logging::LogLevel;
use crate::regions::{Region, RegionProfile, profile_for};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const USERNAME_VAR: &str = "TANKMON_USERNAME";
pub const PASSWORD_VAR: &str = "TANKMON_PASSWORD";
pub const DEFAULT_STATE_PATH: &str = "tankmon_state.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Missing environment variable {0}")]
    MissingCredential(&'static str),
}

// ---------------------------------------------------------------------------
// Service settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Region code, case-insensitive (`us`, `ca`).
    pub region: String,
    /// Normal poll interval; the region default when absent.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub adaptive_thresholds: bool,
    #[serde(default)]
    pub min_consumption_threshold: Option<f64>,
    #[serde(default)]
    pub max_consumption_threshold: Option<f64>,
    #[serde(default)]
    pub include_unmonitored_tanks: bool,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            timestamps: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.region()?;
        self.log_level()?;

        if self.poll_interval_secs == Some(0) {
            return Err(ConfigError::Invalid("poll_interval_secs must be greater than zero".to_string()));
        }
        for (name, value) in [
            ("min_consumption_threshold", self.min_consumption_threshold),
            ("max_consumption_threshold", self.max_consumption_threshold),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ConfigError::Invalid(format!("{} must be a non-negative number", name)));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_consumption_threshold, self.max_consumption_threshold) {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "min_consumption_threshold ({}) exceeds max_consumption_threshold ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }

    pub fn region(&self) -> Result<Region, ConfigError> {
        self.region.parse().map_err(ConfigError::Invalid)
    }

    pub fn profile(&self) -> Result<&'static RegionProfile, ConfigError> {
        Ok(profile_for(self.region()?))
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        self.logging.level.parse().map_err(ConfigError::Invalid)
    }

    /// Configured interval, or the region's default.
    pub fn poll_interval(&self, profile: &RegionProfile) -> Duration {
        self.poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(profile.default_update_interval)
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy {
            adaptive: self.adaptive_thresholds,
            min_override: self.min_consumption_threshold,
            max_override: self.max_consumption_threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Portal login. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let username = non_empty_var(USERNAME_VAR)?;
        let password = non_empty_var(PASSWORD_VAR)?;
        Ok(Self { username, password })
    }
}

fn non_empty_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingCredential(name))
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::{CA_PROFILE, US_PROFILE};

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ServiceConfig::from_toml_str(r#"region = "US""#).expect("minimal config is valid");

        assert_eq!(config.region().unwrap(), Region::Us);
        assert!(config.adaptive_thresholds, "adaptive thresholds default on");
        assert!(!config.include_unmonitored_tanks);
        assert_eq!(config.state_path, PathBuf::from(DEFAULT_STATE_PATH));
        assert_eq!(config.log_level().unwrap(), LogLevel::Info);
        assert_eq!(config.poll_interval(&US_PROFILE), Duration::from_secs(3600));
    }

    #[test]
    fn test_full_config() {
        let config = ServiceConfig::from_toml_str(
            r#"
            region = "ca"
            poll_interval_secs = 900
            adaptive_thresholds = false
            min_consumption_threshold = 0.5
            max_consumption_threshold = 40.0
            include_unmonitored_tanks = true
            state_path = "/tmp/tankmon.json"

            [logging]
            level = "debug"
            file = "/tmp/tankmon.log"
            timestamps = false
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.profile().unwrap().region, Region::Ca);
        assert_eq!(config.poll_interval(&CA_PROFILE), Duration::from_secs(900));
        let policy = config.threshold_policy();
        assert!(!policy.adaptive);
        assert_eq!(policy.min_override, Some(0.5));
        assert_eq!(policy.max_override, Some(40.0));
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/tankmon.log")));
        assert!(!config.logging.timestamps);
    }

    #[test]
    fn test_unknown_region_is_rejected() {
        let err = ServiceConfig::from_toml_str(r#"region = "mx""#).unwrap_err();
        assert!(err.to_string().contains("Unsupported region: mx"), "got: {}", err);
    }

    #[test]
    fn test_inverted_overrides_are_rejected() {
        let err = ServiceConfig::from_toml_str(
            "region = \"us\"\nmin_consumption_threshold = 30.0\nmax_consumption_threshold = 10.0",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = ServiceConfig::from_toml_str("region = \"us\"\npoll_interval_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = ServiceConfig::from_toml_str("region = \"us\"\npassword = \"oops\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "credentials do not belong in the config file");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("me@example.com", "s3cret");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("me@example.com"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = ServiceConfig::load(Path::new("/nonexistent/tankmon.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

/// Structured logging for the tank monitoring service
///
/// Sets up one `tracing` subscriber for the process: console output on
/// stderr, optionally mirrored to an append-only log file. `RUST_LOG`
/// overrides the configured level when set.
///
/// Portal failures are classified before they are logged so a scheduled
/// maintenance window does not page anyone while a login failure does.

use crate::model::PortalError;
use crate::regions::Region;
use std::error::Error;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("Unknown log level: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - portal is in a scheduled maintenance window
    Expected,
    /// Unexpected failure - bad credentials, HTTP errors, markup or JSON changes
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Installs the global subscriber. Fails if one is already installed or the
/// log file cannot be opened.
pub fn init_logging(level: LogLevel, log_file: Option<&Path>, timestamps: bool) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let console = if timestamps {
        tracing_fmt::layer().with_writer(std::io::stderr).boxed()
    } else {
        tracing_fmt::layer().with_writer(std::io::stderr).without_time().boxed()
    };

    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(tracing_fmt::layer().with_ansi(false).with_writer(Mutex::new(file)).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Classify a portal failure by its kind and message
pub fn classify_failure(err: &PortalError) -> FailureType {
    if err.is_maintenance() {
        return FailureType::Expected;
    }
    match err {
        PortalError::Authentication(_) | PortalError::SessionExpired => FailureType::Unexpected,
        PortalError::Communication(_) | PortalError::Decode(_) => FailureType::Unexpected,
        PortalError::Client(_) => FailureType::Unknown,
    }
}

/// Log a portal failure at the level its classification calls for
pub fn log_portal_failure(region: Region, operation: &str, err: &PortalError) {
    let failure_type = classify_failure(err);
    match failure_type {
        FailureType::Expected => info!(%region, operation, %failure_type, error = %err, "Portal operation failed"),
        FailureType::Unexpected => error!(%region, operation, %failure_type, error = %err, "Portal operation failed"),
        FailureType::Unknown => warn!(%region, operation, %failure_type, error = %err, "Portal operation failed"),
    }
}

/// Log a summary of one poll cycle
pub fn log_cycle_summary(region: Region, total: usize, good: usize, degraded: usize) {
    if degraded == 0 {
        info!(%region, total, good, "Poll cycle complete");
    } else if good == 0 {
        error!(%region, total, degraded, "Poll cycle complete, no tank passed validation");
    } else {
        warn!(%region, total, good, degraded, "Poll cycle complete with degraded tanks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Warning.as_filter(), "warn");
    }

    #[test]
    fn test_failure_classification() {
        let maintenance = PortalError::Communication("Site under scheduled maintenance".into());
        assert_eq!(classify_failure(&maintenance), FailureType::Expected);

        let login = PortalError::Authentication("Login failed - invalid credentials".into());
        assert_eq!(classify_failure(&login), FailureType::Unexpected);

        let http = PortalError::Communication("HTTP 500 from /Tank".into());
        assert_eq!(classify_failure(&http), FailureType::Unexpected);

        let empty = PortalError::Client("No tanks found".into());
        assert_eq!(classify_failure(&empty), FailureType::Unknown);
    }
}

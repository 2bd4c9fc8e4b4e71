/// TankReading, EnrichedTank, OrderTotals, QualityFlag, PortalError
/// core data structures and error handling
///
/// Core data types for the propane tank monitoring service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no logic beyond small accessors and no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Display sentinel
// ---------------------------------------------------------------------------

/// Text shown for a field the portal did not provide (or that could not be
/// extracted). Only used at the display boundary; records keep `Option`s.
pub const UNKNOWN: &str = "unknown";

/// Formats an optional value, falling back to [`UNKNOWN`].
pub fn display_or_unknown<T: fmt::Display>(value: Option<&T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => UNKNOWN.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// One normalized snapshot of a physical tank, as scraped from the portal.
///
/// `tank_id` is the join key across poll cycles: a slug of the service address
/// for HTML regions, the vendor tank id for JSON regions. Every other field is
/// optional because the portal markup is not under our control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankReading {
    pub tank_id: String,
    /// 1-based position in the portal listing.
    pub tank_number: usize,
    pub address: Option<String>,
    pub tank_name: Option<String>,
    /// Capacity in the region's volume unit.
    pub tank_size: Option<f64>,
    pub tank_type: Option<String>,
    pub serial_number: Option<String>,
    pub customer_number: Option<String>,
    /// Fill level, 0–100.
    pub level_percent: Option<f64>,
    /// Current contents in the region's volume unit.
    pub current_volume: Option<f64>,
    pub reading_date: Option<String>,   // ISO 8601 date when parseable, raw text otherwise
    pub last_delivery_date: Option<String>,
    pub price_per_unit: Option<f64>,
    pub is_on_delivery_plan: bool,
}

impl TankReading {
    /// A reading with only its identity filled in.
    pub fn new(tank_id: impl Into<String>, tank_number: usize) -> Self {
        Self {
            tank_id: tank_id.into(),
            tank_number,
            address: None,
            tank_name: None,
            tank_size: None,
            tank_type: None,
            serial_number: None,
            customer_number: None,
            level_percent: None,
            current_volume: None,
            reading_date: None,
            last_delivery_date: None,
            price_per_unit: None,
            is_on_delivery_plan: true,
        }
    }
}

/// Per-tank verdict on the current cycle's reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityFlag {
    Good,
    InvalidTankSize,
    InvalidLevel,
    InconsistentValues,
    CalculationError,
    Unknown,
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityFlag::Good => write!(f, "Good"),
            QualityFlag::InvalidTankSize => write!(f, "Invalid Tank Size"),
            QualityFlag::InvalidLevel => write!(f, "Invalid Level"),
            QualityFlag::InconsistentValues => write!(f, "Inconsistent Values"),
            QualityFlag::CalculationError => write!(f, "Calculation Error"),
            QualityFlag::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A tank reading plus the consumption figures derived for this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTank {
    #[serde(flatten)]
    pub reading: TankReading,
    /// Cumulative energy consumed, in the region's energy unit.
    pub consumption_total: f64,
    /// Energy per hour over the last interval, rounded to 4 decimals.
    pub consumption_rate: f64,
    pub data_quality: QualityFlag,
    pub refill_detected: bool,
    pub consumption_anomaly: bool,
    pub days_since_delivery: Option<i64>,
}

/// Totals computed from the account's order history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderTotals {
    /// Whole volume units delivered.
    pub total_volume: u64,
    pub total_cost: f64,
    pub average_price: f64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by the portal session layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortalError {
    /// Bad credentials, missing CSRF token, or an unrecoverable session.
    /// Never retried by the session layer.
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// The portal bounced a data request back to its login page.
    #[error("Session expired")]
    SessionExpired,
    /// Timeouts, transport failures and non-OK HTTP statuses.
    #[error("Communication error: {0}")]
    Communication(String),
    /// A response body that should have been JSON was not.
    #[error("Decode error: {0}")]
    Decode(String),
    /// Unexpected response shape, no tanks found, bad selector, ...
    #[error("Client error: {0}")]
    Client(String),
}

impl PortalError {
    /// `SessionExpired` is an authentication failure too.
    pub fn is_authentication(&self) -> bool {
        matches!(self, PortalError::Authentication(_) | PortalError::SessionExpired)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PortalError::Communication(_) | PortalError::Decode(_))
    }

    /// True when the failure text points at a scheduled maintenance window.
    pub fn is_maintenance(&self) -> bool {
        matches!(self, PortalError::Communication(msg) if msg.to_lowercase().contains("maintenance"))
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::Decode(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expired_counts_as_authentication_failure() {
        assert!(PortalError::SessionExpired.is_authentication());
        assert!(PortalError::Authentication("bad password".into()).is_authentication());
        assert!(!PortalError::Communication("HTTP 503".into()).is_authentication());
    }

    #[test]
    fn test_only_communication_and_decode_errors_are_retryable() {
        assert!(PortalError::Communication("timeout".into()).is_retryable());
        assert!(PortalError::Decode("expected value".into()).is_retryable());
        assert!(!PortalError::SessionExpired.is_retryable());
        assert!(!PortalError::Client("No tanks found".into()).is_retryable());
    }

    #[test]
    fn test_maintenance_detection_is_case_insensitive() {
        let err = PortalError::Communication("Site under scheduled Maintenance".into());
        assert!(err.is_maintenance());
        assert!(!PortalError::Client("maintenance".into()).is_maintenance(),
            "only communication failures switch to the maintenance interval");
    }

    #[test]
    fn test_unknown_sentinel_only_at_display_boundary() {
        let reading = TankReading::new("123-main-st", 1);
        assert_eq!(display_or_unknown(reading.tank_size.as_ref()), "unknown");
        assert_eq!(display_or_unknown(Some(&500.0)), "500");

        let json = serde_json::to_value(&reading).expect("reading should serialize");
        assert!(json["tank_size"].is_null(), "absent values serialize as null, not \"unknown\"");
    }

    #[test]
    fn test_quality_flag_display_matches_portal_wording() {
        assert_eq!(QualityFlag::InvalidTankSize.to_string(), "Invalid Tank Size");
        assert_eq!(QualityFlag::InconsistentValues.to_string(), "Inconsistent Values");
    }
}

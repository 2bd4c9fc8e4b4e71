//! Account Verification Module
//!
//! Checks a configured account against the live portal: can we log in, do
//! tanks come back with readings that validate, and is the order history
//! reachable. Run it once after setting credentials, before starting the
//! poll loop.

use crate::consumption::validation::validate_reading;
use crate::ingest::PortalClient;
use crate::regions::Region;
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountVerification {
    pub timestamp: String,
    pub region: String,
    pub status: VerificationStatus,
    pub connection_ok: bool,
    pub tank_count: usize,
    pub tanks_with_valid_readings: usize,
    /// `None` when the region has no order history page.
    pub orders_available: Option<bool>,
    pub error_message: Option<String>,
}

impl AccountVerification {
    fn failed(region: Region, message: String) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            region: region.code().to_string(),
            status: VerificationStatus::Failed,
            connection_ok: false,
            tank_count: 0,
            tanks_with_valid_readings: 0,
            orders_available: None,
            error_message: Some(message),
        }
    }
}

// ============================================================================
// Account probe
// ============================================================================

pub fn verify_account(client: &dyn PortalClient) -> AccountVerification {
    let profile = client.profile();
    let region = profile.region;

    // One tank fetch doubles as the connection check.
    let tanks = match client.fetch_tanks() {
        Ok(tanks) if !tanks.is_empty() => tanks,
        Ok(_) => {
            return AccountVerification::failed(region, "Connection test failed: no tanks retrievable".to_string());
        }
        Err(e) => return AccountVerification::failed(region, e.to_string()),
    };
    let valid = tanks
        .iter()
        .filter(|t| validate_reading(t, profile).is_ok())
        .count();

    let mut error_message = None;
    let orders_available = if profile.orders_url().is_some() {
        match client.fetch_orders() {
            Ok(_) => Some(true),
            Err(e) => {
                error_message = Some(format!("Order history: {}", e));
                Some(false)
            }
        }
    } else {
        None
    };

    let status = if valid == tanks.len() && orders_available != Some(false) {
        VerificationStatus::Success
    } else {
        if error_message.is_none() {
            error_message = Some(format!("{} of {} tanks failed validation", tanks.len() - valid, tanks.len()));
        }
        VerificationStatus::PartialSuccess
    };

    AccountVerification {
        timestamp: Utc::now().to_rfc3339(),
        region: region.code().to_string(),
        status,
        connection_ok: true,
        tank_count: tanks.len(),
        tanks_with_valid_readings: valid,
        orders_available,
        error_message,
    }
}

pub fn print_summary(report: &AccountVerification) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("ACCOUNT VERIFICATION ({})", report.region);
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Connection:       {}", if report.connection_ok { "OK" } else { "FAILED" });
    println!("Tanks:            {}/{} with valid readings", report.tanks_with_valid_readings, report.tank_count);
    match report.orders_available {
        Some(true) => println!("Order history:    OK"),
        Some(false) => println!("Order history:    FAILED"),
        None => println!("Order history:    not offered in this region"),
    }
    if let Some(msg) = &report.error_message {
        println!("Note:             {}", msg);
    }
    println!();
    println!("Status: {:?}", report.status);
    println!("═══════════════════════════════════════════════════════════");
}

// ============================================================================
// Tests
// ============================================================================

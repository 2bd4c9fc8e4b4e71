/// Consumption engine.
///
/// Turns one tank reading plus the tank's prior state into an `EnrichedTank`
/// and the tank's next state. Consumption is the drop in volume since the
/// previous validated reading, converted to the region's energy unit and
/// accumulated forever; rises are refills and never subtract.
///
/// The engine is pure apart from logging: state goes in and comes out, the
/// caller owns it (see `ledger`).

pub mod ledger;
pub mod thresholds;
pub mod validation;

use crate::model::{EnrichedTank, QualityFlag, TankReading};
use crate::regions::RegionProfile;
use chrono::NaiveDate;
use thiserror::Error;
use thresholds::{ThresholdPolicy, resolve_thresholds};
use tracing::{debug, info, warn};
use validation::validate_reading;

pub use ledger::ConsumptionLedger;

/// Smallest interval used for rate computation, in hours.
const MIN_INTERVAL_HOURS: f64 = 0.001;

/// What the engine remembers about one tank between cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionState {
    /// Volume at the last validated reading.
    pub previous_volume: Option<f64>,
    /// Energy consumed since tracking began. Never decreases.
    pub cumulative_energy: f64,
    pub quality_flag: QualityFlag,
}

impl ConsumptionState {
    pub fn new() -> Self {
        Self {
            previous_volume: None,
            cumulative_energy: 0.0,
            quality_flag: QualityFlag::Unknown,
        }
    }
}

impl Default for ConsumptionState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConsumptionError {
    #[error("Tank reading has no tank id")]
    MissingTankId,
    #[error("Consumption for tank {0} is not a finite number")]
    NonFinite(String),
}

pub struct ConsumptionEngine {
    profile: RegionProfile,
    policy: ThresholdPolicy,
}

impl ConsumptionEngine {
    pub fn new(profile: RegionProfile, policy: ThresholdPolicy) -> Self {
        Self { profile, policy }
    }

    /// Processes one reading.
    ///
    /// `interval_hours` is the poll interval in effect; `today` anchors
    /// `days_since_delivery`. Returns the enriched record and the tank's new
    /// state. The state is `None` only when the reading failed validation and
    /// the tank had no prior state: nothing is created for a tank until it
    /// produces one good reading.
    pub fn process_reading(
        &self,
        reading: &TankReading,
        prior: Option<&ConsumptionState>,
        interval_hours: f64,
        today: NaiveDate,
    ) -> Result<(EnrichedTank, Option<ConsumptionState>), ConsumptionError> {
        let tank_id = reading.tank_id.trim();
        if tank_id.is_empty() {
            return Err(ConsumptionError::MissingTankId);
        }

        let interval_hours = interval_hours.max(MIN_INTERVAL_HOURS);
        let days_since_delivery = days_since_delivery(reading.last_delivery_date.as_deref(), today);
        let prior_total = prior.map_or(0.0, |s| s.cumulative_energy);

        let valid = match validate_reading(reading, &self.profile) {
            Ok(valid) => valid,
            Err(flag) => {
                debug!(tank_id, quality = %flag, "Tank data validation failed");
                let state = prior.map(|s| ConsumptionState {
                    quality_flag: flag,
                    ..s.clone()
                });
                let tank = EnrichedTank {
                    reading: reading.clone(),
                    consumption_total: prior_total,
                    consumption_rate: 0.0,
                    data_quality: flag,
                    refill_detected: false,
                    consumption_anomaly: false,
                    days_since_delivery,
                };
                return Ok((tank, state));
            }
        };

        let limits = resolve_thresholds(&self.policy, &self.profile, valid.tank_size, interval_hours);
        let mut total = prior_total;
        let mut energy = 0.0;
        let mut refill_detected = false;
        let mut consumption_anomaly = false;

        if let Some(previous) = prior.and_then(|s| s.previous_volume) {
            let consumed = previous - valid.current_volume;
            if consumed < 0.0 {
                info!(tank_id, previous, current = valid.current_volume, "Tank was refilled");
                refill_detected = true;
            } else if consumed > 0.0 {
                energy = consumed * self.profile.volume_to_energy_factor;
                total += energy;
                if consumed > limits.max {
                    warn!(tank_id, consumed, threshold = limits.max, "High consumption");
                    consumption_anomaly = true;
                } else if consumed < limits.min {
                    info!(tank_id, consumed, threshold = limits.min, "Low consumption");
                } else {
                    debug!(tank_id, consumed, total, "Tank consumed");
                }
            }
        }

        let rate = if energy > 0.0 {
            round4(energy / interval_hours)
        } else {
            0.0
        };
        if !total.is_finite() || !rate.is_finite() {
            return Err(ConsumptionError::NonFinite(tank_id.to_string()));
        }

        let tank = EnrichedTank {
            reading: reading.clone(),
            consumption_total: total,
            consumption_rate: rate,
            data_quality: QualityFlag::Good,
            refill_detected,
            consumption_anomaly,
            days_since_delivery,
        };
        let state = ConsumptionState {
            previous_volume: Some(valid.current_volume),
            cumulative_energy: total,
            quality_flag: QualityFlag::Good,
        };
        Ok((tank, Some(state)))
    }
}

/// Whole days from an ISO `YYYY-MM-DD` delivery date to `today`.
pub fn days_since_delivery(date: Option<&str>, today: NaiveDate) -> Option<i64> {
    let delivered = NaiveDate::parse_from_str(date?.trim(), "%Y-%m-%d").ok()?;
    Some((today - delivered).num_days())
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Reading validation.
///
/// Checks run in order and the first failure decides the quality flag:
/// tank size within region bounds, level within 0–100, then the reported
/// volume against the volume implied by level × size.

use crate::model::{QualityFlag, TankReading};
use crate::regions::RegionProfile;
use tracing::warn;

/// Allowed relative difference between reported and implied volume.
pub const DATA_VALIDATION_TOLERANCE: f64 = 0.10;

const MAX_LEVEL_PERCENT: f64 = 100.0;

/// The numeric fields of a reading that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedReading {
    pub tank_size: f64,
    pub level_percent: f64,
    pub current_volume: f64,
}

pub fn validate_reading(reading: &TankReading, profile: &RegionProfile) -> Result<ValidatedReading, QualityFlag> {
    let tank_id = reading.tank_id.as_str();

    let tank_size = match reading.tank_size {
        Some(size) if size.is_finite() && (profile.tank_size_min..=profile.tank_size_max).contains(&size) => size,
        other => {
            warn!(tank_id, tank_size = ?other, "Tank has unrealistic size");
            return Err(QualityFlag::InvalidTankSize);
        }
    };

    let level_percent = match reading.level_percent {
        Some(level) if (0.0..=MAX_LEVEL_PERCENT).contains(&level) => level,
        other => {
            warn!(tank_id, level = ?other, "Tank has invalid level");
            return Err(QualityFlag::InvalidLevel);
        }
    };

    let current_volume = match reading.current_volume {
        Some(volume) if volume.is_finite() => volume,
        other => {
            warn!(tank_id, current_volume = ?other, "Tank volume missing or not a number");
            return Err(QualityFlag::CalculationError);
        }
    };

    let expected = level_percent * tank_size / MAX_LEVEL_PERCENT;
    if expected > 0.0 {
        let variance = (current_volume - expected).abs() / expected;
        if variance > DATA_VALIDATION_TOLERANCE {
            warn!(
                tank_id,
                level_percent,
                expected,
                reported = current_volume,
                tank_size,
                variance_pct = variance * 100.0,
                "Tank data inconsistency"
            );
            return Err(QualityFlag::InconsistentValues);
        }
    }

    Ok(ValidatedReading {
        tank_size,
        level_percent,
        current_volume,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

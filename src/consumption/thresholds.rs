//! Consumption threshold resolution.
//!
//! A per-interval volume drop below `min` is logged as unusually low; above
//! `max` it is flagged as an anomaly. Thresholds are in the region's native
//! volume unit and are resolved fresh for every reading, because adaptive
//! thresholds scale with both tank size and the poll interval.

use crate::regions::RegionProfile;
use tracing::warn;

/// Smallest plausible hourly draw, as a fraction of tank size (pilot lights).
pub const MIN_CONSUMPTION_PERCENTAGE: f64 = 0.0001;
/// Largest plausible hourly draw, as a fraction of tank size.
pub const MAX_CONSUMPTION_PERCENTAGE: f64 = 0.05;

/// User-facing threshold settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    /// Scale with tank size and interval instead of using region defaults.
    pub adaptive: bool,
    pub min_override: Option<f64>,
    pub max_override: Option<f64>,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            adaptive: true,
            min_override: None,
            max_override: None,
        }
    }
}

/// Resolved bounds for one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumptionThresholds {
    pub min: f64,
    pub max: f64,
}

/// Picks the thresholds for a tank of `tank_size` over `interval_hours`.
///
/// Both overrides set: used as is. One override set: it wins for its bound
/// and the other comes from the adaptive bound (adaptive on) or the region
/// default (adaptive off). No overrides: adaptive bounds or region defaults.
/// Adaptive bounds are `size × {0.01%, 5%} × hours`, with the min raised to
/// the region's absolute minimum and the max capped at its absolute maximum.
/// A computed bound never crosses a single override; it is pinned to it.
pub fn resolve_thresholds(
    policy: &ThresholdPolicy,
    profile: &RegionProfile,
    tank_size: f64,
    interval_hours: f64,
) -> ConsumptionThresholds {
    if let (Some(min), Some(max)) = (policy.min_override, policy.max_override) {
        return ConsumptionThresholds { min, max };
    }

    let base = if policy.adaptive {
        adaptive_thresholds(profile, tank_size, interval_hours)
    } else {
        ConsumptionThresholds {
            min: profile.default_min_threshold,
            max: profile.default_max_threshold,
        }
    };

    match (policy.min_override, policy.max_override) {
        (Some(min), None) if base.max < min => {
            warn!(tank_size, computed_max = base.max, min, "Computed max below min override, using override");
            ConsumptionThresholds { min, max: min }
        }
        (None, Some(max)) if base.min > max => {
            warn!(tank_size, computed_min = base.min, max, "Computed min above max override, using override");
            ConsumptionThresholds { min: max, max }
        }
        (min, max) => ConsumptionThresholds {
            min: min.unwrap_or(base.min),
            max: max.unwrap_or(base.max),
        },
    }
}

fn adaptive_thresholds(profile: &RegionProfile, tank_size: f64, interval_hours: f64) -> ConsumptionThresholds {
    let min = tank_size * MIN_CONSUMPTION_PERCENTAGE * interval_hours;
    let max = tank_size * MAX_CONSUMPTION_PERCENTAGE * interval_hours;
    ConsumptionThresholds {
        min: min.max(profile.absolute_min_consumption),
        max: max.min(profile.absolute_max_consumption),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

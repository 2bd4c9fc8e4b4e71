/// Poll coordinator.
///
/// Owns one portal client, the consumption ledger and its store, and runs
/// poll cycles: fetch tanks and orders, push every tank through the
/// consumption engine, persist, publish. The coordinator is the only owner of
/// per-tank state; nothing else reads or writes the ledger while it runs.
///
/// Interval policy after a cycle:
///   success                   →  normal interval
///   communication failure     →  region retry interval
///   maintenance window        →  region maintenance interval
///   other client failure      →  region retry interval
///   authentication failure    →  unchanged, error goes to the caller

pub mod staleness;

use crate::config::ServiceConfig;
use crate::consumption::thresholds::ThresholdPolicy;
use crate::consumption::{ConsumptionEngine, ConsumptionLedger, ConsumptionState, days_since_delivery};
use crate::ingest::PortalClient;
use crate::logging::{log_cycle_summary, log_portal_failure};
use crate::model::{EnrichedTank, OrderTotals, PortalError, QualityFlag, TankReading, display_or_unknown};
use crate::regions::RegionProfile;
use crate::store::{StateStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub normal_interval: Duration,
    /// Publish tanks that are not on a delivery plan.
    pub include_unmonitored: bool,
    /// Oldest snapshot allowed to stand in for a failed cycle.
    pub max_stale_age: chrono::Duration,
}

impl PollSettings {
    /// Region defaults.
    pub fn for_profile(profile: &RegionProfile) -> Self {
        Self {
            normal_interval: profile.default_update_interval,
            include_unmonitored: false,
            max_stale_age: staleness::max_stale_age(),
        }
    }

    pub fn from_config(config: &ServiceConfig, profile: &RegionProfile) -> Self {
        Self {
            normal_interval: config.poll_interval(profile),
            include_unmonitored: config.include_unmonitored_tanks,
            max_stale_age: staleness::max_stale_age(),
        }
    }
}

/// What one successful cycle published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub tanks: Vec<EnrichedTank>,
    pub orders: OrderTotals,
    pub fetched_at: DateTime<Utc>,
}

/// One-line summary of a published tank in the region's units.
pub fn describe_tank(tank: &EnrichedTank, profile: &RegionProfile) -> String {
    format!(
        "{}: {}% ({} {}), total {:.2} {}, rate {} {}/h, {} days since delivery, {}",
        tank.reading.tank_id,
        display_or_unknown(tank.reading.level_percent.as_ref()),
        display_or_unknown(tank.reading.current_volume.as_ref()),
        profile.volume_unit,
        tank.consumption_total,
        profile.energy_unit,
        tank.consumption_rate,
        profile.energy_unit,
        display_or_unknown(tank.days_since_delivery.as_ref()),
        tank.data_quality,
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Data from this cycle.
    Fresh(Snapshot),
    /// This cycle failed; the last good snapshot is still young enough.
    Stale(Snapshot),
}

impl CycleOutcome {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            CycleOutcome::Fresh(s) | CycleOutcome::Stale(s) => s,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, CycleOutcome::Stale(_))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CycleError {
    /// Credentials are bad or the session cannot be recovered. The caller
    /// has to supply new credentials.
    #[error("Authentication required: {0}")]
    AuthenticationRequired(#[source] PortalError),
    #[error("Update failed: {0}")]
    UpdateFailed(#[source] PortalError),
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    client: Box<dyn PortalClient>,
    profile: RegionProfile,
    engine: ConsumptionEngine,
    ledger: ConsumptionLedger,
    store: Box<dyn StateStore>,
    settings: PollSettings,
    current_interval: Duration,
    last_success: Option<DateTime<Utc>>,
    last_snapshot: Option<Snapshot>,
}

impl Coordinator {
    pub fn new(
        client: Box<dyn PortalClient>,
        policy: ThresholdPolicy,
        store: Box<dyn StateStore>,
        settings: PollSettings,
    ) -> Self {
        let profile = client.profile().clone();
        let engine = ConsumptionEngine::new(profile.clone(), policy);
        let current_interval = settings.normal_interval;
        Self {
            client,
            profile,
            engine,
            ledger: ConsumptionLedger::new(),
            store,
            settings,
            current_interval,
            last_success: None,
            last_snapshot: None,
        }
    }

    /// Restores the ledger from the store. Returns the number of tanks
    /// restored.
    pub fn load_state(&mut self) -> Result<usize, StoreError> {
        self.ledger = ConsumptionLedger::load(self.store.as_ref())?;
        info!(region = %self.profile.region, tanks = self.ledger.len(), "Loaded consumption state");
        Ok(self.ledger.len())
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn ledger(&self) -> &ConsumptionLedger {
        &self.ledger
    }

    /// Runs one poll cycle as of `now`.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        let region = self.profile.region;
        let fetched = self
            .client
            .fetch_tanks()
            .and_then(|tanks| Ok((tanks, self.client.fetch_orders()?)));

        let (readings, orders) = match fetched {
            Ok(data) => data,
            Err(e) => {
                log_portal_failure(region, "poll cycle", &e);
                return self.handle_failure(e, now);
            }
        };

        let interval_hours = self.settings.normal_interval.as_secs_f64() / 3600.0;
        let today = now.date_naive();
        let mut tanks = Vec::with_capacity(readings.len());
        let mut good = 0;
        for reading in &readings {
            let tank = self.process_tank(reading, interval_hours, today);
            if tank.data_quality == QualityFlag::Good {
                good += 1;
            }
            tanks.push(tank);
        }

        if let Err(e) = self.ledger.save(self.store.as_ref(), now) {
            warn!(region = %region, error = %e, "Failed to save consumption state");
        }
        log_cycle_summary(region, tanks.len(), good, tanks.len() - good);

        if !self.settings.include_unmonitored {
            tanks.retain(|t| t.reading.is_on_delivery_plan);
        }

        let snapshot = Snapshot {
            tanks,
            orders,
            fetched_at: now,
        };
        self.current_interval = self.settings.normal_interval;
        self.last_success = Some(now);
        self.last_snapshot = Some(snapshot.clone());
        Ok(CycleOutcome::Fresh(snapshot))
    }

    /// Runs cycles until `shutdown` yields a message or its sender is
    /// dropped. Shutdown is only observed between cycles. An authentication
    /// failure ends the loop with an error.
    pub fn run(
        &mut self,
        shutdown: &Receiver<()>,
        mut on_outcome: impl FnMut(&CycleOutcome),
    ) -> Result<(), CycleError> {
        info!(
            region = %self.profile.region,
            interval_secs = self.settings.normal_interval.as_secs(),
            "Starting poll loop"
        );
        loop {
            match self.run_cycle(Utc::now()) {
                Ok(outcome) => on_outcome(&outcome),
                Err(e @ CycleError::AuthenticationRequired(_)) => {
                    error!(region = %self.profile.region, error = %e, "Stopping poll loop");
                    self.client.close();
                    return Err(e);
                }
                Err(e) => debug!(error = %e, "Cycle failed, waiting for next attempt"),
            }

            match shutdown.recv_timeout(self.current_interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!(region = %self.profile.region, "Poll loop shutting down");
                    self.client.close();
                    return Ok(());
                }
            }
        }
    }

    fn handle_failure(&mut self, err: PortalError, now: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        if err.is_authentication() {
            return Err(CycleError::AuthenticationRequired(err));
        }

        if let PortalError::Communication(_) = err {
            self.current_interval = if err.is_maintenance() {
                self.profile.maintenance_interval
            } else {
                self.profile.retry_interval
            };
            if staleness::is_fresh_at(self.last_success, self.settings.max_stale_age, now) {
                if let Some(snapshot) = &self.last_snapshot {
                    warn!(
                        region = %self.profile.region,
                        fetched_at = %snapshot.fetched_at,
                        "Serving last good snapshot"
                    );
                    return Ok(CycleOutcome::Stale(snapshot.clone()));
                }
            }
            return Err(CycleError::UpdateFailed(err));
        }

        self.current_interval = self.profile.retry_interval;
        Err(CycleError::UpdateFailed(err))
    }

    fn process_tank(&mut self, reading: &TankReading, interval_hours: f64, today: chrono::NaiveDate) -> EnrichedTank {
        let prior = self.ledger.get(&reading.tank_id);
        match self.engine.process_reading(reading, prior, interval_hours, today) {
            Ok((tank, state)) => {
                if let Some(state) = state {
                    self.ledger.update(reading.tank_id.clone(), state);
                }
                tank
            }
            Err(e) => {
                error!(tank_id = %reading.tank_id, error = %e, "Tank processing failed");
                let total = prior.map_or(0.0, |s| s.cumulative_energy);
                if let Some(state) = prior.cloned() {
                    self.ledger.update(
                        reading.tank_id.clone(),
                        ConsumptionState {
                            quality_flag: QualityFlag::Unknown,
                            ..state
                        },
                    );
                }
                EnrichedTank {
                    reading: reading.clone(),
                    consumption_total: total,
                    consumption_rate: 0.0,
                    data_quality: QualityFlag::Unknown,
                    refill_detected: false,
                    consumption_anomaly: false,
                    days_since_delivery: days_since_delivery(reading.last_delivery_date.as_deref(), today),
                }
            }
        }
    }
}

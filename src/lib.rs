//! Propane tank monitoring service.
//!
//! Logs into a propane supplier's customer portal, reads every tank on the
//! account, and turns successive level readings into cumulative energy
//! consumption that survives restarts.
//!
//! ```text
//! regions      portal profiles (US HTML portal, CA JSON portal)
//! ingest       session handling, scraping, paginated JSON
//! consumption  validation, thresholds, engine, per-tank ledger
//! store        versioned JSON state file
//! poll         poll cycle, backoff, stale-data fallback
//! verify       one-shot account check
//! ```

pub mod config;
pub mod consumption;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod poll;
pub mod regions;
pub mod store;
pub mod verify;

/// Portal session layer.
///
/// One `PortalClient` per configured account. The client owns its session
/// (cookies, CSRF token, authentication phase) and turns portal pages into
/// `TankReading`s and `OrderTotals`. Which client is built depends on the
/// region profile's `PortalKind`.

pub mod extract;
pub mod html_portal;
pub mod json_portal;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::config::Credentials;
use crate::model::{OrderTotals, PortalError, TankReading};
use crate::regions::{PortalKind, RegionProfile, RetryPolicy};
use session::SessionGate;
use std::thread;
use std::time::Duration;
use tracing::debug;

pub use html_portal::HtmlPortalClient;
pub use json_portal::JsonPortalClient;
pub use transport::{HttpTransport, PortalResponse, Transport};

/// Authenticated access to one account on a vendor portal.
///
/// Methods take `&self`; session state lives behind interior mutability so a
/// client can be shared between threads.
pub trait PortalClient: Send + Sync {
    fn profile(&self) -> &RegionProfile;

    /// Logs in unless a live session already exists.
    fn ensure_authenticated(&self) -> Result<(), PortalError>;

    /// All tanks on the account. Never returns an empty list: no tanks is an
    /// error.
    fn fetch_tanks(&self) -> Result<Vec<TankReading>, PortalError>;

    /// Delivery totals. Regions without an order history return zeros.
    fn fetch_orders(&self) -> Result<OrderTotals, PortalError>;

    /// True when a tank fetch succeeds and finds at least one tank.
    fn test_connection(&self) -> bool {
        match self.fetch_tanks() {
            Ok(tanks) => !tanks.is_empty(),
            Err(e) => {
                debug!(error = %e, "Connection test failed");
                false
            }
        }
    }

    /// Drops the session. The next call logs in again.
    fn close(&self);
}

/// Builds the client for a region over a real HTTP transport.
pub fn create_client(
    profile: &RegionProfile,
    credentials: Credentials,
) -> Result<Box<dyn PortalClient>, PortalError> {
    let transport = HttpTransport::new()?;
    let client: Box<dyn PortalClient> = match profile.kind {
        PortalKind::HtmlRows => Box::new(HtmlPortalClient::new(profile.clone(), credentials, transport)?),
        PortalKind::PaginatedJson => Box::new(JsonPortalClient::new(profile.clone(), credentials, transport)?),
    };
    Ok(client)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// Runs `op` up to `policy.attempts` times, retrying only errors that
/// `PortalError::is_retryable` accepts. The last error is returned as is.
pub(crate) fn with_retries<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: impl FnMut(u32) -> Result<T, PortalError>,
) -> Result<T, PortalError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = policy.delay_after(attempt);
                debug!(operation, attempt, attempts, error = %e, delay_secs = delay.as_secs(), "Retrying");
                pause(delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Runs `fetch`; if the portal reports the session expired, drops the
/// session and runs the whole fetch exactly once more.
pub(crate) fn retry_on_expiry<T>(
    gate: &SessionGate,
    mut fetch: impl FnMut() -> Result<T, PortalError>,
) -> Result<T, PortalError> {
    match fetch() {
        Err(PortalError::SessionExpired) => {
            debug!("Session expired during fetch, re-authenticating once");
            gate.invalidate();
            fetch()
        }
        result => result,
    }
}

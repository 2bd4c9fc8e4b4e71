/// Authentication state shared by all callers of one portal client.
///
/// A session is in one of four phases. Only one caller may run the login
/// sequence at a time; anyone else asking for a session while it is running
/// waits for it to finish and takes its result instead of logging in again.
///
/// ```text
///  Unauthenticated ──begin──▶ Authenticating ──succeeded──▶ Authenticated
///        ▲                         │ (dropped)                 │    │
///        └─────────────────────────┘                  invalidate   expire
///        ▲                                                     │    ▼
///        └─────────────────────────────────────────────────────┘  Expired
/// ```

use super::transport::Transport;
use super::pause;
use crate::model::PortalError;
use crate::regions::{RegionProfile, RetryPolicy};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
    /// The portal bounced a data request to its login page.
    Expired,
}

/// What `SessionGate::begin` decided.
pub enum AuthStart<'a> {
    /// A live session exists (possibly established by a concurrent caller).
    AlreadyAuthenticated,
    /// The login sequence this caller waited on failed.
    PeerFailed,
    /// The caller owns the login sequence.
    Proceed(AuthAttempt<'a>),
}

/// Ownership of an in-flight login. Dropping it without calling
/// [`AuthAttempt::succeeded`] returns the session to `Unauthenticated`.
pub struct AuthAttempt<'a> {
    gate: &'a SessionGate,
    ok: bool,
}

impl AuthAttempt<'_> {
    pub fn succeeded(mut self) {
        self.ok = true;
    }
}

impl Drop for AuthAttempt<'_> {
    fn drop(&mut self) {
        let next = if self.ok {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        };
        *self.gate.lock() = next;
        self.gate.changed.notify_all();
    }
}

#[derive(Debug)]
pub struct SessionGate {
    phase: Mutex<SessionPhase>,
    changed: Condvar,
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGate {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(SessionPhase::Unauthenticated),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> SessionPhase {
        *self.lock()
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionPhase::Authenticated
    }

    /// Claims the login sequence, or waits for the one already running.
    pub fn begin(&self) -> AuthStart<'_> {
        let mut phase = self.lock();
        let waited = *phase == SessionPhase::Authenticating;
        while *phase == SessionPhase::Authenticating {
            phase = self
                .changed
                .wait(phase)
                .unwrap_or_else(PoisonError::into_inner);
        }

        match *phase {
            SessionPhase::Authenticated => AuthStart::AlreadyAuthenticated,
            _ if waited => AuthStart::PeerFailed,
            _ => {
                *phase = SessionPhase::Authenticating;
                AuthStart::Proceed(AuthAttempt { gate: self, ok: false })
            }
        }
    }

    /// Forget a session that failed validation. Leaves an in-flight login alone.
    pub fn invalidate(&self) {
        self.transition(SessionPhase::Unauthenticated);
    }

    /// Record that the portal bounced us to its login page.
    pub fn expire(&self) {
        self.transition(SessionPhase::Expired);
    }

    fn transition(&self, next: SessionPhase) {
        let mut phase = self.lock();
        if *phase != SessionPhase::Authenticating {
            *phase = next;
        }
    }
}

// ---------------------------------------------------------------------------
// Session establishment shared by the portal clients
// ---------------------------------------------------------------------------

/// Makes sure the client holds a live session.
///
/// A session believed live is checked with one lightweight GET first: a non-OK
/// status or a redirect to the login page drops it (this never fails the
/// call). Without a live session, `authenticate` runs under the gate, followed
/// by the region's settle delay.
pub(crate) fn ensure_session<T, F>(
    profile: &RegionProfile,
    transport: &T,
    gate: &SessionGate,
    authenticate: F,
) -> Result<(), PortalError>
where
    T: Transport + ?Sized,
    F: FnOnce() -> Result<(), PortalError>,
{
    if gate.is_authenticated() {
        match transport.get(&profile.session_check_url(), profile.headers, profile.timeouts.light) {
            Ok(resp) if resp.is_ok() && !resp.landed_on(profile.login_marker) => {
                debug!("Session still valid");
                return Ok(());
            }
            Ok(resp) => {
                debug!(status = resp.status, final_url = %resp.final_url, "Session invalid, re-authenticating");
                gate.invalidate();
            }
            Err(e) => {
                debug!(error = %e, "Session check failed, re-authenticating");
                gate.invalidate();
                transport.clear_cookies();
            }
        }
    }

    match gate.begin() {
        AuthStart::AlreadyAuthenticated => Ok(()),
        AuthStart::PeerFailed => Err(PortalError::Authentication(
            "Concurrent authentication attempt failed".to_string(),
        )),
        AuthStart::Proceed(attempt) => {
            debug!("Starting authentication sequence");
            authenticate()?;
            attempt.succeeded();
            pause(profile.auth_settle_delay);
            debug!("Authentication completed");
            Ok(())
        }
    }
}

/// Reads the anti-forgery token from a cookie, reloading the login page
/// until the portal sets it.
pub(crate) fn cookie_csrf_token<T: Transport + ?Sized>(
    profile: &RegionProfile,
    transport: &T,
    cookie_name: &str,
) -> Result<String, PortalError> {
    let cookie_url = profile.url("/");
    if let Some(token) = transport.cookie(&cookie_url, cookie_name) {
        return Ok(token);
    }

    debug!(cookie = cookie_name, "CSRF cookie not set, loading login page");
    let RetryPolicy { attempts, .. } = profile.csrf_retry;
    for attempt in 1..=attempts {
        let last = attempt == attempts;
        match transport.get(&profile.login_page_url(), profile.headers, profile.timeouts.login) {
            Ok(resp) if resp.landed_on(profile.maintenance_marker) => {
                return Err(PortalError::Communication("Site under scheduled maintenance".to_string()));
            }
            Ok(_) => {
                if let Some(token) = transport.cookie(&cookie_url, cookie_name) {
                    return Ok(token);
                }
                warn!(attempt, attempts, "CSRF token still not found");
                if last {
                    break;
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(attempt, attempts, error = %e, "Timed out loading login page for CSRF token");
                if last {
                    return Err(PortalError::Communication(
                        "Timeout getting CSRF token after retries".to_string(),
                    ));
                }
            }
            Err(e) => return Err(e),
        }
        pause(profile.csrf_retry.delay_after(attempt));
    }

    Err(PortalError::Authentication(format!(
        "CSRF cookie '{}' not found after {} attempts",
        cookie_name, attempts
    )))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

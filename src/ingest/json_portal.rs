/// Client for portals that serve tanks from a paginated JSON endpoint.
///
/// The anti-forgery token lives in a cookie and has to accompany every POST.
/// These portals drop sessions aggressively, so when the profile asks for it
/// each tank fetch starts from a clean cookie jar and a fresh login.

use super::extract::{PageParser, TankPage, parse_tank_json, parse_tank_page};
use super::session::{SessionGate, cookie_csrf_token, ensure_session};
use super::transport::{PortalResponse, Transport};
use super::{PortalClient, pause, retry_on_expiry, with_retries};
use crate::config::Credentials;
use crate::model::{OrderTotals, PortalError, TankReading};
use crate::regions::{CsrfSource, RegionProfile};
use tracing::{Span, debug, info, info_span, warn};

const AJAX_HEADER: (&str, &str) = ("x-requested-with", "XMLHttpRequest");

pub struct JsonPortalClient<T: Transport> {
    profile: RegionProfile,
    credentials: Credentials,
    transport: T,
    session: SessionGate,
    parser: PageParser,
    span: Span,
}

impl<T: Transport> JsonPortalClient<T> {
    pub fn new(profile: RegionProfile, credentials: Credentials, transport: T) -> Result<Self, PortalError> {
        let parser = PageParser::new(&profile)?;
        let span = info_span!("portal", region = %profile.region);
        Ok(Self {
            profile,
            credentials,
            transport,
            session: SessionGate::new(),
            parser,
            span,
        })
    }

    fn ajax_headers<'a>(&'a self, referer: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut headers: Vec<(&str, &str)> = self.profile.headers.to_vec();
        headers.push(("referer", referer));
        headers.push(AJAX_HEADER);
        headers
    }

    fn csrf_token(&self) -> Result<String, PortalError> {
        match self.profile.csrf {
            CsrfSource::Cookie(name) => cookie_csrf_token(&self.profile, &self.transport, name),
            CsrfSource::HiddenField => {
                let resp = self.load_login_page()?;
                self.parser
                    .csrf_token(&resp.body)
                    .ok_or_else(|| PortalError::Authentication("CSRF token not found on login page".to_string()))
            }
        }
    }

    fn load_login_page(&self) -> Result<PortalResponse, PortalError> {
        let profile = &self.profile;
        let resp = self.transport.get(&profile.login_page_url(), profile.headers, profile.timeouts.login)?;
        if resp.landed_on(profile.maintenance_marker) {
            return Err(PortalError::Communication("Site under scheduled maintenance".to_string()));
        }
        if !resp.is_ok() {
            return Err(PortalError::Communication(format!(
                "Login page returned HTTP {}",
                resp.status
            )));
        }
        Ok(resp)
    }

    fn authenticate(&self) -> Result<(), PortalError> {
        self.load_login_page()?;
        let token = self.csrf_token()?;

        let form = self.profile.login_form(&self.credentials.username, &self.credentials.password, &token);
        let referer = self.profile.login_page_url();
        let headers = self.ajax_headers(&referer);
        let login_url = self.profile.login_url();

        with_retries(&self.profile.login_retry, "login", |_| {
            let resp = self.transport.post_form(&login_url, &headers, &form, self.profile.timeouts.login)?;
            self.check_login_response(&resp)
        })?;
        info!("Logged in to portal");
        Ok(())
    }

    fn check_login_response(&self, resp: &PortalResponse) -> Result<(), PortalError> {
        match self.profile.dashboard_marker {
            Some(marker) if resp.landed_on(marker) => return Ok(()),
            None if resp.is_ok() && !resp.landed_on(self.profile.login_marker) => return Ok(()),
            _ => {}
        }
        if resp.landed_on(self.profile.login_marker) {
            return Err(PortalError::Authentication("Login failed - redirected to login".to_string()));
        }
        let preview: String = resp.body.chars().take(200).collect();
        Err(PortalError::Client(format!("Unexpected login response: {}", preview)))
    }

    /// POSTs to a protected endpoint with the CSRF token prepended to the
    /// form. A bounce to the login page, or the login form served in place
    /// of the data, becomes `SessionExpired`.
    fn post_protected(&self, url: &str, fields: &[(&str, String)], what: &str) -> Result<PortalResponse, PortalError> {
        let token = self.csrf_token()?;
        let mut form = vec![(self.profile.auth_fields.csrf_token.to_string(), token)];
        form.extend(fields.iter().map(|(k, v)| (k.to_string(), v.clone())));

        let referer = self.profile.session_check_url();
        let resp = self
            .transport
            .post_form(url, &self.ajax_headers(&referer), &form, self.profile.timeouts.data)?;
        if resp.landed_on(self.profile.login_marker) || self.parser.has_login_form(&resp.body) {
            debug!(url, "Login page returned, session expired");
            self.session.expire();
            return Err(PortalError::SessionExpired);
        }
        if !resp.is_ok() {
            return Err(PortalError::Communication(format!(
                "Failed to get {}: HTTP {}",
                what, resp.status
            )));
        }
        Ok(resp)
    }

    fn read_page(&self, offset: usize) -> Result<TankPage, PortalError> {
        let page_size = self.profile.page_size.max(1);
        let fields = [
            ("limit", page_size.to_string()),
            ("offset", offset.to_string()),
            ("firstRun", (offset == 0).to_string()),
            ("listIndex", (offset + 1).to_string()),
        ];
        let resp = self.post_protected(&self.profile.data_url(), &fields, "tank data")?;
        parse_tank_page(&resp.body)
    }

    /// Walks the pages until the portal says it is done.
    ///
    /// A page that keeps failing after the retry budget ends the walk early
    /// with whatever was already collected; with nothing collected the error
    /// is surfaced.
    fn read_all_pages(&self) -> Result<Vec<TankReading>, PortalError> {
        let page_size = self.profile.page_size.max(1);
        let policy = self.profile.api_retry;
        let attempts = policy.attempts.max(1);
        let mut tanks: Vec<TankReading> = Vec::new();
        let mut offset = 0;

        loop {
            let mut attempt = 1;
            let page = loop {
                match self.read_page(offset) {
                    Ok(page) => break page,
                    Err(e) if e.is_retryable() && attempt < attempts => {
                        debug!(offset, attempt, attempts, error = %e, "Tank page failed, retrying");
                        pause(policy.delay_after(attempt));
                        attempt += 1;
                    }
                    Err(e) if e.is_retryable() && !tanks.is_empty() => {
                        warn!(collected = tanks.len(), error = %e, "Tank page failed after retries, returning partial results");
                        return Ok(tanks);
                    }
                    Err(PortalError::Decode(msg)) => {
                        return Err(PortalError::Client(format!(
                            "Failed to get valid JSON after retries: {}",
                            msg
                        )));
                    }
                    Err(e) => return Err(e),
                }
            };

            if !page.status {
                if !tanks.is_empty() && page.rows.is_empty() {
                    debug!("Status false with empty list, all tanks retrieved");
                    break;
                }
                return Err(PortalError::Client(format!(
                    "Tank API error: {}",
                    page.message.as_deref().unwrap_or("Unknown")
                )));
            }
            if page.rows.is_empty() {
                debug!(offset, "Empty tank list, all tanks retrieved");
                break;
            }

            for (index, row) in page.rows.iter().enumerate() {
                let tank_number = tanks.len() + 1;
                match parse_tank_json(row, tank_number) {
                    Some(tank) => tanks.push(tank),
                    None => warn!(offset, index, "Skipping tank without an id"),
                }
            }

            let finished = page.finished.unwrap_or(true) || page.rows.len() < page_size;
            debug!(offset, rows = page.rows.len(), finished, "Read tank page");
            if finished {
                break;
            }
            offset += page_size;
        }

        if tanks.is_empty() {
            return Err(PortalError::Client("No tanks found".to_string()));
        }
        debug!(count = tanks.len(), "Parsed tanks");
        Ok(tanks)
    }
}

impl<T: Transport> PortalClient for JsonPortalClient<T> {
    fn profile(&self) -> &RegionProfile {
        &self.profile
    }

    fn ensure_authenticated(&self) -> Result<(), PortalError> {
        let _entered = self.span.enter();
        ensure_session(&self.profile, &self.transport, &self.session, || self.authenticate())
    }

    fn fetch_tanks(&self) -> Result<Vec<TankReading>, PortalError> {
        let _entered = self.span.enter();
        if self.profile.reauth_every_fetch {
            debug!("Starting tank fetch from a fresh session");
            self.transport.clear_cookies();
            self.session.invalidate();
        }
        retry_on_expiry(&self.session, || {
            self.ensure_authenticated()?;
            self.read_all_pages()
        })
    }

    fn fetch_orders(&self) -> Result<OrderTotals, PortalError> {
        let _entered = self.span.enter();
        let Some(url) = self.profile.orders_url() else {
            debug!("Region has no order history endpoint");
            return Ok(OrderTotals::default());
        };
        retry_on_expiry(&self.session, || {
            self.ensure_authenticated()?;
            let resp = with_retries(&self.profile.api_retry, "orders", |_| {
                self.post_protected(&url, &[("firstRun", "true".to_string())], "orders")
            })?;
            Ok(self.parser.parse_orders(&resp.body))
        })
    }

    fn close(&self) {
        self.transport.clear_cookies();
        self.session.invalidate();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

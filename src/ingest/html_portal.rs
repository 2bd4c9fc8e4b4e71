/// Client for portals that render every tank as a row of one HTML page.
///
/// Login: clear cookies, load the login page for its anti-forgery token,
/// post the login form, then visit the warm-up pages the portal expects to
/// see before it will serve the tank page.

use super::extract::PageParser;
use super::session::{SessionGate, cookie_csrf_token, ensure_session};
use super::transport::{PortalResponse, Transport};
use super::{PortalClient, retry_on_expiry, with_retries};
use crate::config::Credentials;
use crate::model::{OrderTotals, PortalError, TankReading};
use crate::regions::{CsrfSource, RegionProfile};
use tracing::{Span, debug, info, info_span};

pub struct HtmlPortalClient<T: Transport> {
    profile: RegionProfile,
    credentials: Credentials,
    transport: T,
    session: SessionGate,
    parser: PageParser,
    span: Span,
}

impl<T: Transport> HtmlPortalClient<T> {
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

    fn authenticate(&self) -> Result<(), PortalError> {
        self.transport.clear_cookies();
        let token = self.csrf_token()?;
        self.login(&token)?;

        for path in self.profile.paths.warmup {
            let resp = self.transport.get(
                &self.profile.url(path),
                self.profile.headers,
                self.profile.timeouts.navigation,
            )?;
            debug!(path, status = resp.status, "Visited warm-up page");
        }
        Ok(())
    }

    fn csrf_token(&self) -> Result<String, PortalError> {
        let profile = &self.profile;
        if let CsrfSource::Cookie(name) = profile.csrf {
            return cookie_csrf_token(profile, &self.transport, name);
        }

        let resp = self.transport.get(&profile.login_page_url(), profile.headers, profile.timeouts.login)?;
        if resp.landed_on(profile.maintenance_marker) {
            return Err(PortalError::Communication("Site under scheduled maintenance".to_string()));
        }
        if !resp.is_ok() {
            return Err(PortalError::Communication(format!(
                "Failed to get login page: HTTP {}",
                resp.status
            )));
        }
        self.parser
            .csrf_token(&resp.body)
            .ok_or_else(|| PortalError::Authentication("CSRF token not found on login page".to_string()))
    }

    fn login(&self, token: &str) -> Result<(), PortalError> {
        let form = self.profile.login_form(&self.credentials.username, &self.credentials.password, token);
        let resp = self.transport.post_form(
            &self.profile.login_url(),
            self.profile.headers,
            &form,
            self.profile.timeouts.login,
        )?;

        if resp.landed_on(self.profile.login_marker) || !resp.is_ok() {
            return Err(PortalError::Authentication("Login failed - invalid credentials".to_string()));
        }
        info!("Logged in to portal");
        Ok(())
    }

    /// GETs a protected page, turning a bounce to the login page into
    /// `SessionExpired`.
    fn get_protected(&self, url: &str, what: &str) -> Result<PortalResponse, PortalError> {
        with_retries(&self.profile.api_retry, what, |_| {
            let resp = self.transport.get(url, self.profile.headers, self.profile.timeouts.data)?;
            if resp.landed_on(self.profile.login_marker) || self.parser.has_login_form(&resp.body) {
                debug!(url, "Redirected to login page, session expired");
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
        })
    }

    fn read_tank_page(&self) -> Result<Vec<TankReading>, PortalError> {
        let resp = self.get_protected(&self.profile.data_url(), "tank page")?;
        let tanks = self.parser.parse_tanks(&resp.body);
        if tanks.is_empty() {
            return Err(PortalError::Client("No tanks found".to_string()));
        }
        debug!(count = tanks.len(), "Parsed tanks");
        Ok(tanks)
    }
}

impl<T: Transport> PortalClient for HtmlPortalClient<T> {
    fn profile(&self) -> &RegionProfile {
        &self.profile
    }

    fn ensure_authenticated(&self) -> Result<(), PortalError> {
        let _entered = self.span.enter();
        ensure_session(&self.profile, &self.transport, &self.session, || self.authenticate())
    }

    fn fetch_tanks(&self) -> Result<Vec<TankReading>, PortalError> {
        let _entered = self.span.enter();
        retry_on_expiry(&self.session, || {
            self.ensure_authenticated()?;
            self.read_tank_page()
        })
    }

    fn fetch_orders(&self) -> Result<OrderTotals, PortalError> {
        let _entered = self.span.enter();
        let Some(url) = self.profile.orders_url() else {
            debug!("Region has no order history page");
            return Ok(OrderTotals::default());
        };
        retry_on_expiry(&self.session, || {
            self.ensure_authenticated()?;
            let resp = self.get_protected(&url, "orders page")?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::{
        Method, Reply, ScriptedTransport, US_LOGIN_PAGE, US_LOGIN_PAGE_NO_TOKEN, us_tank_page, us_tank_row,
    };
    use crate::ingest::session::SessionPhase;
    use crate::regions::{RetryPolicy, US_PROFILE};
    use std::time::Duration;

    fn profile() -> RegionProfile {
        let mut p = US_PROFILE.clone();
        p.api_retry = RetryPolicy { attempts: 2, base_delay: Duration::ZERO, step: Duration::ZERO };
        p
    }

    fn client(transport: &ScriptedTransport) -> HtmlPortalClient<ScriptedTransport> {
        HtmlPortalClient::new(profile(), Credentials::new("user@example.com", "hunter2"), transport.clone())
            .expect("client should build")
    }

    /// Login page, login POST landing on the home page, and warm-up pages.
    fn script_login(transport: &ScriptedTransport) {
        let p = profile();
        transport
            .on(Method::Get, p.login_page_url(), Reply::ok(US_LOGIN_PAGE))
            .on(Method::Post, p.login_url(), Reply::redirect_to(p.url("/"), "<html>home</html>"))
            .on(Method::Get, p.url("/Customers"), Reply::ok("<html>customers</html>"));
    }

    fn tank_page() -> String {
        us_tank_page(&[us_tank_row("123 Main St", 500, 56, 280), us_tank_row("9 Elm Rd", 250, 40, 100)])
    }

    #[test]
    fn test_first_fetch_logs_in_then_reads_tanks() {
        let p = profile();
        let transport = ScriptedTransport::new();
        script_login(&transport);
        transport
            .on(Method::Get, p.url("/"), Reply::ok("<html>home</html>"))
            .on(Method::Get, p.data_url(), Reply::ok(tank_page()));

        let tanks = client(&transport).fetch_tanks().expect("fetch should succeed");
        assert_eq!(tanks.len(), 2);

        let requests = transport.requests();
        let login = requests.iter().find(|r| r.method == Method::Post).expect("login POST");
        assert_eq!(login.field("__RequestVerificationToken"), Some("csrf-abc123"));
        assert_eq!(login.field("EmailAddress"), Some("user@example.com"));
        assert_eq!(login.field("RememberMe"), Some("true"));

        let data_at = requests.iter().position(|r| r.url == p.data_url()).unwrap();
        let customers_at = requests.iter().position(|r| r.url == p.url("/Customers")).unwrap();
        assert!(customers_at < data_at, "warm-up pages come before the tank page");
    }

    #[test]
    fn test_invalid_credentials_are_authentication_error() {
        let p = profile();
        let transport = ScriptedTransport::new();
        transport
            .on(Method::Get, p.login_page_url(), Reply::ok(US_LOGIN_PAGE))
            .on(Method::Post, p.login_url(), Reply::redirect_to(p.login_page_url(), US_LOGIN_PAGE));

        let c = client(&transport);
        let err = c.fetch_tanks().unwrap_err();
        assert_eq!(err, PortalError::Authentication("Login failed - invalid credentials".into()));
        assert_eq!(c.session.phase(), SessionPhase::Unauthenticated);
        assert_eq!(transport.count(Method::Get, &p.data_url()), 0);
    }

    #[test]
    fn test_missing_csrf_token_is_authentication_error() {
        let p = profile();
        let transport = ScriptedTransport::new();
        transport.on(Method::Get, p.login_page_url(), Reply::ok(US_LOGIN_PAGE_NO_TOKEN));

        let err = client(&transport).fetch_tanks().unwrap_err();
        assert!(matches!(err, PortalError::Authentication(ref m) if m.contains("CSRF")), "got {:?}", err);
    }

    #[test]
    fn test_login_page_error_status_is_communication_error() {
        let p = profile();
        let transport = ScriptedTransport::new();
        transport.on(Method::Get, p.login_page_url(), Reply::status(503));

        let err = client(&transport).fetch_tanks().unwrap_err();
        assert_eq!(err, PortalError::Communication("Failed to get login page: HTTP 503".into()));
    }

    #[test]
    fn test_stale_session_is_refreshed_before_data_request() {
        let p = profile();
        let transport = ScriptedTransport::new();
        script_login(&transport);
        transport
            // warm-up of the first login, then the session check of the second fetch
            .on(Method::Get, p.url("/"), Reply::ok("<html>home</html>"))
            .on(Method::Get, p.url("/"), Reply::redirect_to(p.login_page_url(), US_LOGIN_PAGE))
            .on(Method::Get, p.url("/"), Reply::ok("<html>home</html>"))
            .on(Method::Get, p.data_url(), Reply::ok(tank_page()));

        let c = client(&transport);
        c.fetch_tanks().expect("first fetch");
        let logins_before = transport.count(Method::Post, &p.login_url());

        c.fetch_tanks().expect("second fetch");
        assert_eq!(
            transport.count(Method::Post, &p.login_url()),
            logins_before + 1,
            "a session that fails validation must log in again"
        );

        let requests = transport.requests();
        let last_login = requests.iter().rposition(|r| r.method == Method::Post).unwrap();
        let last_data = requests.iter().rposition(|r| r.url == p.data_url()).unwrap();
        assert!(last_login < last_data, "re-authentication happens before the data request");
    }

    #[test]
    fn test_expired_session_on_data_page_is_retried_once() {
        let p = profile();
        let transport = ScriptedTransport::new();
        script_login(&transport);
        transport
            .on(Method::Get, p.url("/"), Reply::ok("<html>home</html>"))
            .on(Method::Get, p.data_url(), Reply::redirect_to(p.login_page_url(), US_LOGIN_PAGE))
            .on(Method::Get, p.data_url(), Reply::ok(tank_page()));

        let tanks = client(&transport).fetch_tanks().expect("retry after expiry should succeed");
        assert_eq!(tanks.len(), 2);
        assert_eq!(transport.count(Method::Post, &p.login_url()), 2);
        assert_eq!(transport.count(Method::Get, &p.data_url()), 2);
    }

    #[test]
    fn test_login_form_in_data_page_means_expired() {
        let p = profile();
        let transport = ScriptedTransport::new();
        script_login(&transport);
        transport
            .on(Method::Get, p.url("/"), Reply::ok("<html>home</html>"))
            .on(Method::Get, p.data_url(), Reply::ok(US_LOGIN_PAGE));

        let err = client(&transport).fetch_tanks().unwrap_err();
        assert_eq!(err, PortalError::SessionExpired, "second expiry in a row is surfaced");
        assert_eq!(transport.count(Method::Get, &p.data_url()), 2);
    }

    #[test]
    fn test_empty_tank_page_is_client_error() {
        let p = profile();
        let transport = ScriptedTransport::new();
        script_login(&transport);
        transport
            .on(Method::Get, p.url("/"), Reply::ok("<html>home</html>"))
            .on(Method::Get, p.data_url(), Reply::ok(us_tank_page(&[])));

        let err = client(&transport).fetch_tanks().unwrap_err();
        assert_eq!(err, PortalError::Client("No tanks found".into()));
    }

    #[test]
    fn test_data_page_timeout_is_retried() {
        let p = profile();
        let transport = ScriptedTransport::new();
        script_login(&transport);
        transport
            .on(Method::Get, p.url("/"), Reply::ok("<html>home</html>"))
            .on(Method::Get, p.data_url(), Reply::timeout())
            .on(Method::Get, p.data_url(), Reply::ok(tank_page()));

        let tanks = client(&transport).fetch_tanks().expect("second attempt should succeed");
        assert_eq!(tanks.len(), 2);
        assert_eq!(transport.count(Method::Get, &p.data_url()), 2);
    }

    #[test]
    fn test_region_without_orders_returns_zero_totals() {
        let transport = ScriptedTransport::new();
        let totals = client(&transport).fetch_orders().expect("no request needed");
        assert_eq!(totals, OrderTotals::default());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_close_forgets_session() {
        let p = profile();
        let transport = ScriptedTransport::new();
        script_login(&transport);
        transport
            .on(Method::Get, p.url("/"), Reply::ok("<html>home</html>"))
            .on(Method::Get, p.data_url(), Reply::ok(tank_page()));

        let c = client(&transport);
        assert!(c.test_connection());
        c.close();
        assert!(!c.session.is_authenticated());
    }
}

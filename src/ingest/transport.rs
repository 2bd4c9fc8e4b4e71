/// HTTP transport for the portal session layer.
///
/// The portal clients never touch reqwest directly: they talk to a
/// `Transport`, which hands back the final URL after redirects (how the
/// portals signal "you are not logged in") along with status and body, and
/// exposes the session cookie jar. `HttpTransport` is the real implementation;
/// tests script one in memory.

use crate::model::PortalError;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::cookie::{CookieStore, Jar};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Response to a GET or POST, after redirects have been followed.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalResponse {
    /// Requested URL.
    pub url: String,
    /// URL the last redirect landed on.
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

impl PortalResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when the request ended up on a URL containing `marker`.
    pub fn landed_on(&self, marker: &str) -> bool {
        !marker.is_empty() && self.final_url.contains(marker)
    }
}

/// The network seam of a portal session. Every call carries its own timeout;
/// a timeout surfaces as `PortalError::Communication`.
pub trait Transport: Send + Sync {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<PortalResponse, PortalError>;

    /// POST an `application/x-www-form-urlencoded` body.
    fn post_form(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        form: &[(String, String)],
        timeout: Duration,
    ) -> Result<PortalResponse, PortalError>;

    /// Value of the named cookie the jar would send to `url`.
    fn cookie(&self, url: &str, name: &str) -> Option<String>;

    /// Drop every cookie, i.e. forget the session.
    fn clear_cookies(&self);
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

struct HttpInner {
    client: Client,
    jar: Arc<Jar>,
}

impl HttpInner {
    fn build() -> Result<Self, PortalError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| PortalError::Client(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, jar })
    }
}

/// Blocking reqwest client with a cookie jar that can be reset.
pub struct HttpTransport {
    inner: Mutex<HttpInner>,
}

impl HttpTransport {
    pub fn new() -> Result<Self, PortalError> {
        Ok(Self {
            inner: Mutex::new(HttpInner::build()?),
        })
    }

    /// reqwest clients are cheap handles; clone one out so the lock is not
    /// held across the request.
    fn client(&self) -> Client {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .client
            .clone()
    }

    fn send(url: &str, request: RequestBuilder) -> Result<PortalResponse, PortalError> {
        let response = request.send().map_err(|e| map_reqwest_error(url, e))?;
        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| map_reqwest_error(url, e))?;

        Ok(PortalResponse {
            url: url.to_string(),
            final_url,
            status,
            body,
        })
    }
}

fn with_headers(mut request: RequestBuilder, headers: &[(&str, &str)]) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    request
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> PortalError {
    if err.is_timeout() {
        PortalError::Communication(format!("Timeout requesting {}", url))
    } else {
        PortalError::Communication(format!("Request to {} failed: {}", url, err))
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<PortalResponse, PortalError> {
        let request = with_headers(self.client().get(url).timeout(timeout), headers);
        Self::send(url, request)
    }

    fn post_form(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        form: &[(String, String)],
        timeout: Duration,
    ) -> Result<PortalResponse, PortalError> {
        let request = with_headers(self.client().post(url).timeout(timeout), headers).form(form);
        Self::send(url, request)
    }

    fn cookie(&self, url: &str, name: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let jar = Arc::clone(&self.inner.lock().unwrap_or_else(PoisonError::into_inner).jar);
        let header = jar.cookies(&url)?;
        find_cookie(header.to_str().ok()?, name)
    }

    fn clear_cookies(&self) {
        // Jar has no clear(); start over with a fresh client and jar.
        match HttpInner::build() {
            Ok(fresh) => *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = fresh,
            Err(e) => tracing::warn!(error = %e, "Could not reset cookie jar"),
        }
    }
}

/// Picks one cookie out of a `Cookie:` header value (`a=1; b=2`).
fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

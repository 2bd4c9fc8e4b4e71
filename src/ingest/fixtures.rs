/// In-memory `Transport` and sample portal pages for unit tests.
///
/// Replies are queued per (method, URL). Each request pops the next reply for
/// its route; once the queue is drained the last reply keeps being served.

use super::transport::{PortalResponse, Transport};
use crate::model::PortalError;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub form: Vec<(String, String)>,
    pub timeout: Duration,
}

impl RecordedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Page {
        status: u16,
        final_url: Option<String>,
        body: String,
        cookies: Vec<(String, String)>,
    },
    Timeout,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Reply::Page { status: 200, final_url: None, body: body.into(), cookies: Vec::new() }
    }

    pub fn status(code: u16) -> Self {
        Reply::Page { status: code, final_url: None, body: String::new(), cookies: Vec::new() }
    }

    /// A 200 that ended up somewhere else after redirects.
    pub fn redirect_to(final_url: impl Into<String>, body: impl Into<String>) -> Self {
        Reply::Page {
            status: 200,
            final_url: Some(final_url.into()),
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    pub fn timeout() -> Self {
        Reply::Timeout
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        if let Reply::Page { cookies, .. } = &mut self {
            cookies.push((name.to_string(), value.to_string()));
        }
        self
    }
}

struct Route {
    method: Method,
    url: String,
    queued: VecDeque<Reply>,
    last: Option<Reply>,
}

#[derive(Default)]
struct Script {
    routes: Vec<Route>,
    cookies: BTreeMap<String, String>,
    requests: Vec<RecordedRequest>,
}

/// Clones share one script, so a test can keep a handle after moving the
/// transport into a client.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, url: impl Into<String>, reply: Reply) -> &Self {
        let url = url.into();
        let mut script = self.script.lock().unwrap();
        match script.routes.iter_mut().find(|r| r.method == method && r.url == url) {
            Some(route) => route.queued.push_back(reply),
            None => script.routes.push(Route {
                method,
                url,
                queued: VecDeque::from([reply]),
                last: None,
            }),
        }
        self
    }

    pub fn set_cookie(&self, name: &str, value: &str) {
        self.script.lock().unwrap().cookies.insert(name.to_string(), value.to_string());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests().iter().filter(|r| r.method == method && r.url == url).count()
    }

    fn respond(
        &self,
        method: Method,
        url: &str,
        form: &[(String, String)],
        timeout: Duration,
    ) -> Result<PortalResponse, PortalError> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(RecordedRequest {
            method,
            url: url.to_string(),
            form: form.to_vec(),
            timeout,
        });

        let reply = script
            .routes
            .iter_mut()
            .find(|r| r.method == method && r.url == url)
            .and_then(|route| match route.queued.pop_front() {
                Some(reply) => {
                    route.last = Some(reply.clone());
                    Some(reply)
                }
                None => route.last.clone(),
            });

        match reply {
            None => Err(PortalError::Communication(format!(
                "no scripted reply for {:?} {}",
                method, url
            ))),
            Some(Reply::Timeout) => Err(PortalError::Communication(format!("Timeout requesting {}", url))),
            Some(Reply::Page { status, final_url, body, cookies }) => {
                script.cookies.extend(cookies);
                Ok(PortalResponse {
                    url: url.to_string(),
                    final_url: final_url.unwrap_or_else(|| url.to_string()),
                    status,
                    body,
                })
            }
        }
    }
}

impl Transport for ScriptedTransport {
    fn get(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<PortalResponse, PortalError> {
        self.respond(Method::Get, url, &[], timeout)
    }

    fn post_form(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        form: &[(String, String)],
        timeout: Duration,
    ) -> Result<PortalResponse, PortalError> {
        self.respond(Method::Post, url, form, timeout)
    }

    fn cookie(&self, _url: &str, name: &str) -> Option<String> {
        self.script.lock().unwrap().cookies.get(name).cloned()
    }

    fn clear_cookies(&self) {
        self.script.lock().unwrap().cookies.clear();
    }
}

// ---------------------------------------------------------------------------
// Sample pages
// ---------------------------------------------------------------------------

pub const US_LOGIN_PAGE: &str = r#"<html><body>
<form action="/Account/Login" method="post">
  <input name="__RequestVerificationToken" type="hidden" value="csrf-abc123" />
  <input name="EmailAddress" type="text" />
  <input name="Password" type="password" />
</form>
</body></html>"#;

pub const US_LOGIN_PAGE_NO_TOKEN: &str = r#"<html><body>
<form action="/Account/Login" method="post"><input name="EmailAddress" /></form>
</body></html>"#;

pub const CA_LOGIN_PAGE: &str = r#"<html><body>
<form id="loginForm" action="/account/loginFirst" method="post">
  <input name="login_email" type="email" />
  <input name="login_password" type="password" />
</form>
</body></html>"#;

/// One tank row as the US portal renders it.
pub fn us_tank_row(address: &str, size: u32, level: u32, gallons: u32) -> String {
    format!(
        r#"<div class="tank-row">
  <div class="col-md-2">{address}<br/>Springfield, IL</div>
  <div class="col-md-3">{size} gal. Propane Tank</div>
  <div class="progress"><div class="progress-bar" aria-valuenow="{level}" style="width:{level}%"></div></div>
  <div><span>Approximately {gallons} gallons in tank</span></div>
  <div><span>Reading Date: 3/14/2024</span></div>
  <div><span>Last Delivery: 1/5/2024</span></div>
  <div><span>Price: $2.49/gal</span></div>
</div>"#
    )
}

pub fn us_tank_page(rows: &[String]) -> String {
    format!("<html><body><div class=\"tanks\">{}</div></body></html>", rows.concat())
}

/// One tank object as the CA portal returns it.
pub fn ca_tank(id: u32) -> serde_json::Value {
    serde_json::json!({
        "adds_tank_id": id.to_string(),
        "adds_tank_size": "1000",
        "adds_serial_number": format!(" SN{} ", id),
        "adds_customer_number": 42,
        "tank_name": format!("Tank {}", id),
        "adds_location": "1 King St W, Toronto",
        "adds_fill_percentage": "50",
        "adds_fill": "500",
        "adds_last_fill": "2024-01-05 09:30:00",
        "adds_last_reading": "2024-03-14",
        "isOnDeliveryPlan": "1"
    })
}

/// A tank page envelope; `data` is a JSON-encoded string like the portal's.
pub fn ca_tank_page(first_id: u32, count: u32, finished: bool) -> String {
    let tanks: Vec<_> = (first_id..first_id + count).map(ca_tank).collect();
    serde_json::json!({
        "status": true,
        "data": serde_json::Value::Array(tanks).to_string(),
        "finished": finished
    })
    .to_string()
}

pub const CA_ORDERS_PAGE: &str = r#"<html><body>
<div class="orders__row cf">
  <div>2024-01-05</div><div>#1001</div><div>PROPANE</div><div>1,250.5 L</div><div>$1,012.40</div>
</div>
<div class="orders__row cf">
  <div>2023-11-02</div><div>#0999</div><div>Propane Delivery</div><div>800 L</div><div>$640.00</div>
</div>
<div class="orders__row cf">
  <div>2023-10-01</div><div>#0998</div><div>TANK RENTAL</div><div>1 ea</div><div>$75.00</div>
</div>
<div class="orders__row cf">
  <div>header only</div>
</div>
</body></html>"#;

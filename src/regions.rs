/// Region profile registry for the propane tank monitoring service.
///
/// Each supported vendor portal region is described by one immutable
/// `RegionProfile`: where its pages live, how its login form is shaped, which
/// selectors and patterns pull tank data out of its markup, how to convert
/// volume to energy, and the bounds used to validate readings. This is the
/// single source of truth for region behavior. The portal clients and the
/// consumption engine read everything region-specific from here.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Region identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Us,
    Ca,
}

impl Region {
    /// Lowercase code used in configuration and persisted state.
    pub fn code(&self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Ca => "ca",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code().to_uppercase())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "us" => Ok(Region::Us),
            "ca" => Ok(Region::Ca),
            other => Err(format!(
                "Unsupported region: {}. Supported: {}",
                other,
                all_regions().iter().map(|r| r.code()).collect::<Vec<_>>().join(", ")
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Profile building blocks
// ---------------------------------------------------------------------------

/// How the portal hands out tank data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalKind {
    /// One HTML page with a repeated row element per tank.
    HtmlRows,
    /// Form-encoded POSTs returning `{status, data, finished}` pages.
    PaginatedJson,
}

/// Where the anti-forgery token comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfSource {
    /// Hidden `<input>` on the login page, located with `Selectors::csrf_input`.
    HiddenField,
    /// A cookie the portal sets when the login page is loaded.
    Cookie(&'static str),
}

/// Form field names posted to the login endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthFields {
    pub email: &'static str,
    pub password: &'static str,
    /// Sent as `"true"` when present.
    pub remember_me: Option<&'static str>,
    pub csrf_token: &'static str,
}

/// Paths relative to `RegionProfile::base_url`.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalPaths {
    pub login_page: &'static str,
    pub login_endpoint: &'static str,
    /// Protected page requested to check that a session is still alive.
    pub session_check: &'static str,
    pub data: &'static str,
    pub orders: Option<&'static str>,
    /// Pages the portal must see after login before it serves tank data.
    pub warmup: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selectors {
    pub tank_row: &'static str,
    pub address: &'static str,
    pub tank_info: &'static str,
    pub progress_bar: &'static str,
    pub csrf_input: &'static str,
    /// Presence of this element in a data page means the session expired.
    pub login_form: &'static str,
    pub order_row: &'static str,
}

/// Regexes applied to row text. Each must have one capture group.
#[derive(Debug, Clone, PartialEq)]
pub struct Patterns {
    pub tank_size: &'static str,
    pub volume_in_tank: &'static str,
    pub reading_date: &'static str,
    pub last_delivery: &'static str,
    pub price: &'static str,
}

/// Bounded retry: `attempts` tries in total, sleeping
/// `base_delay + attempt * step` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given 1-based attempt failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay + self.step * attempt
    }
}

/// Per-purpose request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Session checks and other lightweight GETs.
    pub light: Duration,
    pub login: Duration,
    /// Post-login navigation (warm-up pages).
    pub navigation: Duration,
    pub data: Duration,
}

// ---------------------------------------------------------------------------
// Region profile
// ---------------------------------------------------------------------------

/// Immutable description of one region's portal and accounting rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionProfile {
    pub region: Region,
    pub name: &'static str,
    pub kind: PortalKind,
    pub base_url: &'static str,
    pub paths: PortalPaths,
    pub auth_fields: AuthFields,
    pub csrf: CsrfSource,
    pub selectors: Selectors,
    pub patterns: Patterns,
    /// Browser-like headers sent with every request.
    pub headers: &'static [(&'static str, &'static str)],
    /// Substring of a URL that means "this is the login page".
    pub login_marker: &'static str,
    /// Substring of the post-login URL that confirms success, when the
    /// portal redirects somewhere recognizable.
    pub dashboard_marker: Option<&'static str>,
    pub maintenance_marker: &'static str,

    pub volume_unit: &'static str,
    pub energy_unit: &'static str,
    pub volume_to_energy_factor: f64,

    pub default_update_interval: Duration,
    /// Poll interval after a failed cycle.
    pub retry_interval: Duration,
    /// Poll interval while the portal reports scheduled maintenance.
    pub maintenance_interval: Duration,

    // Thresholds and validation bounds, in native volume units
    pub default_min_threshold: f64,
    pub default_max_threshold: f64,
    pub absolute_min_consumption: f64,
    pub absolute_max_consumption: f64,
    pub tank_size_min: f64,
    pub tank_size_max: f64,

    pub api_retry: RetryPolicy,
    pub csrf_retry: RetryPolicy,
    /// Login POSTs that time out or bounce back to the login page.
    pub login_retry: RetryPolicy,
    pub timeouts: Timeouts,
    /// Pause after a successful login before the first data request.
    pub auth_settle_delay: Duration,
    pub page_size: usize,
    /// Drop cookies and log in again at the start of every tank fetch.
    pub reauth_every_fetch: bool,
}

impl RegionProfile {
    /// Absolute URL for a portal path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn login_page_url(&self) -> String {
        self.url(self.paths.login_page)
    }

    pub fn login_url(&self) -> String {
        self.url(self.paths.login_endpoint)
    }

    pub fn session_check_url(&self) -> String {
        self.url(self.paths.session_check)
    }

    pub fn data_url(&self) -> String {
        self.url(self.paths.data)
    }

    pub fn orders_url(&self) -> Option<String> {
        self.paths.orders.map(|p| self.url(p))
    }

    /// Form body for the login POST.
    pub fn login_form(&self, username: &str, password: &str, csrf_token: &str) -> Vec<(String, String)> {
        let mut form = vec![
            (self.auth_fields.csrf_token.to_string(), csrf_token.to_string()),
            (self.auth_fields.email.to_string(), username.to_string()),
            (self.auth_fields.password.to_string(), password.to_string()),
        ];
        if let Some(remember) = self.auth_fields.remember_me {
            form.push((remember.to_string(), "true".to_string()));
        }
        form
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

const US_HEADERS: &[(&str, &str)] = &[
    ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    ("accept-language", "en-US,en;q=0.9"),
    ("cache-control", "max-age=0"),
    ("origin", "https://mysuperioraccountlogin.com"),
    ("referer", "https://mysuperioraccountlogin.com/Account/Login?ReturnUrl=%2F"),
    ("upgrade-insecure-requests", "1"),
    (
        "user-agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    ),
];

const CA_HEADERS: &[(&str, &str)] = &[
    ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    ("accept-language", "en-US,en;q=0.9,fr-CA;q=0.8"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    ("origin", "https://mysuperior.superiorpropane.com"),
    ("upgrade-insecure-requests", "1"),
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    ),
];

const DEFAULT_SELECTORS: Selectors = Selectors {
    tank_row: "div.tank-row",
    address: ".col-md-2",
    tank_info: ".col-md-3",
    progress_bar: "div.progress-bar",
    csrf_input: r#"input[name="__RequestVerificationToken"]"#,
    login_form: r#"form[action="/Account/Login"]"#,
    order_row: "div.orders__row.cf",
};

/// The CA login page posts `login_email` to `/account/loginFirst`.
const CA_SELECTORS: Selectors = Selectors {
    login_form: r#"form[action*="loginFirst"], input[name="login_email"]"#,
    ..DEFAULT_SELECTORS
};

const DEFAULT_PATTERNS: Patterns = Patterns {
    tank_size: r"(\d+)\s*gal\.",
    volume_in_tank: r"Approximately (\d+) gallons in tank",
    reading_date: r"Reading Date:\s*(\d{1,2}/\d{1,2}/\d{4})",
    last_delivery: r"Last Delivery:\s*(\d{1,2}/\d{1,2}/\d{4})",
    price: r"\$(\d+\.\d+)",
};

/// United States portal: server-rendered HTML, hidden-field CSRF.
pub const US_PROFILE: RegionProfile = RegionProfile {
    region: Region::Us,
    name: "United States",
    kind: PortalKind::HtmlRows,
    base_url: "https://mysuperioraccountlogin.com",
    paths: PortalPaths {
        login_page: "/Account/Login?ReturnUrl=%2F",
        login_endpoint: "/Account/Login?ReturnUrl=%2F",
        session_check: "/",
        data: "/Tank",
        orders: None,
        warmup: &["/", "/Customers"],
    },
    auth_fields: AuthFields {
        email: "EmailAddress",
        password: "Password",
        remember_me: Some("RememberMe"),
        csrf_token: "__RequestVerificationToken",
    },
    csrf: CsrfSource::HiddenField,
    selectors: DEFAULT_SELECTORS,
    patterns: DEFAULT_PATTERNS,
    headers: US_HEADERS,
    login_marker: "Login",
    dashboard_marker: None,
    maintenance_marker: "maintenance",
    volume_unit: "gal",
    energy_unit: "ft³",
    volume_to_energy_factor: 36.39,
    default_update_interval: Duration::from_secs(3600),
    retry_interval: Duration::from_secs(300),
    maintenance_interval: Duration::from_secs(3600),
    default_min_threshold: 0.01,
    default_max_threshold: 25.0,
    absolute_min_consumption: 0.01,
    absolute_max_consumption: 50.0,
    tank_size_min: 20.0,
    tank_size_max: 2000.0,
    api_retry: RetryPolicy {
        attempts: 2,
        base_delay: Duration::from_secs(5),
        step: Duration::from_secs(10),
    },
    csrf_retry: RetryPolicy {
        attempts: 2,
        base_delay: Duration::from_secs(3),
        step: Duration::from_secs(2),
    },
    login_retry: RetryPolicy {
        attempts: 1,
        base_delay: Duration::ZERO,
        step: Duration::ZERO,
    },
    timeouts: Timeouts {
        light: Duration::from_secs(10),
        login: Duration::from_secs(30),
        navigation: Duration::from_secs(60),
        data: Duration::from_secs(10),
    },
    auth_settle_delay: Duration::ZERO,
    page_size: 0,
    reauth_every_fetch: false,
};

/// Canadian portal: cookie CSRF, AJAX login, paginated JSON tank listing.
pub const CA_PROFILE: RegionProfile = RegionProfile {
    region: Region::Ca,
    name: "Canada",
    kind: PortalKind::PaginatedJson,
    base_url: "https://mysuperior.superiorpropane.com",
    paths: PortalPaths {
        login_page: "/account/individualLogin",
        login_endpoint: "/account/loginFirst",
        session_check: "/dashboard",
        data: "/myaccount/readTanks",
        orders: Some("/myaccount/getAllOrders"),
        warmup: &[],
    },
    auth_fields: AuthFields {
        email: "login_email",
        password: "login_password",
        remember_me: None,
        csrf_token: "csrf_superior_token",
    },
    csrf: CsrfSource::Cookie("csrf_cookie_name"),
    selectors: CA_SELECTORS,
    patterns: DEFAULT_PATTERNS,
    headers: CA_HEADERS,
    login_marker: "individualLogin",
    dashboard_marker: Some("dashboard"),
    maintenance_marker: "maintenance",
    volume_unit: "L",
    energy_unit: "m³",
    volume_to_energy_factor: 0.272297,
    default_update_interval: Duration::from_secs(7200),
    retry_interval: Duration::from_secs(300),
    maintenance_interval: Duration::from_secs(3600),
    default_min_threshold: 0.01,
    default_max_threshold: 25.0,
    absolute_min_consumption: 0.01,
    absolute_max_consumption: 50.0,
    tank_size_min: 18.0,
    tank_size_max: 227_125.0,
    api_retry: RetryPolicy {
        attempts: 4,
        base_delay: Duration::from_secs(60),
        step: Duration::from_secs(10),
    },
    csrf_retry: RetryPolicy {
        attempts: 4,
        base_delay: Duration::from_secs(3),
        step: Duration::from_secs(2),
    },
    login_retry: RetryPolicy {
        attempts: 4,
        base_delay: Duration::from_secs(3),
        step: Duration::from_secs(2),
    },
    timeouts: Timeouts {
        light: Duration::from_secs(60),
        login: Duration::from_secs(60),
        navigation: Duration::from_secs(60),
        data: Duration::from_secs(60),
    },
    auth_settle_delay: Duration::from_secs(8),
    page_size: 10,
    reauth_every_fetch: true,
};

/// All supported regions, in registry order.
pub static REGION_REGISTRY: &[RegionProfile] = &[US_PROFILE, CA_PROFILE];

pub fn all_regions() -> Vec<Region> {
    REGION_REGISTRY.iter().map(|p| p.region).collect()
}

/// Looks up a profile by region code (case-insensitive). Returns `None` if
/// the code is not a supported region.
pub fn find_profile(code: &str) -> Option<&'static RegionProfile> {
    let region = code.parse::<Region>().ok()?;
    Some(profile_for(region))
}

pub fn profile_for(region: Region) -> &'static RegionProfile {
    match region {
        Region::Us => &REGION_REGISTRY[0],
        Region::Ca => &REGION_REGISTRY[1],
    }
}

/// Sanity checks on a profile. Returns human-readable warnings; an empty
/// list means the profile looks usable.
pub fn validate_profile(profile: &RegionProfile) -> Vec<String> {
    let mut warnings = Vec::new();
    let region = profile.region;

    if profile.timeouts.login < Duration::from_secs(5) {
        warnings.push(format!(
            "{}: login timeout ({}s) may be too short",
            region,
            profile.timeouts.login.as_secs()
        ));
    }
    if profile.timeouts.navigation < Duration::from_secs(10) {
        warnings.push(format!(
            "{}: navigation timeout ({}s) may be too short",
            region,
            profile.timeouts.navigation.as_secs()
        ));
    }
    if profile.default_min_threshold > profile.default_max_threshold {
        warnings.push(format!("{}: default min threshold exceeds default max", region));
    }
    if profile.absolute_min_consumption > profile.absolute_max_consumption {
        warnings.push(format!("{}: absolute consumption bounds are inverted", region));
    }
    if profile.tank_size_min > profile.tank_size_max {
        warnings.push(format!("{}: tank size bounds are inverted", region));
    }
    if profile.volume_to_energy_factor <= 0.0 {
        warnings.push(format!("{}: volume to energy factor must be positive", region));
    }
    if profile.kind == PortalKind::PaginatedJson && profile.page_size == 0 {
        warnings.push(format!("{}: paginated portal with page size 0", region));
    }
    if profile.api_retry.attempts == 0 || profile.login_retry.attempts == 0 {
        warnings.push(format!("{}: retry policy allows no attempts", region));
    }

    warnings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_profiles_pass_validation() {
        for profile in REGION_REGISTRY {
            let warnings = validate_profile(profile);
            assert!(
                warnings.is_empty(),
                "profile '{}' should be clean, got {:?}",
                profile.name,
                warnings
            );
        }
    }

    #[test]
    fn test_no_duplicate_regions() {
        let mut seen = std::collections::HashSet::new();
        for profile in REGION_REGISTRY {
            assert!(
                seen.insert(profile.region),
                "duplicate region '{}' found in REGION_REGISTRY",
                profile.region
            );
        }
    }

    #[test]
    fn test_profile_for_returns_matching_region() {
        for region in all_regions() {
            assert_eq!(profile_for(region).region, region);
        }
    }

    #[test]
    fn test_find_profile_is_case_insensitive() {
        let profile = find_profile("CA").expect("CA should be in registry");
        assert_eq!(profile.region, Region::Ca);
        assert_eq!(find_profile(" us ").map(|p| p.region), Some(Region::Us));
    }

    #[test]
    fn test_find_profile_returns_none_for_unknown_code() {
        assert!(find_profile("mx").is_none());
        let err = "mx".parse::<Region>().unwrap_err();
        assert!(err.contains("us, ca"), "error should list supported regions: {}", err);
    }

    #[test]
    fn test_thresholds_are_ordered_where_defined() {
        // min <= max for both the defaults and the absolute clamps. The
        // threshold resolver assumes it.
        for profile in REGION_REGISTRY {
            assert!(profile.default_min_threshold <= profile.default_max_threshold);
            assert!(profile.absolute_min_consumption <= profile.absolute_max_consumption);
            assert!(profile.tank_size_min < profile.tank_size_max);
        }
    }

    #[test]
    fn test_validate_profile_flags_bad_values() {
        let broken = RegionProfile {
            default_min_threshold: 30.0,
            tank_size_min: 300_000.0,
            page_size: 0,
            timeouts: Timeouts {
                login: Duration::from_secs(1),
                ..CA_PROFILE.timeouts
            },
            ..CA_PROFILE
        };
        let warnings = validate_profile(&broken);
        assert_eq!(warnings.len(), 4, "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn test_retry_delay_grows_with_attempt() {
        let policy = CA_PROFILE.api_retry;
        assert_eq!(policy.delay_after(1), Duration::from_secs(70));
        assert_eq!(policy.delay_after(2), Duration::from_secs(80));
    }

    #[test]
    fn test_ca_login_retries_back_off_in_seconds() {
        let policy = CA_PROFILE.login_retry;
        assert_eq!(policy.attempts, 4);
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(3), Duration::from_secs(9));
    }

    #[test]
    fn test_login_form_includes_remember_me_only_when_configured() {
        let us = US_PROFILE.login_form("a@b.c", "pw", "tok");
        assert!(us.contains(&("RememberMe".to_string(), "true".to_string())));
        assert!(us.contains(&("__RequestVerificationToken".to_string(), "tok".to_string())));

        let ca = CA_PROFILE.login_form("a@b.c", "pw", "tok");
        assert_eq!(ca.len(), 3);
        assert!(ca.contains(&("login_email".to_string(), "a@b.c".to_string())));
    }

    #[test]
    fn test_urls_join_base_and_path() {
        assert_eq!(US_PROFILE.data_url(), "https://mysuperioraccountlogin.com/Tank");
        assert_eq!(US_PROFILE.orders_url(), None);
        assert_eq!(
            CA_PROFILE.orders_url().as_deref(),
            Some("https://mysuperior.superiorpropane.com/myaccount/getAllOrders")
        );
    }
}

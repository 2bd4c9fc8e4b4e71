/// Tank and order extraction from portal responses.
///
/// Extractors are tolerant: a field that cannot be found comes back as
/// `None`, never as an error. Only a row whose address (the identity of the
/// tank) is missing is dropped, with a warning. Selectors and regexes come
/// from the region profile and are compiled once per client.

use crate::model::{OrderTotals, PortalError, TankReading};
use crate::regions::RegionProfile;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

const ORDER_COLUMN_COUNT: usize = 5;
const ORDER_PRODUCT: &str = "PROPANE";

/// Compiled selectors and patterns for one region's markup.
#[derive(Debug)]
pub struct PageParser {
    tank_row: Selector,
    address: Selector,
    tank_info: Selector,
    progress_bar: Selector,
    csrf_input: Selector,
    login_form: Selector,
    order_row: Selector,
    tank_size: Regex,
    volume_in_tank: Regex,
    reading_date: Regex,
    last_delivery: Regex,
    price: Regex,
}

fn selector(css: &str) -> Result<Selector, PortalError> {
    Selector::parse(css).map_err(|e| PortalError::Client(format!("Invalid selector '{}': {}", css, e)))
}

fn pattern(re: &str) -> Result<Regex, PortalError> {
    Regex::new(re).map_err(|e| PortalError::Client(format!("Invalid pattern '{}': {}", re, e)))
}

impl PageParser {
    pub fn new(profile: &RegionProfile) -> Result<Self, PortalError> {
        let s = &profile.selectors;
        let p = &profile.patterns;
        Ok(Self {
            tank_row: selector(s.tank_row)?,
            address: selector(s.address)?,
            tank_info: selector(s.tank_info)?,
            progress_bar: selector(s.progress_bar)?,
            csrf_input: selector(s.csrf_input)?,
            login_form: selector(s.login_form)?,
            order_row: selector(s.order_row)?,
            tank_size: pattern(p.tank_size)?,
            volume_in_tank: pattern(p.volume_in_tank)?,
            reading_date: pattern(p.reading_date)?,
            last_delivery: pattern(p.last_delivery)?,
            price: pattern(p.price)?,
        })
    }

    /// Value of the hidden anti-forgery input, if the page has one.
    pub fn csrf_token(&self, html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        doc.select(&self.csrf_input)
            .next()
            .and_then(|input| input.value().attr("value"))
            .map(str::to_string)
            .filter(|token| !token.is_empty())
    }

    /// A data page that contains the login form means the session is gone.
    pub fn has_login_form(&self, html: &str) -> bool {
        Html::parse_document(html).select(&self.login_form).next().is_some()
    }

    /// Every parseable tank row on the page, numbered from 1.
    pub fn parse_tanks(&self, html: &str) -> Vec<TankReading> {
        let doc = Html::parse_document(html);
        let rows: Vec<ElementRef> = doc.select(&self.tank_row).collect();
        debug!(rows = rows.len(), "Found tank rows");

        let mut tanks = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let tank_number = index + 1;
            match self.parse_row(row, tank_number) {
                Some(tank) => tanks.push(tank),
                None => warn!(tank_number, "Skipping tank row without an address"),
            }
        }
        tanks
    }

    fn parse_row(&self, row: ElementRef, tank_number: usize) -> Option<TankReading> {
        let address = row
            .select(&self.address)
            .next()
            .map(|el| collapse_whitespace(&element_text(el)))
            .filter(|a| !a.is_empty())?;

        let mut tank = TankReading::new(slugify(&address), tank_number);
        tank.address = Some(address);

        if let Some(info) = row.select(&self.tank_info).next().map(element_text) {
            tank.tank_size = capture(&self.tank_size, &info).and_then(|s| s.parse().ok());
            if info.contains("Propane") {
                tank.tank_type = Some("Propane".to_string());
            }
        }

        tank.level_percent = row
            .select(&self.progress_bar)
            .next()
            .and_then(|bar| bar.value().attr("aria-valuenow"))
            .and_then(|v| v.trim().parse().ok());

        let text = element_text(row);
        tank.current_volume = capture(&self.volume_in_tank, &text).and_then(|v| v.parse().ok());
        tank.reading_date = capture(&self.reading_date, &text).map(|d| normalize_us_date(&d));
        tank.last_delivery_date = capture(&self.last_delivery, &text).map(|d| normalize_us_date(&d));
        tank.price_per_unit = capture(&self.price, &text).and_then(|p| p.parse().ok());
        tank.is_on_delivery_plan = true;

        Some(tank)
    }

    /// Sums propane deliveries from the order history page.
    pub fn parse_orders(&self, html: &str) -> OrderTotals {
        let doc = Html::parse_document(html);
        let mut totals = OrderTotals::default();

        for row in doc.select(&self.order_row) {
            let cols: Vec<String> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| c.value().name() == "div")
                .map(|c| element_text(c).trim().to_string())
                .collect();
            if cols.len() != ORDER_COLUMN_COUNT || !cols[2].to_uppercase().contains(ORDER_PRODUCT) {
                continue;
            }

            let volume = cols[3]
                .split_whitespace()
                .next()
                .and_then(|v| v.replace(',', "").parse::<f64>().ok());
            let cost = cols[4]
                .trim_start_matches('$')
                .replace(',', "")
                .parse::<f64>()
                .ok();

            match (volume, cost) {
                (Some(volume), Some(cost)) if volume >= 0.0 => {
                    totals.total_volume += volume as u64;
                    totals.total_cost = round_to(totals.total_cost + cost, 2);
                }
                _ => warn!(volume = %cols[3], cost = %cols[4], "Skipping unparseable order row"),
            }
        }

        if totals.total_volume > 0 {
            totals.average_price = round_to(totals.total_cost / totals.total_volume as f64, 4);
        }
        debug!(
            total_volume = totals.total_volume,
            total_cost = totals.total_cost,
            average_price = totals.average_price,
            "Parsed orders"
        );
        totals
    }
}

// ---------------------------------------------------------------------------
// JSON tank pages
// ---------------------------------------------------------------------------

/// One decoded page of the paginated tank endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TankPage {
    pub status: bool,
    pub rows: Vec<Value>,
    /// Absent when the portal did not say.
    pub finished: Option<bool>,
    pub message: Option<String>,
}

/// Decodes the `{status, data, finished, message}` envelope. `data` may be
/// a JSON-encoded string or an inline array.
pub fn parse_tank_page(body: &str) -> Result<TankPage, PortalError> {
    let envelope: Value = serde_json::from_str(body)?;

    let rows = match envelope.get("data") {
        Some(Value::String(encoded)) if encoded.trim().is_empty() => Vec::new(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded)? {
            Value::Array(rows) => rows,
            other => {
                return Err(PortalError::Decode(format!("Tank data is not a list: {}", other)));
            }
        },
        Some(Value::Array(rows)) => rows.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(PortalError::Decode(format!("Unexpected tank data: {}", other)));
        }
    };

    Ok(TankPage {
        status: truthy(envelope.get("status")),
        rows,
        finished: envelope.get("finished").and_then(Value::as_bool),
        message: envelope.get("message").and_then(Value::as_str).map(str::to_string),
    })
}

/// Normalizes one tank object from the JSON endpoint.
pub fn parse_tank_json(tank: &Value, tank_number: usize) -> Option<TankReading> {
    let tank_id = json_text(tank, "adds_tank_id")?;

    let mut reading = TankReading::new(tank_id, tank_number);
    reading.address = json_text(tank, "adds_location");
    reading.tank_name = json_text(tank, "tank_name");
    reading.tank_size = json_number(tank, "adds_tank_size");
    reading.tank_type = Some("Propane".to_string());
    reading.serial_number = json_text(tank, "adds_serial_number");
    reading.customer_number = json_text(tank, "adds_customer_number");
    reading.level_percent = json_number(tank, "adds_fill_percentage");
    reading.current_volume = json_number(tank, "adds_fill");
    reading.reading_date = json_text(tank, "adds_last_reading");
    reading.last_delivery_date = json_text(tank, "adds_last_fill")
        .map(|fill| fill.split(' ').next().unwrap_or_default().to_string());
    reading.is_on_delivery_plan = tank.get("isOnDeliveryPlan").and_then(Value::as_str) == Some("1");
    Some(reading)
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

fn json_text(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_number(obj: &Value, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

fn element_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Lowercase, with every run of characters outside `[a-z0-9]` turned into
/// a single `-` and no leading or trailing dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// `M/D/YYYY` to `YYYY-MM-DD`; anything else passes through untouched.
pub fn normalize_us_date(raw: &str) -> String {
    NaiveDate::parse_from_str(raw.trim(), "%m/%d/%Y")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

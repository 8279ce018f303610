//! Field mapping from raw stored JSON onto the canonical event records.
//!
//! The ingestion path has changed field names several times. Each canonical
//! field lists its known spellings in priority order; the first present,
//! non-empty value wins. Empty strings and `null` count as absent.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  event::{Conversion, MatchMethod, Touchpoint, Utm},
};

// ─── Known spellings ─────────────────────────────────────────────────────────

const TIMESTAMP: &[&str] = &["timestamp", "created_at", "createdAt", "time", "ts"];
const SESSION_ID: &[&str] = &["session_id", "sessionId", "sid", "session"];
const IP_ADDRESS: &[&str] = &["ip_address", "ip", "ipAddress", "client_ip"];
const FORWARDED_FOR: &[&str] = &["x_forwarded_for", "forwarded_for"];
const LANDING_PAGE: &[&str] =
  &["landing_page", "landingPage", "page_url", "url", "path"];
const SOURCE: &[&str] = &["source", "traffic_source", "trafficSource"];
const REFERRER: &[&str] = &["referrer", "referer", "document_referrer"];

const UTM_CAMPAIGN: &[&str] = &["utm_campaign", "utmCampaign"];
const UTM_MEDIUM: &[&str] = &["utm_medium", "utmMedium"];
const UTM_SOURCE: &[&str] = &["utm_source", "utmSource"];
const UTM_TERM: &[&str] = &["utm_term", "utmTerm"];
const UTM_CONTENT: &[&str] = &["utm_content", "utmContent"];

const EMAIL: &[&str] = &["email", "customer_email", "customerEmail"];
const ORDER_TOTAL: &[&str] =
  &["order_total", "orderTotal", "total", "value", "amount"];
const ORDER_ID: &[&str] = &["order_id", "orderId", "transaction_id"];
const PRIMARY_IP: &[&str] = &["primary_ip", "primaryIp", "ip_address", "ip"];
const CONVERSION_IP: &[&str] = &["conversion_ip", "conversionIp"];

/// Source assigned when nothing identifies where the visitor came from.
pub const DIRECT: &str = "direct";

// ─── Records ─────────────────────────────────────────────────────────────────

/// Map one raw pageview onto a [`Touchpoint`].
pub fn touchpoint(raw: &Value) -> Result<Touchpoint> {
  let obj = raw.as_object().ok_or(Error::NotAnObject)?;

  let timestamp = pick_timestamp(obj)?;
  let session_id = pick_str(obj, SESSION_ID);
  let ip_address = pick_str(obj, IP_ADDRESS)
    .or_else(|| pick_str(obj, FORWARDED_FOR).and_then(first_forwarded))
    .unwrap_or_default();
  let landing_page = pick_str(obj, LANDING_PAGE).unwrap_or_default();
  let utm = pick_utm(obj);

  let source = pick_str(obj, SOURCE)
    .or_else(|| utm.utm_source.clone())
    .or_else(|| pick_str(obj, REFERRER).and_then(|r| referrer_host(&r)))
    .map(|s| s.trim().to_lowercase())
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| DIRECT.to_owned());

  Ok(Touchpoint {
    timestamp,
    session_id,
    ip_address,
    landing_page,
    source,
    utm,
  })
}

/// Map one raw conversion onto a [`Conversion`]. A missing order total is a
/// free conversion (zero), never an error.
pub fn conversion(raw: &Value) -> Result<Conversion> {
  let obj = raw.as_object().ok_or(Error::NotAnObject)?;

  let timestamp = pick_timestamp(obj)?;
  let email = pick_str(obj, EMAIL)
    .map(|e| e.trim().to_lowercase())
    .ok_or(Error::MissingField("email"))?;

  let order_total = match pick(obj, ORDER_TOTAL) {
    None => 0.0,
    Some(v) => parse_amount(v)?,
  };
  if order_total < 0.0 {
    return Err(Error::NegativeOrderTotal(order_total));
  }

  let attribution_method = obj
    .get("attribution_method")
    .and_then(Value::as_str)
    .and_then(|s| s.parse::<MatchMethod>().ok());

  let attribution_score = obj
    .get("attribution_score")
    .and_then(Value::as_f64)
    .map(|s| s.clamp(0.0, 100.0) as u8)
    .unwrap_or(0);

  Ok(Conversion {
    timestamp,
    email,
    order_total,
    order_id: pick_str(obj, ORDER_ID),
    primary_ip: pick_str(obj, PRIMARY_IP),
    conversion_ip: pick_str(obj, CONVERSION_IP),
    session_id: pick_str(obj, SESSION_ID),
    attribution_found: obj
      .get("attribution_found")
      .and_then(Value::as_bool)
      .unwrap_or(false),
    attribution_method,
    attribution_score,
  })
}

// ─── Field pickers ───────────────────────────────────────────────────────────

fn pick<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
  names
    .iter()
    .filter_map(|n| obj.get(*n))
    .find(|v| !is_blank(v))
}

fn pick_str(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
  pick(obj, names).and_then(scalar_string)
}

fn pick_utm(obj: &Map<String, Value>) -> Utm {
  let nested = obj.get("utm").and_then(Value::as_object);
  let field = |names: &[&str], short: &str| {
    pick_str(obj, names)
      .or_else(|| nested.and_then(|n| n.get(short)).and_then(scalar_string))
  };
  Utm {
    utm_campaign: field(UTM_CAMPAIGN, "campaign"),
    utm_medium:   field(UTM_MEDIUM, "medium"),
    utm_source:   field(UTM_SOURCE, "source"),
    utm_term:     field(UTM_TERM, "term"),
    utm_content:  field(UTM_CONTENT, "content"),
  }
}

fn pick_timestamp(obj: &Map<String, Value>) -> Result<DateTime<Utc>> {
  let raw = pick(obj, TIMESTAMP).ok_or(Error::MissingField("timestamp"))?;
  parse_timestamp(raw)
}

fn is_blank(v: &Value) -> bool {
  match v {
    Value::Null => true,
    Value::String(s) => s.trim().is_empty(),
    _ => false,
  }
}

fn scalar_string(v: &Value) -> Option<String> {
  match v {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

// ─── Value parsers ───────────────────────────────────────────────────────────

/// Epoch values at or above this magnitude are milliseconds, below it
/// seconds. 1e11 seconds is in the year 5138.
const MILLIS_THRESHOLD: f64 = 1e11;

/// Accepts RFC 3339 strings, epoch seconds or milliseconds, and numeric
/// strings of either.
pub fn parse_timestamp(v: &Value) -> Result<DateTime<Utc>> {
  let invalid = |reason: String| Error::InvalidField {
    field: "timestamp",
    reason,
  };

  let epoch = match v {
    Value::String(s) => {
      let s = s.trim();
      if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
      }
      s.parse::<f64>()
        .map_err(|_| invalid(format!("unrecognised timestamp {s:?}")))?
    }
    Value::Number(n) => n
      .as_f64()
      .ok_or_else(|| invalid(format!("unrepresentable number {n}")))?,
    other => return Err(invalid(format!("unexpected JSON type: {other}"))),
  };
  // `f64::from_str` accepts "NaN" and "inf".
  if !epoch.is_finite() {
    return Err(invalid(format!("non-finite epoch {epoch}")));
  }

  let millis = if epoch.abs() >= MILLIS_THRESHOLD {
    epoch
  } else {
    epoch * 1000.0
  };
  DateTime::from_timestamp_millis(millis.round() as i64)
    .ok_or_else(|| invalid(format!("epoch {epoch} out of range")))
}

fn parse_amount(v: &Value) -> Result<f64> {
  let invalid = |reason: String| Error::InvalidField {
    field: "order_total",
    reason,
  };
  let amount = match v {
    Value::Number(n) => n
      .as_f64()
      .ok_or_else(|| invalid(format!("unrepresentable number {n}")))?,
    Value::String(s) => s
      .trim()
      .trim_start_matches('$')
      .replace(',', "")
      .parse::<f64>()
      .map_err(|e| invalid(e.to_string()))?,
    other => return Err(invalid(format!("unexpected JSON type: {other}"))),
  };
  if !amount.is_finite() {
    return Err(invalid(format!("non-finite amount {amount}")));
  }
  Ok(amount)
}

fn first_forwarded(list: String) -> Option<String> {
  list
    .split(',')
    .map(str::trim)
    .find(|s| !s.is_empty())
    .map(str::to_owned)
}

/// `https://www.google.com/search?q=x` → `google.com`.
fn referrer_host(referrer: &str) -> Option<String> {
  let rest = referrer
    .split_once("://")
    .map_or(referrer, |(_, rest)| rest);
  let host = rest.split(['/', '?', '#']).next()?;
  let host = host.rsplit('@').next()?;
  let host = host.split(':').next()?;
  let host = host.strip_prefix("www.").unwrap_or(host);
  (!host.is_empty()).then(|| host.to_owned())
}

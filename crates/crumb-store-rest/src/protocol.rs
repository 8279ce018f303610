//! Reply decoding for the command protocol.

use crumb_core::store::ScanPage;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// Envelope around every reply.
#[derive(Debug, Deserialize)]
pub struct Reply {
  #[serde(default)]
  pub result: Option<Value>,
  #[serde(default)]
  pub error:  Option<String>,
}

impl Reply {
  pub fn into_result(self) -> Result<Value> {
    match self.error {
      Some(e) => Err(Error::Server(e)),
      None => Ok(self.result.unwrap_or(Value::Null)),
    }
  }
}

fn protocol(command: &'static str, detail: impl Into<String>) -> Error {
  Error::Protocol {
    command,
    detail: detail.into(),
  }
}

/// `GET` → bulk string or nil.
pub fn decode_get(v: Value) -> Result<Option<String>> {
  match v {
    Value::Null => Ok(None),
    Value::String(s) => Ok(Some(s)),
    other => Err(protocol("GET", format!("expected string or null, got {other}"))),
  }
}

/// `SET` / `SETEX` → `"OK"`.
pub fn decode_ok(command: &'static str, v: Value) -> Result<()> {
  match v.as_str() {
    Some("OK") => Ok(()),
    _ => Err(protocol(command, format!("expected OK, got {v}"))),
  }
}

/// `DEL` → number of keys removed.
pub fn decode_del(v: Value) -> Result<bool> {
  v.as_u64()
    .map(|n| n > 0)
    .ok_or_else(|| protocol("DEL", format!("expected integer, got {v}")))
}

/// `SCAN` → `[cursor, [key, ...]]`. The cursor may arrive as a string or a
/// number depending on the server.
pub fn decode_scan(v: Value) -> Result<ScanPage> {
  let Value::Array(mut parts) = v else {
    return Err(protocol("SCAN", format!("expected array, got {v}")));
  };
  if parts.len() != 2 {
    return Err(protocol("SCAN", format!("expected 2 elements, got {}", parts.len())));
  }
  let keys = parts.pop().unwrap_or(Value::Null);
  let cursor = match parts.pop().unwrap_or(Value::Null) {
    Value::String(s) => s,
    Value::Number(n) => n.to_string(),
    other => return Err(protocol("SCAN", format!("bad cursor {other}"))),
  };
  let Value::Array(keys) = keys else {
    return Err(protocol("SCAN", format!("bad key list {keys}")));
  };
  let keys = keys
    .into_iter()
    .map(|k| match k {
      Value::String(s) => Ok(s),
      other => Err(protocol("SCAN", format!("bad key {other}"))),
    })
    .collect::<Result<Vec<_>>>()?;
  Ok(ScanPage { cursor, keys })
}

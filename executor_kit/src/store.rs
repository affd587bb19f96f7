//! Key/value options bag carried with every executor call
//!
//! Keys are dotted names (`vfs.root`). A key is looked up verbatim first and
//! then as a path through nested objects, so both `{"vfs.root": ".."}` and
//! `{"vfs": {"root": ".."}}` resolve the same way.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-call configuration for an executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Store(Map<String, Value>);

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Look up a raw value by dotted key
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.0.get(key) {
            return Some(v);
        }

        let mut parts = key.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// String value; numbers and booleans are rendered as text
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Integer value; numeric strings are accepted
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean value; `"true"`/`"false"` strings are accepted
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Duration value; integers are milliseconds, strings use [`parse_duration`]
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64().map(Duration::from_millis),
            Value::String(s) => parse_duration(s),
            _ => None,
        }
    }

    /// Copy every entry of `other` into `self`, overwriting existing keys
    pub fn merge(&mut self, other: &Store) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl From<Map<String, Value>> for Store {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Parse a duration such as `250ms`, `30s`, `5m`, `1h` or `1m30s`
///
/// A bare integer is read as milliseconds. Returns `None` on malformed input.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(ms) = input.parse::<u64>() {
        return Some(Duration::from_millis(ms));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let value: u64 = rest.get(..digits_end)?.parse().ok()?;
        rest = rest.get(digits_end..)?;

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = rest.get(..unit_end)?;
        rest = rest.get(unit_end..)?;

        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
    }
    Some(total)
}

//! Device scan depth
//!
//! Scan types usually arrive from untyped configuration (command-line
//! arguments, option stores, config files). Parsing therefore never fails:
//! anything that is not clearly `deep` selects the cheaper `quick` scan.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Depth of a device enumeration pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScanType {
    /// Shallow, quick scan
    #[default]
    Quick = 0,
    /// Deep, longer scan
    Deep = 1,
}

/// Loosely-typed input accepted by [`ScanType::parse`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScanTypeInput<'a> {
    /// Textual value such as `"Deep"` or `"1"`
    Text(Cow<'a, str>),
    /// Integer ordinal
    Integer(i64),
    /// Any other value, already rendered to its default text form
    Other(String),
}

impl ScanType {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Quick => "quick",
            ScanType::Deep => "deep",
        }
    }

    /// Integer ordinal
    pub fn ordinal(&self) -> i64 {
        *self as i64
    }

    /// Parse any loosely-typed value into a scan type, defaulting to `Quick`
    pub fn parse<'a>(input: impl Into<ScanTypeInput<'a>>) -> Self {
        match input.into() {
            ScanTypeInput::Text(text) => Self::from_text(&text),
            ScanTypeInput::Integer(i) => Self::from_ordinal(i),
            ScanTypeInput::Other(rendered) => Self::from_text(&rendered),
        }
    }

    fn from_text(text: &str) -> Self {
        if text.eq_ignore_ascii_case(ScanType::Quick.as_str()) {
            return ScanType::Quick;
        }
        if text.eq_ignore_ascii_case(ScanType::Deep.as_str()) {
            return ScanType::Deep;
        }
        match text.parse::<i64>() {
            Ok(i) => Self::from_ordinal(i),
            Err(_) => ScanType::Quick,
        }
    }

    fn from_ordinal(i: i64) -> Self {
        match i {
            1 => ScanType::Deep,
            _ => ScanType::Quick,
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'a> From<&'a str> for ScanTypeInput<'a> {
    fn from(s: &'a str) -> Self {
        ScanTypeInput::Text(Cow::Borrowed(s))
    }
}

impl From<String> for ScanTypeInput<'static> {
    fn from(s: String) -> Self {
        ScanTypeInput::Text(Cow::Owned(s))
    }
}

impl<'a> From<&'a String> for ScanTypeInput<'a> {
    fn from(s: &'a String) -> Self {
        ScanTypeInput::Text(Cow::Borrowed(s.as_str()))
    }
}

impl From<i64> for ScanTypeInput<'static> {
    fn from(i: i64) -> Self {
        ScanTypeInput::Integer(i)
    }
}

impl<'a> From<&'a serde_json::Value> for ScanTypeInput<'a> {
    fn from(value: &'a serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => ScanTypeInput::Text(Cow::Borrowed(s.as_str())),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => ScanTypeInput::Integer(i),
                // `1.0` renders as `1`
                (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    ScanTypeInput::Integer(f as i64)
                }
                _ => ScanTypeInput::Other(n.to_string()),
            },
            other => ScanTypeInput::Other(other.to_string()),
        }
    }
}

impl Serialize for ScanType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ScanType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(ScanType::parse(&value))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_case_insensitive() {
        assert_eq!(ScanType::parse("quick"), ScanType::Quick);
        assert_eq!(ScanType::parse("Quick"), ScanType::Quick);
        assert_eq!(ScanType::parse("QUICK"), ScanType::Quick);
        assert_eq!(ScanType::parse("deep"), ScanType::Deep);
        assert_eq!(ScanType::parse("Deep"), ScanType::Deep);
        assert_eq!(ScanType::parse("DEEP"), ScanType::Deep);
    }

    #[test]
    fn test_parse_ordinals() {
        assert_eq!(ScanType::parse(0), ScanType::Quick);
        assert_eq!(ScanType::parse(1), ScanType::Deep);
        assert_eq!(ScanType::parse("0"), ScanType::Quick);
        assert_eq!(ScanType::parse("1"), ScanType::Deep);
    }

    #[test]
    fn test_parse_falls_back_to_quick() {
        assert_eq!(ScanType::parse("bogus"), ScanType::Quick);
        assert_eq!(ScanType::parse(""), ScanType::Quick);
        assert_eq!(ScanType::parse(2), ScanType::Quick);
        assert_eq!(ScanType::parse(-1), ScanType::Quick);
        assert_eq!(ScanType::parse("2"), ScanType::Quick);
        assert_eq!(ScanType::parse(" 1"), ScanType::Quick);
        assert_eq!(ScanType::parse(i64::MAX), ScanType::Quick);
    }

    #[test]
    fn test_parse_other_values_render_as_text() {
        assert_eq!(ScanType::parse(&serde_json::json!(1)), ScanType::Deep);
        assert_eq!(ScanType::parse(&serde_json::json!("deep")), ScanType::Deep);
        assert_eq!(ScanType::parse(&serde_json::json!(true)), ScanType::Quick);
        assert_eq!(ScanType::parse(&serde_json::json!(null)), ScanType::Quick);
        assert_eq!(ScanType::parse(&serde_json::json!([1])), ScanType::Quick);
        assert_eq!(ScanType::parse(&serde_json::json!(1.0)), ScanType::Deep);
        assert_eq!(ScanType::parse(&serde_json::json!(0.0)), ScanType::Quick);
        assert_eq!(ScanType::parse(&serde_json::json!(1.5)), ScanType::Quick);
        assert_eq!(
            ScanType::parse(ScanTypeInput::Other("1".to_string())),
            ScanType::Deep
        );
    }

    #[test]
    fn test_deserialize_never_fails() {
        let deep: ScanType = serde_json::from_str("\"Deep\"").unwrap();
        assert_eq!(deep, ScanType::Deep);

        let ordinal: ScanType = serde_json::from_str("1").unwrap();
        assert_eq!(ordinal, ScanType::Deep);

        let junk: ScanType = serde_json::from_str("{\"x\": 1}").unwrap();
        assert_eq!(junk, ScanType::Quick);
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for st in [ScanType::Quick, ScanType::Deep] {
            assert_eq!(ScanType::parse(st.to_string()), st);
            assert_eq!(ScanType::parse(st.ordinal()), st);
        }
    }
}

//! Per-type coercion used by [`FieldDefinition::validate`](crate::FieldDefinition::validate).
//!
//! Each function takes the raw input and returns the coerced value or the
//! error code to record. Checks shared by every type (min, max, lengths,
//! pattern, allowed values) live with the field definition.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;

use crate::time::{Temporal, from_epoch, is_zero_date, parse_timestamp};
use crate::value::{integral_float, parse_integer, parse_numeric};
use crate::{ValidationError, Value};

type Coerced = Result<Value, ValidationError>;

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~.-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .ok()
});

static URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^\s/?#@]+(?:@[^\s/?#]+)?(?:[/?#]\S*)?$").ok()
});

pub(crate) fn integer(value: &Value) -> Coerced {
    match value {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(n) => integral_float(*n).map(Value::Int).ok_or(ValidationError::Type),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::String(s) => parse_integer(s).map(Value::Int).ok_or(ValidationError::Type),
        _ => Err(ValidationError::Type),
    }
}

pub(crate) fn float(value: &Value) -> Coerced {
    match value {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) if n.is_finite() => Ok(Value::Float(*n)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => parse_thousands(s)
            .map(Value::Float)
            .ok_or(ValidationError::Type),
        _ => Err(ValidationError::Type),
    }
}

// "1,234.5" is accepted; separators must split groups of three digits
fn parse_thousands(s: &str) -> Option<f64> {
    let s = s.trim();
    if !s.contains(',') {
        return parse_numeric(s);
    }
    let (whole, _) = s.split_once('.').unwrap_or((s, ""));
    let whole = whole.trim_start_matches(['+', '-']);
    let mut groups = whole.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 || groups.any(|g| g.len() != 3) {
        return None;
    }
    parse_numeric(&s.replace(',', ""))
}

/// Explicit `false` is passed through untouched so strict-false input is never
/// reported as a type error.
pub(crate) fn boolean(value: &Value) -> Coerced {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Ok(Value::Bool(true)),
            "0" | "false" | "off" | "no" | "" => Ok(Value::Bool(false)),
            _ => Err(ValidationError::Type),
        },
        _ => Err(ValidationError::Type),
    }
}

pub(crate) fn temporal(value: &Value, kind: Temporal, required: bool) -> Coerced {
    let parsed = match value {
        Value::String(s) if is_zero_date(s) => {
            return if required {
                Err(ValidationError::Required)
            } else {
                Ok(Value::from(kind.zero()))
            };
        }
        Value::String(s) => parse_timestamp(s),
        Value::Int(n) => from_epoch(*n),
        _ => None,
    };
    parsed
        .map(|dt| Value::String(kind.format(&dt)))
        .ok_or(ValidationError::Type)
}

/// Dotted-quad strings, or the packed 32-bit integer form.
pub(crate) fn ip(value: &Value, required: bool) -> Coerced {
    let packed = match value {
        Value::Int(n) => Some(*n),
        Value::String(s) => parse_integer(s),
        _ => None,
    };
    let addr = match (packed, value) {
        (Some(n), _) => u32::try_from(n).ok().map(Ipv4Addr::from),
        (None, Value::String(s)) => s.trim().parse::<Ipv4Addr>().ok(),
        _ => None,
    }
    .ok_or(ValidationError::Type)?;

    if addr.is_unspecified() && required {
        return Err(ValidationError::Required);
    }
    Ok(Value::String(addr.to_string()))
}

pub(crate) fn email(value: &Value) -> Coerced {
    formatted(value, &EMAIL, |s| {
        // dots may not lead, trail or repeat in the local part
        let local = s.split('@').next().unwrap_or_default();
        !local.starts_with('.') && !local.ends_with('.') && !local.contains("..")
    })
}

pub(crate) fn url(value: &Value) -> Coerced {
    formatted(value, &URL, |_| true)
}

// Empty strings bypass format checks; required-ness was settled earlier.
fn formatted(
    value: &Value,
    pattern: &LazyLock<Option<Regex>>,
    extra: impl Fn(&str) -> bool,
) -> Coerced {
    let text = match value {
        Value::String(s) => s.trim(),
        _ => return Err(ValidationError::Type),
    };
    if text.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let pattern: &Option<Regex> = pattern;
    let matches = pattern
        .as_ref()
        .is_some_and(|re| re.is_match(text) && extra(text));
    if matches {
        Ok(Value::String(text.to_string()))
    } else {
        Err(ValidationError::Type)
    }
}

/// Membership in the declared set; the declared spelling is kept.
pub(crate) fn enumeration(value: &Value, allowed: &[Value]) -> Coerced {
    allowed
        .iter()
        .find(|candidate| candidate.loose_eq(value))
        .cloned()
        .ok_or(ValidationError::Value)
}

pub(crate) fn text(value: &Value) -> Coerced {
    match value {
        Value::List(_) | Value::Json(serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
            Err(ValidationError::Type)
        }
        other => Ok(Value::String(other.to_text().trim().to_string())),
    }
}

pub(crate) fn binary(value: &Value) -> Coerced {
    match value {
        Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::List(_) | Value::Json(_) => Err(ValidationError::Type),
        other => Ok(Value::String(other.to_text())),
    }
}

/// Strings holding JSON are decoded; anything undecodable is left as it was.
pub(crate) fn json(value: &Value) -> Coerced {
    match value {
        Value::String(s) => Ok(serde_json::from_str::<serde_json::Value>(s)
            .map(Value::Json)
            .unwrap_or_else(|_| value.clone())),
        Value::Bytes(_) => Err(ValidationError::Type),
        Value::Json(_) => Ok(value.clone()),
        other => Ok(Value::Json(other.to_json())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_accept_numeric_strings_only() {
        assert_eq!(integer(&Value::from(" 42 ")), Ok(Value::Int(42)));
        assert_eq!(integer(&Value::Float(3.0)), Ok(Value::Int(3)));
        assert_eq!(integer(&Value::from("4.5")), Err(ValidationError::Type));
        assert_eq!(integer(&Value::from("abc")), Err(ValidationError::Type));
    }

    #[test]
    fn integers_reject_floats_outside_the_i64_range() {
        assert_eq!(integer(&Value::Float(1e20)), Err(ValidationError::Type));
        assert_eq!(integer(&Value::Float(-1e20)), Err(ValidationError::Type));
        assert_eq!(integer(&Value::Float(i64::MAX as f64)), Err(ValidationError::Type));
        assert_eq!(integer(&Value::Float(f64::NAN)), Err(ValidationError::Type));
        assert_eq!(
            integer(&Value::Float(i64::MIN as f64)),
            Ok(Value::Int(i64::MIN))
        );
        assert_eq!(integer(&Value::Float(1e15)), Ok(Value::Int(1_000_000_000_000_000)));
    }

    #[test]
    fn floats_allow_thousand_separators() {
        assert_eq!(float(&Value::from("1,234.5")), Ok(Value::Float(1234.5)));
        assert_eq!(float(&Value::from("12,34")), Err(ValidationError::Type));
        assert_eq!(float(&Value::Int(2)), Ok(Value::Float(2.0)));
    }

    #[test]
    fn booleans_are_tri_state() {
        assert_eq!(boolean(&Value::Bool(false)), Ok(Value::Bool(false)));
        assert_eq!(boolean(&Value::from("yes")), Ok(Value::Bool(true)));
        assert_eq!(boolean(&Value::from("off")), Ok(Value::Bool(false)));
        assert_eq!(boolean(&Value::from("maybe")), Err(ValidationError::Type));
    }

    #[test]
    fn zero_dates_pass_unless_required() {
        let zero = Value::from("0000-00-00 00:00:00");
        assert_eq!(
            temporal(&zero, Temporal::Date, false),
            Ok(Value::from("0000-00-00"))
        );
        assert_eq!(
            temporal(&zero, Temporal::DateTime, true),
            Err(ValidationError::Required)
        );
    }

    #[test]
    fn temporal_values_are_reformatted() {
        assert_eq!(
            temporal(&Value::Int(0), Temporal::DateTime, false),
            Ok(Value::from("1970-01-01 00:00:00"))
        );
        assert_eq!(
            temporal(&Value::from("2021-06-01 08:09:10"), Temporal::Time, false),
            Ok(Value::from("08:09:10"))
        );
        assert_eq!(
            temporal(&Value::from("soon"), Temporal::Date, false),
            Err(ValidationError::Type)
        );
    }

    #[test]
    fn packed_addresses_unpack() {
        assert_eq!(ip(&Value::Int(2130706433), false), Ok(Value::from("127.0.0.1")));
        assert_eq!(ip(&Value::from("10.0.0.1"), false), Ok(Value::from("10.0.0.1")));
        assert_eq!(ip(&Value::from("300.1.1.1"), false), Err(ValidationError::Type));
        assert_eq!(ip(&Value::from("0.0.0.0"), true), Err(ValidationError::Required));
        assert_eq!(ip(&Value::from("0.0.0.0"), false), Ok(Value::from("0.0.0.0")));
    }

    #[test]
    fn email_and_url_formats() {
        assert!(email(&Value::from("someone@example.com")).is_ok());
        assert!(email(&Value::from("")).is_ok());
        assert_eq!(email(&Value::from("a..b@example.com")), Err(ValidationError::Type));
        assert_eq!(email(&Value::from("nobody")), Err(ValidationError::Type));
        assert!(url(&Value::from("https://example.com/path?q=1")).is_ok());
        assert_eq!(url(&Value::from("example.com")), Err(ValidationError::Type));
    }

    #[test]
    fn json_decodes_when_possible() {
        assert_eq!(
            json(&Value::from(r#"{"a":1}"#)),
            Ok(Value::Json(serde_json::json!({"a": 1})))
        );
        assert_eq!(json(&Value::from("{oops")), Ok(Value::from("{oops")));
        assert_eq!(json(&Value::Bytes(vec![1])), Err(ValidationError::Type));
    }
}

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use super::NormalizeError;

/// Coerce a legacy timestamp value.
///
/// Accepted shapes: exported store timestamps (`{"_seconds", "_nanoseconds"}` or
/// `{"seconds", "nanoseconds"}`), date wrappers (`{"$date": ...}`), strings
/// (RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, epoch millis) and epoch
/// millisecond numbers.
///
/// Absent values and strings that do not parse yield `Ok(None)`. Values whose
/// shape claims to be a timestamp but carries invalid parts (non-numeric
/// seconds, out-of-range epochs, booleans, arrays) are `MalformedTimestamp`.
pub fn coerce(field: &str, value: Option<&Value>) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(parse_text(field, s)),
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .ok_or_else(|| malformed(field, format!("unrepresentable epoch {n}")))?;
            from_millis(field, millis).map(Some)
        }
        Value::Object(obj) => from_object(field, obj).map(Some),
        Value::Bool(_) => Err(malformed(field, "boolean is not a timestamp")),
        Value::Array(_) => Err(malformed(field, "array is not a timestamp")),
    }
}

/// Required timestamp: absent or unparsable values fall back to `now`.
pub fn required(
    field: &str,
    value: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, NormalizeError> {
    Ok(coerce(field, value)?.unwrap_or(now))
}

fn from_object(field: &str, obj: &Map<String, Value>) -> Result<DateTime<Utc>, NormalizeError> {
    if let Some(inner) = obj.get("$date") {
        return coerce(field, Some(inner))?
            .ok_or_else(|| malformed(field, "unparsable $date wrapper"));
    }
    let seconds = obj.get("_seconds").or_else(|| obj.get("seconds"));
    let Some(seconds) = seconds else {
        return Err(malformed(field, "object without seconds"));
    };
    let secs = seconds
        .as_i64()
        .ok_or_else(|| malformed(field, format!("seconds `{seconds}` is not an integer")))?;
    let nanos = match obj.get("_nanoseconds").or_else(|| obj.get("nanoseconds")) {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .filter(|n| *n < 1_000_000_000)
            .ok_or_else(|| malformed(field, format!("nanoseconds `{v}` out of range")))?
            as u32,
    };
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| malformed(field, format!("seconds {secs} out of range")))
}

fn from_millis(field: &str, millis: i64) -> Result<DateTime<Utc>, NormalizeError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| malformed(field, format!("epoch millis {millis} out of range")))
}

fn parse_text(field: &str, raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        if let Some(dt) = s
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        {
            return Some(dt);
        }
    }
    warn!(field, value = s, "unparsable timestamp string; treating as absent");
    None
}

fn malformed(field: &str, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::MalformedTimestamp {
        field: field.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_exported_store_timestamps() {
        let v = json!({"_seconds": 1_700_000_000, "_nanoseconds": 500_000_000});
        let dt = coerce("createdAt", Some(&v)).unwrap().unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 500);

        let v = json!({"seconds": 1_600_000_000});
        assert_eq!(
            coerce("createdAt", Some(&v)).unwrap().unwrap().timestamp(),
            1_600_000_000
        );
    }

    #[test]
    fn reads_strings_and_epochs() {
        let cases = [
            json!("2024-03-01T10:00:00Z"),
            json!("2024-03-01T12:00:00+02:00"),
            json!("2024-03-01 10:00:00"),
            json!({"$date": "2024-03-01T10:00:00Z"}),
            json!(1_709_287_200_000i64),
            json!("1709287200000"),
        ];
        for c in cases {
            let dt = coerce("f", Some(&c)).unwrap().unwrap();
            assert_eq!(dt.to_rfc3339(), "2024-03-01T10:00:00+00:00", "case {c}");
        }
        let d = coerce("f", Some(&json!("2024-03-01"))).unwrap().unwrap();
        assert_eq!(d.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn absent_and_garbage_strings_are_none() {
        assert_eq!(coerce("f", None).unwrap(), None);
        assert_eq!(coerce("f", Some(&Value::Null)).unwrap(), None);
        assert_eq!(coerce("f", Some(&json!("next tuesday"))).unwrap(), None);
    }

    #[test]
    fn required_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(required("f", None, now).unwrap(), now);
        assert_eq!(required("f", Some(&json!("garbage")), now).unwrap(), now);
    }

    #[test]
    fn malformed_shapes_are_errors() {
        let bad = [
            json!({"_seconds": "not-a-number"}),
            json!({"_seconds": 10, "_nanoseconds": 5_000_000_000u64}),
            json!({"unrelated": 1}),
            json!(true),
            json!([1, 2]),
            json!(i64::MAX),
        ];
        for b in bad {
            let err = coerce("createdAt", Some(&b)).unwrap_err();
            assert!(
                matches!(err, NormalizeError::MalformedTimestamp { ref field, .. } if field == "createdAt"),
                "case {b}"
            );
        }
    }
}

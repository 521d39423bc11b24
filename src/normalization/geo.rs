use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::model::GeoPoint;

fn lat_lng_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+(?:\.\d*)?)\s*,\s*(-?\d+(?:\.\d*)?)\s*$").expect("static regex")
    })
}

/// Parse `"lat,lng"` free text. The result is stored longitude first.
pub fn parse_lat_lng_text(raw: &str) -> Option<GeoPoint> {
    let caps = lat_lng_pattern().captures(raw)?;
    let lat = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let lng = caps.get(2)?.as_str().parse::<f64>().ok()?;
    checked(lat, lng)
}

/// Parse a location field: `"lat,lng"` text or an object carrying
/// `lat`/`lng`, `latitude`/`longitude` or `_latitude`/`_longitude`.
pub fn parse_location(value: Option<&Value>) -> Option<GeoPoint> {
    match value? {
        Value::String(s) => parse_lat_lng_text(s),
        Value::Object(obj) => {
            let pick = |keys: &[&str]| {
                keys.iter().find_map(|k| match obj.get(*k)? {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                })
            };
            let lat = pick(&["lat", "latitude", "_latitude"])?;
            let lng = pick(&["lng", "lon", "longitude", "_longitude"])?;
            checked(lat, lng)
        }
        _ => None,
    }
}

fn checked(lat: f64, lng: f64) -> Option<GeoPoint> {
    let in_range = lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng);
    in_range.then(|| GeoPoint::from_lat_lng(lat, lng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn swaps_axes_for_storage() {
        let p = parse_lat_lng_text("-26.2041,28.0473").unwrap();
        assert_eq!(p.longitude, 28.0473);
        assert_eq!(p.latitude, -26.2041);
    }

    #[test]
    fn tolerates_whitespace_and_integers() {
        let p = parse_lat_lng_text(" -26 , 28.5 ").unwrap();
        assert_eq!((p.latitude, p.longitude), (-26.0, 28.5));
    }

    #[test]
    fn structured_objects() {
        let p = parse_location(Some(&json!({"lat": -26.2, "lng": 28.04}))).unwrap();
        assert_eq!((p.longitude, p.latitude), (28.04, -26.2));
        let p = parse_location(Some(&json!({"_latitude": "-25.1", "_longitude": "27.9"}))).unwrap();
        assert_eq!((p.longitude, p.latitude), (27.9, -25.1));
    }

    #[test]
    fn garbage_is_no_location() {
        for raw in ["", "abc", "-26.2041", "-26.2041;28.0473", "1,2,3", "91,10", "10,181"] {
            assert!(parse_lat_lng_text(raw).is_none(), "input {raw:?}");
        }
        assert!(parse_location(None).is_none());
        assert!(parse_location(Some(&json!(42))).is_none());
        assert!(parse_location(Some(&json!({"lat": 1}))).is_none());
    }
}

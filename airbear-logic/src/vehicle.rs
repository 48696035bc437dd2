use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geo::LatLng;

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

/// The authoritative live state of one vehicle. Exactly one record exists per
/// vehicle id; a newer `updated_at` supersedes an older one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleRecord {
    pub id: String,
    #[serde(rename = "latitude")]
    pub lat: f64,
    #[serde(rename = "longitude")]
    pub long: f64,
    /// Degrees clockwise from north, in [0, 360)
    pub heading: f64,
    /// Whole percent, 0-100
    pub battery_level: u8,
    pub is_available: bool,
    pub is_charging: bool,
    pub current_spot_id: Option<String>,
    pub updated_at: UtcDT,
}

impl VehicleRecord {
    /// Whether this record should replace `other` when both claim the same
    /// vehicle id. A timestamp tie counts as more recent information.
    pub fn supersedes(&self, other: &VehicleRecord) -> bool {
        self.updated_at >= other.updated_at
    }

    pub fn position(&self) -> LatLng {
        LatLng {
            lat: self.lat,
            long: self.long,
        }
    }
}

/// A single incoming row failed numeric coercion and was dropped
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    pub id: String,
    pub reason: String,
}

impl MalformedRecord {
    fn new(id: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle {}: {}", self.id, self.reason)
    }
}

impl std::error::Error for MalformedRecord {}

/// A vehicle row as it arrives from upstream. Coordinate field naming has
/// drifted across writers over time (including one misspelling), so every
/// observed spelling is accepted here and normalized exactly once; no other
/// call site performs coordinate fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawVehicleRow {
    pub id: String,
    #[serde(alias = "lat", alias = "latitide")]
    pub latitude: Value,
    #[serde(alias = "lng", alias = "long", alias = "lon")]
    pub longitude: Value,
    #[serde(default)]
    pub heading: Option<Value>,
    #[serde(default)]
    pub battery_level: Option<i64>,
    #[serde(default = "default_available")]
    pub is_available: bool,
    #[serde(default)]
    pub is_charging: bool,
    #[serde(default)]
    pub current_spot_id: Option<String>,
    pub updated_at: UtcDT,
}

fn default_available() -> bool {
    true
}

/// Accept a JSON number or a numeric string, rejecting anything non-finite
fn coerce_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

impl RawVehicleRow {
    /// Coerce and validate into the canonical record shape
    pub fn normalize(self) -> Result<VehicleRecord, MalformedRecord> {
        let lat = coerce_number(&self.latitude)
            .ok_or_else(|| MalformedRecord::new(&self.id, "latitude failed numeric coercion"))?;
        let long = coerce_number(&self.longitude)
            .ok_or_else(|| MalformedRecord::new(&self.id, "longitude failed numeric coercion"))?;

        LatLng { lat, long }
            .validate()
            .map_err(|why| MalformedRecord::new(&self.id, why.to_string()))?;

        let heading = self
            .heading
            .as_ref()
            .and_then(coerce_number)
            .unwrap_or(0.0)
            .rem_euclid(360.0);
        let battery_level = self.battery_level.unwrap_or(0).clamp(0, 100) as u8;

        Ok(VehicleRecord {
            id: self.id,
            lat,
            long,
            heading,
            battery_level,
            is_available: self.is_available,
            is_charging: self.is_charging,
            current_spot_id: self.current_spot_id,
            updated_at: self.updated_at,
        })
    }
}

impl From<VehicleRecord> for RawVehicleRow {
    fn from(record: VehicleRecord) -> Self {
        Self {
            id: record.id,
            latitude: Value::from(record.lat),
            longitude: Value::from(record.long),
            heading: Some(Value::from(record.heading)),
            battery_level: Some(record.battery_level as i64),
            is_available: record.is_available,
            is_charging: record.is_charging,
            current_spot_id: record.current_spot_id,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_row(value: Value) -> RawVehicleRow {
        serde_json::from_value(value).expect("row should deserialize")
    }

    #[test]
    fn canonical_field_names_roundtrip() {
        let row = parse_row(json!({
            "id": "airbear-1",
            "latitude": 42.0991,
            "longitude": -75.9175,
            "heading": 270.0,
            "battery_level": 88,
            "is_available": true,
            "is_charging": false,
            "updated_at": "2026-03-01T12:00:00Z",
        }));
        let record = row.normalize().unwrap();
        assert_eq!(record.lat, 42.0991);
        assert_eq!(record.heading, 270.0);
        assert_eq!(record.battery_level, 88);
    }

    #[test]
    fn drifted_spellings_are_accepted() {
        // "latitide" is a real misspelling observed in old writers
        let row = parse_row(json!({
            "id": "airbear-2",
            "latitide": "42.0991",
            "lng": "-75.9175",
            "updated_at": "2026-03-01T12:00:00Z",
        }));
        let record = row.normalize().unwrap();
        assert_eq!(record.lat, 42.0991);
        assert_eq!(record.long, -75.9175);
        assert!(record.is_available, "availability defaults to true");
    }

    #[test]
    fn non_numeric_coordinates_are_malformed() {
        let row = parse_row(json!({
            "id": "airbear-3",
            "latitude": "not-a-number",
            "longitude": -75.9,
            "updated_at": "2026-03-01T12:00:00Z",
        }));
        let why = row.normalize().unwrap_err();
        assert!(why.reason.contains("coercion"), "got: {why}");
    }

    #[test]
    fn out_of_range_coordinates_are_malformed() {
        let row = parse_row(json!({
            "id": "airbear-4",
            "latitude": 95.0,
            "longitude": 0.0,
            "updated_at": "2026-03-01T12:00:00Z",
        }));
        assert!(row.normalize().is_err());
    }

    #[test]
    fn heading_wraps_and_battery_clamps() {
        let row = parse_row(json!({
            "id": "airbear-5",
            "latitude": 42.0,
            "longitude": -75.9,
            "heading": 450.0,
            "battery_level": 140,
            "updated_at": "2026-03-01T12:00:00Z",
        }));
        let record = row.normalize().unwrap();
        assert_eq!(record.heading, 90.0);
        assert_eq!(record.battery_level, 100);
    }

    #[test]
    fn newer_and_tied_timestamps_supersede() {
        let base: UtcDT = "2026-03-01T12:00:00Z".parse().unwrap();
        let older = VehicleRecord {
            id: "a".to_string(),
            lat: 0.0,
            long: 0.0,
            heading: 0.0,
            battery_level: 50,
            is_available: true,
            is_charging: false,
            current_spot_id: None,
            updated_at: base,
        };
        let newer = VehicleRecord {
            updated_at: base + chrono::Duration::seconds(5),
            ..older.clone()
        };
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
        assert!(older.clone().supersedes(&older), "ties count as newer");
    }
}

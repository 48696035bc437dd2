use std::fmt;

use serde::{Deserialize, Serialize};

/// A "part" of a coordinate
pub type Coordinate = f64;

/// Mean Earth radius in kilometers, used for great-circle math
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const MAX_LATITUDE: f64 = 90.0;
const MAX_LONGITUDE: f64 = 180.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Some point on the globe, in WGS84 degrees
pub struct LatLng {
    /// Latitude
    pub lat: Coordinate,
    /// Longitude
    pub long: Coordinate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateAxis {
    Latitude,
    Longitude,
}

impl fmt::Display for CoordinateAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latitude => write!(f, "latitude"),
            Self::Longitude => write!(f, "longitude"),
        }
    }
}

/// A coordinate failed validation, callers must treat the distance as unknown
/// and suppress any quote built from it rather than display a wrong number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidCoordinate {
    pub axis: CoordinateAxis,
    pub value: Coordinate,
}

impl fmt::Display for InvalidCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.axis, self.value)
    }
}

impl std::error::Error for InvalidCoordinate {}

impl LatLng {
    pub fn new(lat: Coordinate, long: Coordinate) -> Result<Self, InvalidCoordinate> {
        let point = Self { lat, long };
        point.validate()?;
        Ok(point)
    }

    /// Check both components are finite numbers within WGS84 range
    pub fn validate(&self) -> Result<(), InvalidCoordinate> {
        if !self.lat.is_finite() || self.lat.abs() > MAX_LATITUDE {
            return Err(InvalidCoordinate {
                axis: CoordinateAxis::Latitude,
                value: self.lat,
            });
        }
        if !self.long.is_finite() || self.long.abs() > MAX_LONGITUDE {
            return Err(InvalidCoordinate {
                axis: CoordinateAxis::Longitude,
                value: self.long,
            });
        }
        Ok(())
    }
}

/// A fixed, named pickup/dropoff location. Inactive spots are kept around so
/// historical rides can still resolve them, they just can't be booked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Spot {
    pub id: String,
    pub name: String,
    pub latitude: Coordinate,
    pub longitude: Coordinate,
    pub is_active: bool,
}

impl Spot {
    pub fn position(&self) -> LatLng {
        LatLng {
            lat: self.latitude,
            long: self.longitude,
        }
    }
}

/// Haversine great-circle distance between two points in kilometers.
///
/// Fails with [InvalidCoordinate] instead of returning a number when either
/// point is out of range or non-finite (e.g. came from a failed parse).
pub fn distance_km(a: LatLng, b: LatLng) -> Result<f64, InvalidCoordinate> {
    a.validate()?;
    b.validate()?;

    let (lat1, lon1) = (a.lat.to_radians(), a.long.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.long.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    Ok(EARTH_RADIUS_KM * c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, long: f64) -> LatLng {
        LatLng { lat, long }
    }

    #[test]
    fn self_distance_is_zero() {
        let a = point(42.099118, -75.917538);
        assert!(distance_km(a, a).unwrap() < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = point(42.099118, -75.917538);
        let b = point(40.7128, -74.006);
        let ab = distance_km(a, b).unwrap();
        let ba = distance_km(b, a).unwrap();
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_at_the_equator() {
        let d = distance_km(point(0.0, 0.0), point(1.0, 0.0)).unwrap();
        assert!(
            (d - 111.19).abs() < 0.5,
            "one degree of latitude should be ~111.19km, got {d}"
        );
    }

    #[test]
    fn invalid_coordinates_fail_instead_of_returning_a_number() {
        let ok = point(0.0, 0.0);

        let nan = distance_km(point(f64::NAN, 0.0), ok);
        assert_eq!(
            nan.unwrap_err().axis,
            CoordinateAxis::Latitude,
            "NaN latitude must fail"
        );

        let too_far_north = distance_km(ok, point(91.0, 0.0));
        assert!(too_far_north.is_err(), "latitude over 90 must fail");

        let wrapped = distance_km(ok, point(0.0, -180.5));
        assert_eq!(wrapped.unwrap_err().axis, CoordinateAxis::Longitude);
    }

    #[test]
    fn boundary_coordinates_are_accepted() {
        assert!(distance_km(point(90.0, 180.0), point(-90.0, -180.0)).is_ok());
    }
}

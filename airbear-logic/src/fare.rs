use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geo::{self, InvalidCoordinate, Spot};

/// Fixed fare charged on the primary booking flow regardless of distance
pub const FLAT_FARE_USD: f64 = 4.0;

/// A trip distance was negative or not a finite number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidDistance(pub f64);

impl fmt::Display for InvalidDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid trip distance: {}", self.0)
    }
}

impl std::error::Error for InvalidDistance {}

/// Distance-based fare schedule used by the demo map flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TieredFare {
    pub base_fare: f64,
    pub per_km: f64,
    /// Fares never drop below this, including for zero-distance trips
    pub minimum_fare: f64,
}

impl Default for TieredFare {
    fn default() -> Self {
        Self {
            base_fare: 2.50,
            per_km: 1.50,
            minimum_fare: 2.50,
        }
    }
}

/// Which fare model to apply. The two models come from different booking
/// entry points, so both stay configurable rather than one being derived
/// from the other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FareMode {
    /// Flat rate regardless of distance
    Flat { amount: f64 },
    /// Base fare plus a per-kilometer increment, floored at a minimum
    Tiered(TieredFare),
}

impl Default for FareMode {
    fn default() -> Self {
        Self::Flat {
            amount: FLAT_FARE_USD,
        }
    }
}

/// Settings for quoting a trip before booking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuoteConfig {
    pub fare: FareMode,
    /// Average pace including stops, ~20km/h at the default of 3
    pub minutes_per_km: f64,
    /// Show at least "1 min" for any nonzero distance instead of "0 min"
    pub floor_one_minute: bool,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            fare: FareMode::default(),
            minutes_per_km: 3.0,
            floor_one_minute: true,
        }
    }
}

fn check_distance(distance_km: f64) -> Result<(), InvalidDistance> {
    if !distance_km.is_finite() || distance_km < 0.0 {
        Err(InvalidDistance(distance_km))
    } else {
        Ok(())
    }
}

/// Fare in US dollars for a trip of the given distance, at full precision.
/// Use [round_usd] when displaying the result.
pub fn estimate_fare(mode: &FareMode, distance_km: f64) -> Result<f64, InvalidDistance> {
    check_distance(distance_km)?;
    Ok(match mode {
        FareMode::Flat { amount } => *amount,
        FareMode::Tiered(tiers) => {
            (tiers.base_fare + tiers.per_km * distance_km).max(tiers.minimum_fare)
        }
    })
}

/// Estimated trip time in whole minutes
pub fn estimate_duration_minutes(
    config: &QuoteConfig,
    distance_km: f64,
) -> Result<u32, InvalidDistance> {
    check_distance(distance_km)?;
    let minutes = (distance_km * config.minutes_per_km).round() as u32;
    if config.floor_one_minute && distance_km > 0.0 {
        Ok(minutes.max(1))
    } else {
        Ok(minutes)
    }
}

/// Round a dollar amount to cents for display
pub fn round_usd(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// An ephemeral pre-booking estimate, recomputed on demand and never persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RideQuote {
    pub distance_km: f64,
    pub fare_usd: f64,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuoteError {
    Coordinate(InvalidCoordinate),
    Distance(InvalidDistance),
}

impl From<InvalidCoordinate> for QuoteError {
    fn from(v: InvalidCoordinate) -> Self {
        Self::Coordinate(v)
    }
}

impl From<InvalidDistance> for QuoteError {
    fn from(v: InvalidDistance) -> Self {
        Self::Distance(v)
    }
}

impl fmt::Display for QuoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinate(why) => why.fmt(f),
            Self::Distance(why) => why.fmt(f),
        }
    }
}

impl std::error::Error for QuoteError {}

/// Quote a trip between two spots. Any failure means "quote unknown", the
/// caller is expected to hide the quote rather than render a wrong one.
pub fn quote(config: &QuoteConfig, pickup: &Spot, dropoff: &Spot) -> Result<RideQuote, QuoteError> {
    let distance_km = geo::distance_km(pickup.position(), dropoff.position())?;
    let fare = estimate_fare(&config.fare, distance_km)?;
    let duration_minutes = estimate_duration_minutes(config, distance_km)?;

    Ok(RideQuote {
        distance_km,
        fare_usd: round_usd(fare),
        duration_minutes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(id: &str, latitude: f64, longitude: f64) -> Spot {
        Spot {
            id: id.to_string(),
            name: id.to_string(),
            latitude,
            longitude,
            is_active: true,
        }
    }

    #[test]
    fn flat_mode_ignores_distance() {
        let mode = FareMode::default();
        for distance in [0.0, 1.0, 1000.0] {
            assert_eq!(estimate_fare(&mode, distance).unwrap(), 4.0);
        }
    }

    #[test]
    fn tiered_mode_never_undercuts_the_minimum() {
        let mode = FareMode::Tiered(TieredFare {
            base_fare: 1.0,
            per_km: 0.5,
            minimum_fare: 3.0,
        });
        assert_eq!(estimate_fare(&mode, 0.0).unwrap(), 3.0);
        assert_eq!(estimate_fare(&mode, 1.0).unwrap(), 3.0);
        // Past the crossover the linear schedule takes over
        assert_eq!(estimate_fare(&mode, 10.0).unwrap(), 6.0);
    }

    #[test]
    fn negative_distance_is_rejected() {
        assert!(estimate_fare(&FareMode::default(), -0.1).is_err());
        assert!(estimate_duration_minutes(&QuoteConfig::default(), -1.0).is_err());
        assert!(estimate_fare(&FareMode::default(), f64::NAN).is_err());
    }

    #[test]
    fn duration_is_monotonic() {
        let config = QuoteConfig::default();
        let mut last = 0;
        for distance in [0.0, 0.1, 0.5, 1.0, 2.5, 10.0, 50.0] {
            let minutes = estimate_duration_minutes(&config, distance).unwrap();
            assert!(minutes >= last, "duration went down at {distance}km");
            last = minutes;
        }
    }

    #[test]
    fn duration_floors_at_one_minute_when_enabled() {
        let config = QuoteConfig::default();
        assert_eq!(estimate_duration_minutes(&config, 0.0).unwrap(), 0);
        assert_eq!(estimate_duration_minutes(&config, 0.05).unwrap(), 1);

        let unfloored = QuoteConfig {
            floor_one_minute: false,
            ..QuoteConfig::default()
        };
        assert_eq!(estimate_duration_minutes(&unfloored, 0.05).unwrap(), 0);
    }

    #[test]
    fn campus_short_hop_quote() {
        let union = spot("union", 42.099118, -75.917538);
        let bartle = spot("bartle", 42.098765, -75.916543);

        let q = quote(&QuoteConfig::default(), &union, &bartle).unwrap();

        assert!(
            q.distance_km > 0.05 && q.distance_km < 0.15,
            "short hop should be ~0.1km, got {}",
            q.distance_km
        );
        assert_eq!(q.fare_usd, 4.0);
        assert_eq!(q.duration_minutes, 1, "floor policy keeps short hops at 1 min");
    }

    #[test]
    fn quote_fails_on_bad_coordinates() {
        let union = spot("union", 42.099118, -75.917538);
        let broken = spot("broken", f64::NAN, -75.916543);
        assert!(quote(&QuoteConfig::default(), &union, &broken).is_err());
    }

    #[test]
    fn display_rounding_goes_to_cents() {
        assert_eq!(round_usd(2.0), 2.0);
        assert_eq!(round_usd(3.14159), 3.14);
        assert_eq!(round_usd(0.1 + 0.2), 0.3);
        assert_eq!(round_usd(2.996), 3.0);
    }
}

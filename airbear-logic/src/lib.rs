mod bodega;
mod fare;
mod feed;
mod geo;
mod payments;
mod profile;
mod ride;
mod vehicle;

pub use bodega::{BodegaItem, CreateOrder, Order, OrderLine, OrderStatus};
pub use fare::{
    FLAT_FARE_USD, FareMode, InvalidDistance, QuoteConfig, QuoteError, RideQuote, TieredFare,
    estimate_duration_minutes, estimate_fare, quote, round_usd,
};
pub use feed::{FeedBackend, FeedConfig, FeedStatus, FleetFeed, UpdateSink};
pub use geo::{CoordinateAxis, EARTH_RADIUS_KM, InvalidCoordinate, LatLng, Spot, distance_km};
pub use payments::{
    CashTokenClaims, InvalidCashToken, PaymentIntent, decode_cash_token, encode_cash_token,
    verify_webhook_signature, webhook_signature,
};
pub use profile::UserProfile;
pub use ride::{CreateRide, Ride, RideStatus};
pub use vehicle::{MalformedRecord, RawVehicleRow, UtcDT, VehicleRecord};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}

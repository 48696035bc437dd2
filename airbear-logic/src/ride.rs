use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vehicle::UtcDT;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    /// Booked, waiting on a driver (and payment where applicable)
    Requested,
    /// A driver (or a cleared payment) has confirmed the booking
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

/// A booking linking a rider, two spots, and a fare
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pickup_spot_id: String,
    pub dropoff_spot_id: String,
    /// Quoted fare in US dollars
    pub fare: f64,
    /// Quoted distance in kilometers
    pub distance: f64,
    pub status: RideStatus,
    pub created_at: UtcDT,
    pub updated_at: UtcDT,
}

/// Payload for booking a ride; the rider comes from the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRide {
    pub pickup_spot_id: String,
    pub dropoff_spot_id: String,
    pub fare: f64,
    pub distance: f64,
}

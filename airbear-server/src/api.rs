use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use uuid::Uuid;

use airbear_logic::{
    BodegaItem, CashTokenClaims, CreateOrder, CreateRide, Order, OrderStatus, PaymentIntent,
    RawVehicleRow, Ride, RideStatus, Spot, UserProfile, UtcDT, VehicleRecord, decode_cash_token,
    encode_cash_token, verify_webhook_signature,
};

use crate::{
    payment::{self, PaymentEvent},
    state::{AuthError, OrderError, ServerState},
};

/// Every error leaves as `{"message": ...}` with a 4xx/5xx status
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, message.into())
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self(StatusCode::UNAUTHORIZED, message.into())
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, message.into())
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self(StatusCode::CONFLICT, message.into())
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_GATEWAY, message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "message": self.1 }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(why: AuthError) -> Self {
        match why {
            AuthError::EmailTaken => Self::conflict("email already registered"),
            AuthError::BadCredentials => Self::unauthorized("unknown email or wrong password"),
            AuthError::Unauthorized => Self::unauthorized("missing or invalid bearer token"),
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(why: OrderError) -> Self {
        match why {
            OrderError::Empty => Self::bad_request("order has no lines"),
            OrderError::UnknownItem(id) => Self::not_found(format!("unknown item {id}")),
            OrderError::OutOfStock(id) => Self::conflict(format!("item {id} is out of stock")),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authenticate(state: &ServerState, headers: &HeaderMap) -> ApiResult<UserProfile> {
    let token =
        bearer_token(headers).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    Ok(state.authenticate(token)?)
}

// --- health ---

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// --- auth ---

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    email: String,
    password: String,
    display_name: String,
}

pub async fn register(
    State(state): State<ServerState>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Json<Value>> {
    if body.email.trim().is_empty() || !body.email.contains('@') {
        return Err(ApiError::bad_request("a valid email is required"));
    }
    if body.password.len() < 6 {
        return Err(ApiError::bad_request("password must be at least 6 characters"));
    }

    let (token, user) = state.register_user(
        body.email.trim(),
        &body.password,
        body.display_name.trim(),
    )?;
    info!("Registered {}", user.email);
    Ok(Json(json!({ "token": token, "user": user })))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    email: String,
    password: String,
}

pub async fn login(
    State(state): State<ServerState>,
    Json(body): Json<LoginBody>,
) -> ApiResult<Json<Value>> {
    let (token, user) = state.login(body.email.trim(), &body.password)?;
    Ok(Json(json!({ "token": token, "user": user })))
}

pub async fn me(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(authenticate(&state, &headers)?))
}

#[derive(Debug, Deserialize)]
pub struct ProfileBody {
    display_name: String,
}

pub async fn sync_profile(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<ProfileBody>,
) -> ApiResult<Json<UserProfile>> {
    let user = authenticate(&state, &headers)?;
    state
        .update_profile(user.id, body.display_name.trim())
        .map(Json)
        .ok_or_else(|| ApiError::not_found("user not found"))
}

// --- spots ---

#[derive(Debug, Deserialize)]
pub struct SpotsQuery {
    #[serde(default)]
    include_inactive: bool,
}

pub async fn list_spots(
    State(state): State<ServerState>,
    Query(query): Query<SpotsQuery>,
) -> Json<Vec<Spot>> {
    Json(state.list_spots(query.include_inactive))
}

// --- vehicles ---

pub async fn list_vehicles(State(state): State<ServerState>) -> Json<Vec<VehicleRecord>> {
    Json(state.list_vehicles())
}

/// Driver location update. Accepts the drifted coordinate spellings the same
/// way the feed does, by funneling through [RawVehicleRow::normalize].
#[derive(Debug, Deserialize)]
pub struct LocationBody {
    #[serde(alias = "lat", alias = "latitide")]
    latitude: Value,
    #[serde(alias = "lng", alias = "long", alias = "lon")]
    longitude: Value,
    #[serde(default)]
    heading: Option<Value>,
    #[serde(default)]
    updated_at: Option<UtcDT>,
}

pub async fn update_vehicle_location(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<LocationBody>,
) -> ApiResult<Json<VehicleRecord>> {
    authenticate(&state, &headers)?;

    let held = state.get_vehicle(&id);
    let (battery_level, is_available, is_charging, current_spot_id) = match &held {
        Some(held) => (
            Some(held.battery_level as i64),
            held.is_available,
            held.is_charging,
            held.current_spot_id.clone(),
        ),
        None => (None, true, false, None),
    };

    let row = RawVehicleRow {
        id: id.clone(),
        latitude: body.latitude,
        longitude: body.longitude,
        heading: body.heading,
        battery_level,
        is_available,
        is_charging,
        current_spot_id,
        updated_at: body.updated_at.unwrap_or_else(Utc::now),
    };

    let record = row
        .normalize()
        .map_err(|why| ApiError::bad_request(why.to_string()))?;

    if !state.upsert_vehicle(record) {
        // Stale write: answer with the authoritative record instead
        warn!("Ignoring stale location update for {id}");
        return state
            .get_vehicle(&id)
            .map(Json)
            .ok_or_else(|| ApiError::not_found(format!("unknown vehicle {id}")));
    }

    state
        .get_vehicle(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown vehicle {id}")))
}

/// NDJSON change feed: a burst of the current records, then one record per
/// line as writes are accepted. Subscribing before the snapshot read means a
/// write landing in between shows up twice rather than not at all; consumers
/// dedup by timestamp.
pub async fn stream_vehicles(State(state): State<ServerState>) -> Response {
    let rx = state.subscribe_changes();
    let snapshot = state.list_vehicles();

    let burst = futures::stream::iter(snapshot.into_iter().filter_map(|record| {
        let mut line = serde_json::to_string(&record).ok()?;
        line.push('\n');
        Some(Ok::<_, std::convert::Infallible>(line))
    }));

    let live = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(record) => {
                    let Ok(mut line) = serde_json::to_string(&record) else {
                        continue;
                    };
                    line.push('\n');
                    return Some((Ok::<_, std::convert::Infallible>(line), rx));
                }
                // A slow reader missed some updates; its next poll catches up
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Stream subscriber lagged, skipped {skipped} updates");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(burst.chain(live)),
    )
        .into_response()
}

// --- rides ---

pub async fn create_ride(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<CreateRide>,
) -> ApiResult<Json<Ride>> {
    let user = authenticate(&state, &headers)?;

    let pickup = state
        .get_spot(&body.pickup_spot_id)
        .ok_or_else(|| ApiError::not_found("unknown pickup spot"))?;
    let dropoff = state
        .get_spot(&body.dropoff_spot_id)
        .ok_or_else(|| ApiError::not_found("unknown dropoff spot"))?;
    if !pickup.is_active || !dropoff.is_active {
        return Err(ApiError::bad_request("spot is not open for booking"));
    }
    if !body.fare.is_finite() || body.fare < 0.0 {
        return Err(ApiError::bad_request("fare must be a non-negative number"));
    }
    if !body.distance.is_finite() || body.distance < 0.0 {
        return Err(ApiError::bad_request("distance must be a non-negative number"));
    }

    let now = Utc::now();
    let ride = Ride {
        id: Uuid::new_v4(),
        user_id: user.id,
        pickup_spot_id: body.pickup_spot_id,
        dropoff_spot_id: body.dropoff_spot_id,
        fare: body.fare,
        distance: body.distance,
        status: RideStatus::Requested,
        created_at: now,
        updated_at: now,
    };
    state.insert_ride(ride.clone());
    info!("Ride {} booked by {}", ride.id, user.email);

    Ok(Json(ride))
}

pub async fn get_ride(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Ride>> {
    state
        .get_ride(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown ride {id}")))
}

#[derive(Debug, Deserialize)]
pub struct RideStatusBody {
    status: RideStatus,
}

pub async fn update_ride_status(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RideStatusBody>,
) -> ApiResult<Json<Ride>> {
    authenticate(&state, &headers)?;
    state
        .update_ride_status(id, body.status)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown ride {id}")))
}

// --- bodega ---

pub async fn list_bodega_items(State(state): State<ServerState>) -> Json<Vec<BodegaItem>> {
    Json(state.list_items())
}

pub async fn create_order(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrder>,
) -> ApiResult<Json<Order>> {
    let user = authenticate(&state, &headers)?;
    Ok(Json(state.place_order(user.id, body.lines)?))
}

// --- payments ---

#[derive(Debug, Deserialize)]
pub struct IntentBody {
    amount_minor: i64,
}

pub async fn create_payment_intent(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<IntentBody>,
) -> ApiResult<Json<PaymentIntent>> {
    authenticate(&state, &headers)?;
    if body.amount_minor <= 0 {
        return Err(ApiError::bad_request("amount must be positive"));
    }

    payment::create_intent(&state.processor, &state.http_client, body.amount_minor)
        .await
        .map(Json)
        .map_err(|why| ApiError::bad_gateway(why.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct CashBody {
    #[serde(default)]
    order_id: Option<Uuid>,
    #[serde(default)]
    ride_id: Option<Uuid>,
    amount_minor: i64,
}

pub async fn create_cash_payment(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<CashBody>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers)?;

    if body.order_id.is_none() && body.ride_id.is_none() {
        return Err(ApiError::bad_request("token must reference an order or a ride"));
    }
    if body.amount_minor <= 0 {
        return Err(ApiError::bad_request("amount must be positive"));
    }
    if let Some(order_id) = body.order_id {
        if state.get_order(order_id).is_none() {
            return Err(ApiError::not_found(format!("unknown order {order_id}")));
        }
    }
    if let Some(ride_id) = body.ride_id {
        if state.get_ride(ride_id).is_none() {
            return Err(ApiError::not_found(format!("unknown ride {ride_id}")));
        }
    }

    let claims = CashTokenClaims {
        order_id: body.order_id,
        ride_id: body.ride_id,
        user_id: user.id,
        amount_minor: body.amount_minor,
        timestamp: Utc::now(),
    };

    Ok(Json(json!({ "token": encode_cash_token(&claims) })))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmBody {
    token: String,
}

pub async fn confirm_cash_payment(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<ConfirmBody>,
) -> ApiResult<Json<Value>> {
    authenticate(&state, &headers)?;

    let claims = decode_cash_token(&body.token)
        .map_err(|why| ApiError::bad_request(why.to_string()))?;

    if !state.apply_payment_success(&claims) {
        return Err(ApiError::not_found("token references nothing we know about"));
    }

    Ok(Json(json!({ "status": "confirmed" })))
}

// --- webhooks ---

pub async fn payment_webhook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing webhook signature"))?;

    if !verify_webhook_signature(&state.processor.webhook_secret, &body, signature) {
        return Err(ApiError::unauthorized("bad webhook signature"));
    }

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("undecodable webhook payload"))?;

    match event.event_type.as_str() {
        "payment.succeeded" => {
            let claims = CashTokenClaims {
                order_id: event.order_id,
                ride_id: event.ride_id,
                user_id: Uuid::nil(),
                amount_minor: 0,
                timestamp: Utc::now(),
            };
            if !state.apply_payment_success(&claims) {
                warn!("Payment success event referenced nothing we hold");
            }
        }
        "payment.failed" => {
            if let Some(order_id) = event.order_id {
                state.update_order_status(order_id, OrderStatus::Cancelled);
            }
            if let Some(ride_id) = event.ride_id {
                state.update_ride_status(ride_id, RideStatus::Cancelled);
            }
        }
        other => {
            // Unknown event types are acknowledged and ignored
            info!("Ignoring webhook event type {other}");
        }
    }

    Ok(StatusCode::OK)
}

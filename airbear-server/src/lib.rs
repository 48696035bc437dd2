mod api;
mod payment;
mod state;

use axum::{
    Router,
    routing::{get, post, put},
};

pub use payment::ProcessorConfig;
pub use state::ServerState;

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/auth/register", post(api::register))
        .route("/api/auth/login", post(api::login))
        .route("/api/auth/me", get(api::me))
        .route("/api/auth/profile", put(api::sync_profile))
        .route("/api/spots", get(api::list_spots))
        .route("/api/vehicles", get(api::list_vehicles))
        .route("/api/vehicles/stream", get(api::stream_vehicles))
        .route(
            "/api/vehicles/{id}/location",
            put(api::update_vehicle_location),
        )
        .route("/api/rides", post(api::create_ride))
        .route("/api/rides/{id}", get(api::get_ride))
        .route("/api/rides/{id}/status", put(api::update_ride_status))
        .route("/api/bodega/items", get(api::list_bodega_items))
        .route("/api/bodega/orders", post(api::create_order))
        .route("/api/payments/intent", post(api::create_payment_intent))
        .route("/api/payments/cash", post(api::create_cash_payment))
        .route("/api/payments/cash/confirm", post(api::confirm_cash_payment))
        .route("/api/webhooks/payment", post(api::payment_webhook))
        .with_state(state)
}

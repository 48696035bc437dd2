use std::sync::RwLock;

use anyhow::bail;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use airbear_logic::{
    BodegaItem, CreateOrder, CreateRide, FeedBackend, Order, PaymentIntent, RawVehicleRow, Ride,
    RideStatus, Spot, UserProfile, VehicleRecord, prelude::*,
};

use crate::{server, stream};

/// Shape of every error body the server produces
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
struct CashTokenBody {
    token: String,
}

/// Client for the backing server's REST surface. Holds the bearer session
/// after a login/register so later calls are authenticated, and doubles as
/// the [FeedBackend] for live vehicle subscriptions.
pub struct RestBackend {
    base_url: String,
    client: Client,
    session: RwLock<Option<Session>>,
}

impl RestBackend {
    pub fn new() -> Result<Self> {
        Self::with_base_url(server::API_BASE_URL.to_string())
    }

    /// Point at a specific server instead of the compiled-in default
    pub fn with_base_url(base_url: String) -> Result<Self> {
        Ok(Self {
            base_url,
            client: Client::builder()
                .build()
                .context("Failed to build HTTP client")?,
            session: RwLock::new(None),
        })
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().unwrap().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .read()
            .unwrap()
            .as_ref()
            .map(|session| session.token.clone());
        if let Some(token) = token {
            req.bearer_auth(token)
        } else {
            req
        }
    }

    /// Decode a success body, or surface the server's `{message}` verbatim so
    /// the UI layer can show the user exactly what went wrong
    async fn expect_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            resp.json().await.context("Failed to decode server response")
        } else {
            let message = resp
                .json::<ErrorBody>()
                .await
                .map(|body| body.message)
                .unwrap_or_else(|_| format!("server returned {status}"));
            bail!("{message}")
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .authed(self.client.get(self.url(path)))
            .send()
            .await
            .context("Could not reach server")?;
        Self::expect_json(resp).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        body: &impl Serialize,
    ) -> Result<T> {
        let resp = self
            .authed(req)
            .json(body)
            .send()
            .await
            .context("Could not reach server")?;
        Self::expect_json(resp).await
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Session> {
        let session: Session = self
            .send_json(
                self.client.post(self.url("/api/auth/register")),
                &json!({
                    "email": email,
                    "password": password,
                    "display_name": display_name,
                }),
            )
            .await?;
        *self.session.write().unwrap() = Some(session.clone());
        Ok(session)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let session: Session = self
            .send_json(
                self.client.post(self.url("/api/auth/login")),
                &json!({ "email": email, "password": password }),
            )
            .await?;
        *self.session.write().unwrap() = Some(session.clone());
        Ok(session)
    }

    pub async fn me(&self) -> Result<UserProfile> {
        self.get_json("/api/auth/me").await
    }

    pub async fn sync_profile(&self, display_name: &str) -> Result<UserProfile> {
        self.send_json(
            self.client.put(self.url("/api/auth/profile")),
            &json!({ "display_name": display_name }),
        )
        .await
    }

    /// Spots open for booking
    pub async fn list_spots(&self) -> Result<Vec<Spot>> {
        self.get_json("/api/spots").await
    }

    /// Every spot, including deactivated ones kept for ride history
    pub async fn list_all_spots(&self) -> Result<Vec<Spot>> {
        self.get_json("/api/spots?include_inactive=true").await
    }

    pub async fn list_vehicles(&self) -> Result<Vec<RawVehicleRow>> {
        self.get_json("/api/vehicles").await
    }

    /// Driver location update. The server ignores stale timestamps and
    /// returns the authoritative record either way.
    pub async fn update_vehicle_location(
        &self,
        id: &str,
        latitude: f64,
        longitude: f64,
        heading: f64,
    ) -> Result<VehicleRecord> {
        self.send_json(
            self.client.put(self.url(&format!("/api/vehicles/{id}/location"))),
            &json!({
                "latitude": latitude,
                "longitude": longitude,
                "heading": heading,
            }),
        )
        .await
    }

    pub async fn create_ride(&self, ride: &CreateRide) -> Result<Ride> {
        self.send_json(self.client.post(self.url("/api/rides")), ride)
            .await
    }

    pub async fn get_ride(&self, id: Uuid) -> Result<Ride> {
        self.get_json(&format!("/api/rides/{id}")).await
    }

    pub async fn update_ride_status(&self, id: Uuid, status: RideStatus) -> Result<Ride> {
        self.send_json(
            self.client.put(self.url(&format!("/api/rides/{id}/status"))),
            &json!({ "status": status }),
        )
        .await
    }

    pub async fn list_bodega_items(&self) -> Result<Vec<BodegaItem>> {
        self.get_json("/api/bodega/items").await
    }

    pub async fn create_order(&self, order: &CreateOrder) -> Result<Order> {
        self.send_json(self.client.post(self.url("/api/bodega/orders")), order)
            .await
    }

    pub async fn create_payment_intent(&self, amount_minor: i64) -> Result<PaymentIntent> {
        self.send_json(
            self.client.post(self.url("/api/payments/intent")),
            &json!({ "amount_minor": amount_minor }),
        )
        .await
    }

    /// Ask the server to mint a cash/QR token for an order or ride
    pub async fn create_cash_payment(
        &self,
        order_id: Option<Uuid>,
        ride_id: Option<Uuid>,
        amount_minor: i64,
    ) -> Result<String> {
        let body: CashTokenBody = self
            .send_json(
                self.client.post(self.url("/api/payments/cash")),
                &json!({
                    "order_id": order_id,
                    "ride_id": ride_id,
                    "amount_minor": amount_minor,
                }),
            )
            .await?;
        Ok(body.token)
    }

    /// Driver-side confirmation of a scanned cash token
    pub async fn confirm_cash_payment(&self, token: &str) -> Result {
        let _: serde_json::Value = self
            .send_json(
                self.client.post(self.url("/api/payments/cash/confirm")),
                &json!({ "token": token }),
            )
            .await?;
        Ok(())
    }
}

impl FeedBackend for RestBackend {
    async fn fetch_snapshot(&self) -> Result<Vec<RawVehicleRow>> {
        self.list_vehicles().await
    }

    async fn open_channel(&self) -> Result<mpsc::Receiver<RawVehicleRow>> {
        stream::open_vehicle_channel(self.client.clone(), self.url("/api/vehicles/stream")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_cleanly() {
        let backend = RestBackend::with_base_url("http://127.0.0.1:4114".to_string()).unwrap();
        assert_eq!(backend.url("/api/spots"), "http://127.0.0.1:4114/api/spots");
    }

    #[test]
    fn session_starts_empty() {
        let backend = RestBackend::with_base_url("http://127.0.0.1:4114".to_string()).unwrap();
        assert!(backend.session().is_none());
    }
}

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use rand::RngExt;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use uuid::Uuid;

use airbear_logic::{
    BodegaItem, CashTokenClaims, Order, OrderLine, OrderStatus, Ride, RideStatus, Spot,
    UserProfile, UtcDT, VehicleRecord, round_usd,
};

use crate::payment::ProcessorConfig;

pub type StateObj<T> = Arc<Mutex<T>>;

fn state_obj<T>(value: T) -> StateObj<T> {
    Arc::new(Mutex::new(value))
}

const SESSION_HOURS: i64 = 24;
const TOKEN_CHAR_POOL: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TOKEN_LEN: usize = 32;
const CHANGE_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct User {
    pub profile: UserProfile,
    password_salt: String,
    password_hash: String,
}

/// A bearer session, expires after [SESSION_HOURS] hours
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub expires_at: UtcDT,
}

impl Session {
    fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            expires_at: Utc::now() + chrono::Duration::hours(SESSION_HOURS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Email already registered
    EmailTaken,
    /// Unknown email or wrong password
    BadCredentials,
    /// Missing, expired, or unknown bearer token
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderError {
    /// Order has no lines
    Empty,
    /// Referenced item doesn't exist or isn't sold anymore
    UnknownItem(Uuid),
    /// Not enough stock to cover the requested quantity
    OutOfStock(Uuid),
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn random_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_CHAR_POOL[rng.random_range(0..TOKEN_CHAR_POOL.len())] as char)
        .collect()
}

/// All rows the server owns. The hosted-database stand-in: everything lives
/// in memory keyed by id, and vehicle writes fan out over a broadcast bus to
/// the NDJSON stream handlers.
#[derive(Clone)]
pub struct ServerState {
    users: StateObj<HashMap<Uuid, User>>,
    sessions: StateObj<HashMap<String, Session>>,
    spots: StateObj<HashMap<String, Spot>>,
    vehicles: StateObj<HashMap<String, VehicleRecord>>,
    rides: StateObj<HashMap<Uuid, Ride>>,
    items: StateObj<HashMap<Uuid, BodegaItem>>,
    orders: StateObj<HashMap<Uuid, Order>>,
    changes: broadcast::Sender<VehicleRecord>,
    pub processor: Arc<ProcessorConfig>,
    pub http_client: reqwest::Client,
}

impl ServerState {
    pub fn new(processor: ProcessorConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Self {
            users: state_obj(HashMap::new()),
            sessions: state_obj(HashMap::new()),
            spots: state_obj(HashMap::new()),
            vehicles: state_obj(HashMap::new()),
            rides: state_obj(HashMap::new()),
            items: state_obj(HashMap::new()),
            orders: state_obj(HashMap::new()),
            changes,
            processor: Arc::new(processor),
            http_client: reqwest::Client::new(),
        }
    }

    // --- auth ---

    pub fn register_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<(String, UserProfile), AuthError> {
        let mut users = self.users.lock().unwrap();
        if users
            .values()
            .any(|user| user.profile.email.eq_ignore_ascii_case(email))
        {
            return Err(AuthError::EmailTaken);
        }

        let id = Uuid::new_v4();
        let salt = random_token();
        let user = User {
            profile: UserProfile {
                id,
                email: email.to_string(),
                display_name: display_name.to_string(),
            },
            password_hash: hash_password(&salt, password),
            password_salt: salt,
        };
        let profile = user.profile.clone();
        users.insert(id, user);
        drop(users);

        Ok((self.create_session(id), profile))
    }

    pub fn login(&self, email: &str, password: &str) -> Result<(String, UserProfile), AuthError> {
        let users = self.users.lock().unwrap();
        let user = users
            .values()
            .find(|user| user.profile.email.eq_ignore_ascii_case(email))
            .ok_or(AuthError::BadCredentials)?;

        if hash_password(&user.password_salt, password) != user.password_hash {
            return Err(AuthError::BadCredentials);
        }

        let profile = user.profile.clone();
        drop(users);

        Ok((self.create_session(profile.id), profile))
    }

    fn create_session(&self, user_id: Uuid) -> String {
        let token = random_token();
        self.sessions
            .lock()
            .unwrap()
            .insert(token.clone(), Session::new(user_id));
        token
    }

    pub fn authenticate(&self, token: &str) -> Result<UserProfile, AuthError> {
        let sessions = self.sessions.lock().unwrap();
        let session = sessions.get(token).ok_or(AuthError::Unauthorized)?;
        if session.is_expired() {
            return Err(AuthError::Unauthorized);
        }
        let user_id = session.user_id;
        drop(sessions);

        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|user| user.profile.clone())
            .ok_or(AuthError::Unauthorized)
    }

    pub fn update_profile(&self, user_id: Uuid, display_name: &str) -> Option<UserProfile> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id)?;
        user.profile.display_name = display_name.to_string();
        Some(user.profile.clone())
    }

    // --- spots ---

    pub fn add_spot(&self, spot: Spot) {
        self.spots.lock().unwrap().insert(spot.id.clone(), spot);
    }

    pub fn list_spots(&self, include_inactive: bool) -> Vec<Spot> {
        let mut spots = self
            .spots
            .lock()
            .unwrap()
            .values()
            .filter(|spot| include_inactive || spot.is_active)
            .cloned()
            .collect::<Vec<_>>();
        spots.sort_by(|a, b| a.name.cmp(&b.name));
        spots
    }

    pub fn get_spot(&self, id: &str) -> Option<Spot> {
        self.spots.lock().unwrap().get(id).cloned()
    }

    // --- vehicles ---

    pub fn list_vehicles(&self) -> Vec<VehicleRecord> {
        let mut vehicles = self
            .vehicles
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect::<Vec<_>>();
        vehicles.sort_by(|a, b| a.id.cmp(&b.id));
        vehicles
    }

    pub fn get_vehicle(&self, id: &str) -> Option<VehicleRecord> {
        self.vehicles.lock().unwrap().get(id).cloned()
    }

    /// Store a vehicle record unless it's staler than what we hold, and fan
    /// the accepted record out to stream subscribers. Returns whether the
    /// write won.
    pub fn upsert_vehicle(&self, record: VehicleRecord) -> bool {
        let mut vehicles = self.vehicles.lock().unwrap();
        if let Some(existing) = vehicles.get(&record.id) {
            if !record.supersedes(existing) {
                return false;
            }
        }
        vehicles.insert(record.id.clone(), record.clone());
        drop(vehicles);

        // Nobody listening is fine
        self.changes.send(record).ok();
        true
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<VehicleRecord> {
        self.changes.subscribe()
    }

    // --- rides ---

    pub fn insert_ride(&self, ride: Ride) {
        self.rides.lock().unwrap().insert(ride.id, ride);
    }

    pub fn get_ride(&self, id: Uuid) -> Option<Ride> {
        self.rides.lock().unwrap().get(&id).cloned()
    }

    pub fn update_ride_status(&self, id: Uuid, status: RideStatus) -> Option<Ride> {
        let mut rides = self.rides.lock().unwrap();
        let ride = rides.get_mut(&id)?;
        ride.status = status;
        ride.updated_at = Utc::now();
        Some(ride.clone())
    }

    // --- bodega ---

    pub fn add_item(&self, item: BodegaItem) {
        self.items.lock().unwrap().insert(item.id, item);
    }

    pub fn list_items(&self) -> Vec<BodegaItem> {
        let mut items = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| item.is_available)
            .cloned()
            .collect::<Vec<_>>();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    /// Create an order, checking and decrementing stock in one go
    pub fn place_order(&self, user_id: Uuid, lines: Vec<OrderLine>) -> Result<Order, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::Empty);
        }

        // Aggregate first so repeated lines for one item can't overdraw
        let mut wanted: HashMap<Uuid, u32> = HashMap::new();
        for line in &lines {
            *wanted.entry(line.item_id).or_default() += line.quantity;
        }

        let mut items = self.items.lock().unwrap();

        let mut total = 0.0;
        for (item_id, quantity) in &wanted {
            let item = items
                .get(item_id)
                .filter(|item| item.is_available)
                .ok_or(OrderError::UnknownItem(*item_id))?;
            if item.stock < *quantity {
                return Err(OrderError::OutOfStock(*item_id));
            }
            total += item.price_usd * *quantity as f64;
        }

        for (item_id, quantity) in wanted {
            if let Some(item) = items.get_mut(&item_id) {
                item.stock -= quantity;
            }
        }
        drop(items);

        let order = Order {
            id: Uuid::new_v4(),
            user_id,
            lines,
            total_usd: round_usd(total),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };
        self.orders
            .lock()
            .unwrap()
            .insert(order.id, order.clone());
        Ok(order)
    }

    pub fn get_order(&self, id: Uuid) -> Option<Order> {
        self.orders.lock().unwrap().get(&id).cloned()
    }

    pub fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Option<Order> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&id)?;
        order.status = status;
        Some(order.clone())
    }

    /// Apply a successful payment to whatever the claims reference: orders
    /// move to paid, a requested ride becomes an accepted booking.
    pub fn apply_payment_success(&self, claims: &CashTokenClaims) -> bool {
        let mut applied = false;
        if let Some(order_id) = claims.order_id {
            applied |= self.update_order_status(order_id, OrderStatus::Paid).is_some();
        }
        if let Some(ride_id) = claims.ride_id {
            let ride = self.get_ride(ride_id);
            if let Some(ride) = ride {
                if ride.status == RideStatus::Requested {
                    self.update_ride_status(ride_id, RideStatus::Accepted);
                }
                applied = true;
            }
        }
        applied
    }

    // --- demo data ---

    /// Seed the fixed campus spots, shop stock, and a couple of vehicles so
    /// a fresh server is immediately usable
    pub fn seed_demo(&self) {
        let spots = [
            ("union", "University Union", 42.099118, -75.917538, true),
            ("bartle", "Bartle Library", 42.098765, -75.916543, true),
            ("east-gym", "East Gym", 42.096123, -75.912845, true),
            ("hinman", "Hinman College", 42.095412, -75.914301, true),
            ("old-depot", "Old Depot", 42.1011, -75.9203, false),
        ];
        for (id, name, latitude, longitude, is_active) in spots {
            self.add_spot(Spot {
                id: id.to_string(),
                name: name.to_string(),
                latitude,
                longitude,
                is_active,
            });
        }

        let items = [("Water Bottle", 1.50, 40), ("Trail Mix", 3.25, 25), ("Phone Charger", 12.00, 10)];
        for (name, price_usd, stock) in items {
            self.add_item(BodegaItem {
                id: Uuid::new_v4(),
                name: name.to_string(),
                price_usd,
                stock,
                is_available: true,
            });
        }

        let now = Utc::now();
        let vehicles = [
            ("airbear-1", 42.099118, -75.917538, 90.0, 87),
            ("airbear-2", 42.096123, -75.912845, 180.0, 64),
        ];
        for (id, lat, long, heading, battery_level) in vehicles {
            self.upsert_vehicle(VehicleRecord {
                id: id.to_string(),
                lat,
                long,
                heading,
                battery_level,
                is_available: true,
                is_charging: false,
                current_spot_id: None,
                updated_at: now,
            });
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(ProcessorConfig::from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airbear_logic::CashTokenClaims;

    fn state() -> ServerState {
        let state = ServerState::new(ProcessorConfig {
            base_url: None,
            webhook_secret: "test".to_string(),
        });
        state.seed_demo();
        state
    }

    #[test]
    fn register_login_and_authenticate() {
        let state = state();

        let (token, profile) = state
            .register_user("rider@binghamton.edu", "hunter2", "Rider")
            .unwrap();
        assert_eq!(state.authenticate(&token).unwrap().id, profile.id);

        assert_eq!(
            state
                .register_user("RIDER@binghamton.edu", "other", "Other")
                .unwrap_err(),
            AuthError::EmailTaken
        );

        assert_eq!(
            state.login("rider@binghamton.edu", "wrong").unwrap_err(),
            AuthError::BadCredentials
        );
        let (token2, _) = state.login("rider@binghamton.edu", "hunter2").unwrap();
        assert!(state.authenticate(&token2).is_ok());

        assert_eq!(
            state.authenticate("no-such-token").unwrap_err(),
            AuthError::Unauthorized
        );
    }

    #[test]
    fn inactive_spots_are_hidden_from_booking() {
        let state = state();
        let active = state.list_spots(false);
        assert!(active.iter().all(|spot| spot.is_active));
        assert!(state.list_spots(true).len() > active.len());
        // Still resolvable for history
        assert!(state.get_spot("old-depot").is_some());
    }

    #[test]
    fn stale_vehicle_write_loses() {
        let state = state();
        let held = state.get_vehicle("airbear-1").unwrap();

        let stale = VehicleRecord {
            lat: 0.0,
            updated_at: held.updated_at - chrono::Duration::seconds(60),
            ..held.clone()
        };
        assert!(!state.upsert_vehicle(stale));
        assert_eq!(state.get_vehicle("airbear-1").unwrap().lat, held.lat);

        let fresh = VehicleRecord {
            lat: 42.2,
            updated_at: held.updated_at + chrono::Duration::seconds(60),
            ..held
        };
        assert!(state.upsert_vehicle(fresh));
        assert_eq!(state.get_vehicle("airbear-1").unwrap().lat, 42.2);
    }

    #[test]
    fn accepted_vehicle_writes_reach_subscribers() {
        let state = state();
        let mut rx = state.subscribe_changes();

        let held = state.get_vehicle("airbear-2").unwrap();
        let fresh = VehicleRecord {
            updated_at: held.updated_at + chrono::Duration::seconds(1),
            ..held
        };
        state.upsert_vehicle(fresh.clone());

        assert_eq!(rx.try_recv().unwrap(), fresh);
    }

    #[test]
    fn orders_check_and_decrement_stock() {
        let state = state();
        let user_id = Uuid::new_v4();
        let item = state.list_items().into_iter().next().unwrap();

        let order = state
            .place_order(
                user_id,
                vec![OrderLine {
                    item_id: item.id,
                    quantity: 2,
                }],
            )
            .unwrap();
        assert_eq!(order.total_usd, round_usd(item.price_usd * 2.0));
        assert_eq!(order.status, OrderStatus::Pending);

        let overdraw = state.place_order(
            user_id,
            vec![OrderLine {
                item_id: item.id,
                quantity: item.stock + 100,
            }],
        );
        assert_eq!(overdraw.unwrap_err(), OrderError::OutOfStock(item.id));

        assert_eq!(
            state.place_order(user_id, vec![]).unwrap_err(),
            OrderError::Empty
        );

        // Repeated lines for one item count against stock together
        let remaining = item.stock - 2;
        let split = state.place_order(
            user_id,
            vec![
                OrderLine {
                    item_id: item.id,
                    quantity: remaining,
                },
                OrderLine {
                    item_id: item.id,
                    quantity: remaining,
                },
            ],
        );
        assert_eq!(split.unwrap_err(), OrderError::OutOfStock(item.id));
    }

    #[test]
    fn payment_success_confirms_ride_and_order() {
        let state = state();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let ride = Ride {
            id: Uuid::new_v4(),
            user_id,
            pickup_spot_id: "union".to_string(),
            dropoff_spot_id: "bartle".to_string(),
            fare: 4.0,
            distance: 0.09,
            status: RideStatus::Requested,
            created_at: now,
            updated_at: now,
        };
        state.insert_ride(ride.clone());

        let claims = CashTokenClaims {
            order_id: None,
            ride_id: Some(ride.id),
            user_id,
            amount_minor: 400,
            timestamp: now,
        };
        assert!(state.apply_payment_success(&claims));
        assert_eq!(
            state.get_ride(ride.id).unwrap().status,
            RideStatus::Accepted
        );

        let missing = CashTokenClaims {
            ride_id: Some(Uuid::new_v4()),
            ..claims
        };
        assert!(!state.apply_payment_success(&missing));
    }
}

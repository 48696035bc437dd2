use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vehicle::UtcDT;

/// Something sold out of the mobile bodega
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodegaItem {
    pub id: Uuid,
    pub name: String,
    pub price_usd: f64,
    pub stock: u32,
    pub is_available: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Fulfilled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLine {
    pub item_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lines: Vec<OrderLine>,
    pub total_usd: f64,
    pub status: OrderStatus,
    pub created_at: UtcDT,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    pub lines: Vec<OrderLine>,
}

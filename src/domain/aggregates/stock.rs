//! Ledger rows: warehouse stock and reseller-side stock

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockStatus { OnHand, InTransit }

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::OnHand => "on-hand", Self::InTransit => "in-transit" }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for StockStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "on-hand" => Ok(Self::OnHand), "in-transit" => Ok(Self::InTransit), other => Err(format!("unknown stock status {other}")) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StockKey { pub product_id: String, pub status: StockStatus, pub location: String }

/// Warehouse stock for one (product, status, location).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StockEntry {
    pub product_id: String,
    pub status: StockStatus,
    pub location: String,
    pub quantity: u32,
    #[serde(default)] pub unit_cost: Option<Decimal>,
    #[serde(default)] pub unit_price: Option<Decimal>,
    /// Bumped on every write; stores compare it before accepting an update.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl StockEntry {
    pub fn new(product_id: impl Into<String>, status: StockStatus, location: impl Into<String>) -> Self {
        Self { product_id: product_id.into(), status, location: location.into(), quantity: 0, unit_cost: None, unit_price: None, version: 0, updated_at: Utc::now() }
    }

    pub fn key(&self) -> StockKey {
        StockKey { product_id: self.product_id.clone(), status: self.status, location: self.location.clone() }
    }

    /// Stored version to compare against, `None` for a row that was never written.
    pub fn expected_version(&self) -> Option<u64> { (self.version > 0).then_some(self.version) }

    /// Copy of the row with a new quantity and the next version.
    pub fn with_quantity(&self, quantity: u32) -> Self {
        Self { quantity, version: self.version + 1, updated_at: Utc::now(), ..self.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResellerStockKey { pub reseller_id: String, pub order_id: String, pub product_id: String }

/// Stock shipped to a reseller by one order, in transit or received.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResellerStockEntry {
    pub reseller_id: String,
    pub order_id: String,
    pub product_id: String,
    pub status: StockStatus,
    pub quantity: u32,
    pub updated_at: DateTime<Utc>,
}

impl ResellerStockEntry {
    pub fn in_transit(reseller_id: &str, order_id: &str, product_id: &str, quantity: u32) -> Self {
        Self { reseller_id: reseller_id.into(), order_id: order_id.into(), product_id: product_id.into(), status: StockStatus::InTransit, quantity, updated_at: Utc::now() }
    }
    pub fn key(&self) -> ResellerStockKey {
        ResellerStockKey { reseller_id: self.reseller_id.clone(), order_id: self.order_id.clone(), product_id: self.product_id.clone() }
    }
}

/// Per-product view of a reseller's stock across all orders.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResellerPosition { pub product_id: String, pub in_transit: u32, pub on_hand: u32 }

//! Catalog and reseller records
//!
//! Both are owned by external collaborators; the engine only reads them.

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub sku: String,
    pub category: String,
    pub weight_grams: f64,
    pub price: Money,
    /// Sold without physical stock backing; debits skip the ledger floor.
    #[serde(default)]
    pub backorder_eligible: bool,
}

impl Product {
    pub fn new(id: impl Into<String>, sku: impl Into<String>, category: impl Into<String>, weight_grams: f64, price: Money) -> Self {
        let id = id.into();
        Self { name: id.clone(), id, sku: sku.into(), category: category.into(), weight_grams, price, backorder_eligible: false }
    }
    pub fn backordered(mut self) -> Self { self.backorder_eligible = true; self }
    pub fn is_packable(&self) -> bool { self.weight_grams > 0.0 }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reseller {
    pub id: String,
    pub name: String,
    #[serde(default)] pub address: Option<String>,
    #[serde(default)] pub phone: Option<String>,
}

impl Reseller {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), address: None, phone: None }
    }
    pub fn matches_name(&self, name: &str) -> bool { normalize_name(&self.name) == normalize_name(name) }
}

/// Case- and whitespace-insensitive form used for recipient matching.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

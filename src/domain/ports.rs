//! Storage and collaborator ports
//!
//! Every entity is a flat record keyed by its id. Stores do not provide multi-record
//! transactions; the only conditional write is the stock compare-and-set.

use async_trait::async_trait;
use crate::domain::aggregates::{
    DraftOrder, OutboundOrder, Product, Reseller, ResellerStockEntry, ResellerStockKey, Shipment, StockEntry,
};
use crate::domain::events::DomainEvent;
use crate::Result;

#[async_trait]
pub trait StockRepository: Send + Sync {
    async fn entries(&self, product_id: &str) -> Result<Vec<StockEntry>>;
    async fn all(&self) -> Result<Vec<StockEntry>>;
    /// Writes `entry` only if the stored row still has `expected_version`
    /// (`None`: only if no row exists). Returns `false` when another writer got there first.
    async fn compare_and_set(&self, entry: &StockEntry, expected_version: Option<u64>) -> Result<bool>;
}

#[async_trait]
pub trait ResellerStockRepository: Send + Sync {
    async fn get(&self, key: &ResellerStockKey) -> Result<Option<ResellerStockEntry>>;
    async fn for_order(&self, order_id: &str) -> Result<Vec<ResellerStockEntry>>;
    async fn for_reseller(&self, reseller_id: &str) -> Result<Vec<ResellerStockEntry>>;
    async fn all(&self) -> Result<Vec<ResellerStockEntry>>;
    async fn upsert(&self, entry: &ResellerStockEntry) -> Result<()>;
    async fn remove(&self, key: &ResellerStockKey) -> Result<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<OutboundOrder>>;
    async fn list(&self) -> Result<Vec<OutboundOrder>>;
    async fn find_by_shipment(&self, shipment_id: &str) -> Result<Vec<OutboundOrder>>;
    async fn save(&self, order: &OutboundOrder) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn next_number(&self) -> Result<u64>;
}

#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Shipment>>;
    async fn list(&self) -> Result<Vec<Shipment>>;
    async fn save(&self, shipment: &Shipment) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait DraftRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<DraftOrder>>;
    async fn list(&self) -> Result<Vec<DraftOrder>>;
    async fn save(&self, draft: &DraftOrder) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Product records owned by the catalog service.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, id: &str) -> Result<Option<Product>>;
    async fn products(&self) -> Result<Vec<Product>>;
}

#[async_trait]
pub trait ResellerDirectory: Send + Sync {
    async fn reseller(&self, id: &str) -> Result<Option<Reseller>>;
    async fn resellers(&self) -> Result<Vec<Reseller>>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}

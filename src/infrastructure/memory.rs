//! In-memory adapters
//!
//! Backs tests and the database-less mode. One [`MemoryStore`] implements every port so a
//! single handle can be shared across services.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use crate::domain::aggregates::{
    DraftOrder, OutboundOrder, Product, Reseller, ResellerStockEntry, ResellerStockKey, Shipment, StockEntry, StockKey,
};
use crate::domain::ports::{
    Catalog, DraftRepository, OrderRepository, ResellerDirectory, ResellerStockRepository, ShipmentRepository, StockRepository,
};
use crate::Result;

const FIRST_ORDER_NUMBER: u64 = 1000;

pub struct MemoryStore {
    stock: RwLock<HashMap<StockKey, StockEntry>>,
    reseller_stock: RwLock<HashMap<ResellerStockKey, ResellerStockEntry>>,
    orders: RwLock<HashMap<String, OutboundOrder>>,
    shipments: RwLock<HashMap<String, Shipment>>,
    drafts: RwLock<HashMap<String, DraftOrder>>,
    products: RwLock<HashMap<String, Product>>,
    resellers: RwLock<HashMap<String, Reseller>>,
    order_numbers: AtomicU64,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            stock: RwLock::default(),
            reseller_stock: RwLock::default(),
            orders: RwLock::default(),
            shipments: RwLock::default(),
            drafts: RwLock::default(),
            products: RwLock::default(),
            resellers: RwLock::default(),
            order_numbers: AtomicU64::new(FIRST_ORDER_NUMBER),
            writes: AtomicU64::new(0),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn add_product(&self, product: Product) { self.products.write().await.insert(product.id.clone(), product); }
    pub async fn add_reseller(&self, reseller: Reseller) { self.resellers.write().await.insert(reseller.id.clone(), reseller); }

    /// Number of mutating calls served so far, across all record types.
    pub fn writes(&self) -> u64 { self.writes.load(Ordering::SeqCst) }

    fn wrote(&self) { self.writes.fetch_add(1, Ordering::SeqCst); }
}

#[async_trait]
impl StockRepository for MemoryStore {
    async fn entries(&self, product_id: &str) -> Result<Vec<StockEntry>> {
        let mut rows: Vec<_> = self.stock.read().await.values().filter(|e| e.product_id == product_id).cloned().collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    async fn all(&self) -> Result<Vec<StockEntry>> {
        let mut rows: Vec<_> = self.stock.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    async fn compare_and_set(&self, entry: &StockEntry, expected_version: Option<u64>) -> Result<bool> {
        let mut stock = self.stock.write().await;
        let current = stock.get(&entry.key()).map(|e| e.version);
        if current != expected_version { return Ok(false); }
        stock.insert(entry.key(), entry.clone());
        self.wrote();
        Ok(true)
    }
}

#[async_trait]
impl ResellerStockRepository for MemoryStore {
    async fn get(&self, key: &ResellerStockKey) -> Result<Option<ResellerStockEntry>> { Ok(self.reseller_stock.read().await.get(key).cloned()) }

    async fn for_order(&self, order_id: &str) -> Result<Vec<ResellerStockEntry>> {
        let mut rows: Vec<_> = self.reseller_stock.read().await.values().filter(|e| e.order_id == order_id).cloned().collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    async fn for_reseller(&self, reseller_id: &str) -> Result<Vec<ResellerStockEntry>> {
        let mut rows: Vec<_> = self.reseller_stock.read().await.values().filter(|e| e.reseller_id == reseller_id).cloned().collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    async fn all(&self) -> Result<Vec<ResellerStockEntry>> { Ok(self.reseller_stock.read().await.values().cloned().collect()) }

    async fn upsert(&self, entry: &ResellerStockEntry) -> Result<()> {
        self.reseller_stock.write().await.insert(entry.key(), entry.clone());
        self.wrote();
        Ok(())
    }

    async fn remove(&self, key: &ResellerStockKey) -> Result<()> {
        if self.reseller_stock.write().await.remove(key).is_some() { self.wrote(); }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<OutboundOrder>> { Ok(self.orders.read().await.get(id).cloned()) }

    async fn list(&self) -> Result<Vec<OutboundOrder>> {
        let mut orders: Vec<_> = self.orders.read().await.values().cloned().collect();
        orders.sort_by_key(|o| o.number());
        Ok(orders)
    }

    async fn find_by_shipment(&self, shipment_id: &str) -> Result<Vec<OutboundOrder>> {
        let mut orders: Vec<_> = self.orders.read().await.values().filter(|o| o.shipment_ref() == Some(shipment_id)).cloned().collect();
        orders.sort_by_key(|o| o.number());
        Ok(orders)
    }

    async fn save(&self, order: &OutboundOrder) -> Result<()> {
        self.orders.write().await.insert(order.id().to_string(), order.clone());
        self.wrote();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.orders.write().await.remove(id).is_some() { self.wrote(); }
        Ok(())
    }

    async fn next_number(&self) -> Result<u64> { Ok(self.order_numbers.fetch_add(1, Ordering::SeqCst)) }
}

#[async_trait]
impl ShipmentRepository for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Shipment>> { Ok(self.shipments.read().await.get(id).cloned()) }

    async fn list(&self) -> Result<Vec<Shipment>> {
        let mut shipments: Vec<_> = self.shipments.read().await.values().cloned().collect();
        shipments.sort_by_key(|s| s.created_at());
        Ok(shipments)
    }

    async fn save(&self, shipment: &Shipment) -> Result<()> {
        self.shipments.write().await.insert(shipment.id().to_string(), shipment.clone());
        self.wrote();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.shipments.write().await.remove(id).is_some() { self.wrote(); }
        Ok(())
    }
}

#[async_trait]
impl DraftRepository for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<DraftOrder>> { Ok(self.drafts.read().await.get(id).cloned()) }

    async fn list(&self) -> Result<Vec<DraftOrder>> {
        let mut drafts: Vec<_> = self.drafts.read().await.values().cloned().collect();
        drafts.sort_by_key(|d| std::cmp::Reverse(d.updated_at()));
        Ok(drafts)
    }

    async fn save(&self, draft: &DraftOrder) -> Result<()> {
        self.drafts.write().await.insert(draft.id().to_string(), draft.clone());
        self.wrote();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.drafts.write().await.remove(id).is_some() { self.wrote(); }
        Ok(())
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn product(&self, id: &str) -> Result<Option<Product>> { Ok(self.products.read().await.get(id).cloned()) }
    async fn products(&self) -> Result<Vec<Product>> { Ok(self.products.read().await.values().cloned().collect()) }
}

#[async_trait]
impl ResellerDirectory for MemoryStore {
    async fn reseller(&self, id: &str) -> Result<Option<Reseller>> { Ok(self.resellers.read().await.get(id).cloned()) }
    async fn resellers(&self) -> Result<Vec<Reseller>> { Ok(self.resellers.read().await.values().cloned().collect()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::StockStatus;

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_version() {
        let store = MemoryStore::new();
        let row = StockEntry::new("P1", StockStatus::OnHand, "main").with_quantity(5);
        assert!(store.compare_and_set(&row, None).await.unwrap());
        assert!(!store.compare_and_set(&row, None).await.unwrap());
        let next = row.with_quantity(3);
        assert!(store.compare_and_set(&next, Some(1)).await.unwrap());
        assert!(!store.compare_and_set(&row.with_quantity(1), Some(1)).await.unwrap());
        assert_eq!(store.entries("P1").await.unwrap()[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_order_numbers_are_unique() {
        let store = MemoryStore::new();
        let a = store.next_number().await.unwrap();
        let b = store.next_number().await.unwrap();
        assert_ne!(a, b);
    }
}

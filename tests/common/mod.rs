#![allow(dead_code)]

use async_trait::async_trait;
use resale_fulfillment::config::EngineConfig;
use resale_fulfillment::domain::aggregates::{Product, Reseller, StockEntry, StockStatus};
use resale_fulfillment::domain::ports::StockRepository;
use resale_fulfillment::domain::value_objects::Money;
use resale_fulfillment::infrastructure::{LogPublisher, MemoryStore};
use resale_fulfillment::services::{Fulfillment, Ports};
use resale_fulfillment::{FulfillmentError, Result};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

pub const BOOTS: &str = "boots";
pub const VITAMINS: &str = "vitamins";
pub const CHARGER: &str = "charger";
pub const LAGOS: &str = "R-lagos";
pub const ACCRA: &str = "R-accra";

pub fn test_config() -> EngineConfig { EngineConfig { stale_journal_secs: 0, ..EngineConfig::default() } }

/// Boots (700g, 10 on hand), vitamins (250g, 5 on hand), and a backorderable charger with no
/// stock. Two resellers.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_product(Product::new(BOOTS, "SKU-BOOT", "footwear", 700.0, Money::usd(Decimal::new(40, 0)))).await;
    store.add_product(Product::new(VITAMINS, "SKU-VIT", "vitamins", 250.0, Money::usd(Decimal::new(12, 0)))).await;
    store.add_product(Product::new(CHARGER, "SKU-CHG", "electronics", 100.0, Money::usd(Decimal::new(5, 0))).backordered()).await;
    store.add_reseller(Reseller::new(LAGOS, "Lagos Bay Traders")).await;
    store.add_reseller(Reseller::new(ACCRA, "Accra Market Co")).await;
    seed_stock(&store, BOOTS, 10).await;
    seed_stock(&store, VITAMINS, 5).await;
    store
}

pub async fn seed_stock(store: &MemoryStore, product_id: &str, quantity: u32) {
    let row = StockEntry::new(product_id, StockStatus::OnHand, "main").with_quantity(quantity);
    assert!(store.compare_and_set(&row, None).await.unwrap());
}

pub fn app_over(store: Arc<MemoryStore>) -> Fulfillment {
    Fulfillment::new(Ports::from_store(store, Arc::new(LogPublisher)), test_config())
}

pub async fn app() -> (Arc<MemoryStore>, Fulfillment) {
    let store = seeded_store().await;
    (store.clone(), app_over(store))
}

/// Stock store whose writes can be made to fail: `budget` counts successful writes left,
/// and writes to the `blocked` product always lose the version race. A `competitor` drains
/// another product's on-hand stock right after the next write to its trigger product.
pub struct FlakyStock {
    inner: Arc<MemoryStore>,
    budget: AtomicI64,
    blocked: Mutex<Option<String>>,
    competitor: Mutex<Option<(String, String, u32)>>,
}

impl FlakyStock {
    pub fn new(inner: Arc<MemoryStore>) -> Self { Self { inner, budget: AtomicI64::new(i64::MAX), blocked: Mutex::new(None), competitor: Mutex::new(None) } }
    pub fn allow_writes(&self, n: i64) { self.budget.store(n, Ordering::SeqCst); }
    pub fn block(&self, product_id: Option<&str>) { *self.blocked.lock().unwrap() = product_id.map(str::to_string); }

    /// Once `after_write_to` is next written, another order takes `drain` down to `leave` units.
    pub fn compete(&self, after_write_to: &str, drain: &str, leave: u32) {
        *self.competitor.lock().unwrap() = Some((after_write_to.to_string(), drain.to_string(), leave));
    }
}

#[async_trait]
impl StockRepository for FlakyStock {
    async fn entries(&self, product_id: &str) -> Result<Vec<StockEntry>> { self.inner.entries(product_id).await }
    async fn all(&self) -> Result<Vec<StockEntry>> { StockRepository::all(&*self.inner).await }

    async fn compare_and_set(&self, entry: &StockEntry, expected_version: Option<u64>) -> Result<bool> {
        if self.blocked.lock().unwrap().as_deref() == Some(entry.product_id.as_str()) { return Ok(false); }
        if self.budget.fetch_sub(1, Ordering::SeqCst) <= 0 { return Err(FulfillmentError::Storage("stock store unavailable".into())); }
        let written = self.inner.compare_and_set(entry, expected_version).await?;
        let fired = if written {
            let mut competitor = self.competitor.lock().unwrap();
            if competitor.as_ref().is_some_and(|(trigger, ..)| *trigger == entry.product_id) { competitor.take() } else { None }
        } else {
            None
        };
        if let Some((_, drain, leave)) = fired {
            for row in self.inner.entries(&drain).await? {
                if row.status == StockStatus::OnHand && row.quantity > leave {
                    assert!(self.inner.compare_and_set(&row.with_quantity(leave), row.expected_version()).await?);
                }
            }
        }
        Ok(written)
    }
}

/// An app whose stock writes go through a [`FlakyStock`].
pub async fn flaky_app() -> (Arc<MemoryStore>, Arc<FlakyStock>, Fulfillment) {
    let store = seeded_store().await;
    let flaky = Arc::new(FlakyStock::new(store.clone()));
    let mut ports = Ports::from_store(store.clone(), Arc::new(LogPublisher));
    ports.stock = flaky.clone();
    (store, flaky, Fulfillment::new(ports, test_config()))
}

pub async fn on_hand(store: &MemoryStore, product_id: &str) -> u32 {
    store.entries(product_id).await.unwrap().iter().filter(|e| e.status == StockStatus::OnHand).map(|e| e.quantity).sum()
}

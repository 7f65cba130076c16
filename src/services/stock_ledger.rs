//! Warehouse stock ledger
//!
//! Quantities live in one row per (product, status, location). There is no lock manager: every
//! row write is a compare-and-set on the row version, and a debit that loses a race re-reads
//! the rows and re-validates before trying again, so stock is never oversold.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};
use crate::config::EngineConfig;
use crate::domain::aggregates::{StockEntry, StockStatus};
use crate::domain::events::{DomainEvent, StockEvent};
use crate::domain::ports::{Catalog, EventPublisher, StockRepository};
use crate::{FulfillmentError, Result};
use super::publish_all;

#[derive(Clone, Debug)]
pub struct StockPolicy {
    /// Also sell units that are still travelling to the warehouse.
    pub sell_in_transit: bool,
    pub default_location: String,
    /// Re-reads allowed after a lost compare-and-set.
    pub max_retries: u32,
}

impl Default for StockPolicy {
    fn default() -> Self { Self { sell_in_transit: false, default_location: "main".into(), max_retries: 3 } }
}

impl From<&EngineConfig> for StockPolicy {
    fn from(c: &EngineConfig) -> Self {
        Self { sell_in_transit: c.sell_in_transit, default_location: c.default_location.clone(), max_retries: c.debit_retries }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebitOutcome {
    pub taken: u32,
    /// Shortfall accepted for a backorder-eligible product.
    pub backordered: u32,
}

#[derive(Clone)]
pub struct StockLedger {
    stock: Arc<dyn StockRepository>,
    catalog: Arc<dyn Catalog>,
    events: Arc<dyn EventPublisher>,
    policy: StockPolicy,
}

impl StockLedger {
    pub fn new(stock: Arc<dyn StockRepository>, catalog: Arc<dyn Catalog>, events: Arc<dyn EventPublisher>, policy: StockPolicy) -> Self {
        Self { stock, catalog, events, policy }
    }

    pub fn policy(&self) -> &StockPolicy { &self.policy }

    pub fn sellable(&self, status: StockStatus) -> bool {
        status == StockStatus::OnHand || (self.policy.sell_in_transit && status == StockStatus::InTransit)
    }

    /// Units held across on-hand and in-transit rows.
    pub async fn available(&self, product_id: &str) -> Result<u32> {
        Ok(self.stock.entries(product_id).await?.iter().map(|e| e.quantity).sum())
    }

    /// Units a debit may take under the current policy.
    pub async fn takeable(&self, product_id: &str) -> Result<u32> {
        Ok(self.sellable_rows(product_id).await?.iter().map(|e| e.quantity).sum())
    }

    pub async fn entries(&self, product_id: &str) -> Result<Vec<StockEntry>> { self.stock.entries(product_id).await }
    pub async fn snapshot(&self) -> Result<Vec<StockEntry>> { self.stock.all().await }

    pub async fn debit(&self, product_id: &str, quantity: u32) -> Result<DebitOutcome> {
        let product = self.catalog.product(product_id).await?.ok_or_else(|| FulfillmentError::not_found("product", product_id))?;
        let outcome = self.take(product_id, quantity, product.backorder_eligible).await?;
        if outcome.backordered > 0 {
            info!(product_id, taken = outcome.taken, backordered = outcome.backordered, "debit exceeded stock, backordered");
        }
        publish_all(self.events.as_ref(), vec![DomainEvent::Stock(StockEvent::Debited {
            product_id: product_id.to_string(), quantity: outcome.taken, backordered: outcome.backordered,
        })]).await;
        Ok(outcome)
    }

    /// Takes back units a credit returned, when that credit is being compensated. Fails with
    /// `InsufficientStock` rather than backordering, since a backorder here would leave the
    /// order claiming units the ledger no longer holds.
    pub async fn reclaim(&self, product_id: &str, quantity: u32) -> Result<u32> {
        let outcome = self.take(product_id, quantity, false).await?;
        publish_all(self.events.as_ref(), vec![DomainEvent::Stock(StockEvent::Debited {
            product_id: product_id.to_string(), quantity: outcome.taken, backordered: 0,
        })]).await;
        Ok(outcome.taken)
    }

    /// Administrative removal with no order behind it. Never backorders.
    pub async fn remove_stock(&self, product_id: &str, quantity: u32) -> Result<u32> {
        let outcome = self.take(product_id, quantity, false).await?;
        info!(product_id, quantity = outcome.taken, "stock removed");
        publish_all(self.events.as_ref(), vec![DomainEvent::Stock(StockEvent::Removed { product_id: product_id.to_string(), quantity: outcome.taken })]).await;
        Ok(outcome.taken)
    }

    /// Returns units to the on-hand row at the default location.
    pub async fn credit(&self, product_id: &str, quantity: u32, unit_cost: Option<Decimal>, unit_price: Option<Decimal>) -> Result<StockEntry> {
        let location = self.policy.default_location.clone();
        let row = self.add_to_row(product_id, StockStatus::OnHand, &location, quantity, unit_cost, unit_price).await?;
        publish_all(self.events.as_ref(), vec![DomainEvent::Stock(StockEvent::Credited { product_id: product_id.to_string(), quantity })]).await;
        Ok(row)
    }

    /// Inbound hook used to seed the ledger from purchasing.
    pub async fn receive(&self, product_id: &str, quantity: u32, status: StockStatus, location: Option<&str>, unit_cost: Option<Decimal>) -> Result<StockEntry> {
        if self.catalog.product(product_id).await?.is_none() {
            return Err(FulfillmentError::ReferentialIntegrityViolation { entity: "stock", id: product_id.to_string(), missing: format!("product {product_id}") });
        }
        let location = location.unwrap_or(self.policy.default_location.as_str()).to_string();
        let row = self.add_to_row(product_id, status, &location, quantity, unit_cost, None).await?;
        info!(product_id, quantity, %status, location = %row.location, "stock received");
        publish_all(self.events.as_ref(), vec![DomainEvent::Stock(StockEvent::Credited { product_id: product_id.to_string(), quantity })]).await;
        Ok(row)
    }

    async fn sellable_rows(&self, product_id: &str) -> Result<Vec<StockEntry>> {
        let mut rows: Vec<_> = self.stock.entries(product_id).await?.into_iter().filter(|e| self.sellable(e.status)).collect();
        // on-hand rows drain before in-transit ones
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    async fn take(&self, product_id: &str, quantity: u32, allow_short: bool) -> Result<DebitOutcome> {
        if quantity == 0 { return Ok(DebitOutcome::default()); }
        for attempt in 0..=self.policy.max_retries {
            let rows = self.sellable_rows(product_id).await?;
            let available: u32 = rows.iter().map(|e| e.quantity).sum();
            if available < quantity && !allow_short {
                return Err(FulfillmentError::InsufficientStock { product_id: product_id.to_string(), requested: quantity, available });
            }
            let taken = quantity.min(available);
            if self.try_take(&rows, taken).await? {
                return Ok(DebitOutcome { taken, backordered: quantity - taken });
            }
            debug!(product_id, attempt, "stock row changed underneath debit, re-reading");
        }
        Err(FulfillmentError::ConcurrentModification { entity: "stock", id: product_id.to_string() })
    }

    /// Takes `quantity` across `rows`. On a lost race every row already written is put back.
    async fn try_take(&self, rows: &[StockEntry], mut quantity: u32) -> Result<bool> {
        let mut written: Vec<(&StockEntry, u32)> = Vec::new();
        for row in rows {
            if quantity == 0 { break; }
            let take = row.quantity.min(quantity);
            if take == 0 { continue; }
            match self.stock.compare_and_set(&row.with_quantity(row.quantity - take), row.expected_version()).await {
                Ok(true) => { written.push((row, take)); quantity -= take; }
                Ok(false) => { self.put_back(written).await?; return Ok(false); }
                Err(e) => { self.put_back(written).await?; return Err(e); }
            }
        }
        Ok(true)
    }

    async fn put_back(&self, written: Vec<(&StockEntry, u32)>) -> Result<()> {
        for (row, quantity) in written {
            self.add_to_row(&row.product_id, row.status, &row.location, quantity, None, None).await?;
        }
        Ok(())
    }

    async fn add_to_row(
        &self,
        product_id: &str,
        status: StockStatus,
        location: &str,
        quantity: u32,
        unit_cost: Option<Decimal>,
        unit_price: Option<Decimal>,
    ) -> Result<StockEntry> {
        for _ in 0..=self.policy.max_retries {
            let current = self.stock.entries(product_id).await?.into_iter()
                .find(|e| e.status == status && e.location == location)
                .unwrap_or_else(|| StockEntry::new(product_id, status, location));
            let total = current.quantity.checked_add(quantity)
                .ok_or_else(|| FulfillmentError::Validation(format!("stock for {product_id} would overflow")))?;
            let mut next = current.with_quantity(total);
            if unit_cost.is_some() { next.unit_cost = unit_cost; }
            if unit_price.is_some() { next.unit_price = unit_price; }
            if self.stock.compare_and_set(&next, current.expected_version()).await? { return Ok(next); }
        }
        Err(FulfillmentError::ConcurrentModification { entity: "stock", id: product_id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::domain::aggregates::Product;
    use crate::domain::value_objects::Money;
    use crate::infrastructure::{LogPublisher, MemoryStore};

    async fn ledger_with(store: Arc<MemoryStore>, policy: StockPolicy) -> StockLedger {
        store.add_product(Product::new("P1", "SKU-1", "footwear", 700.0, Money::usd(Decimal::new(40, 0)))).await;
        store.add_product(Product::new("P2", "SKU-2", "vitamins", 250.0, Money::usd(Decimal::new(12, 0))).backordered()).await;
        StockLedger::new(store.clone(), store, Arc::new(LogPublisher), policy)
    }

    #[tokio::test]
    async fn test_debit_and_insufficient_stock() {
        let ledger = ledger_with(Arc::new(MemoryStore::new()), StockPolicy::default()).await;
        ledger.receive("P1", 5, StockStatus::OnHand, None, None).await.unwrap();
        assert_eq!(ledger.debit("P1", 3).await.unwrap(), DebitOutcome { taken: 3, backordered: 0 });
        let err = ledger.debit("P1", 3).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock { requested: 3, available: 2, .. }));
        assert_eq!(ledger.available("P1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_backorder_takes_what_exists() {
        let ledger = ledger_with(Arc::new(MemoryStore::new()), StockPolicy::default()).await;
        ledger.receive("P2", 1, StockStatus::OnHand, None, None).await.unwrap();
        assert_eq!(ledger.debit("P2", 4).await.unwrap(), DebitOutcome { taken: 1, backordered: 3 });
        assert_eq!(ledger.available("P2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reclaim_never_backorders() {
        let ledger = ledger_with(Arc::new(MemoryStore::new()), StockPolicy::default()).await;
        ledger.receive("P2", 1, StockStatus::OnHand, None, None).await.unwrap();
        let err = ledger.reclaim("P2", 2).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock { requested: 2, available: 1, .. }));
        assert_eq!(ledger.reclaim("P2", 1).await.unwrap(), 1);
        assert_eq!(ledger.available("P2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_in_transit_sold_only_when_allowed() {
        let store = Arc::new(MemoryStore::new());
        let strict = ledger_with(store.clone(), StockPolicy::default()).await;
        strict.receive("P1", 2, StockStatus::OnHand, None, None).await.unwrap();
        strict.receive("P1", 2, StockStatus::InTransit, Some("border"), None).await.unwrap();
        assert_eq!(strict.available("P1").await.unwrap(), 4);
        assert!(strict.debit("P1", 3).await.is_err());

        let relaxed = StockLedger::new(store.clone(), store, Arc::new(LogPublisher), StockPolicy { sell_in_transit: true, ..StockPolicy::default() });
        relaxed.debit("P1", 3).await.unwrap();
        let rows = relaxed.entries("P1").await.unwrap();
        let left: Vec<_> = rows.iter().map(|r| (r.status, r.quantity)).collect();
        assert_eq!(left, vec![(StockStatus::OnHand, 0), (StockStatus::InTransit, 1)]);
    }

    #[tokio::test]
    async fn test_credit_creates_on_hand_row() {
        let ledger = ledger_with(Arc::new(MemoryStore::new()), StockPolicy::default()).await;
        let row = ledger.credit("P1", 2, None, Some(Decimal::new(40, 0))).await.unwrap();
        assert_eq!((row.status, row.quantity, row.location.as_str()), (StockStatus::OnHand, 2, "main"));
        assert_eq!(row.unit_price, Some(Decimal::new(40, 0)));
    }

    /// Lets a competing writer drain the row right before the first compare-and-set lands.
    struct Contended { inner: Arc<MemoryStore>, fired: AtomicBool, competitor_takes: u32 }

    #[async_trait]
    impl StockRepository for Contended {
        async fn entries(&self, product_id: &str) -> Result<Vec<StockEntry>> { self.inner.entries(product_id).await }
        async fn all(&self) -> Result<Vec<StockEntry>> { StockRepository::all(self.inner.as_ref()).await }
        async fn compare_and_set(&self, entry: &StockEntry, expected: Option<u64>) -> Result<bool> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                let row = self.inner.entries(&entry.product_id).await?.remove(0);
                assert!(self.inner.compare_and_set(&row.with_quantity(row.quantity - self.competitor_takes), row.expected_version()).await?);
            }
            self.inner.compare_and_set(entry, expected).await
        }
    }

    #[tokio::test]
    async fn test_lost_race_revalidates() {
        let store = Arc::new(MemoryStore::new());
        ledger_with(store.clone(), StockPolicy::default()).await.receive("P1", 5, StockStatus::OnHand, None, None).await.unwrap();

        let contended = Arc::new(Contended { inner: store.clone(), fired: AtomicBool::new(false), competitor_takes: 4 });
        let ledger = StockLedger::new(contended, store.clone(), Arc::new(LogPublisher), StockPolicy::default());
        let err = ledger.debit("P1", 2).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock { available: 1, .. }));
        assert_eq!(store.entries("P1").await.unwrap()[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_lost_race_retries_when_stock_remains() {
        let store = Arc::new(MemoryStore::new());
        ledger_with(store.clone(), StockPolicy::default()).await.receive("P1", 5, StockStatus::OnHand, None, None).await.unwrap();

        let contended = Arc::new(Contended { inner: store.clone(), fired: AtomicBool::new(false), competitor_takes: 1 });
        let ledger = StockLedger::new(contended, store.clone(), Arc::new(LogPublisher), StockPolicy::default());
        ledger.debit("P1", 2).await.unwrap();
        assert_eq!(store.entries("P1").await.unwrap()[0].quantity, 2);
    }
}

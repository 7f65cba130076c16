//! Reseller-side ledger
//!
//! One row per (reseller, order, product). A row is credited in transit when its order ships
//! and flips to on-hand when the shipment is delivered. Crediting overwrites and settlement
//! flips a status, so both can be replayed safely.

use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::Utc;
use tracing::info;
use crate::domain::aggregates::{ResellerPosition, ResellerStockEntry, ResellerStockKey, StockStatus};
use crate::domain::ports::ResellerStockRepository;
use crate::Result;

#[derive(Clone)]
pub struct ResellerLedger { rows: Arc<dyn ResellerStockRepository> }

impl ResellerLedger {
    pub fn new(rows: Arc<dyn ResellerStockRepository>) -> Self { Self { rows } }

    /// Sets the in-transit credit that `order_id` holds for `product_id`.
    pub async fn credit_in_transit(&self, reseller_id: &str, order_id: &str, product_id: &str, quantity: u32) -> Result<()> {
        if quantity == 0 { return Ok(()); }
        self.rows.upsert(&ResellerStockEntry::in_transit(reseller_id, order_id, product_id, quantity)).await
    }

    /// Drops the credit held by `order_id` for `product_id`, returning the units removed.
    pub async fn revoke(&self, reseller_id: &str, order_id: &str, product_id: &str) -> Result<u32> {
        let key = ResellerStockKey { reseller_id: reseller_id.into(), order_id: order_id.into(), product_id: product_id.into() };
        let Some(row) = self.rows.get(&key).await? else { return Ok(0) };
        self.rows.remove(&key).await?;
        Ok(row.quantity)
    }

    /// Moves every in-transit row of `order_id` to on-hand. Returns the number of rows moved.
    pub async fn settle_order(&self, order_id: &str) -> Result<usize> {
        let mut moved = 0;
        for mut row in self.rows.for_order(order_id).await? {
            if row.status != StockStatus::InTransit { continue; }
            row.status = StockStatus::OnHand;
            row.updated_at = Utc::now();
            self.rows.upsert(&row).await?;
            moved += 1;
        }
        if moved > 0 { info!(order_id, rows = moved, "reseller stock settled on delivery"); }
        Ok(moved)
    }

    pub async fn balance(&self, reseller_id: &str, product_id: &str, status: StockStatus) -> Result<u32> {
        Ok(self.rows.for_reseller(reseller_id).await?.iter()
            .filter(|r| r.product_id == product_id && r.status == status)
            .map(|r| r.quantity)
            .sum())
    }

    pub async fn positions(&self, reseller_id: &str) -> Result<Vec<ResellerPosition>> {
        let mut by_product: BTreeMap<String, ResellerPosition> = BTreeMap::new();
        for row in self.rows.for_reseller(reseller_id).await? {
            let pos = by_product.entry(row.product_id.clone())
                .or_insert_with(|| ResellerPosition { product_id: row.product_id.clone(), ..Default::default() });
            match row.status {
                StockStatus::InTransit => pos.in_transit += row.quantity,
                StockStatus::OnHand => pos.on_hand += row.quantity,
            }
        }
        Ok(by_product.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryStore;

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let ledger = ResellerLedger::new(Arc::new(MemoryStore::new()));
        ledger.credit_in_transit("R1", "O1", "P1", 3).await.unwrap();
        ledger.credit_in_transit("R1", "O2", "P1", 2).await.unwrap();
        assert_eq!(ledger.settle_order("O1").await.unwrap(), 1);
        assert_eq!(ledger.settle_order("O1").await.unwrap(), 0);
        assert_eq!(ledger.balance("R1", "P1", StockStatus::OnHand).await.unwrap(), 3);
        assert_eq!(ledger.balance("R1", "P1", StockStatus::InTransit).await.unwrap(), 2);
        assert_eq!(ledger.positions("R1").await.unwrap(), vec![ResellerPosition { product_id: "P1".into(), in_transit: 2, on_hand: 3 }]);
    }

    #[tokio::test]
    async fn test_credit_replay_does_not_double_count() {
        let ledger = ResellerLedger::new(Arc::new(MemoryStore::new()));
        ledger.credit_in_transit("R1", "O1", "P1", 3).await.unwrap();
        ledger.credit_in_transit("R1", "O1", "P1", 3).await.unwrap();
        assert_eq!(ledger.balance("R1", "P1", StockStatus::InTransit).await.unwrap(), 3);
        assert_eq!(ledger.revoke("R1", "O1", "P1").await.unwrap(), 3);
        assert_eq!(ledger.revoke("R1", "O1", "P1").await.unwrap(), 0);
    }
}

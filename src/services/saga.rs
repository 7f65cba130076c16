//! Saga step execution
//!
//! Applies journal steps against the ledgers and the shipment store, persisting the order after
//! every step so the journal always reflects what has actually been applied.

use std::sync::Arc;
use tracing::debug;
use crate::domain::aggregates::{OutboundOrder, SagaStep};
use crate::domain::ports::{OrderRepository, ShipmentRepository};
use crate::{FulfillmentError, Result};
use super::{ResellerLedger, StockLedger};

#[derive(Clone)]
pub struct SagaExecutor {
    stock: StockLedger,
    resellers: ResellerLedger,
    shipments: Arc<dyn ShipmentRepository>,
    orders: Arc<dyn OrderRepository>,
}

impl SagaExecutor {
    pub fn new(stock: StockLedger, resellers: ResellerLedger, shipments: Arc<dyn ShipmentRepository>, orders: Arc<dyn OrderRepository>) -> Self {
        Self { stock, resellers, shipments, orders }
    }

    /// Applies one step and returns the effect that actually took place.
    pub async fn apply(&self, step: &SagaStep) -> Result<SagaStep> {
        debug!(step = %step.describe(), "applying saga step");
        match step {
            SagaStep::DebitStock { product_id, quantity } => {
                let outcome = self.stock.debit(product_id, *quantity).await?;
                Ok(SagaStep::DebitStock { product_id: product_id.clone(), quantity: outcome.taken })
            }
            SagaStep::CreditStock { product_id, quantity, unit_price } => {
                if *quantity > 0 { self.stock.credit(product_id, *quantity, None, *unit_price).await?; }
                Ok(step.clone())
            }
            SagaStep::ReclaimStock { product_id, quantity } => {
                if *quantity > 0 { self.stock.reclaim(product_id, *quantity).await?; }
                Ok(step.clone())
            }
            SagaStep::CreditReseller { reseller_id, order_id, product_id, quantity } => {
                self.resellers.credit_in_transit(reseller_id, order_id, product_id, *quantity).await?;
                Ok(step.clone())
            }
            SagaStep::RevokeReseller { reseller_id, order_id, product_id, .. } => {
                let quantity = self.resellers.revoke(reseller_id, order_id, product_id).await?;
                Ok(SagaStep::RevokeReseller { reseller_id: reseller_id.clone(), order_id: order_id.clone(), product_id: product_id.clone(), quantity })
            }
            SagaStep::CreateShipment { shipment } => {
                if self.shipments.get(shipment.id()).await?.is_none() { self.shipments.save(shipment).await?; }
                Ok(step.clone())
            }
            SagaStep::DeleteShipment { shipment } => {
                // keep the latest stored state so the inverse restores it faithfully
                let current = self.shipments.get(shipment.id()).await?.unwrap_or_else(|| shipment.clone());
                self.shipments.delete(shipment.id()).await?;
                Ok(SagaStep::DeleteShipment { shipment: current })
            }
            SagaStep::ReweighShipment { shipment_id, to_grams, .. } => {
                let mut shipment = self.shipments.get(shipment_id).await?.ok_or_else(|| FulfillmentError::not_found("shipment", shipment_id.clone()))?;
                let from_grams = shipment.weight_grams();
                shipment.correct_weight(*to_grams)?;
                self.shipments.save(&shipment).await?;
                Ok(SagaStep::ReweighShipment { shipment_id: shipment_id.clone(), from_grams, to_grams: *to_grams })
            }
        }
    }

    /// Runs the order's journal to completion, saving the order after each step.
    pub async fn drive(&self, order: &mut OutboundOrder) -> Result<()> {
        loop {
            let Some(step) = order.journal().and_then(|j| j.saga.next()).cloned() else { return Ok(()) };
            let effect = self.apply(&step).await?;
            if let Some(journal) = order.journal_mut() { journal.saga.record(effect); }
            self.orders.save(order).await?;
        }
    }
}

//! Shipment lifecycle and the delivery handler

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use crate::config::EngineConfig;
use crate::domain::aggregates::{OrderStatus, Shipment, ShipmentStatus};
use crate::domain::events::{DomainEvent, ShipmentEvent};
use crate::domain::value_objects::Money;
use crate::{FulfillmentError, Result};
use super::{declared_weight, publish_all, Ports, ResellerLedger};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewShipment {
    /// Defaults to the name of the recipient reseller.
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub weight_grams: f64,
    #[serde(default)]
    pub cost: Decimal,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShipmentPatch {
    pub tracking_number: Option<String>,
    pub weight_grams: Option<f64>,
    pub cost: Option<Decimal>,
    pub recipient_name: Option<String>,
    pub recipient_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub orders_delivered: usize,
    pub rows_settled: usize,
    /// Orders left alone because a saga is still running on them.
    pub skipped: usize,
}

impl DeliveryReport {
    pub fn changed(&self) -> bool { self.orders_delivered > 0 || self.rows_settled > 0 }
}

/// Builds an unsaved shipment, resolving the recipient against the reseller directory.
pub(crate) async fn build_shipment(ports: &Ports, parcel: NewShipment, currency: &str) -> Result<Shipment> {
    let reseller = match &parcel.recipient_id {
        Some(id) => Some(ports.resellers.reseller(id).await?.ok_or_else(|| {
            FulfillmentError::ReferentialIntegrityViolation { entity: "shipment", id: "(new)".into(), missing: format!("reseller {id}") }
        })?),
        None => None,
    };
    let name = parcel.recipient_name.or_else(|| reseller.as_ref().map(|r| r.name.clone()))
        .ok_or_else(|| FulfillmentError::Validation("shipment needs a recipient name or reseller".into()))?;
    let mut shipment = Shipment::create(name, parcel.recipient_id, parcel.weight_grams, Money::new(parcel.cost, currency))?;
    if let Some(tracking) = parcel.tracking_number { shipment.assign_tracking(tracking)?; }
    Ok(shipment)
}

#[derive(Clone)]
pub struct ShipmentService {
    ports: Ports,
    resellers: ResellerLedger,
    config: Arc<EngineConfig>,
}

impl ShipmentService {
    pub fn new(ports: Ports, resellers: ResellerLedger, config: Arc<EngineConfig>) -> Self { Self { ports, resellers, config } }

    pub async fn get(&self, shipment_id: &str) -> Result<Shipment> {
        self.ports.shipments.get(shipment_id).await?.ok_or_else(|| FulfillmentError::not_found("shipment", shipment_id))
    }

    pub async fn list(&self) -> Result<Vec<Shipment>> { self.ports.shipments.list().await }

    pub async fn create(&self, parcel: NewShipment) -> Result<Shipment> {
        let mut shipment = build_shipment(&self.ports, parcel, &self.config.currency).await?;
        self.ports.shipments.save(&shipment).await?;
        info!(shipment_id = %shipment.id(), weight_grams = shipment.weight_grams(), "shipment created");
        publish_all(self.ports.events.as_ref(), shipment.take_events()).await;
        Ok(shipment)
    }

    pub async fn assign_tracking(&self, shipment_id: &str, tracking: &str) -> Result<Shipment> {
        self.edit(shipment_id, ShipmentPatch { tracking_number: Some(tracking.to_string()), ..ShipmentPatch::default() }).await
    }

    /// Applies `patch` to a shipment that has not reached a terminal status. A new weight must
    /// agree with the catalog weight of the orders it carries.
    pub async fn edit(&self, shipment_id: &str, patch: ShipmentPatch) -> Result<Shipment> {
        let mut shipment = self.get(shipment_id).await?;
        if shipment.status().is_terminal() {
            return Err(FulfillmentError::InvalidStateTransition { entity: "shipment", id: shipment_id.to_string(), from: shipment.status().to_string(), to: "edited".into() });
        }
        if let Some(weight) = patch.weight_grams {
            let orders: Vec<_> = self.ports.orders.find_by_shipment(shipment_id).await?
                .into_iter().filter(|o| o.status() != OrderStatus::Cancelled).collect();
            if !orders.is_empty() {
                let computed = declared_weight(self.ports.catalog.as_ref(), orders.iter().flat_map(|o| o.items()).collect::<Vec<_>>()).await?;
                let epsilon = self.config.weight_epsilon_grams;
                if (weight - computed).abs() > epsilon {
                    return Err(FulfillmentError::WeightConstraintViolation { declared_grams: weight, computed_grams: computed, epsilon_grams: epsilon });
                }
            }
            shipment.correct_weight(weight)?;
        }
        if let Some(id) = patch.recipient_id {
            if self.ports.resellers.reseller(&id).await?.is_none() {
                return Err(FulfillmentError::ReferentialIntegrityViolation { entity: "shipment", id: shipment_id.to_string(), missing: format!("reseller {id}") });
            }
            shipment.link_recipient(id);
        }
        if let Some(tracking) = patch.tracking_number { shipment.assign_tracking(tracking)?; }
        if let Some(name) = patch.recipient_name { shipment.rename_recipient(name); }
        if let Some(cost) = patch.cost { shipment.set_cost(Money::new(cost, &self.config.currency)); }

        self.ports.shipments.save(&shipment).await?;
        info!(shipment_id, "shipment edited");
        publish_all(self.ports.events.as_ref(), vec![DomainEvent::Shipment(ShipmentEvent::Edited { shipment_id: shipment_id.to_string() })]).await;
        Ok(shipment)
    }

    /// Moves the shipment through its lifecycle and carries the change over to its orders.
    /// Asking for the current status again is a no-op, except that `delivered` re-runs the
    /// delivery handler.
    pub async fn change_status(&self, shipment_id: &str, to: ShipmentStatus) -> Result<Shipment> {
        let mut shipment = self.get(shipment_id).await?;
        if shipment.status() == to {
            if to == ShipmentStatus::Delivered { self.handle_delivered(shipment_id).await?; }
            return Ok(shipment);
        }
        shipment.transition(to)?;
        self.ports.shipments.save(&shipment).await?;
        info!(shipment_id, status = %to, "shipment status changed");
        publish_all(self.ports.events.as_ref(), shipment.take_events()).await;

        match to {
            ShipmentStatus::InTransit => { self.advance_pending_orders(shipment_id).await?; }
            ShipmentStatus::Delivered => { self.handle_delivered(shipment_id).await?; }
            ShipmentStatus::Pending | ShipmentStatus::Returned => {}
        }
        Ok(shipment)
    }

    /// Marks every live order on the shipment delivered and settles its reseller stock.
    /// Each half is idempotent, so the handler can be replayed after a crash.
    pub async fn handle_delivered(&self, shipment_id: &str) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();
        for mut order in self.ports.orders.find_by_shipment(shipment_id).await? {
            if order.status() == OrderStatus::Cancelled { continue; }
            if order.journal().is_some() {
                warn!(order_id = %order.id(), shipment_id, "order has a saga in flight, delivery deferred");
                report.skipped += 1;
                continue;
            }
            if order.mark_delivered()? {
                self.ports.orders.save(&order).await?;
                report.orders_delivered += 1;
                publish_all(self.ports.events.as_ref(), order.take_events()).await;
            }
            report.rows_settled += self.resellers.settle_order(order.id()).await?;
        }
        if report.changed() { info!(shipment_id, ?report, "delivery applied to orders"); }
        Ok(report)
    }

    /// Pending orders on an in-transit shipment follow it. Returns how many moved.
    pub async fn advance_pending_orders(&self, shipment_id: &str) -> Result<usize> {
        let mut moved = 0;
        for mut order in self.ports.orders.find_by_shipment(shipment_id).await? {
            if order.status() != OrderStatus::Pending || order.journal().is_some() { continue; }
            order.transition(OrderStatus::InTransit)?;
            self.ports.orders.save(&order).await?;
            publish_all(self.ports.events.as_ref(), order.take_events()).await;
            moved += 1;
        }
        Ok(moved)
    }
}

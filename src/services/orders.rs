//! Outbound order lifecycle
//!
//! Every change that touches the ledgers is planned as a saga, stored on the order as its
//! journal, and applied one step at a time. If a step fails the applied steps are compensated
//! in reverse and the original error is returned. If compensation fails too, the journal stays
//! on the order and the error escalates as [`FulfillmentError::CompensationFailed`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use crate::config::EngineConfig;
use crate::domain::aggregates::order::normalize_lines;
use crate::domain::aggregates::{JournalIntent, OrderLine, OrderStatus, OutboundOrder, SagaStep, Shipment};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Money;
use crate::{FulfillmentError, Result};
use super::packer::PackingProposal;
use super::shipments::{build_shipment, NewShipment};
use super::{declared_weight, publish_all, Ports, ResellerLedger, SagaExecutor, StockLedger};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItemInput {
    pub product_id: String,
    pub quantity: u32,
    /// Overrides the catalog price.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

impl OrderItemInput {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self { Self { product_id: product_id.into(), quantity, unit_price: None } }
}

#[derive(Clone, Debug, Default)]
pub enum ShipmentLink {
    #[default]
    None,
    Existing(String),
    New(NewShipment),
}

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub reseller_id: String,
    pub items: Vec<OrderItemInput>,
    pub shipment: ShipmentLink,
}

#[derive(Clone)]
pub struct OrderService {
    ports: Ports,
    stock: StockLedger,
    resellers: ResellerLedger,
    saga: SagaExecutor,
    config: Arc<EngineConfig>,
}

impl OrderService {
    pub fn new(ports: Ports, stock: StockLedger, resellers: ResellerLedger, saga: SagaExecutor, config: Arc<EngineConfig>) -> Self {
        Self { ports, stock, resellers, saga, config }
    }

    pub async fn get(&self, order_id: &str) -> Result<OutboundOrder> {
        self.ports.orders.get(order_id).await?.ok_or_else(|| FulfillmentError::not_found("order", order_id))
    }

    pub async fn list(&self) -> Result<Vec<OutboundOrder>> { self.ports.orders.list().await }

    pub async fn list_for_reseller(&self, reseller_id: &str) -> Result<Vec<OutboundOrder>> {
        Ok(self.ports.orders.list().await?.into_iter().filter(|o| o.reseller_id() == reseller_id).collect())
    }

    pub async fn create(&self, request: NewOrder) -> Result<OutboundOrder> {
        let reseller = self.ports.resellers.reseller(&request.reseller_id).await?.ok_or_else(|| {
            FulfillmentError::ReferentialIntegrityViolation { entity: "order", id: "(new)".into(), missing: format!("reseller {}", request.reseller_id) }
        })?;
        let lines = normalize_lines(self.price_lines(&request.items).await?)?;
        self.check_stock(&lines, &[]).await?;

        let mut reweigh = None;
        let (shipment_ref, mut new_shipment) = match request.shipment {
            ShipmentLink::None => (None, None),
            ShipmentLink::Existing(id) => {
                let shipment = self.ports.shipments.get(&id).await?.ok_or_else(|| {
                    FulfillmentError::ReferentialIntegrityViolation { entity: "order", id: "(new)".into(), missing: format!("shipment {id}") }
                })?;
                if shipment.status().is_terminal() {
                    return Err(FulfillmentError::Validation(format!("shipment {id} is already {}", shipment.status())));
                }
                // an empty parcel was weighed for these lines, a shared one grows with them
                let shared = self.ports.orders.find_by_shipment(&id).await?.iter().any(|o| o.status() != OrderStatus::Cancelled);
                if shared {
                    reweigh = self.reweigh_step(&id, None, &lines).await?;
                } else {
                    self.ensure_weight(shipment.weight_grams(), &lines).await?;
                }
                (Some(id), None)
            }
            ShipmentLink::New(mut parcel) => {
                self.ensure_weight(parcel.weight_grams, &lines).await?;
                parcel.recipient_id.get_or_insert_with(|| reseller.id.clone());
                let shipment = build_shipment(&self.ports, parcel, &self.config.currency).await?;
                (Some(shipment.id().to_string()), Some(shipment))
            }
        };
        let shipment_events = new_shipment.as_mut().map(Shipment::take_events).unwrap_or_default();

        let number = self.ports.orders.next_number().await?;
        let mut order = OutboundOrder::create(number, reseller.id, lines, &self.config.currency)?;
        if let Some(id) = shipment_ref { order.link_shipment(id); }
        let mut plan = order.apply_plan(order.items(), new_shipment);
        plan.extend(reweigh);
        order.begin_journal(JournalIntent::Create, plan)?;
        self.ports.orders.save(&order).await?;
        info!(order_id = %order.id(), number, reseller_id = %order.reseller_id(), "order recorded, applying ledgers");

        self.orchestrate(&mut order).await?;
        publish_all(self.ports.events.as_ref(), shipment_events).await;
        Ok(order)
    }

    /// Replaces the order's lines: the original lines are reverted from both ledgers, then the
    /// new ones applied.
    pub async fn edit(&self, order_id: &str, items: Vec<OrderItemInput>) -> Result<OutboundOrder> {
        let mut order = self.get(order_id).await?;
        self.ensure_idle(&order)?;
        if !order.editable() {
            return Err(FulfillmentError::InvalidStateTransition { entity: "order", id: order_id.to_string(), from: order.status().to_string(), to: "edited".into() });
        }
        let target = normalize_lines(self.price_lines(&items).await?)?;
        Money::sum(order.total_price().currency(), target.iter().map(|l| &l.total_price))?;
        self.check_stock(&target, order.items()).await?;

        let mut plan = order.revert_plan();
        plan.extend(order.apply_plan(&target, None));
        if let Some(shipment_id) = order.shipment_ref() {
            plan.extend(self.reweigh_step(shipment_id, Some(order_id), &target).await?);
        }
        order.begin_journal(JournalIntent::Edit { target }, plan)?;
        self.ports.orders.save(&order).await?;
        info!(order_id, "order edit started");

        self.orchestrate(&mut order).await?;
        Ok(order)
    }

    pub async fn change_status(&self, order_id: &str, to: OrderStatus) -> Result<OutboundOrder> {
        let mut order = self.get(order_id).await?;
        if order.status() == to {
            if matches!(to, OrderStatus::Delivered | OrderStatus::Received) { self.resellers.settle_order(order_id).await?; }
            return Ok(order);
        }
        self.ensure_idle(&order)?;
        if !order.status().can_transition_to(to) {
            return Err(FulfillmentError::InvalidStateTransition { entity: "order", id: order_id.to_string(), from: order.status().to_string(), to: to.to_string() });
        }
        match to {
            OrderStatus::Cancelled => {
                let mut plan = order.revert_plan();
                if let Some(shipment_id) = order.shipment_ref() {
                    plan.extend(self.reweigh_step(shipment_id, Some(order_id), &[]).await?);
                }
                order.begin_journal(JournalIntent::Cancel, plan)?;
                self.ports.orders.save(&order).await?;
                self.orchestrate(&mut order).await?;
            }
            OrderStatus::Delivered | OrderStatus::Received => {
                order.transition(to)?;
                self.ports.orders.save(&order).await?;
                self.resellers.settle_order(order_id).await?;
            }
            OrderStatus::Pending | OrderStatus::InTransit => {
                order.transition(to)?;
                self.ports.orders.save(&order).await?;
            }
        }
        info!(order_id, status = %to, "order status changed");
        publish_all(self.ports.events.as_ref(), order.take_events()).await;
        Ok(order)
    }

    /// Deletes a pending, in-transit or cancelled order, reverting its ledger effects first.
    /// The linked shipment goes too when no other order uses it.
    pub async fn delete(&self, order_id: &str) -> Result<()> {
        let mut order = self.get(order_id).await?;
        self.ensure_idle(&order)?;
        if matches!(order.status(), OrderStatus::Delivered | OrderStatus::Received) {
            return Err(FulfillmentError::InvalidStateTransition { entity: "order", id: order_id.to_string(), from: order.status().to_string(), to: "deleted".into() });
        }
        let mut plan = if order.status() == OrderStatus::Cancelled { vec![] } else { order.revert_plan() };
        if let Some(shipment_id) = order.shipment_ref() {
            let shared = self.ports.orders.find_by_shipment(shipment_id).await?.iter().any(|o| o.id() != order_id);
            if !shared {
                if let Some(shipment) = self.ports.shipments.get(shipment_id).await? { plan.push(SagaStep::DeleteShipment { shipment }); }
            } else if order.status() != OrderStatus::Cancelled {
                plan.extend(self.reweigh_step(shipment_id, Some(order_id), &[]).await?);
            }
        }
        order.begin_journal(JournalIntent::Delete, plan)?;
        self.ports.orders.save(&order).await?;
        self.orchestrate(&mut order).await
    }

    /// Turns an accepted packing proposal into an order shipped in a new parcel of the
    /// proposal's weight.
    pub async fn create_from_proposal(&self, reseller_id: &str, proposal: &PackingProposal, shipment_cost: Decimal) -> Result<OutboundOrder> {
        let mut computed = 0.0;
        for item in &proposal.items {
            let product = self.ports.catalog.product(&item.product_id).await?.ok_or_else(|| {
                FulfillmentError::ReferentialIntegrityViolation { entity: "proposal", id: proposal.seed.to_string(), missing: format!("product {}", item.product_id) }
            })?;
            computed += product.weight_grams * f64::from(item.quantity);
        }
        let epsilon = self.config.weight_epsilon_grams;
        if (computed - proposal.total_weight_grams).abs() > epsilon {
            return Err(FulfillmentError::WeightConstraintViolation { declared_grams: proposal.total_weight_grams, computed_grams: computed, epsilon_grams: epsilon });
        }
        let items = proposal.items.iter().map(|i| OrderItemInput::new(i.product_id.clone(), i.quantity)).collect();
        let shipment = NewShipment {
            recipient_id: Some(reseller_id.to_string()), weight_grams: proposal.total_weight_grams, cost: shipment_cost, ..NewShipment::default()
        };
        self.create(NewOrder { reseller_id: reseller_id.to_string(), items, shipment: ShipmentLink::New(shipment) }).await
    }

    /// Rolls an interrupted journal to its end: forward if it was still applying, or through
    /// the remaining compensation if it was rolling back. Returns the order if it still exists.
    pub async fn resume(&self, order_id: &str) -> Result<Option<OutboundOrder>> {
        let mut order = self.get(order_id).await?;
        let rolling_back = match order.journal() {
            None => return Ok(Some(order)),
            Some(j) => j.rolling_back,
        };
        info!(order_id, rolling_back, "resuming order journal");
        if rolling_back {
            if let Err(reason) = self.saga.drive(&mut order).await {
                return Err(self.escalate(&order, reason, "interrupted rollback".into()));
            }
            self.finish_rollback(&mut order).await?;
        } else {
            self.orchestrate(&mut order).await?;
        }
        self.ports.orders.get(order_id).await
    }

    fn ensure_idle(&self, order: &OutboundOrder) -> Result<()> {
        match order.journal() {
            Some(j) => Err(FulfillmentError::ConcurrentModification { entity: "order", id: format!("{} ({} in progress)", order.id(), j.intent.name()) }),
            None => Ok(()),
        }
    }

    async fn ensure_weight(&self, declared_grams: f64, lines: &[OrderLine]) -> Result<()> {
        let computed = declared_weight(self.ports.catalog.as_ref(), lines).await?;
        let epsilon = self.config.weight_epsilon_grams;
        if (declared_grams - computed).abs() > epsilon {
            return Err(FulfillmentError::WeightConstraintViolation { declared_grams, computed_grams: computed, epsilon_grams: epsilon });
        }
        Ok(())
    }

    /// Step that brings a shared shipment's weight in line with its live orders once `lines`
    /// replace `order_id`'s share. `None` when nothing needs to move: the shipment is gone or
    /// terminal, it would be left empty, or it already agrees within epsilon.
    async fn reweigh_step(&self, shipment_id: &str, order_id: Option<&str>, lines: &[OrderLine]) -> Result<Option<SagaStep>> {
        let Some(shipment) = self.ports.shipments.get(shipment_id).await? else { return Ok(None) };
        if shipment.status().is_terminal() { return Ok(None); }
        let others: Vec<_> = self.ports.orders.find_by_shipment(shipment_id).await?.into_iter()
            .filter(|o| Some(o.id()) != order_id && o.status() != OrderStatus::Cancelled)
            .collect();
        let grams = declared_weight(self.ports.catalog.as_ref(), others.iter().flat_map(|o| o.items()).chain(lines).collect::<Vec<_>>()).await?;
        if grams <= 0.0 || (grams - shipment.weight_grams()).abs() <= self.config.weight_epsilon_grams { return Ok(None); }
        Ok(Some(SagaStep::ReweighShipment { shipment_id: shipment_id.to_string(), from_grams: shipment.weight_grams(), to_grams: grams }))
    }

    async fn price_lines(&self, items: &[OrderItemInput]) -> Result<Vec<OrderLine>> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product = self.ports.catalog.product(&item.product_id).await?.ok_or_else(|| {
                FulfillmentError::ReferentialIntegrityViolation { entity: "order line", id: item.product_id.clone(), missing: format!("product {}", item.product_id) }
            })?;
            let price = match item.unit_price {
                Some(amount) => Money::new(amount, &self.config.currency),
                None => product.price,
            };
            lines.push(OrderLine::new(item.product_id.clone(), item.quantity, price));
        }
        Ok(lines)
    }

    /// Checks `lines` against sellable stock, counting units `returning` will credit back first.
    async fn check_stock(&self, lines: &[OrderLine], returning: &[OrderLine]) -> Result<()> {
        for line in lines {
            let product = self.ports.catalog.product(&line.product_id).await?
                .ok_or_else(|| FulfillmentError::not_found("product", line.product_id.clone()))?;
            if product.backorder_eligible { continue; }
            let returned: u32 = returning.iter().filter(|l| l.product_id == line.product_id).map(OrderLine::ledger_quantity).sum();
            let available = self.stock.takeable(&line.product_id).await? + returned;
            if available < line.quantity {
                return Err(FulfillmentError::InsufficientStock { product_id: line.product_id.clone(), requested: line.quantity, available });
            }
        }
        Ok(())
    }

    async fn orchestrate(&self, order: &mut OutboundOrder) -> Result<()> {
        match self.saga.drive(order).await {
            Ok(()) => self.complete(order).await,
            Err(original) => self.compensate(order, original).await,
        }
    }

    async fn complete(&self, order: &mut OutboundOrder) -> Result<()> {
        let Some(journal) = order.take_journal() else { return Ok(()) };
        let debited = |product_id: &str| journal.saga.debited(product_id);
        match &journal.intent {
            JournalIntent::Create => {
                order.set_backorders(debited);
                order.record_created();
                self.ports.orders.save(order).await?;
            }
            JournalIntent::Edit { target } => {
                order.replace_items(target.clone())?;
                order.set_backorders(debited);
                self.ports.orders.save(order).await?;
            }
            JournalIntent::Cancel => {
                order.transition(OrderStatus::Cancelled)?;
                self.ports.orders.save(order).await?;
            }
            JournalIntent::Delete => {
                self.ports.orders.delete(order.id()).await?;
                publish_all(self.ports.events.as_ref(), vec![DomainEvent::Order(OrderEvent::Deleted { order_id: order.id().to_string() })]).await;
            }
        }
        info!(order_id = %order.id(), intent = journal.intent.name(), steps = journal.saga.applied().len(), "order saga completed");
        publish_all(self.ports.events.as_ref(), order.take_events()).await;
        Ok(())
    }

    async fn compensate(&self, order: &mut OutboundOrder, original: FulfillmentError) -> Result<()> {
        let Some(journal) = order.take_journal() else { return Err(original) };
        warn!(order_id = %order.id(), intent = journal.intent.name(), applied = journal.saga.applied().len(), error = %original, "saga step failed, compensating");
        order.restore_journal(journal.into_rollback());
        let rolled_back = match self.ports.orders.save(order).await {
            Ok(()) => self.saga.drive(order).await,
            Err(e) => Err(e),
        };
        if let Err(reason) = rolled_back {
            return Err(self.escalate(order, reason, original.to_string()));
        }
        self.finish_rollback(order).await?;
        Err(original)
    }

    async fn finish_rollback(&self, order: &mut OutboundOrder) -> Result<()> {
        match order.take_journal().map(|j| j.intent) {
            // the order never existed as far as the ledgers are concerned
            Some(JournalIntent::Create) => self.ports.orders.delete(order.id()).await,
            _ => self.ports.orders.save(order).await,
        }
    }

    fn escalate(&self, order: &OutboundOrder, reason: FulfillmentError, original: String) -> FulfillmentError {
        let step = order.journal().and_then(|j| j.saga.next()).map(SagaStep::describe).unwrap_or_else(|| "journal write".into());
        error!(order_id = %order.id(), %step, %reason, %original, "compensation failed, journal left for reconciliation");
        FulfillmentError::CompensationFailed { order_id: order.id().to_string(), step, reason: reason.to_string(), original }
    }
}

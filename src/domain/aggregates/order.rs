//! Outbound Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{new_id, Money};
use crate::{FulfillmentError, Result};
use super::journal::{JournalIntent, LedgerJournal, SagaStep};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundOrder {
    id: String,
    number: u64,
    reseller_id: String,
    items: Vec<OrderLine>,
    total_price: Money,
    status: OrderStatus,
    shipment_ref: Option<String>,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    journal: Option<LedgerJournal>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
    /// Units sold past the ledger floor of a backorder-eligible product.
    #[serde(default)]
    pub backordered: u32,
}

impl OrderLine {
    pub fn new(product_id: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        let total_price = unit_price.multiply(quantity);
        Self { product_id: product_id.into(), quantity, unit_price, total_price, backordered: 0 }
    }

    /// Units this line holds in the warehouse stock ledger.
    pub fn ledger_quantity(&self) -> u32 { self.quantity.saturating_sub(self.backordered) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus { #[default] Pending, InTransit, Delivered, Received, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InTransit => "in-transit",
            Self::Delivered => "delivered",
            Self::Received => "received",
            Self::Cancelled => "cancelled",
        }
    }
    pub fn is_editable(&self) -> bool { matches!(self, Self::Pending | Self::InTransit) }
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Received | Self::Cancelled) }
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!((self, to), (Pending, InTransit) | (InTransit, Delivered) | (Delivered, Received) | (Pending, Cancelled) | (InTransit, Cancelled))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = FulfillmentError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-transit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            "received" => Ok(Self::Received),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(FulfillmentError::Validation(format!("unknown order status {other}"))),
        }
    }
}

/// Merges repeated products into one line and rejects empty or zero-quantity input.
pub fn normalize_lines(lines: Vec<OrderLine>) -> Result<Vec<OrderLine>> {
    if lines.is_empty() { return Err(FulfillmentError::Validation("order has no items".into())); }
    let mut merged: Vec<OrderLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 { return Err(FulfillmentError::Validation(format!("quantity for {} must be positive", line.product_id))); }
        match merged.iter_mut().find(|l| l.product_id == line.product_id) {
            Some(existing) if existing.unit_price != line.unit_price => {
                return Err(FulfillmentError::Validation(format!("conflicting unit prices for {}", line.product_id)));
            }
            Some(existing) => *existing = OrderLine::new(existing.product_id.clone(), existing.quantity + line.quantity, existing.unit_price.clone()),
            None => merged.push(line),
        }
    }
    Ok(merged)
}

impl OutboundOrder {
    pub fn create(number: u64, reseller_id: impl Into<String>, items: Vec<OrderLine>, currency: &str) -> Result<Self> {
        let items = normalize_lines(items)?;
        let total_price = Money::sum(currency, items.iter().map(|l| &l.total_price))?;
        let now = Utc::now();
        Ok(Self {
            id: new_id(), number, reseller_id: reseller_id.into(), items, total_price, status: OrderStatus::Pending,
            shipment_ref: None, created_at: now, delivered_at: None, updated_at: now, journal: None, events: vec![],
        })
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn number(&self) -> u64 { self.number }
    pub fn reseller_id(&self) -> &str { &self.reseller_id }
    pub fn items(&self) -> &[OrderLine] { &self.items }
    pub fn total_price(&self) -> &Money { &self.total_price }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn shipment_ref(&self) -> Option<&str> { self.shipment_ref.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn delivered_at(&self) -> Option<DateTime<Utc>> { self.delivered_at }
    pub fn journal(&self) -> Option<&LedgerJournal> { self.journal.as_ref() }
    pub fn journal_mut(&mut self) -> Option<&mut LedgerJournal> { self.journal.as_mut() }
    pub fn editable(&self) -> bool { self.status.is_editable() }

    pub fn link_shipment(&mut self, shipment_id: impl Into<String>) { self.shipment_ref = Some(shipment_id.into()); self.touch(); }

    /// Replaces the lines and recomputes the total; the total is never set directly.
    pub fn replace_items(&mut self, items: Vec<OrderLine>) -> Result<()> {
        let items = normalize_lines(items)?;
        self.total_price = Money::sum(self.total_price.currency(), items.iter().map(|l| &l.total_price))?;
        self.items = items;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Edited { order_id: self.id.clone(), total: self.total_price.amount() }));
        Ok(())
    }

    /// Records how much of each line the stock ledger could not back.
    pub fn set_backorders(&mut self, debited: impl Fn(&str) -> u32) {
        for line in &mut self.items { line.backordered = line.quantity.saturating_sub(debited(&line.product_id)); }
    }

    pub fn transition(&mut self, to: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(FulfillmentError::InvalidStateTransition { entity: "order", id: self.id.clone(), from: self.status.to_string(), to: to.to_string() });
        }
        self.apply_status(to);
        Ok(())
    }

    /// Delivery confirmed by the carrier. Unlike [`Self::transition`] this also accepts a
    /// pending order, since the shipment is the authority on physical delivery.
    pub fn mark_delivered(&mut self) -> Result<bool> {
        match self.status {
            OrderStatus::Delivered | OrderStatus::Received | OrderStatus::Cancelled => Ok(false),
            OrderStatus::Pending | OrderStatus::InTransit => { self.apply_status(OrderStatus::Delivered); Ok(true) }
        }
    }

    fn apply_status(&mut self, to: OrderStatus) {
        let from = self.status;
        self.status = to;
        if to == OrderStatus::Delivered { self.delivered_at = Some(Utc::now()); }
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id.clone(), from: from.to_string(), to: to.to_string() }));
    }

    pub fn begin_journal(&mut self, intent: JournalIntent, plan: Vec<SagaStep>) -> Result<()> {
        if let Some(j) = &self.journal {
            return Err(FulfillmentError::ConcurrentModification { entity: "order", id: format!("{} ({} in progress)", self.id, j.intent.name()) });
        }
        self.journal = Some(LedgerJournal::new(intent, plan));
        self.touch();
        Ok(())
    }

    pub fn take_journal(&mut self) -> Option<LedgerJournal> { self.touch(); self.journal.take() }
    pub fn restore_journal(&mut self, journal: LedgerJournal) { self.journal = Some(journal); }

    /// Steps that undo this order's ledger effects line by line.
    pub fn revert_plan(&self) -> Vec<SagaStep> {
        self.items.iter().flat_map(|line| [
            SagaStep::CreditStock { product_id: line.product_id.clone(), quantity: line.ledger_quantity(), unit_price: Some(line.unit_price.amount()) },
            SagaStep::RevokeReseller { reseller_id: self.reseller_id.clone(), order_id: self.id.clone(), product_id: line.product_id.clone(), quantity: line.quantity },
        ]).collect()
    }

    /// Steps that apply `lines` to both ledgers: all debits first, then reseller credits.
    pub fn apply_plan(&self, lines: &[OrderLine], shipment: Option<super::shipment::Shipment>) -> Vec<SagaStep> {
        let debits = lines.iter().map(|l| SagaStep::DebitStock { product_id: l.product_id.clone(), quantity: l.quantity });
        let credits = lines.iter().map(|l| SagaStep::CreditReseller {
            reseller_id: self.reseller_id.clone(), order_id: self.id.clone(), product_id: l.product_id.clone(), quantity: l.quantity,
        });
        debits.chain(shipment.map(|shipment| SagaStep::CreateShipment { shipment })).chain(credits).collect()
    }

    pub fn record_created(&mut self) {
        self.raise_event(DomainEvent::Order(OrderEvent::Created {
            order_id: self.id.clone(), number: self.number, reseller_id: self.reseller_id.clone(), total: self.total_price.amount(),
        }));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Stock(StockEvent),
    Order(OrderEvent),
    Shipment(ShipmentEvent),
    Reconciliation(ReconciliationEvent),
}

impl DomainEvent {
    /// Subject used when the event is published on the message bus.
    pub fn subject(&self) -> String {
        let (aggregate, kind) = match self {
            Self::Stock(e) => ("stock", e.kind()),
            Self::Order(e) => ("order", e.kind()),
            Self::Shipment(e) => ("shipment", e.kind()),
            Self::Reconciliation(_) => ("reconciliation", "corrected"),
        };
        format!("fulfillment.{aggregate}.{kind}")
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StockEvent {
    Debited { product_id: String, quantity: u32, backordered: u32 },
    Credited { product_id: String, quantity: u32 },
    Removed { product_id: String, quantity: u32 },
}

impl StockEvent {
    fn kind(&self) -> &'static str {
        match self { Self::Debited { .. } => "debited", Self::Credited { .. } => "credited", Self::Removed { .. } => "removed" }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: String, number: u64, reseller_id: String, total: Decimal },
    Edited { order_id: String, total: Decimal },
    StatusChanged { order_id: String, from: String, to: String },
    Deleted { order_id: String },
}

impl OrderEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Edited { .. } => "edited",
            Self::StatusChanged { .. } => "status_changed",
            Self::Deleted { .. } => "deleted",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentEvent {
    Created { shipment_id: String, weight_grams: f64 },
    StatusChanged { shipment_id: String, from: String, to: String, tracking: Option<String> },
    Edited { shipment_id: String },
}

impl ShipmentEvent {
    fn kind(&self) -> &'static str {
        match self { Self::Created { .. } => "created", Self::StatusChanged { .. } => "status_changed", Self::Edited { .. } => "edited" }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReconciliationEvent { pub pass: String, pub entity_id: String, pub detail: String }

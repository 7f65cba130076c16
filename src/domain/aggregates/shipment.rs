//! Shipment Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::domain::events::{DomainEvent, ShipmentEvent};
use crate::domain::value_objects::{new_id, Money};
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Shipment {
    id: String,
    tracking_number: Option<String>,
    recipient_id: Option<String>,
    recipient_name: String,
    weight_grams: f64,
    cost: Money,
    status: ShipmentStatus,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShipmentStatus { #[default] Pending, InTransit, Delivered, Returned }

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::InTransit => "in-transit", Self::Delivered => "delivered", Self::Returned => "returned" }
    }
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Returned) }
    pub fn can_transition_to(&self, to: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        matches!((self, to), (Pending, InTransit) | (InTransit, Delivered) | (Pending, Returned) | (InTransit, Returned))
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ShipmentStatus {
    type Err = FulfillmentError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-transit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            "returned" => Ok(Self::Returned),
            other => Err(FulfillmentError::Validation(format!("unknown shipment status {other}"))),
        }
    }
}

impl Shipment {
    pub fn create(recipient_name: impl Into<String>, recipient_id: Option<String>, weight_grams: f64, cost: Money) -> Result<Self> {
        if !(weight_grams > 0.0) { return Err(FulfillmentError::Validation(format!("shipment weight must be positive, got {weight_grams}"))); }
        let id = new_id();
        let now = Utc::now();
        let mut shipment = Self {
            id: id.clone(), tracking_number: None, recipient_id, recipient_name: recipient_name.into(), weight_grams, cost,
            status: ShipmentStatus::Pending, created_at: now, delivered_at: None, updated_at: now, events: vec![],
        };
        shipment.raise_event(DomainEvent::Shipment(ShipmentEvent::Created { shipment_id: id, weight_grams }));
        Ok(shipment)
    }

    /// Used when importing carrier records whose creation date predates the import.
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self { self.created_at = at; self }

    pub fn id(&self) -> &str { &self.id }
    pub fn tracking_number(&self) -> Option<&str> { self.tracking_number.as_deref() }
    pub fn recipient_id(&self) -> Option<&str> { self.recipient_id.as_deref() }
    pub fn recipient_name(&self) -> &str { &self.recipient_name }
    pub fn weight_grams(&self) -> f64 { self.weight_grams }
    pub fn cost(&self) -> &Money { &self.cost }
    pub fn status(&self) -> ShipmentStatus { self.status }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn delivered_at(&self) -> Option<DateTime<Utc>> { self.delivered_at }

    pub fn assign_tracking(&mut self, tracking: impl Into<String>) -> Result<()> {
        let tracking = tracking.into().trim().to_string();
        if tracking.is_empty() { return Err(FulfillmentError::Validation("tracking number must not be empty".into())); }
        self.tracking_number = Some(tracking);
        self.touch();
        Ok(())
    }

    pub fn link_recipient(&mut self, reseller_id: impl Into<String>) { self.recipient_id = Some(reseller_id.into()); self.touch(); }
    pub fn rename_recipient(&mut self, name: impl Into<String>) { self.recipient_name = name.into(); self.touch(); }

    pub fn correct_weight(&mut self, weight_grams: f64) -> Result<()> {
        if !(weight_grams > 0.0) { return Err(FulfillmentError::Validation(format!("shipment weight must be positive, got {weight_grams}"))); }
        self.weight_grams = weight_grams;
        self.touch();
        Ok(())
    }

    pub fn set_cost(&mut self, cost: Money) { self.cost = cost; self.touch(); }

    pub fn transition(&mut self, to: ShipmentStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(FulfillmentError::InvalidStateTransition { entity: "shipment", id: self.id.clone(), from: self.status.to_string(), to: to.to_string() });
        }
        if to == ShipmentStatus::InTransit && self.tracking_number.is_none() {
            return Err(FulfillmentError::Validation(format!("shipment {} needs a tracking number before it can be in transit", self.id)));
        }
        let from = self.status;
        self.status = to;
        if to == ShipmentStatus::Delivered { self.delivered_at = Some(Utc::now()); }
        self.touch();
        self.raise_event(DomainEvent::Shipment(ShipmentEvent::StatusChanged {
            shipment_id: self.id.clone(), from: from.to_string(), to: to.to_string(), tracking: self.tracking_number.clone(),
        }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn shipment() -> Shipment { Shipment::create("Maria Lopez", None, 3600.0, Money::usd(Decimal::new(45, 0))).unwrap() }

    #[test]
    fn test_in_transit_requires_tracking() {
        let mut s = shipment();
        assert!(matches!(s.transition(ShipmentStatus::InTransit), Err(FulfillmentError::Validation(_))));
        s.assign_tracking("1Z999").unwrap();
        s.transition(ShipmentStatus::InTransit).unwrap();
        s.transition(ShipmentStatus::Delivered).unwrap();
        assert!(s.delivered_at().is_some());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut s = shipment();
        s.transition(ShipmentStatus::Returned).unwrap();
        for to in [ShipmentStatus::Pending, ShipmentStatus::InTransit, ShipmentStatus::Delivered] {
            assert!(matches!(s.transition(to), Err(FulfillmentError::InvalidStateTransition { .. })));
        }
    }

    #[test]
    fn test_pending_cannot_skip_to_delivered() {
        let mut s = shipment();
        assert!(s.transition(ShipmentStatus::Delivered).is_err());
        assert_eq!(s.status(), ShipmentStatus::Pending);
    }
}

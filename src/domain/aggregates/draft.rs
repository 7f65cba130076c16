//! Draft Order Aggregate
//!
//! Unsaved order lines an operator is still assembling. Drafts never touch a ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{new_id, Money};
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftOrder {
    id: String,
    reseller_id: Option<String>,
    items: Vec<DraftLine>,
    note: Option<String>,
    subtotal: Money,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftLine {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl DraftLine {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

impl DraftOrder {
    pub fn new(currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(), reseller_id: None, items: vec![], note: None,
            subtotal: Money::zero(currency), currency: currency.to_string(), created_at: now, updated_at: now,
        }
    }

    pub fn for_reseller(reseller_id: impl Into<String>, currency: &str) -> Self {
        let mut draft = Self::new(currency);
        draft.reseller_id = Some(reseller_id.into());
        draft
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn reseller_id(&self) -> Option<&str> { self.reseller_id.as_deref() }
    pub fn items(&self) -> &[DraftLine] { &self.items }
    pub fn note(&self) -> Option<&str> { self.note.as_deref() }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn assign_reseller(&mut self, reseller_id: impl Into<String>) { self.reseller_id = Some(reseller_id.into()); self.touch(); }
    pub fn set_note(&mut self, note: Option<String>) { self.note = note; self.touch(); }

    pub fn add_item(&mut self, item: DraftLine) -> Result<()> {
        if item.quantity == 0 { return Err(FulfillmentError::Validation(format!("quantity for {} must be positive", item.product_id))); }
        if item.unit_price.currency() != self.currency {
            return Err(FulfillmentError::Validation(format!("draft is priced in {}, got {}", self.currency, item.unit_price.currency())));
        }
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.quantity += item.quantity;
        } else {
            self.items.push(item);
        }
        self.recalculate()
    }

    pub fn update_quantity(&mut self, product_id: &str, quantity: u32) -> Result<()> {
        let item = self.items.iter_mut().find(|i| i.product_id == product_id)
            .ok_or_else(|| FulfillmentError::not_found("draft line", product_id))?;
        if quantity == 0 { self.items.retain(|i| i.product_id != product_id); }
        else { item.quantity = quantity; }
        self.recalculate()
    }

    pub fn remove_item(&mut self, product_id: &str) -> Result<()> {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before { return Err(FulfillmentError::not_found("draft line", product_id)); }
        self.recalculate()
    }

    fn recalculate(&mut self) -> Result<()> {
        let totals: Vec<Money> = self.items.iter().map(DraftLine::line_total).collect();
        self.subtotal = Money::sum(&self.currency, totals.iter())?;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn line(p: &str, q: u32) -> DraftLine { DraftLine { product_id: p.into(), quantity: q, unit_price: Money::usd(Decimal::new(10, 0)) } }

    #[test]
    fn test_draft_operations() {
        let mut draft = DraftOrder::for_reseller("R1", "USD");
        draft.add_item(line("P1", 2)).unwrap();
        draft.add_item(line("P1", 1)).unwrap();
        assert_eq!(draft.items().len(), 1);
        assert_eq!(draft.items()[0].quantity, 3); // Merged
        assert_eq!(draft.subtotal().amount(), Decimal::new(30, 0));
        draft.update_quantity("P1", 0).unwrap();
        assert!(draft.is_empty());
        assert!(draft.remove_item("P1").is_err());
    }

    #[test]
    fn test_rejects_foreign_currency() {
        let mut draft = DraftOrder::new("USD");
        let foreign = DraftLine { product_id: "P1".into(), quantity: 1, unit_price: Money::new(Decimal::ONE, "MXN") };
        assert!(draft.add_item(foreign).is_err());
    }
}

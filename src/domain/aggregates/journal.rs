//! Saga journal carried by an order while a multi-entity change is in flight
//!
//! A [`Saga`] is a plan of forward steps plus the effects actually applied so far. Every step
//! has an inverse, so a half-applied saga can always be compensated in reverse order. The
//! journal is stored on the order record itself, which lets an interrupted orchestration be
//! resumed from the last persisted step.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use super::order::OrderLine;
use super::shipment::Shipment;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SagaStep {
    DebitStock { product_id: String, quantity: u32 },
    CreditStock { product_id: String, quantity: u32, #[serde(default)] unit_price: Option<Decimal> },
    /// Takes back units an earlier credit returned. Unlike a debit it never backorders.
    ReclaimStock { product_id: String, quantity: u32 },
    CreditReseller { reseller_id: String, order_id: String, product_id: String, quantity: u32 },
    RevokeReseller { reseller_id: String, order_id: String, product_id: String, quantity: u32 },
    CreateShipment { shipment: Shipment },
    DeleteShipment { shipment: Shipment },
    ReweighShipment { shipment_id: String, from_grams: f64, to_grams: f64 },
}

impl SagaStep {
    pub fn inverse(&self) -> SagaStep {
        match self.clone() {
            Self::DebitStock { product_id, quantity } => Self::CreditStock { product_id, quantity, unit_price: None },
            Self::CreditStock { product_id, quantity, .. } => Self::ReclaimStock { product_id, quantity },
            Self::ReclaimStock { product_id, quantity } => Self::CreditStock { product_id, quantity, unit_price: None },
            Self::CreditReseller { reseller_id, order_id, product_id, quantity } => Self::RevokeReseller { reseller_id, order_id, product_id, quantity },
            Self::RevokeReseller { reseller_id, order_id, product_id, quantity } => Self::CreditReseller { reseller_id, order_id, product_id, quantity },
            Self::CreateShipment { shipment } => Self::DeleteShipment { shipment },
            Self::DeleteShipment { shipment } => Self::CreateShipment { shipment },
            Self::ReweighShipment { shipment_id, from_grams, to_grams } => Self::ReweighShipment { shipment_id, from_grams: to_grams, to_grams: from_grams },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::DebitStock { product_id, quantity } => format!("debit stock {product_id} x{quantity}"),
            Self::CreditStock { product_id, quantity, .. } => format!("credit stock {product_id} x{quantity}"),
            Self::ReclaimStock { product_id, quantity } => format!("reclaim stock {product_id} x{quantity}"),
            Self::CreditReseller { reseller_id, product_id, quantity, .. } => format!("credit reseller {reseller_id} {product_id} x{quantity}"),
            Self::RevokeReseller { reseller_id, product_id, quantity, .. } => format!("revoke reseller {reseller_id} {product_id} x{quantity}"),
            Self::CreateShipment { shipment } => format!("create shipment {}", shipment.id()),
            Self::DeleteShipment { shipment } => format!("delete shipment {}", shipment.id()),
            Self::ReweighShipment { shipment_id, to_grams, .. } => format!("reweigh shipment {shipment_id} to {to_grams}g"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Saga {
    pending: VecDeque<SagaStep>,
    applied: Vec<SagaStep>,
}

impl Saga {
    pub fn new(plan: Vec<SagaStep>) -> Self { Self { pending: plan.into(), applied: vec![] } }
    pub fn next(&self) -> Option<&SagaStep> { self.pending.front() }
    pub fn applied(&self) -> &[SagaStep] { &self.applied }
    pub fn remaining(&self) -> usize { self.pending.len() }

    /// Marks the front step done, storing the effect that was actually applied.
    pub fn record(&mut self, effect: SagaStep) {
        self.pending.pop_front();
        self.applied.push(effect);
    }

    /// Inverses of the applied effects, last applied first.
    pub fn compensation_plan(&self) -> Vec<SagaStep> { self.applied.iter().rev().map(SagaStep::inverse).collect() }

    /// Units actually taken from the stock ledger for `product_id`.
    pub fn debited(&self, product_id: &str) -> u32 {
        self.applied.iter().map(|s| match s {
            SagaStep::DebitStock { product_id: p, quantity } if p == product_id => *quantity,
            _ => 0,
        }).sum()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum JournalIntent {
    Create,
    Edit { target: Vec<OrderLine> },
    Cancel,
    Delete,
}

impl JournalIntent {
    pub fn name(&self) -> &'static str {
        match self { Self::Create => "create", Self::Edit { .. } => "edit", Self::Cancel => "cancel", Self::Delete => "delete" }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerJournal {
    pub intent: JournalIntent,
    pub saga: Saga,
    #[serde(default)]
    pub rolling_back: bool,
    pub started_at: DateTime<Utc>,
}

impl LedgerJournal {
    pub fn new(intent: JournalIntent, plan: Vec<SagaStep>) -> Self {
        Self { intent, saga: Saga::new(plan), rolling_back: false, started_at: Utc::now() }
    }

    /// Switches the journal to compensating whatever the forward saga applied.
    pub fn into_rollback(self) -> Self {
        let plan = self.saga.compensation_plan();
        Self { saga: Saga::new(plan), rolling_back: true, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debit(p: &str, q: u32) -> SagaStep { SagaStep::DebitStock { product_id: p.into(), quantity: q } }

    #[test]
    fn test_compensation_runs_in_reverse() {
        let mut saga = Saga::new(vec![debit("A", 2), debit("B", 3), debit("C", 1)]);
        saga.record(debit("A", 2));
        saga.record(debit("B", 1));
        let plan = saga.compensation_plan();
        assert_eq!(plan.len(), 2);
        assert!(matches!(&plan[0], SagaStep::CreditStock { product_id, quantity: 1, .. } if product_id == "B"));
        assert!(matches!(&plan[1], SagaStep::CreditStock { product_id, quantity: 2, .. } if product_id == "A"));
        assert_eq!(saga.remaining(), 1);
        assert_eq!(saga.debited("B"), 1);
    }

    #[test]
    fn test_credit_is_undone_by_a_strict_reclaim() {
        let credit = SagaStep::CreditStock { product_id: "A".into(), quantity: 2, unit_price: None };
        assert!(matches!(credit.inverse(), SagaStep::ReclaimStock { quantity: 2, .. }));
        assert!(matches!(credit.inverse().inverse(), SagaStep::CreditStock { quantity: 2, .. }));

        let reweigh = SagaStep::ReweighShipment { shipment_id: "S".into(), from_grams: 950.0, to_grams: 700.0 };
        assert!(matches!(reweigh.inverse(), SagaStep::ReweighShipment { from_grams, to_grams, .. } if from_grams == 700.0 && to_grams == 950.0));
    }

    #[test]
    fn test_rollback_journal_keeps_intent() {
        let mut journal = LedgerJournal::new(JournalIntent::Cancel, vec![debit("A", 1)]);
        journal.saga.record(debit("A", 1));
        let rollback = journal.into_rollback();
        assert!(rollback.rolling_back);
        assert_eq!(rollback.intent.name(), "cancel");
        assert_eq!(rollback.saga.remaining(), 1);
    }
}

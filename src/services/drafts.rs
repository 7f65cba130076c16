//! Draft orders
//!
//! Drafts are persisted so an operator can come back to them; they never touch a ledger until
//! promoted into a real order.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use crate::domain::aggregates::{DraftLine, DraftOrder, OutboundOrder};
use crate::domain::ports::{Catalog, DraftRepository, ResellerDirectory};
use crate::domain::value_objects::Money;
use crate::{FulfillmentError, Result};
use super::orders::{NewOrder, OrderItemInput, OrderService, ShipmentLink};

#[derive(Clone)]
pub struct DraftService {
    drafts: Arc<dyn DraftRepository>,
    catalog: Arc<dyn Catalog>,
    resellers: Arc<dyn ResellerDirectory>,
    orders: OrderService,
    currency: String,
}

impl DraftService {
    pub fn new(drafts: Arc<dyn DraftRepository>, catalog: Arc<dyn Catalog>, resellers: Arc<dyn ResellerDirectory>, orders: OrderService, currency: String) -> Self {
        Self { drafts, catalog, resellers, orders, currency }
    }

    pub async fn create(&self, reseller_id: Option<String>, note: Option<String>) -> Result<DraftOrder> {
        let mut draft = match reseller_id {
            Some(id) => DraftOrder::for_reseller(id, &self.currency),
            None => DraftOrder::new(&self.currency),
        };
        draft.set_note(note);
        self.drafts.save(&draft).await?;
        Ok(draft)
    }

    pub async fn save(&self, draft: &DraftOrder) -> Result<()> { self.drafts.save(draft).await }

    pub async fn load(&self, draft_id: &str) -> Result<DraftOrder> {
        self.drafts.get(draft_id).await?.ok_or_else(|| FulfillmentError::not_found("draft", draft_id))
    }

    pub async fn list(&self) -> Result<Vec<DraftOrder>> { self.drafts.list().await }

    pub async fn delete(&self, draft_id: &str) -> Result<()> {
        self.load(draft_id).await?;
        self.drafts.delete(draft_id).await
    }

    pub async fn assign_reseller(&self, draft_id: &str, reseller_id: &str) -> Result<DraftOrder> {
        let mut draft = self.load(draft_id).await?;
        if self.resellers.reseller(reseller_id).await?.is_none() {
            return Err(FulfillmentError::ReferentialIntegrityViolation { entity: "draft", id: draft_id.to_string(), missing: format!("reseller {reseller_id}") });
        }
        draft.assign_reseller(reseller_id);
        self.drafts.save(&draft).await?;
        Ok(draft)
    }

    /// Adds a catalog product, priced at the catalog price unless `unit_price` is given.
    pub async fn add_item(&self, draft_id: &str, product_id: &str, quantity: u32, unit_price: Option<Decimal>) -> Result<DraftOrder> {
        let mut draft = self.load(draft_id).await?;
        let product = self.catalog.product(product_id).await?.ok_or_else(|| FulfillmentError::not_found("product", product_id))?;
        let unit_price = unit_price.map(|amount| Money::new(amount, &self.currency)).unwrap_or(product.price);
        draft.add_item(DraftLine { product_id: product_id.to_string(), quantity, unit_price })?;
        self.drafts.save(&draft).await?;
        Ok(draft)
    }

    pub async fn update_quantity(&self, draft_id: &str, product_id: &str, quantity: u32) -> Result<DraftOrder> {
        let mut draft = self.load(draft_id).await?;
        draft.update_quantity(product_id, quantity)?;
        self.drafts.save(&draft).await?;
        Ok(draft)
    }

    pub async fn remove_item(&self, draft_id: &str, product_id: &str) -> Result<DraftOrder> {
        let mut draft = self.load(draft_id).await?;
        draft.remove_item(product_id)?;
        self.drafts.save(&draft).await?;
        Ok(draft)
    }

    /// Places the draft as an order and deletes it. A failed order leaves the draft untouched.
    pub async fn promote(&self, draft_id: &str, shipment: ShipmentLink) -> Result<OutboundOrder> {
        let draft = self.load(draft_id).await?;
        let reseller_id = draft.reseller_id()
            .ok_or_else(|| FulfillmentError::Validation(format!("draft {draft_id} has no reseller")))?
            .to_string();
        if draft.is_empty() { return Err(FulfillmentError::Validation(format!("draft {draft_id} has no items"))); }
        let items = draft.items().iter()
            .map(|l| OrderItemInput { product_id: l.product_id.clone(), quantity: l.quantity, unit_price: Some(l.unit_price.amount()) })
            .collect();
        let order = self.orders.create(NewOrder { reseller_id, items, shipment }).await?;
        self.drafts.delete(draft_id).await?;
        info!(draft_id, order_id = %order.id(), "draft promoted to order");
        Ok(order)
    }
}

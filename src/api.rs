//! Operator HTTP API

use axum::{extract::{Path, Query, State}, http::StatusCode, routing::{get, post, put}, Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use validator::Validate;
use crate::domain::aggregates::{DraftOrder, OrderStatus, OutboundOrder, ResellerPosition, Shipment, ShipmentStatus, StockEntry, StockStatus};
use crate::services::{
    Fulfillment, NewOrder, NewShipment, OrderItemInput, PackingOutcome, PackingProposal, ReconciliationReport, ShipmentLink, ShipmentPatch,
};
use crate::FulfillmentError;

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub fn router(app: Fulfillment) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "resale-fulfillment"})) }))
        .route("/api/v1/packing/proposals", post(pack))
        .route("/api/v1/packing/proposals/regenerate", post(regenerate))
        .route("/api/v1/orders", get(list_orders).post(create_order))
        .route("/api/v1/orders/from-proposal", post(create_order_from_proposal))
        .route("/api/v1/orders/:id", get(get_order).put(edit_order).delete(delete_order))
        .route("/api/v1/orders/:id/status", post(change_order_status))
        .route("/api/v1/orders/:id/resume", post(resume_order))
        .route("/api/v1/shipments", get(list_shipments).post(create_shipment))
        .route("/api/v1/shipments/:id", get(get_shipment).patch(edit_shipment))
        .route("/api/v1/shipments/:id/status", post(change_shipment_status))
        .route("/api/v1/drafts", get(list_drafts).post(create_draft))
        .route("/api/v1/drafts/:id", get(get_draft).delete(delete_draft))
        .route("/api/v1/drafts/:id/items", post(add_draft_item))
        .route("/api/v1/drafts/:id/items/:product_id", put(update_draft_item).delete(remove_draft_item))
        .route("/api/v1/drafts/:id/reseller", put(assign_draft_reseller))
        .route("/api/v1/drafts/:id/promote", post(promote_draft))
        .route("/api/v1/stock", get(stock_snapshot))
        .route("/api/v1/stock/receive", post(receive_stock))
        .route("/api/v1/stock/remove", post(remove_stock))
        .route("/api/v1/stock/:product_id", get(stock_for_product))
        .route("/api/v1/resellers/:id/positions", get(reseller_positions))
        .route("/api/v1/reconciliation/run", post(run_reconciliation))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(app)
}

/// Maps engine errors onto HTTP statuses.
pub fn reject(e: FulfillmentError) -> (StatusCode, String) {
    let status = match &e {
        FulfillmentError::InsufficientStock { .. }
        | FulfillmentError::InvalidStateTransition { .. }
        | FulfillmentError::WeightConstraintViolation { .. }
        | FulfillmentError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        FulfillmentError::NotFound { .. } => StatusCode::NOT_FOUND,
        FulfillmentError::Validation(_)
        | FulfillmentError::ReferentialIntegrityViolation { .. }
        | FulfillmentError::PackingInfeasible(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FulfillmentError::CompensationFailed { .. }
        | FulfillmentError::Database(_)
        | FulfillmentError::Serialization(_)
        | FulfillmentError::Storage(_)
        | FulfillmentError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() { tracing::error!(error = %e, "request failed"); }
    (status, e.to_string())
}

fn check(r: &impl Validate) -> ApiResult<()> { r.validate().map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())) }

fn shipment_link(existing: Option<String>, new: Option<NewShipmentRequest>) -> ApiResult<ShipmentLink> {
    match (existing, new) {
        (Some(_), Some(_)) => Err((StatusCode::UNPROCESSABLE_ENTITY, "give either shipment_id or new_shipment, not both".into())),
        (Some(id), None) => Ok(ShipmentLink::Existing(id)),
        (None, Some(n)) => Ok(ShipmentLink::New(n.into())),
        (None, None) => Ok(ShipmentLink::None),
    }
}

// ---- packing ----

#[derive(Debug, Deserialize)] pub struct PackRequest { pub seed: Option<u64>, #[serde(default)] pub exclude: Vec<String> }
#[derive(Debug, Deserialize)] pub struct RegenerateRequest { pub previous: PackingProposal, pub seed: Option<u64>, #[serde(default)] pub exclude: Vec<String> }

async fn pack(State(s): State<Fulfillment>, Json(r): Json<PackRequest>) -> ApiResult<Json<PackingOutcome>> {
    let excluded: HashSet<String> = r.exclude.into_iter().collect();
    s.packer.pack(&excluded, r.seed).await.map(Json).map_err(reject)
}

async fn regenerate(State(s): State<Fulfillment>, Json(r): Json<RegenerateRequest>) -> ApiResult<Json<PackingOutcome>> {
    let excluded: HashSet<String> = r.exclude.into_iter().collect();
    s.packer.regenerate(&r.previous, &excluded, r.seed).await.map(Json).map_err(reject)
}

// ---- orders ----

#[derive(Debug, Deserialize, Validate)]
pub struct OrderItemRequest {
    #[validate(length(min = 1))] pub product_id: String,
    #[validate(range(min = 1))] pub quantity: u32,
    pub unit_price: Option<Decimal>,
}

impl From<OrderItemRequest> for OrderItemInput {
    fn from(r: OrderItemRequest) -> Self { Self { product_id: r.product_id, quantity: r.quantity, unit_price: r.unit_price } }
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewShipmentRequest {
    #[validate(length(min = 1))] pub recipient_name: Option<String>,
    pub recipient_id: Option<String>,
    pub weight_grams: f64,
    #[serde(default)] pub cost: Decimal,
    pub tracking_number: Option<String>,
}

impl From<NewShipmentRequest> for NewShipment {
    fn from(r: NewShipmentRequest) -> Self {
        Self { recipient_name: r.recipient_name, recipient_id: r.recipient_id, weight_grams: r.weight_grams, cost: r.cost, tracking_number: r.tracking_number }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1))] pub reseller_id: String,
    #[validate] pub items: Vec<OrderItemRequest>,
    pub shipment_id: Option<String>,
    pub new_shipment: Option<NewShipmentRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EditOrderRequest { #[validate] pub items: Vec<OrderItemRequest> }

#[derive(Debug, Deserialize)] pub struct OrderStatusRequest { pub status: OrderStatus }
#[derive(Debug, Deserialize)] pub struct OrderListParams { pub reseller_id: Option<String> }

#[derive(Debug, Deserialize, Validate)]
pub struct FromProposalRequest {
    #[validate(length(min = 1))] pub reseller_id: String,
    pub proposal: PackingProposal,
    #[serde(default)] pub shipment_cost: Decimal,
}

async fn list_orders(State(s): State<Fulfillment>, Query(p): Query<OrderListParams>) -> ApiResult<Json<Vec<OutboundOrder>>> {
    let orders = match p.reseller_id { Some(id) => s.orders.list_for_reseller(&id).await, None => s.orders.list().await };
    orders.map(Json).map_err(reject)
}

async fn get_order(State(s): State<Fulfillment>, Path(id): Path<String>) -> ApiResult<Json<OutboundOrder>> {
    s.orders.get(&id).await.map(Json).map_err(reject)
}

async fn create_order(State(s): State<Fulfillment>, Json(r): Json<CreateOrderRequest>) -> ApiResult<(StatusCode, Json<OutboundOrder>)> {
    check(&r)?;
    let shipment = shipment_link(r.shipment_id, r.new_shipment)?;
    let request = NewOrder { reseller_id: r.reseller_id, items: r.items.into_iter().map(Into::into).collect(), shipment };
    let order = s.orders.create(request).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn create_order_from_proposal(State(s): State<Fulfillment>, Json(r): Json<FromProposalRequest>) -> ApiResult<(StatusCode, Json<OutboundOrder>)> {
    check(&r)?;
    let order = s.orders.create_from_proposal(&r.reseller_id, &r.proposal, r.shipment_cost).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn edit_order(State(s): State<Fulfillment>, Path(id): Path<String>, Json(r): Json<EditOrderRequest>) -> ApiResult<Json<OutboundOrder>> {
    check(&r)?;
    s.orders.edit(&id, r.items.into_iter().map(Into::into).collect()).await.map(Json).map_err(reject)
}

async fn change_order_status(State(s): State<Fulfillment>, Path(id): Path<String>, Json(r): Json<OrderStatusRequest>) -> ApiResult<Json<OutboundOrder>> {
    s.orders.change_status(&id, r.status).await.map(Json).map_err(reject)
}

async fn resume_order(State(s): State<Fulfillment>, Path(id): Path<String>) -> ApiResult<Json<Option<OutboundOrder>>> {
    s.orders.resume(&id).await.map(Json).map_err(reject)
}

async fn delete_order(State(s): State<Fulfillment>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    s.orders.delete(&id).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- shipments ----

#[derive(Debug, Deserialize)] pub struct ShipmentStatusRequest { pub status: ShipmentStatus, pub tracking_number: Option<String> }

async fn list_shipments(State(s): State<Fulfillment>) -> ApiResult<Json<Vec<Shipment>>> { s.shipments.list().await.map(Json).map_err(reject) }

async fn get_shipment(State(s): State<Fulfillment>, Path(id): Path<String>) -> ApiResult<Json<Shipment>> {
    s.shipments.get(&id).await.map(Json).map_err(reject)
}

async fn create_shipment(State(s): State<Fulfillment>, Json(r): Json<NewShipmentRequest>) -> ApiResult<(StatusCode, Json<Shipment>)> {
    check(&r)?;
    let shipment = s.shipments.create(r.into()).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

async fn edit_shipment(State(s): State<Fulfillment>, Path(id): Path<String>, Json(r): Json<ShipmentPatch>) -> ApiResult<Json<Shipment>> {
    s.shipments.edit(&id, r).await.map(Json).map_err(reject)
}

async fn change_shipment_status(State(s): State<Fulfillment>, Path(id): Path<String>, Json(r): Json<ShipmentStatusRequest>) -> ApiResult<Json<Shipment>> {
    if let Some(tracking) = r.tracking_number { s.shipments.assign_tracking(&id, &tracking).await.map_err(reject)?; }
    s.shipments.change_status(&id, r.status).await.map(Json).map_err(reject)
}

// ---- drafts ----

#[derive(Debug, Deserialize)] pub struct CreateDraftRequest { pub reseller_id: Option<String>, pub note: Option<String> }

#[derive(Debug, Deserialize)] pub struct DraftQuantityRequest { pub quantity: u32 }
#[derive(Debug, Deserialize, Validate)] pub struct AssignResellerRequest { #[validate(length(min = 1))] pub reseller_id: String }

#[derive(Debug, Deserialize)]
pub struct PromoteDraftRequest { pub shipment_id: Option<String>, pub new_shipment: Option<NewShipmentRequest> }

async fn list_drafts(State(s): State<Fulfillment>) -> ApiResult<Json<Vec<DraftOrder>>> { s.drafts.list().await.map(Json).map_err(reject) }

async fn get_draft(State(s): State<Fulfillment>, Path(id): Path<String>) -> ApiResult<Json<DraftOrder>> {
    s.drafts.load(&id).await.map(Json).map_err(reject)
}

async fn create_draft(State(s): State<Fulfillment>, Json(r): Json<CreateDraftRequest>) -> ApiResult<(StatusCode, Json<DraftOrder>)> {
    let draft = s.drafts.create(r.reseller_id, r.note).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(draft)))
}

async fn add_draft_item(State(s): State<Fulfillment>, Path(id): Path<String>, Json(r): Json<OrderItemRequest>) -> ApiResult<Json<DraftOrder>> {
    check(&r)?;
    s.drafts.add_item(&id, &r.product_id, r.quantity, r.unit_price).await.map(Json).map_err(reject)
}

async fn update_draft_item(State(s): State<Fulfillment>, Path((id, product_id)): Path<(String, String)>, Json(r): Json<DraftQuantityRequest>) -> ApiResult<Json<DraftOrder>> {
    s.drafts.update_quantity(&id, &product_id, r.quantity).await.map(Json).map_err(reject)
}

async fn remove_draft_item(State(s): State<Fulfillment>, Path((id, product_id)): Path<(String, String)>) -> ApiResult<Json<DraftOrder>> {
    s.drafts.remove_item(&id, &product_id).await.map(Json).map_err(reject)
}

async fn assign_draft_reseller(State(s): State<Fulfillment>, Path(id): Path<String>, Json(r): Json<AssignResellerRequest>) -> ApiResult<Json<DraftOrder>> {
    check(&r)?;
    s.drafts.assign_reseller(&id, &r.reseller_id).await.map(Json).map_err(reject)
}

async fn delete_draft(State(s): State<Fulfillment>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    s.drafts.delete(&id).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn promote_draft(State(s): State<Fulfillment>, Path(id): Path<String>, Json(r): Json<PromoteDraftRequest>) -> ApiResult<(StatusCode, Json<OutboundOrder>)> {
    let shipment = shipment_link(r.shipment_id, r.new_shipment)?;
    let order = s.drafts.promote(&id, shipment).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(order)))
}

// ---- stock and ledgers ----

#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveStockRequest {
    #[validate(length(min = 1))] pub product_id: String,
    #[validate(range(min = 1))] pub quantity: u32,
    pub status: Option<StockStatus>,
    pub location: Option<String>,
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RemoveStockRequest {
    #[validate(length(min = 1))] pub product_id: String,
    #[validate(range(min = 1))] pub quantity: u32,
}

async fn stock_snapshot(State(s): State<Fulfillment>) -> ApiResult<Json<Vec<StockEntry>>> { s.stock.snapshot().await.map(Json).map_err(reject) }

async fn stock_for_product(State(s): State<Fulfillment>, Path(product_id): Path<String>) -> ApiResult<Json<Vec<StockEntry>>> {
    s.stock.entries(&product_id).await.map(Json).map_err(reject)
}

async fn receive_stock(State(s): State<Fulfillment>, Json(r): Json<ReceiveStockRequest>) -> ApiResult<(StatusCode, Json<StockEntry>)> {
    check(&r)?;
    let status = r.status.unwrap_or(StockStatus::OnHand);
    let row = s.stock.receive(&r.product_id, r.quantity, status, r.location.as_deref(), r.unit_cost).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn remove_stock(State(s): State<Fulfillment>, Json(r): Json<RemoveStockRequest>) -> ApiResult<Json<serde_json::Value>> {
    check(&r)?;
    let removed = s.stock.remove_stock(&r.product_id, r.quantity).await.map_err(reject)?;
    Ok(Json(serde_json::json!({"product_id": r.product_id, "removed": removed})))
}

async fn reseller_positions(State(s): State<Fulfillment>, Path(id): Path<String>) -> ApiResult<Json<Vec<ResellerPosition>>> {
    s.reseller_ledger.positions(&id).await.map(Json).map_err(reject)
}

async fn run_reconciliation(State(s): State<Fulfillment>) -> ApiResult<Json<ReconciliationReport>> {
    s.reconciliation.run_all(&CancellationToken::new()).await.map(Json).map_err(reject)
}

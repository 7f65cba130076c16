//! Application services
//!
//! Each service owns one part of the fulfillment flow and talks to storage only through the
//! ports in [`crate::domain::ports`]. [`Fulfillment`] wires them together over one set of ports.

pub mod drafts;
pub mod orders;
pub mod packer;
pub mod reconciliation;
pub mod reseller_ledger;
pub mod saga;
pub mod shipments;
pub mod stock_ledger;

use std::sync::Arc;
use tracing::warn;
use crate::config::EngineConfig;
use crate::domain::aggregates::OrderLine;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{
    Catalog, DraftRepository, EventPublisher, OrderRepository, ResellerDirectory, ResellerStockRepository, ShipmentRepository,
    StockRepository,
};
use crate::Result;

pub use drafts::DraftService;
pub use orders::{NewOrder, OrderItemInput, OrderService, ShipmentLink};
pub use packer::{PackingConfig, PackingOutcome, PackingProposal, PackingService, ProposalHistory, ShipmentPacker};
pub use reconciliation::{PassReport, Reconciliation, ReconciliationReport};
pub use reseller_ledger::ResellerLedger;
pub use saga::SagaExecutor;
pub use shipments::{NewShipment, ShipmentPatch, ShipmentService};
pub use stock_ledger::{DebitOutcome, StockLedger, StockPolicy};

#[derive(Clone)]
pub struct Ports {
    pub stock: Arc<dyn StockRepository>,
    pub reseller_stock: Arc<dyn ResellerStockRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub shipments: Arc<dyn ShipmentRepository>,
    pub drafts: Arc<dyn DraftRepository>,
    pub catalog: Arc<dyn Catalog>,
    pub resellers: Arc<dyn ResellerDirectory>,
    pub events: Arc<dyn EventPublisher>,
}

impl Ports {
    /// All repositories served by one store.
    pub fn from_store<S>(store: Arc<S>, events: Arc<dyn EventPublisher>) -> Self
    where
        S: StockRepository + ResellerStockRepository + OrderRepository + ShipmentRepository + DraftRepository + Catalog + ResellerDirectory + 'static,
    {
        Self {
            stock: store.clone(),
            reseller_stock: store.clone(),
            orders: store.clone(),
            shipments: store.clone(),
            drafts: store.clone(),
            catalog: store.clone(),
            resellers: store,
            events,
        }
    }
}

/// Every service over one set of ports; cheap to clone into request handlers.
#[derive(Clone)]
pub struct Fulfillment {
    pub config: Arc<EngineConfig>,
    pub stock: StockLedger,
    pub reseller_ledger: ResellerLedger,
    pub packer: PackingService,
    pub orders: OrderService,
    pub shipments: ShipmentService,
    pub drafts: DraftService,
    pub reconciliation: Reconciliation,
}

impl Fulfillment {
    pub fn new(ports: Ports, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let stock = StockLedger::new(ports.stock.clone(), ports.catalog.clone(), ports.events.clone(), StockPolicy::from(config.as_ref()));
        let reseller_ledger = ResellerLedger::new(ports.reseller_stock.clone());
        let saga = SagaExecutor::new(stock.clone(), reseller_ledger.clone(), ports.shipments.clone(), ports.orders.clone());
        let orders = OrderService::new(ports.clone(), stock.clone(), reseller_ledger.clone(), saga, config.clone());
        let shipments = ShipmentService::new(ports.clone(), reseller_ledger.clone(), config.clone());
        let packer = PackingService::new(ports.stock.clone(), ports.catalog.clone(), config.packing.clone(), config.sell_in_transit);
        let drafts = DraftService::new(ports.drafts.clone(), ports.catalog.clone(), ports.resellers.clone(), orders.clone(), config.currency.clone());
        let reconciliation = Reconciliation::new(ports, orders.clone(), shipments.clone(), reseller_ledger.clone(), config.clone());
        Self { config, stock, reseller_ledger, packer, orders, shipments, drafts, reconciliation }
    }
}

/// Publishes best-effort; a bus failure never undoes a committed change.
pub(crate) async fn publish_all(events: &dyn EventPublisher, batch: Vec<DomainEvent>) {
    for event in batch {
        if let Err(e) = events.publish(&event).await {
            warn!(subject = %event.subject(), error = %e, "event publish failed");
        }
    }
}

/// Catalog weight of `lines`, in grams.
pub(crate) async fn declared_weight<'a>(catalog: &dyn Catalog, lines: impl IntoIterator<Item = &'a OrderLine>) -> Result<f64> {
    let mut grams = 0.0;
    for line in lines {
        let product = catalog.product(&line.product_id).await?
            .ok_or_else(|| crate::FulfillmentError::not_found("product", line.product_id.clone()))?;
        grams += product.weight_grams * f64::from(line.quantity);
    }
    Ok(grams)
}

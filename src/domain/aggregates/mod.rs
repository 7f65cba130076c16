//! Aggregates module
pub mod draft;
pub mod journal;
pub mod order;
pub mod product;
pub mod shipment;
pub mod stock;

pub use draft::{DraftLine, DraftOrder};
pub use journal::{JournalIntent, LedgerJournal, Saga, SagaStep};
pub use order::{OrderLine, OrderStatus, OutboundOrder};
pub use product::{Product, Reseller};
pub use shipment::{Shipment, ShipmentStatus};
pub use stock::{ResellerPosition, ResellerStockEntry, ResellerStockKey, StockEntry, StockKey, StockStatus};

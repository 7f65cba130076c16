//! Resale fulfillment engine
//!
//! Keeps the warehouse stock ledger, outbound orders, shipments and the reseller-side ledger
//! consistent without a cross-entity transaction, and packs shipments to a weight target.
//!
//! ## Features
//! - Stock ledger with optimistic debits and backorder exceptions
//! - Reseller ledger tracking in-transit vs on-hand stock
//! - Weight-constrained shipment packer with category quotas
//! - Saga-driven order and shipment lifecycles
//! - Idempotent reconciliation passes

pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod services;

use thiserror::Error;

pub use domain::value_objects::MoneyError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: String, requested: u32, available: u32 },

    #[error("Invalid {entity} transition for {id}: {from} -> {to}")]
    InvalidStateTransition { entity: &'static str, id: String, from: String, to: String },

    #[error("Weight mismatch: declared {declared_grams:.2}g, items sum to {computed_grams:.2}g (epsilon {epsilon_grams}g)")]
    WeightConstraintViolation { declared_grams: f64, computed_grams: f64, epsilon_grams: f64 },

    #[error("{entity} {id} references missing {missing}")]
    ReferentialIntegrityViolation { entity: &'static str, id: String, missing: String },

    #[error("Packing infeasible: {0}")]
    PackingInfeasible(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Concurrent modification of {entity} {id}")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("Compensation failed for order {order_id} at step {step}: {reason} (original failure: {original})")]
    CompensationFailed { order_id: String, step: String, reason: String, original: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Publish error: {0}")]
    Publish(String),
}

impl FulfillmentError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self { Self::NotFound { entity, id: id.into() } }

    /// True for failures raised before any write happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InsufficientStock { .. }
                | Self::InvalidStateTransition { .. }
                | Self::WeightConstraintViolation { .. }
                | Self::ReferentialIntegrityViolation { .. }
                | Self::Validation(_)
                | Self::NotFound { .. }
        )
    }
}

impl From<MoneyError> for FulfillmentError {
    fn from(e: MoneyError) -> Self { Self::Validation(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, FulfillmentError>;

mod common;

use common::*;
use resale_fulfillment::config::EngineConfig;
use resale_fulfillment::domain::ports::ShipmentRepository;
use resale_fulfillment::infrastructure::LogPublisher;
use resale_fulfillment::services::packer::{CategoryQuota, InfeasibleReason, ProposalQuality};
use resale_fulfillment::services::{Fulfillment, PackingConfig, PackingOutcome, Ports};
use resale_fulfillment::FulfillmentError;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn test_pack_takes_everything_when_stock_is_light() {
    let (_store, app) = app().await;
    let outcome = app.packer.pack(&HashSet::new(), Some(7)).await.unwrap();

    let proposal = outcome.proposal().unwrap();
    // three of each under the per-SKU cap is 2850g, short of the band
    assert_eq!(proposal.quality, ProposalQuality::Approximate);
    assert_eq!(proposal.total_weight_grams, 2850.0);
    assert_eq!(proposal.units(), 6);
    assert!(proposal.product_ids().all(|p| p != CHARGER));
}

#[tokio::test]
async fn test_pack_is_repeatable_for_a_seed() {
    let (_store, app) = app().await;
    let a = app.packer.pack(&HashSet::new(), Some(42)).await.unwrap();
    let b = app.packer.pack(&HashSet::new(), Some(42)).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_regenerate_skips_previous_products() {
    let (_store, app) = app().await;
    let excluded: HashSet<String> = [VITAMINS.to_string()].into();
    let first = app.packer.pack(&excluded, Some(1)).await.unwrap().into_proposal().unwrap();
    assert_eq!(first.product_ids().collect::<Vec<_>>(), vec![BOOTS]);

    let next = app.packer.regenerate(&first, &excluded, Some(2)).await.unwrap();
    assert_eq!(next, PackingOutcome::Infeasible(InfeasibleReason::NoEligibleStock));
}

#[tokio::test]
async fn test_unreachable_category_minimum_is_infeasible() {
    let store = seeded_store().await;
    let packing = PackingConfig { quotas: vec![CategoryQuota { category: "footwear".into(), min: 4, max: None }], ..PackingConfig::default() };
    let app = Fulfillment::new(Ports::from_store(store, Arc::new(LogPublisher)), EngineConfig { packing, ..test_config() });

    let outcome = app.packer.pack(&HashSet::new(), Some(3)).await.unwrap();
    assert_eq!(outcome, PackingOutcome::Infeasible(InfeasibleReason::CategoryMinimum { category: "footwear".into(), required: 4, reachable: 3 }));
    assert!(matches!(outcome.into_proposal(), Err(FulfillmentError::PackingInfeasible(_))));
}

#[tokio::test]
async fn test_accepted_proposal_becomes_order_and_parcel() {
    let (store, app) = app().await;
    let proposal = app.packer.pack(&HashSet::new(), Some(9)).await.unwrap().into_proposal().unwrap();

    let order = app.orders.create_from_proposal(LAGOS, &proposal, Decimal::new(25, 0)).await.unwrap();

    assert_eq!(on_hand(&store, BOOTS).await, 7);
    assert_eq!(on_hand(&store, VITAMINS).await, 2);
    let shipment = ShipmentRepository::get(&*store, order.shipment_ref().unwrap()).await.unwrap().unwrap();
    assert_eq!(shipment.weight_grams(), 2850.0);
    assert_eq!(shipment.recipient_id(), Some(LAGOS));
}

#[tokio::test]
async fn test_tampered_proposal_weight_is_rejected() {
    let (store, app) = app().await;
    let mut proposal = app.packer.pack(&HashSet::new(), Some(9)).await.unwrap().into_proposal().unwrap();
    proposal.total_weight_grams += 100.0;

    let err = app.orders.create_from_proposal(LAGOS, &proposal, Decimal::ZERO).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::WeightConstraintViolation { .. }));
    assert_eq!(on_hand(&store, BOOTS).await, 10);
}

#[test]
fn test_example_packing_profile_loads() {
    let config = PackingConfig::from_file("config/packing.example.toml").unwrap();
    assert_eq!(config.per_sku_cap, 3);
    assert_eq!(config.quota("footwear").map(|q| q.min), Some(2));
}

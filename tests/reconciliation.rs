mod common;

use common::*;
use resale_fulfillment::domain::aggregates::{JournalIntent, OrderStatus, Reseller, ShipmentStatus};
use resale_fulfillment::domain::ports::{OrderRepository, ShipmentRepository};
use resale_fulfillment::services::{NewOrder, NewShipment, OrderItemInput, ShipmentLink};
use tokio_util::sync::CancellationToken;

fn unlinked(name: &str) -> NewShipment {
    NewShipment { recipient_name: Some(name.to_string()), weight_grams: 700.0, ..NewShipment::default() }
}

fn for_reseller(reseller_id: &str, weight_grams: f64) -> NewShipment {
    NewShipment { recipient_id: Some(reseller_id.to_string()), weight_grams, tracking_number: Some(format!("1Z-{reseller_id}")), ..NewShipment::default() }
}

fn boots(quantity: u32, shipment: ShipmentLink) -> NewOrder {
    NewOrder { reseller_id: LAGOS.to_string(), items: vec![OrderItemInput::new(BOOTS, quantity)], shipment }
}

#[tokio::test]
async fn test_backfill_links_unique_name_match() {
    let (_store, app) = app().await;
    let shipment = app.shipments.create(unlinked("  lagos bay TRADERS")).await.unwrap();

    let report = app.reconciliation.backfill_missing_links(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.corrected, 1);
    assert_eq!(app.shipments.get(shipment.id()).await.unwrap().recipient_id(), Some(LAGOS));

    let again = app.reconciliation.backfill_missing_links(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.corrected, 0);
}

#[tokio::test]
async fn test_backfill_reports_ambiguous_names() {
    let (store, app) = app().await;
    store.add_reseller(Reseller::new("R-lagos-2", "Lagos Bay Traders")).await;
    let shipment = app.shipments.create(unlinked("Lagos Bay Traders")).await.unwrap();

    let report = app.reconciliation.backfill_missing_links(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.corrected, 0);
    assert_eq!(report.findings.len(), 1);
    assert!(app.shipments.get(shipment.id()).await.unwrap().recipient_id().is_none());
}

#[tokio::test]
async fn test_orphan_order_joins_nearest_shipment() {
    let (_store, app) = app().await;
    let orphan = app.orders.create(boots(1, ShipmentLink::None)).await.unwrap();
    let shipment = app.shipments.create(for_reseller(LAGOS, 700.0)).await.unwrap();
    app.shipments.create(for_reseller(ACCRA, 700.0)).await.unwrap();

    let report = app.reconciliation.associate_orphans(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.corrected, 1);
    assert_eq!(app.orders.get(orphan.id()).await.unwrap().shipment_ref(), Some(shipment.id()));
}

#[tokio::test]
async fn test_orphan_outside_window_stays_unlinked() {
    let (store, app) = app().await;
    let orphan = app.orders.create(boots(1, ShipmentLink::None)).await.unwrap();
    let old = app.shipments.create(for_reseller(LAGOS, 700.0)).await.unwrap()
        .with_created_at(chrono::Utc::now() - chrono::Duration::days(3));
    ShipmentRepository::save(&*store, &old).await.unwrap();

    let report = app.reconciliation.associate_orphans(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.corrected, 0);
    assert!(app.orders.get(orphan.id()).await.unwrap().shipment_ref().is_none());
}

#[tokio::test]
async fn test_orphan_skips_returned_shipment() {
    let (_store, app) = app().await;
    let orphan = app.orders.create(boots(1, ShipmentLink::None)).await.unwrap();
    let returned = app.shipments.create(for_reseller(LAGOS, 700.0)).await.unwrap();
    app.shipments.change_status(returned.id(), ShipmentStatus::Returned).await.unwrap();

    let report = app.reconciliation.associate_orphans(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.corrected, 0);
    assert!(app.orders.get(orphan.id()).await.unwrap().shipment_ref().is_none());
}

#[tokio::test]
async fn test_in_transit_and_delivered_propagate_from_shipments() {
    let (store, app) = app().await;
    let order = app.orders.create(boots(2, ShipmentLink::New(for_reseller(LAGOS, 1400.0)))).await.unwrap();
    let shipment_id = order.shipment_ref().unwrap().to_string();

    // shipment moved by the carrier feed without going through the service
    let mut shipment = ShipmentRepository::get(&*store, &shipment_id).await.unwrap().unwrap();
    shipment.transition(ShipmentStatus::InTransit).unwrap();
    ShipmentRepository::save(&*store, &shipment).await.unwrap();

    let report = app.reconciliation.propagate_in_transit(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.corrected, 1);
    assert_eq!(app.orders.get(order.id()).await.unwrap().status(), OrderStatus::InTransit);

    shipment.transition(ShipmentStatus::Delivered).unwrap();
    ShipmentRepository::save(&*store, &shipment).await.unwrap();

    let report = app.reconciliation.propagate_delivered(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.corrected, 1);
    assert_eq!(app.orders.get(order.id()).await.unwrap().status(), OrderStatus::Delivered);
    assert_eq!(app.reseller_ledger.positions(LAGOS).await.unwrap()[0].on_hand, 2);
}

#[tokio::test]
async fn test_interrupted_cancel_is_resumed() {
    let (store, app) = app().await;
    let created = app.orders.create(boots(3, ShipmentLink::None)).await.unwrap();

    // a cancel that crashed right after writing its journal
    let mut order = OrderRepository::get(&*store, created.id()).await.unwrap().unwrap();
    let plan = order.revert_plan();
    order.begin_journal(JournalIntent::Cancel, plan).unwrap();
    OrderRepository::save(&*store, &order).await.unwrap();

    let report = app.reconciliation.resume_journals(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.corrected, 1);
    let resumed = app.orders.get(created.id()).await.unwrap();
    assert!(resumed.journal().is_none());
    assert_eq!(resumed.status(), OrderStatus::Cancelled);
    assert_eq!(on_hand(&store, BOOTS).await, 10);
}

#[tokio::test]
async fn test_dangling_shipment_reference_is_reported() {
    let (store, app) = app().await;
    let order = app.orders.create(boots(1, ShipmentLink::New(NewShipment { weight_grams: 700.0, ..NewShipment::default() }))).await.unwrap();
    ShipmentRepository::delete(&*store, order.shipment_ref().unwrap()).await.unwrap();

    let report = app.reconciliation.check_integrity(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.corrected, 0);
}

#[tokio::test]
async fn test_second_run_writes_nothing() {
    let (store, app) = app().await;
    app.shipments.create(unlinked("Accra Market Co")).await.unwrap();
    app.orders.create(boots(1, ShipmentLink::None)).await.unwrap();
    let delivered = app.orders.create(boots(2, ShipmentLink::New(for_reseller(LAGOS, 1400.0)))).await.unwrap();
    let mut shipment = ShipmentRepository::get(&*store, delivered.shipment_ref().unwrap()).await.unwrap().unwrap();
    shipment.transition(ShipmentStatus::InTransit).unwrap();
    shipment.transition(ShipmentStatus::Delivered).unwrap();
    ShipmentRepository::save(&*store, &shipment).await.unwrap();

    let first = app.reconciliation.run_all(&CancellationToken::new()).await.unwrap();
    assert!(first.corrected() > 0);
    assert_eq!(first.failures(), 0);

    let writes = store.writes();
    let second = app.reconciliation.run_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.corrected(), 0);
    assert_eq!(store.writes(), writes);
}

#[tokio::test]
async fn test_cancelled_run_stops_early() {
    let (_store, app) = app().await;
    app.shipments.create(unlinked("Lagos Bay Traders")).await.unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let report = app.reconciliation.run_all(&token).await.unwrap();
    assert!(report.cancelled());
    assert_eq!(report.corrected(), 0);
}

//! Reconciliation passes
//!
//! Each pass reads everything it needs, diffs it against what the records imply, and writes
//! only the corrections. Running a pass twice makes no further writes. Drift is logged and
//! counted, never returned as an error. Passes check the cancellation token between entities.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::config::EngineConfig;
use crate::domain::aggregates::{OrderStatus, ShipmentStatus};
use crate::domain::events::{DomainEvent, ReconciliationEvent};
use crate::{FulfillmentError, Result};
use super::{publish_all, OrderService, Ports, ResellerLedger, ShipmentService};

#[derive(Clone, Debug, Default, Serialize)]
pub struct PassReport {
    pub pass: &'static str,
    pub examined: usize,
    pub corrected: usize,
    pub failures: usize,
    /// Problems worth a human look that the pass does not fix.
    pub findings: Vec<String>,
    pub cancelled: bool,
}

impl PassReport {
    fn new(pass: &'static str) -> Self { Self { pass, ..Self::default() } }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ReconciliationReport { pub passes: Vec<PassReport> }

impl ReconciliationReport {
    pub fn corrected(&self) -> usize { self.passes.iter().map(|p| p.corrected).sum() }
    pub fn failures(&self) -> usize { self.passes.iter().map(|p| p.failures).sum() }
    pub fn findings(&self) -> impl Iterator<Item = &String> { self.passes.iter().flat_map(|p| p.findings.iter()) }
    pub fn cancelled(&self) -> bool { self.passes.iter().any(|p| p.cancelled) }
}

#[derive(Clone)]
pub struct Reconciliation {
    ports: Ports,
    orders: OrderService,
    shipments: ShipmentService,
    resellers: ResellerLedger,
    config: Arc<EngineConfig>,
}

impl Reconciliation {
    pub fn new(ports: Ports, orders: OrderService, shipments: ShipmentService, resellers: ResellerLedger, config: Arc<EngineConfig>) -> Self {
        Self { ports, orders, shipments, resellers, config }
    }

    pub async fn run_all(&self, cancel: &CancellationToken) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        // journals first so the remaining passes see settled orders
        report.passes.push(self.resume_journals(cancel).await?);
        if !report.cancelled() { report.passes.push(self.backfill_missing_links(cancel).await?); }
        if !report.cancelled() { report.passes.push(self.associate_orphans(cancel).await?); }
        if !report.cancelled() { report.passes.push(self.propagate_in_transit(cancel).await?); }
        if !report.cancelled() { report.passes.push(self.propagate_delivered(cancel).await?); }
        if !report.cancelled() { report.passes.push(self.check_integrity(cancel).await?); }
        info!(corrected = report.corrected(), failures = report.failures(), cancelled = report.cancelled(), "reconciliation finished");
        Ok(report)
    }

    /// Links shipments without a recipient id to the one reseller whose name matches.
    pub async fn backfill_missing_links(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let mut report = PassReport::new("backfill_missing_links");
        let resellers = self.ports.resellers.resellers().await?;
        for mut shipment in self.ports.shipments.list().await? {
            if cancel.is_cancelled() { report.cancelled = true; break; }
            if shipment.recipient_id().is_some() { continue; }
            report.examined += 1;
            let matches: Vec<_> = resellers.iter().filter(|r| r.matches_name(shipment.recipient_name())).collect();
            match matches.as_slice() {
                [only] => {
                    shipment.link_recipient(only.id.clone());
                    match self.ports.shipments.save(&shipment).await {
                        Ok(()) => self.corrected(&mut report, shipment.id(), format!("recipient linked to reseller {}", only.id)).await,
                        Err(e) => self.failed(&mut report, shipment.id(), e),
                    }
                }
                [] => {}
                many => report.findings.push(format!("shipment {}: recipient {:?} matches {} resellers", shipment.id(), shipment.recipient_name(), many.len())),
            }
        }
        Ok(report)
    }

    /// Gives orders without a shipment the closest-in-time shipment to the same reseller.
    /// Returned parcels are never candidates.
    pub async fn associate_orphans(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let mut report = PassReport::new("associate_orphans");
        let window = Duration::hours(self.config.match_window_hours);
        let shipments = self.ports.shipments.list().await?;
        for mut order in self.ports.orders.list().await? {
            if cancel.is_cancelled() { report.cancelled = true; break; }
            if order.shipment_ref().is_some() || order.status() == OrderStatus::Cancelled || order.journal().is_some() { continue; }
            report.examined += 1;
            let best = shipments.iter()
                .filter(|s| s.recipient_id() == Some(order.reseller_id()) && s.status() != ShipmentStatus::Returned)
                .map(|s| (s, (s.created_at() - order.created_at()).abs()))
                .filter(|(_, gap)| *gap < window)
                .min_by_key(|(_, gap)| *gap);
            let Some((shipment, _)) = best else { continue };
            order.link_shipment(shipment.id());
            match self.ports.orders.save(&order).await {
                Ok(()) => self.corrected(&mut report, order.id(), format!("linked to shipment {}", shipment.id())).await,
                Err(e) => self.failed(&mut report, order.id(), e),
            }
        }
        Ok(report)
    }

    /// Pending orders whose shipment is already moving advance to in-transit.
    pub async fn propagate_in_transit(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let mut report = PassReport::new("propagate_in_transit");
        let statuses = self.shipment_statuses().await?;
        for mut order in self.ports.orders.list().await? {
            if cancel.is_cancelled() { report.cancelled = true; break; }
            if order.status() != OrderStatus::Pending || order.journal().is_some() { continue; }
            let Some(shipment_id) = order.shipment_ref().map(str::to_string) else { continue };
            report.examined += 1;
            if statuses.get(&shipment_id) != Some(&ShipmentStatus::InTransit) { continue; }
            let result = match order.transition(OrderStatus::InTransit) {
                Ok(()) => self.ports.orders.save(&order).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    publish_all(self.ports.events.as_ref(), order.take_events()).await;
                    self.corrected(&mut report, order.id(), format!("in transit with shipment {shipment_id}")).await;
                }
                Err(e) => self.failed(&mut report, order.id(), e),
            }
        }
        Ok(report)
    }

    /// Replays the delivery handler for delivered shipments, then settles reseller stock of
    /// any delivered or received order still showing units in transit.
    pub async fn propagate_delivered(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let mut report = PassReport::new("propagate_delivered");
        for shipment in self.ports.shipments.list().await? {
            if cancel.is_cancelled() { report.cancelled = true; return Ok(report); }
            if shipment.status() != ShipmentStatus::Delivered { continue; }
            report.examined += 1;
            match self.shipments.handle_delivered(shipment.id()).await {
                Ok(delivery) if delivery.changed() => {
                    self.corrected(&mut report, shipment.id(), format!("{} orders delivered, {} rows settled", delivery.orders_delivered, delivery.rows_settled)).await;
                }
                Ok(_) => {}
                Err(e) => self.failed(&mut report, shipment.id(), e),
            }
        }
        for order in self.ports.orders.list().await? {
            if cancel.is_cancelled() { report.cancelled = true; break; }
            if !matches!(order.status(), OrderStatus::Delivered | OrderStatus::Received) { continue; }
            report.examined += 1;
            match self.resellers.settle_order(order.id()).await {
                Ok(0) => {}
                Ok(rows) => self.corrected(&mut report, order.id(), format!("{rows} reseller rows settled")).await,
                Err(e) => self.failed(&mut report, order.id(), e),
            }
        }
        Ok(report)
    }

    /// Rolls interrupted order sagas forward, or through their compensation.
    pub async fn resume_journals(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let mut report = PassReport::new("resume_journals");
        let cutoff = Utc::now() - Duration::seconds(self.config.stale_journal_secs);
        for order in self.ports.orders.list().await? {
            if cancel.is_cancelled() { report.cancelled = true; break; }
            let Some(journal) = order.journal() else { continue };
            if journal.started_at > cutoff { continue; }
            report.examined += 1;
            match self.orders.resume(order.id()).await {
                Ok(_) => self.corrected(&mut report, order.id(), format!("{} journal resumed", journal.intent.name())).await,
                // the saga rolled back cleanly; the journal is gone
                Err(e) if e.is_validation() => {
                    report.findings.push(format!("order {}: {} rolled back: {e}", order.id(), journal.intent.name()));
                    self.corrected(&mut report, order.id(), format!("{} journal rolled back", journal.intent.name())).await;
                }
                Err(e) => self.failed(&mut report, order.id(), e),
            }
        }
        Ok(report)
    }

    /// Reports orders that point at shipments which no longer exist. Nothing is written.
    pub async fn check_integrity(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let mut report = PassReport::new("check_integrity");
        let statuses = self.shipment_statuses().await?;
        for order in self.ports.orders.list().await? {
            if cancel.is_cancelled() { report.cancelled = true; break; }
            let Some(shipment_id) = order.shipment_ref() else { continue };
            report.examined += 1;
            if !statuses.contains_key(shipment_id) {
                let violation = FulfillmentError::ReferentialIntegrityViolation { entity: "order", id: order.id().to_string(), missing: format!("shipment {shipment_id}") };
                warn!(order_id = %order.id(), shipment_id, "{violation}");
                report.findings.push(violation.to_string());
            }
        }
        Ok(report)
    }

    async fn shipment_statuses(&self) -> Result<HashMap<String, ShipmentStatus>> {
        Ok(self.ports.shipments.list().await?.into_iter().map(|s| (s.id().to_string(), s.status())).collect())
    }

    async fn corrected(&self, report: &mut PassReport, entity_id: &str, detail: String) {
        info!(pass = report.pass, entity_id, %detail, "reconciliation correction");
        report.corrected += 1;
        let event = ReconciliationEvent { pass: report.pass.to_string(), entity_id: entity_id.to_string(), detail };
        publish_all(self.ports.events.as_ref(), vec![DomainEvent::Reconciliation(event)]).await;
    }

    fn failed(&self, report: &mut PassReport, entity_id: &str, error: FulfillmentError) {
        warn!(pass = report.pass, entity_id, %error, "reconciliation correction failed");
        report.failures += 1;
    }
}

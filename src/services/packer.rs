//! Weight-constrained shipment packer
//!
//! Fills a parcel to a target weight from available stock under per-category quotas and a
//! per-SKU repeat cap. Candidates are shuffled with an explicit seed, so a given seed, stock
//! list and exclusion set always produce the same proposal.
//!
//! Packing runs in two phases:
//! 1. every quota with a minimum is satisfied first, round-robin over its category; if a
//!    minimum cannot be met the result is [`PackingOutcome::Infeasible`], never a partial parcel
//! 2. units are added in rotation until the weight lands in the tolerance band or nothing
//!    else fits, preferring a unit that lands in the band outright

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use crate::domain::aggregates::{Product, StockEntry, StockStatus};
use crate::domain::ports::{Catalog, StockRepository};
use crate::domain::value_objects::{WeightBand, DEFAULT_TARGET_GRAMS, DEFAULT_TOLERANCE_GRAMS};
use crate::{FulfillmentError, Result};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingConfig {
    pub target_grams: f64,
    pub tolerance_grams: f64,
    /// Most units of a single product one parcel may carry.
    pub per_sku_cap: u32,
    pub quotas: Vec<CategoryQuota>,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self { target_grams: DEFAULT_TARGET_GRAMS, tolerance_grams: DEFAULT_TOLERANCE_GRAMS, per_sku_cap: 3, quotas: vec![] }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryQuota {
    pub category: String,
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub max: Option<u32>,
}

impl PackingConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| FulfillmentError::Validation(format!("packing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FulfillmentError::Validation(format!("cannot read packing config {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_grams > 0.0) { return Err(FulfillmentError::Validation("target_grams must be positive".into())); }
        if self.tolerance_grams < 0.0 { return Err(FulfillmentError::Validation("tolerance_grams must not be negative".into())); }
        if self.per_sku_cap == 0 { return Err(FulfillmentError::Validation("per_sku_cap must be at least 1".into())); }
        let mut seen = HashSet::new();
        for q in &self.quotas {
            if !seen.insert(q.category.as_str()) {
                return Err(FulfillmentError::Validation(format!("duplicate quota for category {}", q.category)));
            }
            if let Some(max) = q.max {
                if q.min > max { return Err(FulfillmentError::Validation(format!("quota {}: min {} exceeds max {max}", q.category, q.min))); }
            }
        }
        Ok(())
    }

    pub fn band(&self) -> WeightBand { WeightBand::new(self.target_grams, self.tolerance_grams) }

    pub fn quota(&self, category: &str) -> Option<&CategoryQuota> { self.quotas.iter().find(|q| q.category == category) }
}

// =============================================================================
// Proposals
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackingItem {
    pub product_id: String,
    pub category: String,
    pub quantity: u32,
    pub unit_weight_grams: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalQuality {
    /// Weight inside the tolerance band.
    Optimal,
    /// Below the band; no eligible unit could be added without overshooting it.
    Approximate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackingProposal {
    pub items: Vec<PackingItem>,
    pub total_weight_grams: f64,
    pub quality: ProposalQuality,
    pub seed: u64,
}

impl PackingProposal {
    pub fn product_ids(&self) -> impl Iterator<Item = &str> { self.items.iter().map(|i| i.product_id.as_str()) }
    pub fn units(&self) -> u32 { self.items.iter().map(|i| i.quantity).sum() }
    pub fn units_in(&self, category: &str) -> u32 { self.items.iter().filter(|i| i.category == category).map(|i| i.quantity).sum() }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InfeasibleReason {
    NoEligibleStock,
    CategoryMinimum { category: String, required: u32, reachable: u32 },
}

impl fmt::Display for InfeasibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEligibleStock => f.write_str("no eligible stock"),
            Self::CategoryMinimum { category, required, reachable } => {
                write!(f, "category {category} needs {required} units, only {reachable} fit")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PackingOutcome {
    Packed(PackingProposal),
    Infeasible(InfeasibleReason),
}

impl PackingOutcome {
    pub fn proposal(&self) -> Option<&PackingProposal> {
        match self { Self::Packed(p) => Some(p), Self::Infeasible(_) => None }
    }

    pub fn into_proposal(self) -> Result<PackingProposal> {
        match self {
            Self::Packed(p) => Ok(p),
            Self::Infeasible(reason) => Err(FulfillmentError::PackingInfeasible(reason.to_string())),
        }
    }
}

/// Proposals an operator has been shown, so one can be picked without recomputing.
#[derive(Clone, Debug, Default)]
pub struct ProposalHistory { proposals: Vec<PackingProposal> }

impl ProposalHistory {
    pub fn new() -> Self { Self::default() }
    pub fn push(&mut self, proposal: PackingProposal) -> usize { self.proposals.push(proposal); self.proposals.len() - 1 }
    pub fn list(&self) -> &[PackingProposal] { &self.proposals }
    pub fn pick(&self, index: usize) -> Option<&PackingProposal> { self.proposals.get(index) }
    pub fn latest(&self) -> Option<&PackingProposal> { self.proposals.last() }
    pub fn len(&self) -> usize { self.proposals.len() }
    pub fn is_empty(&self) -> bool { self.proposals.is_empty() }

    /// Every product any earlier proposal used.
    pub fn exclusions(&self) -> HashSet<String> {
        self.proposals.iter().flat_map(|p| p.product_ids().map(str::to_string)).collect()
    }
}

// =============================================================================
// Packer
// =============================================================================

struct Candidate {
    product_id: String,
    category: String,
    unit_weight: f64,
    limit: u32,
}

struct Fill<'a> {
    config: &'a PackingConfig,
    pool: Vec<Candidate>,
    taken: Vec<u32>,
    per_category: HashMap<String, u32>,
    weight: f64,
    cursor: usize,
}

impl<'a> Fill<'a> {
    fn new(config: &'a PackingConfig, pool: Vec<Candidate>) -> Self {
        let taken = vec![0; pool.len()];
        Self { config, pool, taken, per_category: HashMap::new(), weight: 0.0, cursor: 0 }
    }

    fn units_in(&self, category: &str) -> u32 { self.per_category.get(category).copied().unwrap_or(0) }

    fn can_add(&self, i: usize) -> bool {
        let c = &self.pool[i];
        let under_max = self.config.quota(&c.category).and_then(|q| q.max).map_or(true, |max| self.units_in(&c.category) < max);
        self.taken[i] < c.limit && under_max && self.weight + c.unit_weight <= self.config.band().upper()
    }

    /// First addable candidate at or after the cursor, in rotation, that also passes `want`.
    fn next(&self, want: impl Fn(&Candidate, f64) -> bool) -> Option<usize> {
        let n = self.pool.len();
        (0..n).map(|k| (self.cursor + k) % n)
            .find(|&i| self.can_add(i) && want(&self.pool[i], self.weight + self.pool[i].unit_weight))
    }

    fn take(&mut self, i: usize) {
        let c = &self.pool[i];
        self.taken[i] += 1;
        self.weight += c.unit_weight;
        *self.per_category.entry(c.category.clone()).or_default() += 1;
        self.cursor = (i + 1) % self.pool.len();
    }

    fn into_items(self) -> Vec<PackingItem> {
        self.pool.into_iter().zip(self.taken).filter(|(_, q)| *q > 0).map(|(c, quantity)| PackingItem {
            product_id: c.product_id, category: c.category, quantity, unit_weight_grams: c.unit_weight,
        }).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShipmentPacker { config: PackingConfig }

impl ShipmentPacker {
    pub fn new(config: PackingConfig) -> Self { Self { config } }
    pub fn config(&self) -> &PackingConfig { &self.config }

    pub fn pack(&self, stock: &[StockEntry], products: &[Product], excluded: &HashSet<String>, seed: u64) -> PackingOutcome {
        let band = self.config.band();
        let mut pool = self.candidates(stock, products, excluded, band.upper());
        if pool.is_empty() { return PackingOutcome::Infeasible(InfeasibleReason::NoEligibleStock); }
        pool.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut fill = Fill::new(&self.config, pool);
        for quota in self.config.quotas.iter().filter(|q| q.min > 0) {
            while fill.units_in(&quota.category) < quota.min {
                match fill.next(|c, _| c.category == quota.category) {
                    Some(i) => fill.take(i),
                    None => {
                        let reachable = fill.units_in(&quota.category);
                        debug!(category = %quota.category, required = quota.min, reachable, seed, "category minimum unreachable");
                        return PackingOutcome::Infeasible(InfeasibleReason::CategoryMinimum { category: quota.category.clone(), required: quota.min, reachable });
                    }
                }
            }
        }

        while !band.contains(fill.weight) {
            let pick = fill.next(|_, after| band.contains(after)).or_else(|| fill.next(|_, _| true));
            match pick { Some(i) => fill.take(i), None => break }
        }

        let items = fill.into_items();
        if items.is_empty() { return PackingOutcome::Infeasible(InfeasibleReason::NoEligibleStock); }
        let total_weight_grams: f64 = items.iter().map(|i| i.unit_weight_grams * f64::from(i.quantity)).sum();
        let quality = if band.contains(total_weight_grams) { ProposalQuality::Optimal } else { ProposalQuality::Approximate };
        debug!(seed, units = items.iter().map(|i| i.quantity).sum::<u32>(), total_weight_grams, gap = band.gap(total_weight_grams), ?quality, "packed proposal");
        PackingOutcome::Packed(PackingProposal { items, total_weight_grams, quality, seed })
    }

    /// Packs again without any product the previous proposal used.
    pub fn regenerate(&self, previous: &PackingProposal, stock: &[StockEntry], products: &[Product], excluded: &HashSet<String>, seed: u64) -> PackingOutcome {
        let mut excluded = excluded.clone();
        excluded.extend(previous.product_ids().map(str::to_string));
        self.pack(stock, products, &excluded, seed)
    }

    fn candidates(&self, stock: &[StockEntry], products: &[Product], excluded: &HashSet<String>, ceiling: f64) -> Vec<Candidate> {
        let mut units: BTreeMap<&str, u32> = BTreeMap::new();
        for entry in stock { *units.entry(entry.product_id.as_str()).or_default() += entry.quantity; }
        let catalog: HashMap<&str, &Product> = products.iter().map(|p| (p.id.as_str(), p)).collect();
        units.into_iter()
            .filter(|(id, qty)| *qty > 0 && !excluded.contains(*id))
            .filter_map(|(id, qty)| catalog.get(id).map(|p| (*p, qty)))
            .filter(|(p, _)| p.is_packable() && p.weight_grams <= ceiling)
            .map(|(p, qty)| Candidate {
                product_id: p.id.clone(), category: p.category.clone(), unit_weight: p.weight_grams, limit: qty.min(self.config.per_sku_cap),
            })
            .collect()
    }
}

/// Packs against the live stock ledger and catalog.
#[derive(Clone)]
pub struct PackingService {
    stock: Arc<dyn StockRepository>,
    catalog: Arc<dyn Catalog>,
    packer: ShipmentPacker,
    sell_in_transit: bool,
}

impl PackingService {
    pub fn new(stock: Arc<dyn StockRepository>, catalog: Arc<dyn Catalog>, config: PackingConfig, sell_in_transit: bool) -> Self {
        Self { stock, catalog, packer: ShipmentPacker::new(config), sell_in_transit }
    }

    pub fn config(&self) -> &PackingConfig { self.packer.config() }

    pub async fn pack(&self, excluded: &HashSet<String>, seed: Option<u64>) -> Result<PackingOutcome> {
        let (stock, products) = self.inputs().await?;
        Ok(self.packer.pack(&stock, &products, excluded, seed.unwrap_or_else(rand::random)))
    }

    pub async fn regenerate(&self, previous: &PackingProposal, excluded: &HashSet<String>, seed: Option<u64>) -> Result<PackingOutcome> {
        let (stock, products) = self.inputs().await?;
        Ok(self.packer.regenerate(previous, &stock, &products, excluded, seed.unwrap_or_else(rand::random)))
    }

    async fn inputs(&self) -> Result<(Vec<StockEntry>, Vec<Product>)> {
        let stock = self.stock.all().await?.into_iter()
            .filter(|e| e.status == StockStatus::OnHand || (self.sell_in_transit && e.status == StockStatus::InTransit))
            .collect();
        Ok((stock, self.catalog.products().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use crate::domain::value_objects::Money;

    fn product(id: &str, category: &str, grams: f64) -> Product { Product::new(id, id, category, grams, Money::usd(Decimal::ONE)) }
    fn on_hand(id: &str, qty: u32) -> StockEntry { StockEntry::new(id, StockStatus::OnHand, "main").with_quantity(qty) }

    fn quota(category: &str, min: u32, max: Option<u32>) -> CategoryQuota { CategoryQuota { category: category.into(), min, max } }

    #[test]
    fn test_same_seed_same_proposal() {
        let packer = ShipmentPacker::new(PackingConfig { target_grams: 1000.0, tolerance_grams: 5.0, per_sku_cap: 5, quotas: vec![] });
        let products = vec![product("A", "x", 100.0), product("B", "x", 200.0), product("C", "y", 50.0)];
        let stock = vec![on_hand("A", 5), on_hand("B", 5), on_hand("C", 5)];
        let none = HashSet::new();
        assert_eq!(packer.pack(&stock, &products, &none, 7), packer.pack(&stock, &products, &none, 7));
    }

    #[test]
    fn test_respects_band_and_quotas() {
        let config = PackingConfig { per_sku_cap: 100, quotas: vec![quota("footwear", 2, Some(3)), quota("vitamins", 0, Some(4))], ..PackingConfig::default() };
        let packer = ShipmentPacker::new(config);
        let products = vec![product("A", "footwear", 700.0), product("B", "vitamins", 250.0), product("C", "filler", 10.0)];
        let stock = vec![on_hand("A", 5), on_hand("B", 10), on_hand("C", 200)];
        for seed in 0..50 {
            let proposal = packer.pack(&stock, &products, &HashSet::new(), seed).into_proposal().unwrap();
            assert_eq!(proposal.quality, ProposalQuality::Optimal, "seed {seed}");
            assert!(packer.config().band().contains(proposal.total_weight_grams));
            assert!((2..=3).contains(&proposal.units_in("footwear")));
            assert!(proposal.units_in("vitamins") <= 4);
        }
    }

    #[test]
    fn test_unreachable_minimum_is_infeasible() {
        let config = PackingConfig { quotas: vec![quota("footwear", 2, None)], ..PackingConfig::default() };
        let packer = ShipmentPacker::new(config);
        let products = vec![product("A", "footwear", 700.0), product("B", "vitamins", 250.0)];
        let stock = vec![on_hand("A", 1), on_hand("B", 10)];
        let outcome = packer.pack(&stock, &products, &HashSet::new(), 1);
        assert_eq!(outcome, PackingOutcome::Infeasible(InfeasibleReason::CategoryMinimum { category: "footwear".into(), required: 2, reachable: 1 }));
        assert!(matches!(outcome.into_proposal(), Err(FulfillmentError::PackingInfeasible(_))));
    }

    #[test]
    fn test_no_stock_is_infeasible() {
        let packer = ShipmentPacker::default();
        let products = vec![product("A", "footwear", 700.0), product("W", "footwear", 0.0)];
        let stock = vec![on_hand("A", 0), on_hand("W", 4)];
        assert_eq!(packer.pack(&stock, &products, &HashSet::new(), 3), PackingOutcome::Infeasible(InfeasibleReason::NoEligibleStock));
    }

    #[test]
    fn test_heavy_items_give_approximate() {
        let packer = ShipmentPacker::new(PackingConfig { target_grams: 1000.0, tolerance_grams: 5.0, per_sku_cap: 3, quotas: vec![] });
        let products = vec![product("A", "x", 300.0)];
        let proposal = packer.pack(&[on_hand("A", 9)], &products, &HashSet::new(), 11).into_proposal().unwrap();
        assert_eq!(proposal.quality, ProposalQuality::Approximate);
        assert_eq!(proposal.total_weight_grams, 900.0);
    }

    #[test]
    fn test_regenerate_avoids_previous_products() {
        let packer = ShipmentPacker::new(PackingConfig { target_grams: 600.0, tolerance_grams: 5.0, per_sku_cap: 1, quotas: vec![] });
        let products: Vec<_> = (0..12).map(|i| product(&format!("P{i}"), "x", 100.0)).collect();
        let stock: Vec<_> = (0..12).map(|i| on_hand(&format!("P{i}"), 2)).collect();
        let mut history = ProposalHistory::new();
        let first = packer.pack(&stock, &products, &HashSet::new(), 5).into_proposal().unwrap();
        history.push(first.clone());
        let second = packer.regenerate(&first, &stock, &products, &HashSet::new(), 6).into_proposal().unwrap();
        history.push(second.clone());
        assert_eq!(first.units(), 6);
        assert_eq!(second.units(), 6);
        assert!(second.product_ids().all(|id| !first.product_ids().any(|p| p == id)));
        assert_eq!(history.exclusions().len(), 12);
        assert_eq!(history.pick(1), Some(&second));
    }

    #[test]
    fn test_config_from_toml() {
        let config = PackingConfig::from_toml_str(r#"
per_sku_cap = 2

[[quotas]]
category = "footwear"
min = 2
max = 3
"#).unwrap();
        assert_eq!(config.target_grams, DEFAULT_TARGET_GRAMS);
        assert_eq!(config.quota("footwear"), Some(&quota("footwear", 2, Some(3))));
        assert!(PackingConfig::from_toml_str("[[quotas]]\ncategory = \"a\"\nmin = 3\nmax = 1\n").is_err());
    }
}

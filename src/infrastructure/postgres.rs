//! Postgres adapters
//!
//! Records are stored whole as JSONB next to the key columns the queries filter on.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use crate::domain::aggregates::{
    DraftOrder, OutboundOrder, Product, Reseller, ResellerStockEntry, ResellerStockKey, Shipment, StockEntry,
};
use crate::domain::ports::{
    Catalog, DraftRepository, OrderRepository, ResellerDirectory, ResellerStockRepository, ShipmentRepository, StockRepository,
};
use crate::{FulfillmentError, Result};

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| FulfillmentError::Storage(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

fn version_column(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| FulfillmentError::Storage(format!("stock version {v} overflows BIGINT")))
}

#[async_trait]
impl StockRepository for PgStore {
    async fn entries(&self, product_id: &str) -> Result<Vec<StockEntry>> {
        let rows = sqlx::query_as::<_, (Json<StockEntry>,)>("SELECT data FROM stock_entries WHERE product_id = $1 ORDER BY status, location")
            .bind(product_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(e),)| e).collect())
    }

    async fn all(&self) -> Result<Vec<StockEntry>> {
        let rows = sqlx::query_as::<_, (Json<StockEntry>,)>("SELECT data FROM stock_entries ORDER BY product_id, status, location")
            .fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(e),)| e).collect())
    }

    async fn compare_and_set(&self, entry: &StockEntry, expected_version: Option<u64>) -> Result<bool> {
        let result = match expected_version {
            None => sqlx::query("INSERT INTO stock_entries (product_id, status, location, version, data) VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING")
                .bind(&entry.product_id).bind(entry.status.as_str()).bind(&entry.location).bind(version_column(entry.version)?).bind(Json(entry))
                .execute(&self.pool).await?,
            Some(expected) => sqlx::query("UPDATE stock_entries SET version = $4, data = $5 WHERE product_id = $1 AND status = $2 AND location = $3 AND version = $6")
                .bind(&entry.product_id).bind(entry.status.as_str()).bind(&entry.location).bind(version_column(entry.version)?).bind(Json(entry)).bind(version_column(expected)?)
                .execute(&self.pool).await?,
        };
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ResellerStockRepository for PgStore {
    async fn get(&self, key: &ResellerStockKey) -> Result<Option<ResellerStockEntry>> {
        let row = sqlx::query_as::<_, (Json<ResellerStockEntry>,)>("SELECT data FROM reseller_stock WHERE reseller_id = $1 AND order_id = $2 AND product_id = $3")
            .bind(&key.reseller_id).bind(&key.order_id).bind(&key.product_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(e),)| e))
    }

    async fn for_order(&self, order_id: &str) -> Result<Vec<ResellerStockEntry>> {
        let rows = sqlx::query_as::<_, (Json<ResellerStockEntry>,)>("SELECT data FROM reseller_stock WHERE order_id = $1 ORDER BY product_id")
            .bind(order_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(e),)| e).collect())
    }

    async fn for_reseller(&self, reseller_id: &str) -> Result<Vec<ResellerStockEntry>> {
        let rows = sqlx::query_as::<_, (Json<ResellerStockEntry>,)>("SELECT data FROM reseller_stock WHERE reseller_id = $1 ORDER BY order_id, product_id")
            .bind(reseller_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(e),)| e).collect())
    }

    async fn all(&self) -> Result<Vec<ResellerStockEntry>> {
        let rows = sqlx::query_as::<_, (Json<ResellerStockEntry>,)>("SELECT data FROM reseller_stock").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(e),)| e).collect())
    }

    async fn upsert(&self, entry: &ResellerStockEntry) -> Result<()> {
        sqlx::query("INSERT INTO reseller_stock (reseller_id, order_id, product_id, data) VALUES ($1, $2, $3, $4) ON CONFLICT (reseller_id, order_id, product_id) DO UPDATE SET data = EXCLUDED.data")
            .bind(&entry.reseller_id).bind(&entry.order_id).bind(&entry.product_id).bind(Json(entry))
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn remove(&self, key: &ResellerStockKey) -> Result<()> {
        sqlx::query("DELETE FROM reseller_stock WHERE reseller_id = $1 AND order_id = $2 AND product_id = $3")
            .bind(&key.reseller_id).bind(&key.order_id).bind(&key.product_id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn get(&self, id: &str) -> Result<Option<OutboundOrder>> {
        let row = sqlx::query_as::<_, (Json<OutboundOrder>,)>("SELECT data FROM outbound_orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(o),)| o))
    }

    async fn list(&self) -> Result<Vec<OutboundOrder>> {
        let rows = sqlx::query_as::<_, (Json<OutboundOrder>,)>("SELECT data FROM outbound_orders ORDER BY number").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(o),)| o).collect())
    }

    async fn find_by_shipment(&self, shipment_id: &str) -> Result<Vec<OutboundOrder>> {
        let rows = sqlx::query_as::<_, (Json<OutboundOrder>,)>("SELECT data FROM outbound_orders WHERE shipment_ref = $1 ORDER BY number")
            .bind(shipment_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(o),)| o).collect())
    }

    async fn save(&self, order: &OutboundOrder) -> Result<()> {
        let number = i64::try_from(order.number()).map_err(|_| FulfillmentError::Storage(format!("order number {} overflows BIGINT", order.number())))?;
        sqlx::query("INSERT INTO outbound_orders (id, number, reseller_id, shipment_ref, data) VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO UPDATE SET shipment_ref = EXCLUDED.shipment_ref, data = EXCLUDED.data")
            .bind(order.id()).bind(number).bind(order.reseller_id()).bind(order.shipment_ref()).bind(Json(order))
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM outbound_orders WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn next_number(&self) -> Result<u64> {
        let (n,): (i64,) = sqlx::query_as("SELECT nextval('outbound_order_number')").fetch_one(&self.pool).await?;
        u64::try_from(n).map_err(|_| FulfillmentError::Storage(format!("negative order number {n}")))
    }
}

#[async_trait]
impl ShipmentRepository for PgStore {
    async fn get(&self, id: &str) -> Result<Option<Shipment>> {
        let row = sqlx::query_as::<_, (Json<Shipment>,)>("SELECT data FROM shipments WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(s),)| s))
    }

    async fn list(&self) -> Result<Vec<Shipment>> {
        let rows = sqlx::query_as::<_, (Json<Shipment>,)>("SELECT data FROM shipments ORDER BY created_at").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(s),)| s).collect())
    }

    async fn save(&self, shipment: &Shipment) -> Result<()> {
        sqlx::query("INSERT INTO shipments (id, created_at, data) VALUES ($1, $2, $3) ON CONFLICT (id) DO UPDATE SET created_at = EXCLUDED.created_at, data = EXCLUDED.data")
            .bind(shipment.id()).bind(shipment.created_at()).bind(Json(shipment))
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM shipments WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DraftRepository for PgStore {
    async fn get(&self, id: &str) -> Result<Option<DraftOrder>> {
        let row = sqlx::query_as::<_, (Json<DraftOrder>,)>("SELECT data FROM draft_orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(d),)| d))
    }

    async fn list(&self) -> Result<Vec<DraftOrder>> {
        let rows = sqlx::query_as::<_, (Json<DraftOrder>,)>("SELECT data FROM draft_orders ORDER BY updated_at DESC").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(d),)| d).collect())
    }

    async fn save(&self, draft: &DraftOrder) -> Result<()> {
        sqlx::query("INSERT INTO draft_orders (id, updated_at, data) VALUES ($1, $2, $3) ON CONFLICT (id) DO UPDATE SET updated_at = EXCLUDED.updated_at, data = EXCLUDED.data")
            .bind(draft.id()).bind(draft.updated_at()).bind(Json(draft))
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM draft_orders WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn product(&self, id: &str) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, (Json<Product>,)>("SELECT data FROM products WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(p),)| p))
    }

    async fn products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, (Json<Product>,)>("SELECT data FROM products").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(p),)| p).collect())
    }
}

#[async_trait]
impl ResellerDirectory for PgStore {
    async fn reseller(&self, id: &str) -> Result<Option<Reseller>> {
        let row = sqlx::query_as::<_, (Json<Reseller>,)>("SELECT data FROM resellers WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(r),)| r))
    }

    async fn resellers(&self) -> Result<Vec<Reseller>> {
        let rows = sqlx::query_as::<_, (Json<Reseller>,)>("SELECT data FROM resellers ORDER BY id").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(r),)| r).collect())
    }
}

//! Local vendor/product registry lookups
//!
//! The registry tables are rebuilt wholesale by the ingestion job and only ever
//! read here, so readers take no locks.

use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};

use crate::errors::LookupResult;
use crate::models::{DeviceKey, LocalRecord, SourceOutcome};

/// Read side of the local registry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocalLookup: Send + Sync {
    /// Vendor and product names for a device
    async fn lookup_vendor_product(&self, key: DeviceKey) -> SourceOutcome<LocalRecord>;
}

/// Registry lookups backed by the SQLite tables the ingestor writes
#[derive(Clone)]
pub struct SqliteLookupStore {
    pool: Pool<Sqlite>,
}

impl SqliteLookupStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Registry row matching both ids
    pub async fn find(&self, key: DeviceKey) -> LookupResult<Option<LocalRecord>> {
        let row = sqlx::query(
            "SELECT vendor_name, product_name FROM usb_ids WHERE vendor_id = ? AND product_id = ?",
        )
        .bind(i64::from(key.vendor_id))
        .bind(i64::from(key.product_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| LocalRecord {
            vendor_name: non_empty(row.get("vendor_name")),
            product_name: non_empty(row.get("product_name")),
        }))
    }
}

#[async_trait]
impl LocalLookup for SqliteLookupStore {
    async fn lookup_vendor_product(&self, key: DeviceKey) -> SourceOutcome<LocalRecord> {
        self.find(key).await.into()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

//! Registry ingestion
//!
//! Downloads the gzip-compressed `usb.ids` registry, parses it and swaps the
//! registry tables in one transaction. Any failure before the commit leaves the
//! previous dataset in place.

use flate2::read::GzDecoder;
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::errors::{IngestionError, IngestionResult};
use crate::models::RegistryRecord;

pub mod usb_ids_parser;

pub use usb_ids_parser::{ParsedRegistry, parse_usb_ids};

/// Rows per INSERT; four bound values per row keeps well under SQLite's variable limit
const INSERT_BATCH_SIZE: usize = 500;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Row counts written by one ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    pub vendors: usize,
    pub products: usize,
}

/// Replaces the registry tables atomically
#[derive(Clone)]
pub struct RegistryWriter {
    pool: Pool<Sqlite>,
}

impl RegistryWriter {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn replace(
        &self,
        vendors: &[(u16, String)],
        products: &[RegistryRecord],
    ) -> IngestionResult<IngestionStats> {
        let mut transaction = self.pool.begin().await?;

        sqlx::query("DELETE FROM usb_ids")
            .execute(&mut *transaction)
            .await?;
        sqlx::query("DELETE FROM usb_vendors")
            .execute(&mut *transaction)
            .await?;

        for chunk in vendors.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT OR REPLACE INTO usb_vendors (vendor_id, vendor_name) ");
            builder.push_values(chunk, |mut row, (vendor_id, vendor_name)| {
                row.push_bind(i64::from(*vendor_id))
                    .push_bind(vendor_name.clone());
            });
            builder.build().execute(&mut *transaction).await?;
        }

        for chunk in products.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR REPLACE INTO usb_ids (vendor_id, vendor_name, product_id, product_name) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(i64::from(record.vendor_id))
                    .push_bind(record.vendor_name.clone())
                    .push_bind(i64::from(record.product_id))
                    .push_bind(record.product_name.clone());
            });
            builder.build().execute(&mut *transaction).await?;
        }

        transaction.commit().await?;

        Ok(IngestionStats {
            vendors: vendors.len(),
            products: products.len(),
        })
    }
}

/// Rebuilds the local registry from the published `usb.ids` file
pub struct UsbIdsIngestor {
    client: reqwest::Client,
    writer: RegistryWriter,
    url: String,
    run_lock: Mutex<()>,
}

impl UsbIdsIngestor {
    pub fn new(pool: Pool<Sqlite>, url: impl Into<String>, timeout: Duration) -> IngestionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("usb-metadata/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            writer: RegistryWriter::new(pool),
            url: url.into(),
            run_lock: Mutex::new(()),
        })
    }

    /// Download, parse and replace. Runs are serialized.
    pub async fn run(&self) -> IngestionResult<IngestionStats> {
        let _guard = self.run_lock.lock().await;
        info!("Downloading USB id registry from {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(IngestionError::Http {
                status: response.status().as_u16(),
                url: self.url.clone(),
            });
        }
        let body = response.bytes().await?;

        self.ingest_locked(&body).await
    }

    /// Parse and store an already downloaded registry, gzip-compressed or plain
    pub async fn ingest_bytes(&self, data: &[u8]) -> IngestionResult<IngestionStats> {
        let _guard = self.run_lock.lock().await;
        self.ingest_locked(data).await
    }

    async fn ingest_locked(&self, data: &[u8]) -> IngestionResult<IngestionStats> {
        let text = decode_registry(data)?;
        let registry = parse_usb_ids(&text);
        if registry.products.is_empty() {
            return Err(IngestionError::EmptyRegistry);
        }

        let stats = self
            .writer
            .replace(&registry.vendors, &registry.products)
            .await?;
        info!(
            "USB id registry updated: {} vendors, {} products",
            stats.vendors, stats.products
        );
        Ok(stats)
    }

    /// Re-run ingestion every `interval` in the background
    pub fn spawn_periodic_refresh(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run().await {
                    error!("Scheduled USB id registry refresh failed: {}", e);
                }
            }
        })
    }
}

/// Gunzip when the payload carries the gzip magic; decode as lossy UTF-8
fn decode_registry(data: &[u8]) -> IngestionResult<String> {
    if data.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(String::from_utf8_lossy(&decompressed).into_owned())
    } else {
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, migrate::MigrateDatabase};
use std::path::Path;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::config::defaults::DEFAULT_MAX_CONNECTIONS;

/// Schema for the registry tables, applied in order
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "create_usb_vendors",
        r#"
        CREATE TABLE IF NOT EXISTS usb_vendors (
            vendor_id INTEGER PRIMARY KEY,
            vendor_name TEXT NOT NULL
        )
        "#,
    ),
    (
        2,
        "create_usb_ids",
        r#"
        CREATE TABLE IF NOT EXISTS usb_ids (
            vendor_id INTEGER NOT NULL,
            vendor_name TEXT NOT NULL,
            product_id INTEGER NOT NULL,
            product_name TEXT NOT NULL,
            PRIMARY KEY (vendor_id, product_id)
        )
        "#,
    ),
];

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub async fn new(config: &StorageConfig) -> Result<Self> {
        Self::connect(
            &config.database_url,
            config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        )
        .await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        if let Some(file) = sqlite_file_path(url)
            && let Some(parent) = file.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Create database if it doesn't exist (for SQLite)
        if !Sqlite::database_exists(url).await? {
            Sqlite::create_database(url).await?;
            info!("Created registry database at {}", url);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                checksum BLOB NOT NULL,
                execution_time BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for &(version, name, content) in MIGRATIONS {
            let existing = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM _migrations WHERE version = ?",
            )
            .bind(version)
            .fetch_one(&self.pool)
            .await?;

            if existing > 0 {
                debug!("Migration {} already applied", name);
                continue;
            }

            let start = std::time::Instant::now();
            let mut transaction = self.pool.begin().await?;

            sqlx::query(content)
                .execute(&mut *transaction)
                .await
                .map_err(|e| anyhow::anyhow!("Migration {} failed: {}", name, e))?;

            let execution_time = start.elapsed().as_millis() as i64;
            sqlx::query(
                r#"
                INSERT INTO _migrations (version, description, checksum, execution_time)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(version)
            .bind(name)
            .bind(Self::calculate_checksum(content))
            .bind(execution_time)
            .execute(&mut *transaction)
            .await?;

            transaction.commit().await?;
            info!("Applied migration: {} ({}ms)", name, execution_time);
        }

        Ok(())
    }

    fn calculate_checksum(content: &str) -> Vec<u8> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        hasher.finish().to_be_bytes().to_vec()
    }
}

/// Filesystem path of a `sqlite:` URL, if it points at a file
fn sqlite_file_path(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(Path::new(path))
}

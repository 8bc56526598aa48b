//! Device metadata resolution
//!
//! Order of work for a device:
//!
//! 1. A cache entry, when present, is the answer. An entry that cannot be
//!    read answers as empty.
//! 2. Names come from the local registry.
//! 3. An icon already in the icon repository is used as-is.
//! 4. When anything is still missing the remote provider is asked. Its names
//!    only fill gaps and its icon is transcoded only when there is no asset yet.
//! 5. The merged document is cached, even when it is empty.
//!
//! Source failures are logged with the device key and contribute nothing.
//! Resolution for one key is single-flight: concurrent callers wait for the
//! first and then read its cache entry.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::database::Database;
use crate::errors::{AppError, AppResult, SourceFailure};
use crate::icons::{IconRepository, IconTranscoder};
use crate::lookup::{LocalLookup, SqliteLookupStore};
use crate::models::{DeviceKey, DeviceMetadata, Resolution, SourceOutcome};
use crate::remote::{DmsClient, RemoteMetadataSource, TransientIcon};

pub struct MetadataResolver {
    cache: CacheStore,
    local: Arc<dyn LocalLookup>,
    icons: IconRepository,
    remote: Arc<dyn RemoteMetadataSource>,
    transcoder: IconTranscoder,
    key_locks: Mutex<HashMap<DeviceKey, Weak<Mutex<()>>>>,
}

impl MetadataResolver {
    pub fn new(
        cache: CacheStore,
        local: Arc<dyn LocalLookup>,
        icons: IconRepository,
        remote: Arc<dyn RemoteMetadataSource>,
        transcoder: IconTranscoder,
    ) -> Self {
        Self {
            cache,
            local,
            icons,
            remote,
            transcoder,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the production sources from configuration
    pub fn from_config(config: &Config, database: &Database) -> AppResult<Self> {
        let icons = IconRepository::new(config.storage.icon_dir.clone(), &config.storage.icon_base_url)
            .map_err(|e| {
                AppError::configuration(format!(
                    "invalid icon base URL {}: {}",
                    config.storage.icon_base_url, e
                ))
            })?;
        let remote = DmsClient::new(&config.remote)
            .map_err(|e| AppError::configuration(format!("failed to build remote client: {e}")))?;

        Ok(Self::new(
            CacheStore::new(config.storage.cache_dir.clone()),
            Arc::new(SqliteLookupStore::new(database.pool())),
            icons,
            Arc::new(remote),
            IconTranscoder::from_config(&config.icons),
        ))
    }

    pub fn icons(&self) -> &IconRepository {
        &self.icons
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Metadata for a device. Never fails; `found` is false when nothing is known.
    pub async fn resolve(&self, key: DeviceKey) -> Resolution {
        if let Some(cached) = self.cached(key).await {
            return Resolution::new(cached);
        }

        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        // Another caller may have finished while we waited
        if let Some(cached) = self.cached(key).await {
            return Resolution::new(cached);
        }

        let metadata = self.collect(key).await;
        if let Err(e) = self.cache.put(key, &metadata).await {
            error!("Failed to cache metadata for {}: {}", key, e);
        }
        Resolution::new(metadata)
    }

    async fn cached(&self, key: DeviceKey) -> Option<DeviceMetadata> {
        match self.cache.get(key).await {
            Ok(Some(metadata)) => {
                debug!("Cache hit for {}", key);
                Some(metadata)
            }
            Ok(None) => None,
            // The entry exists and write-once keeps it, so it settles the key as empty
            Err(e) => {
                warn!("Unreadable cache entry for {}, answering empty: {}", key, e);
                Some(DeviceMetadata::default())
            }
        }
    }

    async fn key_lock(&self, key: DeviceKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
            return lock;
        }

        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(key, Arc::downgrade(&lock));
        lock
    }

    async fn collect(&self, key: DeviceKey) -> DeviceMetadata {
        let mut metadata = DeviceMetadata::default();

        match self.local.lookup_vendor_product(key).await {
            SourceOutcome::Found(record) => metadata.fill_names(record.vendor_name, record.product_name),
            SourceOutcome::NotAvailable => info!("No registry metadata available for {}", key),
            SourceOutcome::Failed(failure) => {
                error!("Failed to fetch registry metadata for {}: {}", key, failure)
            }
        }

        metadata.icon_uri = self.icons.existing_icon_uri(key).await;

        if !metadata.is_incomplete() {
            return metadata;
        }

        match self.remote.fetch(key).await {
            SourceOutcome::Found(remote) => {
                metadata.fill_names(remote.vendor_name, remote.product_name);
                if let Some(icon) = remote.icon
                    && metadata.icon_uri.is_none()
                {
                    metadata.icon_uri = self.install_icon(key, icon).await;
                }
            }
            SourceOutcome::NotAvailable => info!("No remote metadata available for {}", key),
            SourceOutcome::Failed(failure) => {
                error!("Failed to fetch remote metadata for {}: {}", key, failure)
            }
        }

        metadata
    }

    /// Transcode a downloaded icon into the repository. The transient file is
    /// removed when `icon` drops at the end of this call.
    async fn install_icon(&self, key: DeviceKey, icon: TransientIcon) -> Option<String> {
        let destination = self.icons.icon_path(key);
        match self.transcoder.transcode(icon.path(), &destination).await {
            Ok(frame) => {
                info!(
                    "Stored {}x{} icon for {} at {}",
                    frame.width,
                    frame.height,
                    key,
                    destination.display()
                );
                Some(self.icons.icon_uri(key))
            }
            Err(e) => {
                error!("Error processing the icon for {}: {}", key, SourceFailure::from(e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TranscodeResult;
    use crate::icons::transcoder::tests::write_ico;
    use crate::icons::{IcoImageBackend, IconFrame, ImageRenderer};
    use crate::lookup::MockLocalLookup;
    use crate::models::LocalRecord;
    use crate::remote::{MockRemoteMetadataSource, RemoteMetadata};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ICON_BASE_URL: &str = "http://localhost:8080/icons/";

    /// Delegates to the `.ico` backend and counts render calls
    #[derive(Default)]
    struct CountingRenderer {
        renders: AtomicUsize,
    }

    impl ImageRenderer for CountingRenderer {
        fn render(&self, source: &Path, frame: &IconFrame) -> TranscodeResult<Vec<u8>> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            IcoImageBackend.render(source, frame)
        }
    }

    fn transcoder(renderer: Arc<CountingRenderer>) -> IconTranscoder {
        IconTranscoder::new(Arc::new(IcoImageBackend), renderer, 48, 8)
    }

    fn resolver(
        root: &Path,
        local: impl LocalLookup + 'static,
        remote: impl RemoteMetadataSource + 'static,
        renderer: Arc<CountingRenderer>,
    ) -> MetadataResolver {
        MetadataResolver::new(
            CacheStore::new(root.join("cache")),
            Arc::new(local),
            IconRepository::new(root.join("icons"), ICON_BASE_URL).unwrap(),
            Arc::new(remote),
            transcoder(renderer),
        )
    }

    fn transient_icon(sizes: &[u32]) -> TransientIcon {
        let temp = tempfile::Builder::new().suffix(".ico").tempfile().unwrap();
        write_ico(temp.path(), sizes);
        TransientIcon::new(temp.into_temp_path())
    }

    fn local_record(vendor: Option<&str>, product: Option<&str>) -> LocalRecord {
        LocalRecord {
            vendor_name: vendor.map(str::to_string),
            product_name: product.map(str::to_string),
        }
    }

    fn logitech_local() -> MockLocalLookup {
        let mut local = MockLocalLookup::new();
        local.expect_lookup_vendor_product().times(1).returning(|_| {
            SourceOutcome::Found(local_record(Some("Logitech, Inc."), Some("MX518 Optical Mouse")))
        });
        local
    }

    #[tokio::test]
    async fn test_cache_hit_skips_all_sources() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(1, 2);
        let cached = DeviceMetadata {
            vendor_name: Some("Cached Vendor".to_string()),
            ..Default::default()
        };

        let mut local = MockLocalLookup::new();
        local.expect_lookup_vendor_product().times(0);
        let mut remote = MockRemoteMetadataSource::new();
        remote.expect_fetch().times(0);

        let resolver = resolver(dir.path(), local, remote, Arc::default());
        resolver.cache().put(key, &cached).await.unwrap();

        let resolution = resolver.resolve(key).await;
        assert!(resolution.found);
        assert_eq!(resolution.metadata, cached);
    }

    #[tokio::test]
    async fn test_cached_empty_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(3, 4);

        let mut local = MockLocalLookup::new();
        local.expect_lookup_vendor_product().times(0);
        let mut remote = MockRemoteMetadataSource::new();
        remote.expect_fetch().times(0);

        let resolver = resolver(dir.path(), local, remote, Arc::default());
        resolver.cache().put(key, &DeviceMetadata::default()).await.unwrap();

        let resolution = resolver.resolve(key).await;
        assert!(!resolution.found);
        assert!(resolution.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_settles_key_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(5, 6);

        let mut local = MockLocalLookup::new();
        local.expect_lookup_vendor_product().times(0);
        let mut remote = MockRemoteMetadataSource::new();
        remote.expect_fetch().times(0);

        let resolver = resolver(dir.path(), local, remote, Arc::default());
        std::fs::create_dir_all(dir.path().join("cache")).unwrap();
        std::fs::write(resolver.cache().entry_path(key), "<DeviceMetadata><VendorName>").unwrap();

        for _ in 0..3 {
            let resolution = resolver.resolve(key).await;
            assert!(!resolution.found);
            assert!(resolution.metadata.is_empty());
        }
    }

    #[tokio::test]
    async fn test_local_names_win_over_remote() {
        let dir = tempfile::tempdir().unwrap();

        let mut local = MockLocalLookup::new();
        local
            .expect_lookup_vendor_product()
            .returning(|_| SourceOutcome::Found(local_record(Some("A"), None)));
        let mut remote = MockRemoteMetadataSource::new();
        remote.expect_fetch().times(1).returning(|_| {
            SourceOutcome::Found(RemoteMetadata {
                vendor_name: Some("B".to_string()),
                product_name: Some("Mouse".to_string()),
                icon: None,
            })
        });

        let resolver = resolver(dir.path(), local, remote, Arc::default());
        let resolution = resolver.resolve(DeviceKey::new(10, 20)).await;

        assert_eq!(resolution.metadata.vendor_name.as_deref(), Some("A"));
        assert_eq!(resolution.metadata.product_name.as_deref(), Some("Mouse"));
        assert_eq!(resolution.metadata.icon_uri, None);
    }

    #[tokio::test]
    async fn test_remote_names_used_when_registry_lists_only_the_vendor() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("usb-ids.db").display());
        let database = Database::connect(&url, 1).await.unwrap();
        database.migrate().await.unwrap();
        crate::ingestor::RegistryWriter::new(database.pool())
            .replace(&[(0x046d, "Logitech, Inc.".to_string())], &[])
            .await
            .unwrap();

        let mut remote = MockRemoteMetadataSource::new();
        remote.expect_fetch().times(1).returning(|_| {
            SourceOutcome::Found(RemoteMetadata {
                vendor_name: Some("Logitech G".to_string()),
                product_name: Some("G502".to_string()),
                icon: None,
            })
        });

        let resolver = resolver(
            dir.path(),
            SqliteLookupStore::new(database.pool()),
            remote,
            Arc::default(),
        );
        let resolution = resolver.resolve(DeviceKey::new(0x046d, 0xbeef)).await;

        assert_eq!(resolution.metadata.vendor_name.as_deref(), Some("Logitech G"));
        assert_eq!(resolution.metadata.product_name.as_deref(), Some("G502"));
    }

    #[tokio::test]
    async fn test_registry_hit_without_icon_is_cached_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(1133, 49182);

        let mut remote = MockRemoteMetadataSource::new();
        remote
            .expect_fetch()
            .times(1)
            .returning(|_| SourceOutcome::NotAvailable);

        let resolver = resolver(dir.path(), logitech_local(), remote, Arc::default());

        let first = resolver.resolve(key).await;
        assert!(first.found);
        assert_eq!(first.metadata.vendor_name.as_deref(), Some("Logitech, Inc."));
        assert!(first.metadata.product_name.as_deref().unwrap().contains("518"));
        assert_eq!(first.metadata.icon_uri, None);
        assert!(dir.path().join("cache/1133_49182.xml").exists());

        let second = resolver.resolve(key).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_existing_icon_asset_skips_remote() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(1133, 49182);

        let mut remote = MockRemoteMetadataSource::new();
        remote.expect_fetch().times(0);

        let resolver = resolver(dir.path(), logitech_local(), remote, Arc::default());
        resolver.icons().ensure_storage_dirs().await.unwrap();
        std::fs::write(resolver.icons().icon_path(key), b"png").unwrap();

        let resolution = resolver.resolve(key).await;
        assert_eq!(
            resolution.metadata.icon_uri.as_deref(),
            Some("http://localhost:8080/icons/1133_49182.png")
        );
    }

    #[tokio::test]
    async fn test_source_failures_yield_empty_cached_result() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(65535, 65535);

        let mut local = MockLocalLookup::new();
        local
            .expect_lookup_vendor_product()
            .times(1)
            .returning(|_| SourceOutcome::Failed(SourceFailure::transient("database is locked")));
        let mut remote = MockRemoteMetadataSource::new();
        remote
            .expect_fetch()
            .times(1)
            .returning(|_| SourceOutcome::Failed(SourceFailure::transient("connection timed out")));

        let resolver = resolver(dir.path(), local, remote, Arc::default());

        let resolution = resolver.resolve(key).await;
        assert!(!resolution.found);
        assert!(resolution.metadata.is_empty());
        assert!(resolver.cache().get(key).await.unwrap().is_some());

        // Empty results are cached too, so nothing is asked again
        assert!(!resolver.resolve(key).await.found);
    }

    #[tokio::test]
    async fn test_remote_icon_is_transcoded_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(1133, 49182);
        let transient_paths = Arc::new(std::sync::Mutex::new(Vec::<PathBuf>::new()));

        let mut local = MockLocalLookup::new();
        local
            .expect_lookup_vendor_product()
            .returning(|_| SourceOutcome::NotAvailable);
        let mut remote = MockRemoteMetadataSource::new();
        let seen = transient_paths.clone();
        remote.expect_fetch().times(1).returning(move |_| {
            let icon = transient_icon(&[32, 64]);
            seen.lock().unwrap().push(icon.path().to_path_buf());
            SourceOutcome::Found(RemoteMetadata {
                vendor_name: Some("Logitech".to_string()),
                product_name: Some("MX518 Gaming Mouse".to_string()),
                icon: Some(icon),
            })
        });

        let renderer = Arc::new(CountingRenderer::default());
        let resolver = resolver(dir.path(), local, remote, renderer.clone());

        let resolution = resolver.resolve(key).await;
        assert_eq!(
            resolution.metadata.icon_uri.as_deref(),
            Some("http://localhost:8080/icons/1133_49182.png")
        );
        assert_eq!(resolution.metadata.vendor_name.as_deref(), Some("Logitech"));
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);

        let png = image::open(dir.path().join("icons/1133_49182.png")).unwrap();
        assert_eq!((png.width(), png.height()), (64, 64));
        assert!(transient_paths.lock().unwrap().iter().all(|path| !path.exists()));
    }

    #[tokio::test]
    async fn test_unusable_remote_icon_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(7, 8);
        let transient_paths = Arc::new(std::sync::Mutex::new(Vec::<PathBuf>::new()));

        let mut local = MockLocalLookup::new();
        local
            .expect_lookup_vendor_product()
            .returning(|_| SourceOutcome::Found(local_record(Some("Vendor"), Some("Product"))));
        let mut remote = MockRemoteMetadataSource::new();
        let seen = transient_paths.clone();
        remote.expect_fetch().returning(move |_| {
            let icon = transient_icon(&[16]);
            seen.lock().unwrap().push(icon.path().to_path_buf());
            SourceOutcome::Found(RemoteMetadata {
                icon: Some(icon),
                ..Default::default()
            })
        });

        let renderer = Arc::new(CountingRenderer::default());
        let resolver = resolver(dir.path(), local, remote, renderer.clone());

        let resolution = resolver.resolve(key).await;
        assert!(resolution.found);
        assert_eq!(resolution.metadata.icon_uri, None);
        assert_eq!(resolution.metadata.product_name.as_deref(), Some("Product"));
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);
        assert!(!resolver.icons().icon_path(key).exists());
        assert!(transient_paths.lock().unwrap().iter().all(|path| !path.exists()));
    }

    /// Remote source that answers slowly and counts calls
    struct SlowRemote {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RemoteMetadataSource for SlowRemote {
        async fn fetch(&self, _key: DeviceKey) -> SourceOutcome<RemoteMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            SourceOutcome::Found(RemoteMetadata {
                vendor_name: Some("Logitech".to_string()),
                product_name: None,
                icon: Some(transient_icon(&[48, 64])),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_resolve_once() {
        let dir = tempfile::tempdir().unwrap();
        let key = DeviceKey::new(1133, 49182);

        let mut local = MockLocalLookup::new();
        local
            .expect_lookup_vendor_product()
            .times(1)
            .returning(|_| SourceOutcome::NotAvailable);
        let remote = Arc::new(SlowRemote {
            calls: AtomicUsize::new(0),
        });
        let renderer = Arc::new(CountingRenderer::default());

        let resolver = Arc::new(MetadataResolver::new(
            CacheStore::new(dir.path().join("cache")),
            Arc::new(local),
            IconRepository::new(dir.path().join("icons"), ICON_BASE_URL).unwrap(),
            remote.clone(),
            transcoder(renderer.clone()),
        ));

        let requests = (0..8).map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(key).await })
        });
        let results: Vec<Resolution> = futures::future::join_all(requests)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let first = &results[0];
        assert!(results.iter().all(|result| result == first));
        assert!(first.metadata.icon_uri.is_some());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert!(renderer.renders.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_key_locks_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let mut local = MockLocalLookup::new();
        local
            .expect_lookup_vendor_product()
            .returning(|_| SourceOutcome::Found(local_record(Some("V"), Some("P"))));
        let mut remote = MockRemoteMetadataSource::new();
        remote.expect_fetch().returning(|_| SourceOutcome::NotAvailable);

        let resolver = resolver(dir.path(), local, remote, Arc::default());
        for product_id in 0..5 {
            resolver.resolve(DeviceKey::new(1, product_id)).await;
        }

        let first = resolver.key_lock(DeviceKey::new(9, 9)).await;
        let locks = resolver.key_locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&DeviceKey::new(9, 9)));
        drop(locks);
        drop(first);
    }
}

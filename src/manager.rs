use bytes::Bytes;
use chrono::Utc;
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CacheConfiguration;
use crate::error::{CacheError, SetupError};
use crate::ledger::{FileLedger, TimeToLiveLedger};
use crate::policy::{CachePolicy, PolicyClass};
use crate::store::{ByteStore, CacheUsage, CachedResponse, ResponseMetadata, TieredByteStore};
use crate::transport::{FetchRequest, HyperTransport, ResponseHead, Transport};

const DEFAULT_RESPONSE_DIRECTORY: &str = "responses";
const LEDGER_FILE: &str = "ttl-ledger.json";

struct StorePair {
    store: Arc<dyn ByteStore>,
    ledger: Arc<dyn TimeToLiveLedger>,
}

/// Serves bytes for URLs from a TTL-bounded cache, fetching through a [`Transport`] when needed.
///
/// Reads and writes of the byte store and TTL ledger happen under one lock, which is
/// never held across a transport call. Concurrent misses for the same URL each fetch.
pub struct NetworkCacheManager {
    configuration: CacheConfiguration,
    stores: Mutex<StorePair>,
    transport: Arc<dyn Transport>,
}

impl NetworkCacheManager {
    /// Opens the persisted byte store and TTL ledger under `root` and fetches over HTTP(S).
    pub async fn open<P: AsRef<Path>>(
        configuration: CacheConfiguration,
        root: P,
    ) -> Result<Self, SetupError> {
        let root = root.as_ref();
        let directory = configuration
            .cache_directory
            .as_deref()
            .unwrap_or(DEFAULT_RESPONSE_DIRECTORY);

        let store = TieredByteStore::open(
            root.join(directory),
            configuration.memory_capacity,
            configuration.disk_capacity,
        )
        .await?;
        let ledger = FileLedger::open(root.join(LEDGER_FILE)).await?;

        Ok(Self::with_components(
            configuration,
            Arc::new(store),
            Arc::new(ledger),
            Arc::new(HyperTransport::new()),
        ))
    }

    pub fn with_components(
        configuration: CacheConfiguration,
        store: Arc<dyn ByteStore>,
        ledger: Arc<dyn TimeToLiveLedger>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        info!(
            "Initializing cache manager: memory {} bytes, disk {} bytes, ttl {:?}",
            configuration.memory_capacity, configuration.disk_capacity, configuration.time_to_live
        );
        Self {
            configuration,
            stores: Mutex::new(StorePair { store, ledger }),
            transport,
        }
    }

    pub fn configuration(&self) -> &CacheConfiguration {
        &self.configuration
    }

    #[tracing::instrument(skip_all, fields(url = %url, policy = %policy))]
    pub async fn fetch_bytes(&self, url: &Url, policy: CachePolicy) -> Result<Bytes, CacheError> {
        match policy.class() {
            PolicyClass::PreferCache => {
                if let Some(cached) = self.fresh_cached_response(url).await {
                    debug!("Serving {} bytes from cache", cached.body.len());
                    return Ok(cached.body);
                }
                self.fetch_and_store(url, policy).await
            }
            PolicyClass::Reload => self.fetch_and_store(url, policy).await,
            PolicyClass::CacheOnly => match self.fresh_cached_response(url).await {
                Some(cached) => Ok(cached.body),
                None => {
                    debug!("No fresh cached data and loading is not allowed");
                    Err(CacheError::NoCachedData)
                }
            },
        }
    }

    /// Fetches `url` and decodes it as an image.
    pub async fn fetch_image(
        &self,
        url: &Url,
        policy: CachePolicy,
    ) -> Result<DynamicImage, CacheError> {
        let data = self.fetch_bytes(url, policy).await?;
        image::load_from_memory(&data).map_err(|e| {
            warn!("Unable to decode image from {}: {}", url, e);
            CacheError::InvalidImageData
        })
    }

    /// Whether a fresh response for `url` is cached. Stale entries are evicted as a side effect.
    pub async fn is_cached(&self, url: &Url) -> bool {
        self.fresh_cached_response(url).await.is_some()
    }

    pub async fn clear_cache(&self) {
        let stores = self.stores.lock().await;
        stores.store.remove_all().await;
        stores.ledger.clear().await;
        info!("Cache cleared");
    }

    pub async fn cache_size(&self) -> CacheUsage {
        self.stores.lock().await.store.current_usage().await
    }

    async fn fresh_cached_response(&self, url: &Url) -> Option<CachedResponse> {
        let key = url.as_str();
        let stores = self.stores.lock().await;

        match stores.ledger.get(key).await {
            Some(expires_at) if expires_at > Utc::now() => {}
            expires_at => {
                debug!(?expires_at, "No fresh TTL record for {}", key);
                stores.store.remove(key).await;
                if expires_at.is_some() {
                    stores.ledger.remove(key).await;
                }
                return None;
            }
        }

        let cached = stores.store.lookup(key).await;
        if cached.is_none() {
            debug!("TTL record for {} has no stored response", key);
        }
        cached
    }

    async fn fetch_and_store(&self, url: &Url, policy: CachePolicy) -> Result<Bytes, CacheError> {
        let request = FetchRequest {
            url: url.clone(),
            policy,
        };

        let response = self.transport.fetch(&request).await.map_err(|e| {
            let error = CacheError::from_transport_failure(e);
            warn!("Fetch of {} failed: {}", url, error);
            error
        })?;

        let (status_code, headers) = match response.head {
            ResponseHead::Http {
                status_code,
                headers,
            } => (status_code, headers),
            ResponseHead::Unclassified => {
                warn!("Response from {} has no HTTP status", url);
                return Err(CacheError::unclassified_response());
            }
        };

        if !self.configuration.accepts(status_code) {
            warn!("Not caching {}: status {} is not acceptable", url, status_code);
            return Err(CacheError::InvalidResponse {
                status_code: i32::from(status_code),
            });
        }

        let key = url.as_str();
        let metadata = ResponseMetadata::new(key, status_code, headers);
        {
            let stores = self.stores.lock().await;
            // Byte store first: a ledger record without a stored response reads as a miss.
            stores.store.store(key, response.body.clone(), metadata).await;
            stores
                .ledger
                .save(key, self.configuration.time_to_live)
                .await;
        }
        info!(
            "Cached {} bytes for {} (status {})",
            response.body.len(),
            key,
            status_code
        );

        Ok(response.body)
    }
}

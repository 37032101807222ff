//! Expiration bookkeeping for cached responses.
//!
//! The ledger is the source of truth for freshness: a byte-store entry without an
//! unexpired ledger record is treated as absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::StoreError;

const NAMESPACE: &str = "http_ttl_cache.ttl.";

#[async_trait]
pub trait TimeToLiveLedger: Send + Sync {
    /// Expiration instant recorded for `key`.
    async fn get(&self, key: &str) -> Option<DateTime<Utc>>;

    /// Records `now + ttl` for `key`, replacing any previous record.
    async fn save(&self, key: &str, ttl: Duration);

    async fn remove(&self, key: &str);

    async fn clear(&self);
}

/// `now + ttl`, saturating at the largest representable instant.
pub(crate) fn expiration_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Ledger persisted as a JSON map of namespaced keys to RFC 3339 timestamps.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl FileLedger {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_owned();
        let entries = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Opened TTL ledger at {:?} with {} records",
            path,
            entries.len()
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn namespaced(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }

    async fn persist(&self, entries: &HashMap<String, DateTime<Utc>>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TimeToLiveLedger for FileLedger {
    async fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(&Self::namespaced(key)).copied()
    }

    async fn save(&self, key: &str, ttl: Duration) {
        let expires_at = expiration_after(Utc::now(), ttl);
        let mut entries = self.entries.write().await;
        entries.insert(Self::namespaced(key), expires_at);
        debug!("TTL for {} set to {}", key, expires_at);

        if let Err(e) = self.persist(&entries).await {
            warn!("Failed to persist TTL ledger {:?}: {}", self.path, e);
        }
    }

    async fn remove(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if entries.remove(&Self::namespaced(key)).is_none() {
            return;
        }
        debug!("TTL record for {} removed", key);

        if let Err(e) = self.persist(&entries).await {
            warn!("Failed to persist TTL ledger {:?}: {}", self.path, e);
        }
    }

    async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(NAMESPACE));
        info!("Cleared {} TTL records", before - entries.len());

        if let Err(e) = self.persist(&entries).await {
            warn!("Failed to persist TTL ledger {:?}: {}", self.path, e);
        }
    }
}

/// In-process ledger, used where persistence is not wanted.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plants an arbitrary expiration instant.
    pub async fn set_expiration(&self, key: &str, expires_at: DateTime<Utc>) {
        self.entries.write().await.insert(key.to_string(), expires_at);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl TimeToLiveLedger for MemoryLedger {
    async fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(key).copied()
    }

    async fn save(&self, key: &str, ttl: Duration) {
        let expires_at = expiration_after(Utc::now(), ttl);
        self.entries.write().await.insert(key.to_string(), expires_at);
    }

    async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "https://example.com/test-data";

    #[tokio::test]
    async fn test_save_records_future_expiration() {
        let ledger = MemoryLedger::new();
        assert!(ledger.get(KEY).await.is_none());

        let before = Utc::now();
        ledger.save(KEY, Duration::from_secs(3600)).await;
        let expires_at = ledger.get(KEY).await.unwrap();

        assert!(expires_at >= before + chrono::Duration::seconds(3600));
        assert!(expires_at <= Utc::now() + chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_in_future() {
        let ledger = MemoryLedger::new();
        ledger.save(KEY, Duration::ZERO).await;
        assert!(ledger.get(KEY).await.unwrap() <= Utc::now());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let ledger = MemoryLedger::new();
        ledger.save(KEY, Duration::ZERO).await;
        ledger.save(KEY, Duration::from_secs(60)).await;
        assert!(ledger.get(KEY).await.unwrap() > Utc::now());
        assert_eq!(ledger.len().await, 1);

        ledger.remove(KEY).await;
        assert!(ledger.is_empty().await);
    }

    #[test]
    fn test_expiration_saturates() {
        let now = Utc::now();
        assert_eq!(
            expiration_after(now, Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[tokio::test]
    async fn test_file_ledger_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("ttl-ledger.json");

        let ledger = FileLedger::open(&path).await.unwrap();
        ledger.save(KEY, Duration::from_secs(600)).await;
        let saved = ledger.get(KEY).await.unwrap();
        drop(ledger);

        let reopened = FileLedger::open(&path).await.unwrap();
        assert_eq!(reopened.path(), path.as_path());
        assert_eq!(reopened.get(KEY).await, Some(saved));
    }

    #[tokio::test]
    async fn test_file_ledger_remove_is_persisted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ttl-ledger.json");

        let ledger = FileLedger::open(&path).await.unwrap();
        ledger.save(KEY, Duration::from_secs(600)).await;
        ledger.save("https://example.com/other", Duration::from_secs(600)).await;
        ledger.remove(KEY).await;
        ledger.remove("https://example.com/never-saved").await;
        assert!(ledger.get(KEY).await.is_none());
        drop(ledger);

        let raw: HashMap<String, DateTime<Utc>> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 1);
        assert!(raw.contains_key(&format!("{NAMESPACE}https://example.com/other")));
    }

    #[tokio::test]
    async fn test_file_ledger_namespaces_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ttl-ledger.json");
        std::fs::write(&path, r#"{"other.app.key": "2030-01-01T00:00:00Z"}"#).unwrap();

        let ledger = FileLedger::open(&path).await.unwrap();
        assert!(ledger.get("other.app.key").await.is_none());
        ledger.save(KEY, Duration::from_secs(600)).await;

        let raw: HashMap<String, DateTime<Utc>> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.contains_key(&format!("{NAMESPACE}{KEY}")));
        assert!(raw.contains_key("other.app.key"));

        ledger.clear().await;
        assert!(ledger.get(KEY).await.is_none());
        let raw: HashMap<String, DateTime<Utc>> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 1);
        assert!(raw.contains_key("other.app.key"));
    }

    #[tokio::test]
    async fn test_file_ledger_rejects_corrupt_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ttl-ledger.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileLedger::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
    }
}

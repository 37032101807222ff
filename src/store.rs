use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Response head kept alongside cached bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub url: String,
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub stored_at: DateTime<Utc>,
}

impl ResponseMetadata {
    pub fn new(url: impl Into<String>, status_code: u16, headers: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            status_code,
            headers,
            stored_at: Utc::now(),
        }
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: Bytes,
    pub metadata: ResponseMetadata,
}

/// Bytes held by each tier of a byte store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub memory: u64,
    pub disk: u64,
}

/// Capacity-bounded response store. Freshness is not its concern.
#[async_trait]
pub trait ByteStore: Send + Sync {
    async fn store(&self, key: &str, body: Bytes, metadata: ResponseMetadata);

    async fn lookup(&self, key: &str) -> Option<CachedResponse>;

    async fn remove(&self, key: &str);

    async fn remove_all(&self);

    async fn current_usage(&self) -> CacheUsage;
}

#[derive(Debug)]
struct MemoryEntry {
    response: CachedResponse,
    size: u64,
    last_access: u64,
}

#[derive(Debug)]
struct DiskEntry {
    size: u64,
    last_access: u64,
}

/// Sidecar written next to each body file on disk.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    size: u64,
    metadata: ResponseMetadata,
}

#[derive(Debug, Default)]
struct StoreState {
    memory: HashMap<String, MemoryEntry>,
    disk: HashMap<String, DiskEntry>,
    memory_used: u64,
    disk_used: u64,
    tick: u64,
}

impl StoreState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove_memory(&mut self, key: &str) -> bool {
        match self.memory.remove(key) {
            Some(entry) => {
                self.memory_used -= entry.size;
                true
            }
            None => false,
        }
    }

    fn remove_disk(&mut self, key: &str) -> bool {
        match self.disk.remove(key) {
            Some(entry) => {
                self.disk_used -= entry.size;
                true
            }
            None => false,
        }
    }

    fn admit_memory(&mut self, key: &str, response: CachedResponse, capacity: u64) {
        let size = response.body.len() as u64;
        self.remove_memory(key);
        if size > capacity {
            debug!(
                "Entry for {} ({} bytes) exceeds memory capacity {}",
                key, size, capacity
            );
            return;
        }

        while self.memory_used + size > capacity {
            let Some(victim) = least_recent(&self.memory, |e| e.last_access) else {
                break;
            };
            debug!("Evicting {} from memory tier", victim);
            self.remove_memory(&victim);
        }

        let last_access = self.next_tick();
        self.memory.insert(
            key.to_string(),
            MemoryEntry {
                response,
                size,
                last_access,
            },
        );
        self.memory_used += size;
    }

    /// Drops least recently used disk entries until `incoming` bytes fit, returning their keys.
    fn make_disk_room(&mut self, incoming: u64, capacity: u64) -> Vec<String> {
        let mut victims = Vec::new();
        while self.disk_used + incoming > capacity {
            let Some(victim) = least_recent(&self.disk, |e| e.last_access) else {
                break;
            };
            self.remove_disk(&victim);
            victims.push(victim);
        }
        victims
    }
}

fn least_recent<V>(entries: &HashMap<String, V>, last_access: impl Fn(&V) -> u64) -> Option<String> {
    entries
        .iter()
        .min_by_key(|(_, entry)| last_access(entry))
        .map(|(key, _)| key.clone())
}

/// Memory tier backed by an optional disk tier, each evicting least recently used entries.
#[derive(Debug)]
pub struct TieredByteStore {
    disk_root: Option<PathBuf>,
    memory_capacity: u64,
    disk_capacity: u64,
    state: RwLock<StoreState>,
}

impl TieredByteStore {
    pub fn in_memory(memory_capacity: u64) -> Self {
        Self {
            disk_root: None,
            memory_capacity,
            disk_capacity: 0,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Opens a store whose disk tier lives under `root`, reloading entries left by a previous run.
    pub async fn open<P: AsRef<Path>>(
        root: P,
        memory_capacity: u64,
        disk_capacity: u64,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref().to_owned();
        tokio::fs::create_dir_all(&root).await?;

        let mut records = load_records(&root).await?;
        records.sort_by_key(|record| record.metadata.stored_at);

        let mut state = StoreState::default();
        for record in records {
            let last_access = state.next_tick();
            state.disk_used += record.size;
            if let Some(previous) = state.disk.insert(
                record.key,
                DiskEntry {
                    size: record.size,
                    last_access,
                },
            ) {
                state.disk_used -= previous.size;
            }
        }

        for victim in state.make_disk_room(0, disk_capacity) {
            remove_entry_files(&root, &victim).await;
        }

        info!(
            "Opened byte store at {:?}: {} disk entries, {} bytes",
            root,
            state.disk.len(),
            state.disk_used
        );

        Ok(Self {
            disk_root: Some(root),
            memory_capacity,
            disk_capacity,
            state: RwLock::new(state),
        })
    }

    pub fn disk_root(&self) -> Option<&Path> {
        self.disk_root.as_deref()
    }

    async fn write_to_disk(
        root: &Path,
        key: &str,
        body: &[u8],
        metadata: &ResponseMetadata,
    ) -> Result<(), StoreError> {
        let (body_path, meta_path) = entry_paths(root, key);
        if let Some(parent) = body_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let record = DiskRecord {
            key: key.to_string(),
            size: body.len() as u64,
            metadata: metadata.clone(),
        };
        tokio::fs::write(&body_path, body).await?;
        // The sidecar is written last so a torn write leaves no loadable record.
        tokio::fs::write(&meta_path, serde_json::to_vec(&record)?).await?;
        Ok(())
    }

    async fn read_from_disk(root: &Path, key: &str) -> Result<CachedResponse, StoreError> {
        let (body_path, meta_path) = entry_paths(root, key);
        let record: DiskRecord = serde_json::from_slice(&tokio::fs::read(&meta_path).await?)?;
        let body = tokio::fs::read(&body_path).await?;
        Ok(CachedResponse {
            body: Bytes::from(body),
            metadata: record.metadata,
        })
    }
}

#[async_trait]
impl ByteStore for TieredByteStore {
    async fn store(&self, key: &str, body: Bytes, metadata: ResponseMetadata) {
        let size = body.len() as u64;
        debug!("Storing {} bytes for key: {}", size, key);
        let mut state = self.state.write().await;

        if let Some(root) = &self.disk_root {
            state.remove_disk(key);
            if size > self.disk_capacity {
                debug!(
                    "Entry for {} ({} bytes) exceeds disk capacity {}",
                    key, size, self.disk_capacity
                );
                remove_entry_files(root, key).await;
            } else {
                for victim in state.make_disk_room(size, self.disk_capacity) {
                    debug!("Evicting {} from disk tier", victim);
                    remove_entry_files(root, &victim).await;
                }
                match Self::write_to_disk(root, key, &body, &metadata).await {
                    Ok(()) => {
                        let last_access = state.next_tick();
                        state.disk.insert(key.to_string(), DiskEntry { size, last_access });
                        state.disk_used += size;
                    }
                    Err(e) => {
                        warn!("Failed to write {} to disk tier: {}", key, e);
                        remove_entry_files(root, key).await;
                    }
                }
            }
        }

        state.admit_memory(key, CachedResponse { body, metadata }, self.memory_capacity);
    }

    async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let mut state = self.state.write().await;
        let tick = state.next_tick();

        if let Some(entry) = state.memory.get_mut(key) {
            entry.last_access = tick;
            let response = entry.response.clone();
            if let Some(disk_entry) = state.disk.get_mut(key) {
                disk_entry.last_access = tick;
            }
            debug!("Memory hit for key: {}", key);
            return Some(response);
        }

        let root = self.disk_root.as_ref()?;
        match state.disk.get_mut(key) {
            Some(entry) => entry.last_access = tick,
            None => {
                debug!("Store miss for key: {}", key);
                return None;
            }
        }

        match Self::read_from_disk(root, key).await {
            Ok(response) => {
                debug!("Disk hit for key: {}", key);
                state.admit_memory(key, response.clone(), self.memory_capacity);
                Some(response)
            }
            Err(e) => {
                warn!("Failed to read {} from disk tier: {}", key, e);
                state.remove_disk(key);
                remove_entry_files(root, key).await;
                None
            }
        }
    }

    async fn remove(&self, key: &str) {
        let mut state = self.state.write().await;
        let in_memory = state.remove_memory(key);
        let on_disk = state.remove_disk(key);
        if let Some(root) = &self.disk_root {
            if on_disk {
                remove_entry_files(root, key).await;
            }
        }
        if in_memory || on_disk {
            debug!("Removed key: {}", key);
        }
    }

    async fn remove_all(&self) {
        let mut state = self.state.write().await;
        let removed = state.memory.len().max(state.disk.len());
        let disk_keys: Vec<String> = state.disk.drain().map(|(key, _)| key).collect();
        state.memory.clear();
        state.memory_used = 0;
        state.disk_used = 0;

        // Only entry files go; anything else sharing the directory is left alone.
        if let Some(root) = &self.disk_root {
            for key in &disk_keys {
                remove_entry_files(root, key).await;
                prune_empty_shards(root, key).await;
            }
        }
        info!("Removed all cached responses ({} entries)", removed);
    }

    async fn current_usage(&self) -> CacheUsage {
        let state = self.state.read().await;
        CacheUsage {
            memory: state.memory_used,
            disk: state.disk_used,
        }
    }
}

/// Body and sidecar paths for `key`, sharded by the first two bytes of its SHA-256.
fn entry_paths(root: &Path, key: &str) -> (PathBuf, PathBuf) {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let dir = root.join(&hash[0..2]).join(&hash[2..4]);
    (
        dir.join(format!("{}.body", hash)),
        dir.join(format!("{}.meta", hash)),
    )
}

async fn remove_entry_files(root: &Path, key: &str) {
    let (body_path, meta_path) = entry_paths(root, key);
    for path in [meta_path, body_path] {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove cache file {:?}: {}", path, e);
            }
        }
    }
}

/// Removes the shard directories holding `key` once they are empty.
async fn prune_empty_shards(root: &Path, key: &str) {
    let (body_path, _) = entry_paths(root, key);
    let mut dir = body_path.parent();
    while let Some(shard) = dir.filter(|shard| *shard != root) {
        // `remove_dir` refuses non-empty directories.
        if tokio::fs::remove_dir(shard).await.is_err() {
            break;
        }
        dir = shard.parent();
    }
}

fn is_shard_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| {
            name.len() == 2 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
}

async fn load_records(root: &Path) -> Result<Vec<DiskRecord>, StoreError> {
    let mut records = Vec::new();
    for shard in subdirectories(root).await? {
        for leaf in subdirectories(&shard).await? {
            let mut read_dir = tokio::fs::read_dir(&leaf).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("meta") {
                    continue;
                }
                match load_record(&path).await {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping unreadable cache record {:?}: {}", path, e),
                }
            }
        }
    }
    Ok(records)
}

async fn load_record(meta_path: &Path) -> Result<DiskRecord, StoreError> {
    let record: DiskRecord = serde_json::from_slice(&tokio::fs::read(meta_path).await?)?;
    let body_len = tokio::fs::metadata(meta_path.with_extension("body")).await?.len();
    if body_len != record.size {
        return Err(StoreError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("body is {} bytes, record says {}", body_len, record.size),
        )));
    }
    Ok(record)
}

async fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut dirs = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if is_shard_name(&path) && entry.file_type().await?.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

//! Installed-patch cache
//!
//! Records what was last installed or pushed for each (device, application
//! id) pair. The decision engine compares against it and the deploy path
//! writes the resource timestamp back after a successful push.
//!
//! Writes are last-writer-wins per key. A missing or corrupt store reads as
//! empty, which routes the next decision to a full build.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use irun_core::prelude::*;
use irun_core::AgentKey;

/// What the device was last given
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    #[serde(default)]
    pub manifest_hash: Option<String>,
    #[serde(default)]
    pub manifest_resources_hash: Option<String>,
    /// Modification time (ms since the epoch) of the last resource archive sent
    #[serde(default)]
    pub resource_timestamp_ms: Option<u64>,
    #[serde(default)]
    pub build_id: Option<String>,
}

/// Get/set access to installed records
#[cfg_attr(test, mockall::automock)]
pub trait PatchCache: Send + Sync {
    fn get(&self, key: &AgentKey) -> Option<InstalledRecord>;

    /// Replace the whole record for `key`
    fn set(&self, key: &AgentKey, record: InstalledRecord) -> Result<()>;

    /// Update only the resource timestamp, creating the record if needed
    fn set_resource_timestamp(&self, key: &AgentKey, timestamp_ms: u64) -> Result<()>;
}

/// Cache that lives as long as the process
#[derive(Debug, Default)]
pub struct InMemoryPatchCache {
    records: Mutex<HashMap<AgentKey, InstalledRecord>>,
}

impl InMemoryPatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AgentKey, InstalledRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PatchCache for InMemoryPatchCache {
    fn get(&self, key: &AgentKey) -> Option<InstalledRecord> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &AgentKey, record: InstalledRecord) -> Result<()> {
        self.lock().insert(key.clone(), record);
        Ok(())
    }

    fn set_resource_timestamp(&self, key: &AgentKey, timestamp_ms: u64) -> Result<()> {
        self.lock()
            .entry(key.clone())
            .or_default()
            .resource_timestamp_ms = Some(timestamp_ms);
        Ok(())
    }
}

/// On-disk entry; JSON object keys must be strings, so the key is a field
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    #[serde(flatten)]
    key: AgentKey,
    #[serde(flatten)]
    record: InstalledRecord,
}

/// JSON file cache, shared safely between processes through a file lock
#[derive(Debug, Clone)]
pub struct FilePatchCache {
    path: PathBuf,
}

impl FilePatchCache {
    /// Default file name inside the `.irun` directory
    pub const FILENAME: &'static str = "installed.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache at `<project>/.irun/installed.json`
    pub fn for_project(project_path: &Path) -> Self {
        Self::new(
            project_path
                .join(crate::config::IRUN_DIR)
                .join(Self::FILENAME),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Vec<CacheEntry> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => parse_entries(&content, &self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read patch cache {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }

    /// Read-modify-write under an exclusive lock
    fn update(&self, apply: impl FnOnce(&mut Vec<CacheEntry>)) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::cache(format!("Failed to create {:?}: {}", parent, e)))?;
        }

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| Error::cache(format!("Failed to open {:?}: {}", self.path, e)))?;

        file.lock_exclusive()
            .map_err(|e| Error::cache(format!("Failed to lock {:?}: {}", self.path, e)))?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let mut entries = parse_entries(&content, &self.path);

        apply(&mut entries);

        let json = serde_json::to_string_pretty(&entries)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(json.as_bytes())?;
        file.flush()?;

        // Lock is released when the file is dropped
        debug!("Wrote {} cache entries to {:?}", entries.len(), self.path);
        Ok(())
    }
}

fn parse_entries(content: &str, path: &Path) -> Vec<CacheEntry> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str(content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Patch cache {:?} is corrupt, treating it as empty: {}", path, e);
            Vec::new()
        }
    }
}

fn entry_mut<'a>(entries: &'a mut Vec<CacheEntry>, key: &AgentKey) -> &'a mut CacheEntry {
    match entries.iter().position(|entry| &entry.key == key) {
        Some(index) => &mut entries[index],
        None => {
            entries.push(CacheEntry {
                key: key.clone(),
                record: InstalledRecord::default(),
            });
            let last = entries.len() - 1;
            &mut entries[last]
        }
    }
}

impl PatchCache for FilePatchCache {
    fn get(&self, key: &AgentKey) -> Option<InstalledRecord> {
        self.load()
            .into_iter()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.record)
    }

    fn set(&self, key: &AgentKey, record: InstalledRecord) -> Result<()> {
        self.update(|entries| entry_mut(entries, key).record = record)
    }

    fn set_resource_timestamp(&self, key: &AgentKey, timestamp_ms: u64) -> Result<()> {
        self.update(|entries| {
            entry_mut(entries, key).record.resource_timestamp_ms = Some(timestamp_ms);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key() -> AgentKey {
        AgentKey::new("emulator-5554", "com.example.app")
    }

    fn record() -> InstalledRecord {
        InstalledRecord {
            manifest_hash: Some("m1".into()),
            manifest_resources_hash: Some("r1".into()),
            resource_timestamp_ms: Some(1_000),
            build_id: Some("b1".into()),
        }
    }

    #[test]
    fn test_in_memory_set_and_get() {
        let cache = InMemoryPatchCache::new();
        assert!(cache.get(&key()).is_none());

        cache.set(&key(), record()).unwrap();
        assert_eq!(cache.get(&key()), Some(record()));

        let other = AgentKey::new("emulator-5556", "com.example.app");
        assert!(cache.get(&other).is_none());
    }

    #[test]
    fn test_in_memory_resource_timestamp_touches_one_field() {
        let cache = InMemoryPatchCache::new();
        cache.set(&key(), record()).unwrap();
        cache.set_resource_timestamp(&key(), 2_000).unwrap();

        let updated = cache.get(&key()).unwrap();
        assert_eq!(updated.resource_timestamp_ms, Some(2_000));
        assert_eq!(updated.manifest_hash.as_deref(), Some("m1"));
    }

    #[test]
    fn test_file_cache_survives_reopen() {
        let temp = tempdir().unwrap();
        let cache = FilePatchCache::for_project(temp.path());
        cache.set(&key(), record()).unwrap();

        let reopened = FilePatchCache::for_project(temp.path());
        assert_eq!(reopened.get(&key()), Some(record()));
        assert!(temp.path().join(".irun/installed.json").exists());
    }

    #[test]
    fn test_file_cache_keeps_other_keys() {
        let temp = tempdir().unwrap();
        let cache = FilePatchCache::new(temp.path().join("cache.json"));
        let other = AgentKey::new("emulator-5556", "com.example.other");

        cache.set(&key(), record()).unwrap();
        cache.set_resource_timestamp(&other, 5).unwrap();
        cache.set_resource_timestamp(&key(), 9).unwrap();

        assert_eq!(cache.get(&key()).unwrap().resource_timestamp_ms, Some(9));
        assert_eq!(cache.get(&key()).unwrap().build_id.as_deref(), Some("b1"));
        assert_eq!(cache.get(&other).unwrap().resource_timestamp_ms, Some(5));
        assert!(cache.get(&other).unwrap().manifest_hash.is_none());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.json");
        std::fs::write(&path, "[{ this is not json").unwrap();

        let cache = FilePatchCache::new(&path);
        assert!(cache.get(&key()).is_none());

        // Writing replaces the corrupt content
        cache.set(&key(), record()).unwrap();
        assert_eq!(cache.get(&key()), Some(record()));
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let temp = tempdir().unwrap();
        let cache = FilePatchCache::new(temp.path().join("nope/cache.json"));
        assert!(cache.get(&key()).is_none());
    }
}

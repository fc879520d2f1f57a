//! Durable string sets (honeypots, whitelist, suspicious and phishing addresses)

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::LOCK_TIMEOUT;
use crate::error::StateError;

/// On-disk shapes accepted when loading
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredSet {
    List(Vec<String>),
    Wrapped { addresses: Vec<String> },
}

#[derive(Debug, Serialize)]
struct StoredList<'a>(&'a BTreeSet<String>);

/// Deduplicated set of identifiers backed by a JSON file.
///
/// Missing or corrupt files load as an empty set. Every mutation is flushed
/// to disk; a failed flush is logged and the in-memory state stays
/// authoritative.
#[derive(Debug)]
pub struct PersistentSet {
    name: &'static str,
    path: PathBuf,
    members: RwLock<BTreeSet<String>>,
    flush_lock: Mutex<()>,
}

impl PersistentSet {
    /// Load the set stored at `path`
    pub fn load<P: AsRef<Path>>(name: &'static str, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let members = Self::read_file(name, &path);

        info!(target: "STORE", "Loaded {} {} entries", members.len(), name);

        Self {
            name,
            path,
            members: RwLock::new(members),
            flush_lock: Mutex::new(()),
        }
    }

    fn read_file(name: &str, path: &Path) -> BTreeSet<String> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeSet::new(),
            Err(e) => {
                warn!(target: "STORE", "Cannot read {} ({}): {} - starting empty", name, path.display(), e);
                return BTreeSet::new();
            }
        };

        match serde_json::from_str::<StoredSet>(&raw) {
            Ok(StoredSet::List(items)) | Ok(StoredSet::Wrapped { addresses: items }) => {
                items.into_iter().collect()
            }
            Err(e) => {
                warn!(target: "STORE", "Corrupt {} file ({}): {} - starting empty", name, path.display(), e);
                BTreeSet::new()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn contains(&self, id: &str) -> Result<bool, StateError> {
        let members = self
            .members
            .try_read_for(LOCK_TIMEOUT)
            .ok_or_else(|| StateError::read(self.name))?;
        Ok(members.contains(id))
    }

    /// Insert `id`; returns true when it was not already present
    pub fn add(&self, id: &str) -> Result<bool, StateError> {
        let inserted = {
            let mut members = self
                .members
                .try_write_for(LOCK_TIMEOUT)
                .ok_or_else(|| StateError::write(self.name))?;
            members.insert(id.to_string())
        };

        if inserted {
            debug!(target: "STORE", "{} += {}", self.name, id);
            self.flush();
        }
        Ok(inserted)
    }

    /// Remove `id`; returns true when it was present
    pub fn remove(&self, id: &str) -> Result<bool, StateError> {
        let removed = {
            let mut members = self
                .members
                .try_write_for(LOCK_TIMEOUT)
                .ok_or_else(|| StateError::write(self.name))?;
            members.remove(id)
        };

        if removed {
            debug!(target: "STORE", "{} -= {}", self.name, id);
            self.flush();
        }
        Ok(removed)
    }

    pub fn snapshot(&self) -> Result<BTreeSet<String>, StateError> {
        self.members
            .try_read_for(LOCK_TIMEOUT)
            .map(|m| m.clone())
            .ok_or_else(|| StateError::read(self.name))
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current contents to disk
    pub fn save(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        let snapshot = self.snapshot()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&StoredList(&snapshot))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn flush(&self) {
        if let Err(e) = self.save() {
            error!(target: "STORE", "Failed to persist {}: {:#}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_is_idempotent_and_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("honeypots.json");

        let set = PersistentSet::load("honeypots", &path);
        assert!(set.add("mint1").unwrap());
        assert!(!set.add("mint1").unwrap());
        assert!(set.add("mint0").unwrap());
        assert_eq!(set.len(), 2);

        let reloaded = PersistentSet::load("honeypots", &path);
        assert!(reloaded.contains("mint1").unwrap());
        assert_eq!(
            reloaded.snapshot().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["mint0".to_string(), "mint1".to_string()]
        );

        // Stored as an ordered JSON list
        let raw: Vec<String> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, vec!["mint0", "mint1"]);
    }

    #[test]
    fn test_remove_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("honeypots.json");

        let set = PersistentSet::load("honeypots", &path);
        set.add("mint1").unwrap();
        assert!(set.remove("mint1").unwrap());
        assert!(!set.remove("mint1").unwrap());

        let reloaded = PersistentSet::load("honeypots", &path);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("whitelist.json");
        fs::write(&path, "{ not json").unwrap();

        let set = PersistentSet::load("whitelist", &path);
        assert!(set.is_empty());

        // And can be written over
        set.add("addr").unwrap();
        assert!(PersistentSet::load("whitelist", &path).contains("addr").unwrap());
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let set = PersistentSet::load("suspicious", dir.path().join("nested/missing.json"));
        assert!(set.is_empty());
        set.add("addr").unwrap();
        assert!(dir.path().join("nested/missing.json").exists());
    }

    #[test]
    fn test_loads_wrapped_address_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("phishing_addresses.json");
        fs::write(&path, r#"{"addresses": ["a", "b", "a"]}"#).unwrap();

        let set = PersistentSet::load("phishing", &path);
        assert_eq!(set.len(), 2);
        assert!(set.contains("b").unwrap());
    }
}

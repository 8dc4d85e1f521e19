//! Per-photo metadata (likes), persisted as one JSON file.
//!
//! The whole map lives in memory behind one lock. Every mutation rewrites the
//! file under that lock, through a temp file and a rename, and only reaches
//! the in-memory map once the file is written.

use crate::errors::BoothError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoMeta {
    #[serde(default)]
    pub liked: bool,
}

#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, PhotoMeta>>,
}

impl MetadataStore {
    /// Load `path`, starting empty when it does not exist.
    ///
    /// A corrupt file is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, PhotoMeta>>(&text) {
                Ok(entries) => {
                    log::info!("Loaded metadata for {} photos", entries.len());
                    entries
                }
                Err(e) => {
                    log::warn!("Ignoring unreadable metadata {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!("Cannot read metadata {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_liked(&self, name: &str) -> bool {
        self.lock().get(name).is_some_and(|m| m.liked)
    }

    pub fn snapshot(&self) -> BTreeMap<String, PhotoMeta> {
        self.lock().clone()
    }

    /// Flip the like flag, creating the entry if needed. Returns the new value.
    pub fn toggle_like(&self, name: &str) -> Result<bool, BoothError> {
        let mut entries = self.lock();
        let mut updated = entries.clone();
        let entry = updated.entry(name.to_string()).or_default();
        entry.liked = !entry.liked;
        let liked = entry.liked;
        self.persist(&updated)?;
        *entries = updated;
        Ok(liked)
    }

    /// Drop the entry for a deleted photo. Returns whether one existed.
    pub fn remove(&self, name: &str) -> Result<bool, BoothError> {
        let mut entries = self.lock();
        if !entries.contains_key(name) {
            return Ok(false);
        }
        let mut updated = entries.clone();
        updated.remove(name);
        self.persist(&updated)?;
        *entries = updated;
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, PhotoMeta>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, PhotoMeta>) -> Result<(), BoothError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

//! The layer cache
//!
//! Backed by a directory with two files per fingerprint:
//! `entries/<fingerprint>.json` holds the [`EntryMeta`] and
//! `layers/<fingerprint>.json` holds the delta of a successful step.
//! Opening the cache only indexes file names; layers are read on first
//! `get`. Entries are write-once: putting different content under an
//! existing fingerprint is corruption.

use crate::cache::entry::{CacheEntry, EntryMeta, EntryStatus, Outcome};
use crate::cache::fingerprint::Fingerprint;
use crate::error::{PlinthError, PlinthResult};
use crate::layer::Delta;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Subdirectory holding one metadata file per entry
const ENTRIES_DIR: &str = "entries";
/// Subdirectory holding one delta file per successful entry
const LAYERS_DIR: &str = "layers";

/// Index slot for one fingerprint
#[derive(Debug, Clone)]
enum Slot {
    /// Known from its file name, not read yet
    OnDisk,
    Loaded(Arc<CacheEntry>),
}

/// On-disk layer blob; carries its fingerprint so a misplaced file is caught
#[derive(Deserialize)]
struct StoredLayer {
    fingerprint: Fingerprint,
    delta: Delta,
}

#[derive(Serialize)]
struct StoredLayerRef<'a> {
    fingerprint: Fingerprint,
    delta: &'a Delta,
}

/// Content-addressed store of step outcomes, safe to share across runs
#[derive(Debug)]
pub struct LayerCache {
    slots: RwLock<HashMap<Fingerprint, Slot>>,
    dir: Option<PathBuf>,
}

impl LayerCache {
    /// Cache that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            dir: None,
        }
    }

    /// Open (or create) a persistent cache rooted at `dir`.
    ///
    /// Only file names are read here; entry contents are checked when used.
    pub async fn open(dir: &Path) -> PlinthResult<Self> {
        for sub in [ENTRIES_DIR, LAYERS_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path).await.map_err(|e| {
                PlinthError::io(format!("creating cache directory {}", path.display()), e)
            })?;
        }

        let entries_dir = dir.join(ENTRIES_DIR);
        let mut slots = HashMap::new();
        let mut dir_entries = fs::read_dir(&entries_dir)
            .await
            .map_err(|e| PlinthError::io("reading cache directory", e))?;

        while let Some(item) = dir_entries
            .next_entry()
            .await
            .map_err(|e| PlinthError::io("reading cache entry", e))?
        {
            match fingerprint_from_name(&item.path()) {
                Some(fp) => {
                    slots.insert(fp, Slot::OnDisk);
                }
                None => debug!("Skipping {} in cache directory", item.path().display()),
            }
        }

        debug!("Opened cache at {} with {} entries", dir.display(), slots.len());
        Ok(Self {
            slots: RwLock::new(slots),
            dir: Some(dir.to_path_buf()),
        })
    }

    /// Persistence directory, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Look up an entry, reading it from disk on first use.
    ///
    /// An unreadable or inconsistent entry is logged and reported absent.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CacheEntry>> {
        match self.slots.read().await.get(fingerprint) {
            Some(Slot::Loaded(entry)) => return Some(Arc::clone(entry)),
            Some(Slot::OnDisk) => {}
            None => return None,
        }

        let dir = self.dir.as_ref()?;
        let entry = match read_entry(dir, fingerprint).await {
            Ok(entry) => Arc::new(entry),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", fingerprint.short(), e);
                return None;
            }
        };

        let mut slots = self.slots.write().await;
        match slots.get(fingerprint) {
            Some(Slot::Loaded(existing)) => Some(Arc::clone(existing)),
            Some(Slot::OnDisk) => {
                slots.insert(*fingerprint, Slot::Loaded(Arc::clone(&entry)));
                Some(entry)
            }
            // removed while we were reading
            None => None,
        }
    }

    /// Store an entry.
    ///
    /// Re-putting identical content is a no-op that returns the stored entry;
    /// divergent content under the same fingerprint fails with
    /// `CacheCorruption`. The on-disk metadata is consulted too, so another
    /// process racing on the same directory is caught as well.
    pub async fn put(&self, entry: CacheEntry) -> PlinthResult<Arc<CacheEntry>> {
        let mut slots = self.slots.write().await;
        let fingerprint = entry.fingerprint;

        let existing = match slots.get(&fingerprint) {
            Some(Slot::Loaded(existing)) => Some(existing.meta()),
            _ => self.read_persisted_meta(&fingerprint).await,
        };

        if let Some(existing) = existing {
            let incoming = entry.meta();
            if !existing.same_content(&incoming) {
                return Err(PlinthError::CacheCorruption {
                    fingerprint: fingerprint.to_hex(),
                    reason: format!(
                        "step '{}' already recorded {} here, refusing divergent {}",
                        existing.step, existing.status, incoming.status
                    ),
                });
            }
            debug!("Cache put for {} matched existing entry", fingerprint.short());
            if let Some(Slot::Loaded(loaded)) = slots.get(&fingerprint) {
                return Ok(Arc::clone(loaded));
            }
            let entry = Arc::new(entry);
            slots.insert(fingerprint, Slot::Loaded(Arc::clone(&entry)));
            return Ok(entry);
        }

        if let Some(dir) = &self.dir {
            write_entry(dir, &entry).await?;
        }

        let entry = Arc::new(entry);
        slots.insert(fingerprint, Slot::Loaded(Arc::clone(&entry)));
        debug!(
            "Cached {} for step '{}' at {}",
            entry.status(),
            entry.step,
            fingerprint.short()
        );
        Ok(entry)
    }

    /// Forget an entry (e.g. to retry a recorded failure). Returns whether it existed.
    pub async fn remove(&self, fingerprint: &Fingerprint) -> PlinthResult<bool> {
        let mut slots = self.slots.write().await;
        let mut existed = slots.remove(fingerprint).is_some();

        if let Some(dir) = &self.dir {
            // metadata first, so a half-removed entry is never indexed
            for path in [meta_path(dir, fingerprint), layer_path(dir, fingerprint)] {
                if path.exists() {
                    fs::remove_file(&path).await.map_err(|e| {
                        PlinthError::io(format!("removing cache entry {}", path.display()), e)
                    })?;
                    existed = true;
                }
            }
        }

        Ok(existed)
    }

    /// Metadata of all readable entries, newest first. Layer contents are not read.
    pub async fn list(&self) -> Vec<EntryMeta> {
        let snapshot: Vec<(Fingerprint, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(fp, slot)| (*fp, slot.clone()))
            .collect();

        let mut all = Vec::with_capacity(snapshot.len());
        for (fp, slot) in snapshot {
            let meta = match slot {
                Slot::Loaded(entry) => Some(entry.meta()),
                Slot::OnDisk => self.read_persisted_meta(&fp).await,
            };
            all.extend(meta);
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Find an entry's metadata by full fingerprint or unique hex prefix
    pub async fn find(&self, prefix: &str) -> PlinthResult<EntryMeta> {
        let prefix = prefix.to_ascii_lowercase();
        let matched = {
            let slots = self.slots.read().await;
            let mut matches = slots
                .iter()
                .filter(|(fp, _)| fp.to_hex().starts_with(&prefix))
                .map(|(fp, slot)| (*fp, slot.clone()));
            match (matches.next(), matches.next()) {
                (Some(found), None) if !prefix.is_empty() => found,
                (Some(_), _) => {
                    return Err(PlinthError::User(format!(
                        "Fingerprint prefix '{}' is ambiguous",
                        prefix
                    )))
                }
                (None, _) => return Err(PlinthError::CacheEntryNotFound(prefix.clone())),
            }
        };

        let meta = match matched {
            (_, Slot::Loaded(entry)) => Some(entry.meta()),
            (fp, Slot::OnDisk) => self.read_persisted_meta(&fp).await,
        };
        meta.ok_or(PlinthError::CacheEntryNotFound(prefix))
    }

    /// Entries older than `days` (0 disables)
    pub async fn stale(&self, days: u32) -> Vec<EntryMeta> {
        if days == 0 {
            return vec![];
        }
        self.list()
            .await
            .into_iter()
            .filter(|e| e.is_older_than_days(days))
            .collect()
    }

    /// Remove entries older than `days`, returning how many were dropped
    pub async fn gc(&self, days: u32) -> PlinthResult<usize> {
        let stale = self.stale(days).await;
        for entry in &stale {
            self.remove(&entry.fingerprint).await?;
        }
        if !stale.is_empty() {
            info!("Removed {} cache entries older than {} days", stale.len(), days);
        }
        Ok(stale.len())
    }

    /// Drop every entry
    pub async fn clear(&self) -> PlinthResult<usize> {
        let fingerprints: Vec<Fingerprint> = self.slots.read().await.keys().copied().collect();
        for fp in &fingerprints {
            self.remove(fp).await?;
        }
        Ok(fingerprints.len())
    }

    /// Number of indexed entries
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    /// Total bytes of layer content held, from entry metadata
    pub async fn total_size(&self) -> u64 {
        self.list().await.iter().map(|e| e.size_bytes).sum()
    }

    async fn read_persisted_meta(&self, fingerprint: &Fingerprint) -> Option<EntryMeta> {
        let dir = self.dir.as_ref()?;
        let path = meta_path(dir, fingerprint);
        if !path.exists() {
            return None;
        }
        match read_meta(&path, fingerprint).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn meta_path(dir: &Path, fingerprint: &Fingerprint) -> PathBuf {
    dir.join(ENTRIES_DIR).join(format!("{}.json", fingerprint.to_hex()))
}

fn layer_path(dir: &Path, fingerprint: &Fingerprint) -> PathBuf {
    dir.join(LAYERS_DIR).join(format!("{}.json", fingerprint.to_hex()))
}

/// `<hex>.json` -> fingerprint; anything else (temp files, strays) is skipped
fn fingerprint_from_name(path: &Path) -> Option<Fingerprint> {
    if !path.extension().is_some_and(|ext| ext == "json") {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Read metadata, checking it belongs to the fingerprint in its file name
async fn read_meta(path: &Path, fingerprint: &Fingerprint) -> PlinthResult<EntryMeta> {
    let content = fs::read(path)
        .await
        .map_err(|e| PlinthError::io(format!("reading {}", path.display()), e))?;
    let meta: EntryMeta = serde_json::from_slice(&content)?;
    if meta.fingerprint != *fingerprint {
        return Err(PlinthError::CacheCorruption {
            fingerprint: fingerprint.to_hex(),
            reason: format!("file holds entry for {}", meta.fingerprint),
        });
    }
    Ok(meta)
}

/// Read a full entry: metadata plus, for successes, the layer delta
async fn read_entry(dir: &Path, fingerprint: &Fingerprint) -> PlinthResult<CacheEntry> {
    let meta = read_meta(&meta_path(dir, fingerprint), fingerprint).await?;

    let delta = match meta.status {
        EntryStatus::Failure => None,
        EntryStatus::Success => {
            let path = layer_path(dir, fingerprint);
            let content = fs::read(&path)
                .await
                .map_err(|e| PlinthError::io(format!("reading {}", path.display()), e))?;
            let stored: StoredLayer = serde_json::from_slice(&content)?;
            if stored.fingerprint != *fingerprint {
                return Err(PlinthError::CacheCorruption {
                    fingerprint: fingerprint.to_hex(),
                    reason: format!("layer file holds delta for {}", stored.fingerprint),
                });
            }
            if meta.digest != Some(stored.delta.digest()) {
                return Err(PlinthError::CacheCorruption {
                    fingerprint: fingerprint.to_hex(),
                    reason: "layer contents do not match recorded digest".to_string(),
                });
            }
            Some(stored.delta)
        }
    };

    CacheEntry::from_parts(meta, delta).ok_or_else(|| PlinthError::CacheCorruption {
        fingerprint: fingerprint.to_hex(),
        reason: "metadata status does not match its contents".to_string(),
    })
}

/// Write the layer, then the metadata, each via temp file + rename so
/// readers never see a partial file and an indexed entry always has its layer
async fn write_entry(dir: &Path, entry: &CacheEntry) -> PlinthResult<()> {
    if let Outcome::Success { delta } = &entry.outcome {
        let stored = StoredLayerRef {
            fingerprint: entry.fingerprint,
            delta,
        };
        write_atomic(
            &dir.join(LAYERS_DIR),
            &layer_path(dir, &entry.fingerprint),
            &serde_json::to_vec(&stored)?,
        )
        .await?;
    }

    write_atomic(
        &dir.join(ENTRIES_DIR),
        &meta_path(dir, &entry.fingerprint),
        &serde_json::to_vec(&entry.meta())?,
    )
    .await
}

async fn write_atomic(parent: &Path, path: &Path, content: &[u8]) -> PlinthResult<()> {
    let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    fs::write(&tmp, content)
        .await
        .map_err(|e| PlinthError::io(format!("writing {}", tmp.display()), e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| PlinthError::io(format!("renaming into {}", path.display()), e))?;
    Ok(())
}

//! Filesystem deltas
//!
//! A delta is the set of path changes one step made to the environment.
//! Paths are relative, `/`-separated and normalized so that two deltas with
//! the same changes serialize to the same bytes.

use crate::cache::Fingerprint;
use crate::error::{PlinthError, PlinthResult};
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// A single path change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileChange {
    /// Regular file with the given contents
    File {
        #[serde(with = "hex_bytes")]
        contents: Vec<u8>,
        #[serde(default)]
        executable: bool,
    },
    /// Directory (created, contents described by other entries)
    Dir,
    /// Symbolic link
    Symlink { target: String },
    /// Path (and everything below it) removed
    Remove,
}

impl FileChange {
    /// Regular, non-executable file
    pub fn file(contents: impl Into<Vec<u8>>) -> Self {
        Self::File {
            contents: contents.into(),
            executable: false,
        }
    }

    /// Bytes this change contributes to a layer
    pub fn size_bytes(&self) -> u64 {
        match self {
            Self::File { contents, .. } => contents.len() as u64,
            Self::Symlink { target } => target.len() as u64,
            Self::Dir | Self::Remove => 0,
        }
    }
}

/// Serde bridge for `Vec<u8>` as a lowercase hex string
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Normalize a relative layer path.
///
/// Accepts `a/b`, `./a//b/`, `/a/b` (leading slash dropped) and rejects
/// empty paths and `..` components.
pub fn normalize_path(path: &str) -> PlinthResult<String> {
    let invalid = |reason: &str| PlinthError::LayerPathInvalid {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return Err(invalid("parent components are not allowed")),
            p if p.contains('\0') => return Err(invalid("contains a NUL byte")),
            p => parts.push(p),
        }
    }

    if parts.is_empty() {
        return Err(invalid("path is empty"));
    }
    Ok(parts.join("/"))
}

/// Proper ancestors of a normalized path, nearest first
pub(crate) fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(move |(idx, _)| &path[..idx])
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
}

/// Ordered set of path changes produced by one step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    entries: BTreeMap<String, FileChange>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change at `path`, replacing any earlier change to that path
    pub fn insert(&mut self, path: &str, change: FileChange) -> PlinthResult<()> {
        let path = normalize_path(path)?;
        self.entries.insert(path, change);
        Ok(())
    }

    /// Record a regular file
    pub fn write(&mut self, path: &str, contents: impl Into<Vec<u8>>) -> PlinthResult<()> {
        self.insert(path, FileChange::file(contents))
    }

    /// Record a directory
    pub fn mkdir(&mut self, path: &str) -> PlinthResult<()> {
        self.insert(path, FileChange::Dir)
    }

    /// Record a removal
    pub fn remove(&mut self, path: &str) -> PlinthResult<()> {
        self.insert(path, FileChange::Remove)
    }

    /// Build from already-normalized entries
    pub(crate) fn from_entries(entries: BTreeMap<String, FileChange>) -> Self {
        Self { entries }
    }

    pub fn get(&self, path: &str) -> Option<&FileChange> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FileChange> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes of file contents carried by this delta
    pub fn size_bytes(&self) -> u64 {
        self.entries.values().map(FileChange::size_bytes).sum()
    }

    /// Content digest over the canonical JSON encoding
    pub fn digest(&self) -> Fingerprint {
        // BTreeMap ordering makes the encoding canonical
        let bytes = serde_json::to_vec(&self.entries).unwrap_or_default();
        Fingerprint::of_bytes(&bytes)
    }

    /// Re-root every path under `prefix`
    pub fn prefixed(&self, prefix: &str) -> PlinthResult<Self> {
        let prefix = normalize_path(prefix)?;
        let mut entries = BTreeMap::new();
        entries.insert(prefix.clone(), FileChange::Dir);
        for (path, change) in &self.entries {
            entries.insert(format!("{}/{}", prefix, path), change.clone());
        }
        Ok(Self { entries })
    }
}

impl IntoIterator for Delta {
    type Item = (String, FileChange);
    type IntoIter = btree_map::IntoIter<String, FileChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

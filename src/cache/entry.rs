//! Cache entry records
//!
//! An entry maps one fingerprint to what happened when its step ran:
//! either the layer it produced or the failure it raised. [`EntryMeta`] is
//! the same record without the layer contents, small enough to list.

use crate::cache::fingerprint::Fingerprint;
use crate::error::{StepError, StepErrorKind};
use crate::layer::{Delta, Layer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Status flag of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Success,
    Failure,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// A failure as recorded in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Attach the step identifier to produce a reportable error
    pub fn into_error(self, step: &str, cached: bool) -> StepError {
        StepError {
            step: step.to_string(),
            kind: self.kind,
            message: self.message,
            cached,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What a step produced
#[derive(Debug, Clone)]
pub enum Outcome {
    Success { delta: Arc<Delta> },
    Failure { failure: StepFailure },
}

impl Outcome {
    pub fn status(&self) -> EntryStatus {
        match self {
            Self::Success { .. } => EntryStatus::Success,
            Self::Failure { .. } => EntryStatus::Failure,
        }
    }
}

/// One fingerprint -> outcome mapping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key
    pub fingerprint: Fingerprint,
    /// Step that produced the entry
    pub step: String,
    /// Produced layer or recorded failure
    pub outcome: Outcome,
    /// When the entry was recorded
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Record a successful step
    pub fn success(fingerprint: Fingerprint, step: impl Into<String>, delta: Delta) -> Self {
        Self {
            fingerprint,
            step: step.into(),
            outcome: Outcome::Success {
                delta: Arc::new(delta),
            },
            created_at: Utc::now(),
        }
    }

    /// Record a failed step
    pub fn failure(fingerprint: Fingerprint, step: impl Into<String>, failure: StepFailure) -> Self {
        Self {
            fingerprint,
            step: step.into(),
            outcome: Outcome::Failure { failure },
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> EntryStatus {
        self.outcome.status()
    }

    /// The layer this entry describes, if the step succeeded
    pub fn layer(&self) -> Option<Layer> {
        match &self.outcome {
            Outcome::Success { delta } => Some(Layer::new(
                self.fingerprint,
                self.step.clone(),
                Arc::clone(delta),
            )),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_info(&self) -> Option<&StepFailure> {
        match &self.outcome {
            Outcome::Failure { failure } => Some(failure),
            Outcome::Success { .. } => None,
        }
    }

    /// Bytes of layer content held by this entry
    pub fn size_bytes(&self) -> u64 {
        match &self.outcome {
            Outcome::Success { delta } => delta.size_bytes(),
            Outcome::Failure { .. } => 0,
        }
    }

    /// Whether `other` records the same result for the same fingerprint.
    /// Failures compare by kind only.
    pub fn same_content(&self, other: &CacheEntry) -> bool {
        if let (Outcome::Success { delta: a }, Outcome::Success { delta: b }) =
            (&self.outcome, &other.outcome)
        {
            if Arc::ptr_eq(a, b) {
                return self.fingerprint == other.fingerprint && self.step == other.step;
            }
        }
        self.meta().same_content(&other.meta())
    }

    /// Check if this entry is older than the given number of days
    pub fn is_older_than_days(&self, days: u32) -> bool {
        older_than(self.created_at, days)
    }

    /// Metadata record for this entry
    pub fn meta(&self) -> EntryMeta {
        let (digest, changes, failure) = match &self.outcome {
            Outcome::Success { delta } => (Some(delta.digest()), delta.len(), None),
            Outcome::Failure { failure } => (None, 0, Some(failure.clone())),
        };
        EntryMeta {
            fingerprint: self.fingerprint,
            step: self.step.clone(),
            status: self.status(),
            digest,
            changes,
            size_bytes: self.size_bytes(),
            failure,
            created_at: self.created_at,
        }
    }

    /// Rebuild an entry from its metadata and, for successes, its delta
    pub fn from_parts(meta: EntryMeta, delta: Option<Delta>) -> Option<Self> {
        let outcome = match (meta.status, delta, meta.failure) {
            (EntryStatus::Success, Some(delta), _) => Outcome::Success {
                delta: Arc::new(delta),
            },
            (EntryStatus::Failure, None, Some(failure)) => Outcome::Failure { failure },
            _ => return None,
        };
        Some(Self {
            fingerprint: meta.fingerprint,
            step: meta.step,
            outcome,
            created_at: meta.created_at,
        })
    }
}

/// Everything about an entry except the layer contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub fingerprint: Fingerprint,
    pub step: String,
    pub status: EntryStatus,
    /// Digest of the layer delta, for successes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Fingerprint>,
    /// Number of paths the layer changes
    pub changes: usize,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    pub created_at: DateTime<Utc>,
}

impl EntryMeta {
    /// Same comparison as [`CacheEntry::same_content`], without the delta
    pub fn same_content(&self, other: &EntryMeta) -> bool {
        if self.fingerprint != other.fingerprint
            || self.step != other.step
            || self.status != other.status
        {
            return false;
        }
        match (&self.failure, &other.failure) {
            (Some(a), Some(b)) => a.kind == b.kind,
            (None, None) => self.digest == other.digest,
            _ => false,
        }
    }

    pub fn is_older_than_days(&self, days: u32) -> bool {
        older_than(self.created_at, days)
    }
}

fn older_than(created_at: DateTime<Utc>, days: u32) -> bool {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
    created_at < cutoff
}

//! Error types for Plinth
//!
//! All modules use `PlinthResult<T>` as their return type. Manifest and step
//! failures have their own types so callers can match on them without
//! unpacking strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Plinth operations
pub type PlinthResult<T> = Result<T, PlinthError>;

/// Errors raised while reading a dependency manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest line {line}: `{content}`: {reason}")]
    ParseFailure {
        line: usize,
        content: String,
        reason: String,
    },
}

/// Category of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepErrorKind {
    /// Base environment could not be provisioned
    Provision,
    /// Dependency installer failed
    Install,
    /// Source tree could not be materialized
    Source,
    /// Package builder failed
    Build,
    /// Action exceeded its time budget
    Timeout,
    /// External tool was killed by a signal
    Interrupted,
    /// Any other action failure (I/O in the scratch area, spawn failures)
    Action,
}

impl StepErrorKind {
    /// Whether a failure of this kind is a property of the step's inputs and
    /// may be replayed from the cache
    pub fn is_cacheable(self) -> bool {
        !matches!(self, Self::Timeout | Self::Interrupted)
    }
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provision => "provision",
            Self::Install => "install",
            Self::Source => "source",
            Self::Build => "build",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
            Self::Action => "action",
        };
        write!(f, "{}", name)
    }
}

/// A failed step action, as raised by the action or replayed from the cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("step '{step}' failed ({kind}){}: {message}", cached_marker(.cached))]
pub struct StepError {
    /// Identifier of the failing step
    pub step: String,
    /// Failure category
    pub kind: StepErrorKind,
    /// Underlying cause as reported by the action
    pub message: String,
    /// True when replayed from a recorded failure without re-running
    pub cached: bool,
}

fn cached_marker(cached: &bool) -> &'static str {
    if *cached {
        " [cached]"
    } else {
        ""
    }
}

/// All errors that can occur in Plinth
#[derive(Error, Debug)]
pub enum PlinthError {
    // Input errors
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Invalid source tree {path}: {reason}")]
    SourceInvalid { path: PathBuf, reason: String },

    // Execution errors
    #[error(transparent)]
    Step(#[from] StepError),

    #[error("Pipeline failed at step '{step}' (fingerprint {fingerprint}): {source}")]
    Pipeline {
        step: String,
        fingerprint: String,
        #[source]
        source: Box<PlinthError>,
    },

    #[error("Pipeline cancelled before step '{step}'")]
    Cancelled { step: String },

    // Cache errors
    #[error("Cache corruption at {fingerprint}: {reason}")]
    CacheCorruption { fingerprint: String, reason: String },

    #[error("Cache entry not found: {0}")]
    CacheEntryNotFound(String),

    #[error("Invalid fingerprint '{value}': {reason}")]
    FingerprintInvalid { value: String, reason: String },

    #[error("Invalid layer path '{path}': {reason}")]
    LayerPathInvalid { path: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl PlinthError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an error with the step and fingerprint it occurred at
    pub fn at_step(self, step: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self::Pipeline {
            step: step.into(),
            fingerprint: fingerprint.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping positional `Pipeline` wrappers
    pub fn root_cause(&self) -> &PlinthError {
        match self {
            Self::Pipeline { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The step error at the root of this error, if any
    pub fn step_error(&self) -> Option<&StepError> {
        match self.root_cause() {
            Self::Step(e) => Some(e),
            _ => None,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.root_cause() {
            Self::Step(StepError { cached: true, .. }) => {
                Some("This failure was replayed from the cache. Fix the inputs, or run: plinth cache forget <fingerprint>")
            }
            Self::Step(StepError {
                kind: StepErrorKind::Timeout,
                ..
            }) => Some("Raise the step timeout with --timeout or [install]/[build] timeout_secs"),
            Self::Step(StepError {
                kind: StepErrorKind::Interrupted,
                ..
            }) => Some("The tool was killed by a signal. The failure was not cached; run again"),
            Self::CacheCorruption { .. } => {
                Some("A step produced different output for identical inputs. Run: plinth cache clear")
            }
            Self::Manifest(ManifestError::ParseFailure { .. }) => {
                Some("Requirement lines look like: name, name==1.2, name>=2.0,<3")
            }
            _ => None,
        }
    }
}

//! Dependency manifest parsing
//!
//! A manifest is a requirements file: one package per line, optionally
//! followed by a version constraint. Comments and blank lines are ignored.
//!
//! ```text
//! # pinned runtime deps
//! requests >=2.0,<3
//! flask==3.0.2
//! click
//! ```

use crate::error::ManifestError;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Comparison operators accepted in constraint clauses, longest first so
/// that `>=` is not read as `>` followed by `=1.0`.
const OPERATORS: &[&str] = &["===", "==", "!=", ">=", "<=", "~=", ">", "<", "=", "^", "~"];

/// A version constraint such as `>=2.0,<3` or `*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause {
    Any,
    Compare { op: &'static str, version: String },
}

impl VersionConstraint {
    /// Parse a comma-separated constraint
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("empty version constraint".to_string());
        }

        let clauses = input
            .split(',')
            .map(|raw| Self::parse_clause(raw.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { clauses })
    }

    fn parse_clause(raw: &str) -> Result<Clause, String> {
        if raw == "*" {
            return Ok(Clause::Any);
        }

        let op = OPERATORS
            .iter()
            .find(|op| raw.starts_with(**op))
            .copied()
            .ok_or_else(|| format!("constraint clause '{}' has no comparison operator", raw))?;

        let version = raw[op.len()..].trim();
        if version.is_empty() {
            return Err(format!("operator '{}' is missing a version", op));
        }
        if let Some(bad) = version
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '.' | '*' | '+' | '!' | '-')))
        {
            return Err(format!("invalid character '{}' in version '{}'", bad, version));
        }

        Ok(Clause::Compare {
            op,
            version: version.to_string(),
        })
    }

    /// True if the constraint accepts any version
    pub fn is_any(&self) -> bool {
        self.clauses.iter().all(|c| matches!(c, Clause::Any))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|c| match c {
                Clause::Any => "*".to_string(),
                Clause::Compare { op, version } => format!("{}{}", op, version),
            })
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

/// A single declared requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Package name as written
    pub name: String,
    /// Optional version constraint
    pub constraint: Option<VersionConstraint>,
    /// 1-based line number in the manifest file
    pub line: usize,
}

impl Requirement {
    /// Name used for uniqueness checks: lowercase, runs of `-_.` collapsed to `-`
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{} {}", self.name, c),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Ordered, duplicate-free list of requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    requirements: Vec<Requirement>,
}

impl Manifest {
    /// Read and parse a manifest file
    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManifestError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
        let manifest = Self::parse(&content)?;
        debug!(
            "Loaded {} requirement(s) from {}",
            manifest.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Parse manifest text
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut requirements = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            let fail = |reason: String| ManifestError::ParseFailure {
                line: line_no,
                content: raw.trim().to_string(),
                reason,
            };

            let requirement = parse_requirement(line, line_no).map_err(fail)?;

            let key = requirement.normalized_name();
            if let Some(first) = seen.get(&key) {
                return Err(fail(format!(
                    "duplicate requirement '{}' (first declared on line {})",
                    requirement.name, first
                )));
            }
            seen.insert(key, line_no);
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    /// Requirements in declaration order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Look up a requirement by (normalized) name
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        let key = normalize_name(name);
        self.requirements
            .iter()
            .find(|r| r.normalized_name() == key)
    }

    /// Canonical rendering: one `name constraint` line per requirement.
    ///
    /// Comments, blank lines and spacing do not affect the output, so
    /// cosmetic edits to the file keep the same fingerprint.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for req in &self.requirements {
            out.push_str(&req.to_string());
            out.push('\n');
        }
        out
    }

    /// Canonical rendering as bytes
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.canonical().into_bytes()
    }
}

/// Cut a comment: `#` at the start of the line or after whitespace.
/// A `#` glued to a token stays and is judged by the grammar.
fn strip_comment(line: &str) -> &str {
    let mut prev_is_space = true;
    for (pos, c) in line.char_indices() {
        if c == '#' && prev_is_space {
            return &line[..pos];
        }
        prev_is_space = c.is_whitespace();
    }
    line
}

fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

fn parse_requirement(line: &str, line_no: usize) -> Result<Requirement, String> {
    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    let rest = line[name_end..].trim();

    validate_name(name)?;

    let constraint = if rest.is_empty() {
        None
    } else {
        Some(VersionConstraint::parse(rest)?)
    };

    Ok(Requirement {
        name: name.to_string(),
        constraint,
        line: line_no,
    })
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("missing package name".to_string());
    }
    let first = name.chars().next().unwrap_or('-');
    let last = name.chars().last().unwrap_or('-');
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(format!(
            "package name '{}' must start and end with a letter or digit",
            name
        ));
    }
    Ok(())
}

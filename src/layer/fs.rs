//! On-disk snapshots, diffs and materialization
//!
//! External tools need a real directory to work in. A [`Workspace`] writes a
//! layer chain out to a scratch directory, lets the tool mutate it, and turns
//! whatever changed back into a [`Delta`].

use crate::error::{PlinthError, PlinthResult};
use crate::layer::chain::LayerChain;
use crate::layer::delta::{ancestors, Delta, FileChange};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Flat view of a directory tree, keyed by normalized relative path
pub type TreeView = BTreeMap<String, FileChange>;

/// Snapshot every entry below `root`, skipping entries whose file name is
/// listed in `ignore` (and everything below them).
pub async fn snapshot(root: &Path, ignore: &[String]) -> PlinthResult<TreeView> {
    let root = root.to_path_buf();
    let ignore = ignore.to_vec();
    tokio::task::spawn_blocking(move || snapshot_blocking(&root, &ignore))
        .await
        .map_err(|e| PlinthError::Internal(format!("snapshot task failed: {}", e)))?
}

fn snapshot_blocking(root: &Path, ignore: &[String]) -> PlinthResult<TreeView> {
    let mut view = TreeView::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !ignore
                    .iter()
                    .any(|name| e.file_name().to_str() == Some(name.as_str()))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            PlinthError::io(format!("walking {}", root.display()), e.into())
        })?;
        let path = entry.path();
        let rel = relative_key(root, path)?;
        let file_type = entry.file_type();

        let change = if file_type.is_symlink() {
            let target = fs::read_link(path)
                .map_err(|e| PlinthError::io(format!("reading link {}", path.display()), e))?;
            FileChange::Symlink {
                target: target.to_string_lossy().into_owned(),
            }
        } else if file_type.is_dir() {
            FileChange::Dir
        } else if file_type.is_file() {
            let contents = fs::read(path)
                .map_err(|e| PlinthError::io(format!("reading {}", path.display()), e))?;
            let metadata = entry
                .metadata()
                .map_err(|e| PlinthError::io(format!("stat {}", path.display()), e.into()))?;
            FileChange::File {
                contents,
                executable: is_executable(&metadata),
            }
        } else {
            debug!("Skipping special file {}", path.display());
            continue;
        };

        view.insert(rel, change);
    }

    Ok(view)
}

/// Convert an absolute path below `root` into a `/`-separated key
fn relative_key(root: &Path, path: &Path) -> PlinthResult<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| PlinthError::LayerPathInvalid {
            path: path.display().to_string(),
            reason: format!("not below {}", root.display()),
        })?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| PlinthError::LayerPathInvalid {
                    path: path.display().to_string(),
                    reason: "path is not valid UTF-8".to_string(),
                })?;
                parts.push(part);
            }
            _ => {
                return Err(PlinthError::LayerPathInvalid {
                    path: path.display().to_string(),
                    reason: "unexpected path component".to_string(),
                })
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Compute the delta that turns `before` into `after`.
///
/// Removals are collapsed: if a directory disappeared, only the directory
/// itself is recorded, not every file that was inside it.
pub fn diff(before: &TreeView, after: &TreeView) -> Delta {
    let mut entries = BTreeMap::new();

    for (path, change) in after {
        if before.get(path) != Some(change) {
            entries.insert(path.clone(), change.clone());
        }
    }

    for path in before.keys() {
        if after.contains_key(path) {
            continue;
        }
        let parent_gone = ancestors(path).any(|a| before.contains_key(a) && !after.contains_key(a));
        if !parent_gone {
            entries.insert(path.clone(), FileChange::Remove);
        }
    }

    Delta::from_entries(entries)
}

/// Write a tree view (or delta entries) out below `root`
pub async fn materialize(view: TreeView, root: &Path) -> PlinthResult<()> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || materialize_blocking(&view, &root))
        .await
        .map_err(|e| PlinthError::Internal(format!("materialize task failed: {}", e)))?
}

fn materialize_blocking(view: &TreeView, root: &Path) -> PlinthResult<()> {
    // BTreeMap order puts every directory before its children
    for (rel, change) in view {
        // `root` may be removed underneath us (e.g. after a timeout); stop
        // rather than recreate it
        if !root.is_dir() {
            return Err(PlinthError::PathNotFound(root.to_path_buf()));
        }
        let target = root.join(rel);
        let ctx = |what: &str| format!("{} {}", what, target.display());

        match change {
            FileChange::Dir => {
                if target.is_file() || target.is_symlink() {
                    fs::remove_file(&target).map_err(|e| PlinthError::io(ctx("replacing"), e))?;
                }
                create_below(root, &target)?;
            }
            FileChange::File {
                contents,
                executable,
            } => {
                ensure_parent(root, &target)?;
                clear_path(&target)?;
                fs::write(&target, contents).map_err(|e| PlinthError::io(ctx("writing"), e))?;
                set_mode(&target, *executable)?;
            }
            FileChange::Symlink { target: link } => {
                ensure_parent(root, &target)?;
                clear_path(&target)?;
                make_symlink(link, &target)?;
            }
            FileChange::Remove => clear_path(&target)?,
        }
    }
    Ok(())
}

fn ensure_parent(root: &Path, path: &Path) -> PlinthResult<()> {
    match path.parent() {
        Some(parent) => create_below(root, parent),
        None => Ok(()),
    }
}

/// Create `dir` and its missing ancestors, but never `root` or anything above it
fn create_below(root: &Path, dir: &Path) -> PlinthResult<()> {
    let rel = dir.strip_prefix(root).map_err(|_| PlinthError::LayerPathInvalid {
        path: dir.display().to_string(),
        reason: format!("not below {}", root.display()),
    })?;

    let mut current = root.to_path_buf();
    for component in rel.components() {
        current.push(component);
        match fs::create_dir(&current) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && current.is_dir() => {}
            Err(e) => {
                return Err(PlinthError::io(format!("creating {}", current.display()), e))
            }
        }
    }
    Ok(())
}

fn clear_path(path: &Path) -> PlinthResult<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return Ok(()),
    };
    result.map_err(|e| PlinthError::io(format!("removing {}", path.display()), e))
}

#[cfg(unix)]
fn set_mode(path: &Path, executable: bool) -> PlinthResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| PlinthError::io(format!("chmod {}", path.display()), e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _executable: bool) -> PlinthResult<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(link: &str, path: &Path) -> PlinthResult<()> {
    std::os::unix::fs::symlink(link, path)
        .map_err(|e| PlinthError::io(format!("symlinking {}", path.display()), e))
}

#[cfg(not(unix))]
fn make_symlink(_link: &str, path: &Path) -> PlinthResult<()> {
    tracing::warn!("Symlinks unsupported on this platform, skipping {}", path.display());
    Ok(())
}

/// A layer chain checked out into a scratch directory
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    baseline: TreeView,
}

impl Workspace {
    /// Materialize `chain` into `dir/root`
    pub async fn checkout(chain: &LayerChain, dir: &Path) -> PlinthResult<Self> {
        let root = dir.join("root");
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PlinthError::io(format!("creating {}", root.display()), e))?;

        materialize(chain.flatten(), &root).await?;

        // Re-read rather than trusting the view: implicit parent
        // directories must not show up as changes later.
        let baseline = snapshot(&root, &[]).await?;
        debug!(
            "Checked out {} layer(s), {} entries into {}",
            chain.len(),
            baseline.len(),
            root.display()
        );

        Ok(Self { root, baseline })
    }

    /// Root of the materialized environment
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Everything that changed since checkout
    pub async fn capture(&self) -> PlinthResult<Delta> {
        let after = snapshot(&self.root, &[]).await?;
        Ok(diff(&self.baseline, &after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Fingerprint;
    use crate::layer::chain::Layer;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn materialize_never_recreates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("scratch/root");

        let mut view = TreeView::new();
        view.insert("lib/pkg/mod.py".to_string(), FileChange::file("x"));
        view.insert("lib".to_string(), FileChange::Dir);

        assert!(materialize(view.clone(), &root).await.is_err());
        assert!(!dir.path().join("scratch").exists());

        fs::create_dir_all(&root).unwrap();
        materialize(view, &root).await.unwrap();
        assert!(root.join("lib/pkg/mod.py").is_file());
    }

    #[tokio::test]
    async fn snapshot_reads_tree() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/__init__.py"), "").unwrap();
        fs::write(dir.path().join("setup.py"), "setup()").unwrap();

        let view = snapshot(dir.path(), &[]).await.unwrap();
        assert_eq!(view.get("pkg"), Some(&FileChange::Dir));
        assert!(view.contains_key("pkg/__init__.py"));
        match view.get("setup.py").unwrap() {
            FileChange::File { contents, .. } => assert_eq!(contents, b"setup()"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_honours_ignore() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        fs::write(dir.path().join("main.py"), "").unwrap();

        let view = snapshot(dir.path(), &[".git".to_string()]).await.unwrap();
        assert_eq!(view.len(), 1);
        assert!(view.contains_key("main.py"));
    }

    #[test]
    fn diff_detects_changes() {
        let mut before = TreeView::new();
        before.insert("a".into(), FileChange::file("1"));
        before.insert("b".into(), FileChange::file("2"));
        before.insert("d".into(), FileChange::Dir);
        before.insert("d/x".into(), FileChange::file("x"));

        let mut after = TreeView::new();
        after.insert("a".into(), FileChange::file("1"));
        after.insert("b".into(), FileChange::file("changed"));
        after.insert("c".into(), FileChange::file("new"));

        let delta = diff(&before, &after);
        assert!(delta.get("a").is_none());
        assert_eq!(delta.get("b"), Some(&FileChange::file("changed")));
        assert_eq!(delta.get("c"), Some(&FileChange::file("new")));
        assert_eq!(delta.get("d"), Some(&FileChange::Remove));
        // collapsed into the directory removal
        assert!(delta.get("d/x").is_none());
    }

    #[tokio::test]
    async fn workspace_roundtrip() {
        let scratch = TempDir::new().unwrap();

        let mut delta = Delta::new();
        delta.write("usr/lib/site.py", "base").unwrap();
        delta.write("etc/motd", "hi").unwrap();
        let layer = Layer::new(Fingerprint::of_bytes(b"base"), "base", Arc::new(delta));
        let chain = LayerChain::empty().push(Arc::new(layer));

        let ws = Workspace::checkout(&chain, scratch.path()).await.unwrap();
        assert_eq!(
            fs::read_to_string(ws.root().join("usr/lib/site.py")).unwrap(),
            "base"
        );

        // Nothing touched yet
        assert!(ws.capture().await.unwrap().is_empty());

        fs::write(ws.root().join("usr/lib/requests.py"), "import x").unwrap();
        fs::remove_file(ws.root().join("etc/motd")).unwrap();

        let delta = ws.capture().await.unwrap();
        assert_eq!(delta.len(), 2);
        assert_eq!(
            delta.get("usr/lib/requests.py"),
            Some(&FileChange::file("import x"))
        );
        assert_eq!(delta.get("etc/motd"), Some(&FileChange::Remove));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn materialize_preserves_exec_bit_and_links() {
        let dir = TempDir::new().unwrap();
        let mut view = TreeView::new();
        view.insert(
            "bin/tool".into(),
            FileChange::File {
                contents: b"#!/bin/sh\n".to_vec(),
                executable: true,
            },
        );
        view.insert(
            "bin/alias".into(),
            FileChange::Symlink {
                target: "tool".into(),
            },
        );

        materialize(view.clone(), dir.path()).await.unwrap();
        let back = snapshot(dir.path(), &[]).await.unwrap();

        assert_eq!(back.get("bin/tool"), view.get("bin/tool"));
        assert_eq!(back.get("bin/alias"), view.get("bin/alias"));
    }
}

//! Scoped file access under a fixed workspace root.
//!
//! Every file operation performed on behalf of a remote caller goes through
//! [`resolve`]: the requested relative path is joined onto the root,
//! normalized (`.` dropped, `..` applied), and only then checked for
//! containment with a component-wise prefix test. Normalizing before the
//! check is what defeats `a/../../etc` style traversal; checking by
//! component means `/workspace2` is never mistaken for a child of
//! `/workspace`.
//!
//! [`resolve`] is pure path arithmetic. The filesystem operations on
//! [`Workspace`] additionally canonicalize the deepest existing ancestor of
//! the target, so a symlink inside the workspace cannot point them outside.
//!
//! # Example
//!
//! ```rust
//! use std::path::Path;
//! use studio_server::workspace::{resolve, WorkspaceError};
//!
//! let root = Path::new("/workspace");
//! assert_eq!(
//!     resolve(root, "sub/dir/../file.txt").unwrap(),
//!     Path::new("/workspace/sub/file.txt"),
//! );
//! assert!(matches!(
//!     resolve(root, "../secret.txt"),
//!     Err(WorkspaceError::OutOfScope { .. })
//! ));
//! ```

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Errors returned by workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The requested path resolves outside the workspace root.
    #[error("path must stay within the workspace")]
    OutOfScope {
        /// The path as the caller supplied it.
        requested: String,
    },

    /// The filesystem operation itself failed.
    #[error("{path}: {source}")]
    Io {
        /// The requested path, relative to the root.
        path: String,
        #[source]
        source: io::Error,
    },
}

impl WorkspaceError {
    fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error is an escape attempt.
    pub fn is_out_of_scope(&self) -> bool {
        matches!(self, Self::OutOfScope { .. })
    }

    /// Returns true if the target does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// An immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// Lexically normalizes `path`: drops `.` and applies `..` without touching
/// the filesystem. `..` never climbs above the filesystem root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Resolves `requested` against `root` and enforces containment.
///
/// An empty request (or `"."`) resolves to the root itself. An absolute
/// request replaces the root during the join and is then rejected by the
/// containment check unless it happens to name a path inside the root.
///
/// # Errors
///
/// Returns [`WorkspaceError::OutOfScope`] if the normalized result is not
/// the root or a descendant of it.
pub fn resolve(root: &Path, requested: &str) -> Result<PathBuf, WorkspaceError> {
    let root = normalize(root);
    let candidate = normalize(&root.join(requested));

    if candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        debug!(requested, "Rejected path outside workspace");
        Err(WorkspaceError::OutOfScope {
            requested: requested.to_string(),
        })
    }
}

/// File operations confined to a single root directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Opens the workspace at `root`, creating the directory if needed.
    ///
    /// The root is canonicalized once here and used for every later check.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] if the directory cannot be created or
    /// canonicalized.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        let label = root.display().to_string();
        std::fs::create_dir_all(root).map_err(|e| WorkspaceError::io(label.clone(), e))?;
        let root = std::fs::canonicalize(root).map_err(|e| WorkspaceError::io(label, e))?;
        Ok(Self { root })
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `requested` against this workspace's root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, WorkspaceError> {
        resolve(&self.root, requested)
    }

    /// Renders a resolved path relative to the root, `"."` for the root.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => ".".to_string(),
        }
    }

    /// Writes `content` to `path`, replacing any existing file and creating
    /// parent directories. Returns the resolved path.
    pub async fn create(&self, path: &str, content: &str) -> Result<PathBuf, WorkspaceError> {
        let target = self.checked(path).await?;
        self.ensure_parent(&target, path).await?;
        fs::write(&target, content)
            .await
            .map_err(|e| WorkspaceError::io(path, e))?;
        Ok(target)
    }

    /// Appends `content` to `path`, creating the file and parent
    /// directories if needed. Returns the resolved path.
    pub async fn append(&self, path: &str, content: &str) -> Result<PathBuf, WorkspaceError> {
        let target = self.checked(path).await?;
        self.ensure_parent(&target, path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await
            .map_err(|e| WorkspaceError::io(path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| WorkspaceError::io(path, e))?;
        file.flush().await.map_err(|e| WorkspaceError::io(path, e))?;
        Ok(target)
    }

    /// Reads the full contents of `path` as UTF-8.
    pub async fn read(&self, path: &str) -> Result<(PathBuf, String), WorkspaceError> {
        let target = self.checked(path).await?;
        let content = fs::read_to_string(&target)
            .await
            .map_err(|e| WorkspaceError::io(path, e))?;
        Ok((target, content))
    }

    /// Lists the immediate children of `path` (the root when empty), sorted
    /// by name.
    pub async fn list(&self, path: &str) -> Result<(PathBuf, Vec<DirEntry>), WorkspaceError> {
        let target = self.checked(path).await?;
        let mut reader = fs::read_dir(&target)
            .await
            .map_err(|e| WorkspaceError::io(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(path, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| WorkspaceError::io(path, e))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if file_type.is_dir() {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((target, entries))
    }

    /// Resolves `requested` and confirms that what already exists on disk
    /// along the way stays inside the root once symlinks are followed.
    async fn checked(&self, requested: &str) -> Result<PathBuf, WorkspaceError> {
        let target = self.resolve(requested)?;
        let out_of_scope = || WorkspaceError::OutOfScope {
            requested: requested.to_string(),
        };

        for ancestor in target.ancestors() {
            match fs::symlink_metadata(ancestor).await {
                Ok(_) => {
                    // A dangling link fails to canonicalize; refuse to write through it.
                    let real = fs::canonicalize(ancestor).await.map_err(|_| out_of_scope())?;
                    if real.starts_with(&self.root) {
                        return Ok(target);
                    }
                    warn!(requested, "Symlink in workspace points outside the root");
                    return Err(out_of_scope());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(WorkspaceError::io(requested, err)),
            }
        }

        // Not even the root exists any more.
        Err(WorkspaceError::io(
            requested,
            io::Error::new(io::ErrorKind::NotFound, "workspace root missing"),
        ))
    }

    async fn ensure_parent(&self, target: &Path, requested: &str) -> Result<(), WorkspaceError> {
        match target.parent() {
            Some(parent) if target != self.root => fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io(requested, e)),
            _ => Err(WorkspaceError::io(
                requested,
                io::Error::new(io::ErrorKind::InvalidInput, "path names the workspace root"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> &'static Path {
        Path::new("/workspace")
    }

    // ========================================================================
    // resolve
    // ========================================================================

    #[test]
    fn resolve_plain_file() {
        assert_eq!(
            resolve(root(), "notes.txt").unwrap(),
            PathBuf::from("/workspace/notes.txt")
        );
    }

    #[test]
    fn resolve_empty_and_dot_are_root() {
        assert_eq!(resolve(root(), "").unwrap(), PathBuf::from("/workspace"));
        assert_eq!(resolve(root(), ".").unwrap(), PathBuf::from("/workspace"));
        assert_eq!(resolve(root(), "./").unwrap(), PathBuf::from("/workspace"));
    }

    #[test]
    fn resolve_rejects_parent_escape() {
        assert!(resolve(root(), "../secret.txt")
            .unwrap_err()
            .is_out_of_scope());
        assert!(resolve(root(), "..").unwrap_err().is_out_of_scope());
    }

    #[test]
    fn resolve_rejects_escape_after_normalization() {
        assert!(resolve(root(), "a/../../b").unwrap_err().is_out_of_scope());
        assert!(resolve(root(), "a/b/../../../workspace2/x")
            .unwrap_err()
            .is_out_of_scope());
    }

    #[test]
    fn resolve_applies_inner_parent_segments() {
        assert_eq!(
            resolve(root(), "sub/dir/../file.txt").unwrap(),
            PathBuf::from("/workspace/sub/file.txt")
        );
        assert_eq!(
            resolve(root(), "a/../../workspace/b").unwrap(),
            PathBuf::from("/workspace/b")
        );
    }

    #[test]
    fn resolve_rejects_absolute_outside() {
        assert!(resolve(root(), "/etc/passwd").unwrap_err().is_out_of_scope());
    }

    #[test]
    fn resolve_accepts_absolute_inside() {
        assert_eq!(
            resolve(root(), "/workspace/inner.txt").unwrap(),
            PathBuf::from("/workspace/inner.txt")
        );
    }

    #[test]
    fn resolve_uses_component_prefix_not_string_prefix() {
        assert!(resolve(root(), "/workspace2/file")
            .unwrap_err()
            .is_out_of_scope());
        assert!(resolve(root(), "../workspace-old/file")
            .unwrap_err()
            .is_out_of_scope());
    }

    #[test]
    fn out_of_scope_message_hides_paths() {
        let err = resolve(root(), "../../etc/shadow").unwrap_err();
        assert_eq!(err.to_string(), "path must stay within the workspace");
    }

    #[test]
    fn normalize_keeps_root_on_excess_parents() {
        assert_eq!(normalize(Path::new("/../../x")), PathBuf::from("/x"));
        assert_eq!(normalize(Path::new("a/../../x")), PathBuf::from("../x"));
    }

    // ========================================================================
    // filesystem operations
    // ========================================================================

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("workspace")).unwrap();
        (dir, ws)
    }

    #[test]
    fn new_creates_and_canonicalizes_root() {
        let (dir, ws) = workspace();
        assert!(ws.root().is_dir());
        assert!(ws.root().is_absolute());
        assert_eq!(
            ws.root(),
            std::fs::canonicalize(dir.path().join("workspace")).unwrap()
        );
    }

    #[tokio::test]
    async fn create_writes_with_parent_dirs() {
        let (_dir, ws) = workspace();
        let path = ws.create("drafts/song/lyrics.txt", "verse").await.unwrap();
        assert_eq!(ws.relative(&path), Path::new("drafts/song/lyrics.txt").to_string_lossy());
        assert_eq!(std::fs::read_to_string(path).unwrap(), "verse");
    }

    #[tokio::test]
    async fn create_overwrites() {
        let (_dir, ws) = workspace();
        ws.create("a.txt", "one").await.unwrap();
        ws.create("a.txt", "two").await.unwrap();
        assert_eq!(ws.read("a.txt").await.unwrap().1, "two");
    }

    #[tokio::test]
    async fn append_creates_then_extends() {
        let (_dir, ws) = workspace();
        ws.append("log/notes.md", "one\n").await.unwrap();
        ws.append("log/notes.md", "two\n").await.unwrap();
        assert_eq!(ws.read("log/notes.md").await.unwrap().1, "one\ntwo\n");
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found_io() {
        let (_dir, ws) = workspace();
        let err = ws.read("missing.txt").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_out_of_scope());
    }

    #[tokio::test]
    async fn operations_reject_escapes_without_touching_disk() {
        let (dir, ws) = workspace();
        let err = ws.create("../escaped.txt", "x").await.unwrap_err();
        assert!(err.is_out_of_scope());
        assert!(!dir.path().join("escaped.txt").exists());

        assert!(ws.append("a/../../b", "x").await.unwrap_err().is_out_of_scope());
        assert!(ws.read("../../etc/passwd").await.unwrap_err().is_out_of_scope());
        assert!(ws.list("..").await.unwrap_err().is_out_of_scope());
    }

    #[tokio::test]
    async fn create_on_root_is_rejected() {
        let (_dir, ws) = workspace();
        let err = ws.create("", "x").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Io { .. }));
    }

    #[tokio::test]
    async fn list_root_returns_immediate_children_tagged() {
        let (_dir, ws) = workspace();
        ws.create("b.txt", "b").await.unwrap();
        ws.create("a/nested.txt", "n").await.unwrap();
        ws.create("c/deeper/x.txt", "x").await.unwrap();

        let (path, entries) = ws.list("").await.unwrap();
        assert_eq!(ws.relative(&path), ".");
        assert_eq!(
            entries,
            vec![
                DirEntry {
                    name: "a".to_string(),
                    kind: EntryKind::Dir
                },
                DirEntry {
                    name: "b.txt".to_string(),
                    kind: EntryKind::File
                },
                DirEntry {
                    name: "c".to_string(),
                    kind: EntryKind::Dir
                },
            ]
        );
    }

    #[tokio::test]
    async fn list_subdirectory() {
        let (_dir, ws) = workspace();
        ws.create("a/one.txt", "1").await.unwrap();
        let (_, entries) = ws.list("a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "one.txt");
    }

    #[test]
    fn dir_entry_serializes_type_tag() {
        let value = serde_json::to_value(DirEntry {
            name: "x".to_string(),
            kind: EntryKind::Dir,
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"name": "x", "type": "dir"}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_pointing_outside_is_rejected() {
        let (dir, ws) = workspace();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).unwrap();

        assert!(ws.read("link/secret.txt").await.unwrap_err().is_out_of_scope());
        assert!(ws
            .create("link/new.txt", "x")
            .await
            .unwrap_err()
            .is_out_of_scope());
        assert!(!outside.join("new.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dangling_symlink_is_rejected() {
        let (dir, ws) = workspace();
        std::os::unix::fs::symlink(dir.path().join("nowhere.txt"), ws.root().join("dangling"))
            .unwrap();
        assert!(ws
            .create("dangling", "x")
            .await
            .unwrap_err()
            .is_out_of_scope());
        assert!(!dir.path().join("nowhere.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_inside_workspace_is_allowed() {
        let (_dir, ws) = workspace();
        ws.create("real/file.txt", "ok").await.unwrap();
        std::os::unix::fs::symlink(ws.root().join("real"), ws.root().join("alias")).unwrap();
        assert_eq!(ws.read("alias/file.txt").await.unwrap().1, "ok");
    }
}

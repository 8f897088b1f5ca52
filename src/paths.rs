//! Scratch-directory sandbox: logical filename resolution and per-path locks.
//!
//! Every caller-supplied filename is reduced to its final path component
//! before it is joined to the scratch root, so traversal sequences are
//! removed rather than validated after the fact. The resolver never fails.
//!
//! Concurrent calls on the same resolved path are serialized by
//! [`PathLocks`]: a load-mutate-save sequence holds the lock for its whole
//! duration and releases it when the guard drops.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{DocError, DocResult};

/// Name used when a logical filename has no usable final component.
pub const DEFAULT_FILENAME: &str = "untitled.docx";

/// Extension of documents managed by the store.
pub const DOCUMENT_EXTENSION: &str = "docx";

/// The single flat directory that holds every staged document.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
    locks: Arc<PathLocks>,
}

impl ScratchDir {
    /// Creates the directory if needed and canonicalizes it so that every
    /// resolved path is absolute.
    pub fn open(root: impl AsRef<Path>) -> DocResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| DocError::io(format!("creating {}", root.display()), e))?;
        let root = root
            .canonicalize()
            .map_err(|e| DocError::io(format!("resolving {}", root.display()), e))?;
        Ok(Self {
            root,
            locks: Arc::new(PathLocks::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a logical filename to its path inside the scratch root.
    pub fn resolve(&self, logical: &str) -> PathBuf {
        let path = self.root.join(base_name(logical));
        tracing::debug!(logical, path = %path.display(), "resolved filename");
        path
    }

    /// Blocks until no other call holds `path`, then holds it until the
    /// returned guard is dropped.
    pub fn lock(&self, path: &Path) -> PathLock {
        self.locks.acquire(path)
    }

    /// Takes the lock on `path` only if no other call holds it.
    pub fn try_lock(&self, path: &Path) -> Option<PathLock> {
        self.locks.try_acquire(path)
    }
}

/// Final component of `logical`, treating both `/` and `\` as separators.
pub fn base_name(logical: &str) -> &str {
    let last = logical.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");
    match last {
        "" | "." | ".." => DEFAULT_FILENAME,
        name => name,
    }
}

/// Path of the file produced by converting `source` to `format`.
///
/// A trailing `.docx` (any case) is replaced; otherwise the new extension is
/// appended, so the target never equals the source.
pub fn derive_target_path(source: &Path, format: &str) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(".{}", DOCUMENT_EXTENSION);
    let stem = match name.len().checked_sub(suffix.len()) {
        Some(cut)
            if cut > 0
                && name.is_char_boundary(cut)
                && name[cut..].eq_ignore_ascii_case(&suffix) =>
        {
            &name[..cut]
        }
        _ => name.as_str(),
    };
    source.with_file_name(format!("{}.{}", stem, format))
}

/// Set of resolved paths currently held by some call.
#[derive(Debug, Default)]
pub struct PathLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl PathLocks {
    pub fn acquire(self: &Arc<Self>, path: &Path) -> PathLock {
        let mut held = self.held.lock();
        while held.contains(path) {
            self.released.wait(&mut held);
        }
        held.insert(path.to_path_buf());
        PathLock {
            locks: Arc::clone(self),
            path: path.to_path_buf(),
        }
    }

    pub fn try_acquire(self: &Arc<Self>, path: &Path) -> Option<PathLock> {
        let mut held = self.held.lock();
        if !held.insert(path.to_path_buf()) {
            return None;
        }
        Some(PathLock {
            locks: Arc::clone(self),
            path: path.to_path_buf(),
        })
    }
}

/// Guard returned by [`ScratchDir::lock`]; releases the path on drop.
#[derive(Debug)]
pub struct PathLock {
    locks: Arc<PathLocks>,
    path: PathBuf,
}

impl Drop for PathLock {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.path);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, ScratchDir) {
        let tmp = TempDir::new().unwrap();
        let dir = ScratchDir::open(tmp.path().join("scratch")).unwrap();
        (tmp, dir)
    }

    #[test]
    fn traversal_and_absolute_names_stay_inside_root() {
        let (_tmp, dir) = scratch();
        for name in [
            "../../etc/passwd",
            "/etc/passwd",
            "..\\..\\windows\\system32\\config",
            "a/b/../../../c.docx",
            "./report.docx",
            "nested/dir/report.docx",
        ] {
            let path = dir.resolve(name);
            assert!(path.starts_with(dir.root()), "{} escaped: {:?}", name, path);
            assert_eq!(path.parent(), Some(dir.root()), "{} not flat", name);
        }
        assert_eq!(dir.resolve("../../etc/passwd"), dir.root().join("passwd"));
    }

    #[test]
    fn degenerate_names_collapse_to_default() {
        let (_tmp, dir) = scratch();
        for name in ["", ".", "..", "foo/", "foo/..", "\\"] {
            assert_eq!(dir.resolve(name), dir.root().join(DEFAULT_FILENAME));
        }
    }

    #[test]
    fn root_is_absolute() {
        let (_tmp, dir) = scratch();
        assert!(dir.root().is_absolute());
        assert!(dir.resolve("x.docx").is_absolute());
    }

    #[test]
    fn derived_path_replaces_or_appends_extension() {
        let root = Path::new("/s");
        assert_eq!(
            derive_target_path(&root.join("a.docx"), "pdf"),
            root.join("a.pdf")
        );
        assert_eq!(
            derive_target_path(&root.join("Report.DOCX"), "pdf"),
            root.join("Report.pdf")
        );
        assert_eq!(
            derive_target_path(&root.join("notes"), "pdf"),
            root.join("notes.pdf")
        );
        assert_eq!(
            derive_target_path(&root.join("a.pdf"), "pdf"),
            root.join("a.pdf.pdf")
        );
        assert_eq!(
            derive_target_path(&root.join(".docx"), "pdf"),
            root.join(".docx.pdf")
        );
    }

    #[test]
    fn lock_serializes_holders_of_the_same_path() {
        let (_tmp, dir) = scratch();
        let path = dir.resolve("shared.docx");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dir = dir.clone();
                let path = path.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                std::thread::spawn(move || {
                    let _guard = dir.lock(&path);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_paths_do_not_block() {
        let (_tmp, dir) = scratch();
        let _a = dir.lock(&dir.resolve("a.docx"));
        let _b = dir.lock(&dir.resolve("b.docx"));
        assert!(dir.try_lock(&dir.resolve("a.docx")).is_none());
        assert!(dir.try_lock(&dir.resolve("c.docx")).is_some());
    }

    #[test]
    fn try_lock_succeeds_after_release() {
        let (_tmp, dir) = scratch();
        let path = dir.resolve("a.docx");
        drop(dir.lock(&path));
        let guard = dir.try_lock(&path);
        assert!(guard.is_some());
        drop(guard);
        assert!(dir.try_lock(&path).is_some());
    }
}

//! Local inventory scanner and the narrow file-system primitives the
//! engine consumes.
//!
//! The walk is lazy: directories are expanded one at a time, so very large
//! trees never load eagerly. Entries within a directory are visited in name
//! order for deterministic plans.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{SyncError, SyncResult};
use crate::types::LocalEntry;

/// Starts a lazy walk of `root`, which may be a single file or a directory.
///
/// Symbolic links and non-regular files are skipped silently; their absence
/// from the plan is equivalent to "no action needed". Fails with
/// `SyncError::NotFound` if the root does not exist.
pub fn scan(root: &Path) -> SyncResult<LocalWalk> {
    let meta = fs::symlink_metadata(root).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SyncError::NotFound(format!("local path {}", root.display()))
        } else {
            SyncError::Io(e)
        }
    })?;

    let mut walk = LocalWalk {
        root: root.to_path_buf(),
        pending: Vec::new(),
    };
    if meta.is_dir() {
        walk.push_dir(root)?;
    } else {
        walk.pending.push(root.to_path_buf());
    }
    Ok(walk)
}

/// Lazy iterator over the regular files under a sync root.
#[derive(Debug)]
pub struct LocalWalk {
    root: PathBuf,
    /// Depth-first stack; directories are expanded when popped.
    pending: Vec<PathBuf>,
}

impl LocalWalk {
    fn push_dir(&mut self, dir: &Path) -> SyncResult<()> {
        let mut children: Vec<PathBuf> = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        // Reverse name order so the stack pops in name order.
        children.sort_unstable();
        children.reverse();
        self.pending.extend(children);
        Ok(())
    }

    fn entry_for(&self, path: &Path, meta: &fs::Metadata) -> SyncResult<LocalEntry> {
        let relative = path.strip_prefix(&self.root).unwrap_or_else(|_| {
            // Root is itself a file; the key is its name.
            Path::new(path.file_name().unwrap_or_default())
        });
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(LocalEntry {
            key,
            size: meta.len(),
            last_modified: system_time_to_utc(meta.modified()?),
            path: path.to_path_buf(),
        })
    }
}

impl Iterator for LocalWalk {
    type Item = SyncResult<LocalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let path = self.pending.pop()?;
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) => return Some(Err(e.into())),
            };
            if meta.file_type().is_symlink() {
                continue;
            }
            if meta.is_dir() {
                if let Err(e) = self.push_dir(&path) {
                    return Some(Err(e));
                }
                continue;
            }
            if !meta.is_file() {
                continue;
            }
            return Some(self.entry_for(&path, &meta));
        }
    }
}

fn system_time_to_utc(time: std::time::SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Whether a local path exists.
pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Last-modified timestamp of a local path.
pub async fn last_modified(path: &Path) -> SyncResult<DateTime<Utc>> {
    let meta = tokio::fs::metadata(path).await?;
    Ok(system_time_to_utc(meta.modified()?))
}

/// Opens a local file for streaming reads.
pub async fn open_read(path: &Path) -> SyncResult<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .map_err(SyncError::from)
}

/// Opens a local file for writing, creating parent directories as needed.
pub async fn open_write(path: &Path) -> SyncResult<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::File::create(path).await.map_err(SyncError::from)
}

/// Flushes and closes a file opened with [`open_write`].
pub async fn finish_write(mut file: tokio::fs::File) -> SyncResult<()> {
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Builds a `LocalEntry` for a single file without walking a tree.
pub async fn stat_entry(path: &Path, key: String) -> SyncResult<LocalEntry> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SyncError::NotFound(format!("local path {}", path.display()))
        } else {
            SyncError::Io(e)
        }
    })?;
    if !meta.is_file() {
        return Err(SyncError::NotFound(format!(
            "local path {} is not a regular file",
            path.display()
        )));
    }
    Ok(LocalEntry {
        key,
        size: meta.len(),
        last_modified: system_time_to_utc(meta.modified()?),
        path: path.to_path_buf(),
    })
}

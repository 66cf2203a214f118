//! Path-restricted, read-only access to the charting application's data
//! directory.
//!
//! Every operation canonicalizes its input and refuses anything that does
//! not live under the configured root, symlinks included. Nothing in this
//! module opens a file for writing.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

use tickbridge_model::{ArchiveEntry, ArchiveStat, ReadMode};

/// Archive access failures, keyed to the stable error kinds of the control
/// surface.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The canonicalized path is not a descendant of the archive root.
    #[error("path escapes the archive root: {}", .0.display())]
    Forbidden(PathBuf),

    #[error("no such archive entry: {}", .0.display())]
    NotFound(PathBuf),

    /// The request exceeds the per-request read cap.
    #[error("requested {requested} bytes, cap is {cap}")]
    TooLarge { requested: u64, cap: u64 },

    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn kind(&self) -> &'static str {
        match self {
            ArchiveError::Forbidden(_) => "forbidden",
            ArchiveError::NotFound(_) => "not-found",
            ArchiveError::TooLarge { .. } => "too-large",
            ArchiveError::Io(_) => "io-error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Read-only accessor rooted at the archive directory.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    root: PathBuf,
    max_read_bytes: u64,
}

impl ArchiveReader {
    /// Open a reader over `root`. The root must exist; it is canonicalized
    /// once here so later containment checks compare like with like.
    pub fn open(root: &Path, max_read_bytes: u64) -> Result<Self> {
        let root = root.canonicalize().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::NotFound(root.to_path_buf())
            } else {
                ArchiveError::Io(err)
            }
        })?;
        Ok(Self {
            root,
            max_read_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_read_bytes(&self) -> u64 {
        self.max_read_bytes
    }

    /// Whether the root is still reachable. Feeds the health report.
    pub fn root_ok(&self) -> bool {
        self.root.is_dir()
    }

    /// Canonicalize `relative` against the root and prove containment.
    ///
    /// Missing paths cannot be canonicalized directly, so the nearest
    /// existing ancestor is resolved instead; that decides `forbidden`
    /// (escape) versus `not-found` (inside the root but absent) without any
    /// data I/O.
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        {
            warn!(path = %relative.display(), "rejected absolute archive path");
            return Err(ArchiveError::Forbidden(relative.to_path_buf()));
        }

        let joined = self.root.join(relative);
        match joined.canonicalize() {
            Ok(canonical) => {
                if canonical.starts_with(&self.root) {
                    Ok(canonical)
                } else {
                    warn!(path = %relative.display(), "rejected archive path escape");
                    Err(ArchiveError::Forbidden(relative.to_path_buf()))
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Walk up to the nearest ancestor that exists and check that
                // one; `../../etc/passwd` must fail closed even when the
                // target does not exist.
                let mut ancestor = joined.as_path();
                while let Some(parent) = ancestor.parent() {
                    ancestor = parent;
                    match ancestor.canonicalize() {
                        Ok(canonical) => {
                            return if canonical.starts_with(&self.root) {
                                Err(ArchiveError::NotFound(relative.to_path_buf()))
                            } else {
                                warn!(path = %relative.display(), "rejected archive path escape");
                                Err(ArchiveError::Forbidden(relative.to_path_buf()))
                            };
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(err) => return Err(ArchiveError::Io(err)),
                    }
                }
                Err(ArchiveError::NotFound(relative.to_path_buf()))
            }
            Err(err) => Err(ArchiveError::Io(err)),
        }
    }

    /// List a directory inside the archive.
    pub async fn list(&self, relative: &Path) -> Result<Vec<ArchiveEntry>> {
        let path = self.resolve(relative)?;
        let mut dir = fs::read_dir(&path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(ArchiveEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified: modified_time(&meta),
                is_dir: meta.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Size, mtime, and kind for one path.
    pub async fn stat(&self, relative: &Path) -> Result<ArchiveStat> {
        let path = self.resolve(relative)?;
        let meta = fs::metadata(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::NotFound(relative.to_path_buf())
            } else {
                ArchiveError::Io(err)
            }
        })?;
        Ok(ArchiveStat {
            size: meta.len(),
            modified: modified_time(&meta),
            is_dir: meta.is_dir(),
        })
    }

    /// Read `length` bytes at `offset`. The cap is enforced before the file
    /// is opened; a read past end-of-file returns the available prefix.
    pub async fn read_range(
        &self,
        relative: &Path,
        offset: u64,
        length: u64,
        mode: ReadMode,
    ) -> Result<Vec<u8>> {
        if length > self.max_read_bytes {
            return Err(ArchiveError::TooLarge {
                requested: length,
                cap: self.max_read_bytes,
            });
        }

        let path = self.resolve(relative)?;
        let mut file = fs::File::open(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::NotFound(relative.to_path_buf())
            } else {
                ArchiveError::Io(err)
            }
        })?;

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        if mode == ReadMode::Text {
            // Text mode promises valid UTF-8 to the caller.
            buf = String::from_utf8_lossy(&buf).into_owned().into_bytes();
        }
        Ok(buf)
    }

    /// First `bytes` of a file.
    pub async fn head(&self, relative: &Path, bytes: u64) -> Result<Vec<u8>> {
        self.read_range(relative, 0, bytes, ReadMode::Binary).await
    }

    /// Last `bytes` of a file (the whole file when shorter).
    pub async fn tail(&self, relative: &Path, bytes: u64) -> Result<Vec<u8>> {
        let stat = self.stat(relative).await?;
        let offset = stat.size.saturating_sub(bytes);
        let length = stat.size - offset;
        self.read_range(relative, offset, length, ReadMode::Binary)
            .await
    }
}

fn modified_time(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture() -> (tempfile::TempDir, ArchiveReader) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        let mut file = std::fs::File::create(dir.path().join("data/NQZ25.dly")).unwrap();
        file.write_all(b"2025-09-09, 23400.00, 23550.00, 23390.00, 23500.25, 512344\n")
            .unwrap();
        let reader = ArchiveReader::open(dir.path(), 1024).unwrap();
        (dir, reader)
    }

    #[tokio::test]
    async fn lists_directories() {
        let (_dir, reader) = fixture();
        let entries = reader.list(Path::new("data")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "NQZ25.dly");
        assert!(!entries[0].is_dir);
    }

    #[tokio::test]
    async fn stats_files() {
        let (_dir, reader) = fixture();
        let stat = reader.stat(Path::new("data/NQZ25.dly")).await.unwrap();
        assert!(stat.size > 0);
        assert!(!stat.is_dir);
    }

    #[tokio::test]
    async fn refuses_parent_traversal() {
        let (_dir, reader) = fixture();
        let err = reader
            .read_range(Path::new("../etc/passwd"), 0, 10, ReadMode::Binary)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn refuses_absolute_paths() {
        let (_dir, reader) = fixture();
        let err = reader.stat(Path::new("/etc/passwd")).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refuses_symlink_escape() {
        let (dir, reader) = fixture();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("data/link")).unwrap();

        let err = reader
            .stat(Path::new("data/link/secret.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn missing_inside_root_is_not_found() {
        let (_dir, reader) = fixture();
        let err = reader.stat(Path::new("data/missing.scid")).await.unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[tokio::test]
    async fn caps_read_length_before_io() {
        let (_dir, reader) = fixture();
        let err = reader
            .read_range(Path::new("data/NQZ25.dly"), 0, 4096, ReadMode::Binary)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "too-large");
    }

    #[tokio::test]
    async fn reads_ranges_and_tails() {
        let (_dir, reader) = fixture();
        let head = reader.head(Path::new("data/NQZ25.dly"), 10).await.unwrap();
        assert_eq!(&head, b"2025-09-09");

        let tail = reader.tail(Path::new("data/NQZ25.dly"), 8).await.unwrap();
        assert_eq!(&tail, b" 512344\n");

        let range = reader
            .read_range(Path::new("data/NQZ25.dly"), 12, 8, ReadMode::Text)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(range).unwrap(), "23400.00");
    }
}

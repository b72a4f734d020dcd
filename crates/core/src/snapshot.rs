//! Content-addressed snapshot files.
//!
//! Snapshots live in one directory per storage root, named
//! `<prefix><token>.<ext>`. A snapshot is a cache tier between "reuse the live
//! database" and "run every migration and seeder": restoring one replaces the
//! migrations and the seeders it was taken after.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::Error;
use crate::checksum;
use crate::driver::Adapter;
use crate::driver::sqlite::{age_secs, remove_if_present};
use crate::spec::BuildSpec;

/// A snapshot file found on disk. Plain data: deletion goes through [`SnapshotStore::purge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub filename: String,
    pub token: String,
    pub last_accessed: Option<String>,
    /// The token was derived from the current build checksum.
    pub is_valid: bool,
    pub purgeable: bool,
    pub size: u64,
}

/// Result of the best-match search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMatch {
    pub filename: String,
    /// Seeders that still have to run on top of the restored snapshot.
    pub remaining: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    prefix: String,
    extension: String,
}

impl SnapshotStore {
    pub fn new(dir: PathBuf, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self { dir, prefix: prefix.into(), extension: extension.into() }
    }

    pub fn for_spec(spec: &BuildSpec, adapter: &Adapter) -> Self {
        Self::new(spec.snapshots_dir(), spec.snapshot_prefix.clone(), adapter.snapshot_extension())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filename_for(&self, token: &str) -> String {
        format!("{}{token}.{}", self.prefix, self.extension)
    }

    pub fn path_for(&self, token: &str) -> PathBuf {
        self.dir.join(self.filename_for(token))
    }

    pub async fn has(&self, token: &str) -> bool {
        tokio::fs::try_exists(self.path_for(token)).await.unwrap_or(false)
    }

    /// Dump the live database as the snapshot for `token`.
    pub async fn take(&self, adapter: &Adapter, conn: &Connection, token: &str) -> Result<PathBuf, Error> {
        let path = self.path_for(token);
        adapter.dump(conn, &path).await?;
        Ok(path)
    }

    /// Restore database `name` from the snapshot for `token`. False on any failure.
    pub async fn restore(&self, adapter: &Adapter, token: &str, name: &str) -> bool {
        let path = self.path_for(token);
        if !adapter.restore(&path, name).await {
            return false;
        }
        if let Err(e) = touch(&path).await {
            tracing::debug!(snapshot = %path.display(), "cannot refresh access time: {e}");
        }
        true
    }

    /// Restore the snapshot covering the longest prefix of `seeders`.
    ///
    /// Tries the full seeder list first, then drops seeders from the end down
    /// to the empty list (the after-migrations snapshot). A snapshot that
    /// exists but cannot be restored is deleted and the search continues.
    pub async fn restore_best_match(
        &self, adapter: &Adapter, name: &str, build_checksum: &str, seeders: &[String],
    ) -> Option<SnapshotMatch> {
        for included in (0..=seeders.len()).rev() {
            let token = checksum::snapshot_token(build_checksum, &seeders[..included]);
            if !self.has(&token).await {
                continue;
            }
            if self.restore(adapter, &token, name).await {
                return Some(SnapshotMatch { filename: self.filename_for(&token), remaining: seeders[included..].to_vec() });
            }
            let path = self.path_for(&token);
            tracing::warn!(snapshot = %path.display(), "removing snapshot that failed to restore");
            if let Err(e) = remove_if_present(&path).await {
                tracing::warn!(snapshot = %path.display(), "cannot remove snapshot: {e}");
            }
        }
        None
    }

    /// Snapshot files under the directory that carry this store's prefix.
    ///
    /// Unreadable entries are logged and skipped.
    pub async fn enumerate(&self, build_checksum: &str, grace_seconds: u64) -> Vec<SnapshotInfo> {
        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return found,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), "cannot list snapshots: {e}");
                return found;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("cannot read snapshot directory entry: {e}");
                    continue;
                }
            };
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(token) = self.token_of(&filename) else {
                continue;
            };
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(snapshot = %filename, "skipping unreadable snapshot: {e}");
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }

            let accessed = meta.modified().ok();
            let is_valid = checksum::token_matches_build(&token, build_checksum);
            let old_enough = accessed.is_some_and(|t| age_secs(t) > grace_seconds);
            found.push(SnapshotInfo {
                path: entry.path(),
                token: token.to_string(),
                filename,
                last_accessed: accessed.map(|t| DateTime::<Utc>::from(t).to_rfc3339()),
                is_valid,
                purgeable: !is_valid && old_enough,
                size: meta.len(),
            });
        }

        found.sort_by(|a, b| a.filename.cmp(&b.filename));
        found
    }

    /// Delete one snapshot. Already gone counts as success.
    pub async fn purge(&self, info: &SnapshotInfo) -> Result<(), Error> {
        remove_if_present(&info.path)
            .await
            .map_err(|e| Error::Snapshot(format!("cannot delete {}: {e}", info.path.display())))
    }

    /// Delete every purgeable snapshot, logging failures. Returns how many were deleted.
    pub async fn purge_stale(&self, build_checksum: &str, grace_seconds: u64) -> usize {
        let mut purged = 0;
        for info in self.enumerate(build_checksum, grace_seconds).await {
            if !info.purgeable {
                continue;
            }
            match self.purge(&info).await {
                Ok(()) => {
                    tracing::debug!(snapshot = %info.filename, "purged stale snapshot");
                    purged += 1;
                }
                Err(e) => tracing::warn!(snapshot = %info.filename, "{e}"),
            }
        }
        purged
    }

    fn token_of<'a>(&self, filename: &'a str) -> Option<&'a str> {
        filename
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')
            .filter(|token| !token.is_empty())
    }
}

async fn touch(path: &Path) -> Result<(), Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(SystemTime::now())
    })
    .await
    .map_err(|e| Error::Snapshot(format!("touch task failed: {e}")))??;
    Ok(())
}

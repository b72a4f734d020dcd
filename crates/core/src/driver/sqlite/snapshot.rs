//! Dump and restore for SQLite databases.
//!
//! A dump is a `VACUUM INTO` copy, which is consistent even while the source
//! is open. Both directions write to a temporary name and rename into place
//! so a concurrent worker never sees a half-written file.

use std::path::{Path, PathBuf};

use tokio_rusqlite::{Connection, params};

use super::{remove_if_present, sidecar};
use crate::Error;

/// Write a consistent copy of the database behind `conn` to `dest`.
pub async fn dump(conn: &Connection, dest: &Path) -> Result<(), Error> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(dest);
    remove_if_present(&tmp).await?;

    let target = tmp.to_string_lossy().into_owned();
    conn.call(move |conn| conn.execute("VACUUM INTO ?1", params![target]))
        .await
        .map_err(|e| Error::Snapshot(format!("dump to {} failed: {e}", dest.display())))?;

    tokio::fs::rename(&tmp, dest).await?;
    tracing::debug!(snapshot = %dest.display(), "snapshot taken");
    Ok(())
}

/// Copy the snapshot at `src` into place as the database at `dest`.
///
/// Returns false (and leaves nothing behind) when the copy fails or the
/// result is not a sound database; the caller falls back to a full build.
pub async fn restore(src: &Path, dest: &Path) -> bool {
    match try_restore(src, dest).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(snapshot = %src.display(), "snapshot import failed: {e}");
            if let Err(e) = remove_if_present(&temp_path(dest)).await {
                tracing::debug!(database = %dest.display(), "cannot remove partial restore: {e}");
            }
            false
        }
    }
}

async fn try_restore(src: &Path, dest: &Path) -> Result<(), Error> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(dest);
    tokio::fs::copy(src, &tmp).await?;

    let check = Connection::open(&tmp).await.map_err(|e| Error::Database(e.into()))?;
    let verdict = check
        .call(|conn| conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0)))
        .await;
    if let Err(e) = check.close().await {
        tracing::debug!(snapshot = %src.display(), "cannot close restored copy: {}", Error::from(e));
    }
    let verdict = verdict?;
    if verdict != "ok" {
        return Err(Error::Snapshot(format!("quick_check reported: {verdict}")));
    }

    for suffix in ["-wal", "-shm"] {
        remove_if_present(&sidecar(dest, suffix)).await?;
    }
    tokio::fs::rename(&tmp, dest).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    sidecar(path, &format!(".tmp-{}", std::process::id()))
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session persistence: load/save the token set as JSON with atomic writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::credential::access::{AuthAccess, CredentialCell};

/// Load a persisted session. A missing file is an empty session.
pub fn load(path: &Path) -> anyhow::Result<AuthAccess> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AuthAccess::new()),
        Err(e) => return Err(e.into()),
    };
    let value: serde_json::Value = serde_json::from_str(&contents)?;
    Ok(AuthAccess::from_json(value)?)
}

/// Save the session atomically.
pub fn save(path: &Path, access: &AuthAccess) -> anyhow::Result<()> {
    write_json_atomic(path, &access.to_json())
}

/// Write `value` as pretty JSON via a unique temp file and rename.
///
/// The temp name carries the PID and a counter so concurrent saves to the
/// same path never share a temp file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Save the cell's session every time its version changes, until shutdown.
pub fn spawn_persister(
    cell: Arc<CredentialCell>,
    path: PathBuf,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut versions = cell.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = versions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let version = *versions.borrow_and_update();
                    match save(&path, &cell.snapshot()) {
                        Ok(()) => tracing::debug!(version, path = %path.display(), "session saved"),
                        Err(e) => tracing::warn!(err = %e, "failed to save session"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;

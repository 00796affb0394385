//! Background reclamation of expired workspaces.
//!
//! The reaper reasons from directory mtime, not from job descriptors; the
//! only coordination with in-flight work is the active-job lease set,
//! which it consults before deleting.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::workspace::ActiveJobs;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawns the sweep loop for the lifetime of the process.
pub fn spawn(root: std::path::PathBuf, ttl: Duration, active: ActiveJobs) {
    tokio::spawn(async move {
        let mut interval = interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweep_once(&root, ttl, &active);
        }
    });
}

/// One sweep: delete every immediate child directory of `root` older than
/// now − ttl, unless its id is currently leased. Individual failures are
/// logged and left for the next sweep; the sweep itself never aborts.
pub fn sweep_once(root: &Path, ttl: Duration, active: &ActiveJobs) {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "reaper cannot list work root");
            return;
        }
    };
    let now = SystemTime::now();

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        if active.lock().map(|set| set.contains(&id)).unwrap_or(false) {
            debug!(job_id = %id, "skipping leased workspace");
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > ttl);
        if !expired {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => info!(job_id = %id, "reaped expired workspace"),
            Err(e) => warn!(job_id = %id, error = %e, "failed to reap workspace, will retry"),
        }
    }
}

//! Per-job workspace allocation and the active-job lease registry.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tracing::info;

use crate::error::{Error, Result};

/// One client-initiated job and its isolated directory.
///
/// The descriptor is created once per request and never reused; the id
/// doubles as the directory name under the work root. Output paths are
/// appended as the transformation produces them, nothing else mutates.
#[derive(Debug)]
pub struct JobDescriptor {
    pub id: String,
    pub dir: PathBuf,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub outputs: Vec<PathBuf>,
    _lease: JobLease,
}

/// Job ids currently being worked on. The reaper skips these even when the
/// directory mtime says they are expired.
pub type ActiveJobs = Arc<Mutex<HashSet<String>>>;

/// RAII registration in the active set; dropping it releases the job to
/// the reaper's normal age-based policy.
#[derive(Debug)]
struct JobLease {
    id: String,
    active: ActiveJobs,
}

impl Drop for JobLease {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.id);
        }
    }
}

/// Allocates isolated job directories under a single configured root.
#[derive(Debug, Clone)]
pub struct Workspaces {
    root: PathBuf,
    ttl: Duration,
    active: ActiveJobs,
}

impl Workspaces {
    /// Creates the work root if absent. Idempotent; called once at startup.
    pub fn open(root: &Path, ttl: Duration) -> Result<Self> {
        fs::create_dir_all(root).map_err(Error::Resource)?;
        Ok(Self {
            root: root.to_path_buf(),
            ttl,
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active(&self) -> ActiveJobs {
        self.active.clone()
    }

    /// Creates a fresh directory named by a random 128-bit id and returns
    /// its descriptor. Directory creation failure is fatal for the request.
    pub fn allocate(&self) -> Result<JobDescriptor> {
        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.root.join(&id);
        // create_dir, not create_dir_all: a collision would surface as
        // AlreadyExists instead of silently sharing the directory.
        fs::create_dir(&dir).map_err(Error::Resource)?;

        if let Ok(mut active) = self.active.lock() {
            active.insert(id.clone());
        }
        let created_at = SystemTime::now();
        info!(job_id = %id, "allocated workspace");
        Ok(JobDescriptor {
            _lease: JobLease {
                id: id.clone(),
                active: self.active.clone(),
            },
            id,
            dir,
            created_at,
            expires_at: created_at + self.ttl,
            outputs: Vec::new(),
        })
    }
}

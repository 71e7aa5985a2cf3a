//! Startup sweep for jobs orphaned by a restart.
//!
//! Orchestration state lives only in the process that ran it, so any job
//! still in flight when the server starts can never finish. The sweep
//! records those jobs as failed.

use log::{info, warn};

use crate::job::{JobStore, JobStoreError};

pub const INTERRUPTED_MESSAGE: &str = "Conversion was interrupted by a server restart";

/// Fails every non-terminal job that no live writer holds.
///
/// Returns how many jobs were swept.
pub fn sweep_interrupted(store: &JobStore) -> Result<usize, JobStoreError> {
    let orphans = store.processing_jobs()?;
    if orphans.is_empty() {
        return Ok(0);
    }

    let mut swept = 0;
    for job in orphans {
        let writer = match store.claim(&job.id) {
            Ok(writer) => writer,
            Err(JobStoreError::AlreadyClaimed(_)) => continue,
            Err(e) => return Err(e),
        };

        match writer.fail(INTERRUPTED_MESSAGE) {
            Ok(_) => swept += 1,
            Err(e) => warn!("Could not sweep interrupted job {}: {}", job.id, e),
        }
    }

    info!("Recovery sweep marked {} interrupted job(s) as failed", swept);
    Ok(swept)
}

//! Bridges job events onto the log.

use filevert::{JobEvent, JobEventBroadcaster, JobStatus};
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Logs every committed job write until the broadcaster closes.
pub fn start_event_bridge(events: &JobEventBroadcaster) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => {
                    warn!("Job event bridge lagged, missed {} events", n);
                }
                Err(RecvError::Closed) => {
                    info!("Job event channel closed, stopping event bridge");
                    break;
                }
            }
        }
    })
}

fn log_event(event: &JobEvent) {
    match event.status {
        JobStatus::Completed => info!(
            "Job {} completed: {}",
            event.job_id,
            event.result_file_name.as_deref().unwrap_or_default()
        ),
        JobStatus::Failed => info!(
            "Job {} failed: {}",
            event.job_id,
            event.error.as_deref().unwrap_or_default()
        ),
        _ => debug!("Job {} is {} at {}%", event.job_id, event.status, event.progress),
    }
}

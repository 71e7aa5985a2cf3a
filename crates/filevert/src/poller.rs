//! Status poller: follows jobs until they reach a terminal state.
//!
//! A [`StatusPoller`] is an owned object. Each started job gets one polling
//! loop; starting a job that is already being polled is a no-op. Updates are
//! delivered on the channel returned by [`StatusPoller::new`]. Dropping the
//! poller cancels every loop it still runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::sanitize::truncate_body;
use crate::service::JobStatusView;

/// Why a status fetch failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The job will never resolve for this caller (unknown or malformed id,
    /// rejected credentials). The loop stops at once.
    #[error("{0}")]
    Fatal(String),

    /// Worth retrying (network hiccup, server error).
    #[error("{0}")]
    Transient(String),
}

/// Where job status is read from.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusView, PollError>;
}

/// Something a polling loop observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollUpdate {
    /// The job is still in flight.
    Snapshot(JobStatusView),
    /// The job reached `COMPLETED` or `FAILED`; the loop has ended.
    Finished(JobStatusView),
    /// Polling gave up; the loop has ended.
    Failed { job_id: String, error: PollError },
}

impl PollUpdate {
    pub fn job_id(&self) -> &str {
        match self {
            PollUpdate::Snapshot(view) | PollUpdate::Finished(view) => &view.id,
            PollUpdate::Failed { job_id, .. } => job_id,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, PollUpdate::Snapshot(_))
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Consecutive transient failures tolerated before giving up.
    pub max_consecutive_errors: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_consecutive_errors: 5,
        }
    }
}

struct PollLoop {
    generation: u64,
    task: JoinHandle<()>,
}

type LoopRegistry = Arc<Mutex<HashMap<String, PollLoop>>>;

fn lock(loops: &LoopRegistry) -> MutexGuard<'_, HashMap<String, PollLoop>> {
    match loops.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            warn!("Poller registry lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Polls job status on a fixed interval, at most one loop per job id.
pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    config: PollerConfig,
    updates: mpsc::UnboundedSender<PollUpdate>,
    loops: LoopRegistry,
    next_generation: AtomicU64,
}

impl StatusPoller {
    pub fn new(
        source: Arc<dyn StatusSource>,
        config: PollerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PollUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let poller = Self {
            source,
            config,
            updates,
            loops: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        };
        (poller, rx)
    }

    /// Starts polling `job_id`. Returns `false` if it is already polled.
    pub fn start(&self, job_id: &str) -> bool {
        let mut loops = lock(&self.loops);
        if loops.contains_key(job_id) {
            debug!("Already polling job {}", job_id);
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.source),
            job_id.to_string(),
            self.config.clone(),
            self.updates.clone(),
            Arc::clone(&self.loops),
            generation,
        ));
        loops.insert(job_id.to_string(), PollLoop { generation, task });
        true
    }

    /// Stops polling `job_id`. Returns `false` if it was not being polled.
    pub fn cancel(&self, job_id: &str) -> bool {
        match lock(&self.loops).remove(job_id) {
            Some(poll_loop) => {
                poll_loop.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.loops).contains_key(job_id)
    }

    /// Number of loops still running.
    pub fn active(&self) -> usize {
        lock(&self.loops).len()
    }

    /// Cancels every loop.
    pub fn shutdown(&self) {
        let drained: Vec<PollLoop> = lock(&self.loops).drain().map(|(_, l)| l).collect();
        for poll_loop in drained {
            poll_loop.task.abort();
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_loop(
    source: Arc<dyn StatusSource>,
    job_id: String,
    config: PollerConfig,
    updates: mpsc::UnboundedSender<PollUpdate>,
    loops: LoopRegistry,
    generation: u64,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_errors = 0u32;

    loop {
        ticker.tick().await;

        let update = match source.fetch_status(&job_id).await {
            Ok(view) if view.status.is_terminal() => PollUpdate::Finished(view),
            Ok(view) => {
                consecutive_errors = 0;
                PollUpdate::Snapshot(view)
            }
            Err(PollError::Transient(message))
                if consecutive_errors + 1 < config.max_consecutive_errors =>
            {
                consecutive_errors += 1;
                debug!(
                    "Transient status error for job {} ({}/{}): {}",
                    job_id, consecutive_errors, config.max_consecutive_errors, message
                );
                continue;
            }
            Err(error) => {
                warn!("Stopped polling job {}: {}", job_id, error);
                PollUpdate::Failed {
                    job_id: job_id.clone(),
                    error,
                }
            }
        };

        let is_final = update.is_final();
        if updates.send(update).is_err() || is_final {
            break;
        }
    }

    let mut loops = lock(&loops);
    if loops.get(&job_id).map(|l| l.generation) == Some(generation) {
        loops.remove(&job_id);
    }
}

// ─── HTTP source ────────────────────────────────────────────────────────────

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads job status from the HTTP API.
pub struct HttpStatusSource {
    client: Client,
    base_url: String,
    owner_header: String,
    owner_id: SecretString,
}

impl HttpStatusSource {
    pub fn new(base_url: &str, owner_header: &str, owner_id: SecretString) -> Result<Self, PollError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PollError::Fatal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            owner_header: owner_header.to_string(),
            owner_id,
        })
    }
}

/// Job ids are UUIDs; anything outside their alphabet can never resolve.
pub fn is_well_formed_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= 64
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusView, PollError> {
        if !is_well_formed_job_id(job_id) {
            return Err(PollError::Fatal(format!("Malformed job id '{}'", job_id)));
        }

        let response = self
            .client
            .get(format!("{}/api/convert/{}", self.base_url, job_id))
            .header(self.owner_header.as_str(), self.owner_id.expose_secret())
            .send()
            .await
            .map_err(|e| PollError::Transient(format!("Status request failed: {}", e.without_url())))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<JobStatusView>()
                .await
                .map_err(|e| PollError::Fatal(format!("Malformed status response: {}", e.without_url())));
        }

        let body = truncate_body(&response.text().await.unwrap_or_default());
        match status {
            StatusCode::NOT_FOUND => Err(PollError::Fatal("Conversion job not found".to_string())),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                PollError::Fatal(format!("Status request rejected ({}): {}", status, body)),
            ),
            _ => Err(PollError::Transient(format!(
                "Status request failed ({}): {}",
                status, body
            ))),
        }
    }
}

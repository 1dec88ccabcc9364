//! Polling ingest — the pull fallback for inbound SMS.
//!
//! A ticking background task pulls the vendor's received-messages list and
//! feeds anything new through the same pipeline as the webhook path. A
//! bounded processed-id set keeps a poll tick from re-running messages the
//! webhook already handled in the same instant; the inbound table's unique
//! vendor id is the durable guard behind it.

use async_trait::async_trait;
use serde::Serialize;
use shamba_core::error::ShambaError;
use shamba_engine::InboundPipeline;
use shamba_gateway::{GatewayClient, ReceivedSms};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Floor for the poll interval; the vendor rate-limits below this.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

/// Processed-id set cap; on overflow the oldest ids are trimmed away.
const PROCESSED_CAP: usize = 1000;
const PROCESSED_KEEP: usize = 500;

/// Seam over the gateway's received-messages pull, so tests can feed fixed
/// message lists.
#[async_trait]
pub trait ReceivedSource: Send + Sync {
    async fn fetch_received(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ReceivedSms>, ShambaError>;
}

#[async_trait]
impl ReceivedSource for GatewayClient {
    async fn fetch_received(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ReceivedSms>, ShambaError> {
        GatewayClient::fetch_received(self, limit, offset).await
    }
}

/// Operator-facing polling stats.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PollerStats {
    pub is_running: bool,
    pub processed_count: usize,
    pub poll_interval_secs: u64,
}

/// Insertion-ordered dedup set with a hard cap.
struct ProcessedSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl ProcessedSet {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Atomically (under the caller's lock) check membership and insert.
    /// Returns true when the id is new.
    fn check_and_insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > PROCESSED_CAP {
            while self.order.len() > PROCESSED_KEEP {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// The periodic pull task. At most one timer runs at a time.
pub struct Poller {
    source: Arc<dyn ReceivedSource>,
    pipeline: Arc<InboundPipeline>,
    fetch_limit: u32,
    interval_secs: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    processed: Arc<Mutex<ProcessedSet>>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn ReceivedSource>,
        pipeline: Arc<InboundPipeline>,
        fetch_limit: u32,
    ) -> Self {
        Self {
            source,
            pipeline,
            fetch_limit,
            interval_secs: AtomicU64::new(0),
            task: Mutex::new(None),
            processed: Arc::new(Mutex::new(ProcessedSet::new())),
        }
    }

    /// Start the periodic poll. Starting while already running is a no-op
    /// with a warning. Intervals below the floor are clamped up.
    pub fn start(&self, interval_secs: u64) {
        let mut task = self.task.lock().expect("poller task lock poisoned");
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("polling already running, start ignored");
            return;
        }

        let interval_secs = interval_secs.max(MIN_POLL_INTERVAL_SECS);
        self.interval_secs.store(interval_secs, Ordering::Relaxed);

        let source = Arc::clone(&self.source);
        let pipeline = Arc::clone(&self.pipeline);
        let processed = Arc::clone(&self.processed);
        let fetch_limit = self.fetch_limit;
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = poll_tick(&source, &pipeline, &processed, fetch_limit).await {
                    warn!("poll failed: {e}");
                }
            }
        });
        *task = Some(handle);
        info!(interval_secs, "polling started");
    }

    /// Stop polling. Takes effect before the next tick; an in-flight fetch
    /// is dropped with the task.
    pub fn stop(&self) {
        let mut task = self.task.lock().expect("poller task lock poisoned");
        match task.take() {
            Some(handle) => {
                handle.abort();
                info!("polling stopped");
            }
            None => warn!("polling not running, stop ignored"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("poller task lock poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            is_running: self.is_running(),
            processed_count: self.processed.lock().expect("processed set poisoned").len(),
            poll_interval_secs: self.interval_secs.load(Ordering::Relaxed),
        }
    }

    /// One pull: fetch, dedup, pipe new messages through. Also the body of
    /// the operator's manual-poll control. Returns how many new messages
    /// were processed.
    pub async fn poll_once(&self) -> Result<usize, ShambaError> {
        poll_tick(&self.source, &self.pipeline, &self.processed, self.fetch_limit).await
    }
}

/// Shared between the timer task and manual polls.
async fn poll_tick(
    source: &Arc<dyn ReceivedSource>,
    pipeline: &Arc<InboundPipeline>,
    processed: &Arc<Mutex<ProcessedSet>>,
    fetch_limit: u32,
) -> Result<usize, ShambaError> {
    let messages = source.fetch_received(fetch_limit, 0).await?;

    let mut new_count = 0;
    for msg in messages {
        // Check-then-set in a single critical section; the id is marked
        // before processing so a racing tick cannot double-run it.
        let is_new = processed
            .lock()
            .expect("processed set poisoned")
            .check_and_insert(&msg.vendor_id);
        if !is_new {
            continue;
        }

        match pipeline
            .process(&msg.sender, &msg.message, &msg.vendor_id, &msg.received_at)
            .await
        {
            Ok(outcome) => debug!(vendor_id = %msg.vendor_id, ?outcome, "polled message"),
            Err(e) => warn!(vendor_id = %msg.vendor_id, "polled message failed: {e}"),
        }
        new_count += 1;
    }

    Ok(new_count)
}

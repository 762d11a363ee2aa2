//! Non-blocking front end for the [`TraceRecorder`].
//!
//! Telemetry and command paths hand entries to a bounded queue; one writer
//! task drains it in batches on the blocking pool. A full queue drops the
//! entry instead of waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{Direction, TracePayload, TraceRecorder};

/// Default queue depth between producers and the writer task
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Most entries written per blocking call
const WRITE_BATCH: usize = 64;

enum TraceJob {
    Record {
        dir: Direction,
        topic: String,
        payload: TracePayload,
        raw_len: Option<u64>,
    },
    /// Acknowledged once every earlier job has been written
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle; all clones feed the same writer
#[derive(Clone)]
pub struct TraceTap {
    inner: Arc<TapInner>,
}

struct TapInner {
    recorder: Arc<TraceRecorder>,
    tx: mpsc::Sender<TraceJob>,
    /// Held until the writer task is spawned
    rx: Mutex<Option<mpsc::Receiver<TraceJob>>>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for TraceTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceTap")
            .field("recorder", &self.inner.recorder.dir())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl TraceTap {
    /// Create a tap over `recorder`. Entries queue up until
    /// [`spawn_writer`](Self::spawn_writer) is called.
    pub fn new(recorder: Arc<TraceRecorder>, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        Self {
            inner: Arc::new(TapInner {
                recorder,
                tx,
                rx: Mutex::new(Some(rx)),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.inner.recorder
    }

    /// Entries discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Start the writer task. Returns `false` if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_writer(&self) -> bool {
        let rx = self.inner.rx.lock().unwrap_or_else(|e| e.into_inner()).take();
        match rx {
            Some(rx) => {
                tokio::spawn(run_writer(self.inner.recorder.clone(), rx));
                true
            }
            None => false,
        }
    }

    pub fn record_inbound(&self, topic: &str, payload: TracePayload, raw_len: Option<u64>) {
        self.enqueue(Direction::Rx, topic, payload, raw_len);
    }

    pub fn record_outbound(&self, topic: &str, payload: TracePayload, raw_len: Option<u64>) {
        self.enqueue(Direction::Tx, topic, payload, raw_len);
    }

    fn enqueue(&self, dir: Direction, topic: &str, payload: TracePayload, raw_len: Option<u64>) {
        if !self.inner.recorder.is_enabled() {
            return;
        }

        let job = TraceJob::Record {
            dir,
            topic: topic.to_string(),
            payload,
            raw_len,
        };
        match self.inner.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Trace queue full, dropped {} entry ({} total)", topic, dropped);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Trace writer gone, dropped {} entry", topic);
            }
        }
    }

    /// Wait until everything queued so far has been written.
    ///
    /// Returns immediately if the writer was never started.
    pub async fn flush(&self) {
        if self.inner.rx.lock().unwrap_or_else(|e| e.into_inner()).is_some() {
            return;
        }

        let (ack, done) = oneshot::channel();
        if self.inner.tx.send(TraceJob::Flush(ack)).await.is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Flush the queue, then write the stop marker and close the file.
    pub async fn stop(&self) {
        self.flush().await;
        let recorder = self.inner.recorder.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || recorder.stop()).await {
            warn!("Trace recorder stop failed: {}", e);
        }
    }
}

async fn run_writer(recorder: Arc<TraceRecorder>, mut rx: mpsc::Receiver<TraceJob>) {
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(WRITE_BATCH);
        batch.push(first);
        while batch.len() < WRITE_BATCH {
            match rx.try_recv() {
                Ok(job) => batch.push(job),
                Err(_) => break,
            }
        }

        let recorder = recorder.clone();
        match tokio::task::spawn_blocking(move || write_batch(&recorder, batch)).await {
            Ok(acks) => {
                for ack in acks {
                    let _ = ack.send(());
                }
            }
            Err(e) => warn!("Trace writer batch failed: {}", e),
        }
    }
    debug!("Trace writer stopped");
}

/// Write records in order; returns the flush acknowledgements seen.
fn write_batch(recorder: &TraceRecorder, batch: Vec<TraceJob>) -> Vec<oneshot::Sender<()>> {
    let mut acks = Vec::new();
    for job in batch {
        match job {
            TraceJob::Record {
                dir,
                topic,
                payload,
                raw_len,
            } => recorder.record(dir, &topic, payload, raw_len),
            TraceJob::Flush(ack) => acks.push(ack),
        }
    }
    acks
}

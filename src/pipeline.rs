use crate::config::Config;
use crate::deduplicator::SignatureDeduplicator;
use crate::extractor::MessageExtractor;
use crate::metrics::{MessageMetric, MetricsCollector, MetricsSummary};
use crate::models::{Message, Signature};
use crate::store::SignatureStore;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Cloneable request to stop a running pipeline.
///
/// Once set, no new messages are submitted; in-flight extractions finish and the
/// pending batch is still flushed.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: MetricsSummary,
    pub batches_flushed: usize,
    pub signatures_committed: usize,
    pub store_failures: usize,
    pub cancelled: bool,
}

/// Drives extraction over a message stream with a bounded pool of blocking workers,
/// then dedupes, filters and hands each batch to the store from the orchestrating task.
/// Store writes run on tokio's blocking pool so a slow or retrying commit never stalls
/// the executor.
pub struct Pipeline {
    extractor: Arc<dyn MessageExtractor>,
    deduplicator: SignatureDeduplicator,
    concurrency: usize,
    batch_size: usize,
    min_confidence: f64,
    metrics: Arc<MetricsCollector>,
    stop: StopHandle,
}

impl Pipeline {
    pub fn new(extractor: Arc<dyn MessageExtractor>, config: &Config) -> Self {
        Self {
            extractor,
            deduplicator: SignatureDeduplicator::new(config.dedup.threshold),
            concurrency: config.pipeline.concurrency.max(1),
            batch_size: config.pipeline.batch_size.max(1),
            min_confidence: config.pipeline.min_confidence,
            metrics: Arc::new(MetricsCollector::new()),
            stop: StopHandle::new(),
        }
    }

    pub fn with_deduplicator(mut self, deduplicator: SignatureDeduplicator) -> Self {
        self.deduplicator = deduplicator;
        self
    }

    /// Share an existing handle, e.g. one already wired to Ctrl-C.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Live view of this pipeline's metrics, usable while a run is in progress.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub async fn run<I>(&self, messages: I, sink: Arc<dyn SignatureStore>) -> RunReport
    where
        I: IntoIterator<Item = Message>,
    {
        let mut messages = messages.into_iter().fuse();
        let mut workers: JoinSet<Option<Signature>> = JoinSet::new();
        let mut batch: Vec<Signature> = Vec::with_capacity(self.batch_size);
        let mut report = RunReport {
            summary: MetricsSummary::default(),
            batches_flushed: 0,
            signatures_committed: 0,
            store_failures: 0,
            cancelled: false,
        };

        loop {
            while workers.len() < self.concurrency {
                if self.stop.is_stopped() {
                    if !report.cancelled {
                        log::info!("Stop requested, draining {} in-flight message(s)", workers.len());
                    }
                    report.cancelled = true;
                    break;
                }
                match messages.next() {
                    Some(message) => self.submit(&mut workers, message),
                    None => break,
                }
            }

            match workers.join_next().await {
                None => break,
                Some(Ok(Some(signature))) => {
                    batch.push(signature);
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch, &sink, &mut report).await;
                    }
                }
                Some(Ok(None)) => {}
                Some(Err(e)) => log::error!("[pipeline] worker task failed: {e}"),
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &sink, &mut report).await;
        }

        report.summary = self.metrics.summary();
        log::info!(
            "Run finished: {} messages, {} signatures extracted, {} committed in {} batch(es)",
            report.summary.total_messages,
            report.summary.signatures_extracted,
            report.signatures_committed,
            report.batches_flushed
        );
        report
    }

    fn submit(&self, workers: &mut JoinSet<Option<Signature>>, message: Message) {
        let extractor = Arc::clone(&self.extractor);
        let metrics = Arc::clone(&self.metrics);

        workers.spawn_blocking(move || {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| extractor.extract_message(&message)));
            let time_ms = started.elapsed().as_secs_f64() * 1000.0;

            let signature = match outcome {
                Ok(Ok(signature)) => signature,
                Ok(Err(e)) => {
                    log::error!("[extractor] msg={}: {e:#}", message.message_id);
                    None
                }
                Err(payload) => {
                    log::error!(
                        "[extractor] msg={}: panicked: {}",
                        message.message_id,
                        panic_message(payload.as_ref())
                    );
                    None
                }
            };

            metrics.record(MessageMetric {
                msg_id: message.message_id,
                extracted: signature.is_some(),
                confidence: signature.as_ref().map_or(0.0, |s| s.confidence),
                time_ms,
            });
            signature
        });
    }

    /// Dedupe, then drop anything under `min_confidence`, then one `add_batch` call.
    async fn flush(
        &self,
        batch: &mut Vec<Signature>,
        sink: &Arc<dyn SignatureStore>,
        report: &mut RunReport,
    ) {
        let pending = std::mem::take(batch);
        let pending_len = pending.len();
        let accepted: Vec<Signature> = self
            .deduplicator
            .dedupe(pending)
            .into_iter()
            .filter(|signature| signature.confidence >= self.min_confidence)
            .collect();
        report.batches_flushed += 1;

        log::debug!(
            "[pipeline] flushing batch: {pending_len} extracted, {} after dedupe and filter",
            accepted.len()
        );
        if accepted.is_empty() {
            return;
        }

        let count = accepted.len();
        let store = Arc::clone(sink);
        match tokio::task::spawn_blocking(move || store.add_batch(&accepted)).await {
            Ok(Ok(())) => report.signatures_committed += count,
            Ok(Err(e)) => {
                log::error!("[store:{}] dropping batch of {count}: {e:#}", sink.name());
                report.store_failures += 1;
            }
            Err(e) => {
                log::error!("[store:{}] write task for batch of {count} failed: {e}", sink.name());
                report.store_failures += 1;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

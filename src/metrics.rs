use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Outcome of one extraction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetric {
    pub msg_id: String,
    pub extracted: bool,
    pub confidence: f64,
    pub time_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_messages: usize,
    pub signatures_extracted: usize,
    pub average_time_ms: f64,
    /// Averaged over extracted messages only.
    pub average_confidence: f64,
    pub duration_s: f64,
}

/// Append-only per-message telemetry shared by all workers of one run.
///
/// Every access goes through a single lock, so recording and aggregating never interleave.
pub struct MetricsCollector {
    records: Mutex<Vec<MessageMetric>>,
    started: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MessageMetric>> {
        // Records are independent, a panic mid-push cannot leave them inconsistent
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, metric: MessageMetric) {
        if log::log_enabled!(log::Level::Debug) {
            if let Ok(line) = serde_json::to_string(&metric) {
                log::debug!("{line}");
            }
        }
        self.lock().push(metric);
    }

    pub fn summary(&self) -> MetricsSummary {
        let records = self.lock();
        let total_messages = records.len();
        let extracted: Vec<&MessageMetric> = records.iter().filter(|m| m.extracted).collect();

        let average_time_ms = if total_messages > 0 {
            records.iter().map(|m| m.time_ms).sum::<f64>() / total_messages as f64
        } else {
            0.0
        };
        let average_confidence = if extracted.is_empty() {
            0.0
        } else {
            extracted.iter().map(|m| m.confidence).sum::<f64>() / extracted.len() as f64
        };

        MetricsSummary {
            total_messages,
            signatures_extracted: extracted.len(),
            average_time_ms,
            average_confidence,
            duration_s: self.started.elapsed().as_secs_f64(),
        }
    }

    pub fn records(&self) -> Vec<MessageMetric> {
        self.lock().clone()
    }

    /// Write the summary and every per-message record as pretty JSON.
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let report = serde_json::json!({
            "summary": self.summary(),
            "messages": self.records(),
        });
        let content =
            serde_json::to_string_pretty(&report).context("Failed to serialize metrics")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write metrics dump: {}", path.as_ref().display()))?;
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

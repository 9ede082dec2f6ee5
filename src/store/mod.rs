pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::models::Signature;
use anyhow::Result;
use std::sync::Mutex;

/// Where extracted signatures end up.
///
/// The pipeline only ever calls [`add_batch`](Self::add_batch), from the orchestrator on
/// tokio's blocking pool and never from a worker. Retrying transient failures is the store's job.
pub trait SignatureStore: Send + Sync {
    fn name(&self) -> &str;

    fn add(&self, signature: &Signature) -> Result<()>;

    fn add_batch(&self, signatures: &[Signature]) -> Result<()> {
        for signature in signatures {
            self.add(signature)?;
        }
        Ok(())
    }

    /// Signatures with `confidence >= min_confidence`, in insertion order. A filter of
    /// `None`, `""` or `"*"` matches everything, anything else is a case-insensitive substring.
    fn query(&self, text_filter: Option<&str>, min_confidence: f64) -> Result<Vec<Signature>>;
}

/// Returns the filter needle, or `None` when the filter matches everything.
pub(crate) fn filter_needle(text_filter: Option<&str>) -> Option<&str> {
    match text_filter.map(str::trim) {
        None | Some("") | Some("*") => None,
        Some(needle) => Some(needle),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    signatures: Mutex<Vec<Signature>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.signatures.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn signature_contains(signature: &Signature, needle_lower: &str) -> bool {
    let meta = &signature.metadata;
    signature.text().to_lowercase().contains(needle_lower)
        || [
            &meta.name,
            &meta.title,
            &meta.company,
            &meta.phone,
            &meta.email,
            &meta.url,
            &meta.address,
        ]
        .iter()
        .filter_map(|field| field.as_deref())
        .any(|value| value.to_lowercase().contains(needle_lower))
}

impl SignatureStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn add(&self, signature: &Signature) -> Result<()> {
        let mut signatures = self
            .signatures
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        signatures.push(signature.clone());
        Ok(())
    }

    fn query(&self, text_filter: Option<&str>, min_confidence: f64) -> Result<Vec<Signature>> {
        let needle = filter_needle(text_filter).map(str::to_lowercase);
        let signatures = self
            .signatures
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;

        Ok(signatures
            .iter()
            .filter(|s| s.confidence >= min_confidence)
            .filter(|s| needle.as_deref().map_or(true, |n| signature_contains(s, n)))
            .cloned()
            .collect())
    }
}

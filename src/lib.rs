pub mod config;
pub mod deduplicator;
pub mod extractor;
pub mod heuristics;
pub mod metrics;
pub mod models;
pub mod normalization;
pub mod parser;
pub mod pipeline;
pub mod source;
pub mod store;

pub use config::{load_config, load_config_or_default, Config};
pub use deduplicator::SignatureDeduplicator;
pub use extractor::{MessageExtractor, SignatureExtractor};
pub use heuristics::{BoundaryDetector, Heuristic};
pub use metrics::{MessageMetric, MetricsCollector, MetricsSummary};
pub use models::{Message, Signature, SignatureMetadata};
pub use normalization::BodyNormalizer;
pub use parser::SignatureParser;
pub use pipeline::{Pipeline, RunReport, StopHandle};
pub use source::JsonLinesSource;
pub use store::{MemoryStore, SignatureStore, SqliteStore};

use crate::config::Config;
use crate::heuristics::{default_heuristics, BoundaryMatch, Heuristic};
use crate::models::{Message, Signature};
use crate::normalization::BodyNormalizer;
use crate::parser::SignatureParser;
use anyhow::Result;

/// Confidence ceiling for blocks without email, phone or name.
const WEAK_EVIDENCE_CAP: f64 = 0.5;
/// Bonus per strong field (email, phone, name) found in the block.
const FIELD_BONUS: f64 = 0.05;
/// Blocks shorter than this are not worth reporting.
const MIN_SIGNATURE_LINES: usize = 2;

/// Anything the pipeline can hand a message to.
pub trait MessageExtractor: Send + Sync {
    fn extract_message(&self, message: &Message) -> Result<Option<Signature>>;
}

pub struct SignatureExtractor {
    normalizer: BodyNormalizer,
    heuristics: Vec<Heuristic>,
    parser: SignatureParser,
    max_signature_lines: usize,
}

impl SignatureExtractor {
    /// Builds the default heuristic chain. Bad patterns in `config` fail here, not per message.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            normalizer: BodyNormalizer::new(),
            heuristics: default_heuristics(&config.extraction)?,
            parser: SignatureParser::new(&config.parser)?,
            max_signature_lines: config.extraction.max_signature_lines,
        })
    }

    /// Replace the heuristic chain. Order is priority order.
    pub fn with_heuristics(mut self, heuristics: Vec<Heuristic>) -> Self {
        self.heuristics = heuristics;
        self
    }

    pub fn heuristics(&self) -> &[Heuristic] {
        &self.heuristics
    }

    pub fn extract(&self, body: &str, message_id: &str, timestamp: Option<f64>) -> Option<Signature> {
        let lines = self.normalizer.normalize(body);
        if lines.is_empty() {
            return None;
        }

        let boundary = self.find_boundary(&lines, body, message_id)?;

        let collected: Vec<&str> = lines[boundary.index..]
            .iter()
            .take(self.max_signature_lines)
            .map(|line| line.trim())
            .take_while(|line| !line.is_empty())
            .collect();
        if collected.len() < MIN_SIGNATURE_LINES {
            log::debug!(
                "msg={message_id}: only {} signature line(s) after boundary, skipping",
                collected.len()
            );
            return None;
        }

        let text = collected.join("\n");
        let metadata = self.parser.parse(&text);

        let confidence = if metadata.has_contact_evidence() {
            let strong_fields = [&metadata.email, &metadata.phone, &metadata.name]
                .iter()
                .filter(|field| field.is_some())
                .count();
            boundary.confidence + FIELD_BONUS * strong_fields as f64
        } else {
            boundary.confidence.min(WEAK_EVIDENCE_CAP)
        };

        Some(
            Signature::new(text, message_id, timestamp)
                .with_metadata(metadata)
                .with_confidence(confidence),
        )
    }

    /// First heuristic (in priority order) that reports a boundary. Failing heuristics are skipped.
    fn find_boundary(&self, lines: &[String], body: &str, message_id: &str) -> Option<BoundaryMatch> {
        for heuristic in &self.heuristics {
            match heuristic.detect(lines, body) {
                Ok(Some(found)) => {
                    log::debug!(
                        "[heuristic:{}] msg={message_id}: boundary at line {}",
                        heuristic.name(),
                        found.index
                    );
                    return Some(found);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("[heuristic:{}] msg={message_id}: {e:#}", heuristic.name());
                }
            }
        }
        None
    }
}

impl MessageExtractor for SignatureExtractor {
    fn extract_message(&self, message: &Message) -> Result<Option<Signature>> {
        Ok(self.extract(&message.body, &message.message_id, message.timestamp))
    }
}

use crate::models::{comparison_form, Signature};
use anyhow::{bail, Result};

pub const DEFAULT_THRESHOLD: f64 = 0.85;

pub type SimilarityFn = Box<dyn Fn(&str, &str) -> Result<f64> + Send + Sync>;

/// Collapses near-identical signatures into one representative each.
///
/// Each incoming signature is merged into the *first* representative whose
/// comparison form is at least `threshold` similar, otherwise it becomes a new
/// representative. Survivors keep their first-occurrence order.
pub struct SignatureDeduplicator {
    threshold: f64,
    similarity: SimilarityFn,
}

/// Edit-distance ratio in `[0, 1]`.
pub fn levenshtein_ratio(a: &str, b: &str) -> Result<f64> {
    Ok(strsim::normalized_levenshtein(a, b))
}

impl SignatureDeduplicator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            similarity: Box::new(levenshtein_ratio),
        }
    }

    /// Swap the similarity measure, e.g. for a different distance metric.
    pub fn with_similarity<F>(mut self, similarity: F) -> Self
    where
        F: Fn(&str, &str) -> Result<f64> + Send + Sync + 'static,
    {
        self.similarity = Box::new(similarity);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn dedupe(&self, signatures: Vec<Signature>) -> Vec<Signature> {
        let mut representatives: Vec<(Signature, String)> = Vec::with_capacity(signatures.len());

        for signature in signatures {
            let normalized = comparison_form(signature.text());
            let matched = representatives.iter().position(|(rep, rep_normalized)| {
                self.ratio(&normalized, rep_normalized, &signature, rep) >= self.threshold
            });

            match matched {
                Some(index) => merge_into(&mut representatives[index].0, signature),
                None => representatives.push((signature, normalized)),
            }
        }

        representatives.into_iter().map(|(rep, _)| rep).collect()
    }

    /// A failed comparison counts as "not similar" for that pair only.
    fn ratio(&self, a: &str, b: &str, incoming: &Signature, rep: &Signature) -> f64 {
        let result = (self.similarity)(a, b).and_then(|ratio| {
            if !ratio.is_finite() {
                bail!("similarity returned {ratio}");
            }
            Ok(ratio)
        });

        match result {
            Ok(ratio) => ratio,
            Err(e) => {
                log::warn!(
                    "[dedupe] msg={} vs msg={}: {e:#}",
                    incoming.source_msg_id,
                    rep.source_msg_id
                );
                0.0
            }
        }
    }
}

impl Default for SignatureDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

/// Earliest timestamp, fill-only metadata, highest confidence.
fn merge_into(rep: &mut Signature, duplicate: Signature) {
    if let Some(ts) = duplicate.timestamp {
        if rep.timestamp.map_or(true, |current| ts < current) {
            rep.timestamp = Some(ts);
        }
    }
    rep.metadata.fill_missing_from(&duplicate.metadata);
    rep.confidence = rep.confidence.max(duplicate.confidence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignatureMetadata;

    fn sig(text: &str, id: &str, ts: Option<f64>, confidence: f64) -> Signature {
        Signature::new(text, id, ts).with_confidence(confidence)
    }

    fn sample() -> Vec<Signature> {
        vec![
            sig("John Doe\njohn@acme.com", "1", Some(10.0), 0.9),
            sig("John Doe\njohn@acme.com", "2", Some(20.0), 0.9),
            sig("John Doe\njohn@acme.co", "3", Some(30.0), 0.9),
            sig("Jane Smith\njane@example.org", "4", Some(40.0), 0.9),
            sig("Bob Brown\n(555) 321-0000", "5", Some(50.0), 0.9),
        ]
    }

    #[test]
    fn test_dedupe_collapses_near_duplicates() {
        let unique = SignatureDeduplicator::default().dedupe(sample());
        let ids: Vec<&str> = unique.iter().map(|s| s.source_msg_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4", "5"]);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let counts: Vec<usize> = [1.0, 0.9, 0.0]
            .iter()
            .map(|&t| SignatureDeduplicator::new(t).dedupe(sample()).len())
            .collect();
        assert_eq!(counts, vec![4, 3, 1]);
        assert!(counts.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_earliest_timestamp_wins() {
        let unique = SignatureDeduplicator::default().dedupe(vec![
            sig("John Doe\nAcme", "d1", Some(1000.0), 0.5),
            sig("John Doe\nAcme", "d2", Some(500.0), 0.5),
            sig("John Doe\nAcme", "d3", None, 0.5),
        ]);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].source_msg_id, "d1");
        assert_eq!(unique[0].timestamp, Some(500.0));
    }

    #[test]
    fn test_absent_timestamp_is_filled() {
        let unique = SignatureDeduplicator::default().dedupe(vec![
            sig("John Doe\nAcme", "d1", None, 0.5),
            sig("John Doe\nAcme", "d2", Some(700.0), 0.5),
        ]);
        assert_eq!(unique[0].timestamp, Some(700.0));
    }

    #[test]
    fn test_merge_fills_fields_and_keeps_max_confidence() {
        let rep = sig("John Doe\nAcme", "d1", None, 0.6).with_metadata(SignatureMetadata {
            company: Some("Acme".to_string()),
            ..Default::default()
        });
        let dup = sig("John Doe\nAcme", "d2", None, 0.95).with_metadata(SignatureMetadata {
            company: None,
            email: Some("john@acme.com".to_string()),
            ..Default::default()
        });

        let unique = SignatureDeduplicator::default().dedupe(vec![rep, dup]);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].metadata.company.as_deref(), Some("Acme"));
        assert_eq!(unique[0].metadata.email.as_deref(), Some("john@acme.com"));
        assert_eq!(unique[0].confidence, 0.95);
    }

    #[test]
    fn test_first_match_wins() {
        // "b" is similar to both representatives; it must go to the first one
        let dedup = SignatureDeduplicator::new(0.5).with_similarity(|a, b| {
            Ok(match (a, b) {
                ("b", _) => 1.0,
                _ => 0.0,
            })
        });
        let unique = dedup.dedupe(vec![
            sig("a1", "1", None, 0.1),
            sig("a2", "2", None, 0.1),
            sig("b", "3", None, 0.7),
        ]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].confidence, 0.7);
        assert_eq!(unique[1].confidence, 0.1);
    }

    #[test]
    fn test_similarity_error_does_not_abort() {
        let dedup = SignatureDeduplicator::default().with_similarity(|a, b| {
            if a.contains("bob") || b.contains("bob") {
                anyhow::bail!("cannot compare");
            }
            levenshtein_ratio(a, b)
        });
        let unique = dedup.dedupe(sample());
        let ids: Vec<&str> = unique.iter().map(|s| s.source_msg_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4", "5"]);
    }

    #[test]
    fn test_non_finite_ratio_counts_as_no_match() {
        let dedup = SignatureDeduplicator::new(0.0).with_similarity(|_, _| Ok(f64::NAN));
        assert_eq!(dedup.dedupe(sample()).len(), 5);
    }
}

use crate::config::ExtractionConfig;
use crate::normalization::BodyNormalizer;
use anyhow::{bail, Context, Result};
use regex::Regex;

pub const SIGN_OFF_CONFIDENCE: f64 = 0.9;
pub const HTML_DIVIDER_CONFIDENCE: f64 = 0.7;
pub const TRAILING_LINES_CONFIDENCE: f64 = 0.5;

/// User-supplied boundary strategy, plugged in through [`Heuristic::Custom`].
pub trait BoundaryDetector: Send + Sync {
    fn name(&self) -> &str;
    fn base_confidence(&self) -> f64;
    /// Index into `lines` where the signature block starts, or `None` for no match.
    fn detect_boundary(&self, lines: &[String], raw_body: &str) -> Result<Option<usize>>;
}

/// Winning boundary and the confidence carried by the heuristic that found it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryMatch {
    pub index: usize,
    pub confidence: f64,
}

/// Nearest sign-off line ("--", "Thanks", "Regards", ...) to the end of the message.
pub struct SignOffHeuristic {
    patterns: Vec<Regex>,
}

impl SignOffHeuristic {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("(?i)^(?:{pattern})"))
                    .with_context(|| format!("Invalid sign-off pattern: {pattern}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    fn detect_boundary(&self, lines: &[String]) -> Option<usize> {
        lines.iter().rposition(|line| {
            let line = line.trim();
            self.patterns.iter().any(|pattern| pattern.is_match(line))
        })
    }
}

/// An explicit `<hr>` or `class="signature"` container in the raw HTML body.
pub struct HtmlDividerHeuristic {
    marker_regex: Regex,
    normalizer: BodyNormalizer,
}

impl HtmlDividerHeuristic {
    pub fn new() -> Self {
        Self {
            marker_regex: Regex::new(
                r#"(?i)<hr(?:[\s/][^>]*)?>|<[a-z][a-z0-9]*\s[^>]*\bclass\s*=\s*["']?signature\b[^>]*>"#,
            )
            .unwrap(),
            normalizer: BodyNormalizer::new(),
        }
    }

    fn detect_boundary(&self, lines: &[String], raw_body: &str) -> Option<usize> {
        let marker = self.marker_regex.find_iter(raw_body).last()?;
        let prefix = &raw_body[..marker.start()];
        // Count lines the way the whole body was normalized, even if the prefix has no tags
        let boundary = if self.normalizer.is_html(raw_body) {
            self.normalizer.normalize_html(prefix).len()
        } else {
            self.normalizer.normalize(prefix).len()
        };

        // Marker after the last visible line, nothing below it
        if boundary >= lines.len() {
            return None;
        }
        Some(boundary)
    }
}

impl Default for HtmlDividerHeuristic {
    fn default() -> Self {
        Self::new()
    }
}

/// Last resort: the final `max_lines` lines of the message. Zero disables it.
pub struct TrailingLinesHeuristic {
    max_lines: usize,
}

impl TrailingLinesHeuristic {
    pub fn new(max_lines: usize) -> Self {
        Self { max_lines }
    }

    fn detect_boundary(&self, lines: &[String]) -> Option<usize> {
        if lines.is_empty() || self.max_lines == 0 {
            return None;
        }
        Some(lines.len().saturating_sub(self.max_lines))
    }
}

pub enum Heuristic {
    SignOff(SignOffHeuristic),
    HtmlDivider(HtmlDividerHeuristic),
    TrailingLines(TrailingLinesHeuristic),
    Custom(Box<dyn BoundaryDetector>),
}

impl Heuristic {
    pub fn name(&self) -> &str {
        match self {
            Heuristic::SignOff(_) => "sign-off",
            Heuristic::HtmlDivider(_) => "html-divider",
            Heuristic::TrailingLines(_) => "trailing-lines",
            Heuristic::Custom(detector) => detector.name(),
        }
    }

    pub fn base_confidence(&self) -> f64 {
        match self {
            Heuristic::SignOff(_) => SIGN_OFF_CONFIDENCE,
            Heuristic::HtmlDivider(_) => HTML_DIVIDER_CONFIDENCE,
            Heuristic::TrailingLines(_) => TRAILING_LINES_CONFIDENCE,
            Heuristic::Custom(detector) => detector.base_confidence(),
        }
    }

    /// `Ok(None)` is an ordinary "no match"; `Err` means the heuristic itself failed.
    pub fn detect(&self, lines: &[String], raw_body: &str) -> Result<Option<BoundaryMatch>> {
        let index = match self {
            Heuristic::SignOff(h) => h.detect_boundary(lines),
            Heuristic::HtmlDivider(h) => h.detect_boundary(lines, raw_body),
            Heuristic::TrailingLines(h) => h.detect_boundary(lines),
            Heuristic::Custom(detector) => detector.detect_boundary(lines, raw_body)?,
        };

        match index {
            Some(index) if index >= lines.len() => {
                bail!("boundary {index} out of range for {} lines", lines.len())
            }
            Some(index) => Ok(Some(BoundaryMatch {
                index,
                confidence: self.base_confidence(),
            })),
            None => Ok(None),
        }
    }
}

/// Built-in heuristics in priority order: sign-off, HTML divider, trailing lines.
pub fn default_heuristics(config: &ExtractionConfig) -> Result<Vec<Heuristic>> {
    Ok(vec![
        Heuristic::SignOff(SignOffHeuristic::new(&config.signoff_patterns)?),
        Heuristic::HtmlDivider(HtmlDividerHeuristic::new()),
        Heuristic::TrailingLines(TrailingLinesHeuristic::new(config.max_fallback_lines)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        BodyNormalizer::new().normalize(text)
    }

    #[test]
    fn test_sign_off_picks_last_match() {
        let heuristic = Heuristic::SignOff(
            SignOffHeuristic::new(&ExtractionConfig::default().signoff_patterns).unwrap(),
        );
        let body = "Thanks for the report\nMore text\nREGARDS,\nJohn Doe";
        let found = heuristic.detect(&lines(body), body).unwrap().unwrap();
        assert_eq!(found.index, 2);
        assert_eq!(found.confidence, SIGN_OFF_CONFIDENCE);
    }

    #[test]
    fn test_sign_off_anchored_at_line_start() {
        let heuristic = Heuristic::SignOff(SignOffHeuristic::new(&["regards".to_string()]).unwrap());
        let body = "Send my regards to Bob\nJohn";
        assert!(heuristic.detect(&lines(body), body).unwrap().is_none());
    }

    #[test]
    fn test_invalid_sign_off_pattern_fails_at_construction() {
        assert!(SignOffHeuristic::new(&["(unclosed".to_string()]).is_err());
    }

    #[test]
    fn test_html_divider_hr() {
        let heuristic = Heuristic::HtmlDivider(HtmlDividerHeuristic::new());
        let body = "<p>Hello</p><p>See you</p><hr><p>Jane Smith</p><p>jane@ex.com</p>";
        let found = heuristic.detect(&lines(body), body).unwrap().unwrap();
        assert_eq!(found.index, 2);
        assert_eq!(found.confidence, HTML_DIVIDER_CONFIDENCE);
    }

    #[test]
    fn test_html_divider_signature_class() {
        let heuristic = Heuristic::HtmlDivider(HtmlDividerHeuristic::new());
        let body = "<p>Hi</p><div class=\"signature\">Jane Smith<br>jane@ex.com</div>";
        let found = heuristic.detect(&lines(body), body).unwrap().unwrap();
        assert_eq!(found.index, 1);
    }

    #[test]
    fn test_html_divider_ignores_trailing_marker() {
        let heuristic = Heuristic::HtmlDivider(HtmlDividerHeuristic::new());
        let body = "<p>Hi</p><p>Jane</p><hr>";
        assert!(heuristic.detect(&lines(body), body).unwrap().is_none());
        assert!(heuristic.detect(&lines("plain"), "plain").unwrap().is_none());
    }

    #[test]
    fn test_html_divider_counts_plain_prefix_as_html() {
        let heuristic = Heuristic::HtmlDivider(HtmlDividerHeuristic::new());
        let body = "Hello,\nSee the notes below.\n<hr>\nJane Smith<br>Example LLC<br>jane@ex.com";
        let lines = lines(body);
        assert_eq!(lines[0], "Hello, See the notes below.");
        let found = heuristic.detect(&lines, body).unwrap().unwrap();
        assert_eq!(found.index, 1);
        assert_eq!(lines[found.index], "Jane Smith");
    }

    #[test]
    fn test_sign_off_requires_whole_line() {
        let heuristic = Heuristic::SignOff(
            SignOffHeuristic::new(&ExtractionConfig::default().signoff_patterns).unwrap(),
        );
        for body in [
            "Hi Bob,\nThanks for sending the draft over.\nJohn Doe\njohn@acme.com",
            "Hello\nBest practices are attached.\nJohn Doe\njohn@acme.com",
            "Hello\nRegards to your family\nJohn Doe",
        ] {
            assert!(heuristic.detect(&lines(body), body).unwrap().is_none(), "{body:?}");
        }
        for sign_off in ["Thanks!", "Many thanks,", "Best regards,", "Kind Regards", "Best", "Sincerely yours,"] {
            let body = format!("Hello\n{sign_off}\nJohn Doe");
            assert_eq!(
                heuristic.detect(&lines(&body), &body).unwrap().map(|m| m.index),
                Some(1),
                "{sign_off:?}"
            );
        }
    }

    #[test]
    fn test_trailing_lines_zero_disables() {
        let heuristic = Heuristic::TrailingLines(TrailingLinesHeuristic::new(0));
        let body = "a\nb\nc";
        assert!(heuristic.detect(&lines(body), body).unwrap().is_none());
    }

    #[test]
    fn test_trailing_lines_fallback() {
        let heuristic = Heuristic::TrailingLines(TrailingLinesHeuristic::new(3));
        let body = "a\nb\nc\nd\ne";
        assert_eq!(heuristic.detect(&lines(body), body).unwrap().unwrap().index, 2);

        let short = "a\nb";
        assert_eq!(heuristic.detect(&lines(short), short).unwrap().unwrap().index, 0);
        assert!(heuristic.detect(&[], "").unwrap().is_none());
    }

    struct OutOfRange;

    impl BoundaryDetector for OutOfRange {
        fn name(&self) -> &str {
            "out-of-range"
        }

        fn base_confidence(&self) -> f64 {
            0.8
        }

        fn detect_boundary(&self, lines: &[String], _raw_body: &str) -> Result<Option<usize>> {
            Ok(Some(lines.len() + 1))
        }
    }

    #[test]
    fn test_custom_boundary_out_of_range_is_error() {
        let heuristic = Heuristic::Custom(Box::new(OutOfRange));
        assert_eq!(heuristic.name(), "out-of-range");
        assert!(heuristic.detect(&lines("a\nb"), "a\nb").is_err());
    }

    #[test]
    fn test_default_order() {
        let heuristics = default_heuristics(&ExtractionConfig::default()).unwrap();
        let names: Vec<&str> = heuristics.iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["sign-off", "html-divider", "trailing-lines"]);
    }
}

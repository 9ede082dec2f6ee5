use serde::{Deserialize, Serialize};

/// One message as handed over by the message source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub body: String,
    pub message_id: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl Message {
    pub fn new(body: impl Into<String>, message_id: impl Into<String>, timestamp: Option<f64>) -> Self {
        Self {
            body: body.into(),
            message_id: message_id.into(),
            // Zero means the source had no submit time
            timestamp: timestamp.filter(|ts| *ts != 0.0),
        }
    }
}

/// Structured contact fields recovered from a signature block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureMetadata {
    pub name: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub url: Option<String>,
    pub address: Option<String>,
}

impl SignatureMetadata {
    /// Copy every field that is unset here but set in `other`. Set fields are never overwritten.
    pub fn fill_missing_from(&mut self, other: &SignatureMetadata) {
        let pairs = [
            (&mut self.name, &other.name),
            (&mut self.title, &other.title),
            (&mut self.company, &other.company),
            (&mut self.phone, &other.phone),
            (&mut self.email, &other.email),
            (&mut self.url, &other.url),
            (&mut self.address, &other.address),
        ];

        for (mine, theirs) in pairs {
            if mine.is_none() {
                if let Some(value) = theirs {
                    *mine = Some(value.clone());
                }
            }
        }
    }

    /// True when the strongest identity evidence (email, phone or name) is present.
    pub fn has_contact_evidence(&self) -> bool {
        self.email.is_some() || self.phone.is_some() || self.name.is_some()
    }
}

/// An extracted signature block.
///
/// `text` is only settable at construction so the comparison form returned by
/// [`Signature::normalized_text`] always follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    text: String,
    pub source_msg_id: String,
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub metadata: SignatureMetadata,
    pub confidence: f64,
}

impl Signature {
    pub fn new(text: impl Into<String>, source_msg_id: impl Into<String>, timestamp: Option<f64>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            source_msg_id: source_msg_id.into(),
            timestamp,
            metadata: SignatureMetadata::default(),
            confidence: 0.0,
        }
    }

    pub fn with_metadata(mut self, metadata: SignatureMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Comparison-only canonical form of the text. Never used for storage or display.
    pub fn normalized_text(&self) -> String {
        comparison_form(&self.text)
    }
}

/// Lower-case, drop punctuation and collapse whitespace.
pub fn comparison_form(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_form() {
        assert_eq!(
            comparison_form("  John  Doe,\n\tjohn@acme.com "),
            "john doe johnacmecom"
        );
        assert_eq!(comparison_form("--"), "");
    }

    #[test]
    fn test_normalized_text_follows_text() {
        let sig = Signature::new("\nJohn Doe\nACME Inc.\n", "1", None);
        assert_eq!(sig.text(), "John Doe\nACME Inc.");
        assert_eq!(sig.normalized_text(), "john doe acme inc");
    }

    #[test]
    fn test_fill_missing_never_overwrites() {
        let mut rep = SignatureMetadata {
            company: Some("Acme".to_string()),
            ..Default::default()
        };
        let dup = SignatureMetadata {
            company: None,
            email: Some("john@acme.com".to_string()),
            ..Default::default()
        };
        rep.fill_missing_from(&dup);
        assert_eq!(rep.company.as_deref(), Some("Acme"));
        assert_eq!(rep.email.as_deref(), Some("john@acme.com"));

        let other = SignatureMetadata {
            company: Some("Other Corp".to_string()),
            ..Default::default()
        };
        rep.fill_missing_from(&other);
        assert_eq!(rep.company.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_zero_timestamp_is_absent() {
        assert_eq!(Message::new("body", "1", Some(0.0)).timestamp, None);
        assert_eq!(Message::new("body", "1", Some(42.0)).timestamp, Some(42.0));
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Fully resolved configuration consumed by the extraction core.
///
/// Every section is `#[serde(default)]`, so a partial YAML file only overrides
/// the keys it names.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionConfig,
    pub parser: ParserConfig,
    pub dedup: DedupConfig,
    pub pipeline: PipelineConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_fallback_lines: usize,
    /// Matched case-insensitively from the start of each stripped line. The defaults
    /// end in `$` so only a line that is nothing but the sign-off counts.
    pub signoff_patterns: Vec<String>,
    pub max_signature_lines: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_fallback_lines: 5,
            signoff_patterns: [
                r"--\s*$",
                r"(?:many )?thanks[,!.\s]*$",
                r"thank you[,!.\s]*$",
                r"(?:best |kind |warm )?regards[,!.\s]*$",
                r"best(?: wishes)?[,!.\s]*$",
                r"cheers[,!.\s]*$",
                r"sincerely(?: yours)?[,!.\s]*$",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            max_signature_lines: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ParserConfig {
    /// Tried in order; the first pattern that matches a part wins.
    pub phone_patterns: Vec<String>,
    pub email_pattern: String,
    pub url_pattern: String,
    pub name_pattern: String,
    pub company_pattern: String,
    pub address_pattern: String,
    pub street_pattern: String,
    pub title_keywords: Vec<String>,
    /// Words that never occur in a personal name (compared case-insensitively).
    pub name_stopwords: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            phone_patterns: vec![
                r"\(\d{3}\)\s*\d{3}-\d{4}".to_string(),
                r"\+\d{1,2}\s\d{3}\s\d{3}\s\d{4}".to_string(),
                r"\d{3}-\d{3}-\d{4}".to_string(),
                r"\d{3}\.\d{3}\.\d{4}".to_string(),
                r"\+?\d[\d\s-]{7,}\d".to_string(),
            ],
            email_pattern: r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}".to_string(),
            url_pattern: r"https?://\S+|www\.\S+".to_string(),
            name_pattern: r"^[A-Z][a-z]+(?: [A-Z][a-z]+)*$".to_string(),
            company_pattern: r"(?i:consulting)|(?:^|\s)(?:Inc\.?|LLC|Ltd\.?|Corp\.?|Co\.?|Company)$"
                .to_string(),
            address_pattern: r"\d+\s+\w+".to_string(),
            street_pattern: r"\b(?:St|Ave|Rd|Road|Blvd)\b".to_string(),
            title_keywords: ["Manager", "Engineer", "Director", "Officer", "Consultant"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            name_stopwords: [
                "a", "all", "an", "and", "any", "at", "best", "by", "cheers", "for", "from",
                "her", "his", "in", "kind", "my", "of", "on", "or", "our", "regards", "sent",
                "sincerely", "some", "team", "thanks", "that", "the", "their", "this", "to",
                "via", "warm", "with", "your",
            ]
            .iter()
            .map(|w| w.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DedupConfig {
    pub threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { threshold: 0.85 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub batch_size: usize,
    pub min_confidence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 1000,
            min_confidence: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration")
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config: {}", path.as_ref().display()))?;

    Ok(config)
}

pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Config {
    match load_config(&path) {
        Ok(config) => {
            log::info!("Loaded configuration from: {}", path.as_ref().display());
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({e:#}), using defaults");
            Config::default()
        }
    }
}

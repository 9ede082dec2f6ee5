use crate::config::ParserConfig;
use crate::models::SignatureMetadata;
use anyhow::{Context, Result};
use regex::Regex;

/// Substring that marks a part as a business rather than a person.
const CONSULT_HINT: &str = "consult";

/// Pulls contact fields out of a signature block.
///
/// The text is split into parts (one per line, lines further split on `|`), and each
/// field takes the first part that qualifies for it.
pub struct SignatureParser {
    email_regex: Regex,
    phone_regexes: Vec<Regex>,
    url_regex: Regex,
    name_regex: Regex,
    company_regex: Regex,
    address_regex: Regex,
    street_regex: Regex,
    title_keywords: Vec<String>,
    name_stopwords: Vec<String>,
}

fn compile(pattern: &str, field: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Invalid {field} pattern: {pattern}"))
}

impl SignatureParser {
    pub fn new(config: &ParserConfig) -> Result<Self> {
        let phone_regexes = config
            .phone_patterns
            .iter()
            .map(|pattern| compile(pattern, "phone"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            email_regex: compile(&config.email_pattern, "email")?,
            phone_regexes,
            url_regex: compile(&config.url_pattern, "url")?,
            name_regex: compile(&config.name_pattern, "name")?,
            company_regex: compile(&config.company_pattern, "company")?,
            address_regex: compile(&config.address_pattern, "address")?,
            street_regex: compile(&config.street_pattern, "street")?,
            title_keywords: config.title_keywords.iter().map(|k| k.to_lowercase()).collect(),
            name_stopwords: config.name_stopwords.iter().map(|w| w.to_lowercase()).collect(),
        })
    }

    pub fn parse(&self, text: &str) -> SignatureMetadata {
        let parts = split_parts(text);

        SignatureMetadata {
            email: parts
                .iter()
                .find_map(|part| self.email_regex.find(part).map(|m| m.as_str().to_string())),
            phone: parts.iter().find_map(|part| self.find_phone(part)),
            url: parts
                .iter()
                .find_map(|part| self.url_regex.find(part).map(|m| m.as_str().to_string())),
            name: parts
                .iter()
                .find(|part| self.is_name(part))
                .map(|part| part.to_string()),
            title: parts
                .iter()
                .find(|part| self.has_title_keyword(part))
                .map(|part| part.to_string()),
            company: parts
                .iter()
                .find(|part| self.is_company(part))
                .map(|part| part.trim_matches(',').trim().to_string()),
            address: parts
                .iter()
                .find(|part| self.is_address(part))
                .map(|part| part.to_string()),
        }
    }

    fn find_phone(&self, part: &str) -> Option<String> {
        self.phone_regexes
            .iter()
            .find_map(|regex| regex.find(part).map(|m| m.as_str().to_string()))
    }

    fn is_contact(&self, part: &str) -> bool {
        self.email_regex.is_match(part)
            || self.url_regex.is_match(part)
            || self.phone_regexes.iter().any(|regex| regex.is_match(part))
    }

    fn has_title_keyword(&self, part: &str) -> bool {
        let lower = part.to_lowercase();
        self.title_keywords.iter().any(|keyword| lower.contains(keyword.as_str()))
    }

    fn is_company(&self, part: &str) -> bool {
        self.company_regex.is_match(part) || is_all_uppercase(part)
    }

    fn is_name(&self, part: &str) -> bool {
        if self.is_contact(part) || self.has_title_keyword(part) {
            return false;
        }
        if self.is_company(part) || part.to_lowercase().contains(CONSULT_HINT) {
            return false;
        }
        if !self.name_regex.is_match(part) {
            return false;
        }
        !part
            .split_whitespace()
            .any(|word| self.name_stopwords.iter().any(|stop| stop.eq_ignore_ascii_case(word)))
    }

    fn is_address(&self, part: &str) -> bool {
        self.address_regex.is_match(part) && (part.contains(',') || self.street_regex.is_match(part))
    }
}

fn split_parts(text: &str) -> Vec<&str> {
    text.lines()
        .flat_map(|line| line.split('|'))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// At least one cased letter and no lower-case ones.
fn is_all_uppercase(part: &str) -> bool {
    part.chars().any(char::is_uppercase) && !part.chars().any(char::is_lowercase)
}

use regex::Regex;

/// Passes over nested markup (e.g. entity-escaped HTML inside HTML) before giving up.
const MAX_HTML_PASSES: usize = 5;

/// Turns a raw message body, plain text or HTML, into clean non-empty lines.
pub struct BodyNormalizer {
    html_marker_regex: Regex,
    unterminated_tag_regex: Regex,
    hidden_block_regex: Regex,
    block_tag_regex: Regex,
    cell_tag_regex: Regex,
    any_tag_regex: Regex,
    html_entity_regex: Regex,
    horizontal_ws_regex: Regex,
}

impl BodyNormalizer {
    pub fn new() -> Self {
        Self {
            html_marker_regex: Regex::new(
                r"(?i)</?(?:html|head|body|div|p|br|hr|span|table|tr|td|th|li|ul|ol|font|a|b|i|strong|em|style|script|blockquote|h[1-6])(?:[\s/][^>]*)?>",
            )
            .unwrap(),
            unterminated_tag_regex: Regex::new(r"<[A-Za-z/!][^<>]*$").unwrap(),
            hidden_block_regex: Regex::new(
                r"(?is)<style(?:\s[^>]*)?>.*?</style\s*>|<script(?:\s[^>]*)?>.*?</script\s*>|<!--.*?-->",
            )
            .unwrap(),
            block_tag_regex: Regex::new(
                r"(?i)</?(?:br|p|div|li|tr|hr|table|ul|ol|blockquote|h[1-6])(?:[\s/][^>]*)?>",
            )
            .unwrap(),
            cell_tag_regex: Regex::new(r"(?i)</?(?:td|th)(?:[\s/][^>]*)?>").unwrap(),
            any_tag_regex: Regex::new(r"<[^<>]*>").unwrap(),
            html_entity_regex: Regex::new(r"&(?:#(\d+)|#[xX]([0-9A-Fa-f]+)|([a-zA-Z][a-zA-Z0-9]*));")
                .unwrap(),
            horizontal_ws_regex: Regex::new(r"[ \t\x0B\x0C\u{00A0}\u{200B}]+").unwrap(),
        }
    }

    /// Ordered, non-empty, trimmed lines of `raw_body`.
    pub fn normalize(&self, raw_body: &str) -> Vec<String> {
        self.normalize_lines(raw_body, false)
    }

    /// Like [`normalize`](Self::normalize) but always strips markup on the first pass.
    ///
    /// For fragments of a body already known to be HTML, where the fragment itself may
    /// carry no tag (plain text ahead of an `<hr>`) yet its newlines must still collapse.
    pub fn normalize_html(&self, raw_fragment: &str) -> Vec<String> {
        self.normalize_lines(raw_fragment, true)
    }

    /// True when [`normalize`](Self::normalize) will strip `raw_body` as HTML.
    pub fn is_html(&self, raw_body: &str) -> bool {
        self.looks_like_html(raw_body) && !self.unterminated_tag_regex.is_match(raw_body)
    }

    fn normalize_lines(&self, raw_body: &str, force_html: bool) -> Vec<String> {
        let mut text = raw_body.replace("\r\n", "\n").replace('\r', "\n");

        for pass in 0..MAX_HTML_PASSES {
            let forced = force_html && pass == 0;
            if !forced && !self.looks_like_html(&text) {
                break;
            }
            match self.strip_html(&text) {
                Some(stripped) => text = stripped,
                None => {
                    log::debug!("Malformed markup, treating body as plain text");
                    break;
                }
            }
        }

        text.split('\n')
            .map(|line| self.horizontal_ws_regex.replace_all(line, " ").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Same as [`normalize`](Self::normalize), joined back with newlines.
    pub fn normalize_to_text(&self, raw_body: &str) -> String {
        self.normalize(raw_body).join("\n")
    }

    pub fn looks_like_html(&self, text: &str) -> bool {
        self.html_marker_regex.is_match(text)
    }

    /// Returns `None` when the markup cannot be tokenized (an opening `<` that never closes).
    fn strip_html(&self, html: &str) -> Option<String> {
        if self.unterminated_tag_regex.is_match(html) {
            return None;
        }

        // Source newlines are insignificant in HTML
        let flattened = html.replace('\n', " ");
        let visible = self.hidden_block_regex.replace_all(&flattened, " ");
        let with_breaks = self.block_tag_regex.replace_all(&visible, "\n");
        let with_cells = self.cell_tag_regex.replace_all(&with_breaks, " ");
        let untagged = self.any_tag_regex.replace_all(&with_cells, "");

        Some(self.decode_html_entities(&untagged))
    }

    fn decode_html_entities(&self, text: &str) -> String {
        self.html_entity_regex
            .replace_all(text, |caps: &regex::Captures| {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                if let Some(decimal) = caps.get(1) {
                    // Decimal entity &#65;
                    return decimal
                        .as_str()
                        .parse::<u32>()
                        .ok()
                        .and_then(char::from_u32)
                        .map(|ch| ch.to_string())
                        .unwrap_or_else(|| whole.to_string());
                }
                if let Some(hex) = caps.get(2) {
                    // Hex entity &#x41;
                    return u32::from_str_radix(hex.as_str(), 16)
                        .ok()
                        .and_then(char::from_u32)
                        .map(|ch| ch.to_string())
                        .unwrap_or_else(|| whole.to_string());
                }
                let named = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                match named {
                    "amp" => "&",
                    "lt" => "<",
                    "gt" => ">",
                    "quot" => "\"",
                    "apos" => "'",
                    "nbsp" => " ",
                    "ndash" => "\u{2013}",
                    "mdash" => "\u{2014}",
                    "copy" => "\u{00A9}",
                    "reg" => "\u{00AE}",
                    _ => whole,
                }
                .to_string()
            })
            .to_string()
    }
}

impl Default for BodyNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::OnceLock;

use regex::Regex;

/// Text processing utilities
pub mod text {
    use super::*;

    fn block_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"(?is)<(script|style|noscript|head|nav|footer)[^>]*>.*?</(script|style|noscript|head|nav|footer)>")
                .expect("valid regex")
        })
    }

    fn tag_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
    }

    fn space_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"[ \t\r\f\v]+").expect("valid regex"))
    }

    fn blank_lines_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"\n\s*\n+").expect("valid regex"))
    }

    /// Reduce an HTML page or fragment to readable text.
    pub fn html_to_text(html: &str) -> String {
        let text = block_re().replace_all(html, " ");
        let text = text
            .replace("<br>", "\n")
            .replace("<br/>", "\n")
            .replace("<br />", "\n")
            .replace("</p>", "\n\n");
        let text = tag_re().replace_all(&text, " ");
        let text = decode_entities(&text);
        let text = space_re().replace_all(&text, " ");
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        blank_lines_re().replace_all(&lines.join("\n"), "\n\n").trim().to_string()
    }

    fn decode_entities(text: &str) -> String {
        text.replace("&nbsp;", " ")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&")
    }

    /// First line of a text, shortened for log output.
    pub fn preview(text: &str, max_chars: usize) -> String {
        let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
        if first.chars().count() <= max_chars {
            first.to_string()
        } else {
            format!("{}...", first.chars().take(max_chars).collect::<String>())
        }
    }

    /// Text a news page yields when the real article could not be extracted.
    pub fn is_placeholder(text: &str) -> bool {
        let lower = text.trim().to_lowercase();
        lower.is_empty()
            || lower == "#"
            || lower.starts_with("please enable javascript")
            || lower.starts_with("enable javascript")
            || lower.contains("access denied")
    }
}

/// File name utilities
pub mod files {
    /// Lowercase a label and keep only characters safe in file names.
    pub fn slug(label: &str) -> String {
        let slug: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let slug = slug.trim_matches('_').to_string();
        if slug.is_empty() {
            "unnamed".to_string()
        } else {
            slug
        }
    }
}

use std::collections::HashSet;

use feed_rs::parser;
use tracing::{debug, info};

use crate::types::{Result, WorkflowError};

/// One usable entry of a news feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
}

/// Parses feeds and drops entries already seen by GUID or link.
pub struct FeedParser {
    seen_guids: HashSet<String>,
    seen_urls: HashSet<String>,
}

impl FeedParser {
    pub fn new() -> Self {
        Self {
            seen_guids: HashSet::new(),
            seen_urls: HashSet::new(),
        }
    }

    pub fn parse_feed(&mut self, content: &str) -> Result<Vec<FeedEntry>> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| WorkflowError::Service(format!("Failed to parse feed: {}", e)))?;

        let total = feed.entries.len();
        let entries: Vec<FeedEntry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();

        info!("Parsed feed with {} entries ({} duplicates dropped)", entries.len(), total - entries.len());
        Ok(entries)
    }

    fn parse_entry(&mut self, entry: feed_rs::model::Entry) -> Option<FeedEntry> {
        let link = entry.links.first()?.href.trim().to_string();
        if link.is_empty() {
            return None;
        }

        if !entry.id.is_empty() && !self.seen_guids.insert(entry.id.clone()) {
            debug!("Skipping duplicate entry with GUID: {}", entry.id);
            return None;
        }
        if !self.seen_urls.insert(link.clone()) {
            debug!("Skipping duplicate entry with URL: {}", link);
            return None;
        }

        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        // Prefer full content over the summary.
        let summary = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content));

        Some(FeedEntry {
            title,
            link,
            summary,
        })
    }
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

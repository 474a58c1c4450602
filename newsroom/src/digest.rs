use tracing::{debug, info, warn};

use crate::types::{NewsDigest, SourceItem, Summarizer};

const ARTICLE_SEPARATOR: &str = "\n\n---\n\n";

/// Builds the digest candidate from freshly fetched news items.
pub struct DigestComposer<'a> {
    summarizer: &'a dyn Summarizer,
    summarization_threshold: usize,
}

impl<'a> DigestComposer<'a> {
    pub fn new(summarizer: &'a dyn Summarizer, summarization_threshold: usize) -> Self {
        Self {
            summarizer,
            summarization_threshold,
        }
    }

    /// Long items are summarized first; a failed summary falls back to the
    /// original text. Items left without text are dropped, and only the
    /// links of included items become source ids. `None` if nothing is left.
    pub async fn compose(&self, items: &[SourceItem]) -> Option<NewsDigest> {
        let mut blocks = Vec::new();
        let mut source_ids = Vec::new();

        for item in items {
            let text = item.text.trim();
            if text.is_empty() {
                warn!("Skipping news item without text: {}", item.id);
                continue;
            }

            let text = if text.chars().count() > self.summarization_threshold {
                info!(
                    "Summarizing long article ({} chars): {}",
                    text.chars().count(),
                    item.id
                );
                match self.summarizer.summarize(text).await {
                    Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
                    Ok(_) => {
                        warn!("Summarizer returned nothing for {}, using original text", item.id);
                        text.to_string()
                    }
                    Err(e) => {
                        warn!("Summarization failed for {}, using original text: {:#}", item.id, e);
                        text.to_string()
                    }
                }
            } else {
                text.to_string()
            };

            let number = blocks.len() + 1;
            let title = if item.title.trim().is_empty() { "Untitled" } else { item.title.trim() };
            blocks.push(format!("ARTICLE {}: {}\nSOURCE: {}\n\n{}", number, title, item.id, text));
            source_ids.push(item.id.clone());
        }

        if blocks.is_empty() {
            return None;
        }

        debug!("Composed digest from {} of {} items", blocks.len(), items.len());
        Some(NewsDigest {
            summary: blocks.join(ARTICLE_SEPARATOR),
            source_ids,
        })
    }
}

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetcher::{FetchConfig, Fetcher};
use crate::parser::{FeedEntry, FeedParser};
use crate::sources::google_links::{
    article_id, batch_execute_request, decode_embedded, parse_batch_execute, signing_params,
    BATCH_EXECUTE_URL,
};
use crate::types::{NewsQuery, NewsSource, Result, SourceItem, WorkflowError};
use crate::utils::text::{html_to_text, is_placeholder};

const GOOGLE_NEWS_RSS: &str = "https://news.google.com/rss/search";

/// Article pages shorter than this are considered failed extractions.
const MIN_ARTICLE_CHARS: usize = 200;

/// News source backed by the Google News RSS search feed.
pub struct GoogleNewsSource {
    fetcher: Fetcher,
}

impl GoogleNewsSource {
    pub fn new(fetch_config: FetchConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(fetch_config)?,
        })
    }

    /// Search feed URL; multi-word keywords are quoted as phrases.
    pub fn search_url(&self, keywords: &[String], language: &str, country: &str) -> Result<Url> {
        let query = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| if k.contains(' ') { format!("\"{}\"", k) } else { k.to_string() })
            .collect::<Vec<_>>()
            .join(" ");
        if query.is_empty() {
            return Err(WorkflowError::Configuration("No news keywords given".to_string()));
        }

        let mut url = Url::parse(GOOGLE_NEWS_RSS)?;
        url.query_pairs_mut()
            .append_pair("pz", "1")
            .append_pair("cf", "all")
            .append_pair("q", &query)
            .append_pair("hl", language)
            .append_pair("gl", country)
            .append_pair("ceid", &format!("{}:{}", country, language));
        Ok(url)
    }

    /// Publisher URL behind a feed link. Links that are not Google News
    /// redirects are returned as they are.
    async fn publisher_url(&self, link: &str) -> Option<String> {
        let id = match article_id(link) {
            Some(id) => id,
            None => return Some(link.to_string()),
        };
        if let Some(url) = decode_embedded(&id) {
            return Some(url);
        }

        match self.resolve_signed_id(&id).await {
            Ok(Some(url)) => Some(url),
            Ok(None) => {
                warn!("Could not decode Google News link {}", link);
                None
            }
            Err(e) => {
                warn!("Decoding Google News link {} failed: {}", link, e);
                None
            }
        }
    }

    async fn resolve_signed_id(&self, id: &str) -> Result<Option<String>> {
        let page = self
            .fetcher
            .fetch_text(&format!("https://news.google.com/rss/articles/{}", id))
            .await?;
        let params = match signing_params(&page) {
            Some(params) => params,
            None => return Ok(None),
        };
        let payload = batch_execute_request(id, &params);
        let body = self.fetcher.post_form(BATCH_EXECUTE_URL, &[("f.req", payload.as_str())]).await?;
        Ok(parse_batch_execute(&body))
    }

    /// Article text for an entry: the publisher page if it yields real text,
    /// otherwise the feed's own summary.
    async fn article_text(&self, entry: &FeedEntry, publisher_url: Option<&str>) -> Option<String> {
        if let Some(url) = publisher_url {
            match self.fetcher.fetch_text(url).await {
                Ok(html) => {
                    let text = html_to_text(&html);
                    if text.chars().count() >= MIN_ARTICLE_CHARS && !is_placeholder(&text) {
                        return Some(text);
                    }
                    debug!("Article page for {} yielded no usable text", url);
                }
                Err(e) => warn!("Could not fetch article {}: {}", url, e),
            }
        }

        let summary = entry.summary.as_deref().map(html_to_text).unwrap_or_default();
        if is_placeholder(&summary) {
            None
        } else {
            Some(summary)
        }
    }
}

#[async_trait]
impl NewsSource for GoogleNewsSource {
    async fn fetch(&self, query: &NewsQuery) -> anyhow::Result<Vec<SourceItem>> {
        let url = self.search_url(&query.keywords, &query.language, &query.country)?;
        info!("Searching news: {}", url);

        let feed = self.fetcher.fetch_text(url.as_str()).await?;
        let entries = FeedParser::new().parse_feed(&feed)?;
        let locale = format!("{}-{}", query.language, query.country);

        let mut items = Vec::new();
        for entry in entries.iter().take(query.scan_limit) {
            if items.len() >= query.wanted_count {
                break;
            }
            let publisher_url = self.publisher_url(&entry.link).await;
            if already_used(&query.excluded_ids, &entry.link, publisher_url.as_deref()) {
                debug!("Skipping already used article: {}", entry.link);
                continue;
            }
            match self.article_text(entry, publisher_url.as_deref()).await {
                Some(text) => items.push(SourceItem {
                    id: publisher_url.unwrap_or_else(|| entry.link.clone()),
                    title: entry.title.clone(),
                    text,
                    locale: locale.clone(),
                }),
                None => warn!("Skipping article without usable text: {}", entry.title),
            }
        }

        info!(
            "Found {} new articles (wanted {}, scanned up to {})",
            items.len(),
            query.wanted_count,
            query.scan_limit
        );
        Ok(items)
    }
}

/// An entry is used if either its feed link or its publisher URL is.
fn already_used(excluded: &BTreeSet<String>, feed_link: &str, publisher_url: Option<&str>) -> bool {
    excluded.contains(feed_link) || publisher_url.map_or(false, |url| excluded.contains(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_search_url() {
        let source = GoogleNewsSource::new(FetchConfig::default()).unwrap();
        let url = source
            .search_url(&["ecommerce".to_string(), "small business".to_string()], "en", "US")
            .unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("q".to_string(), "ecommerce \"small business\"".to_string())));
        assert!(pairs.contains(&("hl".to_string(), "en".to_string())));
        assert!(pairs.contains(&("gl".to_string(), "US".to_string())));
        assert!(pairs.contains(&("ceid".to_string(), "US:en".to_string())));
        assert!(url.as_str().starts_with("https://news.google.com/rss/search?"));
    }

    #[test]
    fn empty_keywords_are_a_configuration_error() {
        let source = GoogleNewsSource::new(FetchConfig::default()).unwrap();
        let err = source.search_url(&[" ".to_string()], "en", "US").unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[test]
    fn used_check_covers_both_link_forms() {
        let google = "https://news.google.com/rss/articles/CBMiK2h0";
        let publisher = "https://shop.example/story";
        let by_publisher = BTreeSet::from([publisher.to_string()]);
        let by_google = BTreeSet::from([google.to_string()]);

        assert!(already_used(&by_publisher, google, Some(publisher)));
        assert!(already_used(&by_google, google, Some(publisher)));
        assert!(already_used(&by_google, google, None));
        assert!(!already_used(&by_publisher, google, None));
        assert!(!already_used(&BTreeSet::new(), google, Some(publisher)));
    }

    #[tokio::test]
    async fn plain_links_are_their_own_publisher_url() {
        let source = GoogleNewsSource::new(FetchConfig::default()).unwrap();
        assert_eq!(
            source.publisher_url("https://shop.example/story").await.as_deref(),
            Some("https://shop.example/story")
        );
    }

    #[tokio::test]
    async fn embedded_google_links_decode_without_network() {
        let source = GoogleNewsSource::new(FetchConfig::default()).unwrap();
        let link = "https://news.google.com/rss/articles/CBMiLmh0dHBzOi8vc2hvcC5leGFtcGxlLzIwMjQvMDUvb25saW5lLXNhbGVzLWp1bXDSAQA?oc=5";
        assert_eq!(
            source.publisher_url(link).await.as_deref(),
            Some("https://shop.example/2024/05/online-sales-jump")
        );
    }
}

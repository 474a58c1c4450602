use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The two kinds of content unit that go through a generate/review cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    NewsDigest,
    PlatformPost,
}

impl ContentKind {
    /// Reviewable aspects of this kind, in review order.
    pub fn aspects(&self) -> &'static [Aspect] {
        match self {
            ContentKind::NewsDigest => &[Aspect::Summary],
            ContentKind::PlatformPost => &[Aspect::Text, Aspect::ImagePrompt],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::NewsDigest => "news_digest",
            ContentKind::PlatformPost => "platform_post",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An independently reviewable part of a content unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    Summary,
    Text,
    ImagePrompt,
}

impl Aspect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aspect::Summary => "summary",
            Aspect::Text => "text",
            Aspect::ImagePrompt => "image_prompt",
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate news article handed out by a news source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Canonical link; doubles as the ledger identifier.
    pub id: String,
    pub title: String,
    pub text: String,
    pub locale: String,
}

#[derive(Debug, Clone)]
pub struct NewsQuery {
    pub keywords: Vec<String>,
    pub language: String,
    pub country: String,
    pub wanted_count: usize,
    pub scan_limit: usize,
    pub excluded_ids: BTreeSet<String>,
}

/// One chat-style instruction message of a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

/// Structured input for one generation call.
///
/// `preserve` holds previously approved aspect values that must be kept,
/// `revise` holds the rejection feedback for every aspect that must change.
/// Both empty means a fresh generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub kind: ContentKind,
    pub platform: Option<String>,
    pub language: String,
    pub source_text: String,
    pub instructions: Vec<PromptMessage>,
    pub preserve: BTreeMap<Aspect, String>,
    pub revise: BTreeMap<Aspect, String>,
}

/// Raw generation output: one value per aspect, plus hashtags for posts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedContent {
    pub values: BTreeMap<Aspect, String>,
    pub hashtags: Vec<String>,
}

/// Context handed to a reviewer alongside the value under review.
#[derive(Debug, Clone, Default)]
pub struct ReviewCriteria {
    pub platform: Option<String>,
    pub language: String,
    /// Feedback of an earlier reviewer for the same aspect, if any.
    pub prior_feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub accepted: bool,
    #[serde(default)]
    pub feedback: String,
}

impl ReviewOutcome {
    pub fn accept() -> Self {
        Self { accepted: true, feedback: String::new() }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self { accepted: false, feedback: feedback.into() }
    }
}

/// Approved post fields as handed to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub run_id: String,
    pub platform: String,
    pub language: String,
    pub post_text: String,
    pub image_prompt: String,
    pub hashtags: Vec<String>,
    pub source_ids: Vec<String>,
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Fetch up to `query.wanted_count` items not in `query.excluded_ids`,
    /// scanning at most `query.scan_limit` entries. May return fewer.
    async fn fetch(&self, query: &NewsQuery) -> Result<Vec<SourceItem>>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Must return a value for every aspect of `request.kind`, or fail.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent>;
}

#[async_trait]
pub trait ReviewService: Send + Sync {
    fn reviewer_name(&self) -> String;

    async fn review(
        &self,
        kind: ContentKind,
        aspect: Aspect,
        value: &str,
        criteria: &ReviewCriteria,
    ) -> Result<ReviewOutcome>;
}

#[async_trait]
pub trait ImageService: Send + Sync {
    async fn synthesize(&self, prompt: &str, size: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(&self, post: &PostRecord, image: Option<&[u8]>) -> Result<()>;

    async fn load_ledger(&self) -> Result<BTreeSet<String>>;

    async fn append_ledger(&self, ids: &[String]) -> Result<()>;
}

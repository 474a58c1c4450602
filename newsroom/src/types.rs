use serde::{Deserialize, Serialize};

pub use interfaces::defs::{
    Aspect, ContentKind, GeneratedContent, GenerationRequest, GenerationService, ImageService,
    NewsQuery, NewsSource, PostRecord, PromptMessage, ReviewCriteria, ReviewOutcome,
    ReviewService, SourceItem, Storage, Summarizer,
};

/// A combined news summary plus the links of the articles it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsDigest {
    pub summary: String,
    pub source_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformPost {
    pub body: String,
    pub image_prompt: String,
    pub hashtags: Vec<String>,
}

/// The artifact that goes through one generate/review/regenerate cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentUnit {
    NewsDigest(NewsDigest),
    PlatformPost(PlatformPost),
}

impl ContentUnit {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentUnit::NewsDigest(_) => ContentKind::NewsDigest,
            ContentUnit::PlatformPost(_) => ContentKind::PlatformPost,
        }
    }

    /// Current value of a reviewable aspect, `None` if the aspect does not
    /// belong to this unit's kind.
    pub fn aspect_value(&self, aspect: Aspect) -> Option<&str> {
        match (self, aspect) {
            (ContentUnit::NewsDigest(digest), Aspect::Summary) => Some(&digest.summary),
            (ContentUnit::PlatformPost(post), Aspect::Text) => Some(&post.body),
            (ContentUnit::PlatformPost(post), Aspect::ImagePrompt) => Some(&post.image_prompt),
            _ => None,
        }
    }

    /// Build a unit from raw generation output, enforcing that every aspect
    /// of `kind` is present and non-empty.
    pub fn from_generated(
        kind: ContentKind,
        generated: GeneratedContent,
        source_ids: &[String],
        allow_empty_hashtags: bool,
    ) -> Result<Self> {
        let mut values = generated.values;
        for aspect in kind.aspects() {
            let present = values
                .get(aspect)
                .map(|value| !value.trim().is_empty())
                .unwrap_or(false);
            if !present {
                return Err(WorkflowError::Validation(format!(
                    "generated {} is missing aspect '{}'",
                    kind, aspect
                )));
            }
        }

        let mut take = |aspect: Aspect| values.remove(&aspect).unwrap_or_default();

        match kind {
            ContentKind::NewsDigest => Ok(ContentUnit::NewsDigest(NewsDigest {
                summary: take(Aspect::Summary),
                source_ids: source_ids.to_vec(),
            })),
            ContentKind::PlatformPost => {
                let hashtags: Vec<String> = generated
                    .hashtags
                    .into_iter()
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty())
                    .collect();
                if hashtags.is_empty() && !allow_empty_hashtags {
                    return Err(WorkflowError::Validation(
                        "generated post has no hashtags".to_string(),
                    ));
                }
                Ok(ContentUnit::PlatformPost(PlatformPost {
                    body: take(Aspect::Text),
                    image_prompt: take(Aspect::ImagePrompt),
                    hashtags,
                }))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Service failure: {0}")]
    Service(String),

    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

impl WorkflowError {
    /// Service and validation failures are absorbed by the attempt budget.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WorkflowError::Service(_) | WorkflowError::Validation(_))
    }

    /// Wrap a collaborator failure.
    pub fn service(err: anyhow::Error) -> Self {
        WorkflowError::Service(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

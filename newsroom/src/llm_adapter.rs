use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::OpenAiConfig;
use crate::template::{generation_brief, output_field};
use crate::types::{
    Aspect, ContentKind, GeneratedContent, GenerationRequest, GenerationService, ImageService,
    PromptMessage, Result, ReviewCriteria, ReviewOutcome, ReviewService, Summarizer, WorkflowError,
};
use crate::utils::text::preview;

const SUMMARIZE_INSTRUCTION: &str = "You summarize news articles. Keep the key facts, names and numbers. \
Answer with a concise summary of at most 250 words and nothing else.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Thin client for an OpenAI-compatible chat and image API.
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| WorkflowError::Configuration("OPENAI_API_KEY is not set".to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        info!("OpenAI client ready ({})", config.base_url);
        Ok(Self { client, config, api_key })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Send a request, retrying transport errors, 429 and 5xx with backoff.
    async fn send_with_retry<F>(&self, what: &str, build: F) -> anyhow::Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(2),
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(180)),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            let error = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let error = anyhow!("{} failed with HTTP {}: {}", what, status, preview(&body, 300));
                    if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => anyhow::Error::new(e).context(format!("{} request failed", what)),
            };

            if attempt >= self.config.max_retries {
                return Err(error);
            }
            match backoff.next_backoff() {
                Some(delay) => {
                    warn!("{} (attempt {}), retrying in {:?}", error, attempt + 1, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(error),
            }
        }
    }

    /// One chat completion; `json` asks for a JSON object response.
    pub async fn chat(&self, model: &str, messages: &[PromptMessage], json: bool) -> anyhow::Result<String> {
        let request = ChatRequest {
            model,
            messages,
            response_format: json.then_some(ResponseFormat { kind: "json_object" }),
        };
        let url = self.endpoint("chat/completions");
        debug!("Chat completion with {} ({} messages)", model, messages.len());

        let response = self
            .send_with_retry("chat completion", || {
                self.client.post(&url).bearer_auth(&self.api_key).json(&request)
            })
            .await?;
        let response: ChatResponse = response.json().await.context("Malformed chat completion")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("Chat completion returned no content"))
    }

    /// Generate one image and download it.
    pub async fn image(&self, prompt: &str, size: &str) -> anyhow::Result<Vec<u8>> {
        let request = ImageRequest {
            model: &self.config.image_model,
            prompt,
            n: 1,
            size,
        };
        let url = self.endpoint("images/generations");
        info!("Requesting {} image: {}", size, preview(prompt, 80));

        let response = self
            .send_with_retry("image generation", || {
                self.client.post(&url).bearer_auth(&self.api_key).json(&request)
            })
            .await?;
        let response: ImageResponse = response.json().await.context("Malformed image response")?;
        let image_url = response
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| anyhow!("Image response contained no URL"))?;

        let bytes = self
            .send_with_retry("image download", || self.client.get(&image_url))
            .await?
            .bytes()
            .await
            .context("Failed to read image bytes")?;
        Ok(bytes.to_vec())
    }
}

/// Generation, review, summarization and image synthesis over one client.
pub struct OpenAiAdapter {
    client: OpenAiClient,
}

impl OpenAiAdapter {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: OpenAiClient::new(config)?,
        })
    }

    fn config(&self) -> &OpenAiConfig {
        &self.client.config
    }
}

/// Parse a JSON generation response into aspect values.
pub fn parse_generation(kind: ContentKind, raw: &str) -> Result<GeneratedContent> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| WorkflowError::Validation(format!("Generation response is not JSON: {}", e)))?;

    let mut values = BTreeMap::new();
    for aspect in kind.aspects() {
        let field = output_field(*aspect);
        let text = value
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WorkflowError::Validation(format!("Generation response lacks '{}'", field)))?;
        values.insert(*aspect, text.to_string());
    }

    let hashtags = match value.get("hashtags") {
        Some(Value::Array(tags)) => tags
            .iter()
            .filter_map(Value::as_str)
            .map(normalize_hashtag)
            .filter(|t| t.len() > 1)
            .collect(),
        Some(Value::String(tags)) => tags
            .split_whitespace()
            .map(normalize_hashtag)
            .filter(|t| t.len() > 1)
            .collect(),
        _ => Vec::new(),
    };

    Ok(GeneratedContent { values, hashtags })
}

/// Parse a JSON review response.
pub fn parse_review(raw: &str) -> Result<ReviewOutcome> {
    #[derive(Deserialize)]
    struct RawReview {
        #[serde(alias = "approved")]
        accepted: bool,
        #[serde(default, alias = "reason")]
        feedback: Option<String>,
    }

    let review: RawReview = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| WorkflowError::Validation(format!("Review response is not valid: {}", e)))?;
    Ok(ReviewOutcome {
        accepted: review.accepted,
        feedback: review.feedback.unwrap_or_default().trim().to_string(),
    })
}

fn normalize_hashtag(tag: &str) -> String {
    let tag = tag.trim().trim_start_matches('#');
    format!("#{}", tag.split_whitespace().collect::<String>())
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Prompt asking the model to judge one aspect.
pub fn review_messages(kind: ContentKind, aspect: Aspect, value: &str, criteria: &ReviewCriteria) -> Vec<PromptMessage> {
    let target = match (kind, &criteria.platform) {
        (ContentKind::PlatformPost, Some(platform)) => format!("a {} post written in '{}'", platform, criteria.language),
        (ContentKind::PlatformPost, None) => format!("a social media post written in '{}'", criteria.language),
        (ContentKind::NewsDigest, _) => "a digest of recent news articles".to_string(),
    };
    let focus = match aspect {
        Aspect::Summary => "Is the news relevant, recent and substantial enough to post about?",
        Aspect::Text => "Is the text engaging, accurate to the news, fitting for the platform and language, and free of errors?",
        Aspect::ImagePrompt => "Would the image prompt produce a safe, relevant and eye-catching illustration for the post?",
    };

    vec![
        PromptMessage {
            role: "system".to_string(),
            content: format!(
                "You are a strict editor reviewing the {} of {}. {} \
Respond with a JSON object {{\"accepted\": true|false, \"feedback\": \"...\"}}. \
When rejecting, the feedback must say concretely what to change.",
                aspect.as_str().replace('_', " "),
                target,
                focus
            ),
        },
        PromptMessage {
            role: "user".to_string(),
            content: value.to_string(),
        },
    ]
}

#[async_trait]
impl GenerationService for OpenAiAdapter {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GeneratedContent> {
        let mut messages = request.instructions.clone();
        if messages.is_empty() {
            messages.push(PromptMessage {
                role: "system".to_string(),
                content: "You write concise, engaging content grounded in the news you are given.".to_string(),
            });
        }
        messages.push(PromptMessage {
            role: "user".to_string(),
            content: generation_brief(request),
        });

        let raw = self
            .client
            .chat(&self.config().generation_model, &messages, true)
            .await?;
        Ok(parse_generation(request.kind, &raw)?)
    }
}

#[async_trait]
impl ReviewService for OpenAiAdapter {
    fn reviewer_name(&self) -> String {
        format!("openai ({})", self.config().review_model)
    }

    async fn review(
        &self,
        kind: ContentKind,
        aspect: Aspect,
        value: &str,
        criteria: &ReviewCriteria,
    ) -> anyhow::Result<ReviewOutcome> {
        let messages = review_messages(kind, aspect, value, criteria);
        let raw = self.client.chat(&self.config().review_model, &messages, true).await?;
        Ok(parse_review(&raw)?)
    }
}

#[async_trait]
impl Summarizer for OpenAiAdapter {
    async fn summarize(&self, text: &str) -> anyhow::Result<String> {
        let messages = vec![
            PromptMessage {
                role: "system".to_string(),
                content: SUMMARIZE_INSTRUCTION.to_string(),
            },
            PromptMessage {
                role: "user".to_string(),
                content: text.to_string(),
            },
        ];
        self.client.chat(&self.config().generation_model, &messages, false).await
    }
}

#[async_trait]
impl ImageService for OpenAiAdapter {
    async fn synthesize(&self, prompt: &str, size: &str) -> anyhow::Result<Vec<u8>> {
        let bytes = self.client.image(prompt, size).await?;
        if bytes.is_empty() {
            bail!("Downloaded image is empty");
        }
        Ok(bytes)
    }
}

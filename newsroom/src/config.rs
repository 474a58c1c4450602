use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{Aspect, ContentKind, Result, WorkflowError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub generation_model: String,
    pub review_model: String,
    pub image_model: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            generation_model: "gpt-4o-2024-08-06".to_string(),
            review_model: "gpt-4o-2024-08-06".to_string(),
            image_model: "dall-e-3".to_string(),
            timeout_seconds: 120,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub keywords: Vec<String>,
    pub language: String,
    pub country: String,
    /// Number of new articles wanted per run.
    pub wanted_count: usize,
    /// Number of feed entries inspected before giving up.
    pub scan_limit: usize,
    /// Articles longer than this many characters are summarized first.
    pub summarization_threshold: usize,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            keywords: vec!["ecommerce".to_string()],
            language: "en".to_string(),
            country: "US".to_string(),
            wanted_count: 3,
            scan_limit: 20,
            summarization_threshold: 1500,
            user_agent: "Newsroom/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
        }
    }
}

/// How human review is delivered, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerMode {
    AutomatedOnly,
    HumanConsole,
    HumanViaQueue,
    AlwaysAccept,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPolicy {
    pub automated_news: bool,
    pub automated_post_text: bool,
    pub automated_image_prompt: bool,
    pub human_required_news: bool,
    pub human_required_post: bool,
    pub reviewer: ReviewerMode,
    pub queue_dir: PathBuf,
    pub queue_poll_seconds: u64,
    pub queue_timeout_seconds: u64,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            automated_news: true,
            automated_post_text: true,
            automated_image_prompt: true,
            human_required_news: false,
            human_required_post: true,
            reviewer: ReviewerMode::HumanConsole,
            queue_dir: PathBuf::from("review_queue"),
            queue_poll_seconds: 5,
            queue_timeout_seconds: 24 * 60 * 60,
        }
    }
}

impl ReviewPolicy {
    pub fn automated_enabled(&self, aspect: Aspect) -> bool {
        match aspect {
            Aspect::Summary => self.automated_news,
            Aspect::Text => self.automated_post_text,
            Aspect::ImagePrompt => self.automated_image_prompt,
        }
    }

    pub fn human_forced(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::NewsDigest => self.human_required_news,
            ContentKind::PlatformPost => self.human_required_post,
        }
    }

    /// Policy with every automated check disabled and no forced human review.
    pub fn permissive() -> Self {
        Self {
            automated_news: false,
            automated_post_text: false,
            automated_image_prompt: false,
            human_required_news: false,
            human_required_post: false,
            reviewer: ReviewerMode::AutomatedOnly,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttemptLimits {
    pub news_digest: u32,
    pub platform_post: u32,
}

impl Default for AttemptLimits {
    fn default() -> Self {
        Self {
            news_digest: 1,
            platform_post: 1,
        }
    }
}

impl AttemptLimits {
    pub fn for_kind(&self, kind: ContentKind) -> u32 {
        match kind {
            ContentKind::NewsDigest => self.news_digest,
            ContentKind::PlatformPost => self.platform_post,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    pub language: String,
    pub prompt_file: PathBuf,
    #[serde(default = "default_image_size")]
    pub image_size: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PlatformConfig {
    pub fn new(name: impl Into<String>, language: impl Into<String>, prompt_file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            prompt_file: prompt_file.into(),
            image_size: default_image_size(),
            enabled: true,
        }
    }
}

fn default_image_size() -> String {
    "1024x1792".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub day: String,
    pub time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            day: "monday".to_string(),
            time: "09:00".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn weekday(&self) -> Result<Weekday> {
        self.day
            .trim()
            .parse::<Weekday>()
            .map_err(|_| WorkflowError::Configuration(format!("Invalid schedule day: {}", self.day)))
    }

    pub fn time_of_day(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .map_err(|e| WorkflowError::Configuration(format!("Invalid schedule time '{}': {}", self.time, e)))
    }
}

/// Every knob of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub openai: OpenAiConfig,
    pub news: NewsConfig,
    pub review: ReviewPolicy,
    pub max_attempts: AttemptLimits,
    pub platforms: Vec<PlatformConfig>,
    pub brand_context_file: PathBuf,
    pub ad_intensity_percent: i64,
    pub allow_empty_hashtags: bool,
    pub output_dir: PathBuf,
    /// Used article links, one per line.
    pub ledger_file: PathBuf,
    pub schedule: ScheduleConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiConfig::default(),
            news: NewsConfig::default(),
            review: ReviewPolicy::default(),
            max_attempts: AttemptLimits::default(),
            platforms: vec![
                PlatformConfig::new("Instagram", "en", "prompts/instagram_prompt.json"),
                PlatformConfig::new("Rednote", "zh", "prompts/rednote_prompt.json"),
            ],
            brand_context_file: PathBuf::from("prompts/brand_context.txt"),
            ad_intensity_percent: 20,
            allow_empty_hashtags: true,
            output_dir: PathBuf::from("generated_posts"),
            ledger_file: PathBuf::from("used_article_links.txt"),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl WorkflowConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    WorkflowError::Configuration(format!("Cannot read config file {}: {}", path.display(), e))
                })?;
                let config: WorkflowConfig = serde_json::from_str(&raw).map_err(|e| {
                    WorkflowError::Configuration(format!("Invalid config file {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => WorkflowConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.openai.api_key = Some(key);
            }
        }
        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            if !base_url.trim().is_empty() {
                self.openai.base_url = base_url;
            }
        }
        if let Ok(dir) = env::var("NEWSROOM_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
    }

    /// Ad intensity clamped into 0..=100.
    pub fn ad_intensity(&self) -> u8 {
        if !(0..=100).contains(&self.ad_intensity_percent) {
            warn!(
                "ad_intensity_percent ({}) out of range 0-100, clamping",
                self.ad_intensity_percent
            );
        }
        self.ad_intensity_percent.clamp(0, 100) as u8
    }

    pub fn enabled_platforms(&self) -> impl Iterator<Item = &PlatformConfig> {
        self.platforms.iter().filter(|p| p.enabled)
    }

    /// Fail fast on anything that would make a run meaningless.
    pub fn validate(&self, requires_openai: bool) -> Result<()> {
        if requires_openai && self.openai.api_key.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(WorkflowError::Configuration(
                "OPENAI_API_KEY not found in environment or config file".to_string(),
            ));
        }
        if self.news.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(WorkflowError::Configuration("No news keywords configured".to_string()));
        }
        if self.news.wanted_count == 0 {
            return Err(WorkflowError::Configuration("news.wanted_count must be at least 1".to_string()));
        }
        if self.news.scan_limit < self.news.wanted_count {
            return Err(WorkflowError::Configuration(format!(
                "news.scan_limit ({}) is smaller than news.wanted_count ({})",
                self.news.scan_limit, self.news.wanted_count
            )));
        }
        if self.enabled_platforms().next().is_none() {
            return Err(WorkflowError::Configuration("No platforms enabled".to_string()));
        }

        let mut seen = HashSet::new();
        for platform in &self.platforms {
            if platform.name.trim().is_empty() {
                return Err(WorkflowError::Configuration("Platform with empty name".to_string()));
            }
            if !seen.insert(platform.name.to_lowercase()) {
                return Err(WorkflowError::Configuration(format!(
                    "Duplicate platform: {}",
                    platform.name
                )));
            }
        }

        self.schedule.weekday()?;
        self.schedule.time_of_day()?;

        info!("Configuration validated");
        Ok(())
    }
}

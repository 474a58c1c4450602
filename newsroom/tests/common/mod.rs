// Scripted in-memory collaborators shared by the workflow tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};

use anyhow::bail;
use async_trait::async_trait;
use newsroom::config::{AttemptLimits, PlatformConfig, ReviewPolicy};
use newsroom::{
    Aspect, ContentKind, GeneratedContent, GenerationRequest, GenerationService, ImageService,
    NewsQuery, NewsSource, PostRecord, ReviewCriteria, ReviewOutcome, ReviewService, Services,
    SourceItem, Storage, Summarizer, WorkflowConfig,
};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn item(n: usize, text: &str) -> SourceItem {
    SourceItem {
        id: format!("https://news.example/{}", n),
        title: format!("Story {}", n),
        text: text.to_string(),
        locale: "en-US".to_string(),
    }
}

pub fn three_short_items() -> Vec<SourceItem> {
    (1..=3).map(|n| item(n, &format!("Short story number {}.", n))).collect()
}

/// Two platforms, reviews off, one retry per unit.
pub fn config() -> WorkflowConfig {
    WorkflowConfig {
        review: ReviewPolicy::permissive(),
        max_attempts: AttemptLimits {
            news_digest: 1,
            platform_post: 1,
        },
        platforms: vec![
            PlatformConfig::new("Instagram", "en", "prompts/instagram_prompt.json"),
            PlatformConfig::new("Rednote", "zh", "prompts/rednote_prompt.json"),
        ],
        ..WorkflowConfig::default()
    }
}

/// Policy where only the automated reviewer runs, on every aspect.
pub fn automated_policy() -> ReviewPolicy {
    ReviewPolicy {
        automated_news: true,
        automated_post_text: true,
        automated_image_prompt: true,
        ..ReviewPolicy::permissive()
    }
}

pub struct FakeNews {
    result: Mutex<Option<anyhow::Result<Vec<SourceItem>>>>,
    pub queries: Mutex<Vec<NewsQuery>>,
}

impl FakeNews {
    pub fn with_items(items: Vec<SourceItem>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Some(Ok(items))),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Some(Err(anyhow::anyhow!("feed unreachable")))),
            queries: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl NewsSource for FakeNews {
    async fn fetch(&self, query: &NewsQuery) -> anyhow::Result<Vec<SourceItem>> {
        self.queries.lock().unwrap().push(query.clone());
        match self.result.lock().unwrap().take() {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct FakeSummarizer {
    pub calls: Mutex<usize>,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, _text: &str) -> anyhow::Result<String> {
        *self.calls.lock().unwrap() += 1;
        Ok("Condensed summary.".to_string())
    }
}

/// Generation service that answers from per-target scripts and falls back
/// to a valid unit. Targets are the platform name, or "digest".
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<anyhow::Result<GeneratedContent>>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

fn target(request: &GenerationRequest) -> String {
    request.platform.clone().unwrap_or_else(|| "digest".to_string())
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, target: &str, results: Vec<anyhow::Result<GeneratedContent>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default()
            .extend(results);
    }

    pub fn requests_for(&self, target_name: &str) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| target(r) == target_name)
            .cloned()
            .collect()
    }
}

pub fn post_content(body: &str, image_prompt: &str) -> GeneratedContent {
    GeneratedContent {
        values: BTreeMap::from([
            (Aspect::Text, body.to_string()),
            (Aspect::ImagePrompt, image_prompt.to_string()),
        ]),
        hashtags: vec!["#news".to_string()],
    }
}

pub fn digest_content(summary: &str) -> GeneratedContent {
    GeneratedContent {
        values: BTreeMap::from([(Aspect::Summary, summary.to_string())]),
        hashtags: Vec::new(),
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GeneratedContent> {
        self.requests.lock().unwrap().push(request.clone());
        let key = target(request);
        if let Some(result) = self.scripts.lock().unwrap().get_mut(&key).and_then(|q| q.pop_front()) {
            return result;
        }
        Ok(match request.kind {
            ContentKind::NewsDigest => digest_content("Revised digest"),
            ContentKind::PlatformPost => post_content(&format!("{} post", key), &format!("{} image", key)),
        })
    }
}

/// Reviewer answering from per-(target, aspect) scripts; accepts otherwise.
pub struct ScriptedReviewer {
    name: String,
    scripts: Mutex<HashMap<(String, Aspect), VecDeque<ReviewOutcome>>>,
    pub calls: Mutex<Vec<(String, Aspect, String)>>,
}

impl ScriptedReviewer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, target: &str, aspect: Aspect, outcomes: Vec<ReviewOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .entry((target.to_string(), aspect))
            .or_default()
            .extend(outcomes);
    }

    /// Reject `aspect` of `target` on every call.
    pub fn always_reject(&self, target: &str, aspect: Aspect, feedback: &str) {
        self.script(target, aspect, (0..20).map(|_| ReviewOutcome::reject(feedback)).collect());
    }

    pub fn calls_for(&self, target: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(t, _, _)| t == target).count()
    }
}

#[async_trait]
impl ReviewService for ScriptedReviewer {
    fn reviewer_name(&self) -> String {
        self.name.clone()
    }

    async fn review(
        &self,
        _kind: ContentKind,
        aspect: Aspect,
        value: &str,
        criteria: &ReviewCriteria,
    ) -> anyhow::Result<ReviewOutcome> {
        let key = criteria.platform.clone().unwrap_or_else(|| "digest".to_string());
        self.calls.lock().unwrap().push((key.clone(), aspect, value.to_string()));
        Ok(self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(key, aspect))
            .and_then(|q| q.pop_front())
            .unwrap_or_else(ReviewOutcome::accept))
    }
}

#[derive(Default)]
pub struct FakeImages {
    pub failing_prompts: Mutex<BTreeSet<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, prompt: &str) {
        self.failing_prompts.lock().unwrap().insert(prompt.to_string());
    }
}

#[async_trait]
impl ImageService for FakeImages {
    async fn synthesize(&self, prompt: &str, _size: &str) -> anyhow::Result<Vec<u8>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.failing_prompts.lock().unwrap().contains(prompt) {
            bail!("image model refused the prompt");
        }
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    pub saved: Mutex<Vec<(PostRecord, bool)>>,
    pub ledger: Mutex<BTreeSet<String>>,
    pub appends: Mutex<usize>,
    pub fail_save: bool,
    pub fail_load: bool,
    pub fail_append: bool,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_ledger(ids: &[&str]) -> Arc<Self> {
        let storage = Self::default();
        storage.ledger.lock().unwrap().extend(ids.iter().map(|s| s.to_string()));
        Arc::new(storage)
    }

    pub fn saved_platforms(&self) -> Vec<String> {
        self.saved.lock().unwrap().iter().map(|(p, _)| p.platform.clone()).collect()
    }

    pub fn ledger_ids(&self) -> BTreeSet<String> {
        self.ledger.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, post: &PostRecord, image: Option<&[u8]>) -> anyhow::Result<()> {
        if self.fail_save {
            bail!("output directory is read-only");
        }
        self.saved.lock().unwrap().push((post.clone(), image.is_some()));
        Ok(())
    }

    async fn load_ledger(&self) -> anyhow::Result<BTreeSet<String>> {
        if self.fail_load {
            bail!("ledger file is corrupt");
        }
        Ok(self.ledger.lock().unwrap().clone())
    }

    async fn append_ledger(&self, ids: &[String]) -> anyhow::Result<()> {
        if self.fail_append {
            bail!("disk full");
        }
        *self.appends.lock().unwrap() += 1;
        self.ledger.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }
}

/// Everything a test may want to inspect after a run.
pub struct Harness {
    pub news: Arc<FakeNews>,
    pub summarizer: Arc<FakeSummarizer>,
    pub generator: Arc<ScriptedGenerator>,
    pub automated: Arc<ScriptedReviewer>,
    pub human: Arc<ScriptedReviewer>,
    pub images: Arc<FakeImages>,
    pub storage: Arc<MemoryStorage>,
}

impl Harness {
    pub fn new(news: Arc<FakeNews>) -> Self {
        Self::with_storage(news, MemoryStorage::new())
    }

    pub fn with_storage(news: Arc<FakeNews>, storage: Arc<MemoryStorage>) -> Self {
        init_tracing();
        Self {
            news,
            summarizer: Arc::new(FakeSummarizer::default()),
            generator: ScriptedGenerator::new(),
            automated: ScriptedReviewer::new("automated"),
            human: ScriptedReviewer::new("human"),
            images: FakeImages::new(),
            storage,
        }
    }

    /// Services with the automated reviewer only.
    pub fn services(&self) -> Services {
        Services {
            news: self.news.clone(),
            summarizer: self.summarizer.clone(),
            generator: self.generator.clone(),
            automated_reviewer: Some(self.automated.clone()),
            human_reviewer: None,
            images: self.images.clone(),
            storage: self.storage.clone(),
        }
    }

    pub fn services_with_human(&self) -> Services {
        Services {
            human_reviewer: Some(self.human.clone()),
            ..self.services()
        }
    }
}

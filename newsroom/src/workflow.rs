use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::attempt::{AttemptLoop, DigestGenerator};
use crate::config::WorkflowConfig;
use crate::digest::DigestComposer;
use crate::ledger::Ledger;
use crate::platform::PlatformPipeline;
use crate::report::{NoContentReason, PlatformReport, RunReport};
use crate::review::ReviewAggregator;
use crate::types::{
    ContentKind, ContentUnit, GenerationRequest, GenerationService, ImageService, NewsDigest,
    NewsQuery, NewsSource, PromptMessage, Result, ReviewCriteria, ReviewService, SourceItem,
    Storage, Summarizer, WorkflowError,
};

/// The collaborators a workflow run talks to.
#[derive(Clone)]
pub struct Services {
    pub news: Arc<dyn NewsSource>,
    pub summarizer: Arc<dyn Summarizer>,
    pub generator: Arc<dyn GenerationService>,
    pub automated_reviewer: Option<Arc<dyn ReviewService>>,
    pub human_reviewer: Option<Arc<dyn ReviewService>>,
    pub images: Arc<dyn ImageService>,
    pub storage: Arc<dyn Storage>,
}

/// Top-level sequencing of one run: news -> digest -> platforms -> ledger.
pub struct Workflow {
    config: WorkflowConfig,
    services: Services,
    reviewer: ReviewAggregator,
    instructions: HashMap<String, Vec<PromptMessage>>,
}

impl Workflow {
    pub fn new(config: WorkflowConfig, services: Services) -> Self {
        let reviewer = ReviewAggregator::new(
            config.review.clone(),
            services.automated_reviewer.clone(),
            services.human_reviewer.clone(),
        );
        Self {
            config,
            services,
            reviewer,
            instructions: HashMap::new(),
        }
    }

    /// Rendered prompt messages for one platform.
    pub fn with_instructions(mut self, platform: impl Into<String>, messages: Vec<PromptMessage>) -> Self {
        self.instructions.insert(platform.into(), messages);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Load the ledger, run once, and persist whatever ledger updates the run
    /// accumulated, even when it failed.
    pub async fn run(&self) -> Result<RunReport> {
        let storage = self.services.storage.as_ref();
        let ledger = Ledger::load(storage).await;
        let (result, mut ledger) = self.run_with_ledger(ledger).await;
        let persisted = ledger.persist(storage).await;

        match result {
            Ok(mut report) => {
                report.ledger_persisted = persisted;
                Ok(report)
            }
            Err(e) => {
                error!("Workflow run failed: {}", e);
                Err(e)
            }
        }
    }

    /// Run once against an explicit ledger. The ledger comes back with the
    /// ids of a successful run added as pending, whether or not the run
    /// finished cleanly.
    pub async fn run_with_ledger(&self, mut ledger: Ledger) -> (Result<RunReport>, Ledger) {
        let mut report = RunReport::new(Uuid::new_v4(), Utc::now());
        info!("=== Starting workflow run {} ===", report.run_id);

        let result = self.execute(&mut ledger, &mut report).await;
        report.finished_at = Utc::now();

        match result {
            Ok(()) => {
                report.classify();
                info!(
                    "=== Workflow run {} finished: {:?} ({} of {} platforms saved) ===",
                    report.run_id,
                    report.classification,
                    report.saved_count(),
                    report.platforms.len()
                );
                (Ok(report), ledger)
            }
            Err(e) => {
                error!(
                    "Workflow run {} aborted after {} platform(s): {}",
                    report.run_id,
                    report.platforms.len(),
                    e
                );
                (Err(e), ledger)
            }
        }
    }

    async fn execute(&self, ledger: &mut Ledger, report: &mut RunReport) -> Result<()> {
        let items = match self.fetch_news(ledger).await {
            Ok(items) => items,
            Err(e) => {
                error!("News source failed: {}", e);
                self.halt(report, NoContentReason::NewsSourceFailed);
                return Ok(());
            }
        };
        if items.is_empty() {
            warn!("No new news items found");
            self.halt(report, NoContentReason::NoNewItems);
            return Ok(());
        }

        let composer = DigestComposer::new(
            self.services.summarizer.as_ref(),
            self.config.news.summarization_threshold,
        );
        let candidate = match composer.compose(&items).await {
            Some(candidate) => candidate,
            None => {
                warn!("None of the {} news items had usable text", items.len());
                self.halt(report, NoContentReason::NoUsableItems);
                return Ok(());
            }
        };

        let digest = match self.approve_digest(candidate, report).await? {
            Some(digest) => digest,
            None => {
                warn!("News digest was not approved, no posts will be generated");
                self.halt(report, NoContentReason::DigestRejected);
                return Ok(());
            }
        };
        report.source_ids = digest.source_ids.clone();

        let run_id = report.run_id.to_string();
        for platform in self.config.enabled_platforms() {
            let instructions = self.instructions.get(&platform.name).cloned().unwrap_or_default();
            let pipeline = PlatformPipeline::new(
                platform.clone(),
                instructions,
                self.config.max_attempts.for_kind(ContentKind::PlatformPost),
            )
            .with_empty_hashtags(self.config.allow_empty_hashtags);

            let platform_report = pipeline
                .run(
                    &run_id,
                    &digest,
                    self.services.generator.clone(),
                    &self.reviewer,
                    self.services.images.as_ref(),
                    self.services.storage.as_ref(),
                )
                .await;
            info!("Platform {} finished: {}", platform_report.platform, platform_report.outcome);

            if platform_report.post_saved {
                report.ledger_ids_added += ledger.record(&digest.source_ids);
            }
            report.platforms.push(platform_report);
        }

        Ok(())
    }

    /// Fetch new items, dropping anything the ledger already knows and
    /// anything beyond the wanted count.
    async fn fetch_news(&self, ledger: &Ledger) -> Result<Vec<SourceItem>> {
        let news = &self.config.news;
        let query = NewsQuery {
            keywords: news.keywords.clone(),
            language: news.language.clone(),
            country: news.country.clone(),
            wanted_count: news.wanted_count,
            scan_limit: news.scan_limit,
            excluded_ids: ledger.all_ids(),
        };
        info!(
            "Fetching up to {} new news items for {:?} (excluding {} used links)",
            query.wanted_count,
            query.keywords,
            query.excluded_ids.len()
        );

        let fetched = self
            .services
            .news
            .fetch(&query)
            .await
            .map_err(WorkflowError::service)?;

        let mut seen = HashSet::new();
        let items: Vec<SourceItem> = fetched
            .into_iter()
            .filter(|item| !ledger.contains(&item.id) && seen.insert(item.id.clone()))
            .take(news.wanted_count)
            .collect();
        info!("Fetched {} new news items", items.len());
        Ok(items)
    }

    /// Run the digest through its own attempt loop.
    async fn approve_digest(&self, candidate: NewsDigest, report: &mut RunReport) -> Result<Option<NewsDigest>> {
        let request = GenerationRequest {
            kind: ContentKind::NewsDigest,
            platform: None,
            language: self.config.news.language.clone(),
            source_text: candidate.summary.clone(),
            instructions: Vec::new(),
            preserve: BTreeMap::new(),
            revise: BTreeMap::new(),
        };
        let criteria = ReviewCriteria {
            platform: None,
            language: self.config.news.language.clone(),
            prior_feedback: None,
        };
        let generator = DigestGenerator::new(candidate, self.services.generator.clone());
        let max_attempts = self.config.max_attempts.for_kind(ContentKind::NewsDigest);

        let result = AttemptLoop::new("news digest", max_attempts, &generator, &self.reviewer)
            .run(request, &criteria)
            .await?;
        report.digest_attempts = result.state.cycles_used();

        Ok(match result.unit {
            Some(ContentUnit::NewsDigest(digest)) if result.is_approved() => Some(digest),
            _ => None,
        })
    }

    /// Record a halted run; every enabled platform is reported as skipped.
    fn halt(&self, report: &mut RunReport, reason: NoContentReason) {
        report.halt(reason);
        report.platforms = self
            .config
            .enabled_platforms()
            .map(|p| PlatformReport::skipped(&p.name, &p.language))
            .collect();
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::attempt::{AttemptLoop, ServiceGenerator};
use crate::config::PlatformConfig;
use crate::report::{PlatformOutcome, PlatformReport};
use crate::review::ReviewAggregator;
use crate::types::{
    ContentKind, ContentUnit, GenerationRequest, GenerationService, ImageService, NewsDigest,
    PostRecord, PromptMessage, ReviewCriteria, Storage,
};

/// Generates, reviews, illustrates and saves the post for one platform.
pub struct PlatformPipeline {
    platform: PlatformConfig,
    instructions: Vec<PromptMessage>,
    max_attempts: u32,
    allow_empty_hashtags: bool,
}

impl PlatformPipeline {
    pub fn new(platform: PlatformConfig, instructions: Vec<PromptMessage>, max_attempts: u32) -> Self {
        Self {
            platform,
            instructions,
            max_attempts,
            allow_empty_hashtags: true,
        }
    }

    pub fn with_empty_hashtags(mut self, allowed: bool) -> Self {
        self.allow_empty_hashtags = allowed;
        self
    }

    fn initial_request(&self, digest: &NewsDigest) -> GenerationRequest {
        GenerationRequest {
            kind: ContentKind::PlatformPost,
            platform: Some(self.platform.name.clone()),
            language: self.platform.language.clone(),
            source_text: digest.summary.clone(),
            instructions: self.instructions.clone(),
            preserve: BTreeMap::new(),
            revise: BTreeMap::new(),
        }
    }

    /// Run the pipeline against an approved digest. Never fails: every
    /// problem is folded into the returned report.
    pub async fn run(
        &self,
        run_id: &str,
        digest: &NewsDigest,
        generator: Arc<dyn GenerationService>,
        reviewer: &ReviewAggregator,
        images: &dyn ImageService,
        storage: &dyn Storage,
    ) -> PlatformReport {
        let name = self.platform.name.clone();
        info!("--- Platform {} ({}) ---", name, self.platform.language);

        let mut report = PlatformReport::skipped(&name, &self.platform.language);
        let generator = ServiceGenerator::new(generator, self.allow_empty_hashtags);
        let criteria = ReviewCriteria {
            platform: Some(name.clone()),
            language: self.platform.language.clone(),
            prior_feedback: None,
        };

        let result = AttemptLoop::new(name.as_str(), self.max_attempts, &generator, reviewer)
            .run(self.initial_request(digest), &criteria)
            .await;

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!("Platform {} aborted: {}", name, e);
                report.outcome = PlatformOutcome::RejectedExhausted;
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.attempts_used = result.state.cycles_used();

        let post = match result.unit {
            Some(ContentUnit::PlatformPost(post)) if result.is_approved() => post,
            _ => {
                warn!(
                    "Platform {} produced no approved post after {} attempt(s)",
                    name, report.attempts_used
                );
                report.outcome = PlatformOutcome::RejectedExhausted;
                return report;
            }
        };

        let image = match images.synthesize(&post.image_prompt, &self.platform.image_size).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                warn!("Image service returned no data for {}", name);
                report.error = Some("image synthesis returned no data".to_string());
                None
            }
            Err(e) => {
                warn!("Image synthesis failed for {}: {:#}", name, e);
                report.error = Some(format!("image synthesis failed: {:#}", e));
                None
            }
        };

        let record = PostRecord {
            run_id: run_id.to_string(),
            platform: name.clone(),
            language: self.platform.language.clone(),
            post_text: post.body,
            image_prompt: post.image_prompt,
            hashtags: post.hashtags,
            source_ids: digest.source_ids.clone(),
        };

        match storage.save(&record, image.as_deref()).await {
            Ok(()) if image.is_some() => {
                info!("Saved {} post with image", name);
                report.outcome = PlatformOutcome::ApprovedSaved;
                report.post_saved = true;
                report.image_saved = true;
            }
            Ok(()) => {
                info!("Saved {} post without image", name);
                report.outcome = PlatformOutcome::ApprovedButSaveFailed;
                report.post_saved = true;
            }
            Err(e) => {
                error!("Failed to save {} post: {:#}", name, e);
                report.outcome = PlatformOutcome::ApprovedButSaveFailed;
                let previous = report.error.take();
                report.error = Some(match previous {
                    Some(previous) => format!("{}; save failed: {:#}", previous, e),
                    None => format!("save failed: {:#}", e),
                });
            }
        }

        report
    }
}

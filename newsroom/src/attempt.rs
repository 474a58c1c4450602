use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::regeneration::plan_next_attempt;
use crate::review::{AggregatedVerdict, ReviewAggregator};
use crate::types::{
    Aspect, ContentKind, ContentUnit, GenerationRequest, GenerationService, NewsDigest,
    ReviewCriteria, Result, WorkflowError,
};

/// Produces one content unit for one attempt.
#[async_trait]
pub trait UnitGenerator: Send + Sync {
    async fn generate(&self, attempt: u32, request: &GenerationRequest) -> Result<ContentUnit>;
}

/// Generates units through the generation service and validates the result.
pub struct ServiceGenerator {
    service: Arc<dyn GenerationService>,
    allow_empty_hashtags: bool,
}

impl ServiceGenerator {
    pub fn new(service: Arc<dyn GenerationService>, allow_empty_hashtags: bool) -> Self {
        Self { service, allow_empty_hashtags }
    }
}

#[async_trait]
impl UnitGenerator for ServiceGenerator {
    async fn generate(&self, attempt: u32, request: &GenerationRequest) -> Result<ContentUnit> {
        debug!("Calling generation service for {} (attempt {})", request.kind, attempt);
        let generated = self
            .service
            .generate(request)
            .await
            .map_err(WorkflowError::service)?;
        ContentUnit::from_generated(request.kind, generated, &[], self.allow_empty_hashtags)
    }
}

/// The first digest attempt is the composed candidate itself; later
/// attempts ask the generation service to revise it.
pub struct DigestGenerator {
    candidate: NewsDigest,
    service: Arc<dyn GenerationService>,
}

impl DigestGenerator {
    pub fn new(candidate: NewsDigest, service: Arc<dyn GenerationService>) -> Self {
        Self { candidate, service }
    }
}

#[async_trait]
impl UnitGenerator for DigestGenerator {
    async fn generate(&self, attempt: u32, request: &GenerationRequest) -> Result<ContentUnit> {
        if attempt == 0 {
            return Ok(ContentUnit::NewsDigest(self.candidate.clone()));
        }
        debug!("Requesting digest revision (attempt {})", attempt);
        let generated = self
            .service
            .generate(request)
            .await
            .map_err(WorkflowError::service)?;
        ContentUnit::from_generated(ContentKind::NewsDigest, generated, &self.candidate.source_ids, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Pending,
    Approved,
    Failed,
}

/// Bookkeeping of one attempt loop. Owned by the loop that created it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptState {
    /// Zero-based counter of the current generate+review cycle.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Feedback of the most recent rejection, empty before the first one.
    pub feedback: BTreeMap<Aspect, String>,
    pub outcome: Outcome,
}

impl AttemptState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            feedback: BTreeMap::new(),
            outcome: Outcome::Pending,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Number of generate+review cycles that actually ran.
    pub fn cycles_used(&self) -> u32 {
        self.attempt + 1
    }
}

/// What happened during one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptEvent {
    Approved,
    Rejected(AggregatedVerdict),
    GenerationFailed(String),
    ReviewFailed(String),
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub request: GenerationRequest,
    pub event: AttemptEvent,
}

#[derive(Debug, Clone)]
pub struct LoopResult {
    pub state: AttemptState,
    /// The approved unit, present only when the outcome is `Approved`.
    pub unit: Option<ContentUnit>,
    pub history: Vec<AttemptRecord>,
}

impl LoopResult {
    pub fn is_approved(&self) -> bool {
        self.state.outcome == Outcome::Approved
    }
}

/// Bounded generate -> review -> replan loop for one content unit.
pub struct AttemptLoop<'a> {
    label: String,
    max_attempts: u32,
    generator: &'a dyn UnitGenerator,
    reviewer: &'a ReviewAggregator,
}

impl<'a> AttemptLoop<'a> {
    pub fn new(
        label: impl Into<String>,
        max_attempts: u32,
        generator: &'a dyn UnitGenerator,
        reviewer: &'a ReviewAggregator,
    ) -> Self {
        Self {
            label: label.into(),
            max_attempts,
            generator,
            reviewer,
        }
    }

    /// Drive the unit until it is approved or the budget is spent.
    ///
    /// Recoverable failures (generation, validation, review service) consume
    /// an attempt and are retried with the same input. Anything else aborts
    /// the loop with the error.
    pub async fn run(&self, initial: GenerationRequest, criteria: &ReviewCriteria) -> Result<LoopResult> {
        let mut state = AttemptState::new(self.max_attempts);
        let mut request = initial;
        let mut history = Vec::new();

        loop {
            info!(
                "[{}] attempt {} of {}",
                self.label,
                state.attempt + 1,
                state.max_attempts + 1
            );

            let generated = self.generator.generate(state.attempt, &request).await;
            let (event, rejected) = match generated {
                Ok(unit) => {
                    let reviewed = self.reviewer.review_unit(&unit, criteria).await;
                    match reviewed {
                        Ok(verdict) if verdict.accepted => {
                            info!("[{}] approved on attempt {}", self.label, state.attempt);
                            state.outcome = Outcome::Approved;
                            history.push(AttemptRecord {
                                attempt: state.attempt,
                                request,
                                event: AttemptEvent::Approved,
                            });
                            return Ok(LoopResult {
                                state,
                                unit: Some(unit),
                                history,
                            });
                        }
                        Ok(verdict) => {
                            info!(
                                "[{}] rejected on attempt {}: {:?}",
                                self.label,
                                state.attempt,
                                verdict.rejected_aspects().map(|a| a.as_str()).collect::<Vec<_>>()
                            );
                            (AttemptEvent::Rejected(verdict.clone()), Some((unit, verdict)))
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!("[{}] review failed on attempt {}: {}", self.label, state.attempt, e);
                            (AttemptEvent::ReviewFailed(e.to_string()), None)
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!("[{}] generation failed on attempt {}: {}", self.label, state.attempt, e);
                    (AttemptEvent::GenerationFailed(e.to_string()), None)
                }
                Err(e) => return Err(e),
            };

            let next_request = match &rejected {
                Some((unit, verdict)) if state.has_attempts_left() => plan_next_attempt(&request, unit, verdict),
                _ => request.clone(),
            };
            if let Some((_, verdict)) = rejected {
                state.feedback = verdict.feedback;
            }
            history.push(AttemptRecord {
                attempt: state.attempt,
                request,
                event,
            });

            if !state.has_attempts_left() {
                warn!(
                    "[{}] attempt budget of {} exhausted",
                    self.label,
                    state.max_attempts
                );
                state.outcome = Outcome::Failed;
                return Ok(LoopResult {
                    state,
                    unit: None,
                    history,
                });
            }

            request = next_request;
            state.attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReviewPolicy;
    use crate::types::{PlatformPost, ReviewOutcome, ReviewService};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns scripted results in order and records every request.
    struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<ContentUnit>>>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<ContentUnit>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<GenerationRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UnitGenerator for ScriptedGenerator {
        async fn generate(&self, _attempt: u32, request: &GenerationRequest) -> Result<ContentUnit> {
            self.seen.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(WorkflowError::Service("script exhausted".to_string())))
        }
    }

    /// Rejects `text` while the body starts with "bad".
    struct BodyReviewer;

    #[async_trait]
    impl ReviewService for BodyReviewer {
        fn reviewer_name(&self) -> String {
            "body".to_string()
        }

        async fn review(
            &self,
            _kind: ContentKind,
            aspect: Aspect,
            value: &str,
            _criteria: &ReviewCriteria,
        ) -> anyhow::Result<ReviewOutcome> {
            if aspect == Aspect::Text && value.starts_with("bad") {
                Ok(ReviewOutcome::reject(format!("rewrite '{}'", value)))
            } else {
                Ok(ReviewOutcome::accept())
            }
        }
    }

    fn post(body: &str) -> Result<ContentUnit> {
        Ok(ContentUnit::PlatformPost(PlatformPost {
            body: body.to_string(),
            image_prompt: "a harbour at dawn".to_string(),
            hashtags: vec!["#news".to_string()],
        }))
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            kind: ContentKind::PlatformPost,
            platform: Some("Instagram".to_string()),
            language: "en".to_string(),
            source_text: "digest".to_string(),
            instructions: vec![],
            preserve: BTreeMap::new(),
            revise: BTreeMap::new(),
        }
    }

    fn aggregator() -> ReviewAggregator {
        let policy = ReviewPolicy {
            automated_post_text: true,
            automated_image_prompt: true,
            ..ReviewPolicy::permissive()
        };
        ReviewAggregator::new(policy, Some(Arc::new(BodyReviewer)), None)
    }

    #[tokio::test]
    async fn approves_after_two_rejections() {
        let generator = ScriptedGenerator::new(vec![post("bad one"), post("bad two"), post("good")]);
        let reviewer = aggregator();
        let result = AttemptLoop::new("Instagram", 2, &generator, &reviewer)
            .run(request(), &ReviewCriteria::default())
            .await
            .unwrap();

        assert!(result.is_approved());
        assert_eq!(result.state.attempt, 2);
        assert_eq!(result.state.cycles_used(), 3);

        let calls = generator.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].revise.is_empty());
        assert_eq!(calls[1].revise.get(&Aspect::Text).map(String::as_str), Some("rewrite 'bad one'"));
        assert_eq!(calls[2].revise.get(&Aspect::Text).map(String::as_str), Some("rewrite 'bad two'"));
        assert!(calls[2].preserve.contains_key(&Aspect::ImagePrompt));
        assert!(!calls[2].revise.contains_key(&Aspect::ImagePrompt));
    }

    #[tokio::test]
    async fn stops_generating_once_approved() {
        let generator = ScriptedGenerator::new(vec![post("good"), post("never used")]);
        let reviewer = aggregator();
        let result = AttemptLoop::new("Instagram", 3, &generator, &reviewer)
            .run(request(), &ReviewCriteria::default())
            .await
            .unwrap();

        assert!(result.is_approved());
        assert_eq!(result.state.attempt, 0);
        assert_eq!(generator.calls().len(), 1);
        assert_eq!(result.history.len(), 1);
    }

    #[tokio::test]
    async fn never_exceeds_budget() {
        for max in 0..4u32 {
            let script = (0..10).map(|i| post(&format!("bad {}", i))).collect();
            let generator = ScriptedGenerator::new(script);
            let reviewer = aggregator();
            let result = AttemptLoop::new("Rednote", max, &generator, &reviewer)
                .run(request(), &ReviewCriteria::default())
                .await
                .unwrap();

            assert_eq!(result.state.outcome, Outcome::Failed);
            assert_eq!(result.state.attempt, max);
            assert_eq!(generator.calls().len() as u32, max + 1);
            assert!(result.unit.is_none());
            assert!(result.state.feedback.contains_key(&Aspect::Text));
            let counters: Vec<u32> = result.history.iter().map(|r| r.attempt).collect();
            assert!(counters.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[tokio::test]
    async fn generation_failure_is_a_raw_retry() {
        let generator = ScriptedGenerator::new(vec![
            post("bad first"),
            Err(WorkflowError::Validation("missing aspect".to_string())),
            post("good"),
        ]);
        let reviewer = aggregator();
        let result = AttemptLoop::new("Instagram", 2, &generator, &reviewer)
            .run(request(), &ReviewCriteria::default())
            .await
            .unwrap();

        assert!(result.is_approved());
        let calls = generator.calls();
        // The retry after the failure reuses the planned input verbatim.
        assert_eq!(calls[1], calls[2]);
        assert!(matches!(result.history[1].event, AttemptEvent::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn generation_failures_share_the_budget() {
        let generator = ScriptedGenerator::new(vec![
            Err(WorkflowError::Service("timeout".to_string())),
            Err(WorkflowError::Service("timeout".to_string())),
        ]);
        let reviewer = aggregator();
        let result = AttemptLoop::new("Instagram", 1, &generator, &reviewer)
            .run(request(), &ReviewCriteria::default())
            .await
            .unwrap();

        assert_eq!(result.state.outcome, Outcome::Failed);
        assert_eq!(generator.calls().len(), 2);
        assert!(result.state.feedback.is_empty());
    }

    #[tokio::test]
    async fn unrecoverable_errors_abort_the_loop() {
        let generator = ScriptedGenerator::new(vec![Err(WorkflowError::Configuration("no key".to_string()))]);
        let reviewer = aggregator();
        let result = AttemptLoop::new("Instagram", 3, &generator, &reviewer)
            .run(request(), &ReviewCriteria::default())
            .await;

        assert!(matches!(result, Err(WorkflowError::Configuration(_))));
        assert_eq!(generator.calls().len(), 1);
    }

    #[tokio::test]
    async fn digest_generator_returns_candidate_first() {
        struct Unused;

        #[async_trait]
        impl GenerationService for Unused {
            async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<crate::types::GeneratedContent> {
                anyhow::bail!("should not be called")
            }
        }

        let candidate = NewsDigest {
            summary: "ARTICLE 1".to_string(),
            source_ids: vec!["https://a".to_string()],
        };
        let generator = DigestGenerator::new(candidate.clone(), Arc::new(Unused));
        let unit = generator.generate(0, &request()).await.unwrap();
        assert_eq!(unit, ContentUnit::NewsDigest(candidate));

        let err = generator.generate(1, &request()).await.unwrap_err();
        assert!(err.is_recoverable());
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ReviewPolicy;
use crate::types::{
    Aspect, ContentKind, ContentUnit, ReviewCriteria, ReviewOutcome, ReviewService, Result,
    WorkflowError,
};

/// One reviewer's judgement of one aspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewVerdict {
    pub aspect: Aspect,
    pub accepted: bool,
    pub feedback: String,
    pub reviewer: String,
}

impl ReviewVerdict {
    /// Normalise a raw outcome. A rejection always carries feedback.
    pub fn from_outcome(aspect: Aspect, reviewer: impl Into<String>, outcome: ReviewOutcome) -> Self {
        let reviewer = reviewer.into();
        let mut feedback = outcome.feedback.trim().to_string();
        if !outcome.accepted && feedback.is_empty() {
            warn!("{} rejected '{}' without feedback", reviewer, aspect);
            feedback = format!(
                "The {} was rejected by {} without comment; produce a clearly different version.",
                aspect.as_str().replace('_', " "),
                reviewer
            );
        }
        Self {
            aspect,
            accepted: outcome.accepted,
            feedback,
            reviewer,
        }
    }
}

/// Combined verdict for a whole unit. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedVerdict {
    pub accepted: bool,
    /// Feedback for every rejected aspect, and nothing else.
    pub feedback: BTreeMap<Aspect, String>,
}

impl AggregatedVerdict {
    pub fn rejected_aspects(&self) -> impl Iterator<Item = &Aspect> {
        self.feedback.keys()
    }
}

/// Fold the final per-aspect verdicts of a unit into one verdict.
///
/// An aspect with no verdict (no reviewer ran) counts as accepted. The unit is
/// accepted only if every aspect of its kind is.
pub fn aggregate(kind: ContentKind, aspect_results: &BTreeMap<Aspect, Option<ReviewVerdict>>) -> AggregatedVerdict {
    let mut feedback = BTreeMap::new();
    for aspect in kind.aspects() {
        if let Some(Some(verdict)) = aspect_results.get(aspect) {
            if !verdict.accepted {
                feedback.insert(*aspect, verdict.feedback.clone());
            }
        }
    }
    AggregatedVerdict {
        accepted: feedback.is_empty(),
        feedback,
    }
}

/// Runs the automated and human reviewers over every aspect of a unit.
pub struct ReviewAggregator {
    policy: ReviewPolicy,
    automated: Option<Arc<dyn ReviewService>>,
    human: Option<Arc<dyn ReviewService>>,
}

impl ReviewAggregator {
    pub fn new(
        policy: ReviewPolicy,
        automated: Option<Arc<dyn ReviewService>>,
        human: Option<Arc<dyn ReviewService>>,
    ) -> Self {
        Self { policy, automated, human }
    }

    /// Review every aspect of `unit` and aggregate. A reviewer call that
    /// fails is returned as a service failure for the whole attempt.
    pub async fn review_unit(&self, unit: &ContentUnit, criteria: &ReviewCriteria) -> Result<AggregatedVerdict> {
        let kind = unit.kind();
        let mut results = BTreeMap::new();

        for aspect in kind.aspects() {
            let value = unit.aspect_value(*aspect).ok_or_else(|| {
                WorkflowError::General(format!("{} has no value for aspect {}", kind, aspect))
            })?;
            let verdict = self.review_aspect(kind, *aspect, value, criteria).await?;
            results.insert(*aspect, verdict);
        }

        let verdict = aggregate(kind, &results);
        info!(
            "Review of {} complete: accepted={} rejected_aspects={:?}",
            kind,
            verdict.accepted,
            verdict.rejected_aspects().map(|a| a.as_str()).collect::<Vec<_>>()
        );
        Ok(verdict)
    }

    /// Final verdict for one aspect: the last reviewer that ran decides.
    async fn review_aspect(
        &self,
        kind: ContentKind,
        aspect: Aspect,
        value: &str,
        criteria: &ReviewCriteria,
    ) -> Result<Option<ReviewVerdict>> {
        let automated = match (&self.automated, self.policy.automated_enabled(aspect)) {
            (Some(reviewer), true) => {
                debug!("Running automated review of {} '{}'", kind, aspect);
                let outcome = reviewer
                    .review(kind, aspect, value, criteria)
                    .await
                    .map_err(WorkflowError::service)?;
                let verdict = ReviewVerdict::from_outcome(aspect, reviewer.reviewer_name(), outcome);
                info!("Automated review of '{}': accepted={}", aspect, verdict.accepted);
                Some(verdict)
            }
            _ => {
                debug!("Automated review of '{}' disabled", aspect);
                None
            }
        };

        let needs_human = match &automated {
            Some(verdict) => !verdict.accepted || self.policy.human_forced(kind),
            None => true,
        };
        if !needs_human {
            return Ok(automated);
        }

        let human = match &self.human {
            Some(human) => human,
            None => return Ok(automated),
        };

        let human_criteria = ReviewCriteria {
            prior_feedback: automated.as_ref().map(|v| v.feedback.clone()),
            ..criteria.clone()
        };
        info!("Requesting human review of {} '{}'", kind, aspect);
        let outcome = human
            .review(kind, aspect, value, &human_criteria)
            .await
            .map_err(WorkflowError::service)?;
        let verdict = ReviewVerdict::from_outcome(aspect, human.reviewer_name(), outcome);
        info!("Human review of '{}': accepted={}", aspect, verdict.accepted);
        Ok(Some(verdict))
    }
}

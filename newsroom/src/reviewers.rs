use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ReviewPolicy, ReviewerMode};
use crate::types::{Aspect, ContentKind, ReviewCriteria, ReviewOutcome, ReviewService};

/// Human reviewer for the configured mode, `None` when review is automated only.
pub fn human_reviewer(policy: &ReviewPolicy) -> Option<Arc<dyn ReviewService>> {
    match policy.reviewer {
        ReviewerMode::AutomatedOnly => None,
        ReviewerMode::HumanConsole => Some(Arc::new(ConsoleReviewer::new())),
        ReviewerMode::HumanViaQueue => Some(Arc::new(
            QueueReviewer::new(&policy.queue_dir)
                .with_poll_interval(Duration::from_secs(policy.queue_poll_seconds.max(1)))
                .with_timeout(Duration::from_secs(policy.queue_timeout_seconds)),
        )),
        ReviewerMode::AlwaysAccept => Some(Arc::new(AlwaysAccept)),
    }
}

/// Accepts everything. Used for dry runs and tests.
pub struct AlwaysAccept;

#[async_trait]
impl ReviewService for AlwaysAccept {
    fn reviewer_name(&self) -> String {
        "always-accept".to_string()
    }

    async fn review(
        &self,
        _kind: ContentKind,
        aspect: Aspect,
        _value: &str,
        _criteria: &ReviewCriteria,
    ) -> anyhow::Result<ReviewOutcome> {
        debug!("Auto-accepting {}", aspect);
        Ok(ReviewOutcome::accept())
    }
}

/// Blocking y/n review on the terminal.
pub struct ConsoleReviewer {
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleReviewer {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for ConsoleReviewer {
    fn default() -> Self {
        Self::new()
    }
}

fn aspect_title(aspect: Aspect) -> &'static str {
    match aspect {
        Aspect::Summary => "NEWS SUMMARY",
        Aspect::Text => "POST TEXT",
        Aspect::ImagePrompt => "IMAGE PROMPT",
    }
}

#[async_trait]
impl ReviewService for ConsoleReviewer {
    fn reviewer_name(&self) -> String {
        "human (console)".to_string()
    }

    async fn review(
        &self,
        _kind: ContentKind,
        aspect: Aspect,
        value: &str,
        criteria: &ReviewCriteria,
    ) -> anyhow::Result<ReviewOutcome> {
        let mut input = self.input.lock().await;

        println!();
        println!("==================== HUMAN REVIEW: {} ====================", aspect_title(aspect));
        if let Some(platform) = &criteria.platform {
            println!("Platform: {} ({})", platform, criteria.language);
        }
        println!("{}", value);
        if let Some(feedback) = &criteria.prior_feedback {
            if !feedback.is_empty() {
                println!("--- Automated reviewer feedback ---");
                println!("{}", feedback);
            }
        }
        println!("==========================================================");

        let accepted = loop {
            println!("Approve this {}? (y/n)", aspect);
            let line = input
                .next_line()
                .await
                .context("Failed to read review answer")?
                .ok_or_else(|| anyhow!("Console input closed during review"))?;
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => break true,
                "n" | "no" => break false,
                other => println!("Please answer 'y' or 'n' (got '{}')", other),
            }
        };

        if accepted {
            return Ok(ReviewOutcome::accept());
        }

        println!("What should change? (one line, empty to keep the automated feedback)");
        let feedback = input
            .next_line()
            .await
            .context("Failed to read review feedback")?
            .unwrap_or_default();
        let feedback = match feedback.trim() {
            "" => criteria.prior_feedback.clone().unwrap_or_default(),
            text => text.to_string(),
        };
        Ok(ReviewOutcome::reject(feedback))
    }
}

/// Request written to the review queue for an external reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedReview {
    pub id: Uuid,
    pub kind: ContentKind,
    pub aspect: Aspect,
    pub value: String,
    pub platform: Option<String>,
    pub language: String,
    pub prior_feedback: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Review handed off through files: `<id>.request.json` is written to the
/// queue directory and `<id>.response.json` is polled for.
pub struct QueueReviewer {
    queue_dir: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
}

impl QueueReviewer {
    pub fn new(queue_dir: impl AsRef<Path>) -> Self {
        Self {
            queue_dir: queue_dir.as_ref().to_path_buf(),
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_path(&self, id: Uuid) -> PathBuf {
        self.queue_dir.join(format!("{}.request.json", id))
    }

    pub fn response_path(&self, id: Uuid) -> PathBuf {
        self.queue_dir.join(format!("{}.response.json", id))
    }

    async fn wait_for_response(&self, id: Uuid) -> anyhow::Result<ReviewOutcome> {
        let path = self.response_path(id);
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str::<ReviewOutcome>(&raw) {
                    Ok(outcome) => return Ok(outcome),
                    // May still be mid-write; try again on the next poll.
                    Err(e) => debug!("Review response {} not readable yet: {}", path.display(), e),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Cannot read {}", path.display())),
            }

            if tokio::time::Instant::now() >= deadline {
                bail!("No review response for {} within {:?}", id, self.timeout);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl ReviewService for QueueReviewer {
    fn reviewer_name(&self) -> String {
        "human (queue)".to_string()
    }

    async fn review(
        &self,
        kind: ContentKind,
        aspect: Aspect,
        value: &str,
        criteria: &ReviewCriteria,
    ) -> anyhow::Result<ReviewOutcome> {
        tokio::fs::create_dir_all(&self.queue_dir)
            .await
            .with_context(|| format!("Cannot create review queue {}", self.queue_dir.display()))?;

        let request = QueuedReview {
            id: Uuid::new_v4(),
            kind,
            aspect,
            value: value.to_string(),
            platform: criteria.platform.clone(),
            language: criteria.language.clone(),
            prior_feedback: criteria.prior_feedback.clone(),
            requested_at: Utc::now(),
        };
        let request_path = self.request_path(request.id);
        // Written under a temporary name so readers never see a partial file.
        let staging = request_path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec_pretty(&request)?)
            .await
            .with_context(|| format!("Cannot write {}", staging.display()))?;
        tokio::fs::rename(&staging, &request_path)
            .await
            .with_context(|| format!("Cannot publish {}", request_path.display()))?;
        info!("Queued {} review {} at {}", aspect, request.id, request_path.display());

        let outcome = self.wait_for_response(request.id).await;

        for path in [request_path, self.response_path(request.id)] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not clean up {}: {}", path.display(), e);
                }
            }
        }
        outcome
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Final state of one platform pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlatformOutcome {
    ApprovedSaved,
    /// Content was approved but image synthesis or persistence failed.
    ApprovedButSaveFailed,
    RejectedExhausted,
    Skipped,
}

impl PlatformOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, PlatformOutcome::ApprovedSaved | PlatformOutcome::ApprovedButSaveFailed)
    }
}

impl fmt::Display for PlatformOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlatformOutcome::ApprovedSaved => "approved+saved",
            PlatformOutcome::ApprovedButSaveFailed => "approved, save failed",
            PlatformOutcome::RejectedExhausted => "rejected (attempts exhausted)",
            PlatformOutcome::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformReport {
    pub platform: String,
    pub language: String,
    pub outcome: PlatformOutcome,
    /// Generate+review cycles run for this platform.
    pub attempts_used: u32,
    /// The post itself reached storage, with or without its image.
    pub post_saved: bool,
    pub image_saved: bool,
    pub error: Option<String>,
}

impl PlatformReport {
    pub fn skipped(platform: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            language: language.into(),
            outcome: PlatformOutcome::Skipped,
            attempts_used: 0,
            post_saved: false,
            image_saved: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunClassification {
    FullSuccess,
    PartialSuccess,
    NoContent,
}

/// Why a run produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoContentReason {
    NewsSourceFailed,
    NoNewItems,
    NoUsableItems,
    DigestRejected,
    NothingSaved,
}

impl fmt::Display for NoContentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NoContentReason::NewsSourceFailed => "news source failed",
            NoContentReason::NoNewItems => "no new news items",
            NoContentReason::NoUsableItems => "no usable news items",
            NoContentReason::DigestRejected => "news digest rejected",
            NoContentReason::NothingSaved => "no platform post approved",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub classification: RunClassification,
    pub no_content_reason: Option<NoContentReason>,
    pub digest_attempts: u32,
    pub source_ids: Vec<String>,
    pub platforms: Vec<PlatformReport>,
    pub ledger_ids_added: usize,
    pub ledger_persisted: bool,
}

impl RunReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            classification: RunClassification::NoContent,
            no_content_reason: None,
            digest_attempts: 0,
            source_ids: Vec::new(),
            platforms: Vec::new(),
            ledger_ids_added: 0,
            ledger_persisted: true,
        }
    }

    /// Halt the run with nothing produced.
    pub fn halt(&mut self, reason: NoContentReason) {
        self.classification = RunClassification::NoContent;
        self.no_content_reason = Some(reason);
    }

    /// Classify from the platform outcomes gathered so far.
    ///
    /// Full success needs every platform saved. A run with at least one
    /// approved platform is a partial success even if that save failed.
    /// Otherwise the run has no content and keeps the reason it halted with.
    pub fn classify(&mut self) {
        let saved = self.saved_count();
        let approved = self.platforms.iter().filter(|p| p.outcome.is_approved()).count();

        if !self.platforms.is_empty() && saved == self.platforms.len() {
            self.classification = RunClassification::FullSuccess;
            self.no_content_reason = None;
        } else if approved > 0 {
            self.classification = RunClassification::PartialSuccess;
            self.no_content_reason = None;
        } else {
            let reason = self.no_content_reason.unwrap_or(NoContentReason::NothingSaved);
            self.halt(reason);
        }
    }

    pub fn saved_count(&self) -> usize {
        self.platforms
            .iter()
            .filter(|p| p.outcome == PlatformOutcome::ApprovedSaved)
            .count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({:?})", self.run_id, self.classification)?;
        if let Some(reason) = &self.no_content_reason {
            writeln!(f, "  reason: {}", reason)?;
        }
        writeln!(
            f,
            "  started {} / finished {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.finished_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f, "  news items: {} (digest attempts: {})", self.source_ids.len(), self.digest_attempts)?;
        for platform in &self.platforms {
            write!(
                f,
                "  {} [{}]: {} after {} attempt(s)",
                platform.platform, platform.language, platform.outcome, platform.attempts_used
            )?;
            if let Some(error) = &platform.error {
                write!(f, " - {}", error)?;
            }
            writeln!(f)?;
        }
        write!(f, "  ledger: {} new link(s)", self.ledger_ids_added)?;
        if !self.ledger_persisted {
            write!(f, " (NOT persisted)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(name: &str, outcome: PlatformOutcome) -> PlatformReport {
        PlatformReport {
            platform: name.to_string(),
            language: "en".to_string(),
            outcome,
            attempts_used: 1,
            post_saved: outcome == PlatformOutcome::ApprovedSaved,
            image_saved: outcome == PlatformOutcome::ApprovedSaved,
            error: None,
        }
    }

    fn report(outcomes: &[PlatformOutcome]) -> RunReport {
        let mut report = RunReport::new(Uuid::new_v4(), Utc::now());
        report.platforms = outcomes
            .iter()
            .enumerate()
            .map(|(i, o)| platform(&format!("p{}", i), *o))
            .collect();
        report.classify();
        report
    }

    #[test]
    fn classification() {
        use PlatformOutcome::*;
        assert_eq!(report(&[ApprovedSaved, ApprovedSaved]).classification, RunClassification::FullSuccess);
        assert_eq!(report(&[ApprovedSaved, RejectedExhausted]).classification, RunClassification::PartialSuccess);
        assert_eq!(report(&[ApprovedButSaveFailed]).classification, RunClassification::PartialSuccess);

        let none = report(&[RejectedExhausted, Skipped]);
        assert_eq!(none.classification, RunClassification::NoContent);
        assert_eq!(none.no_content_reason, Some(NoContentReason::NothingSaved));
    }

    #[test]
    fn halted_run_keeps_its_reason() {
        let mut report = RunReport::new(Uuid::new_v4(), Utc::now());
        report.halt(NoContentReason::NoNewItems);
        report.classify();
        assert_eq!(report.no_content_reason, Some(NoContentReason::NoNewItems));
        assert!(report.to_string().contains("no new news items"));
    }

    #[test]
    fn serializes_for_cli_output() {
        let json = serde_json::to_value(report(&[PlatformOutcome::ApprovedSaved])).unwrap();
        assert_eq!(json["classification"], "FullSuccess");
        assert_eq!(json["platforms"][0]["outcome"], "ApprovedSaved");
    }
}

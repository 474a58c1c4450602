pub mod types;
pub mod config;
pub mod ledger;
pub mod review;
pub mod regeneration;
pub mod attempt;
pub mod platform;
pub mod digest;
pub mod report;
pub mod workflow;
pub mod template;
pub mod reviewers;
pub mod llm_adapter;
pub mod fetcher;
pub mod parser;
pub mod sources;
pub mod storage;
pub mod scheduler;
pub mod utils;

pub use types::*;
pub use config::{ReviewPolicy, ReviewerMode, WorkflowConfig};
pub use ledger::Ledger;
pub use review::{aggregate, AggregatedVerdict, ReviewAggregator, ReviewVerdict};
pub use regeneration::{plan_next_attempt, RegenerationScope};
pub use attempt::{AttemptLoop, AttemptState, LoopResult, Outcome, UnitGenerator};
pub use platform::PlatformPipeline;
pub use report::{NoContentReason, PlatformOutcome, PlatformReport, RunClassification, RunReport};
pub use workflow::{Services, Workflow};
pub use llm_adapter::OpenAiAdapter;
pub use fetcher::{FetchConfig, Fetcher};
pub use parser::FeedParser;
pub use sources::GoogleNewsSource;
pub use storage::FileStorage;

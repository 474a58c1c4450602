use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use newsroom::reviewers::human_reviewer;
use newsroom::scheduler::{run_weekly, WeeklySchedule};
use newsroom::template::{load_brand_context, platform_instructions, PromptTemplate};
use newsroom::{
    FetchConfig, FileStorage, GoogleNewsSource, OpenAiAdapter, Services, Workflow, WorkflowConfig,
    WorkflowError,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "newsroom", version, about = "Turns recent news into reviewed social media posts")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workflow once
    Run {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run now, then weekly on the configured day and time
    Schedule,
    /// Load and validate the configuration
    CheckConfig,
}

/// Wire the real collaborators and load every platform prompt.
fn build_workflow(config: &WorkflowConfig) -> anyhow::Result<Workflow> {
    let adapter = Arc::new(OpenAiAdapter::new(config.openai.clone())?);
    let news = Arc::new(GoogleNewsSource::new(FetchConfig::from(&config.news))?);
    let storage = Arc::new(FileStorage::new(&config.output_dir).with_ledger_path(&config.ledger_file));

    let services = Services {
        news,
        summarizer: adapter.clone(),
        generator: adapter.clone(),
        automated_reviewer: Some(adapter.clone()),
        human_reviewer: human_reviewer(&config.review),
        images: adapter,
        storage,
    };

    let brand_context = load_brand_context(&config.brand_context_file);
    let ad_intensity = config.ad_intensity();
    let mut workflow = Workflow::new(config.clone(), services);

    for platform in config.enabled_platforms() {
        let template = PromptTemplate::load(&platform.prompt_file)
            .with_context(|| format!("Prompt for platform {}", platform.name))?;
        let messages = platform_instructions(
            &template,
            &platform.name,
            &platform.language,
            &brand_context,
            ad_intensity,
        );
        workflow = workflow.with_instructions(platform.name.clone(), messages);
    }

    Ok(workflow)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = WorkflowConfig::load(cli.config.as_deref())?;
    config.validate(true)?;

    match cli.command {
        Command::CheckConfig => {
            build_workflow(&config)?;
            println!("Configuration OK");
        }
        Command::Run { json } => {
            let workflow = build_workflow(&config)?;
            let report = workflow.run().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }
        Command::Schedule => {
            let workflow = build_workflow(&config)?;
            let schedule = WeeklySchedule::from_config(&config.schedule)?;
            let workflow = &workflow;
            run_weekly(schedule, move || async move {
                let report = workflow.run().await?;
                info!("Run finished:\n{}", report);
                Ok::<_, WorkflowError>(report)
            })
            .await?;
        }
    }

    Ok(())
}

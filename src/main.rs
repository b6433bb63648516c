//! Prime Brief command line.

use anyhow::{Context as _, Result};
use clap::Parser;
use prime_brief::types::DeliveryStatus;
use prime_brief::{Pipeline, PipelineState, RawRequest, RunOutcome, Settings, logging};
use std::path::PathBuf;
use std::process::ExitCode;

/// Research a topic, write a cited brief and email it.
#[derive(Parser, Debug)]
#[command(name = "prime-brief", version, about)]
struct Cli {
    /// Topic to research (5-500 characters)
    topic: String,

    /// Recipient address for the finished report
    #[arg(long)]
    email: String,

    /// Number of findings to gather (3-10)
    #[arg(long, default_value_t = 3)]
    sources: i64,

    /// Report format: summary, detailed or executive
    #[arg(long, default_value = "summary")]
    format: String,

    /// Directory for the Markdown download
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Skip email delivery even when SMTP is configured
    #[arg(long)]
    no_email: bool,
}

fn stage_label(state: PipelineState) -> &'static str {
    match state {
        PipelineState::Validating => "Validating input",
        PipelineState::Researching => "Researching sources",
        PipelineState::Summarizing => "Writing report",
        PipelineState::Delivering => "Delivering",
        PipelineState::Done => "Done",
        PipelineState::Failed => "Failed",
        PipelineState::Idle => "Idle",
    }
}

fn build(cli: &Cli) -> Result<Pipeline> {
    let settings = Settings::load().context("configuration is incomplete")?;
    logging::init(&settings.log_level);

    if settings.smtp.is_none() && !cli.no_email {
        tracing::warn!("EMAIL_USER/EMAIL_PASS not set; the report will not be emailed");
    }

    let pipeline = Pipeline::from_settings(&settings, !cli.no_email)?
        .output_dir(cli.output.clone())
        .on_transition(|t| eprintln!("[{:>5.1}s] {}", t.elapsed.as_secs_f64(), stage_label(t.to)));
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let pipeline = match build(&cli) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    let raw = RawRequest {
        topic: cli.topic,
        recipient_email: cli.email,
        source_count: cli.sources,
        report_format: cli.format,
    };

    match pipeline.run(&raw).await {
        RunOutcome::Done(run) => {
            println!("{}", run.report.title());
            println!(
                "  findings: {}  sources: {}  words: {}  time: {:.1}s",
                run.findings.len(),
                run.report.sources().len(),
                run.report.word_count(),
                run.elapsed.as_secs_f64()
            );
            if let Some(path) = &run.saved_to {
                println!("  download: {}", path.display());
            }
            match run.delivery.status {
                DeliveryStatus::Sent => println!("  email: sent to {}", run.request.recipient_email()),
                DeliveryStatus::Skipped => println!(
                    "  email: skipped ({})",
                    run.delivery.error_detail.as_deref().unwrap_or("disabled")
                ),
                DeliveryStatus::Failed => println!(
                    "  email: failed ({})",
                    run.delivery.error_detail.as_deref().unwrap_or("unknown error")
                ),
            }
            ExitCode::SUCCESS
        }
        RunOutcome::Failed(run) => {
            eprintln!("{}", run.user_message());
            ExitCode::from(1)
        }
    }
}

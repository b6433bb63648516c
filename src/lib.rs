//! Prime Brief - topic-to-inbox research briefs
//!
//! Prime Brief turns a research topic into a cited report and emails it. A
//! run validates the request, has a research agent gather sources through a
//! web search tool, has a summarizer agent fill a fixed report template and
//! finally has an email agent deliver the result. Every LLM call passes a
//! shared rate limiter and a bounded retry policy.
//!
//! # Quick Start
//!
//! ```ignore
//! use prime_brief::{Pipeline, RawRequest, RunOutcome, Settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let pipeline = Pipeline::from_settings(&settings, true)?.output_dir(".");
//!
//!     let raw = RawRequest {
//!         topic: "Latest AI developments in healthcare diagnostics 2025".into(),
//!         recipient_email: "user@example.com".into(),
//!         source_count: 5,
//!         report_format: "executive".into(),
//!     };
//!
//!     match pipeline.run(&raw).await {
//!         RunOutcome::Done(run) => println!("{}", run.report.body()),
//!         RunOutcome::Failed(run) => eprintln!("{}", run.user_message()),
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod email;
mod error;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod rate_limit;
pub mod research;
pub mod retry;
pub mod roles;
pub mod search;
pub mod summarize;
pub mod types;
pub mod validate;

pub use agent::{Agent, AgentConfig, AgentEvent, LlmGate, Tool, ToolInfo};
pub use config::Settings;
pub use context::Context;
pub use error::{Error, LlmError, Result, SearchError, SmtpError, ValidationError};
pub use pipeline::{Pipeline, PipelineState, RunOutcome, Services, Transition};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use types::{
    DeliveryResult, DeliveryStatus, DownloadArtifact, Finding, Report, ReportFormat,
    ResearchRequest, SourceSnippet,
};
pub use validate::{RawRequest, Validator};

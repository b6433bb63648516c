//! The orchestrator: one run from raw input to delivered report.
//!
//! A run moves strictly forward through [`PipelineState`]. Each transition is
//! logged and passed to an optional observer. The first failing stage ends the
//! run as [`RunOutcome::Failed`]; nothing downstream of it executes. Delivery
//! problems never fail a run, they only show up in its [`DeliveryResult`].

use crate::agent::{AgentConfig, LlmGate};
use crate::config::Settings;
use crate::context::{Context, keys};
use crate::email::{Emailer, Mailer, SmtpMailer};
use crate::error::{Error, Result};
use crate::llm::{LlmClient, OpenAiCompatClient};
use crate::rate_limit::RateLimiter;
use crate::research::Researcher;
use crate::retry::RetryPolicy;
use crate::search::{SearchClient, SerperClient};
use crate::summarize::Summarizer;
use crate::types::{DeliveryResult, DownloadArtifact, Finding, Report, ResearchRequest};
use crate::validate::{RawRequest, Validator};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PipelineState {
    Idle,
    Validating,
    Researching,
    Summarizing,
    Delivering,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// Forward moves only; any live stage may fail.
    pub fn can_advance_to(self, next: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == PipelineState::Failed || next as u8 == self as u8 + 1
    }

    fn describe(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Validating => "validating input",
            PipelineState::Researching => "researching",
            PipelineState::Summarizing => "summarizing",
            PipelineState::Delivering => "delivering",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// One step of a run, as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: PipelineState,
    pub to: PipelineState,
    /// Time since the run started
    pub elapsed: Duration,
}

pub type TransitionObserver = Arc<dyn Fn(&Transition) + Send + Sync>;

/// External collaborators shared by every run.
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub search: Arc<dyn SearchClient>,
    /// `None` disables delivery
    pub mailer: Option<Arc<dyn Mailer>>,
    pub limiter: Arc<RateLimiter>,
}

#[derive(Debug)]
pub struct CompletedRun {
    pub request: ResearchRequest,
    pub findings: Vec<Finding>,
    pub report: Report,
    pub artifact: DownloadArtifact,
    /// Where the artifact was written, when an output directory was set
    pub saved_to: Option<PathBuf>,
    pub delivery: DeliveryResult,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct FailedRun {
    /// Stage that was running when the error occurred
    pub stage: PipelineState,
    pub error: Error,
    pub elapsed: Duration,
}

impl FailedRun {
    /// The one place internal errors become text for the user.
    pub fn user_message(&self) -> String {
        let reason = match &self.error {
            Error::Validation(e) => format!("invalid {}: {}", e.field, e.message),
            Error::SearchUnavailable(_) => {
                "the search service is unavailable; please try again later".to_string()
            }
            Error::Llm(e) if e.status == Some(429) => {
                "the language model is rate limiting requests; please try again later".to_string()
            }
            Error::ResearchIncomplete(detail) => {
                format!("not enough sources could be gathered ({})", detail)
            }
            Error::SummarizationFailed(detail) => {
                format!("the report could not be written ({})", detail)
            }
            other => other.to_string(),
        };
        format!("Failed while {}: {}", self.stage, reason)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Done(Box<CompletedRun>),
    Failed(FailedRun),
}

impl RunOutcome {
    pub fn state(&self) -> PipelineState {
        match self {
            RunOutcome::Done(_) => PipelineState::Done,
            RunOutcome::Failed(_) => PipelineState::Failed,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            RunOutcome::Done(run) => run.elapsed,
            RunOutcome::Failed(run) => run.elapsed,
        }
    }
}

/// Current state of one run plus its observer.
struct Progress<'a> {
    state: PipelineState,
    started: Instant,
    observer: Option<&'a TransitionObserver>,
}

impl Progress<'_> {
    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        let transition = Transition {
            from: self.state,
            to: next,
            elapsed: self.started.elapsed(),
        };
        tracing::info!(
            from = ?transition.from,
            to = ?transition.to,
            elapsed_ms = transition.elapsed.as_millis() as u64,
            "pipeline transition"
        );
        self.state = next;
        if let Some(observer) = self.observer {
            observer(&transition);
        }
    }

    fn fail(mut self, error: Error) -> RunOutcome {
        let stage = self.state;
        tracing::error!(stage = ?stage, error = %error, "run failed");
        self.advance(PipelineState::Failed);
        RunOutcome::Failed(FailedRun {
            stage,
            error,
            elapsed: self.started.elapsed(),
        })
    }
}

/// Runs research requests end to end.
pub struct Pipeline {
    services: Services,
    base: AgentConfig,
    validator: Validator,
    retry: RetryPolicy,
    verbose: bool,
    output_dir: Option<PathBuf>,
    observer: Option<TransitionObserver>,
}

impl Pipeline {
    /// `base` carries the model parameters every agent role starts from.
    pub fn new(services: Services, base: AgentConfig) -> Self {
        Self {
            services,
            base,
            validator: Validator::default(),
            retry: RetryPolicy::default(),
            verbose: false,
            output_dir: None,
            observer: None,
        }
    }

    /// Wire the production clients from settings.
    pub fn from_settings(settings: &Settings, email_enabled: bool) -> Result<Self> {
        let llm = &settings.llm;
        let mailer: Option<Arc<dyn Mailer>> = match (&settings.smtp, email_enabled) {
            (Some(smtp), true) => Some(Arc::new(SmtpMailer::new(smtp)?)),
            _ => None,
        };

        let services = Services {
            llm: Arc::new(OpenAiCompatClient::new(&llm.base_url, &llm.api_key)),
            search: Arc::new(SerperClient::new(&settings.serper_api_key)),
            mailer,
            limiter: Arc::new(RateLimiter::per_minute(llm.max_rpm)),
        };
        let base = AgentConfig::new(&llm.model)
            .temperature(llm.temperature)
            .max_iterations(llm.max_iterations)
            .memory(settings.enable_memory);

        tracing::info!(
            provider = ?llm.provider,
            model = %llm.model,
            max_rpm = llm.max_rpm,
            email = services.mailer.is_some(),
            "pipeline configured"
        );
        Ok(Self::new(services, base).verbose(settings.enable_verbose))
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Retry policy for every external call.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Write the Markdown download into `dir` once the report exists.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn on_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(f));
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn gate(&self) -> LlmGate {
        LlmGate {
            limiter: self.services.limiter.clone(),
            retry: self.retry.clone(),
        }
    }

    /// Execute one request. Never returns early with an error: every
    /// failure is reported as [`RunOutcome::Failed`].
    pub async fn run(&self, raw: &RawRequest) -> RunOutcome {
        let mut progress = Progress {
            state: PipelineState::Idle,
            started: Instant::now(),
            observer: self.observer.as_ref(),
        };
        let ctx = Context::new();

        progress.advance(PipelineState::Validating);
        let request = match self.validator.validate(raw) {
            Ok(request) => request,
            Err(e) => return progress.fail(e.into()),
        };
        ctx.set(keys::REQUEST, &request);

        progress.advance(PipelineState::Researching);
        let researcher = Researcher::new(
            self.services.llm.clone(),
            self.services.search.clone(),
            self.base.clone(),
        )
        .gate(self.gate())
        .retry(self.retry.clone())
        .verbose(self.verbose);
        let findings = match researcher.research(&request, &ctx).await {
            Ok(findings) => findings,
            Err(e) => return progress.fail(e),
        };

        progress.advance(PipelineState::Summarizing);
        let summarizer = Summarizer::new(self.services.llm.clone(), self.base.clone())
            .gate(self.gate())
            .verbose(self.verbose);
        let report = match summarizer.summarize(&request, &findings, &ctx).await {
            Ok(report) => report,
            Err(e) => return progress.fail(e),
        };
        ctx.set(keys::REPORT, &report);

        let artifact = DownloadArtifact::from_report(request.topic(), &report);
        let saved_to = match &self.output_dir {
            Some(dir) => match artifact.write_to(dir) {
                Ok(path) => Some(path),
                Err(e) => return progress.fail(e),
            },
            None => None,
        };

        progress.advance(PipelineState::Delivering);
        let emailer = Emailer::new(
            self.services.llm.clone(),
            self.services.mailer.clone(),
            self.base.clone(),
        )
        .gate(self.gate())
        .retry(self.retry.clone())
        .verbose(self.verbose);
        let delivery = emailer.deliver(&request, &report, &ctx).await;

        progress.advance(PipelineState::Done);
        RunOutcome::Done(Box::new(CompletedRun {
            request,
            findings,
            report,
            artifact,
            saved_to,
            delivery,
            elapsed: progress.started.elapsed(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_transitions_only_move_forward() {
        use PipelineState::*;
        assert!(Idle.can_advance_to(Validating));
        assert!(Validating.can_advance_to(Researching));
        assert!(Delivering.can_advance_to(Done));
        assert!(Researching.can_advance_to(Failed));

        assert!(!Researching.can_advance_to(Validating));
        assert!(!Validating.can_advance_to(Summarizing));
        assert!(!Done.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Idle));
    }

    #[test]
    fn test_user_message_names_stage_and_field() {
        let failed = FailedRun {
            stage: PipelineState::Validating,
            error: ValidationError::new("recipient_email", "Please enter a valid email address")
                .into(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(
            failed.user_message(),
            "Failed while validating input: invalid recipient_email: Please enter a valid email address"
        );
    }

    #[test]
    fn test_user_message_for_research() {
        let failed = FailedRun {
            stage: PipelineState::Researching,
            error: Error::ResearchIncomplete("no sources found for 'x'".to_string()),
            elapsed: Duration::ZERO,
        };
        assert!(failed.user_message().starts_with("Failed while researching: not enough sources"));
    }
}

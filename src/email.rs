//! Delivery stage: cover note, rendering and SMTP hand-off.
//!
//! Delivery never invalidates a report. Every outcome, including a missing
//! SMTP configuration, becomes a [`DeliveryResult`] rather than an error.

use crate::agent::{Agent, AgentConfig, LlmGate};
use crate::config::SmtpSettings;
use crate::context::{Context, keys};
use crate::error::{Error, Result, SmtpError};
use crate::llm::LlmClient;
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::roles;
use crate::types::{DeliveryResult, Report, ResearchRequest};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use pulldown_cmark::{Options, Parser, html};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(any(test, feature = "test-util"))]
use std::sync::Mutex;
use std::time::Duration;

pub const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Port that expects TLS from the first byte; everything else uses STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Short framing text written around the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverNote {
    pub subject: String,
    pub greeting: String,
    pub introduction: String,
    pub closing: String,
}

impl CoverNote {
    /// Used whenever the emailer agent cannot produce one.
    pub fn fallback(request: &ResearchRequest) -> Self {
        Self {
            subject: default_subject(request),
            greeting: "Hello,".to_string(),
            introduction: format!(
                "Please find below your {} on \"{}\".",
                request.report_format().label(),
                request.topic()
            ),
            closing: "Best regards,\nPrime Brief".to_string(),
        }
    }
}

pub fn default_subject(request: &ResearchRequest) -> String {
    format!(
        "Prime Brief: {} - {}",
        request.topic(),
        request.report_format().label()
    )
}

/// A rendered message ready for a [`Mailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl Email {
    /// Wrap the report in the cover note, as Markdown text plus HTML.
    pub fn compose(to: &str, report: &Report, note: &CoverNote) -> Self {
        let text = format!(
            "{}\n\n{}\n\n---\n\n{}\n---\n\n{}\n",
            note.greeting.trim(),
            note.introduction.trim(),
            report.body(),
            note.closing.trim()
        );
        let html = format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head>\
             <body style=\"font-family: sans-serif; max-width: 720px; margin: auto;\">\n{}</body></html>\n",
            escape_html(report.title()),
            markdown_to_html(&text)
        );
        Self {
            to: to.to_string(),
            subject: note.subject.trim().to_string(),
            text,
            html,
        }
    }
}

pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> std::result::Result<(), SmtpError>;
}

/// SMTP delivery through `lettre`.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let from: Mailbox = settings
            .user
            .parse()
            .map_err(|e| Error::Config(format!("EMAIL_USER is not a valid address: {}", e)))?;

        let builder = if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| Error::Config(format!("SMTP relay error: {}", e)))?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.user.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> std::result::Result<(), SmtpError> {
        let permanent = |message: String| SmtpError {
            message,
            transient: false,
        };
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| permanent(format!("Invalid recipient address: {}", e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| permanent(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| SmtpError {
                message: format!("Failed to send email: {}", e),
                transient: !e.is_permanent(),
            })
    }
}

/// Records messages instead of sending them. Can be told to fail.
#[cfg(any(test, feature = "test-util"))]
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
    attempts: Mutex<usize>,
    failure: Option<SmtpError>,
}

#[cfg(any(test, feature = "test-util"))]
impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send with `error`.
    pub fn failing(error: SmtpError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().map(|a| *a).unwrap_or(0)
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &Email) -> std::result::Result<(), SmtpError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            *attempts += 1;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(())
    }
}

/// Writes the cover note and hands the report to the mailer.
pub struct Emailer {
    llm: Arc<dyn LlmClient>,
    mailer: Option<Arc<dyn Mailer>>,
    base: AgentConfig,
    gate: Option<LlmGate>,
    retry: RetryPolicy,
    verbose: bool,
}

impl Emailer {
    /// `mailer` is `None` when SMTP is not configured or email is disabled.
    pub fn new(llm: Arc<dyn LlmClient>, mailer: Option<Arc<dyn Mailer>>, base: AgentConfig) -> Self {
        Self {
            llm,
            mailer,
            base,
            gate: None,
            retry: RetryPolicy::default(),
            verbose: false,
        }
    }

    pub fn gate(mut self, gate: LlmGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Retry policy for SMTP sends.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    async fn cover_note(&self, request: &ResearchRequest, ctx: &Context) -> CoverNote {
        let mut agent = Agent::new(roles::emailer(self.base.clone()), self.llm.clone())
            .verbose(self.verbose)
            .from_context(ctx, keys::REQUEST);
        if let Some(gate) = &self.gate {
            agent = agent.gate(gate.clone());
        }

        let task = format!(
            "Write a cover note for a {} on \"{}\" sent to {}. Suggested subject: \"{}\". \
             Reply with <finish>{{\"subject\", \"greeting\", \"introduction\", \"closing\"}}</finish>.",
            request.report_format().label(),
            request.topic(),
            request.recipient_email(),
            default_subject(request)
        );

        match agent.run::<CoverNote>(&task).await {
            Ok(note) => note,
            Err(e) => {
                tracing::warn!(error = %e, "cover note unavailable; using the default");
                CoverNote::fallback(request)
            }
        }
    }

    /// Deliver `report` to the request's recipient.
    pub async fn deliver(
        &self,
        request: &ResearchRequest,
        report: &Report,
        ctx: &Context,
    ) -> DeliveryResult {
        let Some(mailer) = &self.mailer else {
            tracing::info!("email delivery skipped; SMTP not configured or disabled");
            return DeliveryResult::skipped("email delivery is not configured");
        };

        let note = self.cover_note(request, ctx).await;
        let email = Email::compose(request.recipient_email(), report, &note);

        match self.send(mailer.as_ref(), &email).await {
            Ok(()) => {
                tracing::info!(to = %email.to, subject = %email.subject, "report emailed");
                DeliveryResult::sent()
            }
            Err(e) => {
                tracing::warn!(to = %email.to, error = %e, "email delivery failed");
                match e {
                    Error::DeliveryFailed(detail) => DeliveryResult::failed(detail),
                    other => DeliveryResult::failed(other.to_string()),
                }
            }
        }
    }

    /// Send with retry; the provider's message survives in the error.
    async fn send(&self, mailer: &dyn Mailer, email: &Email) -> Result<()> {
        execute_with_retry(
            &self.retry,
            |e: &SmtpError| e.transient,
            move || mailer.send(email),
        )
        .await
        .map_err(|e| Error::DeliveryFailed(e.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::types::{DeliveryStatus, Finding, ReportFormat, SourceSnippet};
    use chrono::Utc;

    fn request() -> ResearchRequest {
        ResearchRequest::new(
            "Quantum networking".to_string(),
            3,
            ReportFormat::Executive,
            "reader@example.com".to_string(),
        )
    }

    fn report() -> Report {
        let findings = vec![Finding {
            claim: "Entanglement over fiber".to_string(),
            supporting_snippets: vec![SourceSnippet {
                url: "https://example.com/q".to_string(),
                title: "Q".to_string(),
                extracted_text: "x".to_string(),
            }],
        }];
        Report::new(
            "Executive Brief: Quantum networking",
            ReportFormat::Executive,
            "# Executive Brief: Quantum networking\n\n## Critical Findings\n\n- **Entanglement** over fiber\n",
            &findings,
            Utc::now(),
        )
        .unwrap()
    }

    fn instant_retry() -> RetryPolicy {
        RetryPolicy::default()
            .initial_delay(Duration::ZERO)
            .max_delay(Duration::ZERO)
    }

    #[test]
    fn test_default_subject() {
        assert_eq!(
            default_subject(&request()),
            "Prime Brief: Quantum networking - Executive Brief"
        );
    }

    #[test]
    fn test_compose_renders_markdown_and_html() {
        let email = Email::compose("reader@example.com", &report(), &CoverNote::fallback(&request()));
        assert!(email.text.starts_with("Hello,"));
        assert!(email.text.contains("## Critical Findings"));
        assert!(email.html.contains("<h2>Critical Findings</h2>"));
        assert!(email.html.contains("<strong>Entanglement</strong>"));
        assert!(email.html.contains("<title>Executive Brief: Quantum networking</title>"));
    }

    #[tokio::test]
    async fn test_without_mailer_delivery_is_skipped() {
        let llm = Arc::new(ScriptedLlm::new());
        let emailer = Emailer::new(llm.clone(), None, AgentConfig::new("test"));

        let result = emailer.deliver(&request(), &report(), &Context::new()).await;
        assert_eq!(result.status, DeliveryStatus::Skipped);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cover_note_from_agent_is_used() {
        let note = serde_json::json!({
            "subject": "Your quantum brief",
            "greeting": "Hi there,",
            "introduction": "Here is the brief you asked for.",
            "closing": "Cheers"
        });
        let llm = ScriptedLlm::new().reply_when(roles::EMAILER_ROLE, format!("<finish>{}</finish>", note));
        let mailer = Arc::new(MemoryMailer::new());
        let emailer = Emailer::new(Arc::new(llm), Some(mailer.clone()), AgentConfig::new("test"));

        let result = emailer.deliver(&request(), &report(), &Context::new()).await;
        assert_eq!(result.status, DeliveryStatus::Sent);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Your quantum brief");
        assert_eq!(sent[0].to, "reader@example.com");
        assert!(sent[0].text.starts_with("Hi there,"));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_default_note() {
        let mailer = Arc::new(MemoryMailer::new());
        let emailer = Emailer::new(Arc::new(ScriptedLlm::new()), Some(mailer.clone()), AgentConfig::new("test"));

        let result = emailer.deliver(&request(), &report(), &Context::new()).await;
        assert_eq!(result.status, DeliveryStatus::Sent);
        assert_eq!(mailer.sent()[0].subject, default_subject(&request()));
    }

    #[tokio::test]
    async fn test_transient_smtp_failure_is_retried_then_reported() {
        let mailer = Arc::new(MemoryMailer::failing(SmtpError {
            message: "421 service not available".to_string(),
            transient: true,
        }));
        let emailer = Emailer::new(Arc::new(ScriptedLlm::new()), Some(mailer.clone()), AgentConfig::new("test"))
            .retry(instant_retry());

        let result = emailer.deliver(&request(), &report(), &Context::new()).await;
        assert_eq!(result.status, DeliveryStatus::Failed);
        assert_eq!(result.error_detail.as_deref(), Some("421 service not available"));
        assert_eq!(mailer.attempts(), 3);
    }

    #[tokio::test]
    async fn test_permanent_smtp_failure_is_not_retried() {
        let mailer = Arc::new(MemoryMailer::failing(SmtpError {
            message: "550 mailbox unavailable".to_string(),
            transient: false,
        }));
        let emailer = Emailer::new(Arc::new(ScriptedLlm::new()), Some(mailer.clone()), AgentConfig::new("test"))
            .retry(instant_retry());

        let result = emailer.deliver(&request(), &report(), &Context::new()).await;
        assert_eq!(result.status, DeliveryStatus::Failed);
        assert_eq!(mailer.attempts(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_is_delivery_failed() {
        let mailer = MemoryMailer::failing(SmtpError {
            message: "554 rejected".to_string(),
            transient: false,
        });
        let emailer = Emailer::new(Arc::new(ScriptedLlm::new()), None, AgentConfig::new("test"))
            .retry(instant_retry());
        let email = Email::compose("reader@example.com", &report(), &CoverNote::fallback(&request()));

        let err = emailer.send(&mailer, &email).await.unwrap_err();
        assert!(matches!(err, Error::DeliveryFailed(ref m) if m == "554 rejected"));
    }

    #[test]
    fn test_smtp_mailer_rejects_bad_sender() {
        let settings = SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "not an address".to_string(),
            password: "secret".to_string(),
        };
        assert!(matches!(SmtpMailer::new(&settings), Err(Error::Config(_))));
    }
}

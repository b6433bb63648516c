//! End-to-end runs against scripted search, LLM and mail backends.

use prime_brief::email::{Mailer, MemoryMailer};
use prime_brief::llm::ScriptedLlm;
use prime_brief::roles::{EMAILER_ROLE, RESEARCHER_ROLE, SUMMARIZER_ROLE};
use prime_brief::search::StaticSearch;
use prime_brief::summarize::template;
use prime_brief::{
    AgentConfig, DeliveryStatus, Pipeline, PipelineState, RateLimiter, RawRequest, ReportFormat,
    RetryPolicy, RunOutcome, SearchError, Services, SmtpError, SourceSnippet,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOPIC: &str = "Latest AI developments in healthcare diagnostics 2025";

fn snippets() -> Vec<SourceSnippet> {
    (1..=5)
        .map(|i| SourceSnippet {
            url: format!("https://news.example.com/diagnostics-{}", i),
            title: format!("Diagnostics story {}", i),
            extracted_text: format!("Finding number {} about AI-assisted diagnosis.", i),
        })
        .collect()
}

fn research_reply() -> String {
    let findings: Vec<Value> = snippets()
        .iter()
        .enumerate()
        .map(|(i, s)| json!({"claim": format!("Claim {}", i + 1), "sources": [s.url]}))
        .collect();
    format!("<finish>{}</finish>", json!({ "findings": findings }))
}

fn sections_reply(format: ReportFormat, words_per_section: usize) -> String {
    let text = "insight ".repeat(words_per_section);
    let sections: serde_json::Map<String, Value> = template(format)
        .headings
        .iter()
        .map(|h| (h.to_string(), json!(text.trim())))
        .collect();
    format!("<finish>{}</finish>", json!({ "sections": sections }))
}

fn cover_note_reply() -> String {
    let note = json!({
        "subject": "Your diagnostics brief",
        "greeting": "Hello,",
        "introduction": "Here is the brief you requested.",
        "closing": "Regards"
    });
    format!("<finish>{}</finish>", note)
}

fn scripted_llm(format: ReportFormat) -> ScriptedLlm {
    ScriptedLlm::new()
        .reply_when(RESEARCHER_ROLE, research_reply())
        .reply_when(SUMMARIZER_ROLE, sections_reply(format, 200))
        .reply_when(EMAILER_ROLE, cover_note_reply())
}

fn raw(format: &str, sources: i64) -> RawRequest {
    RawRequest {
        topic: TOPIC.to_string(),
        recipient_email: "user@example.com".to_string(),
        source_count: sources,
        report_format: format.to_string(),
    }
}

struct Harness {
    llm: Arc<ScriptedLlm>,
    search: Arc<StaticSearch>,
    mailer: Arc<MemoryMailer>,
    transitions: Arc<Mutex<Vec<PipelineState>>>,
    pipeline: Pipeline,
}

fn harness(llm: ScriptedLlm, search: StaticSearch, mailer: MemoryMailer, rpm: u32) -> Harness {
    let llm = Arc::new(llm);
    let search = Arc::new(search);
    let mailer = Arc::new(mailer);
    let transitions = Arc::new(Mutex::new(Vec::new()));

    let services = Services {
        llm: llm.clone(),
        search: search.clone(),
        mailer: Some(mailer.clone() as Arc<dyn Mailer>),
        limiter: Arc::new(RateLimiter::per_minute(rpm)),
    };
    let seen = transitions.clone();
    let pipeline = Pipeline::new(services, AgentConfig::new("test-model"))
        .retry(
            RetryPolicy::default()
                .initial_delay(Duration::ZERO)
                .max_delay(Duration::ZERO),
        )
        .on_transition(move |t| seen.lock().unwrap().push(t.to));

    Harness {
        llm,
        search,
        mailer,
        transitions,
        pipeline,
    }
}

fn default_harness(format: ReportFormat) -> Harness {
    harness(
        scripted_llm(format),
        StaticSearch::new().with_fallback(Ok(snippets())),
        MemoryMailer::new(),
        60,
    )
}

#[tokio::test]
async fn executive_brief_for_five_sources_is_delivered() {
    let h = default_harness(ReportFormat::Executive);

    let RunOutcome::Done(run) = h.pipeline.run(&raw("Executive Brief", 5)).await else {
        panic!("expected Done");
    };

    assert_eq!(run.findings.len(), 5);
    assert!(!run.report.body().is_empty());
    assert!(run.report.word_count() < 450, "{} words", run.report.word_count());
    assert_eq!(run.report.sources().len(), 5);
    assert_eq!(run.delivery.status, DeliveryStatus::Sent);
    assert_eq!(
        run.artifact.file_name,
        "prime_brief_Latest AI developments in healthcare diagnostics 2025.md"
    );
    assert_eq!(run.artifact.markdown, run.report.body());

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "user@example.com");
    assert!(sent[0].text.contains(run.report.body()));

    assert_eq!(
        *h.transitions.lock().unwrap(),
        vec![
            PipelineState::Validating,
            PipelineState::Researching,
            PipelineState::Summarizing,
            PipelineState::Delivering,
            PipelineState::Done,
        ]
    );
    assert_eq!(h.llm.call_count(), 3);
}

#[tokio::test]
async fn failing_smtp_still_completes_with_download() {
    let out_dir = std::env::temp_dir().join(format!("prime-brief-test-{}", std::process::id()));
    let h = harness(
        scripted_llm(ReportFormat::Summary),
        StaticSearch::new().with_fallback(Ok(snippets())),
        MemoryMailer::failing(SmtpError {
            message: "535 authentication failed".to_string(),
            transient: false,
        }),
        60,
    );
    let pipeline = h.pipeline.output_dir(&out_dir);

    let RunOutcome::Done(run) = pipeline.run(&raw("summary", 3)).await else {
        panic!("delivery failure must not fail the run");
    };

    assert_eq!(run.delivery.status, DeliveryStatus::Failed);
    assert_eq!(
        run.delivery.error_detail.as_deref(),
        Some("535 authentication failed")
    );
    let path = run.saved_to.clone().expect("artifact written");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), run.report.body());

    std::fs::remove_dir_all(&out_dir).ok();
}

#[tokio::test]
async fn no_search_results_fails_at_research() {
    let h = harness(
        scripted_llm(ReportFormat::Summary),
        StaticSearch::new().with_fallback(Err(SearchError {
            status: Some(401),
            message: "invalid API key or quota exceeded".to_string(),
            transient: false,
        })),
        MemoryMailer::new(),
        60,
    );

    let RunOutcome::Failed(run) = h.pipeline.run(&raw("summary", 3)).await else {
        panic!("expected Failed");
    };

    assert_eq!(run.stage, PipelineState::Researching);
    assert!(run.user_message().starts_with("Failed while researching"));
    assert_eq!(h.llm.call_count(), 0);
    assert_eq!(h.mailer.attempts(), 0);
    assert_eq!(
        h.transitions.lock().unwrap().last(),
        Some(&PipelineState::Failed)
    );
}

#[tokio::test]
async fn invalid_input_fails_before_any_external_call() {
    let h = default_harness(ReportFormat::Summary);

    let mut request = raw("summary", 3);
    request.recipient_email = "user@gmial.com".to_string();

    let RunOutcome::Failed(run) = h.pipeline.run(&request).await else {
        panic!("expected Failed");
    };

    assert_eq!(run.stage, PipelineState::Validating);
    let prime_brief::Error::Validation(err) = &run.error else {
        panic!("expected a validation error, got {:?}", run.error);
    };
    assert_eq!(err.field, "recipient_email");
    assert!(h.search.queries().is_empty());
    assert_eq!(h.llm.call_count(), 0);
    assert_eq!(
        *h.transitions.lock().unwrap(),
        vec![PipelineState::Validating, PipelineState::Failed]
    );
}

#[tokio::test]
async fn identical_requests_give_identical_structure() {
    fn headings(body: &str) -> Vec<String> {
        body.lines()
            .filter(|l| l.starts_with("## "))
            .map(str::to_string)
            .collect()
    }

    let first = default_harness(ReportFormat::Detailed);
    let second = default_harness(ReportFormat::Detailed);

    let (RunOutcome::Done(a), RunOutcome::Done(b)) = (
        first.pipeline.run(&raw("detailed", 4)).await,
        second.pipeline.run(&raw("detailed", 4)).await,
    ) else {
        panic!("both runs should complete");
    };

    assert_eq!(headings(a.report.body()), headings(b.report.body()));
    assert_eq!(a.report.sources(), b.report.sources());
    assert_eq!(a.findings.len(), 4);
    assert_eq!(headings(a.report.body()).len(), 7);
}

#[tokio::test(start_paused = true)]
async fn llm_calls_respect_the_rate_limit() {
    let h = harness(
        scripted_llm(ReportFormat::Summary),
        StaticSearch::new().with_fallback(Ok(snippets())),
        MemoryMailer::new(),
        2,
    );

    let outcome = h.pipeline.run(&raw("summary", 3)).await;
    assert_eq!(outcome.state(), PipelineState::Done);

    let times = h.llm.call_times();
    assert_eq!(times.len(), 3);
    // two calls fit in the first window, the third waits for it to roll over
    assert!(times[1] - times[0] < Duration::from_secs(60));
    assert!(times[2] - times[0] >= Duration::from_secs(60));
    assert!(outcome.elapsed() >= Duration::from_secs(60));
}

#[tokio::test]
async fn transient_llm_errors_are_retried() {
    let llm = ScriptedLlm::new()
        .fail_when(
            RESEARCHER_ROLE,
            prime_brief::LlmError {
                status: Some(503),
                message: "overloaded".to_string(),
                transient: true,
            },
        )
        .reply_when(RESEARCHER_ROLE, research_reply())
        .reply_when(SUMMARIZER_ROLE, sections_reply(ReportFormat::Summary, 20))
        .reply_when(EMAILER_ROLE, cover_note_reply());
    let h = harness(
        llm,
        StaticSearch::new().with_fallback(Ok(snippets())),
        MemoryMailer::new(),
        60,
    );

    let outcome = h.pipeline.run(&raw("summary", 3)).await;
    assert_eq!(outcome.state(), PipelineState::Done);
    assert_eq!(h.llm.call_count(), 4);
}

#[tokio::test]
async fn provider_rate_limit_is_reported_as_such() {
    let llm = ScriptedLlm::new().fail_when(
        RESEARCHER_ROLE,
        prime_brief::LlmError {
            status: Some(429),
            message: "HTTP error 429".to_string(),
            transient: true,
        },
    );
    let h = harness(
        llm,
        StaticSearch::new().with_fallback(Ok(snippets())),
        MemoryMailer::new(),
        60,
    );

    let RunOutcome::Failed(run) = h.pipeline.run(&raw("summary", 3)).await else {
        panic!("expected Failed");
    };

    assert_eq!(run.stage, PipelineState::Researching);
    assert!(matches!(run.error, prime_brief::Error::Llm(ref e) if e.status == Some(429)));
    assert_eq!(
        run.user_message(),
        "Failed while researching: the language model is rate limiting requests; please try again later"
    );
    // every attempt of the retry policy was spent before giving up
    assert_eq!(h.llm.call_count(), 3);
    assert_eq!(h.mailer.attempts(), 0);
}

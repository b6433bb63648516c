//! Summarizer stage: findings in, formatted report out.
//!
//! The report format picks a fixed [`Template`]. The LLM only fills section
//! text; headings, their order, the timestamp line and the source list are
//! written here, so the structure of a report never depends on the model.

use crate::agent::{Agent, AgentConfig, LlmGate};
use crate::context::{Context, keys};
use crate::error::{Error, Result};
use crate::llm::LlmClient;
use crate::roles;
use crate::types::{Finding, Report, ReportFormat, ResearchRequest, cited_urls};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One page, in words, for the executive brief.
pub const EXECUTIVE_WORD_LIMIT: usize = 450;

/// Fixed section layout of one report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    pub format: ReportFormat,
    pub headings: &'static [&'static str],
    /// Upper bound on words in the whole rendered body
    pub word_cap: Option<usize>,
}

const SUMMARY_HEADINGS: &[&str] = &[
    "Executive Summary",
    "Key Findings",
    "Current Trends",
    "Actionable Insights",
];

const DETAILED_HEADINGS: &[&str] = &[
    "Executive Overview",
    "Background & Context",
    "Detailed Findings",
    "Trend Analysis",
    "Expert Perspectives",
    "Implications & Recommendations",
];

const EXECUTIVE_HEADINGS: &[&str] = &[
    "Bottom Line Up Front",
    "Critical Findings",
    "Business Impact",
    "Recommended Actions",
];

pub fn template(format: ReportFormat) -> Template {
    let (headings, word_cap) = match format {
        ReportFormat::Summary => (SUMMARY_HEADINGS, None),
        ReportFormat::Detailed => (DETAILED_HEADINGS, None),
        ReportFormat::Executive => (EXECUTIVE_HEADINGS, Some(EXECUTIVE_WORD_LIMIT)),
    };
    Template {
        format,
        headings,
        word_cap,
    }
}

/// What the summarizer agent returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDraft {
    pub sections: HashMap<String, String>,
}

pub fn report_title(request: &ResearchRequest) -> String {
    format!("{}: {}", request.report_format().label(), request.topic())
}

/// Render the Markdown body in template order.
///
/// Missing sections render as empty; the agent's schema normally rules that
/// out. Under a word cap, section text is cut in order once the title,
/// headings and source list have been accounted for, keeping the cap
/// strictly.
pub fn render(
    title: &str,
    template: &Template,
    draft: &SectionDraft,
    findings: &[Finding],
    generated_at: DateTime<Utc>,
) -> String {
    let header = format!(
        "# {}\n\n*Generated {}*\n",
        title,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let mut sources = String::from("\n## Sources\n\n");
    for (i, url) in cited_urls(findings).iter().enumerate() {
        sources.push_str(&format!("{}. {}\n", i + 1, url));
    }

    let mut budget = template.word_cap.map(|cap| {
        let fixed = word_count(&header)
            + word_count(&sources)
            + template
                .headings
                .iter()
                .map(|h| word_count(h) + 1)
                .sum::<usize>();
        cap.saturating_sub(fixed + 1)
    });

    let mut body = header;
    for heading in template.headings {
        let text = draft
            .sections
            .get(*heading)
            .map(|s| s.trim())
            .unwrap_or_default();
        let text = match budget.as_mut() {
            Some(left) => {
                let (cut, used) = truncate_words(text, *left);
                *left -= used;
                cut
            }
            None => text.to_string(),
        };
        body.push_str(&format!("\n## {}\n\n{}\n", heading, text));
    }
    body.push_str(&sources);
    body
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keep at most `max` whitespace-separated words, preserving line breaks.
/// Returns the kept text and the number of words kept.
fn truncate_words(text: &str, max: usize) -> (String, usize) {
    let mut kept = Vec::new();
    let mut used = 0;

    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if used + words.len() <= max {
            used += words.len();
            kept.push(line.to_string());
            continue;
        }
        let room = max - used;
        if room > 0 {
            let indent = &line[..line.len() - line.trim_start().len()];
            kept.push(format!("{}{}…", indent, words[..room].join(" ")));
            used += room;
        }
        break;
    }

    (kept.join("\n").trim_end().to_string(), used)
}

/// Runs the summarizer agent and builds the [`Report`].
pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    base: AgentConfig,
    gate: Option<LlmGate>,
    verbose: bool,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>, base: AgentConfig) -> Self {
        Self {
            llm,
            base,
            gate: None,
            verbose: false,
        }
    }

    pub fn gate(mut self, gate: LlmGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Fill the template for the request's format from `findings`, reading
    /// the request and findings from `ctx` and leaving the draft under
    /// [`keys::SECTIONS`].
    pub async fn summarize(
        &self,
        request: &ResearchRequest,
        findings: &[Finding],
        ctx: &Context,
    ) -> Result<Report> {
        let template = template(request.report_format());
        let config = roles::summarizer(self.base.clone(), &template);

        let mut agent = Agent::new(config, self.llm.clone())
            .verbose(self.verbose)
            .from_context(ctx, keys::REQUEST)
            .from_context(ctx, keys::FINDINGS)
            .to_context(ctx, keys::SECTIONS);
        if let Some(gate) = &self.gate {
            agent = agent.gate(gate.clone());
        }

        let task = format!(
            "Write a {} on \"{}\" from the {} findings in the context. \
             Reply with <finish>{{\"sections\": {{...}}}}</finish> holding one entry per heading.",
            template.format.label(),
            request.topic(),
            findings.len()
        );

        let draft: SectionDraft = agent
            .run(&task)
            .await
            .map_err(|e| Error::SummarizationFailed(e.to_string()))?;

        let generated_at = Utc::now();
        let title = report_title(request);
        let body = render(&title, &template, &draft, findings, generated_at);
        let report = Report::new(title, template.format, body, findings, generated_at)?;

        tracing::info!(
            format = %template.format,
            words = report.word_count(),
            sources = report.sources().len(),
            "report rendered"
        );
        Ok(report)
    }
}

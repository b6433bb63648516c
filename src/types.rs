//! Data model shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};

/// One of the three report templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Summary,
    Detailed,
    Executive,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 3] = [
        ReportFormat::Summary,
        ReportFormat::Detailed,
        ReportFormat::Executive,
    ];

    /// Display label used in subjects and prompts.
    pub fn label(self) -> &'static str {
        match self {
            ReportFormat::Summary => "Summary Report",
            ReportFormat::Detailed => "Detailed Analysis",
            ReportFormat::Executive => "Executive Brief",
        }
    }

    /// Parse either the short name or the display label, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|format| {
            normalized == format.label().to_ascii_lowercase()
                || normalized == format!("{:?}", format).to_ascii_lowercase()
        })
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated research request. Only the validator can build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResearchRequest {
    topic: String,
    source_count: u8,
    report_format: ReportFormat,
    recipient_email: String,
}

impl ResearchRequest {
    pub(crate) fn new(
        topic: String,
        source_count: u8,
        report_format: ReportFormat,
        recipient_email: String,
    ) -> Self {
        Self {
            topic,
            source_count,
            report_format,
            recipient_email,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn source_count(&self) -> u8 {
        self.source_count
    }

    pub fn report_format(&self) -> ReportFormat {
        self.report_format
    }

    pub fn recipient_email(&self) -> &str {
        &self.recipient_email
    }
}

/// A search hit with the text the provider extracted for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSnippet {
    pub url: String,
    pub title: String,
    pub extracted_text: String,
}

/// A claim together with the snippets that support it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub claim: String,
    pub supporting_snippets: Vec<SourceSnippet>,
}

/// A rendered report. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    title: String,
    format: ReportFormat,
    body: String,
    sources: Vec<String>,
    generated_at: DateTime<Utc>,
}

impl Report {
    /// Build a report from rendered Markdown.
    ///
    /// Fails unless at least one finding cites at least one snippet, and
    /// unless the body is non-empty.
    pub fn new(
        title: impl Into<String>,
        format: ReportFormat,
        body: impl Into<String>,
        findings: &[Finding],
        generated_at: DateTime<Utc>,
    ) -> Result<Self> {
        if !findings.iter().any(|f| !f.supporting_snippets.is_empty()) {
            return Err(Error::SummarizationFailed(
                "a report needs at least one finding with a cited source".to_string(),
            ));
        }

        let body = body.into();
        if body.trim().is_empty() {
            return Err(Error::SummarizationFailed("report body is empty".to_string()));
        }

        Ok(Self {
            title: title.into(),
            format,
            body,
            sources: cited_urls(findings),
            generated_at,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn format(&self) -> ReportFormat {
        self.format
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Distinct cited URLs in citation order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

/// Distinct URLs across all findings, first citation first.
pub fn cited_urls(findings: &[Finding]) -> Vec<String> {
    let mut seen = HashSet::new();
    findings
        .iter()
        .flat_map(|f| f.supporting_snippets.iter())
        .filter(|s| seen.insert(s.url.clone()))
        .map(|s| s.url.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

/// Outcome of the email stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub status: DeliveryStatus,
    pub error_detail: Option<String>,
}

impl DeliveryResult {
    pub fn sent() -> Self {
        Self {
            status: DeliveryStatus::Sent,
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            error_detail: Some(detail.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Skipped,
            error_detail: Some(reason.into()),
        }
    }
}

/// The Markdown file offered for local download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadArtifact {
    pub file_name: String,
    pub markdown: String,
}

impl DownloadArtifact {
    pub fn from_report(topic: &str, report: &Report) -> Self {
        Self {
            file_name: format!("prime_brief_{}.md", safe_file_stem(topic)),
            markdown: report.body().to_string(),
        }
    }

    /// Write the artifact into `dir`, returning the full path.
    pub fn write_to(&self, dir: &std::path::Path) -> Result<std::path::PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.markdown)?;
        Ok(path)
    }
}

/// Keep alphanumerics, space, `-` and `_`; cap at 50 characters.
fn safe_file_stem(topic: &str) -> String {
    let cleaned: String = topic
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(50)
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "research".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(url: &str) -> SourceSnippet {
        SourceSnippet {
            url: url.to_string(),
            title: "Title".to_string(),
            extracted_text: "Text".to_string(),
        }
    }

    #[test]
    fn test_format_parse_accepts_names_and_labels() {
        assert_eq!(ReportFormat::parse("executive"), Some(ReportFormat::Executive));
        assert_eq!(ReportFormat::parse("Detailed Analysis"), Some(ReportFormat::Detailed));
        assert_eq!(ReportFormat::parse("  SUMMARY "), Some(ReportFormat::Summary));
        assert_eq!(ReportFormat::parse("haiku"), None);
    }

    #[test]
    fn test_report_requires_cited_finding() {
        let uncited = vec![Finding {
            claim: "Unsupported".to_string(),
            supporting_snippets: vec![],
        }];
        let result = Report::new("T", ReportFormat::Summary, "# T", &uncited, Utc::now());
        assert!(matches!(result, Err(Error::SummarizationFailed(_))));

        let result = Report::new("T", ReportFormat::Summary, "# T", &[], Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_report_rejects_empty_body() {
        let findings = vec![Finding {
            claim: "Claim".to_string(),
            supporting_snippets: vec![snippet("https://a.example")],
        }];
        let result = Report::new("T", ReportFormat::Summary, "  \n", &findings, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_cited_urls_dedupes_in_order() {
        let findings = vec![
            Finding {
                claim: "One".to_string(),
                supporting_snippets: vec![snippet("https://b.example"), snippet("https://a.example")],
            },
            Finding {
                claim: "Two".to_string(),
                supporting_snippets: vec![snippet("https://a.example"), snippet("https://c.example")],
            },
        ];
        assert_eq!(
            cited_urls(&findings),
            vec!["https://b.example", "https://a.example", "https://c.example"]
        );
    }

    #[test]
    fn test_download_file_name_is_sanitized() {
        let findings = vec![Finding {
            claim: "Claim".to_string(),
            supporting_snippets: vec![snippet("https://a.example")],
        }];
        let report =
            Report::new("T", ReportFormat::Summary, "# Body", &findings, Utc::now()).unwrap();
        let artifact = DownloadArtifact::from_report("AI/ML: what's next?", &report);
        assert_eq!(artifact.file_name, "prime_brief_AI_ML_ what_s next_.md");
        assert_eq!(artifact.markdown, "# Body");
    }
}

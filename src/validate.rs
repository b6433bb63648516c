//! Input validation for research requests.
//!
//! Every external call happens after validation, so a bad topic or address
//! never costs search or LLM quota.

use regex::Regex;
use std::ops::RangeInclusive;

use crate::error::ValidationError;
use crate::types::{ReportFormat, ResearchRequest};

pub const TOPIC_MIN_CHARS: usize = 5;
pub const TOPIC_MAX_CHARS: usize = 500;
pub const DEFAULT_SOURCE_RANGE: RangeInclusive<u8> = 3..=10;

const DOMAIN_TYPOS: &[(&str, &str)] = &[
    ("gmial.com", "gmail.com"),
    ("gmal.com", "gmail.com"),
    ("gamil.com", "gmail.com"),
    ("yaho.com", "yahoo.com"),
    ("hotmal.com", "hotmail.com"),
];

/// Raw, unchecked user input.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub topic: String,
    pub recipient_email: String,
    pub source_count: i64,
    pub report_format: String,
}

/// Turns [`RawRequest`]s into [`ResearchRequest`]s.
pub struct Validator {
    source_range: RangeInclusive<u8>,
    email_regex: Regex,
    whitespace_regex: Regex,
    injection_regex: Regex,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_RANGE)
    }
}

impl Validator {
    pub fn new(source_range: RangeInclusive<u8>) -> Self {
        Self {
            source_range,
            email_regex: Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap(),
            whitespace_regex: Regex::new(r"\s+").unwrap(),
            injection_regex: Regex::new(r"(?i)<script|javascript:|on\w+\s*=").unwrap(),
        }
    }

    /// Validate all fields, reporting the first one that breaks a rule.
    pub fn validate(&self, raw: &RawRequest) -> Result<ResearchRequest, ValidationError> {
        let topic = self.topic(&raw.topic)?;
        let email = self.email(&raw.recipient_email)?;
        let source_count = self.source_count(raw.source_count)?;
        let format = self.report_format(&raw.report_format)?;
        Ok(ResearchRequest::new(topic, source_count, format, email))
    }

    pub fn topic(&self, raw: &str) -> Result<String, ValidationError> {
        let topic = self.whitespace_regex.replace_all(raw.trim(), " ").into_owned();
        if topic.is_empty() {
            return Err(ValidationError::new("topic", "Research topic is required"));
        }

        let chars = topic.chars().count();
        if chars < TOPIC_MIN_CHARS {
            return Err(ValidationError::new(
                "topic",
                format!("Topic must be at least {} characters long", TOPIC_MIN_CHARS),
            ));
        }
        if chars > TOPIC_MAX_CHARS {
            return Err(ValidationError::new(
                "topic",
                format!("Topic must be at most {} characters", TOPIC_MAX_CHARS),
            ));
        }
        if self.injection_regex.is_match(&topic) {
            return Err(ValidationError::new("topic", "Topic contains invalid characters"));
        }

        Ok(topic)
    }

    pub fn email(&self, raw: &str) -> Result<String, ValidationError> {
        let email = raw.trim().to_lowercase();
        if email.is_empty() {
            return Err(ValidationError::new(
                "recipient_email",
                "Email address is required",
            ));
        }
        if !self.email_regex.is_match(&email) {
            return Err(ValidationError::new(
                "recipient_email",
                "Invalid email format. Please enter a valid email address.",
            ));
        }

        let (local, domain) = email.split_once('@').unwrap_or((email.as_str(), ""));
        if let Some((_, fixed)) = DOMAIN_TYPOS.iter().find(|(typo, _)| *typo == domain) {
            return Err(ValidationError::new(
                "recipient_email",
                format!("Did you mean '{}@{}'?", local, fixed),
            ));
        }

        Ok(email)
    }

    pub fn source_count(&self, raw: i64) -> Result<u8, ValidationError> {
        let (min, max) = (*self.source_range.start(), *self.source_range.end());
        match u8::try_from(raw) {
            Ok(n) if self.source_range.contains(&n) => Ok(n),
            _ => Err(ValidationError::new(
                "source_count",
                format!("Number of sources must be between {} and {}", min, max),
            )),
        }
    }

    pub fn report_format(&self, raw: &str) -> Result<ReportFormat, ValidationError> {
        ReportFormat::parse(raw).ok_or_else(|| {
            ValidationError::new(
                "report_format",
                format!(
                    "Unknown report format '{}'; expected summary, detailed or executive",
                    raw.trim()
                ),
            )
        })
    }
}

//! Role bundles for the three pipeline agents.
//!
//! Each bundle is an [`AgentConfig`] carrying the role title, goal, backstory
//! and the JSON schema its `<finish>` answer must satisfy. Model parameters
//! come from the `base` config built out of [`crate::config::LlmSettings`].

use crate::agent::AgentConfig;
use crate::summarize::Template;
use crate::types::ResearchRequest;
use serde_json::{Value, json};

pub const RESEARCHER_ROLE: &str = "Senior Web Research Specialist";
pub const SUMMARIZER_ROLE: &str = "Content Analysis & Summarization Expert";
pub const EMAILER_ROLE: &str = "Email Communication Specialist";

const RESEARCHER_BACKSTORY: &str = "You are an elite web research specialist with a background \
in investigative journalism and academic research. You find credible, authoritative sources, \
cross-reference claims across them, note publication dates and credibility, and never state \
anything a source does not support. You prefer quality over quantity.";

const SUMMARIZER_BACKSTORY: &str = "You are a content analyst and strategic communicator with \
experience in business intelligence and executive reporting. You turn research findings into \
clear, actionable insight, identify patterns and implications, and tailor structure and tone \
to the requested report format. You only use the findings you are given.";

const EMAILER_BACKSTORY: &str = "You are a senior communications specialist. You write clear, \
professional emails with compelling subject lines, a courteous greeting, a short statement of \
purpose and a professional sign-off.";

/// Researcher: searches, verifies and returns cited findings.
pub fn researcher(base: AgentConfig, request: &ResearchRequest) -> AgentConfig {
    base.role(RESEARCHER_ROLE)
        .goal(format!(
            "Conduct comprehensive, accurate web research on: {}",
            request.topic()
        ))
        .system(RESEARCHER_BACKSTORY)
        .output_schema(findings_schema())
}

/// Summarizer: fills the fixed template of one report format.
pub fn summarizer(base: AgentConfig, template: &Template) -> AgentConfig {
    let mut system = format!(
        "{}\n\nWrite exactly these sections, in Markdown, without repeating the headings: {}.",
        SUMMARIZER_BACKSTORY,
        template.headings.join(", ")
    );
    if let Some(cap) = template.word_cap {
        system.push_str(&format!(
            "\nThe whole brief must fit on one page: well under {} words in total.",
            cap
        ));
    }

    base.role(SUMMARIZER_ROLE)
        .goal(format!(
            "Create an exceptional {} that transforms research data into actionable insights",
            template.format.label()
        ))
        .system(system)
        .output_schema(sections_schema(template))
}

/// Emailer: writes the cover note wrapped around the report.
pub fn emailer(base: AgentConfig) -> AgentConfig {
    base.role(EMAILER_ROLE)
        .goal("Compose a professional cover note for a research report")
        .system(EMAILER_BACKSTORY)
        .output_schema(cover_note_schema())
}

/// `{"findings": [{"claim", "sources": [url]}]}`. The count is capped after
/// citations are resolved, so surplus findings are not an error here.
pub fn findings_schema() -> Value {
    json!({
        "type": "object",
        "required": ["findings"],
        "properties": {
            "findings": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["claim", "sources"],
                    "properties": {
                        "claim": {"type": "string", "minLength": 1},
                        "sources": {
                            "type": "array",
                            "minItems": 1,
                            "items": {"type": "string"}
                        }
                    }
                }
            }
        }
    })
}

/// `{"sections": {heading: markdown}}` with every template heading required.
pub fn sections_schema(template: &Template) -> Value {
    let properties: serde_json::Map<String, Value> = template
        .headings
        .iter()
        .map(|h| (h.to_string(), json!({"type": "string", "minLength": 1})))
        .collect();

    json!({
        "type": "object",
        "required": ["sections"],
        "properties": {
            "sections": {
                "type": "object",
                "required": template.headings,
                "properties": properties
            }
        }
    })
}

pub fn cover_note_schema() -> Value {
    let field = json!({"type": "string", "minLength": 1});
    json!({
        "type": "object",
        "required": ["subject", "greeting", "introduction", "closing"],
        "properties": {
            "subject": field,
            "greeting": field,
            "introduction": field,
            "closing": field
        }
    })
}

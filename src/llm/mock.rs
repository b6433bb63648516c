//! Scripted LLM for tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

use super::{GenerateOptions, LlmClient, Message, Response, Role};
use crate::error::LlmError;

type Reply = Result<String, LlmError>;

struct Rule {
    system_contains: String,
    replies: VecDeque<Reply>,
    /// Served once the queue is empty
    last: Option<Reply>,
}

/// Replies are chosen by matching a substring of the system prompt, so each
/// agent role can be scripted independently. A rule keeps repeating its last
/// reply once its queue runs dry.
#[derive(Default)]
pub struct ScriptedLlm {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for agents whose system prompt contains `needle`.
    pub fn reply_when(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.push(needle.into(), Ok(reply.into()));
        self
    }

    /// Queue a failure for agents whose system prompt contains `needle`.
    pub fn fail_when(self, needle: impl Into<String>, error: LlmError) -> Self {
        self.push(needle.into(), Err(error));
        self
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Times at which completions were served.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, needle: String, reply: Reply) {
        if let Ok(mut rules) = self.rules.lock() {
            match rules.iter_mut().find(|r| r.system_contains == needle) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    system_contains: needle,
                    replies: VecDeque::from([reply]),
                    last: None,
                }),
            }
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(
        &self,
        _model: &str,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<Response, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Instant::now());
        }

        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let reply = self.rules.lock().ok().and_then(|mut rules| {
            let rule = rules
                .iter_mut()
                .find(|r| system.contains(&r.system_contains))?;
            match rule.replies.pop_front() {
                Some(reply) => {
                    rule.last = Some(reply.clone());
                    Some(reply)
                }
                None => rule.last.clone(),
            }
        });

        match reply {
            Some(Ok(text)) => Ok(Response {
                text,
                tokens_used: None,
            }),
            Some(Err(e)) => Err(e),
            None => Err(LlmError {
                status: None,
                message: "no scripted reply for this prompt".to_string(),
                transient: false,
            }),
        }
    }
}

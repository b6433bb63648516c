//! Agent events and callbacks for observability.

use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Events emitted during agent execution for observability.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Starting a new iteration
    IterationStart {
        iteration: usize,
        max_iterations: usize,
    },
    /// About to call the LLM
    LLMRequest { message_count: usize },
    /// LLM responded
    LLMResponse {
        content: String,
        tokens_used: Option<usize>,
    },
    /// Agent is thinking (extracted from <think> tags)
    Thinking { content: String },
    /// A tool was called
    ToolCall { name: String, args: Value },
    /// A tool returned
    ToolResult {
        name: String,
        output: String,
        success: bool,
    },
    /// Agent produced its final answer
    Finish { value: Value },
    /// An error occurred
    Error { message: String },
}

/// Type alias for event callbacks
pub type EventCallback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Observer and capture buffer for agent events
#[derive(Default, Clone)]
pub struct AgentCallbacks {
    pub on_event: Option<EventCallback>,
    /// Captured events, for inspection after a run
    pub(crate) captured_events: Option<Arc<Mutex<Vec<AgentEvent>>>>,
}

impl AgentCallbacks {
    pub fn emit(&self, event: &AgentEvent) {
        if let Some(ref events) = self.captured_events
            && let Ok(mut events) = events.lock()
        {
            events.push(event.clone());
        }
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let cut: String = text.chars().take(max_chars).collect();
    let suffix = if text.chars().count() > max_chars { "..." } else { "" };
    format!("{}{}", cut.replace('\n', "\\n"), suffix)
}

/// Callbacks that log every event through `tracing`, tagged with the role.
pub fn verbose_callbacks(role: &str) -> AgentCallbacks {
    let role: Arc<str> = Arc::from(role);
    let r = role.clone();
    let on_event: EventCallback = Arc::new(move |e| match e {
        AgentEvent::IterationStart {
            iteration,
            max_iterations,
        } => tracing::debug!(role = %r, "iteration {}/{}", iteration, max_iterations),
        AgentEvent::LLMRequest { message_count } => {
            tracing::debug!(role = %r, message_count, "calling LLM")
        }
        AgentEvent::LLMResponse {
            content,
            tokens_used,
        } => tracing::debug!(role = %r, ?tokens_used, "LLM: {}", preview(content, 100)),
        AgentEvent::Thinking { content } => {
            tracing::debug!(role = %r, "thinking: {}", preview(content, 100))
        }
        AgentEvent::ToolCall { name, args } => {
            tracing::debug!(role = %r, tool = %name, "tool call: {}", preview(&args.to_string(), 80))
        }
        AgentEvent::ToolResult {
            name,
            output,
            success,
        } => {
            let status = if *success { "✓" } else { "✗" };
            tracing::debug!(role = %r, tool = %name, "{} {}", status, preview(output, 80))
        }
        AgentEvent::Finish { value } => {
            tracing::debug!(role = %r, "finish: {}", preview(&value.to_string(), 100))
        }
        AgentEvent::Error { message } => tracing::warn!(role = %r, "agent error: {}", message),
    });

    AgentCallbacks {
        on_event: Some(on_event),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_observer_and_capture_both_see_events() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let callbacks = AgentCallbacks {
            on_event: Some(Arc::new(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            captured_events: Some(Arc::new(Mutex::new(Vec::new()))),
        };

        callbacks.emit(&AgentEvent::ToolCall {
            name: "search".to_string(),
            args: serde_json::json!({"query": "rust"}),
        });
        callbacks.emit(&AgentEvent::LLMRequest { message_count: 2 });

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        let captured = callbacks.captured_events.unwrap();
        assert_eq!(captured.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo\nworld", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }
}

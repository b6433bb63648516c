//! Tool-using agent implementation.
//!
//! The agent asks the LLM for either a `<tool_call>` block, which is executed
//! and fed back, or a `<finish>` block holding the final JSON answer. The
//! answer is checked against the role's output schema and deserialized into
//! the caller's type. Every LLM request passes through an optional
//! [`LlmGate`] that applies the shared rate limit and retry policy.

mod config;
mod events;
mod prompt;
mod tool;

pub use config::AgentConfig;
pub use events::AgentEvent;
pub use tool::{Tool, ToolArg, ToolInfo};

use crate::context::Context;
use crate::error::{Error, LlmError, Result};
use crate::llm::{GenerateOptions, LlmClient, Message, Response};
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryPolicy, execute_with_retry};
use events::{AgentCallbacks, verbose_callbacks};
use prompt::{DEFAULT_SYSTEM, NO_TOOLS, SCHEMA_SECTION, SYSTEM_PROMPT_TEMPLATE, fill};
use regex::Regex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Rate limit and retry policy applied to every LLM request.
#[derive(Clone)]
pub struct LlmGate {
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
}

#[derive(Deserialize)]
struct ToolCallRequest {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// A tool-using agent driven by an LLM.
pub struct Agent {
    client: Arc<dyn LlmClient>,
    config: AgentConfig,
    tools: Vec<Arc<dyn Tool>>,
    messages: Vec<Message>,
    gate: Option<LlmGate>,
    tool_regex: Regex,
    /// Regex to match <finish>...</finish> blocks (direct structured output)
    finish_regex: Regex,
    think_regex: Regex,
    /// Shared context for data passing between agents
    context: Option<Context>,
    /// Keys to read from context and inject into prompt
    context_reads: Vec<String>,
    /// Key to write output to in context
    context_write: Option<String>,
    /// Callbacks for observability
    callbacks: AgentCallbacks,
}

impl Agent {
    /// Create a new agent with the given configuration.
    pub fn new(config: AgentConfig, client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            config,
            tools: Vec::new(),
            messages: Vec::new(),
            gate: None,
            tool_regex: Regex::new(r"<tool_call>\s*([\s\S]*?)</tool_call>").unwrap(),
            finish_regex: Regex::new(r"<finish>\s*([\s\S]*?)</finish>").unwrap(),
            think_regex: Regex::new(r"<think>\s*([\s\S]*?)</think>").unwrap(),
            context: None,
            context_reads: Vec::new(),
            context_write: None,
            callbacks: AgentCallbacks::default(),
        }
    }

    /// Route every LLM request through the given rate limit and retry policy.
    pub fn gate(mut self, gate: LlmGate) -> Self {
        self.gate = Some(gate);
        self
    }

    // =========================================================================
    // Builder methods for callbacks
    // =========================================================================

    /// Log every agent event through `tracing` at debug level.
    pub fn verbose(mut self, enabled: bool) -> Self {
        if enabled {
            let captured = self.callbacks.captured_events.take();
            self.callbacks = verbose_callbacks(&self.config.role);
            self.callbacks.captured_events = captured;
        }
        self
    }

    /// Record every event for later inspection with [`Agent::take_events`].
    pub fn capture_events(mut self, enabled: bool) -> Self {
        self.callbacks.captured_events = if enabled {
            Some(Arc::new(Mutex::new(Vec::new())))
        } else {
            None
        };
        self
    }

    /// Take captured events.
    pub fn take_events(&mut self) -> Vec<AgentEvent> {
        if let Some(ref events) = self.callbacks.captured_events
            && let Ok(mut events) = events.lock()
        {
            return std::mem::take(&mut *events);
        }
        Vec::new()
    }

    // =========================================================================
    // Context methods
    // =========================================================================

    /// Read data from a shared context and inject it into the agent's prompt.
    pub fn from_context(mut self, ctx: &Context, key: &str) -> Self {
        if self.context.is_none() {
            self.context = Some(ctx.clone());
        }
        self.context_reads.push(key.to_string());
        self
    }

    /// Save the agent's output to a shared context.
    pub fn to_context(mut self, ctx: &Context, key: &str) -> Self {
        if self.context.is_none() {
            self.context = Some(ctx.clone());
        }
        self.context_write = Some(key.to_string());
        self
    }

    // =========================================================================
    // Tool registration
    // =========================================================================

    /// Register a tool the model may call.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.push(Arc::new(tool));
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the conversation history.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn emit(&self, event: AgentEvent) {
        self.callbacks.emit(&event);
    }

    fn tool_docs(&self) -> String {
        if self.tools.is_empty() {
            return NO_TOOLS.to_string();
        }
        self.tools
            .iter()
            .map(|t| t.info().describe())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Inject context data into the task prompt.
    fn inject_context_into_task(&self, task: &str) -> String {
        let Some(ctx) = &self.context else {
            return task.to_string();
        };

        let injections: Vec<String> = self
            .context_reads
            .iter()
            .filter_map(|key| {
                let value = ctx.get_raw(key)?;
                let formatted = serde_json::to_string_pretty(&value).unwrap_or_default();
                Some(format!("=== {} ===\n{}", key.to_uppercase(), formatted))
            })
            .collect();

        if injections.is_empty() {
            task.to_string()
        } else {
            format!(
                "<context>\n{}\n</context>\n\n{}",
                injections.join("\n\n"),
                task
            )
        }
    }

    fn save_to_context<T: Serialize>(&self, result: &T) {
        if let (Some(ctx), Some(key)) = (&self.context, &self.context_write) {
            ctx.set(key, result);
        }
    }

    /// Build the system prompt with role, tool documentation and schema.
    fn system_prompt(&self) -> String {
        let system = self.config.system.as_deref().unwrap_or(DEFAULT_SYSTEM);
        let goal = self
            .config
            .goal
            .as_deref()
            .map(|g| format!("Your goal: {}\n", g))
            .unwrap_or_default();
        let schema = self
            .config
            .output_schema
            .as_ref()
            .map(|s| {
                let pretty = serde_json::to_string_pretty(s).unwrap_or_default();
                fill(SCHEMA_SECTION, &[("schema", pretty.as_str())])
            })
            .unwrap_or_default();

        let tools = self.tool_docs();
        fill(
            SYSTEM_PROMPT_TEMPLATE,
            &[
                ("role", self.config.role.as_str()),
                ("goal", goal.as_str()),
                ("system", system),
                ("tools", tools.as_str()),
                ("schema", schema.as_str()),
            ],
        )
    }

    fn extract_tool_call(&self, text: &str) -> Option<String> {
        self.tool_regex
            .captures(text)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    /// Extract a direct finish block from a response.
    fn extract_finish(&self, text: &str) -> Option<String> {
        self.finish_regex
            .captures(text)
            .and_then(|cap| cap.get(1))
            .map(|m| strip_code_fence(m.as_str().trim()).to_string())
    }

    fn extract_thinking(&self, text: &str) -> Option<String> {
        self.think_regex
            .captures(text)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    /// Check the final answer against the output schema, then deserialize.
    fn accept<T: DeserializeOwned>(&self, value: &Value) -> std::result::Result<T, String> {
        if let Some(schema) = &self.config.output_schema {
            let validator = jsonschema::validator_for(schema)
                .map_err(|e| format!("output schema is invalid: {}", e))?;
            let problems: Vec<String> = validator
                .iter_errors(value)
                .map(|e| format!("{} (at '{}')", e, e.instance_path))
                .collect();
            if !problems.is_empty() {
                return Err(problems.join("; "));
            }
        }
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())
    }

    async fn run_tool(&self, raw: &str) -> String {
        let request: ToolCallRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => {
                return format!(
                    "Error: could not parse <tool_call> JSON ({}). Use {{\"name\": ..., \"arguments\": {{...}}}}.",
                    e
                );
            }
        };

        self.emit(AgentEvent::ToolCall {
            name: request.name.clone(),
            args: request.arguments.clone(),
        });

        let tool = self.tools.iter().find(|t| t.info().name == request.name);
        let (output, success) = match tool {
            Some(tool) => match tool.call(request.arguments).await {
                Ok(output) => (output, true),
                Err(e) => (format!("Error: {}", e), false),
            },
            None => (format!("Error: unknown tool '{}'", request.name), false),
        };

        self.emit(AgentEvent::ToolResult {
            name: request.name,
            output: output.clone(),
            success,
        });
        output
    }

    /// Messages sent for the next turn. Without memory only the system
    /// prompt, the task and the latest exchange are kept.
    fn outgoing_messages(&self) -> Vec<Message> {
        if self.config.memory || self.messages.len() <= 4 {
            return self.messages.clone();
        }
        let mut window = self.messages[..2].to_vec();
        window.extend_from_slice(&self.messages[self.messages.len() - 2..]);
        window
    }

    /// Call the LLM with current messages, honoring the gate.
    async fn call_llm(&self) -> Result<Response> {
        let options = GenerateOptions {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let messages = self.outgoing_messages();
        let model = self.config.model.as_str();
        let client = &self.client;
        let gate = self.gate.as_ref();
        let (messages, options) = (&messages, &options);

        let attempt = move || async move {
            if let Some(gate) = gate {
                gate.limiter.acquire().await;
            }
            client.generate(model, messages, options).await
        };

        let response = match gate {
            Some(gate) => {
                execute_with_retry(&gate.retry, |e: &LlmError| e.transient, attempt).await?
            }
            None => attempt().await?,
        };
        Ok(response)
    }

    /// Push a correction and report whether another turn is available.
    fn correct(&mut self, iterations: usize, problem: String, output: &str) -> Result<()> {
        self.emit(AgentEvent::Error {
            message: problem.clone(),
        });
        if iterations >= self.config.max_iterations {
            return Err(Error::InvalidOutput(problem));
        }
        self.messages.push(Message::user(format!(
            "Error in your answer:\n\n{}\n\nYour output:\n```\n{}\n```\n\nPlease fix it and reply with a <finish> block.",
            problem, output
        )));
        Ok(())
    }

    // =========================================================================
    // Main run loop
    // =========================================================================

    /// Run the agent on a task and return the result as the specified type.
    pub async fn run<T>(&mut self, task: &str) -> Result<T>
    where
        T: DeserializeOwned + Serialize,
    {
        let task_with_context = self.inject_context_into_task(task);

        self.messages.clear();
        self.messages.push(Message::system(self.system_prompt()));
        self.messages.push(Message::user(task_with_context));

        let mut iterations = 0;

        loop {
            iterations += 1;

            if iterations > self.config.max_iterations {
                self.emit(AgentEvent::Error {
                    message: format!("Max iterations ({}) reached", self.config.max_iterations),
                });
                return Err(Error::MaxIterations(self.config.max_iterations));
            }

            self.emit(AgentEvent::IterationStart {
                iteration: iterations,
                max_iterations: self.config.max_iterations,
            });
            self.emit(AgentEvent::LLMRequest {
                message_count: self.outgoing_messages().len(),
            });

            let response = match self.call_llm().await {
                Ok(response) => response,
                Err(e) => {
                    self.emit(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };
            let text = response.text;

            self.emit(AgentEvent::LLMResponse {
                content: text.clone(),
                tokens_used: response.tokens_used,
            });
            if let Some(thinking) = self.extract_thinking(&text) {
                self.emit(AgentEvent::Thinking { content: thinking });
            }
            self.messages.push(Message::assistant(text.clone()));

            // A finish block wins over any tool call in the same response
            if let Some(finish_content) = self.extract_finish(&text) {
                let value: Value = match serde_json::from_str(&finish_content) {
                    Ok(value) => value,
                    Err(e) => {
                        self.correct(
                            iterations,
                            format!("Invalid JSON in <finish> block: {}", e),
                            &finish_content,
                        )?;
                        continue;
                    }
                };
                match self.accept::<T>(&value) {
                    Ok(result) => {
                        self.emit(AgentEvent::Finish { value });
                        self.save_to_context(&result);
                        return Ok(result);
                    }
                    Err(problem) => {
                        self.correct(
                            iterations,
                            format!("<finish> does not match the output schema: {}", problem),
                            &finish_content,
                        )?;
                        continue;
                    }
                }
            }

            if let Some(call) = self.extract_tool_call(&text) {
                let output = self.run_tool(&call).await;
                self.messages.push(Message::user(format!(
                    "Tool output:\n```\n{}\n```",
                    output
                )));
                continue;
            }

            // No block at all: accept a bare JSON (or plain string) answer
            let bare = strip_code_fence(text.trim());
            let value = serde_json::from_str::<Value>(bare)
                .unwrap_or_else(|_| Value::String(text.clone()));
            match self.accept::<T>(&value) {
                Ok(result) => {
                    self.emit(AgentEvent::Finish { value });
                    self.save_to_context(&result);
                    return Ok(result);
                }
                Err(problem) => {
                    self.correct(
                        iterations,
                        format!("No <finish> or <tool_call> block found ({})", problem),
                        &text,
                    )?;
                }
            }
        }
    }
}

/// Strip a surrounding ```json fence, which models add out of habit.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

//! Agent configuration.

use serde_json::Value;

/// Model parameters plus the role bundle (role, goal, backstory, output
/// schema) that makes an agent a researcher, summarizer or emailer.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// The model to use (e.g., "gemini-2.5-flash", "gpt-4o")
    pub model: String,
    /// Maximum number of LLM turns
    pub max_iterations: usize,
    /// Temperature for LLM sampling
    pub temperature: Option<f32>,
    /// Maximum tokens for LLM response
    pub max_tokens: Option<u32>,
    /// Send the whole conversation each turn instead of only the task and
    /// the latest exchange
    pub memory: bool,
    /// Role title, e.g. "Senior Web Research Specialist"
    pub role: String,
    pub goal: Option<String>,
    /// Custom system description (embedded in the full prompt template)
    pub system: Option<String>,
    /// JSON schema the `<finish>` payload must satisfy
    pub output_schema: Option<Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            max_iterations: 5,
            temperature: Some(0.7),
            max_tokens: Some(4096),
            memory: true,
            role: "Assistant".to_string(),
            goal: None,
            system: None,
            output_schema: None,
        }
    }
}

impl AgentConfig {
    /// Create a new config with the specified model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of iterations.
    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Set the temperature.
    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn memory(mut self, enabled: bool) -> Self {
        self.memory = enabled;
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    /// Set a custom system description (embedded in the full prompt template).
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

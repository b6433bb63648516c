//! Tools an agent may call between LLM turns.

use async_trait::async_trait;
use serde_json::Value;

/// One argument in a tool signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolArg {
    pub name: String,
    pub ty: String,
    pub description: String,
    pub required: bool,
}

/// Name, description and signature shown to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub args: Vec<ToolArg>,
    pub returns: String,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: Vec::new(),
            returns: "str".to_string(),
        }
    }

    pub fn arg_required(self, name: &str, ty: &str, description: &str) -> Self {
        self.arg(name, ty, description, true)
    }

    pub fn arg_optional(self, name: &str, ty: &str, description: &str) -> Self {
        self.arg(name, ty, description, false)
    }

    pub fn returns(mut self, ty: &str) -> Self {
        self.returns = ty.to_string();
        self
    }

    fn arg(mut self, name: &str, ty: &str, description: &str, required: bool) -> Self {
        self.args.push(ToolArg {
            name: name.to_string(),
            ty: ty.to_string(),
            description: description.to_string(),
            required,
        });
        self
    }

    /// Signature plus argument docs, as listed in the system prompt.
    pub fn describe(&self) -> String {
        let signature: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                if a.required {
                    format!("{}: {}", a.name, a.ty)
                } else {
                    format!("{}?: {}", a.name, a.ty)
                }
            })
            .collect();

        let mut doc = format!(
            "{}({}) -> {}\n    {}",
            self.name,
            signature.join(", "),
            self.returns,
            self.description
        );
        for arg in &self.args {
            doc.push_str(&format!("\n    - {}: {}", arg.name, arg.description));
        }
        doc
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn info(&self) -> ToolInfo;

    /// Run the tool. `Err` text is shown to the model as a failed call.
    async fn call(&self, args: Value) -> Result<String, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_marks_optional_args() {
        let info = ToolInfo::new("search", "Search the web")
            .arg_required("query", "str", "The search query")
            .arg_optional("limit", "int", "Number of results")
            .returns("list");

        let doc = info.describe();
        assert!(doc.starts_with("search(query: str, limit?: int) -> list"));
        assert!(doc.contains("- query: The search query"));
        assert!(doc.contains("- limit: Number of results"));
    }
}

//! System prompt templates for tool-using agents.

/// Default system description
pub const DEFAULT_SYSTEM: &str =
    "You are a careful assistant that completes tasks using the tools provided.";

/// System prompt template. `{role}`, `{goal}`, `{system}`, `{tools}` and
/// `{schema}` are substituted per agent.
pub const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are the {role}.
{goal}
{system}

<tools>
{tools}
</tools>

<format>
To call a tool, reply with exactly one <tool_call> block holding JSON:

<tool_call>
{"name": "tool_name", "arguments": {"arg": "value"}}
</tool_call>

When you are done, reply with a <finish> block holding your final JSON answer:

<finish>
{"key": "value"}
</finish>
</format>
{schema}
<rules>
- Make ONE tool call per response, then STOP and wait for the result
- Do NOT invent tool results - you will see the actual output
- Only call tools listed above
- The <finish> block must contain valid JSON only, with \n for newlines inside strings
</rules>
"#;

/// Appended to the prompt when the agent has an output schema.
pub const SCHEMA_SECTION: &str = r#"
<output_schema>
Your <finish> JSON must satisfy this JSON schema:
{schema}
</output_schema>
"#;

/// Shown when an agent has no tools.
pub const NO_TOOLS: &str = "No tools available. Answer directly with a <finish> block.";

/// Substitute `{name}` placeholders in a single pass. Substituted text is
/// never scanned again, so values may contain braces freely.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let hit = values
            .iter()
            .find(|(name, _)| tail.starts_with(name) && tail[name.len()..].starts_with('}'));
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

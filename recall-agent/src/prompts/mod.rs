use crate::tools::ToolInfo;
use serde_json::Value;

pub fn build_help_text(tools: &[ToolInfo], custom_help: Option<String>) -> String {
    let tools_section = if tools.is_empty() {
        "No tools are registered.".to_string()
    } else {
        let tool_descriptions: Vec<String> = tools
            .iter()
            .map(|t| format!("  - {}: {}", t.name, t.description))
            .collect();
        format!("Available tools:\n{}", tool_descriptions.join("\n"))
    };

    let default_help = format!(
        r#"Currency conversion assistant with memory.

Commands:
  convert <amount> <from> <to>   Convert an amount (also: <amount> <from> to <to>)
  last                           Show the most recent conversion
  list [n]                       Show up to n recent conversions (default 5)
  again <to>                     Convert the last amount into another currency
  help                           Show this message
  exit | quit                    Save history and leave

{}"#,
        tools_section
    );

    match custom_help {
        Some(custom) if !custom.is_empty() => custom,
        _ => default_help,
    }
}

/// Extracts the human-readable text of a tool result, falling back to the
/// pretty-printed JSON.
pub fn render_tool_result(result: &Value) -> String {
    match result.get("result").and_then(|r| r.as_str()) {
        Some(text) => text.to_string(),
        None => serde_json::to_string_pretty(result).unwrap_or_default(),
    }
}

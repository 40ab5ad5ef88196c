use crate::memory::{SharedHistory, lock_history};
use crate::rates::{Conversion, ConversionError, RateTable};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_LIST_COUNT: usize = 5;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub type ToolFuture = BoxFuture<'static, Result<Value, ToolError>>;

pub trait ToolTrait: Send + Sync {
    fn info(&self) -> ToolInfo;
    fn execute(&self, arguments: Value) -> ToolFuture;
}

fn string_arg<'a>(arguments: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{}' argument", name)))
}

/// Accepts a JSON number or a numeric string.
fn number_arg(arguments: &Value, name: &str) -> Result<f64, ToolError> {
    match arguments.get(name) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or(ToolError::Conversion(ConversionError::InvalidAmount)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ToolError::Conversion(ConversionError::InvalidAmount)),
        Some(_) => Err(ToolError::Conversion(ConversionError::InvalidAmount)),
        None => Err(ToolError::InvalidArguments(format!("Missing '{}' argument", name))),
    }
}

/// Converts and remembers the rendered result. Identity conversions are
/// reported but not remembered.
async fn convert_and_remember(
    rates: &RateTable,
    history: SharedHistory,
    from: &str,
    to: &str,
    amount: f64,
) -> Result<String, ToolError> {
    let conversion = rates.convert(from, to, amount)?;
    let rendered = conversion.to_string();

    if !conversion.is_identity() {
        let entry = rendered.clone();
        // Appending may write the snapshot under `FlushPolicy::EveryAppend`.
        tokio::task::spawn_blocking(move || lock_history(&history).append(entry))
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
    }

    debug!(result = %rendered, "conversion performed");
    Ok(rendered)
}

fn reply(text: impl Into<String>) -> Value {
    serde_json::json!({
        "success": true,
        "result": text.into()
    })
}

pub struct ConvertCurrencyTool {
    rates: Arc<RateTable>,
    history: SharedHistory,
}

impl ConvertCurrencyTool {
    pub fn new(rates: Arc<RateTable>, history: SharedHistory) -> Self {
        Self { rates, history }
    }
}

impl ToolTrait for ConvertCurrencyTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "convert_currency".to_string(),
            description: "Convert an amount from one currency to another using USD base rates"
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "from_currency": {
                        "type": "string",
                        "description": "ISO-4217 code to convert from (e.g. USD)"
                    },
                    "to_currency": {
                        "type": "string",
                        "description": "ISO-4217 code to convert to (e.g. EUR)"
                    },
                    "amount": {
                        "type": "number",
                        "description": "Amount to convert"
                    }
                },
                "required": ["from_currency", "to_currency", "amount"]
            }),
        }
    }

    fn execute(&self, arguments: Value) -> ToolFuture {
        let rates = Arc::clone(&self.rates);
        let history = Arc::clone(&self.history);
        Box::pin(async move {
            let from = string_arg(&arguments, "from_currency")?;
            let to = string_arg(&arguments, "to_currency")?;
            let amount = number_arg(&arguments, "amount")?;

            let rendered = convert_and_remember(&rates, history, from, to, amount).await?;
            Ok(reply(rendered))
        })
    }
}

pub struct RecallLastConversionTool {
    history: SharedHistory,
}

impl RecallLastConversionTool {
    pub fn new(history: SharedHistory) -> Self {
        Self { history }
    }
}

impl ToolTrait for RecallLastConversionTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "recall_last_conversion".to_string(),
            description: "Retrieve the most recent conversion from memory".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    fn execute(&self, _arguments: Value) -> ToolFuture {
        let history = Arc::clone(&self.history);
        Box::pin(async move {
            let last = lock_history(&history).last().map(str::to_string);
            Ok(match last {
                Some(entry) => reply(format!(
                    "For reference only (do NOT reconvert): {}",
                    entry
                )),
                None => reply("No conversions performed yet."),
            })
        })
    }
}

pub struct ListConversionsTool {
    history: SharedHistory,
}

impl ListConversionsTool {
    pub fn new(history: SharedHistory) -> Self {
        Self { history }
    }
}

impl ToolTrait for ListConversionsTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "list_conversions".to_string(),
            description: "List the most recent conversions, oldest first".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "n": {
                        "type": "integer",
                        "description": "How many recent entries to show (default: 5)"
                    }
                }
            }),
        }
    }

    fn execute(&self, arguments: Value) -> ToolFuture {
        let history = Arc::clone(&self.history);
        Box::pin(async move {
            let n = match arguments.get("n") {
                None | Some(Value::Null) => DEFAULT_LIST_COUNT,
                Some(value) => value
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        ToolError::InvalidArguments(
                            "'n' must be a non-negative integer".to_string(),
                        )
                    })?,
            };

            let recent = lock_history(&history).recent(n);
            if recent.is_empty() {
                return Ok(reply("No history yet."));
            }
            Ok(reply(recent.join("\n")))
        })
    }
}

pub struct ConvertLastToTool {
    rates: Arc<RateTable>,
    history: SharedHistory,
}

impl ConvertLastToTool {
    pub fn new(rates: Arc<RateTable>, history: SharedHistory) -> Self {
        Self { rates, history }
    }
}

impl ToolTrait for ConvertLastToTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "convert_last_to".to_string(),
            description:
                "Convert the amount and source currency of the last conversion into a new currency"
                    .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "to_currency": {
                        "type": "string",
                        "description": "ISO-4217 code to convert to"
                    }
                },
                "required": ["to_currency"]
            }),
        }
    }

    fn execute(&self, arguments: Value) -> ToolFuture {
        let rates = Arc::clone(&self.rates);
        let history = Arc::clone(&self.history);
        Box::pin(async move {
            let to = string_arg(&arguments, "to_currency")?;

            let last = lock_history(&history).last().map(str::to_string);
            let Some(last) = last else {
                return Ok(reply("No previous conversion to repeat."));
            };

            let (amount, from) = Conversion::parse_source(&last).ok_or_else(|| {
                ToolError::ExecutionFailed(format!("could not parse last conversion: {}", last))
            })?;

            let rendered = convert_and_remember(&rates, history, &from, to, amount).await?;
            Ok(reply(rendered))
        })
    }
}

pub struct ToolManager {
    tools: HashMap<String, Box<dyn ToolTrait>>,
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolManager {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn ToolTrait>) {
        self.tools.insert(tool.info().name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolTrait> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_definitions(&self) -> Vec<ToolInfo> {
        let mut definitions: Vec<ToolInfo> =
            self.tools.values().map(|tool| tool.info()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(format!("Unknown tool: {}", name)))?;

        debug!(tool = name, %arguments, "calling tool");
        tool.execute(arguments).await
    }
}

pub fn currency_tools(rates: Arc<RateTable>, history: SharedHistory) -> ToolManager {
    let mut manager = ToolManager::new();

    manager.register(Box::new(ConvertCurrencyTool::new(
        Arc::clone(&rates),
        Arc::clone(&history),
    )));
    manager.register(Box::new(RecallLastConversionTool::new(Arc::clone(&history))));
    manager.register(Box::new(ListConversionsTool::new(Arc::clone(&history))));
    manager.register(Box::new(ConvertLastToTool::new(rates, history)));

    manager
}

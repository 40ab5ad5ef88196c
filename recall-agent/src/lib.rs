pub mod config;
pub mod memory;
pub mod prompts;
pub mod rates;
pub mod session;
pub mod tools;

pub use config::AgentConfig;
pub use memory::{
    BoundedHistory, FlushPolicy, HistoryError, HistoryGuard, ReadFailure, SharedHistory,
    SnapshotStore, lock_history,
};
pub use prompts::{build_help_text, render_tool_result};
pub use rates::{Conversion, ConversionError, RateTable, load_rates};
pub use session::{Command, ReplExit, Reply, Session, SessionError, parse_command, run_repl};
pub use tools::{ToolError, ToolInfo, ToolManager, ToolTrait, currency_tools};

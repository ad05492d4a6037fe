//! Chat orchestration for Parley.
//!
//! Decides which tools a message calls for, runs them through a
//! [`ToolExecutor`](parley_types::ToolExecutor), and merges what comes back
//! into the prompt sent to the provider.

mod chat;
pub mod selection;

pub use chat::{ChatEvent, ChatOrchestrator, ChatReply, TOOL_RESULTS_PREAMBLE, ToolResult, merge_tool_results};
pub use selection::{DEFAULT_TIMEZONE, SelectionPolicy};

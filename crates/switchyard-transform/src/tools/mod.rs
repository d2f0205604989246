//! Tool definition validation, reshaping and tool-call extraction.

pub mod handler;
pub mod streaming;
pub mod types;

pub use handler::{
    create_tool_result_message, extract_tool_uses, normalize_tool, tool_call_names,
    transform_tools_for_provider, unmatched_tool_results, validate_tool_definition,
};
pub use streaming::{extract_tool_use_starts, ToolCallAccumulator, ToolUseStart};
pub use types::{ToolFormat, ToolResult, ToolUse};

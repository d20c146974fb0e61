pub mod parser;
pub mod tool_call;

pub use parser::{ResponseParser, StreamEvent, parse_stream};
pub use tool_call::{
    ScanOutput, TOOL_CALL_CLOSE, TOOL_CALL_OPEN, ToolCall, ToolCallScanner,
    WEB_SEARCH_DISPLAY_NAME, WEB_SEARCH_TOOL,
};

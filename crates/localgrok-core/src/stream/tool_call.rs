//! Incremental detection of the in-band tool-call directive
//! `<tool_call>{"name":"web_search","query":"..."}</tool_call>`.

use serde::Deserialize;
use tracing::debug;

pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// The only tool the model may call.
pub const WEB_SEARCH_TOOL: &str = "web_search";

/// Label shown while the search runs and stored on the message afterwards.
pub const WEB_SEARCH_DISPLAY_NAME: &str = "Searching the web";

/// Captures longer than this without a closing tag are given up on.
const MAX_CAPTURE_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub query: String,
}

#[derive(Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    query: Option<String>,
    /// Some models nest the query as `{"arguments":{"query":"..."}}`.
    #[serde(default)]
    arguments: Option<RawArguments>,
}

#[derive(Deserialize)]
struct RawArguments {
    #[serde(default)]
    query: Option<String>,
}

/// Parse the text between the tags. `None` means the directive is not one we
/// act on and should be shown as ordinary text.
fn parse_directive(body: &str) -> Option<ToolCall> {
    let raw: RawToolCall = match serde_json::from_str(body.trim()) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Malformed tool call JSON, treating as content");
            return None;
        }
    };

    if raw.name != WEB_SEARCH_TOOL {
        debug!(name = %raw.name, "Ignoring unrecognized tool");
        return None;
    }

    let query = raw
        .query
        .or_else(|| raw.arguments.and_then(|a| a.query))?
        .trim()
        .to_string();

    if query.is_empty() {
        return None;
    }

    Some(ToolCall {
        name: raw.name,
        query,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Looking for the opening tag.
    Searching,
    /// Inside an opening tag, waiting for the closing one.
    Capturing,
    /// A directive was found, or detection is off. Everything passes through.
    Passthrough,
}

/// Result of feeding one fragment to the scanner.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanOutput {
    /// Text that is safe to show as answer content.
    pub content: String,
    pub tool_call: Option<ToolCall>,
}

/// Streaming scanner over answer text.
///
/// Fragments may split the tags anywhere, so text that could still turn into
/// an opening tag is held back until the next fragment settles it. At most
/// one directive is recognized; later tags are plain text.
#[derive(Debug)]
pub struct ToolCallScanner {
    state: ScanState,
    pending: String,
}

impl ToolCallScanner {
    pub fn new(enabled: bool) -> Self {
        Self {
            state: if enabled {
                ScanState::Searching
            } else {
                ScanState::Passthrough
            },
            pending: String::new(),
        }
    }

    pub fn push(&mut self, fragment: &str) -> ScanOutput {
        let mut out = ScanOutput::default();
        self.pending.push_str(fragment);

        loop {
            match self.state {
                ScanState::Passthrough => {
                    out.content.push_str(&self.pending);
                    self.pending.clear();
                    break;
                }
                ScanState::Searching => {
                    if let Some(start) = self.pending.find(TOOL_CALL_OPEN) {
                        out.content.push_str(&self.pending[..start]);
                        self.pending.drain(..start + TOOL_CALL_OPEN.len());
                        self.state = ScanState::Capturing;
                        continue;
                    }

                    let keep = partial_open_suffix(&self.pending);
                    let emit_to = self.pending.len() - keep;
                    out.content.push_str(&self.pending[..emit_to]);
                    self.pending.drain(..emit_to);
                    break;
                }
                ScanState::Capturing => {
                    if let Some(end) = self.pending.find(TOOL_CALL_CLOSE) {
                        let body: String = self.pending.drain(..end).collect();
                        self.pending.drain(..TOOL_CALL_CLOSE.len());

                        match parse_directive(&body) {
                            Some(call) => {
                                out.tool_call = Some(call);
                                self.state = ScanState::Passthrough;
                            }
                            None => {
                                out.content.push_str(TOOL_CALL_OPEN);
                                out.content.push_str(&body);
                                out.content.push_str(TOOL_CALL_CLOSE);
                                self.state = ScanState::Searching;
                            }
                        }
                        continue;
                    }

                    if self.pending.len() > MAX_CAPTURE_BYTES {
                        debug!("Tool call capture overflowed, treating as content");
                        out.content.push_str(TOOL_CALL_OPEN);
                        out.content.push_str(&self.pending);
                        self.pending.clear();
                        self.state = ScanState::Searching;
                    }
                    break;
                }
            }
        }

        out
    }

    /// End of input: release anything held back as plain text.
    pub fn finish(&mut self) -> String {
        let mut rest = String::new();
        if self.state == ScanState::Capturing {
            rest.push_str(TOOL_CALL_OPEN);
            self.state = ScanState::Searching;
        }
        rest.push_str(&self.pending);
        self.pending.clear();
        rest
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the
/// opening tag.
fn partial_open_suffix(text: &str) -> usize {
    (1..TOOL_CALL_OPEN.len())
        .rev()
        .find(|&k| text.ends_with(&TOOL_CALL_OPEN[..k]))
        .unwrap_or(0)
}

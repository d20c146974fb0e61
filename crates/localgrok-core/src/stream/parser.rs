use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, warn};

use super::tool_call::ToolCallScanner;
use crate::services::{ByteStream, ChatChunk};

/// Semantic events produced from one streaming chat response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ThinkingDelta(String),
    ContentDelta(String),
    ToolCallDetected { name: String, query: String },
    Done { content: String, reasoning: String },
    Failed(String),
}

/// Line-level state machine behind [`parse_stream`].
///
/// Feed it complete NDJSON lines; it yields deltas in order and exactly one
/// terminal event. Thinking is only accepted until the first answer text.
pub struct ResponseParser {
    scanner: ToolCallScanner,
    content: String,
    reasoning: String,
    answering: bool,
    usable_lines: usize,
    finished: bool,
}

impl ResponseParser {
    pub fn new(tool_detection: bool) -> Self {
        Self {
            scanner: ToolCallScanner::new(tool_detection),
            content: String::new(),
            reasoning: String::new(),
            answering: false,
            usable_lines: 0,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn feed_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let line = line.trim();
        if self.finished || line.is_empty() {
            return events;
        }

        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, line_len = line.len(), "Skipping malformed stream line");
                return events;
            }
        };
        self.usable_lines += 1;

        if let Some(error) = chunk.error {
            self.finished = true;
            events.push(StreamEvent::Failed(error));
            return events;
        }

        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                if self.answering {
                    debug!("Ignoring thinking text after the answer started");
                } else {
                    self.reasoning.push_str(&thinking);
                    events.push(StreamEvent::ThinkingDelta(thinking));
                }
            }

            if let Some(content) = message.content.filter(|c| !c.is_empty()) {
                self.answering = true;
                let scanned = self.scanner.push(&content);
                self.push_content(scanned.content, &mut events);
                if let Some(call) = scanned.tool_call {
                    debug!(tool = %call.name, query = %call.query, "Tool call detected");
                    events.push(StreamEvent::ToolCallDetected {
                        name: call.name,
                        query: call.query,
                    });
                }
            }
        }

        if chunk.done {
            if let Some(reason) = chunk.done_reason.as_deref() {
                debug!(reason, eval_count = ?chunk.eval_count, "Stream done");
            }
            events.extend(self.finish());
        }

        events
    }

    /// The byte stream closed. Without a single usable line this is a failure.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.finished = true;

        if self.usable_lines == 0 {
            events.push(StreamEvent::Failed(
                "The server closed the stream without a response".into(),
            ));
            return events;
        }

        let rest = self.scanner.finish();
        self.push_content(rest, &mut events);
        events.push(StreamEvent::Done {
            content: self.content.clone(),
            reasoning: self.reasoning.clone(),
        });
        events
    }

    /// Transport failure.
    pub fn fail(&mut self, reason: impl Into<String>) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![StreamEvent::Failed(reason.into())]
    }

    fn push_content(&mut self, text: String, events: &mut Vec<StreamEvent>) {
        if !text.is_empty() {
            self.content.push_str(&text);
            events.push(StreamEvent::ContentDelta(text));
        }
    }
}

/// Parse a raw NDJSON response body into [`StreamEvent`]s.
///
/// The returned stream ends right after its terminal event; dropping it drops
/// `body` and with it the connection.
pub fn parse_stream(body: ByteStream, tool_detection: bool) -> BoxStream<'static, StreamEvent> {
    async_stream::stream! {
        let mut body = body;
        let mut parser = ResponseParser::new(tool_detection);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        for event in parser.feed_line(&String::from_utf8_lossy(&line)) {
                            yield event;
                        }
                        if parser.is_finished() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    for event in parser.fail(e.to_string()) {
                        yield event;
                    }
                    return;
                }
            }
        }

        // Last line without a trailing newline.
        if !buffer.is_empty() {
            for event in parser.feed_line(&String::from_utf8_lossy(&buffer)) {
                yield event;
            }
        }
        for event in parser.finish() {
            yield event;
        }
    }
    .boxed()
}

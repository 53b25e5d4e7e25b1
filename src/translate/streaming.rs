//! State machine for translating upstream streaming chunks into Anthropic SSE events.
//!
//! The [`StreamTranslator`] processes chunks one at a time through the
//! [`ChunkView`] accessors, tracking the text block (always index 0) and one
//! tool block per distinct upstream tool index, and emits the corresponding
//! Anthropic stream events. [`translate_stream`] drives it over a live chunk
//! stream and guarantees every stream ends with a complete terminal sequence.

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent,
};
use super::response::map_finish_reason;
use super::view::{ChunkView, ToolCallFragment};
use crate::error::Result;

const TEXT_BLOCK_INDEX: usize = 0;

/// One frame of the outgoing SSE stream.
#[derive(Debug, Clone)]
pub enum SseFrame {
    Event(StreamEvent),
    /// The literal `data: [DONE]` terminator.
    Done,
}

impl SseFrame {
    #[must_use]
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            SseFrame::Event(event) => Some(event.event_name()),
            SseFrame::Done => None,
        }
    }

    /// The `data:` payload. Events that fail to serialize fall back to their
    /// debug rendering so the frame is still emitted.
    #[must_use]
    pub fn data(&self) -> String {
        match self {
            SseFrame::Event(event) => {
                serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"))
            }
            SseFrame::Done => "[DONE]".to_string(),
        }
    }

    /// Wire encoding: `event: <name>\ndata: <json>\n\n`.
    #[must_use]
    pub fn encode(&self) -> String {
        match self.event_name() {
            Some(name) => format!("event: {name}\ndata: {}\n\n", self.data()),
            None => format!("data: {}\n\n", self.data()),
        }
    }
}

impl From<StreamEvent> for SseFrame {
    fn from(event: StreamEvent) -> Self {
        SseFrame::Event(event)
    }
}

/// A tool block opened for one upstream tool index.
#[derive(Debug, Clone)]
struct ToolBlock {
    upstream_index: u64,
    block_index: usize,
    arguments: String,
}

/// Per-stream translation state.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
///   send(translator.preamble());
///   for chunk in chunks {
///       send(translator.process_chunk(&chunk)?);
///   }
///   send(translator.finish());
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    text_closed: bool,
    text_sent: bool,
    accumulated_text: String,
    tools: Vec<ToolBlock>,
    input_tokens: u64,
    output_tokens: u64,
    finished: bool,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            text_closed: false,
            text_sent: false,
            accumulated_text: String::new(),
            tools: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            finished: false,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// All text seen so far, streamed or not.
    #[must_use]
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// `message_start`, an empty text block at index 0, and a `ping`.
    /// Sent before the first upstream chunk is read.
    pub fn preamble(&self) -> Vec<SseFrame> {
        vec![
            StreamEvent::MessageStart {
                message: MessagesResponse::empty(&self.msg_id, &self.model),
            }
            .into(),
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            }
            .into(),
            StreamEvent::Ping.into(),
        ]
    }

    /// Process one upstream chunk, returning zero or more frames.
    ///
    /// A chunk whose content or tool calls cannot be read is rejected before
    /// any state changes, so the caller may skip it and keep going.
    pub fn process_chunk<C>(&mut self, chunk: &C) -> Result<Vec<SseFrame>>
    where
        C: ChunkView + ?Sized,
    {
        let content = chunk.content()?;
        let fragments = chunk.tool_calls()?;

        if self.finished {
            return Ok(Vec::new());
        }

        let mut frames = Vec::new();

        if let Some(usage) = chunk.usage() {
            self.input_tokens = usage.input_tokens;
            self.output_tokens = usage.output_tokens;
        }

        if let Some(text) = content.filter(|t| !t.is_empty()) {
            self.accumulated_text.push_str(&text);
            // Text after the first tool call is kept but not streamed.
            if self.tools.is_empty() && !self.text_closed {
                self.text_sent = true;
                frames.push(
                    StreamEvent::ContentBlockDelta {
                        index: TEXT_BLOCK_INDEX,
                        delta: Delta::TextDelta { text },
                    }
                    .into(),
                );
            }
        }

        if !fragments.is_empty() {
            if self.tools.is_empty() {
                self.close_text(&mut frames);
            }
            for fragment in fragments {
                self.tool_fragment(fragment, &mut frames);
            }
        }

        if let Some(reason) = chunk.finish_reason() {
            frames.extend(self.finalize(map_finish_reason(&reason)));
        }

        Ok(frames)
    }

    /// Terminal sequence for an upstream that closed without a finish reason.
    /// Empty if the stream was already finalized.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        self.finalize("end_turn")
    }

    /// Terminal sequence after an unrecoverable failure: `message_delta` with
    /// `stop_reason: "error"` and zero output tokens, `message_stop`, `[DONE]`.
    pub fn abort(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        vec![
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some("error".to_string()),
                    stop_sequence: None,
                },
                usage: DeltaUsage { output_tokens: 0 },
            }
            .into(),
            StreamEvent::MessageStop.into(),
            SseFrame::Done,
        ]
    }

    fn tool_fragment(&mut self, fragment: ToolCallFragment, frames: &mut Vec<SseFrame>) {
        let upstream_index = fragment.index;

        let position = match self
            .tools
            .iter()
            .position(|t| t.upstream_index == upstream_index)
        {
            Some(position) => position,
            None => {
                let block_index = self.tools.len() + 1;
                let id = fragment
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(new_tool_id);

                tracing::debug!(upstream_index, block_index, tool = ?fragment.name, "Opening tool block");

                frames.push(
                    StreamEvent::ContentBlockStart {
                        index: block_index,
                        content_block: ResponseContentBlock::ToolUse {
                            id,
                            name: fragment.name.unwrap_or_default(),
                            input: Value::Object(Map::new()),
                        },
                    }
                    .into(),
                );
                self.tools.push(ToolBlock {
                    upstream_index,
                    block_index,
                    arguments: String::new(),
                });
                self.tools.len() - 1
            }
        };

        if let Some(arguments) = fragment.arguments.filter(|a| !a.is_empty()) {
            let tool = &mut self.tools[position];
            tool.arguments.push_str(&arguments);
            // Fragments go out verbatim; they need not be valid JSON on their own.
            frames.push(
                StreamEvent::ContentBlockDelta {
                    index: tool.block_index,
                    delta: Delta::InputJsonDelta {
                        partial_json: arguments,
                    },
                }
                .into(),
            );
        }
    }

    fn close_text(&mut self, frames: &mut Vec<SseFrame>) {
        if self.text_closed {
            return;
        }
        if !self.text_sent && !self.accumulated_text.is_empty() {
            frames.push(
                StreamEvent::ContentBlockDelta {
                    index: TEXT_BLOCK_INDEX,
                    delta: Delta::TextDelta {
                        text: self.accumulated_text.clone(),
                    },
                }
                .into(),
            );
            self.text_sent = true;
        }
        frames.push(
            StreamEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            }
            .into(),
        );
        self.text_closed = true;
    }

    fn finalize(&mut self, stop_reason: &str) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut frames: Vec<SseFrame> = self
            .tools
            .iter()
            .map(|t| {
                StreamEvent::ContentBlockStop {
                    index: t.block_index,
                }
                .into()
            })
            .collect();

        self.close_text(&mut frames);

        frames.push(
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(stop_reason.to_string()),
                    stop_sequence: None,
                },
                usage: DeltaUsage {
                    output_tokens: self.output_tokens,
                },
            }
            .into(),
        );
        frames.push(StreamEvent::MessageStop.into());
        frames.push(SseFrame::Done);

        tracing::debug!(
            stop_reason,
            input_tokens = self.input_tokens,
            output_tokens = self.output_tokens,
            tool_blocks = self.tools.len(),
            "Stream finalized"
        );

        frames
    }
}

fn new_tool_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("toolu_{}", &hex[..24])
}

/// Drive a [`StreamTranslator`] over a live chunk stream.
///
/// Chunk-local failures (unreadable chunk payloads) are logged and skipped;
/// any other error ends the stream with the error terminal sequence. A stream
/// that closes without a finish reason is finalized with `end_turn`. Dropping
/// the returned stream drops the upstream with it.
pub fn translate_stream<S, C>(chunks: S, model: String) -> impl Stream<Item = SseFrame> + Send
where
    S: Stream<Item = Result<C>> + Send + 'static,
    C: ChunkView + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);
        for frame in translator.preamble() {
            yield frame;
        }

        let mut aborted = false;
        tokio::pin!(chunks);

        while let Some(item) = chunks.next().await {
            match item.and_then(|chunk| translator.process_chunk(&chunk)) {
                Ok(frames) => {
                    for frame in frames {
                        yield frame;
                    }
                }
                Err(e) if e.is_chunk_local() => {
                    tracing::warn!(error = %e, "Skipping unreadable stream chunk");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Stream failed");
                    for frame in translator.abort() {
                        yield frame;
                    }
                    aborted = true;
                    break;
                }
            }
        }

        if !aborted {
            for frame in translator.finish() {
                yield frame;
            }
        }
    }
}

//! State machine for translating an OpenAI SSE stream into Anthropic SSE events.
//!
//! The [`StreamTranscoder`] consumes the backend's raw SSE bytes one network chunk
//! at a time, parses complete `data:` lines into [`ChatCompletionChunk`]s, and
//! emits the corresponding Anthropic stream events (`message_start`,
//! `content_block_delta`, ...). Usage is only reported at end of stream, once the
//! final token counts and billed cost are known.
//!
//! Block bookkeeping invariants:
//! - every `content_block_start` gets exactly one `content_block_stop`, and all
//!   stops are emitted in a single closing pass (text first, then tools in the
//!   order they were opened);
//! - text takes index 0 when it arrives before any tool call;
//! - a tool call's output index is its backend index, shifted by one when a
//!   text block is open, and moved to the next free index on collision.

use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::debug;

use super::anthropic_types::{
    Delta, ErrorResponse, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent,
    Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};
use super::response::{map_finish_reason, message_id};
use crate::pricing::ModelPricing;
use crate::usage::UsageTally;

const DONE_SENTINEL: &str = "[DONE]";

/// One Server-Sent Event as written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn from_stream_event(event: &StreamEvent) -> Option<Self> {
        serde_json::to_string(event).ok().map(|data| Self {
            event: event.event_name().to_string(),
            data,
        })
    }

    /// Wire form: `event: <name>\ndata: <json>\n\n`.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.event, self.data))
    }
}

/// Encode a batch of events as one contiguous SSE byte chunk.
pub fn encode_events(events: &[StreamEvent]) -> Bytes {
    let mut out = Vec::new();
    for event in events.iter().filter_map(SseEvent::from_stream_event) {
        out.extend_from_slice(&event.to_bytes());
    }
    Bytes::from(out)
}

/// A backend tool call, keyed by its backend index.
#[derive(Debug, Default)]
struct ToolBlock {
    id: Option<String>,
    name: String,
    /// Set once `content_block_start` has been emitted.
    output_index: Option<usize>,
    /// Argument fragments that arrived before the call's id.
    pending_arguments: String,
}

/// Translates one backend response stream. Lives exactly as long as that stream.
#[derive(Debug)]
pub struct StreamTranscoder {
    model: String,
    pricing: Option<ModelPricing>,
    buffer: Vec<u8>,
    msg_id: Option<String>,
    usage: UsageTally,
    started: bool,
    text_index: Option<usize>,
    tools: BTreeMap<usize, ToolBlock>,
    /// Backend indices of opened tool blocks, in opening order.
    opened_tools: Vec<usize>,
    stop_reason: Option<&'static str>,
    blocks_closed: bool,
    finished: bool,
}

impl StreamTranscoder {
    /// `model` is what the client asked for; `pricing` is resolved once, before
    /// the stream starts, and never refetched.
    pub fn new(model: &str, pricing: Option<ModelPricing>) -> Self {
        Self {
            model: model.to_string(),
            pricing,
            buffer: Vec::new(),
            msg_id: None,
            usage: UsageTally::default(),
            started: false,
            text_index: None,
            tools: BTreeMap::new(),
            opened_tools: Vec::new(),
            stop_reason: None,
            blocks_closed: false,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw backend bytes. A trailing partial line is held until the next call.
    pub fn transform(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.append(&mut self.process_line(&line));
        }
        events
    }

    /// The backend closed its side. Flushes any unterminated last line and
    /// completes the event sequence if no sentinel was seen.
    pub fn end_of_input(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let mut events = self.process_line(&rest);
        events.append(&mut self.finish());
        events
    }

    fn process_line(&mut self, line: &[u8]) -> Vec<StreamEvent> {
        let line = String::from_utf8_lossy(line);
        let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
            return Vec::new();
        };

        if data == DONE_SENTINEL {
            return self.finish();
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.process_chunk(&chunk),
            Err(e) => {
                debug!(error = %e, "Skipping unparseable stream line");
                Vec::new()
            }
        }
    }

    /// Process a single parsed backend chunk.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        if let Some(ref usage) = chunk.usage {
            self.usage.record(usage);
        }

        let Some(choice) = chunk.choices.first() else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if !self.started {
            if !chunk.id.is_empty() {
                self.msg_id = Some(message_id(&chunk.id));
            }
            events.push(self.make_message_start());
            self.started = true;
        }

        if !self.blocks_closed {
            if let Some(text) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
                let index = self.open_text_block(&mut events);
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::TextDelta {
                        text: text.to_string(),
                    },
                });
            }

            if let Some(ref tool_calls) = choice.delta.tool_calls {
                for tc in tool_calls {
                    self.process_tool_delta(tc, &mut events);
                }
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            events.append(&mut self.close_blocks(Some(reason)));
        }

        events
    }

    /// Close the stream: final usage, `message_delta`, `message_stop`. Idempotent.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();
        if !self.started {
            events.push(self.make_message_start());
            self.started = true;
        }
        events.append(&mut self.close_blocks(None));

        let usage = self.usage.finalize(self.pricing.as_ref());
        debug!(
            input = usage.input_tokens,
            output = usage.output_tokens,
            cache_read = usage.cache_read_input_tokens,
            cache_write = usage.cache_creation_input_tokens,
            "Stream usage finalized"
        );

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(self.stop_reason.unwrap_or("end_turn").to_string()),
                stop_sequence: None,
            },
            usage,
        });
        events.push(StreamEvent::MessageStop);

        self.finished = true;
        events
    }

    /// The backend stream broke off. Closes whatever blocks are open and ends
    /// with an `error` event instead of a `message_stop`.
    pub fn fail(&mut self, error: ErrorResponse) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();
        if self.text_index.is_some() || !self.opened_tools.is_empty() {
            events.append(&mut self.close_blocks(None));
        }
        events.push(error.into_stream_event());

        self.finished = true;
        events
    }

    fn open_text_block(&mut self, events: &mut Vec<StreamEvent>) -> usize {
        if let Some(index) = self.text_index {
            return index;
        }

        let index = self.next_free_index();
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        });
        self.text_index = Some(index);
        index
    }

    fn process_tool_delta(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let name_fragment = tc.function.as_ref().and_then(|f| f.name.as_deref());
        let arguments = tc
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .filter(|a| !a.is_empty());

        let block = self.tools.entry(tc.index).or_default();
        if let Some(fragment) = name_fragment {
            block.name.push_str(fragment);
        }

        if block.output_index.is_none() {
            if let Some(ref id) = tc.id {
                block.id = Some(id.clone());
            }
            if let Some(args) = arguments {
                block.pending_arguments.push_str(args);
            }
            if block.id.is_some() {
                self.open_tool_block(tc.index, events);
            }
            return;
        }

        if let (Some(index), Some(args)) = (block.output_index, arguments) {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta {
                    partial_json: args.to_string(),
                },
            });
        }
    }

    fn open_tool_block(&mut self, backend_index: usize, events: &mut Vec<StreamEvent>) {
        let preferred = backend_index + usize::from(self.text_index.is_some());
        let index = if self.index_in_use(preferred) {
            self.next_free_index()
        } else {
            preferred
        };

        let Some(block) = self.tools.get_mut(&backend_index) else {
            return;
        };
        block.output_index = Some(index);

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::ToolUse {
                id: block.id.clone().unwrap_or_default(),
                name: block.name.clone(),
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        });

        if !block.pending_arguments.is_empty() {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta {
                    partial_json: std::mem::take(&mut block.pending_arguments),
                },
            });
        }

        self.opened_tools.push(backend_index);
    }

    fn used_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.text_index
            .into_iter()
            .chain(self.tools.values().filter_map(|b| b.output_index))
    }

    fn index_in_use(&self, index: usize) -> bool {
        self.used_indices().any(|i| i == index)
    }

    fn next_free_index(&self) -> usize {
        self.used_indices().max().map_or(0, |max| max + 1)
    }

    /// The single closing pass. Runs on the first `finish_reason`, or at end of
    /// stream when the backend never sent one.
    fn close_blocks(&mut self, finish_reason: Option<&str>) -> Vec<StreamEvent> {
        if self.blocks_closed {
            return Vec::new();
        }
        self.blocks_closed = true;
        self.stop_reason = Some(map_finish_reason(finish_reason));

        let mut events = Vec::new();

        if let Some(index) = self.text_index {
            events.push(StreamEvent::ContentBlockStop { index });
        }

        for backend_index in &self.opened_tools {
            if let Some(index) = self.tools.get(backend_index).and_then(|b| b.output_index) {
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }

        if events.is_empty() {
            events.push(StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            });
            events.push(StreamEvent::ContentBlockStop { index: 0 });
        }

        events
    }

    fn make_message_start(&mut self) -> StreamEvent {
        let id = self
            .msg_id
            .get_or_insert_with(|| format!("msg_{}", uuid::Uuid::new_v4().simple()))
            .clone();

        StreamEvent::MessageStart {
            message: MessagesResponse {
                id,
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.usage.prompt_tokens,
                    ..Usage::default()
                },
            },
        }
    }
}

//! Merging generation streams into one UI message stream
//!
//! The output follows the UI message stream protocol: a `start` chunk, then
//! text, tool, data and step chunks in arrival order, then either `finish` or
//! a single `error` chunk.
use futures::stream::BoxStream;
use futures::{Future, Stream, StreamExt};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::errors::{ChatError, ChatResult};
use crate::invoker::{Generation, Increment};
use crate::models::content::Content;
use crate::models::message::{ToolRequest, ToolResponse};

/// Stable id for a text or data part, so the UI can patch it in place
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartId(String);

impl PartId {
    pub fn new() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PartId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of the outbound stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Start {
        message_id: Option<String>,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: Value,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    StartStep,
    FinishStep,
    /// `data-<name>`; a later chunk with the same id replaces the earlier one
    Data {
        name: String,
        id: Option<String>,
        data: Value,
    },
    MessageMetadata {
        metadata: Value,
    },
    Error {
        error_text: String,
    },
    Finish,
}

impl StreamChunk {
    pub fn data<N: Into<String>>(name: N, id: &PartId, data: Value) -> Self {
        StreamChunk::Data {
            name: name.into(),
            id: Some(id.to_string()),
            data,
        }
    }

    pub fn error(err: &ChatError) -> Self {
        StreamChunk::Error {
            error_text: err.to_string(),
        }
    }

    /// The `type` tag on the wire
    pub fn kind(&self) -> String {
        match self {
            StreamChunk::Start { .. } => "start".into(),
            StreamChunk::TextStart { .. } => "text-start".into(),
            StreamChunk::TextDelta { .. } => "text-delta".into(),
            StreamChunk::TextEnd { .. } => "text-end".into(),
            StreamChunk::ToolInputAvailable { .. } => "tool-input-available".into(),
            StreamChunk::ToolOutputAvailable { .. } => "tool-output-available".into(),
            StreamChunk::ToolOutputError { .. } => "tool-output-error".into(),
            StreamChunk::StartStep => "start-step".into(),
            StreamChunk::FinishStep => "finish-step".into(),
            StreamChunk::Data { name, .. } => format!("data-{}", name),
            StreamChunk::MessageMetadata { .. } => "message-metadata".into(),
            StreamChunk::Error { .. } => "error".into(),
            StreamChunk::Finish => "finish".into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Finish | StreamChunk::Error { .. })
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String(self.kind()));
        let mut put = |key: &str, value: Value| {
            object.insert(key.to_string(), value);
        };
        match self {
            StreamChunk::Start { message_id } => {
                if let Some(message_id) = message_id {
                    put("messageId", json!(message_id));
                }
            }
            StreamChunk::TextStart { id } | StreamChunk::TextEnd { id } => put("id", json!(id)),
            StreamChunk::TextDelta { id, delta } => {
                put("id", json!(id));
                put("delta", json!(delta));
            }
            StreamChunk::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => {
                put("toolCallId", json!(tool_call_id));
                put("toolName", json!(tool_name));
                put("input", input.clone());
            }
            StreamChunk::ToolOutputAvailable {
                tool_call_id,
                output,
            } => {
                put("toolCallId", json!(tool_call_id));
                put("output", output.clone());
            }
            StreamChunk::ToolOutputError {
                tool_call_id,
                error_text,
            } => {
                put("toolCallId", json!(tool_call_id));
                put("errorText", json!(error_text));
            }
            StreamChunk::Data { id, data, .. } => {
                if let Some(id) = id {
                    put("id", json!(id));
                }
                put("data", data.clone());
            }
            StreamChunk::MessageMetadata { metadata } => put("messageMetadata", metadata.clone()),
            StreamChunk::Error { error_text } => put("errorText", json!(error_text)),
            StreamChunk::StartStep | StreamChunk::FinishStep | StreamChunk::Finish => {}
        }
        Value::Object(object)
    }
}

impl Serialize for StreamChunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

enum Signal {
    Chunk(StreamChunk),
    Failed(ChatError),
}

type TaskList = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Handle given to the body of [`ui_message_stream`]
#[derive(Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<Signal>,
    tasks: TaskList,
}

impl StreamWriter {
    /// Send a single chunk. Fails once the client has gone away.
    pub async fn write(&self, chunk: StreamChunk) -> ChatResult<()> {
        self.tx
            .send(Signal::Chunk(chunk))
            .await
            .map_err(|_| ChatError::Internal("the output stream was closed".to_string()))
    }

    /// Forward every chunk of `source` as it arrives, concurrently with
    /// everything else written to this stream
    pub fn merge<S>(&self, source: S)
    where
        S: Stream<Item = ChatResult<StreamChunk>> + Send + 'static,
    {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut source = Box::pin(source);
            while let Some(item) = source.next().await {
                let signal = match item {
                    Ok(chunk) => Signal::Chunk(chunk),
                    Err(e) => Signal::Failed(e),
                };
                let failed = matches!(signal, Signal::Failed(_));
                if tx.send(signal).await.is_err() || failed {
                    break;
                }
            }
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }
}

/// Aborts every source when the output stream is dropped
struct AbortOnDrop(TaskList);

impl AbortOnDrop {
    fn abort_all(&self) {
        if let Ok(tasks) = self.0.lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Run `execute` with a writer and stream everything it produces.
///
/// `finish` is emitted once `execute` has returned and every merged source
/// is exhausted. The first error from any source ends the stream with an
/// `error` chunk and cancels the rest.
pub fn ui_message_stream<F, Fut>(execute: F) -> BoxStream<'static, StreamChunk>
where
    F: FnOnce(StreamWriter) -> Fut + Send + 'static,
    Fut: Future<Output = ChatResult<()>> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(100);
    let tasks: TaskList = Arc::new(Mutex::new(Vec::new()));
    let writer = StreamWriter {
        tx: tx.clone(),
        tasks: tasks.clone(),
    };

    Box::pin(async_stream::stream! {
        let guard = AbortOnDrop(tasks.clone());
        yield StreamChunk::Start { message_id: Some(nanoid::nanoid!()) };

        let driver = tokio::spawn(async move {
            if let Err(e) = execute(writer).await {
                let _ = tx.send(Signal::Failed(e)).await;
            }
        });
        if let Ok(mut tasks) = tasks.lock() {
            tasks.push(driver);
        }

        // The channel closes once the body and every merged source have
        // dropped their senders
        let mut failed = false;
        while let Some(signal) = rx.recv().await {
            match signal {
                Signal::Chunk(chunk) => yield chunk,
                Signal::Failed(e) => {
                    error!(error = %e, "stream aborted");
                    failed = true;
                    guard.abort_all();
                    yield StreamChunk::error(&e);
                    break;
                }
            }
        }
        if !failed {
            debug!("stream finished");
            yield StreamChunk::Finish;
        }
    })
}

/// Turns invoker increments into protocol chunks, one text part per step
#[derive(Debug, Default)]
pub struct ChunkEncoder {
    text_id: Option<String>,
    in_step: bool,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn close_text(&mut self, chunks: &mut Vec<StreamChunk>) {
        if let Some(id) = self.text_id.take() {
            chunks.push(StreamChunk::TextEnd { id });
        }
    }

    fn open_step(&mut self, chunks: &mut Vec<StreamChunk>) {
        if !self.in_step {
            self.in_step = true;
            chunks.push(StreamChunk::StartStep);
        }
    }

    pub fn encode(&mut self, increment: &Increment) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        match increment {
            Increment::TextDelta(delta) => {
                self.open_step(&mut chunks);
                let id = match &self.text_id {
                    Some(id) => id.clone(),
                    None => {
                        let id = PartId::new().to_string();
                        chunks.push(StreamChunk::TextStart { id: id.clone() });
                        self.text_id = Some(id.clone());
                        id
                    }
                };
                chunks.push(StreamChunk::TextDelta {
                    id,
                    delta: delta.clone(),
                });
            }
            Increment::ToolCall(request) => {
                self.open_step(&mut chunks);
                self.close_text(&mut chunks);
                chunks.push(tool_input_chunk(request));
            }
            Increment::ToolResult(response) => {
                self.open_step(&mut chunks);
                chunks.push(tool_output_chunk(response));
            }
            Increment::StepFinished { .. } => {
                self.open_step(&mut chunks);
                self.close_text(&mut chunks);
                self.in_step = false;
                chunks.push(StreamChunk::FinishStep);
            }
            Increment::Finished(generation) => {
                self.close_text(&mut chunks);
                chunks.push(StreamChunk::MessageMetadata {
                    metadata: generation_metadata(generation),
                });
            }
            // structured outputs are forwarded as data parts by their callers
            Increment::PartialOutput(_) => {}
        }
        chunks
    }
}

/// `finishReason` and `truncated`, as attached to the message metadata
pub fn generation_metadata(generation: &Generation) -> Value {
    json!({
        "finishReason": generation.finish_reason,
        "truncated": generation.truncated(),
        "steps": generation.steps,
    })
}

fn tool_input_chunk(request: &ToolRequest) -> StreamChunk {
    let (tool_name, input) = match &request.tool_call {
        Ok(call) => (call.name.clone(), call.arguments.clone()),
        Err(_) => ("invalid_tool_call".to_string(), json!({})),
    };
    StreamChunk::ToolInputAvailable {
        tool_call_id: request.id.clone(),
        tool_name,
        input,
    }
}

fn tool_output_chunk(response: &ToolResponse) -> StreamChunk {
    match &response.tool_result {
        Ok(contents) => StreamChunk::ToolOutputAvailable {
            tool_call_id: response.id.clone(),
            output: contents_to_output(contents),
        },
        Err(e) => StreamChunk::ToolOutputError {
            tool_call_id: response.id.clone(),
            error_text: e.to_string(),
        },
    }
}

/// A single text result is surfaced as the JSON it contains, when it is JSON
fn contents_to_output(contents: &[Content]) -> Value {
    match contents {
        [Content::Text(text)] => {
            serde_json::from_str(&text.text).unwrap_or_else(|_| Value::String(text.text.clone()))
        }
        _ => serde_json::to_value(contents).unwrap_or(Value::Null),
    }
}

/// Map an invoker stream to chunks
pub fn increments_to_chunks<S>(increments: S) -> impl Stream<Item = ChatResult<StreamChunk>>
where
    S: Stream<Item = ChatResult<Increment>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut encoder = ChunkEncoder::new();
        let mut increments = Box::pin(increments);
        while let Some(increment) = increments.next().await {
            let increment = increment?;
            for chunk in encoder.encode(&increment) {
                yield chunk;
            }
        }
    }
}

/// Write an invoker stream through `writer` and hand back the finished generation
pub async fn forward_increments<S>(writer: &StreamWriter, increments: S) -> ChatResult<Generation>
where
    S: Stream<Item = ChatResult<Increment>> + Send,
{
    let mut encoder = ChunkEncoder::new();
    let mut increments = Box::pin(increments);
    let mut generation = None;
    while let Some(increment) = increments.next().await {
        let increment = increment?;
        for chunk in encoder.encode(&increment) {
            writer.write(chunk).await?;
        }
        if let Increment::Finished(finished) = increment {
            generation = Some(finished);
        }
    }
    generation.ok_or_else(|| ChatError::Internal("generation ended without a result".to_string()))
}

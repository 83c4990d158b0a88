//! Wire encoding of the UI message stream as server-sent events
use futures::{Stream, StreamExt};

use crate::multiplexer::StreamChunk;

/// Header that tells the client which stream protocol the body speaks
pub const UI_MESSAGE_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const UI_MESSAGE_STREAM_VERSION: &str = "v1";

pub struct ProtocolFormatter;

impl ProtocolFormatter {
    pub fn format_chunk(chunk: &StreamChunk) -> String {
        format!("data: {}\n\n", chunk.to_json())
    }

    pub fn format_done() -> String {
        "data: [DONE]\n\n".to_string()
    }
}

/// Encode a chunk stream as SSE frames, ending with the `[DONE]` marker
pub fn encode_sse<S>(chunks: S) -> impl Stream<Item = String>
where
    S: Stream<Item = StreamChunk>,
{
    chunks
        .map(|chunk| ProtocolFormatter::format_chunk(&chunk))
        .chain(futures::stream::once(async { ProtocolFormatter::format_done() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn payload(frame: &str) -> Value {
        let body = frame
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_format_chunk() {
        let frame = ProtocolFormatter::format_chunk(&StreamChunk::TextDelta {
            id: "t1".into(),
            delta: "line\n".into(),
        });
        assert_eq!(
            payload(&frame),
            json!({"type": "text-delta", "id": "t1", "delta": "line\n"})
        );
        // the newline inside the delta stays escaped, so the frame is one line
        assert_eq!(frame.matches('\n').count(), 2);
    }

    #[tokio::test]
    async fn test_encode_sse_appends_done() {
        let frames: Vec<String> = encode_sse(futures::stream::iter(vec![
            StreamChunk::Start { message_id: None },
            StreamChunk::Finish,
        ]))
        .collect()
        .await;
        assert_eq!(frames.len(), 3);
        assert_eq!(payload(&frames[0]), json!({"type": "start"}));
        assert_eq!(payload(&frames[1]), json!({"type": "finish"}));
        assert_eq!(frames[2], "data: [DONE]\n\n");
    }
}

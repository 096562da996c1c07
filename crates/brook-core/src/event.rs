use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One incremental unit produced by a chunk source for a single prompt.
///
/// `Done` and `Error` are terminal; a source must not emit anything after
/// either. A channel that closes without a terminal chunk is treated as a
/// producer failure by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum GenChunk {
    Text(String),
    ToolCall(ToolCall),
    Error(String),
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Client-facing frame on the persistent stream. Keep-alive comments are
/// injected below the frame layer and never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected,
    Text { content: String },
    ToolCall { name: String, arguments: serde_json::Value },
    Error { message: String },
    Aborted,
    Done,
}

impl StreamEvent {
    /// Encode as a single SSE data frame.
    pub fn to_frame(&self) -> Bytes {
        let data = serde_json::to_string(self)
            .unwrap_or_else(|_| "{\"type\":\"error\",\"message\":\"encode_failed\"}".to_string());
        Bytes::from(format!("data: {data}\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_is_tagged_sse_data() {
        let frame = StreamEvent::Text {
            content: "hi".to_string(),
        }
        .to_frame();
        let frame = std::str::from_utf8(&frame).unwrap();
        assert_eq!(frame, "data: {\"type\":\"text\",\"content\":\"hi\"}\n\n");
    }

    #[test]
    fn connected_frame_has_no_payload_fields() {
        let frame = StreamEvent::Connected.to_frame();
        let frame = std::str::from_utf8(&frame).unwrap();
        assert_eq!(frame, "data: {\"type\":\"connected\"}\n\n");
    }
}

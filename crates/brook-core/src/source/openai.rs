use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{GenChunk, ToolCall};
use crate::sse::SseParser;

use super::{ChunkSource, SourceError, SourceRequest};

const CHUNK_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub connect_timeout: Duration,
    /// Gap between stream chunks after which the engine is considered gone.
    pub stream_idle_timeout: Duration,
}

impl OpenAiSettings {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Chunk source backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiSource {
    client: wreq::Client,
    settings: OpenAiSettings,
}

impl OpenAiSource {
    pub fn new(settings: OpenAiSettings) -> Result<Self, SourceError> {
        let client = wreq::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.stream_idle_timeout)
            .build()
            .map_err(|err| SourceError::Transport(err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn payload(&self, request: &SourceRequest) -> Value {
        let mut content = request.prompt.clone();
        if !request.attachments.is_empty() {
            content.push_str("\n\nAttachments:");
            for reference in &request.attachments {
                content.push_str("\n- ");
                content.push_str(reference);
            }
        }
        let mut payload = json!({
            "model": self.settings.model,
            "stream": true,
            "messages": [{"role": "user", "content": content}],
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|name| {
                    json!({
                        "type": "function",
                        "function": {"name": name, "parameters": {"type": "object"}},
                    })
                })
                .collect();
            payload["tools"] = Value::Array(tools);
        }
        payload
    }
}

#[async_trait]
impl ChunkSource for OpenAiSource {
    async fn open(
        &self,
        request: SourceRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<GenChunk>, SourceError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let mut builder = self.client.post(&url).json(&self.payload(&request));
        if let Some(key) = &self.settings.api_key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|err| SourceError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(SourceError::Status(status));
        }

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let conversation_id = request.conversation_id;
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        // Cooperative stop: drop the response stream and end
                        // without a terminal chunk; the consumer is already
                        // on its abort path.
                        debug!(conversation_id = %conversation_id, "engine stream cancelled");
                        return;
                    }
                    item = stream.next() => match item {
                        Some(Ok(bytes)) => {
                            for event in parser.push_bytes(&bytes) {
                                if !forward(&tx, &event.data).await {
                                    return;
                                }
                            }
                        }
                        Some(Err(err)) => {
                            warn!(conversation_id = %conversation_id, error = %err, "engine stream failed");
                            let _ = tx.send(GenChunk::Error(err.to_string())).await;
                            return;
                        }
                        None => {
                            for event in parser.finish() {
                                if !forward(&tx, &event.data).await {
                                    return;
                                }
                            }
                            // Clean end of body without an explicit [DONE]
                            // still means the engine finished.
                            let _ = tx.send(GenChunk::Done).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Decodes one SSE data payload into chunks and forwards them. Returns
/// false once the sequence is terminal or the consumer is gone.
async fn forward(tx: &mpsc::Sender<GenChunk>, data: &str) -> bool {
    if data == "[DONE]" {
        let _ = tx.send(GenChunk::Done).await;
        return false;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return true;
    };
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("engine error")
            .to_string();
        let _ = tx.send(GenChunk::Error(message)).await;
        return false;
    }
    let Some(delta) = value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("delta"))
    else {
        return true;
    };
    if let Some(content) = delta.get("content").and_then(Value::as_str)
        && !content.is_empty()
        && tx.send(GenChunk::Text(content.to_string())).await.is_err()
    {
        return false;
    }
    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let Some(name) = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
            else {
                continue;
            };
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(Value::Null);
            let chunk = GenChunk::ToolCall(ToolCall {
                name: name.to_string(),
                arguments,
            });
            if tx.send(chunk).await.is_err() {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delta_content_becomes_text_chunks() {
        let (tx, mut rx) = mpsc::channel(8);
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert!(forward(&tx, data).await);
        assert_eq!(rx.recv().await, Some(GenChunk::Text("Hel".to_string())));
    }

    #[tokio::test]
    async fn done_sentinel_terminates_the_sequence() {
        let (tx, mut rx) = mpsc::channel(8);
        assert!(!forward(&tx, "[DONE]").await);
        assert_eq!(rx.recv().await, Some(GenChunk::Done));
    }

    #[tokio::test]
    async fn error_payload_becomes_error_chunk() {
        let (tx, mut rx) = mpsc::channel(8);
        let data = r#"{"error":{"message":"overloaded"}}"#;
        assert!(!forward(&tx, data).await);
        assert_eq!(
            rx.recv().await,
            Some(GenChunk::Error("overloaded".to_string()))
        );
    }

    #[tokio::test]
    async fn tool_call_deltas_are_decoded() {
        let (tx, mut rx) = mpsc::channel(8);
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"function":{"name":"search","arguments":"{\"q\":\"rust\"}"}}]}}]}"#;
        assert!(forward(&tx, data).await);
        match rx.recv().await {
            Some(GenChunk::ToolCall(call)) => {
                assert_eq!(call.name, "search");
                assert_eq!(call.arguments["q"], "rust");
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use brook_common::GenerationStatus;

use crate::event::{GenChunk, StreamEvent};
use crate::flusher::ContentFlusher;
use crate::registry::RegistryGuard;
use crate::relay::{ClientRelay, RelaySettings};
use crate::source::{ChunkSource, SourceRequest};
use crate::store::MessageStore;

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub flush_interval: Duration,
    pub final_flush_attempts: u32,
    pub final_flush_backoff: Duration,
    pub relay: RelaySettings,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(300),
            final_flush_attempts: 4,
            final_flush_backoff: Duration::from_millis(200),
            relay: RelaySettings::default(),
        }
    }
}

/// One accepted prompt submission. `message_id` is the durable placeholder
/// record, created by the caller before the request starts.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub request_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub prompt: String,
    pub attachments: Vec<String>,
    pub tools: Vec<String>,
}

impl GenerationRequest {
    pub fn new(conversation_id: Uuid, message_id: Uuid, prompt: String) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            conversation_id,
            message_id,
            prompt,
            attachments: Vec::new(),
            tools: Vec::new(),
        }
    }

    /// A prompt must carry text or at least one attachment reference.
    pub fn validate(&self) -> bool {
        !self.prompt.trim().is_empty() || !self.attachments.is_empty()
    }
}

enum Outcome {
    Complete,
    Failed(String),
    Aborted,
}

/// Drives one generation end to end: consumes the chunk source, owns the
/// accumulated text, and fans each text chunk out to the client relay
/// (best-effort) and the content flusher (throttled).
///
/// The task's lifetime is independent of the client connection: callers
/// spawn it detached, and a disconnect mid-stream only silences the relay.
/// Whatever happens, the request ends in exactly one terminal state with
/// exactly one forced flush.
pub async fn run_generation(
    store: Arc<dyn MessageStore>,
    source: Arc<dyn ChunkSource>,
    settings: GenerationSettings,
    request: GenerationRequest,
    mut relay: ClientRelay,
    cancel: CancellationToken,
    guard: RegistryGuard,
) -> GenerationStatus {
    let mut flusher = ContentFlusher::new(store.clone(), request.message_id, settings.flush_interval);
    let mut accumulated = String::new();

    relay.send(&StreamEvent::Connected).await;

    let source_request = SourceRequest {
        conversation_id: request.conversation_id,
        prompt: request.prompt.clone(),
        attachments: request.attachments.clone(),
        tools: request.tools.clone(),
    };
    let outcome = match source.open(source_request, cancel.clone()).await {
        Ok(mut chunks) => {
            // Best-effort visibility; the record stays usable if this write
            // is lost.
            if let Err(err) = store
                .update_status(request.message_id, GenerationStatus::Streaming, None)
                .await
            {
                warn!(
                    request_id = %request.request_id,
                    error = %err,
                    "streaming status write failed"
                );
            }

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        break Outcome::Aborted;
                    }
                    _ = tokio::time::sleep_until(flusher.deadline()), if flusher.pending() => {
                        flusher.flush_throttled(&accumulated).await;
                    }
                    item = chunks.recv() => match item {
                        Some(GenChunk::Text(delta)) => {
                            accumulated.push_str(&delta);
                            relay.send(&StreamEvent::Text { content: delta }).await;
                            flusher.note();
                        }
                        Some(GenChunk::ToolCall(call)) => {
                            // Tool invocations are surfaced live but are not
                            // part of the durable text.
                            relay
                                .send(&StreamEvent::ToolCall {
                                    name: call.name,
                                    arguments: call.arguments,
                                })
                                .await;
                        }
                        Some(GenChunk::Error(message)) => {
                            break Outcome::Failed(message);
                        }
                        Some(GenChunk::Done) => {
                            break Outcome::Complete;
                        }
                        None => {
                            break Outcome::Failed(
                                "chunk source ended without a terminal signal".to_string(),
                            );
                        }
                    }
                }
            }
        }
        Err(err) => Outcome::Failed(err.to_string()),
    };

    let (status, failure) = match outcome {
        Outcome::Complete => (GenerationStatus::Complete, None),
        Outcome::Aborted => (GenerationStatus::Aborted, None),
        Outcome::Failed(message) => (GenerationStatus::Errored, Some(message)),
    };

    let status = match flusher
        .flush_final(
            &accumulated,
            status,
            settings.final_flush_attempts,
            settings.final_flush_backoff,
        )
        .await
    {
        Ok(()) => status,
        Err(err) => {
            // The store is unreachable; keep the text in the log so the
            // record can be repaired by hand.
            error!(
                request_id = %request.request_id,
                message_id = %request.message_id,
                error = %err,
                content = %accumulated,
                "final flush exhausted retries; content logged for manual recovery"
            );
            GenerationStatus::Errored
        }
    };

    match (status, failure) {
        (GenerationStatus::Complete, _) => relay.send(&StreamEvent::Done).await,
        (GenerationStatus::Aborted, _) => relay.send(&StreamEvent::Aborted).await,
        (_, failure) => {
            let message = failure.unwrap_or_else(|| "generation failed".to_string());
            relay.send(&StreamEvent::Error { message }).await;
        }
    }

    info!(
        request_id = %request.request_id,
        conversation_id = %request.conversation_id,
        status = status.as_str(),
        chars = accumulated.len(),
        client_connected = relay.is_open(),
        "generation finished"
    );

    drop(guard);
    status
}

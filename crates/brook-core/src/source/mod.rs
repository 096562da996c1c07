use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::GenChunk;

mod openai;

pub use openai::{OpenAiSettings, OpenAiSource};

/// What the relay hands the reasoning engine for one generation: the prompt
/// context plus the side-effecting capabilities it may invoke.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub conversation_id: Uuid,
    pub prompt: String,
    pub attachments: Vec<String>,
    pub tools: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("engine request failed: {0}")]
    Transport(String),
    #[error("engine returned status {0}")]
    Status(u16),
}

/// External producer of one chunk sequence per prompt.
///
/// The sequence may run arbitrarily long. Cancellation is cooperative: the
/// source observes the token at its own granularity and stops cleanly; the
/// consumer never preempts it mid-chunk. Closing the returned channel
/// without a `Done` or `Error` chunk is treated as a producer failure.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn open(
        &self,
        request: SourceRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<GenChunk>, SourceError>;
}

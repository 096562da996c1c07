pub mod event;
pub mod flusher;
pub mod registry;
pub mod relay;
pub mod source;
pub mod sse;
pub mod store;
pub mod supervisor;

pub use event::{GenChunk, StreamEvent, ToolCall};
pub use flusher::ContentFlusher;
pub use registry::{AlreadyStreaming, CancelRegistry, RegistryGuard};
pub use relay::{ClientRelay, RelaySettings};
pub use source::{ChunkSource, OpenAiSettings, OpenAiSource, SourceError, SourceRequest};
pub use store::{MemoryMessageStore, MessageRecord, MessageStore, StoreError};
pub use supervisor::{GenerationRequest, GenerationSettings, run_generation};

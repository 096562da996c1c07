use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use brook_common::{GenerationStatus, MessageRole};
use brook_core::registry::CancelRegistry;
use brook_core::relay::{ClientRelay, RelaySettings};
use brook_core::source::{ChunkSource, SourceError, SourceRequest};
use brook_core::store::{MemoryMessageStore, MessageRecord, MessageStore, StoreError};
use brook_core::supervisor::{GenerationRequest, GenerationSettings, run_generation};
use brook_core::{GenChunk, StreamEvent};

/// Store wrapper that records every durable write, so tests can count
/// throttled writes (content only) and forced writes (status + text).
#[derive(Default)]
struct CountingStore {
    inner: MemoryMessageStore,
    content_writes: Mutex<Vec<String>>,
    status_writes: Mutex<Vec<(GenerationStatus, Option<String>)>>,
}

impl CountingStore {
    fn content_writes(&self) -> Vec<String> {
        self.content_writes.lock().unwrap().clone()
    }

    fn forced_writes(&self) -> Vec<(GenerationStatus, String)> {
        self.status_writes
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(status, text)| text.clone().map(|text| (*status, text)))
            .collect()
    }
}

#[async_trait]
impl MessageStore for CountingStore {
    async fn insert_conversation(&self, title: Option<&str>) -> Result<Uuid, StoreError> {
        self.inner.insert_conversation(title).await
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
    ) -> Result<MessageRecord, StoreError> {
        self.inner.insert_message(conversation_id, role).await
    }

    async fn update_content(&self, message_id: Uuid, content: &str) -> Result<(), StoreError> {
        self.content_writes.lock().unwrap().push(content.to_string());
        self.inner.update_content(message_id, content).await
    }

    async fn update_status(
        &self,
        message_id: Uuid,
        status: GenerationStatus,
        content: Option<&str>,
    ) -> Result<(), StoreError> {
        self.status_writes
            .lock()
            .unwrap()
            .push((status, content.map(str::to_string)));
        self.inner.update_status(message_id, status, content).await
    }

    async fn message(&self, message_id: Uuid) -> Result<Option<MessageRecord>, StoreError> {
        self.inner.message(message_id).await
    }
}

enum Step {
    Chunk(GenChunk),
    Wait(Duration),
}

/// Chunk source that replays a fixed script, pausing between chunks and
/// honoring cooperative cancellation while paused.
struct ScriptedSource {
    script: Mutex<Option<Vec<Step>>>,
}

impl ScriptedSource {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(Some(script)),
        }
    }

    fn text(parts: &[&str]) -> Vec<Step> {
        let mut script: Vec<Step> = parts
            .iter()
            .map(|part| Step::Chunk(GenChunk::Text(part.to_string())))
            .collect();
        script.push(Step::Chunk(GenChunk::Done));
        script
    }
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn open(
        &self,
        _request: SourceRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<GenChunk>, SourceError> {
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .expect("scripted source opened twice");
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for step in script {
                match step {
                    Step::Wait(pause) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                    Step::Chunk(chunk) => {
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}

struct FailingSource;

#[async_trait]
impl ChunkSource for FailingSource {
    async fn open(
        &self,
        _request: SourceRequest,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<GenChunk>, SourceError> {
        Err(SourceError::Status(503))
    }
}

fn settings(flush_interval: Duration) -> GenerationSettings {
    GenerationSettings {
        flush_interval,
        final_flush_attempts: 3,
        final_flush_backoff: Duration::from_millis(10),
        relay: RelaySettings {
            keepalive_interval: Duration::from_secs(60),
            write_timeout: Duration::from_millis(500),
            channel_capacity: 256,
        },
    }
}

async fn placeholder(store: &dyn MessageStore) -> MessageRecord {
    store
        .insert_message(Uuid::now_v7(), MessageRole::Assistant)
        .await
        .unwrap()
}

fn decode_frame(frame: &Bytes) -> Option<StreamEvent> {
    let text = std::str::from_utf8(frame).ok()?;
    let data = text.strip_prefix("data: ")?.trim_end();
    serde_json::from_str(data).ok()
}

async fn drain_events(mut rx: mpsc::Receiver<Bytes>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(Some(frame)) = timeout(Duration::from_secs(5), rx.recv()).await {
        if let Some(event) = decode_frame(&frame) {
            events.push(event);
        }
    }
    events
}

#[tokio::test]
async fn hello_world_scenario_completes_with_one_forced_flush() {
    let store = Arc::new(CountingStore::default());
    let source = Arc::new(ScriptedSource::new(ScriptedSource::text(&[
        "Hel", "lo, ", "world",
    ])));
    let registry = CancelRegistry::new();
    let record = placeholder(store.as_ref()).await;
    let request = GenerationRequest::new(record.conversation_id, record.id, "hi".to_string());
    let settings = settings(Duration::from_millis(200));

    let (cancel, guard) = registry.register(record.conversation_id).unwrap();
    let (relay, rx) = ClientRelay::channel(&settings.relay);
    let events = tokio::spawn(drain_events(rx));

    let status = run_generation(
        store.clone(),
        source,
        settings,
        request,
        relay,
        cancel,
        guard,
    )
    .await;

    assert_eq!(status, GenerationStatus::Complete);
    let record = store.message(record.id).await.unwrap().unwrap();
    assert_eq!(record.content, "Hello, world");
    assert_eq!(record.status, GenerationStatus::Complete);

    let forced = store.forced_writes();
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0], (GenerationStatus::Complete, "Hello, world".to_string()));
    assert!(store.content_writes().len() <= 2);

    let events = events.await.unwrap();
    assert_eq!(events.first(), Some(&StreamEvent::Connected));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    let streamed: String = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello, world");
}

#[tokio::test]
async fn client_disconnect_does_not_lose_content() {
    let store = Arc::new(CountingStore::default());
    let parts = ["one ", "two ", "three ", "four ", "five"];
    let mut script = Vec::new();
    for part in parts {
        script.push(Step::Chunk(GenChunk::Text(part.to_string())));
        script.push(Step::Wait(Duration::from_millis(20)));
    }
    script.push(Step::Chunk(GenChunk::Done));
    let source = Arc::new(ScriptedSource::new(script));
    let registry = CancelRegistry::new();
    let record = placeholder(store.as_ref()).await;
    let request = GenerationRequest::new(record.conversation_id, record.id, "hi".to_string());
    let settings = settings(Duration::from_millis(50));

    let (cancel, guard) = registry.register(record.conversation_id).unwrap();
    let (relay, mut rx) = ClientRelay::channel(&settings.relay);

    // Read two frames, then drop the connection mid-generation.
    let disconnect = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(frame) = rx.recv().await {
            if decode_frame(&frame).is_some() {
                seen += 1;
                if seen == 2 {
                    break;
                }
            }
        }
    });

    let status = run_generation(
        store.clone(),
        source,
        settings,
        request,
        relay,
        cancel,
        guard,
    )
    .await;
    disconnect.await.unwrap();

    assert_eq!(status, GenerationStatus::Complete);
    let record = store.message(record.id).await.unwrap().unwrap();
    assert_eq!(record.content, parts.concat());
    assert_eq!(record.status, GenerationStatus::Complete);
}

#[tokio::test]
async fn fast_chunks_coalesce_into_few_writes() {
    let store = Arc::new(CountingStore::default());
    let chunk_count = 50usize;
    let mut script = Vec::new();
    for index in 0..chunk_count {
        script.push(Step::Chunk(GenChunk::Text(format!("{index} "))));
        script.push(Step::Wait(Duration::from_millis(1)));
    }
    script.push(Step::Chunk(GenChunk::Done));
    let source = Arc::new(ScriptedSource::new(script));
    let registry = CancelRegistry::new();
    let record = placeholder(store.as_ref()).await;
    let request = GenerationRequest::new(record.conversation_id, record.id, "hi".to_string());
    let settings = settings(Duration::from_millis(250));

    let (cancel, guard) = registry.register(record.conversation_id).unwrap();
    let (relay, rx) = ClientRelay::channel(&settings.relay);
    drop(rx);

    let status = run_generation(
        store.clone(),
        source,
        settings,
        request,
        relay,
        cancel,
        guard,
    )
    .await;

    assert_eq!(status, GenerationStatus::Complete);
    assert!(store.content_writes().len() < chunk_count);
    assert_eq!(store.forced_writes().len(), 1);
}

#[tokio::test]
async fn flushed_text_is_always_a_prefix_of_the_final_content() {
    let store = Arc::new(CountingStore::default());
    let mut script = Vec::new();
    for index in 0..10 {
        script.push(Step::Chunk(GenChunk::Text(format!("chunk-{index} "))));
        script.push(Step::Wait(Duration::from_millis(15)));
    }
    script.push(Step::Chunk(GenChunk::Done));
    let source = Arc::new(ScriptedSource::new(script));
    let registry = CancelRegistry::new();
    let record = placeholder(store.as_ref()).await;
    let request = GenerationRequest::new(record.conversation_id, record.id, "hi".to_string());
    let settings = settings(Duration::from_millis(20));

    let (cancel, guard) = registry.register(record.conversation_id).unwrap();
    let (relay, rx) = ClientRelay::channel(&settings.relay);
    drop(rx);

    run_generation(
        store.clone(),
        source,
        settings,
        request,
        relay,
        cancel,
        guard,
    )
    .await;

    let record = store.message(record.id).await.unwrap().unwrap();
    let mut previous_len = 0usize;
    for write in store.content_writes() {
        assert!(record.content.starts_with(&write), "regressed write: {write:?}");
        assert!(write.len() >= previous_len);
        previous_len = write.len();
    }
    let forced = store.forced_writes();
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0].1, record.content);
}

#[tokio::test]
async fn producer_error_persists_partial_content_and_notifies_the_client() {
    let store = Arc::new(CountingStore::default());
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Chunk(GenChunk::Text("part".to_string())),
        Step::Chunk(GenChunk::Error("boom".to_string())),
    ]));
    let registry = CancelRegistry::new();
    let record = placeholder(store.as_ref()).await;
    let request = GenerationRequest::new(record.conversation_id, record.id, "hi".to_string());
    let settings = settings(Duration::from_millis(200));

    let (cancel, guard) = registry.register(record.conversation_id).unwrap();
    let (relay, rx) = ClientRelay::channel(&settings.relay);
    let events = tokio::spawn(drain_events(rx));

    let status = run_generation(
        store.clone(),
        source,
        settings,
        request,
        relay,
        cancel,
        guard,
    )
    .await;

    assert_eq!(status, GenerationStatus::Errored);
    let record = store.message(record.id).await.unwrap().unwrap();
    assert_eq!(record.status, GenerationStatus::Errored);
    assert_eq!(record.content, "part");

    let events = events.await.unwrap();
    let errors: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, StreamEvent::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0],
        &StreamEvent::Error {
            message: "boom".to_string()
        }
    );
}

#[tokio::test]
async fn source_closing_without_terminal_chunk_is_a_failure() {
    let store = Arc::new(CountingStore::default());
    let source = Arc::new(ScriptedSource::new(vec![Step::Chunk(GenChunk::Text(
        "x".to_string(),
    ))]));
    let registry = CancelRegistry::new();
    let record = placeholder(store.as_ref()).await;
    let request = GenerationRequest::new(record.conversation_id, record.id, "hi".to_string());
    let settings = settings(Duration::from_millis(200));

    let (cancel, guard) = registry.register(record.conversation_id).unwrap();
    let (relay, rx) = ClientRelay::channel(&settings.relay);
    drop(rx);

    let status = run_generation(
        store.clone(),
        source,
        settings,
        request,
        relay,
        cancel,
        guard,
    )
    .await;

    assert_eq!(status, GenerationStatus::Errored);
    let record = store.message(record.id).await.unwrap().unwrap();
    assert_eq!(record.content, "x");
}

#[tokio::test]
async fn source_open_failure_marks_the_record_errored() {
    let store = Arc::new(CountingStore::default());
    let registry = CancelRegistry::new();
    let record = placeholder(store.as_ref()).await;
    let request = GenerationRequest::new(record.conversation_id, record.id, "hi".to_string());
    let settings = settings(Duration::from_millis(200));

    let (cancel, guard) = registry.register(record.conversation_id).unwrap();
    let (relay, rx) = ClientRelay::channel(&settings.relay);
    drop(rx);

    let status = run_generation(
        store.clone(),
        Arc::new(FailingSource),
        settings,
        request,
        relay,
        cancel,
        guard,
    )
    .await;

    assert_eq!(status, GenerationStatus::Errored);
    let record = store.message(record.id).await.unwrap().unwrap();
    assert_eq!(record.status, GenerationStatus::Errored);
}

#[tokio::test]
async fn cancel_aborts_and_flushes_partial_content() {
    let store = Arc::new(CountingStore::default());
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Chunk(GenChunk::Text("a".to_string())),
        Step::Wait(Duration::from_secs(30)),
        Step::Chunk(GenChunk::Done),
    ]));
    let registry = CancelRegistry::new();
    let record = placeholder(store.as_ref()).await;
    let request = GenerationRequest::new(record.conversation_id, record.id, "hi".to_string());
    let settings = settings(Duration::from_millis(300));

    let (cancel, guard) = registry.register(record.conversation_id).unwrap();
    let (relay, rx) = ClientRelay::channel(&settings.relay);
    drop(rx);

    let task = tokio::spawn(run_generation(
        store.clone(),
        source,
        settings,
        request,
        relay,
        cancel,
        guard,
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(registry.cancel(record.conversation_id));
    assert!(!registry.cancel(record.conversation_id));

    let status = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(status, GenerationStatus::Aborted);
    assert_eq!(registry.active(), 0);
    assert!(!registry.cancel(record.conversation_id));

    let record = store.message(record.id).await.unwrap().unwrap();
    assert_eq!(record.status, GenerationStatus::Aborted);
    assert_eq!(record.content, "a");
}

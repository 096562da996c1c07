use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use brook_common::GenerationStatus;

use crate::store::{MessageStore, StoreError};

/// Write-through adapter that mirrors accumulated text into the durable
/// store at a bounded rate.
///
/// The flusher is driven entirely by the supervisor task that owns the
/// text, so its state machine is explicit and race-free: idle
/// (`deadline == None`), pending (`deadline == Some`), and flushing only
/// while one of the flush methods is being awaited. `note` arms at most one
/// trailing-edge deadline per window; the write at fire time uses whatever
/// text the supervisor has accumulated by then, so repeated chunks inside a
/// window coalesce into one write of the latest value.
pub struct ContentFlusher {
    store: Arc<dyn MessageStore>,
    message_id: Uuid,
    interval: Duration,
    last_flushed: String,
    deadline: Option<Instant>,
}

impl ContentFlusher {
    pub fn new(store: Arc<dyn MessageStore>, message_id: Uuid, interval: Duration) -> Self {
        Self {
            store,
            message_id,
            interval,
            last_flushed: String::new(),
            deadline: None,
        }
    }

    /// Called on every text chunk. Cheap; schedules at most one flush per
    /// interval.
    pub fn note(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.interval);
        }
    }

    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Deadline of the pending flush. Only meaningful while `pending()`;
    /// callers gate on that before sleeping on it.
    pub fn deadline(&self) -> Instant {
        self.deadline.unwrap_or_else(Instant::now)
    }

    /// Throttled write of the current text. Failures are logged and retried
    /// at the next deadline; they never propagate into the supervisor loop.
    pub async fn flush_throttled(&mut self, text: &str) {
        self.deadline = None;
        if text == self.last_flushed {
            return;
        }
        if text.len() < self.last_flushed.len() {
            // Accumulated text is append-only; a shorter value would regress
            // the durable record.
            warn!(message_id = %self.message_id, "refusing non-monotonic content flush");
            return;
        }
        match self.store.update_content(self.message_id, text).await {
            Ok(()) => {
                self.last_flushed = text.to_string();
            }
            Err(err) => {
                warn!(message_id = %self.message_id, error = %err, "throttled content flush failed");
                self.deadline = Some(Instant::now() + self.interval);
            }
        }
    }

    /// Forced terminal flush: cancels any pending deadline and writes the
    /// final status and text in one idempotent store call, retrying with
    /// backoff up to `attempts`. This is the one write that must succeed.
    pub async fn flush_final(
        &mut self,
        text: &str,
        status: GenerationStatus,
        attempts: u32,
        backoff: Duration,
    ) -> Result<(), StoreError> {
        self.deadline = None;
        let mut delay = backoff;
        let mut last_err = StoreError::Backend("no flush attempt made".to_string());
        for attempt in 0..attempts.max(1) {
            match self
                .store
                .update_status(self.message_id, status, Some(text))
                .await
            {
                Ok(()) => {
                    self.last_flushed = text.to_string();
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        message_id = %self.message_id,
                        attempt = attempt + 1,
                        error = %err,
                        "final flush failed"
                    );
                    last_err = err;
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last_err)
    }

    pub fn last_flushed(&self) -> &str {
        &self.last_flushed
    }
}

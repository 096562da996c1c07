use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Maps a conversation id to the cancellation handle of its in-flight
/// generation, so an out-of-band abort can reach the supervisor task.
///
/// At most one live handle per conversation: a second `register` while one
/// is streaming is rejected instead of letting two supervisors race on the
/// same durable record. Handles are released by dropping the guard returned
/// from `register`, after the terminal flush.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Entry>>>,
}

struct Entry {
    token: CancellationToken,
    cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("a generation is already streaming for conversation {0}")]
pub struct AlreadyStreaming(pub Uuid);

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        conversation_id: Uuid,
    ) -> Result<(CancellationToken, RegistryGuard), AlreadyStreaming> {
        let mut map = self.inner.lock().expect("cancel registry lock poisoned");
        if map.contains_key(&conversation_id) {
            return Err(AlreadyStreaming(conversation_id));
        }
        let token = CancellationToken::new();
        map.insert(
            conversation_id,
            Entry {
                token: token.clone(),
                cancelled: false,
            },
        );
        Ok((
            token,
            RegistryGuard {
                registry: self.clone(),
                conversation_id,
            },
        ))
    }

    /// Signals the live handle for `conversation_id`, if any. Returns true
    /// exactly once per handle; an unknown id or a repeat call is a normal
    /// `false`, not an error.
    pub fn cancel(&self, conversation_id: Uuid) -> bool {
        let mut map = self.inner.lock().expect("cancel registry lock poisoned");
        match map.get_mut(&conversation_id) {
            Some(entry) if !entry.cancelled => {
                entry.cancelled = true;
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .expect("cancel registry lock poisoned")
            .len()
    }

    fn release(&self, conversation_id: Uuid) {
        let mut map = self.inner.lock().expect("cancel registry lock poisoned");
        map.remove(&conversation_id);
    }
}

/// Removes the registry entry on drop, so the handle is released on every
/// supervisor exit path.
pub struct RegistryGuard {
    registry: CancelRegistry,
    conversation_id: Uuid,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.release(self.conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_register_is_rejected_until_release() {
        let registry = CancelRegistry::new();
        let conversation = Uuid::now_v7();

        let (_token, guard) = registry.register(conversation).unwrap();
        assert!(registry.register(conversation).is_err());

        drop(guard);
        assert_eq!(registry.active(), 0);
        assert!(registry.register(conversation).is_ok());
    }

    #[test]
    fn cancel_returns_true_at_most_once() {
        let registry = CancelRegistry::new();
        let conversation = Uuid::now_v7();
        let (token, _guard) = registry.register(conversation).unwrap();

        assert!(registry.cancel(conversation));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(conversation));
    }

    #[test]
    fn cancel_unknown_conversation_is_false() {
        let registry = CancelRegistry::new();
        assert!(!registry.cancel(Uuid::now_v7()));
    }

    #[test]
    fn cancel_after_release_is_false() {
        let registry = CancelRegistry::new();
        let conversation = Uuid::now_v7();
        let (_token, guard) = registry.register(conversation).unwrap();
        drop(guard);
        assert!(!registry.cancel(conversation));
    }
}

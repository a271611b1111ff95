use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{error::Result, state::ConversationState};

/// Trait for storing and retrieving conversation state
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, state: ConversationState) -> Result<()>;
    async fn get(&self, session_id: &str) -> Result<Option<ConversationState>>;
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage
#[derive(Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, ConversationState>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, state: ConversationState) -> Result<()> {
        self.sessions.insert(state.session_id().to_string(), state);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.sessions.get(session_id).map(|entry| entry.clone()))
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.remove(session_id);
        Ok(())
    }
}

type SessionLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Session store with per-session turn serialization.
///
/// Turns of the same session queue on one `tokio::sync::Mutex` (FIFO), turns
/// of different sessions never wait on each other. A session's mutex only
/// lives in the map while a turn holds or waits for it.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    locks: SessionLocks,
}

/// Exclusive access to one session, released on drop.
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: SessionLocks,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // the map holds the last reference once nobody is queued
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySessionStorage::new()))
    }

    /// Wait for exclusive access to a session. Held for a whole turn.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SessionGuard {
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
            session_id: session_id.to_string(),
        }
    }

    /// Sessions with a turn running or queued.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        self.storage.get(session_id).await
    }

    pub async fn save(&self, state: ConversationState) -> Result<()> {
        self.storage.save(state).await
    }

    /// Remove the session. The caller should hold the session's lock.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.storage.delete(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn in_memory_storage_round_trip() {
        let storage = InMemorySessionStorage::new();
        storage.save(ConversationState::new("s1")).await.unwrap();

        let loaded = storage.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id(), "s1");
        assert!(storage.get("missing").await.unwrap().is_none());

        storage.delete("s1").await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn same_session_locks_are_exclusive() {
        let store = SessionStore::in_memory();
        let guard = store.lock("s1").await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), store.lock("s1")).await;
        assert!(blocked.is_err());

        let other = tokio::time::timeout(Duration::from_millis(50), store.lock("s2")).await;
        assert!(other.is_ok());

        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_millis(50), store.lock("s1")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn idle_sessions_leave_no_lock_behind() {
        let store = SessionStore::in_memory();
        for i in 0..100 {
            let _guard = store.lock(&format!("s{i}")).await;
        }
        assert_eq!(store.active_locks(), 0);
    }

    #[tokio::test]
    async fn queued_turn_keeps_the_lock_alive() {
        let store = SessionStore::in_memory();
        let first = store.lock("s1").await;

        let queued = {
            let store = store.clone();
            tokio::spawn(async move {
                let _second = store.lock("s1").await;
            })
        };
        // let the second turn reach the mutex queue
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(store.active_locks(), 1);

        queued.await.unwrap();
        assert_eq!(store.active_locks(), 0);
    }
}

//! Per-thread conversation memory.
//!
//! Histories live in process memory, keyed by the client's thread id. The
//! store is created once at startup and handed to whoever needs it; nothing
//! here is global.

use crate::config::MemoryConfig;
use crate::conversation::Conversation;
use crate::types::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

type TurnLocks = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

struct ThreadEntry {
    messages: Vec<Message>,
    /// Commit sequence number; the smallest one is evicted first.
    last_commit: u64,
}

/// Bounded in-memory store mapping thread ids to their history.
pub struct ThreadStore {
    config: MemoryConfig,
    threads: RwLock<HashMap<String, ThreadEntry>>,
    turn_locks: TurnLocks,
    commits: AtomicU64,
}

impl ThreadStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            threads: RwLock::new(HashMap::new()),
            turn_locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
            commits: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Serialise turns on one thread. Hold the guard from `load` until
    /// `commit` so concurrent requests on the same thread see each other's
    /// history. Different threads never wait on each other.
    ///
    /// A lock entry only lives while some turn holds or waits for it; the
    /// last guard to drop removes it.
    pub async fn lock_thread(&self, thread_id: &str) -> TurnGuard {
        let lock = {
            let mut locks = lock_map(&self.turn_locks);
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        // Built before waiting so a cancelled wait still prunes the entry.
        let mut turn = TurnGuard {
            thread_id: thread_id.to_string(),
            locks: self.turn_locks.clone(),
            guard: None,
        };
        turn.guard = Some(lock.lock_owned().await);
        turn
    }

    /// History for `thread_id`, trimmed to `max_history` messages. Empty when
    /// the thread is unknown or memory is disabled.
    pub async fn load(&self, thread_id: &str) -> Conversation {
        if !self.config.enabled {
            return Conversation::new();
        }
        let threads = self.threads.read().await;
        match threads.get(thread_id) {
            Some(entry) => Conversation::from_messages(entry.messages.clone()),
            None => Conversation::new(),
        }
    }

    /// Replace the stored history of `thread_id` with the tail of
    /// `conversation`, evicting the least recently committed threads when over
    /// capacity.
    pub async fn commit(&self, thread_id: &str, conversation: &Conversation) {
        if !self.config.enabled {
            return;
        }
        let messages = conversation.recent(self.config.max_history).to_vec();
        let last_commit = self.commits.fetch_add(1, Ordering::Relaxed);

        let mut threads = self.threads.write().await;
        threads.insert(
            thread_id.to_string(),
            ThreadEntry {
                messages,
                last_commit,
            },
        );

        while threads.len() > self.config.max_threads.max(1) {
            let oldest = threads
                .iter()
                .min_by_key(|(_, entry)| entry.last_commit)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!("Evicting thread {}", id);
                    threads.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Drop the history of one thread.
    pub async fn clear(&self, thread_id: &str) -> bool {
        self.threads.write().await.remove(thread_id).is_some()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        lock_map(&self.turn_locks).len()
    }
}

fn lock_map(
    locks: &std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive access to one thread for the length of a turn.
pub struct TurnGuard {
    thread_id: String,
    locks: TurnLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        // Release the mutex first so its Arc no longer counts as a user.
        drop(self.guard.take());
        let mut locks = lock_map(&self.locks);
        if locks
            .get(&self.thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.thread_id);
        }
    }
}

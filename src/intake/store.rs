//! Conversation state store — one state handle per active user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::state::ConversationState;

/// Shared, individually lockable state for one user.
///
/// Holding the mutex for a whole turn is what serializes a user's messages;
/// the map lock is only taken briefly to look the handle up.
pub type StateHandle = Arc<Mutex<ConversationState>>;

/// In-memory map from user identity to conversation state.
pub struct ConversationStore {
    states: RwLock<HashMap<String, StateHandle>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Return the user's state, creating a fresh one on first contact.
    pub async fn get_or_create(&self, user_id: &str) -> StateHandle {
        if let Some(handle) = self.states.read().await.get(user_id) {
            return Arc::clone(handle);
        }

        let mut states = self.states.write().await;
        let handle = states.entry(user_id.to_string()).or_insert_with(|| {
            tracing::debug!(user_id, "Starting new intake conversation");
            Arc::new(Mutex::new(ConversationState::new(user_id)))
        });
        Arc::clone(handle)
    }

    /// Drop the user's state unconditionally.
    pub async fn remove(&self, user_id: &str) -> Option<StateHandle> {
        self.states.write().await.remove(user_id)
    }

    /// Drop the user's state only if it is still `handle`.
    ///
    /// Guards against removing a conversation that was created after `handle`
    /// was retired.
    pub async fn remove_if_current(&self, user_id: &str, handle: &StateHandle) -> bool {
        let mut states = self.states.write().await;
        match states.get(user_id) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                states.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.states.read().await.contains_key(user_id)
    }

    /// Number of conversations in progress.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }

    /// Evict conversations with no activity for at least `max_idle`.
    ///
    /// A state whose lock is held is mid-turn and always kept. Evicted states
    /// are retired so a task still holding the handle starts over instead of
    /// advancing an orphan.
    pub async fn prune_idle(&self, max_idle: Duration) -> usize {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|user_id, handle| {
            let Ok(mut state) = handle.try_lock() else {
                return true;
            };
            if state.idle_for() < max_idle {
                return true;
            }
            tracing::debug!(user_id, step = state.step(), "Evicting idle intake");
            state.retire();
            false
        });

        let pruned = before - states.len();
        if pruned > 0 {
            tracing::info!(pruned, active = states.len(), "Pruned idle intake conversations");
        } else {
            tracing::debug!(active = states.len(), "No idle intake conversations");
        }
        pruned
    }

    /// Run [`prune_idle`](Self::prune_idle) periodically until the task is aborted.
    pub fn spawn_idle_sweep(self: &Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = (max_idle / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick is immediate
            loop {
                interval.tick().await;
                store.prune_idle(max_idle).await;
            }
        })
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

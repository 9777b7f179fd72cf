use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("permission denied")] PermissionDenied,
    #[error("rejected: {0}")] Validation(String),
    #[error("not found")] NotFound,
    #[error("network: {0}")] Network(String),
    #[error("timed out")] Timeout,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The authoritative message store for discussion threads.
///
/// Implementations must hand out unique ids and strictly increasing
/// `created_at` values, and must offer read-after-write consistency: a
/// `list_messages` that starts after `create_message` returned includes
/// that message.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Every message in the thread, in no particular order.
    async fn list_messages(&self, thread_id: Id) -> StoreResult<Vec<Message>>;
    async fn create_message(&self, new: NewMessage) -> StoreResult<CommittedMessage>;
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, PoisonError, RwLock};

    use chrono::{DateTime, Duration, Utc};

    #[derive(Default)]
    struct ThreadRecord {
        locked: bool,
    }

    #[derive(Default)]
    struct State {
        threads: HashMap<Id, ThreadRecord>,
        messages: HashMap<Id, Message>,
        next_id: Id,
        last_created_at: Option<DateTime<Utc>>,
    }

    /// Process-local store. Cheap to clone; clones share state.
    #[derive(Clone, Default)]
    pub struct InMemStore {
        state: Arc<RwLock<State>>,
    }

    impl InMemStore {
        pub fn new() -> Self { Self::default() }

        /// Registers a thread that accepts new messages. Idempotent.
        pub fn open_thread(&self, thread_id: Id) {
            let mut s = self.state.write().unwrap_or_else(PoisonError::into_inner);
            s.threads.entry(thread_id).or_default().locked = false;
        }

        /// Closes a thread to new messages; reads keep working.
        pub fn lock_thread(&self, thread_id: Id) {
            let mut s = self.state.write().unwrap_or_else(PoisonError::into_inner);
            s.threads.entry(thread_id).or_default().locked = true;
        }

        /// Inserts an already-committed message verbatim (fixtures, imports).
        /// Registers its thread and keeps the id counter ahead of it.
        pub fn seed(&self, messages: impl IntoIterator<Item = Message>) {
            let mut s = self.state.write().unwrap_or_else(PoisonError::into_inner);
            for m in messages {
                let Some(id) = m.id.stored() else { continue };
                s.threads.entry(m.thread_id).or_default();
                s.next_id = s.next_id.max(id);
                if let Some(at) = m.created_at {
                    if s.last_created_at.map_or(true, |last| at > last) {
                        s.last_created_at = Some(at);
                    }
                }
                s.messages.insert(id, m);
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        // wall clock, bumped past the previous stamp when it stalls or steps back
        fn next_created_at(state: &mut State) -> DateTime<Utc> {
            let now = Utc::now();
            let at = match state.last_created_at {
                Some(last) if now <= last => last + Duration::microseconds(1),
                _ => now,
            };
            state.last_created_at = Some(at);
            at
        }
    }

    #[async_trait]
    impl MessageStore for InMemStore {
        async fn list_messages(&self, thread_id: Id) -> StoreResult<Vec<Message>> {
            let s = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if !s.threads.contains_key(&thread_id) { return Err(StoreError::NotFound); }
            Ok(s.messages.values().filter(|m| m.thread_id == thread_id).cloned().collect())
        }

        async fn create_message(&self, new: NewMessage) -> StoreResult<CommittedMessage> {
            let mut s = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let thread = s.threads.get(&new.thread_id).ok_or(StoreError::NotFound)?;
            if thread.locked { return Err(StoreError::PermissionDenied); }
            if new.text.trim().is_empty() {
                return Err(StoreError::Validation("text must not be empty".into()));
            }
            if let Some(parent) = new.parent_id {
                match s.messages.get(&parent) {
                    Some(p) if p.thread_id == new.thread_id => {}
                    _ => return Err(StoreError::NotFound),
                }
            }
            let id = Self::next_id(&mut s);
            let created_at = Self::next_created_at(&mut s);
            let message = Message {
                id: MessageId::Stored(id),
                thread_id: new.thread_id,
                parent_id: new.parent_id,
                author_id: new.author.id,
                author_name: new.author.name,
                author_avatar_ref: new.author.avatar_ref,
                text: new.text,
                created_at: Some(created_at),
                attachments: new.attachments,
            };
            s.messages.insert(id, message);
            Ok(CommittedMessage { id, created_at })
        }
    }
}

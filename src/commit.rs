//! Optimistic posting.
//!
//! A submit splices a provisional message into the view right away, appends
//! to the store, then replaces the view's message list with a fresh
//! `list_messages`. The provisional message is never merged into store
//! data: it is dropped as soon as a refetch that contains its committed id
//! has been applied, or when the post fails.
//!
//! At most one post per target is in flight at any time. Different targets
//! proceed independently.

use std::future::Future;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PostError, ValidationError};
use crate::models::*;
use crate::rate_limit::SubmitThrottle;
use crate::store::{MessageStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Idle,
    Submitting,
    Committed,
    Failed,
}

impl CommitState {
    /// The only legal moves are `Idle -> Submitting -> Committed | Failed`.
    pub fn can_advance_to(self, next: CommitState) -> bool {
        use CommitState::*;
        matches!((self, next), (Idle, Submitting) | (Submitting, Committed) | (Submitting, Failed))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CommitState::Committed | CommitState::Failed)
    }
}

/// One post, from submit to its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAttempt {
    pub thread_id: Id,
    pub target: Target,
    pub provisional_id: ProvisionalId,
    /// Exactly what the caller submitted, untrimmed.
    pub text: String,
    pub committed: Option<CommittedMessage>,
    pub error: Option<PostError>,
    state: CommitState,
}

impl CommitAttempt {
    fn new(thread_id: Id, target: Target, provisional_id: ProvisionalId, text: String) -> Self {
        Self { thread_id, target, provisional_id, text, committed: None, error: None, state: CommitState::Idle }
    }

    pub fn state(&self) -> CommitState { self.state }

    fn advance(&mut self, next: CommitState) {
        debug_assert!(self.state.can_advance_to(next), "illegal commit transition {:?} -> {:?}", self.state, next);
        debug!(reply_to = ?self.target, provisional_id = %self.provisional_id, from = ?self.state, to = ?next, "commit transition");
        self.state = next;
    }
}

/// What to post; thread and author come from the view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitRequest {
    pub target: Target,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl SubmitRequest {
    pub fn new(target: Target, text: impl Into<String>) -> Self {
        Self { target, text: text.into(), attachments: Vec::new() }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// The view side of a commit: where provisional messages are shown and
/// refetched lists land. Every call is short and never awaits.
pub trait CommitSink: Send + Sync {
    /// Whether `id` is in the current authoritative message list.
    fn knows(&self, id: Id) -> bool;
    /// Shows a provisional message.
    fn splice(&self, provisional: Message);
    /// The store accepted the provisional message under `committed.id`.
    fn committed(&self, provisional_id: ProvisionalId, committed: CommittedMessage);
    /// Hands out a ticket ordering refetches by start time.
    fn begin_refetch(&self) -> u64;
    /// Replaces the authoritative list unless a later-started refetch already landed.
    fn reconcile(&self, ticket: u64, messages: Vec<Message>);
    /// Removes a provisional message if it is still shown.
    fn withdraw(&self, provisional_id: ProvisionalId);
    /// Keeps the text of a failed post around for retry.
    fn failed(&self, target: Target, text: String, error: PostError);
    fn succeeded(&self, target: Target);
    fn state_changed(&self, attempt: &CommitAttempt);
}

pub struct Coordinator {
    inflight: DashMap<Target, ProvisionalId>,
    throttle: SubmitThrottle,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(throttle: SubmitThrottle, timeout: Duration) -> Self {
        Self { inflight: DashMap::new(), throttle, timeout }
    }

    pub fn in_flight(&self, target: Target) -> bool {
        self.inflight.contains_key(&target)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Runs one post to completion.
    ///
    /// `Err` means the post was rejected up front (empty text, unknown or
    /// busy target, throttled) and nothing changed. Otherwise the returned
    /// attempt is `Committed` or `Failed`; on failure the text has been
    /// handed back through [`CommitSink::failed`].
    pub async fn submit(
        &self,
        sink: &dyn CommitSink,
        store: &dyn MessageStore,
        thread_id: Id,
        author: &Author,
        request: SubmitRequest,
    ) -> Result<CommitAttempt, PostError> {
        let SubmitRequest { target, text, attachments } = request;
        let body = text.trim().to_string();
        if body.is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        if let Some(parent) = target {
            if !sink.knows(parent) {
                return Err(ValidationError::UnknownTarget(parent).into());
            }
        }

        let provisional_id = ProvisionalId::generate();
        let mut guard = self.claim(target, provisional_id, sink)?;
        if !self.throttle.allow(&author.id) {
            debug!(thread_id, author = %author.id, "submit throttled");
            return Err(PostError::RateLimited);
        }

        let mut attempt = CommitAttempt::new(thread_id, target, provisional_id, text);
        attempt.advance(CommitState::Submitting);
        sink.splice(Message {
            id: MessageId::Provisional(provisional_id),
            thread_id,
            parent_id: target,
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            author_avatar_ref: author.avatar_ref.clone(),
            text: body.clone(),
            created_at: None,
            attachments: attachments.clone(),
        });
        guard.spliced = true;
        sink.state_changed(&attempt);

        let new = NewMessage { thread_id, parent_id: target, author: author.clone(), text: body, attachments };
        match bounded(self.timeout, store.create_message(new)).await {
            Err(error) => {
                warn!(thread_id, reply_to = ?target, provisional_id = %provisional_id, %error, "post failed");
                sink.withdraw(provisional_id);
                guard.spliced = false;
                attempt.error = Some(error.clone());
                attempt.advance(CommitState::Failed);
                // on record before the slot frees for the next post
                sink.failed(target, attempt.text.clone(), error);
                drop(guard);
                sink.state_changed(&attempt);
            }
            Ok(committed) => {
                sink.committed(provisional_id, committed);
                attempt.committed = Some(committed);
                let ticket = sink.begin_refetch();
                match bounded(self.timeout, store.list_messages(thread_id)).await {
                    Ok(messages) => {
                        sink.reconcile(ticket, messages);
                        sink.withdraw(provisional_id);
                    }
                    // the post is stored; its provisional stays up until the next refetch lands
                    Err(error) => warn!(thread_id, id = committed.id, %error, "refetch after commit failed"),
                }
                guard.spliced = false;
                attempt.advance(CommitState::Committed);
                sink.succeeded(target);
                drop(guard);
                sink.state_changed(&attempt);
            }
        }
        Ok(attempt)
    }

    fn claim<'a>(
        &'a self,
        target: Target,
        provisional_id: ProvisionalId,
        sink: &'a dyn CommitSink,
    ) -> Result<InFlight<'a>, PostError> {
        match self.inflight.entry(target) {
            Entry::Occupied(_) => Err(ValidationError::TargetBusy(target).into()),
            Entry::Vacant(slot) => {
                slot.insert(provisional_id);
                Ok(InFlight { inflight: &self.inflight, sink, target, provisional_id, spliced: false })
            }
        }
    }
}

/// Holds the per-target slot. Dropping it (including when the submit future
/// itself is dropped mid-flight) frees the slot and takes down a provisional
/// message that never settled.
struct InFlight<'a> {
    inflight: &'a DashMap<Target, ProvisionalId>,
    sink: &'a dyn CommitSink,
    target: Target,
    provisional_id: ProvisionalId,
    spliced: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inflight.remove(&self.target);
        if self.spliced {
            warn!(reply_to = ?self.target, provisional_id = %self.provisional_id, "post abandoned before it settled");
            self.sink.withdraw(self.provisional_id);
        }
    }
}

/// Runs a store call under `timeout`, mapping its error into a [`PostError`].
pub(crate) async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = StoreResult<T>>,
) -> Result<T, PostError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(PostError::from),
        Err(_) => Err(PostError::Timeout),
    }
}

//! One open discussion: its authoritative messages, the provisional
//! messages of posts still in flight, the rendered tree and the reply focus.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::builder::{build_overlay, Anomaly, ThreadNode};
use crate::commit::{bounded, CommitAttempt, CommitSink, CommitState, Coordinator, SubmitRequest};
use crate::config::ViewConfig;
use crate::error::{PostError, ValidationError};
use crate::focus::ReplyFocus;
use crate::models::*;
use crate::rate_limit::SubmitThrottle;
use crate::store::MessageStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewEvent {
    TreeChanged { generation: u64 },
    CommitStateChanged { target: Target, provisional_id: ProvisionalId, state: CommitState },
}

/// The text of a post that failed, kept for the retry affordance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPost {
    pub text: String,
    pub error: PostError,
}

struct Provisional {
    message: Message,
    committed_as: Option<Id>,
}

#[derive(Default)]
struct ViewState {
    authoritative: Arc<Vec<Message>>,
    provisionals: BTreeMap<ProvisionalId, Provisional>,
    tree: Arc<Vec<ThreadNode>>,
    anomalies: Arc<Vec<Anomaly>>,
    generation: u64,
    next_ticket: u64,
    applied_ticket: u64,
    failures: HashMap<Target, FailedPost>,
}

impl ViewState {
    // snapshots are swapped whole, never patched
    fn rebuild(&mut self) -> u64 {
        let overlay: Vec<Message> = self.provisionals.values().map(|p| p.message.clone()).collect();
        let out = build_overlay(&self.authoritative, &overlay);
        self.tree = Arc::new(out.roots);
        self.anomalies = Arc::new(out.anomalies);
        self.generation += 1;
        self.generation
    }
}

struct Inner {
    thread_id: Id,
    author: Author,
    store: Arc<dyn MessageStore>,
    config: ViewConfig,
    state: RwLock<ViewState>,
    focus: Mutex<ReplyFocus>,
    coordinator: Coordinator,
    events: broadcast::Sender<ViewEvent>,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, ViewState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn focus(&self) -> MutexGuard<'_, ReplyFocus> {
        self.focus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Callers hold the state write lock, so events leave in the order the
    // state changed and `TreeChanged` generations only ever increase.
    fn publish(&self, _state: &RwLockWriteGuard<'_, ViewState>, event: ViewEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl CommitSink for Inner {
    fn knows(&self, id: Id) -> bool {
        self.read().authoritative.iter().any(|m| m.id == MessageId::Stored(id))
    }

    fn splice(&self, provisional: Message) {
        let MessageId::Provisional(pid) = provisional.id else { return };
        let mut s = self.write();
        s.failures.remove(&provisional.parent_id);
        s.provisionals.insert(pid, Provisional { message: provisional, committed_as: None });
        let generation = s.rebuild();
        self.publish(&s, ViewEvent::TreeChanged { generation });
    }

    fn committed(&self, provisional_id: ProvisionalId, committed: CommittedMessage) {
        if let Some(p) = self.write().provisionals.get_mut(&provisional_id) {
            p.committed_as = Some(committed.id);
        }
    }

    fn begin_refetch(&self) -> u64 {
        let mut s = self.write();
        s.next_ticket += 1;
        s.next_ticket
    }

    fn reconcile(&self, ticket: u64, messages: Vec<Message>) {
        let mut s = self.write();
        if ticket <= s.applied_ticket {
            debug!(thread_id = self.thread_id, ticket, applied = s.applied_ticket, "stale refetch discarded");
            return;
        }
        s.applied_ticket = ticket;
        let present: HashSet<Id> = messages.iter().filter_map(|m| m.id.stored()).collect();
        s.provisionals.retain(|_, p| !p.committed_as.is_some_and(|id| present.contains(&id)));
        s.authoritative = Arc::new(messages);
        let generation = s.rebuild();
        self.publish(&s, ViewEvent::TreeChanged { generation });
    }

    fn withdraw(&self, provisional_id: ProvisionalId) {
        let mut s = self.write();
        if s.provisionals.remove(&provisional_id).is_none() { return; }
        let generation = s.rebuild();
        self.publish(&s, ViewEvent::TreeChanged { generation });
    }

    fn failed(&self, target: Target, text: String, error: PostError) {
        self.write().failures.insert(target, FailedPost { text: text.clone(), error });
        let mut focus = self.focus();
        if focus.can_restore(target) {
            focus.restore(target, text);
        }
    }

    fn succeeded(&self, target: Target) {
        self.focus().settle(target);
    }

    fn state_changed(&self, attempt: &CommitAttempt) {
        let s = self.write();
        self.publish(&s, ViewEvent::CommitStateChanged {
            target: attempt.target,
            provisional_id: attempt.provisional_id,
            state: attempt.state(),
        });
    }
}

/// A single open discussion thread.
///
/// Cheap to clone; clones are handles to the same view, so independent
/// posts (to different targets) can be driven from separate tasks.
#[derive(Clone)]
pub struct ThreadView {
    inner: Arc<Inner>,
}

impl ThreadView {
    /// Loads the thread and builds the first tree.
    pub async fn open(
        thread_id: Id,
        store: Arc<dyn MessageStore>,
        author: Author,
        config: ViewConfig,
    ) -> Result<Self, PostError> {
        let throttle = SubmitThrottle::from_config(&config);
        Self::open_with_throttle(thread_id, store, author, config, throttle).await
    }

    /// Like [`ThreadView::open`], sharing an existing throttle.
    pub async fn open_with_throttle(
        thread_id: Id,
        store: Arc<dyn MessageStore>,
        author: Author,
        config: ViewConfig,
        throttle: SubmitThrottle,
    ) -> Result<Self, PostError> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let coordinator = Coordinator::new(throttle, config.commit_timeout);
        let view = Self {
            inner: Arc::new(Inner {
                thread_id,
                author,
                store,
                config,
                state: RwLock::new(ViewState::default()),
                focus: Mutex::new(ReplyFocus::new()),
                coordinator,
                events,
            }),
        };
        view.refresh().await?;
        info!(thread_id, messages = view.messages().len(), "thread view opened");
        Ok(view)
    }

    pub fn thread_id(&self) -> Id { self.inner.thread_id }

    pub fn author(&self) -> &Author { &self.inner.author }

    pub fn config(&self) -> &ViewConfig { &self.inner.config }

    /// The current tree, provisional messages included. Never changes after
    /// it is handed out; later updates produce a new snapshot.
    pub fn get_tree(&self) -> Arc<Vec<ThreadNode>> {
        Arc::clone(&self.inner.read().tree)
    }

    /// Structural problems found in the last build.
    pub fn anomalies(&self) -> Arc<Vec<Anomaly>> {
        Arc::clone(&self.inner.read().anomalies)
    }

    /// The last authoritative list from the store.
    pub fn messages(&self) -> Arc<Vec<Message>> {
        Arc::clone(&self.inner.read().authoritative)
    }

    /// Bumped on every rebuild.
    pub fn generation(&self) -> u64 { self.inner.read().generation }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> { self.inner.events.subscribe() }

    /// Re-reads the thread from the store.
    pub async fn refresh(&self) -> Result<(), PostError> {
        let ticket = self.inner.begin_refetch();
        let messages = bounded(self.inner.config.commit_timeout, self.inner.store.list_messages(self.inner.thread_id)).await?;
        self.inner.reconcile(ticket, messages);
        Ok(())
    }

    pub fn focus(&self) -> ReplyFocus { self.inner.focus().clone() }

    pub fn begin_reply(&self, target: Target) { self.inner.focus().begin_reply(target) }

    pub fn update_draft(&self, text: impl Into<String>) { self.inner.focus().update_draft(text) }

    pub fn cancel(&self) { self.inner.focus().cancel() }

    pub fn consume_draft(&self) -> Option<(Target, String)> { self.inner.focus().consume_draft() }

    pub async fn submit(&self, target: Target, text: impl Into<String>) -> Result<CommitAttempt, PostError> {
        self.submit_request(SubmitRequest::new(target, text)).await
    }

    pub async fn submit_request(&self, request: SubmitRequest) -> Result<CommitAttempt, PostError> {
        let inner = &*self.inner;
        inner.coordinator.submit(inner, inner.store.as_ref(), inner.thread_id, &inner.author, request).await
    }

    /// Submits whatever is in the open composer.
    ///
    /// A rejected submit puts the text back, so the composer looks as it did
    /// before the call.
    pub async fn submit_draft(&self) -> Result<CommitAttempt, PostError> {
        let Some((target, text)) = self.consume_draft() else {
            return Err(ValidationError::EmptyText.into());
        };
        match self.submit(target, text.clone()).await {
            Err(error) => {
                let mut focus = self.inner.focus();
                if focus.can_restore(target) {
                    focus.restore(target, text);
                }
                Err(error)
            }
            ok => ok,
        }
    }

    /// Re-submits the text of the last failed post to `target`.
    pub async fn retry(&self, target: Target) -> Result<CommitAttempt, PostError> {
        let Some(failed) = self.failure(target) else {
            return Err(ValidationError::NothingToRetry.into());
        };
        {
            let mut focus = self.inner.focus();
            if focus.target() == Some(target) && focus.draft() == failed.text {
                focus.consume_draft();
            }
        }
        self.submit(target, failed.text).await
    }

    pub fn failure(&self, target: Target) -> Option<FailedPost> {
        self.inner.read().failures.get(&target).cloned()
    }

    /// Removes the failure record for `target`, returning its text.
    pub fn take_failed_draft(&self, target: Target) -> Option<String> {
        self.inner.write().failures.remove(&target).map(|f| f.text)
    }

    pub fn in_flight(&self, target: Target) -> bool { self.inner.coordinator.in_flight(target) }

    pub fn in_flight_count(&self) -> usize { self.inner.coordinator.in_flight_count() }
}

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned message / thread identifier.
pub type Id = i64;

/// Reply target: `None` is the top-level composer, `Some(id)` a reply to that message.
pub type Target = Option<Id>;

/// Locally generated id for a not-yet-committed message.
///
/// Ordered by `seq` so provisional siblings keep submission order; the
/// nonce keeps ids from two views (or two processes) apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProvisionalId {
    pub seq: u64,
    pub nonce: Uuid,
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

impl ProvisionalId {
    pub fn generate() -> Self {
        Self { seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed), nonce: Uuid::new_v4() }
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provisional:{}:{}", self.seq, self.nonce.simple())
    }
}

/// Identity of a node in the tree. Store ids and provisional ids live in
/// separate variants so they can never collide; every stored id orders
/// before every provisional one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Stored(Id),
    Provisional(ProvisionalId),
}

impl MessageId {
    pub fn stored(&self) -> Option<Id> {
        match self {
            MessageId::Stored(id) => Some(*id),
            MessageId::Provisional(_) => None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, MessageId::Provisional(_))
    }
}

impl From<Id> for MessageId {
    fn from(id: Id) -> Self { MessageId::Stored(id) }
}

impl From<ProvisionalId> for MessageId {
    fn from(id: ProvisionalId) -> Self { MessageId::Provisional(id) }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Stored(id) => write!(f, "{id}"),
            MessageId::Provisional(p) => p.fmt(f),
        }
    }
}

/// Opaque attachment reference. Never inspected here; the rendering layer
/// matches on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Link { url: String, title: Option<String> },
    File { name: String, reference: String, size: Option<u64> },
    Image { reference: String, mime: Option<String> },
}

/// Who is posting from a given view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub avatar_ref: Option<String>,
}

impl Author {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), avatar_ref: None }
    }
}

/// A message as delivered by the store, or a provisional one synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: Id,
    pub parent_id: Option<Id>,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar_ref: Option<String>,
    pub text: String,
    /// Assigned by the store at commit time; absent on provisional messages.
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn is_provisional(&self) -> bool { self.id.is_provisional() }

    /// Sibling ordering key: committed before uncommitted, then `created_at`, then id.
    pub(crate) fn order_key(&self) -> (bool, Option<DateTime<Utc>>, MessageId) {
        (self.created_at.is_none(), self.created_at, self.id)
    }
}

/// Payload handed to `MessageStore::create_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub thread_id: Id,
    pub parent_id: Option<Id>,
    pub author: Author,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// What the store returns for a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedMessage {
    pub id: Id,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_ids_order_before_provisional() {
        let p = MessageId::Provisional(ProvisionalId::generate());
        assert!(MessageId::Stored(i64::MAX) < p);
        assert!(MessageId::Stored(1) < MessageId::Stored(2));
    }

    #[test]
    fn provisional_ids_follow_generation_order() {
        let a = ProvisionalId::generate();
        let b = ProvisionalId::generate();
        assert!(a < b);
        assert_ne!(a.nonce, b.nonce);
        assert!(a.to_string().starts_with("provisional:"));
    }

    #[test]
    fn attachment_is_tagged_by_type() {
        let a: Attachment = serde_json::from_str(r#"{"type":"link","url":"https://x","title":null}"#).unwrap();
        assert!(matches!(a, Attachment::Link { .. }));
    }

    #[test]
    fn stored_message_deserializes_with_numeric_id() {
        let m: Message = serde_json::from_str(r#"{
            "id": 7, "thread_id": 1, "parent_id": null,
            "author_id": "u1", "author_name": "Ann", "author_avatar_ref": null,
            "text": "hi", "created_at": "2024-01-01T00:00:00Z"
        }"#).unwrap();
        assert_eq!(m.id, MessageId::Stored(7));
        assert!(m.attachments.is_empty());
    }
}

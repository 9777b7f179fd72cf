use crate::models::{Id, Target};

/// Which single composer is open in a thread view, and what is typed in it.
///
/// `Closed` is the state on open and after `cancel`. `Open { target: None, .. }`
/// is the top-level composer; `Open { target: Some(id), .. }` a reply under `id`.
/// Only one composer is ever open: switching targets discards the previous
/// draft without asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReplyFocus {
    #[default]
    Closed,
    Open { target: Target, draft: String },
}

impl ReplyFocus {
    pub fn new() -> Self { Self::default() }

    /// Opens the composer for `target` with an empty draft. Asking again for
    /// the reply target that is already open closes it back to the top-level
    /// composer.
    pub fn begin_reply(&mut self, target: Target) {
        let next = match (&*self, target) {
            (ReplyFocus::Open { target: Some(current), .. }, Some(id)) if *current == id => None,
            _ => target,
        };
        *self = ReplyFocus::Open { target: next, draft: String::new() };
    }

    /// Ignored while closed.
    pub fn update_draft(&mut self, text: impl Into<String>) {
        if let ReplyFocus::Open { draft, .. } = self {
            *draft = text.into();
        }
    }

    pub fn cancel(&mut self) {
        *self = ReplyFocus::Closed;
    }

    /// Takes the draft out, leaving the composer open with an empty draft, so
    /// a second submit in quick succession finds nothing to send.
    pub fn consume_draft(&mut self) -> Option<(Target, String)> {
        match self {
            ReplyFocus::Open { target, draft } => Some((*target, std::mem::take(draft))),
            ReplyFocus::Closed => None,
        }
    }

    /// Reopens `target` with `text` after a failed post.
    pub fn restore(&mut self, target: Target, text: impl Into<String>) {
        *self = ReplyFocus::Open { target, draft: text.into() };
    }

    /// Whether a failed post for `target` may be put back without clobbering
    /// something the user has typed since.
    pub fn can_restore(&self, target: Target) -> bool {
        match self {
            ReplyFocus::Closed => true,
            ReplyFocus::Open { target: t, draft } => *t == target || draft.is_empty(),
        }
    }

    /// Closes the composer after a successful post, unless the user already
    /// moved on to another target or started typing again.
    pub(crate) fn settle(&mut self, target: Target) {
        if let ReplyFocus::Open { target: t, draft } = self {
            if *t == target && draft.is_empty() {
                *self = ReplyFocus::Closed;
            }
        }
    }

    pub fn target(&self) -> Option<Target> {
        match self {
            ReplyFocus::Open { target, .. } => Some(*target),
            ReplyFocus::Closed => None,
        }
    }

    pub fn is_replying_to(&self, id: Id) -> bool {
        self.target() == Some(Some(id))
    }

    pub fn draft(&self) -> &str {
        match self {
            ReplyFocus::Open { draft, .. } => draft,
            ReplyFocus::Closed => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed_and_ignores_typing() {
        let mut f = ReplyFocus::new();
        f.update_draft("lost");
        assert_eq!(f, ReplyFocus::Closed);
        assert_eq!(f.consume_draft(), None);
    }

    #[test]
    fn begin_reply_twice_toggles_back_to_top_level() {
        let mut f = ReplyFocus::new();
        f.begin_reply(Some(4));
        assert!(f.is_replying_to(4));
        f.update_draft("half typed");
        f.begin_reply(Some(4));
        assert_eq!(f, ReplyFocus::Open { target: None, draft: String::new() });
    }

    #[test]
    fn switching_target_discards_draft() {
        let mut f = ReplyFocus::new();
        f.begin_reply(Some(1));
        f.update_draft("for one");
        f.begin_reply(Some(2));
        assert!(f.is_replying_to(2));
        assert!(!f.is_replying_to(1));
        assert_eq!(f.draft(), "");
    }

    #[test]
    fn consume_draft_empties_it_once() {
        let mut f = ReplyFocus::new();
        f.begin_reply(None);
        f.update_draft("hello");
        assert_eq!(f.consume_draft(), Some((None, "hello".to_string())));
        assert_eq!(f.consume_draft(), Some((None, String::new())));
    }

    #[test]
    fn cancel_clears_everything() {
        let mut f = ReplyFocus::new();
        f.begin_reply(Some(3));
        f.update_draft("x");
        f.cancel();
        assert_eq!(f, ReplyFocus::Closed);
        assert_eq!(f.target(), None);
    }

    #[test]
    fn restore_respects_newer_typing_elsewhere() {
        let mut f = ReplyFocus::new();
        f.begin_reply(Some(2));
        f.update_draft("newer work");
        assert!(!f.can_restore(Some(1)));
        assert!(f.can_restore(Some(2)));
        f.cancel();
        assert!(f.can_restore(Some(1)));
        f.restore(Some(1), "retry me");
        assert_eq!(f.draft(), "retry me");
    }

    #[test]
    fn settle_only_closes_matching_empty_composer() {
        let mut f = ReplyFocus::new();
        f.begin_reply(Some(1));
        f.settle(Some(2));
        assert!(f.is_replying_to(1));
        f.settle(Some(1));
        assert_eq!(f, ReplyFocus::Closed);
    }
}

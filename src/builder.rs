//! Flat message list to ordered reply forest.
//!
//! Pure and synchronous. Messages are indexed into an arena and linked by
//! index; owned [`ThreadNode`]s are only assembled at the very end, bottom-up,
//! so neither malformed input nor very deep threads recurse on the stack.
//! Dropping, cloning and comparing trees is iterative as well. `Debug` and
//! `Serialize` still recurse once per level.
//!
//! Policy for malformed input:
//! - duplicate id: the first occurrence wins, later ones are dropped;
//! - orphan (parent id not in the list): the message becomes a root;
//! - cycle (self-parent, or a parent chain leading back to the message):
//!   messages are attached in `(created_at, id)` order and the attachment
//!   that would close the loop is refused, so that message becomes a root.
//!
//! Each case is reported as an [`Anomaly`]; none of them is an error.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{Id, Message, MessageId};

#[derive(Debug, Serialize)]
pub struct ThreadNode {
    pub message: Message,
    pub children: Vec<ThreadNode>,
}

impl Drop for ThreadNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

impl Clone for ThreadNode {
    fn clone(&self) -> Self {
        // breadth-first, so each node's children sit in one contiguous run
        let mut seq: Vec<&ThreadNode> = vec![self];
        let mut first_child = Vec::new();
        let mut k = 0;
        while k < seq.len() {
            let node = seq[k];
            first_child.push(seq.len());
            seq.extend(node.children.iter());
            k += 1;
        }
        let mut built: Vec<Option<ThreadNode>> = (0..seq.len()).map(|_| None).collect();
        let take_children = |built: &mut Vec<Option<ThreadNode>>, k: usize| -> Vec<ThreadNode> {
            let start = first_child[k];
            (start..start + seq[k].children.len()).filter_map(|c| built[c].take()).collect()
        };
        for k in (1..seq.len()).rev() {
            let children = take_children(&mut built, k);
            built[k] = Some(ThreadNode { message: seq[k].message.clone(), children });
        }
        ThreadNode { message: self.message.clone(), children: take_children(&mut built, 0) }
    }
}

impl PartialEq for ThreadNode {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.message != b.message || a.children.len() != b.children.len() {
                return false;
            }
            stack.extend(a.children.iter().zip(&b.children));
        }
        true
    }
}

impl Eq for ThreadNode {}

impl ThreadNode {
    pub fn id(&self) -> MessageId { self.message.id }

    pub fn is_provisional(&self) -> bool { self.message.is_provisional() }

    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&ThreadNode> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Levels in this subtree; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, d)) = stack.pop() {
            max = max.max(d);
            stack.extend(node.children.iter().map(|c| (c, d + 1)));
        }
        max
    }

    pub fn find(&self, id: MessageId) -> Option<&ThreadNode> {
        find(std::slice::from_ref(self), id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    DuplicateId { id: MessageId },
    Orphan { id: MessageId, parent_id: Id },
    Cycle { id: MessageId, parent_id: Id },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    pub roots: Vec<ThreadNode>,
    pub anomalies: Vec<Anomaly>,
}

pub fn build(messages: &[Message]) -> Vec<ThreadNode> {
    assemble(messages).roots
}

pub fn build_with_report(messages: &[Message]) -> BuildOutput {
    assemble(messages)
}

/// Builds over the authoritative list plus locally synthesized messages,
/// without concatenating them first.
pub fn build_overlay(authoritative: &[Message], overlay: &[Message]) -> BuildOutput {
    assemble(authoritative.iter().chain(overlay))
}

fn assemble<'a>(messages: impl IntoIterator<Item = &'a Message>) -> BuildOutput {
    let mut anomalies = Vec::new();

    // 1. index, first occurrence wins
    let mut index: HashMap<MessageId, usize> = HashMap::new();
    let mut arena: Vec<&Message> = Vec::new();
    for m in messages {
        match index.entry(m.id) {
            Entry::Occupied(_) => {
                warn!(id = %m.id, "duplicate message id, keeping first occurrence");
                anomalies.push(Anomaly::DuplicateId { id: m.id });
            }
            Entry::Vacant(slot) => {
                slot.insert(arena.len());
                arena.push(m);
            }
        }
    }
    let n = arena.len();

    // 2. attach in sibling order, refusing any link that would close a loop
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| arena[i].order_key());

    let mut parent: Vec<Option<usize>> = vec![None; n];
    // a message with nothing attached below it yet cannot close a loop
    // except through itself
    let mut has_children = vec![false; n];
    for &i in &order {
        let m = arena[i];
        let Some(parent_id) = m.parent_id else { continue };
        match index.get(&MessageId::Stored(parent_id)) {
            None => {
                debug!(id = %m.id, parent_id, "orphaned message promoted to root");
                anomalies.push(Anomaly::Orphan { id: m.id, parent_id });
            }
            Some(&p) if p == i || (has_children[i] && closes_cycle(&parent, i, p)) => {
                warn!(id = %m.id, parent_id, "parent cycle, message demoted to root");
                anomalies.push(Anomaly::Cycle { id: m.id, parent_id });
            }
            Some(&p) => {
                parent[i] = Some(p);
                has_children[p] = true;
            }
        }
    }

    // 3. children lists come out sorted because `order` is sorted
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots = Vec::new();
    for &i in &order {
        match parent[i] {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
    }

    // 4. breadth-first sequence, then build owned nodes from the leaves up
    let mut seq = roots.clone();
    let mut k = 0;
    while k < seq.len() {
        seq.extend_from_slice(&children[seq[k]]);
        k += 1;
    }
    let mut built: Vec<Option<ThreadNode>> = (0..n).map(|_| None).collect();
    for &i in seq.iter().rev() {
        let kids = children[i].iter().filter_map(|&c| built[c].take()).collect();
        built[i] = Some(ThreadNode { message: arena[i].clone(), children: kids });
    }

    BuildOutput {
        roots: roots.iter().filter_map(|&r| built[r].take()).collect(),
        anomalies,
    }
}

// Walks up the links made so far; `parent` is acyclic by construction, the
// bound only guards the loop itself.
fn closes_cycle(parent: &[Option<usize>], child: usize, candidate: usize) -> bool {
    let mut cur = Some(candidate);
    for _ in 0..=parent.len() {
        match cur {
            Some(c) if c == child => return true,
            Some(c) => cur = parent[c],
            None => return false,
        }
    }
    true
}

/// Pre-order flattening back to a message list.
pub fn flatten(roots: &[ThreadNode]) -> Vec<Message> {
    let mut out = Vec::new();
    let mut stack: Vec<&ThreadNode> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node.message.clone());
        stack.extend(node.children.iter().rev());
    }
    out
}

pub fn find(roots: &[ThreadNode], id: MessageId) -> Option<&ThreadNode> {
    let mut stack: Vec<&ThreadNode> = roots.iter().collect();
    while let Some(node) = stack.pop() {
        if node.id() == id { return Some(node); }
        stack.extend(node.children.iter());
    }
    None
}

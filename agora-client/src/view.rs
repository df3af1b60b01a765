use std::collections::HashSet;

use crate::{
    api::{ParentKey, Reply, ReplyId},
    Expansion, ExpansionTracker, ReplyTreeCache,
};

/// One line of the rendered discussion
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct VisibleReply {
    pub reply: Reply,

    /// 0 for replies to the question
    pub depth: usize,

    pub expansion: Expansion,
    pub children_loaded: bool,
    pub liked_by_me: bool,
}

/// Everything that should currently be displayed, in display order
///
/// A reply's children are listed right after it, and only if it is expanded.
pub fn visible_tree(
    cache: &ReplyTreeCache,
    expansion: &ExpansionTracker,
    liked: &HashSet<ReplyId>,
) -> Vec<VisibleReply> {
    let mut res = Vec::new();
    let mut stack = Vec::new();
    push_children(&mut stack, cache.get(&ParentKey::Root), 0);
    while let Some((reply, depth)) = stack.pop() {
        let key = ParentKey::Reply(reply.id.clone());
        let state = expansion.state(&reply.id);
        if state == Expansion::Expanded {
            push_children(&mut stack, cache.get(&key), depth + 1);
        }
        res.push(VisibleReply {
            reply: reply.clone(),
            depth,
            expansion: state,
            children_loaded: cache.is_loaded(&key),
            liked_by_me: liked.contains(&reply.id),
        });
    }
    res
}

fn push_children<'a>(
    stack: &mut Vec<(&'a Reply, usize)>,
    bucket: Option<&'a [Reply]>,
    depth: usize,
) {
    if let Some(bucket) = bucket {
        stack.extend(bucket.iter().rev().map(|r| (r, depth)));
    }
}

use std::collections::{HashMap, HashSet};

use crate::api::ReplyId;

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Serialize)]
pub enum Expansion {
    #[default]
    Collapsed,
    Loading,
    Expanded,
}

/// What the caller has to do after asking for a node to be expanded
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpandStep {
    /// Nothing to do, the node is already expanded or loading
    Nothing,

    /// The node's replies were already loaded, it is now expanded
    Shown,

    /// The node is now loading, the caller must fetch its replies and then call
    /// `finish_load`
    Fetch,
}

/// Expansion state of every reply; the question itself is always expanded
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExpansionTracker {
    states: HashMap<ReplyId, Expansion>,
}

impl ExpansionTracker {
    pub fn new() -> ExpansionTracker {
        ExpansionTracker::default()
    }

    pub fn state(&self, rid: &ReplyId) -> Expansion {
        self.states.get(rid).copied().unwrap_or_default()
    }

    /// `loaded` tells whether the node's replies are already in the cache
    pub fn expand(&mut self, rid: &ReplyId, loaded: bool) -> ExpandStep {
        match self.state(rid) {
            Expansion::Expanded | Expansion::Loading => ExpandStep::Nothing,
            Expansion::Collapsed if loaded => {
                self.states.insert(rid.clone(), Expansion::Expanded);
                ExpandStep::Shown
            }
            Expansion::Collapsed => {
                self.states.insert(rid.clone(), Expansion::Loading);
                ExpandStep::Fetch
            }
        }
    }

    /// Returns whether anything changed
    pub fn collapse(&mut self, rid: &ReplyId) -> bool {
        match self.state(rid) {
            Expansion::Expanded => {
                self.states.insert(rid.clone(), Expansion::Collapsed);
                true
            }
            // the in-flight fetch decides what happens next
            Expansion::Loading | Expansion::Collapsed => false,
        }
    }

    pub fn toggle(&mut self, rid: &ReplyId, loaded: bool) -> ExpandStep {
        match self.state(rid) {
            Expansion::Expanded => {
                self.collapse(rid);
                ExpandStep::Nothing
            }
            Expansion::Loading | Expansion::Collapsed => self.expand(rid, loaded),
        }
    }

    /// Resolve a `Loading` state once the fetch settled
    pub fn finish_load(&mut self, rid: &ReplyId, success: bool) {
        if self.state(rid) != Expansion::Loading {
            tracing::warn!(?rid, "load finished for a node that was not loading");
            return;
        }
        let next = match success {
            true => Expansion::Expanded,
            false => Expansion::Collapsed,
        };
        self.states.insert(rid.clone(), next);
    }

    /// Drop all state for replies that no longer exist
    pub fn forget(&mut self, ids: &HashSet<ReplyId>) {
        self.states.retain(|rid, _| !ids.contains(rid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r1() -> ReplyId {
        ReplyId::from("r1")
    }

    #[test]
    fn first_expand_loads() {
        let mut t = ExpansionTracker::new();
        assert_eq!(t.state(&r1()), Expansion::Collapsed);
        assert_eq!(t.toggle(&r1(), false), ExpandStep::Fetch);
        assert_eq!(t.state(&r1()), Expansion::Loading);
        t.finish_load(&r1(), true);
        assert_eq!(t.state(&r1()), Expansion::Expanded);
    }

    #[test]
    fn toggle_while_loading_is_noop() {
        let mut t = ExpansionTracker::new();
        assert_eq!(t.toggle(&r1(), false), ExpandStep::Fetch);
        assert_eq!(t.toggle(&r1(), false), ExpandStep::Nothing);
        assert_eq!(t.state(&r1()), Expansion::Loading);
        assert!(!t.collapse(&r1()));
        assert_eq!(t.state(&r1()), Expansion::Loading);
    }

    #[test]
    fn reexpand_skips_loading() {
        let mut t = ExpansionTracker::new();
        t.toggle(&r1(), false);
        t.finish_load(&r1(), true);
        assert_eq!(t.toggle(&r1(), true), ExpandStep::Nothing);
        assert_eq!(t.state(&r1()), Expansion::Collapsed);
        assert_eq!(t.toggle(&r1(), true), ExpandStep::Shown);
        assert_eq!(t.state(&r1()), Expansion::Expanded);
    }

    #[test]
    fn expand_is_idempotent() {
        let mut t = ExpansionTracker::new();
        assert_eq!(t.expand(&r1(), true), ExpandStep::Shown);
        assert_eq!(t.expand(&r1(), true), ExpandStep::Nothing);
        assert_eq!(t.state(&r1()), Expansion::Expanded);
    }

    #[test]
    fn failed_load_collapses() {
        let mut t = ExpansionTracker::new();
        t.expand(&r1(), false);
        t.finish_load(&r1(), false);
        assert_eq!(t.state(&r1()), Expansion::Collapsed);
        assert_eq!(t.expand(&r1(), false), ExpandStep::Fetch);
    }

    #[test]
    fn forget_resets() {
        let mut t = ExpansionTracker::new();
        t.expand(&r1(), true);
        t.forget(&[r1()].into_iter().collect());
        assert_eq!(t.state(&r1()), Expansion::Collapsed);
    }
}

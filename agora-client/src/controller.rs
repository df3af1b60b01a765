use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::{
    api::{ParentKey, Question, QuestionId, RemoteStore, Reply, ReplyId, Viewer},
    visible_tree, CascadeDeleteResolver, CompositionController, Error, ExpandStep, Expansion,
    ExpansionTracker, OptimisticMutator, ReplyTreeCache, Toggle, ToggleTarget, ValidationError,
    VisibleReply,
};

#[derive(Clone, Debug, Default)]
struct DiscussionState {
    /// Bumped each time a discussion gets loaded
    generation: u64,

    /// Bumped each time a discussion load is requested
    load_ticket: u64,

    /// Ticket of the load currently on screen
    shown_ticket: u64,

    question: Option<Question>,
    question_liked: bool,
    saved: bool,
    liked_replies: HashSet<ReplyId>,

    cache: ReplyTreeCache,
    expansion: ExpansionTracker,
    composition: CompositionController,

    /// Replies created under a node whose replies were still being fetched
    pending_replies: HashMap<ReplyId, Vec<Reply>>,
}

impl DiscussionState {
    fn question_id(&self) -> Result<QuestionId, ValidationError> {
        self.question
            .as_ref()
            .map(|q| q.id.clone())
            .ok_or(ValidationError::NoQuestion)
    }

    fn ensure_loaded(&self, rid: &ReplyId) -> Result<(), ValidationError> {
        match self.cache.contains(rid) {
            true => Ok(()),
            false => Err(ValidationError::UnknownReply(rid.clone())),
        }
    }

    /// Record the viewer's likes for replies the store told us about
    ///
    /// The flags are moved out of the replies: `liked_replies` is the only
    /// place that tracks them from then on.
    fn take_like(&mut self, reply: Reply) -> Reply {
        match reply.liked_by_me {
            Some(true) => {
                self.liked_replies.insert(reply.id.clone());
            }
            Some(false) => {
                self.liked_replies.remove(&reply.id);
            }
            None => (),
        }
        Reply {
            liked_by_me: None,
            ..reply
        }
    }

    fn take_likes(&mut self, replies: Vec<Reply>) -> Vec<Reply> {
        replies.into_iter().map(|r| self.take_like(r)).collect()
    }

    fn forget(&mut self, removed: &HashSet<ReplyId>) {
        self.expansion.forget(removed);
        self.composition.forget(removed);
        self.liked_replies.retain(|r| !removed.contains(r));
        self.pending_replies.retain(|r, _| !removed.contains(r));
    }
}

/// Everything a discussion screen needs
///
/// All operations take `&self` and never hold the state lock while waiting on
/// the store, so unrelated operations can be in flight at the same time.
pub struct DiscussionController<S> {
    store: S,
    viewer: Viewer,
    state: Mutex<DiscussionState>,
    mutator: OptimisticMutator,
}

impl<S: RemoteStore> DiscussionController<S> {
    pub fn new(store: S, viewer: Viewer) -> DiscussionController<S> {
        DiscussionController {
            store,
            viewer,
            state: Mutex::new(DiscussionState::default()),
            mutator: OptimisticMutator::new(),
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Fetch question `qid` and its top-level replies, discarding whatever was
    /// loaded before
    ///
    /// On failure the previous discussion stays in place. Returns `false` if a
    /// load requested later already succeeded, in which case this one is not
    /// shown.
    pub async fn load_discussion(&self, qid: QuestionId) -> Result<bool, Error> {
        let ticket = {
            let mut st = self.state.lock();
            st.load_ticket += 1;
            st.load_ticket
        };
        let (question, replies) = futures::try_join!(
            self.store.fetch_question(&qid),
            self.store.fetch_replies(&qid, None),
        )?;

        let mut st = self.state.lock();
        if st.shown_ticket > ticket {
            tracing::warn!(%qid, "dropping discussion load superseded by a later one");
            return Ok(false);
        }
        let generation = st.generation + 1;
        *st = DiscussionState {
            generation,
            load_ticket: st.load_ticket,
            shown_ticket: ticket,
            question_liked: question.liked_by_me.unwrap_or(false),
            saved: question.saved_by_me.unwrap_or(false),
            question: Some(question),
            ..DiscussionState::default()
        };
        let replies = st.take_likes(replies);
        tracing::info!(%qid, generation, num_replies = replies.len(), "loaded discussion");
        st.cache.put(ParentKey::Root, replies);
        Ok(true)
    }

    /// Show `rid`'s replies, fetching them if this is the first time
    ///
    /// Does nothing if they are already shown or being fetched.
    pub async fn expand(&self, rid: &ReplyId) -> Result<Expansion, Error> {
        self.change_expansion(rid, |exp, loaded| exp.expand(rid, loaded))
            .await
    }

    pub fn collapse(&self, rid: &ReplyId) -> Result<Expansion, Error> {
        let mut st = self.state.lock();
        st.ensure_loaded(rid)?;
        st.expansion.collapse(rid);
        Ok(st.expansion.state(rid))
    }

    pub async fn toggle_expand(&self, rid: &ReplyId) -> Result<Expansion, Error> {
        self.change_expansion(rid, |exp, loaded| exp.toggle(rid, loaded))
            .await
    }

    async fn change_expansion<F>(&self, rid: &ReplyId, change: F) -> Result<Expansion, Error>
    where
        F: FnOnce(&mut ExpansionTracker, bool) -> ExpandStep,
    {
        let key = ParentKey::Reply(rid.clone());
        let (qid, generation) = {
            let mut st = self.state.lock();
            let qid = st.question_id()?;
            st.ensure_loaded(rid)?;
            let loaded = st.cache.is_loaded(&key);
            match change(&mut st.expansion, loaded) {
                ExpandStep::Nothing | ExpandStep::Shown => return Ok(st.expansion.state(rid)),
                ExpandStep::Fetch => (qid, st.generation),
            }
        };

        tracing::debug!(?rid, "fetching replies");
        let fetched = self.store.fetch_replies(&qid, Some(rid)).await;

        let mut st = self.state.lock();
        if st.generation != generation {
            tracing::warn!(?rid, "dropping replies fetched for a previous discussion");
            return Ok(Expansion::Collapsed);
        }
        if !st.cache.contains(rid) {
            tracing::warn!(?rid, "dropping replies fetched for a since-deleted reply");
            st.expansion.forget(&[rid.clone()].into_iter().collect());
            return Ok(Expansion::Collapsed);
        }
        match fetched {
            Ok(replies) => {
                let replies = st.take_likes(replies);
                st.cache.put(key.clone(), replies);
                // created while the fetch was in flight, so maybe not part of its answer
                for reply in st.pending_replies.remove(rid).unwrap_or_default() {
                    let fetched = st
                        .cache
                        .get(&key)
                        .map_or(false, |b| b.iter().any(|r| r.id == reply.id));
                    if !fetched {
                        if let Err(err) = st.cache.append(&key, reply) {
                            tracing::warn!(?rid, ?err, "failed splicing in a pending reply");
                        }
                    }
                }
                st.expansion.finish_load(rid, true);
                Ok(st.expansion.state(rid))
            }
            Err(err) => {
                tracing::warn!(?rid, ?err, "failed fetching replies");
                // the next expansion fetches them from the store
                st.pending_replies.remove(rid);
                st.expansion.finish_load(rid, false);
                Err(Error::Remote(err))
            }
        }
    }

    pub async fn toggle_question_like(&self) -> Result<Toggle, Error> {
        let (qid, generation) = {
            let st = self.state.lock();
            (st.question_id()?, st.generation)
        };
        self.mutator
            .toggle(
                ToggleTarget::QuestionLike,
                || {
                    let st = self.state.lock();
                    match (&st.question, st.generation == generation) {
                        (Some(q), true) => Ok(Toggle {
                            on: st.question_liked,
                            count: Some(q.like_count),
                        }),
                        _ => Err(ValidationError::NoQuestion.into()),
                    }
                },
                |t| {
                    let mut st = self.state.lock();
                    if st.generation != generation {
                        return;
                    }
                    st.question_liked = t.on;
                    if let (Some(q), Some(count)) = (st.question.as_mut(), t.count) {
                        q.like_count = count;
                    }
                },
                |on| self.store.set_question_liked(&qid, on),
            )
            .await
    }

    pub async fn toggle_reply_like(&self, rid: &ReplyId) -> Result<Toggle, Error> {
        let generation = {
            let st = self.state.lock();
            st.ensure_loaded(rid)?;
            st.generation
        };
        self.mutator
            .toggle(
                ToggleTarget::ReplyLike(rid.clone()),
                || {
                    let st = self.state.lock();
                    match st.cache.find(rid) {
                        Some(r) if st.generation == generation => Ok(Toggle {
                            on: st.liked_replies.contains(rid),
                            count: Some(r.like_count),
                        }),
                        _ => Err(ValidationError::UnknownReply(rid.clone()).into()),
                    }
                },
                |t| {
                    let mut st = self.state.lock();
                    if st.generation != generation {
                        return;
                    }
                    let patched = st
                        .cache
                        .mutate(rid, |r| Reply {
                            like_count: t.count.unwrap_or(r.like_count),
                            ..r.clone()
                        })
                        .is_some();
                    // deleted while the toggle was in flight
                    if !patched {
                        return;
                    }
                    match t.on {
                        true => st.liked_replies.insert(rid.clone()),
                        false => st.liked_replies.remove(rid),
                    };
                },
                |on| self.store.set_reply_liked(rid, on),
            )
            .await
    }

    pub async fn toggle_saved(&self) -> Result<Toggle, Error> {
        let (qid, generation) = {
            let st = self.state.lock();
            (st.question_id()?, st.generation)
        };
        self.mutator
            .toggle(
                ToggleTarget::Saved,
                || {
                    let st = self.state.lock();
                    match st.question.is_some() && st.generation == generation {
                        true => Ok(Toggle {
                            on: st.saved,
                            count: None,
                        }),
                        false => Err(ValidationError::NoQuestion.into()),
                    }
                },
                |t| {
                    let mut st = self.state.lock();
                    if st.generation == generation {
                        st.saved = t.on;
                    }
                },
                |on| async move { self.store.set_saved(&qid, on).await.map(|()| None) },
            )
            .await
    }

    /// Choose what the next submitted reply answers; `None` is the question
    pub fn set_reply_target(&self, target: Option<ReplyId>) -> Result<(), Error> {
        let mut st = self.state.lock();
        if let Some(rid) = &target {
            st.ensure_loaded(rid)?;
        }
        st.composition.set_target(target);
        Ok(())
    }

    pub fn set_draft(&self, draft: String) {
        self.state.lock().composition.set_draft(draft);
    }

    /// Post `body` as a reply to the current target
    ///
    /// On success the new reply is shown under its target, the target gets
    /// expanded, and the composition state is reset. On failure nothing changes.
    pub async fn submit_reply(&self, body: &str) -> Result<Reply, Error> {
        let (new_reply, generation) = {
            let st = self.state.lock();
            let new_reply =
                st.composition
                    .build(st.question.as_ref().map(|q| &q.id), &self.viewer, body)?;
            (new_reply, st.generation)
        };
        let reply = self.store.create_reply(new_reply.clone()).await?;

        let fetch_target = {
            let mut st = self.state.lock();
            if st.generation != generation {
                tracing::warn!(
                    rid = ?reply.id,
                    "not showing reply created for a previous discussion"
                );
                return Ok(reply);
            }
            let shown = st.take_like(reply.clone());
            let key = ParentKey::from(new_reply.parent_id.clone());
            let fetch_target = match st.cache.append(&key, shown.clone()) {
                Ok(()) => {
                    if let Some(target) = &new_reply.parent_id {
                        st.expansion.expand(target, true);
                    }
                    None
                }
                // its siblings are being fetched; splice it in once they land
                Err(Error::Precomposition(ParentKey::Reply(target)))
                    if st.expansion.state(&target) == Expansion::Loading =>
                {
                    st.pending_replies.entry(target).or_default().push(shown);
                    None
                }
                // the target was never expanded, its replies will come with the new one
                Err(Error::Precomposition(ParentKey::Reply(target))) => Some(target),
                Err(err) => return Err(err),
            };
            st.composition.finish();
            tracing::debug!(rid = ?reply.id, parent = ?key, "reply created");
            fetch_target
        };

        if let Some(target) = fetch_target {
            if let Err(err) = self.expand(&target).await {
                tracing::warn!(?target, ?err, "reply created but its siblings failed to load");
            }
        }
        Ok(reply)
    }

    /// Delete reply `rid` along with all its descendants
    ///
    /// Checking that the viewer is allowed to do so is up to the caller, see
    /// `Viewer::can_delete`. Returns the ids removed from the view.
    pub async fn delete_reply(&self, rid: &ReplyId) -> Result<HashSet<ReplyId>, Error> {
        let generation = {
            let st = self.state.lock();
            st.ensure_loaded(rid)?;
            st.generation
        };
        self.store.delete_reply(rid).await?;

        let mut st = self.state.lock();
        if st.generation != generation {
            return Ok(HashSet::new());
        }
        let removed = CascadeDeleteResolver::purge(&mut st.cache, rid);
        st.forget(&removed);
        Ok(removed)
    }

    pub fn visible_tree(&self) -> Vec<VisibleReply> {
        let st = self.state.lock();
        visible_tree(&st.cache, &st.expansion, &st.liked_replies)
    }

    pub fn question(&self) -> Option<Question> {
        self.state.lock().question.clone()
    }

    pub fn question_liked(&self) -> bool {
        self.state.lock().question_liked
    }

    pub fn saved(&self) -> bool {
        self.state.lock().saved
    }

    pub fn reply_liked(&self, rid: &ReplyId) -> bool {
        self.state.lock().liked_replies.contains(rid)
    }

    pub fn reply(&self, rid: &ReplyId) -> Option<Reply> {
        self.state.lock().cache.find(rid).cloned()
    }

    pub fn expansion(&self, rid: &ReplyId) -> Expansion {
        self.state.lock().expansion.state(rid)
    }

    pub fn reply_target(&self) -> Option<ReplyId> {
        self.state.lock().composition.target().cloned()
    }

    pub fn draft(&self) -> String {
        String::from(self.state.lock().composition.draft())
    }

    /// Snapshot of everything loaded
    pub fn cache(&self) -> ReplyTreeCache {
        self.state.lock().cache.clone()
    }

    pub fn is_toggle_in_flight(&self, target: &ToggleTarget) -> bool {
        self.mutator.in_flight(target)
    }
}

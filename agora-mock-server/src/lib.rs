use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use agora_api::{
    NewReply, Question, QuestionId, RemoteError, RemoteStore, Reply, ReplyId, Time,
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use futures::channel::oneshot;
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StoreOp {
    FetchQuestion,
    FetchReplies,
    CreateReply,
    DeleteReply,
    SetQuestionLiked,
    SetReplyLiked,
    SetSaved,
}

/// A call received by the mock, as it was received
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreCall {
    FetchQuestion(QuestionId),
    FetchReplies(QuestionId, Option<ReplyId>),
    CreateReply(NewReply),
    DeleteReply(ReplyId),
    SetQuestionLiked(QuestionId, bool),
    SetReplyLiked(ReplyId, bool),
    SetSaved(QuestionId, bool),
}

impl StoreCall {
    pub fn op(&self) -> StoreOp {
        match self {
            StoreCall::FetchQuestion(_) => StoreOp::FetchQuestion,
            StoreCall::FetchReplies(_, _) => StoreOp::FetchReplies,
            StoreCall::CreateReply(_) => StoreOp::CreateReply,
            StoreCall::DeleteReply(_) => StoreOp::DeleteReply,
            StoreCall::SetQuestionLiked(_, _) => StoreOp::SetQuestionLiked,
            StoreCall::SetReplyLiked(_, _) => StoreOp::SetReplyLiked,
            StoreCall::SetSaved(_, _) => StoreOp::SetSaved,
        }
    }
}

/// Keeps one call suspended until released (or dropped)
pub struct Gate(oneshot::Sender<()>);

impl Gate {
    pub fn release(self) {
        // the call may have been abandoned already
        let _ = self.0.send(());
    }
}

#[derive(Debug)]
struct PendingGate {
    release: oneshot::Receiver<()>,
    // answer computed on arrival, delivered on release
    answer_first: bool,
}

#[derive(Debug)]
struct DbQuestion {
    question: Question,
    likers: HashSet<String>,
    savers: HashSet<String>,
}

#[derive(Debug)]
struct DbReply {
    question_id: QuestionId,
    reply: Reply,
    likers: HashSet<String>,
}

#[derive(Debug)]
struct MockDb {
    viewer: String,
    report_viewer_flags: bool,
    report_like_counts: bool,
    next_time: Time,
    questions: BTreeMap<QuestionId, DbQuestion>,
    // in creation order
    replies: Vec<DbReply>,
    failures: HashMap<StoreOp, VecDeque<String>>,
    gates: HashMap<StoreOp, VecDeque<PendingGate>>,
    calls: Vec<StoreCall>,
}

impl MockDb {
    fn tick(&mut self) -> Time {
        let now = self.next_time;
        self.next_time = now + Duration::seconds(1);
        now
    }

    fn question(&self, q: &QuestionId) -> Result<&DbQuestion, RemoteError> {
        self.questions
            .get(q)
            .ok_or_else(|| RemoteError::new(format!("question {q} not found")))
    }

    fn question_mut(&mut self, q: &QuestionId) -> Result<&mut DbQuestion, RemoteError> {
        self.questions
            .get_mut(q)
            .ok_or_else(|| RemoteError::new(format!("question {q} not found")))
    }

    fn reply_mut(&mut self, r: &ReplyId) -> Result<&mut DbReply, RemoteError> {
        self.replies
            .iter_mut()
            .find(|dr| dr.reply.id == *r)
            .ok_or_else(|| RemoteError::new(format!("reply {r} not found")))
    }

    /// The question as the viewer sees it
    fn show_question(&self, q: &DbQuestion) -> Question {
        let mut question = q.question.clone();
        question.like_count += q.likers.len() as u64;
        if self.report_viewer_flags {
            question.liked_by_me = Some(q.likers.contains(&self.viewer));
            question.saved_by_me = Some(q.savers.contains(&self.viewer));
        }
        question
    }

    /// The reply as the viewer sees it
    fn show_reply(&self, r: &DbReply) -> Reply {
        let mut reply = r.reply.clone();
        reply.like_count += r.likers.len() as u64;
        if self.report_viewer_flags {
            reply.liked_by_me = Some(r.likers.contains(&self.viewer));
        }
        reply
    }

    fn children_of(&self, q: &QuestionId, parent: Option<&ReplyId>) -> Vec<Reply> {
        let mut res = self
            .replies
            .iter()
            .filter(|r| r.question_id == *q && r.reply.parent_id.as_ref() == parent)
            .map(|r| self.show_reply(r))
            .collect::<Vec<_>>();
        // stable, so same-time replies keep creation order
        res.sort_by_key(|r| r.created_at);
        res
    }
}

/// In-memory discussion store, for tests and demos
///
/// Cloning gives another handle to the same store.
#[derive(Clone)]
pub struct MockStore(Arc<Mutex<MockDb>>);

impl MockStore {
    /// A store seen through the eyes of `viewer`
    pub fn new(viewer: &str) -> MockStore {
        MockStore(Arc::new(Mutex::new(MockDb {
            viewer: String::from(viewer),
            report_viewer_flags: true,
            report_like_counts: true,
            next_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            questions: BTreeMap::new(),
            replies: Vec::new(),
            failures: HashMap::new(),
            gates: HashMap::new(),
            calls: Vec::new(),
        })))
    }

    /// Whether questions and replies come with the viewer's like and save flags
    pub fn set_report_viewer_flags(&self, report: bool) {
        self.0.lock().report_viewer_flags = report;
    }

    /// Whether like calls answer with the new count
    pub fn set_report_like_counts(&self, report: bool) {
        self.0.lock().report_like_counts = report;
    }

    /// Add a question; its `like_count` counts likes from people other than the viewer
    pub fn add_question(&self, question: Question) {
        let mut db = self.0.lock();
        let id = question.id.clone();
        db.questions.insert(
            id,
            DbQuestion {
                question,
                likers: HashSet::new(),
                savers: HashSet::new(),
            },
        );
    }

    /// Add a reply with a chosen id; its `like_count` counts likes from people
    /// other than the viewer
    pub fn add_reply(&self, question_id: &QuestionId, reply: Reply) {
        self.0.lock().replies.push(DbReply {
            question_id: question_id.clone(),
            reply,
            likers: HashSet::new(),
        });
    }

    /// Shorthand for `add_reply` with a timestamp taken from the mock's clock
    pub fn seed_reply(
        &self,
        question_id: &str,
        id: &str,
        parent: Option<&str>,
        author: &str,
        likes: u64,
    ) -> Reply {
        let created_at = self.0.lock().tick();
        let reply = Reply {
            id: ReplyId::from(id),
            parent_id: parent.map(ReplyId::from),
            author_name: String::from(author),
            body: format!("{author} says hi ({id})"),
            created_at,
            like_count: likes,
            liked_by_me: None,
        };
        self.add_reply(&QuestionId::from(question_id), reply.clone());
        reply
    }

    /// Shorthand for `add_question`
    pub fn seed_question(&self, id: &str, author: &str, likes: u64) -> Question {
        let question = Question {
            id: QuestionId::from(id),
            title: format!("Question {id}"),
            body: String::from("How do you all handle bedtime?"),
            author_name: String::from(author),
            child_age_label: String::from("3 years"),
            like_count: likes,
            reply_count: 0,
            liked_by_me: None,
            saved_by_me: None,
        };
        self.add_question(question.clone());
        question
    }

    /// Someone other than the viewer likes reply `r`
    pub fn like_as(&self, user: &str, r: &ReplyId) -> Result<(), RemoteError> {
        self.0.lock().reply_mut(r)?.likers.insert(String::from(user));
        Ok(())
    }

    /// Make the next call of kind `op` fail with `message`
    pub fn fail_next(&self, op: StoreOp, message: &str) {
        self.0
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(String::from(message));
    }

    /// Hold the next call of kind `op` until the returned gate is released
    pub fn hold(&self, op: StoreOp) -> Gate {
        self.push_gate(op, false)
    }

    /// Like `hold`, but the call is answered as soon as it arrives and the
    /// answer is only delivered on release, like a response slow to come back
    pub fn hold_answered(&self, op: StoreOp) -> Gate {
        self.push_gate(op, true)
    }

    fn push_gate(&self, op: StoreOp, answer_first: bool) -> Gate {
        let (sender, release) = oneshot::channel();
        self.0
            .lock()
            .gates
            .entry(op)
            .or_default()
            .push_back(PendingGate {
                release,
                answer_first,
            });
        Gate(sender)
    }

    /// All the calls received so far
    pub fn test_calls(&self) -> Vec<StoreCall> {
        self.0.lock().calls.clone()
    }

    /// How many calls of kind `op` were received so far
    pub fn test_num_calls(&self, op: StoreOp) -> usize {
        self.0.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Every reply of question `q`, as the viewer would get them
    pub fn test_replies(&self, q: &QuestionId) -> Vec<Reply> {
        let db = self.0.lock();
        db.replies
            .iter()
            .filter(|r| r.question_id == *q)
            .map(|r| db.show_reply(r))
            .collect()
    }

    pub fn test_reply(&self, r: &ReplyId) -> Option<Reply> {
        let db = self.0.lock();
        db.replies
            .iter()
            .find(|dr| dr.reply.id == *r)
            .map(|dr| db.show_reply(dr))
    }

    pub fn test_question(&self, q: &QuestionId) -> Option<Question> {
        let db = self.0.lock();
        db.questions.get(q).map(|dq| db.show_question(dq))
    }

    async fn serve<T, F>(&self, call: StoreCall, f: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&mut MockDb) -> Result<T, RemoteError>,
    {
        let op = call.op();
        let gate = {
            let mut db = self.0.lock();
            tracing::trace!(?call, "mock store received call");
            db.calls.push(call);
            db.gates.get_mut(&op).and_then(|g| g.pop_front())
        };
        match gate {
            None => self.answer(op, f),
            Some(gate) if gate.answer_first => {
                let res = self.answer(op, f);
                // a dropped gate counts as released
                let _ = gate.release.await;
                res
            }
            Some(gate) => {
                let _ = gate.release.await;
                self.answer(op, f)
            }
        }
    }

    fn answer<T, F>(&self, op: StoreOp, f: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&mut MockDb) -> Result<T, RemoteError>,
    {
        let mut db = self.0.lock();
        if let Some(message) = db.failures.get_mut(&op).and_then(|f| f.pop_front()) {
            return Err(RemoteError::new(message));
        }
        f(&mut db)
    }
}

#[async_trait]
impl RemoteStore for MockStore {
    async fn fetch_question(&self, q: &QuestionId) -> Result<Question, RemoteError> {
        self.serve(StoreCall::FetchQuestion(q.clone()), |db| {
            let dq = db.question(q)?;
            Ok(db.show_question(dq))
        })
        .await
    }

    async fn fetch_replies(
        &self,
        q: &QuestionId,
        parent: Option<&ReplyId>,
    ) -> Result<Vec<Reply>, RemoteError> {
        let call = StoreCall::FetchReplies(q.clone(), parent.cloned());
        self.serve(call, |db| {
            db.question(q)?;
            if let Some(p) = parent {
                db.reply_mut(p)?;
            }
            Ok(db.children_of(q, parent))
        })
        .await
    }

    async fn create_reply(&self, r: NewReply) -> Result<Reply, RemoteError> {
        self.serve(StoreCall::CreateReply(r.clone()), |db| {
            db.question(&r.question_id)?;
            if let Some(p) = &r.parent_id {
                if db.reply_mut(p)?.question_id != r.question_id {
                    return Err(RemoteError::new(format!(
                        "reply {p} is not part of question {}",
                        r.question_id
                    )));
                }
            }
            if agora_api::validate_body(&r.body).is_none() {
                return Err(RemoteError::new("reply body is empty"));
            }
            let created_at = db.tick();
            let reply = Reply {
                id: ReplyId(Uuid::new_v4().to_string()),
                parent_id: r.parent_id,
                author_name: r.author_name,
                body: r.body,
                created_at,
                like_count: 0,
                liked_by_me: None,
            };
            db.question_mut(&r.question_id)?.question.reply_count += 1;
            db.replies.push(DbReply {
                question_id: r.question_id,
                reply,
                likers: HashSet::new(),
            });
            let stored = db.replies.last().expect("just pushed a reply");
            Ok(db.show_reply(stored))
        })
        .await
    }

    async fn delete_reply(&self, r: &ReplyId) -> Result<(), RemoteError> {
        self.serve(StoreCall::DeleteReply(r.clone()), |db| {
            let question_id = db.reply_mut(r)?.question_id.clone();
            let mut doomed = HashSet::new();
            doomed.insert(r.clone());
            let mut stack = vec![r.clone()];
            while let Some(parent) = stack.pop() {
                for child in db
                    .replies
                    .iter()
                    .filter(|dr| dr.reply.parent_id.as_ref() == Some(&parent))
                {
                    if doomed.insert(child.reply.id.clone()) {
                        stack.push(child.reply.id.clone());
                    }
                }
            }
            db.replies.retain(|dr| !doomed.contains(&dr.reply.id));
            let q = db.question_mut(&question_id)?;
            q.question.reply_count = q.question.reply_count.saturating_sub(doomed.len() as u64);
            Ok(())
        })
        .await
    }

    async fn set_question_liked(
        &self,
        q: &QuestionId,
        liked: bool,
    ) -> Result<Option<u64>, RemoteError> {
        self.serve(StoreCall::SetQuestionLiked(q.clone(), liked), |db| {
            let viewer = db.viewer.clone();
            let report = db.report_like_counts;
            let dq = db.question_mut(q)?;
            match liked {
                true => dq.likers.insert(viewer),
                false => dq.likers.remove(&viewer),
            };
            let count = dq.question.like_count + dq.likers.len() as u64;
            Ok(report.then_some(count))
        })
        .await
    }

    async fn set_reply_liked(&self, r: &ReplyId, liked: bool) -> Result<Option<u64>, RemoteError> {
        self.serve(StoreCall::SetReplyLiked(r.clone(), liked), |db| {
            let viewer = db.viewer.clone();
            let report = db.report_like_counts;
            let dr = db.reply_mut(r)?;
            match liked {
                true => dr.likers.insert(viewer),
                false => dr.likers.remove(&viewer),
            };
            let count = dr.reply.like_count + dr.likers.len() as u64;
            Ok(report.then_some(count))
        })
        .await
    }

    async fn set_saved(&self, q: &QuestionId, saved: bool) -> Result<(), RemoteError> {
        self.serve(StoreCall::SetSaved(q.clone(), saved), |db| {
            let viewer = db.viewer.clone();
            let dq = db.question_mut(q)?;
            match saved {
                true => dq.savers.insert(viewer),
                false => dq.savers.remove(&viewer),
            };
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MockStore {
        let store = MockStore::new("bob");
        store.seed_question("q1", "alice", 1);
        store.seed_reply("q1", "r1", None, "alice", 2);
        store.seed_reply("q1", "r2", Some("r1"), "carol", 0);
        store.seed_reply("q1", "r3", Some("r2"), "bob", 0);
        store.seed_reply("q1", "r4", None, "carol", 0);
        store
    }

    fn ids(replies: &[Reply]) -> Vec<&str> {
        replies.iter().map(|r| &r.id.0 as &str).collect()
    }

    #[tokio::test]
    async fn fetches_children_in_order() {
        let store = seeded();
        let q1 = QuestionId::from("q1");
        let top = store.fetch_replies(&q1, None).await.expect("fetching top");
        assert_eq!(ids(&top), vec!["r1", "r4"]);
        assert_eq!(top[0].liked_by_me, Some(false));
        let nested = store
            .fetch_replies(&q1, Some(&ReplyId::from("r1")))
            .await
            .expect("fetching r1");
        assert_eq!(ids(&nested), vec!["r2"]);
        assert!(store
            .fetch_replies(&q1, Some(&ReplyId::from("nope")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_cascades() {
        let store = seeded();
        store
            .delete_reply(&ReplyId::from("r1"))
            .await
            .expect("deleting r1");
        assert_eq!(ids(&store.test_replies(&QuestionId::from("q1"))), vec!["r4"]);
        assert!(store.delete_reply(&ReplyId::from("r2")).await.is_err());
    }

    #[tokio::test]
    async fn likes_are_counted_once_per_viewer() {
        let store = seeded();
        let r1 = ReplyId::from("r1");
        assert_eq!(store.set_reply_liked(&r1, true).await, Ok(Some(3)));
        assert_eq!(store.set_reply_liked(&r1, true).await, Ok(Some(3)));
        assert_eq!(store.test_reply(&r1).unwrap().liked_by_me, Some(true));
        assert_eq!(store.set_reply_liked(&r1, false).await, Ok(Some(2)));

        store.set_report_like_counts(false);
        let q1 = QuestionId::from("q1");
        assert_eq!(store.set_question_liked(&q1, true).await, Ok(None));
        assert_eq!(store.test_question(&q1).unwrap().like_count, 2);
    }

    #[tokio::test]
    async fn injected_failures_are_one_shot() {
        let store = seeded();
        let q1 = QuestionId::from("q1");
        store.fail_next(StoreOp::SetSaved, "offline");
        assert_eq!(
            store.set_saved(&q1, true).await,
            Err(RemoteError::new("offline"))
        );
        assert_eq!(store.test_question(&q1).unwrap().saved_by_me, Some(false));
        assert_eq!(store.set_saved(&q1, true).await, Ok(()));
        assert_eq!(store.test_question(&q1).unwrap().saved_by_me, Some(true));
        assert_eq!(store.test_num_calls(StoreOp::SetSaved), 2);
    }

    #[tokio::test]
    async fn gate_holds_call() {
        let store = seeded();
        let gate = store.hold(StoreOp::CreateReply);
        let create = store.create_reply(NewReply {
            question_id: QuestionId::from("q1"),
            parent_id: Some(ReplyId::from("r4")),
            body: String::from("hello"),
            author_name: String::from("bob"),
        });
        let check_and_release = async {
            assert_eq!(store.test_num_calls(StoreOp::CreateReply), 1);
            assert_eq!(store.test_replies(&QuestionId::from("q1")).len(), 4);
            gate.release();
        };
        let (created, ()) = futures::join!(create, check_and_release);
        let created = created.expect("creating reply");
        assert_eq!(created.parent_id, Some(ReplyId::from("r4")));
        assert_eq!(store.test_replies(&QuestionId::from("q1")).len(), 5);
        assert_eq!(
            store.test_question(&QuestionId::from("q1")).unwrap().reply_count,
            1
        );
    }

    #[tokio::test]
    async fn answered_gate_keeps_early_answer() {
        let store = seeded();
        let q1 = QuestionId::from("q1");
        let r4 = ReplyId::from("r4");
        let gate = store.hold_answered(StoreOp::FetchReplies);
        let fetch = store.fetch_replies(&q1, Some(&r4));
        let create_and_release = async {
            store
                .create_reply(NewReply {
                    question_id: q1.clone(),
                    parent_id: Some(r4.clone()),
                    body: String::from("late"),
                    author_name: String::from("bob"),
                })
                .await
                .expect("creating reply");
            gate.release();
        };
        let (fetched, ()) = futures::join!(fetch, create_and_release);
        // answered before the reply existed
        assert_eq!(fetched, Ok(Vec::new()));
        assert_eq!(
            store.fetch_replies(&q1, Some(&r4)).await.map(|r| r.len()),
            Ok(1)
        );
    }
}

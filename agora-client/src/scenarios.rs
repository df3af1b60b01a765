#![cfg(test)]

use std::{cmp, collections::HashSet, ops::RangeTo, panic::AssertUnwindSafe};

use agora_mock_server::{MockStore, StoreCall, StoreOp};

use crate::{
    api::{ParentKey, QuestionId, RemoteError, ReplyId, Viewer},
    DiscussionController, Error, Expansion, Toggle, ToggleTarget, ValidationError, VisibleReply,
};

fn init_logs() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }
}

fn q1() -> QuestionId {
    QuestionId::from("q1")
}

fn rid(id: &str) -> ReplyId {
    ReplyId::from(id)
}

fn lines(tree: &[VisibleReply]) -> Vec<(&str, usize)> {
    tree.iter().map(|v| (&v.reply.id.0 as &str, v.depth)).collect()
}

fn liked(on: bool, count: u64) -> Toggle {
    Toggle {
        on,
        count: Some(count),
    }
}

/// q1
/// - r1 (alice, 2 likes)
///   - r2 (carol)
///     - r3 (bob)
/// - r4 (carol, 1 like)
///   - r5 (alice)
fn example() -> (MockStore, DiscussionController<MockStore>) {
    init_logs();
    let store = MockStore::new("bob");
    store.seed_question("q1", "alice", 4);
    store.seed_reply("q1", "r1", None, "alice", 2);
    store.seed_reply("q1", "r2", Some("r1"), "carol", 0);
    store.seed_reply("q1", "r3", Some("r2"), "bob", 0);
    store.seed_reply("q1", "r4", None, "carol", 1);
    store.seed_reply("q1", "r5", Some("r4"), "alice", 0);
    let ctl = DiscussionController::new(store.clone(), Viewer::new("bob"));
    (store, ctl)
}

async fn loaded_example() -> (MockStore, DiscussionController<MockStore>) {
    let (store, ctl) = example();
    ctl.load_discussion(q1()).await.expect("loading q1");
    (store, ctl)
}

#[tokio::test]
async fn load_shows_top_level() {
    let (store, ctl) = loaded_example().await;
    assert_eq!(lines(&ctl.visible_tree()), vec![("r1", 0), ("r4", 0)]);
    assert_eq!(ctl.question().expect("question is loaded").like_count, 4);
    assert!(!ctl.question_liked());
    assert!(!ctl.saved());
    assert_eq!(
        store.test_calls(),
        vec![
            StoreCall::FetchQuestion(q1()),
            StoreCall::FetchReplies(q1(), None),
        ],
    );
}

#[tokio::test]
async fn failed_load_keeps_previous_discussion() {
    let (store, ctl) = loaded_example().await;
    store.fail_next(StoreOp::FetchQuestion, "offline");
    assert_eq!(
        ctl.load_discussion(QuestionId::from("q2")).await,
        Err(Error::Remote(RemoteError::new("offline"))),
    );
    assert_eq!(ctl.question().unwrap().id, q1());
    assert_eq!(lines(&ctl.visible_tree()), vec![("r1", 0), ("r4", 0)]);
}

#[tokio::test]
async fn expand_loads_lazily() {
    let (store, ctl) = loaded_example().await;
    let gate = store.hold(StoreOp::FetchReplies);
    let check_loading = async {
        assert_eq!(ctl.expansion(&rid("r1")), Expansion::Loading);
        assert_eq!(lines(&ctl.visible_tree()), vec![("r1", 0), ("r4", 0)]);
        gate.release();
    };
    let rid_r1 = rid("r1");
    let (res, ()) = futures::join!(ctl.toggle_expand(&rid_r1), check_loading);
    assert_eq!(res, Ok(Expansion::Expanded));
    assert_eq!(
        lines(&ctl.visible_tree()),
        vec![("r1", 0), ("r2", 1), ("r4", 0)],
    );
}

#[tokio::test]
async fn expand_is_idempotent() {
    let (store, ctl) = loaded_example().await;
    assert_eq!(ctl.expand(&rid("r1")).await, Ok(Expansion::Expanded));
    assert_eq!(ctl.expand(&rid("r1")).await, Ok(Expansion::Expanded));
    assert_eq!(store.test_num_calls(StoreOp::FetchReplies), 2);

    // collapsing and expanding again does not fetch either
    assert_eq!(ctl.toggle_expand(&rid("r1")).await, Ok(Expansion::Collapsed));
    assert_eq!(lines(&ctl.visible_tree()), vec![("r1", 0), ("r4", 0)]);
    assert_eq!(ctl.toggle_expand(&rid("r1")).await, Ok(Expansion::Expanded));
    assert_eq!(store.test_num_calls(StoreOp::FetchReplies), 2);
}

#[tokio::test]
async fn double_toggle_while_loading_fetches_once() {
    let (store, ctl) = loaded_example().await;
    let gate = store.hold(StoreOp::FetchReplies);
    let second_toggle = async {
        assert_eq!(ctl.toggle_expand(&rid("r4")).await, Ok(Expansion::Loading));
        gate.release();
    };
    let rid_r4 = rid("r4");
    let (first, ()) = futures::join!(ctl.toggle_expand(&rid_r4), second_toggle);
    assert_eq!(first, Ok(Expansion::Expanded));
    // one for the top level, one for r4
    assert_eq!(store.test_num_calls(StoreOp::FetchReplies), 2);
}

#[tokio::test]
async fn failed_expand_collapses_back() {
    let (store, ctl) = loaded_example().await;
    store.fail_next(StoreOp::FetchReplies, "timeout");
    assert_eq!(
        ctl.expand(&rid("r1")).await,
        Err(Error::Remote(RemoteError::new("timeout"))),
    );
    assert_eq!(ctl.expansion(&rid("r1")), Expansion::Collapsed);
    assert!(!ctl.cache().is_loaded(&ParentKey::Reply(rid("r1"))));
    assert_eq!(ctl.expand(&rid("r1")).await, Ok(Expansion::Expanded));
}

#[tokio::test]
async fn expand_unknown_reply_is_rejected() {
    let (store, ctl) = loaded_example().await;
    // r2 exists remotely but was never loaded
    assert_eq!(
        ctl.expand(&rid("r2")).await,
        Err(Error::Validation(ValidationError::UnknownReply(rid("r2")))),
    );
    assert_eq!(store.test_num_calls(StoreOp::FetchReplies), 1);
}

#[tokio::test]
async fn reply_to_expanded_target() {
    let (store, ctl) = loaded_example().await;
    ctl.expand(&rid("r1")).await.expect("expanding r1");
    ctl.set_reply_target(Some(rid("r1"))).expect("targeting r1");
    ctl.set_draft(String::from("hi"));

    let reply = ctl.submit_reply("hi").await.expect("submitting");
    assert_eq!(reply.parent_id, Some(rid("r1")));
    assert_eq!(reply.author_name, "bob");
    assert_eq!(
        lines(&ctl.visible_tree()),
        vec![("r1", 0), ("r2", 1), (&reply.id.0 as &str, 1), ("r4", 0)],
    );
    assert_eq!(ctl.reply_target(), None);
    assert_eq!(ctl.draft(), "");
    // no refetch needed
    assert_eq!(store.test_num_calls(StoreOp::FetchReplies), 2);
}

#[tokio::test]
async fn reply_expands_collapsed_target() {
    let (_store, ctl) = loaded_example().await;
    ctl.expand(&rid("r1")).await.expect("expanding r1");
    ctl.collapse(&rid("r1")).expect("collapsing r1");
    ctl.set_reply_target(Some(rid("r1"))).expect("targeting r1");

    let reply = ctl.submit_reply("hi").await.expect("submitting");
    assert_eq!(ctl.expansion(&rid("r1")), Expansion::Expanded);
    assert!(lines(&ctl.visible_tree()).contains(&(&reply.id.0 as &str, 1)));
}

#[tokio::test]
async fn reply_to_never_expanded_target() {
    let (store, ctl) = loaded_example().await;
    ctl.set_reply_target(Some(rid("r4"))).expect("targeting r4");

    let reply = ctl.submit_reply("hello").await.expect("submitting");
    assert_eq!(ctl.expansion(&rid("r4")), Expansion::Expanded);
    assert_eq!(
        lines(&ctl.visible_tree()),
        vec![("r1", 0), ("r4", 0), ("r5", 1), (&reply.id.0 as &str, 1)],
    );
    assert_eq!(ctl.reply_target(), None);
    assert_eq!(store.test_num_calls(StoreOp::FetchReplies), 2);
}

#[tokio::test]
async fn reply_while_target_loads() {
    let (store, ctl) = loaded_example().await;
    // r4's replies are read before the new one exists, and arrive after it was created
    let gate = store.hold_answered(StoreOp::FetchReplies);
    let reply_meanwhile = async {
        assert_eq!(ctl.expansion(&rid("r4")), Expansion::Loading);
        ctl.set_reply_target(Some(rid("r4"))).expect("targeting r4");
        let reply = ctl.submit_reply("hi").await.expect("submitting");
        assert_eq!(ctl.reply_target(), None);
        gate.release();
        reply
    };
    let rid_r4 = rid("r4");
    let (res, reply) = futures::join!(ctl.expand(&rid_r4), reply_meanwhile);
    assert_eq!(res, Ok(Expansion::Expanded));
    assert_eq!(
        lines(&ctl.visible_tree()),
        vec![("r1", 0), ("r4", 0), ("r5", 1), (&reply.id.0 as &str, 1)],
    );
    assert_eq!(store.test_num_calls(StoreOp::FetchReplies), 2);
}

#[tokio::test]
async fn reply_while_target_loads_is_not_duplicated() {
    let (store, ctl) = loaded_example().await;
    // this time the answer is computed after the reply was created
    let gate = store.hold(StoreOp::FetchReplies);
    let reply_meanwhile = async {
        ctl.set_reply_target(Some(rid("r4"))).expect("targeting r4");
        let reply = ctl.submit_reply("hi").await.expect("submitting");
        gate.release();
        reply
    };
    let rid_r4 = rid("r4");
    let (res, reply) = futures::join!(ctl.expand(&rid_r4), reply_meanwhile);
    assert_eq!(res, Ok(Expansion::Expanded));
    assert_eq!(
        lines(&ctl.visible_tree()),
        vec![("r1", 0), ("r4", 0), ("r5", 1), (&reply.id.0 as &str, 1)],
    );
}

#[tokio::test]
async fn reply_while_target_fails_to_load() {
    let (store, ctl) = loaded_example().await;
    let gate = store.hold(StoreOp::FetchReplies);
    store.fail_next(StoreOp::FetchReplies, "timeout");
    let reply_meanwhile = async {
        ctl.set_reply_target(Some(rid("r4"))).expect("targeting r4");
        let reply = ctl.submit_reply("hi").await.expect("submitting");
        gate.release();
        reply
    };
    let rid_r4 = rid("r4");
    let (res, reply) = futures::join!(ctl.expand(&rid_r4), reply_meanwhile);
    assert_eq!(res, Err(Error::Remote(RemoteError::new("timeout"))));
    assert_eq!(lines(&ctl.visible_tree()), vec![("r1", 0), ("r4", 0)]);

    // expanding again brings everything from the store
    assert_eq!(ctl.expand(&rid("r4")).await, Ok(Expansion::Expanded));
    assert_eq!(
        lines(&ctl.visible_tree()),
        vec![("r1", 0), ("r4", 0), ("r5", 1), (&reply.id.0 as &str, 1)],
    );
}

#[tokio::test]
async fn top_level_reply() {
    let (store, ctl) = loaded_example().await;
    let reply = ctl.submit_reply("  welcome  ").await.expect("submitting");
    assert_eq!(reply.body, "welcome");
    assert_eq!(reply.parent_id, None);
    assert_eq!(
        lines(&ctl.visible_tree()),
        vec![("r1", 0), ("r4", 0), (&reply.id.0 as &str, 0)],
    );
    assert_eq!(
        store.test_question(&q1()).expect("q1 exists").reply_count,
        1
    );
}

#[tokio::test]
async fn invalid_reply_does_no_io() {
    let (store, ctl) = example();
    assert_eq!(
        ctl.submit_reply("hi").await,
        Err(Error::Validation(ValidationError::NoQuestion)),
    );
    ctl.load_discussion(q1()).await.expect("loading q1");
    assert_eq!(
        ctl.submit_reply("   ").await,
        Err(Error::Validation(ValidationError::EmptyBody)),
    );
    assert_eq!(store.test_num_calls(StoreOp::CreateReply), 0);
    assert_eq!(
        ctl.set_reply_target(Some(rid("r2"))),
        Err(Error::Validation(ValidationError::UnknownReply(rid("r2")))),
    );
}

#[tokio::test]
async fn failed_reply_changes_nothing() {
    let (store, ctl) = loaded_example().await;
    ctl.expand(&rid("r1")).await.expect("expanding r1");
    ctl.set_reply_target(Some(rid("r1"))).expect("targeting r1");
    ctl.set_draft(String::from("hi"));
    let before = ctl.cache();

    store.fail_next(StoreOp::CreateReply, "server error");
    assert_eq!(
        ctl.submit_reply("hi").await,
        Err(Error::Remote(RemoteError::new("server error"))),
    );
    assert_eq!(ctl.cache(), before);
    assert_eq!(ctl.reply_target(), Some(rid("r1")));
    assert_eq!(ctl.draft(), "hi");
}

#[tokio::test]
async fn delete_cascades_locally() {
    let (store, ctl) = loaded_example().await;
    for r in ["r1", "r2", "r4"] {
        ctl.expand(&rid(r)).await.expect("expanding");
    }
    ctl.toggle_reply_like(&rid("r3")).await.expect("liking r3");
    ctl.set_reply_target(Some(rid("r2"))).expect("targeting r2");
    let before = ctl.cache();

    let removed = ctl.delete_reply(&rid("r1")).await.expect("deleting r1");
    assert_eq!(
        removed,
        ["r1", "r2", "r3"].into_iter().map(rid).collect::<HashSet<_>>(),
    );
    assert_eq!(lines(&ctl.visible_tree()), vec![("r4", 0), ("r5", 1)]);
    let after = ctl.cache();
    let r4 = ParentKey::Reply(rid("r4"));
    assert_eq!(after.get(&r4), before.get(&r4));
    for r in ["r1", "r2", "r3"] {
        assert!(!after.contains(&rid(r)));
        assert!(!after.is_loaded(&ParentKey::Reply(rid(r))));
        assert_eq!(ctl.expansion(&rid(r)), Expansion::Collapsed);
    }
    assert!(!ctl.reply_liked(&rid("r3")));
    assert_eq!(ctl.reply_target(), None);
    // only the root of the subtree was sent to the store
    assert_eq!(store.test_num_calls(StoreOp::DeleteReply), 1);
    assert_eq!(store.test_reply(&rid("r3")), None);
}

#[tokio::test]
async fn delete_of_collapsed_reply() {
    let (_store, ctl) = loaded_example().await;
    ctl.delete_reply(&rid("r1")).await.expect("deleting r1");
    assert_eq!(lines(&ctl.visible_tree()), vec![("r4", 0)]);
}

#[tokio::test]
async fn failed_delete_changes_nothing() {
    let (store, ctl) = loaded_example().await;
    ctl.expand(&rid("r1")).await.expect("expanding r1");
    let before = ctl.cache();
    store.fail_next(StoreOp::DeleteReply, "forbidden");
    assert_eq!(
        ctl.delete_reply(&rid("r1")).await,
        Err(Error::Remote(RemoteError::new("forbidden"))),
    );
    assert_eq!(ctl.cache(), before);
    assert_eq!(ctl.expansion(&rid("r1")), Expansion::Expanded);
}

#[tokio::test]
async fn like_is_optimistic_then_reconciled() {
    let (store, ctl) = loaded_example().await;
    store.like_as("carol", &rid("r1")).expect("carol likes r1");
    let gate = store.hold(StoreOp::SetReplyLiked);
    let check_optimistic = async {
        assert!(ctl.reply_liked(&rid("r1")));
        assert_eq!(ctl.reply(&rid("r1")).unwrap().like_count, 3);
        assert!(ctl.is_toggle_in_flight(&ToggleTarget::ReplyLike(rid("r1"))));
        gate.release();
    };
    let rid_r1 = rid("r1");
    let (res, ()) = futures::join!(ctl.toggle_reply_like(&rid_r1), check_optimistic);
    // carol's like is counted by the store
    assert_eq!(res, Ok(liked(true, 4)));
    assert_eq!(ctl.reply(&rid("r1")).unwrap().like_count, 4);
    let tree = ctl.visible_tree();
    assert!(tree[0].liked_by_me);
    assert!(!ctl.is_toggle_in_flight(&ToggleTarget::ReplyLike(rid("r1"))));
}

#[tokio::test]
async fn like_without_remote_count_keeps_guess() {
    let (store, ctl) = loaded_example().await;
    store.set_report_like_counts(false);
    assert_eq!(ctl.toggle_reply_like(&rid("r4")).await, Ok(liked(true, 2)));
    assert_eq!(ctl.toggle_reply_like(&rid("r4")).await, Ok(liked(false, 1)));
}

#[tokio::test]
async fn failed_like_rolls_back() {
    let (store, ctl) = loaded_example().await;
    store.fail_next(StoreOp::SetReplyLiked, "offline");
    assert_eq!(
        ctl.toggle_reply_like(&rid("r1")).await,
        Err(Error::Remote(RemoteError::new("offline"))),
    );
    assert!(!ctl.reply_liked(&rid("r1")));
    assert_eq!(ctl.reply(&rid("r1")).unwrap().like_count, 2);

    // and the same from the liked state
    ctl.toggle_reply_like(&rid("r1")).await.expect("liking r1");
    store.fail_next(StoreOp::SetReplyLiked, "offline");
    assert!(ctl.toggle_reply_like(&rid("r1")).await.is_err());
    assert!(ctl.reply_liked(&rid("r1")));
    assert_eq!(ctl.reply(&rid("r1")).unwrap().like_count, 3);
}

#[tokio::test]
async fn back_to_back_likes_are_serialized() {
    let (store, ctl) = loaded_example().await;
    let gate = store.hold(StoreOp::SetReplyLiked);
    let release = async {
        // the second toggle waits for the first to settle before calling the store
        assert_eq!(store.test_num_calls(StoreOp::SetReplyLiked), 1);
        gate.release();
    };
    let rid_r1 = rid("r1");
    let (first, second, ()) = futures::join!(
        ctl.toggle_reply_like(&rid_r1),
        ctl.toggle_reply_like(&rid_r1),
        release,
    );
    assert_eq!(first, Ok(liked(true, 3)));
    assert_eq!(second, Ok(liked(false, 2)));
    assert!(!ctl.reply_liked(&rid("r1")));
    assert_eq!(ctl.reply(&rid("r1")).unwrap().like_count, 2);
    let like_calls = store
        .test_calls()
        .into_iter()
        .filter(|c| c.op() == StoreOp::SetReplyLiked)
        .collect::<Vec<_>>();
    assert_eq!(
        like_calls,
        vec![
            StoreCall::SetReplyLiked(rid("r1"), true),
            StoreCall::SetReplyLiked(rid("r1"), false),
        ],
    );
    assert_eq!(store.test_reply(&rid("r1")).unwrap().liked_by_me, Some(false));
}

#[tokio::test]
async fn likes_on_different_replies_do_not_wait() {
    let (store, ctl) = loaded_example().await;
    let gate = store.hold(StoreOp::SetReplyLiked);
    let other = async {
        let res = ctl.toggle_reply_like(&rid("r4")).await;
        // r1 is still waiting on the store
        assert!(ctl.is_toggle_in_flight(&ToggleTarget::ReplyLike(rid("r1"))));
        gate.release();
        res
    };
    let rid_r1 = rid("r1");
    let (r1, r4) = futures::join!(ctl.toggle_reply_like(&rid_r1), other);
    assert_eq!(r1, Ok(liked(true, 3)));
    assert_eq!(r4, Ok(liked(true, 2)));
}

#[tokio::test]
async fn reply_deleted_while_like_in_flight() {
    let (store, ctl) = loaded_example().await;
    let gate = store.hold(StoreOp::SetReplyLiked);
    let delete = async {
        ctl.delete_reply(&rid("r4")).await.expect("deleting r4");
        gate.release();
    };
    let rid_r4 = rid("r4");
    let (res, ()) = futures::join!(ctl.toggle_reply_like(&rid_r4), delete);
    // the store refuses, and there is nothing left to roll back
    assert!(matches!(res, Err(Error::Remote(_))));
    assert!(!ctl.reply_liked(&rid("r4")));
    assert_eq!(ctl.reply(&rid("r4")), None);
}

#[tokio::test]
async fn question_like_and_save() {
    let (store, ctl) = loaded_example().await;
    assert_eq!(ctl.toggle_question_like().await, Ok(liked(true, 5)));
    assert!(ctl.question_liked());
    assert_eq!(ctl.question().unwrap().like_count, 5);

    store.fail_next(StoreOp::SetQuestionLiked, "offline");
    assert!(ctl.toggle_question_like().await.is_err());
    assert!(ctl.question_liked());
    assert_eq!(ctl.question().unwrap().like_count, 5);

    assert_eq!(
        ctl.toggle_saved().await,
        Ok(Toggle {
            on: true,
            count: None
        }),
    );
    assert!(ctl.saved());
    store.fail_next(StoreOp::SetSaved, "offline");
    assert!(ctl.toggle_saved().await.is_err());
    assert!(ctl.saved());
    assert_eq!(store.test_question(&q1()).unwrap().saved_by_me, Some(true));
}

#[tokio::test]
async fn toggles_need_a_question() {
    let (_store, ctl) = example();
    assert_eq!(
        ctl.toggle_question_like().await,
        Err(Error::Validation(ValidationError::NoQuestion)),
    );
    assert_eq!(
        ctl.toggle_saved().await,
        Err(Error::Validation(ValidationError::NoQuestion)),
    );
}

#[tokio::test]
async fn initial_flags_come_from_store() {
    let (store, ctl) = loaded_example().await;
    ctl.toggle_question_like().await.expect("liking q1");
    ctl.toggle_saved().await.expect("saving q1");
    ctl.toggle_reply_like(&rid("r4")).await.expect("liking r4");

    // a fresh view of the same discussion
    let other = DiscussionController::new(store.clone(), Viewer::new("bob"));
    other.load_discussion(q1()).await.expect("loading q1");
    assert!(other.question_liked());
    assert!(other.saved());
    assert!(other.reply_liked(&rid("r4")));
    assert!(!other.reply_liked(&rid("r1")));

    // a store that does not say defaults to not liked
    store.set_report_viewer_flags(false);
    let blind = DiscussionController::new(store, Viewer::new("bob"));
    blind.load_discussion(q1()).await.expect("loading q1");
    assert!(!blind.question_liked());
    assert!(!blind.saved());
    assert!(!blind.reply_liked(&rid("r4")));
}

#[tokio::test]
async fn fetch_finishing_after_delete_is_dropped() {
    let (store, ctl) = loaded_example().await;
    let gate = store.hold(StoreOp::FetchReplies);
    let delete = async {
        ctl.delete_reply(&rid("r1")).await.expect("deleting r1");
        gate.release();
    };
    let rid_r1 = rid("r1");
    let (res, ()) = futures::join!(ctl.expand(&rid_r1), delete);
    assert_eq!(res, Ok(Expansion::Collapsed));
    assert!(!ctl.cache().is_loaded(&ParentKey::Reply(rid("r1"))));
    assert_eq!(lines(&ctl.visible_tree()), vec![("r4", 0)]);
}

#[tokio::test]
async fn collapse_keeps_loaded_replies() {
    let (_store, ctl) = loaded_example().await;
    ctl.expand(&rid("r1")).await.expect("expanding r1");
    ctl.collapse(&rid("r1")).expect("collapsing r1");
    assert!(ctl.cache().is_loaded(&ParentKey::Reply(rid("r1"))));
    assert_eq!(lines(&ctl.visible_tree()), vec![("r1", 0), ("r4", 0)]);
}

#[tokio::test]
async fn reload_drops_previous_fetches() {
    let (store, ctl) = loaded_example().await;
    let gate = store.hold(StoreOp::FetchReplies);
    let reload = async {
        // the held call is r1's; the reload's own fetches go through
        ctl.load_discussion(q1()).await.expect("reloading q1");
        gate.release();
    };
    let rid_r1 = rid("r1");
    let (res, ()) = futures::join!(ctl.expand(&rid_r1), reload);
    assert_eq!(res, Ok(Expansion::Collapsed));
    assert!(!ctl.cache().is_loaded(&ParentKey::Reply(rid("r1"))));
    assert_eq!(ctl.expansion(&rid("r1")), Expansion::Collapsed);
}

fn seed_other_questions(store: &MockStore) {
    store.seed_question("q2", "carol", 0);
    store.seed_reply("q2", "s1", None, "carol", 0);
    store.seed_question("q3", "dave", 0);
    store.seed_reply("q3", "t1", None, "dave", 0);
}

#[tokio::test]
async fn slow_load_wins_over_later_failed_one() {
    let (store, ctl) = loaded_example().await;
    seed_other_questions(&store);
    let gate = store.hold(StoreOp::FetchQuestion);
    let failing_load = async {
        store.fail_next(StoreOp::FetchQuestion, "offline");
        let res = ctl.load_discussion(QuestionId::from("q3")).await;
        gate.release();
        res
    };
    let (slow, failed) = futures::join!(ctl.load_discussion(QuestionId::from("q2")), failing_load);
    assert_eq!(failed, Err(Error::Remote(RemoteError::new("offline"))));
    assert_eq!(slow, Ok(true));
    assert_eq!(ctl.question().unwrap().id, QuestionId::from("q2"));
    assert_eq!(lines(&ctl.visible_tree()), vec![("s1", 0)]);
}

#[tokio::test]
async fn slow_load_loses_to_later_successful_one() {
    let (store, ctl) = loaded_example().await;
    seed_other_questions(&store);
    let gate = store.hold(StoreOp::FetchQuestion);
    let fast_load = async {
        let res = ctl.load_discussion(QuestionId::from("q3")).await;
        gate.release();
        res
    };
    let (slow, fast) = futures::join!(ctl.load_discussion(QuestionId::from("q2")), fast_load);
    assert_eq!(fast, Ok(true));
    assert_eq!(slow, Ok(false));
    assert_eq!(ctl.question().unwrap().id, QuestionId::from("q3"));
    assert_eq!(lines(&ctl.visible_tree()), vec![("t1", 0)]);
}

#[tokio::test]
async fn like_flag_is_tracked_in_one_place() {
    let (store, ctl) = loaded_example().await;
    ctl.toggle_reply_like(&rid("r4")).await.expect("liking r4");
    let reply = ctl.submit_reply("mine").await.expect("submitting");
    assert_eq!(reply.liked_by_me, Some(false));

    // a reload hands us the store's flags again
    ctl.load_discussion(q1()).await.expect("reloading q1");
    ctl.toggle_reply_like(&rid("r4")).await.expect("unliking r4");
    for line in ctl.visible_tree() {
        assert_eq!(line.reply.liked_by_me, None, "{:?} kept a stale flag", line.reply.id);
    }
    assert!(!ctl.reply_liked(&rid("r4")));
    assert_eq!(store.test_reply(&rid("r4")).unwrap().liked_by_me, Some(false));
}

#[tokio::test]
async fn expand_then_delete() {
    init_logs();
    let store = MockStore::new("bob");
    store.seed_question("q1", "alice", 0);
    store.seed_reply("q1", "r1", None, "alice", 2);
    store.seed_reply("q1", "r2", Some("r1"), "alice", 0);
    let ctl = DiscussionController::new(store.clone(), Viewer::new("bob"));
    ctl.load_discussion(q1()).await.expect("loading q1");

    let gate = store.hold(StoreOp::FetchReplies);
    let check = async {
        assert_eq!(ctl.expansion(&rid("r1")), Expansion::Loading);
        gate.release();
    };
    let rid_r1 = rid("r1");
    let (res, ()) = futures::join!(ctl.toggle_expand(&rid_r1), check);
    assert_eq!(res, Ok(Expansion::Expanded));
    assert_eq!(lines(&ctl.visible_tree()), vec![("r1", 0), ("r2", 1)]);

    ctl.delete_reply(&rid("r1")).await.expect("deleting r1");
    assert!(ctl.visible_tree().is_empty());
}

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            init_logs();
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    Expand { idx: usize },
    Collapse { idx: usize },
    ToggleExpand { idx: usize },
    ToggleLike { idx: usize },
    ToggleQuestionLike,
    ToggleSaved,
    SetTarget { idx: Option<usize> },
    Submit { empty: bool },
    Delete { idx: usize },
    FailNext { op: u8 },
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

const STORE_OPS: [StoreOp; 7] = [
    StoreOp::FetchQuestion,
    StoreOp::FetchReplies,
    StoreOp::CreateReply,
    StoreOp::DeleteReply,
    StoreOp::SetQuestionLiked,
    StoreOp::SetReplyLiked,
    StoreOp::SetSaved,
];

struct ComparativeFuzzer {
    store: MockStore,
    ctl: DiscussionController<MockStore>,
}

impl ComparativeFuzzer {
    async fn new() -> ComparativeFuzzer {
        let (store, ctl) = loaded_example().await;
        ComparativeFuzzer { store, ctl }
    }

    fn visible(&self, idx: usize) -> Option<ReplyId> {
        let tree = self.ctl.visible_tree();
        resize_int(idx, ..tree.len()).map(|i| tree[i].reply.id.clone())
    }

    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        let before = self.ctl.cache();
        let res = match op {
            FuzzOp::Expand { idx } => match self.visible(idx) {
                Some(r) => self.ctl.expand(&r).await.map(|_| ()),
                None => return,
            },
            FuzzOp::Collapse { idx } => match self.visible(idx) {
                Some(r) => self.ctl.collapse(&r).map(|_| ()),
                None => return,
            },
            FuzzOp::ToggleExpand { idx } => match self.visible(idx) {
                Some(r) => self.ctl.toggle_expand(&r).await.map(|_| ()),
                None => return,
            },
            FuzzOp::ToggleLike { idx } => match self.visible(idx) {
                Some(r) => self.ctl.toggle_reply_like(&r).await.map(|_| ()),
                None => return,
            },
            FuzzOp::ToggleQuestionLike => self.ctl.toggle_question_like().await.map(|_| ()),
            FuzzOp::ToggleSaved => self.ctl.toggle_saved().await.map(|_| ()),
            FuzzOp::SetTarget { idx } => {
                let target = match idx {
                    None => None,
                    Some(idx) => match self.visible(idx) {
                        Some(r) => Some(r),
                        None => return,
                    },
                };
                self.ctl.set_reply_target(target)
            }
            FuzzOp::Submit { empty } => {
                let body = match empty {
                    true => " ",
                    false => "fuzzed reply",
                };
                self.ctl.submit_reply(body).await.map(|_| ())
            }
            FuzzOp::Delete { idx } => match self.visible(idx) {
                Some(r) => self.ctl.delete_reply(&r).await.map(|_| ()),
                None => return,
            },
            FuzzOp::FailNext { op } => {
                let op = STORE_OPS[op as usize % STORE_OPS.len()];
                self.store.fail_next(op, "fuzzed failure");
                return;
            }
        };
        match res {
            Ok(()) => (),
            Err(Error::Remote(_)) | Err(Error::Validation(_)) => {
                assert_eq!(self.ctl.cache(), before, "failed operation changed the cache");
            }
            Err(e) => panic!("unexpected error {e:?}"),
        }
        self.check_consistency();
    }

    fn check_consistency(&self) {
        let cache = self.ctl.cache();
        let remote = self.store.test_replies(&q1());

        // every reply is in at most one bucket
        let mut seen = HashSet::new();
        for r in cache.replies() {
            assert!(seen.insert(r.id.clone()), "reply {:?} cached twice", r.id);
        }

        // every loaded bucket mirrors the store
        for (key, bucket) in cache.buckets() {
            let expected = remote
                .iter()
                .filter(|r| r.parent_id.as_ref() == key.reply_id())
                .collect::<Vec<_>>();
            assert_eq!(
                bucket.iter().map(|r| (&r.id, r.like_count)).collect::<Vec<_>>(),
                expected.iter().map(|r| (&r.id, r.like_count)).collect::<Vec<_>>(),
                "bucket {key:?} does not match the store",
            );
            for r in expected {
                assert_eq!(Some(self.ctl.reply_liked(&r.id)), r.liked_by_me);
            }
        }

        let question = self.store.test_question(&q1()).expect("q1 exists");
        assert_eq!(self.ctl.question_liked(), question.liked_by_me == Some(true));
        assert_eq!(self.ctl.saved(), question.saved_by_me == Some(true));
        assert_eq!(
            self.ctl.question().expect("q1 is loaded").like_count,
            question.like_count,
        );

        // the visible tree only shows loaded replies, each right under its parent
        let tree = self.ctl.visible_tree();
        let mut path: Vec<&ReplyId> = Vec::new();
        for line in &tree {
            assert!(cache.contains(&line.reply.id));
            assert!(line.depth <= path.len());
            path.truncate(line.depth);
            assert_eq!(line.reply.parent_id.as_ref(), path.last().copied());
            path.push(&line.reply.id);
        }
        if let Some(target) = self.ctl.reply_target() {
            assert!(cache.contains(&target));
        }
    }
}

do_tokio_test!(compare_with_mock, Vec<FuzzOp>, |ops: Vec<FuzzOp>| async move {
    let mut fuzzer = ComparativeFuzzer::new().await;
    for op in ops.into_iter().take(64) {
        fuzzer.execute_fuzz_op(op).await;
    }
});

use async_trait::async_trait;

use crate::{NewReply, Question, QuestionId, RemoteError, Reply, ReplyId};

/// The remote side of a discussion
///
/// Transport and wire format are up to the implementor. Deleting a reply is
/// expected to also delete all its descendants server-side.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_question(&self, q: &QuestionId) -> Result<Question, RemoteError>;

    /// Returns the direct children of `parent` (or the top-level replies if
    /// `None`), in display order
    async fn fetch_replies(
        &self,
        q: &QuestionId,
        parent: Option<&ReplyId>,
    ) -> Result<Vec<Reply>, RemoteError>;

    async fn create_reply(&self, r: NewReply) -> Result<Reply, RemoteError>;

    async fn delete_reply(&self, r: &ReplyId) -> Result<(), RemoteError>;

    /// Returns the new like count if the store reports one
    async fn set_question_liked(
        &self,
        q: &QuestionId,
        liked: bool,
    ) -> Result<Option<u64>, RemoteError>;

    /// Returns the new like count if the store reports one
    async fn set_reply_liked(&self, r: &ReplyId, liked: bool) -> Result<Option<u64>, RemoteError>;

    async fn set_saved(&self, q: &QuestionId, saved: bool) -> Result<(), RemoteError>;
}

use crate::{QuestionId, Time};

#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ReplyId(pub String);

impl From<&str> for ReplyId {
    fn from(id: &str) -> ReplyId {
        ReplyId(String::from(id))
    }
}

impl std::fmt::Display for ReplyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a bucket of replies: either the question itself, or one reply
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ParentKey {
    Root,
    Reply(ReplyId),
}

impl ParentKey {
    pub fn reply_id(&self) -> Option<&ReplyId> {
        match self {
            ParentKey::Root => None,
            ParentKey::Reply(id) => Some(id),
        }
    }
}

impl From<Option<ReplyId>> for ParentKey {
    fn from(parent: Option<ReplyId>) -> ParentKey {
        match parent {
            None => ParentKey::Root,
            Some(id) => ParentKey::Reply(id),
        }
    }
}

impl From<ReplyId> for ParentKey {
    fn from(id: ReplyId) -> ParentKey {
        ParentKey::Reply(id)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Reply {
    pub id: ReplyId,

    /// None if this reply is attached directly to the question
    pub parent_id: Option<ReplyId>,

    pub author_name: String,
    pub body: String,
    pub created_at: Time,
    pub like_count: u64,

    /// Whether the viewer already liked this reply, if the store knows
    #[serde(default)]
    pub liked_by_me: Option<bool>,
}

impl Reply {
    pub fn parent_key(&self) -> ParentKey {
        ParentKey::from(self.parent_id.clone())
    }
}

/// Everything the store needs to create a reply
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewReply {
    pub question_id: QuestionId,
    pub parent_id: Option<ReplyId>,
    pub body: String,
    pub author_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_key_conversions() {
        assert_eq!(ParentKey::from(None), ParentKey::Root);
        assert_eq!(
            ParentKey::from(Some(ReplyId::from("r1"))),
            ParentKey::Reply(ReplyId::from("r1")),
        );
        assert_eq!(ParentKey::Root.reply_id(), None);
        assert_eq!(
            ParentKey::from(ReplyId::from("r2")).reply_id(),
            Some(&ReplyId::from("r2")),
        );
    }

    #[test]
    fn liked_by_me_defaults_to_unknown() {
        let reply: Reply = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "parent_id": null,
            "author_name": "alice",
            "body": "hello",
            "created_at": "2024-03-01T10:00:00Z",
            "like_count": 2,
        }))
        .expect("parsing reply without liked_by_me");
        assert_eq!(reply.liked_by_me, None);
        assert_eq!(reply.parent_key(), ParentKey::Root);
    }
}

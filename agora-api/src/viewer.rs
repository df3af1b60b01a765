use crate::Reply;

/// The person using the discussion view
///
/// Sessions are handled elsewhere; all the engine needs is the name replies
/// get authored under.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Viewer {
    pub display_name: String,
}

impl Viewer {
    pub fn new(display_name: impl Into<String>) -> Viewer {
        Viewer {
            display_name: display_name.into(),
        }
    }

    /// Only a reply's author may delete it
    pub fn can_delete(&self, reply: &Reply) -> bool {
        reply.author_name == self.display_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReplyId;

    #[test]
    fn only_author_can_delete() {
        let reply = Reply {
            id: ReplyId::from("r1"),
            parent_id: None,
            author_name: String::from("alice"),
            body: String::from("hi"),
            created_at: chrono::Utc::now(),
            like_count: 0,
            liked_by_me: None,
        };
        assert!(Viewer::new("alice").can_delete(&reply));
        assert!(!Viewer::new("bob").can_delete(&reply));
        assert!(!Viewer::new("Alice").can_delete(&reply));
    }
}

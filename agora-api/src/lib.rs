use chrono::Utc;

pub type Time = chrono::DateTime<Utc>;

mod error;
pub use error::RemoteError;

mod question;
pub use question::{Question, QuestionId};

mod reply;
pub use reply::{NewReply, ParentKey, Reply, ReplyId};

mod store;
pub use store::RemoteStore;

mod viewer;
pub use viewer::Viewer;

/// Check that a user-provided body contains something besides whitespace
///
/// Returns the trimmed body on success.
pub fn validate_body(body: &str) -> Option<&str> {
    let body = body.trim();
    (!body.is_empty()).then_some(body)
}

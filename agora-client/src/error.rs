use crate::api::{ParentKey, RemoteError, ReplyId};

/// Input rejected before any I/O happened
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("reply body is empty")]
    EmptyBody,

    #[error("no question is loaded")]
    NoQuestion,

    #[error("reply {0} is not loaded")]
    UnknownReply(ReplyId),
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Appending to a bucket that was never loaded; this is a bug in the caller
    #[error("attempted to append a reply under {0:?}, whose replies are not loaded")]
    Precomposition(ParentKey),
}

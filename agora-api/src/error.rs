/// Failure of a call to the remote discussion store
///
/// The engine never interprets the failure beyond success/failure, so all it
/// carries is a message fit for display to the user.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error, serde::Deserialize, serde::Serialize)]
#[error("remote store error: {message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> RemoteError {
        RemoteError {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for RemoteError {
    fn from(err: anyhow::Error) -> RemoteError {
        RemoteError::new(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn anyhow_context_is_kept() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let err = RemoteError::from(err.context("fetching replies").unwrap_err());
        assert_eq!(err.message, "fetching replies: connection reset");
        assert_eq!(
            err.to_string(),
            "remote store error: fetching replies: connection reset"
        );
    }
}

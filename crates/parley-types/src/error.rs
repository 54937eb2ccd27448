use thiserror::Error;

/// Error taxonomy shared by the store, the API handlers, and the gateway.
///
/// Storage-layer errors are wrapped into `StoreFailure` so SQL detail never
/// reaches a caller; authorization failures are always reported as their own
/// kind, never folded into storage failure.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not a participant of this conversation")]
    Forbidden,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("no authenticated identity")]
    Unauthenticated,

    #[error("storage failure")]
    StoreFailure(#[source] anyhow::Error),
}

impl ChatError {
    /// Wrap an underlying persistence error. The source is kept for logging
    /// but never serialized toward a caller.
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        Self::StoreFailure(err.into())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failure_hides_detail() {
        let err = ChatError::store(anyhow::anyhow!("UNIQUE constraint failed: users.id"));
        assert_eq!(err.to_string(), "storage failure");
    }
}

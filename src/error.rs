use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Failure of an engine operation. The Event Router and the HTTP layer are
/// the only places that turn one of these into something a client sees.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid credentials")]
    InvalidCredential,
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found.")]
    NotFound(&'static str),
    #[error("{0} already exists.")]
    AlreadyExists(&'static str),
    #[error("You are already friends.")]
    AlreadyFriends,
    #[error("Friend request already sent.")]
    AlreadyRequested,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("Video index {index} is out of range for a queue of {len}.")]
    IndexOutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCredential,
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    Unexpected,
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        use CoreError::*;
        match self {
            InvalidCredential => ErrorKind::InvalidCredential,
            Validation(_) | IndexOutOfRange { .. } => ErrorKind::Validation,
            NotFound(_) => ErrorKind::NotFound,
            AlreadyExists(_) | AlreadyFriends | AlreadyRequested => ErrorKind::Conflict,
            Forbidden(_) => ErrorKind::Forbidden,
            Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

macro_rules! unexpected_impl {
    ($E:ty) => {
        impl From<$E> for CoreError {
            fn from(err: $E) -> Self {
                Self::Unexpected(anyhow::Error::from(err))
            }
        }
    };
}

unexpected_impl!(sqlx::Error);
unexpected_impl!(serde_json::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_share_a_kind() {
        assert_eq!(CoreError::AlreadyFriends.kind(), ErrorKind::Conflict);
        assert_eq!(CoreError::AlreadyRequested.kind(), ErrorKind::Conflict);
        assert_eq!(CoreError::AlreadyExists("Room").kind(), ErrorKind::Conflict);
        assert_eq!(
            CoreError::IndexOutOfRange { index: 3, len: 1 }.kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn store_failures_are_unexpected() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn messages_are_readable() {
        assert_eq!(CoreError::NotFound("User").to_string(), "User not found.");
        assert_eq!(CoreError::AlreadyFriends.to_string(), "You are already friends.");
    }
}

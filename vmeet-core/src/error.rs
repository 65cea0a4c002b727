use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable numeric code carried by every outward-facing error.
    /// The directory service speaks the same code space.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 5,
            Self::PermissionDenied(_) => 7,
            Self::InvalidInput(_) => 10,
            Self::Internal(_) | Self::Serialization(_) => 13,
            Self::Unavailable(_) => 14,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::NotFound("x".into()).code(), 5);
        assert_eq!(Error::PermissionDenied("x".into()).code(), 7);
        assert_eq!(Error::InvalidInput("x".into()).code(), 10);
        assert_eq!(Error::Internal("x".into()).code(), 13);
        assert_eq!(Error::Unavailable("x".into()).code(), 14);
    }
}

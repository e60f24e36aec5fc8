use thiserror::Error;

/// The crate-wide error taxonomy (spec §7). Every variant maps to exactly
/// one HTTP status class on the admin surface via [`Error::status_code`];
/// the dispatcher never constructs one of these for a request it serves —
/// a no-match or a proxy failure is always turned into a synthesized
/// response instead (see `dispatcher::synthesize_no_match`).
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("mock '{0}' not found")]
    MockNotFound(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("upstream proxy error: {0}")]
    Proxy(String),
}

impl Error {
    /// The HTTP status the admin surface reports for this error class.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::SessionNotFound(_) | Error::MockNotFound(_) => 404,
            Error::UnsupportedMediaType(_) => 415,
            Error::Proxy(_) => 502,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

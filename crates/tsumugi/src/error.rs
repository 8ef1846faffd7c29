use thiserror::Error;

/// Why an in-flight download was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The stream was stopped or reset from outside.
    Stopped,
    /// The per-segment timeout elapsed. Recoverable.
    TimedOut,
}

#[derive(Error, Debug)]
pub enum TsumugiError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Download cancelled: {0:?}")]
    Cancelled(CancelReason),

    #[error("Representation has not been set")]
    RepresentationNotSet,

    #[error("No {0} stream in this session")]
    StreamNotFound(crate::StreamType),

    #[error("Invalid segment index: {0}")]
    InvalidSegmentIndex(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl TsumugiError {
    /// Whether the remote reported the resource as missing, which on live
    /// content usually means the segment has not been published yet.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::HttpError(status) => *status == reqwest::StatusCode::NOT_FOUND,
            Self::RequestError(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }
}

pub type TsumugiResult<T> = Result<T, TsumugiError>;

use thiserror::Error;

/// Why a parse produced no usable tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("language error: {0}")]
    LanguageError(String),
    #[error("parse timed out")]
    TimedOut,
    #[error("parse cancelled")]
    Cancelled,
    #[error("parse failed")]
    ParseFailed,
}

/// Errors that abort a merge. Merge problems are reported as
/// [`crate::VerifyReason`]s instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("merge cancelled")]
    Cancelled,
}

use std::path::PathBuf;

use thiserror::Error;

/// Failures reading a scrape session's result file.
///
/// Every variant abandons the session that produced it; sibling sessions carry on.
#[derive(Debug, Error)]
pub enum Error {
    /// The session never wrote its result file.
    #[error("session {session} left no result at {}", path.display())]
    ResultMissing { session: String, path: PathBuf },

    #[error("failed to read result of session {session}")]
    ResultUnreadable {
        session: String,
        #[source]
        source: std::io::Error,
    },

    #[error("result of session {session} is not valid for this domain")]
    ResultMalformed {
        session: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for session result handling.
pub type Result<T> = std::result::Result<T, Error>;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The cookie was rejected. Retrying cannot help; the user has to copy a
    /// fresh one from the browser.
    #[error("credential rejected: {0}")]
    Authentication(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Maps a non-success HTTP status to an error class.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                FetchError::Authentication(format!("HTTP {status}"))
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                FetchError::Transient(format!("HTTP {status}"))
            }
            s if s.is_server_error() => FetchError::Transient(format!("HTTP {status}")),
            _ => FetchError::Malformed(format!("HTTP {status}: {snippet}")),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::from_status(status, "");
        }
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transient(e.to_string())
        }
    }
}

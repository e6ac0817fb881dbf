//! Mapping HTTP outcomes onto [`BackendError`].
//!
//! | Outcome | Error |
//! |---------|-------|
//! | network error, timeout | `Transient` |
//! | 408, 429, 5xx | `Transient` |
//! | 404 | `NotFound` |
//! | 409 | `AlreadyExists` |
//! | other 4xx | `Rejected` |
//! | anything else | `Unavailable` |

use edu_rag_core::BackendError;

/// Longest response-body excerpt carried in an error.
const BODY_EXCERPT_CHARS: usize = 500;

pub fn classify_status(status: u16, detail: &str) -> BackendError {
    let message = format!("HTTP {status}: {}", excerpt(detail));
    match status {
        404 => BackendError::NotFound(message),
        409 => BackendError::AlreadyExists(message),
        408 | 429 | 500..=599 => BackendError::Transient(message),
        400..=499 => BackendError::Rejected(message),
        _ => BackendError::Unavailable(message),
    }
}

pub fn classify_transport(err: &reqwest::Error) -> BackendError {
    if err.is_timeout() || err.is_connect() {
        BackendError::Transient(err.to_string())
    } else {
        BackendError::Unavailable(err.to_string())
    }
}

/// Turn a non-success response into an error, consuming its body.
pub async fn error_from_response(resp: reqwest::Response) -> BackendError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    classify_status(status, &body)
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(BODY_EXCERPT_CHARS).collect()
}

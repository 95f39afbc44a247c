use derive_more::derive::Display;
use reqwest::StatusCode;
use serde::Deserialize;

/// Signals from the metadata source. Only `QuotaExceeded` is terminal for
/// a run, everything else is worth retrying.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[display("quota exceeded: {_0}")]
    QuotaExceeded(String),
    #[display("channel not found")]
    NotFound,
    #[display("malformed response: {_0}")]
    Malformed(String),
    #[display("request timed out")]
    Timeout,
    #[display("request failed: {_0}")]
    Request(String),
}

impl std::error::Error for SourceError {}

impl From<reqwest::Error> for SourceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SourceError::Timeout
        } else if error.is_decode() {
            SourceError::Malformed(error.to_string())
        } else {
            SourceError::Request(error.to_string())
        }
    }
}

/// Error body returned by Google APIs.
#[derive(Debug, Deserialize)]
struct GoogleApiErrorBody {
    error: GoogleApiError,
}

#[derive(Debug, Deserialize)]
struct GoogleApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GoogleApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleApiErrorDetail {
    #[serde(default)]
    reason: String,
}

const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded"];

impl SourceError {
    /// Map a non-success response from the Data API.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<GoogleApiErrorBody>(body).ok();
        let message = parsed
            .as_ref()
            .map(|b| b.error.message.clone())
            .unwrap_or_else(|| body.chars().take(200).collect());
        let quota_reason = parsed.as_ref().is_some_and(|b| {
            b.error
                .errors
                .iter()
                .any(|e| QUOTA_REASONS.contains(&e.reason.as_str()))
        });

        match status {
            StatusCode::FORBIDDEN if quota_reason => SourceError::QuotaExceeded(message),
            // Without a parseable body a 403 from this API is almost always quota
            StatusCode::FORBIDDEN if parsed.is_none() => SourceError::QuotaExceeded(message),
            StatusCode::NOT_FOUND => SourceError::NotFound,
            _ => SourceError::Request(format!("{}: {}", status, message)),
        }
    }
}

/// Outcome of the quota-aware fetch once retries are done.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Budget spent or the service refused on quota. Ends the run.
    #[display("quota exhausted")]
    QuotaExhausted,
    /// Deadline safety margin reached between attempts.
    #[display("run deadline reached")]
    DeadlineReached,
    /// Retries used up for this channel.
    #[display("fetch failed permanently: {_0}")]
    Permanent(String),
}

impl std::error::Error for FetchError {}

/// Signals from the reasoning service.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ReasoningError {
    #[display("rate limited: {_0}")]
    RateLimited(String),
    /// Billing quota gone; nothing else will succeed this run.
    #[display("reasoning quota exhausted: {_0}")]
    QuotaExhausted(String),
    #[display("malformed classification: {_0}")]
    Malformed(String),
    #[display("request timed out")]
    Timeout,
    #[display("request failed: {_0}")]
    Request(String),
    /// This one request was refused. Retrying it will not help.
    #[display("request rejected: {_0}")]
    Rejected(String),
    /// Key missing, expired or revoked; no request will succeed this run.
    #[display("not authorized: {_0}")]
    Unauthorized(String),
}

impl std::error::Error for ReasoningError {}

impl From<reqwest::Error> for ReasoningError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return ReasoningError::Timeout;
        }
        match error.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => ReasoningError::RateLimited(error.to_string()),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                ReasoningError::Unauthorized(error.to_string())
            }
            Some(StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) => {
                ReasoningError::Rejected(error.to_string())
            }
            _ => ReasoningError::Request(error.to_string()),
        }
    }
}

/// Run-level failures surfaced by the binaries.
#[derive(Debug, Display)]
pub enum EnricherError {
    #[display("store unavailable: {_0}")]
    Store(anyhow::Error),
    #[display("input unavailable: {_0}")]
    Input(anyhow::Error),
    #[display("configuration error: {_0}")]
    Config(String),
}

impl std::error::Error for EnricherError {}

impl From<sea_orm::DbErr> for EnricherError {
    fn from(error: sea_orm::DbErr) -> Self {
        EnricherError::Store(error.into())
    }
}

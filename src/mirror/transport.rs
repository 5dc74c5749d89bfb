use super::{FailureKind, SyncRequest, SyncResponse};
use reqwest::blocking::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const BODY_EXCERPT_LIMIT: usize = 300;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror endpoint is not configured")]
    NotConfigured,
    #[error("mirror unreachable: {0}")]
    Unreachable(String),
    #[error("mirror returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unexpected mirror response: {0}")]
    BadResponse(String),
    #[error("mirror rejected the batch: {0}")]
    Rejected(String),
}

impl MirrorError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NotConfigured => FailureKind::NotConfigured,
            Self::Unreachable(_) => FailureKind::Unreachable,
            Self::HttpStatus { .. } => FailureKind::HttpStatus,
            Self::BadResponse(_) => FailureKind::BadResponse,
            Self::Rejected(_) => FailureKind::Rejected,
        }
    }
}

/// One request/response round trip to the spreadsheet mirror.
pub trait MirrorTransport {
    fn send(&self, request: &SyncRequest) -> Result<SyncResponse, MirrorError>;
}

impl<T: MirrorTransport + ?Sized> MirrorTransport for Arc<T> {
    fn send(&self, request: &SyncRequest) -> Result<SyncResponse, MirrorError> {
        (**self).send(request)
    }
}

impl<T: MirrorTransport + ?Sized> MirrorTransport for Box<T> {
    fn send(&self, request: &SyncRequest) -> Result<SyncResponse, MirrorError> {
        (**self).send(request)
    }
}

/// Stand-in used when no endpoint is configured; every send fails the same way.
pub struct Unconfigured;

impl MirrorTransport for Unconfigured {
    fn send(&self, _request: &SyncRequest) -> Result<SyncResponse, MirrorError> {
        Err(MirrorError::NotConfigured)
    }
}

/// JSON over HTTP POST, the shape the spreadsheet automation endpoint expects.
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("absensid/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MirrorError::Unreachable(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl MirrorTransport for HttpTransport {
    fn send(&self, request: &SyncRequest) -> Result<SyncResponse, MirrorError> {
        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .map_err(|e| MirrorError::Unreachable(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| MirrorError::Unreachable(format!("failed to read response body: {e}")))?;
        if !status.is_success() {
            return Err(MirrorError::HttpStatus {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }
        serde_json::from_str::<SyncResponse>(&body)
            .map_err(|e| MirrorError::BadResponse(format!("{e}; body: {}", excerpt(&body))))
    }
}

fn excerpt(body: &str) -> String {
    let t = body.trim();
    match t.char_indices().nth(BODY_EXCERPT_LIMIT) {
        Some((idx, _)) => format!("{}...", &t[..idx]),
        None => t.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(BODY_EXCERPT_LIMIT + 5);
        let out = excerpt(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), BODY_EXCERPT_LIMIT + 3);
        assert_eq!(excerpt("  short  "), "short");
    }
}

//! One-way export of store data to the spreadsheet mirror.
//!
//! The mirror is advisory. [`MirrorSyncClient::sync_batch`] never fails:
//! when the remote side cannot be reached or refuses the batch, the caller
//! gets a `success-local` result carrying the diagnostic instead.

pub mod plan;
pub mod rows;
// In-process stand-in for the remote sheet.
#[cfg(test)]
mod sheet;
pub mod transport;

use crate::config::MirrorConfig;
use crate::store::now_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub use transport::{HttpTransport, MirrorError, MirrorTransport, Unconfigured};

/// A flat, denormalized object as written to one sheet row.
pub type SnapshotRow = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncKind {
    #[serde(rename = "students")]
    Students,
    #[serde(rename = "attendance")]
    Attendance,
    #[serde(rename = "aggregate")]
    MonthlyAggregate,
}

impl SyncKind {
    pub const ALL: [SyncKind; 3] = [
        SyncKind::Students,
        SyncKind::Attendance,
        SyncKind::MonthlyAggregate,
    ];

    pub fn action(self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Attendance => "attendance",
            Self::MonthlyAggregate => "aggregate",
        }
    }
}

/// Request body posted to the mirror endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub action: SyncKind,
    pub rows: Vec<SnapshotRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_context: Option<String>,
}

/// Response body returned by the mirror endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "success-local")]
    SuccessLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotConfigured,
    Unreachable,
    HttpStatus,
    BadResponse,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub kind: SyncKind,
    pub status: SyncStatus,
    pub local_only: bool,
    pub message: String,
    pub record_count: usize,
    pub added: i64,
    pub updated: i64,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub synced_at: String,
}

impl SyncResult {
    fn local_only(kind: SyncKind, record_count: usize, month_context: Option<String>, error: &MirrorError) -> Self {
        Self {
            kind,
            status: SyncStatus::SuccessLocal,
            local_only: true,
            message: format!(
                "cloud sync unavailable, local record count: {}",
                record_count
            ),
            record_count,
            added: record_count as i64,
            updated: 0,
            errors: Vec::new(),
            month_context,
            failure: Some(error.failure_kind()),
            diagnostic: Some(error.to_string()),
            synced_at: now_timestamp(),
        }
    }
}

pub struct MirrorSyncClient {
    transport: Box<dyn MirrorTransport>,
}

impl MirrorSyncClient {
    pub fn new(transport: Box<dyn MirrorTransport>) -> Self {
        Self { transport }
    }

    /// Build a client for one request from the effective configuration.
    /// A client that cannot be built degrades like an unreachable mirror.
    pub fn from_config(config: &MirrorConfig) -> Self {
        let Some(url) = config.url.as_deref() else {
            return Self::new(Box::new(Unconfigured));
        };
        match HttpTransport::new(url, config.timeout()) {
            Ok(t) => Self::new(Box::new(t)),
            Err(e) => {
                warn!(error = %e, "mirror transport unavailable");
                Self::new(Box::new(Unconfigured))
            }
        }
    }

    /// Send one batch. Student batches replace the whole mirror table,
    /// attendance batches upsert by `id`, aggregate batches replace the rows
    /// of `month_context`. Remote failures come back as `success-local`.
    pub fn sync_batch(
        &self,
        kind: SyncKind,
        rows: Vec<SnapshotRow>,
        month_context: Option<&str>,
    ) -> SyncResult {
        let record_count = rows.len();
        let month_context = match (kind, month_context) {
            (SyncKind::MonthlyAggregate, Some(m)) => Some(m.to_string()),
            (SyncKind::MonthlyAggregate, None) => rows
                .first()
                .and_then(|r| r.get("month"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            _ => None,
        };
        let request = SyncRequest {
            action: kind,
            rows,
            month_context: month_context.clone(),
        };

        match self.transport.send(&request).and_then(check_response) {
            Ok(resp) => {
                info!(
                    action = kind.action(),
                    records = record_count,
                    added = resp.added.unwrap_or(0),
                    updated = resp.updated.unwrap_or(0),
                    "mirror sync completed"
                );
                SyncResult {
                    kind,
                    status: SyncStatus::Success,
                    local_only: false,
                    message: resp.message,
                    record_count,
                    added: resp.added.unwrap_or(0),
                    updated: resp.updated.unwrap_or(0),
                    errors: resp.errors,
                    month_context,
                    failure: None,
                    diagnostic: None,
                    synced_at: now_timestamp(),
                }
            }
            Err(e) => {
                warn!(
                    action = kind.action(),
                    records = record_count,
                    error = %e,
                    "mirror sync unavailable, keeping local result"
                );
                SyncResult::local_only(kind, record_count, month_context, &e)
            }
        }
    }
}

// The automation endpoint reports script failures inside a 200 response.
fn check_response(resp: SyncResponse) -> Result<SyncResponse, MirrorError> {
    if resp.status == "error" || resp.message.contains("Exception") {
        let message = if resp.message.is_empty() {
            "mirror reported an error".to_string()
        } else {
            resp.message
        };
        return Err(MirrorError::Rejected(message));
    }
    if resp.status != "success" {
        return Err(MirrorError::BadResponse(format!(
            "unknown status {:?}",
            resp.status
        )));
    }
    Ok(resp)
}

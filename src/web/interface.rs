//! Defines all the structs needed to interact with the bridge over HTTP.
//!
//! Script traffic itself uses plain-text and form-encoded bodies so that the
//! existing remote plugin keeps working. Everything added beside it is JSON.

use std::path::PathBuf;

use serde::Serialize;

use crate::session_id::SessionId;

/// Current version of the bridge, reported by `/info`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Why the server stopped accepting connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExitReason {
    /// Ctrl-C was pressed.
    Interrupted,

    /// The process received SIGTERM.
    Terminated,
}

/// Response body from `/info`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfoResponse {
    pub server_version: String,
    pub session_id: SessionId,
    pub temp_dir: PathBuf,
    pub script_count: usize,
}

/// Generic response given for JSON routes when something goes wrong.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    kind: ErrorResponseKind,
    details: String,
}

impl ErrorResponse {
    pub fn not_found<S: Into<String>>(details: S) -> Self {
        Self {
            kind: ErrorResponseKind::NotFound,
            details: details.into(),
        }
    }

    pub fn internal_error<S: Into<String>>(details: S) -> Self {
        Self {
            kind: ErrorResponseKind::InternalError,
            details: details.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub enum ErrorResponseKind {
    NotFound,
    InternalError,
}

//! Defines the HTTP routes the remote host talks to.
//!
//! `/open`, `/changes` and `/rbxedit` keep the wire format the remote plugin
//! already speaks: form-encoded request bodies, with plain `success: ...` and
//! `failure: ...` replies. `/changes` and `/info` answer with JSON.

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Body, Method, Request, Response, StatusCode};

use crate::{
    edit_session::{EditSession, SessionError},
    web::{
        interface::{ErrorResponse, ServerInfoResponse, SERVER_VERSION},
        util::{json, json_ok, text},
    },
};

pub async fn call<B>(session: Arc<EditSession>, request: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: fmt::Display,
{
    let service = ApiService::new(session);

    match (request.method(), request.uri().path()) {
        (&Method::POST, "/open") => service.handle_open(request).await,
        (&Method::GET, "/changes") => service.handle_changes(),
        (&Method::POST, "/rbxedit") => service.handle_rbxedit(request).await,
        (&Method::GET, "/info") => service.handle_info(),

        (method, path) => {
            log::debug!("No route for {} {}", method, path);
            json(
                ErrorResponse::not_found(format!("Route not found: {} {}", method, path)),
                StatusCode::NOT_FOUND,
            )
        }
    }
}

pub struct ApiService {
    session: Arc<EditSession>,
}

impl ApiService {
    pub fn new(session: Arc<EditSession>) -> Self {
        ApiService { session }
    }

    /// Materializes a script, if needed, and opens it in an editor.
    async fn handle_open<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: fmt::Display,
    {
        let mut form = match read_form(request).await {
            Ok(form) => form,
            Err(response) => return response,
        };

        let Some(identifier) = form.remove("uuid") else {
            return missing_field("uuid");
        };
        let body = form.remove("body").unwrap_or_default();
        let editor = form.remove("editor").unwrap_or_default();

        match self
            .session
            .open_or_reopen(&identifier, body.as_bytes(), &editor)
        {
            Ok(outcome) => text(format!("success: {}", outcome.as_str()), StatusCode::OK),
            Err(err) => failure(err),
        }
    }

    /// Hands over every script the user edited since the last poll.
    fn handle_changes(&self) -> Response<Full<Bytes>> {
        match self.session.collect_changes() {
            Ok(changes) => json_ok(changes),
            Err(err) => json(
                ErrorResponse::internal_error(err.to_string()),
                status_for(&err),
            ),
        }
    }

    /// Writes content coming from the remote host into an open script.
    async fn handle_rbxedit<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: fmt::Display,
    {
        let mut form = match read_form(request).await {
            Ok(form) => form,
            Err(response) => return response,
        };

        let Some(identifier) = form.remove("uuid") else {
            return missing_field("uuid");
        };
        let body = form.remove("body").unwrap_or_default();

        match self.session.apply_remote_update(&identifier, body.as_bytes()) {
            Ok(()) => text("success", StatusCode::OK),
            Err(err) => failure(err),
        }
    }

    fn handle_info(&self) -> Response<Full<Bytes>> {
        json_ok(&ServerInfoResponse {
            server_version: SERVER_VERSION.to_owned(),
            session_id: self.session.session_id(),
            temp_dir: self.session.dir_path().to_path_buf(),
            script_count: self.session.stats().scripts,
        })
    }
}

/// Reads a form-encoded request body. The last value wins when a field is
/// repeated.
async fn read_form<B>(request: Request<B>) -> Result<HashMap<String, String>, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: fmt::Display,
{
    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return Err(text(
                format!("failure: couldn't read request body: {}", err),
                StatusCode::BAD_REQUEST,
            ))
        }
    };

    Ok(url::form_urlencoded::parse(&body)
        .into_owned()
        .collect())
}

fn missing_field(name: &str) -> Response<Full<Bytes>> {
    text(
        format!("failure: missing form field '{}'", name),
        StatusCode::BAD_REQUEST,
    )
}

fn failure(err: SessionError) -> Response<Full<Bytes>> {
    match &err {
        SessionError::NotOpened { .. } | SessionError::InvalidIdentifier => {
            log::info!("Rejected request: {}", err)
        }
        _ => log::error!("{}", err),
    }

    text(format!("failure: {}", err), status_for(&err))
}

fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotOpened { .. } => StatusCode::NOT_FOUND,
        SessionError::InvalidIdentifier => StatusCode::BAD_REQUEST,
        SessionError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Write { .. }
        | SessionError::Watch { .. }
        | SessionError::Launch { .. }
        | SessionError::Provision { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

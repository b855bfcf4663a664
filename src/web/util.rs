use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    Response, StatusCode,
};
use serde::Serialize;

pub fn json_ok<T: Serialize>(value: T) -> Response<Full<Bytes>> {
    json(value, StatusCode::OK)
}

pub fn json<T: Serialize>(value: T, code: StatusCode) -> Response<Full<Bytes>> {
    match serde_json::to_vec(&value) {
        Ok(serialized) => respond(serialized, code, "application/json"),
        Err(err) => text(err.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub fn text<S: Into<String>>(body: S, code: StatusCode) -> Response<Full<Bytes>> {
    respond(body.into(), code, "text/plain; charset=utf-8")
}

fn respond<B: Into<Bytes>>(
    body: B,
    code: StatusCode,
    content_type: &'static str,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

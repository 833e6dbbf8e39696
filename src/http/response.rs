//! Responses the gateway writes itself.

use std::fmt::Display;

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

/// `text/plain` response.
pub fn text(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// `502 Bad Gateway: <reason>`.
pub fn bad_gateway(reason: &dyn Display) -> Response<Body> {
    text(StatusCode::BAD_GATEWAY, format!("502 Bad Gateway: {reason}"))
}

pub fn bad_request(reason: &dyn Display) -> Response<Body> {
    text(StatusCode::BAD_REQUEST, format!("400 Bad Request: {reason}"))
}

pub fn method_not_allowed() -> Response<Body> {
    text(StatusCode::METHOD_NOT_ALLOWED, "405 Method Not Allowed")
}

pub fn internal_error() -> Response<Body> {
    text(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
}

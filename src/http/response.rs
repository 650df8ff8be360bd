//! HTTP response builder.
//!
//! Provides a fluent builder API for constructing responses. A [`Response`]
//! travels back up the middleware chain as a value, so middleware can inspect
//! or decorate it after the downstream handler returns — this is the seam the
//! read-through cache uses to capture response bodies without instrumenting
//! emission methods.

use serde::Serialize;

use crate::context::Extensions;

use super::{Headers, StatusCode};

/// An HTTP response flowing back through the middleware chain.
///
/// Besides status, headers, and body, a response carries an [`Extensions`]
/// map for request-scoped observability records (e.g. the cache status
/// attached by the read-through middleware).
///
/// # Examples
///
/// ```
/// use readthru::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert!(response.is_json());
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    extensions: Extensions,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            extensions: Extensions::new(),
        }
    }

    /// Creates a JSON response: serializes `value` and sets the
    /// `Content-Type: application/json` header.
    ///
    /// Serialization failure degrades to a `500` with a plain-text body — a
    /// handler returning a response must always produce one.
    ///
    /// # Examples
    ///
    /// ```
    /// use readthru::http::{Response, StatusCode};
    ///
    /// let response = Response::json(StatusCode::Ok, &serde_json::json!({"a": 1}));
    /// assert_eq!(response.payload(), br#"{"a":1}"#);
    /// ```
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .header("Content-Type", "application/json")
                .body_bytes(body),
            Err(e) => {
                tracing::error!("failed to serialize JSON response body: {e}");
                Self::new(StatusCode::InternalServerError).body("response serialization failed")
            }
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware that receives a
    /// `Response` from downstream and decorates it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body bytes.
    pub fn payload(&self) -> &[u8] {
        &self.body
    }

    /// Returns the `Content-Type` header value, if set.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Returns `true` if the response declares a JSON content type.
    ///
    /// Matches `application/json` and suffixed types like
    /// `application/problem+json`; parameters (`; charset=utf-8`) are ignored.
    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|ct| {
                let essence = ct.split(';').next().unwrap_or("").trim();
                essence.eq_ignore_ascii_case("application/json")
                    || essence.to_ascii_lowercase().ends_with("+json")
            })
            .unwrap_or(false)
    }

    /// Returns the response-scoped extensions map.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns a mutable reference to the response-scoped extensions map.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

//! Builder-constructed HTTP request model.
//!
//! The host server owns wire parsing; by the time a request reaches the
//! middleware pipeline it is already a structured value. [`Request::new`]
//! splits the request target into path and query string and parses query
//! parameters eagerly, so key-derivation closures and cacheability predicates
//! can inspect them without re-parsing.

use std::collections::HashMap;

use bytes::Bytes;

use super::{Headers, Method};

/// A structured HTTP request flowing through the middleware pipeline.
///
/// Cloning is cheap: the body is a reference-counted [`Bytes`] buffer.
///
/// # Examples
///
/// ```
/// use readthru::http::{Method, Request};
///
/// let request = Request::new(Method::Get, "/api/users?page=2")
///     .header("Accept", "application/json");
///
/// assert_eq!(request.path(), "/api/users");
/// assert_eq!(request.query_string(), Some("page=2"));
/// assert_eq!(request.query_param("page"), Some("2"));
/// assert_eq!(request.full_path(), "/api/users?page=2");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
    body: Bytes,
    params: HashMap<String, String>,
}

impl Request {
    /// Creates a request from a method and a request target.
    ///
    /// The target may carry a query string (`/users?page=2`); it is split at
    /// the first `?` and the query parameters are parsed immediately.
    pub fn new(method: Method, target: impl AsRef<str>) -> Self {
        let target = target.as_ref();
        let (path, query) = match target.find('?') {
            Some(pos) => (
                target[..pos].to_owned(),
                Some(target[pos + 1..].to_owned()),
            ),
            None => (target.to_owned(), None),
        };
        let params = query.as_deref().map(parse_query_string).unwrap_or_default();

        Self {
            method,
            path,
            query,
            headers: Headers::new(),
            body: Bytes::new(),
            params,
        }
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body from raw bytes.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the original request target: the path plus the query string,
    /// exactly as received. This is the path component of the default cache
    /// key, so it must round-trip without normalization.
    pub fn full_path(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request body bytes.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// Keys and values have `+` decoded as a space. Full percent-decoding is
/// intentionally omitted; the raw query string is preserved separately for
/// key derivation, which must not alter the original target.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.replace('+', " ");
            let value = parts.next().unwrap_or("").replace('+', " ");
            Some((key, value))
        })
        .collect()
}

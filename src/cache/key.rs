//! Cache-key derivation.
//!
//! A store key has the shape `"<prefix>:<body>"`. The body comes from the
//! route's [`KeySpec`]; the prefix namespaces all keys from one configuration
//! so features sharing a store do not collide.
//!
//! Derivation is deterministic and side-effect-free: identical
//! `(request, spec, prefix)` inputs always produce the identical string, and
//! no truncation or lossy encoding is applied — distinct inputs that the
//! caller keeps distinct stay distinct in the store.

use std::fmt;
use std::sync::Arc;

use crate::http::Request;

/// Key-derivation closure: maps a request to a key body.
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// How the key body is produced for a route, resolved once at configuration
/// time.
///
/// # Examples
///
/// ```
/// use readthru::cache::{KeySpec, derive_key};
/// use readthru::http::{Method, Request};
///
/// let request = Request::new(Method::Get, "/api/users?x=1");
///
/// assert_eq!(derive_key(&request, &KeySpec::MethodAndPath, "cache"),
///            "cache:GET:/api/users?x=1");
/// assert_eq!(derive_key(&request, &KeySpec::literal("users-index"), "cache"),
///            "cache:users-index");
///
/// let by_param = KeySpec::derived(|req: &Request| {
///     format!("users:{}", req.query_param("x").unwrap_or("all"))
/// });
/// assert_eq!(derive_key(&request, &by_param, "cache"), "cache:users:1");
/// ```
#[derive(Clone)]
pub enum KeySpec {
    /// Default: `"<METHOD>:<full original path including query string>"`.
    MethodAndPath,
    /// A literal string used verbatim as the key body.
    Literal(String),
    /// A closure computing the key body from the request.
    Derived(KeyFn),
}

impl KeySpec {
    /// A literal key body.
    pub fn literal(body: impl Into<String>) -> Self {
        Self::Literal(body.into())
    }

    /// A key body computed from the request.
    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        Self::Derived(Arc::new(f))
    }

    /// Resolves the key body for a request.
    pub fn body(&self, request: &Request) -> String {
        match self {
            Self::MethodAndPath => {
                format!("{}:{}", request.method().as_str(), request.full_path())
            }
            Self::Literal(body) => body.clone(),
            Self::Derived(f) => f(request),
        }
    }
}

impl Default for KeySpec {
    fn default() -> Self {
        Self::MethodAndPath
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodAndPath => f.write_str("KeySpec::MethodAndPath"),
            Self::Literal(body) => f.debug_tuple("KeySpec::Literal").field(body).finish(),
            Self::Derived(_) => f.write_str("KeySpec::Derived(..)"),
        }
    }
}

/// Computes the final store key: `"<prefix>:<body>"`.
pub fn derive_key(request: &Request, spec: &KeySpec, prefix: &str) -> String {
    format!("{}:{}", prefix, spec.body(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_PREFIX;
    use crate::http::Method;

    #[test]
    fn default_key_is_method_and_full_path() {
        let req = Request::new(Method::Get, "/api/users?x=1");
        let key = derive_key(&req, &KeySpec::MethodAndPath, DEFAULT_PREFIX);
        assert_eq!(key, "cache:GET:/api/users?x=1");
    }

    #[test]
    fn derivation_is_deterministic() {
        let req = Request::new(Method::Get, "/api/users?x=1&y=2");
        let spec = KeySpec::MethodAndPath;
        assert_eq!(
            derive_key(&req, &spec, DEFAULT_PREFIX),
            derive_key(&req, &spec, DEFAULT_PREFIX)
        );
    }

    #[test]
    fn literal_body_is_used_verbatim() {
        let req = Request::new(Method::Get, "/whatever");
        let key = derive_key(&req, &KeySpec::literal("users-index"), "cache");
        assert_eq!(key, "cache:users-index");
    }

    #[test]
    fn derived_body_sees_the_request() {
        let spec = KeySpec::derived(|req: &Request| {
            format!("user:{}", req.query_param("id").unwrap_or("none"))
        });
        let req = Request::new(Method::Get, "/users?id=42");
        assert_eq!(derive_key(&req, &spec, "cache"), "cache:user:42");
    }

    #[test]
    fn custom_prefix_namespaces_the_key() {
        let req = Request::new(Method::Get, "/api/users");
        let key = derive_key(&req, &KeySpec::MethodAndPath, "tenant-a");
        assert_eq!(key, "tenant-a:GET:/api/users");
    }

    #[test]
    fn distinct_paths_never_collide() {
        let a = Request::new(Method::Get, "/api/users?x=1");
        let b = Request::new(Method::Get, "/api/users?x=2");
        assert_ne!(
            derive_key(&a, &KeySpec::MethodAndPath, "cache"),
            derive_key(&b, &KeySpec::MethodAndPath, "cache")
        );
    }
}

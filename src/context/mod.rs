//! Per-request context — the value handed down the middleware chain.
//!
//! [`Context`] carries the parsed [`Request`] plus an [`Extensions`] map for
//! request-scoped state injection, so middleware can communicate with
//! downstream handlers without coupling to each other's types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::Request;

/// Type-erased extensions map — used to attach per-request state without
/// requiring participants to know about each other's types.
///
/// # Examples
///
/// ```
/// use readthru::context::Extensions;
///
/// #[derive(Debug, PartialEq)]
/// struct RequestId(u64);
///
/// let mut ext = Extensions::new();
/// ext.insert(RequestId(42));
/// assert_eq!(ext.get::<RequestId>(), Some(&RequestId(42)));
/// ```
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value by type.
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Get a mutable reference to a value by type.
    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove and return a value by type.
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Per-request context handed to each middleware and the final handler.
#[derive(Debug)]
pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    /// Create a new context from a request.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
        }
    }

    /// Returns the request being handled.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the request-scoped extensions map.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns a mutable reference to the request-scoped extensions map.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[derive(Debug, PartialEq)]
    struct Principal(&'static str);

    #[test]
    fn extensions_insert_get_remove() {
        let mut ext = Extensions::new();
        ext.insert(Principal("alice"));
        assert_eq!(ext.get::<Principal>(), Some(&Principal("alice")));
        assert_eq!(ext.remove::<Principal>(), Some(Principal("alice")));
        assert_eq!(ext.get::<Principal>(), None);
    }

    #[test]
    fn insert_replaces_same_type() {
        let mut ext = Extensions::new();
        ext.insert(Principal("alice"));
        ext.insert(Principal("bob"));
        assert_eq!(ext.get::<Principal>(), Some(&Principal("bob")));
    }

    #[test]
    fn context_exposes_request() {
        let ctx = Context::new(Request::new(Method::Get, "/health"));
        assert_eq!(ctx.request().path(), "/health");
    }
}

//! The HTTP routing table: method → exact path → handler.

use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::CoreError;
use crate::socket::Socket;

/// A request handler: socket to respond on, the raw query string, the
/// lowercased header map, and the request body.
pub type Handler = Rc<dyn Fn(&mut Socket, &str, &HashMap<String, String>, &Bytes)>;

/// An exact-match method+path routing table. Can be swapped on a live
/// `Dispatcher` without disturbing connections mid-request: each
/// connection resolves against whichever `Rc<Router>` it captured when
/// it started parsing its current request.
#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<String, HashMap<String, Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`+`path`. Fails if that exact
    /// pair is already registered.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        handler: impl Fn(&mut Socket, &str, &HashMap<String, String>, &Bytes) + 'static,
    ) -> Result<(), CoreError> {
        let method = method.into();
        let path = path.into();

        let by_path = self.routes.entry(method.clone()).or_default();
        if by_path.contains_key(&path) {
            return Err(CoreError::DuplicateRoute { method, path });
        }
        by_path.insert(path, Rc::new(handler));
        Ok(())
    }

    /// Merges `other`'s routes into `self`, `other` taking precedence
    /// on conflicts.
    pub fn merge(&mut self, other: Router) {
        for (method, by_path) in other.routes {
            self.routes.entry(method).or_default().extend(by_path);
        }
    }

    pub fn lookup(&self, method: &str, path: &str) -> Option<Handler> {
        self.routes.get(method)?.get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_exact_match() {
        let mut router = Router::new();
        router.register("GET", "/ping", |_s, _q, _h, _b| {}).unwrap();
        assert!(router.lookup("GET", "/ping").is_some());
        assert!(router.lookup("GET", "/pong").is_none());
        assert!(router.lookup("POST", "/ping").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut router = Router::new();
        router.register("GET", "/x", |_s, _q, _h, _b| {}).unwrap();
        let err = router.register("GET", "/x", |_s, _q, _h, _b| {}).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateRoute { .. }));
    }

    #[test]
    fn merge_prefers_incoming_routes() {
        let mut base = Router::new();
        base.register("GET", "/x", |_s, _q, _h, _b| {}).unwrap();

        let mut incoming = Router::new();
        incoming.register("GET", "/y", |_s, _q, _h, _b| {}).unwrap();

        base.merge(incoming);
        assert!(base.lookup("GET", "/x").is_some());
        assert!(base.lookup("GET", "/y").is_some());
    }
}

use std::sync::Arc;

use parking_lot::RwLock;

use crate::http::Request;

/// A request handler. Invoked by a work-queue worker with the in-flight request and the portion
/// of the URI following the matched prefix.
pub type Handler = Arc<dyn Fn(&mut Request, &str) + Send + Sync>;

struct Entry {
    prefix: String,
    exact: bool,
    handler: Handler,
}

/// Ordered `(prefix, exact, handler)` table consulted once per request.
///
/// The source this runtime models leaves the table unguarded on the assumption that
/// registration only happens outside the active dispatch window. This implementation instead
/// guards it with a reader-writer lock: `lookup` takes a read lock (so concurrent requests never
/// block each other) and `register`/`unregister` take a write lock, which makes unregistration
/// safe at any phase rather than only between Interrupt and Stop.
pub struct PathHandlerRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl Default for PathHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PathHandlerRegistry {
    pub fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()) }
    }

    /// Appends a handler record.
    pub fn register(&self, prefix: impl Into<String>, exact: bool, handler: Handler) {
        self.entries.write().push(Entry { prefix: prefix.into(), exact, handler });
    }

    /// Removes the first record matching `(prefix, exact)`; a no-op if absent.
    pub fn unregister(&self, prefix: &str, exact: bool) {
        let mut entries = self.entries.write();
        if let Some(pos) = entries.iter().position(|e| e.exact == exact && e.prefix == prefix) {
            entries.remove(pos);
        }
    }

    /// Looks up the first handler whose prefix matches `uri`, returning it together with the
    /// suffix of `uri` following the matched prefix.
    pub fn lookup(&self, uri: &str) -> Option<(Handler, String)> {
        let entries = self.entries.read();
        for entry in entries.iter() {
            if entry.exact {
                if uri == entry.prefix {
                    return Some((entry.handler.clone(), String::new()));
                }
            } else if let Some(suffix) = uri.strip_prefix(entry.prefix.as_str()) {
                return Some((entry.handler.clone(), suffix.to_string()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_req, _suffix| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn exact_match_requires_equality() {
        let registry = PathHandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register("/rpc", true, counting_handler(hits.clone()));

        assert!(registry.lookup("/rpc").is_some());
        assert!(registry.lookup("/rpc/extra").is_none());
    }

    #[test]
    fn prefix_match_returns_suffix() {
        let registry = PathHandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register("/wallet/", false, counting_handler(hits));

        let (_, suffix) = registry.lookup("/wallet/balance").unwrap();
        assert_eq!(suffix, "balance");
    }

    #[test]
    fn first_registered_wins_on_overlap() {
        let registry = PathHandlerRegistry::new();
        let first_hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::new(AtomicUsize::new(0));
        registry.register("/x", false, counting_handler(first_hits.clone()));
        registry.register("/x", false, counting_handler(second_hits.clone()));

        let (handler, suffix) = registry.lookup("/x").unwrap();
        assert_eq!(suffix, "");
        let mut dummy = crate::http::Request::for_test();
        handler(&mut dummy, &suffix);
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unregister_is_idempotent_noop_when_absent() {
        let registry = PathHandlerRegistry::new();
        registry.unregister("/missing", true);
        assert!(registry.lookup("/missing").is_none());
    }

    #[test]
    fn register_then_unregister_restores_prior_behavior() {
        let registry = PathHandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register("/tmp", true, counting_handler(hits));
        assert!(registry.lookup("/tmp").is_some());

        registry.unregister("/tmp", true);
        assert!(registry.lookup("/tmp").is_none());
    }
}

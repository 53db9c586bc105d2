//! Ordered, mutable set of routes.
//!
//! # Design Decisions
//! - Insertion order is significant: the dispatcher walks it backwards so the
//!   most recently added route wins overlaps
//! - Duplicates are legal; `remove` purges every occurrence
//! - Identity is `Arc` pointer identity
//! - Copy-on-write via `ArcSwap`: dispatch loads a snapshot without locking,
//!   mutations publish a new list. Mutating while the server runs is safe;
//!   a request in flight sees either the old or the new list in full.

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::routing::route::Route;

pub type RouteList = Vec<Arc<dyn Route>>;

pub struct RouteRegistry {
    routes: ArcSwap<RouteList>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::from_pointee(RouteList::new()),
        }
    }

    /// Append a route.
    pub fn add(&self, route: Arc<dyn Route>) {
        tracing::debug!(route = route.name(), "Route added");
        self.routes.rcu(|routes| {
            let mut next = RouteList::clone(routes);
            next.push(Arc::clone(&route));
            next
        });
    }

    /// Remove every occurrence of `route`, returning how many were removed.
    pub fn remove(&self, route: &Arc<dyn Route>) -> usize {
        let mut removed = 0;
        self.routes.rcu(|routes| {
            let next: RouteList = routes
                .iter()
                .filter(|candidate| !same_route(candidate, route))
                .cloned()
                .collect();
            removed = routes.len() - next.len();
            next
        });
        tracing::debug!(route = route.name(), removed, "Route removed");
        removed
    }

    pub fn clear(&self) {
        self.routes.store(Arc::new(RouteList::new()));
    }

    /// Current routes in registration order.
    pub fn snapshot(&self) -> Arc<RouteList> {
        self.routes.load_full()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }

    pub fn contains(&self, route: &Arc<dyn Route>) -> bool {
        self.routes.load().iter().any(|r| same_route(r, route))
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.load();
        f.debug_list().entries(routes.iter().map(|r| r.name())).finish()
    }
}

/// Compare data pointers only; vtable pointers for the same type may differ
/// across codegen units.
fn same_route(a: &Arc<dyn Route>, b: &Arc<dyn Route>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

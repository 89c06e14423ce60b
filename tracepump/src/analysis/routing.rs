//! Event hash → analyzer routing.
//!
//! Analyzers subscribe while the session begins. The table is then sorted by
//! hash once, so every dispatch can cache the index of its route group and
//! steady-state routing is a slice walk.

use crate::domain::{EventHash, RouteId, Uid};

use super::session::SessionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub hash: EventHash,
    pub analyzer: usize,
    pub id: RouteId,
    /// Length of the run of equal hashes; only meaningful on a group's first
    /// route.
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    finalized: bool,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route. Repeating an identical subscription is a no-op.
    pub fn add(&mut self, hash: EventHash, analyzer: usize, id: RouteId) -> bool {
        debug_assert!(!self.finalized, "routes are frozen once the session has begun");
        let duplicate = self
            .routes
            .iter()
            .any(|route| route.hash == hash && route.analyzer == analyzer && route.id == id);
        if !duplicate {
            self.routes.push(Route { hash, analyzer, id, count: 0 });
        }
        !duplicate
    }

    /// Stable-sorts by hash and records each group's length on its head.
    pub fn finalize(&mut self) {
        self.routes.sort_by_key(|route| route.hash);
        let mut start = 0;
        while start < self.routes.len() {
            let hash = self.routes[start].hash;
            let end = start + self.routes[start..].partition_point(|route| route.hash == hash);
            self.routes[start].count = u32::try_from(end - start).unwrap_or(u32::MAX);
            start = end;
        }
        self.finalized = true;
    }

    /// Index of the first route subscribed to `hash`.
    #[must_use]
    pub fn find(&self, hash: EventHash) -> Option<usize> {
        if !self.finalized {
            return None;
        }
        let index = self.routes.partition_point(|route| route.hash < hash);
        (self.routes.get(index)?.hash == hash).then_some(index)
    }

    /// Index of the wildcard group, which sorts first.
    #[must_use]
    pub fn wildcard(&self) -> Option<usize> {
        self.find(EventHash::ALL_EVENTS)
    }

    /// The group that starts at `first`.
    #[must_use]
    pub fn group(&self, first: usize) -> &[Route] {
        let count = self.routes.get(first).map_or(0, |route| route.count as usize);
        &self.routes[first..first + count]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Handed to each analyzer when the session begins; collects its routes.
pub struct BeginContext<'a> {
    session: &'a SessionContext,
    routes: &'a mut RouteTable,
    analyzer: usize,
    added: usize,
}

impl<'a> BeginContext<'a> {
    pub(crate) fn new(session: &'a SessionContext, routes: &'a mut RouteTable, analyzer: usize) -> Self {
        Self { session, routes, analyzer, added: 0 }
    }

    #[must_use]
    pub fn session(&self) -> &SessionContext {
        self.session
    }

    /// Subscribes to the event named `logger`/`event`.
    pub fn route(&mut self, id: RouteId, logger: &str, event: &str) -> &mut Self {
        self.route_hash(id, EventHash::of_names(logger, event))
    }

    /// Subscribes to every event, control events included.
    pub fn route_all(&mut self, id: RouteId) -> &mut Self {
        self.route_hash(id, EventHash::ALL_EVENTS)
    }

    /// Subscribes to one of the engine's control events.
    pub fn route_control(&mut self, id: RouteId, uid: Uid) -> &mut Self {
        self.route_hash(id, EventHash::control(uid))
    }

    pub fn route_hash(&mut self, id: RouteId, hash: EventHash) -> &mut Self {
        if self.routes.add(hash, self.analyzer, id) {
            self.added += 1;
        }
        self
    }

    /// Routes registered so far through this context.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.added
    }
}

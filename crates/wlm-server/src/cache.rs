//! Process-local cache of recovered objects.
//!
//! Entries are shared handles. Refreshing an entry from the store replaces
//! its contents under the write lock, so every holder of a handle sees the
//! new state and handle identity survives the refresh.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use wlm_db::Persistable;
use wlm_types::{Job, Node, Reservation, Scheduler, Server, strip_server_suffix};

/// A cached object shared across tasks.
pub type Shared<T> = Arc<RwLock<T>>;

/// Wrap an object in a new shared handle.
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}

/// Every object this server holds in memory.
#[derive(Debug, Default)]
pub struct EntityCache {
    server: Option<Shared<Server>>,
    schedulers: BTreeMap<String, Shared<Scheduler>>,
    nodes: BTreeMap<String, Shared<Node>>,
    jobs: BTreeMap<String, Shared<Job>>,
    resvs: BTreeMap<String, Shared<Reservation>>,
}

impl EntityCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The server record, once recovered or created.
    pub fn server(&self) -> Option<Shared<Server>> {
        self.server.clone()
    }

    /// Install the server record.
    pub fn set_server(&mut self, server: Shared<Server>) {
        self.server = Some(server);
    }

    /// A cached object by identity key.
    pub fn get<T: Cached>(&self, key: &str) -> Option<Shared<T>> {
        T::slot(self).get(T::cache_key(key)).cloned()
    }

    /// Cache `value` under its identity key, replacing any previous handle.
    pub fn insert<T: Cached>(&mut self, value: Shared<T>, key: &str) {
        T::slot_mut(self).insert(T::cache_key(key).to_owned(), value);
    }

    /// Drop a cached object.
    pub fn remove<T: Cached>(&mut self, key: &str) -> Option<Shared<T>> {
        T::slot_mut(self).remove(T::cache_key(key))
    }

    /// Number of cached objects of one kind.
    pub fn count<T: Cached>(&self) -> usize {
        T::slot(self).len()
    }

    /// Cached objects of one kind, by key.
    pub fn iter<T: Cached>(&self) -> impl Iterator<Item = (&str, &Shared<T>)> {
        T::slot(self).iter().map(|(key, value)| (key.as_str(), value))
    }

    /// A reservation by id, with or without its `@server` suffix.
    pub fn reservation(&self, id: &str) -> Option<Shared<Reservation>> {
        self.get::<Reservation>(id)
    }

    /// A job by id.
    pub fn job(&self, id: &str) -> Option<Shared<Job>> {
        self.get::<Job>(id)
    }

    /// A node by name.
    pub fn node(&self, name: &str) -> Option<Shared<Node>> {
        self.get::<Node>(name)
    }
}

/// A keyed object kind the cache holds.
pub trait Cached: Persistable + Sync + 'static {
    /// Object kind, for log messages.
    const KIND: &'static str;

    /// Map for this kind.
    fn slot(cache: &EntityCache) -> &BTreeMap<String, Shared<Self>>;

    /// Mutable map for this kind.
    fn slot_mut(cache: &mut EntityCache) -> &mut BTreeMap<String, Shared<Self>>;

    /// Key the cache files an identity key under.
    fn cache_key(key: &str) -> &str {
        key
    }

    /// Take over the state of a freshly decoded copy of the same object.
    /// Links that exist only in memory are kept.
    fn absorb(&mut self, fresh: Self);
}

impl Cached for Job {
    const KIND: &'static str = "job";

    fn slot(cache: &EntityCache) -> &BTreeMap<String, Shared<Self>> {
        &cache.jobs
    }

    fn slot_mut(cache: &mut EntityCache) -> &mut BTreeMap<String, Shared<Self>> {
        &mut cache.jobs
    }

    fn absorb(&mut self, fresh: Self) {
        let reservation = self.reservation.take();
        *self = Self {
            reservation: fresh.reservation.or(reservation),
            ..fresh
        };
    }
}

impl Cached for Reservation {
    const KIND: &'static str = "reservation";

    fn slot(cache: &EntityCache) -> &BTreeMap<String, Shared<Self>> {
        &cache.resvs
    }

    fn slot_mut(cache: &mut EntityCache) -> &mut BTreeMap<String, Shared<Self>> {
        &mut cache.resvs
    }

    fn cache_key(key: &str) -> &str {
        strip_server_suffix(key)
    }

    fn absorb(&mut self, fresh: Self) {
        *self = fresh;
    }
}

impl Cached for Node {
    const KIND: &'static str = "node";

    fn slot(cache: &EntityCache) -> &BTreeMap<String, Shared<Self>> {
        &cache.nodes
    }

    fn slot_mut(cache: &mut EntityCache) -> &mut BTreeMap<String, Shared<Self>> {
        &mut cache.nodes
    }

    fn absorb(&mut self, fresh: Self) {
        *self = fresh;
    }
}

impl Cached for Scheduler {
    const KIND: &'static str = "scheduler";

    fn slot(cache: &EntityCache) -> &BTreeMap<String, Shared<Self>> {
        &cache.schedulers
    }

    fn slot_mut(cache: &mut EntityCache) -> &mut BTreeMap<String, Shared<Self>> {
        &mut cache.schedulers
    }

    fn absorb(&mut self, fresh: Self) {
        *self = fresh;
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use wlm_types::{JobId, ResvId};

    #[test]
    fn reservation_lookup_ignores_server_suffix() {
        let mut cache = EntityCache::new();
        let resv = shared(Reservation::new(ResvId::new("R12.hostA")));
        cache.insert(Arc::clone(&resv), "R12.hostA@hostA");

        let found = cache.reservation("R12.hostA").expect("cached");
        assert!(Arc::ptr_eq(&found, &resv));
        assert!(cache.reservation("R12.hostA@other").is_some());
        assert_eq!(cache.count::<Reservation>(), 1);
    }

    #[test]
    fn absorb_keeps_in_memory_reservation_link() {
        let mut cached = Job::new(JobId::new("1.svr"));
        cached.reservation = Some(ResvId::new("R1.svr"));
        let mut fresh = Job::stored(JobId::new("1.svr"));
        fresh.quick.priority = 7;

        cached.absorb(fresh);
        assert_eq!(cached.quick.priority, 7);
        assert_eq!(cached.reservation, Some(ResvId::new("R1.svr")));
        assert!(!cached.meta.is_new);
    }

    #[tokio::test]
    async fn remove_drops_the_handle() {
        let mut cache = EntityCache::new();
        cache.insert(shared(Job::new(JobId::new("3.svr"))), "3.svr");
        assert!(cache.job("3.svr").is_some());
        assert!(cache.remove::<Job>("3.svr").is_some());
        assert!(cache.job("3.svr").is_none());
    }
}

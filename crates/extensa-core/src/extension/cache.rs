//! Per-type build cache.
//!
//! Reads go to the published generation, so a running build never hides the
//! previous payload. Writes are staged and become visible only when the
//! reload coordinator publishes the next generation. At most one build per
//! type may be in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::state::ManagerState;
use super::types::{BuiltPayload, TypeTag};

/// Result of [`BuildCache::begin_build`].
pub enum BuildStart<'a> {
    /// The caller owns the build for this type until the guard is dropped.
    Started(BuildGuard<'a>),
    /// Another build for this type is running. `previous` is what readers
    /// currently see.
    InFlight { previous: Option<Arc<BuiltPayload>> },
}

impl BuildStart<'_> {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, BuildStart::InFlight { .. })
    }
}

pub struct BuildCache {
    state: Arc<ManagerState>,
    in_flight: Mutex<HashSet<TypeTag>>,
    staged: Mutex<HashMap<TypeTag, Arc<BuiltPayload>>>,
}

impl BuildCache {
    pub fn new(state: Arc<ManagerState>) -> Self {
        Self {
            state,
            in_flight: Mutex::new(HashSet::new()),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// The published payload for `tag`.
    pub fn get(&self, tag: TypeTag) -> Option<Arc<BuiltPayload>> {
        self.state.current().payload(tag)
    }

    /// Claim the build slot for `tag`.
    pub fn begin_build(&self, tag: TypeTag) -> BuildStart<'_> {
        if self.in_flight.lock().insert(tag) {
            BuildStart::Started(BuildGuard { cache: self, tag })
        } else {
            debug!(category = "extensions", type_tag = %tag, "Build already in flight");
            BuildStart::InFlight {
                previous: self.get(tag),
            }
        }
    }

    /// Stage `payload` for the next generation.
    ///
    /// When the fingerprint matches the published payload, the published
    /// `Arc` is staged instead so its timestamp and validators stay put.
    pub fn set(&self, tag: TypeTag, payload: BuiltPayload) -> Arc<BuiltPayload> {
        let payload = match self.get(tag) {
            Some(current) if current.fingerprint == payload.fingerprint => current,
            _ => Arc::new(payload),
        };
        self.staged.lock().insert(tag, payload.clone());
        payload
    }

    pub fn is_in_flight(&self, tag: TypeTag) -> bool {
        self.in_flight.lock().contains(&tag)
    }

    /// Drain payloads staged since the last call.
    pub(crate) fn take_staged(&self) -> HashMap<TypeTag, Arc<BuiltPayload>> {
        std::mem::take(&mut *self.staged.lock())
    }

    /// Drop staged payloads of an abandoned cycle.
    pub(crate) fn discard_staged(&self) {
        self.staged.lock().clear();
    }

    fn release(&self, tag: TypeTag) {
        self.in_flight.lock().remove(&tag);
    }
}

/// Exclusive build slot for one type. Dropping it without calling
/// [`complete`](Self::complete) leaves the previous payload in place.
pub struct BuildGuard<'a> {
    cache: &'a BuildCache,
    tag: TypeTag,
}

impl BuildGuard<'_> {
    /// Stage the finished payload and release the slot.
    pub fn complete(self, payload: BuiltPayload) -> Arc<BuiltPayload> {
        self.cache.set(self.tag, payload)
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.cache.release(self.tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::state::Generation;

    fn payload(tag: TypeTag, source: &str) -> BuiltPayload {
        BuiltPayload {
            type_tag: tag,
            source: source.to_string(),
            fingerprint: crate::extension::bundler::fingerprint(source),
            built_at: chrono::Utc::now(),
            extensions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn publish(state: &ManagerState, cache: &BuildCache) {
        let mut next = Generation::empty();
        next.id = state.current().id + 1;
        next.payloads = cache.take_staged();
        state.publish(next);
    }

    #[test]
    fn test_single_build_in_flight() {
        let cache = BuildCache::new(Arc::new(ManagerState::new()));

        let first = cache.begin_build(TypeTag::Display);
        assert!(!first.is_in_flight());
        assert!(cache.is_in_flight(TypeTag::Display));

        let second = cache.begin_build(TypeTag::Display);
        assert!(second.is_in_flight());

        // Other types are independent.
        assert!(!cache.begin_build(TypeTag::Panel).is_in_flight());

        drop(first);
        assert!(!cache.is_in_flight(TypeTag::Display));
        assert!(!cache.begin_build(TypeTag::Display).is_in_flight());
    }

    #[test]
    fn test_in_flight_serves_previous_payload() {
        let state = Arc::new(ManagerState::new());
        let cache = BuildCache::new(state.clone());

        match cache.begin_build(TypeTag::Display) {
            BuildStart::Started(guard) => {
                guard.complete(payload(TypeTag::Display, "v1"));
            }
            BuildStart::InFlight { .. } => panic!("unexpected in-flight build"),
        }
        publish(&state, &cache);

        let _running = cache.begin_build(TypeTag::Display);
        match cache.begin_build(TypeTag::Display) {
            BuildStart::InFlight { previous } => {
                assert_eq!(previous.unwrap().source, "v1");
            }
            BuildStart::Started(_) => panic!("second build must not start"),
        }
        assert_eq!(cache.get(TypeTag::Display).unwrap().source, "v1");
    }

    #[test]
    fn test_in_flight_without_previous_is_absent() {
        let cache = BuildCache::new(Arc::new(ManagerState::new()));
        let _running = cache.begin_build(TypeTag::Theme);
        match cache.begin_build(TypeTag::Theme) {
            BuildStart::InFlight { previous } => assert!(previous.is_none()),
            BuildStart::Started(_) => panic!("second build must not start"),
        };
    }

    #[test]
    fn test_staged_payload_invisible_until_published() {
        let state = Arc::new(ManagerState::new());
        let cache = BuildCache::new(state.clone());

        cache.set(TypeTag::Layout, payload(TypeTag::Layout, "v1"));
        assert!(cache.get(TypeTag::Layout).is_none());

        publish(&state, &cache);
        assert_eq!(cache.get(TypeTag::Layout).unwrap().source, "v1");
    }

    #[test]
    fn test_failed_build_leaves_previous() {
        let state = Arc::new(ManagerState::new());
        let cache = BuildCache::new(state.clone());
        cache.set(TypeTag::Module, payload(TypeTag::Module, "v1"));
        publish(&state, &cache);

        if let BuildStart::Started(guard) = cache.begin_build(TypeTag::Module) {
            drop(guard);
        }
        assert!(cache.take_staged().is_empty());
        assert_eq!(cache.get(TypeTag::Module).unwrap().source, "v1");
    }

    #[test]
    fn test_unchanged_fingerprint_reuses_published_payload() {
        let state = Arc::new(ManagerState::new());
        let cache = BuildCache::new(state.clone());
        cache.set(TypeTag::Panel, payload(TypeTag::Panel, "same"));
        publish(&state, &cache);
        let published = cache.get(TypeTag::Panel).unwrap();

        let restaged = cache.set(TypeTag::Panel, payload(TypeTag::Panel, "same"));
        assert!(Arc::ptr_eq(&published, &restaged));

        let changed = cache.set(TypeTag::Panel, payload(TypeTag::Panel, "different"));
        assert!(!Arc::ptr_eq(&published, &changed));
    }
}

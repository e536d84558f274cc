//! Published extension state.
//!
//! A [`Generation`] is one complete result of a reload cycle. The
//! [`ManagerState`] holds the current one behind a pointer swap: readers clone
//! the `Arc` and never wait on a running cycle, and the reload coordinator is
//! the only writer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::types::{BuiltPayload, ExtensionDescriptor, ExtensionMetadata, TypeTag};
use crate::error::ExtensionWarning;

/// What one server extension contributed, by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerExtensionSummary {
    pub name: String,
    pub hooks: Vec<String>,
    pub endpoints: Vec<String>,
    pub operations: Vec<String>,
}

/// One consistent snapshot of descriptors, payloads and server extensions.
#[derive(Debug, Clone)]
pub struct Generation {
    /// 0 for the empty initial state, then increasing by one per reload.
    pub id: u64,
    pub created_at: DateTime<Utc>,
    /// All discovered extensions, enabled or not, sorted by name.
    pub descriptors: Vec<ExtensionDescriptor>,
    pub payloads: HashMap<TypeTag, Arc<BuiltPayload>>,
    pub server: Vec<ServerExtensionSummary>,
    pub warnings: Vec<ExtensionWarning>,
}

impl Generation {
    pub fn empty() -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            descriptors: Vec::new(),
            payloads: HashMap::new(),
            server: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// True once a reload has populated this generation.
    pub fn is_ready(&self) -> bool {
        self.id > 0
    }

    pub fn payload(&self, tag: TypeTag) -> Option<Arc<BuiltPayload>> {
        self.payloads.get(&tag).cloned()
    }

    /// Enabled extensions of `tag`, bundle children included, in name order.
    pub fn extensions_list(&self, tag: TypeTag) -> Vec<ExtensionMetadata> {
        let mut list: Vec<ExtensionMetadata> = self
            .descriptors
            .iter()
            .flat_map(|d| {
                let bundle = d.is_bundle().then_some(d);
                d.app_units(tag)
                    .into_iter()
                    .map(move |unit| ExtensionMetadata::from_descriptor(unit, bundle))
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn descriptor(&self, name: &str) -> Option<&ExtensionDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }
}

/// Holder of the current generation.
#[derive(Debug)]
pub struct ManagerState {
    current: RwLock<Arc<Generation>>,
}

impl ManagerState {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Generation::empty())),
        }
    }

    /// The current generation. The lock is held only for the pointer copy.
    pub fn current(&self) -> Arc<Generation> {
        self.current.read().clone()
    }

    /// Install `next` and return the generation it replaced.
    pub(crate) fn publish(&self, next: Generation) -> Arc<Generation> {
        let next = Arc::new(next);
        std::mem::replace(&mut *self.current.write(), next)
    }
}

impl Default for ManagerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state_is_not_ready() {
        let state = ManagerState::new();
        let current = state.current();
        assert!(!current.is_ready());
        assert!(current.payload(TypeTag::Interface).is_none());
    }

    #[test]
    fn test_publish_replaces_whole_generation() {
        let state = ManagerState::new();
        let before = state.current();

        let mut next = Generation::empty();
        next.id = 1;
        next.descriptors.push(ExtensionDescriptor::new("a", TypeTag::Panel, "/ext/a"));
        let previous = state.publish(next);

        assert_eq!(previous.id, 0);
        assert_eq!(before.id, 0, "readers keep the snapshot they took");
        assert_eq!(state.current().id, 1);
        assert!(state.current().descriptor("a").is_some());
    }

    #[test]
    fn test_extensions_list_filters_and_flattens() {
        let mut generation = Generation::empty();
        generation.descriptors = vec![
            ExtensionDescriptor::new("a", TypeTag::Panel, "/ext/a"),
            ExtensionDescriptor::new("hidden", TypeTag::Panel, "/ext/h").with_enabled(false),
            ExtensionDescriptor::new("kit", TypeTag::Bundle, "/ext/kit").with_children(vec![
                ExtensionDescriptor::new("kit-panel", TypeTag::Panel, "/ext/kit"),
                ExtensionDescriptor::new("kit-hook", TypeTag::Hook, "/ext/kit"),
            ]),
            ExtensionDescriptor::new("z", TypeTag::Display, "/ext/z"),
        ];

        let panels: Vec<_> = generation
            .extensions_list(TypeTag::Panel)
            .into_iter()
            .map(|m| (m.name, m.bundle))
            .collect();
        assert_eq!(
            panels,
            vec![("a".to_string(), None), ("kit-panel".to_string(), Some("kit".to_string()))]
        );
    }
}

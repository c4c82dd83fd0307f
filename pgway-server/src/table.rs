//! The immutable endpoint table produced by the metadata builder.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use pgway_core::endpoint::RoutineEndpoint;
use pgway_core::model::Routine;

/// One routine/endpoint pair.
#[derive(Debug)]
pub struct Entry {
    pub routine: Routine,
    pub endpoint: RoutineEndpoint,
}

/// Built once at startup, read-only afterwards.
#[derive(Clone, Default, Debug)]
pub struct EndpointTable {
    pub entries: Vec<Arc<Entry>>,
    /// `METHOD path` → entry. On `(method, path)` collisions the latest
    /// entry wins here and the displaced one moves to `overloads`.
    primary: HashMap<String, Arc<Entry>>,
    /// `METHOD path#paramCount` → displaced entry, for overload dispatch by
    /// supplied key count.
    overloads: HashMap<String, Arc<Entry>>,
    pub has_streaming_events: bool,
}

fn primary_key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

fn overload_key(method: &Method, path: &str, param_count: usize) -> String {
    format!("{method} {path}#{param_count}")
}

impl EndpointTable {
    /// Insert an entry, displacing any previous holder of the same
    /// `(method, path)` into the overload index under its parameter count.
    pub fn insert(&mut self, entry: Entry) {
        let entry = Arc::new(entry);
        let key = primary_key(&entry.endpoint.method, &entry.endpoint.path);
        if let Some(displaced) = self.primary.insert(key, entry.clone()) {
            let count = displaced.routine.parameters.len();
            self.overloads.insert(
                overload_key(&displaced.endpoint.method, &displaced.endpoint.path, count),
                displaced,
            );
        }
        self.has_streaming_events |= entry.endpoint.info_events;
        self.entries.push(entry);
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Option<&Arc<Entry>> {
        self.primary.get(&primary_key(method, path))
    }

    /// The displaced overload for a supplied parameter count, if any.
    pub fn overload(&self, method: &Method, path: &str, param_count: usize) -> Option<&Arc<Entry>> {
        self.overloads.get(&overload_key(method, path, param_count))
    }

    /// Entries in the primary map, for router construction.
    pub fn routable(&self) -> impl Iterator<Item = &Arc<Entry>> {
        self.primary.values()
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }
}

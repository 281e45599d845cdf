// Reference pool
//
// Maps client-visible integer handles to values, each tagged with an owner
// (usually the thread whose stopped interval produced it). Handles come from
// a counter that starts at 1 and never repeats; 0 means "no children".

use crate::error::{AdapterError, AdapterResult};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReferencePool<O, V> {
    what: &'static str,
    next_handle: i64,
    entries: BTreeMap<i64, (O, V)>,
}

impl<O: PartialEq, V> ReferencePool<O, V> {
    /// `what` names the kind of value in NotFound errors
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            next_handle: 1,
            entries: BTreeMap::new(),
        }
    }

    pub fn store(&mut self, owner: O, value: V) -> i64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.entries.insert(handle, (owner, value));
        handle
    }

    pub fn get(&self, handle: i64) -> AdapterResult<&V> {
        self.entries
            .get(&handle)
            .map(|(_, value)| value)
            .ok_or_else(|| AdapterError::NotFound(format!("{} {}", self.what, handle)))
    }

    /// Handles owned by `owner`, oldest first
    pub fn handles_owned_by(&self, owner: &O) -> Vec<i64> {
        self.entries
            .iter()
            .filter(|(_, (o, _))| o == owner)
            .map(|(handle, _)| *handle)
            .collect()
    }

    pub fn remove_all_owned_by(&mut self, owner: &O) {
        self.entries.retain(|_, (o, _)| o != owner);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Last-seen object cache that turns watch events into deltas

use kube_runtime::watcher::Event;
use overlay_core::ClusterObject;
use std::collections::{HashMap, HashSet};

/// A change to deliver to the registered callbacks
#[derive(Clone, Debug)]
pub enum Delta {
    Add(ClusterObject),
    Update {
        old: ClusterObject,
        new: ClusterObject,
    },
    Delete(ClusterObject),
}

impl Delta {
    pub fn key(&self) -> String {
        match self {
            Delta::Add(obj) | Delta::Delete(obj) => obj.key(),
            Delta::Update { new, .. } => new.key(),
        }
    }
}

/// Objects as last delivered, keyed by `namespace/name`
#[derive(Default)]
pub struct ObjectCache {
    objects: HashMap<String, ClusterObject>,
    // Keys seen since the current relist began
    relist: Option<HashSet<String>>,
}

impl ObjectCache {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ClusterObject> {
        self.objects.get(key)
    }

    /// Fold one watch event into the cache and return the resulting deltas.
    ///
    /// A relist that no longer contains a cached object yields a delete for
    /// it once the relist completes.
    pub fn apply<K>(&mut self, event: Event<K>) -> Vec<Delta>
    where
        ClusterObject: From<K>,
    {
        match event {
            Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                let obj = ClusterObject::from(obj);
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(obj.key());
                }
                vec![self.upsert(obj)]
            }
            Event::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return Vec::new();
                };
                let stale: Vec<String> = self
                    .objects
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                stale
                    .into_iter()
                    .filter_map(|key| self.objects.remove(&key))
                    .map(Delta::Delete)
                    .collect()
            }
            Event::Apply(obj) => vec![self.upsert(ClusterObject::from(obj))],
            Event::Delete(obj) => {
                let obj = ClusterObject::from(obj);
                self.objects.remove(&obj.key());
                vec![Delta::Delete(obj)]
            }
        }
    }

    fn upsert(&mut self, obj: ClusterObject) -> Delta {
        match self.objects.insert(obj.key(), obj.clone()) {
            Some(old) => Delta::Update { old, new: obj },
            None => Delta::Add(obj),
        }
    }
}

//! Per-instance private slots
//!
//! Every component owns one `PrivateStore`. It lives behind a private field
//! of [`ComponentBase`](crate::component::ComponentBase), so it is only
//! reachable through the accessors the owning type chooses to expose.

use std::any::Any;
use std::collections::HashMap;

/// Hidden key/value slots owned by a single component instance
#[derive(Default)]
pub struct PrivateStore {
    slots: HashMap<String, Box<dyn Any>>,
}

impl PrivateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a slot, `None` if absent or holding a different type
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.slots.get(key).and_then(|slot| slot.downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.slots
            .get_mut(key)
            .and_then(|slot| slot.downcast_mut::<T>())
    }

    /// Write a slot, replacing whatever was there
    pub fn set<T: 'static>(&mut self, key: impl Into<String>, value: T) {
        self.slots.insert(key.into(), Box::new(value));
    }

    /// Take a slot out of the store
    pub fn remove<T: 'static>(&mut self, key: &str) -> Option<T> {
        match self.slots.remove(key) {
            Some(slot) => match slot.downcast::<T>() {
                Ok(value) => Some(*value),
                Err(slot) => {
                    // wrong type requested: put it back untouched
                    self.slots.insert(key.to_string(), slot);
                    None
                }
            },
            None => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for PrivateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.slots.keys().collect();
        keys.sort();
        f.debug_struct("PrivateStore").field("keys", &keys).finish()
    }
}

//! Scoped variable collections.
//!
//! A [`Scope`] is a case-insensitive, insertion-ordered name → value map with
//! per-entry get/set hooks. One long-lived instance backs the global
//! variables of a [`crate::script::ScriptEnv`], one per-machine instance
//! backs the temp (per-dispatch) variables, and hosts expose their objects to
//! scripts as scopes too. Clones are shallow: all clones share the same
//! underlying storage, which is safe for many concurrent readers and writers.

use std::sync::{Arc, RwLock};

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::Val;

/// Intercepts reads of a single entry; the returned value replaces the stored
/// one.
pub type GetHook = Arc<dyn Fn() -> Val + Send + Sync>;
/// Observes writes to a single entry before the stored value is replaced.
pub type SetHook = Arc<dyn Fn(&Val) + Send + Sync>;

struct Slot {
    value: RwLock<Val>,
    get_hook: RwLock<Option<GetHook>>,
    set_hook: RwLock<Option<SetHook>>,
}

impl Slot {
    fn new(value: Val) -> Arc<Self> {
        Arc::new(Self {
            value: RwLock::new(value),
            get_hook: RwLock::new(None),
            set_hook: RwLock::new(None),
        })
    }

    fn get(&self) -> Val {
        let hook = self
            .get_hook
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match hook {
            Some(hook) => hook(),
            None => self.value.read().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }

    fn set(&self, value: Val) {
        let hook = self
            .set_hook
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(hook) = hook {
            hook(&value);
        }
        *self.value.write().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

#[derive(Default)]
struct ScopeInner {
    order: Vec<String>,
    slots: FastHashMap<String, Arc<Slot>>,
}

#[derive(Clone)]
pub struct Scope {
    inner: Arc<RwLock<ScopeInner>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ScopeInner {
                order: Vec::new(),
                slots: fast_hash_map_new(),
            })),
        }
    }

    fn fold(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    fn slot(&self, key: &str) -> Option<Arc<Slot>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .slots
            .get(key)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = Self::fold(name);
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .slots
            .contains_key(&key)
    }

    pub fn get(&self, name: &str) -> Option<Val> {
        self.slot(&Self::fold(name)).map(|s| s.get())
    }

    pub fn get_or_zero(&self, name: &str) -> Val {
        self.get(name).unwrap_or_else(Val::zero)
    }

    /// Upsert. Writing an existing entry goes through its slot (set hooks
    /// fire, registered hooks survive); a new name is appended to the
    /// insertion order.
    pub fn set(&self, name: &str, value: Val) {
        let key = Self::fold(name);
        if let Some(slot) = self.slot(&key) {
            slot.set(value);
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Lost the race to another writer: fall back to the slot path.
        if let Some(slot) = inner.slots.get(&key).cloned() {
            drop(inner);
            slot.set(value);
            return;
        }
        inner.order.push(key.clone());
        inner.slots.insert(key, Slot::new(value));
    }

    pub fn remove(&self, name: &str) -> Option<Val> {
        let key = Self::fold(name);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let slot = inner.slots.remove(&key)?;
        inner.order.retain(|k| k != &key);
        drop(inner);
        Some(slot.get())
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.order.clear();
        inner.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Case-folded names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .order
            .clone()
    }

    /// Snapshot of entries in insertion order.
    pub fn entries(&self) -> Vec<(String, Val)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter_map(|k| inner.slots.get(k).map(|s| (k.clone(), s.get())))
            .collect()
    }

    /// Registers a read intercept, creating the entry (as zero) if absent.
    pub fn set_get_hook(&self, name: &str, hook: GetHook) {
        let key = Self::fold(name);
        if !self.contains(&key) {
            self.set(&key, Val::zero());
        }
        if let Some(slot) = self.slot(&key) {
            *slot.get_hook.write().unwrap_or_else(|e| e.into_inner()) = Some(hook);
        }
    }

    /// Registers a write observer, creating the entry (as zero) if absent.
    pub fn set_set_hook(&self, name: &str, hook: SetHook) {
        let key = Self::fold(name);
        if !self.contains(&key) {
            self.set(&key, Val::zero());
        }
        if let Some(slot) = self.slot(&key) {
            *slot.set_hook.write().unwrap_or_else(|e| e.into_inner()) = Some(hook);
        }
    }

    /// Copies every entry of `other` into `self`.
    pub fn merge(&self, other: &Scope) {
        for (name, value) in other.entries() {
            self.set(&name, value);
        }
    }

    /// Identity comparison: do the two handles share storage?
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in self.entries() {
            map.entry(&k, &v);
        }
        map.finish()
    }
}

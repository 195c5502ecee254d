//! Lock-guarded registers keyed by a closed enumeration.
//!
//! Every piece of live control state (process variables, tuning gains,
//! actuator flags) lives in a [`KeyedRegister`]. Reads take the shared lock,
//! writes take the exclusive lock, and [`Snapshot`]s are detached copies.
//! A register can also carry an `attached` value that is guarded by the same
//! lock as the entries, for state that must never drift apart from them.

use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;

/// A key drawn from a fixed set. `ALL` lists every member of the set.
pub trait RegisterKey: Copy + Eq + Hash + Send + Sync + 'static {
    const ALL: &'static [Self];
}

// ---------------------------------------------------------------------------
// Register
// ---------------------------------------------------------------------------

pub struct KeyedRegister<K, V, A = ()> {
    inner: RwLock<Slots<K, V, A>>,
}

/// Register contents as seen from inside a lock.
pub struct Slots<K, V, A> {
    values: HashMap<K, V>,
    pub attached: A,
}

impl<K: RegisterKey, V: Copy + Default, A> Slots<K, V, A> {
    /// Value for `key`, or the zero value if it was never set.
    pub fn get(&self, key: K) -> V {
        self.values.get(&key).copied().unwrap_or_default()
    }

    pub fn set(&mut self, key: K, value: V) {
        self.values.insert(key, value);
    }
}

impl<K: RegisterKey, V: Copy + Default, A: Default> KeyedRegister<K, V, A> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Slots {
                values: HashMap::with_capacity(K::ALL.len()),
                attached: A::default(),
            }),
        }
    }
}

impl<K: RegisterKey, V: Copy + Default, A: Default> Default for KeyedRegister<K, V, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: RegisterKey, V: Copy + Default, A> KeyedRegister<K, V, A> {
    pub async fn set(&self, key: K, value: V) {
        self.inner.write().await.set(key, value);
    }

    /// Write several keys under a single exclusive lock. Readers see either
    /// none or all of the entries.
    pub async fn set_many<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut slots = self.inner.write().await;
        for (key, value) in entries {
            slots.set(key, value);
        }
    }

    pub async fn get(&self, key: K) -> V {
        self.inner.read().await.get(key)
    }

    pub async fn get_all(&self) -> Snapshot<K, V> {
        Snapshot(self.inner.read().await.values.clone())
    }

    /// Run `f` with exclusive access to the entries and the attached value.
    /// `f` must not block; it runs while every other caller waits.
    pub async fn with_exclusive<R>(&self, f: impl FnOnce(&mut Slots<K, V, A>) -> R) -> R {
        let mut slots = self.inner.write().await;
        f(&mut slots)
    }

    /// Run `f` with shared access to the entries and the attached value.
    pub async fn with_shared<R>(&self, f: impl FnOnce(&Slots<K, V, A>) -> R) -> R {
        let slots = self.inner.read().await;
        f(&slots)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of a register. Absent keys read as the zero value.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent, bound(serialize = "K: Serialize + Eq + Hash, V: Serialize"))]
pub struct Snapshot<K, V>(HashMap<K, V>);

impl<K: RegisterKey, V: Copy + Default> Snapshot<K, V> {
    pub fn get(&self, key: K) -> V {
        self.0.get(&key).copied().unwrap_or_default()
    }

    #[cfg(test)]
    pub fn insert(&mut self, key: K, value: V) {
        self.0.insert(key, value);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Same snapshot with every key of the enumeration present, absent ones
    /// filled with the zero value.
    pub fn filled(mut self) -> Self {
        for key in K::ALL {
            self.0.entry(*key).or_default();
        }
        self
    }
}

// ===========================================================================
// Tests
// ===========================================================================

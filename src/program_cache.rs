use std::collections::{HashMap, VecDeque};

use sha2::{Digest, Sha256};

/// Returns the key a program is cached with, the SHA-256 of its source and build options.
pub(crate) fn program_key(source: &str, options: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    // Separate source from options, so that moving characters between them changes the key.
    hasher.update([0u8]);
    hasher.update(options.as_bytes());
    hex::encode(hasher.finalize())
}

/// A least recently used cache of built programs.
///
/// Building a program from source takes a lot longer than running a kernel, so every queue keeps
/// the programs it has used last.
#[derive(Debug)]
pub(crate) struct ProgramCache<V> {
    capacity: usize,
    entries: HashMap<String, V>,
    /// Keys ordered from the least to the most recently used.
    order: VecDeque<String>,
}

impl<V: Clone> ProgramCache<V> {
    /// Creates an empty cache that holds up to `capacity` entries, at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the entry and marks it as most recently used.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let value = self.entries.get(key)?.clone();
        self.touch(key);
        Some(value)
    }

    /// Inserts an entry, returning the one that was evicted to make room for it.
    pub fn insert(&mut self, key: String, value: V) -> Option<(String, V)> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return None;
        }
        self.order.push_back(key);

        if self.entries.len() > self.capacity {
            let oldest = self.order.pop_front()?;
            let evicted = self.entries.remove(&oldest)?;
            return Some((oldest, evicted));
        }
        None
    }

    /// Returns the cached entry or inserts the one created by `create`.
    pub fn get_or_try_insert_with<E, F>(&mut self, key: &str, create: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = create()?;
        self.insert(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: &str) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            if let Some(key) = self.order.remove(position) {
                self.order.push_back(key);
            }
        }
    }
}

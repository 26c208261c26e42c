//! Open-addressed hash table with linear probing, used for the interned
//! string set, the globals table, instance fields, and class method tables
//! (§4.B). One implementation serves all four uses; only the *visibility*
//! of what ends up in it differs, since every value stored is already GC
//! rooted by whoever owns the table.

use crate::object::{Gc, StringObj};
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone)]
struct Entry {
    key: Option<Gc<StringObj>>,
    value: Value,
}

/// An empty slot has `key: None, value: Nil`; a tombstone (a deleted entry
/// kept around so later probes don't stop short) has `key: None,
/// value: Bool(true)`, exactly per §4.B.
fn is_tombstone(entry: &Entry) -> bool {
    entry.key.is_none() && matches!(entry.value, Value::Bool(true))
}

pub struct Table {
    entries: Vec<Entry>,
    count: usize, // live entries + tombstones
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn get(&self, key: Gc<StringObj>) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = Self::find_entry(&self.entries, key)?;
        let entry = &self.entries[idx];
        entry.key.as_ref()?;
        Some(entry.value)
    }

    /// Returns whether `key` was newly inserted (as opposed to overwriting
    /// an existing live entry).
    pub fn set(&mut self, key: Gc<StringObj>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            self.grow();
        }

        let idx = Self::find_entry(&self.entries, key)
            .expect("capacity grown to guarantee a free slot");
        let is_new_key = self.entries[idx].key.is_none();
        // Reusing a tombstone doesn't grow `count` (the slot was already
        // counted toward load), so only bump it for a genuinely empty slot.
        if is_new_key && matches!(self.entries[idx].value, Value::Nil) {
            self.count += 1;
        }
        self.entries[idx] = Entry {
            key: Some(key),
            value,
        };
        is_new_key
    }

    pub fn delete(&mut self, key: Gc<StringObj>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let Some(idx) = Self::find_entry(&self.entries, key) else {
            return false;
        };
        if self.entries[idx].key.is_none() {
            return false;
        }
        self.entries[idx] = Entry {
            key: None,
            value: Value::Bool(true),
        };
        true
    }

    /// Copy every live entry from `other` into `self` (used by `OP_INHERIT`
    /// to bulk-copy a superclass's method table).
    pub fn add_all(&mut self, other: &Table) {
        for entry in &other.entries {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }

    /// Scan without allocating a candidate `StringObj` first — the sole
    /// means of interning (§4.B). Returns the existing interned handle if
    /// bytes already match one.
    #[must_use]
    pub fn find_string(&self, bytes: &[u8], hash: u32) -> Option<Gc<StringObj>> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut idx = (hash as usize) & (capacity - 1);
        loop {
            let entry = &self.entries[idx];
            match entry.key {
                None => {
                    if !is_tombstone(entry) {
                        return None;
                    }
                }
                Some(key) => {
                    if key.hash == hash && key.chars.as_bytes() == bytes {
                        return Some(key);
                    }
                }
            }
            idx = (idx + 1) & (capacity - 1);
        }
    }

    pub fn for_each(&self, mut f: impl FnMut(Gc<StringObj>, Value)) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                f(key, entry.value);
            }
        }
    }

    pub fn for_each_mut(&mut self, mut f: impl FnMut(Gc<StringObj>, &mut Value)) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                f(key, &mut entry.value);
            }
        }
    }

    /// Drop every entry whose key was not marked live by the collector,
    /// before sweep frees the underlying `StringObj` (invariant 6).
    pub fn remove_unmarked_keys(&mut self) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !unsafe { (*key.as_header()).marked } {
                    *entry = Entry {
                        key: None,
                        value: Value::Bool(true),
                    };
                }
            }
        }
    }

    fn find_entry(entries: &[Entry], key: Gc<StringObj>) -> Option<usize> {
        if entries.is_empty() {
            return None;
        }
        let capacity = entries.len();
        let mut idx = (key.hash as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &entries[idx];
            match entry.key {
                None => {
                    if is_tombstone(entry) {
                        if first_tombstone.is_none() {
                            first_tombstone = Some(idx);
                        }
                    } else {
                        return Some(first_tombstone.unwrap_or(idx));
                    }
                }
                Some(existing) if existing == key => return Some(idx),
                Some(_) => {}
            }
            idx = (idx + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            8
        } else {
            self.entries.len() * 2
        };
        let mut new_entries = vec![
            Entry {
                key: None,
                value: Value::Nil,
            };
            new_capacity
        ];
        let mut live_count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let idx = Self::find_entry_in(&new_entries, new_capacity, key);
                new_entries[idx] = entry.clone();
                live_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = live_count;
    }

    fn find_entry_in(entries: &[Entry], capacity: usize, key: Gc<StringObj>) -> usize {
        let mut idx = (key.hash as usize) & (capacity - 1);
        loop {
            if entries[idx].key.is_none() {
                return idx;
            }
            idx = (idx + 1) & (capacity - 1);
        }
    }
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Entry {
            key: self.key,
            value: self.value,
        }
    }
}

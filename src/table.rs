//! An open-addressing hash table keyed by interned strings, with tombstone
//! deletion. Used for globals, class method tables, instance field maps,
//! the intern table itself, and the `Table` primitive backing table
//! literals.

use crate::object::{GcRef, ObjString};
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
    key: Option<GcRef<ObjString>>,
    value: Value,
}

pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of live (non-tombstone) entries. `count` also includes
    /// tombstones left behind by `delete`, so this walks the entries instead
    /// of returning it directly — matching the original's separate
    /// `countTableLive`, which exists for exactly this reason.
    pub fn count_live(&self) -> usize {
        self.iter().count()
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(entries: &[Entry], capacity: usize, key: GcRef<ObjString>) -> usize {
        let mut index = (key.hash as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if entry.value.is_nil() {
                        // Truly empty: return the tombstone slot if we
                        // passed one, otherwise this slot.
                        return tombstone.unwrap_or(index);
                    } else if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) if GcRef::ptr_eq(k, key) => return index,
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut new_entries = vec![
            Entry {
                key: None,
                value: Value::Nil,
            };
            capacity
        ];
        let mut count = 0;
        for entry in self.entries.iter() {
            if let Some(key) = entry.key {
                let index = Self::find_entry(&new_entries, capacity, key);
                new_entries[index] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                count += 1;
            }
        }
        self.entries = new_entries;
        self.count = count;
    }

    /// Returns `true` if the key was newly inserted (not an overwrite).
    pub fn set(&mut self, key: GcRef<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * TABLE_MAX_LOAD {
            let capacity = if self.capacity() < 8 {
                8
            } else {
                self.capacity() * 2
            };
            self.adjust_capacity(capacity);
        }

        let index = Self::find_entry(&self.entries, self.capacity(), key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        if is_new_key && entry.value.is_nil() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: GcRef<ObjString>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key);
        self.entries[index].key.map(|_| self.entries[index].value)
    }

    pub fn contains(&self, key: GcRef<ObjString>) -> bool {
        self.get(key).is_some()
    }

    /// Deletes `key`, leaving a tombstone (`key = None, value = true`) so
    /// later probes do not stop short of entries that were inserted after
    /// a collision with the deleted slot.
    pub fn delete(&mut self, key: GcRef<ObjString>) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry {
            key: None,
            value: Value::Bool(true),
        };
        true
    }

    /// Copies every live entry from `other` into `self`, used by `OP_INHERIT`
    /// to flatten a superclass's method table into its subclass.
    pub fn add_all(&mut self, other: &Table) {
        for entry in other.entries.iter() {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }

    /// Looks up an interned string by raw content, used before deciding
    /// whether to allocate a new `ObjString` or reuse an existing one.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<GcRef<ObjString>> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.capacity();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if entry.value.is_nil() {
                        return None;
                    }
                }
                Some(key) => {
                    if key.hash == hash && key.as_str() == chars {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Removes every key whose backing object is unmarked. Called after
    /// tracing and before sweep so weak references in the intern table do
    /// not keep otherwise-dead strings alive.
    pub fn remove_white(&mut self) {
        for entry in self.entries.iter_mut() {
            if let Some(key) = entry.key {
                if !key.is_marked() {
                    entry.key = None;
                    entry.value = Value::Bool(true);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcRef<ObjString>, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Heap;
    use crate::object::{hash_string, ObjKind};

    fn intern(heap: &mut Heap, s: &str) -> GcRef<ObjString> {
        let hash = hash_string(s);
        if let Some(existing) = heap.strings.find_string(s, hash) {
            return existing;
        }
        let obj = heap.allocate(
            ObjKind::String,
            ObjString {
                chars: s.to_string(),
                length: s.len(),
                hash,
            },
        );
        heap.strings.set(obj, Value::Bool(true));
        obj
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut heap = Heap::new();
        let key = intern(&mut heap, "answer");
        let mut table = Table::new();
        assert!(table.set(key, Value::Number(42.0)));
        assert_eq!(table.get(key), Some(Value::Number(42.0)));
    }

    #[test]
    fn set_on_existing_key_is_not_a_new_insertion() {
        let mut heap = Heap::new();
        let key = intern(&mut heap, "x");
        let mut table = Table::new();
        assert!(table.set(key, Value::Number(1.0)));
        assert!(!table.set(key, Value::Number(2.0)));
        assert_eq!(table.get(key), Some(Value::Number(2.0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn delete_leaves_a_tombstone_that_does_not_break_later_probes() {
        let mut heap = Heap::new();
        let a = intern(&mut heap, "a");
        let b = intern(&mut heap, "b");
        let mut table = Table::new();
        table.set(a, Value::Number(1.0));
        table.set(b, Value::Number(2.0));
        assert!(table.delete(a));
        assert_eq!(table.get(a), None);
        assert_eq!(table.get(b), Some(Value::Number(2.0)));
    }

    #[test]
    fn find_string_reuses_interned_instance() {
        let mut heap = Heap::new();
        let first = intern(&mut heap, "shared");
        let second = intern(&mut heap, "shared");
        assert!(GcRef::ptr_eq(first, second));
    }

    #[test]
    fn add_all_copies_every_live_entry() {
        let mut heap = Heap::new();
        let a = intern(&mut heap, "a");
        let b = intern(&mut heap, "b");
        let mut source = Table::new();
        source.set(a, Value::Number(1.0));
        source.set(b, Value::Number(2.0));
        let mut dest = Table::new();
        dest.add_all(&source);
        assert_eq!(dest.get(a), Some(Value::Number(1.0)));
        assert_eq!(dest.get(b), Some(Value::Number(2.0)));
    }

    #[test]
    fn remove_white_clears_unmarked_keys_only() {
        let mut heap = Heap::new();
        let marked = intern(&mut heap, "marked");
        let unmarked = intern(&mut heap, "unmarked");
        marked.mark();
        let mut table = Table::new();
        table.set(marked, Value::Bool(true));
        table.set(unmarked, Value::Bool(true));
        table.remove_white();
        assert!(table.contains(marked));
        assert!(!table.contains(unmarked));
    }
}

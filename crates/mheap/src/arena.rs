//! Arena - Generational Slot Storage
//!
//! Stores heap records (objects and references) in a slot vector addressed
//! by [`Key`]. A key carries the slot index plus the generation the slot had
//! when the value was inserted; once the value is removed the slot's
//! generation moves on and stale keys stop resolving. This is what lets a
//! handle to a destroyed object read as null instead of dangling.
//!
//! A slot whose generation is exhausted is retired instead of reused, so a
//! generation never wraps back to one a stale key still carries.

use std::fmt;
use std::marker::PhantomData;

/// Key into an [`Arena`]
pub struct Key<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at insertion
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single integer (generation in the high half)
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Key<T> {}

impl<T> std::hash::Hash for Key<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
}

impl<T> PartialOrd for Key<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Key<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Arena - generational slot vector
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    retired: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
            retired: 0,
        }
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slots taken out of service because their generation ran out
    pub fn retired(&self) -> usize {
        self.retired
    }

    /// Insert a value and return its key
    pub fn insert(&mut self, value: T) -> Key<T> {
        self.len += 1;

        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Vacant {
                    generation,
                    next_free,
                } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *slot = Slot::Occupied { generation, value };
            self.free_head = next_free;
            return Key::new(index, generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        Key::new(index, 0)
    }

    /// Remove the value for `key`, if it is still live
    pub fn remove(&mut self, key: Key<T>) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }

        // An exhausted slot stays vacant at its last generation and never
        // goes back on the free list.
        let reusable = key.generation.checked_add(1);
        let next = Slot::Vacant {
            generation: reusable.unwrap_or(key.generation),
            next_free: if reusable.is_some() { self.free_head } else { None },
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, next) else {
            return None;
        };

        if reusable.is_some() {
            self.free_head = Some(key.index);
        } else {
            self.retired += 1;
        }
        self.len -= 1;
        Some(value)
    }

    pub fn contains(&self, key: Key<T>) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: Key<T>) -> Option<&T> {
        match self.slots.get(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: Key<T>) -> Option<&mut T> {
        match self.slots.get_mut(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Iterate over live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Key<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Key::new(index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Key<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Key::new(index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    /// Keys of all live entries
    pub fn keys(&self) -> Vec<Key<T>> {
        self.iter().map(|(key, _)| key).collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_key_after_reuse() {
        let mut arena = Arena::new();
        let old = arena.insert(1);
        arena.remove(old);

        let new = arena.insert(2);
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_exhausted_slot_retired() {
        let mut arena = Arena::new();
        let first = arena.insert('a');
        arena.remove(first);
        arena.slots[0] = Slot::Vacant {
            generation: u32::MAX,
            next_free: None,
        };

        let last = arena.insert('b');
        assert_eq!((last.index(), last.generation()), (0, u32::MAX));
        assert_eq!(arena.remove(last), Some('b'));
        assert_eq!(arena.retired(), 1);

        // The retired slot is never handed out again.
        let fresh = arena.insert('c');
        assert_eq!(fresh.index(), 1);
        assert_eq!(arena.get(last), None);
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.insert('d').index(), 2);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_iteration_skips_vacant() {
        let mut arena = Arena::new();
        let keys: Vec<_> = (0..5).map(|i| arena.insert(i)).collect();
        arena.remove(keys[1]);
        arena.remove(keys[3]);

        let values: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 2, 4]);
        assert_eq!(arena.keys(), vec![keys[0], keys[2], keys[4]]);
    }
}

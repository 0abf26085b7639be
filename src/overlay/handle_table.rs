//! Per-layer registry of open files and directories.
//!
//! Handles are `(tag, generation, index)` triples. No two live tables share a
//! tag, so a handle issued by one table is never valid in another. The
//! generation is bumped whenever a slot is freed, so a stale handle never
//! aliases a newer entry that reuses the slot.

use crate::error::FsError;
use crate::overlay::types::Handle;
use fxhash::FxHashSet;
use parking_lot::Mutex;
use std::sync::Arc;

pub const DEFAULT_MAX_HANDLES: usize = 256;

/// Slot indices are 16 bits wide.
pub const MAX_TABLE_SLOTS: usize = 1 << 16;

struct TagRegistry {
    next: u32,
    live: Option<FxHashSet<u32>>,
}

static TAGS: Mutex<TagRegistry> = parking_lot::const_mutex(TagRegistry {
    next: 0,
    live: None,
});

/// Claim a tag no live table holds. Zero is reserved so no handle is ever 0.
fn acquire_tag() -> u32 {
    let mut tags = TAGS.lock();
    let TagRegistry { next, live } = &mut *tags;
    let live = live.get_or_insert_with(FxHashSet::default);
    loop {
        *next = next.wrapping_add(1);
        if *next != 0 && live.insert(*next) {
            return *next;
        }
    }
}

fn release_tag(tag: u32) {
    if let Some(live) = TAGS.lock().live.as_mut() {
        live.remove(&tag);
    }
}

struct Slot<T> {
    generation: u16,
    value: Option<Arc<Mutex<T>>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u16>,
    live: usize,
}

pub struct HandleTable<T> {
    tag: u32,
    limit: usize,
    slots: Mutex<Slots<T>>,
}

impl<T> HandleTable<T> {
    /// A table holding at most `limit` live entries, capped at
    /// `MAX_TABLE_SLOTS`.
    pub fn new(limit: usize) -> Self {
        HandleTable {
            tag: acquire_tag(),
            limit: limit.min(MAX_TABLE_SLOTS),
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Store `value` and return a fresh handle for it.
    ///
    /// Fails with `NoHandleSlot` once `limit` entries are live.
    pub fn insert(&self, value: T) -> Result<Handle, FsError> {
        let mut slots = self.slots.lock();
        if slots.live >= self.limit {
            tracing::warn!("Handle table full ({} entries)", self.limit);
            return Err(FsError::NoHandleSlot);
        }

        let value = Some(Arc::new(Mutex::new(value)));
        let index = match slots.free.pop() {
            Some(index) => {
                slots.entries[index as usize].value = value;
                index
            }
            None => {
                let index = u16::try_from(slots.entries.len()).map_err(|_| FsError::NoHandleSlot)?;
                slots.entries.push(Slot {
                    generation: 1,
                    value,
                });
                index
            }
        };
        slots.live += 1;

        let generation = slots.entries[index as usize].generation;
        Ok(Handle::from_parts(self.tag, generation, index))
    }

    pub fn is_valid(&self, handle: Handle) -> bool {
        let slots = self.slots.lock();
        Self::find(&slots, self.tag, handle).is_some()
    }

    /// Validity check and lookup in one step. `None` means the handle belongs
    /// to someone else.
    pub fn get(&self, handle: Handle) -> Option<Arc<Mutex<T>>> {
        let slots = self.slots.lock();
        Self::find(&slots, self.tag, handle).cloned()
    }

    /// Fetch an entry the caller has already validated.
    ///
    /// A miss here is a broken contract, so it reports `Fatal` rather than a
    /// recoverable error.
    pub fn lookup(&self, handle: Handle) -> Result<Arc<Mutex<T>>, FsError> {
        self.get(handle).ok_or_else(|| {
            tracing::error!("Handle {} missing after validation", handle);
            FsError::Fatal(format!("handle {} is not present in its table", handle))
        })
    }

    /// Erase `handle`, returning its entry. A second remove of the same handle
    /// reports `InvalidHandle`.
    pub fn remove(&self, handle: Handle) -> Result<Arc<Mutex<T>>, FsError> {
        let mut slots = self.slots.lock();
        if Self::find(&slots, self.tag, handle).is_none() {
            tracing::error!("Expected to remove handle {} but it was not found", handle);
            return Err(FsError::InvalidHandle);
        }

        let index = handle.index();
        let slot = &mut slots.entries[index as usize];
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slots.free.push(index);
        slots.live -= 1;

        value.ok_or(FsError::InvalidHandle)
    }

    /// Remove every live entry, for teardown.
    pub fn drain(&self) -> Vec<(Handle, Arc<Mutex<T>>)> {
        let mut slots = self.slots.lock();
        let mut drained = Vec::with_capacity(slots.live);
        let mut freed = Vec::new();
        for (index, slot) in slots.entries.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                drained.push((
                    Handle::from_parts(self.tag, slot.generation, index as u16),
                    value,
                ));
                slot.generation = slot.generation.wrapping_add(1).max(1);
                freed.push(index as u16);
            }
        }
        slots.free.extend(freed);
        slots.live = 0;
        drained
    }

    pub fn len(&self) -> usize {
        self.slots.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find<'a>(slots: &'a Slots<T>, tag: u32, handle: Handle) -> Option<&'a Arc<Mutex<T>>> {
        if handle.tag() != tag {
            return None;
        }
        let slot = slots.entries.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }
}

impl<T> Drop for HandleTable<T> {
    fn drop(&mut self) {
        release_tag(self.tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let table = HandleTable::new(4);
        let h = table.insert("entry".to_string()).unwrap();
        assert!(table.is_valid(h));
        assert_eq!(*table.lookup(h).unwrap().lock(), "entry");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_handles_are_never_zero() {
        let table = HandleTable::new(4);
        let h = table.insert(()).unwrap();
        assert_ne!(h.raw(), 0);
    }

    #[test]
    fn test_double_remove_reports_invalid_handle() {
        let table = HandleTable::new(4);
        let h = table.insert(1u32).unwrap();
        assert!(table.remove(h).is_ok());
        assert_eq!(table.remove(h).unwrap_err(), FsError::InvalidHandle);
        assert!(table.is_empty());
    }

    #[test]
    fn test_stale_handle_does_not_alias_reused_slot() {
        let table = HandleTable::new(4);
        let old = table.insert(1u32).unwrap();
        table.remove(old).unwrap();
        let new = table.insert(2u32).unwrap();

        assert_eq!(old.index(), new.index(), "slot should be reused");
        assert_ne!(old, new);
        assert!(!table.is_valid(old));
        assert_eq!(*table.lookup(new).unwrap().lock(), 2);
    }

    #[test]
    fn test_handles_do_not_cross_tables() {
        let a = HandleTable::new(4);
        let b = HandleTable::new(4);
        let ha = a.insert(1u32).unwrap();
        let hb = b.insert(2u32).unwrap();

        assert!(!b.is_valid(ha));
        assert!(!a.is_valid(hb));
        assert!(b.get(ha).is_none());
        assert_eq!(b.remove(ha).unwrap_err(), FsError::InvalidHandle);
        assert!(a.is_valid(ha), "failed remove on b must not touch a");
    }

    #[test]
    fn test_lookup_without_validation_is_fatal() {
        let table: HandleTable<u32> = HandleTable::new(4);
        let bogus = Handle::from_raw(0xDEAD);
        assert!(table.lookup(bogus).unwrap_err().is_fatal());
    }

    #[test]
    fn test_limit_reports_no_handle_slot() {
        let table = HandleTable::new(2);
        table.insert(1u32).unwrap();
        let h = table.insert(2u32).unwrap();
        assert_eq!(table.insert(3u32).unwrap_err(), FsError::NoHandleSlot);

        table.remove(h).unwrap();
        assert!(table.insert(4u32).is_ok(), "freed slot should be usable again");
    }

    #[test]
    fn test_drain_invalidates_everything() {
        let table = HandleTable::new(8);
        let handles: Vec<_> = (0..5u32).map(|i| table.insert(i).unwrap()).collect();
        let drained = table.drain();

        assert_eq!(drained.len(), 5);
        assert!(table.is_empty());
        for h in handles {
            assert!(!table.is_valid(h));
        }
    }

    #[test]
    fn test_live_tables_never_share_a_tag() {
        let a = HandleTable::new(4);
        let ha = a.insert(1u32).unwrap();

        // Far more tables than a 16-bit tag space could tell apart
        for _ in 0..70_000 {
            let churn: HandleTable<u32> = HandleTable::new(1);
            assert_ne!(churn.tag, a.tag);
        }

        let b: HandleTable<u32> = HandleTable::new(4);
        assert_ne!(b.tag, a.tag);
        assert!(!b.is_valid(ha));
        assert!(a.is_valid(ha));
    }

    #[test]
    fn test_limit_is_capped_by_index_width() {
        let table: HandleTable<u8> = HandleTable::new(usize::MAX);
        assert_eq!(table.limit, MAX_TABLE_SLOTS);
    }
}

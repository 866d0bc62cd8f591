//! Touch pointer slot allocation
//!
//! The agent's injection protocol addresses pointers by small ids; id 0 is
//! permanently reserved for the mouse/pen, touch contacts get 1..=10. This
//! table maps arbitrary remote pointer ids onto local slots 0..=9 (wire id =
//! slot + 1), reusing the lowest free slot and capping concurrent contacts.

use std::collections::HashMap;

/// Maximum simultaneously tracked touch contacts.
pub const MAX_TOUCH_POINTERS: usize = 10;

/// Remote pointer id to local slot table.
#[derive(Debug, Default)]
pub struct TouchSlots {
    local_by_remote: HashMap<u64, u16>,
    remote_by_local: [u64; MAX_TOUCH_POINTERS],
    slot_used: [bool; MAX_TOUCH_POINTERS],
}

impl TouchSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot already assigned to `remote`, if any.
    pub fn get(&self, remote: u64) -> Option<u16> {
        self.local_by_remote.get(&remote).copied()
    }

    /// Assign the lowest free slot to `remote`, or reuse its existing one.
    ///
    /// Returns `None` when all slots are taken; the caller drops the event.
    pub fn acquire(&mut self, remote: u64) -> Option<u16> {
        if let Some(slot) = self.get(remote) {
            return Some(slot);
        }
        let slot = self.slot_used.iter().position(|used| !used)?;
        self.slot_used[slot] = true;
        self.remote_by_local[slot] = remote;
        self.local_by_remote.insert(remote, slot as u16);
        Some(slot as u16)
    }

    /// Release the slot held by `remote`, returning it if one was assigned.
    pub fn release(&mut self, remote: u64) -> Option<u16> {
        let slot = self.local_by_remote.remove(&remote)?;
        self.slot_used[slot as usize] = false;
        self.remote_by_local[slot as usize] = 0;
        Some(slot)
    }

    /// Number of slots currently in use.
    pub fn active(&self) -> usize {
        self.local_by_remote.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_assigns_lowest_free_slot() {
        let mut slots = TouchSlots::new();
        assert_eq!(slots.acquire(100), Some(0));
        assert_eq!(slots.acquire(200), Some(1));
        assert_eq!(slots.acquire(300), Some(2));

        // Releasing the middle contact frees its slot for the next contact.
        assert_eq!(slots.release(200), Some(1));
        assert_eq!(slots.acquire(400), Some(1));
    }

    #[test]
    fn test_acquire_reuses_existing_mapping() {
        let mut slots = TouchSlots::new();
        assert_eq!(slots.acquire(42), Some(0));
        assert_eq!(slots.acquire(42), Some(0));
        assert_eq!(slots.active(), 1);
    }

    #[test]
    fn test_eleventh_pointer_is_rejected() {
        let mut slots = TouchSlots::new();
        for remote in 0..MAX_TOUCH_POINTERS as u64 {
            assert!(slots.acquire(remote).is_some());
        }
        assert_eq!(slots.acquire(999), None);
        assert_eq!(slots.active(), MAX_TOUCH_POINTERS);

        // No two remotes ever share a slot.
        let mut seen: Vec<u16> = (0..MAX_TOUCH_POINTERS as u64)
            .filter_map(|remote| slots.get(remote))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), MAX_TOUCH_POINTERS);
    }

    #[test]
    fn test_release_unknown_remote() {
        let mut slots = TouchSlots::new();
        assert_eq!(slots.release(7), None);
        assert_eq!(slots.get(7), None);
    }

    #[test]
    fn test_slot_reuse_after_full_cycle() {
        let mut slots = TouchSlots::new();
        assert_eq!(slots.acquire(42), Some(0));
        assert_eq!(slots.release(42), Some(0));
        // A fresh contact picks slot 0 again.
        assert_eq!(slots.acquire(43), Some(0));
    }
}

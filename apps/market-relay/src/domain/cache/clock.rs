//! Clock (Second-Chance) Eviction
//!
//! A persistent hand sweeps a fixed slot array looking for a victim:
//!
//! ```text
//! EVICT():
//!   loop (at most two full turns):
//!     entry = slots[hand]; hand = (hand + 1) % len
//!     empty       -> skip
//!     referenced  -> clear bit (second chance)
//!     otherwise   -> victim
//! ```
//!
//! Every referenced entry the hand passes loses its bit, so the second turn
//! always finds an unreferenced entry when at least one slot is occupied.

/// Access to the referenced bit of an occupied slot.
pub trait ReferenceBit {
    /// Whether the entry was read since the hand last passed it.
    fn is_referenced(&self) -> bool;

    /// Clear the referenced bit.
    fn clear_reference(&mut self);
}

/// Persistent clock hand over a slot array.
#[derive(Debug, Clone, Default)]
pub struct ClockHand {
    position: usize,
}

impl ClockHand {
    /// Create a hand pointing at slot 0.
    #[must_use]
    pub const fn new() -> Self {
        Self { position: 0 }
    }

    /// Slot the next sweep starts from.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Sweep for a victim, clearing referenced bits along the way.
    ///
    /// Returns the index of an occupied, unreferenced slot and leaves the
    /// hand just past it. The caller is responsible for freeing the slot.
    /// Returns `None` only when no slot is occupied.
    pub fn sweep<E: ReferenceBit>(&mut self, slots: &mut [Option<E>]) -> Option<usize> {
        let len = slots.len();
        if len == 0 {
            return None;
        }
        if self.position >= len {
            self.position = 0;
        }

        for _ in 0..len.saturating_mul(2) {
            let idx = self.position;
            self.position = (idx + 1) % len;

            match slots[idx].as_mut() {
                None => {}
                Some(entry) if entry.is_referenced() => entry.clear_reference(),
                Some(_) => return Some(idx),
            }
        }

        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Bit(bool);

    impl ReferenceBit for Bit {
        fn is_referenced(&self) -> bool {
            self.0
        }

        fn clear_reference(&mut self) {
            self.0 = false;
        }
    }

    fn slots(bits: &[Option<bool>]) -> Vec<Option<Bit>> {
        bits.iter().map(|b| b.map(Bit)).collect()
    }

    #[test]
    fn empty_array_has_no_victim() {
        let mut hand = ClockHand::new();
        let mut empty: Vec<Option<Bit>> = Vec::new();
        assert_eq!(hand.sweep(&mut empty), None);
    }

    #[test]
    fn unoccupied_array_has_no_victim() {
        let mut hand = ClockHand::new();
        let mut all_free = slots(&[None, None, None]);
        assert_eq!(hand.sweep(&mut all_free), None);
    }

    #[test]
    fn first_unreferenced_slot_is_victim() {
        let mut hand = ClockHand::new();
        let mut s = slots(&[Some(false), Some(false)]);
        assert_eq!(hand.sweep(&mut s), Some(0));
        assert_eq!(hand.position(), 1);
    }

    #[test]
    fn referenced_slots_get_second_chance() {
        let mut hand = ClockHand::new();
        let mut s = slots(&[Some(true), Some(false), Some(true)]);
        assert_eq!(hand.sweep(&mut s), Some(1));
        assert!(!s[0].as_ref().unwrap().0);
        assert!(s[2].as_ref().unwrap().0);
    }

    #[test]
    fn all_referenced_wraps_to_start() {
        let mut hand = ClockHand::new();
        let mut s = slots(&[Some(true), Some(true), Some(true)]);
        assert_eq!(hand.sweep(&mut s), Some(0));
        assert!(s.iter().flatten().all(|b| !b.0));
    }

    #[test]
    fn hand_persists_between_sweeps() {
        let mut hand = ClockHand::new();
        let mut s = slots(&[Some(false), Some(false), Some(false)]);
        assert_eq!(hand.sweep(&mut s), Some(0));
        assert_eq!(hand.sweep(&mut s), Some(1));
        assert_eq!(hand.sweep(&mut s), Some(2));
        assert_eq!(hand.sweep(&mut s), Some(0));
    }

    #[test]
    fn free_slots_are_skipped() {
        let mut hand = ClockHand::new();
        let mut s = slots(&[None, Some(true), None, Some(false)]);
        assert_eq!(hand.sweep(&mut s), Some(3));
        assert_eq!(hand.position(), 0);
    }
}

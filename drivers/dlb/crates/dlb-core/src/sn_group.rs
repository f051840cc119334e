//! # Sequence-Number Groups
//!
//! Ordered queues take a slot in a sequence-number group whose width (sequence
//! numbers per queue) matches the request. Each group holds 1024 sequence
//! numbers, so a group of width `64 << mode` has `16 >> mode` slots.
//!
//! | Width | Mode | Slots |
//! |-------|------|-------|
//! | 64    | 0    | 16    |
//! | 128   | 1    | 8     |
//! | 256   | 2    | 4     |
//! | 512   | 3    | 2     |
//! | 1024  | 4    | 1     |

use arrayvec::ArrayVec;

use crate::config::MAX_SN_GROUPS;
use crate::error::{DlbError, DlbResult};

/// Width of every group after power-on
pub const DEFAULT_SN_WIDTH: u32 = 64;

/// Slots of a group in mode 0
const MAX_SLOTS: u32 = 16;

/// Mode of a sequence-number width, if supported
pub const fn width_to_mode(width: u32) -> Option<u32> {
    match width {
        64 => Some(0),
        128 => Some(1),
        256 => Some(2),
        512 => Some(3),
        1024 => Some(4),
        _ => None,
    }
}

/// One sequence-number group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnGroup {
    id: u32,
    width: u32,
    mode: u32,
    slot_use: u32,
}

impl SnGroup {
    fn new(id: u32) -> Self {
        Self {
            id,
            width: DEFAULT_SN_WIDTH,
            mode: 0,
            slot_use: 0,
        }
    }

    /// Group id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Sequence numbers per queue
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Hardware mode
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Usable slots
    pub fn capacity(&self) -> u32 {
        MAX_SLOTS >> self.mode
    }

    /// Occupied slots
    pub fn occupancy(&self) -> u32 {
        self.slot_use.count_ones()
    }

    /// Every usable slot occupied
    pub fn is_full(&self) -> bool {
        self.occupancy() == self.capacity()
    }

    /// Whether `slot` is occupied
    pub fn slot_in_use(&self, slot: u32) -> bool {
        slot < MAX_SLOTS && self.slot_use & (1 << slot) != 0
    }

    fn lowest_free_slot(&self) -> Option<u32> {
        (0..self.capacity()).find(|&s| !self.slot_in_use(s))
    }
}

/// Fixed set of sequence-number groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnGroupAllocator {
    groups: ArrayVec<SnGroup, MAX_SN_GROUPS>,
}

impl SnGroupAllocator {
    /// Create `num_groups` groups of [`DEFAULT_SN_WIDTH`]
    ///
    /// Counts above [`MAX_SN_GROUPS`] are clamped; the device configuration
    /// rejects them beforehand.
    pub fn new(num_groups: u32) -> Self {
        let groups = (0..num_groups)
            .take(MAX_SN_GROUPS)
            .map(SnGroup::new)
            .collect();
        Self { groups }
    }

    /// Group by id
    pub fn group(&self, id: u32) -> Option<&SnGroup> {
        self.groups.get(id as usize)
    }

    /// Whether a slot of `width` could be allocated
    pub fn has_slot(&self, width: u32) -> bool {
        self.groups.iter().any(|g| g.width == width && !g.is_full())
    }

    /// Allocate the lowest free slot of the first non-full group of `width`
    pub fn alloc_slot(&mut self, width: u32) -> DlbResult<(u32, u32)> {
        for group in self.groups.iter_mut() {
            if group.width != width || group.is_full() {
                continue;
            }
            if let Some(slot) = group.lowest_free_slot() {
                group.slot_use |= 1 << slot;
                return Ok((group.id, slot));
            }
        }
        Err(DlbError::SequenceNumbersUnavailable)
    }

    /// Release a slot; releasing a free slot is a no-op
    pub fn free_slot(&mut self, group: u32, slot: u32) {
        if let Some(g) = self.groups.get_mut(group as usize) {
            if slot < MAX_SLOTS {
                g.slot_use &= !(1 << slot);
            }
        }
    }

    /// Change the width of an empty group, returning its new mode
    pub fn set_width(&mut self, group: u32, width: u32) -> DlbResult<u32> {
        let g = self
            .groups
            .get_mut(group as usize)
            .ok_or(DlbError::InvalidSnGroupId)?;
        let mode = width_to_mode(width).ok_or(DlbError::InvalidSequenceNumberWidth)?;
        if g.slot_use != 0 {
            return Err(DlbError::SnGroupInUse);
        }

        g.width = width;
        g.mode = mode;
        Ok(mode)
    }

    /// Occupied slots across all groups
    pub fn total_occupancy(&self) -> u32 {
        self.groups.iter().map(SnGroup::occupancy).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_table() {
        assert_eq!(width_to_mode(64), Some(0));
        assert_eq!(width_to_mode(1024), Some(4));
        assert_eq!(width_to_mode(32), None);
        assert_eq!(width_to_mode(2048), None);
    }

    #[test]
    fn test_alloc_fills_groups_in_order() {
        let mut sn = SnGroupAllocator::new(2);

        for expected in 0..16 {
            assert_eq!(sn.alloc_slot(64), Ok((0, expected)));
        }
        assert!(sn.group(0).unwrap().is_full());
        assert_eq!(sn.alloc_slot(64), Ok((1, 0)));
        assert_eq!(sn.alloc_slot(128), Err(DlbError::SequenceNumbersUnavailable));
    }

    #[test]
    fn test_exhaustion_then_free_reuses_slot() {
        let mut sn = SnGroupAllocator::new(2);
        for _ in 0..32 {
            sn.alloc_slot(64).unwrap();
        }
        assert!(!sn.has_slot(64));
        assert_eq!(sn.alloc_slot(64), Err(DlbError::SequenceNumbersUnavailable));

        sn.free_slot(1, 5);
        assert!(sn.has_slot(64));
        assert_eq!(sn.alloc_slot(64), Ok((1, 5)));
    }

    #[test]
    fn test_slots_never_double_allocated() {
        let mut sn = SnGroupAllocator::new(1);
        sn.set_width(0, 256).unwrap();

        let mut seen = 0u32;
        while let Ok((_, slot)) = sn.alloc_slot(256) {
            assert_eq!(seen & (1 << slot), 0);
            seen |= 1 << slot;
        }
        assert_eq!(seen, 0b1111);
        assert_eq!(sn.total_occupancy(), 4);

        // Freeing an already-free slot changes nothing
        sn.free_slot(0, 9);
        assert_eq!(sn.total_occupancy(), 4);
    }

    #[test]
    fn test_set_width_rules() {
        let mut sn = SnGroupAllocator::new(2);
        assert_eq!(sn.set_width(2, 128), Err(DlbError::InvalidSnGroupId));
        assert_eq!(sn.set_width(0, 100), Err(DlbError::InvalidSequenceNumberWidth));

        let (group, slot) = sn.alloc_slot(64).unwrap();
        assert_eq!(sn.set_width(group, 1024), Err(DlbError::SnGroupInUse));

        sn.free_slot(group, slot);
        assert_eq!(sn.set_width(group, 1024), Ok(4));
        assert_eq!(sn.group(group).unwrap().capacity(), 1);
        assert_eq!(sn.alloc_slot(1024), Ok((group, 0)));
        assert_eq!(sn.alloc_slot(1024), Err(DlbError::SequenceNumbersUnavailable));
    }
}

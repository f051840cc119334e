//! # Hardware Resources
//!
//! Software records of the per-id hardware resources. Each record carries an
//! owner tag instead of list membership; the free and per-domain lists only
//! hold ids.

use dlb_hal::regs::NUM_QIDS_PER_LDB_CQ;

use crate::{DomainId, PortId, QueueId};

// =============================================================================
// OWNERSHIP
// =============================================================================

/// Owner of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    /// In the device pool's free list
    #[default]
    Pool,
    /// Attached to a scheduling domain
    Domain(DomainId),
}

impl Location {
    /// Owning domain, if any
    pub const fn domain(&self) -> Option<DomainId> {
        match self {
            Location::Pool => None,
            Location::Domain(id) => Some(*id),
        }
    }

    /// Owned by domain `id`
    pub fn is_domain(&self, id: DomainId) -> bool {
        *self == Location::Domain(id)
    }
}

// =============================================================================
// LOAD-BALANCED QUEUE
// =============================================================================

/// Load-balanced queue record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdbQueue {
    /// Queue id
    pub id: QueueId,
    /// Owner
    pub owner: Location,
    /// Registers programmed
    pub configured: bool,
    /// Atomic-inflight entries taken from the domain
    pub aqed_limit: u32,
    /// Sequence-number `(group, slot)` of an ordered queue
    pub sn_slot: Option<(u32, u32)>,
    /// Ports with a live mapping of this queue
    pub num_mappings: u32,
    /// Map procedures waiting for this queue to empty
    pub num_pending_additions: u32,
}

impl LdbQueue {
    /// Unowned queue
    pub const fn new(id: QueueId) -> Self {
        Self {
            id,
            owner: Location::Pool,
            configured: false,
            aqed_limit: 0,
            sn_slot: None,
            num_mappings: 0,
            num_pending_additions: 0,
        }
    }

    /// Forget everything a tenant left behind
    pub fn reset_transient(&mut self) {
        *self = Self::new(self.id);
    }
}

// =============================================================================
// LOAD-BALANCED PORT
// =============================================================================

/// State of one QID map slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QidMapState {
    /// Slot free
    #[default]
    Unmapped,
    /// Queue mapped
    Mapped,
    /// Map waiting for the queue to drain
    MapInProgress,
    /// Unmap waiting for the CQ to drain
    UnmapInProgress,
    /// Unmap in progress with a map queued behind it
    UnmapInProgressPendingMap,
}

/// One QID map slot of a load-balanced CQ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QidSlot {
    /// Slot state
    pub state: QidMapState,
    /// Mapped queue
    pub qid: QueueId,
    /// Mapping priority
    pub priority: u32,
    /// Queue to map once the unmap completes
    pub pending_qid: QueueId,
    /// Priority of the queued map
    pub pending_priority: u32,
}

impl QidSlot {
    /// Slot holds `qid` in `state`
    pub fn holds(&self, qid: QueueId, state: QidMapState) -> bool {
        self.state == state && self.qid == qid
    }
}

/// Load-balanced port record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdbPort {
    /// Port id
    pub id: PortId,
    /// Class of service
    pub cos: u32,
    /// Owner
    pub owner: Location,
    /// Registers programmed
    pub configured: bool,
    /// CQ enabled for scheduling
    pub enabled: bool,
    /// CQ depth
    pub cq_depth: u32,
    /// First history-list entry
    pub hist_list_base: u32,
    /// Last history-list entry
    pub hist_list_limit: u32,
    /// QID map table
    pub qid_map: [QidSlot; NUM_QIDS_PER_LDB_CQ as usize],
    /// Slots in `Mapped`
    pub num_mappings: u32,
    /// Unmap procedures in progress
    pub num_pending_removals: u32,
    /// Map procedures in progress
    pub num_pending_additions: u32,
}

impl LdbPort {
    /// Unowned port of class `cos`
    pub fn new(id: PortId, cos: u32) -> Self {
        Self {
            id,
            cos,
            owner: Location::Pool,
            configured: false,
            enabled: false,
            cq_depth: 0,
            hist_list_base: 0,
            hist_list_limit: 0,
            qid_map: [QidSlot::default(); NUM_QIDS_PER_LDB_CQ as usize],
            num_mappings: 0,
            num_pending_removals: 0,
            num_pending_additions: 0,
        }
    }

    /// Forget everything a tenant left behind
    pub fn reset_transient(&mut self) {
        *self = Self::new(self.id, self.cos);
    }

    /// Slot holding `qid` in `state`
    pub fn find_slot(&self, qid: QueueId, state: QidMapState) -> Option<usize> {
        self.qid_map.iter().position(|s| s.holds(qid, state))
    }

    /// Lowest unmapped slot
    pub fn free_slot(&self) -> Option<usize> {
        self.qid_map
            .iter()
            .position(|s| s.state == QidMapState::Unmapped)
    }

    /// Queues with a live mapping
    pub fn mapped_qids(&self) -> impl Iterator<Item = QueueId> + '_ {
        self.qid_map
            .iter()
            .filter(|s| s.state == QidMapState::Mapped)
            .map(|s| s.qid)
    }
}

// =============================================================================
// DIRECTED PORT/QUEUE PAIR
// =============================================================================

/// Directed port/queue pair record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirPqPair {
    /// Pair id (port id == queue id)
    pub id: PortId,
    /// Owner
    pub owner: Location,
    /// Queue half programmed
    pub queue_configured: bool,
    /// Port half programmed
    pub port_configured: bool,
    /// CQ enabled for scheduling
    pub enabled: bool,
    /// CQ depth
    pub cq_depth: u32,
}

impl DirPqPair {
    /// Unowned pair
    pub const fn new(id: PortId) -> Self {
        Self {
            id,
            owner: Location::Pool,
            queue_configured: false,
            port_configured: false,
            enabled: false,
            cq_depth: 0,
        }
    }

    /// Forget everything a tenant left behind
    pub fn reset_transient(&mut self) {
        *self = Self::new(self.id);
    }

    /// Either half programmed
    pub fn in_use(&self) -> bool {
        self.queue_configured || self.port_configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location() {
        assert_eq!(Location::default(), Location::Pool);
        assert_eq!(Location::Domain(3).domain(), Some(3));
        assert!(Location::Domain(3).is_domain(3));
        assert!(!Location::Pool.is_domain(0));
    }

    #[test]
    fn test_port_reset_keeps_identity() {
        let mut port = LdbPort::new(9, 2);
        port.owner = Location::Domain(1);
        port.configured = true;
        port.num_pending_removals = 3;
        port.qid_map[4] = QidSlot {
            state: QidMapState::Mapped,
            qid: 7,
            priority: 2,
            ..QidSlot::default()
        };
        assert_eq!(port.find_slot(7, QidMapState::Mapped), Some(4));
        assert_eq!(port.mapped_qids().next(), Some(7));

        port.reset_transient();
        assert_eq!(port, LdbPort::new(9, 2));
        assert_eq!(port.free_slot(), Some(0));
    }

    #[test]
    fn test_queue_and_pair_reset() {
        let mut q = LdbQueue::new(5);
        q.sn_slot = Some((1, 3));
        q.num_mappings = 2;
        q.reset_transient();
        assert_eq!(q, LdbQueue::new(5));

        let mut pair = DirPqPair::new(4);
        pair.port_configured = true;
        assert!(pair.in_use());
        pair.reset_transient();
        assert!(!pair.in_use());
    }
}

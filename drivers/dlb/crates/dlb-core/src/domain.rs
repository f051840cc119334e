//! # Scheduling Domains
//!
//! A domain splits its resources into an `avail` list (attached at creation,
//! not yet configured) and a `used` list (configured by a create call).

use alloc::vec::Vec;

use crate::config::MAX_COS;
use crate::{DomainId, PortId, QueueId};

/// Scheduling-domain record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Domain id
    pub id: DomainId,

    /// Attached, unconfigured load-balanced queues
    pub avail_ldb_queues: Vec<QueueId>,
    /// Configured load-balanced queues
    pub used_ldb_queues: Vec<QueueId>,
    /// Attached, unconfigured load-balanced ports per class
    pub avail_ldb_ports: [Vec<PortId>; MAX_COS],
    /// Configured load-balanced ports per class
    pub used_ldb_ports: [Vec<PortId>; MAX_COS],
    /// Attached, unconfigured directed pairs
    pub avail_dir_pq_pairs: Vec<PortId>,
    /// Directed pairs with at least one half configured
    pub used_dir_pq_pairs: Vec<PortId>,

    /// Load-balanced credits
    pub num_ldb_credits: u32,
    /// Directed credits
    pub num_dir_credits: u32,
    /// Atomic-inflight entries attached
    pub num_aqed_entries: u32,
    /// Atomic-inflight entries not yet given to a queue
    pub avail_aqed_entries: u32,

    /// First history-list entry of the domain's range
    pub hist_list_base: u32,
    /// Width of the domain's range
    pub hist_list_width: u32,
    /// Entries already carved out for ports
    pub hist_list_offset: u32,

    /// Map procedures in progress
    pub num_pending_additions: u32,
    /// Unmap procedures in progress
    pub num_pending_removals: u32,

    /// Resources attached
    pub configured: bool,
    /// Traffic enabled
    pub started: bool,
}

impl Domain {
    /// Empty, unconfigured domain
    pub fn new(id: DomainId) -> Self {
        Self {
            id,
            avail_ldb_queues: Vec::new(),
            used_ldb_queues: Vec::new(),
            avail_ldb_ports: core::array::from_fn(|_| Vec::new()),
            used_ldb_ports: core::array::from_fn(|_| Vec::new()),
            avail_dir_pq_pairs: Vec::new(),
            used_dir_pq_pairs: Vec::new(),
            num_ldb_credits: 0,
            num_dir_credits: 0,
            num_aqed_entries: 0,
            avail_aqed_entries: 0,
            hist_list_base: 0,
            hist_list_width: 0,
            hist_list_offset: 0,
            num_pending_additions: 0,
            num_pending_removals: 0,
            configured: false,
            started: false,
        }
    }

    /// Return to the empty state, keeping the id
    pub fn reset(&mut self) {
        *self = Self::new(self.id);
    }

    /// History-list entries not yet carved out for a port
    pub fn hist_list_remaining(&self) -> u32 {
        self.hist_list_width - self.hist_list_offset
    }

    /// Load-balanced queues attached (avail + used)
    pub fn num_ldb_queues(&self) -> u32 {
        (self.avail_ldb_queues.len() + self.used_ldb_queues.len()) as u32
    }

    /// Load-balanced ports attached (avail + used)
    pub fn num_ldb_ports(&self) -> u32 {
        self.avail_ldb_ports
            .iter()
            .chain(self.used_ldb_ports.iter())
            .map(|l| l.len() as u32)
            .sum()
    }

    /// Directed pairs attached (avail + used)
    pub fn num_dir_pq_pairs(&self) -> u32 {
        (self.avail_dir_pq_pairs.len() + self.used_dir_pq_pairs.len()) as u32
    }

    /// Every attached load-balanced port, used first
    pub fn ldb_ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.used_ldb_ports
            .iter()
            .chain(self.avail_ldb_ports.iter())
            .flatten()
            .copied()
    }

    /// Configured load-balanced ports
    pub fn used_ldb_port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.used_ldb_ports.iter().flatten().copied()
    }

    /// Whether port `id` is configured in this domain
    pub fn has_used_ldb_port(&self, id: PortId) -> bool {
        self.used_ldb_port_ids().any(|p| p == id)
    }

    /// Whether queue `id` is configured in this domain
    pub fn has_used_ldb_queue(&self, id: QueueId) -> bool {
        self.used_ldb_queues.contains(&id)
    }

    /// Resource counts
    pub fn resources(&self) -> DomainResources {
        DomainResources {
            num_ldb_queues: self.num_ldb_queues(),
            num_ldb_ports: self.num_ldb_ports(),
            num_dir_pq_pairs: self.num_dir_pq_pairs(),
            num_ldb_credits: self.num_ldb_credits,
            num_dir_credits: self.num_dir_credits,
            num_aqed_entries: self.num_aqed_entries,
            num_hist_list_entries: self.hist_list_width,
        }
    }
}

/// Resources attached to one domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainResources {
    /// Load-balanced queues
    pub num_ldb_queues: u32,
    /// Load-balanced ports
    pub num_ldb_ports: u32,
    /// Directed pairs
    pub num_dir_pq_pairs: u32,
    /// Load-balanced credits
    pub num_ldb_credits: u32,
    /// Directed credits
    pub num_dir_credits: u32,
    /// Atomic-inflight entries
    pub num_aqed_entries: u32,
    /// History-list entries
    pub num_hist_list_entries: u32,
}

impl DomainResources {
    /// Nothing attached
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

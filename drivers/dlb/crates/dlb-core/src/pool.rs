//! # Resource Pool
//!
//! Free lists and counters of the physical function's resources. Moving a
//! resource between the pool and a domain is one call that updates the owner
//! tag and both lists together.
//!
//! ## Initial load-balanced port order
//!
//! Within a class of service ports are handed out in an interleaved order so
//! numerically adjacent CQs tend to land in different domains:
//!
//! ```text
//!   class of 16:  0  7 14  5 12  3 10  1  8 15  6 13  4 11  2  9
//! ```

use alloc::collections::VecDeque;

use arrayvec::ArrayVec;

use crate::bitmap::BitmapAllocator;
use crate::config::{DlbConfig, MAX_COS};
use crate::domain::Domain;
use crate::error::{DlbError, DlbResult, FaultKind};
use crate::resource::{DirPqPair, LdbPort, LdbQueue, Location};
use crate::{DomainId, PortId, QueueId};

/// Hand-out stride within a class of service
const PORT_INTERLEAVE_STRIDE: u32 = 7;

/// Free resources of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvailableResources {
    /// Free scheduling domains
    pub num_domains: u32,
    /// Free load-balanced queues
    pub num_ldb_queues: u32,
    /// Free load-balanced ports, all classes
    pub num_ldb_ports: u32,
    /// Free load-balanced ports per class
    pub num_ldb_ports_per_cos: [u32; MAX_COS],
    /// Free directed pairs
    pub num_dir_pq_pairs: u32,
    /// Free load-balanced credits
    pub num_ldb_credits: u32,
    /// Free directed credits
    pub num_dir_credits: u32,
    /// Free atomic-inflight entries
    pub num_aqed_entries: u32,
    /// Free history-list entries
    pub num_hist_list_entries: u32,
    /// Longest contiguous free history-list range
    pub max_contiguous_hist_list_entries: u32,
    /// Pool locked by the owner of the function
    pub locked: bool,
}

/// Resource pool of one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePool {
    avail_domains: VecDeque<DomainId>,
    used_domains: VecDeque<DomainId>,
    avail_ldb_queues: VecDeque<QueueId>,
    avail_ldb_ports: ArrayVec<VecDeque<PortId>, MAX_COS>,
    avail_dir_pq_pairs: VecDeque<PortId>,
    avail_ldb_credits: u32,
    avail_dir_credits: u32,
    avail_aqed_entries: u32,
    hist_list: BitmapAllocator,
    locked: bool,
}

/// Interleaved hand-out order of one class of `n` ports starting at `first`
fn interleaved_ports(first: u32, n: u32) -> impl Iterator<Item = PortId> {
    let stride = if n % PORT_INTERLEAVE_STRIDE == 0 {
        1
    } else {
        PORT_INTERLEAVE_STRIDE
    };
    (0..n).map(move |k| first + (k * stride) % n)
}

impl ResourcePool {
    /// Pool owning the whole inventory of `config`
    pub fn new(config: &DlbConfig) -> Self {
        let per_cos = config.ports_per_cos();
        let avail_ldb_ports: ArrayVec<VecDeque<PortId>, MAX_COS> = (0..config.num_cos)
            .take(MAX_COS)
            .map(|cos| interleaved_ports(cos * per_cos, per_cos).collect())
            .collect();

        let mut hist_list = BitmapAllocator::new(config.num_hist_list_entries);
        hist_list.fill();

        Self {
            avail_domains: (0..config.num_domains).collect(),
            used_domains: VecDeque::new(),
            avail_ldb_queues: (0..config.num_ldb_queues).collect(),
            avail_ldb_ports,
            avail_dir_pq_pairs: (0..config.num_dir_ports).collect(),
            avail_ldb_credits: config.num_ldb_credits,
            avail_dir_credits: config.num_dir_credits,
            avail_aqed_entries: config.num_aqed_entries,
            hist_list,
            locked: false,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Free domains
    pub fn num_avail_domains(&self) -> u32 {
        self.avail_domains.len() as u32
    }

    /// Free load-balanced queues
    pub fn num_avail_ldb_queues(&self) -> u32 {
        self.avail_ldb_queues.len() as u32
    }

    /// Free load-balanced ports across all classes
    pub fn num_avail_ldb_ports(&self) -> u32 {
        self.avail_ldb_ports.iter().map(|l| l.len() as u32).sum()
    }

    /// Free directed pairs
    pub fn num_avail_dir_pq_pairs(&self) -> u32 {
        self.avail_dir_pq_pairs.len() as u32
    }

    /// Free load-balanced credits
    pub fn num_avail_ldb_credits(&self) -> u32 {
        self.avail_ldb_credits
    }

    /// Free directed credits
    pub fn num_avail_dir_credits(&self) -> u32 {
        self.avail_dir_credits
    }

    /// Free atomic-inflight entries
    pub fn num_avail_aqed_entries(&self) -> u32 {
        self.avail_aqed_entries
    }

    /// History-list free map
    pub fn hist_list(&self) -> &BitmapAllocator {
        &self.hist_list
    }

    /// Free port list of class `cos`
    pub fn avail_ldb_ports(&self, cos: usize) -> Option<&VecDeque<PortId>> {
        self.avail_ldb_ports.get(cos)
    }

    /// Number of classes of service
    pub fn num_cos(&self) -> usize {
        self.avail_ldb_ports.len()
    }

    /// Whether domain `id` is handed out
    pub fn is_used_domain(&self, id: DomainId) -> bool {
        self.used_domains.contains(&id)
    }

    /// Handed-out domains, in creation order
    pub fn used_domains(&self) -> impl Iterator<Item = DomainId> + '_ {
        self.used_domains.iter().copied()
    }

    /// Occurrences of domain `id` in the free list
    pub fn avail_domain_count(&self, id: DomainId) -> usize {
        self.avail_domains.iter().filter(|&&d| d == id).count()
    }

    /// Tenant requests are refused while locked
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Set the lock flag
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Snapshot of the free resources
    pub fn available(&self) -> AvailableResources {
        let mut per_cos = [0; MAX_COS];
        for (slot, list) in per_cos.iter_mut().zip(self.avail_ldb_ports.iter()) {
            *slot = list.len() as u32;
        }

        AvailableResources {
            num_domains: self.num_avail_domains(),
            num_ldb_queues: self.num_avail_ldb_queues(),
            num_ldb_ports: self.num_avail_ldb_ports(),
            num_ldb_ports_per_cos: per_cos,
            num_dir_pq_pairs: self.num_avail_dir_pq_pairs(),
            num_ldb_credits: self.avail_ldb_credits,
            num_dir_credits: self.avail_dir_credits,
            num_aqed_entries: self.avail_aqed_entries,
            num_hist_list_entries: self.hist_list.count_set(),
            max_contiguous_hist_list_entries: self.hist_list.longest_set_run(),
            locked: self.is_locked(),
        }
    }

    // =========================================================================
    // Domains
    // =========================================================================

    /// Take the next free domain
    pub fn take_domain(&mut self) -> DlbResult<DomainId> {
        let id = self
            .avail_domains
            .pop_front()
            .ok_or(DlbError::DomainUnavailable)?;
        self.used_domains.push_back(id);
        Ok(id)
    }

    /// Put a handed-out domain back at the end of the free list
    pub fn release_domain(&mut self, id: DomainId) -> DlbResult<()> {
        let pos = self
            .used_domains
            .iter()
            .position(|&d| d == id)
            .ok_or(DlbError::Fault(FaultKind::StateCorrupted))?;
        self.used_domains.remove(pos);
        self.avail_domains.push_back(id);
        Ok(())
    }

    // =========================================================================
    // Attach
    // =========================================================================

    /// Move `n` queues, in free-list order, to `domain`
    pub fn attach_ldb_queues(
        &mut self,
        queues: &mut [LdbQueue],
        domain: &mut Domain,
        n: u32,
    ) -> DlbResult<()> {
        if self.num_avail_ldb_queues() < n {
            return Err(DlbError::LdbQueuesUnavailable);
        }

        for _ in 0..n {
            let id = self
                .avail_ldb_queues
                .pop_front()
                .ok_or(DlbError::LdbQueuesUnavailable)?;
            queues[id as usize].owner = Location::Domain(domain.id);
            domain.avail_ldb_queues.push(id);
        }
        Ok(())
    }

    /// Move the port at position `pos` of class `cos`'s free list to `domain`
    pub fn attach_ldb_port(
        &mut self,
        ports: &mut [LdbPort],
        domain: &mut Domain,
        cos: usize,
        pos: usize,
    ) -> DlbResult<PortId> {
        let id = self
            .avail_ldb_ports
            .get_mut(cos)
            .and_then(|list| list.remove(pos))
            .ok_or(DlbError::LdbPortsUnavailable)?;

        ports[id as usize].owner = Location::Domain(domain.id);
        domain.avail_ldb_ports[cos].push(id);
        Ok(id)
    }

    /// Move `n` directed pairs, in free-list order, to `domain`
    pub fn attach_dir_pq_pairs(
        &mut self,
        pairs: &mut [DirPqPair],
        domain: &mut Domain,
        n: u32,
    ) -> DlbResult<()> {
        if self.num_avail_dir_pq_pairs() < n {
            return Err(DlbError::DirPortsUnavailable);
        }

        for _ in 0..n {
            let id = self
                .avail_dir_pq_pairs
                .pop_front()
                .ok_or(DlbError::DirPortsUnavailable)?;
            pairs[id as usize].owner = Location::Domain(domain.id);
            domain.avail_dir_pq_pairs.push(id);
        }
        Ok(())
    }

    /// Move credits to `domain`
    pub fn attach_credits(&mut self, domain: &mut Domain, ldb: u32, dir: u32) -> DlbResult<()> {
        if self.avail_ldb_credits < ldb {
            return Err(DlbError::LdbCreditsUnavailable);
        }
        if self.avail_dir_credits < dir {
            return Err(DlbError::DirCreditsUnavailable);
        }

        self.avail_ldb_credits -= ldb;
        self.avail_dir_credits -= dir;
        domain.num_ldb_credits += ldb;
        domain.num_dir_credits += dir;
        Ok(())
    }

    /// Move atomic-inflight entries to `domain`
    pub fn attach_aqed_entries(&mut self, domain: &mut Domain, n: u32) -> DlbResult<()> {
        if self.avail_aqed_entries < n {
            return Err(DlbError::AtomicInflightsUnavailable);
        }

        self.avail_aqed_entries -= n;
        domain.num_aqed_entries += n;
        domain.avail_aqed_entries += n;
        Ok(())
    }

    /// Carve a contiguous history-list range of `width` for `domain`
    pub fn attach_hist_list(&mut self, domain: &mut Domain, width: u32) -> DlbResult<()> {
        if width == 0 {
            return Ok(());
        }

        let base = self
            .hist_list
            .find_set_run(width)
            .map_err(|_| DlbError::HistListEntriesUnavailable)?;
        self.hist_list
            .clear_range(base, width)
            .map_err(|_| DlbError::HistListEntriesUnavailable)?;

        domain.hist_list_base = base;
        domain.hist_list_width = width;
        domain.hist_list_offset = 0;
        Ok(())
    }

    // =========================================================================
    // Return
    // =========================================================================

    /// Put a queue back at the end of the free list
    pub fn return_ldb_queue(&mut self, queue: &mut LdbQueue) {
        queue.reset_transient();
        self.avail_ldb_queues.push_back(queue.id);
    }

    /// Put a port back at the end of its class's free list
    pub fn return_ldb_port(&mut self, port: &mut LdbPort) -> DlbResult<()> {
        port.reset_transient();
        self.avail_ldb_ports
            .get_mut(port.cos as usize)
            .ok_or(DlbError::Fault(FaultKind::StateCorrupted))?
            .push_back(port.id);
        Ok(())
    }

    /// Put a directed pair back at the end of the free list
    pub fn return_dir_pq_pair(&mut self, pair: &mut DirPqPair) {
        pair.reset_transient();
        self.avail_dir_pq_pairs.push_back(pair.id);
    }

    /// Give back the domain's credits, atomic inflights and history list
    pub fn return_scalars(&mut self, domain: &Domain) -> DlbResult<()> {
        if domain.hist_list_width > 0 {
            self.hist_list
                .set_range(domain.hist_list_base, domain.hist_list_width)
                .map_err(|_| DlbError::Fault(FaultKind::StateCorrupted))?;
        }

        self.avail_ldb_credits += domain.num_ldb_credits;
        self.avail_dir_credits += domain.num_dir_credits;
        self.avail_aqed_entries += domain.num_aqed_entries;
        Ok(())
    }
}

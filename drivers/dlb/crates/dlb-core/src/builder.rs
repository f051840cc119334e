//! # Domain Builder
//!
//! Creation of scheduling domains and of the queues and ports inside them.
//!
//! Every operation runs in two phases:
//!
//! ```text
//!   validate (read only) ──ok──▶ commit (mutate + program registers)
//!        │                            │
//!        └─ validation error,         └─ unreachable failure:
//!           nothing changed              Fault(CommitFailed)
//! ```

use dlb_hal::{CsrBus, Delay};

use crate::args::{
    CreateDirPortArgs, CreateDirQueueArgs, CreateLdbPortArgs, CreateLdbQueueArgs,
    CreateSchedDomainArgs,
};
use crate::configure::{lock_id_comp_code, SnAssignment};
use crate::device::DlbHw;
use crate::domain::Domain;
use crate::error::{DlbError, DlbResult, FaultKind};
use crate::placement::pick_port;
use crate::resource::DirPqPair;
use crate::{DomainId, PortId, QueueId, DLB_UNASSIGNED_ID};

/// Largest QID inflight limit
pub const MAX_QID_INFLIGHTS: u32 = 4096;

/// Smallest CQ depth
pub const MIN_CQ_DEPTH: u32 = 8;

/// Largest CQ depth
pub const MAX_CQ_DEPTH: u32 = 1024;

/// Required CQ base address alignment
pub const CQ_BASE_ALIGN: u64 = 64;

const COMMIT_FAILED: DlbError = DlbError::Fault(FaultKind::CommitFailed);

fn validate_cq_depth(depth: u32) -> DlbResult<()> {
    if !(MIN_CQ_DEPTH..=MAX_CQ_DEPTH).contains(&depth) || !depth.is_power_of_two() {
        return Err(DlbError::InvalidCqDepth);
    }
    Ok(())
}

fn validate_cq_address(base_address: u64) -> DlbResult<()> {
    if base_address == 0 || base_address % CQ_BASE_ALIGN != 0 {
        return Err(DlbError::InvalidCqVirtAddr);
    }
    Ok(())
}

fn rejected<T>(what: &str, id: DomainId, result: DlbResult<T>) -> DlbResult<T> {
    if let Err(e) = &result {
        log::debug!("dlb: domain {} {} rejected: {}", id, what, e);
    }
    result
}

impl<B: CsrBus, D: Delay> DlbHw<B, D> {
    // =========================================================================
    // Scheduling domain
    // =========================================================================

    fn validate_create_domain(&self, args: &CreateSchedDomainArgs) -> DlbResult<()> {
        let pool = &self.pool;

        if pool.num_avail_domains() == 0 {
            return Err(DlbError::DomainUnavailable);
        }
        if pool.num_avail_ldb_queues() < args.num_ldb_queues {
            return Err(DlbError::LdbQueuesUnavailable);
        }
        if pool.num_avail_ldb_ports() < args.num_ldb_ports {
            return Err(DlbError::LdbPortsUnavailable);
        }
        if args.num_ldb_queues > 0 && args.num_ldb_ports == 0 {
            return Err(DlbError::LdbPortRequiredForLdbQueues);
        }
        if pool.num_avail_dir_pq_pairs() < args.num_dir_ports {
            return Err(DlbError::DirPortsUnavailable);
        }
        if pool.num_avail_ldb_credits() < args.num_ldb_credits {
            return Err(DlbError::LdbCreditsUnavailable);
        }
        if pool.num_avail_dir_credits() < args.num_dir_credits {
            return Err(DlbError::DirCreditsUnavailable);
        }
        if pool.num_avail_aqed_entries() < args.num_atomic_inflights {
            return Err(DlbError::AtomicInflightsUnavailable);
        }
        if pool.hist_list().longest_set_run() < args.num_hist_list_entries {
            return Err(DlbError::HistListEntriesUnavailable);
        }
        Ok(())
    }

    /// Attach `n` ports to `domain`, one at a time, from the lowest class
    /// that still has free ports
    fn attach_ldb_ports(&mut self, domain: &mut Domain, n: u32) -> DlbResult<()> {
        for _ in 0..n {
            let cos = (0..self.pool.num_cos())
                .find(|&c| self.pool.avail_ldb_ports(c).is_some_and(|l| !l.is_empty()))
                .ok_or(DlbError::LdbPortsUnavailable)?;
            let free = self
                .pool
                .avail_ldb_ports(cos)
                .ok_or(DlbError::LdbPortsUnavailable)?;
            let pos = pick_port(free, &self.ldb_ports, domain.id).ok_or(DlbError::LdbPortsUnavailable)?;
            self.pool
                .attach_ldb_port(&mut self.ldb_ports, domain, cos, pos)?;
        }
        Ok(())
    }

    fn attach_all(&mut self, domain: &mut Domain, args: &CreateSchedDomainArgs) -> DlbResult<()> {
        self.pool
            .attach_ldb_queues(&mut self.ldb_queues, domain, args.num_ldb_queues)?;
        self.attach_ldb_ports(domain, args.num_ldb_ports)?;
        self.pool
            .attach_dir_pq_pairs(&mut self.dir_pq_pairs, domain, args.num_dir_ports)?;
        self.pool
            .attach_credits(domain, args.num_ldb_credits, args.num_dir_credits)?;
        self.pool.attach_aqed_entries(domain, args.num_atomic_inflights)?;
        self.pool.attach_hist_list(domain, args.num_hist_list_entries)
    }

    fn commit_create_domain(&mut self, args: &CreateSchedDomainArgs) -> DlbResult<DomainId> {
        let id = self.pool.take_domain()?;
        // Work on a detached copy so the arenas and the pool can be borrowed
        let mut domain = core::mem::replace(&mut self.domains[id as usize], Domain::new(id));

        let attached = self.attach_all(&mut domain, args);

        domain.configured = attached.is_ok();
        domain.started = false;
        self.domains[id as usize] = domain;
        if let Err(e) = attached {
            // Hand back whatever was attached before the failure
            self.return_resources(id)?;
            return Err(e);
        }

        self.configurator()
            .configure_domain_credits(id, args.num_ldb_credits, args.num_dir_credits);
        Ok(id)
    }

    /// Create a scheduling domain with the requested resources attached
    pub fn create_sched_domain(&mut self, args: &CreateSchedDomainArgs) -> DlbResult<DomainId> {
        if let Err(e) = self.validate_create_domain(args) {
            log::debug!("dlb: domain creation rejected: {}", e);
            return Err(e);
        }

        let id = self.commit_create_domain(args).map_err(|e| {
            log::error!("dlb: domain commit failed after validation: {}", e);
            if e.is_fault() {
                e
            } else {
                COMMIT_FAILED
            }
        })?;

        log::info!(
            "dlb: domain {} created ({} ldb queues, {} ldb ports, {} dir ports, hist list {})",
            id,
            args.num_ldb_queues,
            args.num_ldb_ports,
            args.num_dir_ports,
            args.num_hist_list_entries
        );
        Ok(id)
    }

    // =========================================================================
    // Load-balanced queue
    // =========================================================================

    fn validate_create_ldb_queue(&self, id: DomainId, args: &CreateLdbQueueArgs) -> DlbResult<()> {
        let domain = self.unstarted_domain(id)?;

        if domain.avail_ldb_queues.is_empty() {
            return Err(DlbError::LdbQueuesUnavailable);
        }

        let ordered = args.num_sequence_numbers > 0;
        if ordered && !self.sn_groups.has_slot(args.num_sequence_numbers) {
            return Err(DlbError::SequenceNumbersUnavailable);
        }
        if args.num_qid_inflights > MAX_QID_INFLIGHTS
            || (ordered && args.num_qid_inflights > args.num_sequence_numbers)
        {
            return Err(DlbError::InvalidQidInflightAllocation);
        }
        if args.num_atomic_inflights > domain.avail_aqed_entries {
            return Err(DlbError::AtomicInflightsUnavailable);
        }
        if lock_id_comp_code(args.lock_id_comp_level).is_none() {
            return Err(DlbError::InvalidLockIdCompLevel);
        }
        Ok(())
    }

    /// Configure one of the domain's attached load-balanced queues
    pub fn create_ldb_queue(&mut self, id: DomainId, args: &CreateLdbQueueArgs) -> DlbResult<QueueId> {
        rejected("ldb queue", id, self.validate_create_ldb_queue(id, args))?;

        let sn = if args.num_sequence_numbers > 0 {
            let (group, slot) = self
                .sn_groups
                .alloc_slot(args.num_sequence_numbers)
                .map_err(|_| COMMIT_FAILED)?;
            let mode = self.sn_groups.group(group).ok_or(COMMIT_FAILED)?.mode();
            Some(SnAssignment { group, slot, mode })
        } else {
            None
        };

        let domain = &mut self.domains[id as usize];
        if domain.avail_ldb_queues.is_empty() {
            return Err(COMMIT_FAILED);
        }
        let qid = domain.avail_ldb_queues.remove(0);
        domain.avail_aqed_entries -= args.num_atomic_inflights;
        domain.used_ldb_queues.push(qid);

        let queue = &mut self.ldb_queues[qid as usize];
        queue.aqed_limit = args.num_atomic_inflights;
        queue.sn_slot = sn.map(|s| (s.group, s.slot));
        queue.configured = true;

        self.configurator().configure_ldb_queue(id, qid, args, sn);
        Ok(qid)
    }

    // =========================================================================
    // Load-balanced port
    // =========================================================================

    fn validate_create_ldb_port(&self, id: DomainId, args: &CreateLdbPortArgs) -> DlbResult<usize> {
        let domain = self.unstarted_domain(id)?;

        let cos = domain
            .avail_ldb_ports
            .iter()
            .position(|l| !l.is_empty())
            .ok_or(DlbError::LdbPortsUnavailable)?;

        validate_cq_depth(args.cq_depth)?;
        if args.cq_history_list_size == 0 || args.cq_history_list_size > domain.hist_list_remaining() {
            return Err(DlbError::InvalidHistListDepth);
        }
        validate_cq_address(args.cq_base_address)?;
        Ok(cos)
    }

    /// Configure one of the domain's attached load-balanced ports, returning
    /// `(port, cos)`
    pub fn create_ldb_port(&mut self, id: DomainId, args: &CreateLdbPortArgs) -> DlbResult<(PortId, u32)> {
        let cos = rejected("ldb port", id, self.validate_create_ldb_port(id, args))?;

        let domain = &mut self.domains[id as usize];
        if domain.avail_ldb_ports[cos].is_empty() {
            return Err(COMMIT_FAILED);
        }
        let port_id = domain.avail_ldb_ports[cos].remove(0);
        let base = domain.hist_list_base + domain.hist_list_offset;
        let limit = base + args.cq_history_list_size - 1;
        domain.hist_list_offset += args.cq_history_list_size;
        domain.used_ldb_ports[cos].push(port_id);

        let port = &mut self.ldb_ports[port_id as usize];
        port.cq_depth = args.cq_depth;
        port.hist_list_base = base;
        port.hist_list_limit = limit;
        port.configured = true;
        port.enabled = true;

        self.configurator()
            .configure_ldb_port(id, port_id, args, base, limit);
        Ok((port_id, cos as u32))
    }

    // =========================================================================
    // Directed pairs
    // =========================================================================

    /// Pair for a new queue (or port) half: a fresh one when `peer` is the
    /// sentinel, else a used pair whose other half is configured
    fn select_dir_pair(
        &self,
        domain: &Domain,
        peer: u32,
        other_half_configured: impl Fn(&DirPqPair) -> bool,
        this_half_configured: impl Fn(&DirPqPair) -> bool,
        invalid: DlbError,
    ) -> DlbResult<PortId> {
        if peer == DLB_UNASSIGNED_ID {
            return domain
                .avail_dir_pq_pairs
                .first()
                .copied()
                .ok_or(DlbError::DirPortsUnavailable);
        }

        if !domain.used_dir_pq_pairs.contains(&peer) {
            return Err(invalid);
        }
        let pair = &self.dir_pq_pairs[peer as usize];
        if !other_half_configured(pair) || this_half_configured(pair) {
            return Err(invalid);
        }
        Ok(peer)
    }

    /// Move a fresh pair from the domain's available list to its used list
    fn promote_dir_pair(&mut self, id: DomainId, pair: PortId) {
        let domain = &mut self.domains[id as usize];
        if let Some(pos) = domain.avail_dir_pq_pairs.iter().position(|&p| p == pair) {
            domain.avail_dir_pq_pairs.remove(pos);
            domain.used_dir_pq_pairs.push(pair);
        }
    }

    /// Configure the queue half of a directed pair
    pub fn create_dir_queue(&mut self, id: DomainId, args: &CreateDirQueueArgs) -> DlbResult<QueueId> {
        let validated = self.unstarted_domain(id).and_then(|domain| {
            self.select_dir_pair(
                domain,
                args.port_id,
                |p| p.port_configured,
                |p| p.queue_configured,
                DlbError::InvalidPortId,
            )
        });
        let qid = rejected("dir queue", id, validated)?;

        self.promote_dir_pair(id, qid);
        self.dir_pq_pairs[qid as usize].queue_configured = true;
        self.configurator()
            .configure_dir_queue(id, qid, args.depth_threshold);
        Ok(qid)
    }

    /// Configure the port half of a directed pair
    pub fn create_dir_port(&mut self, id: DomainId, args: &CreateDirPortArgs) -> DlbResult<PortId> {
        let validated = self.unstarted_domain(id).and_then(|domain| {
            let port = self.select_dir_pair(
                domain,
                args.queue_id,
                |p| p.queue_configured,
                |p| p.port_configured,
                DlbError::InvalidQid,
            )?;
            validate_cq_depth(args.cq_depth)?;
            validate_cq_address(args.cq_base_address)?;
            Ok(port)
        });
        let port_id = rejected("dir port", id, validated)?;

        self.promote_dir_pair(id, port_id);
        let pair = &mut self.dir_pq_pairs[port_id as usize];
        pair.port_configured = true;
        pair.enabled = true;
        pair.cq_depth = args.cq_depth;

        self.configurator().configure_dir_port(id, port_id, args);
        Ok(port_id)
    }
}

//! # Domain Drain and Reset
//!
//! Tearing down a domain that may still carry traffic:
//!
//! ```text
//!   Started
//!     │ revoke enqueue permission on every queue
//!   WritePermRevoked
//!     │ toggle-drain each LDB CQ until mapped queues are empty, then once more
//!   LdbDrained
//!     │ disable LDB CQs, poll until directed queues are empty, disable DIR CQs
//!   DirDrained
//!     │ verify every queue is empty
//!   Verified
//!     │ ports, then queues, then domain credits to power-on values
//!   RegistersReset
//!     │ every resource back to the pool
//!   Unconfigured
//! ```
//!
//! Polling is bounded by [`DlbConfig::max_drain_loops`]. Running out of loops
//! or finding a non-empty queue afterwards is an internal fault; the domain is
//! left as it was at that point.
//!
//! [`DlbConfig::max_drain_loops`]: crate::config::DlbConfig::max_drain_loops

use alloc::vec::Vec;

use dlb_hal::regs::RegFamily;
use dlb_hal::{CsrBus, Delay};

use crate::device::DlbHw;
use crate::error::{DlbError, DlbResult, FaultKind};
use crate::{DomainId, PortId, QueueId};

/// Progress of a domain reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStage {
    /// Traffic may still be flowing
    Started,
    /// No new enqueues accepted
    WritePermRevoked,
    /// Mapped load-balanced queues empty
    LdbDrained,
    /// Directed queues empty, every CQ disabled
    DirDrained,
    /// Every queue confirmed empty
    Verified,
    /// Registers at power-on values
    RegistersReset,
    /// Resources returned, domain free
    Unconfigured,
}

/// Configured members of a domain
#[derive(Debug)]
struct Members {
    ldb_queues: Vec<QueueId>,
    ldb_ports: Vec<PortId>,
    dir_queues: Vec<QueueId>,
    dir_ports: Vec<PortId>,
}

impl<B: CsrBus, D: Delay> DlbHw<B, D> {
    fn members(&self, id: DomainId) -> DlbResult<Members> {
        let domain = self.configured_domain(id)?;
        let pairs = &self.dir_pq_pairs;

        Ok(Members {
            ldb_queues: domain.used_ldb_queues.clone(),
            ldb_ports: domain.used_ldb_port_ids().collect(),
            dir_queues: domain
                .used_dir_pq_pairs
                .iter()
                .copied()
                .filter(|&p| pairs[p as usize].queue_configured)
                .collect(),
            dir_ports: domain
                .used_dir_pq_pairs
                .iter()
                .copied()
                .filter(|&p| pairs[p as usize].port_configured)
                .collect(),
        })
    }

    /// Complete every scheduled element and return every token of the CQs
    fn drain_ldb_cqs(&mut self, ports: &[PortId]) {
        for &port in ports {
            let inflights = self.ldb_cq_inflights(port);
            let tokens = self.bus.read_reg(RegFamily::LspCqLdbTknCnt, port);
            self.configurator().return_ldb_cq(port, inflights, tokens);
        }
    }

    /// Disable, drain and re-enable each CQ so the scheduler sees a fresh enable
    fn toggle_drain_ldb_cqs(&mut self, ports: &[PortId]) {
        for &port in ports {
            self.configurator().disable_ldb_cq(port);
            self.drain_ldb_cqs(&[port]);
            self.configurator().enable_ldb_cq(port);
        }
    }

    fn drain_dir_cqs(&mut self, ports: &[PortId]) {
        for &port in ports {
            let tokens = self.bus.read_reg(RegFamily::LspCqDirTknCnt, port);
            self.configurator().return_dir_cq(port, tokens);
        }
    }

    /// Run `drain` until `done` holds, waiting between attempts
    fn poll_drained(
        &mut self,
        mut drain: impl FnMut(&mut Self),
        done: impl Fn(&Self) -> bool,
    ) -> DlbResult<()> {
        for _ in 0..self.config.max_drain_loops {
            drain(self);
            if done(self) {
                return Ok(());
            }
            self.delay.delay_us(self.config.poll_delay_us);
        }
        Err(DlbError::Fault(FaultKind::DrainTimeout))
    }

    fn mapped_ldb_queues_empty(&self, queues: &[QueueId]) -> bool {
        queues
            .iter()
            .filter(|&&q| self.ldb_queues[q as usize].num_mappings > 0)
            .all(|&q| self.ldb_queue_depth(q) == 0)
    }

    fn dir_queues_empty(&self, queues: &[QueueId]) -> bool {
        queues.iter().all(|&q| self.dir_queue_depth(q) == 0)
    }

    fn drain_domain(&mut self, id: DomainId, m: &Members) -> DlbResult<()> {
        log::debug!("dlb: domain {} reset: {:?}", id, ResetStage::Started);
        let mut cfg = self.configurator();
        for &qid in &m.ldb_queues {
            cfg.set_ldb_write_perm(qid, false);
        }
        for &qid in &m.dir_queues {
            cfg.set_dir_write_perm(qid, false);
        }
        log::debug!("dlb: domain {} reset: {:?}", id, ResetStage::WritePermRevoked);

        self.toggle_drain_ldb_cqs(&m.ldb_ports);
        self.poll_drained(
            |hw| hw.toggle_drain_ldb_cqs(&m.ldb_ports),
            |hw| hw.mapped_ldb_queues_empty(&m.ldb_queues),
        )?;
        self.toggle_drain_ldb_cqs(&m.ldb_ports);
        log::debug!("dlb: domain {} reset: {:?}", id, ResetStage::LdbDrained);

        for &port in &m.ldb_ports {
            self.configurator().disable_ldb_cq(port);
        }
        self.poll_drained(
            |hw| hw.drain_dir_cqs(&m.dir_ports),
            |hw| hw.dir_queues_empty(&m.dir_queues),
        )?;
        for &port in &m.dir_ports {
            self.configurator().disable_dir_cq(port);
        }
        log::debug!("dlb: domain {} reset: {:?}", id, ResetStage::DirDrained);

        let ldb_empty = m.ldb_queues.iter().all(|&q| self.ldb_queue_depth(q) == 0);
        if !ldb_empty || !self.dir_queues_empty(&m.dir_queues) {
            return Err(DlbError::Fault(FaultKind::ResetVerifyFailed));
        }
        log::debug!("dlb: domain {} reset: {:?}", id, ResetStage::Verified);
        Ok(())
    }

    fn reset_registers(&mut self, id: DomainId, m: &Members) {
        let mut cfg = self.configurator();
        for &port in &m.ldb_ports {
            cfg.reset_ldb_port(port);
        }
        for &port in &m.dir_ports {
            cfg.reset_dir_port(port);
        }
        for &qid in &m.ldb_queues {
            cfg.reset_ldb_queue(qid);
        }
        for &qid in &m.dir_queues {
            cfg.reset_dir_queue(qid);
        }
        cfg.reset_domain_credits(id);
        log::debug!("dlb: domain {} reset: {:?}", id, ResetStage::RegistersReset);
    }

    /// Give every resource of domain `id` back to the pool and free the domain
    pub(crate) fn return_resources(&mut self, id: DomainId) -> DlbResult<()> {
        let domain = &self.domains[id as usize];
        let queues: Vec<QueueId> = domain
            .avail_ldb_queues
            .iter()
            .chain(domain.used_ldb_queues.iter())
            .copied()
            .collect();
        let ports: Vec<PortId> = domain.ldb_ports().collect();
        let pairs: Vec<PortId> = domain
            .avail_dir_pq_pairs
            .iter()
            .chain(domain.used_dir_pq_pairs.iter())
            .copied()
            .collect();

        for qid in queues {
            let queue = &mut self.ldb_queues[qid as usize];
            if let Some((group, slot)) = queue.sn_slot {
                self.sn_groups.free_slot(group, slot);
            }
            self.pool.return_ldb_queue(queue);
        }
        for port in ports {
            self.pool.return_ldb_port(&mut self.ldb_ports[port as usize])?;
        }
        for pair in pairs {
            self.pool.return_dir_pq_pair(&mut self.dir_pq_pairs[pair as usize]);
        }
        self.pool.return_scalars(&self.domains[id as usize])?;

        self.domains[id as usize].reset();
        self.pool.release_domain(id)
    }

    /// Drain domain `id`, reset its registers and return every resource to
    /// the pool
    pub fn reset_domain(&mut self, id: DomainId) -> DlbResult<()> {
        let members = self.members(id)?;
        log::info!(
            "dlb: resetting domain {} ({} ldb queues, {} ldb ports, {} dir queues, {} dir ports)",
            id,
            members.ldb_queues.len(),
            members.ldb_ports.len(),
            members.dir_queues.len(),
            members.dir_ports.len()
        );

        if let Err(e) = self.drain_domain(id, &members) {
            log::error!("dlb: domain {} drain failed: {}", id, e);
            return Err(e);
        }
        self.reset_registers(id, &members);
        self.return_resources(id)?;

        log::info!("dlb: domain {} reset: {:?}", id, ResetStage::Unconfigured);
        Ok(())
    }
}

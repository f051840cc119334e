//! # QID Mapping
//!
//! Each load-balanced CQ has eight QID map slots. On a domain that has not
//! started, map and unmap take effect at once. On a started domain both run
//! as procedures that finish only once the hardware is quiet enough:
//!
//! ```text
//!                  map (started)               queue empty
//!   Unmapped ─────────────────────▶ MapInProgress ──────────▶ Mapped
//!      ▲                                                        │
//!      │ CQ inflights drained               unmap (started)     │
//!      └──────────────────────────── UnmapInProgress ◀──────────┘
//!                                        │    ▲
//!                 map, no free slot      ▼    │ unmap of the queued qid
//!                               UnmapInProgressPendingMap
//! ```
//!
//! A queued map runs as soon as its slot finishes unmapping.

use alloc::vec::Vec;

use dlb_hal::regs::{MAX_QID_PRIORITY, NUM_QIDS_PER_LDB_CQ};
use dlb_hal::{CsrBus, Delay};

use crate::args::{MapQidArgs, UnmapQidArgs};
use crate::device::DlbHw;
use crate::domain::Domain;
use crate::error::{DlbError, DlbResult, FaultKind};
use crate::resource::{QidMapState, QidSlot};
use crate::{DomainId, PortId, QueueId};

/// What a validated map request does to the port's slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapAction {
    /// Queue already (being) mapped: new priority
    SetPriority(usize),
    /// Queue queued behind an unmap: new pending priority
    SetPendingPriority(usize),
    /// Queue being unmapped from this slot: keep it mapped
    CancelUnmap(usize),
    /// Domain not started: map now
    Static(usize),
    /// Domain started: start a map procedure
    Dynamic(usize),
    /// No free slot: queue behind an unmap in progress
    Defer(usize),
}

/// What a validated unmap request does to the port's slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnmapAction {
    Static(usize),
    Dynamic(usize),
    CancelMap(usize),
    CancelPendingMap(usize),
}

fn decrement(counter: &mut u32) -> DlbResult<()> {
    *counter = counter
        .checked_sub(1)
        .ok_or(DlbError::Fault(FaultKind::StateCorrupted))?;
    Ok(())
}

impl<B: CsrBus, D: Delay> DlbHw<B, D> {
    /// Domain `id` with `port` and `qid` both configured in it
    fn mapping_target(&self, id: DomainId, port: PortId, qid: QueueId) -> DlbResult<&Domain> {
        let domain = self.configured_domain(id)?;
        if !domain.has_used_ldb_port(port) {
            return Err(DlbError::InvalidPortId);
        }
        if !domain.has_used_ldb_queue(qid) {
            return Err(DlbError::InvalidQid);
        }
        Ok(domain)
    }

    fn plan_map(&self, id: DomainId, args: &MapQidArgs) -> DlbResult<MapAction> {
        let started = self.mapping_target(id, args.port_id, args.qid)?.started;
        if args.priority > MAX_QID_PRIORITY {
            return Err(DlbError::InvalidPriority);
        }

        let port = &self.ldb_ports[args.port_id as usize];
        let qid = args.qid;

        if let Some(slot) = port
            .find_slot(qid, QidMapState::Mapped)
            .or_else(|| port.find_slot(qid, QidMapState::MapInProgress))
        {
            return Ok(MapAction::SetPriority(slot));
        }
        if let Some(slot) = port.qid_map.iter().position(|s| {
            s.state == QidMapState::UnmapInProgressPendingMap && s.pending_qid == qid
        }) {
            return Ok(MapAction::SetPendingPriority(slot));
        }
        if let Some(slot) = port.find_slot(qid, QidMapState::UnmapInProgress) {
            return Ok(MapAction::CancelUnmap(slot));
        }
        if let Some(slot) = port.free_slot() {
            return Ok(if started {
                MapAction::Dynamic(slot)
            } else {
                MapAction::Static(slot)
            });
        }

        port.qid_map
            .iter()
            .position(|s| s.state == QidMapState::UnmapInProgress)
            .map(MapAction::Defer)
            .ok_or(DlbError::NoQidSlotsAvailable)
    }

    fn plan_unmap(&self, id: DomainId, args: &UnmapQidArgs) -> DlbResult<UnmapAction> {
        let started = self.mapping_target(id, args.port_id, args.qid)?.started;
        let port = &self.ldb_ports[args.port_id as usize];
        let qid = args.qid;

        if let Some(slot) = port.find_slot(qid, QidMapState::Mapped) {
            return Ok(if started {
                UnmapAction::Dynamic(slot)
            } else {
                UnmapAction::Static(slot)
            });
        }
        if let Some(slot) = port.find_slot(qid, QidMapState::MapInProgress) {
            return Ok(UnmapAction::CancelMap(slot));
        }
        port.qid_map
            .iter()
            .position(|s| {
                s.state == QidMapState::UnmapInProgressPendingMap && s.pending_qid == qid
            })
            .map(UnmapAction::CancelPendingMap)
            .ok_or(DlbError::InvalidQid)
    }

    fn add_pending_addition(&mut self, id: DomainId, port: PortId, qid: QueueId) {
        self.ldb_ports[port as usize].num_pending_additions += 1;
        self.ldb_queues[qid as usize].num_pending_additions += 1;
        self.domains[id as usize].num_pending_additions += 1;
    }

    fn remove_pending_addition(&mut self, id: DomainId, port: PortId, qid: QueueId) -> DlbResult<()> {
        decrement(&mut self.ldb_ports[port as usize].num_pending_additions)?;
        decrement(&mut self.ldb_queues[qid as usize].num_pending_additions)?;
        decrement(&mut self.domains[id as usize].num_pending_additions)
    }

    /// Map a queue to a load-balanced port of domain `id`
    pub fn map_qid(&mut self, id: DomainId, args: &MapQidArgs) -> DlbResult<()> {
        let action = self.plan_map(id, args).map_err(|e| {
            log::debug!("dlb: domain {} map of qid {} rejected: {}", id, args.qid, e);
            e
        })?;
        let (port, qid, priority) = (args.port_id, args.qid, args.priority);
        let p = port as usize;

        match action {
            MapAction::SetPriority(slot) => {
                let entry = &mut self.ldb_ports[p].qid_map[slot];
                entry.priority = priority;
                if entry.state == QidMapState::Mapped {
                    self.configurator()
                        .write_qid_map(port, slot as u32, qid, priority);
                }
            }
            MapAction::SetPendingPriority(slot) => {
                self.ldb_ports[p].qid_map[slot].pending_priority = priority;
            }
            MapAction::CancelUnmap(slot) => {
                let entry = &mut self.ldb_ports[p].qid_map[slot];
                entry.state = QidMapState::Mapped;
                entry.priority = priority;
                decrement(&mut self.ldb_ports[p].num_pending_removals)?;
                decrement(&mut self.domains[id as usize].num_pending_removals)?;
                self.configurator()
                    .write_qid_map(port, slot as u32, qid, priority);
            }
            MapAction::Static(slot) => {
                self.ldb_ports[p].qid_map[slot] = QidSlot {
                    state: QidMapState::Mapped,
                    qid,
                    priority,
                    ..QidSlot::default()
                };
                self.ldb_ports[p].num_mappings += 1;
                self.ldb_queues[qid as usize].num_mappings += 1;
                self.configurator()
                    .write_qid_map(port, slot as u32, qid, priority);
            }
            MapAction::Dynamic(slot) => {
                self.ldb_ports[p].qid_map[slot] = QidSlot {
                    state: QidMapState::MapInProgress,
                    qid,
                    priority,
                    ..QidSlot::default()
                };
                self.add_pending_addition(id, port, qid);
                self.try_complete_map(id, port, slot)?;
            }
            MapAction::Defer(slot) => {
                let entry = &mut self.ldb_ports[p].qid_map[slot];
                entry.state = QidMapState::UnmapInProgressPendingMap;
                entry.pending_qid = qid;
                entry.pending_priority = priority;
                self.add_pending_addition(id, port, qid);
            }
        }

        log::debug!("dlb: domain {} qid {} -> port {} ({:?})", id, qid, port, action);
        Ok(())
    }

    /// Unmap a queue from a load-balanced port of domain `id`
    pub fn unmap_qid(&mut self, id: DomainId, args: &UnmapQidArgs) -> DlbResult<()> {
        let action = self.plan_unmap(id, args).map_err(|e| {
            log::debug!("dlb: domain {} unmap of qid {} rejected: {}", id, args.qid, e);
            e
        })?;
        let (port, qid) = (args.port_id, args.qid);
        let p = port as usize;

        match action {
            UnmapAction::Static(slot) => {
                self.configurator().clear_qid_map(port, slot as u32);
                self.ldb_ports[p].qid_map[slot] = QidSlot::default();
                decrement(&mut self.ldb_ports[p].num_mappings)?;
                decrement(&mut self.ldb_queues[qid as usize].num_mappings)?;
            }
            UnmapAction::Dynamic(slot) => {
                // Stop scheduling from the queue now; bookkeeping waits for the CQ
                self.configurator().clear_qid_map(port, slot as u32);
                self.ldb_ports[p].qid_map[slot].state = QidMapState::UnmapInProgress;
                self.ldb_ports[p].num_pending_removals += 1;
                self.domains[id as usize].num_pending_removals += 1;
                self.try_complete_unmap(id, port, slot)?;
            }
            UnmapAction::CancelMap(slot) => {
                self.ldb_ports[p].qid_map[slot] = QidSlot::default();
                self.remove_pending_addition(id, port, qid)?;
            }
            UnmapAction::CancelPendingMap(slot) => {
                let entry = &mut self.ldb_ports[p].qid_map[slot];
                entry.state = QidMapState::UnmapInProgress;
                entry.pending_qid = 0;
                entry.pending_priority = 0;
                self.remove_pending_addition(id, port, qid)?;
            }
        }

        log::debug!("dlb: domain {} qid {} -/- port {} ({:?})", id, qid, port, action);
        Ok(())
    }

    /// Finish a map procedure once its queue is empty
    fn try_complete_map(&mut self, id: DomainId, port: PortId, slot: usize) -> DlbResult<bool> {
        let entry = self.ldb_ports[port as usize].qid_map[slot];
        if entry.state != QidMapState::MapInProgress || self.ldb_queue_depth(entry.qid) != 0 {
            return Ok(false);
        }

        self.configurator()
            .write_qid_map(port, slot as u32, entry.qid, entry.priority);
        let ldb_port = &mut self.ldb_ports[port as usize];
        ldb_port.qid_map[slot].state = QidMapState::Mapped;
        ldb_port.num_mappings += 1;
        self.ldb_queues[entry.qid as usize].num_mappings += 1;
        self.remove_pending_addition(id, port, entry.qid)?;
        Ok(true)
    }

    /// Finish an unmap procedure once the CQ has no inflights, then run any
    /// map queued behind it
    fn try_complete_unmap(&mut self, id: DomainId, port: PortId, slot: usize) -> DlbResult<bool> {
        let entry = self.ldb_ports[port as usize].qid_map[slot];
        let unmapping = matches!(
            entry.state,
            QidMapState::UnmapInProgress | QidMapState::UnmapInProgressPendingMap
        );
        if !unmapping || self.ldb_cq_inflights(port) != 0 {
            return Ok(false);
        }

        let ldb_port = &mut self.ldb_ports[port as usize];
        decrement(&mut ldb_port.num_mappings)?;
        decrement(&mut ldb_port.num_pending_removals)?;
        decrement(&mut self.ldb_queues[entry.qid as usize].num_mappings)?;
        decrement(&mut self.domains[id as usize].num_pending_removals)?;

        if entry.state == QidMapState::UnmapInProgressPendingMap {
            self.ldb_ports[port as usize].qid_map[slot] = QidSlot {
                state: QidMapState::MapInProgress,
                qid: entry.pending_qid,
                priority: entry.pending_priority,
                ..QidSlot::default()
            };
            self.try_complete_map(id, port, slot)?;
        } else {
            self.ldb_ports[port as usize].qid_map[slot] = QidSlot::default();
        }
        Ok(true)
    }

    /// Retry every in-progress procedure of domain `id`, returning how many
    /// are still outstanding
    pub fn finish_pending(&mut self, id: DomainId) -> DlbResult<u32> {
        let ports: Vec<PortId> = self.configured_domain(id)?.used_ldb_port_ids().collect();

        for port in ports {
            for slot in 0..NUM_QIDS_PER_LDB_CQ as usize {
                match self.ldb_ports[port as usize].qid_map[slot].state {
                    QidMapState::UnmapInProgress | QidMapState::UnmapInProgressPendingMap => {
                        self.try_complete_unmap(id, port, slot)?;
                    }
                    QidMapState::MapInProgress => {
                        self.try_complete_map(id, port, slot)?;
                    }
                    QidMapState::Unmapped | QidMapState::Mapped => {}
                }
            }
        }

        let domain = &self.domains[id as usize];
        Ok(domain.num_pending_additions + domain.num_pending_removals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{CreateLdbQueueArgs, CreateSchedDomainArgs};
    use crate::test_util::{ldb_port_args, small_domain, TestDevice};
    use dlb_hal::regs::{self, HcwCmd, RegFamily};

    struct Fixture {
        dev: TestDevice,
        id: DomainId,
        queues: Vec<QueueId>,
        ports: Vec<PortId>,
    }

    fn fixture(num_queues: u32) -> Fixture {
        let mut dev = TestDevice::new();
        let args = CreateSchedDomainArgs {
            num_ldb_queues: num_queues,
            ..small_domain()
        };
        let id = dev.hw.create_sched_domain(&args).unwrap();
        let queues = (0..num_queues)
            .map(|_| dev.hw.create_ldb_queue(id, &CreateLdbQueueArgs::default()).unwrap())
            .collect();
        let ports = (0..2)
            .map(|_| dev.hw.create_ldb_port(id, &ldb_port_args(8)).unwrap().0)
            .collect();
        Fixture { dev, id, queues, ports }
    }

    fn map(f: &mut Fixture, port: PortId, qid: QueueId, priority: u32) -> DlbResult<()> {
        f.dev.hw.map_qid(f.id, &MapQidArgs { port_id: port, qid, priority })
    }

    fn unmap(f: &mut Fixture, port: PortId, qid: QueueId) -> DlbResult<()> {
        f.dev.hw.unmap_qid(f.id, &UnmapQidArgs { port_id: port, qid })
    }

    fn hw_slot(f: &Fixture, port: PortId, slot: u32) -> Option<(u32, u32)> {
        regs::decode_cq2qid(f.dev.sim.reg(regs::cq2qid(port, slot)))
    }

    fn complete_all(f: &Fixture, port: PortId) {
        let inflight = f.dev.sim.ldb_inflight(port);
        let mut bus = f.dev.sim.bus();
        bus.write_reg(
            RegFamily::SysLdbPpHcw,
            port,
            regs::encode_hcw(HcwCmd::COMPLETION | HcwCmd::TOKEN_RETURN, inflight),
        );
    }

    #[test]
    fn test_map_validation() {
        let mut f = fixture(2);
        let (q, p) = (f.queues[0], f.ports[0]);

        assert_eq!(map(&mut f, 63, q, 0), Err(DlbError::InvalidPortId));
        assert_eq!(map(&mut f, p, 31, 0), Err(DlbError::InvalidQid));
        assert_eq!(map(&mut f, p, q, 8), Err(DlbError::InvalidPriority));
        assert_eq!(unmap(&mut f, p, q), Err(DlbError::InvalidQid));
        assert_eq!(
            f.dev.hw.map_qid(9, &MapQidArgs { port_id: p, qid: q, priority: 0 }),
            Err(DlbError::DomainNotConfigured)
        );
        assert_eq!(f.dev.hw.ldb_ports[p as usize].qid_map, [QidSlot::default(); 8]);
    }

    #[test]
    fn test_static_map_and_unmap() {
        let mut f = fixture(2);
        let (q, p) = (f.queues[1], f.ports[0]);

        map(&mut f, p, q, 2).unwrap();
        assert_eq!(hw_slot(&f, p, 0), Some((q, 2)));
        assert_eq!(f.dev.hw.ldb_ports[p as usize].num_mappings, 1);
        assert_eq!(f.dev.hw.ldb_queues[q as usize].num_mappings, 1);

        // Mapping again only changes priority
        map(&mut f, p, q, 5).unwrap();
        assert_eq!(hw_slot(&f, p, 0), Some((q, 5)));
        assert_eq!(f.dev.hw.ldb_ports[p as usize].num_mappings, 1);

        unmap(&mut f, p, q).unwrap();
        assert_eq!(hw_slot(&f, p, 0), None);
        assert_eq!(f.dev.hw.ldb_queues[q as usize].num_mappings, 0);
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(0));
    }

    #[test]
    fn test_slots_run_out() {
        let mut f = fixture(9);
        let p = f.ports[0];
        let queues = f.queues.clone();

        for &q in &queues[..8] {
            map(&mut f, p, q, 0).unwrap();
        }
        assert_eq!(map(&mut f, p, queues[8], 0), Err(DlbError::NoQidSlotsAvailable));
        assert_eq!(f.dev.hw.ldb_ports[p as usize].mapped_qids().count(), 8);
    }

    #[test]
    fn test_dynamic_map_waits_for_empty_queue() {
        let mut f = fixture(2);
        let (q, a, b) = (f.queues[0], f.ports[0], f.ports[1]);
        map(&mut f, a, q, 0).unwrap();
        f.dev.hw.start_domain(f.id).unwrap();
        f.dev.sim.enqueue_ldb(q, 5);

        map(&mut f, b, q, 1).unwrap();
        let slot = f.dev.hw.ldb_ports[b as usize].qid_map[0];
        assert_eq!(slot.state, QidMapState::MapInProgress);
        assert_eq!(hw_slot(&f, b, 0), None);
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(1));

        // Port a takes everything
        f.dev.sim.tick();
        assert_eq!(f.dev.sim.ldb_depth(q), 0);
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(0));
        assert_eq!(hw_slot(&f, b, 0), Some((q, 1)));
        assert_eq!(f.dev.hw.ldb_queues[q as usize].num_mappings, 2);
        assert_eq!(f.dev.hw.ldb_queues[q as usize].num_pending_additions, 0);
    }

    #[test]
    fn test_dynamic_map_of_empty_queue_completes_at_once() {
        let mut f = fixture(2);
        let (q, p) = (f.queues[0], f.ports[0]);
        f.dev.hw.start_domain(f.id).unwrap();

        map(&mut f, p, q, 0).unwrap();
        assert_eq!(f.dev.hw.ldb_ports[p as usize].qid_map[0].state, QidMapState::Mapped);
        assert_eq!(f.dev.hw.domains[f.id as usize].num_pending_additions, 0);
    }

    #[test]
    fn test_unmap_cancels_map_in_progress() {
        let mut f = fixture(2);
        let (q, a, b) = (f.queues[0], f.ports[0], f.ports[1]);
        map(&mut f, a, q, 0).unwrap();
        f.dev.hw.start_domain(f.id).unwrap();
        f.dev.sim.enqueue_ldb(q, 1);
        map(&mut f, b, q, 0).unwrap();

        unmap(&mut f, b, q).unwrap();
        assert_eq!(f.dev.hw.ldb_ports[b as usize].qid_map[0], QidSlot::default());
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(0));
    }

    #[test]
    fn test_dynamic_unmap_waits_for_cq() {
        let mut f = fixture(2);
        let (q, p) = (f.queues[0], f.ports[0]);
        map(&mut f, p, q, 0).unwrap();
        f.dev.hw.start_domain(f.id).unwrap();
        f.dev.sim.enqueue_ldb(q, 3);
        f.dev.sim.tick();
        assert_eq!(f.dev.sim.ldb_inflight(p), 3);

        unmap(&mut f, p, q).unwrap();
        assert_eq!(hw_slot(&f, p, 0), None);
        assert_eq!(
            f.dev.hw.ldb_ports[p as usize].qid_map[0].state,
            QidMapState::UnmapInProgress
        );
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(1));
        assert_eq!(unmap(&mut f, p, q), Err(DlbError::InvalidQid));

        complete_all(&f, p);
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(0));
        assert_eq!(f.dev.hw.ldb_ports[p as usize].qid_map[0], QidSlot::default());
        assert_eq!(f.dev.hw.ldb_queues[q as usize].num_mappings, 0);
    }

    #[test]
    fn test_remap_during_unmap_keeps_mapping() {
        let mut f = fixture(2);
        let (q, p) = (f.queues[0], f.ports[0]);
        map(&mut f, p, q, 0).unwrap();
        f.dev.hw.start_domain(f.id).unwrap();
        f.dev.sim.enqueue_ldb(q, 2);
        f.dev.sim.tick();
        unmap(&mut f, p, q).unwrap();

        map(&mut f, p, q, 4).unwrap();
        assert_eq!(f.dev.hw.ldb_ports[p as usize].qid_map[0].state, QidMapState::Mapped);
        assert_eq!(hw_slot(&f, p, 0), Some((q, 4)));
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(0));
        assert_eq!(f.dev.hw.ldb_queues[q as usize].num_mappings, 1);
    }

    #[test]
    fn test_map_queues_behind_unmap_when_slots_full() {
        let mut f = fixture(9);
        let p = f.ports[0];
        let queues = f.queues.clone();
        for &q in &queues[..8] {
            map(&mut f, p, q, 0).unwrap();
        }
        f.dev.hw.start_domain(f.id).unwrap();
        f.dev.sim.enqueue_ldb(queues[0], 2);
        f.dev.sim.tick();

        unmap(&mut f, p, queues[0]).unwrap();
        map(&mut f, p, queues[8], 1).unwrap();
        map(&mut f, p, queues[8], 3).unwrap();

        let slot = f.dev.hw.ldb_ports[p as usize].qid_map[0];
        assert_eq!(slot.state, QidMapState::UnmapInProgressPendingMap);
        assert_eq!((slot.pending_qid, slot.pending_priority), (queues[8], 3));
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(2));

        complete_all(&f, p);
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(0));
        let slot = f.dev.hw.ldb_ports[p as usize].qid_map[0];
        assert!(slot.holds(queues[8], QidMapState::Mapped));
        assert_eq!(hw_slot(&f, p, 0), Some((queues[8], 3)));
        assert_eq!(f.dev.hw.ldb_queues[queues[0] as usize].num_mappings, 0);
        assert_eq!(f.dev.hw.ldb_queues[queues[8] as usize].num_mappings, 1);
    }

    #[test]
    fn test_unmap_of_queued_map_reverts_slot() {
        let mut f = fixture(9);
        let p = f.ports[0];
        let queues = f.queues.clone();
        for &q in &queues[..8] {
            map(&mut f, p, q, 0).unwrap();
        }
        f.dev.hw.start_domain(f.id).unwrap();
        f.dev.sim.enqueue_ldb(queues[3], 1);
        f.dev.sim.tick();

        unmap(&mut f, p, queues[3]).unwrap();
        map(&mut f, p, queues[8], 0).unwrap();
        unmap(&mut f, p, queues[8]).unwrap();

        let slot = f.dev.hw.ldb_ports[p as usize].qid_map[3];
        assert_eq!(slot.state, QidMapState::UnmapInProgress);
        assert_eq!(f.dev.hw.ldb_queues[queues[8] as usize].num_pending_additions, 0);
        assert_eq!(f.dev.hw.finish_pending(f.id), Ok(1));
    }
}

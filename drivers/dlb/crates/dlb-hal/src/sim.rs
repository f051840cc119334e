//! # Register File Simulator
//!
//! A software model of the DLB CSR space for host-side testing.
//!
//! The model keeps every written register in a sparse map and emulates the
//! pieces of the device the drain/reset protocol observes:
//!
//! - queue depths, grown by [`SimDevice::enqueue_ldb`] / [`SimDevice::enqueue_dir`]
//!   only while the queue's write permission is set
//! - per-CQ inflight and token counters, decremented by doorbell writes
//! - a toy scheduler that moves elements from queues into enabled CQs each
//!   time the paired [`SimDelay`] is asked to wait
//!
//! ```text
//!   enqueue ──▶ queue depth ──(tick, CQ enabled, QID mapped)──▶ CQ tokens
//!                                                                   │
//!   doorbell (COMPLETION / TOKEN_RETURN) ◀──────────────────────────┘
//! ```

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::delay::Delay;
use crate::mmio::CsrBus;
use crate::regs::{self, CqControl, HcwCmd, RegFamily, NUM_QIDS_PER_LDB_CQ, VALID};

// =============================================================================
// STATE
// =============================================================================

struct SimState {
    /// Written registers
    regs: BTreeMap<u32, u32>,
    /// LDB queue depths
    ldb_depth: Vec<u32>,
    /// DIR queue depths
    dir_depth: Vec<u32>,
    /// LDB CQ inflight counts
    ldb_infl: Vec<u32>,
    /// LDB CQ token counts
    ldb_tkn: Vec<u32>,
    /// DIR CQ token counts
    dir_tkn: Vec<u32>,
    /// Scheduler stopped
    frozen: bool,
    /// Scheduler invocations
    ticks: u64,
    /// Every register write, in order
    writes: Vec<(u32, u32)>,
}

impl SimState {
    fn reg(&self, offset: u32) -> u32 {
        if let Some(value) = self.regs.get(&offset) {
            return *value;
        }
        RegFamily::decode(offset)
            .map(|(family, _)| family.power_on_value())
            .unwrap_or(0)
    }

    fn read(&self, offset: u32) -> u32 {
        let Some((family, index)) = RegFamily::decode(offset) else {
            return self.reg(offset);
        };
        let counter = |v: &Vec<u32>| v.get(index as usize).copied().unwrap_or(0);
        match family {
            RegFamily::LspQidLdbEnqueueCnt => counter(&self.ldb_depth),
            RegFamily::LspQidDirEnqueueCnt => counter(&self.dir_depth),
            RegFamily::LspCqLdbInflCnt => counter(&self.ldb_infl),
            RegFamily::LspCqLdbTknCnt => counter(&self.ldb_tkn),
            RegFamily::LspCqDirTknCnt => counter(&self.dir_tkn),
            _ => self.reg(offset),
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.writes.push((offset, value));

        match RegFamily::decode(offset) {
            Some((RegFamily::SysLdbPpHcw, port)) => {
                let (cmd, count) = regs::decode_hcw(value);
                if cmd.contains(HcwCmd::COMPLETION) {
                    saturating_take(&mut self.ldb_infl, port, count);
                }
                if cmd.contains(HcwCmd::TOKEN_RETURN) {
                    saturating_take(&mut self.ldb_tkn, port, count);
                }
            }
            Some((RegFamily::SysDirPpHcw, port)) => {
                let (cmd, count) = regs::decode_hcw(value);
                if cmd.contains(HcwCmd::TOKEN_RETURN) {
                    saturating_take(&mut self.dir_tkn, port, count);
                }
            }
            Some((family, _)) if !family.is_writable() => {}
            _ => {
                self.regs.insert(offset, value);
            }
        }
    }

    fn cq_enabled(&self, family: RegFamily, port: u32) -> bool {
        !CqControl::from_bits_truncate(self.reg(family.offset(port))).contains(CqControl::DISABLED)
    }

    fn schedule(&mut self) {
        self.ticks += 1;
        if self.frozen {
            return;
        }

        for port in 0..self.ldb_tkn.len() as u32 {
            if !self.cq_enabled(RegFamily::LspCqLdbDsbl, port) {
                continue;
            }
            let limit = self.reg(RegFamily::ChpLdbCqDepth.offset(port));
            for slot in 0..NUM_QIDS_PER_LDB_CQ {
                let Some((qid, _)) = regs::decode_cq2qid(self.reg(regs::cq2qid(port, slot))) else {
                    continue;
                };
                let (p, q) = (port as usize, qid as usize);
                if q >= self.ldb_depth.len() {
                    continue;
                }
                while self.ldb_depth[q] > 0 && self.ldb_tkn[p] < limit {
                    self.ldb_depth[q] -= 1;
                    self.ldb_infl[p] += 1;
                    self.ldb_tkn[p] += 1;
                }
            }
        }

        for port in 0..self.dir_tkn.len() as u32 {
            if !self.cq_enabled(RegFamily::LspCqDirDsbl, port) {
                continue;
            }
            let limit = self.reg(RegFamily::ChpDirCqDepth.offset(port));
            let p = port as usize;
            while self.dir_depth[p] > 0 && self.dir_tkn[p] < limit {
                self.dir_depth[p] -= 1;
                self.dir_tkn[p] += 1;
            }
        }
    }
}

fn saturating_take(counters: &mut [u32], index: u32, count: u32) {
    if let Some(c) = counters.get_mut(index as usize) {
        *c = c.saturating_sub(count);
    }
}

// =============================================================================
// SIM DEVICE
// =============================================================================

/// Shared handle to a simulated device
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl core::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimDevice")
            .field("regs", &state.regs.len())
            .field("ticks", &state.ticks)
            .field("frozen", &state.frozen)
            .finish()
    }
}

impl SimDevice {
    /// Create a device with the given resource counts (DIR queues pair 1:1
    /// with DIR ports)
    pub fn new(num_ldb_queues: u32, num_ldb_ports: u32, num_dir_ports: u32) -> Self {
        let state = SimState {
            regs: BTreeMap::new(),
            ldb_depth: vec![0; num_ldb_queues as usize],
            dir_depth: vec![0; num_dir_ports as usize],
            ldb_infl: vec![0; num_ldb_ports as usize],
            ldb_tkn: vec![0; num_ldb_ports as usize],
            dir_tkn: vec![0; num_dir_ports as usize],
            frozen: false,
            ticks: 0,
            writes: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Register access handle
    pub fn bus(&self) -> SimBus {
        SimBus {
            state: Arc::clone(&self.state),
        }
    }

    /// Delay handle; every wait runs one scheduler pass
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: Arc::clone(&self.state),
        }
    }

    /// Enqueue `count` elements to an LDB queue, returning how many were
    /// accepted (zero without write permission)
    pub fn enqueue_ldb(&self, qid: u32, count: u32) -> u32 {
        let mut state = self.state.lock();
        if state.reg(RegFamily::SysLdbVasqidV.offset(qid)) & VALID == 0 {
            return 0;
        }
        match state.ldb_depth.get_mut(qid as usize) {
            Some(depth) => {
                *depth += count;
                count
            }
            None => 0,
        }
    }

    /// Enqueue `count` elements to a DIR queue
    pub fn enqueue_dir(&self, qid: u32, count: u32) -> u32 {
        let mut state = self.state.lock();
        if state.reg(RegFamily::SysDirVasqidV.offset(qid)) & VALID == 0 {
            return 0;
        }
        match state.dir_depth.get_mut(qid as usize) {
            Some(depth) => {
                *depth += count;
                count
            }
            None => 0,
        }
    }

    /// Current register value as software would read it
    pub fn reg(&self, offset: u32) -> u32 {
        self.state.lock().read(offset)
    }

    /// LDB queue depth
    pub fn ldb_depth(&self, qid: u32) -> u32 {
        self.reg(RegFamily::LspQidLdbEnqueueCnt.offset(qid))
    }

    /// DIR queue depth
    pub fn dir_depth(&self, qid: u32) -> u32 {
        self.reg(RegFamily::LspQidDirEnqueueCnt.offset(qid))
    }

    /// LDB CQ inflight count
    pub fn ldb_inflight(&self, port: u32) -> u32 {
        self.reg(RegFamily::LspCqLdbInflCnt.offset(port))
    }

    /// LDB CQ token count
    pub fn ldb_tokens(&self, port: u32) -> u32 {
        self.reg(RegFamily::LspCqLdbTknCnt.offset(port))
    }

    /// DIR CQ token count
    pub fn dir_tokens(&self, port: u32) -> u32 {
        self.reg(RegFamily::LspCqDirTknCnt.offset(port))
    }

    /// Stop or resume the scheduler
    pub fn set_frozen(&self, frozen: bool) {
        self.state.lock().frozen = frozen;
    }

    /// Run one scheduler pass
    pub fn tick(&self) {
        self.state.lock().schedule();
    }

    /// Scheduler passes so far
    pub fn ticks(&self) -> u64 {
        self.state.lock().ticks
    }

    /// Every register write since the last [`clear_write_log`](Self::clear_write_log)
    pub fn write_log(&self) -> Vec<(u32, u32)> {
        self.state.lock().writes.clone()
    }

    /// Forget recorded writes
    pub fn clear_write_log(&self) {
        self.state.lock().writes.clear();
    }
}

// =============================================================================
// BUS / DELAY HANDLES
// =============================================================================

/// [`CsrBus`] view of a [`SimDevice`]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl core::fmt::Debug for SimBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SimBus")
    }
}

impl CsrBus for SimBus {
    fn read32(&self, offset: u32) -> u32 {
        self.state.lock().read(offset)
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.state.lock().write(offset, value);
    }
}

/// [`Delay`] view of a [`SimDevice`]
pub struct SimDelay {
    state: Arc<Mutex<SimState>>,
}

impl core::fmt::Debug for SimDelay {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SimDelay")
    }
}

impl Delay for SimDelay {
    fn delay_us(&mut self, _us: u32) {
        self.state.lock().schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(bus: &mut SimBus, port: u32, slot: u32, qid: u32) {
        bus.write32(regs::cq2qid(port, slot), regs::encode_cq2qid(qid, 0));
    }

    #[test]
    fn test_enqueue_requires_write_permission() {
        let sim = SimDevice::new(4, 4, 4);
        let mut bus = sim.bus();

        assert_eq!(sim.enqueue_ldb(1, 5), 0);
        bus.write_reg(RegFamily::SysLdbVasqidV, 1, VALID);
        assert_eq!(sim.enqueue_ldb(1, 5), 5);
        assert_eq!(sim.ldb_depth(1), 5);
    }

    #[test]
    fn test_scheduler_respects_cq_enable_and_depth() {
        let sim = SimDevice::new(4, 4, 4);
        let mut bus = sim.bus();
        let mut delay = sim.delay();

        bus.write_reg(RegFamily::SysLdbVasqidV, 2, VALID);
        sim.enqueue_ldb(2, 10);
        bus.write_reg(RegFamily::ChpLdbCqDepth, 0, 4);
        map(&mut bus, 0, 0, 2);

        // CQ disabled at power-on
        delay.delay_us(1);
        assert_eq!(sim.ldb_tokens(0), 0);

        bus.write_reg(RegFamily::LspCqLdbDsbl, 0, 0);
        delay.delay_us(1);
        assert_eq!(sim.ldb_tokens(0), 4);
        assert_eq!(sim.ldb_inflight(0), 4);
        assert_eq!(sim.ldb_depth(2), 6);

        bus.write_reg(
            RegFamily::SysLdbPpHcw,
            0,
            regs::encode_hcw(HcwCmd::COMPLETION | HcwCmd::TOKEN_RETURN, 4),
        );
        assert_eq!(sim.ldb_tokens(0), 0);
        assert_eq!(sim.ldb_inflight(0), 0);
        assert_eq!(sim.ticks(), 2);
    }

    #[test]
    fn test_frozen_scheduler_and_dir_path() {
        let sim = SimDevice::new(1, 1, 2);
        let mut bus = sim.bus();

        bus.write_reg(RegFamily::SysDirVasqidV, 1, VALID);
        bus.write_reg(RegFamily::ChpDirCqDepth, 1, 8);
        bus.write_reg(RegFamily::LspCqDirDsbl, 1, 0);
        sim.enqueue_dir(1, 3);

        sim.set_frozen(true);
        sim.tick();
        assert_eq!(sim.dir_depth(1), 3);

        sim.set_frozen(false);
        sim.tick();
        assert_eq!(sim.dir_depth(1), 0);
        assert_eq!(sim.dir_tokens(1), 3);
    }

    #[test]
    fn test_write_log_and_read_only_registers() {
        let sim = SimDevice::new(2, 2, 2);
        let mut bus = sim.bus();

        bus.write_reg(RegFamily::LspQidLdbEnqueueCnt, 0, 99);
        assert_eq!(sim.ldb_depth(0), 0);
        assert_eq!(sim.write_log().len(), 1);
        sim.clear_write_log();
        assert!(sim.write_log().is_empty());
        assert_eq!(bus.read_reg(RegFamily::LspCqLdbDsbl, 1), 1);
    }
}

//! # Register Programming
//!
//! Write-side register sequences for attached resources. Nothing here
//! validates; callers have already checked every argument.

use dlb_hal::regs::{self, CqControl, HcwCmd, RegFamily, NUM_QIDS_PER_LDB_CQ, VALID};
use dlb_hal::CsrBus;

use crate::args::{CreateDirPortArgs, CreateLdbPortArgs, CreateLdbQueueArgs};
use crate::{DomainId, PortId, QueueId};

/// Hardware code of a lock-id compression level
pub const fn lock_id_comp_code(level: u32) -> Option<u32> {
    match level {
        0 | 65536 => Some(0),
        64 => Some(1),
        128 => Some(2),
        256 => Some(3),
        512 => Some(4),
        1024 => Some(5),
        2048 => Some(6),
        4096 => Some(7),
        _ => None,
    }
}

/// Sequence-number assignment of an ordered queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnAssignment {
    /// Group id
    pub group: u32,
    /// Slot within the group
    pub slot: u32,
    /// Group mode
    pub mode: u32,
}

/// Register programmer over a CSR bus
#[derive(Debug)]
pub struct Configurator<'a, B: CsrBus> {
    bus: &'a mut B,
}

impl<'a, B: CsrBus> Configurator<'a, B> {
    /// Wrap a bus
    pub fn new(bus: &'a mut B) -> Self {
        Self { bus }
    }

    // =========================================================================
    // Domain
    // =========================================================================

    /// Program the domain's credit allocation
    pub fn configure_domain_credits(&mut self, domain: DomainId, ldb: u32, dir: u32) {
        self.bus.write_reg(RegFamily::ChpCfgLdbVasCrd, domain, ldb);
        self.bus.write_reg(RegFamily::ChpCfgDirVasCrd, domain, dir);
    }

    /// Clear the domain's credit allocation
    pub fn reset_domain_credits(&mut self, domain: DomainId) {
        self.bus.reset_reg(RegFamily::ChpCfgLdbVasCrd, domain);
        self.bus.reset_reg(RegFamily::ChpCfgDirVasCrd, domain);
    }

    // =========================================================================
    // Load-balanced queues
    // =========================================================================

    /// Program a load-balanced queue
    pub fn configure_ldb_queue(
        &mut self,
        domain: DomainId,
        qid: QueueId,
        args: &CreateLdbQueueArgs,
        sn: Option<SnAssignment>,
    ) {
        let hid_width = lock_id_comp_code(args.lock_id_comp_level).unwrap_or(0);

        self.bus.write_reg(RegFamily::SysLdbQid2Vas, qid, domain);
        self.bus
            .write_reg(RegFamily::LspQidAqedActiveLim, qid, args.num_atomic_inflights);
        self.bus
            .write_reg(RegFamily::LspQidLdbInflLim, qid, args.num_qid_inflights);
        self.bus.write_reg(RegFamily::AqedQidHidWidth, qid, hid_width);
        self.bus
            .write_reg(RegFamily::LspQidLdbDepthThrsh, qid, args.depth_threshold);
        if let Some(sn) = sn {
            self.bus.write_reg(
                RegFamily::ChpOrdQidSnMap,
                qid,
                regs::encode_sn_map(sn.group, sn.slot, sn.mode),
            );
        }
        self.bus.write_reg(RegFamily::SysLdbQidV, qid, VALID);

        log::debug!("dlb: domain {} ldb queue {} configured", domain, qid);
    }

    /// Return a load-balanced queue's registers to power-on values
    pub fn reset_ldb_queue(&mut self, qid: QueueId) {
        for family in [
            RegFamily::SysLdbVasqidV,
            RegFamily::SysLdbQidV,
            RegFamily::LspQidAqedActiveLim,
            RegFamily::LspQidLdbInflLim,
            RegFamily::AqedQidHidWidth,
            RegFamily::ChpOrdQidSnMap,
            RegFamily::LspQidLdbDepthThrsh,
            RegFamily::SysLdbQid2Vas,
        ] {
            self.bus.reset_reg(family, qid);
        }
    }

    /// Grant or revoke enqueue permission
    pub fn set_ldb_write_perm(&mut self, qid: QueueId, allowed: bool) {
        self.bus
            .write_reg(RegFamily::SysLdbVasqidV, qid, if allowed { VALID } else { 0 });
    }

    // =========================================================================
    // Load-balanced ports
    // =========================================================================

    /// Program a load-balanced port and enable its CQ
    pub fn configure_ldb_port(
        &mut self,
        domain: DomainId,
        port: PortId,
        args: &CreateLdbPortArgs,
        hist_list_base: u32,
        hist_list_limit: u32,
    ) {
        let (lo, hi) = regs::split_addr(args.cq_base_address);

        self.bus.write_reg(RegFamily::SysLdbCqAddrL, port, lo);
        self.bus.write_reg(RegFamily::SysLdbCqAddrU, port, hi);
        self.bus.write_reg(RegFamily::ChpLdbCqDepth, port, args.cq_depth);
        self.bus
            .write_reg(RegFamily::ChpLdbCqIntDepthThrsh, port, args.cq_depth_threshold);
        self.bus.write_reg(RegFamily::ChpHistListBase, port, hist_list_base);
        self.bus.write_reg(RegFamily::ChpHistListLim, port, hist_list_limit);
        self.bus.write_reg(RegFamily::SysLdbPp2Vas, port, domain);
        self.bus.write_reg(RegFamily::SysLdbPpV, port, VALID);
        self.enable_ldb_cq(port);

        log::debug!(
            "dlb: domain {} ldb port {} configured (depth {}, hist list {}..={})",
            domain,
            port,
            args.cq_depth,
            hist_list_base,
            hist_list_limit
        );
    }

    /// Return a load-balanced port's registers to power-on values
    pub fn reset_ldb_port(&mut self, port: PortId) {
        for slot in 0..NUM_QIDS_PER_LDB_CQ {
            self.clear_qid_map(port, slot);
        }
        for family in [
            RegFamily::SysLdbPpV,
            RegFamily::SysLdbPp2Vas,
            RegFamily::SysLdbCqAddrL,
            RegFamily::SysLdbCqAddrU,
            RegFamily::ChpLdbCqDepth,
            RegFamily::ChpLdbCqIntDepthThrsh,
            RegFamily::ChpHistListBase,
            RegFamily::ChpHistListLim,
            RegFamily::LspCqLdbDsbl,
        ] {
            self.bus.reset_reg(family, port);
        }
    }

    /// Allow scheduling to the CQ
    pub fn enable_ldb_cq(&mut self, port: PortId) {
        self.bus
            .write_reg(RegFamily::LspCqLdbDsbl, port, CqControl::empty().bits());
    }

    /// Stop scheduling to the CQ
    pub fn disable_ldb_cq(&mut self, port: PortId) {
        self.bus
            .write_reg(RegFamily::LspCqLdbDsbl, port, CqControl::DISABLED.bits());
    }

    /// Complete `inflights` elements and return `tokens` CQ tokens on `port`
    pub fn return_ldb_cq(&mut self, port: PortId, inflights: u32, tokens: u32) {
        if inflights > 0 {
            self.bus.write_reg(
                RegFamily::SysLdbPpHcw,
                port,
                regs::encode_hcw(HcwCmd::COMPLETION, inflights),
            );
        }
        if tokens > 0 {
            self.bus.write_reg(
                RegFamily::SysLdbPpHcw,
                port,
                regs::encode_hcw(HcwCmd::TOKEN_RETURN, tokens),
            );
        }
    }

    /// Program QID map slot `slot` of `port`
    pub fn write_qid_map(&mut self, port: PortId, slot: u32, qid: QueueId, priority: u32) {
        self.bus
            .write32(regs::cq2qid(port, slot), regs::encode_cq2qid(qid, priority));
    }

    /// Invalidate QID map slot `slot` of `port`
    pub fn clear_qid_map(&mut self, port: PortId, slot: u32) {
        self.bus.write32(regs::cq2qid(port, slot), 0);
    }

    // =========================================================================
    // Directed pairs
    // =========================================================================

    /// Program the queue half of a directed pair
    pub fn configure_dir_queue(&mut self, domain: DomainId, qid: QueueId, depth_threshold: u32) {
        self.bus.write_reg(RegFamily::SysDirQid2Vas, qid, domain);
        self.bus
            .write_reg(RegFamily::LspQidDirDepthThrsh, qid, depth_threshold);
        self.bus.write_reg(RegFamily::SysDirQidV, qid, VALID);

        log::debug!("dlb: domain {} dir queue {} configured", domain, qid);
    }

    /// Return the queue half's registers to power-on values
    pub fn reset_dir_queue(&mut self, qid: QueueId) {
        for family in [
            RegFamily::SysDirVasqidV,
            RegFamily::SysDirQidV,
            RegFamily::LspQidDirDepthThrsh,
            RegFamily::SysDirQid2Vas,
        ] {
            self.bus.reset_reg(family, qid);
        }
    }

    /// Grant or revoke enqueue permission
    pub fn set_dir_write_perm(&mut self, qid: QueueId, allowed: bool) {
        self.bus
            .write_reg(RegFamily::SysDirVasqidV, qid, if allowed { VALID } else { 0 });
    }

    /// Program the port half of a directed pair and enable its CQ
    pub fn configure_dir_port(&mut self, domain: DomainId, port: PortId, args: &CreateDirPortArgs) {
        let (lo, hi) = regs::split_addr(args.cq_base_address);

        self.bus.write_reg(RegFamily::SysDirCqAddrL, port, lo);
        self.bus.write_reg(RegFamily::SysDirCqAddrU, port, hi);
        self.bus.write_reg(RegFamily::ChpDirCqDepth, port, args.cq_depth);
        self.bus
            .write_reg(RegFamily::ChpDirCqIntDepthThrsh, port, args.cq_depth_threshold);
        self.bus.write_reg(RegFamily::SysDirPp2Vas, port, domain);
        self.bus.write_reg(RegFamily::SysDirPpV, port, VALID);
        self.enable_dir_cq(port);

        log::debug!("dlb: domain {} dir port {} configured", domain, port);
    }

    /// Return the port half's registers to power-on values
    pub fn reset_dir_port(&mut self, port: PortId) {
        for family in [
            RegFamily::SysDirPpV,
            RegFamily::SysDirPp2Vas,
            RegFamily::SysDirCqAddrL,
            RegFamily::SysDirCqAddrU,
            RegFamily::ChpDirCqDepth,
            RegFamily::ChpDirCqIntDepthThrsh,
            RegFamily::LspCqDirDsbl,
        ] {
            self.bus.reset_reg(family, port);
        }
    }

    /// Allow scheduling to the CQ
    pub fn enable_dir_cq(&mut self, port: PortId) {
        self.bus
            .write_reg(RegFamily::LspCqDirDsbl, port, CqControl::empty().bits());
    }

    /// Stop scheduling to the CQ
    pub fn disable_dir_cq(&mut self, port: PortId) {
        self.bus
            .write_reg(RegFamily::LspCqDirDsbl, port, CqControl::DISABLED.bits());
    }

    /// Return `tokens` CQ tokens on `port`
    pub fn return_dir_cq(&mut self, port: PortId, tokens: u32) {
        if tokens > 0 {
            self.bus.write_reg(
                RegFamily::SysDirPpHcw,
                port,
                regs::encode_hcw(HcwCmd::TOKEN_RETURN, tokens),
            );
        }
    }

    // =========================================================================
    // Sequence-number groups
    // =========================================================================

    /// Program a group's mode
    pub fn set_sn_group_mode(&mut self, group: u32, mode: u32) {
        self.bus.write_reg(RegFamily::RoGrpSnMode, group, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlb_hal::sim::SimDevice;

    #[test]
    fn test_lock_id_codes() {
        assert_eq!(lock_id_comp_code(0), Some(0));
        assert_eq!(lock_id_comp_code(65536), Some(0));
        assert_eq!(lock_id_comp_code(64), Some(1));
        assert_eq!(lock_id_comp_code(4096), Some(7));
        assert_eq!(lock_id_comp_code(32), None);
        assert_eq!(lock_id_comp_code(8192), None);
    }

    #[test]
    fn test_ldb_port_programming_and_reset() {
        let sim = SimDevice::new(4, 4, 4);
        let mut bus = sim.bus();
        let mut cfg = Configurator::new(&mut bus);

        let args = CreateLdbPortArgs {
            cq_depth: 8,
            cq_depth_threshold: 1,
            cq_history_list_size: 8,
            cq_base_address: 0x1_2345_6740,
        };
        cfg.configure_ldb_port(2, 3, &args, 16, 23);
        cfg.write_qid_map(3, 5, 1, 4);

        assert_eq!(sim.reg(RegFamily::SysLdbCqAddrL.offset(3)), 0x2345_6740);
        assert_eq!(sim.reg(RegFamily::SysLdbCqAddrU.offset(3)), 0x1);
        assert_eq!(sim.reg(RegFamily::ChpHistListLim.offset(3)), 23);
        assert_eq!(sim.reg(RegFamily::SysLdbPp2Vas.offset(3)), 2);
        assert_eq!(sim.reg(RegFamily::LspCqLdbDsbl.offset(3)), 0);
        assert_eq!(regs::decode_cq2qid(sim.reg(regs::cq2qid(3, 5))), Some((1, 4)));

        cfg.reset_ldb_port(3);
        assert_eq!(sim.reg(RegFamily::SysLdbCqAddrL.offset(3)), 0);
        assert_eq!(sim.reg(RegFamily::LspCqLdbDsbl.offset(3)), 1);
        assert_eq!(regs::decode_cq2qid(sim.reg(regs::cq2qid(3, 5))), None);
    }

    #[test]
    fn test_ordered_queue_programming() {
        let sim = SimDevice::new(4, 4, 4);
        let mut bus = sim.bus();
        let mut cfg = Configurator::new(&mut bus);

        let args = CreateLdbQueueArgs {
            num_sequence_numbers: 128,
            num_qid_inflights: 64,
            num_atomic_inflights: 32,
            lock_id_comp_level: 256,
            depth_threshold: 10,
        };
        let sn = SnAssignment {
            group: 1,
            slot: 2,
            mode: 1,
        };
        cfg.configure_ldb_queue(0, 3, &args, Some(sn));

        assert_eq!(sim.reg(RegFamily::AqedQidHidWidth.offset(3)), 3);
        assert_eq!(sim.reg(RegFamily::ChpOrdQidSnMap.offset(3)), regs::encode_sn_map(1, 2, 1));
        assert_eq!(sim.reg(RegFamily::SysLdbQidV.offset(3)), VALID);
        // Enqueue permission is only granted at domain start
        assert_eq!(sim.enqueue_ldb(3, 1), 0);

        cfg.set_ldb_write_perm(3, true);
        assert_eq!(sim.enqueue_ldb(3, 1), 1);
        cfg.reset_ldb_queue(3);
        assert_eq!(sim.reg(RegFamily::SysLdbVasqidV.offset(3)), 0);
        assert_eq!(sim.reg(RegFamily::ChpOrdQidSnMap.offset(3)), 0);
    }

    #[test]
    fn test_cq_return_doorbells() {
        let sim = SimDevice::new(1, 2, 2);
        let mut bus = sim.bus();
        let mut cfg = Configurator::new(&mut bus);

        cfg.return_ldb_cq(1, 0, 0);
        cfg.return_dir_cq(1, 0);
        assert!(sim.write_log().is_empty());

        cfg.return_ldb_cq(1, 3, 2);
        cfg.return_dir_cq(0, 5);
        assert_eq!(
            sim.write_log(),
            [
                (RegFamily::SysLdbPpHcw.offset(1), HcwCmd::COMPLETION.bits() | 3),
                (RegFamily::SysLdbPpHcw.offset(1), HcwCmd::TOKEN_RETURN.bits() | 2),
                (RegFamily::SysDirPpHcw.offset(0), HcwCmd::TOKEN_RETURN.bits() | 5),
            ]
        );
    }
}

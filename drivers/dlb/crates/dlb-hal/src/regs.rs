//! # DLB Register Map
//!
//! Control/status register (CSR) offsets and field layouts.
//!
//! Every register family occupies its own 4 KiB window above [`CSR_BASE`]
//! and is indexed by a resource id (queue, port, domain or group). The QID
//! map family is indexed by `port * NUM_QIDS_PER_LDB_CQ + slot`.
//!
//! ```text
//!   CSR_BASE + family * 0x1000 + index * 4
//!   ├──────────────────────────┤ ├─────────┤
//!        register family           entry
//! ```

use static_assertions::const_assert;

// =============================================================================
// LAYOUT
// =============================================================================

/// Base of the register families in the CSR BAR
pub const CSR_BASE: u32 = 0x0010_0000;

/// Size of one register family window
pub const FAMILY_WINDOW: u32 = 0x1000;

/// Distance between two entries of a family
pub const ENTRY_STRIDE: u32 = 4;

/// Maximum entries per family
pub const MAX_FAMILY_ENTRIES: u32 = FAMILY_WINDOW / ENTRY_STRIDE;

/// QID map slots per load-balanced CQ
pub const NUM_QIDS_PER_LDB_CQ: u32 = 8;

/// Highest valid QID map priority
pub const MAX_QID_PRIORITY: u32 = 7;

// 64 ports x 8 slots must fit in one window
const_assert!(64 * NUM_QIDS_PER_LDB_CQ <= MAX_FAMILY_ENTRIES);

// =============================================================================
// REGISTER FAMILIES
// =============================================================================

/// Register families, in window order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum RegFamily {
    /// Per-queue enqueue (write) permission, LDB
    SysLdbVasqidV         = 0,
    /// Per-queue enqueue (write) permission, DIR
    SysDirVasqidV         = 1,
    /// LDB queue valid
    SysLdbQidV            = 2,
    /// DIR queue valid
    SysDirQidV            = 3,
    /// LDB queue depth (read only)
    LspQidLdbEnqueueCnt   = 4,
    /// DIR queue depth (read only)
    LspQidDirEnqueueCnt   = 5,
    /// LDB queue atomic-inflight limit
    LspQidAqedActiveLim   = 6,
    /// LDB queue inflight limit
    LspQidLdbInflLim      = 7,
    /// LDB queue lock-id compression code
    AqedQidHidWidth       = 8,
    /// LDB queue sequence-number group/slot assignment
    ChpOrdQidSnMap        = 9,
    /// LDB queue depth threshold
    LspQidLdbDepthThrsh   = 10,
    /// DIR queue depth threshold
    LspQidDirDepthThrsh   = 11,
    /// LDB CQ disable
    LspCqLdbDsbl          = 12,
    /// DIR CQ disable
    LspCqDirDsbl          = 13,
    /// LDB CQ inflight count (read only)
    LspCqLdbInflCnt       = 14,
    /// LDB CQ token count (read only)
    LspCqLdbTknCnt        = 15,
    /// DIR CQ token count (read only)
    LspCqDirTknCnt        = 16,
    /// LDB CQ base address, low half
    SysLdbCqAddrL         = 17,
    /// LDB CQ base address, high half
    SysLdbCqAddrU         = 18,
    /// DIR CQ base address, low half
    SysDirCqAddrL         = 19,
    /// DIR CQ base address, high half
    SysDirCqAddrU         = 20,
    /// LDB CQ depth
    ChpLdbCqDepth         = 21,
    /// DIR CQ depth
    ChpDirCqDepth         = 22,
    /// LDB CQ history list base
    ChpHistListBase       = 23,
    /// LDB CQ history list limit
    ChpHistListLim        = 24,
    /// LDB producer port to domain
    SysLdbPp2Vas          = 25,
    /// DIR producer port to domain
    SysDirPp2Vas          = 26,
    /// LDB producer port valid
    SysLdbPpV             = 27,
    /// DIR producer port valid
    SysDirPpV             = 28,
    /// LDB CQ to QID map slot
    LspCq2Qid             = 29,
    /// LDB producer port doorbell (write only)
    SysLdbPpHcw           = 30,
    /// DIR producer port doorbell (write only)
    SysDirPpHcw           = 31,
    /// Domain LDB credit allocation
    ChpCfgLdbVasCrd       = 32,
    /// Domain DIR credit allocation
    ChpCfgDirVasCrd       = 33,
    /// Sequence-number group mode
    RoGrpSnMode           = 34,
    /// LDB CQ interrupt depth threshold
    ChpLdbCqIntDepthThrsh = 35,
    /// DIR CQ interrupt depth threshold
    ChpDirCqIntDepthThrsh = 36,
    /// LDB queue to domain
    SysLdbQid2Vas         = 37,
    /// DIR queue to domain
    SysDirQid2Vas         = 38,
}

impl RegFamily {
    /// Every family, indexed by discriminant
    pub const ALL: [RegFamily; 39] = [
        RegFamily::SysLdbVasqidV,
        RegFamily::SysDirVasqidV,
        RegFamily::SysLdbQidV,
        RegFamily::SysDirQidV,
        RegFamily::LspQidLdbEnqueueCnt,
        RegFamily::LspQidDirEnqueueCnt,
        RegFamily::LspQidAqedActiveLim,
        RegFamily::LspQidLdbInflLim,
        RegFamily::AqedQidHidWidth,
        RegFamily::ChpOrdQidSnMap,
        RegFamily::LspQidLdbDepthThrsh,
        RegFamily::LspQidDirDepthThrsh,
        RegFamily::LspCqLdbDsbl,
        RegFamily::LspCqDirDsbl,
        RegFamily::LspCqLdbInflCnt,
        RegFamily::LspCqLdbTknCnt,
        RegFamily::LspCqDirTknCnt,
        RegFamily::SysLdbCqAddrL,
        RegFamily::SysLdbCqAddrU,
        RegFamily::SysDirCqAddrL,
        RegFamily::SysDirCqAddrU,
        RegFamily::ChpLdbCqDepth,
        RegFamily::ChpDirCqDepth,
        RegFamily::ChpHistListBase,
        RegFamily::ChpHistListLim,
        RegFamily::SysLdbPp2Vas,
        RegFamily::SysDirPp2Vas,
        RegFamily::SysLdbPpV,
        RegFamily::SysDirPpV,
        RegFamily::LspCq2Qid,
        RegFamily::SysLdbPpHcw,
        RegFamily::SysDirPpHcw,
        RegFamily::ChpCfgLdbVasCrd,
        RegFamily::ChpCfgDirVasCrd,
        RegFamily::RoGrpSnMode,
        RegFamily::ChpLdbCqIntDepthThrsh,
        RegFamily::ChpDirCqIntDepthThrsh,
        RegFamily::SysLdbQid2Vas,
        RegFamily::SysDirQid2Vas,
    ];

    /// Offset of entry `index` of this family
    pub const fn offset(self, index: u32) -> u32 {
        CSR_BASE + (self as u32) * FAMILY_WINDOW + index * ENTRY_STRIDE
    }

    /// Value the register holds after power-on or reset
    pub const fn power_on_value(self) -> u32 {
        match self {
            RegFamily::LspCqLdbDsbl | RegFamily::LspCqDirDsbl => CqControl::DISABLED.bits(),
            _ => 0,
        }
    }

    /// Whether software may write this family
    pub const fn is_writable(self) -> bool {
        !matches!(
            self,
            RegFamily::LspQidLdbEnqueueCnt
                | RegFamily::LspQidDirEnqueueCnt
                | RegFamily::LspCqLdbInflCnt
                | RegFamily::LspCqLdbTknCnt
                | RegFamily::LspCqDirTknCnt
        )
    }

    /// Decode an offset back into `(family, index)`
    pub fn decode(offset: u32) -> Option<(RegFamily, u32)> {
        if offset < CSR_BASE || offset % ENTRY_STRIDE != 0 {
            return None;
        }
        let rel = offset - CSR_BASE;
        let family = Self::ALL.get((rel / FAMILY_WINDOW) as usize).copied()?;
        Some((family, (rel % FAMILY_WINDOW) / ENTRY_STRIDE))
    }
}

const_assert!(RegFamily::ALL.len() == RegFamily::SysDirQid2Vas as usize + 1);

// =============================================================================
// FIELD LAYOUTS
// =============================================================================

/// Value written to `*_V` registers to mark an entry valid
pub const VALID: u32 = 1;

bitflags::bitflags! {
    /// CQ disable register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CqControl: u32 {
        /// CQ will not be scheduled to
        const DISABLED = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Command bits of a producer-port doorbell write
    ///
    /// The low 16 bits carry the count the command applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HcwCmd: u32 {
        /// Complete `count` scheduled elements
        const COMPLETION   = 1 << 16;
        /// Return `count` CQ tokens
        const TOKEN_RETURN = 1 << 17;
    }
}

/// Count field of a doorbell write
pub const HCW_COUNT_MASK: u32 = 0xFFFF;

/// Build a doorbell value
pub const fn encode_hcw(cmd: HcwCmd, count: u32) -> u32 {
    cmd.bits() | (count & HCW_COUNT_MASK)
}

/// Split a doorbell value into command and count
pub const fn decode_hcw(value: u32) -> (HcwCmd, u32) {
    (HcwCmd::from_bits_truncate(value), value & HCW_COUNT_MASK)
}

bitflags::bitflags! {
    /// Flag bits of a CQ-to-QID map slot
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QidMapEntry: u32 {
        /// Slot holds a live mapping
        const VALID = 1 << 31;
    }
}

const CQ2QID_QID_MASK: u32 = 0xFF;
const CQ2QID_PRIO_SHIFT: u32 = 8;
const CQ2QID_PRIO_MASK: u32 = 0x7;

/// Offset of one QID map slot of a load-balanced CQ
pub const fn cq2qid(port: u32, slot: u32) -> u32 {
    RegFamily::LspCq2Qid.offset(port * NUM_QIDS_PER_LDB_CQ + slot)
}

/// Encode a valid QID map slot
pub const fn encode_cq2qid(qid: u32, priority: u32) -> u32 {
    QidMapEntry::VALID.bits()
        | ((priority & CQ2QID_PRIO_MASK) << CQ2QID_PRIO_SHIFT)
        | (qid & CQ2QID_QID_MASK)
}

/// Decode a QID map slot into `(qid, priority)` if valid
pub const fn decode_cq2qid(value: u32) -> Option<(u32, u32)> {
    if value & QidMapEntry::VALID.bits() == 0 {
        return None;
    }
    Some((
        value & CQ2QID_QID_MASK,
        (value >> CQ2QID_PRIO_SHIFT) & CQ2QID_PRIO_MASK,
    ))
}

/// Encode a queue's sequence-number assignment
pub const fn encode_sn_map(group: u32, slot: u32, mode: u32) -> u32 {
    (group << 8) | (slot << 3) | (mode & 0x7)
}

/// Split a CQ base address into `(low, high)` register values
pub const fn split_addr(addr: u64) -> (u32, u32) {
    (addr as u32, (addr >> 32) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_decode() {
        let off = RegFamily::LspCqLdbInflCnt.offset(17);
        assert_eq!(RegFamily::decode(off), Some((RegFamily::LspCqLdbInflCnt, 17)));
        assert_eq!(RegFamily::decode(CSR_BASE - 4), None);
        assert_eq!(RegFamily::decode(CSR_BASE + 2), None);
        assert_eq!(RegFamily::decode(RegFamily::SysDirQid2Vas.offset(0) + FAMILY_WINDOW), None);
    }

    #[test]
    fn test_power_on_values() {
        assert_eq!(RegFamily::LspCqLdbDsbl.power_on_value(), 1);
        assert_eq!(RegFamily::LspCqDirDsbl.power_on_value(), 1);
        assert_eq!(RegFamily::ChpHistListBase.power_on_value(), 0);
        assert!(!RegFamily::LspQidLdbEnqueueCnt.is_writable());
        assert!(RegFamily::LspCq2Qid.is_writable());
    }

    #[test]
    fn test_hcw_encoding() {
        let v = encode_hcw(HcwCmd::COMPLETION | HcwCmd::TOKEN_RETURN, 12);
        let (cmd, count) = decode_hcw(v);
        assert!(cmd.contains(HcwCmd::COMPLETION));
        assert!(cmd.contains(HcwCmd::TOKEN_RETURN));
        assert_eq!(count, 12);
    }

    #[test]
    fn test_cq2qid_encoding() {
        assert_eq!(decode_cq2qid(encode_cq2qid(31, 5)), Some((31, 5)));
        assert_eq!(decode_cq2qid(0), None);
        assert_eq!(cq2qid(1, 0), cq2qid(0, 7) + ENTRY_STRIDE);
    }
}

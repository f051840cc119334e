//! # DLB Error Handling
//!
//! Errors fall into two disjoint classes:
//!
//! | Class | Detected | Side effects | Retry |
//! |-------|----------|--------------|-------|
//! | Validation | read-only check before any mutation | none | caller may retry with corrected input |
//! | Fault | commit phase, drain loop, post-drain verify | domain possibly half torn down | never; device is degraded |
//!
//! Every validation error carries a stable status code reported to the
//! request layer through [`CmdResponse`](crate::args::CmdResponse).

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// DLB Result type alias
pub type DlbResult<T> = core::result::Result<T, DlbError>;

// =============================================================================
// FAULT KIND
// =============================================================================

/// Internal fault classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// A commit step failed after validation passed
    CommitFailed,
    /// A drain loop exhausted its iteration bound
    DrainTimeout,
    /// A queue still reported elements after draining
    ResetVerifyFailed,
    /// Software bookkeeping disagrees with itself
    StateCorrupted,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommitFailed => write!(f, "commit failed after validation"),
            Self::DrainTimeout => write!(f, "drain loop bound exhausted"),
            Self::ResetVerifyFailed => write!(f, "queue not empty after drain"),
            Self::StateCorrupted => write!(f, "resource bookkeeping corrupted"),
        }
    }
}

// =============================================================================
// ERROR ENUM
// =============================================================================

/// DLB unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DlbError {
    // =========================================================================
    // Resource availability
    // =========================================================================
    /// No free scheduling domain
    DomainUnavailable,
    /// Not enough load-balanced queues
    LdbQueuesUnavailable,
    /// Not enough load-balanced ports
    LdbPortsUnavailable,
    /// Not enough directed port/queue pairs
    DirPortsUnavailable,
    /// Not enough load-balanced credits
    LdbCreditsUnavailable,
    /// Not enough directed credits
    DirCreditsUnavailable,
    /// Not enough atomic-inflight entries
    AtomicInflightsUnavailable,
    /// No contiguous history-list range of the requested width
    HistListEntriesUnavailable,
    /// No sequence-number group slot of the requested width
    SequenceNumbersUnavailable,

    // =========================================================================
    // Argument validation
    // =========================================================================
    /// Load-balanced queues requested without any load-balanced port
    LdbPortRequiredForLdbQueues,
    /// QID inflight limit out of range
    InvalidQidInflightAllocation,
    /// Unsupported lock-id compression level
    InvalidLockIdCompLevel,
    /// CQ depth not a power of two in range
    InvalidCqDepth,
    /// History list size zero or larger than the domain's remainder
    InvalidHistListDepth,
    /// CQ base address zero or misaligned
    InvalidCqVirtAddr,
    /// Domain id out of range or not in use
    InvalidDomainId,
    /// Domain has not been created
    DomainNotConfigured,
    /// Domain already started
    DomainStarted,
    /// Port id does not name a suitable port of the domain
    InvalidPortId,
    /// Queue id does not name a suitable queue of the domain
    InvalidQid,
    /// QID map priority out of range
    InvalidPriority,
    /// All QID map slots of the port are occupied
    NoQidSlotsAvailable,
    /// Domain has not been started
    DomainNotStarted,
    /// Sequence-number group id out of range
    InvalidSnGroupId,
    /// Unsupported sequence numbers per queue
    InvalidSequenceNumberWidth,
    /// Sequence-number group has occupied slots
    SnGroupInUse,
    /// Device configuration rejected
    InvalidConfig,

    // =========================================================================
    // Internal faults
    // =========================================================================
    /// Driver/hardware desync or caller misuse; not retryable
    Fault(FaultKind),
}

/// Status code of a successful command
pub const STATUS_SUCCESS: u32 = 0;

/// Status code reported for any internal fault
pub const STATUS_INTERNAL_FAULT: u32 = 0xFF;

impl DlbError {
    /// Wire status code
    pub const fn status(&self) -> u32 {
        match self {
            Self::DomainUnavailable => 1,
            Self::LdbQueuesUnavailable => 2,
            Self::LdbPortsUnavailable => 3,
            Self::DirPortsUnavailable => 4,
            Self::LdbCreditsUnavailable => 5,
            Self::DirCreditsUnavailable => 6,
            Self::AtomicInflightsUnavailable => 7,
            Self::HistListEntriesUnavailable => 8,
            Self::SequenceNumbersUnavailable => 9,
            Self::LdbPortRequiredForLdbQueues => 10,
            Self::InvalidQidInflightAllocation => 11,
            Self::InvalidLockIdCompLevel => 12,
            Self::InvalidCqDepth => 13,
            Self::InvalidHistListDepth => 14,
            Self::InvalidCqVirtAddr => 15,
            Self::InvalidDomainId => 16,
            Self::DomainNotConfigured => 17,
            Self::DomainStarted => 18,
            Self::InvalidPortId => 19,
            Self::InvalidQid => 20,
            Self::InvalidPriority => 21,
            Self::NoQidSlotsAvailable => 22,
            Self::DomainNotStarted => 23,
            Self::InvalidSnGroupId => 24,
            Self::InvalidSequenceNumberWidth => 25,
            Self::SnGroupInUse => 26,
            Self::InvalidConfig => 27,
            Self::Fault(_) => STATUS_INTERNAL_FAULT,
        }
    }

    /// Internal fault (not a validation error)
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    /// Fault classification, if any
    pub const fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::Fault(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl From<FaultKind> for DlbError {
    fn from(kind: FaultKind) -> Self {
        DlbError::Fault(kind)
    }
}

impl fmt::Display for DlbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Availability
            Self::DomainUnavailable => write!(f, "no scheduling domain available"),
            Self::LdbQueuesUnavailable => write!(f, "not enough load-balanced queues"),
            Self::LdbPortsUnavailable => write!(f, "not enough load-balanced ports"),
            Self::DirPortsUnavailable => write!(f, "not enough directed ports"),
            Self::LdbCreditsUnavailable => write!(f, "not enough load-balanced credits"),
            Self::DirCreditsUnavailable => write!(f, "not enough directed credits"),
            Self::AtomicInflightsUnavailable => write!(f, "not enough atomic inflights"),
            Self::HistListEntriesUnavailable => write!(f, "no contiguous history list range"),
            Self::SequenceNumbersUnavailable => write!(f, "no sequence number slot available"),

            // Arguments
            Self::LdbPortRequiredForLdbQueues => {
                write!(f, "load-balanced queues require a load-balanced port")
            }
            Self::InvalidQidInflightAllocation => write!(f, "invalid QID inflight allocation"),
            Self::InvalidLockIdCompLevel => write!(f, "invalid lock id compression level"),
            Self::InvalidCqDepth => write!(f, "invalid CQ depth"),
            Self::InvalidHistListDepth => write!(f, "invalid history list depth"),
            Self::InvalidCqVirtAddr => write!(f, "invalid CQ address"),
            Self::InvalidDomainId => write!(f, "invalid domain id"),
            Self::DomainNotConfigured => write!(f, "domain not configured"),
            Self::DomainStarted => write!(f, "domain already started"),
            Self::InvalidPortId => write!(f, "invalid port id"),
            Self::InvalidQid => write!(f, "invalid queue id"),
            Self::InvalidPriority => write!(f, "invalid QID map priority"),
            Self::NoQidSlotsAvailable => write!(f, "no QID map slot available"),
            Self::DomainNotStarted => write!(f, "domain not started"),
            Self::InvalidSnGroupId => write!(f, "invalid sequence number group"),
            Self::InvalidSequenceNumberWidth => write!(f, "invalid sequence numbers per queue"),
            Self::SnGroupInUse => write!(f, "sequence number group in use"),
            Self::InvalidConfig => write!(f, "invalid device configuration"),

            // Faults
            Self::Fault(kind) => write!(f, "internal fault: {}", kind),
        }
    }
}

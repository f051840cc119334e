//! # Device Configuration
//!
//! Resource inventory and drain policy of one DLB device.

use static_assertions::const_assert;

use crate::error::{DlbError, DlbResult};

// ============================================================================
// Hardware Limits
// ============================================================================

/// Maximum scheduling domains
pub const MAX_DOMAINS: u32 = 32;

/// Maximum load-balanced queues (QID map slots carry an 8-bit queue id)
pub const MAX_LDB_QUEUES: u32 = 128;

/// Maximum load-balanced ports
pub const MAX_LDB_PORTS: u32 = 64;

/// Maximum directed port/queue pairs
pub const MAX_DIR_PORTS: u32 = 128;

/// Maximum classes of service
pub const MAX_COS: usize = 4;

/// Maximum sequence-number groups
pub const MAX_SN_GROUPS: usize = 32;

/// Default drain loop bound
pub const DEFAULT_MAX_DRAIN_LOOPS: u32 = 32 * 64 * 1024;

// ============================================================================
// Configuration
// ============================================================================

/// DLB device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlbConfig {
    // ========================================================================
    // Inventory
    // ========================================================================
    /// Scheduling domains
    pub num_domains: u32,
    /// Load-balanced queues
    pub num_ldb_queues: u32,
    /// Load-balanced ports, split evenly across classes of service
    pub num_ldb_ports: u32,
    /// Classes of service
    pub num_cos: u32,
    /// Directed port/queue pairs
    pub num_dir_ports: u32,
    /// Load-balanced credits
    pub num_ldb_credits: u32,
    /// Directed credits
    pub num_dir_credits: u32,
    /// Atomic-inflight (AQED) entries
    pub num_aqed_entries: u32,
    /// History-list entries
    pub num_hist_list_entries: u32,
    /// Sequence-number groups
    pub num_sn_groups: u32,

    // ========================================================================
    // Drain Policy
    // ========================================================================
    /// Iteration bound of each drain loop
    pub max_drain_loops: u32,
    /// Delay between drain iterations, in microseconds
    pub poll_delay_us: u32,
}

impl DlbConfig {
    /// Default configuration (full physical-function inventory)
    pub const DEFAULT: Self = Self {
        num_domains: 32,
        num_ldb_queues: 32,
        num_ldb_ports: 64,
        num_cos: 4,
        num_dir_ports: 64,
        num_ldb_credits: 8192,
        num_dir_credits: 2048,
        num_aqed_entries: 2048,
        num_hist_list_entries: 2048,
        num_sn_groups: 2,
        max_drain_loops: DEFAULT_MAX_DRAIN_LOOPS,
        poll_delay_us: 1,
    };

    /// Set the domain count
    pub const fn with_domains(mut self, n: u32) -> Self {
        self.num_domains = n;
        self
    }

    /// Set the load-balanced queue count
    pub const fn with_ldb_queues(mut self, n: u32) -> Self {
        self.num_ldb_queues = n;
        self
    }

    /// Set the load-balanced port count and class split
    pub const fn with_ldb_ports(mut self, n: u32, cos: u32) -> Self {
        self.num_ldb_ports = n;
        self.num_cos = cos;
        self
    }

    /// Set the directed pair count
    pub const fn with_dir_ports(mut self, n: u32) -> Self {
        self.num_dir_ports = n;
        self
    }

    /// Set the credit pools
    pub const fn with_credits(mut self, ldb: u32, dir: u32) -> Self {
        self.num_ldb_credits = ldb;
        self.num_dir_credits = dir;
        self
    }

    /// Set the atomic-inflight entry count
    pub const fn with_aqed_entries(mut self, n: u32) -> Self {
        self.num_aqed_entries = n;
        self
    }

    /// Set the history-list size
    pub const fn with_hist_list_entries(mut self, n: u32) -> Self {
        self.num_hist_list_entries = n;
        self
    }

    /// Set the sequence-number group count
    pub const fn with_sn_groups(mut self, n: u32) -> Self {
        self.num_sn_groups = n;
        self
    }

    /// Set the drain policy
    pub const fn with_drain_policy(mut self, max_loops: u32, poll_delay_us: u32) -> Self {
        self.max_drain_loops = max_loops;
        self.poll_delay_us = poll_delay_us;
        self
    }

    /// Ports per class of service
    pub const fn ports_per_cos(&self) -> u32 {
        self.num_ldb_ports / self.num_cos
    }

    /// Check the configuration against the hardware limits
    pub fn validate(&self) -> DlbResult<()> {
        let counts = [
            self.num_domains,
            self.num_ldb_queues,
            self.num_ldb_ports,
            self.num_cos,
            self.num_dir_ports,
            self.num_hist_list_entries,
            self.num_sn_groups,
            self.max_drain_loops,
        ];
        if counts.iter().any(|&n| n == 0) {
            return Err(DlbError::InvalidConfig);
        }

        if self.num_domains > MAX_DOMAINS
            || self.num_ldb_queues > MAX_LDB_QUEUES
            || self.num_ldb_ports > MAX_LDB_PORTS
            || self.num_dir_ports > MAX_DIR_PORTS
            || self.num_cos as usize > MAX_COS
            || self.num_sn_groups as usize > MAX_SN_GROUPS
        {
            return Err(DlbError::InvalidConfig);
        }

        if self.num_ldb_ports % self.num_cos != 0 {
            return Err(DlbError::InvalidConfig);
        }

        Ok(())
    }
}

impl Default for DlbConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const_assert!(DlbConfig::DEFAULT.num_ldb_ports % DlbConfig::DEFAULT.num_cos == 0);
const_assert!(DlbConfig::DEFAULT.num_ldb_ports <= MAX_LDB_PORTS);
const_assert!(DlbConfig::DEFAULT.num_sn_groups as usize <= MAX_SN_GROUPS);
const_assert!(MAX_LDB_QUEUES <= 256);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(DlbConfig::default(), DlbConfig::DEFAULT);
        assert!(DlbConfig::DEFAULT.validate().is_ok());
        assert_eq!(DlbConfig::DEFAULT.ports_per_cos(), 16);
    }

    #[test]
    fn test_builder_setters() {
        let cfg = DlbConfig::DEFAULT
            .with_domains(4)
            .with_ldb_queues(8)
            .with_ldb_ports(8, 2)
            .with_dir_ports(4)
            .with_credits(100, 50)
            .with_drain_policy(16, 0);

        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.ports_per_cos(), 4);
        assert_eq!(cfg.num_ldb_credits, 100);
        assert_eq!(cfg.max_drain_loops, 16);
    }

    #[test]
    fn test_validate_rejects_bad_inventories() {
        let bad = [
            DlbConfig::DEFAULT.with_domains(0),
            DlbConfig::DEFAULT.with_domains(MAX_DOMAINS + 1),
            DlbConfig::DEFAULT.with_ldb_ports(63, 4),
            DlbConfig::DEFAULT.with_ldb_ports(64, 0),
            DlbConfig::DEFAULT.with_ldb_ports(80, 4),
            DlbConfig::DEFAULT.with_sn_groups(33),
            DlbConfig::DEFAULT.with_drain_policy(0, 1),
        ];
        for cfg in bad {
            assert_eq!(cfg.validate(), Err(DlbError::InvalidConfig), "{:?}", cfg);
        }
    }
}

//! Shared fixtures for the in-crate tests.

use dlb_hal::sim::{SimBus, SimDelay, SimDevice};

use crate::args::{CreateLdbPortArgs, CreateSchedDomainArgs};
use crate::config::DlbConfig;
use crate::device::DlbHw;

/// Drain loop bound used by the fixtures
pub const TEST_DRAIN_LOOPS: u32 = 64;

/// Device state over a simulated register file
pub struct TestDevice {
    pub sim: SimDevice,
    pub hw: DlbHw<SimBus, SimDelay>,
}

impl TestDevice {
    /// Default inventory, short drain bound
    pub fn new() -> Self {
        Self::with_config(DlbConfig::DEFAULT.with_drain_policy(TEST_DRAIN_LOOPS, 1))
    }

    /// Custom inventory
    pub fn with_config(config: DlbConfig) -> Self {
        let sim = SimDevice::new(config.num_ldb_queues, config.num_ldb_ports, config.num_dir_ports);
        let hw = DlbHw::new(config, sim.bus(), sim.delay()).expect("valid test config");
        Self { sim, hw }
    }
}

/// A domain with a little of everything
pub fn small_domain() -> CreateSchedDomainArgs {
    CreateSchedDomainArgs {
        num_ldb_queues: 2,
        num_ldb_ports: 2,
        num_dir_ports: 2,
        num_atomic_inflights: 64,
        num_hist_list_entries: 64,
        num_ldb_credits: 100,
        num_dir_credits: 50,
    }
}

/// Port request with a valid address and an 8-entry history list
pub fn ldb_port_args(cq_depth: u32) -> CreateLdbPortArgs {
    CreateLdbPortArgs {
        cq_depth,
        cq_depth_threshold: 1,
        cq_history_list_size: 8,
        cq_base_address: 0x10_0000,
    }
}

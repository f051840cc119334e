//! # DLB Core
//!
//! Resource partitioning and scheduling-domain lifecycle for the DLB
//! work-distribution accelerator.
//!
//! A fixed inventory of load-balanced queues and ports, directed port/queue
//! pairs, credits, atomic-inflight entries, history-list entries and
//! sequence-number slots is carved into isolated scheduling domains. Domains
//! are created all-or-nothing, configured queue by queue and port by port,
//! started, and finally drained and reset so everything returns to the pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         dlb-core                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │    Dlb      │  │  builder /  │  │   pool / bitmap /   │  │
//! │  │  (facade,   │─▶│  mapping /  │─▶│   sn_group /        │  │
//! │  │  spin lock) │  │  reset      │  │   placement         │  │
//! │  └─────────────┘  └──────┬──────┘  └─────────────────────┘  │
//! │                          ▼                                  │
//! │                   configure (register writes)               │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            ▼
//!                 dlb-hal (CsrBus, Delay)
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod args;
pub mod bitmap;
pub mod builder;
pub mod config;
pub mod configure;
pub mod device;
pub mod domain;
pub mod error;
mod mapping;
pub mod placement;
pub mod pool;
pub mod reset;
pub mod resource;
pub mod sn_group;

#[cfg(test)]
mod test_util;

/// Scheduling-domain id
pub type DomainId = u32;

/// Queue id (load-balanced or directed)
pub type QueueId = u32;

/// Port id (load-balanced or directed)
pub type PortId = u32;

/// "Not yet assigned" id in requests and error responses
pub const DLB_UNASSIGNED_ID: u32 = u32::MAX;

// Re-exports for convenience
pub use args::*;
pub use config::DlbConfig;
pub use device::{Dlb, DlbHw};
pub use domain::DomainResources;
pub use error::{DlbError, DlbResult, FaultKind};
pub use pool::AvailableResources;
pub use reset::ResetStage;

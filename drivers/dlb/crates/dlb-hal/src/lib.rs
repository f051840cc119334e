//! # DLB Hardware Abstraction Layer
//!
//! Register-level access to the DLB work-distribution accelerator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         dlb-hal                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │    regs     │  │   CsrBus    │  │       Delay         │  │
//! │  │ (offsets,   │  │ (MmioRegion │  │  (SpinDelay,        │  │
//! │  │  fields)    │  │  / SimBus)  │  │   SimDelay)         │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The resource manager in `dlb-core` is generic over [`CsrBus`] and
//! [`Delay`], so the same drain/reset code runs against real MMIO space or
//! against the software register file in [`sim`].

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

pub mod delay;
pub mod mmio;
pub mod regs;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use delay::{Delay, SpinDelay};
pub use mmio::{CsrBus, MmioRegion};

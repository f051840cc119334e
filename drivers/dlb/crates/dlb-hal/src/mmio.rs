//! # Memory-Mapped I/O Operations
//!
//! Register access for the DLB CSR BAR.

use crate::regs::RegFamily;

// =============================================================================
// CSR BUS TRAIT
// =============================================================================

/// 32-bit control/status register access
///
/// Implemented by [`MmioRegion`] for real hardware and by the software
/// register file in `sim` for host testing. Offsets are in bytes from the
/// start of the CSR BAR.
pub trait CsrBus: Send {
    /// Read a 32-bit register
    fn read32(&self, offset: u32) -> u32;

    /// Write a 32-bit register
    fn write32(&mut self, offset: u32, value: u32);

    /// Read entry `index` of a register family
    fn read_reg(&self, family: RegFamily, index: u32) -> u32 {
        self.read32(family.offset(index))
    }

    /// Write entry `index` of a register family
    fn write_reg(&mut self, family: RegFamily, index: u32, value: u32) {
        self.write32(family.offset(index), value);
    }

    /// Restore entry `index` of a register family to its power-on value
    fn reset_reg(&mut self, family: RegFamily, index: u32) {
        self.write32(family.offset(index), family.power_on_value());
    }
}

// =============================================================================
// MMIO REGION
// =============================================================================

/// Mapped CSR BAR
#[derive(Debug)]
pub struct MmioRegion {
    /// Virtual address of the mapping
    virt_addr: usize,
    /// Mapping size in bytes
    size: usize,
}

impl MmioRegion {
    /// Wrap an existing mapping
    ///
    /// # Safety
    /// - `virt_addr` must map `size` bytes of device memory for the lifetime
    ///   of the region
    /// - `virt_addr` must be 4-byte aligned
    pub unsafe fn new(virt_addr: usize, size: usize) -> Self {
        log::debug!("dlb-hal: CSR BAR at {:#x}, {:#x} bytes", virt_addr, size);
        Self { virt_addr, size }
    }

    /// Mapping size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    fn ptr(&self, offset: u32) -> *mut u32 {
        let offset = offset as usize;
        debug_assert!(
            offset % 4 == 0 && offset + 4 <= self.size,
            "CSR offset {:#x} outside BAR",
            offset
        );
        (self.virt_addr + offset) as *mut u32
    }
}

impl CsrBus for MmioRegion {
    fn read32(&self, offset: u32) -> u32 {
        let ptr = self.ptr(offset);
        // SAFETY: register map offsets stay inside the BAR (checked in
        // debug builds); mapping validity guaranteed by the constructor contract
        let value = unsafe { core::ptr::read_volatile(ptr) };
        fence::mmio_read_barrier();
        value
    }

    fn write32(&mut self, offset: u32, value: u32) {
        let ptr = self.ptr(offset);
        fence::mmio_write_barrier();
        // SAFETY: as above
        unsafe { core::ptr::write_volatile(ptr, value) }
    }
}

// =============================================================================
// MEMORY FENCE OPERATIONS
// =============================================================================

/// Memory barrier types for MMIO
pub mod fence {
    //! Memory barrier operations

    /// Compiler fence (prevents reordering)
    #[inline(always)]
    pub fn compiler() {
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Memory barrier before MMIO write
    #[inline(always)]
    pub fn mmio_write_barrier() {
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb st", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        compiler();
    }

    /// Memory barrier after MMIO read
    #[inline(always)]
    pub fn mmio_read_barrier() {
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb ld", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        compiler();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmio_roundtrip_on_plain_memory() {
        let mut backing = [0u32; 16];
        // SAFETY: backing outlives the region and is 4-byte aligned
        let mut region = unsafe { MmioRegion::new(backing.as_mut_ptr() as usize, 64) };

        region.write32(8, 0xdead_beef);
        assert_eq!(region.read32(8), 0xdead_beef);
        assert_eq!(region.read32(12), 0);
        assert_eq!(region.size(), 64);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside BAR")]
    fn test_offset_past_bar_is_caught_in_debug() {
        let mut backing = [0u32; 16];
        // SAFETY: backing outlives the region and is 4-byte aligned
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as usize, 64) };

        region.read32(64);
    }
}

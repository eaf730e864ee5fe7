//! # Direct-Map PhysMapper for the Kernel
//!
//! Every physical address `pa` below the end of memory is mapped at
//! `KERNEL_BASE + pa` once [`MemoryManager::map_kernel_regions`] has run (and,
//! for the first 4 MiB, by the boot page directory before that). This module
//! provides the [`PhysMapper`] that turns physical addresses into kernel
//! references through that window.
//!
//! [`MemoryManager::map_kernel_regions`]: crate::MemoryManager::map_kernel_regions
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::KernelPhysMapper;
//! use kernel_memory_addresses::PhysicalPage;
//! use kernel_vmem::PhysMapperExt;
//!
//! let mapper = KernelPhysMapper;
//! mapper.directory_mut(PhysicalPage::from_frame_number(0x117)).zero();
//! ```

use kernel_info::memory::KERNEL_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for the kernel's direct mapping of physical memory.
///
/// # Safety
/// - The direct mapping must be present and cover the referenced physical range.
/// - Only meaningful inside the 32-bit kernel.
#[derive(Debug, Default, Copy, Clone)]
pub struct KernelPhysMapper;

impl KernelPhysMapper {
    /// Kernel virtual address through which `pa` is reached.
    #[inline]
    #[must_use]
    pub const fn kernel_address(pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(KERNEL_BASE.wrapping_add(pa.as_u32()))
    }
}

impl PhysMapper for KernelPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = Self::kernel_address(pa).as_u32() as usize as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and directly mapped.
        unsafe { &mut *va }
    }
}

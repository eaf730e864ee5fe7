use crate::memory::{
    IO_HOLE_END, IO_HOLE_START, KERNEL_BASE, KERNEL_LOAD, KERNEL_STACK_SIZE, KERNEL_STACK_TOP,
    PAGE_TABLE_SPAN, USER_PAGE_TABLES, USER_PAGES, USER_TOP,
};
use core::ops::Range;
use kernel_memory_addresses::{FRAME_OFFSET_MASK, FRAME_SIZE, PhysicalAddress, VirtualAddress, align_up};

/// A half-open `[start, end)` range of physical memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhysicalRange {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl PhysicalRange {
    #[inline]
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self { start, end }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end.as_u32().saturating_sub(self.start.as_u32())
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.as_u32() >= self.start.as_u32() && pa.as_u32() < self.end.as_u32()
    }

    /// Frames touched by this range; a partially covered frame counts as covered.
    #[inline]
    #[must_use]
    pub const fn frames(&self) -> Range<usize> {
        let first = (self.start.as_u32() / FRAME_SIZE) as usize;
        let last = (align_up(self.end.as_u32(), FRAME_SIZE) / FRAME_SIZE) as usize;
        first..last
    }

    const fn overlaps(&self, other: &Self) -> bool {
        self.start.as_u32() < other.end.as_u32() && other.start.as_u32() < self.end.as_u32()
    }
}

/// Boot-time description of the machine's memory layout.
///
/// Carries the link-time symbols (end of the kernel image, boot stack) and the
/// fixed virtual windows into the memory manager. [`MemoryLayout::standard`]
/// builds the production layout from the constants in [`memory`](crate::memory).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryLayout {
    /// Kernel virtual address at which physical address 0 is mapped.
    pub kernel_base: VirtualAddress,
    /// Physical range that must never be handed out.
    pub io_hole: PhysicalRange,
    /// Physical range occupied by the loaded kernel image (load address to end symbol).
    pub kernel_image: PhysicalRange,
    /// Physical base of the statically allocated boot stack.
    pub boot_stack: PhysicalAddress,
    /// Virtual top of the kernel stack.
    pub kernel_stack_top: VirtualAddress,
    /// Bytes of the kernel stack backed by the boot stack.
    pub kernel_stack_size: u32,
    /// Read-only window onto the frame-descriptor array.
    pub frame_window: VirtualAddress,
    /// Self-referential window onto the page tables.
    pub page_table_window: VirtualAddress,
    /// Everything below belongs to user mode; everything at or above is
    /// shared by all address spaces.
    pub user_top: VirtualAddress,
}

impl MemoryLayout {
    /// The production layout for a kernel whose image ends at `kernel_end`
    /// and whose boot stack starts at `boot_stack` (both physical).
    #[must_use]
    pub const fn standard(kernel_end: PhysicalAddress, boot_stack: PhysicalAddress) -> Self {
        Self {
            kernel_base: VirtualAddress::new(KERNEL_BASE),
            io_hole: PhysicalRange::new(
                PhysicalAddress::new(IO_HOLE_START),
                PhysicalAddress::new(IO_HOLE_END),
            ),
            kernel_image: PhysicalRange::new(PhysicalAddress::new(KERNEL_LOAD), kernel_end),
            boot_stack,
            kernel_stack_top: VirtualAddress::new(KERNEL_STACK_TOP),
            kernel_stack_size: KERNEL_STACK_SIZE,
            frame_window: VirtualAddress::new(USER_PAGES),
            page_table_window: VirtualAddress::new(USER_PAGE_TABLES),
            user_top: VirtualAddress::new(USER_TOP),
        }
    }

    /// Check the layout for internal consistency.
    ///
    /// # Errors
    /// Returns the first inconsistency found; see [`LayoutError`].
    pub const fn validate(&self) -> Result<(), LayoutError> {
        if self.io_hole.end.as_u32() < self.io_hole.start.as_u32() {
            return Err(LayoutError::IoHoleInverted);
        }
        if self.kernel_image.end.as_u32() < self.kernel_image.start.as_u32() {
            return Err(LayoutError::KernelImageInverted);
        }
        if self.kernel_image.overlaps(&self.io_hole) {
            return Err(LayoutError::KernelOverlapsIoHole);
        }
        if !self.kernel_base.is_aligned_to(PAGE_TABLE_SPAN) {
            return Err(LayoutError::UnalignedWindow("kernel base", self.kernel_base));
        }
        if !self.frame_window.is_aligned_to(PAGE_TABLE_SPAN) {
            return Err(LayoutError::UnalignedWindow("frame window", self.frame_window));
        }
        if !self.page_table_window.is_aligned_to(PAGE_TABLE_SPAN) {
            return Err(LayoutError::UnalignedWindow(
                "page-table window",
                self.page_table_window,
            ));
        }
        if !self.user_top.is_aligned_to(PAGE_TABLE_SPAN) {
            return Err(LayoutError::UnalignedWindow("user top", self.user_top));
        }
        if self.user_top.as_u32() > self.frame_window.as_u32()
            || self.user_top.as_u32() > self.page_table_window.as_u32()
        {
            return Err(LayoutError::SharedWindowBelowUserTop);
        }
        if !self.kernel_stack_top.is_aligned_to(FRAME_SIZE)
            || !self.kernel_stack_size.is_multiple_of(FRAME_SIZE)
            || self.kernel_stack_size == 0
        {
            return Err(LayoutError::UnalignedKernelStack);
        }
        if self.kernel_stack_size > self.kernel_stack_top.as_u32() {
            return Err(LayoutError::KernelStackBelowZero);
        }
        let stack_end = match self.boot_stack.checked_add(self.kernel_stack_size) {
            Some(end) => end,
            None => return Err(LayoutError::BootStackOutsideKernelImage),
        };
        if !self.boot_stack.is_aligned_to(FRAME_SIZE)
            || self.boot_stack.as_u32() < self.kernel_image.start.as_u32()
            || stack_end.as_u32() > self.kernel_image.end.as_u32()
        {
            return Err(LayoutError::BootStackOutsideKernelImage);
        }
        Ok(())
    }

    /// Kernel virtual address of physical address `pa`.
    #[inline]
    #[must_use]
    pub const fn kernel_address(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.kernel_base.as_u32().wrapping_add(pa.as_u32()))
    }

    /// Physical address behind kernel virtual address `va`, if `va` lies in the
    /// kernel's direct mapping.
    #[inline]
    #[must_use]
    pub const fn physical_address(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match va.as_u32().checked_sub(self.kernel_base.as_u32()) {
            Some(pa) => Some(PhysicalAddress::new(pa)),
            None => None,
        }
    }

    /// Bytes of physical memory the direct mapping at
    /// [`kernel_base`](Self::kernel_base) can reach.
    #[inline]
    #[must_use]
    pub const fn direct_map_limit(&self) -> u64 {
        (1u64 << 32) - self.kernel_base.as_u32() as u64
    }

    /// Length of the direct mapping on a machine with `memory` bytes of RAM.
    ///
    /// All of memory, cut at [`direct_map_limit`](Self::direct_map_limit) and
    /// at the last whole frame a 32-bit length can describe.
    #[inline]
    #[must_use]
    pub const fn direct_map_len(&self, memory: u64) -> u32 {
        let limit = self.direct_map_limit();
        let len = if memory < limit { memory } else { limit };
        if len > u32::MAX as u64 {
            u32::MAX & !FRAME_OFFSET_MASK
        } else {
            len as u32
        }
    }
}

/// Inconsistencies detected by [`MemoryLayout::validate`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("the I/O hole ends before it starts")]
    IoHoleInverted,
    #[error("the kernel image ends before it starts")]
    KernelImageInverted,
    #[error("the kernel image overlaps the I/O hole")]
    KernelOverlapsIoHole,
    #[error("the {0} at {1} is not aligned to a page-table span")]
    UnalignedWindow(&'static str, VirtualAddress),
    #[error("a shared window lies below the top of user space")]
    SharedWindowBelowUserTop,
    #[error("the kernel stack is not frame aligned")]
    UnalignedKernelStack,
    #[error("the kernel stack extends below address zero")]
    KernelStackBelowZero,
    #[error("the boot stack does not lie inside the kernel image")]
    BootStackOutsideKernelImage,
}

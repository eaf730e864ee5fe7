//! A 32-frame machine: I/O hole at frames 16–20, a one-frame kernel image at
//! frame 21 that also holds the boot stack.

use crate::frame_table::FrameDescriptor;
use kernel_info::memory::{KERNEL_BASE, KERNEL_STACK_TOP, USER_PAGE_TABLES, USER_PAGES, USER_TOP};
use kernel_info::{MemoryLayout, PhysicalRange};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;
use kernel_vmem::testing::TestPhys;

pub const FRAMES: usize = 32;

pub fn small_layout() -> MemoryLayout {
    let frame = |n: u32| PhysicalAddress::new(n * FRAME_SIZE);
    MemoryLayout {
        kernel_base: VirtualAddress::new(KERNEL_BASE),
        io_hole: PhysicalRange::new(frame(16), frame(21)),
        kernel_image: PhysicalRange::new(frame(21), frame(22)),
        boot_stack: frame(21),
        kernel_stack_top: VirtualAddress::new(KERNEL_STACK_TOP),
        kernel_stack_size: FRAME_SIZE,
        frame_window: VirtualAddress::new(USER_PAGES),
        page_table_window: VirtualAddress::new(USER_PAGE_TABLES),
        user_top: VirtualAddress::new(USER_TOP),
    }
}

/// Descriptor array placed in frame 23, where the bootstrap allocator puts it.
pub fn descriptors(phys: &TestPhys) -> &mut [FrameDescriptor] {
    unsafe { phys.phys_to_slice_mut(PhysicalAddress::new(23 * FRAME_SIZE), FRAMES) }
}

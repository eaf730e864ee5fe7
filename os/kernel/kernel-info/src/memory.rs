//! # Memory Layout

/// Size of the virtual range covered by one page-directory entry (4 MiB).
pub const PAGE_TABLE_SPAN: u32 = 1024 * 4096;

/// Where the kernel executes; all of physical memory is mapped from here.
///
/// Kernel virtual address `KERNEL_BASE + pa` reaches physical address `pa`.
pub const KERNEL_BASE: u32 = 0xF000_0000;

/// Top of the kernel stack; it grows down from here.
pub const KERNEL_STACK_TOP: u32 = KERNEL_BASE;

/// Bytes of the kernel stack that are backed by physical memory.
pub const KERNEL_STACK_SIZE: u32 = 8 * 4096;

/// Upper end of the memory-mapped I/O window.
const MMIO_LIMIT: u32 = KERNEL_STACK_TOP - PAGE_TABLE_SPAN;

/// Lower end of the memory-mapped I/O window.
const MMIO_BASE: u32 = MMIO_LIMIT - PAGE_TABLE_SPAN;

/// User-mode code may not access anything at or above this address.
const USER_LIMIT: u32 = MMIO_BASE;

/// Self-referential window exposing the current page tables read-only.
pub const USER_PAGE_TABLES: u32 = USER_LIMIT - PAGE_TABLE_SPAN;

/// Read-only window onto the frame-descriptor array.
pub const USER_PAGES: u32 = USER_PAGE_TABLES - PAGE_TABLE_SPAN;

/// Read-only window onto the execution-context table.
const USER_CONTEXTS: u32 = USER_PAGES - PAGE_TABLE_SPAN;

/// Top of the address-space range owned by user mode; everything at or above
/// is shared kernel mapping.
pub const USER_TOP: u32 = USER_CONTEXTS;

/// Start of the legacy I/O hole in physical memory.
pub const IO_HOLE_START: u32 = 0x000A_0000;

/// End of the legacy I/O hole; extended memory (and the kernel image) start here.
pub const IO_HOLE_END: u32 = 0x0010_0000;

/// Where the boot loader places the kernel image in physical memory.
pub const KERNEL_LOAD: u32 = IO_HOLE_END;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(KERNEL_STACK_SIZE < PAGE_TABLE_SPAN);
    assert!(KERNEL_BASE.is_multiple_of(PAGE_TABLE_SPAN));
    assert!(USER_TOP.is_multiple_of(PAGE_TABLE_SPAN));
    assert!(USER_PAGES > USER_TOP && USER_PAGE_TABLES < USER_LIMIT);
    assert!(IO_HOLE_START < IO_HOLE_END);
};

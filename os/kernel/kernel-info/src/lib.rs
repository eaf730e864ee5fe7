//! # Kernel Memory Layout and Boot Configuration
//!
//! This crate is the single source of truth for where things live in the
//! protected-mode kernel's physical and virtual address spaces. It is consumed
//! by the bootstrap allocator, the physical page allocator and the page-table
//! code so that all of them agree on the same layout.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (32-bit, 4 MiB per directory entry):
//!
//!  4 GiB ┌─────────────────────────────────┐
//!        │   All physical memory, RW      │ kernel only
//! KERNEL_BASE, KERNEL_STACK_TOP ──────────┤ 0xF000_0000
//!        │   Kernel stack  (+ guard gap)   │ kernel RW
//! MMIO_LIMIT ├─────────────────────────────┤ 0xEFC0_0000
//!        │   Memory-mapped I/O             │ kernel RW
//! USER_LIMIT, MMIO_BASE ──────────────────┤ 0xEF80_0000
//!        │   Self-mapped page tables       │ user R
//! USER_PAGE_TABLES ├───────────────────────┤ 0xEF40_0000
//!        │   Frame-descriptor array        │ user R
//! USER_PAGES ├─────────────────────────────┤ 0xEF00_0000
//!        │   Execution-context table       │ user R
//! USER_TOP ├───────────────────────────────┤ 0xEEC0_0000
//!        │   User space                    │
//!      0 └─────────────────────────────────┘
//! ```
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │ Frame 0 (real-mode IDT, BIOS)   │ permanently reserved
//!             ├─────────────────────────────────┤ 0x0000_1000
//!             │ Base memory                     │ free
//! IO_HOLE_START ──────────────────────────────┤ 0x000A_0000
//!             │ I/O hole (VGA, ROMs)            │ never allocated
//! IO_HOLE_END ├───────────────────────────────┤ 0x0010_0000
//!             │ Kernel image                    │ in use
//!             ├─────────────────────────────────┤ end symbol
//!             │ Bootstrap allocations           │ in use
//!             ├─────────────────────────────────┤ high-water mark
//!             │ Extended memory                 │ free
//!             └─────────────────────────────────┘
//! ```
//!
//! The compile-time constants live in [`memory`]. A runtime [`MemoryLayout`]
//! value carries the same information (plus the link-time symbols) into the
//! memory manager at boot, which lets tests run the manager on small simulated
//! machines.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod layout;
pub mod memory;
mod size;

pub use layout::{LayoutError, MemoryLayout, PhysicalRange};
pub use size::MemorySize;

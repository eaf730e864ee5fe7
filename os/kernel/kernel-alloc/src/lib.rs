//! # Kernel Physical Memory Management
//!
//! Owns every 4 KiB frame of physical memory and the kernel's page directory.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 MemoryManager                       │
//! │    • boot sequence, kernel mappings                 │
//! │    • address-space creation / teardown              │
//! └──────────┬───────────────────────────┬──────────────┘
//!            │                           │
//! ┌──────────▼──────────┐     ┌──────────▼──────────────┐
//! │  BootstrapAlloc     │     │  FrameTable             │
//! │  • bump allocator   │     │  • per-frame refcounts  │
//! │    above the image  │     │  • index-linked free    │
//! │  • boot only        │     │    list, LIFO           │
//! └─────────────────────┘     └─────────────────────────┘
//! ```
//!
//! Page-table manipulation itself lives in `kernel-vmem`; this crate supplies
//! the [`FrameAlloc`](kernel_vmem::FrameAlloc) it draws page-table frames from
//! and the [`KernelPhysMapper`] through which the kernel touches physical
//! memory once it is directly mapped.
//!
//! ## Memory Layout
//!
//! ```text
//! physical                          virtual
//! 0x0000_0000 ┌──────────────┐      ┌──────────────────┐ KERNEL_BASE
//!             │ base memory  │      │ all of physical  │
//! 0x000A_0000 ├──────────────┤      │ memory, kernel RW│
//!             │ I/O hole     │      ├──────────────────┤ KERNEL_STACK_TOP
//! 0x0010_0000 ├──────────────┤      │ kernel stack     │
//!             │ kernel image │      ├──────────────────┤
//!             ├──────────────┤      │ page tables (UVPT│ USER_PAGE_TABLES
//!             │ directory    │      │ self-map, user R)│
//!             │ descriptors  │      ├──────────────────┤ USER_PAGES
//!             ├──────────────┤      │ descriptors (R)  │
//!             │ free frames  │      ├──────────────────┤ USER_TOP
//!             └──────────────┘      └──────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! None. The manager is an exclusively borrowed context object; callers on a
//! uniprocessor kernel serialize access themselves.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bootstrap;
pub mod frame_table;
mod manager;
pub mod phys_mapper;

#[cfg(test)]
mod test_machine;

pub use bootstrap::BootstrapAlloc;
pub use frame_table::{FrameDescriptor, FrameTable, FrameTableError};
pub use manager::MemoryManager;
pub use phys_mapper::KernelPhysMapper;

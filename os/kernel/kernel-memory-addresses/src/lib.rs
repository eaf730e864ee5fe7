//! # Physical and Virtual Address Types (32-bit, two-level paging)
//!
//! Strongly typed wrappers for raw memory addresses and frame bases used by the
//! physical page allocator and the page-table code of a protected-mode kernel.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`PhysicalPage`] | The frame-aligned base of one physical page frame. |
//! | [`VirtualAddress`] | A byte address as seen through the page tables. |
//! | [`VirtualPage`] | The frame-aligned base of one virtual page. |
//!
//! All frames are [`FRAME_SIZE`] (4 KiB) large; two-level 32-bit paging has no
//! other leaf size in this kernel.
//!
//! ```text
//! |  31‒22    |  21‒12  |  11‒0   |
//! | directory |  table  | offset  |
//! ```
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0012_3456);
//! let frame = pa.page();
//! assert_eq!(frame.base().as_u32(), 0x0012_3000);
//! assert_eq!(frame.frame_number(), 0x123);
//! assert_eq!(frame.join(pa.offset()), pa);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` over `u32` and implement `Copy`, `Eq`,
//!   `Ord` and `Hash`.
//! - Frame numbers are `usize` since they index the frame-descriptor table.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of one page frame in bytes.
pub const FRAME_SIZE: u32 = 4096;

/// log2([`FRAME_SIZE`]), i.e. the number of in-frame offset bits.
pub const FRAME_SHIFT: u32 = 12;

/// Mask selecting the in-frame offset bits of an address.
pub const FRAME_OFFSET_MASK: u32 = FRAME_SIZE - 1;

const _: () = assert!(1 << FRAME_SHIFT == FRAME_SIZE);

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1234, 0x1000), 0x1000);
/// assert_eq!(align_down(0x1000, 0x1000), 0x1000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + (a - 1)` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0, 0x1000), 0);
/// assert_eq!(align_up(1, 0x1000), 0x1000);
/// assert_eq!(align_up(0x1001, 0x1000), 0x2000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    (x + a - 1) & !(a - 1)
}

/// Number of frames needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn frames_for(bytes: u32) -> u32 {
    bytes.div_ceil(FRAME_SIZE)
}

//! # Virtual Memory Support
//!
//! Two-level paging for a 32-bit protected-mode kernel.
//!
//! ## What you get
//! - An [`address space`](address_space) rooted at one page directory, with
//!   the walk / insert / lookup / remove / `map_region` operations.
//! - A 4 KiB-aligned [`PageDirectory`] and [`PageTable`] with typed entries.
//! - Page permission [`PageFlags`] and the decoded [`Leaf`] form of a mapping.
//! - The seams to the rest of the kernel: [`FrameAlloc`] (reference-counted
//!   frames), [`PhysMapper`] (reaching physical frames) and [`TranslationCache`]
//!   (invalidating cached translations).
//!
//! ## Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! |  31‒22    |  21‒12  |  11‒0   |
//! | directory |  table  | offset  |
//! ```
//!
//! ```text
//!  CR3 → Page Directory → Page Table → Physical Page
//!             │               │
//!             │               └───► PTE (Page Table Entry)     → maps 4 KiB
//!             └───────────────────► PDE (Page Directory Entry) → points to a PT
//! ```
//!
//! Both levels hold 1024 entries of 4 bytes each; one directory entry spans
//! 4 MiB ([`info::PAGE_TABLE_SPAN`]). The hardware intersects the permissions
//! of both levels, so a directory entry is at least as permissive as any leaf
//! below it.
//!
//! ## Ownership
//!
//! Every present leaf holds one reference on its frame, and every installed
//! page table holds one reference on its own frame on behalf of the directory
//! entry that points to it. Fixed kernel mappings made with
//! [`AddressSpace::map_region`] are outside this accounting.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

#[cfg(any(test, feature = "test-support"))]
extern crate alloc;

pub mod address_space;
mod page_table;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
mod tlb;

pub use crate::address_space::{AddressSpace, MapError};
pub use crate::page_table::pd::{PageDirectory, PdEntry, PdIndex};
pub use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
pub use crate::page_table::{ENTRIES_PER_TABLE, PageEntryBits, split_indices};
pub use crate::tlb::{Cr3, TranslationCache};
#[cfg(target_arch = "x86")]
pub use crate::tlb::CpuTlb;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalPage};

bitflags::bitflags! {
    /// Permission and caching bits of a page-table entry.
    ///
    /// The present bit is not part of this set: it is implied by a
    /// [`Leaf`] or table link and managed by the entry constructors.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct PageFlags: u32 {
        /// Page is writable.
        ///
        /// If cleared, the page is read-only; user-mode writes fault, and
        /// supervisor writes fault too when CR0.WP is set.
        const WRITABLE      = 1 << 1;

        /// Page is accessible from user mode (CPL=3).
        const USER          = 1 << 2;

        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;

        /// Caching disabled; used for memory-mapped I/O.
        const CACHE_DISABLE = 1 << 4;

        /// Set by the processor on first access.
        const ACCESSED      = 1 << 5;

        /// Set by the processor on first write (leaf only).
        const DIRTY         = 1 << 6;

        /// Global translation; survives CR3 reloads when CR4.PGE is set.
        const GLOBAL        = 1 << 8;
    }
}

impl PageFlags {
    /// Bits a caller may request for a mapping; the processor-maintained
    /// accessed and dirty bits are excluded.
    pub const PERMISSIONS: Self = Self::WRITABLE
        .union(Self::USER)
        .union(Self::WRITE_THROUGH)
        .union(Self::CACHE_DISABLE)
        .union(Self::GLOBAL);
}

/// A decoded leaf mapping: one physical frame plus its permissions.
///
/// The packed hardware form lives in [`PtEntry`]; everything above the page
/// tables deals in `Leaf` values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Leaf {
    pub frame: PhysicalPage,
    pub flags: PageFlags,
}

impl Leaf {
    #[inline]
    #[must_use]
    pub const fn new(frame: PhysicalPage, flags: PageFlags) -> Self {
        Self { frame, flags }
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.flags.contains(PageFlags::WRITABLE)
    }

    #[inline]
    #[must_use]
    pub const fn is_user(&self) -> bool {
        self.flags.contains(PageFlags::USER)
    }
}

/// Requested contents of a freshly allocated frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameFill {
    /// Every byte of the frame reads as zero.
    Zeroed,
    /// The frame keeps whatever it contained before.
    Uninitialized,
}

/// Reference-counted physical frame allocator.
///
/// Frames returned by [`alloc_frame`](Self::alloc_frame) have a reference count
/// of zero; the caller takes ownership by calling [`incref`](Self::incref) once
/// it has linked the frame somewhere. Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Take one frame off the free pool.
    fn alloc_frame(&mut self, fill: FrameFill) -> Option<PhysicalPage>;

    /// Record one more reference to `frame`.
    fn incref(&mut self, frame: PhysicalPage);

    /// Drop one reference to `frame`, returning it to the pool when the count
    /// reaches zero. Returns `true` if the frame was returned.
    fn decref(&mut self, frame: PhysicalPage) -> bool;

    /// Current reference count of `frame`.
    fn ref_count(&self, frame: PhysicalPage) -> u16;
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space (e.g., through the kernel's direct mapping of
/// physical memory).
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Convert a *physical* address to a slice of `len` consecutive `T`s.
    ///
    /// # Safety
    /// As for [`phys_to_mut`](Self::phys_to_mut), for all `len` elements; the
    /// range must be contiguous in the mapping.
    unsafe fn phys_to_slice_mut<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [T] {
        let first: *mut T = unsafe { self.phys_to_mut::<T>(pa) };
        unsafe { core::slice::from_raw_parts_mut(first, len) }
    }
}

/// Typed views onto frames holding paging structures.
pub trait PhysMapperExt: PhysMapper {
    /// Borrow the [`PageDirectory`] stored in `page`.
    #[inline]
    fn directory_mut<'a>(&self, page: PhysicalPage) -> &'a mut PageDirectory {
        unsafe { self.phys_to_mut::<PageDirectory>(page.base()) }
    }

    /// Borrow the [`PageTable`] stored in `page`.
    #[inline]
    fn table_mut<'a>(&self, page: PhysicalPage) -> &'a mut PageTable {
        unsafe { self.phys_to_mut::<PageTable>(page.base()) }
    }

    /// Borrow the raw bytes of `page`.
    #[inline]
    fn frame_bytes_mut<'a>(&self, page: PhysicalPage) -> &'a mut [u8; FRAME_SIZE as usize] {
        unsafe { self.phys_to_mut::<[u8; FRAME_SIZE as usize]>(page.base()) }
    }

    /// Clear every byte of `page`.
    #[inline]
    fn zero_frame(&self, page: PhysicalPage) {
        self.frame_bytes_mut(page).fill(0);
    }
}

impl<T: PhysMapper + ?Sized> PhysMapperExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mask_excludes_processor_bits() {
        let raw = PageFlags::from_bits_truncate(0xFFF);
        assert_eq!(
            raw & PageFlags::PERMISSIONS,
            PageFlags::WRITABLE
                | PageFlags::USER
                | PageFlags::WRITE_THROUGH
                | PageFlags::CACHE_DISABLE
                | PageFlags::GLOBAL
        );
        assert!(!PageFlags::from_bits_truncate(0x1).contains(PageFlags::WRITABLE));
    }

    #[test]
    fn leaf_permission_queries() {
        let leaf = Leaf::new(
            PhysicalPage::from_frame_number(3),
            PageFlags::USER | PageFlags::WRITABLE,
        );
        assert!(leaf.is_user());
        assert!(leaf.is_writable());
        assert!(!Leaf::new(leaf.frame, PageFlags::empty()).is_user());
    }
}

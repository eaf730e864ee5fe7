pub mod pd;
pub mod pt;

use crate::PageFlags;
use crate::page_table::pd::PdIndex;
use crate::page_table::pt::PtIndex;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// A single 32-bit page directory or page table entry in its raw bitfield form.
///
/// Both paging levels share this layout; [`PdEntry`](pd::PdEntry) and
/// [`PtEntry`](pt::PtEntry) give it level-specific meaning.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning |
/// |-------|-----------------|---------|
/// | 0     | `P`             | Valid entry if set |
/// | 1     | `RW`            | Writable if set |
/// | 2     | `US`            | User-mode accessible if set |
/// | 3     | `PWT`           | Write-through caching |
/// | 4     | `PCD`           | Disable caching |
/// | 5     | `A`             | Accessed |
/// | 6     | `D`             | Dirty (leaf only) |
/// | 7     | `PS` / `PAT`    | 4 MiB page in a PDE; PAT in a PTE |
/// | 8     | `G`             | Global (leaf only) |
/// | 9–11  | OS avail        | Reserved for OS use |
/// | 12–31 | `addr`          | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::new().with_present(true).with_writable(true).with_frame(0x123);
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a leaf.
    pub dirty: bool,

    /// Page Size (PS, bit 7) in a directory entry; PAT in a table entry.
    ///
    /// This kernel never maps 4 MiB pages, so it stays clear in both.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global: bool,

    /// Bits 9–11, ignored by the hardware.
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12–31).
    #[bits(20)]
    pub frame: u32,
}

impl PageEntryBits {
    /// A present entry pointing at `page` with the given flags.
    #[inline]
    #[must_use]
    pub const fn present_with(page: PhysicalPage, flags: PageFlags) -> Self {
        Self::from_bits(page.base().as_u32() | flags.bits()).with_present(true)
    }

    /// The frame this entry points at (meaningful only when present).
    #[inline]
    #[must_use]
    pub const fn physical_page(self) -> PhysicalPage {
        PhysicalPage::from_frame_number(self.frame() as usize)
    }

    /// The permission and caching bits of this entry.
    #[inline]
    #[must_use]
    pub const fn page_flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.into_bits())
    }

    /// OR `flags` into the entry, keeping its frame and present bit.
    #[inline]
    #[must_use]
    pub const fn union_flags(self, flags: PageFlags) -> Self {
        Self::from_bits(self.into_bits() | flags.bits())
    }
}

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (PdIndex, PtIndex) {
    (PdIndex::of(va), PtIndex::of(va))
}

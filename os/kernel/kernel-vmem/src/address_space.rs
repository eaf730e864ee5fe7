//! # Address Space (two-level, page-directory rooted)
//!
//! Helpers to build and manipulate a **single** virtual address space: the tree
//! rooted at one [`PageDirectory`].
//!
//! ## Highlights
//!
//! - [`AddressSpace::walk`] resolves the leaf slot for a virtual address,
//!   optionally creating the page table that holds it.
//! - [`AddressSpace::insert`] / [`AddressSpace::remove`] install and tear down
//!   reference-counted mappings, with TLB maintenance.
//! - [`AddressSpace::lookup`] / [`AddressSpace::translate`] answer "what maps
//!   this address" without creating anything.
//! - [`AddressSpace::map_region`] installs permanent kernel mappings outside
//!   the reference counting.
//!
//! ## Ownership
//!
//! - A page table created by a walk gets a reference count of one, held by the
//!   directory entry linking it. It stays installed when its last leaf goes;
//!   [`AddressSpace::release_table`] takes it back.
//! - A present leaf holds exactly one reference on its frame.
//!
//! ## Safety
//!
//! - The provided [`PhysMapper`] must yield **writable** references to table frames.
//! - Keeps `unsafe` confined to the mapper and the CR3 accessors.

use crate::page_table::pd::{PageDirectory, PdEntry, PdIndex};
use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
use crate::page_table::split_indices;
use crate::{FrameAlloc, FrameFill, Leaf, PageFlags, PhysMapper, PhysMapperExt, TranslationCache};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, frames_for};

/// Errors reported by mapping operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// No frame was available for a page table.
    #[error("out of memory: no frame available for a page table")]
    OutOfMemory,
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage, // page directory frame
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the **currently active** address space by reading CR3.
    ///
    /// # Safety
    /// - Must run at CPL0 with paging enabled.
    /// - Assumes CR3 points at a valid page directory.
    #[cfg(target_arch = "x86")]
    #[inline]
    pub unsafe fn from_current(mapper: &'m M) -> Self {
        let root = unsafe { crate::Cr3::load() }.root();
        Self { root, mapper }
    }

    /// An address space whose page directory lives in `root`.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage) -> Self {
        Self { root, mapper }
    }

    /// Load CR3 with this address space's root.
    ///
    /// # Safety
    /// The directory must map the executing code, its stack and everything the
    /// kernel touches next.
    #[cfg(target_arch = "x86")]
    #[inline]
    pub unsafe fn activate(&self) {
        unsafe { crate::Cr3::from_root(self.root).store() }
    }

    /// Physical page of the page directory.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage {
        self.root
    }

    /// Borrow the [`PageDirectory`] as a typed table.
    #[inline]
    fn directory_mut(&self) -> &'m mut PageDirectory {
        self.mapper.directory_mut(self.root)
    }

    /// Borrow a [`PageTable`] in this frame.
    #[inline]
    fn table_mut(&self, page: PhysicalPage) -> &'m mut PageTable {
        self.mapper.table_mut(page)
    }

    /// Read one directory entry.
    #[inline]
    #[must_use]
    pub fn directory_entry(&self, index: PdIndex) -> PdEntry {
        self.directory_mut().get(index)
    }

    /// Overwrite one directory entry.
    ///
    /// No reference counts change; the caller owns the consequences (used for
    /// the self-referential window and for sharing kernel tables).
    #[inline]
    pub fn set_directory_entry(&mut self, index: PdIndex, entry: PdEntry) {
        self.directory_mut().set(index, entry);
    }

    /// Page table linked at `index`, creating a zeroed one if the slot is empty.
    fn ensure_table<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        index: PdIndex,
    ) -> Result<PhysicalPage, MapError> {
        let pd = self.directory_mut();
        if let Some(table) = pd.get(index).table() {
            return Ok(table);
        }

        let table = alloc
            .alloc_frame(FrameFill::Zeroed)
            .ok_or(MapError::OutOfMemory)?;
        alloc.incref(table);
        pd.set(
            index,
            PdEntry::link(table, PageFlags::WRITABLE | PageFlags::USER),
        );
        log::debug!(
            "page table {table} created for {} in directory {}",
            index.base(),
            self.root
        );
        Ok(table)
    }

    /// Leaf slot for `va` if its page table exists.
    fn find(&self, va: VirtualAddress) -> Option<&'m mut PtEntry> {
        let (pdx, ptx) = split_indices(va);
        let table = self.directory_mut().get(pdx).table()?;
        Some(self.table_mut(table).get_mut(ptx))
    }

    /// Resolve the leaf slot for `va`.
    ///
    /// If the page table covering `va` is missing and `create` is set, a
    /// zero-filled frame is allocated, counted as referenced by the directory
    /// and linked present, writable and user-accessible; the leaves decide
    /// the effective permissions. Returns `None` if the table is missing and
    /// either `create` is clear or no frame is available.
    pub fn walk<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        create: bool,
    ) -> Option<&'m mut PtEntry> {
        if create {
            let table = self.ensure_table(alloc, PdIndex::of(va)).ok()?;
            Some(self.table_mut(table).get_mut(PtIndex::of(va)))
        } else {
            self.find(va)
        }
    }

    /// Map `frame` at `va` with `flags`.
    ///
    /// - A different frame already mapped at `va` is released first.
    /// - Re-inserting the frame that is already mapped at `va` only updates its
    ///   permissions; the reference count does not change.
    /// - `flags`' writable and user bits are added to the directory entry.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the page table could not be created; no
    /// mapping or reference count changes in that case.
    pub fn insert<A: FrameAlloc, T: TranslationCache>(
        &mut self,
        alloc: &mut A,
        tlb: &mut T,
        frame: PhysicalPage,
        va: VirtualAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let (pdx, ptx) = split_indices(va);
        let flags = flags & PageFlags::PERMISSIONS;
        let table = self.ensure_table(alloc, pdx)?;

        let pd = self.directory_mut();
        pd.set(
            pdx,
            pd.get(pdx)
                .with_flags(flags & (PageFlags::WRITABLE | PageFlags::USER)),
        );

        let slot = self.table_mut(table).get_mut(ptx);
        let previous = slot.frame();
        match previous {
            Some(old) if old == frame => {}
            Some(old) => {
                alloc.incref(frame);
                let freed = alloc.decref(old);
                log::debug!("{va} remapped from {old} to {frame} (old frame freed: {freed})");
            }
            None => alloc.incref(frame),
        }

        *slot = PtEntry::from_leaf(Leaf::new(frame, flags));
        if previous.is_some() {
            tlb.invalidate(self.root, va);
        }
        Ok(())
    }

    /// The frame mapped at `va` and the leaf slot mapping it.
    ///
    /// Never creates anything; `None` if no present leaf maps `va`.
    pub fn lookup(&mut self, va: VirtualAddress) -> Option<(PhysicalPage, &mut PtEntry)> {
        let slot = self.find(va)?;
        let frame = slot.frame()?;
        Some((frame, slot))
    }

    /// The decoded leaf mapping `va`, if any.
    #[must_use]
    pub fn leaf(&self, va: VirtualAddress) -> Option<Leaf> {
        self.find(va).and_then(|slot| slot.leaf())
    }

    /// Unmap the page at `va`, dropping the leaf's reference on its frame.
    ///
    /// Silently does nothing if `va` is not mapped.
    pub fn remove<A: FrameAlloc, T: TranslationCache>(
        &mut self,
        alloc: &mut A,
        tlb: &mut T,
        va: VirtualAddress,
    ) {
        let Some((frame, slot)) = self.lookup(va) else {
            return;
        };

        *slot = PtEntry::zero();
        let freed = alloc.decref(frame);
        tlb.invalidate(self.root, va);
        log::trace!("{va} unmapped from {frame} (freed: {freed})");
    }

    /// Map `[va, va + size)` to `[pa, pa + size)` with `flags`, creating page
    /// tables as needed. `size` is rounded up to whole frames.
    ///
    /// For permanent kernel mappings only: the mapped frames' reference counts
    /// are not touched, and whatever was mapped in the range before is
    /// overwritten without being released.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if a page table could not be created; the
    /// pages before it stay mapped.
    ///
    /// # Panics
    /// If either range wraps around the end of the 32-bit address space.
    pub fn map_region<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u32,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        debug_assert!(va.is_aligned_to(FRAME_SIZE), "{va} is not frame aligned");
        debug_assert!(pa.is_aligned_to(FRAME_SIZE), "{pa} is not frame aligned");

        let flags = flags & PageFlags::PERMISSIONS;
        let pages = frames_for(size);
        for page in 0..pages {
            let offset = page * FRAME_SIZE;
            let (Some(v), Some(p)) = (va.checked_add(offset), pa.checked_add(offset)) else {
                panic!("region {va}/{pa} + {size:#x} wraps the address space");
            };

            let pdx = PdIndex::of(v);
            let table = self.ensure_table(alloc, pdx)?;
            let pd = self.directory_mut();
            pd.set(
                pdx,
                pd.get(pdx)
                    .with_flags(flags & (PageFlags::WRITABLE | PageFlags::USER)),
            );
            self.table_mut(table)
                .set(PtIndex::of(v), PtEntry::from_leaf(Leaf::new(p.page(), flags)));
        }

        log::debug!("mapped {va} -> {pa} ({pages} pages, {flags:?})");
        Ok(())
    }

    /// Translate a `VirtualAddress` to a `PhysicalAddress` if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let leaf = self.leaf(va)?;
        Some(leaf.frame.join(va.offset()))
    }

    /// Unlink the page table at `index` and give back everything it holds.
    ///
    /// Every present leaf drops its reference, then the directory's reference
    /// on the table frame itself is dropped. No-op for an empty slot.
    pub fn release_table<A: FrameAlloc, T: TranslationCache>(
        &mut self,
        alloc: &mut A,
        tlb: &mut T,
        index: PdIndex,
    ) {
        let Some(table_frame) = self.directory_entry(index).table() else {
            return;
        };

        let table = self.table_mut(table_frame);
        for ptx in PtIndex::all() {
            if let Some(frame) = table.get(ptx).frame() {
                table.set(ptx, PtEntry::zero());
                alloc.decref(frame);
                tlb.invalidate(self.root, index.base() + ptx.as_usize() as u32 * FRAME_SIZE);
            }
        }

        self.directory_mut().set(index, PdEntry::zero());
        alloc.decref(table_frame);
        log::debug!("page table {table_frame} at {} released", index.base());
    }

    /// Log the directory and table entries translating `va`.
    pub fn dump_walk(&self, va: VirtualAddress) {
        let (pdx, ptx) = split_indices(va);
        let pde = self.directory_entry(pdx);
        log::debug!(
            "walk {va}: PDE[{}] = {:#010x} ({:?})",
            pdx.as_usize(),
            pde.raw(),
            pde.flags()
        );
        let Some(table) = pde.table() else {
            log::debug!("walk {va}: no page table");
            return;
        };
        let pte = self.table_mut(table).get(ptx);
        log::debug!(
            "walk {va}: PTE[{}] = {:#010x} ({:?})",
            ptx.as_usize(),
            pte.raw(),
            pte.flags()
        );
    }
}

//! # Memory Manager
//!
//! The single owned context object holding the frame table and the kernel's
//! page directory. Created once at boot by [`MemoryManager::new`] and passed
//! explicitly to every memory operation afterwards.
//!
//! ## Boot sequence
//!
//! ```text
//! MemoryManager::new
//!   ├─ validate the MemoryLayout
//!   ├─ bootstrap: reserve + zero the kernel page directory
//!   ├─ self-map the directory at the page-table window (user R)
//!   ├─ bootstrap: reserve the frame-descriptor array
//!   └─ FrameTable::initialize (bootstrap allocator is consumed here)
//! MemoryManager::map_kernel_regions
//!   ├─ frame-descriptor array at the frame window (user R)
//!   ├─ boot stack below the kernel stack top (kernel RW)
//!   └─ all physical memory at the kernel base (kernel RW)
//! ```

use crate::bootstrap::BootstrapAlloc;
use crate::frame_table::{FrameDescriptor, FrameTable};
use kernel_info::{LayoutError, MemoryLayout};
use kernel_memory_addresses::{FRAME_SHIFT, FRAME_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_vmem::{
    AddressSpace, FrameFill, MapError, PageFlags, PdEntry, PdIndex, PhysMapper, PhysMapperExt,
    PtEntry, TranslationCache,
};

/// Largest number of frames a 32-bit physical address space holds.
const MAX_FRAMES: usize = 1 << (32 - FRAME_SHIFT);

/// Owner of the frame table and the kernel address space.
pub struct MemoryManager<'m, M: PhysMapper> {
    layout: MemoryLayout,
    mapper: &'m M,
    frames: FrameTable<'m, M>,
    kernel_root: PhysicalPage,
    descriptors: PhysicalAddress,
}

impl<'m, M: PhysMapper> MemoryManager<'m, M> {
    /// Bring up physical memory management for a machine of `total_frames`
    /// frames.
    ///
    /// # Errors
    /// The layout's [`LayoutError`] if it is inconsistent.
    ///
    /// # Panics
    /// If the kernel directory and frame-descriptor array do not fit above the
    /// kernel image.
    pub fn new(
        mapper: &'m M,
        layout: MemoryLayout,
        total_frames: usize,
    ) -> Result<Self, LayoutError> {
        layout.validate()?;
        let total_frames = if total_frames > MAX_FRAMES {
            log::warn!("{total_frames} frames exceed the physical address space; using {MAX_FRAMES}");
            MAX_FRAMES
        } else {
            total_frames
        };

        let mut boot = BootstrapAlloc::new(layout.kernel_image.end, total_frames);

        let kernel_root = boot.reserve(size_of::<kernel_vmem::PageDirectory>() as u32).page();
        mapper.zero_frame(kernel_root);
        AddressSpace::from_root(mapper, kernel_root).set_directory_entry(
            PdIndex::of(layout.page_table_window),
            PdEntry::link(kernel_root, PageFlags::USER),
        );

        let descriptor_bytes = (total_frames * size_of::<FrameDescriptor>()) as u32;
        let descriptors = boot.reserve(descriptor_bytes);
        // SAFETY: The array was just reserved above the kernel image and nothing
        // else refers to it.
        let slots: &'m mut [FrameDescriptor] =
            unsafe { mapper.phys_to_slice_mut(descriptors, total_frames) };

        let high_water = boot.finish();
        let frames = FrameTable::initialize(mapper, slots, &layout, high_water);

        log::info!(
            "memory manager: kernel directory at {kernel_root}, {total_frames} frame descriptors at {descriptors}"
        );
        Ok(Self {
            layout,
            mapper,
            frames,
            kernel_root,
            descriptors,
        })
    }

    /// Install the fixed kernel mappings in the kernel directory.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the page tables for them cannot be allocated.
    pub fn map_kernel_regions(&mut self) -> Result<(), MapError> {
        let layout = self.layout;
        let mut kernel = self.kernel_space();

        let descriptor_bytes = (self.frames.total_frames() * size_of::<FrameDescriptor>()) as u32;
        kernel.map_region(
            &mut self.frames,
            layout.frame_window,
            self.descriptors,
            descriptor_bytes,
            PageFlags::USER,
        )?;

        let stack_bottom =
            VirtualAddress::new(layout.kernel_stack_top.as_u32() - layout.kernel_stack_size);
        kernel.map_region(
            &mut self.frames,
            stack_bottom,
            layout.boot_stack,
            layout.kernel_stack_size,
            PageFlags::WRITABLE,
        )?;

        let memory = self.frames.total_frames() as u64 * u64::from(FRAME_SIZE);
        let direct = layout.direct_map_len(memory);
        kernel.map_region(
            &mut self.frames,
            layout.kernel_base,
            PhysicalAddress::zero(),
            direct,
            PageFlags::WRITABLE,
        )?;

        log::info!(
            "kernel regions mapped: descriptors at {}, stack {}..{}, {direct:#x} bytes at {}",
            layout.frame_window,
            stack_bottom,
            layout.kernel_stack_top,
            layout.kernel_base
        );
        Ok(())
    }

    /// The boot configuration the manager was created with.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// The frame holding the kernel's page directory.
    #[inline]
    #[must_use]
    pub const fn kernel_root(&self) -> PhysicalPage {
        self.kernel_root
    }

    /// Physical base of the frame-descriptor array.
    #[inline]
    #[must_use]
    pub const fn descriptors_base(&self) -> PhysicalAddress {
        self.descriptors
    }

    /// The kernel's own address space.
    #[inline]
    #[must_use]
    pub const fn kernel_space(&self) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.mapper, self.kernel_root)
    }

    /// The address space whose directory lives in `root`.
    #[inline]
    #[must_use]
    pub const fn space(&self, root: PhysicalPage) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.mapper, root)
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FrameTable<'m, M> {
        &self.frames
    }

    #[inline]
    pub const fn frames_mut(&mut self) -> &mut FrameTable<'m, M> {
        &mut self.frames
    }

    /// See [`FrameTable::allocate`].
    pub fn allocate(&mut self, fill: FrameFill) -> Option<PhysicalPage> {
        self.frames.allocate(fill)
    }

    /// See [`FrameTable::free`].
    pub fn free(&mut self, frame: PhysicalPage) {
        self.frames.free(frame);
    }

    /// See [`FrameTable::decref`].
    pub fn decref(&mut self, frame: PhysicalPage) -> bool {
        self.frames.decref(frame)
    }

    /// Resolve the leaf slot for `va` in the address space at `root`;
    /// see [`AddressSpace::walk`].
    pub fn walk(
        &mut self,
        root: PhysicalPage,
        va: VirtualAddress,
        create: bool,
    ) -> Option<&'m mut PtEntry> {
        self.space(root).walk(&mut self.frames, va, create)
    }

    /// Map `frame` at `va` in the address space at `root`;
    /// see [`AddressSpace::insert`].
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if a page table could not be allocated.
    pub fn insert<T: TranslationCache>(
        &mut self,
        tlb: &mut T,
        root: PhysicalPage,
        frame: PhysicalPage,
        va: VirtualAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        self.space(root).insert(&mut self.frames, tlb, frame, va, flags)
    }

    /// The frame mapped at `va` in the address space at `root`;
    /// see [`AddressSpace::lookup`].
    #[must_use]
    pub fn lookup(&self, root: PhysicalPage, va: VirtualAddress) -> Option<PhysicalPage> {
        self.space(root).lookup(va).map(|(frame, _)| frame)
    }

    /// Unmap `va` in the address space at `root`; see [`AddressSpace::remove`].
    pub fn remove<T: TranslationCache>(&mut self, tlb: &mut T, root: PhysicalPage, va: VirtualAddress) {
        self.space(root).remove(&mut self.frames, tlb, va);
    }

    /// Create the address space for a new execution context.
    ///
    /// The directory frame is counted like any mapped frame. Everything at and
    /// above the layout's user top is shared with the kernel directory, and the
    /// page-table window maps the new directory itself.
    ///
    /// Returns `None` if no frame is available.
    pub fn new_address_space(&mut self) -> Option<PhysicalPage> {
        let root = self.frames.allocate(FrameFill::Zeroed)?;
        self.frames.incref(root);

        let kernel = self.kernel_space();
        let mut space = self.space(root);
        for index in PdIndex::all().filter(|i| i.base() >= self.layout.user_top) {
            space.set_directory_entry(index, kernel.directory_entry(index));
        }
        space.set_directory_entry(
            PdIndex::of(self.layout.page_table_window),
            PdEntry::link(root, PageFlags::USER),
        );

        log::debug!("address space {root} created");
        Some(root)
    }

    /// Tear down an address space created by [`new_address_space`](Self::new_address_space):
    /// every user mapping and page table below the user top is released, then
    /// the directory frame itself.
    ///
    /// # Panics
    /// If `root` is the kernel's own directory.
    pub fn destroy_address_space<T: TranslationCache>(&mut self, tlb: &mut T, root: PhysicalPage) {
        assert_ne!(root, self.kernel_root, "the kernel address space cannot be destroyed");

        let user_top = self.layout.user_top;
        let mut space = self.space(root);
        for index in PdIndex::all().take_while(|i| i.base() < user_top) {
            space.release_table(&mut self.frames, tlb, index);
        }

        let freed = self.frames.decref(root);
        log::debug!("address space {root} destroyed (directory freed: {freed})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_machine::{FRAMES, small_layout};
    use kernel_info::memory::{KERNEL_BASE, USER_PAGE_TABLES, USER_PAGES};
    use kernel_vmem::testing::{RecordingTlb, TestPhys};
    use kernel_vmem::{Leaf, PtIndex};

    fn va(v: u32) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn frame(n: usize) -> PhysicalPage {
        PhysicalPage::from_frame_number(n)
    }

    fn boot(phys: &TestPhys) -> MemoryManager<'_, TestPhys> {
        MemoryManager::new(phys, small_layout(), FRAMES).expect("layout")
    }

    #[test]
    fn boot_carves_directory_and_descriptors_above_the_kernel() {
        let phys = TestPhys::with_frames(FRAMES);
        let mm = boot(&phys);

        assert_eq!(mm.kernel_root(), frame(22));
        assert_eq!(mm.descriptors_base(), PhysicalAddress::new(23 * FRAME_SIZE));
        assert_eq!(mm.frames().free_count(), 32 - 1 - 5 - 3);
        assert_eq!(mm.frames().verify(), Ok(23));
        for n in [0, 16, 20, 21, 22, 23] {
            assert_eq!(mm.frames().ref_count(frame(n)), 1, "frame {n}");
        }
    }

    #[test]
    fn kernel_directory_maps_itself_read_only_for_users() {
        let phys = TestPhys::with_frames(FRAMES);
        let mm = boot(&phys);
        let kernel = mm.kernel_space();

        let pde = kernel.directory_entry(PdIndex::of(va(USER_PAGE_TABLES)));
        assert_eq!(pde.table(), Some(mm.kernel_root()));
        assert_eq!(pde.flags(), PageFlags::USER);

        // Reading the directory through the window yields the directory itself.
        let window_slot = PdIndex::of(va(USER_PAGE_TABLES)).as_usize() as u32;
        let self_va = va(USER_PAGE_TABLES + window_slot * FRAME_SIZE);
        assert_eq!(kernel.translate(self_va), Some(mm.kernel_root().base()));
    }

    #[test]
    fn rejects_inconsistent_layouts() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut layout = small_layout();
        layout.kernel_image.start = PhysicalAddress::new(20 * FRAME_SIZE);
        assert!(matches!(
            MemoryManager::new(&phys, layout, FRAMES),
            Err(LayoutError::KernelOverlapsIoHole)
        ));
    }

    #[test]
    #[should_panic(expected = "bootstrap allocator out of memory")]
    fn machine_too_small_for_boot_structures() {
        let phys = TestPhys::with_frames(FRAMES);
        let _ = MemoryManager::new(&phys, small_layout(), 23);
    }

    #[test]
    fn table_frame_reuses_the_freed_page() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut mm = boot(&phys);
        let root = mm.kernel_root();
        let mut tlb = RecordingTlb::default();

        let p0 = mm.allocate(FrameFill::Zeroed).expect("p0");
        let p1 = mm.allocate(FrameFill::Zeroed).expect("p1");
        let p2 = mm.allocate(FrameFill::Zeroed).expect("p2");
        assert!(p0 != p1 && p1 != p2 && p0 != p2);
        phys.fill_frame(p0, 0xFF);

        // With no free frames left, a mapping needing a new table fails cleanly.
        let mut hoarded = Vec::new();
        while let Some(page) = mm.allocate(FrameFill::Uninitialized) {
            hoarded.push(page);
        }
        assert_eq!(
            mm.insert(&mut tlb, root, p1, va(0), PageFlags::WRITABLE),
            Err(MapError::OutOfMemory)
        );
        assert_eq!(mm.frames().ref_count(p1), 0);

        // Freeing P0 lets the same insertion succeed, with P0 as the table.
        mm.free(p0);
        mm.insert(&mut tlb, root, p1, va(0), PageFlags::WRITABLE)
            .expect("insert");
        let kernel = mm.kernel_space();
        assert_eq!(kernel.directory_entry(PdIndex::new(0)).table(), Some(p0));
        assert_eq!(mm.frames().ref_count(p0), 1);
        assert_eq!(mm.frames().ref_count(p1), 1);
        assert_eq!(mm.lookup(root, va(0)), Some(p1));

        // The new table is zero apart from the one entry just written.
        let table = phys.frame_contents(p0);
        assert_eq!(&table[..4], &PtEntry::from_leaf(Leaf::new(p1, PageFlags::WRITABLE)).raw().to_le_bytes());
        assert!(table[4..].iter().all(|&b| b == 0));

        // A second page under the same table needs no new frame.
        mm.insert(&mut tlb, root, p2, va(FRAME_SIZE), PageFlags::WRITABLE)
            .expect("insert");
        assert_eq!(mm.frames().ref_count(p0), 1);
        assert_eq!(mm.frames().ref_count(p2), 1);

        // Replacing P2 with P1 at the same address frees P2 for the next allocation.
        mm.insert(&mut tlb, root, p1, va(FRAME_SIZE), PageFlags::WRITABLE)
            .expect("insert");
        assert_eq!(mm.lookup(root, va(FRAME_SIZE)), Some(p1));
        assert_eq!(mm.frames().ref_count(p1), 2);
        assert_eq!(mm.frames().ref_count(p2), 0);
        assert_eq!(tlb.flushed, vec![va(FRAME_SIZE).page()]);
        assert_eq!(mm.allocate(FrameFill::Zeroed), Some(p2));

        // Unmapping drops P1's references one at a time.
        mm.remove(&mut tlb, root, va(0));
        assert_eq!(mm.frames().ref_count(p1), 1);
        assert_eq!(mm.lookup(root, va(0)), None);
        mm.remove(&mut tlb, root, va(FRAME_SIZE));
        assert_eq!(mm.frames().ref_count(p1), 0);
        assert!(mm.frames().is_free(p1));

        // The emptied table stays installed.
        assert_eq!(mm.frames().ref_count(p0), 1);
        assert!(mm.walk(root, va(0), false).is_some());
    }

    #[test]
    fn walk_without_create_leaves_the_directory_alone() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut mm = boot(&phys);
        let root = mm.kernel_root();
        let free = mm.frames().free_count();

        assert!(mm.walk(root, va(0x0800_0000), false).is_none());
        assert_eq!(mm.frames().free_count(), free);

        let slot = mm.walk(root, va(0x0800_5000), true).expect("slot");
        assert_eq!(*slot, PtEntry::zero());
        assert_eq!(mm.frames().free_count(), free - 1);
        assert!(mm.walk(root, va(0x0800_0000), false).is_some());
    }

    #[test]
    fn kernel_regions_translate_as_laid_out() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut mm = boot(&phys);
        mm.map_kernel_regions().expect("kernel regions");
        let kernel = mm.kernel_space();
        let layout = small_layout();

        // Frame-descriptor window, user read-only.
        let descriptors = kernel.leaf(va(USER_PAGES)).expect("descriptor window");
        assert_eq!(descriptors.frame, mm.descriptors_base().page());
        assert!(descriptors.is_user() && !descriptors.is_writable());
        assert_eq!(kernel.translate(va(USER_PAGES + 0x10)), Some(mm.descriptors_base() + 0x10));
        assert!(kernel.directory_entry(PdIndex::of(va(USER_PAGES))).flags().contains(PageFlags::USER));

        // Kernel stack is backed by the boot stack; the gap below stays unmapped.
        let stack_bottom = layout.kernel_stack_top.as_u32() - layout.kernel_stack_size;
        let stack = kernel.leaf(va(stack_bottom)).expect("stack");
        assert_eq!(stack.frame, layout.boot_stack.page());
        assert!(stack.is_writable() && !stack.is_user());
        assert_eq!(kernel.translate(va(stack_bottom - FRAME_SIZE)), None);

        // All physical memory at the kernel base, and nothing beyond it.
        for n in 0..FRAMES as u32 {
            let pa = PhysicalAddress::new(n * FRAME_SIZE + 0x123);
            assert_eq!(kernel.translate(va(KERNEL_BASE + n * FRAME_SIZE + 0x123)), Some(pa));
        }
        assert_eq!(kernel.translate(va(KERNEL_BASE + FRAMES as u32 * FRAME_SIZE)), None);
        let direct = kernel.leaf(va(KERNEL_BASE)).expect("direct map");
        assert!(direct.is_writable() && !direct.is_user());

        // Only page tables came out of the pool: descriptors, stack, direct map.
        assert_eq!(mm.frames().free_count(), 23 - 3);
        assert_eq!(mm.frames().verify(), Ok(20));
    }

    #[test]
    fn writes_through_an_installed_mapping_reach_the_frame() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut mm = boot(&phys);
        let root = mm.kernel_root();
        let mut tlb = RecordingTlb::default();

        let page = mm.allocate(FrameFill::Zeroed).expect("frame");
        mm.insert(&mut tlb, root, page, va(0x0040_0000), PageFlags::WRITABLE)
            .expect("insert");

        let target = mm.kernel_space().translate(va(0x0040_0ABC)).expect("mapped");
        phys.write_u32(target, 0x0102_0304);
        assert_eq!(phys.read_u32(page.join(0xABC)), 0x0102_0304);

        // Remapping the address to a fresh frame hides the old contents.
        let other = mm.allocate(FrameFill::Zeroed).expect("frame");
        mm.insert(&mut tlb, root, other, va(0x0040_0000), PageFlags::WRITABLE)
            .expect("insert");
        let target = mm.kernel_space().translate(va(0x0040_0ABC)).expect("mapped");
        assert_eq!(phys.read_u32(target), 0);
    }

    #[test]
    fn address_spaces_share_kernel_tables_and_release_user_ones() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut mm = boot(&phys);
        mm.map_kernel_regions().expect("kernel regions");
        let mut tlb = RecordingTlb::default();
        let free_before = mm.frames().free_count();

        let root = mm.new_address_space().expect("directory");
        assert_eq!(mm.frames().ref_count(root), 1);

        let space = mm.space(root);
        let kernel = mm.kernel_space();
        assert_eq!(space.translate(va(KERNEL_BASE + 0x5000)), kernel.translate(va(KERNEL_BASE + 0x5000)));
        assert_eq!(space.translate(va(USER_PAGES)), Some(mm.descriptors_base()));
        let window = space.directory_entry(PdIndex::of(va(USER_PAGE_TABLES)));
        assert_eq!(window.table(), Some(root));

        let data = mm.allocate(FrameFill::Zeroed).expect("frame");
        mm.insert(&mut tlb, root, data, va(0x0080_0000), PageFlags::USER | PageFlags::WRITABLE)
            .expect("insert");
        mm.insert(&mut tlb, root, data, va(0x00C0_0000), PageFlags::USER)
            .expect("insert");
        assert_eq!(mm.frames().ref_count(data), 2);
        assert_eq!(mm.lookup(mm.kernel_root(), va(0x0080_0000)), None);

        mm.destroy_address_space(&mut tlb, root);
        assert_eq!(mm.frames().free_count(), free_before);
        assert_eq!(mm.frames().verify(), Ok(free_before));

        // Kernel tables were shared, not released.
        assert!(mm.kernel_space().translate(va(KERNEL_BASE)).is_some());
        assert_eq!(tlb.flushed.len(), 2);
    }

    #[test]
    fn new_address_space_reports_exhaustion() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut mm = boot(&phys);
        while mm.allocate(FrameFill::Uninitialized).is_some() {}
        assert_eq!(mm.new_address_space(), None);
    }

    #[test]
    #[should_panic(expected = "cannot be destroyed")]
    fn kernel_space_cannot_be_destroyed() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut mm = boot(&phys);
        let root = mm.kernel_root();
        mm.destroy_address_space(&mut RecordingTlb::default(), root);
    }

    #[test]
    fn slot_index_matches_hardware_layout() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut mm = boot(&phys);
        let root = mm.kernel_root();
        let v = va(0x0040_0000 + 5 * FRAME_SIZE);

        *mm.walk(root, v, true).expect("slot") = PtEntry::from_raw(0xABCD_E001);
        let table = mm.kernel_space().directory_entry(PdIndex::of(v)).table().expect("table");
        let slot_pa = table.join(PtIndex::of(v).as_usize() as u32 * 4);
        assert_eq!(phys.read_u32(slot_pa), 0xABCD_E001);
    }
}

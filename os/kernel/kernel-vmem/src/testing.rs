//! In-memory stand-ins for physical RAM, the frame allocator and the TLB.
//!
//! Physical addresses are byte offsets into one zeroed, frame-aligned heap
//! block, so page-table code can run unchanged in host tests.

use crate::{FrameAlloc, FrameFill, PhysMapper, PhysMapperExt, TranslationCache};
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use alloc::vec::Vec;
use core::ptr::NonNull;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalPage, VirtualPage};

/// Simulated physical memory of a fixed number of frames.
pub struct TestPhys {
    ram: NonNull<u8>,
    layout: Layout,
}

impl TestPhys {
    /// Allocate `frames` zeroed frames of simulated RAM.
    #[must_use]
    pub fn with_frames(frames: usize) -> Self {
        let layout = match Layout::from_size_align(frames * FRAME_SIZE as usize, FRAME_SIZE as usize) {
            Ok(layout) if layout.size() > 0 => layout,
            _ => panic!("cannot simulate {frames} frames of RAM"),
        };
        let ram = NonNull::new(unsafe { alloc_zeroed(layout) })
            .unwrap_or_else(|| handle_alloc_error(layout));
        Self { ram, layout }
    }

    /// Number of simulated frames.
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.layout.size() / FRAME_SIZE as usize
    }

    /// Bytes of simulated RAM.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Copy of the contents of `page`.
    #[must_use]
    pub fn frame_contents(&self, page: PhysicalPage) -> Vec<u8> {
        self.frame_bytes_mut(page).to_vec()
    }

    /// Set every byte of `page` to `byte`.
    pub fn fill_frame(&self, page: PhysicalPage, byte: u8) {
        self.frame_bytes_mut(page).fill(byte);
    }

    #[must_use]
    pub fn read_u32(&self, pa: PhysicalAddress) -> u32 {
        *unsafe { self.phys_to_mut::<u32>(pa) }
    }

    pub fn write_u32(&self, pa: PhysicalAddress, value: u32) {
        *unsafe { self.phys_to_mut::<u32>(pa) } = value;
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let end = pa.as_usize() + size_of::<T>();
        assert!(end <= self.len(), "{pa} is outside simulated RAM");
        debug_assert!(pa.as_usize().is_multiple_of(align_of::<T>()));

        // SAFETY: In bounds of the owned block; the caller promises `T` matches the bytes.
        unsafe { &mut *self.ram.as_ptr().add(pa.as_usize()).cast::<T>() }
    }
}

impl Drop for TestPhys {
    fn drop(&mut self) {
        unsafe { dealloc(self.ram.as_ptr(), self.layout) }
    }
}

/// Minimal reference-counting frame allocator over [`TestPhys`].
///
/// Frames below `first_free` are never handed out. Allocation always returns
/// the lowest free frame.
pub struct TestFrames<'p> {
    phys: &'p TestPhys,
    counts: Vec<u16>,
    free: Vec<PhysicalPage>,
}

impl<'p> TestFrames<'p> {
    #[must_use]
    pub fn new(phys: &'p TestPhys, first_free: usize) -> Self {
        let free = (first_free..phys.frames())
            .rev()
            .map(PhysicalPage::from_frame_number)
            .collect();
        Self {
            phys,
            counts: alloc::vec![0; phys.frames()],
            free,
        }
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn is_free(&self, frame: PhysicalPage) -> bool {
        self.free.contains(&frame)
    }
}

impl FrameAlloc for TestFrames<'_> {
    fn alloc_frame(&mut self, fill: FrameFill) -> Option<PhysicalPage> {
        let frame = self.free.pop()?;
        if fill == FrameFill::Zeroed {
            self.phys.zero_frame(frame);
        }
        Some(frame)
    }

    fn incref(&mut self, frame: PhysicalPage) {
        self.counts[frame.frame_number()] += 1;
    }

    fn decref(&mut self, frame: PhysicalPage) -> bool {
        let count = &mut self.counts[frame.frame_number()];
        assert!(*count > 0, "reference count underflow on {frame}");
        *count -= 1;
        if *count == 0 {
            self.free.push(frame);
            return true;
        }
        false
    }

    fn ref_count(&self, frame: PhysicalPage) -> u16 {
        self.counts[frame.frame_number()]
    }
}

/// A [`TranslationCache`] that records every flushed page.
#[derive(Debug, Default)]
pub struct RecordingTlb {
    pub active: Option<PhysicalPage>,
    pub flushed: Vec<VirtualPage>,
}

impl RecordingTlb {
    /// A cache for a processor running the address space rooted at `root`.
    #[must_use]
    pub fn running(root: PhysicalPage) -> Self {
        Self {
            active: Some(root),
            flushed: Vec::new(),
        }
    }
}

impl TranslationCache for RecordingTlb {
    fn active_root(&self) -> Option<PhysicalPage> {
        self.active
    }

    fn flush_page(&mut self, page: VirtualPage) {
        self.flushed.push(page);
    }
}

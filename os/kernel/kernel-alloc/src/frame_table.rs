//! # Physical Page Allocator
//!
//! One [`FrameDescriptor`] per physical frame, stored in a contiguous array
//! indexed by frame number, plus an intrusive singly linked free list threaded
//! through the array by index.
//!
//! ## Invariants
//!
//! - A frame is free iff it is reachable from the free-list head.
//! - A frame on the free list has a reference count of zero.
//! - [`FrameTable::free_count`] equals the length of the free list.
//!
//! [`FrameTable::verify`] checks these and reports the first violation.

use core::fmt;
use kernel_info::{MemoryLayout, PhysicalRange};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_vmem::{FrameAlloc, FrameFill, PhysMapper, PhysMapperExt};

/// Free-list link meaning "none".
const NO_FRAME: u32 = u32::MAX;

/// Bookkeeping for one physical frame.
///
/// The array of descriptors is also exposed read-only to user mode, so the
/// layout is fixed.
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct FrameDescriptor {
    next_free: u32,
    ref_count: u16,
    _reserved: u16,
}

impl FrameDescriptor {
    const UNLINKED: Self = Self {
        next_free: NO_FRAME,
        ref_count: 0,
        _reserved: 0,
    };

    /// Number of live references to the frame.
    #[inline]
    #[must_use]
    pub const fn ref_count(&self) -> u16 {
        self.ref_count
    }

    /// Frame number of the free-list successor, if any.
    #[inline]
    #[must_use]
    pub const fn next_free(&self) -> Option<usize> {
        if self.next_free == NO_FRAME {
            None
        } else {
            Some(self.next_free as usize)
        }
    }
}

impl fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDescriptor")
            .field("ref_count", &self.ref_count)
            .field("next_free", &self.next_free())
            .finish()
    }
}

/// Free-list corruption detected by [`FrameTable::verify`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameTableError {
    #[error("free list links to frame #{0}, outside the frame table")]
    OutOfRange(usize),
    #[error("free list does not terminate")]
    Cycle,
    #[error("frame #{frame} is on the free list with {count} references")]
    ReferencedFrameOnFreeList { frame: usize, count: u16 },
    #[error("free list holds {listed} frames but {counted} are accounted as free")]
    CountMismatch { listed: usize, counted: usize },
}

/// The physical page allocator.
pub struct FrameTable<'m, M: PhysMapper> {
    frames: &'m mut [FrameDescriptor],
    free_head: u32,
    free_count: usize,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> FrameTable<'m, M> {
    /// Build the free list over `frames`, one descriptor per physical frame.
    ///
    /// Frame 0, the I/O hole and everything from the kernel load address up
    /// to the bootstrap `high_water` mark are marked in use (reference count 1)
    /// and never linked; their contents are not touched. All other frames are
    /// linked in ascending order.
    pub fn initialize(
        mapper: &'m M,
        frames: &'m mut [FrameDescriptor],
        layout: &MemoryLayout,
        high_water: PhysicalAddress,
    ) -> Self {
        frames.fill(FrameDescriptor::UNLINKED);

        let total = frames.len();
        let hole = layout.io_hole.frames();
        let in_use = PhysicalRange::new(layout.kernel_image.start, high_water).frames();

        let mut table = Self {
            frames,
            free_head: NO_FRAME,
            free_count: 0,
            mapper,
        };

        for n in (0..total).rev() {
            if n == 0 || hole.contains(&n) || in_use.contains(&n) {
                table.frames[n].ref_count = 1;
            } else {
                table.free(PhysicalPage::from_frame_number(n));
            }
        }

        log::info!(
            "frame table: {total} frames, {} free, {} reserved (I/O hole {:?}, kernel {:?})",
            table.free_count,
            total - table.free_count,
            hole,
            in_use
        );
        table
    }

    /// Number of frames described by the table.
    #[inline]
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames on the free list.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free_count
    }

    /// All descriptors, indexed by frame number.
    #[inline]
    #[must_use]
    pub fn descriptors(&self) -> &[FrameDescriptor] {
        self.frames
    }

    fn descriptor_mut(&mut self, frame: PhysicalPage) -> &mut FrameDescriptor {
        let n = frame.frame_number();
        let total = self.frames.len();
        match self.frames.get_mut(n) {
            Some(desc) => desc,
            None => panic!("frame {frame} is outside the frame table ({total} frames)"),
        }
    }

    /// Pop the head of the free list.
    ///
    /// The frame comes back with a reference count of zero; the caller takes
    /// ownership by incrementing it. Returns `None` when no frame is free.
    pub fn allocate(&mut self, fill: FrameFill) -> Option<PhysicalPage> {
        if self.free_head == NO_FRAME {
            log::trace!("allocate: out of frames");
            return None;
        }

        let n = self.free_head as usize;
        let desc = &mut self.frames[n];
        self.free_head = desc.next_free;
        desc.next_free = NO_FRAME;
        desc.ref_count = 0;
        self.free_count -= 1;

        let frame = PhysicalPage::from_frame_number(n);
        if fill == FrameFill::Zeroed {
            self.mapper.zero_frame(frame);
        }
        log::trace!("allocate: {frame} ({fill:?})");
        Some(frame)
    }

    /// Push `frame` onto the free list.
    ///
    /// Does nothing for a frame outside the table. The caller guarantees the
    /// reference count is already zero.
    pub fn free(&mut self, frame: PhysicalPage) {
        let n = frame.frame_number();
        let head = self.free_head;
        let Some(desc) = self.frames.get_mut(n) else {
            log::warn!("free: {frame} is outside the frame table");
            return;
        };

        desc.next_free = head;
        self.free_head = n as u32;
        self.free_count += 1;
        log::trace!("free: {frame}");
    }

    /// Record one more reference to `frame`.
    ///
    /// # Panics
    /// If `frame` is outside the table or the count would overflow.
    pub fn incref(&mut self, frame: PhysicalPage) {
        let desc = self.descriptor_mut(frame);
        desc.ref_count = match desc.ref_count.checked_add(1) {
            Some(count) => count,
            None => panic!("reference count overflow on {frame}"),
        };
    }

    /// Drop one reference to `frame`, freeing it when none remain.
    /// Returns `true` if the frame went back to the free list.
    ///
    /// # Panics
    /// If `frame` is outside the table or has no references.
    pub fn decref(&mut self, frame: PhysicalPage) -> bool {
        let desc = self.descriptor_mut(frame);
        desc.ref_count = match desc.ref_count.checked_sub(1) {
            Some(count) => count,
            None => panic!("reference count underflow on {frame}"),
        };
        if desc.ref_count == 0 {
            self.free(frame);
            return true;
        }
        false
    }

    /// Current reference count of `frame`.
    ///
    /// # Panics
    /// If `frame` is outside the table.
    #[must_use]
    pub fn ref_count(&self, frame: PhysicalPage) -> u16 {
        match self.frames.get(frame.frame_number()) {
            Some(desc) => desc.ref_count,
            None => panic!("frame {frame} is outside the frame table"),
        }
    }

    /// Force `frame`'s reference count to zero and return it to the pool,
    /// regardless of who still references it.
    pub fn reclaim(&mut self, frame: PhysicalPage) {
        if let Some(desc) = self.frames.get_mut(frame.frame_number()) {
            log::debug!("reclaim: {frame} had {} references", desc.ref_count);
            desc.ref_count = 0;
        }
        self.free(frame);
    }

    /// Returns `true` if `frame` is on the free list.
    #[must_use]
    pub fn is_free(&self, frame: PhysicalPage) -> bool {
        self.free_frames().any(|f| f == frame)
    }

    /// Walk the free list from its head.
    ///
    /// Stops early at an out-of-range link and after visiting as many frames
    /// as the table holds, so a corrupted list cannot loop forever.
    pub fn free_frames(&self) -> impl Iterator<Item = PhysicalPage> + '_ {
        let mut next = self.free_head;
        let mut budget = self.frames.len();
        core::iter::from_fn(move || {
            if next == NO_FRAME || budget == 0 {
                return None;
            }
            let desc = self.frames.get(next as usize)?;
            budget -= 1;
            let frame = PhysicalPage::from_frame_number(next as usize);
            next = desc.next_free;
            Some(frame)
        })
    }

    /// Check the free list against the table's invariants.
    ///
    /// Returns the number of free frames.
    ///
    /// # Errors
    /// The first [`FrameTableError`] found while walking the list.
    pub fn verify(&self) -> Result<usize, FrameTableError> {
        let mut next = self.free_head;
        let mut listed = 0;
        while next != NO_FRAME {
            let n = next as usize;
            let Some(desc) = self.frames.get(n) else {
                return Err(FrameTableError::OutOfRange(n));
            };
            if listed == self.frames.len() {
                return Err(FrameTableError::Cycle);
            }
            if desc.ref_count != 0 {
                return Err(FrameTableError::ReferencedFrameOnFreeList {
                    frame: n,
                    count: desc.ref_count,
                });
            }
            listed += 1;
            next = desc.next_free;
        }

        if listed != self.free_count {
            return Err(FrameTableError::CountMismatch {
                listed,
                counted: self.free_count,
            });
        }
        Ok(listed)
    }
}

impl<M: PhysMapper> FrameAlloc for FrameTable<'_, M> {
    fn alloc_frame(&mut self, fill: FrameFill) -> Option<PhysicalPage> {
        self.allocate(fill)
    }

    fn incref(&mut self, frame: PhysicalPage) {
        Self::incref(self, frame);
    }

    fn decref(&mut self, frame: PhysicalPage) -> bool {
        Self::decref(self, frame)
    }

    fn ref_count(&self, frame: PhysicalPage) -> u16 {
        Self::ref_count(self, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_machine::{FRAMES, descriptors, small_layout};
    use kernel_memory_addresses::FRAME_SIZE;
    use kernel_vmem::testing::TestPhys;

    fn frame(n: usize) -> PhysicalPage {
        PhysicalPage::from_frame_number(n)
    }

    /// High-water mark after the directory (frame 22) and descriptors (frame 23).
    fn high_water() -> PhysicalAddress {
        PhysicalAddress::new(24 * FRAME_SIZE)
    }

    #[test]
    fn free_list_excludes_reserved_frames() {
        let phys = TestPhys::with_frames(FRAMES);
        let table = FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());

        assert_eq!(table.free_count(), 32 - 1 - 5 - 3);
        assert_eq!(table.verify(), Ok(23));

        for n in [0, 16, 17, 18, 19, 20, 21, 22, 23] {
            assert!(!table.is_free(frame(n)), "frame {n} must not be free");
            assert!(table.ref_count(frame(n)) >= 1, "frame {n} must be referenced");
        }

        let listed: Vec<_> = table.free_frames().map(PhysicalPage::frame_number).collect();
        let expected: Vec<_> = (1..16).chain(24..32).collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn allocation_pops_the_lowest_frame_and_free_pushes_back() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());

        let p0 = table.allocate(FrameFill::Uninitialized).expect("p0");
        let p1 = table.allocate(FrameFill::Uninitialized).expect("p1");
        let p2 = table.allocate(FrameFill::Uninitialized).expect("p2");
        assert_eq!((p0, p1, p2), (frame(1), frame(2), frame(3)));
        assert_eq!(table.ref_count(p0), 0);
        assert_eq!(table.free_count(), 20);

        table.free(p0);
        assert_eq!(table.allocate(FrameFill::Uninitialized), Some(p0));
    }

    #[test]
    fn zero_fill_clears_reused_frames() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());

        let page = table.allocate(FrameFill::Uninitialized).expect("frame");
        phys.fill_frame(page, 0x97);
        table.free(page);

        let dirty = table.allocate(FrameFill::Uninitialized).expect("frame");
        assert_eq!(dirty, page);
        assert!(phys.frame_contents(dirty).iter().all(|&b| b == 0x97));
        table.free(dirty);

        let clean = table.allocate(FrameFill::Zeroed).expect("frame");
        assert_eq!(clean, page);
        assert!(phys.frame_contents(clean).iter().all(|&b| b == 0));
    }

    #[test]
    fn exhaustion_round_trip_restores_the_pool() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());
        let before = table.free_count();

        let mut taken = Vec::new();
        while let Some(page) = table.allocate(FrameFill::Uninitialized) {
            taken.push(page);
        }
        assert_eq!(taken.len(), before);
        assert_eq!(table.free_count(), 0);
        assert_eq!(table.allocate(FrameFill::Zeroed), None);

        for page in taken {
            table.free(page);
        }
        assert_eq!(table.free_count(), before);
        assert_eq!(table.verify(), Ok(before));
    }

    #[test]
    fn decref_frees_on_last_reference() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());
        let page = table.allocate(FrameFill::Zeroed).expect("frame");

        table.incref(page);
        table.incref(page);
        assert!(!table.decref(page));
        assert!(!table.is_free(page));
        assert!(table.decref(page));
        assert!(table.is_free(page));
        assert_eq!(table.verify(), Ok(23));
    }

    #[test]
    #[should_panic(expected = "reference count underflow")]
    fn decref_underflow_is_fatal() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());
        let page = table.allocate(FrameFill::Zeroed).expect("frame");
        table.decref(page);
    }

    #[test]
    #[should_panic(expected = "outside the frame table")]
    fn decref_out_of_range_is_fatal() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());
        table.decref(frame(FRAMES));
    }

    #[test]
    fn free_out_of_range_is_ignored() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());
        table.free(frame(FRAMES + 5));
        assert_eq!(table.verify(), Ok(23));
    }

    #[test]
    fn reclaim_forces_a_frame_back() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());
        let page = table.allocate(FrameFill::Zeroed).expect("frame");
        table.incref(page);
        table.incref(page);

        table.reclaim(page);
        assert_eq!(table.ref_count(page), 0);
        assert!(table.is_free(page));
        assert_eq!(table.verify(), Ok(23));
    }

    #[test]
    fn allocate_hands_out_unreferenced_frames() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());
        let page = table.allocate(FrameFill::Zeroed).expect("frame");
        table.incref(page);

        // Pushed back while still counted; the next owner starts from zero.
        table.free(page);
        assert_eq!(table.allocate(FrameFill::Zeroed), Some(page));
        assert_eq!(table.ref_count(page), 0);
        table.incref(page);
        assert!(table.decref(page));
    }

    #[test]
    fn verify_reports_corruption() {
        let phys = TestPhys::with_frames(FRAMES);
        let mut table =
            FrameTable::initialize(&phys, descriptors(&phys), &small_layout(), high_water());

        table.frames[1].ref_count = 2;
        assert_eq!(
            table.verify(),
            Err(FrameTableError::ReferencedFrameOnFreeList { frame: 1, count: 2 })
        );
        table.frames[1].ref_count = 0;

        table.free_count += 1;
        assert_eq!(
            table.verify(),
            Err(FrameTableError::CountMismatch { listed: 23, counted: 24 })
        );
        table.free_count -= 1;

        table.frames[31].next_free = 1;
        assert_eq!(table.verify(), Err(FrameTableError::Cycle));

        table.frames[31].next_free = 99;
        assert_eq!(table.verify(), Err(FrameTableError::OutOfRange(99)));
    }
}

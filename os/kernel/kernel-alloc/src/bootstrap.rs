//! # Bootstrap Allocator
//!
//! A bump allocator over the physical memory directly above the kernel image.
//! It exists only to carve out the structures the frame table itself depends
//! on (the kernel's page directory and the frame-descriptor array).
//!
//! [`BootstrapAlloc::finish`] consumes the allocator and yields the high-water
//! mark; the frame table marks everything below it as in use, so nothing can
//! be reserved once the free list exists.

use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, align_up, frames_for};

/// Bump allocator used before the frame table exists.
#[derive(Debug)]
pub struct BootstrapAlloc {
    /// Next free byte; always frame aligned.
    next: PhysicalAddress,
    /// End of physical memory in bytes.
    limit: u64,
}

impl BootstrapAlloc {
    /// Start allocating at the first frame boundary at or above `kernel_end`,
    /// in a machine of `total_frames` frames.
    #[must_use]
    pub fn new(kernel_end: PhysicalAddress, total_frames: usize) -> Self {
        let next = PhysicalAddress::new(align_up(kernel_end.as_u32(), FRAME_SIZE));
        let limit = total_frames as u64 * u64::from(FRAME_SIZE);
        log::debug!("bootstrap allocations start at {next}, memory ends at {limit:#x}");
        Self { next, limit }
    }

    /// Reserve `bytes` bytes (rounded up to whole frames) and return their
    /// physical base. The memory is not cleared.
    ///
    /// `reserve(0)` returns the current high-water mark without advancing it.
    ///
    /// # Panics
    /// If the reservation does not fit into physical memory.
    pub fn reserve(&mut self, bytes: u32) -> PhysicalAddress {
        let start = self.next;
        if bytes == 0 {
            return start;
        }

        let size = u64::from(frames_for(bytes)) * u64::from(FRAME_SIZE);
        let end = u64::from(start.as_u32()) + size;
        let next = match u32::try_from(end) {
            Ok(next) if end <= self.limit => next,
            _ => panic!(
                "bootstrap allocator out of memory: {bytes:#x} bytes requested at {start}, memory ends at {:#x}",
                self.limit
            ),
        };

        self.next = PhysicalAddress::new(next);
        log::info!("bootstrap: reserved {bytes:#x} bytes at {start}");
        start
    }

    /// The first byte that has not been handed out.
    #[inline]
    #[must_use]
    pub const fn high_water(&self) -> PhysicalAddress {
        self.next
    }

    /// Stop allocating and return the final high-water mark.
    #[must_use]
    pub fn finish(self) -> PhysicalAddress {
        log::debug!("bootstrap allocations end at {}", self.next);
        self.next
    }
}

use crate::memory::IO_HOLE_END;
use kernel_memory_addresses::FRAME_SIZE;

/// Installed memory as reported by the platform's non-volatile RAM, in KiB.
///
/// Base memory is the conventional memory below the I/O hole; extended memory
/// starts at [`IO_HOLE_END`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemorySize {
    pub base_kib: u32,
    pub extended_kib: u32,
}

impl MemorySize {
    #[must_use]
    pub const fn new(base_kib: u32, extended_kib: u32) -> Self {
        Self {
            base_kib,
            extended_kib,
        }
    }

    /// Frames of base memory.
    #[must_use]
    pub const fn base_frames(&self) -> usize {
        (self.base_kib / (FRAME_SIZE / 1024)) as usize
    }

    /// Frames of extended memory.
    #[must_use]
    pub const fn extended_frames(&self) -> usize {
        (self.extended_kib / (FRAME_SIZE / 1024)) as usize
    }

    /// Total number of physical frames the frame table has to describe.
    ///
    /// With extended memory present this counts every frame up to its end,
    /// I/O hole included; otherwise only base memory exists.
    #[must_use]
    pub const fn total_frames(&self) -> usize {
        if self.extended_frames() > 0 {
            (IO_HOLE_END / FRAME_SIZE) as usize + self.extended_frames()
        } else {
            self.base_frames()
        }
    }

    /// Log the detected sizes.
    pub fn log(&self) {
        log::info!(
            "Physical memory: {}K available, base = {}K, extended = {}K",
            self.total_frames() * (FRAME_SIZE / 1024) as usize,
            self.base_frames() * (FRAME_SIZE / 1024) as usize,
            self.extended_frames() * (FRAME_SIZE / 1024) as usize,
        );
    }
}

use crate::{FRAME_OFFSET_MASK, FRAME_SHIFT, FRAME_SIZE, PhysicalAddress};
use core::fmt;

/// Physical page frame base.
///
/// A `PhysicalPage` represents the **frame-aligned base** of one physical page
/// frame ([`FRAME_SIZE`] bytes). The frame number (`base >> 12`) doubles as the
/// index into the kernel's frame-descriptor table.
///
/// ### Invariants
/// - The low [`FRAME_SHIFT`] bits of the base are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::new(0x0010_2042);
/// let pp = pa.page();
/// assert_eq!(pp.base().as_u32(), 0x0010_2000);
/// assert_eq!(pp.join(pa.offset()), pa);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u32);

impl PhysicalPage {
    /// Frame containing `p` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(p: PhysicalAddress) -> Self {
        Self(p.as_u32() & !FRAME_OFFSET_MASK)
    }

    /// Frame with the given frame number.
    ///
    /// ### Debug assertions
    /// - Asserts the frame lies inside the 32-bit physical address space.
    #[inline]
    #[must_use]
    pub const fn from_frame_number(n: usize) -> Self {
        debug_assert!(n < (1 << (32 - FRAME_SHIFT)));
        Self((n as u32) << FRAME_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> usize {
        (self.0 >> FRAME_SHIFT) as usize
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: u32) -> PhysicalAddress {
        debug_assert!(off < FRAME_SIZE);
        PhysicalAddress::new(self.0 | (off & FRAME_OFFSET_MASK))
    }

    /// The frame directly above this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + FRAME_SIZE)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/#{}", self.0, self.frame_number())
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:08X})", self.0)
    }
}

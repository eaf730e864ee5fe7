use crate::{FRAME_OFFSET_MASK, FRAME_SIZE, VirtualAddress};
use core::fmt;

/// Virtual page base.
///
/// The page-aligned base of one virtual page; the unit at which leaf entries
/// map memory and at which the translation cache is invalidated.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u32);

impl VirtualPage {
    /// Page that contains `va` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(va: VirtualAddress) -> Self {
        Self(va.as_u32() & !FRAME_OFFSET_MASK)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: u32) -> VirtualAddress {
        debug_assert!(off < FRAME_SIZE);
        VirtualAddress::new(self.0 | (off & FRAME_OFFSET_MASK))
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:08X})", self.0)
    }
}

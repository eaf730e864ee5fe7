//! Translation cache maintenance and the page-directory base register.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};

/// The processor's cache of virtual-to-physical translations.
///
/// After a present entry of the **active** address space is changed, the
/// cached translation for that page must be invalidated before the change is
/// relied upon.
pub trait TranslationCache {
    /// Root directory of the address space active on this processor, if any.
    ///
    /// `None` means no execution context is running yet; the kernel's own
    /// directory is the only one in use.
    fn active_root(&self) -> Option<PhysicalPage>;

    /// Drop any cached translation for `page`.
    fn flush_page(&mut self, page: VirtualPage);

    /// Invalidate `va` if `root` is the address space being executed from.
    #[inline]
    fn invalidate(&mut self, root: PhysicalPage, va: VirtualAddress) {
        if self.active_root().is_none_or(|active| active == root) {
            self.flush_page(va.page());
        }
    }
}

/// CR3 — Page-Directory Base Register (32-bit paging, no PAE).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    /// Bits 0–2 — Ignored.
    #[bits(3)]
    __: u8,

    /// Bit 3 — PWT: Page-level Write-Through for the page directory.
    pub pwt: bool,

    /// Bit 4 — PCD: Page-level Cache Disable for the page directory.
    pub pcd: bool,

    /// Bits 5–11 — Ignored.
    #[bits(7)]
    __: u8,

    /// Bits 12–31 — Page directory physical frame number.
    #[bits(20)]
    directory_frame: u32,
}

impl Cr3 {
    /// A `Cr3` value selecting the page directory in `root`, with caching enabled.
    #[inline]
    #[must_use]
    pub const fn from_root(root: PhysicalPage) -> Self {
        Self::new().with_directory_frame(root.base().as_u32() >> 12)
    }

    /// The page directory this value selects.
    #[inline]
    #[must_use]
    pub const fn root(self) -> PhysicalPage {
        PhysicalPage::from_frame_number(self.directory_frame() as usize)
    }

    /// Read CR3.
    ///
    /// # Safety
    /// Must run at CPL0.
    #[cfg(target_arch = "x86")]
    #[inline]
    #[must_use]
    pub unsafe fn load() -> Self {
        let cr3: u32;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }

    /// Write CR3, switching address spaces and flushing non-global translations.
    ///
    /// # Safety
    /// Must run at CPL0; the selected directory must map the executing code
    /// and stack.
    #[cfg(target_arch = "x86")]
    #[inline]
    pub unsafe fn store(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

/// The executing processor's TLB.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct CpuTlb;

#[cfg(target_arch = "x86")]
impl TranslationCache for CpuTlb {
    fn active_root(&self) -> Option<PhysicalPage> {
        Some(unsafe { Cr3::load() }.root())
    }

    fn flush_page(&mut self, page: VirtualPage) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) page.base().as_u32(), options(nostack, preserves_flags));
        }
    }
}

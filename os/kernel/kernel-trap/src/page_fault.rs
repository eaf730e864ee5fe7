//! # Page-Fault Decision
//!
//! A page fault raised with kernel privilege is a kernel bug and halts the
//! kernel. A fault raised in user mode terminates the faulting execution
//! context; the mapping at the faulting address is inspected only to log why
//! the access failed.

use crate::frame::TrapFrame;
use crate::ring::Ring;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, Leaf, PhysMapper};

/// Page-fault error code layout (32-bit).
///
/// Reference: Intel SDM Vol. 3A, §6.15 "Page-Fault Exception (#PF)".
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read; 1 = write.
    pub write: bool, // bit 1

    /// 0 = supervisor; 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page"
        } else if self.reserved_bit() {
            "Reserved bit set in a paging structure"
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// `[user|kernel, write|read, protection|not-present]`
impl fmt::Display for PageFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}]",
            if self.user() { "user" } else { "kernel" },
            if self.write() { "write" } else { "read" },
            if self.present() {
                "protection"
            } else {
                "not-present"
            }
        )
    }
}

/// Read CR2, the linear address of the most recent page fault.
///
/// # Safety
/// Must run at CPL0, inside the page-fault handler before anything can fault
/// again.
#[cfg(target_arch = "x86")]
#[inline]
#[must_use]
pub unsafe fn fault_address() -> VirtualAddress {
    let cr2: u32;
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    VirtualAddress::new(cr2)
}

/// Everything the trap layer hands over about one page fault.
#[derive(Debug, Copy, Clone)]
pub struct FaultContext<'f> {
    /// The faulting linear address (CR2).
    pub address: VirtualAddress,
    pub frame: &'f TrapFrame,
}

impl<'f> FaultContext<'f> {
    #[must_use]
    pub const fn new(address: VirtualAddress, frame: &'f TrapFrame) -> Self {
        Self { address, frame }
    }

    /// Privilege level the faulting code ran at.
    #[inline]
    #[must_use]
    pub const fn ring(&self) -> Ring {
        self.frame.ring()
    }

    #[inline]
    #[must_use]
    pub const fn error(&self) -> PageFaultError {
        self.frame.page_fault_error()
    }
}

/// Why the mapping at a faulting address did not allow the access.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultDiagnosis {
    /// No present leaf maps the address.
    Unmapped,
    /// Mapped, but not accessible from user mode.
    SupervisorOnly,
    /// A write to a page mapped read-only.
    ReadOnly,
    /// The current mapping permits the access (e.g. it changed after the fault).
    Permitted,
}

impl FaultDiagnosis {
    /// Classify a user-mode access described by `error` against `leaf`.
    #[must_use]
    pub const fn of(leaf: Option<Leaf>, error: PageFaultError) -> Self {
        match leaf {
            None => Self::Unmapped,
            Some(leaf) if !leaf.is_user() => Self::SupervisorOnly,
            Some(leaf) if error.write() && !leaf.is_writable() => Self::ReadOnly,
            Some(_) => Self::Permitted,
        }
    }
}

impl fmt::Display for FaultDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unmapped => "address not mapped",
            Self::SupervisorOnly => "page not user-accessible",
            Self::ReadOnly => "page not writable",
            Self::Permitted => "access permitted by current mapping",
        })
    }
}

/// Identity of an execution context, as assigned by the scheduler.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// The scheduler's side of fault handling.
pub trait ContextControl {
    /// The context that was executing when the trap was taken.
    fn current(&self) -> Option<ContextId>;

    /// Mark `id` terminated; it must never be resumed.
    fn terminate(&mut self, id: ContextId);
}

/// Outcome of a handled user-mode page fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum FaultResolution {
    /// The faulting context was terminated.
    Terminated(ContextId),
}

/// Decide what to do about a page fault.
///
/// `space` is the address space the faulting code ran in. Nothing is mapped,
/// unmapped or reference-counted here.
///
/// # Panics
/// - If the fault was raised with kernel privilege.
/// - If a user-mode fault arrives while no context is running.
pub fn handle_page_fault<M: PhysMapper, C: ContextControl>(
    fault: &FaultContext<'_>,
    space: &AddressSpace<'_, M>,
    contexts: &mut C,
) -> FaultResolution {
    let address = fault.address;
    let frame = fault.frame;

    if fault.ring().is_kernel() {
        log::error!("kernel page fault at {address}:\n{frame}");
        space.dump_walk(address);
        panic!(
            "kernel page fault at {address}, eip {:#010x}: {}",
            frame.eip,
            fault.error().explain()
        );
    }

    let Some(id) = contexts.current() else {
        panic!("user page fault at {address} with no running context");
    };

    let diagnosis = FaultDiagnosis::of(space.leaf(address), fault.error());
    log::warn!(
        "[{id}] user fault va {address} ip {:#010x} {}: {diagnosis}",
        frame.eip,
        fault.error()
    );
    log::debug!("trap frame of [{id}]:\n{frame}");
    space.dump_walk(address);

    contexts.terminate(id);
    FaultResolution::Terminated(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PAGE_FAULT;
    use kernel_memory_addresses::PhysicalPage;
    use kernel_vmem::testing::{RecordingTlb, TestFrames, TestPhys};
    use kernel_vmem::{FrameAlloc, FrameFill, PageFlags};

    const USER_CS: u16 = 0x1B;
    const KERNEL_CS: u16 = 0x08;

    #[derive(Default)]
    struct Scheduler {
        running: Option<ContextId>,
        terminated: Vec<ContextId>,
    }

    impl ContextControl for Scheduler {
        fn current(&self) -> Option<ContextId> {
            self.running
        }

        fn terminate(&mut self, id: ContextId) {
            self.terminated.push(id);
            self.running = None;
        }
    }

    fn va(v: u32) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    #[test]
    fn decodes_error_codes() {
        let err = PageFaultError::from_bits(0b110);
        assert!(!err.present() && err.write() && err.user());
        assert_eq!(err.explain(), "Non-present page");
        assert_eq!(err.to_string(), "[user, write, not-present]");

        let err = PageFaultError::from_bits(0b001);
        assert_eq!(err.explain(), "Read access to protected page");
        assert_eq!(err.to_string(), "[kernel, read, protection]");
    }

    #[test]
    fn diagnosis_follows_leaf_permissions() {
        let frame = PhysicalPage::from_frame_number(3);
        let write = PageFaultError::new().with_present(true).with_write(true).with_user(true);
        let read = PageFaultError::new().with_present(true).with_user(true);

        assert_eq!(FaultDiagnosis::of(None, write), FaultDiagnosis::Unmapped);
        assert_eq!(
            FaultDiagnosis::of(Some(Leaf::new(frame, PageFlags::WRITABLE)), read),
            FaultDiagnosis::SupervisorOnly
        );
        assert_eq!(
            FaultDiagnosis::of(Some(Leaf::new(frame, PageFlags::USER)), write),
            FaultDiagnosis::ReadOnly
        );
        assert_eq!(
            FaultDiagnosis::of(Some(Leaf::new(frame, PageFlags::USER)), read),
            FaultDiagnosis::Permitted
        );
    }

    #[test]
    #[should_panic(expected = "kernel page fault")]
    fn kernel_fault_is_fatal() {
        let phys = TestPhys::with_frames(8);
        let mut frames = TestFrames::new(&phys, 1);
        let root = frames.alloc_frame(FrameFill::Zeroed).expect("root");
        let space = AddressSpace::from_root(&phys, root);

        let frame = TrapFrame::new(PAGE_FAULT, 0b010, 0xF010_2345, KERNEL_CS);
        let mut scheduler = Scheduler {
            running: Some(ContextId(0x1000)),
            ..Scheduler::default()
        };
        let _ = handle_page_fault(&FaultContext::new(va(0xDEAD_B000), &frame), &space, &mut scheduler);
    }

    #[test]
    fn unmapped_user_fault_terminates_without_touching_references() {
        let phys = TestPhys::with_frames(8);
        let mut frames = TestFrames::new(&phys, 1);
        let mut tlb = RecordingTlb::default();
        let root = frames.alloc_frame(FrameFill::Zeroed).expect("root");
        frames.incref(root);
        let mut space = AddressSpace::from_root(&phys, root);

        let data = frames.alloc_frame(FrameFill::Zeroed).expect("data");
        space
            .insert(&mut frames, &mut tlb, data, va(0x0080_0000), PageFlags::USER)
            .expect("insert");
        let counts: Vec<u16> = (0..8)
            .map(|n| frames.ref_count(PhysicalPage::from_frame_number(n)))
            .collect();
        let free = frames.free_count();

        let frame = TrapFrame::new(PAGE_FAULT, 0b100, 0x0080_0042, USER_CS);
        let mut scheduler = Scheduler {
            running: Some(ContextId(0x1001)),
            ..Scheduler::default()
        };
        let fault = FaultContext::new(va(0x0090_0000), &frame);
        assert_eq!(
            handle_page_fault(&fault, &space, &mut scheduler),
            FaultResolution::Terminated(ContextId(0x1001))
        );

        assert_eq!(scheduler.terminated, vec![ContextId(0x1001)]);
        assert_eq!(scheduler.running, None);
        assert_eq!(frames.free_count(), free);
        let after: Vec<u16> = (0..8)
            .map(|n| frames.ref_count(PhysicalPage::from_frame_number(n)))
            .collect();
        assert_eq!(after, counts);
        assert!(space.walk(&mut frames, va(0x0090_0000), false).is_none());
    }

    #[test]
    fn protection_fault_on_mapped_page_still_terminates() {
        let phys = TestPhys::with_frames(8);
        let mut frames = TestFrames::new(&phys, 1);
        let mut tlb = RecordingTlb::default();
        let root = frames.alloc_frame(FrameFill::Zeroed).expect("root");
        let mut space = AddressSpace::from_root(&phys, root);

        let data = frames.alloc_frame(FrameFill::Zeroed).expect("data");
        space
            .insert(&mut frames, &mut tlb, data, va(0x0080_0000), PageFlags::USER)
            .expect("insert");

        let frame = TrapFrame::new(PAGE_FAULT, 0b111, 0x0080_0042, USER_CS);
        let mut scheduler = Scheduler {
            running: Some(ContextId(7)),
            ..Scheduler::default()
        };
        let fault = FaultContext::new(va(0x0080_0010), &frame);
        assert_eq!(
            FaultDiagnosis::of(space.leaf(fault.address), fault.error()),
            FaultDiagnosis::ReadOnly
        );
        assert_eq!(
            handle_page_fault(&fault, &space, &mut scheduler),
            FaultResolution::Terminated(ContextId(7))
        );
        assert_eq!(space.leaf(va(0x0080_0000)).map(|l| l.frame), Some(data));
        assert_eq!(frames.ref_count(data), 1);
    }

    #[test]
    #[should_panic(expected = "no running context")]
    fn user_fault_requires_a_running_context() {
        let phys = TestPhys::with_frames(4);
        let mut frames = TestFrames::new(&phys, 1);
        let root = frames.alloc_frame(FrameFill::Zeroed).expect("root");
        let space = AddressSpace::from_root(&phys, root);

        let frame = TrapFrame::new(PAGE_FAULT, 0b100, 0x0080_0042, USER_CS);
        let _ = handle_page_fault(
            &FaultContext::new(va(0x1000), &frame),
            &space,
            &mut Scheduler::default(),
        );
    }
}

//! The register snapshot saved on trap entry.

use crate::page_fault::PageFaultError;
use crate::ring::Ring;
use core::fmt;

/// Vector of the page-fault exception.
pub const PAGE_FAULT: u32 = 14;

/// Vector of the software interrupt used for system calls.
pub const SYSCALL: u32 = 0x30;

const EXCEPTION_NAMES: [&str; 20] = [
    "Divide error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection",
    "Page Fault",
    "(unknown trap)",
    "x87 FPU Floating-Point Error",
    "Alignment Check",
    "Machine-Check",
    "SIMD Floating-Point Exception",
];

/// Human-readable name of a trap vector.
#[must_use]
pub const fn trap_name(vector: u32) -> &'static str {
    if (vector as usize) < EXCEPTION_NAMES.len() {
        EXCEPTION_NAMES[vector as usize]
    } else if vector == SYSCALL {
        "System call"
    } else {
        "(unknown trap)"
    }
}

/// General-purpose registers in `pushal` order.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct PushedRegisters {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// `esp` at the time of `pushal`; ignored on `popal`.
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

/// Layout of the trap frame built by the entry stubs and the CPU.
///
/// ```text
///  low   regs        pushal by the stub
///        es, ds      pushed by the stub (16-bit, padded)
///        trap_number pushed by the stub
///        error_code  CPU or stub (0 if the vector has none)
///        eip, cs     CPU
///        eflags      CPU
///        esp, ss     CPU, only on a ring change
///  high
/// ```
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    pub regs: PushedRegisters,
    pub es: u16,
    padding1: u16,
    pub ds: u16,
    padding2: u16,
    pub trap_number: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u16,
    padding3: u16,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u16,
    padding4: u16,
}

impl TrapFrame {
    /// A frame for `trap_number` raised at `eip` in the code segment `cs`.
    #[must_use]
    pub const fn new(trap_number: u32, error_code: u32, eip: u32, cs: u16) -> Self {
        Self {
            regs: PushedRegisters {
                edi: 0,
                esi: 0,
                ebp: 0,
                oesp: 0,
                ebx: 0,
                edx: 0,
                ecx: 0,
                eax: 0,
            },
            es: 0,
            padding1: 0,
            ds: 0,
            padding2: 0,
            trap_number,
            error_code,
            eip,
            cs,
            padding3: 0,
            eflags: 0,
            esp: 0,
            ss: 0,
            padding4: 0,
        }
    }

    /// Privilege level of the interrupted code.
    #[inline]
    #[must_use]
    pub const fn ring(&self) -> Ring {
        Ring::of_selector(self.cs)
    }

    #[inline]
    #[must_use]
    const fn is_page_fault(&self) -> bool {
        self.trap_number == PAGE_FAULT
    }

    /// The error code decoded as a page-fault error.
    #[inline]
    #[must_use]
    pub const fn page_fault_error(&self) -> PageFaultError {
        PageFaultError::from_bits(self.error_code)
    }
}

impl fmt::Display for PushedRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  edi  {:#010x}", self.edi)?;
        writeln!(f, "  esi  {:#010x}", self.esi)?;
        writeln!(f, "  ebp  {:#010x}", self.ebp)?;
        writeln!(f, "  oesp {:#010x}", self.oesp)?;
        writeln!(f, "  ebx  {:#010x}", self.ebx)?;
        writeln!(f, "  edx  {:#010x}", self.edx)?;
        writeln!(f, "  ecx  {:#010x}", self.ecx)?;
        writeln!(f, "  eax  {:#010x}", self.eax)
    }
}

impl fmt::Display for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.regs)?;
        writeln!(f, "  es   0x----{:04x}", self.es)?;
        writeln!(f, "  ds   0x----{:04x}", self.ds)?;
        writeln!(
            f,
            "  trap {:#010x} {}",
            self.trap_number,
            trap_name(self.trap_number)
        )?;
        if self.is_page_fault() {
            writeln!(f, "  err  {:#010x} {}", self.error_code, self.page_fault_error())?;
        } else {
            writeln!(f, "  err  {:#010x}", self.error_code)?;
        }
        writeln!(f, "  eip  {:#010x}", self.eip)?;
        writeln!(f, "  cs   0x----{:04x}", self.cs)?;
        write!(f, "  flag {:#010x}", self.eflags)?;
        if !self.ring().is_kernel() {
            write!(f, "\n  esp  {:#010x}", self.esp)?;
            write!(f, "\n  ss   0x----{:04x}", self.ss)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_known_vectors() {
        assert_eq!(trap_name(PAGE_FAULT), "Page Fault");
        assert_eq!(trap_name(3), "Breakpoint");
        assert_eq!(trap_name(SYSCALL), "System call");
        assert_eq!(trap_name(15), "(unknown trap)");
        assert_eq!(trap_name(200), "(unknown trap)");
    }

    #[test]
    fn hardware_layout() {
        assert_eq!(size_of::<PushedRegisters>(), 32);
        assert_eq!(core::mem::offset_of!(TrapFrame, trap_number), 40);
        assert_eq!(core::mem::offset_of!(TrapFrame, eip), 48);
        assert_eq!(size_of::<TrapFrame>(), 68);
    }

    #[test]
    fn user_page_fault_renders_decoded_error_and_user_stack() {
        let mut frame = TrapFrame::new(PAGE_FAULT, 0b111, 0x0080_0020, 0x1B);
        frame.esp = 0xEEBF_DFF0;
        frame.ss = 0x23;
        let text = frame.to_string();

        assert!(text.contains("  trap 0x0000000e Page Fault"));
        assert!(text.contains("  err  0x00000007 [user, write, protection]"));
        assert!(text.contains("  eip  0x00800020"));
        assert!(text.contains("  esp  0xeebfdff0"));
        assert!(text.contains("  ss   0x----0023"));
    }

    #[test]
    fn kernel_trap_omits_user_stack() {
        let frame = TrapFrame::new(13, 0, 0xF010_0000, 0x08);
        let text = frame.to_string();

        assert!(text.contains("General Protection"));
        assert!(text.contains("  err  0x00000000\n"));
        assert!(!text.contains("esp"));
        assert!(text.ends_with("  flag 0x00000000"));
    }
}

//! # Trap Handling for Memory Faults
//!
//! The point where a hardware page fault meets the memory manager. The trap
//! entry stubs, the interrupt descriptor table and the scheduler live
//! elsewhere; they hand a [`TrapFrame`] and the faulting address to
//! [`handle_page_fault`] and act on the [`FaultResolution`] it returns.
//!
//! ```text
//! #PF ─► entry stub ─► TrapFrame ─┐
//!               CR2 ──────────────┴─► FaultContext ─► handle_page_fault
//!                                                       ├─ ring 0: panic
//!                                                       └─ ring 3: log, terminate context
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod frame;
mod page_fault;
mod ring;

pub use frame::{PAGE_FAULT, PushedRegisters, SYSCALL, TrapFrame, trap_name};
#[cfg(target_arch = "x86")]
pub use page_fault::fault_address;
pub use page_fault::{
    ContextControl, ContextId, FaultContext, FaultDiagnosis, FaultResolution, PageFaultError,
    handle_page_fault,
};
pub use ring::Ring;

//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! context switching via PendSV, SysTick timer configuration, and
//! interrupt priority setup.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV are both set to the lowest priority (0xFF), so a
//! context switch never preempts an application-level ISR.

use cortex_m::peripheral::syst::SystClkSource;
use core::arch::asm;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_RATE_HZ};
use crate::task::TaskControlBlock;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick, firing at
/// [`TICK_RATE_HZ`].
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_RATE_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Trigger a PendSV exception to perform a context switch. Sets PENDSVSET
/// in the Interrupt Control and State Register (ICSR).
#[inline]
pub fn trigger_pendsv() {
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority (0xFF), so
/// context switches never preempt an application ISR.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20.
        // Bits [23:16] = PendSV priority, bits [31:24] = SysTick priority.
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// Stack initialization
// ---------------------------------------------------------------------------

/// Initialize a task's stack frame for its first context switch.
///
/// The Cortex-M4 hardware automatically pushes an exception frame on
/// interrupt entry; this pre-populates that frame on the task's
/// heap-allocated stack so the first PendSV "return" starts executing the
/// task entry point with its creation-time parameter already in `r0`.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]   <- initial PSP points here
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_exit)
///   R12   (0)
///   R3    (0)
///   R2    (0)
///   R1    (0)
///   R0    (task parameter)
/// [Software saved context]
///   R11   (0)
///   R10   (0)
///   R9    (0)
///   R8    (0)
///   R7    (0)
///   R6    (0)
///   R5    (0)
///   R4    (0)              <- stack_pointer after init
/// ```
pub fn init_task_stack(tcb: &mut TaskControlBlock) {
    let (entry, param) = tcb.entry_and_param();
    let stack_base = tcb.stack_pointer_base() as usize;
    let stack_top = stack_base + tcb.stack_size();
    let aligned_top = stack_top & !0x07;

    // 16 registers (8 HW-stacked + 8 SW-saved), 4 bytes each.
    let frame_ptr = (aligned_top - 16 * 4) as *mut u32;

    unsafe {
        for i in 0..8 {
            *frame_ptr.add(i) = 0; // R4..R11
        }
        *frame_ptr.add(8) = param as u32; // R0 — task parameter
        *frame_ptr.add(9) = 0; // R1
        *frame_ptr.add(10) = 0; // R2
        *frame_ptr.add(11) = 0; // R3
        *frame_ptr.add(12) = 0; // R12
        *frame_ptr.add(13) = task_exit as u32; // LR — return address if the task returns
        *frame_ptr.add(14) = entry as u32; // PC — task entry point
        *frame_ptr.add(15) = 0x0100_0000; // xPSR — Thumb bit set
    }

    tcb.stack_pointer = frame_ptr;
}

/// Fallback for a task whose entry point returns, which it shouldn't —
/// entry points are `extern "C" fn(usize) -> !`. Parks the core rather
/// than letting control fall into whatever memory follows the stack.
extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching to PSP and branching to Thread mode.
/// Called once from `kernel::start`; never returns.
///
/// # Safety
/// Must only be called once, with a valid stack pointer prepared by
/// [`init_task_stack`].
#[cfg(target_arch = "arm")]
pub unsafe fn start_first_task(psp: *const u32) {
    asm!(
        "adds r0, #32",        // skip the 8 SW-saved registers (8 x 4 bytes)
        "msr psp, r0",         // set the process stack pointer

        "movs r0, #2",         // CONTROL.SPSEL = 1: use PSP in Thread mode
        "msr control, r0",
        "isb",

        "pop {{r0-r3, r12}}",  // R0-R3, R12
        "pop {{r4}}",          // LR (discarded; task is `-> !`)
        "pop {{r5}}",          // PC (task entry point)
        "pop {{r6}}",          // xPSR (discarded; set by the processor)

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

/// Host stand-in so `kernel::start` links when this crate is compiled for
/// `cargo test --lib` — the Thumb-2 asm above doesn't assemble for any other
/// target. Never reached: nothing in the host test suite calls `kernel::start`.
#[cfg(not(target_arch = "arm"))]
pub unsafe fn start_first_task(_psp: *const u32) {
    unimplemented!("start_first_task requires cortex-m hardware")
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// 1. Save R4–R11 onto the current task's stack (PSP).
/// 2. Store the updated PSP into the current task's TCB.
/// 3. Ask the scheduler to pick the next task.
/// 4. Load the next task's PSP from its TCB.
/// 5. Restore R4–R11 from the new task's stack.
/// 6. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR).
///
/// # Safety
/// Naked function invoked directly by the NVIC; must follow the exact
/// Cortex-M4 exception entry/exit convention.
///
/// Cortex-M4-only: the Thumb-2 mnemonics below don't assemble for the host
/// test target, and nothing in Rust calls this by name (the NVIC dispatches
/// to it by symbol), so it's simply absent from `cargo test --lib` builds
/// rather than needing a stub.
#[cfg(target_arch = "arm")]
#[no_mangle]
#[naked]
pub unsafe extern "C" fn PendSV() {
    asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        "bl {save_context}",
        "bl {do_schedule}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        "ldr r0, =0xFFFFFFFD", // EXC_RETURN: return to Thread mode using PSP
        "bx r0",

        save_context = sym save_current_context,
        do_schedule = sym do_context_switch,
        options(noreturn)
    );
}

/// Save the outgoing task's stack pointer. Called from PendSV with
/// interrupts already effectively serialized (no other exception can run
/// at PendSV's priority).
#[no_mangle]
unsafe extern "C" fn save_current_context(psp: *mut u32) {
    let kernel = &mut *crate::kernel::KERNEL_PTR;
    let current = kernel.scheduler.task_manager().get_current();
    if let Some(tcb) = kernel.scheduler.task_manager_mut().get_tcb_mut(current) {
        tcb.stack_pointer = psp;
    }
}

/// Run the scheduling decision and return the new task's PSP. Called from
/// PendSV.
#[no_mangle]
unsafe extern "C" fn do_context_switch() -> *mut u32 {
    let kernel = &mut *crate::kernel::KERNEL_PTR;
    let next = kernel.scheduler.get_next_task();
    kernel.scheduler.task_manager().get_tcb(next).map(|t| t.stack_pointer).unwrap_or(core::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — the system tick entry point. Delegates to
/// [`crate::kernel::on_tick`], which advances the timer service and
/// scheduler and cleans up any queue/semaphore wait that just timed out,
/// then requests a context switch if a reschedule is needed.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::kernel::on_tick();
    let kernel = &mut *crate::kernel::KERNEL_PTR;
    if kernel.scheduler.needs_reschedule() {
        trigger_pendsv();
    }
}

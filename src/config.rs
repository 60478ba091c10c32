//! # Kernel Configuration
//!
//! Compile-time constants governing the scheduler, task manager, IPC
//! primitives, timer service, and allocator. Everything here is fixed at
//! build time — there is no dynamic reconfiguration and no `alloc` crate
//! involved in holding these values.

/// Maximum number of tasks the system can manage simultaneously, including
/// the idle task. Bounds the static TCB table in [`crate::task::TaskManager`].
pub const MAX_TASKS: usize = 8;

/// Maximum length of a task's human-readable name, including the implicit
/// null terminator budget (names longer than this are truncated at creation).
pub const MAX_TASK_NAME_LENGTH: usize = 16;

/// Absolute floor for a task's stack size. `task_create` rejects anything
/// smaller — below this a task cannot survive the initial exception frame
/// plus the software-saved register block.
pub const MIN_STACK_SIZE: usize = 128;

/// Stack size used when a caller doesn't have a specific requirement.
pub const DEFAULT_STACK_SIZE: usize = 256;

/// Upper bound offered as a sane default ceiling for callers; not enforced
/// by `task_create` itself (a caller may request more if the heap has it).
pub const MAX_STACK_SIZE: usize = 1024;

/// Time slice, in ticks, that a task receives before the scheduler rotates
/// the round-robin queue at its priority.
pub const TIME_SLICE_MS: u32 = 10;

/// Maximum number of bounded message queues live at once.
pub const MAX_QUEUES: usize = 4;

/// Maximum number of items a single message queue can hold.
pub const MAX_QUEUE_SIZE: usize = 16;

/// Size in bytes of one queue item. The reference design carries
/// word-sized messages (an index, a pointer, a small command code);
/// larger payloads are sent by reference through a queue of this width.
pub const QUEUE_ITEM_SIZE: usize = core::mem::size_of::<u32>();

/// Sentinel timeout value meaning "wait forever" — disables the delay
/// countdown for a blocked sender/receiver/semaphore waiter.
pub const QUEUE_TIMEOUT_INFINITE: u32 = u32::MAX;

/// Maximum number of counting semaphores live at once.
pub const MAX_SEMAPHORES: usize = 4;

/// Ceiling a semaphore's count saturates at; `semaphore_give` past this is a
/// no-op rather than an overflow.
pub const SEMAPHORE_MAX_COUNT: u8 = 255;

/// Maximum number of software timers in the fixed pool.
pub const MAX_SOFTWARE_TIMERS: usize = 8;

/// Total size, in bytes, of the static heap backing task stacks and queue
/// buffers.
pub const HEAP_SIZE: usize = 4096;

/// Byte alignment the allocator aligns every returned payload to.
pub const MEMORY_ALIGNMENT: usize = 4;

/// Smallest block (header + payload) the allocator will ever hand out or
/// leave behind after a split; a would-be remainder smaller than this stays
/// attached to the block it was carved from instead of becoming a
/// vanishingly small free block nobody can ever use.
pub const MIN_BLOCK_SIZE: usize = 16;

/// System tick frequency in Hz. Determines how finely delays, timeouts, and
/// software timer periods can be resolved.
pub const TICK_RATE_HZ: u32 = 1000;

/// Number of priority levels the scheduler's ready queues are indexed by.
pub const PRIORITY_LEVELS: usize = 5;

/// Reserved for the idle task. User tasks may not be created at this
/// priority — see [`crate::scheduler::Scheduler::create_task`].
pub const PRIORITY_IDLE: u8 = 0;
pub const PRIORITY_LOW: u8 = 1;
pub const PRIORITY_MEDIUM: u8 = 2;
pub const PRIORITY_HIGH: u8 = 3;
pub const PRIORITY_CRITICAL: u8 = 4;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Convert a tick count to milliseconds at [`TICK_RATE_HZ`].
#[inline]
pub const fn ticks_to_ms(ticks: u32) -> u32 {
    ticks.saturating_mul(1000) / TICK_RATE_HZ
}

/// Convert a millisecond duration to ticks, rounding up so that a caller
/// asking for "at least N ms" never gets fewer ticks than that.
#[inline]
pub const fn ms_to_ticks(ms: u32) -> u32 {
    (ms.saturating_mul(TICK_RATE_HZ) + 999) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_tick_roundtrip_at_1khz() {
        assert_eq!(ms_to_ticks(10), 10);
        assert_eq!(ticks_to_ms(10), 10);
    }

    #[test]
    fn ms_to_ticks_rounds_up() {
        assert_eq!(ms_to_ticks(0), 0);
        assert_eq!(ms_to_ticks(1), 1);
    }
}

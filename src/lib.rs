//! # rtkern — a small preemptive RTOS kernel core
//!
//! A preemptive, priority-based real-time kernel core for ARM Cortex-M4
//! microcontrollers: a priority scheduler with round-robin time-slicing
//! within a priority, a fixed-table task manager with heap-backed stacks,
//! blocking message queues and counting semaphores with FIFO waiter lists,
//! a software timer service layered over the system tick, and a first-fit
//! coalescing heap allocator.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │     init() · create_task() · start() · queue_send() …   │
//! ├──────────────┬──────────────┬──────────────┬───────────┤
//! │  Scheduler   │ Queue/Sema   │ Timer        │  Sync     │
//! │  scheduler.rs│ queue.rs     │ timer.rs     │  sync.rs  │
//! │  ─ tick()    │ semaphore.rs │  ─ on_tick() │  ─critical│
//! │  ─ schedule()│ ─ send/recv  │  ─ software  │   _section│
//! │  ─ yield()   │ ─ take/give  │    timers    │           │
//! ├──────────────┴──────────────┴──────────────┴───────────┤
//! │              Task Model (task.rs) + list.rs              │
//! │    TCB · TaskState · BlockReason · ReadyList/WaiterFifo │
//! ├────────────────────────────────────────────────────────┤
//! │                 Allocator (allocator.rs)                 │
//! │        first-fit free list, split + coalesce             │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)                │
//! │    PendSV · SysTick · Context Switch · Stack Init      │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling model
//!
//! Five priority levels (0=idle .. 4=critical). At every tick the running
//! task's time slice is charged; on expiry it rotates to the back of its
//! priority's ready queue. `get_next_task` always dispatches the head of
//! the highest non-empty ready queue, falling back to the idle task. See
//! [`scheduler`] for the full algorithm.
//!
//! ## Blocking IPC
//!
//! [`queue`] and [`semaphore`] implement only the non-blocking primitive
//! and waiter-list bookkeeping; [`kernel`] closes the loop with real
//! suspend/yield/retry semantics and timeout handling — see
//! [`kernel::queue_send`].
//!
//! ## Memory model
//!
//! - Kernel tables (TCB slots, queue/semaphore/timer pools, ready-queue
//!   links) are statically allocated — no heap involvement in the tables
//!   themselves.
//! - Task stacks and message-queue buffers *are* heap-backed, drawn from
//!   [`allocator`]'s fixed static region and freed on `task_delete`/
//!   `queue_delete`.
//! - Critical sections: `cortex_m::interrupt::free()` via [`sync`], for
//!   every mutation of shared kernel state.

// `std` is linked only for `cargo test --lib` (see `sync::critical_section`'s
// `cfg(test)` arm for why that's safe); the firmware binary in `main.rs`
// stays unconditionally `no_std`.
#![cfg_attr(not(test), no_std)]

pub mod allocator;
pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod list;
pub mod queue;
pub mod scheduler;
pub mod semaphore;
pub mod sync;
pub mod task;
pub mod timer;

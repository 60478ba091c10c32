//! # Kernel Error Taxonomy
//!
//! Every fallible kernel operation returns a [`KernelResult`] rather than a
//! raw sentinel. The variants mirror the error classes every subsystem in
//! this crate actually produces: invalid arguments, exhausted pools,
//! illegal state transitions, and the two first-class *expected* outcomes
//! of blocking IPC (timeout, full/empty). Integrity failures are kept
//! separate from ordinary errors — a caller observing one should stop
//! trusting the heap/TCB table, not retry.

/// Unified error type returned by kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// An argument was out of range: unknown task/queue/semaphore/timer id,
    /// a priority above [`crate::config::PRIORITY_LEVELS`], a zero size
    /// where one is required, or similar.
    InvalidParameter,
    /// No free slot/stack/buffer was available (task table full, timer
    /// pool full, allocator out of memory, waiter list full).
    ResourceExhausted,
    /// The call is not legal in the target's current state: creating over
    /// an already-active id, deleting an inactive one, resuming a task that
    /// isn't suspended, locking an already-locked scheduler.
    StateViolation,
    /// A blocking call's timeout elapsed before its condition was met.
    /// Expected outcome, not logged as an error by callers.
    Timeout,
    /// A queue was full on a non-blocking (`timeout_ms == 0`) send.
    Full,
    /// A queue was empty on a non-blocking (`timeout_ms == 0`) receive, or
    /// `queue_peek` was called on an empty queue.
    Empty,
    /// Heap corruption or a stack pointer outside its task's stack region
    /// was detected. Fatal: the caller should trap to a diagnostic halt
    /// rather than attempt recovery.
    IntegrityFailure,
}

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

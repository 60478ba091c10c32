//! # Synchronization Primitives
//!
//! Interrupt-safe critical section abstractions for the Cortex-M4.
//! All shared scheduler state must be accessed within a critical section
//! to prevent data races between the main thread and interrupt handlers.

use cortex_m::interrupt;

/// Execute a closure within a critical section (interrupts disabled).
///
/// This is the primary mechanism for safely accessing shared mutable state
/// in the kernel. Interrupts are disabled on entry and restored on exit,
/// ensuring atomicity of the enclosed operation.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // Access shared state safely
/// });
/// ```
///
/// # Performance
/// Keep critical sections as short as possible to minimize interrupt latency.
/// The Cortex-M4's interrupt tail-chaining makes short critical sections
/// relatively inexpensive.
#[cfg(not(test))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}

/// Host unit tests run single-threaded with no real interrupt controller to
/// mask, and `cortex_m::interrupt::free`'s `primask` read/write relies on
/// ARM-only asm that doesn't exist for the host target — so `cfg(test)`
/// builds skip straight to the closure instead. The `CriticalSection` token
/// itself is a zero-sized marker (no hardware access), safe to manufacture
/// here.
#[cfg(test)]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    f(unsafe { &interrupt::CriticalSection::new() })
}

/// Serializes host tests that touch a `static mut` singleton (the heap in
/// `allocator`, the callback-counting statics in `timer`'s own test module).
/// `cargo test` runs test functions concurrently on multiple threads by
/// default, and nothing about `critical_section`'s `cfg(test)` arm above
/// provides mutual exclusion between them — only between "task" and "ISR"
/// context within a single thread, which is the real target's only
/// concurrency. Any test that resets or reads one of those singletons should
/// hold this guard for its whole body.
#[cfg(test)]
pub fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

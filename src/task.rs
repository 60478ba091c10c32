//! # Task Control Block and Task Manager
//!
//! The task model: a fixed table of [`TaskControlBlock`]s (one fixed slot
//! per [`crate::config::MAX_TASKS`], no heap involved in the table itself)
//! plus a [`TaskManager`] that owns creation, deletion, and the
//! suspend/resume/delay lifecycle. Each TCB's stack is, unlike the slot
//! table, heap-backed: `task_create` pulls its stack out of
//! [`crate::allocator`] and `task_delete` gives it back.
//!
//! The ready-queue membership itself (which priority bucket a `Ready` task
//! sits in) is scheduler state, not task-manager state — see
//! [`crate::scheduler`]. This module only tracks *logical* state
//! (`TaskState`) and the reason a `Blocked` task is blocked.

use core::ptr::NonNull;

use crate::allocator;
use crate::config::{MAX_TASKS, MAX_TASK_NAME_LENGTH};
use crate::error::{KernelError, KernelResult};
use crate::list::{HasReadyLink, ReadyLink};

/// Signature every task entry point must have. The task's creation-time
/// parameter arrives in `arg`, passed through the initial register frame
/// (see `arch::cortex_m4::init_task_stack`) exactly the way the hardware
/// passes a first argument in `r0`. Tasks are not expected to return; if one
/// does, the port's `task_exit` trap parks it forever rather than letting
/// control fall off the end of a stack frame no one else owns.
pub type TaskEntry = extern "C" fn(usize) -> !;

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible to run, waiting in its priority's ready queue.
    Ready,
    /// Currently the task the CPU is executing.
    Running,
    /// Waiting on a delay, a queue, or a semaphore — see [`BlockReason`].
    Blocked,
    /// Explicitly suspended by `task_suspend`; not scheduled until resumed,
    /// regardless of what it was doing when suspended.
    Suspended,
    /// Deleted; the slot is available for reuse by the next `task_create`.
    Deleted,
}

/// Why a `Blocked` task is blocked. Distinguishing these lets
/// [`TaskManager::update_delays`] know which tasks a tick can legitimately
/// wake, and lets a queue/semaphore find its own waiters again after a
/// `task_delete` removes a task out from under them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not blocked (state isn't `Blocked`).
    None,
    /// Sleeping in `task_delay`; woken when `remaining_delay_ticks` hits 0.
    Delay,
    /// Blocked sending to a full queue.
    QueueSend,
    /// Blocked receiving from an empty queue.
    QueueReceive,
    /// Blocked taking a semaphore at count 0.
    SemaphoreTake,
}

/// Task Control Block — per-task state. Stored inline in
/// [`TaskManager::tasks`], never boxed or heap-allocated itself.
pub struct TaskControlBlock {
    pub id: usize,
    name: [u8; MAX_TASK_NAME_LENGTH],
    name_len: usize,
    entry: Option<TaskEntry>,
    param: usize,
    pub priority: u8,
    pub state: TaskState,
    pub block_reason: BlockReason,

    /// Heap-allocated stack owned by this TCB; `None` for an empty slot.
    stack_base: Option<NonNull<u8>>,
    stack_size: usize,
    /// Saved stack pointer (PSP). Updated on every context switch.
    pub stack_pointer: *mut u32,

    /// Ticks left in the current round-robin time slice.
    pub ticks_remaining: u32,
    /// Ticks left before this block times out; `u32::MAX` means "wait
    /// forever" (no timeout). Meaningful only while `state == Blocked`,
    /// for every [`BlockReason`] — not just `Delay` — so a blocked
    /// queue/semaphore wait can time out the same way a plain delay does.
    pub remaining_delay_ticks: u32,
    /// Which queue/semaphore this task is waiting on, meaningful only for
    /// `block_reason` values that name one (`QueueSend`, `QueueReceive`,
    /// `SemaphoreTake`).
    pub wait_id: usize,
    /// Total ticks this task has spent `Running`.
    pub exec_ticks: u32,
    /// Number of times this task has been switched into.
    pub switch_count: u32,

    pub(crate) ready_link: ReadyLink,
    pub active: bool,
}

// Safety: `stack_pointer`/`stack_base` are raw pointers into this task's own
// heap-allocated stack; every access to a TCB goes through a critical
// section (see `sync::critical_section`), so there is no concurrent access
// from task context and ISR context at once.
unsafe impl Send for TaskControlBlock {}

impl TaskControlBlock {
    pub const fn empty() -> Self {
        Self {
            id: 0,
            name: [0; MAX_TASK_NAME_LENGTH],
            name_len: 0,
            entry: None,
            param: 0,
            priority: 0,
            state: TaskState::Deleted,
            block_reason: BlockReason::None,
            stack_base: None,
            stack_size: 0,
            stack_pointer: core::ptr::null_mut(),
            ticks_remaining: 0,
            remaining_delay_ticks: u32::MAX,
            wait_id: 0,
            exec_ticks: 0,
            switch_count: 0,
            ready_link: ReadyLink::new(),
            active: false,
        }
    }

    fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_TASK_NAME_LENGTH);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name_len = len;
    }

    /// The task's name, truncated to [`MAX_TASK_NAME_LENGTH`] bytes at
    /// creation. Falls back to the empty string if it somehow isn't valid
    /// UTF-8 (impossible for truncation of ASCII names, but this avoids a
    /// panic on the boundary).
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("")
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Base address of this task's heap-allocated stack. Only meaningful
    /// for an active task (one that has actually been through
    /// `TaskManager::create`).
    pub(crate) fn stack_pointer_base(&self) -> *mut u8 {
        self.stack_base.expect("active task has an allocated stack").as_ptr()
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.active && self.state == TaskState::Ready
    }

    pub(crate) fn entry_and_param(&self) -> (TaskEntry, usize) {
        (self.entry.expect("active task has an entry point"), self.param)
    }
}

impl HasReadyLink for TaskControlBlock {
    fn ready_link(&self) -> &ReadyLink {
        &self.ready_link
    }

    fn ready_link_mut(&mut self) -> &mut ReadyLink {
        &mut self.ready_link
    }
}

/// Owns the fixed TCB table and the task lifecycle: create, delete, suspend,
/// resume, delay bookkeeping. Does not itself decide what to run next —
/// that's [`crate::scheduler::Scheduler`], which holds one `TaskManager`.
pub struct TaskManager {
    tasks: [TaskControlBlock; MAX_TASKS],
    count: usize,
    current: usize,
}

impl TaskManager {
    pub const fn new() -> Self {
        const EMPTY: TaskControlBlock = TaskControlBlock::empty();
        Self {
            tasks: [EMPTY; MAX_TASKS],
            count: 0,
            current: 0,
        }
    }

    #[inline]
    pub fn tasks(&self) -> &[TaskControlBlock; MAX_TASKS] {
        &self.tasks
    }

    #[inline]
    pub fn tasks_mut(&mut self) -> &mut [TaskControlBlock; MAX_TASKS] {
        &mut self.tasks
    }

    #[inline]
    pub fn get_count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn get_current(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, id: usize) {
        self.current = id;
    }

    pub fn get_tcb(&self, id: usize) -> Option<&TaskControlBlock> {
        self.tasks.get(id).filter(|t| t.active)
    }

    pub fn get_tcb_mut(&mut self, id: usize) -> Option<&mut TaskControlBlock> {
        self.tasks.get_mut(id).filter(|t| t.active)
    }

    pub fn get_state(&self, id: usize) -> Option<TaskState> {
        self.get_tcb(id).map(|t| t.state)
    }

    pub fn set_state(&mut self, id: usize, state: TaskState) -> KernelResult<()> {
        let tcb = self.tasks.get_mut(id).filter(|t| t.active).ok_or(KernelError::InvalidParameter)?;
        tcb.state = state;
        if state != TaskState::Blocked {
            tcb.block_reason = BlockReason::None;
        }
        Ok(())
    }

    /// Find the first empty slot, or `None` if the table is full.
    fn find_free_slot(&self) -> Option<usize> {
        self.tasks.iter().position(|t| !t.active)
    }

    /// Create a task. `priority` must be strictly below
    /// [`crate::config::PRIORITY_LEVELS`]; `crate::scheduler` additionally
    /// forbids user code from requesting [`crate::config::PRIORITY_IDLE`],
    /// which this layer doesn't know about and doesn't enforce.
    pub fn create(
        &mut self,
        name: &str,
        entry: TaskEntry,
        param: usize,
        priority: u8,
        stack_size: usize,
    ) -> KernelResult<usize> {
        if priority as usize >= crate::config::PRIORITY_LEVELS {
            return Err(KernelError::InvalidParameter);
        }
        if stack_size < crate::config::MIN_STACK_SIZE {
            return Err(KernelError::InvalidParameter);
        }
        let id = self.find_free_slot().ok_or(KernelError::ResourceExhausted)?;
        let stack_base = allocator::alloc(stack_size).ok_or(KernelError::ResourceExhausted)?;

        let tcb = &mut self.tasks[id];
        *tcb = TaskControlBlock::empty();
        tcb.id = id;
        tcb.set_name(name);
        tcb.entry = Some(entry);
        tcb.param = param;
        tcb.priority = priority;
        tcb.state = TaskState::Ready;
        tcb.block_reason = BlockReason::None;
        tcb.stack_base = Some(stack_base);
        tcb.stack_size = stack_size;
        tcb.ticks_remaining = crate::config::TIME_SLICE_MS;
        tcb.active = true;

        crate::arch::cortex_m4::init_task_stack(tcb);

        self.count += 1;
        Ok(id)
    }

    /// Delete a task, returning its stack to the allocator. The caller
    /// (`kernel`/`scheduler`) is responsible for removing the task from any
    /// ready list or waiter FIFO it might still be linked into before
    /// calling this — this only tears down task-manager state.
    pub fn delete(&mut self, id: usize) -> KernelResult<()> {
        let tcb = self.tasks.get_mut(id).filter(|t| t.active).ok_or(KernelError::InvalidParameter)?;
        debug_assert!(!tcb.ready_link.is_linked(), "deleting a task still on a ready list");
        if let Some(base) = tcb.stack_base.take() {
            allocator::free(base)?;
        }
        tcb.active = false;
        tcb.state = TaskState::Deleted;
        self.count -= 1;
        Ok(())
    }

    pub fn suspend(&mut self, id: usize) -> KernelResult<()> {
        let tcb = self.tasks.get_mut(id).filter(|t| t.active).ok_or(KernelError::InvalidParameter)?;
        tcb.state = TaskState::Suspended;
        Ok(())
    }

    pub fn resume(&mut self, id: usize) -> KernelResult<()> {
        let tcb = self.tasks.get_mut(id).filter(|t| t.active).ok_or(KernelError::InvalidParameter)?;
        if tcb.state != TaskState::Suspended {
            return Err(KernelError::StateViolation);
        }
        tcb.state = TaskState::Ready;
        Ok(())
    }

    /// Put `id` to sleep for `ticks` system ticks.
    pub fn delay(&mut self, id: usize, ticks: u32) -> KernelResult<()> {
        self.block(id, BlockReason::Delay, 0, Some(ticks))
    }

    /// Block `id` for `reason`, optionally on object `wait_id` (a queue or
    /// semaphore id), with an optional timeout in ticks. `None` means wait
    /// forever.
    pub fn block(
        &mut self,
        id: usize,
        reason: BlockReason,
        wait_id: usize,
        timeout_ticks: Option<u32>,
    ) -> KernelResult<()> {
        let tcb = self.tasks.get_mut(id).filter(|t| t.active).ok_or(KernelError::InvalidParameter)?;
        tcb.state = TaskState::Blocked;
        tcb.block_reason = reason;
        tcb.wait_id = wait_id;
        tcb.remaining_delay_ticks = timeout_ticks.unwrap_or(u32::MAX);
        Ok(())
    }

    /// Decrement every blocked task's timeout by one tick, waking
    /// (transitioning to `Ready`) any whose timeout reaches zero. A task
    /// blocked with no timeout (`remaining_delay_ticks == u32::MAX`) is
    /// left alone — only an explicit wake (queue/semaphore handoff, or
    /// `task_resume`) moves it.
    ///
    /// `on_woken(id, reason, wait_id)` is called once per task that just
    /// timed out, carrying the reason/object it had been blocked on
    /// *before* this call cleared it, so the caller (`kernel`) can remove
    /// it from that object's waiter list.
    pub fn update_delays<F: FnMut(usize, BlockReason, usize)>(&mut self, mut on_woken: F) {
        for tcb in self.tasks.iter_mut() {
            if !tcb.active || tcb.state != TaskState::Blocked {
                continue;
            }
            if tcb.remaining_delay_ticks == u32::MAX {
                continue;
            }
            if tcb.remaining_delay_ticks > 0 {
                tcb.remaining_delay_ticks -= 1;
            }
            if tcb.remaining_delay_ticks == 0 {
                let reason = tcb.block_reason;
                let wait_id = tcb.wait_id;
                tcb.state = TaskState::Ready;
                tcb.block_reason = BlockReason::None;
                on_woken(tcb.id, reason, wait_id);
            }
        }
    }

    /// Log a one-line summary of every active task, via the `log` facade.
    pub fn print_info(&self) {
        for tcb in self.tasks.iter().filter(|t| t.active) {
            log::info!(
                "task {:2} {:<16} prio={} state={:?} exec_ticks={} switches={}",
                tcb.id,
                tcb.name(),
                tcb.priority,
                tcb.state,
                tcb.exec_ticks,
                tcb.switch_count,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn dummy(_arg: usize) -> ! {
        loop {}
    }

    fn fresh_allocator() {
        crate::allocator::init();
    }

    #[test]
    fn create_assigns_ready_state_and_slot() {
        let _g = crate::sync::test_lock();
        fresh_allocator();
        let mut mgr = TaskManager::new();
        let id = mgr.create("worker", dummy, 0, 2, 256).unwrap();
        assert_eq!(mgr.get_state(id), Some(TaskState::Ready));
        assert_eq!(mgr.get_count(), 1);
        assert_eq!(mgr.get_tcb(id).unwrap().name(), "worker");
    }

    #[test]
    fn create_rejects_priority_out_of_range() {
        let _g = crate::sync::test_lock();
        fresh_allocator();
        let mut mgr = TaskManager::new();
        let err = mgr.create("bad", dummy, 0, MAX_TASKS as u8 + 200, 256).unwrap_err();
        assert_eq!(err, KernelError::InvalidParameter);
    }

    #[test]
    fn create_rejects_undersized_stack() {
        let _g = crate::sync::test_lock();
        fresh_allocator();
        let mut mgr = TaskManager::new();
        let err = mgr.create("tiny", dummy, 0, 1, 8).unwrap_err();
        assert_eq!(err, KernelError::InvalidParameter);
    }

    #[test]
    fn table_full_after_max_tasks_creations() {
        let _g = crate::sync::test_lock();
        fresh_allocator();
        let mut mgr = TaskManager::new();
        for _ in 0..MAX_TASKS {
            mgr.create("t", dummy, 0, 1, 128).unwrap();
        }
        let err = mgr.create("overflow", dummy, 0, 1, 128).unwrap_err();
        assert_eq!(err, KernelError::ResourceExhausted);
    }

    #[test]
    fn delete_frees_slot_and_stack() {
        let _g = crate::sync::test_lock();
        fresh_allocator();
        let mut mgr = TaskManager::new();
        let id = mgr.create("transient", dummy, 0, 1, 128).unwrap();
        let used_before = crate::allocator::get_used_size();
        assert!(used_before > 0);
        mgr.delete(id).unwrap();
        assert_eq!(mgr.get_count(), 0);
        assert_eq!(crate::allocator::get_used_size(), 0);
    }

    #[test]
    fn suspend_then_resume_round_trips_state() {
        let _g = crate::sync::test_lock();
        fresh_allocator();
        let mut mgr = TaskManager::new();
        let id = mgr.create("t", dummy, 0, 1, 128).unwrap();
        mgr.suspend(id).unwrap();
        assert_eq!(mgr.get_state(id), Some(TaskState::Suspended));
        mgr.resume(id).unwrap();
        assert_eq!(mgr.get_state(id), Some(TaskState::Ready));
    }

    #[test]
    fn resume_non_suspended_task_is_state_violation() {
        let _g = crate::sync::test_lock();
        fresh_allocator();
        let mut mgr = TaskManager::new();
        let id = mgr.create("t", dummy, 0, 1, 128).unwrap();
        assert_eq!(mgr.resume(id), Err(KernelError::StateViolation));
    }

    #[test]
    fn delay_counts_down_then_wakes() {
        let _g = crate::sync::test_lock();
        fresh_allocator();
        let mut mgr = TaskManager::new();
        let id = mgr.create("sleeper", dummy, 0, 1, 128).unwrap();
        mgr.delay(id, 3).unwrap();
        assert_eq!(mgr.get_state(id), Some(TaskState::Blocked));

        let mut woken = None;
        mgr.update_delays(|w, reason, wait_id| woken = Some((w, reason, wait_id)));
        assert!(woken.is_none());
        mgr.update_delays(|w, reason, wait_id| woken = Some((w, reason, wait_id)));
        assert!(woken.is_none());
        mgr.update_delays(|w, reason, wait_id| woken = Some((w, reason, wait_id)));
        assert_eq!(woken, Some((id, BlockReason::Delay, 0)));
        assert_eq!(mgr.get_state(id), Some(TaskState::Ready));
    }
}

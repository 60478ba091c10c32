//! # Scheduler
//!
//! Preemptive, priority-based scheduler with round-robin among equal
//! priorities. Owns one [`TaskManager`] plus one [`crate::list::ReadyList`]
//! per priority level — simple FIFOs, one per priority, dispatched strictly
//! by priority with round-robin rotation within a level.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick interrupt ([`Scheduler::tick`]):
//! 1. Decrement the running task's time slice; if it hits zero, rotate it
//!    to the back of its priority's ready queue.
//! 2. Advance every sleeping task's delay countdown, moving any that
//!    expire back onto their ready queue.
//! 3. If the head of the highest non-empty ready queue differs from the
//!    task currently running, request a reschedule.
//!
//! Dispatch ([`Scheduler::get_next_task`]) always picks the head of the
//! highest-priority non-empty ready queue. Within a priority, rotation on
//! time-slice expiry is what gives round-robin fairness; arrival order
//! otherwise stays FIFO.

use crate::config::{MAX_TASKS, PRIORITY_IDLE, PRIORITY_LEVELS, TIME_SLICE_MS};
use crate::error::{KernelError, KernelResult};
use crate::list::ReadyList;
use crate::task::{BlockReason, TaskEntry, TaskManager, TaskState};

/// Snapshot of scheduler activity, read by diagnostics / tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub total_context_switches: u32,
    pub total_scheduler_calls: u32,
    pub idle_ticks: u64,
    pub busy_ticks: u64,
}

impl SchedulerStats {
    /// CPU utilization in whole percent (0-100), based on ticks observed so
    /// far. `0` before the first tick.
    pub fn cpu_utilization_percent(&self) -> u32 {
        let total = self.idle_ticks + self.busy_ticks;
        if total == 0 {
            0
        } else {
            ((self.busy_ticks * 100) / total) as u32
        }
    }
}

pub struct Scheduler {
    task_manager: TaskManager,
    ready: [ReadyList; PRIORITY_LEVELS],
    current: usize,
    idle_task: Option<usize>,
    locked: bool,
    running: bool,
    tick_count: u64,
    stats: SchedulerStats,
    needs_reschedule: bool,
    /// Set by [`delete_task`](Self::delete_task) when the target is the
    /// currently running task: its actual teardown (stack free, slot
    /// reuse) is deferred until [`get_next_task`](Self::get_next_task)
    /// switches the CPU off it.
    pending_delete: Option<usize>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            ready: [ReadyList::new(); PRIORITY_LEVELS],
            current: 0,
            idle_task: None,
            locked: false,
            running: false,
            tick_count: 0,
            stats: SchedulerStats {
                total_context_switches: 0,
                total_scheduler_calls: 0,
                idle_ticks: 0,
                busy_ticks: 0,
            },
            needs_reschedule: false,
            pending_delete: None,
        }
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    pub fn task_manager_mut(&mut self) -> &mut TaskManager {
        &mut self.task_manager
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn needs_reschedule(&self) -> bool {
        self.needs_reschedule
    }

    pub fn get_stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn idle_task(&self) -> Option<usize> {
        self.idle_task
    }

    /// Install the idle task. Must be created at [`PRIORITY_IDLE`]; exactly
    /// one idle task may exist.
    pub fn set_idle_task(&mut self, id: usize) -> KernelResult<()> {
        if self.idle_task.is_some() {
            return Err(KernelError::StateViolation);
        }
        let priority = self.task_manager.get_tcb(id).ok_or(KernelError::InvalidParameter)?.priority;
        if priority != PRIORITY_IDLE {
            return Err(KernelError::InvalidParameter);
        }
        self.idle_task = Some(id);
        self.add_ready_task(id);
        Ok(())
    }

    /// Create a user task. Rejects [`PRIORITY_IDLE`] — that priority is
    /// reserved for the one idle task installed via [`set_idle_task`].
    pub fn create_task(
        &mut self,
        name: &str,
        entry: TaskEntry,
        param: usize,
        priority: u8,
        stack_size: usize,
    ) -> KernelResult<usize> {
        if priority == PRIORITY_IDLE {
            return Err(KernelError::InvalidParameter);
        }
        let id = self.task_manager.create(name, entry, param, priority, stack_size)?;
        self.add_ready_task(id);
        Ok(id)
    }

    pub fn delete_task(&mut self, id: usize) -> KernelResult<()> {
        if Some(id) == self.idle_task {
            return Err(KernelError::StateViolation);
        }
        if self.current == id {
            // Spec §4.2: deleting the RUNNING task defers to the next
            // context switch. Freeing its stack now would corrupt it out
            // from under itself, so `get_next_task` performs the real
            // `TaskManager::delete` only once this task is no longer the
            // one executing.
            self.pending_delete = Some(id);
            self.needs_reschedule = true;
            return Ok(());
        }
        self.remove_ready_task(id);
        self.task_manager.delete(id)?;
        Ok(())
    }

    /// Insert `id` into its priority's ready queue. No-op if it's already
    /// linked (e.g. the idle task staying in its own queue).
    pub fn add_ready_task(&mut self, id: usize) {
        let priority = match self.task_manager.get_tcb(id) {
            Some(tcb) => tcb.priority,
            None => return,
        };
        let list = &mut self.ready[priority as usize];
        if !self.task_manager.tasks()[id].ready_link.is_linked() {
            list.push_tail(self.task_manager.tasks_mut(), id);
        }
    }

    /// Remove `id` from whichever ready queue it's on, if any.
    pub fn remove_ready_task(&mut self, id: usize) -> bool {
        let priority = match self.task_manager.get_tcb(id) {
            Some(tcb) => tcb.priority,
            None => {
                // Task may already be inactive; still try every queue since
                // we can't read its priority back out.
                for list in self.ready.iter_mut() {
                    if list.remove(self.task_manager.tasks_mut(), id) {
                        return true;
                    }
                }
                return false;
            }
        };
        self.ready[priority as usize].remove(self.task_manager.tasks_mut(), id)
    }

    /// Highest-priority non-empty ready queue's head, or the idle task if
    /// every queue is empty.
    fn pick_next(&self) -> usize {
        for level in (0..PRIORITY_LEVELS).rev() {
            if let Some(id) = self.ready[level].head() {
                return id;
            }
        }
        self.idle_task.unwrap_or(0)
    }

    /// Select and dispatch the next task to run. Called from `PendSV`.
    /// Marks the outgoing task `Ready` (unless it blocked itself first) and
    /// the incoming task `Running`, and returns its id.
    pub fn get_next_task(&mut self) -> usize {
        self.stats.total_scheduler_calls += 1;

        let prev = self.current;
        let prev_pending_delete = self.pending_delete == Some(prev);
        if !prev_pending_delete && self.task_manager.get_state(prev) == Some(TaskState::Running) {
            self.task_manager.set_state(prev, TaskState::Ready).ok();
            self.add_ready_task(prev);
        }

        let next = self.pick_next();
        self.remove_ready_task(next);
        self.task_manager.set_state(next, TaskState::Running).ok();
        if let Some(tcb) = self.task_manager.get_tcb_mut(next) {
            tcb.switch_count += 1;
            tcb.ticks_remaining = TIME_SLICE_MS;
        }

        if next != prev {
            self.stats.total_context_switches += 1;
        }
        self.current = next;
        self.task_manager.set_current(next);
        self.needs_reschedule = false;

        // `prev` never went back on a ready queue above, so it is safe to
        // tear down now that the switch away from it is committed.
        if prev_pending_delete {
            self.pending_delete = None;
            self.task_manager.delete(prev).ok();
        }
        next
    }

    /// Voluntary yield: rotate the current task to the back of its ready
    /// queue (if it has one) and request a reschedule.
    pub fn yield_now(&mut self) {
        let current = self.current;
        if self.locked {
            return;
        }
        if let Some(tcb) = self.task_manager.get_tcb(current) {
            if tcb.state == TaskState::Running && Some(current) != self.idle_task {
                self.task_manager.set_state(current, TaskState::Ready).ok();
                self.add_ready_task(current);
                self.needs_reschedule = true;
            }
        }
    }

    /// Advance the system by one tick: bookkeeping for the running task's
    /// time slice and every blocked task's timeout. `on_timeout(id, reason,
    /// wait_id)` is forwarded from [`TaskManager::update_delays`] for every
    /// task whose block timed out, so `kernel` can clean up the queue or
    /// semaphore waiter list it was parked on.
    pub fn tick<F: FnMut(usize, BlockReason, usize)>(&mut self, mut on_timeout: F) {
        self.tick_count += 1;

        let current = self.current;
        if Some(current) == self.idle_task {
            self.stats.idle_ticks += 1;
        } else {
            self.stats.busy_ticks += 1;
        }

        if let Some(tcb) = self.task_manager.get_tcb_mut(current) {
            if tcb.state == TaskState::Running {
                tcb.exec_ticks += 1;
                if tcb.ticks_remaining > 0 {
                    tcb.ticks_remaining -= 1;
                }
                if tcb.ticks_remaining == 0 && !self.locked {
                    self.needs_reschedule = true;
                }
            }
        }

        // Delay/timeout accounting runs every tick regardless of `locked`:
        // `lock` disables preemption, not interrupts or timekeeping (spec
        // §4.3), so a lock span must not stall every other task's
        // `task_delay` countdown or queue/semaphore wait timeout. Only the
        // resulting `needs_reschedule` request is deferred to `unlock` —
        // see `reinsert_woken_tasks`.
        //
        // `update_delays` only flips task state; it can't touch the ready
        // queues itself (those live on `self`, not on `TaskManager`), so a
        // separate pass re-links anything it woke.
        self.task_manager.update_delays(|id, reason, wait_id| on_timeout(id, reason, wait_id));
        self.reinsert_woken_tasks();
    }

    /// After `TaskManager::update_delays` has flipped any expired sleepers
    /// to `Ready`, walk the table once and make sure every `Ready`, active,
    /// unlinked task is back on its priority's queue. A reschedule is
    /// requested only when a woken task outranks the currently running one
    /// (spec §4.3/§5): an equal-or-lower-priority task rejoins the back of
    /// its ready queue and waits its turn, it does not cut ahead of the
    /// task still mid-slice.
    fn reinsert_woken_tasks(&mut self) {
        let current_priority = self.task_manager.get_tcb(self.current).map(|t| t.priority).unwrap_or(PRIORITY_IDLE);
        for i in 0..MAX_TASKS {
            let (active, ready_state, linked, priority) = match self.task_manager.get_tcb(i) {
                Some(tcb) => (tcb.active, tcb.state == TaskState::Ready, tcb.ready_link.is_linked(), tcb.priority),
                None => continue,
            };
            if active && ready_state && !linked {
                self.add_ready_task(i);
                if !self.locked && i != self.current && priority > current_priority {
                    self.needs_reschedule = true;
                }
            }
        }
    }

    /// Disable rescheduling: the running task keeps the CPU across tick
    /// boundaries and time-slice expiry until [`unlock`](Self::unlock).
    /// Used to guard short critical sections of application logic that
    /// must not be preempted. Only one level of locking is supported —
    /// locking an already-locked scheduler is a state violation — locking
    /// is non-reentrant.
    pub fn lock(&mut self) -> KernelResult<()> {
        if self.locked {
            return Err(KernelError::StateViolation);
        }
        self.locked = true;
        Ok(())
    }

    pub fn unlock(&mut self) -> KernelResult<()> {
        if !self.locked {
            return Err(KernelError::StateViolation);
        }
        self.locked = false;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn mark_running(&mut self) {
        self.running = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn dummy(_arg: usize) -> ! {
        loop {}
    }

    fn fresh() -> Scheduler {
        crate::allocator::init();
        let mut s = Scheduler::new();
        let idle = s.task_manager.create("idle", dummy, 0, PRIORITY_IDLE, 128).unwrap();
        s.set_idle_task(idle).unwrap();
        s
    }

    #[test]
    fn idle_task_runs_when_nothing_else_is_ready() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        let next = s.get_next_task();
        assert_eq!(Some(next), s.idle_task());
    }

    #[test]
    fn higher_priority_task_preempts_lower() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        let low = s.create_task("low", dummy, 0, 1, 128).unwrap();
        let high = s.create_task("high", dummy, 0, 3, 128).unwrap();
        let next = s.get_next_task();
        assert_eq!(next, high);
        let _ = low;
    }

    #[test]
    fn equal_priority_tasks_round_robin_on_slice_expiry() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        let a = s.create_task("a", dummy, 0, 2, 128).unwrap();
        let b = s.create_task("b", dummy, 0, 2, 128).unwrap();

        let first = s.get_next_task();
        assert_eq!(first, a);
        // Burn the time slice to force a rotate.
        for _ in 0..TIME_SLICE_MS {
            s.tick(|_, _, _| {});
        }
        assert!(s.needs_reschedule());
        let second = s.get_next_task();
        assert_eq!(second, b);
    }

    #[test]
    fn create_task_rejects_idle_priority() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        assert_eq!(
            s.create_task("bad", dummy, 0, PRIORITY_IDLE, 128).unwrap_err(),
            KernelError::InvalidParameter
        );
    }

    #[test]
    fn double_lock_is_state_violation() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        s.lock().unwrap();
        assert_eq!(s.lock(), Err(KernelError::StateViolation));
        s.unlock().unwrap();
    }

    #[test]
    fn delayed_task_rejoins_ready_queue_after_ticks_elapse() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        let t = s.create_task("sleeper", dummy, 0, 1, 128).unwrap();
        s.get_next_task(); // dispatch idle or t, doesn't matter
        s.task_manager_mut().delay(t, 2).unwrap();
        s.remove_ready_task(t);
        assert!(!s.task_manager().tasks()[t].ready_link.is_linked());

        s.tick(|_, _, _| {});
        assert!(!s.task_manager().tasks()[t].ready_link.is_linked());
        s.tick(|_, _, _| {});
        assert!(s.task_manager().tasks()[t].ready_link.is_linked());
    }

    #[test]
    fn delay_accounting_continues_while_locked_but_reschedule_is_deferred() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        let t = s.create_task("sleeper", dummy, 0, 1, 128).unwrap();
        s.get_next_task();
        s.task_manager_mut().delay(t, 1).unwrap();
        s.remove_ready_task(t);

        s.lock().unwrap();
        s.tick(|_, _, _| {});
        // Delay bookkeeping ran even though the scheduler is locked: the
        // sleeper is back on its ready queue...
        assert!(s.task_manager().tasks()[t].ready_link.is_linked());
        // ...but no reschedule was requested while locked.
        assert!(!s.needs_reschedule());

        s.unlock().unwrap();
    }

    #[test]
    fn equal_priority_wake_does_not_preempt_mid_slice() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        let a = s.create_task("a", dummy, 0, 2, 128).unwrap();
        let b = s.create_task("b", dummy, 0, 2, 128).unwrap();
        let first = s.get_next_task();
        assert_eq!(first, a);

        s.task_manager_mut().delay(b, 1).unwrap();
        s.remove_ready_task(b);

        s.tick(|_, _, _| {});
        // b rejoins the ready queue but it's only a's equal, not a higher
        // priority, so a keeps running out its slice.
        assert!(s.task_manager().tasks()[b].ready_link.is_linked());
        assert!(!s.needs_reschedule());
    }

    #[test]
    fn higher_priority_wake_does_preempt() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        let low = s.create_task("low", dummy, 0, 1, 128).unwrap();
        let high = s.create_task("high", dummy, 0, 3, 128).unwrap();
        let first = s.get_next_task();
        assert_eq!(first, high);

        s.task_manager_mut().delay(high, 1).unwrap();
        s.remove_ready_task(high);
        // low is now running.
        s.get_next_task();

        s.tick(|_, _, _| {});
        assert!(s.needs_reschedule());
        let next = s.get_next_task();
        assert_eq!(next, high);
        let _ = low;
    }

    #[test]
    fn self_deletion_defers_teardown_to_next_switch() {
        let _g = crate::sync::test_lock();
        let mut s = fresh();
        let t = s.create_task("victim", dummy, 0, 1, 128).unwrap();
        let running = s.get_next_task();
        assert_eq!(running, t);

        s.delete_task(t).unwrap();
        // Still `active` — the TCB (and its stack) must survive until the
        // switch away from it actually happens.
        assert!(s.task_manager().tasks()[t].active);
        assert!(s.needs_reschedule());

        let next = s.get_next_task();
        assert_ne!(next, t);
        assert!(!s.task_manager().tasks()[t].active);
    }
}

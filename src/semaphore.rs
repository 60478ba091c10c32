//! # Counting Semaphores
//!
//! Counting semaphores addressed by a caller-chosen id in `0..MAX_SEMAPHORES`.
//! Like [`crate::queue`], this module owns only the non-blocking primitive
//! (`try_take`) and the waiter-list bookkeeping; turning "nothing available"
//! into an actual suspend/yield/retry is [`crate::kernel`]'s job.
//!
//! `give` hands the unit of the semaphore directly to the oldest waiter
//! when one exists, rather than incrementing the count and letting that
//! waiter re-race for it on its next scheduling slot.

use crate::config::MAX_TASKS;
use crate::error::{KernelError, KernelResult};
use crate::list::WaiterFifo;

struct Semaphore {
    count: u8,
    max_count: u8,
    waiters: WaiterFifo<MAX_TASKS>,
    active: bool,
}

impl Semaphore {
    const fn empty() -> Self {
        Self { count: 0, max_count: 0, waiters: WaiterFifo::new(), active: false }
    }
}

pub struct SemaphoreManager {
    semaphores: [Semaphore; crate::config::MAX_SEMAPHORES],
}

impl SemaphoreManager {
    pub const fn new() -> Self {
        const EMPTY: Semaphore = Semaphore::empty();
        Self { semaphores: [EMPTY; crate::config::MAX_SEMAPHORES] }
    }

    fn get(&self, id: usize) -> KernelResult<&Semaphore> {
        self.semaphores.get(id).filter(|s| s.active).ok_or(KernelError::InvalidParameter)
    }

    fn get_mut(&mut self, id: usize) -> KernelResult<&mut Semaphore> {
        self.semaphores.get_mut(id).filter(|s| s.active).ok_or(KernelError::InvalidParameter)
    }

    pub fn create(&mut self, id: usize, initial_count: u8, max_count: u8) -> KernelResult<()> {
        if id >= crate::config::MAX_SEMAPHORES
            || initial_count > max_count
            || max_count > crate::config::SEMAPHORE_MAX_COUNT
        {
            return Err(KernelError::InvalidParameter);
        }
        if self.semaphores[id].active {
            return Err(KernelError::StateViolation);
        }
        self.semaphores[id] = Semaphore {
            count: initial_count,
            max_count,
            waiters: WaiterFifo::new(),
            active: true,
        };
        Ok(())
    }

    /// Delete a semaphore; every waiter is reported through `on_wake` so
    /// the caller can set it back to `Ready`.
    pub fn delete<F: FnMut(usize)>(&mut self, id: usize, mut on_wake: F) -> KernelResult<()> {
        let sem = self.get_mut(id)?;
        while let Some(task_id) = sem.waiters.pop_front() {
            on_wake(task_id);
        }
        sem.active = false;
        Ok(())
    }

    /// Acquire one unit if available. `Err(KernelError::Empty)` if the
    /// count is currently zero.
    pub fn try_take(&mut self, id: usize) -> KernelResult<()> {
        let sem = self.get_mut(id)?;
        if sem.count == 0 {
            return Err(KernelError::Empty);
        }
        sem.count -= 1;
        Ok(())
    }

    /// Release one unit. If a task is waiting, hand the unit directly to
    /// the oldest one (returned so the caller can wake it) rather than
    /// incrementing `count`. Otherwise increments `count`, saturating at
    /// `max_count`.
    pub fn give(&mut self, id: usize) -> KernelResult<Option<usize>> {
        let sem = self.get_mut(id)?;
        if let Some(task_id) = sem.waiters.pop_front() {
            return Ok(Some(task_id));
        }
        if sem.count < sem.max_count {
            sem.count += 1;
        }
        Ok(None)
    }

    pub fn register_waiter(&mut self, id: usize, task_id: usize) -> KernelResult<()> {
        let sem = self.get_mut(id)?;
        if sem.waiters.push_back(task_id) {
            Ok(())
        } else {
            Err(KernelError::ResourceExhausted)
        }
    }

    pub fn remove_waiter(&mut self, id: usize, task_id: usize) {
        if let Some(sem) = self.semaphores.get_mut(id) {
            sem.waiters.remove(task_id);
        }
    }

    /// Remove `task_id` from every semaphore's waiter list. Used by
    /// `task_delete`, which doesn't know which object, if any, the deleted
    /// task was waiting on.
    pub fn remove_waiter_everywhere(&mut self, task_id: usize) {
        for sem in self.semaphores.iter_mut().filter(|s| s.active) {
            sem.waiters.remove(task_id);
        }
    }

    pub fn get_count(&self, id: usize) -> KernelResult<u8> {
        Ok(self.get(id)?.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_decrements_and_give_increments() {
        let mut sm = SemaphoreManager::new();
        sm.create(0, 1, 3).unwrap();
        sm.try_take(0).unwrap();
        assert_eq!(sm.get_count(0), Ok(0));
        assert_eq!(sm.give(0), Ok(None));
        assert_eq!(sm.get_count(0), Ok(1));
    }

    #[test]
    fn take_at_zero_count_fails() {
        let mut sm = SemaphoreManager::new();
        sm.create(0, 0, 1).unwrap();
        assert_eq!(sm.try_take(0), Err(KernelError::Empty));
    }

    #[test]
    fn give_hands_directly_to_oldest_waiter_without_touching_count() {
        let mut sm = SemaphoreManager::new();
        sm.create(0, 0, 1).unwrap();
        sm.register_waiter(0, 4).unwrap();
        sm.register_waiter(0, 7).unwrap();
        assert_eq!(sm.give(0), Ok(Some(4)));
        assert_eq!(sm.get_count(0), Ok(0));
        assert_eq!(sm.give(0), Ok(Some(7)));
    }

    #[test]
    fn count_saturates_at_max() {
        let mut sm = SemaphoreManager::new();
        sm.create(0, 2, 2).unwrap();
        assert_eq!(sm.give(0), Ok(None));
        assert_eq!(sm.get_count(0), Ok(2));
    }

    #[test]
    fn create_rejects_initial_above_max() {
        let mut sm = SemaphoreManager::new();
        assert_eq!(sm.create(0, 5, 2), Err(KernelError::InvalidParameter));
    }
}

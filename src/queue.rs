//! # Bounded Message Queues
//!
//! Fixed-capacity ring-buffer queues of `u32` messages, addressed by a
//! caller-chosen id in `0..MAX_QUEUES` rather than a freshly allocated one.
//!
//! This module only implements the non-blocking primitives
//! (`try_send`/`try_receive`) plus the waiter-list bookkeeping
//! (`register_waiting_*`/`wake_one_*`). Turning a full/empty queue into an
//! actual suspend-reschedule-retry is [`crate::kernel`]'s job, since that
//! requires the scheduler and task manager that this module deliberately
//! doesn't depend on — `kernel` closes that gap with a real
//! block/yield/retry loop.

use core::ptr::NonNull;

use crate::allocator;
use crate::config::MAX_QUEUES;
use crate::config::MAX_TASKS;
use crate::error::{KernelError, KernelResult};
use crate::list::WaiterFifo;

struct MessageQueue {
    buffer: Option<NonNull<u32>>,
    capacity: usize,
    head: usize,
    tail: usize,
    count: usize,
    send_waiters: WaiterFifo<MAX_TASKS>,
    receive_waiters: WaiterFifo<MAX_TASKS>,
    active: bool,
}

impl MessageQueue {
    const fn empty() -> Self {
        Self {
            buffer: None,
            capacity: 0,
            head: 0,
            tail: 0,
            count: 0,
            send_waiters: WaiterFifo::new(),
            receive_waiters: WaiterFifo::new(),
            active: false,
        }
    }
}

pub struct QueueManager {
    queues: [MessageQueue; MAX_QUEUES],
}

impl QueueManager {
    pub const fn new() -> Self {
        const EMPTY: MessageQueue = MessageQueue::empty();
        Self { queues: [EMPTY; MAX_QUEUES] }
    }

    fn get(&self, queue_id: usize) -> KernelResult<&MessageQueue> {
        self.queues.get(queue_id).filter(|q| q.active).ok_or(KernelError::InvalidParameter)
    }

    fn get_mut(&mut self, queue_id: usize) -> KernelResult<&mut MessageQueue> {
        self.queues.get_mut(queue_id).filter(|q| q.active).ok_or(KernelError::InvalidParameter)
    }

    pub fn create(&mut self, queue_id: usize, capacity: usize) -> KernelResult<()> {
        if queue_id >= MAX_QUEUES || capacity == 0 || capacity > crate::config::MAX_QUEUE_SIZE {
            return Err(KernelError::InvalidParameter);
        }
        if self.queues[queue_id].active {
            return Err(KernelError::StateViolation);
        }
        let bytes = capacity * core::mem::size_of::<u32>();
        let buffer = allocator::alloc(bytes).ok_or(KernelError::ResourceExhausted)?;

        let q = &mut self.queues[queue_id];
        *q = MessageQueue::empty();
        q.buffer = Some(buffer.cast());
        q.capacity = capacity;
        q.active = true;
        Ok(())
    }

    /// Delete a queue, freeing its buffer. Every task still parked on its
    /// sender/receiver waiter lists is reported through `on_wake` so the
    /// caller (`kernel`) can set it back to `Ready`.
    pub fn delete<F: FnMut(usize)>(&mut self, queue_id: usize, mut on_wake: F) -> KernelResult<()> {
        let q = self.get_mut(queue_id)?;
        if let Some(buffer) = q.buffer.take() {
            allocator::free(buffer.cast())?;
        }
        while let Some(id) = q.send_waiters.pop_front() {
            on_wake(id);
        }
        while let Some(id) = q.receive_waiters.pop_front() {
            on_wake(id);
        }
        q.active = false;
        Ok(())
    }

    /// Attempt to enqueue `value`. `Err(KernelError::Full)` if there is no
    /// room right now.
    pub fn try_send(&mut self, queue_id: usize, value: u32) -> KernelResult<()> {
        let q = self.get_mut(queue_id)?;
        if q.count >= q.capacity {
            return Err(KernelError::Full);
        }
        let buffer = q.buffer.expect("active queue has a buffer");
        unsafe { *buffer.as_ptr().add(q.tail) = value };
        q.tail = (q.tail + 1) % q.capacity;
        q.count += 1;
        Ok(())
    }

    /// Attempt to dequeue a value. `Err(KernelError::Empty)` if there is
    /// nothing to read right now.
    pub fn try_receive(&mut self, queue_id: usize) -> KernelResult<u32> {
        let q = self.get_mut(queue_id)?;
        if q.count == 0 {
            return Err(KernelError::Empty);
        }
        let buffer = q.buffer.expect("active queue has a buffer");
        let value = unsafe { *buffer.as_ptr().add(q.head) };
        q.head = (q.head + 1) % q.capacity;
        q.count -= 1;
        Ok(value)
    }

    pub fn peek(&self, queue_id: usize) -> KernelResult<u32> {
        let q = self.get(queue_id)?;
        if q.count == 0 {
            return Err(KernelError::Empty);
        }
        let buffer = q.buffer.expect("active queue has a buffer");
        Ok(unsafe { *buffer.as_ptr().add(q.head) })
    }

    pub fn register_waiting_sender(&mut self, queue_id: usize, task_id: usize) -> KernelResult<()> {
        let q = self.get_mut(queue_id)?;
        if q.send_waiters.push_back(task_id) {
            Ok(())
        } else {
            Err(KernelError::ResourceExhausted)
        }
    }

    pub fn register_waiting_receiver(&mut self, queue_id: usize, task_id: usize) -> KernelResult<()> {
        let q = self.get_mut(queue_id)?;
        if q.receive_waiters.push_back(task_id) {
            Ok(())
        } else {
            Err(KernelError::ResourceExhausted)
        }
    }

    /// Pop the oldest waiting sender, if any, so the caller can wake it.
    pub fn wake_one_sender(&mut self, queue_id: usize) -> Option<usize> {
        self.queues.get_mut(queue_id)?.send_waiters.pop_front()
    }

    pub fn wake_one_receiver(&mut self, queue_id: usize) -> Option<usize> {
        self.queues.get_mut(queue_id)?.receive_waiters.pop_front()
    }

    /// Remove `task_id` from whichever waiter list it might be on — used
    /// when a waiting task is deleted or its timeout expires.
    pub fn remove_waiter(&mut self, queue_id: usize, task_id: usize) {
        if let Some(q) = self.queues.get_mut(queue_id) {
            q.send_waiters.remove(task_id);
            q.receive_waiters.remove(task_id);
        }
    }

    /// Remove `task_id` from every queue's waiter lists. Used by
    /// `task_delete`, which doesn't know (or care) which object, if any,
    /// the deleted task was waiting on.
    pub fn remove_waiter_everywhere(&mut self, task_id: usize) {
        for q in self.queues.iter_mut().filter(|q| q.active) {
            q.send_waiters.remove(task_id);
            q.receive_waiters.remove(task_id);
        }
    }

    pub fn get_count(&self, queue_id: usize) -> KernelResult<usize> {
        Ok(self.get(queue_id)?.count)
    }

    pub fn get_space(&self, queue_id: usize) -> KernelResult<usize> {
        let q = self.get(queue_id)?;
        Ok(q.capacity - q.count)
    }

    pub fn is_full(&self, queue_id: usize) -> KernelResult<bool> {
        let q = self.get(queue_id)?;
        Ok(q.count >= q.capacity)
    }

    pub fn is_empty(&self, queue_id: usize) -> KernelResult<bool> {
        Ok(self.get(queue_id)?.count == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> QueueManager {
        crate::allocator::init();
        QueueManager::new()
    }

    #[test]
    fn send_then_receive_round_trips_in_fifo_order() {
        let _g = crate::sync::test_lock();
        let mut qm = fresh();
        qm.create(0, 4).unwrap();
        qm.try_send(0, 10).unwrap();
        qm.try_send(0, 20).unwrap();
        assert_eq!(qm.try_receive(0), Ok(10));
        assert_eq!(qm.try_receive(0), Ok(20));
    }

    #[test]
    fn send_to_full_queue_fails() {
        let _g = crate::sync::test_lock();
        let mut qm = fresh();
        qm.create(0, 2).unwrap();
        qm.try_send(0, 1).unwrap();
        qm.try_send(0, 2).unwrap();
        assert_eq!(qm.try_send(0, 3), Err(KernelError::Full));
    }

    #[test]
    fn receive_from_empty_queue_fails() {
        let _g = crate::sync::test_lock();
        let mut qm = fresh();
        qm.create(0, 2).unwrap();
        assert_eq!(qm.try_receive(0), Err(KernelError::Empty));
    }

    #[test]
    fn peek_does_not_consume() {
        let _g = crate::sync::test_lock();
        let mut qm = fresh();
        qm.create(0, 2).unwrap();
        qm.try_send(0, 7).unwrap();
        assert_eq!(qm.peek(0), Ok(7));
        assert_eq!(qm.get_count(0), Ok(1));
        assert_eq!(qm.try_receive(0), Ok(7));
    }

    #[test]
    fn delete_wakes_every_waiter() {
        let _g = crate::sync::test_lock();
        let mut qm = fresh();
        qm.create(0, 1).unwrap();
        qm.register_waiting_sender(0, 3).unwrap();
        qm.register_waiting_receiver(0, 5).unwrap();
        let mut woken = [0usize; 2];
        let mut n = 0;
        qm.delete(0, |id| {
            woken[n] = id;
            n += 1;
        })
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(woken, [3, 5]);
    }

    #[test]
    fn create_rejects_oversized_capacity() {
        let _g = crate::sync::test_lock();
        let mut qm = fresh();
        assert_eq!(qm.create(0, crate::config::MAX_QUEUE_SIZE + 1), Err(KernelError::InvalidParameter));
    }
}

//! # Software Timer Service
//!
//! A fixed pool of one-shot/periodic software timers driven entirely by the
//! system tick — there is no dedicated hardware timer per software timer.
//! [`TimerManager::on_tick`] is called once per SysTick from
//! [`crate::kernel`] and decrements every running timer's remaining count,
//! firing callbacks synchronously from tick/ISR context rather than
//! deferring them to task context.
//!
//! Millisecond periods are converted to ticks once, at creation/reset time,
//! via [`crate::config::ms_to_ticks`] — at [`crate::config::TICK_RATE_HZ`]
//! of 1000 this is a 1:1 mapping.

use crate::config::MAX_SOFTWARE_TIMERS;
use crate::error::{KernelError, KernelResult};

/// A software timer's callback. Receives its own id and the opaque
/// `user_data` it was created with (an index, a pointer-sized token —
/// whatever the caller needs, widened to `usize` since this is safe Rust
/// rather than a `void*`).
pub type TimerCallback = fn(usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerType {
    OneShot,
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running,
    Expired,
}

struct SoftwareTimer {
    kind: TimerType,
    state: TimerState,
    period_ticks: u32,
    remaining_ticks: u32,
    callback: Option<TimerCallback>,
    user_data: usize,
    active: bool,
}

impl SoftwareTimer {
    const fn empty() -> Self {
        Self {
            kind: TimerType::OneShot,
            state: TimerState::Stopped,
            period_ticks: 0,
            remaining_ticks: 0,
            callback: None,
            user_data: 0,
            active: false,
        }
    }
}

/// Cumulative timer-service statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerStats {
    pub system_ticks: u64,
    pub timer_interrupts: u32,
    pub missed_ticks: u32,
    pub max_interrupt_time: u32,
    pub total_interrupt_time: u32,
    pub software_timer_expirations: u32,
}

pub struct TimerManager {
    timers: [SoftwareTimer; MAX_SOFTWARE_TIMERS],
    stats: TimerStats,
    tick_counter: u64,
    running: bool,
}

impl TimerManager {
    pub const fn new() -> Self {
        const EMPTY: SoftwareTimer = SoftwareTimer::empty();
        Self {
            timers: [EMPTY; MAX_SOFTWARE_TIMERS],
            stats: TimerStats {
                system_ticks: 0,
                timer_interrupts: 0,
                missed_ticks: 0,
                max_interrupt_time: 0,
                total_interrupt_time: 0,
                software_timer_expirations: 0,
            },
            tick_counter: 0,
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn get_ticks(&self) -> u64 {
        self.tick_counter
    }

    pub fn get_uptime_ms(&self) -> u32 {
        crate::config::ticks_to_ms(self.tick_counter as u32)
    }

    pub fn get_stats(&self) -> TimerStats {
        let mut stats = self.stats;
        stats.system_ticks = self.tick_counter;
        stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.timer_interrupts = 0;
        self.stats.missed_ticks = 0;
        self.stats.max_interrupt_time = 0;
        self.stats.total_interrupt_time = 0;
        self.stats.software_timer_expirations = 0;
    }

    fn find_free_slot(&self) -> Option<usize> {
        self.timers.iter().position(|t| !t.active)
    }

    pub fn create(
        &mut self,
        kind: TimerType,
        period_ms: u32,
        callback: TimerCallback,
        user_data: usize,
    ) -> KernelResult<usize> {
        if period_ms == 0 {
            return Err(KernelError::InvalidParameter);
        }
        let id = self.find_free_slot().ok_or(KernelError::ResourceExhausted)?;
        let period_ticks = crate::config::ms_to_ticks(period_ms);
        self.timers[id] = SoftwareTimer {
            kind,
            state: TimerState::Stopped,
            period_ticks,
            remaining_ticks: period_ticks,
            callback: Some(callback),
            user_data,
            active: true,
        };
        Ok(id)
    }

    fn get_mut(&mut self, id: usize) -> KernelResult<&mut SoftwareTimer> {
        self.timers.get_mut(id).filter(|t| t.active).ok_or(KernelError::InvalidParameter)
    }

    pub fn delete(&mut self, id: usize) -> KernelResult<()> {
        let t = self.get_mut(id)?;
        t.active = false;
        t.state = TimerState::Stopped;
        t.callback = None;
        Ok(())
    }

    pub fn start_timer(&mut self, id: usize) -> KernelResult<()> {
        let t = self.get_mut(id)?;
        t.state = TimerState::Running;
        t.remaining_ticks = t.period_ticks;
        Ok(())
    }

    pub fn stop_timer(&mut self, id: usize) -> KernelResult<()> {
        self.get_mut(id)?.state = TimerState::Stopped;
        Ok(())
    }

    pub fn reset_timer(&mut self, id: usize) -> KernelResult<()> {
        let t = self.get_mut(id)?;
        t.remaining_ticks = t.period_ticks;
        t.state = TimerState::Running;
        Ok(())
    }

    pub fn change_period(&mut self, id: usize, new_period_ms: u32) -> KernelResult<()> {
        if new_period_ms == 0 {
            return Err(KernelError::InvalidParameter);
        }
        let new_period_ticks = crate::config::ms_to_ticks(new_period_ms);
        let t = self.get_mut(id)?;
        t.period_ticks = new_period_ticks;
        if t.state == TimerState::Running {
            t.remaining_ticks = new_period_ticks;
        }
        Ok(())
    }

    pub fn get_state(&self, id: usize) -> TimerState {
        match self.timers.get(id) {
            Some(t) if t.active => t.state,
            _ => TimerState::Stopped,
        }
    }

    pub fn get_remaining_ticks(&self, id: usize) -> u32 {
        match self.timers.get(id) {
            Some(t) if t.active => t.remaining_ticks,
            _ => 0,
        }
    }

    /// Advance every running timer by one tick, firing expired callbacks
    /// synchronously. Called once per SysTick from `kernel`.
    pub fn on_tick(&mut self) {
        self.tick_counter += 1;
        self.stats.timer_interrupts += 1;

        for id in 0..MAX_SOFTWARE_TIMERS {
            let timer = &mut self.timers[id];
            if !timer.active || timer.state != TimerState::Running {
                continue;
            }
            if timer.remaining_ticks == 0 {
                continue;
            }
            timer.remaining_ticks -= 1;
            if timer.remaining_ticks != 0 {
                continue;
            }

            self.stats.software_timer_expirations += 1;
            let (kind, period_ticks, callback, user_data) =
                (timer.kind, timer.period_ticks, timer.callback, timer.user_data);

            if kind == TimerType::Periodic {
                self.timers[id].remaining_ticks = period_ticks;
            } else {
                self.timers[id].state = TimerState::Expired;
            }

            if let Some(cb) = callback {
                cb(id, user_data);
            }
        }
    }
}

/// Busy-wait for approximately `us` microseconds, calibrated off
/// [`crate::config::SYSTEM_CLOCK_HZ`]. Coarse: good for short hardware
/// settling delays, not for anything requiring real precision.
pub fn delay_us(us: u32) {
    let cycles = (us as u64 * crate::config::SYSTEM_CLOCK_HZ as u64) / 1_000_000 / 4;
    for _ in 0..cycles {
        cortex_m::asm::nop();
    }
}

/// Busy-wait for approximately `ms` milliseconds. Distinct from
/// `kernel::delay_task`, which suspends the calling task instead of
/// spinning — this one is for use before the scheduler is running, or
/// where suspension genuinely isn't wanted.
pub fn delay_ms(ms: u32) {
    for _ in 0..ms {
        delay_us(1000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Shared across the tests that use `record` as a callback; those tests
    // hold `crate::sync::test_lock()` for their whole body.
    static mut FIRE_COUNT: u32 = 0;
    static mut LAST_USER_DATA: usize = 0;

    fn record(_id: usize, user_data: usize) {
        unsafe {
            FIRE_COUNT += 1;
            LAST_USER_DATA = user_data;
        }
    }

    fn reset_recorder() {
        unsafe {
            FIRE_COUNT = 0;
            LAST_USER_DATA = 0;
        }
    }

    #[test]
    fn one_shot_timer_fires_once_then_expires() {
        let _g = crate::sync::test_lock();
        reset_recorder();
        let mut tm = TimerManager::new();
        let id = tm.create(TimerType::OneShot, 3, record, 42).unwrap();
        tm.start_timer(id).unwrap();
        tm.on_tick();
        tm.on_tick();
        assert_eq!(unsafe { FIRE_COUNT }, 0);
        tm.on_tick();
        assert_eq!(unsafe { FIRE_COUNT }, 1);
        assert_eq!(unsafe { LAST_USER_DATA }, 42);
        assert_eq!(tm.get_state(id), TimerState::Expired);
        tm.on_tick();
        assert_eq!(unsafe { FIRE_COUNT }, 1);
    }

    #[test]
    fn periodic_timer_reloads_and_fires_repeatedly() {
        let _g = crate::sync::test_lock();
        reset_recorder();
        let mut tm = TimerManager::new();
        let id = tm.create(TimerType::Periodic, 2, record, 0).unwrap();
        tm.start_timer(id).unwrap();
        for _ in 0..6 {
            tm.on_tick();
        }
        assert_eq!(unsafe { FIRE_COUNT }, 3);
        assert_eq!(tm.get_state(id), TimerState::Running);
    }

    #[test]
    fn stopped_timer_does_not_tick_down() {
        let _g = crate::sync::test_lock();
        reset_recorder();
        let mut tm = TimerManager::new();
        let id = tm.create(TimerType::OneShot, 1, record, 0).unwrap();
        tm.on_tick();
        tm.on_tick();
        assert_eq!(unsafe { FIRE_COUNT }, 0);
        assert_eq!(tm.get_state(id), TimerState::Stopped);
    }

    #[test]
    fn change_period_updates_running_timer_remaining_time() {
        let mut tm = TimerManager::new();
        let id = tm.create(TimerType::Periodic, 5, record, 0).unwrap();
        tm.start_timer(id).unwrap();
        tm.change_period(id, 10).unwrap();
        assert_eq!(tm.get_remaining_ticks(id), 10);
    }

    #[test]
    fn create_rejects_zero_period() {
        let mut tm = TimerManager::new();
        assert_eq!(tm.create(TimerType::OneShot, 0, record, 0).unwrap_err(), KernelError::InvalidParameter);
    }

    #[test]
    fn delete_makes_slot_reusable() {
        let mut tm = TimerManager::new();
        let id = tm.create(TimerType::OneShot, 1, record, 0).unwrap();
        tm.delete(id).unwrap();
        let id2 = tm.create(TimerType::OneShot, 1, record, 0).unwrap();
        assert_eq!(id, id2);
    }
}

//! # rtkern Demo Firmware
//!
//! Two small demos sharing one kernel instance:
//!
//! - **LED blink** (`led_*_task`): three tasks blinking at different rates
//!   via `kernel::delay_task`, plus a periodic software timer driving a
//!   heartbeat log line every 5 seconds.
//! - **Producer/consumer**: a producer pushes items onto a bounded queue
//!   and signals a counting semaphore; a consumer waits on the count,
//!   takes a mutex semaphore, drains the queue, and releases the mutex.
//!
//! | Task | Priority | Role |
//! |------|----------|------|
//! | `led_fast_task` | HIGH | blinks every 100 ms |
//! | `led_medium_task` | MEDIUM | blinks every 500 ms |
//! | `led_slow_task` | LOW | blinks every 1000 ms |
//! | `producer_task` | MEDIUM | sends to `DATA_QUEUE` every 250 ms |
//! | `consumer_task` | MEDIUM | drains `DATA_QUEUE` as items arrive |

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use rtkern::config::{PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_MEDIUM};
use rtkern::kernel;
use rtkern::timer::TimerType;

const DATA_QUEUE: usize = 0;
const ITEM_COUNT_SEMAPHORE: usize = 0;
const QUEUE_MUTEX_SEMAPHORE: usize = 1;

const QUEUE_TIMEOUT_MS: u32 = 100;

extern "C" fn led_fast_task(_arg: usize) -> ! {
    loop {
        toggle_led(0);
        kernel::delay_task(kernel::ms_to_ticks(100)).ok();
    }
}

extern "C" fn led_medium_task(_arg: usize) -> ! {
    loop {
        toggle_led(1);
        kernel::delay_task(kernel::ms_to_ticks(500)).ok();
    }
}

extern "C" fn led_slow_task(_arg: usize) -> ! {
    loop {
        toggle_led(2);
        kernel::delay_task(kernel::ms_to_ticks(1000)).ok();
    }
}

/// Placeholder GPIO toggle — the real pin write is board-specific HAL code
/// out of this crate's scope (§6's HAL boundary). `led` identifies which of
/// the three demo LEDs this is, for anyone wiring in real GPIO later.
fn toggle_led(led: u8) {
    log::trace!("led {} toggled", led);
}

fn heartbeat(_timer_id: usize, _user_data: usize) {
    log::info!("heartbeat: uptime={}ms", kernel::get_uptime_ms());
}

extern "C" fn producer_task(_arg: usize) -> ! {
    let mut next_value: u32 = 0;
    loop {
        match kernel::queue_send(DATA_QUEUE, next_value, QUEUE_TIMEOUT_MS) {
            Ok(()) => {
                next_value = next_value.wrapping_add(1);
                kernel::semaphore_give(ITEM_COUNT_SEMAPHORE).ok();
            }
            Err(e) => log::warn!("producer: send failed: {:?}", e),
        }
        kernel::delay_task(kernel::ms_to_ticks(250)).ok();
    }
}

extern "C" fn consumer_task(_arg: usize) -> ! {
    loop {
        if kernel::semaphore_take(ITEM_COUNT_SEMAPHORE, rtkern::config::QUEUE_TIMEOUT_INFINITE).is_err() {
            continue;
        }
        if kernel::semaphore_take(QUEUE_MUTEX_SEMAPHORE, rtkern::config::QUEUE_TIMEOUT_INFINITE).is_err() {
            continue;
        }
        match kernel::queue_receive(DATA_QUEUE, QUEUE_TIMEOUT_MS) {
            Ok(value) => log::info!("consumer: received {}", value),
            Err(e) => log::warn!("consumer: receive failed: {:?}", e),
        }
        kernel::semaphore_give(QUEUE_MUTEX_SEMAPHORE).ok();
    }
}

/// Firmware entry point. Initializes the kernel, wires up the demo queue,
/// semaphores and heartbeat timer, creates the demo tasks, and starts the
/// scheduler. Does not return.
#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::init();

    kernel::queue_create(DATA_QUEUE, 8).expect("queue create");
    kernel::semaphore_create(ITEM_COUNT_SEMAPHORE, 0, 10).expect("count semaphore create");
    kernel::semaphore_create(QUEUE_MUTEX_SEMAPHORE, 1, 1).expect("mutex semaphore create");
    kernel::timer_create(TimerType::Periodic, 5000, heartbeat, 0).expect("heartbeat timer create");
    kernel::timer_start(0).expect("heartbeat timer start");

    kernel::create_task("led_fast", led_fast_task, 0, PRIORITY_HIGH, rtkern::config::DEFAULT_STACK_SIZE)
        .expect("create led_fast_task");
    kernel::create_task("led_medium", led_medium_task, 0, PRIORITY_MEDIUM, rtkern::config::DEFAULT_STACK_SIZE)
        .expect("create led_medium_task");
    kernel::create_task("led_slow", led_slow_task, 0, PRIORITY_LOW, rtkern::config::DEFAULT_STACK_SIZE)
        .expect("create led_slow_task");
    kernel::create_task("producer", producer_task, 0, PRIORITY_MEDIUM, rtkern::config::DEFAULT_STACK_SIZE)
        .expect("create producer_task");
    kernel::create_task("consumer", consumer_task, 0, PRIORITY_MEDIUM, rtkern::config::DEFAULT_STACK_SIZE)
        .expect("create consumer_task");

    kernel::start(cp)
}

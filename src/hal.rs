//! Board facilities the node depends on: clock, power control, reset.

use std::sync::atomic::{AtomicBool, Ordering};

/// Hardware low-power periods
///
/// The watchdog cannot time the short periods exactly; `Ms120`, `Ms60`,
/// `Ms30` and `Ms15` are what the 125/64/32/16 ms steps actually sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SleepPeriod {
    Ms15,
    Ms30,
    Ms60,
    Ms120,
    Ms250,
    Ms500,
    S1,
    S2,
    S4,
    S8,
    /// No timeout; only an interrupt wakes the board
    Forever,
}

impl SleepPeriod {
    /// Time actually spent in the period, `None` for [`SleepPeriod::Forever`]
    pub fn duration_ms(self) -> Option<u64> {
        match self {
            Self::Ms15 => Some(15),
            Self::Ms30 => Some(30),
            Self::Ms60 => Some(60),
            Self::Ms120 => Some(120),
            Self::Ms250 => Some(250),
            Self::Ms500 => Some(500),
            Self::S1 => Some(1000),
            Self::S2 => Some(2000),
            Self::S4 => Some(4000),
            Self::S8 => Some(8000),
            Self::Forever => None,
        }
    }
}

/// Pin level change that fires the wake interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    Low,
    Change,
    Rising,
    Falling,
}

/// Board services
pub trait Hardware {
    /// Monotonic milliseconds since boot
    fn millis(&self) -> u64;

    /// Let pending serial output drain before powering down
    fn flush_output(&mut self);

    /// Enter one low-power cycle of the given period
    fn power_down(&mut self, period: SleepPeriod);

    /// Arm an external interrupt that calls [`WakeSignal::raise`]
    fn attach_wake_interrupt(&mut self, interrupt: u8, mode: InterruptMode);

    fn detach_wake_interrupt(&mut self, interrupt: u8);

    /// Restart the device. Real boards never return from this.
    fn reboot(&mut self);
}

/// Wake flag shared between an interrupt handler and the sleep loop
///
/// Only polled between low-power cycles.
#[derive(Debug, Default)]
pub struct WakeSignal {
    raised: AtomicBool,
}

impl WakeSignal {
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Called from the interrupt handler
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

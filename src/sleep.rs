//! Power-down scheduler.
//!
//! A requested sleep is split into hardware low-power cycles, largest first:
//! 8 s cycles while at least 8 s remain, then at most one cycle of each
//! smaller period whose threshold still fits. The wake flag is checked
//! before every cycle; a cycle in progress is never cut short.

use crate::hal::{Hardware, SleepPeriod, WakeSignal};

const LONGEST: (u64, SleepPeriod) = (8000, SleepPeriod::S8);

/// Threshold that must remain for each period to be used
const STEPS: [(u64, SleepPeriod); 9] = [
    (4000, SleepPeriod::S4),
    (2000, SleepPeriod::S2),
    (1000, SleepPeriod::S1),
    (500, SleepPeriod::Ms500),
    (250, SleepPeriod::Ms250),
    (125, SleepPeriod::Ms120),
    (64, SleepPeriod::Ms60),
    (32, SleepPeriod::Ms30),
    (16, SleepPeriod::Ms15),
];

/// Outcome of a sleep request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SleepReport {
    /// Cycles executed, in order
    pub cycles: Vec<SleepPeriod>,
    /// Sum of the executed cycles
    pub slept_ms: u64,
    /// Woken by the interrupt rather than by the timer
    pub interrupted: bool,
}

/// Walk the decomposition of `duration_ms`, stopping when `step` returns false
fn decompose(duration_ms: u64, mut step: impl FnMut(SleepPeriod) -> bool) {
    let mut remaining = duration_ms;
    let (threshold, period) = LONGEST;
    while remaining >= threshold {
        if !step(period) {
            return;
        }
        remaining -= threshold;
    }
    for (threshold, period) in STEPS {
        if remaining < threshold {
            continue;
        }
        if !step(period) {
            return;
        }
        remaining -= period.duration_ms().unwrap_or(threshold);
    }
}

/// Cycles a sleep of `duration_ms` would use when not interrupted
pub fn plan(duration_ms: u64) -> Vec<SleepPeriod> {
    let mut cycles = Vec::new();
    decompose(duration_ms, |period| {
        cycles.push(period);
        true
    });
    cycles
}

/// Run the cycles for `duration_ms`, aborting between cycles once `wake` is raised
pub fn power_down<H: Hardware>(hardware: &mut H, wake: &WakeSignal, duration_ms: u64) -> SleepReport {
    let mut report = SleepReport::default();
    decompose(duration_ms, |period| {
        if wake.is_raised() {
            return false;
        }
        hardware.power_down(period);
        report.cycles.push(period);
        report.slept_ms += period.duration_ms().unwrap_or(0);
        true
    });
    report.interrupted = wake.is_raised();
    report
}

//! refresh.rs
//! Periodic re-issue of the last commanded throttle.
//!
//! Some ESC/autopilot combinations drop back to neutral if the servo command
//! is not repeated. While continuous mode is on, every tick re-sends the last
//! `(channel, pwm)` pair through the active link. Timing follows a fixed
//! release schedule (next deadline += period) so late ticks do not drift.

use parking_lot::Mutex;
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilderExt, ThreadPriority};
use log::{debug, info, warn};

use crate::command::link::{CommandLink, PWM_NEUTRAL};

/// Last throttle command, shared between the coordinator and the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleState {
    pub channel: u8,
    pub pwm: u16,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self { channel: 1, pwm: PWM_NEUTRAL }
    }
}

pub type SharedThrottle = Arc<Mutex<ThrottleState>>;

pub struct RefreshLoop {
    continuous: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshLoop {
    /// Starts the refresh thread. Continuous mode starts off.
    pub fn spawn(
        interval: Duration,
        link: Arc<dyn CommandLink>,
        throttle: SharedThrottle,
    ) -> io::Result<Self> {
        let continuous = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU64::new(0));

        let handle = {
            let continuous = continuous.clone();
            let running = running.clone();
            let ticks = ticks.clone();
            thread::Builder::new()
                .name("throttle-refresh".into())
                .spawn_with_priority(ThreadPriority::Max, move |priority| {
                    if let Err(e) = priority {
                        debug!("[Refresh] running at default priority: {:?}", e);
                    }
                    refresh_loop(interval, &*link, &throttle, &continuous, &running, &ticks);
                })?
        };

        info!("[Refresh] started ({} ms)", interval.as_millis());
        Ok(Self {
            continuous,
            running,
            ticks,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn set_continuous(&self, enabled: bool) {
        self.continuous.store(enabled, Ordering::Release);
        info!("[Refresh] continuous {}", if enabled { "ON" } else { "OFF" });
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous.load(Ordering::Acquire)
    }

    /// Number of re-issued commands so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops and joins the thread. Safe to call more than once.
    pub fn stop(&self) {
        self.continuous.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
            debug!("[Refresh] stopped after {} re-issues", self.ticks());
        }
    }
}

impl Drop for RefreshLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn refresh_loop(
    period: Duration,
    link: &dyn CommandLink,
    throttle: &Mutex<ThrottleState>,
    continuous: &AtomicBool,
    running: &AtomicBool,
    ticks: &AtomicU64,
) {
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut next_deadline = Instant::now() + period;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < next_deadline {
            sleeper.sleep(next_deadline - now);
        } else if now - next_deadline > period {
            // fell more than a period behind; resync instead of bursting
            next_deadline = now;
        }
        next_deadline += period;

        if !running.load(Ordering::Acquire) || !continuous.load(Ordering::Acquire) {
            continue;
        }

        let ThrottleState { channel, pwm } = *throttle.lock();
        match link.set_channel(channel, pwm) {
            Ok(()) => {
                ticks.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("[Refresh] re-issue ch{} failed: {}", channel, e),
        }
    }
}

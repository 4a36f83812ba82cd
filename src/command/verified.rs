//! verified.rs
//! Command link over an acknowledged autopilot transport.
//!
//! Construction runs the whole handshake synchronously:
//! 1. wait for a heartbeat (fatal on timeout)
//! 2. negotiate the configured parameters (set, wait for echo, fall back to a
//!    read-back, retry, then skip with a warning; never fatal)
//! 3. request the bench mode and wait for a heartbeat reporting it (fatal on timeout)
//!
//! Once ready, a monitor thread drains heartbeats into [`LinkState`] and
//! `arm` verifies against the armed flag it maintains.

use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use log::{debug, error, info, warn};

use crate::command::{
    link::{CommandLink, LinkPhase, LinkSnapshot, LinkState},
    mavlink::{Inbound, MessageLink, Outbound},
};
use crate::config::{LinkConfig, LinkTimeouts, ParamSpec};
use crate::error::LinkError;

/// Longest single blocking receive during the handshake.
const RECV_SLICE: Duration = Duration::from_secs(1);
/// How often `arm` re-reads the armed flag.
const ARM_POLL: Duration = Duration::from_millis(50);
/// Messages handled per monitor pass.
const MONITOR_DRAIN_MAX: usize = 64;
/// Longest a monitor pass keeps draining before it sleeps.
const MONITOR_DRAIN_BUDGET: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOutcome {
    /// Vehicle echoed the new value.
    Confirmed,
    /// No echo, but a read-back already showed the value.
    AlreadySet,
    /// Gave up after the retry budget.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationReport {
    pub confirmed: Vec<String>,
    pub already_set: Vec<String>,
    pub skipped: Vec<String>,
}

impl NegotiationReport {
    fn record(&mut self, name: &str, outcome: ParamOutcome) {
        let bucket = match outcome {
            ParamOutcome::Confirmed => &mut self.confirmed,
            ParamOutcome::AlreadySet => &mut self.already_set,
            ParamOutcome::Skipped => &mut self.skipped,
        };
        bucket.push(name.to_string());
    }
}

pub struct VerifiedLink<L> {
    transport: Arc<Mutex<L>>,
    state: Arc<Mutex<LinkState>>,
    timeouts: LinkTimeouts,
    report: NegotiationReport,
    monitor_running: Arc<AtomicBool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Applies one inbound message to the link state.
fn observe(state: &Mutex<LinkState>, msg: &Inbound) {
    if let Inbound::Heartbeat(hb) = msg {
        let mut s = state.lock();
        s.last_heartbeat = Some(Instant::now());
        s.armed = hb.is_armed();
        s.mode = Some(hb.custom_mode);
    }
}

fn param_matches(msg: &Inbound, param: &ParamSpec, tolerance: f32) -> bool {
    match msg {
        Inbound::ParamValue { name, value } => {
            *name == param.name && (value - param.value).abs() < tolerance
        }
        _ => false,
    }
}

/// Handshake driver; borrows the transport until the link is ready.
struct Handshake<'a, L> {
    transport: &'a mut L,
    state: &'a Mutex<LinkState>,
    config: &'a LinkConfig,
}

impl<L: MessageLink> Handshake<'_, L> {
    /// Receives until `pred` accepts a message or `timeout` passes.
    fn wait_for(&mut self, timeout: Duration, mut pred: impl FnMut(&Inbound) -> bool) -> Result<bool, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            if let Some(msg) = self.transport.recv(remaining.min(RECV_SLICE))? {
                observe(self.state, &msg);
                if pred(&msg) {
                    return Ok(true);
                }
            }
        }
    }

    fn wait_heartbeat(&mut self) -> Result<(), LinkError> {
        let timeout = self.config.timeouts.heartbeat();
        info!("[Link] connecting, waiting for heartbeat");
        if self.wait_for(timeout, |m| matches!(m, Inbound::Heartbeat(_)))? {
            info!("[Link] heartbeat received");
            Ok(())
        } else {
            error!("[Link] no heartbeat within {:?}", timeout);
            Err(LinkError::Unavailable { timeout })
        }
    }

    fn set_param(&mut self, param: &ParamSpec) -> Result<ParamOutcome, LinkError> {
        let timeouts = self.config.timeouts;
        let retries = self.config.param_retries;
        let tolerance = self.config.param_tolerance;

        for attempt in 1..=retries {
            self.transport.send(&Outbound::ParamSet {
                name: param.name.clone(),
                value: param.value,
            })?;
            if self.wait_for(timeouts.param_echo(), |m| param_matches(m, param, tolerance))? {
                info!("[Link] {} -> {}", param.name, param.value);
                return Ok(ParamOutcome::Confirmed);
            }

            // no echo: ask for the current value instead
            self.transport.send(&Outbound::ParamRead { name: param.name.clone() })?;
            if self.wait_for(timeouts.param_read(), |m| param_matches(m, param, tolerance))? {
                info!("[Link] {} already {} (echo skipped)", param.name, param.value);
                return Ok(ParamOutcome::AlreadySet);
            }

            warn!("[Link] {} not updated, retry {}/{}", param.name, attempt, retries);
        }

        warn!("[Link] skipping {} (no echo)", param.name);
        Ok(ParamOutcome::Skipped)
    }

    fn negotiate(&mut self) -> Result<NegotiationReport, LinkError> {
        let config = self.config;
        let mut report = NegotiationReport::default();
        if !config.params.is_empty() {
            info!("[Link] writing {} parameters", config.params.len());
        }
        for param in &config.params {
            let outcome = self.set_param(param)?;
            report.record(&param.name, outcome);
        }
        Ok(report)
    }

    fn run(&mut self) -> Result<NegotiationReport, LinkError> {
        self.wait_heartbeat()?;
        let report = self.negotiate()?;
        self.change_mode()?;
        Ok(report)
    }

    fn change_mode(&mut self) -> Result<(), LinkError> {
        let mode = self.config.custom_mode;
        let timeout = self.config.timeouts.mode();
        self.transport.send(&Outbound::SetMode { custom_mode: mode })?;

        let hit = self.wait_for(timeout, |m| {
            matches!(m, Inbound::Heartbeat(hb) if hb.custom_mode == mode)
        })?;
        if hit {
            info!("[Link] mode -> {}", self.config.mode_name);
            Ok(())
        } else {
            error!("[Link] couldn't enter {}", self.config.mode_name);
            Err(LinkError::ModeUnconfirmed {
                mode: self.config.mode_name.clone(),
                timeout,
            })
        }
    }
}

impl<L: MessageLink + 'static> VerifiedLink<L> {
    /// Runs the handshake and starts the heartbeat monitor.
    ///
    /// Fails only when no heartbeat arrives or the mode change is not
    /// confirmed; parameter problems are logged and skipped.
    pub fn connect(mut transport: L, config: &LinkConfig) -> Result<Self, LinkError> {
        let state = Arc::new(Mutex::new(LinkState::new()));
        state.lock().phase = LinkPhase::HandshakeInProgress;

        let result = Handshake {
            transport: &mut transport,
            state: &state,
            config,
        }
        .run();

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                state.lock().phase = LinkPhase::Faulted;
                return Err(e);
            }
        };

        state.lock().phase = LinkPhase::Ready;
        let link = Self {
            transport: Arc::new(Mutex::new(transport)),
            state,
            timeouts: config.timeouts,
            report,
            monitor_running: Arc::new(AtomicBool::new(true)),
            monitor: Mutex::new(None),
        };
        link.spawn_monitor()?;
        Ok(link)
    }

    fn spawn_monitor(&self) -> Result<(), LinkError> {
        let transport = self.transport.clone();
        let state = self.state.clone();
        let running = self.monitor_running.clone();
        let interval = self.timeouts.monitor_interval();

        let handle = thread::Builder::new()
            .name("link-heartbeat".into())
            .spawn(move || monitor_loop(&transport, &state, &running, interval))?;
        *self.monitor.lock() = Some(handle);
        Ok(())
    }
}

impl<L> VerifiedLink<L> {
    pub fn negotiation_report(&self) -> &NegotiationReport {
        &self.report
    }

    pub fn phase(&self) -> LinkPhase {
        self.state.lock().phase
    }
}

/// Drains heartbeats without blocking the command path for long.
/// The transport lock is held for one poll at a time.
fn monitor_loop<L: MessageLink>(
    transport: &Mutex<L>,
    state: &Mutex<LinkState>,
    running: &AtomicBool,
    interval: Duration,
) {
    while running.load(Ordering::Acquire) {
        let pass_end = Instant::now() + MONITOR_DRAIN_BUDGET;
        let mut drained = Ok(());
        for _ in 0..MONITOR_DRAIN_MAX {
            let polled = transport.lock().recv(Duration::ZERO);
            match polled {
                Ok(Some(msg)) => observe(state, &msg),
                Ok(None) => break,
                Err(e) => {
                    drained = Err(e);
                    break;
                }
            }
            if Instant::now() >= pass_end {
                break;
            }
        }

        if let Err(e) = drained {
            warn!("[Link] heartbeat monitor stopped: {}", e);
            let mut s = state.lock();
            if s.phase == LinkPhase::Ready {
                s.phase = LinkPhase::Faulted;
            }
            break;
        }
        thread::sleep(interval);
    }
    debug!("[Link] heartbeat monitor exited.");
}

impl<L: MessageLink> CommandLink for VerifiedLink<L> {
    fn is_connected(&self) -> bool {
        let s = self.state.lock();
        s.is_ready() && s.is_alive(self.timeouts.liveness())
    }

    fn arm(&self, enable: bool) -> bool {
        if !self.state.lock().is_ready() {
            return false;
        }
        if let Err(e) = self.transport.lock().send(&Outbound::ArmDisarm { arm: enable }) {
            warn!("[Link] arm request failed: {}", e);
            self.state.lock().phase = LinkPhase::Faulted;
            return false;
        }

        let deadline = Instant::now() + self.timeouts.arm();
        loop {
            if self.state.lock().armed == enable {
                info!("[Link] {}", if enable { "armed" } else { "disarmed" });
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "[Link] {} not confirmed within {:?}",
                    if enable { "arm" } else { "disarm" },
                    self.timeouts.arm()
                );
                return false;
            }
            thread::sleep(ARM_POLL.min(remaining));
        }
    }

    fn set_channel(&self, channel: u8, pwm: u16) -> Result<(), LinkError> {
        let ready = {
            let mut s = self.state.lock();
            s.set_shadow(channel, pwm)?;
            debug!("[Link] PWM {:?}", s.shadow);
            s.is_ready()
        };
        if !ready {
            return Err(LinkError::NotReady);
        }

        if let Err(e) = self.transport.lock().send(&Outbound::SetServo { channel, pwm }) {
            self.state.lock().phase = LinkPhase::Faulted;
            return Err(e);
        }
        Ok(())
    }

    fn snapshot(&self) -> LinkSnapshot {
        let s = self.state.lock();
        LinkSnapshot {
            phase: s.phase,
            connected: s.is_ready() && s.is_alive(self.timeouts.liveness()),
            armed: s.armed,
            shadow: s.shadow,
        }
    }

    fn close(&self) {
        self.monitor_running.store(false, Ordering::Release);
        if let Some(handle) = self.monitor.lock().take() {
            let _ = handle.join();
        }
        let mut s = self.state.lock();
        if s.phase != LinkPhase::Faulted {
            s.phase = LinkPhase::Closed;
        }
    }
}

impl<L> Drop for VerifiedLink<L> {
    fn drop(&mut self) {
        self.monitor_running.store(false, Ordering::Release);
        if let Some(handle) = self.monitor.lock().take() {
            let _ = handle.join();
        }
    }
}

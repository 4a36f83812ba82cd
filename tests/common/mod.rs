#![allow(dead_code)]

use parking_lot::Mutex;
use std::{
    io,
    net::{SocketAddr, UdpSocket},
    path::Path,
    thread,
    time::{Duration, Instant},
};

use motor_bench::{
    Settings,
    command::{CHANNEL_COUNT, CommandLink, LinkPhase, LinkSnapshot, PWM_NEUTRAL},
    error::LinkError,
};

/// CommandLink that records every call instead of driving hardware.
pub struct RecordingLink {
    pub sends: Mutex<Vec<(u8, u16)>>,
    pub attempts: Mutex<Vec<(u8, u16)>>,
    pub arm_requests: Mutex<Vec<bool>>,
    pub confirm_arm: bool,
    /// Channels whose sends fail with an I/O error.
    pub failing: Vec<u8>,
    state: Mutex<(bool, [u16; CHANNEL_COUNT], LinkPhase)>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::with_arm_confirmation(true)
    }

    pub fn with_arm_confirmation(confirm_arm: bool) -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            arm_requests: Mutex::new(Vec::new()),
            confirm_arm,
            failing: Vec::new(),
            state: Mutex::new((false, [PWM_NEUTRAL; CHANNEL_COUNT], LinkPhase::Ready)),
        }
    }

    pub fn failing_on(channels: &[u8]) -> Self {
        Self {
            failing: channels.to_vec(),
            ..Self::new()
        }
    }

    pub fn attempts(&self) -> Vec<(u8, u16)> {
        self.attempts.lock().clone()
    }

    pub fn sends(&self) -> Vec<(u8, u16)> {
        self.sends.lock().clone()
    }

    pub fn last_send(&self) -> Option<(u8, u16)> {
        self.sends.lock().last().copied()
    }

    pub fn clear(&self) {
        self.sends.lock().clear();
        self.attempts.lock().clear();
        self.arm_requests.lock().clear();
    }
}

impl CommandLink for RecordingLink {
    fn is_connected(&self) -> bool {
        self.state.lock().2 == LinkPhase::Ready
    }

    fn arm(&self, enable: bool) -> bool {
        self.arm_requests.lock().push(enable);
        if self.confirm_arm {
            self.state.lock().0 = enable;
        }
        self.confirm_arm
    }

    fn set_channel(&self, channel: u8, pwm: u16) -> Result<(), LinkError> {
        if !(1..=CHANNEL_COUNT as u8).contains(&channel) {
            return Err(LinkError::InvalidChannel(channel));
        }
        self.attempts.lock().push((channel, pwm));
        let mut state = self.state.lock();
        state.1[channel as usize - 1] = pwm;
        if state.2 != LinkPhase::Ready {
            return Err(LinkError::NotReady);
        }
        if self.failing.contains(&channel) {
            return Err(LinkError::Io(io::Error::other(format!("ch{} write failed", channel))));
        }
        self.sends.lock().push((channel, pwm));
        Ok(())
    }

    fn snapshot(&self) -> LinkSnapshot {
        let state = self.state.lock();
        LinkSnapshot {
            phase: state.2,
            connected: state.2 == LinkPhase::Ready,
            armed: state.0,
            shadow: state.1,
        }
    }

    fn close(&self) {
        self.state.lock().2 = LinkPhase::Closed;
    }
}

/// Loopback settings with an ephemeral telemetry port.
pub fn test_settings(log_dir: &Path) -> Settings {
    Settings {
        telemetry_bind: "127.0.0.1".into(),
        udp_port: 0,
        log_dir: log_dir.to_path_buf(),
        refresh_interval_ms: 10,
        ..Settings::default()
    }
}

pub fn le_payload(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn send_datagram(to: SocketAddr, payload: &[u8]) {
    let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
    tx.send_to(payload, to).unwrap();
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

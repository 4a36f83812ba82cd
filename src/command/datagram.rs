//! datagram.rs
//! Best-effort command link: one 3-byte UDP datagram per command.
//!
//! Wire format: `[channel][pwm lo][pwm hi]`, PWM little-endian.
//! No handshake, no acknowledgement. Send failures are logged and counted,
//! never surfaced to the caller.

use parking_lot::Mutex;
use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::atomic::{AtomicU64, Ordering},
};
use log::{debug, info, warn};

use crate::command::link::{CommandLink, LinkPhase, LinkSnapshot, LinkState, clamp_pwm};
use crate::error::LinkError;

pub struct DatagramLink {
    socket: UdpSocket,
    target: SocketAddr,
    state: Mutex<LinkState>,
    sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Encodes one command datagram.
pub fn encode_command(channel: u8, pwm: u16) -> [u8; 3] {
    let [lo, hi] = pwm.to_le_bytes();
    [channel, lo, hi]
}

impl DatagramLink {
    pub fn new(target: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        info!("[Link] datagram commands -> {}", target);

        let mut state = LinkState::new();
        state.phase = LinkPhase::Ready;
        Ok(Self {
            socket,
            target,
            state: Mutex::new(state),
            sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }
}

impl CommandLink for DatagramLink {
    /// Nothing to verify; always reports connected.
    fn is_connected(&self) -> bool {
        true
    }

    fn arm(&self, enable: bool) -> bool {
        debug!("[Link] arm({}) ignored on datagram transport", enable);
        true
    }

    fn set_channel(&self, channel: u8, pwm: u16) -> Result<(), LinkError> {
        let pwm = clamp_pwm(pwm);
        self.state.lock().set_shadow(channel, pwm)?;

        match self.socket.send_to(&encode_command(channel, pwm), self.target) {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                warn!("[Link] send to {} failed: {}", self.target, e);
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> LinkSnapshot {
        let s = self.state.lock();
        LinkSnapshot {
            phase: s.phase,
            connected: true,
            armed: s.armed,
            shadow: s.shadow,
        }
    }

    fn close(&self) {
        self.state.lock().phase = LinkPhase::Closed;
    }
}

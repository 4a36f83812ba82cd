//! link.rs
//! Common surface of the actuator command links and the state they share.
//!
//! Two transports implement [`CommandLink`]:
//! - [`VerifiedLink`](crate::command::verified::VerifiedLink): handshake, parameter
//!   negotiation, mode change and armed-state verification over an acknowledged link
//! - [`DatagramLink`](crate::command::datagram::DatagramLink): best-effort UDP, no handshake
//!
//! Liveness, armed flag and the per-channel shadow cache live in one
//! [`LinkState`] behind one lock per link.

use std::time::{Duration, Instant};

use crate::error::LinkError;

/// Controllable output channels (motors M1..M8).
pub const CHANNEL_COUNT: usize = 8;
/// Neutral / minimum PWM pulse in microseconds.
pub const PWM_NEUTRAL: u16 = 1000;
/// Full-throttle PWM pulse in microseconds.
pub const PWM_MAX: u16 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    HandshakeInProgress,
    Ready,
    Faulted,
    Closed,
}

#[derive(Debug, Clone)]
pub struct LinkState {
    pub phase: LinkPhase,
    pub last_heartbeat: Option<Instant>,
    pub armed: bool,
    /// Last custom mode reported by the vehicle.
    pub mode: Option<u32>,
    pub shadow: [u16; CHANNEL_COUNT],
}

impl LinkState {
    pub fn new() -> Self {
        Self {
            phase: LinkPhase::Disconnected,
            last_heartbeat: None,
            armed: false,
            mode: None,
            shadow: [PWM_NEUTRAL; CHANNEL_COUNT],
        }
    }

    /// True if a heartbeat was seen within `window`.
    pub fn is_alive(&self, window: Duration) -> bool {
        self.last_heartbeat.is_some_and(|t| t.elapsed() < window)
    }

    pub fn is_ready(&self) -> bool {
        self.phase == LinkPhase::Ready
    }

    pub fn set_shadow(&mut self, channel: u8, pwm: u16) -> Result<(), LinkError> {
        let idx = channel_index(channel)?;
        self.shadow[idx] = pwm;
        Ok(())
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the link state handed to status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub phase: LinkPhase,
    pub connected: bool,
    pub armed: bool,
    pub shadow: [u16; CHANNEL_COUNT],
}

/// Maps 1-based channel numbers to shadow-cache slots.
pub fn channel_index(channel: u8) -> Result<usize, LinkError> {
    if (1..=CHANNEL_COUNT as u8).contains(&channel) {
        Ok(channel as usize - 1)
    } else {
        Err(LinkError::InvalidChannel(channel))
    }
}

pub fn clamp_pwm(pwm: u16) -> u16 {
    pwm.clamp(PWM_NEUTRAL, PWM_MAX)
}

/// Actuator command channel used by the coordinator and the refresh loop.
pub trait CommandLink: Send + Sync {
    /// Liveness as seen by this transport.
    fn is_connected(&self) -> bool;

    /// Arms (`true`) or disarms and reports whether the vehicle confirmed it.
    /// Never errors; a timeout yields `false`.
    fn arm(&self, enable: bool) -> bool;

    /// Updates the shadow cache for `channel` and sends the value.
    /// Fire-and-forget: no acknowledgement is awaited.
    fn set_channel(&self, channel: u8, pwm: u16) -> Result<(), LinkError>;

    fn snapshot(&self) -> LinkSnapshot;

    /// Stops background work; later commands report [`LinkError::NotReady`] or no-op.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_one_based() {
        assert_eq!(channel_index(1).unwrap(), 0);
        assert_eq!(channel_index(8).unwrap(), 7);
        assert!(matches!(channel_index(0), Err(LinkError::InvalidChannel(0))));
        assert!(matches!(channel_index(9), Err(LinkError::InvalidChannel(9))));
    }

    #[test]
    fn new_state_is_neutral_and_not_alive() {
        let state = LinkState::new();
        assert_eq!(state.phase, LinkPhase::Disconnected);
        assert_eq!(state.shadow, [PWM_NEUTRAL; CHANNEL_COUNT]);
        assert!(!state.is_alive(Duration::from_secs(3)));
    }

    #[test]
    fn liveness_window_expires() {
        let mut state = LinkState::new();
        state.last_heartbeat = Some(Instant::now());
        assert!(state.is_alive(Duration::from_secs(3)));

        state.last_heartbeat = Instant::now().checked_sub(Duration::from_secs(5));
        assert!(!state.is_alive(Duration::from_secs(3)));
    }

    #[test]
    fn pwm_clamps_to_valid_range() {
        assert_eq!(clamp_pwm(0), PWM_NEUTRAL);
        assert_eq!(clamp_pwm(1500), 1500);
        assert_eq!(clamp_pwm(u16::MAX), PWM_MAX);
    }
}

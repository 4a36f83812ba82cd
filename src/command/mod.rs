// Command side: actuator links and the throttle refresh loop.

pub mod datagram;
pub mod link;
pub mod mavlink;
pub mod refresh;
pub mod serial;
pub mod verified;

pub use datagram::DatagramLink;
pub use link::{CHANNEL_COUNT, CommandLink, LinkPhase, LinkSnapshot, PWM_MAX, PWM_NEUTRAL};
pub use refresh::{RefreshLoop, SharedThrottle, ThrottleState};
pub use serial::{MavlinkLink, open_serial};
pub use verified::{NegotiationReport, VerifiedLink};

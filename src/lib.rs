//! # Motor Bench
//! Host-side control for a motor/propeller test bench.
//!
//! - **Telemetry:** fixed-layout little-endian float frames over UDP, decoded and
//!   held in a freshest-wins slot ([`telemetry`]).
//! - **Commands:** per-motor PWM over either a verified autopilot link
//!   (handshake, parameter negotiation, armed-state checks) or best-effort UDP
//!   datagrams ([`command`]).
//! - **Recording:** asynchronous CSV logging of pulled frames ([`utils::logger`]).
//! - **Coordination:** one [`Coordinator`] per session ties these together.

pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod telemetry;
pub mod utils;

pub use config::Settings;
pub use coordinator::Coordinator;
pub use error::BenchError;

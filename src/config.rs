//! config.rs
//! Connection settings for one bench session, persisted as TOML.
//!
//! The coordinator only ever reads a `Settings`; loading and saving belong to
//! whoever boots the process.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};
use log::warn;

use crate::error::{BenchError, ConfigError};
use crate::telemetry::FrameSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Acknowledged autopilot link over serial.
    #[default]
    Verified,
    /// Fire-and-forget UDP to the bench board.
    Datagram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub value: f32,
}

impl ParamSpec {
    pub fn new(name: &str, value: f32) -> Self {
        Self { name: name.to_string(), value }
    }
}

/// Every bounded wait of the command link, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkTimeouts {
    pub heartbeat_ms: u64,
    pub param_echo_ms: u64,
    pub param_read_ms: u64,
    pub mode_ms: u64,
    pub arm_ms: u64,
    pub liveness_ms: u64,
    pub monitor_interval_ms: u64,
    pub serial_read_ms: u64,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            heartbeat_ms: 10_000,
            param_echo_ms: 3_000,
            param_read_ms: 2_000,
            mode_ms: 5_000,
            arm_ms: 6_000,
            liveness_ms: 3_000,
            monitor_interval_ms: 200,
            serial_read_ms: 50,
        }
    }
}

impl LinkTimeouts {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
    pub fn param_echo(&self) -> Duration {
        Duration::from_millis(self.param_echo_ms)
    }
    pub fn param_read(&self) -> Duration {
        Duration::from_millis(self.param_read_ms)
    }
    pub fn mode(&self) -> Duration {
        Duration::from_millis(self.mode_ms)
    }
    pub fn arm(&self) -> Duration {
        Duration::from_millis(self.arm_ms)
    }
    pub fn liveness(&self) -> Duration {
        Duration::from_millis(self.liveness_ms)
    }
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
    pub fn serial_read(&self) -> Duration {
        Duration::from_millis(self.serial_read_ms)
    }
}

/// Handshake parameters for the verified link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub mode_name: String,
    pub custom_mode: u32,
    pub param_retries: u32,
    pub param_tolerance: f32,
    pub params: Vec<ParamSpec>,
    pub timeouts: LinkTimeouts,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode_name: "MANUAL".to_string(),
            custom_mode: 0,
            param_retries: 3,
            param_tolerance: 1e-3,
            params: default_params(),
            timeouts: LinkTimeouts::default(),
        }
    }
}

/// Autopilot parameters that let a bare bench motor spin without flight checks.
pub fn default_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("ARMING_CHECK", 0.0),
        ParamSpec::new("BRD_SAFETY_DEFLT", 0.0),
        ParamSpec::new("ARSPD_USE", 0.0),
        ParamSpec::new("ARMING_REQUIRE", 0.0),
        ParamSpec::new("COMPASS_USE", 0.0),
        ParamSpec::new("AHRS_GPS_USE", 0.0),
        ParamSpec::new("RCMAP_THROTTLE", 0.0),
        ParamSpec::new("RC_OPTIONS", 1.0),
        ParamSpec::new("EK3_Enable", 0.0),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub com_port: String,
    pub baud: u32,
    /// Local address the telemetry socket binds to.
    pub telemetry_bind: String,
    pub udp_port: u16,
    pub transport: TransportKind,
    /// Bench board address for the datagram transport.
    pub command_addr: String,
    pub schema: FrameSchema,
    pub log_dir: PathBuf,
    pub refresh_interval_ms: u64,
    pub link: LinkConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            com_port: String::new(),
            baud: 115_200,
            telemetry_bind: "0.0.0.0".to_string(),
            udp_port: 9000,
            transport: TransportKind::Verified,
            command_addr: "192.168.4.1:9001".to_string(),
            schema: FrameSchema::Bench14,
            log_dir: PathBuf::from("logs"),
            refresh_interval_ms: 100,
            link: LinkConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Falls back to defaults when the file is missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(s) => s,
            Err(e) => {
                warn!("[Config] ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn telemetry_addr(&self) -> Result<SocketAddr, BenchError> {
        let ip: IpAddr = self
            .telemetry_bind
            .parse()
            .map_err(|_| BenchError::Address(self.telemetry_bind.clone()))?;
        Ok(SocketAddr::new(ip, self.udp_port))
    }

    pub fn command_target(&self) -> Result<SocketAddr, BenchError> {
        self.command_addr
            .parse()
            .map_err(|_| BenchError::Address(self.command_addr.clone()))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bench_wiring() {
        let s = Settings::default();
        assert_eq!(s.baud, 115_200);
        assert_eq!(s.udp_port, 9000);
        assert_eq!(s.link.params.len(), 9);
        assert_eq!(s.link.param_retries, 3);
        assert_eq!(s.link.timeouts.heartbeat(), Duration::from_secs(10));
        assert_eq!(s.telemetry_addr().unwrap(), "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let s: Settings = toml::from_str(
            r#"
            com_port = "/dev/ttyACM0"
            transport = "datagram"
            schema = "legacy15"

            [link.timeouts]
            arm_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(s.com_port, "/dev/ttyACM0");
        assert_eq!(s.transport, TransportKind::Datagram);
        assert_eq!(s.schema, FrameSchema::Legacy15);
        assert_eq!(s.link.timeouts.arm_ms, 1500);
        assert_eq!(s.link.timeouts.mode_ms, 5_000);
        assert_eq!(s.link.mode_name, "MANUAL");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");

        let mut s = Settings::default();
        s.com_port = "COM9".into();
        s.link.params = vec![ParamSpec::new("RC_OPTIONS", 1.0)];
        s.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), s);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "baud = \"fast\"").unwrap();

        assert_eq!(Settings::load_or_default(&path), Settings::default());
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn bad_addresses_are_reported() {
        let s = Settings {
            telemetry_bind: "not-an-ip".into(),
            command_addr: "nowhere".into(),
            ..Settings::default()
        };
        assert!(matches!(s.telemetry_addr(), Err(BenchError::Address(_))));
        assert!(matches!(s.command_target(), Err(BenchError::Address(_))));
    }
}

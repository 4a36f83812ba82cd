//! serial.rs
//! [`MessageLink`] over any byte stream, typically the autopilot's USB/UART port.
//!
//! The stream is expected to carry its own short read timeout (serial ports
//! do); `recv` keeps reading until a known frame parses or its own deadline
//! passes, checked after every read so a busy stream cannot hold it.
//!
//! Outbound frames use v1 until the vehicle's heartbeat arrives in v2.

use std::{
    io::{ErrorKind, Read, Write},
    time::{Duration, Instant},
};
use log::{debug, info};
use serialport::SerialPort;

use crate::command::mavlink::{
    FrameParser, GCS_COMPONENT_ID, GCS_SYSTEM_ID, Inbound, MSG_HEARTBEAT, MessageLink, Outbound,
    WireVersion, encode_frame, encode_frame_v2,
};
use crate::error::LinkError;

const READ_CHUNK: usize = 256;

pub struct MavlinkLink<T> {
    io: T,
    parser: FrameParser,
    seq: u8,
    /// (system, component) of the vehicle, learned from its heartbeats.
    target: (u8, u8),
    version: WireVersion,
}

impl<T: Read + Write + Send> MavlinkLink<T> {
    pub fn new(io: T) -> Self {
        Self {
            io,
            parser: FrameParser::new(),
            seq: 0,
            target: (1, 1),
            version: WireVersion::V1,
        }
    }

    pub fn target(&self) -> (u8, u8) {
        self.target
    }

    pub fn version(&self) -> WireVersion {
        self.version
    }

    pub fn into_inner(self) -> T {
        self.io
    }

    fn next_inbound(&mut self) -> Option<Inbound> {
        while let Some(frame) = self.parser.next_frame() {
            if frame.msgid == MSG_HEARTBEAT {
                self.target = (frame.sysid, frame.compid);
                if frame.version != self.version {
                    debug!("[Link] vehicle speaks {:?}", frame.version);
                    self.version = frame.version;
                }
            }
            if let Some(msg) = Inbound::from_frame(&frame) {
                return Some(msg);
            }
        }
        None
    }

    /// One read from the stream; an idle read is not an error.
    fn fill(&mut self) -> Result<(), LinkError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.io.read(&mut chunk) {
            Ok(n) => {
                self.parser.feed(&chunk[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(())
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

impl<T: Read + Write + Send> MessageLink for MavlinkLink<T> {
    fn send(&mut self, msg: &Outbound) -> Result<(), LinkError> {
        let (msgid, payload) = msg.to_payload(self.target);
        let encode = match self.version {
            WireVersion::V1 => encode_frame,
            WireVersion::V2 => encode_frame_v2,
        };
        let Some(bytes) = encode(self.seq, GCS_SYSTEM_ID, GCS_COMPONENT_ID, msgid, &payload) else {
            return Err(LinkError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("message id {} not encodable", msgid),
            )));
        };
        self.seq = self.seq.wrapping_add(1);
        self.io.write_all(&bytes)?;
        self.io.flush()?;
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Inbound>, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.next_inbound() {
                return Ok(Some(msg));
            }
            self.fill()?;
            if Instant::now() >= deadline {
                return Ok(self.next_inbound());
            }
        }
    }
}

/// Opens the autopilot serial port and wraps it for the verified link.
pub fn open_serial(
    path: &str,
    baud: u32,
    read_timeout: Duration,
) -> Result<MavlinkLink<Box<dyn SerialPort>>, LinkError> {
    info!("[Link] opening {} @ {} baud", path, baud);
    let port = serialport::new(path, baud).timeout(read_timeout).open()?;
    debug!("[Link] {} open", path);
    Ok(MavlinkLink::new(port))
}

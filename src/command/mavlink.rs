//! mavlink.rs
//! Wire codec for the verified command transport (MAVLink v1 and v2 framing).
//!
//! ```text
//! v1: 0xFE │ len │ seq │ sysid │ compid │ msgid │ payload[len] │ crc16 LE
//! v2: 0xFD │ len │ incompat │ compat │ seq │ sysid │ compid │ msgid (3 B LE)
//!          │ payload[len] │ crc16 LE │ signature (13 B, incompat & 0x01)
//! ```
//!
//! crc16 is CRC-16/MCRF4XX over everything after the start byte up to the
//! payload end, followed by the message's CRC_EXTRA seed byte. v2 senders
//! drop trailing zero bytes from the payload; the parser zero-extends them
//! back. Signatures are skipped, not verified. Only the handful of messages
//! the bench needs are modelled; anything else is skipped by the parser.

use std::time::Duration;

use crate::error::LinkError;

pub const STX: u8 = 0xFE;
pub const STX_V2: u8 = 0xFD;
const HEADER_LEN: usize = 6;
const HEADER_LEN_V2: usize = 10;
const CRC_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

pub const MSG_HEARTBEAT: u32 = 0;
pub const MSG_SET_MODE: u32 = 11;
pub const MSG_PARAM_REQUEST_READ: u32 = 20;
pub const MSG_PARAM_VALUE: u32 = 22;
pub const MSG_PARAM_SET: u32 = 23;
pub const MSG_COMMAND_LONG: u32 = 76;

pub const CMD_DO_SET_SERVO: u16 = 183;
pub const CMD_COMPONENT_ARM_DISARM: u16 = 400;

pub const MODE_FLAG_CUSTOM_MODE_ENABLED: u8 = 0x01;
pub const MODE_FLAG_SAFETY_ARMED: u8 = 0x80;
const PARAM_TYPE_REAL32: u8 = 9;
const PARAM_ID_LEN: usize = 16;

/// Ground-station identity used on every outbound frame.
pub const GCS_SYSTEM_ID: u8 = 255;
pub const GCS_COMPONENT_ID: u8 = 190;

/// CRC_EXTRA seed and full (untruncated) payload length per known message.
fn message_spec(msgid: u32) -> Option<(u8, usize)> {
    match msgid {
        MSG_HEARTBEAT => Some((50, 9)),
        MSG_SET_MODE => Some((89, 6)),
        MSG_PARAM_REQUEST_READ => Some((214, 20)),
        MSG_PARAM_VALUE => Some((220, 25)),
        MSG_PARAM_SET => Some((168, 23)),
        MSG_COMMAND_LONG => Some((152, 33)),
        _ => None,
    }
}

/// Framing generation of a frame on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireVersion {
    #[default]
    V1,
    V2,
}

/// CRC-16/MCRF4XX accumulate step.
fn crc_accumulate(byte: u8, crc: u16) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = tmp as u16;
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0xFFFF, |crc, &b| crc_accumulate(b, crc))
}

fn frame_crc(body: &[u8], extra: u8) -> u16 {
    crc_accumulate(extra, crc16(body))
}

/// Heartbeat fields the bench cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub base_mode: u8,
    pub system_status: u8,
}

impl Heartbeat {
    pub fn is_armed(&self) -> bool {
        self.base_mode & MODE_FLAG_SAFETY_ARMED != 0
    }
}

/// Messages received from the vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Heartbeat(Heartbeat),
    ParamValue { name: String, value: f32 },
}

/// Requests sent to the vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    ParamSet { name: String, value: f32 },
    ParamRead { name: String },
    SetMode { custom_mode: u32 },
    ArmDisarm { arm: bool },
    SetServo { channel: u8, pwm: u16 },
}

/// Message-level transport underneath the verified link.
pub trait MessageLink: Send {
    fn send(&mut self, msg: &Outbound) -> Result<(), LinkError>;

    /// Waits up to `timeout` for the next recognised message.
    /// A zero timeout reads the underlying stream at most once.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Inbound>, LinkError>;
}

/// One checksum-valid frame. v2 payloads are already zero-extended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub version: WireVersion,
    pub seq: u8,
    pub sysid: u8,
    pub compid: u8,
    pub msgid: u32,
    pub payload: Vec<u8>,
}

/// Serializes a v1 frame; `None` for message ids this codec has no CRC seed for.
pub fn encode_frame(seq: u8, sysid: u8, compid: u8, msgid: u32, payload: &[u8]) -> Option<Vec<u8>> {
    let (extra, _) = message_spec(msgid)?;
    let id = u8::try_from(msgid).ok()?;
    let len = u8::try_from(payload.len()).ok()?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    out.extend_from_slice(&[STX, len, seq, sysid, compid, id]);
    out.extend_from_slice(payload);
    let crc = frame_crc(&out[1..], extra);
    out.extend_from_slice(&crc.to_le_bytes());
    Some(out)
}

/// Serializes an unsigned v2 frame with trailing payload zeros dropped.
pub fn encode_frame_v2(seq: u8, sysid: u8, compid: u8, msgid: u32, payload: &[u8]) -> Option<Vec<u8>> {
    let (extra, _) = message_spec(msgid)?;
    // at least one payload byte stays on the wire
    let keep = payload.iter().rposition(|&b| b != 0).map_or(payload.len().min(1), |i| i + 1);
    let payload = &payload[..keep];
    let len = u8::try_from(payload.len()).ok()?;
    let id = msgid.to_le_bytes();

    let mut out = Vec::with_capacity(HEADER_LEN_V2 + payload.len() + CRC_LEN);
    out.extend_from_slice(&[STX_V2, len, 0, 0, seq, sysid, compid, id[0], id[1], id[2]]);
    out.extend_from_slice(payload);
    let crc = frame_crc(&out[1..], extra);
    out.extend_from_slice(&crc.to_le_bytes());
    Some(out)
}

fn put_param_id(out: &mut Vec<u8>, name: &str) {
    let mut id = [0u8; PARAM_ID_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(PARAM_ID_LEN);
    id[..n].copy_from_slice(&bytes[..n]);
    out.extend_from_slice(&id);
}

fn read_param_id(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn command_long(target: (u8, u8), command: u16, params: [f32; 7]) -> Vec<u8> {
    let mut p = Vec::with_capacity(33);
    for v in params {
        p.extend_from_slice(&v.to_le_bytes());
    }
    p.extend_from_slice(&command.to_le_bytes());
    p.extend_from_slice(&[target.0, target.1, 0]);
    p
}

impl Outbound {
    /// Message id and payload addressed to `target` (system, component).
    pub fn to_payload(&self, target: (u8, u8)) -> (u32, Vec<u8>) {
        match self {
            Outbound::ParamSet { name, value } => {
                let mut p = Vec::with_capacity(23);
                p.extend_from_slice(&value.to_le_bytes());
                p.extend_from_slice(&[target.0, target.1]);
                put_param_id(&mut p, name);
                p.push(PARAM_TYPE_REAL32);
                (MSG_PARAM_SET, p)
            }
            Outbound::ParamRead { name } => {
                let mut p = Vec::with_capacity(20);
                p.extend_from_slice(&(-1i16).to_le_bytes());
                p.extend_from_slice(&[target.0, target.1]);
                put_param_id(&mut p, name);
                (MSG_PARAM_REQUEST_READ, p)
            }
            Outbound::SetMode { custom_mode } => {
                let mut p = Vec::with_capacity(6);
                p.extend_from_slice(&custom_mode.to_le_bytes());
                p.extend_from_slice(&[target.0, MODE_FLAG_CUSTOM_MODE_ENABLED]);
                (MSG_SET_MODE, p)
            }
            Outbound::ArmDisarm { arm } => {
                let p1 = if *arm { 1.0 } else { 0.0 };
                let p = command_long(target, CMD_COMPONENT_ARM_DISARM, [p1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
                (MSG_COMMAND_LONG, p)
            }
            Outbound::SetServo { channel, pwm } => {
                let params = [*channel as f32, *pwm as f32, 0.0, 0.0, 0.0, 0.0, 0.0];
                (MSG_COMMAND_LONG, command_long(target, CMD_DO_SET_SERVO, params))
            }
        }
    }
}

fn f32_at(p: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([p[at], p[at + 1], p[at + 2], p[at + 3]])
}

impl Inbound {
    /// Decodes a frame into a known inbound message; `None` for anything else.
    pub fn from_frame(frame: &RawFrame) -> Option<Self> {
        let p = &frame.payload;
        match frame.msgid {
            MSG_HEARTBEAT if p.len() >= 9 => Some(Inbound::Heartbeat(Heartbeat {
                custom_mode: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                base_mode: p[6],
                system_status: p[7],
            })),
            MSG_PARAM_VALUE if p.len() >= 25 => Some(Inbound::ParamValue {
                value: f32_at(p, 0),
                name: read_param_id(&p[8..8 + PARAM_ID_LEN]),
            }),
            _ => None,
        }
    }
}

/// Vehicle-side payloads, used by simulators and tests.
pub fn heartbeat_payload(hb: &Heartbeat) -> Vec<u8> {
    let mut p = Vec::with_capacity(9);
    p.extend_from_slice(&hb.custom_mode.to_le_bytes());
    // type, autopilot
    p.extend_from_slice(&[1, 3]);
    p.extend_from_slice(&[hb.base_mode, hb.system_status, 3]);
    p
}

pub fn param_value_payload(name: &str, value: f32) -> Vec<u8> {
    let mut p = Vec::with_capacity(25);
    p.extend_from_slice(&value.to_le_bytes());
    p.extend_from_slice(&1u16.to_le_bytes());
    p.extend_from_slice(&0u16.to_le_bytes());
    put_param_id(&mut p, name);
    p.push(PARAM_TYPE_REAL32);
    p
}

/// Streaming frame parser; tolerates partial reads and line noise.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    crc_errors: u64,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Frames rejected for a bad checksum so far.
    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }

    /// Next complete, checksum-valid frame of a known id, if buffered.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        loop {
            match self.buf.iter().position(|&b| b == STX || b == STX_V2) {
                Some(0) => {}
                Some(start) => {
                    self.buf.drain(..start);
                }
                None => {
                    self.buf.clear();
                    return None;
                }
            }

            let version = if self.buf[0] == STX_V2 { WireVersion::V2 } else { WireVersion::V1 };
            let header_len = match version {
                WireVersion::V1 => HEADER_LEN,
                WireVersion::V2 => HEADER_LEN_V2,
            };
            if self.buf.len() < header_len {
                return None;
            }
            let len = self.buf[1] as usize;
            let incompat = match version {
                WireVersion::V1 => 0,
                WireVersion::V2 => self.buf[2],
            };
            let signature = if incompat & INCOMPAT_FLAG_SIGNED != 0 { SIGNATURE_LEN } else { 0 };
            let crc_at = header_len + len;
            let total = crc_at + CRC_LEN + signature;
            if self.buf.len() < total {
                return None;
            }

            let (seq, sysid, compid, msgid) = match version {
                WireVersion::V1 => (self.buf[2], self.buf[3], self.buf[4], u32::from(self.buf[5])),
                WireVersion::V2 => (
                    self.buf[4],
                    self.buf[5],
                    self.buf[6],
                    u32::from_le_bytes([self.buf[7], self.buf[8], self.buf[9], 0]),
                ),
            };
            let spec = message_spec(msgid).filter(|_| incompat & !INCOMPAT_FLAG_SIGNED == 0);
            let Some((extra, full_len)) = spec else {
                // unknown message or feature: no CRC seed to check, skip it whole
                self.buf.drain(..total);
                continue;
            };

            let wire_crc = u16::from_le_bytes([self.buf[crc_at], self.buf[crc_at + 1]]);
            if frame_crc(&self.buf[1..crc_at], extra) != wire_crc {
                self.crc_errors += 1;
                // resync on the next start byte
                self.buf.drain(..1);
                continue;
            }

            let mut payload = self.buf[header_len..crc_at].to_vec();
            if payload.len() < full_len {
                payload.resize(full_len, 0);
            }
            let frame = RawFrame { version, seq, sysid, compid, msgid, payload };
            self.buf.drain(..total);
            return Some(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(bytes: &[u8]) -> Vec<RawFrame> {
        let mut parser = FrameParser::new();
        parser.feed(bytes);
        std::iter::from_fn(|| parser.next_frame()).collect()
    }

    #[test]
    fn crc_matches_mcrf4xx_check_value() {
        assert_eq!(crc16(b"123456789"), 0x6F91);
    }

    #[test]
    fn param_set_layout() {
        let msg = Outbound::ParamSet { name: "RC_OPTIONS".into(), value: 1.0 };
        let (msgid, p) = msg.to_payload((1, 1));
        assert_eq!(msgid, MSG_PARAM_SET);
        assert_eq!(p.len(), 23);
        assert_eq!(f32_at(&p, 0), 1.0);
        assert_eq!(&p[4..6], &[1, 1]);
        assert_eq!(read_param_id(&p[6..22]), "RC_OPTIONS");
        assert_eq!(p[22], PARAM_TYPE_REAL32);
    }

    #[test]
    fn set_servo_is_command_long_183() {
        let (msgid, p) = Outbound::SetServo { channel: 3, pwm: 1500 }.to_payload((7, 1));
        assert_eq!(msgid, MSG_COMMAND_LONG);
        assert_eq!(p.len(), 33);
        assert_eq!(f32_at(&p, 0), 3.0);
        assert_eq!(f32_at(&p, 4), 1500.0);
        assert_eq!(u16::from_le_bytes([p[28], p[29]]), CMD_DO_SET_SERVO);
        assert_eq!(&p[30..33], &[7, 1, 0]);
    }

    #[test]
    fn arm_disarm_param1() {
        let (_, arm) = Outbound::ArmDisarm { arm: true }.to_payload((1, 1));
        let (_, disarm) = Outbound::ArmDisarm { arm: false }.to_payload((1, 1));
        assert_eq!(f32_at(&arm, 0), 1.0);
        assert_eq!(f32_at(&disarm, 0), 0.0);
        assert_eq!(u16::from_le_bytes([arm[28], arm[29]]), CMD_COMPONENT_ARM_DISARM);
    }

    #[test]
    fn heartbeat_frame_decodes_armed_flag() {
        let hb = Heartbeat {
            custom_mode: 0,
            base_mode: MODE_FLAG_SAFETY_ARMED | MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: 4,
        };
        let bytes = encode_frame(9, 1, 1, MSG_HEARTBEAT, &heartbeat_payload(&hb)).unwrap();
        let frames = parse_all(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sysid, 1);

        match Inbound::from_frame(&frames[0]) {
            Some(Inbound::Heartbeat(decoded)) => {
                assert_eq!(decoded, hb);
                assert!(decoded.is_armed());
            }
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn param_value_strips_nul_padding() {
        let bytes = encode_frame(0, 1, 1, MSG_PARAM_VALUE, &param_value_payload("EK3_Enable", 0.0)).unwrap();
        let frame = &parse_all(&bytes)[0];
        assert_eq!(
            Inbound::from_frame(frame),
            Some(Inbound::ParamValue { name: "EK3_Enable".into(), value: 0.0 })
        );
    }

    #[test]
    fn parser_resyncs_after_noise_and_bad_crc() {
        let hb = Heartbeat { custom_mode: 0, base_mode: 0, system_status: 3 };
        let good = encode_frame(1, 1, 1, MSG_HEARTBEAT, &heartbeat_payload(&hb)).unwrap();
        let mut corrupt = good.clone();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend_from_slice(&corrupt);
        stream.extend_from_slice(&good);

        let mut parser = FrameParser::new();
        parser.feed(&stream);
        assert!(parser.next_frame().is_some());
        assert!(parser.next_frame().is_none());
        assert_eq!(parser.crc_errors(), 1);
    }

    #[test]
    fn parser_handles_split_reads() {
        let (msgid, p) = Outbound::SetMode { custom_mode: 4 }.to_payload((1, 1));
        let bytes = encode_frame(3, GCS_SYSTEM_ID, GCS_COMPONENT_ID, msgid, &p).unwrap();

        let mut parser = FrameParser::new();
        let (a, b) = bytes.split_at(4);
        parser.feed(a);
        assert!(parser.next_frame().is_none());
        parser.feed(b);
        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.msgid, MSG_SET_MODE);
        assert_eq!(frame.payload, p);
    }

    #[test]
    fn unknown_message_ids_are_not_encodable() {
        assert!(encode_frame(0, 1, 1, 200, &[]).is_none());
        assert!(encode_frame_v2(0, 1, 1, 200, &[1]).is_none());
    }

    #[test]
    fn v2_heartbeat_decodes() {
        let hb = Heartbeat { custom_mode: 4, base_mode: MODE_FLAG_SAFETY_ARMED, system_status: 4 };
        let bytes = encode_frame_v2(7, 1, 1, MSG_HEARTBEAT, &heartbeat_payload(&hb)).unwrap();
        assert_eq!(&bytes[..10], &[STX_V2, 9, 0, 0, 7, 1, 1, 0, 0, 0]);

        let frames = parse_all(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].version, WireVersion::V2);
        assert_eq!(frames[0].seq, 7);
        assert_eq!(Inbound::from_frame(&frames[0]), Some(Inbound::Heartbeat(hb)));
    }

    #[test]
    fn v2_truncated_param_value_is_zero_extended() {
        let mut payload = param_value_payload("RC_OPTIONS", 0.0);
        // param_type 0 leaves the whole NUL-padded tail truncatable
        payload[24] = 0;
        let bytes = encode_frame_v2(0, 1, 1, MSG_PARAM_VALUE, &payload).unwrap();
        assert_eq!(bytes[1] as usize, 8 + "RC_OPTIONS".len());

        let frame = &parse_all(&bytes)[0];
        assert_eq!(frame.payload.len(), 25);
        assert_eq!(
            Inbound::from_frame(frame),
            Some(Inbound::ParamValue { name: "RC_OPTIONS".into(), value: 0.0 })
        );
    }

    #[test]
    fn v2_signature_is_skipped() {
        let hb = Heartbeat { custom_mode: 0, base_mode: 0, system_status: 3 };
        let mut signed = encode_frame_v2(0, 1, 1, MSG_HEARTBEAT, &heartbeat_payload(&hb)).unwrap();
        signed[2] = INCOMPAT_FLAG_SIGNED;
        // incompat flags are CRC-covered
        let crc_at = signed.len() - CRC_LEN;
        let crc = frame_crc(&signed[1..crc_at], 50);
        signed[crc_at..].copy_from_slice(&crc.to_le_bytes());
        signed.extend_from_slice(&[STX_V2; SIGNATURE_LEN]);

        let mut stream = signed;
        stream.extend(encode_frame_v2(1, 1, 1, MSG_PARAM_VALUE, &param_value_payload("ARSPD_USE", 0.0)).unwrap());

        let frames = parse_all(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].msgid, MSG_HEARTBEAT);
        assert_eq!(frames[1].msgid, MSG_PARAM_VALUE);
    }

    #[test]
    fn mixed_v1_and_v2_stream() {
        let hb = Heartbeat { custom_mode: 0, base_mode: 0, system_status: 3 };
        let mut stream = encode_frame(0, 1, 1, MSG_HEARTBEAT, &heartbeat_payload(&hb)).unwrap();
        // unknown v2 message with a 24-bit id
        stream.extend_from_slice(&[STX_V2, 2, 0, 0, 1, 1, 1, 0x10, 0x27, 0x01, 0xAA, 0xBB, 0x00, 0x00]);
        stream.extend(encode_frame_v2(2, 1, 1, MSG_HEARTBEAT, &heartbeat_payload(&hb)).unwrap());

        let versions: Vec<WireVersion> = parse_all(&stream).iter().map(|f| f.version).collect();
        assert_eq!(versions, vec![WireVersion::V1, WireVersion::V2]);
    }
}

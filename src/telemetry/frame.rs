//! frame.rs
//! Fixed-layout binary telemetry record sent by the bench's STM32 board.
//!
//! Wire layout: a little-endian IEEE-754 float32 array, one value per field,
//! in schema order. No range validation is applied; NaN and Inf pass through.
//!
//! Two schemas exist on deployed boards and neither is derivable from the
//! other, so the schema is always chosen explicitly by configuration.

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

const BENCH14_FIELDS: &[&str] = &[
    "time_stm32",
    "time_px4",
    "time_gps",
    "load1",
    "load2",
    "load3",
    "load4",
    "load5",
    "load6",
    "torque",
    "voltage",
    "current",
    "rpm",
    "temperature",
];

const LEGACY15_FIELDS: &[&str] = &[
    "time_stm32",
    "time_px4",
    "time_gps",
    "load1",
    "load2",
    "load3",
    "load4",
    "load5",
    "load6",
    "thrust",
    "torque",
    "voltage",
    "current",
    "rpm",
    "temperature",
];

const LOAD_CELLS: &[&str] = &["load1", "load2", "load3", "load4", "load5", "load6"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSchema {
    /// 14 fields; thrust is derived from the six load cells.
    #[default]
    Bench14,
    /// 15 fields with a board-computed thrust channel.
    Legacy15,
}

impl FrameSchema {
    pub fn field_names(self) -> &'static [&'static str] {
        match self {
            FrameSchema::Bench14 => BENCH14_FIELDS,
            FrameSchema::Legacy15 => LEGACY15_FIELDS,
        }
    }

    pub fn field_count(self) -> usize {
        self.field_names().len()
    }

    /// Exact datagram size for this schema.
    pub fn byte_len(self) -> usize {
        4 * self.field_count()
    }

    pub fn index_of(self, name: &str) -> Option<usize> {
        self.field_names().iter().position(|f| *f == name)
    }
}

/// One decoded telemetry record. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    schema: FrameSchema,
    values: Vec<f32>,
}

impl TelemetryFrame {
    /// Builds a frame from values already in schema order.
    pub fn new(schema: FrameSchema, values: Vec<f32>) -> Result<Self, FormatError> {
        if values.len() != schema.field_count() {
            return Err(FormatError {
                expected: schema.byte_len(),
                actual: 4 * values.len(),
            });
        }
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> FrameSchema {
        self.schema
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// (field name, value) pairs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        self.schema
            .field_names()
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.schema.index_of(name).map(|i| self.values[i])
    }

    fn field(&self, name: &str) -> f32 {
        self.get(name).unwrap_or(f32::NAN)
    }

    pub fn voltage(&self) -> f32 {
        self.field("voltage")
    }

    pub fn current(&self) -> f32 {
        self.field("current")
    }

    pub fn rpm(&self) -> f32 {
        self.field("rpm")
    }

    pub fn torque(&self) -> f32 {
        self.field("torque")
    }

    pub fn temperature(&self) -> f32 {
        self.field("temperature")
    }

    /// Board thrust on `Legacy15`, sum of the load cells on `Bench14`.
    pub fn thrust(&self) -> f32 {
        match self.schema {
            FrameSchema::Legacy15 => self.field("thrust"),
            FrameSchema::Bench14 => LOAD_CELLS.iter().map(|c| self.field(c)).sum(),
        }
    }

    /// Electrical power in watts.
    pub fn power(&self) -> f32 {
        self.voltage() * self.current()
    }
}

/// Encoder/decoder bound to one schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCodec {
    schema: FrameSchema,
}

impl FrameCodec {
    pub fn new(schema: FrameSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> FrameSchema {
        self.schema
    }

    pub fn expected_size(&self) -> usize {
        self.schema.byte_len()
    }

    /// Decodes one datagram payload. Any length other than `expected_size` is rejected.
    pub fn decode(&self, payload: &[u8]) -> Result<TelemetryFrame, FormatError> {
        let expected = self.expected_size();
        if payload.len() != expected {
            return Err(FormatError {
                expected,
                actual: payload.len(),
            });
        }

        let values = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(TelemetryFrame {
            schema: self.schema,
            values,
        })
    }

    /// Encodes a frame back to wire bytes.
    pub fn encode(frame: &TelemetryFrame) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame.schema.byte_len());
        for v in &frame.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(schema: FrameSchema) -> Vec<f32> {
        (1..=schema.field_count()).map(|i| i as f32).collect()
    }

    #[test]
    fn schema_sizes() {
        assert_eq!(FrameSchema::Bench14.field_count(), 14);
        assert_eq!(FrameSchema::Bench14.byte_len(), 56);
        assert_eq!(FrameSchema::Legacy15.field_count(), 15);
        assert_eq!(FrameSchema::Legacy15.byte_len(), 60);
    }

    #[test]
    fn decode_reads_little_endian_floats_in_order() {
        let codec = FrameCodec::new(FrameSchema::Bench14);
        let mut payload = Vec::new();
        for v in ramp(FrameSchema::Bench14) {
            payload.extend_from_slice(&v.to_le_bytes());
        }

        let frame = codec.decode(&payload).unwrap();
        assert_eq!(frame.values(), ramp(FrameSchema::Bench14).as_slice());
        assert_eq!(frame.get("time_stm32"), Some(1.0));
        assert_eq!(frame.temperature(), 14.0);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let codec = FrameCodec::new(FrameSchema::Legacy15);
        let err = codec.decode(&[0u8; 59]).unwrap_err();
        assert_eq!(err, FormatError { expected: 60, actual: 59 });

        let err = codec.decode(&[0u8; 61]).unwrap_err();
        assert_eq!(err.actual, 61);
    }

    #[test]
    fn round_trip_preserves_bits_including_nan_and_inf() {
        let codec = FrameCodec::new(FrameSchema::Bench14);
        for _ in 0..200 {
            let payload: Vec<u8> = (0..codec.expected_size())
                .map(|_| rand::random::<u8>())
                .collect();
            let first = codec.decode(&payload).unwrap();
            let again = codec.decode(&FrameCodec::encode(&first)).unwrap();

            let a: Vec<u32> = first.values().iter().map(|v| v.to_bits()).collect();
            let b: Vec<u32> = again.values().iter().map(|v| v.to_bits()).collect();
            assert_eq!(a, b);
        }

        let mut values = ramp(FrameSchema::Bench14);
        values[0] = f32::NAN;
        values[1] = f32::INFINITY;
        values[2] = f32::NEG_INFINITY;
        let frame = TelemetryFrame::new(FrameSchema::Bench14, values).unwrap();
        let back = codec.decode(&FrameCodec::encode(&frame)).unwrap();
        assert!(back.values()[0].is_nan());
        assert_eq!(back.values()[1], f32::INFINITY);
        assert_eq!(back.values()[2], f32::NEG_INFINITY);
    }

    #[test]
    fn thrust_is_derived_only_on_bench14() {
        let bench = TelemetryFrame::new(FrameSchema::Bench14, ramp(FrameSchema::Bench14)).unwrap();
        // load1..load6 hold 4.0..=9.0
        assert_eq!(bench.thrust(), 39.0);
        assert_eq!(bench.get("thrust"), None);

        let legacy =
            TelemetryFrame::new(FrameSchema::Legacy15, ramp(FrameSchema::Legacy15)).unwrap();
        assert_eq!(legacy.thrust(), 10.0);
    }

    #[test]
    fn power_is_voltage_times_current() {
        let frame = TelemetryFrame::new(FrameSchema::Bench14, ramp(FrameSchema::Bench14)).unwrap();
        assert_eq!(frame.power(), 11.0 * 12.0);
    }

    #[test]
    fn new_rejects_wrong_value_count() {
        let err = TelemetryFrame::new(FrameSchema::Bench14, vec![0.0; 15]).unwrap_err();
        assert_eq!(err, FormatError { expected: 56, actual: 60 });
    }
}

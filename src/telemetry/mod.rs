// Telemetry side: wire frames in, freshest frame out.

pub mod frame;
pub mod freshness;
pub mod ingestor;

pub use frame::{FrameCodec, FrameSchema, TelemetryFrame};
pub use freshness::FreshnessBuffer;
pub use ingestor::{IngestStats, TelemetryIngestor};

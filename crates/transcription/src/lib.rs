pub mod accumulator;
pub mod meter;
pub mod protocol;
pub mod upstream;

pub use accumulator::{AccumulatorEvent, TokenAccumulator, TranscriptSegment, TranslationResult};
pub use meter::RecordingMeter;
pub use protocol::{StreamConfig, Token, UpstreamMessage};
pub use upstream::{OpenRequest, UpstreamAdapter, UpstreamConfig, UpstreamEvent};

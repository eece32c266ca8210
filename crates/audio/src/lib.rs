//! murmurgate-audio – Audio-Pipeline zwischen Browser und Murmur
//!
//! - Opus Encoding/Decoding (48 kHz mono, i16)
//! - Drei-Slot-Ringpuffer pro entferntem Sprecher
//! - Aggregation der Browser-Samples zu 40-ms-Upload-Frames

pub mod aggregator;
pub mod codec;
pub mod error;
pub mod speaker;

pub use aggregator::OutboundAudioAggregator;
pub use codec::{
    CodecFabrik, OpusDecoder, OpusEncoder, OpusFabrik, PcmDecoder, PcmEncoder, ABTASTRATE,
    FRAME_SAMPLES, UPLOAD_FRAME_SAMPLES,
};
pub use error::{AudioError, AudioResult};
pub use speaker::{SpeakerAudioBuffer, RING_SLOTS};

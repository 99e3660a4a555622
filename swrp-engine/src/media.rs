//! Contracts for the external media collaborators.
//!
//! Screen capture, the hardware H.264 encoder and decoder, and the display
//! are platform glue outside this crate. The pipelines own them through the
//! traits below, one owner task each. Capture is modelled as an
//! `mpsc::Receiver<RawFrame>` feeding the source.
//!
//! The mock implementations pass bytes through unchanged; they back the
//! end-to-end tests and any shell that wants a loopback mode.

use bytes::Bytes;
use thiserror::Error;

/// Errors from the encoder, decoder, or display collaborators.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("codec not ready")]
    NotReady,

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("decoding failed: {0}")]
    DecodingFailed(String),

    #[error("encoder flush failed: {0}")]
    FlushFailed(String),

    #[error("property setting failed: {property} with status {status}")]
    PropertySetFailed { property: String, status: i32 },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A captured pixel buffer with its presentation timestamp.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub pts_us: u64,
    pub capture_ts_us: u64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// One unit of encoder output: an Annex-B byte stream for a single frame.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub data: Bytes,
    pub is_keyframe: bool,
}

/// A decoded frame ready for presentation.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub frame_number: u64,
    pub pts_us: u64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// Hardware H.264 encoder contract.
///
/// `encode` may emit zero outputs (a buffering encoder) or several (drained
/// backlog); `flush` drains whatever remains.
pub trait VideoEncoder: Send + Sync {
    fn encode(&mut self, frame: &RawFrame) -> Result<Vec<EncoderOutput>, MediaError>;
    fn flush(&mut self) -> Result<Vec<EncoderOutput>, MediaError>;
}

/// Hardware H.264 decoder contract, symmetric to the encoder.
pub trait VideoDecoder: Send {
    fn decode(&mut self, data: &[u8], pts_us: u64) -> Result<Vec<DecodedFrame>, MediaError>;
}

/// Display contract on the sink.
pub trait VideoOutput: Send {
    fn present(&mut self, frame: &DecodedFrame) -> Result<(), MediaError>;
}

/// Pass-through encoder: each raw frame becomes one "encoded" frame with the
/// same bytes. Emits a keyframe every `keyframe_interval` frames.
#[derive(Debug)]
pub struct MockEncoder {
    keyframe_interval: u64,
    counter: u64,
}

impl MockEncoder {
    pub fn new(keyframe_interval: u64) -> Self {
        Self {
            keyframe_interval: keyframe_interval.max(1),
            counter: 0,
        }
    }
}

impl VideoEncoder for MockEncoder {
    fn encode(&mut self, frame: &RawFrame) -> Result<Vec<EncoderOutput>, MediaError> {
        let is_keyframe = self.counter % self.keyframe_interval == 0;
        self.counter += 1;
        Ok(vec![EncoderOutput {
            data: frame.data.clone(),
            is_keyframe,
        }])
    }

    fn flush(&mut self) -> Result<Vec<EncoderOutput>, MediaError> {
        Ok(Vec::new())
    }
}

/// Pass-through decoder: echoes the payload bytes into one decoded frame.
#[derive(Debug, Default)]
pub struct MockDecoder {
    width: u32,
    height: u32,
}

impl MockDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl VideoDecoder for MockDecoder {
    fn decode(&mut self, data: &[u8], pts_us: u64) -> Result<Vec<DecodedFrame>, MediaError> {
        Ok(vec![DecodedFrame {
            frame_number: 0,
            pts_us,
            width: self.width,
            height: self.height,
            data: Bytes::copy_from_slice(data),
        }])
    }
}

/// Display that counts presentations and remembers the last frame.
#[derive(Debug, Default)]
pub struct MockOutput {
    presented: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the presentation counter, usable after the output has
    /// been moved into the pipeline.
    pub fn presented_counter(&self) -> std::sync::Arc<std::sync::atomic::AtomicU64> {
        std::sync::Arc::clone(&self.presented)
    }
}

impl VideoOutput for MockOutput {
    fn present(&mut self, _frame: &DecodedFrame) -> Result<(), MediaError> {
        self.presented
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(data: &'static [u8]) -> RawFrame {
        RawFrame {
            pts_us: 1000,
            capture_ts_us: 2000,
            width: 4,
            height: 4,
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_mock_encoder_passthrough() {
        let mut encoder = MockEncoder::new(3);
        let outputs = encoder.encode(&raw(b"abcd")).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].data, Bytes::from_static(b"abcd"));
    }

    #[test]
    fn test_mock_encoder_keyframe_cadence() {
        let mut encoder = MockEncoder::new(3);
        let keyframes: Vec<bool> = (0..6)
            .map(|_| encoder.encode(&raw(b"x")).unwrap()[0].is_keyframe)
            .collect();
        assert_eq!(keyframes, [true, false, false, true, false, false]);
    }

    #[test]
    fn test_mock_decoder_echoes() {
        let mut decoder = MockDecoder::new(1920, 1080);
        let frames = decoder.decode(b"payload", 42).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, Bytes::from_static(b"payload"));
        assert_eq!(frames[0].pts_us, 42);
        assert_eq!(frames[0].width, 1920);
    }

    #[test]
    fn test_mock_output_counts() {
        let mut output = MockOutput::new();
        let counter = output.presented_counter();
        let frame = DecodedFrame {
            frame_number: 1,
            pts_us: 0,
            width: 0,
            height: 0,
            data: Bytes::new(),
        };
        output.present(&frame).unwrap();
        output.present(&frame).unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 2);
    }
}

//! Encoded frame segmentation and reassembly.
//!
//! An encoded frame is split into segments of at most [`MAX_SEGMENT_SIZE`]
//! bytes, each carried by a single FRAME packet. The receive side reassembles
//! them keyed on `frame_number`; segments may arrive in any order even though
//! the transport is ordered.

use bytes::{Bytes, BytesMut};

use crate::codec::ByteWriter;
use crate::error::ProtocolError;
use crate::payload::FrameHeader;
use crate::MAX_SEGMENT_SIZE;

/// Metadata shared by a frame and all of its segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Unique per session, strictly increasing, restarts at zero on START.
    pub frame_number: u64,
    pub pts_us: u64,
    pub capture_ts_us: u64,
    pub is_keyframe: bool,
}

/// An encoded video frame (Annex-B H.264) ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub metadata: FrameMetadata,
    pub data: Bytes,
}

impl EncodedFrame {
    pub fn new(metadata: FrameMetadata, data: Bytes) -> Self {
        Self { metadata, data }
    }

    /// Splits the frame into transmission segments.
    ///
    /// Produces `ceil(len / MAX_SEGMENT_SIZE)` segments, at least one even for
    /// an empty frame. Segment data are zero-copy slices of the frame bytes.
    /// Frames needing more than `u16::MAX` segments are refused.
    pub fn into_segments(self) -> Result<Vec<FrameSegment>, ProtocolError> {
        let total = self.data.len();
        let count = total.div_ceil(MAX_SEGMENT_SIZE).max(1);
        if count > u16::MAX as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max_segments: u16::MAX,
            });
        }
        let count = count as u16;

        let mut segments = Vec::with_capacity(count as usize);
        for index in 0..count {
            let start = index as usize * MAX_SEGMENT_SIZE;
            let end = (start + MAX_SEGMENT_SIZE).min(total);
            segments.push(FrameSegment {
                metadata: self.metadata,
                frame_size: total as u32,
                segment_index: index,
                segment_count: count,
                data: self.data.slice(start..end),
            });
        }

        Ok(segments)
    }
}

/// A single segment of an encoded frame, at most 64 KiB of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSegment {
    pub metadata: FrameMetadata,
    pub frame_size: u32,
    pub segment_index: u16,
    pub segment_count: u16,
    pub data: Bytes,
}

impl FrameSegment {
    /// Builds the FRAME packet payload: 32-byte header followed by the data.
    pub fn to_payload(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(FrameHeader::SIZE + self.data.len());
        self.header().write(&mut w);
        w.put_slice(&self.data);
        w.into_bytes()
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            frame_number: self.metadata.frame_number,
            pts_us: self.metadata.pts_us,
            capture_ts_us: self.metadata.capture_ts_us,
            frame_size: self.frame_size,
            segment_index: self.segment_index,
            segment_count: self.segment_count,
        }
    }
}

#[derive(Debug)]
struct PendingFrame {
    frame_number: u64,
    pts_us: u64,
    capture_ts_us: u64,
    frame_size: u32,
    segment_count: u16,
    slots: Vec<Option<Bytes>>,
    received: u16,
}

impl PendingFrame {
    fn new(header: &FrameHeader) -> Self {
        Self {
            frame_number: header.frame_number,
            pts_us: header.pts_us,
            capture_ts_us: header.capture_ts_us,
            frame_size: header.frame_size,
            segment_count: header.segment_count,
            slots: vec![None; header.segment_count as usize],
            received: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.segment_count
    }
}

/// Reassembles frame segments into complete frames.
///
/// Holds at most one pending frame: frames are not interleaved in flight, so
/// a segment carrying a new `frame_number` discards any incomplete
/// predecessor (a later keyframe recovers the stream). Duplicate segments are
/// silently ignored.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    pending: Option<PendingFrame>,
    dropped_frames: u64,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a segment. Returns the complete frame once all segments arrived.
    ///
    /// `header` is assumed valid per [`FrameHeader::parse`]
    /// (`segment_index < segment_count`, `segment_count > 0`).
    pub fn add_segment(&mut self, header: &FrameHeader, data: Bytes) -> Option<EncodedFrame> {
        let start_new = match &self.pending {
            Some(pending) => {
                // A peer that restarts a frame with a different segment count
                // invalidates anything collected so far.
                pending.frame_number != header.frame_number
                    || pending.segment_count != header.segment_count
            }
            None => true,
        };

        if start_new {
            if let Some(old) = self.pending.take() {
                if !old.is_complete() {
                    self.dropped_frames += 1;
                    tracing::debug!(
                        frame_number = old.frame_number,
                        received = old.received,
                        segment_count = old.segment_count,
                        "dropping incomplete frame"
                    );
                }
            }
            self.pending = Some(PendingFrame::new(header));
        }

        let pending = self.pending.as_mut()?;
        let slot = &mut pending.slots[header.segment_index as usize];
        if slot.is_some() {
            return None;
        }
        *slot = Some(data);
        pending.received += 1;

        if pending.is_complete() {
            return self.complete();
        }

        None
    }

    fn complete(&mut self) -> Option<EncodedFrame> {
        let pending = self.pending.take()?;

        let mut data = BytesMut::with_capacity(pending.frame_size as usize);
        for slot in pending.slots.into_iter().flatten() {
            data.extend_from_slice(&slot);
        }

        Some(EncodedFrame::new(
            FrameMetadata {
                frame_number: pending.frame_number,
                pts_us: pending.pts_us,
                capture_ts_us: pending.capture_ts_us,
                // Keyframe-ness is a codec property the wire does not carry;
                // the sink derives it from the bitstream.
                is_keyframe: false,
            },
            data.freeze(),
        ))
    }

    /// Frames discarded because a newer frame arrived before completion.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Clears any pending incomplete frame. Used at session teardown.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(frame_number: u64, data: Vec<u8>) -> EncodedFrame {
        EncodedFrame::new(
            FrameMetadata {
                frame_number,
                pts_us: 1000,
                capture_ts_us: 2000,
                is_keyframe: true,
            },
            Bytes::from(data),
        )
    }

    #[test]
    fn test_single_segment() {
        let segments = frame(1, vec![0u8; 1024]).into_segments().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].segment_index, 0);
        assert_eq!(segments[0].segment_count, 1);
        assert_eq!(segments[0].frame_size, 1024);
    }

    #[test]
    fn test_empty_frame_still_one_segment() {
        let segments = frame(1, vec![]).into_segments().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].frame_size, 0);
        assert!(segments[0].data.is_empty());
    }

    #[test]
    fn test_exact_multiple_of_segment_size() {
        let segments = frame(1, vec![7u8; MAX_SEGMENT_SIZE * 2])
            .into_segments()
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].data.len(), MAX_SEGMENT_SIZE);
        assert_eq!(segments[1].data.len(), MAX_SEGMENT_SIZE);
    }

    #[test]
    fn test_200k_frame_splits_into_four() {
        let segments = frame(42, vec![9u8; 200_000]).into_segments().unwrap();
        assert_eq!(segments.len(), 4);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.segment_index, i as u16);
            assert_eq!(segment.segment_count, 4);
            assert_eq!(segment.frame_size, 200_000);
        }
        assert_eq!(segments[0].data.len(), 65536);
        assert_eq!(segments[1].data.len(), 65536);
        assert_eq!(segments[2].data.len(), 65536);
        assert_eq!(segments[3].data.len(), 3392);
    }

    #[test]
    fn test_segment_payload_carries_header() {
        let segments = frame(5, vec![1, 2, 3, 4]).into_segments().unwrap();
        let payload = segments[0].to_payload();
        let header = FrameHeader::parse(&payload).unwrap();
        assert_eq!(header.frame_number, 5);
        assert_eq!(header.frame_size, 4);
        assert_eq!(&payload[FrameHeader::SIZE..], &[1, 2, 3, 4]);
    }

    fn feed(reassembler: &mut FrameReassembler, segment: &FrameSegment) -> Option<EncodedFrame> {
        reassembler.add_segment(&segment.header(), segment.data.clone())
    }

    #[test]
    fn test_reassembly_in_order() {
        let original = frame(1, (0..200_000u32).map(|i| i as u8).collect());
        let segments = original.clone().into_segments().unwrap();

        let mut reassembler = FrameReassembler::new();
        for segment in &segments[..3] {
            assert!(feed(&mut reassembler, segment).is_none());
        }
        let complete = feed(&mut reassembler, &segments[3]).unwrap();
        assert_eq!(complete.data, original.data);
        assert_eq!(complete.metadata.frame_number, 1);
        assert_eq!(complete.metadata.pts_us, 1000);
        assert_eq!(complete.metadata.capture_ts_us, 2000);
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let original = frame(9, vec![3u8; MAX_SEGMENT_SIZE * 2 + 100]);
        let segments = original.clone().into_segments().unwrap();
        assert_eq!(segments.len(), 3);

        // Feed in order 2, 0, 1; only the third call completes.
        let mut reassembler = FrameReassembler::new();
        assert!(feed(&mut reassembler, &segments[2]).is_none());
        assert!(feed(&mut reassembler, &segments[0]).is_none());
        let complete = feed(&mut reassembler, &segments[1]).unwrap();
        assert_eq!(complete.data, original.data);
    }

    #[test]
    fn test_duplicate_segment_ignored() {
        let original = frame(2, vec![5u8; MAX_SEGMENT_SIZE + 10]);
        let segments = original.clone().into_segments().unwrap();

        let mut reassembler = FrameReassembler::new();
        assert!(feed(&mut reassembler, &segments[0]).is_none());
        assert!(feed(&mut reassembler, &segments[0]).is_none());
        let complete = feed(&mut reassembler, &segments[1]).unwrap();
        assert_eq!(complete.data, original.data);
        assert_eq!(reassembler.dropped_frames(), 0);
    }

    #[test]
    fn test_duplicate_after_completion_restarts() {
        let original = frame(3, vec![1, 2, 3]);
        let segments = original.into_segments().unwrap();

        let mut reassembler = FrameReassembler::new();
        assert!(feed(&mut reassembler, &segments[0]).is_some());
        // The frame already completed; a replay starts (and completes) again.
        assert!(feed(&mut reassembler, &segments[0]).is_some());
    }

    #[test]
    fn test_newer_frame_drops_incomplete_predecessor() {
        let first = frame(1, vec![1u8; MAX_SEGMENT_SIZE * 2]);
        let second = frame(2, vec![2u8; 100]);
        let first_segments = first.into_segments().unwrap();
        let second_segments = second.clone().into_segments().unwrap();

        let mut reassembler = FrameReassembler::new();
        assert!(feed(&mut reassembler, &first_segments[0]).is_none());
        let complete = feed(&mut reassembler, &second_segments[0]).unwrap();
        assert_eq!(complete.data, second.data);
        assert_eq!(reassembler.dropped_frames(), 1);
    }

    #[test]
    fn test_segment_count_change_restarts() {
        let mut header = FrameHeader {
            frame_number: 7,
            pts_us: 0,
            capture_ts_us: 0,
            frame_size: 100,
            segment_index: 0,
            segment_count: 3,
        };
        let mut reassembler = FrameReassembler::new();
        assert!(reassembler
            .add_segment(&header, Bytes::from_static(&[1]))
            .is_none());

        // Same frame number, different segment count: start over.
        header.segment_count = 2;
        header.segment_index = 1;
        assert!(reassembler
            .add_segment(&header, Bytes::from_static(&[2]))
            .is_none());
        assert_eq!(reassembler.dropped_frames(), 1);
    }

    #[test]
    fn test_reset_clears_pending() {
        let segments = frame(4, vec![0u8; MAX_SEGMENT_SIZE + 1])
            .into_segments()
            .unwrap();
        let mut reassembler = FrameReassembler::new();
        assert!(feed(&mut reassembler, &segments[0]).is_none());
        reassembler.reset();
        // After reset the second segment opens a fresh pending frame.
        assert!(feed(&mut reassembler, &segments[1]).is_none());
    }

    #[test]
    fn test_segmentation_bijection_odd_sizes() {
        for size in [1usize, 65535, 65536, 65537, 131072, 131073] {
            let data: Vec<u8> = (0..size).map(|i| (i * 31) as u8).collect();
            let original = frame(10, data);
            let segments = original.clone().into_segments().unwrap();

            let mut reassembler = FrameReassembler::new();
            let mut complete = None;
            for segment in &segments {
                complete = feed(&mut reassembler, segment);
            }
            assert_eq!(complete.unwrap().data, original.data, "size {size}");
        }
    }
}

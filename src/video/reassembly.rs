//! Video unit reassembly from datagram fragments.
//!
//! A frame arrives as one start fragment followed by numbered
//! continuations. Fragments are stitched together here so the frame queue
//! only ever sees complete units, each admitted exactly once.

use crate::core::constants::{CODEC_H264, MAX_FRAME_SIZE, NAL_TYPE_SPS};
use crate::core::{FrameError, FrameSink};

use super::frame_queue::VideoUnit;

/// Annex-B four byte start code.
const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// One video datagram, already stripped of its packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFragment<'a> {
    /// First fragment of a frame.
    Start {
        /// Per-stream packet counter.
        packet_counter: u32,
        /// Presentation timestamp.
        presentation_time: u64,
        /// Server-assigned frame index.
        frame_index: u64,
        /// Total encoded size of the frame.
        frame_byte_size: u32,
        /// Fragment bytes.
        data: &'a [u8],
    },
    /// Subsequent fragment of the frame in progress.
    Continuation {
        /// Per-stream packet counter, one above the previous fragment.
        packet_counter: u32,
        /// Fragment bytes.
        data: &'a [u8],
    },
}

#[derive(Debug)]
struct PartialFrame {
    frame_index: u64,
    presentation_time: u64,
    expected: usize,
    buffer: Vec<u8>,
}

/// Stateful fragment assembler for one stream.
#[derive(Debug)]
pub struct NalAssembler {
    codec: u32,
    prev_counter: u32,
    current: Option<PartialFrame>,
}

impl Default for NalAssembler {
    fn default() -> Self {
        Self::new(CODEC_H264)
    }
}

impl NalAssembler {
    /// Create an assembler for the given codec.
    pub fn new(codec: u32) -> Self {
        Self {
            codec,
            prev_counter: 0,
            current: None,
        }
    }

    /// Codec the assembler splits parameter sets for.
    pub fn codec(&self) -> u32 {
        self.codec
    }

    /// Forget any partial frame and adopt a codec (new session).
    pub fn reset(&mut self, codec: u32) {
        self.codec = codec;
        self.prev_counter = 0;
        self.current = None;
    }

    /// Check if a frame is partially assembled.
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Feed one fragment, admitting completed units to `sink`.
    ///
    /// Returns the number of units admitted. On error the partial frame is
    /// discarded and continuations are ignored until the next start.
    pub fn push(
        &mut self,
        fragment: VideoFragment<'_>,
        sink: &dyn FrameSink,
    ) -> Result<usize, FrameError> {
        match fragment {
            VideoFragment::Start {
                packet_counter,
                presentation_time,
                frame_index,
                frame_byte_size,
                data,
            } => {
                if let Some(stale) = self.current.take() {
                    tracing::trace!(
                        frame_index = stale.frame_index,
                        received = stale.buffer.len(),
                        expected = stale.expected,
                        "discarding incomplete frame"
                    );
                }
                self.prev_counter = packet_counter;

                let mut admitted = 0;
                let mut data = data;
                let mut expected = frame_byte_size as usize;
                if expected > MAX_FRAME_SIZE {
                    return Err(FrameError::TooLarge {
                        size: expected,
                        max: MAX_FRAME_SIZE,
                    });
                }

                if self.codec == CODEC_H264 && starts_with_sps(data) {
                    let (sps_end, pps_end) = parameter_set_bounds(data)
                        .ok_or(FrameError::InvalidParameterSets(frame_index))?;
                    if expected < pps_end {
                        return Err(FrameError::InvalidParameterSets(frame_index));
                    }
                    for range in [0..sps_end, sps_end..pps_end] {
                        let mut payload = sink.take_buffer(range.len());
                        payload.extend_from_slice(&data[range]);
                        sink.enqueue(VideoUnit::new(frame_index, presentation_time, payload));
                        admitted += 1;
                    }
                    data = &data[pps_end..];
                    expected -= pps_end;
                }

                // Nothing left to assemble: only stray bytes are an error.
                if expected == 0 {
                    if !data.is_empty() {
                        return Err(FrameError::Overflow {
                            capacity: 0,
                            attempted: data.len(),
                        });
                    }
                    return Ok(admitted);
                }

                self.current = Some(PartialFrame {
                    frame_index,
                    presentation_time,
                    expected,
                    buffer: sink.take_buffer(expected),
                });
                Ok(admitted + self.append(data, sink)?)
            }
            VideoFragment::Continuation {
                packet_counter,
                data,
            } => {
                if self.current.is_none() {
                    return Err(FrameError::NoActiveFrame);
                }
                let expected = self.prev_counter.wrapping_add(1);
                if packet_counter != expected {
                    self.current = None;
                    return Err(FrameError::PacketLoss {
                        expected,
                        actual: packet_counter,
                    });
                }
                self.prev_counter = packet_counter;
                self.append(data, sink)
            }
        }
    }

    fn append(&mut self, data: &[u8], sink: &dyn FrameSink) -> Result<usize, FrameError> {
        let Some(frame) = self.current.as_mut() else {
            return Err(FrameError::NoActiveFrame);
        };

        let attempted = frame.buffer.len() + data.len();
        if attempted > frame.expected {
            let capacity = frame.expected;
            self.current = None;
            return Err(FrameError::Overflow {
                capacity,
                attempted,
            });
        }
        frame.buffer.extend_from_slice(data);

        if frame.buffer.len() < frame.expected {
            return Ok(0);
        }
        let Some(frame) = self.current.take() else {
            return Ok(0);
        };
        sink.enqueue(VideoUnit::new(
            frame.frame_index,
            frame.presentation_time,
            frame.buffer,
        ));
        Ok(1)
    }
}

fn starts_with_sps(data: &[u8]) -> bool {
    data.len() > START_CODE.len() && data[START_CODE.len()] & 0x1F == NAL_TYPE_SPS
}

/// End offsets of the SPS and PPS units at the head of an IDR frame.
///
/// The SPS ends where the second start code begins, the PPS where the third
/// one begins.
fn parameter_set_bounds(data: &[u8]) -> Option<(usize, usize)> {
    let mut starts = data
        .windows(START_CODE.len())
        .enumerate()
        .skip(START_CODE.len())
        .filter(|(_, window)| *window == START_CODE)
        .map(|(pos, _)| pos);
    let sps_end = starts.next()?;
    let pps_end = starts.next()?;
    Some((sps_end, pps_end))
}

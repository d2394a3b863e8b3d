//! Reassembly of a 256-pixel spectrum from its eight data sub-frames.
//!
//! The sensor sends a spectrum as 8 frames of 32 samples, counting the frame
//! byte down from 7 to 0. Assembly only follows that descending run: a frame
//! that does not carry the next expected index is dropped, never kept for a
//! later pass, so a missing sub-frame leaves its segment zero.

use std::fmt;

use serde::ser::{Serialize, Serializer};

use crate::frame::{Frame, SATURATION_LEVEL};

/// Samples in one spectrum.
pub const SPECTRUM_LEN: usize = 256;

/// Data sub-frames per spectrum.
pub const FRAMES_PER_SPECTRUM: usize = 8;

/// Samples carried by each data sub-frame.
pub const SAMPLES_PER_FRAME: usize = SPECTRUM_LEN / FRAMES_PER_SPECTRUM;

/// Completeness of an assembled spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumStatus {
    Complete,
    /// Some samples are still zero.
    Incomplete,
    /// Every sample is zero.
    Empty,
}

impl SpectrumStatus {
    /// Per-repetition error message; empty when the spectrum is usable.
    pub fn message(self) -> &'static str {
        match self {
            SpectrumStatus::Complete => "",
            SpectrumStatus::Incomplete => "Incomplete data frames",
            SpectrumStatus::Empty => "Not enough packets received",
        }
    }

    pub fn is_valid(self) -> bool {
        self == SpectrumStatus::Complete
    }
}

impl fmt::Display for SpectrumStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A full spectrum of 256 raw counts.
#[derive(Clone, PartialEq, Eq)]
pub struct Spectrum {
    samples: [u16; SPECTRUM_LEN],
}

impl Default for Spectrum {
    fn default() -> Self {
        Self {
            samples: [0; SPECTRUM_LEN],
        }
    }
}

impl fmt::Debug for Spectrum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spectrum")
            .field("status", &self.status())
            .field("max", &self.samples.iter().max())
            .finish()
    }
}

impl Serialize for Spectrum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.samples.iter())
    }
}

impl Spectrum {
    #[inline]
    pub fn as_slice(&self) -> &[u16] {
        &self.samples
    }

    pub fn to_vec(&self) -> Vec<u16> {
        self.samples.to_vec()
    }

    /// Samples contributed by sub-frame `frame_index` (7 is the first segment).
    /// Indices above 7 belong to no segment.
    pub fn segment(&self, frame_index: u8) -> Option<&[u16]> {
        if usize::from(frame_index) >= FRAMES_PER_SPECTRUM {
            return None;
        }
        let start = segment_start(frame_index);
        Some(&self.samples[start..start + SAMPLES_PER_FRAME])
    }

    pub fn status(&self) -> SpectrumStatus {
        if self.samples.iter().all(|&v| v == 0) {
            SpectrumStatus::Empty
        } else if self.samples.contains(&0) {
            SpectrumStatus::Incomplete
        } else {
            SpectrumStatus::Complete
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.samples.iter().any(|&v| v >= SATURATION_LEVEL)
    }
}

/// Only valid for `frame_index` 0..=7.
#[inline]
fn segment_start(frame_index: u8) -> usize {
    debug_assert!(usize::from(frame_index) < FRAMES_PER_SPECTRUM);
    (FRAMES_PER_SPECTRUM - 1 - frame_index as usize) * SAMPLES_PER_FRAME
}

/// Merge an ordered list of frames into one spectrum.
pub fn assemble<'a, I>(frames: I) -> Spectrum
where
    I: IntoIterator<Item = &'a Frame>,
{
    let mut spectrum = Spectrum::default();
    let mut expected = Some((FRAMES_PER_SPECTRUM - 1) as u8);

    for frame in frames {
        let Some(index) = expected else {
            break;
        };
        if !frame.is_data() || frame.frame_index() != index {
            continue;
        }
        let start = segment_start(index);
        let n = frame.payload.len().min(SAMPLES_PER_FRAME);
        spectrum.samples[start..start + n].copy_from_slice(&frame.payload[..n]);
        expected = index.checked_sub(1);
    }

    spectrum
}

/// Whether any sample of any frame is saturated.
pub fn any_saturated<'a, I>(frames: I) -> bool
where
    I: IntoIterator<Item = &'a Frame>,
{
    frames.into_iter().any(Frame::is_saturated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameHeader, FrameKind, FRAME_INFORMATION};

    fn data(frame_index: u8, payload: Vec<u16>) -> Frame {
        Frame {
            header: FrameHeader {
                identity1: 0xA0,
                identity2: 0,
                module_id: 0x80,
                frame_index,
                timeflag1: 0,
                timeflag2: 0,
                checkbyte: 1,
            },
            payload,
            kind: FrameKind::Data,
        }
    }

    /// Sub-frame with the values its segment should hold in a 1..=256 ramp.
    fn ramp_frame(frame_index: u8) -> Frame {
        let start = segment_start(frame_index) as u16;
        data(frame_index, (start + 1..=start + 32).collect())
    }

    #[test]
    fn reproduces_full_sequence() {
        let frames: Vec<Frame> = (0..8).rev().map(ramp_frame).collect();
        let spectrum = assemble(&frames);
        let expected: Vec<u16> = (1..=256).collect();
        assert_eq!(spectrum.as_slice(), &expected[..]);
        assert_eq!(spectrum.status(), SpectrumStatus::Complete);
    }

    #[test]
    fn gap_leaves_segment_zero() {
        // 7, 6, 4, ...: 5 is missing, so nothing after it matches
        let frames: Vec<Frame> = [7u8, 6, 4, 3, 2, 1, 0].into_iter().map(ramp_frame).collect();
        let spectrum = assemble(&frames);

        assert_eq!(spectrum.segment(7), Some(ramp_frame(7).payload.as_slice()));
        assert_eq!(spectrum.segment(6), Some(ramp_frame(6).payload.as_slice()));
        assert!(spectrum.segment(5).unwrap().iter().all(|&v| v == 0));
        assert_eq!(spectrum.status(), SpectrumStatus::Incomplete);
    }

    #[test]
    fn out_of_order_frames_are_not_buffered() {
        let frames: Vec<Frame> = [6u8, 7, 5, 4, 3, 2, 1, 0].into_iter().map(ramp_frame).collect();
        let spectrum = assemble(&frames);
        // 6 arrived before 7 and is lost; 5 then never matches the expected 6
        assert_eq!(spectrum.segment(7), Some(ramp_frame(7).payload.as_slice()));
        assert!(spectrum.as_slice()[32..].iter().all(|&v| v == 0));
    }

    #[test]
    fn skips_non_data_and_repeated_frames() {
        let mut frames = vec![ramp_frame(7), ramp_frame(7)];
        let mut info = ramp_frame(6);
        info.kind = FrameKind::Error;
        frames.push(info);
        frames.extend((0..7).rev().map(ramp_frame));

        let spectrum = assemble(&frames);
        assert_eq!(spectrum.status(), SpectrumStatus::Complete);
    }

    #[test]
    fn segment_outside_spectrum_is_none() {
        let spectrum = assemble(&[ramp_frame(7)]);
        assert_eq!(spectrum.segment(0).map(<[u16]>::len), Some(SAMPLES_PER_FRAME));
        assert_eq!(spectrum.segment(8), None);
        assert_eq!(spectrum.segment(FRAME_INFORMATION), None);
    }

    #[test]
    fn empty_input_is_empty_spectrum() {
        let spectrum = assemble(std::iter::empty::<&Frame>());
        assert_eq!(spectrum.status(), SpectrumStatus::Empty);
        assert_eq!(spectrum.status().message(), "Not enough packets received");
        assert_eq!(SpectrumStatus::Incomplete.message(), "Incomplete data frames");
    }

    #[test]
    fn saturation_detection() {
        let mut hot = ramp_frame(7);
        hot.payload[10] = 65535;
        assert!(any_saturated(&[hot.clone(), ramp_frame(6)]));
        assert!(assemble(&[hot]).is_saturated());

        let mut warm = ramp_frame(7);
        warm.payload[10] = 65534;
        assert!(!any_saturated(&[warm]));
    }
}

//! Frame extraction from the accumulated serial buffer.

use log::debug;

use crate::filter::unescape;
use crate::frame::{decode_frame, frame_len, Frame, START_MARKER};

/// Outcome of one extraction step over a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'a> {
    /// Bytes after the extracted frame, or from the start marker on when the
    /// frame is not complete yet.
    pub remaining: &'a [u8],
    /// The complete frame, if one was available.
    pub frame: Option<&'a [u8]>,
    /// Noise skipped before the start marker.
    pub discarded: usize,
}

/// Take the first complete frame out of an unescaped buffer.
///
/// Everything before the first `#` is dropped (typically the `0x13 0x11`
/// flow-control pair the sensor emits before its first frame). When the frame
/// has not fully arrived yet `frame` is `None` and `remaining` starts at the
/// marker, so the caller can retry once more bytes are in.
pub fn split_frame(buf: &[u8]) -> Split<'_> {
    let Some(start) = buf.iter().position(|&b| b == START_MARKER) else {
        return Split {
            remaining: &[],
            frame: None,
            discarded: buf.len(),
        };
    };
    let candidate = &buf[start..];

    if candidate.len() < 2 {
        return Split {
            remaining: candidate,
            frame: None,
            discarded: start,
        };
    }

    let total = frame_len(candidate[1]);
    if candidate.len() < total {
        return Split {
            remaining: candidate,
            frame: None,
            discarded: start,
        };
    }

    let (frame, remaining) = candidate.split_at(total);
    Split {
        remaining,
        frame: Some(frame),
        discarded: start,
    }
}

/// Decode every complete frame contained in a raw (still escaped) buffer.
///
/// Frames the decoder rejects are skipped; parsing continues with the bytes
/// that follow them. A trailing partial frame is left undecoded.
pub fn parse_buffer(raw: &[u8], require_checkbyte: bool) -> Vec<Frame> {
    let resolved = unescape(raw);
    let mut frames = Vec::new();
    let mut rest: &[u8] = &resolved;

    while !rest.is_empty() {
        let split = split_frame(rest);
        let Some(bytes) = split.frame else {
            break;
        };
        match decode_frame(bytes, require_checkbyte) {
            Ok(frame) => frames.push(frame),
            Err(e) => debug!("Skipping frame ({} bytes): {}", bytes.len(), e),
        }
        rest = split.remaining;
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn data_frame(frame_index: u8, checkbyte: u8) -> Vec<u8> {
        // identity1 0x20 -> 4 payload bytes
        vec![b'#', 0x20, 0x00, 0x80, frame_index, 0x00, 0x00, 1, 0, 2, 0, checkbyte]
    }

    #[test]
    fn discards_noise_before_marker() {
        let mut buf = vec![0x13, 0x11];
        buf.extend(data_frame(7, 1));
        buf.extend([b'#', 0x20]);

        let split = split_frame(&buf);
        assert_eq!(split.discarded, 2);
        assert_eq!(split.frame, Some(&data_frame(7, 1)[..]));
        assert_eq!(split.remaining, &[b'#', 0x20]);
    }

    #[test]
    fn defers_until_frame_complete() {
        let full = data_frame(3, 1);
        for cut in 0..full.len() {
            let split = split_frame(&full[..cut]);
            assert_eq!(split.frame, None, "cut at {cut}");
        }
        assert_eq!(split_frame(&full).frame, Some(&full[..]));
    }

    #[test]
    fn no_marker_discards_everything() {
        let split = split_frame(&[1, 2, 3]);
        assert_eq!(split.frame, None);
        assert!(split.remaining.is_empty());
        assert_eq!(split.discarded, 3);
    }

    #[test]
    fn parses_consecutive_frames_and_skips_bad_checkbyte() {
        let mut raw = vec![0x13, 0x11];
        raw.extend(data_frame(7, 1));
        raw.extend(data_frame(6, 9));
        raw.extend(data_frame(5, 1));
        raw.extend([b'#', 0x20, 0x00]);

        let strict = parse_buffer(&raw, true);
        let indices: Vec<u8> = strict.iter().map(Frame::frame_index).collect();
        assert_eq!(indices, vec![7, 5]);

        let lax = parse_buffer(&raw, false);
        assert_eq!(lax.len(), 3);
    }

    #[test]
    fn resolves_escapes_before_framing() {
        // payload word 0x4023 escaped as "@e@d"
        let raw = [b'#', 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, b'@', b'e', b'@', b'd', 0x01];
        let frames = parse_buffer(&raw, true);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![0x4023]);
    }

    proptest! {
        #[test]
        fn split_preserves_length(
            noise in prop::collection::vec(any::<u8>().prop_filter("no marker", |b| *b != START_MARKER), 0..16),
            body in prop::collection::vec(any::<u8>(), 0..80),
            identity1 in any::<u8>(),
        ) {
            let mut buf = noise.clone();
            buf.push(START_MARKER);
            buf.push(identity1);
            buf.extend(&body);

            let split = split_frame(&buf);
            let extracted = split.frame.map_or(0, <[u8]>::len);
            prop_assert_eq!(split.discarded, noise.len());
            prop_assert_eq!(split.remaining.len() + extracted, buf.len() - split.discarded);
            match split.frame {
                Some(frame) => prop_assert_eq!(frame.len(), frame_len(identity1)),
                None => prop_assert!(buf.len() - noise.len() < frame_len(identity1)),
            }
        }
    }
}

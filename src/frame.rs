//! TriOS frame layout and decoding.
//!
//! Every frame sent by the sensor has the same layout once escapes have
//! been resolved:
//!
//! ```text
//! [#][id1][id2][module][frame][tf1][tf2][payload ...][checkbyte]
//! ```
//!
//! The payload length is encoded in the top three bits of `id1`: the payload
//! holds `2^((id1 & 0xE0) >> 5)` little-endian `u16` words. The frame byte
//! distinguishes spectrum sub-frames (0-7), identification replies (255) and
//! error reports (254).

use log::{debug, warn};
use serde::Serialize;

use crate::errors::FrameError;
use crate::module::ModuleType;

// ============================================================================
// Constants
// ============================================================================

/// Start marker of every frame.
pub const START_MARKER: u8 = b'#';

/// Bytes of a frame that are not payload (7 header bytes + checkbyte).
pub const FRAME_OVERHEAD: usize = 8;

/// Offset of the first payload byte.
const PAYLOAD_OFFSET: usize = 7;

/// Value of the trailing checkbyte on a well-formed frame.
pub const CHECKBYTE_OK: u8 = 1;

/// Frame byte of an identification reply.
pub const FRAME_INFORMATION: u8 = 255;

/// Frame byte of an error report.
pub const FRAME_ERROR: u8 = 254;

/// Sample value reported by a saturated pixel.
pub const SATURATION_LEVEL: u16 = u16::MAX;

/// Payload length in bytes declared by the first identity byte.
#[inline]
pub fn payload_len_bytes(identity1: u8) -> usize {
    2 * (1usize << ((identity1 & 0xE0) >> 5))
}

/// Total frame length (header, payload and checkbyte) declared by `identity1`.
#[inline]
pub fn frame_len(identity1: u8) -> usize {
    FRAME_OVERHEAD + payload_len_bytes(identity1)
}

// ============================================================================
// Data Types
// ============================================================================

/// Fixed header fields shared by every frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub identity1: u8,
    pub identity2: u8,
    pub module_id: u8,
    /// Sub-frame ordinal for data (7 first .. 0 last), 255/254 otherwise.
    pub frame_index: u8,
    /// Time flag bytes; older firmware documents them as reserved.
    pub timeflag1: u8,
    pub timeflag2: u8,
    pub checkbyte: u8,
}

/// Identification details carried by an Information frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub serial_number: u16,
    pub module_type: ModuleType,
    pub firmware: Option<u16>,
    pub reserved: Option<u8>,
    /// Payload bytes following the fixed identification fields.
    pub query_data: Vec<u8>,
}

impl ModuleInfo {
    /// Serial number as lower-case hex without prefix or padding.
    pub fn serial_hex(&self) -> String {
        format!("{:x}", self.serial_number)
    }

    /// Identifier used to label measurements, e.g. `SAM_8123`.
    pub fn device_id(&self) -> String {
        format!("{}_{}", self.module_type, self.serial_hex())
    }
}

/// Classification of a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "frame_type", rename_all = "lowercase")]
pub enum FrameKind {
    Data,
    Information(ModuleInfo),
    Error,
}

/// A decoded TriOS frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u16>,
    pub kind: FrameKind,
}

impl Frame {
    #[inline]
    pub fn frame_index(&self) -> u8 {
        self.header.frame_index
    }

    /// Payload length in bytes declared by the header.
    #[inline]
    pub fn payload_len_bytes(&self) -> usize {
        payload_len_bytes(self.header.identity1)
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, FrameKind::Data)
    }

    /// Identification details, for Information frames only.
    pub fn module_info(&self) -> Option<&ModuleInfo> {
        match &self.kind {
            FrameKind::Information(info) => Some(info),
            _ => None,
        }
    }

    /// Whether any payload sample reached the saturation level.
    pub fn is_saturated(&self) -> bool {
        self.payload.iter().any(|&v| v >= SATURATION_LEVEL)
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one complete, already unescaped frame.
///
/// With `require_checkbyte` set a trailing byte other than `1` rejects the
/// frame; without it the frame is decoded anyway and the mismatch is logged.
pub fn decode_frame(bytes: &[u8], require_checkbyte: bool) -> Result<Frame, FrameError> {
    let first = *bytes.first().ok_or(FrameError::Empty)?;
    if first != START_MARKER {
        return Err(FrameError::MissingStartMarker(first));
    }

    let checkbyte = bytes[bytes.len() - 1];
    if checkbyte != CHECKBYTE_OK {
        if require_checkbyte {
            return Err(FrameError::Checkbyte(checkbyte));
        }
        warn!("Checkbyte is not 1: {}, decoding frame anyway", checkbyte);
    }

    if bytes.len() < 2 {
        return Err(FrameError::Truncated {
            expected: FRAME_OVERHEAD,
            actual: bytes.len(),
        });
    }
    let expected = frame_len(bytes[1]);
    if bytes.len() < expected {
        return Err(FrameError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }

    let header = FrameHeader {
        identity1: bytes[1],
        identity2: bytes[2],
        module_id: bytes[3],
        frame_index: bytes[4],
        timeflag1: bytes[5],
        timeflag2: bytes[6],
        checkbyte,
    };

    let data = &bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload_len_bytes(header.identity1)];
    let payload: Vec<u16> = data
        .chunks_exact(2)
        .map(|w| u16::from_le_bytes([w[0], w[1]]))
        .collect();

    let kind = match header.frame_index {
        FRAME_INFORMATION => FrameKind::Information(decode_module_info(data)),
        FRAME_ERROR => FrameKind::Error,
        _ => FrameKind::Data,
    };
    debug!(
        "Decoded {} frame: index={}, module={:#04x}, {} words",
        kind_name(&kind),
        header.frame_index,
        header.module_id,
        payload.len()
    );

    Ok(Frame {
        header,
        payload,
        kind,
    })
}

/// Information payload: serial (LE u16), firmware (LE u16), reserved, query data.
fn decode_module_info(data: &[u8]) -> ModuleInfo {
    let serial_number = u16::from_le_bytes([data[0], data[1]]);
    let module_type = ModuleType::from_serial(serial_number);
    if module_type == ModuleType::Unknown {
        debug!("Unknown module connected: {:x}", serial_number);
    }
    let firmware = data.get(2..4).map(|w| u16::from_le_bytes([w[0], w[1]]));
    let reserved = data.get(4).copied();
    let query_data = data.get(5..).map(<[u8]>::to_vec).unwrap_or_default();

    ModuleInfo {
        serial_number,
        module_type,
        firmware,
        reserved,
        query_data,
    }
}

fn kind_name(kind: &FrameKind) -> &'static str {
    match kind {
        FrameKind::Data => "data",
        FrameKind::Information(_) => "information",
        FrameKind::Error => "error",
    }
}

//! Command/response exchange with a TriOS sensor.
//!
//! Commands are written once as raw bytes; the reply is collected by polling
//! the port until the expected number of frames has been decoded or the time
//! budget runs out. Every poll re-decodes the whole accumulated buffer, so an
//! escape pair or frame split across two reads is picked up on the next poll.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nom::{
    bytes::complete::take_while_m_n,
    character::complete::multispace0,
    combinator::{all_consuming, map_res},
    multi::many1,
    sequence::delimited,
    IResult,
};

use crate::buffer::parse_buffer;
use crate::errors::{DriverError, Result};
use crate::frame::Frame;
use crate::port::SerialLink;

// ============================================================================
// Constants
// ============================================================================

/// Payload bytes of the Information frame answering an identification query.
pub const ID_PAYLOAD_BYTES: usize = 8;

/// Payload bytes of each spectrum sub-frame.
pub const DATA_PAYLOAD_BYTES: usize = 64;

/// Default pause between two polls of the port.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time budget of one command.
pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(16);

/// Highest fixed integration-time code.
pub const MAX_INTEGRATION_CODE: u8 = 12;

/// Highest IPS box channel.
pub const MAX_IPS_CHANNEL: u8 = 4;

// ============================================================================
// Command encoding
// ============================================================================

/// Decode a pair of hex digits into a byte, e.g. `"B0"` -> `0xB0`.
fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |hex: &str| u8::from_str_radix(hex, 16),
    )(input)
}

fn hex_bytes(input: &str) -> IResult<&str, Vec<u8>> {
    all_consuming(many1(delimited(multispace0, hex_byte, multispace0)))(input)
}

/// Convert a command written as space separated hex byte pairs to raw bytes.
///
/// Whitespace between pairs is optional, as long as every byte has two digits.
pub fn encode_hex(command: &str) -> Result<Vec<u8>> {
    hex_bytes(command)
        .map(|(_, bytes)| bytes)
        .map_err(|e| DriverError::InvalidCommand {
            command: command.to_string(),
            reason: match e {
                nom::Err::Error(e) | nom::Err::Failure(e) if e.input.is_empty() => {
                    "no bytes".to_string()
                }
                nom::Err::Error(e) | nom::Err::Failure(e) => {
                    format!("expected a hex byte at {:?}", e.input)
                }
                nom::Err::Incomplete(_) => "incomplete input".to_string(),
            },
        })
}

/// IPS box address byte for a channel; 0 when the sensor is wired directly.
#[inline]
fn ips_address(ips_channel: u8) -> u8 {
    ips_channel * 2
}

/// Query for the module serial number, answered by one Information frame.
pub fn identify_command(ips_channel: u8) -> String {
    format!("23 {:02x} 00 80 B0 00 00 01", ips_address(ips_channel))
}

/// Set the integration time (`0` = sensor automatic, 1-12 fixed) and trigger
/// one measurement, as two commands in a single write.
pub fn measure_command(ips_channel: u8, integration_code: u8) -> String {
    let ips = ips_address(ips_channel);
    format!(
        "23 {ips:02x} 00 30 78 05 {integration_code:02x} 01 23 {ips:02x} 00 80 A8 00 81 01"
    )
}

// ============================================================================
// Command session
// ============================================================================

/// Frames collected for one command.
#[derive(Debug, Clone, Default)]
pub struct CommandResponse {
    /// Frames decoded on the last poll; exactly the requested count when
    /// `complete` is set.
    pub packets: Vec<Frame>,
    /// Every byte received while the command was active, still escaped.
    pub raw: Vec<u8>,
    /// Whether the requested number of frames arrived within the budget.
    pub complete: bool,
}

/// Timing and validation settings shared by the commands of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSession {
    pub poll_interval: Duration,
    pub max_time: Duration,
    pub require_checkbyte: bool,
}

impl Default for CommandSession {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_time: DEFAULT_MAX_TIME,
            require_checkbyte: true,
        }
    }
}

impl CommandSession {
    /// Send `command` and collect `required` frames.
    ///
    /// When `payload_bytes` is given, frames of any other payload size are
    /// ignored (some units answer an identification query with a 9-byte
    /// frame besides the real one). Running out of time is not an error: the
    /// frames of the last poll are returned with `complete` unset.
    pub fn run<L: SerialLink + ?Sized>(
        &self,
        link: &mut L,
        command: &str,
        required: usize,
        payload_bytes: Option<usize>,
    ) -> Result<CommandResponse> {
        let bytes = encode_hex(command)?;
        debug!("Sending {:02X?} to {}", bytes, link.name());
        link.write(&bytes)?;

        let start = Instant::now();
        let mut raw = Vec::new();
        let mut packets = Vec::new();

        while start.elapsed() < self.max_time {
            loop {
                let waiting = link.bytes_available()?;
                if waiting == 0 {
                    break;
                }
                let chunk = link.read(waiting)?;
                if chunk.is_empty() {
                    break;
                }
                raw.extend_from_slice(&chunk);
            }

            packets = parse_buffer(&raw, self.require_checkbyte);
            if let Some(size) = payload_bytes {
                packets.retain(|p| p.payload_len_bytes() == size);
            }

            if packets.len() == required {
                debug!(
                    "Received {} packet(s) ({} bytes) in {:?}",
                    required,
                    raw.len(),
                    start.elapsed()
                );
                return Ok(CommandResponse {
                    packets,
                    raw,
                    complete: true,
                });
            }

            thread::sleep(self.poll_interval);
        }

        // Drop whatever is still arriving so it does not leak into the next command.
        link.flush_input()?;
        warn!(
            "Timeout after {:?}: {} of {} packet(s) received ({} bytes)",
            self.max_time,
            packets.len(),
            required,
            raw.len()
        );
        Ok(CommandResponse {
            packets,
            raw,
            complete: false,
        })
    }
}

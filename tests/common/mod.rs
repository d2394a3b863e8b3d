//! Simulated TriOS sensor for integration tests.
//!
//! The simulator answers the identification and measurement commands the
//! way a Ramses unit does: replies are preceded by XON/XOFF noise, control
//! bytes inside frames are escaped, and bytes trickle in at a fixed rate so a
//! reply spans several polls.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use trios_rs::command::CommandSession;
use trios_rs::{DriverError, SerialLink};

pub const SAM_SERIAL: u16 = 0x8123;

/// Escape control bytes the way the sensor does (`#` stays raw as the marker).
pub fn escape_frame(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 8);
    out.push(frame[0]);
    for &b in &frame[1..] {
        match b {
            0x11 => out.extend_from_slice(b"@f"),
            0x13 => out.extend_from_slice(b"@g"),
            0x23 => out.extend_from_slice(b"@e"),
            0x40 => out.extend_from_slice(b"@d"),
            _ => out.push(b),
        }
    }
    out
}

/// Build an unescaped frame; `identity1` must declare `payload.len()` bytes.
pub fn build_frame(identity1: u8, frame_index: u8, payload: &[u8], checkbyte: u8) -> Vec<u8> {
    let mut out = vec![b'#', identity1, 0x00, 0x80, frame_index, 0x00, 0x00];
    out.extend_from_slice(payload);
    out.push(checkbyte);
    out
}

/// Sample the simulator reports at spectrum position `pos` for `code`.
pub fn sample(code: u8, pos: usize) -> u16 {
    u16::from(code) * 1000 + pos as u16 + 1
}

/// Session settings fast enough for tests.
pub fn fast_session(max_time: Duration) -> CommandSession {
    CommandSession {
        poll_interval: Duration::from_millis(2),
        max_time,
        require_checkbyte: true,
    }
}

pub struct SimulatedSensor {
    pub name: String,
    pub serial_number: u16,
    /// Answer identification queries.
    pub identify: bool,
    /// Also send a spurious identification frame with a 16-byte payload.
    pub extra_id_frame: bool,
    /// Frame indices sent for every measurement, in order.
    pub data_frames: Vec<u8>,
    /// Integration codes that produce saturated pixels.
    pub saturated_codes: Vec<u8>,
    pub checkbyte: u8,
    pub fail_open: bool,
    /// 1-based index of the write that fails with an I/O error.
    pub fail_write: Option<usize>,
    pub bytes_per_ms: usize,

    pub open: bool,
    pub open_count: usize,
    pub close_count: usize,
    pub flush_count: usize,
    pub written: Vec<Vec<u8>>,

    /// Reply bytes not read yet.
    pub outbox: VecDeque<u8>,
    pub reply_started: Option<Instant>,
    /// Bytes handed out since `reply_started`.
    pub delivered: usize,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self {
            name: "sim0".into(),
            serial_number: SAM_SERIAL,
            identify: true,
            extra_id_frame: false,
            data_frames: (0..8).rev().collect(),
            saturated_codes: Vec::new(),
            checkbyte: 1,
            fail_open: false,
            fail_write: None,
            bytes_per_ms: 64,
            open: false,
            open_count: 0,
            close_count: 0,
            flush_count: 0,
            written: Vec::new(),
            outbox: VecDeque::new(),
            reply_started: None,
            delivered: 0,
        }
    }
}

impl SimulatedSensor {
    /// Integration codes of the measurement commands received so far.
    pub fn measured_codes(&self) -> Vec<u8> {
        self.written
            .iter()
            .filter(|c| c.len() == 16 && c[4] == 0x78)
            .map(|c| c[6])
            .collect()
    }

    fn reply(&mut self, command: &[u8]) {
        let mut reply = vec![0x13, 0x11];
        if command.len() >= 8 && command[3] == 0x80 && command[4] == 0xB0 {
            if !self.identify {
                return;
            }
            let [lo, hi] = self.serial_number.to_le_bytes();
            let info = build_frame(0x40, 0xFF, &[lo, hi, 0x02, 0x01, 0, 0, 0, 0], self.checkbyte);
            reply.extend(escape_frame(&info));
            if self.extra_id_frame {
                let spurious = build_frame(0x60, 0xFF, &[0x11; 16], self.checkbyte);
                reply.extend(escape_frame(&spurious));
            }
        } else if command.len() == 16 && command[4] == 0x78 {
            let code = command[6];
            let saturated = self.saturated_codes.contains(&code);
            for &index in &self.data_frames {
                let start = (7 - usize::from(index)) * 32;
                let payload: Vec<u8> = (0..32)
                    .flat_map(|i| {
                        let value = if saturated && i == 5 {
                            u16::MAX
                        } else {
                            sample(code, start + i)
                        };
                        value.to_le_bytes()
                    })
                    .collect();
                reply.extend(escape_frame(&build_frame(0xA0, index, &payload, self.checkbyte)));
            }
        } else {
            return;
        }
        self.outbox.extend(reply);
        self.reply_started = Some(Instant::now());
        self.delivered = 0;
    }

    fn visible(&self) -> usize {
        let Some(started) = self.reply_started else {
            return 0;
        };
        let allowed = (started.elapsed().as_millis() as usize + 1) * self.bytes_per_ms;
        allowed.saturating_sub(self.delivered).min(self.outbox.len())
    }
}

impl SerialLink for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> trios_rs::Result<()> {
        if self.fail_open {
            return Err(DriverError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        self.open = true;
        self.open_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.close_count += 1;
    }

    fn write(&mut self, bytes: &[u8]) -> trios_rs::Result<()> {
        self.written.push(bytes.to_vec());
        if self.fail_write == Some(self.written.len()) {
            return Err(DriverError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "sensor unplugged",
            )));
        }
        self.reply(bytes);
        Ok(())
    }

    fn bytes_available(&mut self) -> trios_rs::Result<usize> {
        Ok(self.visible())
    }

    fn read(&mut self, n: usize) -> trios_rs::Result<Vec<u8>> {
        let n = n.min(self.visible());
        self.delivered += n;
        Ok(self.outbox.drain(..n).collect())
    }

    fn flush_input(&mut self) -> trios_rs::Result<()> {
        self.flush_count += 1;
        self.outbox.clear();
        Ok(())
    }
}

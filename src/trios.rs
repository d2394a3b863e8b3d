//! Acquisition controller for TriOS/Ramses radiometers.
//!
//! One call to [`Ramses::acquire`] owns the serial link from start to end:
//!
//! 1. the link is opened,
//! 2. the sensor is identified from its Information frame,
//! 3. one spectrum is measured per repetition,
//! 4. the link is closed again, whatever happened before.
//!
//! # Integration time
//!
//! The sensor either picks its own integration time (code 0), uses a fixed
//! code (1-12, roughly `2^(code + 1)` ms), or the host ramps the code up and
//! checks each spectrum for saturated pixels. See [`RampPolicy`] for how the
//! ramp decides which attempt to keep.
//!
//! # Failures
//!
//! Nothing here returns `Err` to the caller. Port and identification problems
//! end the call with an error message; a short or partial spectrum only marks
//! its own repetition (see [`SpectrumStatus`]).

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Serialize, Serializer};

use crate::command::{
    identify_command, measure_command, CommandResponse, CommandSession, DATA_PAYLOAD_BYTES,
    ID_PAYLOAD_BYTES, MAX_INTEGRATION_CODE, MAX_IPS_CHANNEL,
};
use crate::errors::{AcquisitionError, DriverError};
use crate::frame::Frame;
use crate::port::{PortSettings, SerialLink, SerialPortLink};
use crate::spectrum::{self, Spectrum, SpectrumStatus, FRAMES_PER_SPECTRUM};

// ============================================================================
// Configuration
// ============================================================================

/// How the integration-time ramp picks the attempt it keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RampPolicy {
    /// Climb from code 1 while spectra stay clean and keep the last clean
    /// one. The first saturated attempt pushes the counter past the maximum,
    /// which ends the ramp.
    #[default]
    LongestUnsaturated,
    /// Skip saturated codes and stop at the first clean attempt.
    FirstUnsaturated,
}

/// Integration-time strategy of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationTime {
    /// Let the sensor choose (code 0).
    #[default]
    Sensor,
    /// Fixed code 1-12.
    Fixed(u8),
    /// Host-side ramp over codes `1..=max`.
    Ramp { max: u8, policy: RampPolicy },
}

impl IntegrationTime {
    /// Map the legacy integer options: `-1` ramps up to `|int_max|`, `0` is
    /// sensor automatic, `1..=12` fixed.
    pub fn from_code(code: i32, int_max: i32) -> Result<Self, AcquisitionError> {
        let integration = match code {
            -1 => {
                let max = int_max.unsigned_abs();
                let max = u8::try_from(max).unwrap_or(u8::MAX);
                IntegrationTime::Ramp {
                    max,
                    policy: RampPolicy::default(),
                }
            }
            0 => IntegrationTime::Sensor,
            1..=12 => IntegrationTime::Fixed(code as u8),
            _ => {
                return Err(AcquisitionError::InvalidOption {
                    option: "int_time",
                    value: code.into(),
                })
            }
        };
        integration.validate()?;
        Ok(integration)
    }

    /// Legacy integer code of this strategy (`-1` for a ramp).
    pub fn code(&self) -> i32 {
        match *self {
            IntegrationTime::Sensor => 0,
            IntegrationTime::Fixed(code) => code.into(),
            IntegrationTime::Ramp { .. } => -1,
        }
    }

    fn validate(&self) -> Result<(), AcquisitionError> {
        match *self {
            IntegrationTime::Fixed(code) if code == 0 || code > MAX_INTEGRATION_CODE => {
                Err(AcquisitionError::InvalidOption {
                    option: "int_time",
                    value: code.into(),
                })
            }
            IntegrationTime::Ramp { max, .. } if max == 0 || max > MAX_INTEGRATION_CODE => {
                Err(AcquisitionError::InvalidOption {
                    option: "int_max",
                    value: max.into(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Options of one acquisition call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub integration: IntegrationTime,
    /// IPS box channel (0-4); 0 when the sensor is wired directly.
    pub ips_channel: u8,
    /// Number of spectra to take; values below 1 count as 1.
    pub repeat: u32,
    /// Keep the raw buffer and decoded packets of every repetition.
    pub retain_raw: bool,
    pub session: CommandSession,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            integration: IntegrationTime::default(),
            ips_channel: 0,
            repeat: 1,
            retain_raw: false,
            session: CommandSession::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if self.ips_channel > MAX_IPS_CHANNEL {
            return Err(AcquisitionError::InvalidOption {
                option: "ips_channel",
                value: self.ips_channel.into(),
            });
        }
        self.integration.validate()
    }
}

// ============================================================================
// Results
// ============================================================================

/// Raw material behind one repetition, kept on request.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// Bytes received for the accepted attempt, still escaped.
    pub raw_buffer: Vec<u8>,
    pub packets: Vec<Frame>,
}

/// One repetition of a measurement.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    /// Completeness of the spectrum; serialized as the error message, which
    /// is empty for a valid repetition.
    #[serde(rename = "error", serialize_with = "status_message")]
    pub status: SpectrumStatus,
    pub device_id: String,
    /// Start of the accepted measurement attempt.
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: SystemTime,
    /// Integration code the spectrum was taken with (0 = sensor automatic).
    pub integration_code: u8,
    pub spectrum: Spectrum,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

impl Measurement {
    pub fn error(&self) -> &'static str {
        self.status.message()
    }

    pub fn is_valid(&self) -> bool {
        self.status.is_valid()
    }

    /// Timestamp as fractional seconds since the Unix epoch.
    pub fn unix_time(&self) -> f64 {
        to_unix_seconds(&self.timestamp)
    }
}

fn to_unix_seconds(time: &SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn unix_seconds<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(to_unix_seconds(time))
}

fn status_message<S: Serializer>(
    status: &SpectrumStatus,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(status.message())
}

/// Outcome of one acquisition call.
///
/// `measurements` holds every repetition finished before a failure, so a
/// call that fails mid-way still hands back its earlier spectra.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AcquisitionResult {
    pub error: Option<String>,
    pub measurements: Vec<Measurement>,
}

impl AcquisitionResult {
    pub fn error_flag(&self) -> bool {
        self.error.is_some()
    }
}

/// Lifecycle of a [`Ramses`] acquisition call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    PortOpen,
    Identified,
    Measuring,
    Closed,
}

/// One measurement attempt at a given integration code.
struct Attempt {
    code: u8,
    started: SystemTime,
    response: CommandResponse,
}

// ============================================================================
// Ramses Controller
// ============================================================================

/// Acquisition controller for a TriOS/Ramses sensor on a serial link.
///
/// # Example (Rust)
/// ```ignore
/// let settings = PortSettings::new("/dev/ttyO1");
/// let mut sensor = Ramses::serial(settings, AcquisitionConfig::default());
/// let result = sensor.acquire();
/// if let Some(e) = &result.error {
///     eprintln!("acquisition failed: {e}");
/// }
/// for m in &result.measurements {
///     println!("{} {} {:?}", m.device_id, m.error(), &m.spectrum.as_slice()[..8]);
/// }
/// ```
pub struct Ramses<L: SerialLink> {
    link: L,
    config: AcquisitionConfig,
    state: SessionState,
    device_id: Option<String>,
}

impl Ramses<SerialPortLink> {
    /// Controller for a physical port; the port is opened by `acquire()`.
    pub fn serial(settings: PortSettings, config: AcquisitionConfig) -> Self {
        Self::new(SerialPortLink::new(settings), config)
    }
}

impl<L: SerialLink> Ramses<L> {
    pub fn new(link: L, config: AcquisitionConfig) -> Self {
        Self {
            link,
            config,
            state: SessionState::Idle,
            device_id: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identifier of the sensor found by the last identification.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Identify the sensor and take `repeat` spectra.
    pub fn acquire(&mut self) -> AcquisitionResult {
        self.state = SessionState::Idle;
        self.device_id = None;

        let mut measurements = Vec::new();
        let outcome = self.run(&mut measurements);

        if self.link.is_open() {
            self.link.close();
        }
        self.state = SessionState::Closed;

        match outcome {
            Ok(()) => {
                info!(
                    "Finished {} repetition(s) on {}",
                    measurements.len(),
                    self.link.name()
                );
                AcquisitionResult {
                    error: None,
                    measurements,
                }
            }
            Err(e) => {
                warn!("Acquisition on {} failed: {}", self.link.name(), e);
                AcquisitionResult {
                    error: Some(e.to_string()),
                    measurements,
                }
            }
        }
    }

    fn run(&mut self, measurements: &mut Vec<Measurement>) -> Result<(), AcquisitionError> {
        self.config.validate()?;
        self.open()?;
        let device_id = self.identify()?;

        let repeat = self.config.repeat.max(1);
        for rep in 0..repeat {
            self.state = SessionState::Measuring;
            let measurement = self
                .measure_once(&device_id, rep)
                .map_err(AcquisitionError::Measurement)?;
            measurements.push(measurement);
        }
        Ok(())
    }

    fn open(&mut self) -> Result<(), AcquisitionError> {
        self.link.open().map_err(|source| AcquisitionError::Port {
            port: self.link.name().to_string(),
            source,
        })?;
        if !self.link.is_open() {
            return Err(AcquisitionError::Port {
                port: self.link.name().to_string(),
                source: DriverError::NotReady("port did not open".into()),
            });
        }
        debug!("Connected to {}", self.link.name());
        self.state = SessionState::PortOpen;
        Ok(())
    }

    /// Query the module serial number and derive the device identifier,
    /// e.g. `SAM_8123`. The link must be open.
    pub fn identify(&mut self) -> Result<String, AcquisitionError> {
        let command = identify_command(self.config.ips_channel);
        let response = self
            .config
            .session
            .run(&mut self.link, &command, 1, Some(ID_PAYLOAD_BYTES))
            .map_err(|e| AcquisitionError::Identification(e.to_string()))?;

        let packet = response.packets.first().ok_or_else(|| {
            AcquisitionError::Identification("No identifier packet received".into())
        })?;
        let info = packet.module_info().ok_or_else(|| {
            AcquisitionError::Identification(format!(
                "Expected an information frame, got frame byte {}",
                packet.frame_index()
            ))
        })?;

        let device_id = info.device_id();
        info!("Found {} on {}", device_id, self.link.name());
        self.device_id = Some(device_id.clone());
        self.state = SessionState::Identified;
        Ok(device_id)
    }

    fn measure_once(&mut self, device_id: &str, rep: u32) -> Result<Measurement, DriverError> {
        let attempt = match self.config.integration {
            IntegrationTime::Sensor => self.attempt(0)?,
            IntegrationTime::Fixed(code) => self.attempt(code)?,
            IntegrationTime::Ramp { max, policy } => self.ramp(max, policy)?,
        };

        let spectrum = spectrum::assemble(&attempt.response.packets);
        let status = spectrum.status();
        if status.is_valid() {
            debug!("(sample {}) complete spectrum", rep + 1);
        } else {
            warn!(
                "(sample {}) {}: {} packet(s) received",
                rep + 1,
                status,
                attempt.response.packets.len()
            );
        }

        let diagnostics = self.config.retain_raw.then(|| Diagnostics {
            raw_buffer: attempt.response.raw,
            packets: attempt.response.packets,
        });

        Ok(Measurement {
            status,
            device_id: device_id.to_string(),
            timestamp: attempt.started,
            integration_code: attempt.code,
            spectrum,
            diagnostics,
        })
    }

    /// Trigger one spectrum at `code` and collect its sub-frames.
    fn attempt(&mut self, code: u8) -> Result<Attempt, DriverError> {
        if code == 0 {
            debug!("Using sensor integration time");
        } else {
            debug!(
                "Using integration code {} ({} ms)",
                code,
                1u32 << (u32::from(code) + 1)
            );
        }
        let command = measure_command(self.config.ips_channel, code);
        let started = SystemTime::now();
        let response = self.config.session.run(
            &mut self.link,
            &command,
            FRAMES_PER_SPECTRUM,
            Some(DATA_PAYLOAD_BYTES),
        )?;
        Ok(Attempt {
            code,
            started,
            response,
        })
    }

    /// Ramp the integration code from 1 up to `max`.
    fn ramp(&mut self, max: u8, policy: RampPolicy) -> Result<Attempt, DriverError> {
        let max = u16::from(max);
        let mut code: u16 = 1;
        let mut accepted: Option<Attempt> = None;
        let mut last_saturated: Option<Attempt> = None;

        while code <= max {
            let attempt = self.attempt(code as u8)?;
            if spectrum::any_saturated(&attempt.response.packets) {
                debug!("Reached saturation for integration code {}", code);
                last_saturated = Some(attempt);
                if policy == RampPolicy::LongestUnsaturated {
                    code += max;
                }
            } else {
                accepted = Some(attempt);
                if policy == RampPolicy::FirstUnsaturated {
                    break;
                }
            }
            code += 1;
        }

        if let Some(attempt) = accepted {
            debug!("Keeping integration code {}", attempt.code);
            return Ok(attempt);
        }
        match last_saturated {
            Some(attempt) => {
                warn!(
                    "Still saturated at integration code {}, keeping saturated spectrum",
                    attempt.code
                );
                Ok(attempt)
            }
            None => Err(DriverError::NotReady(format!(
                "integration ramp up to code {max} made no attempt"
            ))),
        }
    }
}

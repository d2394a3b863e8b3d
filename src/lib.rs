//! TriOS/Ramses radiometer driver with optional Python bindings.
//!
//! This crate talks to TriOS sensors (Ramses SAM, SAMIP, IPS boxes, ...) over
//! a serial link: it sends commands, decodes the framed binary replies and
//! turns eight data sub-frames into one 256-pixel spectrum.
//!
//! # Decode pipeline
//!
//! Bytes from the port are collected into one buffer per command. On every
//! poll the whole buffer goes through:
//!
//! 1. [`filter::unescape`]: resolve the `@f @g @e @d` escape pairs,
//! 2. [`buffer::split_frame`]: cut the next complete frame after a `#`,
//! 3. [`frame::decode_frame`]: check the frame and decode header and payload.
//!
//! [`Ramses`] drives this through [`CommandSession`] for identification and
//! for each measurement, including the host-side integration-time ramp.

pub mod buffer;
pub mod command;
pub mod errors;
pub mod filter;
pub mod frame;
pub mod logging;
pub mod module;
pub mod port;
pub mod spectrum;
pub mod trios;

pub use buffer::{parse_buffer, split_frame};
pub use command::{CommandResponse, CommandSession};
pub use errors::*;
pub use frame::{decode_frame, Frame, FrameHeader, FrameKind, ModuleInfo};
pub use module::ModuleType;
pub use port::{PortSettings, SerialLink, SerialPortLink};
pub use spectrum::{Spectrum, SpectrumStatus};
pub use trios::{
    AcquisitionConfig, AcquisitionResult, Diagnostics, IntegrationTime, Measurement, RampPolicy,
    Ramses, SessionState,
};

// ============================================================================
// Python Bindings
// ============================================================================

#[cfg(feature = "python")]
mod python {
    use std::time::Duration;

    use pyo3::exceptions::PyValueError;
    use pyo3::prelude::*;
    use pyo3::types::{PyDict, PyList, PyString};

    use crate::command::CommandSession;
    use crate::frame::{Frame, FrameKind};
    use crate::port::PortSettings;
    use crate::trios::{AcquisitionConfig, IntegrationTime, Measurement, Ramses};
    use crate::{logging, AcquisitionError};

    /// A decoded TriOS frame.
    ///
    /// Attributes:
    ///     frame_type: "data", "information" or "error".
    ///     framebyte: Sub-frame index (7..0 for data, 255 information, 254 error).
    ///     data: Payload as 16-bit unsigned integers.
    ///     serial: Module serial as hex string (information frames only).
    ///     module_type: SAM, FLU, COM, IPS, SAMIP or Unknown (information frames only).
    #[pyclass(name = "Frame", frozen)]
    #[derive(Clone)]
    struct PyFrame {
        #[pyo3(get)]
        frame_type: &'static str,
        #[pyo3(get)]
        framebyte: u8,
        #[pyo3(get)]
        identity1: u8,
        #[pyo3(get)]
        identity2: u8,
        #[pyo3(get)]
        module_id: u8,
        #[pyo3(get)]
        checkbyte: u8,
        #[pyo3(get)]
        n_databytes: usize,
        #[pyo3(get)]
        data: Vec<u16>,
        #[pyo3(get)]
        serial: Option<String>,
        #[pyo3(get)]
        module_type: Option<String>,
    }

    #[pymethods]
    impl PyFrame {
        fn __repr__(&self) -> String {
            format!(
                "Frame(type={}, framebyte={}, words={})",
                self.frame_type,
                self.framebyte,
                self.data.len()
            )
        }

        fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
            let dict = PyDict::new(py);
            dict.set_item("frame_type", self.frame_type)?;
            dict.set_item("framebyte", self.framebyte)?;
            dict.set_item("identity1", self.identity1)?;
            dict.set_item("identity2", self.identity2)?;
            dict.set_item("module_id", self.module_id)?;
            dict.set_item("checkbyte", self.checkbyte)?;
            dict.set_item("n_databytes", self.n_databytes)?;
            dict.set_item("data", self.data.clone())?;
            if let Some(serial) = &self.serial {
                dict.set_item("serial", serial)?;
            }
            if let Some(module_type) = &self.module_type {
                dict.set_item("module_type", module_type)?;
            }
            Ok(dict)
        }
    }

    impl From<Frame> for PyFrame {
        fn from(f: Frame) -> Self {
            let n_databytes = f.payload_len_bytes();
            let (frame_type, serial, module_type) = match &f.kind {
                FrameKind::Data => ("data", None, None),
                FrameKind::Error => ("error", None, None),
                FrameKind::Information(info) => (
                    "information",
                    Some(info.serial_hex()),
                    Some(info.module_type.to_string()),
                ),
            };
            PyFrame {
                frame_type,
                framebyte: f.header.frame_index,
                identity1: f.header.identity1,
                identity2: f.header.identity2,
                module_id: f.header.module_id,
                checkbyte: f.header.checkbyte,
                n_databytes,
                data: f.payload,
                serial,
                module_type,
            }
        }
    }

    /// One measurement repetition.
    ///
    /// Attributes:
    ///     error: Empty string if the spectrum is complete, otherwise the reason.
    ///     device_id: Sensor identifier, e.g. "SAM_8123".
    ///     timestamp: Unix time the measurement was triggered.
    ///     int_time: Integration code used (0 = sensor automatic).
    ///     data: 256 raw counts.
    ///     raw_buffer: Received bytes (only with return_buffer=True).
    ///     packets: Decoded frames (only with return_buffer=True).
    #[pyclass(name = "Measurement", frozen)]
    #[derive(Clone)]
    struct PyMeasurement {
        #[pyo3(get)]
        error: String,
        #[pyo3(get)]
        device_id: String,
        #[pyo3(get)]
        timestamp: f64,
        #[pyo3(get)]
        int_time: u8,
        #[pyo3(get)]
        data: Vec<u16>,
        #[pyo3(get)]
        raw_buffer: Option<Vec<u8>>,
        #[pyo3(get)]
        packets: Option<Vec<PyFrame>>,
    }

    #[pymethods]
    impl PyMeasurement {
        fn __repr__(&self) -> String {
            format!(
                "Measurement(device_id={}, timestamp={:.3}, error={:?})",
                self.device_id, self.timestamp, self.error
            )
        }

        /// Whether the spectrum is complete.
        #[getter]
        fn valid(&self) -> bool {
            self.error.is_empty()
        }

        fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
            let dict = PyDict::new(py);
            dict.set_item("error", &self.error)?;
            dict.set_item("device_id", &self.device_id)?;
            dict.set_item("timestamp", self.timestamp)?;
            dict.set_item("int_time", self.int_time)?;
            dict.set_item("data", self.data.clone())?;
            if let Some(raw) = &self.raw_buffer {
                dict.set_item("raw_buffer", raw.clone())?;
            }
            if let Some(packets) = &self.packets {
                let frames = packets
                    .iter()
                    .map(|p| p.to_dict(py))
                    .collect::<PyResult<Vec<_>>>()?;
                dict.set_item("packets", frames)?;
            }
            Ok(dict)
        }
    }

    impl From<Measurement> for PyMeasurement {
        fn from(m: Measurement) -> Self {
            let error = m.error().to_string();
            let timestamp = m.unix_time();
            let (raw_buffer, packets) = match m.diagnostics {
                Some(d) => (
                    Some(d.raw_buffer),
                    Some(d.packets.into_iter().map(PyFrame::from).collect()),
                ),
                None => (None, None),
            };
            PyMeasurement {
                error,
                device_id: m.device_id,
                timestamp,
                int_time: m.integration_code,
                data: m.spectrum.to_vec(),
                raw_buffer,
                packets,
            }
        }
    }

    fn seconds(option: &str, value: f64) -> Result<Duration, String> {
        Duration::try_from_secs_f64(value)
            .map_err(|e| format!("Invalid {option} option given: {value} ({e})"))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_request(
        port: &str,
        baudrate: u32,
        parity: &str,
        stopbits: u8,
        bytesize: u8,
        xonxoff: bool,
        timeout: f64,
        int_time: i32,
        int_max: i32,
        ips_channel: i64,
        repeat: i64,
        return_buffer: bool,
        require_checkbyte: bool,
        sleep: f64,
        max_time: f64,
    ) -> Result<(PortSettings, AcquisitionConfig), String> {
        let mut settings = PortSettings::new(port).with_xonxoff(xonxoff);
        settings.baud_rate = baudrate;
        settings.parity = PortSettings::parity_from_str(parity).map_err(|e| e.to_string())?;
        settings.stop_bits = PortSettings::stop_bits_from_u8(stopbits).map_err(|e| e.to_string())?;
        settings.data_bits = PortSettings::data_bits_from_u8(bytesize).map_err(|e| e.to_string())?;
        settings.timeout = seconds("timeout", timeout)?;

        let integration = IntegrationTime::from_code(int_time, int_max).map_err(|e| e.to_string())?;
        let ips_channel = u8::try_from(ips_channel).map_err(|_| {
            AcquisitionError::InvalidOption {
                option: "ips_channel",
                value: ips_channel,
            }
            .to_string()
        })?;
        let config = AcquisitionConfig {
            integration,
            ips_channel,
            repeat: repeat.clamp(1, i64::from(u32::MAX)) as u32,
            retain_raw: return_buffer,
            session: CommandSession {
                poll_interval: seconds("sleep", sleep)?,
                max_time: seconds("max_time", max_time)?,
                require_checkbyte,
            },
        };
        config.validate().map_err(|e| e.to_string())?;
        Ok((settings, config))
    }

    /// Identify the sensor on `port` and take `repeat` spectra.
    ///
    /// Returns:
    ///     (False, [Measurement, ...]) on success, or (True, "error message")
    ///     if the port, the sensor id or a measurement cycle failed.
    #[pyfunction]
    #[pyo3(signature = (
        port, baudrate=9600, parity="N", stopbits=1, bytesize=8, xonxoff=false, timeout=0.01,
        int_time=0, int_max=12, ips_channel=0, repeat=1, return_buffer=false,
        require_checkbyte=true, sleep=0.1, max_time=16.0
    ))]
    #[allow(clippy::too_many_arguments)]
    fn trios_single(
        py: Python<'_>,
        port: &str,
        baudrate: u32,
        parity: &str,
        stopbits: u8,
        bytesize: u8,
        xonxoff: bool,
        timeout: f64,
        int_time: i32,
        int_max: i32,
        ips_channel: i64,
        repeat: i64,
        return_buffer: bool,
        require_checkbyte: bool,
        sleep: f64,
        max_time: f64,
    ) -> PyResult<(bool, Py<PyAny>)> {
        let request = build_request(
            port,
            baudrate,
            parity,
            stopbits,
            bytesize,
            xonxoff,
            timeout,
            int_time,
            int_max,
            ips_channel,
            repeat,
            return_buffer,
            require_checkbyte,
            sleep,
            max_time,
        );
        let (settings, config) = match request {
            Ok(request) => request,
            Err(message) => return Ok((true, PyString::new(py, &message).into_any().unbind())),
        };

        let result = py.detach(move || Ramses::serial(settings, config).acquire());
        if let Some(message) = result.error {
            return Ok((true, PyString::new(py, &message).into_any().unbind()));
        }

        let measurements: Vec<PyMeasurement> = result
            .measurements
            .into_iter()
            .map(PyMeasurement::from)
            .collect();
        let list = PyList::new(py, measurements)?;
        Ok((false, list.into_any().unbind()))
    }

    /// Decode every complete frame in a raw serial buffer.
    #[pyfunction]
    #[pyo3(signature = (buffer, require_checkbyte=true))]
    fn parse_buffer(buffer: &[u8], require_checkbyte: bool) -> Vec<PyFrame> {
        crate::buffer::parse_buffer(buffer, require_checkbyte)
            .into_iter()
            .map(PyFrame::from)
            .collect()
    }

    /// Set the minimum level of records forwarded to Python logging.
    #[pyfunction]
    #[pyo3(signature = (level=None))]
    fn set_log_level(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        if let Some(name) = level {
            if logging::parse_level(Some(name)).is_none() {
                return Err(PyValueError::new_err(format!("Unknown log level {name:?}")));
            }
        }
        logging::set_python_log_level(py, level)
    }

    /// The Python module definition
    #[pymodule]
    fn trios_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
        logging::init_python_logging(m.py())?;

        m.add_function(wrap_pyfunction!(trios_single, m)?)?;
        m.add_function(wrap_pyfunction!(parse_buffer, m)?)?;
        m.add_function(wrap_pyfunction!(set_log_level, m)?)?;
        m.add_class::<PyMeasurement>()?;
        m.add_class::<PyFrame>()?;

        m.add("SPECTRUM_LEN", crate::spectrum::SPECTRUM_LEN)?;
        m.add("MAX_INTEGRATION_CODE", crate::command::MAX_INTEGRATION_CODE)?;

        Ok(())
    }
}

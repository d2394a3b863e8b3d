//! Log initialisation.
//!
//! The crate logs through the `log` facade. Binaries call
//! [`init_rust_logging`] to print records on stderr; the Python extension
//! (feature `python`) installs a bridge that hands every record to Python's
//! `logging` module, one Python logger per Rust module path
//! (`trios_rs::command` becomes `trios_rs.command`).
//!
//! The level comes from `TRIOS_LOG`, then `RUST_LOG`, and defaults to `info`.

use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Parse a level name such as `debug` or `WARN`.
pub fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.trim().parse::<LevelFilter>().ok())
}

/// Level requested through the environment.
pub fn env_level() -> LevelFilter {
    let configured = std::env::var("TRIOS_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok();
    parse_level(configured.as_deref()).unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger used by the binaries. Later calls are no-ops.
pub fn init_rust_logging() {
    RUST_LOG_ONCE.call_once(|| {
        let level = env_level().to_string().to_lowercase();
        let env = Env::default().default_filter_or(level);
        // Another logger may already be installed, e.g. by a test harness.
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(false)
            .try_init();
    });
}

#[cfg(feature = "python")]
pub use bridge::{init_python_logging, reset_python_logging_cache, set_python_log_level};

#[cfg(feature = "python")]
mod bridge {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use once_cell::sync::OnceCell;
    use pyo3::prelude::*;

    static BRIDGE: OnceCell<&'static PythonBridge> = OnceCell::new();

    /// Forwards `log` records to Python loggers.
    struct PythonBridge {
        max_level: Mutex<LevelFilter>,
        loggers: Mutex<HashMap<String, Py<PyAny>>>,
    }

    /// Numeric level of Python's `logging` module.
    fn python_level(level: Level) -> u32 {
        match level {
            Level::Error => 40,
            Level::Warn => 30,
            Level::Info => 20,
            Level::Debug => 10,
            Level::Trace => 5,
        }
    }

    impl PythonBridge {
        fn max_level(&self) -> LevelFilter {
            *self.max_level.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn logger<'py>(&self, py: Python<'py>, name: &str) -> PyResult<Bound<'py, PyAny>> {
            let mut loggers = self.loggers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(logger) = loggers.get(name) {
                return Ok(logger.bind(py).clone());
            }
            let logger = py
                .import("logging")?
                .call_method1("getLogger", (name,))?;
            loggers.insert(name.to_string(), logger.clone().unbind());
            Ok(logger)
        }

        fn forward(&self, record: &Record) {
            let name = record.target().replace("::", ".");
            let level = python_level(record.level());
            let message = record.args().to_string();

            Python::attach(|py| {
                let sent = self.logger(py, &name).and_then(|logger| {
                    if logger.call_method1("isEnabledFor", (level,))?.is_truthy()? {
                        logger.call_method1("log", (level, message))?;
                    }
                    Ok(())
                });
                if let Err(e) = sent {
                    e.print(py);
                }
            });
        }
    }

    impl Log for PythonBridge {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.max_level()
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                self.forward(record);
            }
        }

        fn flush(&self) {}
    }

    /// Route Rust log records into Python's `logging`. Safe to call repeatedly.
    pub fn init_python_logging(py: Python<'_>) -> PyResult<()> {
        let level = super::env_level();
        BRIDGE.get_or_try_init(|| -> PyResult<&'static PythonBridge> {
            py.import("logging")?;
            let bridge: &'static PythonBridge = Box::leak(Box::new(PythonBridge {
                max_level: Mutex::new(level),
                loggers: Mutex::new(HashMap::new()),
            }));
            if log::set_logger(bridge).is_ok() {
                log::set_max_level(level);
            }
            Ok(bridge)
        })?;
        Ok(())
    }

    /// Forget cached Python loggers, e.g. after reconfiguring Python logging.
    pub fn reset_python_logging_cache() {
        if let Some(bridge) = BRIDGE.get() {
            bridge
                .loggers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }
    }

    /// Change the minimum forwarded level; `None` re-reads the environment.
    pub fn set_python_log_level(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        init_python_logging(py)?;
        let level = super::parse_level(level).unwrap_or_else(super::env_level);
        if let Some(bridge) = BRIDGE.get() {
            *bridge.max_level.lock().unwrap_or_else(|e| e.into_inner()) = level;
        }
        reset_python_logging_cache();
        log::set_max_level(level);
        Ok(())
    }
}

//! Per-link logging with process-wide defaults.
//!
//! Every link owns a [`Logger`] derived from the process-wide defaults for
//! level, writer, and coloring. The formatter injects the slash-joined
//! link path into each record:
//!
//! ```text
//! time=2026-08-02T12:00:00Z level=INFO link=my-chain/StrLink msg=test
//! ```
//!
//! A global lock serializes record emission so interleaved tasks never
//! shear lines.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Log severity. `None` disables all output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures.
    Error,
    /// Nothing is emitted.
    None,
}

impl LogLevel {
    /// Parses a level name (`debug`, `info`, `warn`, `error`, `none`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::None => "NONE",
        };
        write!(f, "{name}")
    }
}

fn level_color(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "\x1b[90m",
        LogLevel::Info => "\x1b[32m",
        LogLevel::Warn => "\x1b[33m",
        LogLevel::Error => "\x1b[31m",
        LogLevel::None => "",
    }
}

/// A cloneable writer handle shared between loggers, sinks, and tests.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedWriter {
    /// Wraps any writer.
    #[must_use]
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// A handle to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Creates (truncating) a file and wraps it.
    pub fn file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(Self::new(std::fs::File::create(path)?))
    }

    /// Writes raw bytes.
    pub fn write_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.inner.lock();
        writer.write_all(bytes)?;
        writer.flush()
    }

    /// Writes a line.
    pub fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.inner.lock();
        writeln!(writer, "{line}")?;
        writer.flush()
    }
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedWriter")
    }
}

/// An in-memory capture target for asserting on log or sink output.
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

struct CaptureTarget(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CaptureBuffer {
    /// Creates an empty capture buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer feeding this buffer.
    #[must_use]
    pub fn writer(&self) -> SharedWriter {
        SharedWriter::new(CaptureTarget(self.bytes.clone()))
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

struct LogDefaults {
    level: LogLevel,
    writer: SharedWriter,
    color: bool,
}

fn defaults() -> &'static Mutex<LogDefaults> {
    static DEFAULTS: OnceLock<Mutex<LogDefaults>> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        Mutex::new(LogDefaults {
            level: LogLevel::Info,
            writer: SharedWriter::stdout(),
            color: false,
        })
    })
}

/// Sets the process-wide default level for loggers created afterwards.
pub fn set_default_level(level: LogLevel) {
    defaults().lock().level = level;
}

/// Sets the process-wide default writer for loggers created afterwards.
pub fn set_default_writer(writer: SharedWriter) {
    defaults().lock().writer = writer;
}

/// Sets the process-wide default coloring for loggers created afterwards.
pub fn set_default_color(color: bool) {
    defaults().lock().color = color;
}

fn emission_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct LoggerInner {
    link_path: RwLock<String>,
    level: RwLock<LogLevel>,
    writer: RwLock<SharedWriter>,
    color: RwLock<bool>,
}

/// A per-link logger. Cloning shares level, writer, and path.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Creates a logger from the process-wide defaults.
    #[must_use]
    pub fn new() -> Self {
        let defaults = defaults().lock();
        Self {
            inner: Arc::new(LoggerInner {
                link_path: RwLock::new(String::new()),
                level: RwLock::new(defaults.level),
                writer: RwLock::new(defaults.writer.clone()),
                color: RwLock::new(defaults.color),
            }),
        }
    }

    /// Sets the link path injected into every record.
    pub fn set_link_path(&self, path: &str) {
        *self.inner.link_path.write() = path.to_string();
    }

    /// Sets the minimum level.
    pub fn set_level(&self, level: LogLevel) {
        *self.inner.level.write() = level;
    }

    /// Replaces the destination writer.
    pub fn set_writer(&self, writer: SharedWriter) {
        *self.inner.writer.write() = writer;
    }

    /// Enables or disables ANSI coloring of the level token.
    pub fn set_color(&self, color: bool) {
        *self.inner.color.write() = color;
    }

    /// The current minimum level.
    #[must_use]
    pub fn level(&self) -> LogLevel {
        *self.inner.level.read()
    }

    /// Logs at debug level.
    pub fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg, &[]);
    }

    /// Logs at info level.
    pub fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg, &[]);
    }

    /// Logs at warn level.
    pub fn warn(&self, msg: &str) {
        self.log(LogLevel::Warn, msg, &[]);
    }

    /// Logs at error level.
    pub fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg, &[]);
    }

    /// Logs a record with key-value fields.
    pub fn log(&self, level: LogLevel, msg: &str, fields: &[(&str, String)]) {
        if level == LogLevel::None || level < self.level() {
            return;
        }

        let mut record = format!(
            "time={} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
        );
        if *self.inner.color.read() {
            record.push_str(&format!(
                "level={}{}\x1b[0m",
                level_color(level),
                level
            ));
        } else {
            record.push_str(&format!("level={level}"));
        }
        let path = self.inner.link_path.read();
        if !path.is_empty() {
            record.push_str(&format!(" link={path}"));
        }
        record.push_str(&format!(" msg={}", quote(msg)));
        for (key, value) in fields {
            record.push_str(&format!(" {key}={}", quote(value)));
        }

        let writer = self.inner.writer.read().clone();
        let _guard = emission_lock().lock();
        let _ = writer.write_line(&record);
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.contains([' ', '"', '=']) {
        format!("{value:?}")
    } else {
        value.to_string()
    }
}

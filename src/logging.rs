//! Explicit logging handles.
//!
//! Components never reach for a process-wide logger. Each one is handed a
//! [`Logger`] when it is constructed and emits through it, either synchronously
//! with [`Logger::in_scope`] or by wrapping the futures it spawns with
//! [`Logger::instrument`]. A binary builds one logger at startup with
//! [`Logger::from_config`] and keeps the returned [`LogGuard`] alive until exit,
//! which flushes the non-blocking writer.
//!
//! Records are single-line JSON objects:
//!
//! ```text
//! {"a":5,"b":3,"level":"DEBUG","message":"Add operation performed","result":8,"time":"2024-05-01T10:00:00.000000Z"}
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

use crate::errors::LogInitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub output: LogOutput,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Stdout,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn parse_level(raw: &str) -> Result<Level, LogInitError> {
        raw.trim()
            .parse::<Level>()
            .map_err(|_| LogInitError::InvalidLevel(raw.to_string()))
    }
}

/// Keeps the background writer alive; pending records are flushed on drop.
#[derive(Debug)]
pub struct LogGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Default for Logger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Logger {
    pub fn from_config(config: &LogConfig) -> (Self, LogGuard) {
        let (writer, guard) = match config.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        };
        (
            Self::with_writer(config.level, writer),
            LogGuard { _guard: guard },
        )
    }

    /// A logger writing JSON records at `level` and above to `writer`.
    pub fn with_writer<W>(level: Level, writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .event_format(JsonRecord)
            .with_writer(writer)
            .with_max_level(level)
            .finish();
        Self {
            dispatch: Dispatch::new(subscriber),
        }
    }

    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    pub fn instrument<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch.clone())
    }
}

/// Formats one event as a JSON object with `time`, `level` and `message` keys
/// followed by the event's own fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecord;

impl<S, N> FormatEvent<S, N> for JsonRecord
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut time = String::new();
        SystemTime.format_time(&mut Writer::new(&mut time))?;

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let mut record = Map::new();
        record.insert("time".to_string(), Value::String(time));
        record.insert(
            "level".to_string(),
            Value::String(event.metadata().level().to_string()),
        );
        record.insert("message".to_string(), Value::String(fields.message));
        record.extend(fields.values);

        let line = serde_json::to_string(&record).map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    values: Map<String, Value>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
        } else {
            self.values.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}

/// In-memory sink, mostly useful for asserting on emitted records.
#[derive(Debug, Clone, Default)]
pub struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Every captured line that parses as a JSON record.
    pub fn records(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl io::Write for CaptureWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info, warn};

    #[test]
    fn records_use_time_level_message_keys() {
        let capture = CaptureWriter::new();
        let logger = Logger::with_writer(Level::DEBUG, capture.clone());

        logger.in_scope(|| info!(peer = "127.0.0.1:9", attempts = 2u64, "connection open"));

        let records = capture.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["message"], "connection open");
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["peer"], "127.0.0.1:9");
        assert_eq!(record["attempts"], 2);
        assert!(record["time"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[test]
    fn level_filter_drops_verbose_records() {
        let capture = CaptureWriter::new();
        let logger = Logger::with_writer(Level::WARN, capture.clone());

        logger.in_scope(|| {
            debug!("hidden");
            info!("hidden too");
            warn!("shown");
        });

        let records = capture.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["message"], "shown");
    }

    #[test]
    fn loggers_do_not_share_state() {
        let first = CaptureWriter::new();
        let second = CaptureWriter::new();
        let a = Logger::with_writer(Level::INFO, first.clone());
        let _b = Logger::with_writer(Level::INFO, second.clone());

        a.in_scope(|| info!("only in first"));

        assert_eq!(first.records().len(), 1);
        assert!(second.records().is_empty());
    }

    #[test]
    fn disabled_logger_swallows_everything() {
        Logger::disabled().in_scope(|| info!("nowhere"));
    }

    #[tokio::test]
    async fn instrumented_futures_log_through_the_handle() {
        let capture = CaptureWriter::new();
        let logger = Logger::with_writer(Level::INFO, capture.clone());

        let task = tokio::spawn(logger.instrument(async {
            tokio::task::yield_now().await;
            info!(step = 1i64, "inside task");
        }));
        task.await.unwrap();

        let records = capture.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["step"], 1);
    }

    #[test]
    fn parses_levels() {
        assert_eq!(LogConfig::parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(LogConfig::parse_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(
            LogConfig::parse_level("chatty"),
            Err(LogInitError::InvalidLevel(_))
        ));
    }
}

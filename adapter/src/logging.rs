// Logging setup
//
// stdout carries the protocol, so logs go to stderr. On top of that a launch
// or attach can raise or lower the level, add a JSON log file, and once a
// client is connected INFO-and-above lines are forwarded to its console.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{Level, Metadata};
use tracing_subscriber::{
    filter::filter_fn,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::client::DapClient;
use crate::error::{AdapterError, AdapterResult};

const DEFAULT_FILTER: &str = "kotlin_debug_adapter=info,jdwp_wire=info,warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    DeepTrace,
    All,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace | LogLevel::DeepTrace | LogLevel::All => "trace",
        }
    }

    fn filter(&self) -> EnvFilter {
        match self {
            LogLevel::None => EnvFilter::new("off"),
            level => {
                let l = level.directive();
                EnvFilter::new(format!("kotlin_debug_adapter={l},jdwp_wire={l},warn"))
            }
        }
    }
}

impl FromStr for LogLevel {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(LogLevel::None),
            "ERROR" => Ok(LogLevel::Error),
            "WARN" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            "DEEP_TRACE" => Ok(LogLevel::DeepTrace),
            "ALL" => Ok(LogLevel::All),
            _ => Err(AdapterError::ProtocolArgument(format!("unknown log level {}", s))),
        }
    }
}

/// A file that can be attached after the subscriber is installed
#[derive(Clone, Default)]
struct FileSink(Arc<Mutex<Option<File>>>);

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut file) = self.0.lock() {
            if let Some(file) = file.as_mut() {
                file.write_all(buf)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Ok(mut file) = self.0.lock() {
            if let Some(file) = file.as_mut() {
                file.flush()?;
            }
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for FileSink {
    type Writer = FileSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Sends each formatted line to the client as console output
#[derive(Clone, Default)]
struct ConsoleSink(Arc<Mutex<Option<DapClient>>>);

impl Write for ConsoleSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let client = self.0.lock().ok().and_then(|c| c.clone());
        if let Some(client) = client {
            client.output("console", String::from_utf8_lossy(buf).into_owned());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ConsoleSink {
    type Writer = ConsoleSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Lines produced while sending to the client must not be sent to the client
fn forward_to_console(meta: &Metadata<'_>) -> bool {
    *meta.level() <= Level::INFO
        && !meta.target().starts_with("kotlin_debug_adapter::server")
        && !meta.target().starts_with("kotlin_debug_adapter::client")
}

#[derive(Clone)]
pub struct LoggingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    json_file: FileSink,
    console: ConsoleSink,
}

impl LoggingHandle {
    pub fn set_level(&self, level: LogLevel) -> AdapterResult<()> {
        self.filter
            .reload(level.filter())
            .map_err(|e| io::Error::other(format!("could not change log level: {}", e)))?;
        Ok(())
    }

    /// Start appending JSON log records to `path`
    pub fn enable_json_file(&self, path: &Path) -> AdapterResult<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut current) = self.json_file.0.lock() {
            *current = Some(file);
        }
        Ok(())
    }

    pub fn connect_console(&self, client: DapClient) {
        if let Ok(mut current) = self.console.0.lock() {
            *current = Some(client);
        }
    }
}

/// Install the global subscriber. A second call leaves the first one in place.
pub fn init() -> LoggingHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let (filter, handle) = reload::Layer::new(filter);

    let json_file = FileSink::default();
    let console = ConsoleSink::default();

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(true)
        .compact();

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_file.clone())
        .with_current_span(false);

    let console_layer = fmt::layer()
        .with_writer(console.clone())
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .with_filter(filter_fn(forward_to_console));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init();
    if installed.is_err() {
        // Goes to whichever subscriber won
        tracing::warn!("A tracing subscriber is already installed");
    }

    LoggingHandle {
        filter: handle,
        json_file,
        console,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::callsite::Identifier;
    use tracing::field::FieldSet;
    use tracing::metadata::Kind;

    #[test]
    fn test_log_level_names() {
        assert_eq!("deep_trace".parse::<LogLevel>().unwrap(), LogLevel::DeepTrace);
        assert_eq!("Info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::All.directive(), "trace");
        assert_eq!(LogLevel::None.directive(), "off");
        assert!(matches!(
            "verbose".parse::<LogLevel>(),
            Err(AdapterError::ProtocolArgument(_))
        ));
    }

    struct TestCallsite;
    impl tracing::callsite::Callsite for TestCallsite {
        fn set_interest(&self, _: tracing::subscriber::Interest) {}
        fn metadata(&self) -> &Metadata<'_> {
            unimplemented!()
        }
    }
    static CALLSITE: TestCallsite = TestCallsite;

    fn meta(target: &'static str, level: Level) -> Metadata<'static> {
        Metadata::new(
            "event",
            target,
            level,
            None,
            None,
            None,
            FieldSet::new(&[], Identifier(&CALLSITE)),
            Kind::EVENT,
        )
    }

    #[test]
    fn test_console_forwarding_filter() {
        assert!(forward_to_console(&meta("kotlin_debug_adapter::session", Level::INFO)));
        assert!(forward_to_console(&meta("jdwp_wire::connection", Level::WARN)));
        assert!(!forward_to_console(&meta("kotlin_debug_adapter::session", Level::DEBUG)));
        assert!(!forward_to_console(&meta("kotlin_debug_adapter::server", Level::ERROR)));
    }

    #[test]
    fn test_level_change_without_subscriber_fails() {
        let (layer, filter) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        drop(layer);
        let handle = LoggingHandle {
            filter,
            json_file: FileSink::default(),
            console: ConsoleSink::default(),
        };

        assert!(matches!(handle.set_level(LogLevel::Debug), Err(AdapterError::Io(_))));
    }

    #[test]
    fn test_json_file_receives_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapter.log");

        let mut sink = FileSink::default();
        sink.write_all(b"dropped\n").unwrap();

        let handle_file = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        *sink.0.lock().unwrap() = Some(handle_file);
        sink.write_all(b"{\"level\":\"INFO\"}\n").unwrap();
        sink.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"level\":\"INFO\"}\n");
    }
}

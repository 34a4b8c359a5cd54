//! JSONL and console logging setup for Huddle
//!
//! Every Huddle binary initializes logging through [`HuddleSubscriberBuilder`]
//! so that log output has one shape everywhere:
//!
//! - **JSONL Output**: structured JSON lines for log aggregation (default)
//! - **Pretty Output**: human-readable console output for development
//! - **File Output**: daily/hourly rotation via tracing-appender
//! - **Env Overrides**: `RUST_LOG` replaces the configured default level
//!
//! ```ignore
//! use huddle_logging::{HuddleSubscriberBuilder, LogConfig};
//!
//! // JSONL to stderr
//! let _guard = HuddleSubscriberBuilder::new().init();
//!
//! // Pretty output while developing
//! let _guard = HuddleSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

type Subscriber = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Subscriber> + Send + Sync + 'static>;

/// Errors from logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Builder for configuring and initializing the Huddle logging subscriber
///
/// By default, console output is JSONL. Use `LogConfig::development()` for
/// pretty output.
pub struct HuddleSubscriberBuilder {
    config: LogConfig,
}

impl HuddleSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Use pretty console output instead of JSONL
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.config.console.pretty = pretty;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Initialize the subscriber globally.
    ///
    /// Returns a guard that must be kept alive while file output is in use.
    /// Initialization failures are reported on stderr and leave logging off.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {}", e);
                None
            }
        }
    }

    /// Try to initialize the subscriber globally
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            layers.push(self.console_layer());
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(jsonl_layer(&self.config.jsonl, writer));
            guard = Some(file_guard);
        }

        Registry::default()
            .with(env_filter)
            .with(layers)
            .try_init()?;

        Ok(guard)
    }

    fn console_layer(&self) -> BoxedLayer {
        if self.config.console.pretty {
            tracing_subscriber::fmt::layer()
                .with_ansi(self.config.console.ansi)
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            jsonl_layer(&self.config.jsonl, std::io::stderr)
        }
    }
}

impl Default for HuddleSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn jsonl_layer<W>(jsonl: &JsonlConfig, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(jsonl.include_current_span)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_thread_ids(jsonl.include_thread_info)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_writer(writer)
        .boxed()
}

/// Non-blocking writer for file output; `Never` truncates a single file.
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory)?;
            let path = config.directory.join(format!("{}.log", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };
    let appender = RollingFileAppender::new(rotation, &config.directory, &config.prefix);
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to stderr)
pub fn init_default() -> Option<WorkerGuard> {
    HuddleSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    HuddleSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for tests; safe to call from every test
pub fn init_testing() {
    let _ = HuddleSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

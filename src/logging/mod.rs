//! Severity router: fans log lines out to console and file sinks.
//!
//! Each sink carries a minimum threshold. The router decides once, at
//! construction, which severities a sink receives; logging at a severity
//! writes to exactly the sinks registered for it.

mod sink;

pub use sink::{ConsoleSink, FileSink, Sink, SinkError};

use chrono::Local;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error = 0,
    Warning = 1,
    Notice = 2,
    Info = 3,
    Debug = 4,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Error,
        Severity::Warning,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum severity a sink accepts. `All` admits every severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelFilter {
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    All,
}

impl LevelFilter {
    pub fn rank(self) -> u8 {
        match self {
            LevelFilter::Error => 0,
            LevelFilter::Warning => 1,
            LevelFilter::Notice => 2,
            LevelFilter::Info => 3,
            LevelFilter::Debug => 4,
            LevelFilter::All => 5,
        }
    }

    pub fn admits(self, severity: Severity) -> bool {
        (severity as u8) <= self.rank()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level '{0}', expected 0-5 or one of error, warning, notice, info, debug, all")]
pub struct ParseLevelError(String);

impl FromStr for LevelFilter {
    type Err = ParseLevelError;

    /// Accepts a level name or its number (`warning` or `1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let filter = match s.trim().to_ascii_lowercase().as_str() {
            "error" | "0" => LevelFilter::Error,
            "warning" | "warn" | "1" => LevelFilter::Warning,
            "notice" | "2" => LevelFilter::Notice,
            "info" | "3" => LevelFilter::Info,
            "debug" | "4" => LevelFilter::Debug,
            "all" | "5" => LevelFilter::All,
            _ => return Err(ParseLevelError(s.to_string())),
        };
        Ok(filter)
    }
}

impl fmt::Display for LevelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LevelFilter::Error => "error",
            LevelFilter::Warning => "warning",
            LevelFilter::Notice => "notice",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::All => "all",
        };
        f.write_str(name)
    }
}

/// Shared handle passed to every component that logs.
pub type Logger = Arc<SeverityRouter>;

pub struct SeverityRouter {
    routes: [Vec<Arc<dyn Sink>>; 5],
}

impl SeverityRouter {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        let mut routes: [Vec<Arc<dyn Sink>>; 5] = std::array::from_fn(|_| Vec::new());
        for sink in sinks {
            let threshold = sink.threshold();
            for severity in Severity::ALL {
                if threshold.admits(severity) {
                    routes[severity.index()].push(sink.clone());
                }
            }
        }
        Self { routes }
    }

    pub fn sink_count(&self, severity: Severity) -> usize {
        self.routes[severity.index()].len()
    }

    pub fn log(&self, severity: Severity, message: impl fmt::Display) {
        let sinks = &self.routes[severity.index()];
        if sinks.is_empty() {
            return;
        }
        let line = format_line(severity, &message.to_string());
        for sink in sinks {
            if let Err(e) = sink.write(&line) {
                eprintln!("hookrelay: log sink write failed: {e}");
            }
        }
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Severity::Error, message);
    }

    pub fn warning(&self, message: impl fmt::Display) {
        self.log(Severity::Warning, message);
    }

    pub fn notice(&self, message: impl fmt::Display) {
        self.log(Severity::Notice, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Severity::Info, message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Severity::Debug, message);
    }
}

fn format_line(severity: Severity, message: &str) -> String {
    format!(
        "[{}][{}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        severity.as_str().to_ascii_uppercase(),
        message
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    /// Sink that keeps lines in memory.
    pub struct MemorySink {
        threshold: LevelFilter,
        pub lines: Mutex<Vec<String>>,
    }

    impl MemorySink {
        pub fn new(threshold: LevelFilter) -> Arc<Self> {
            Arc::new(Self {
                threshold,
                lines: Mutex::new(Vec::new()),
            })
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        pub fn contains(&self, needle: &str) -> bool {
            self.lines().iter().any(|l| l.contains(needle))
        }
    }

    impl Sink for MemorySink {
        fn threshold(&self) -> LevelFilter {
            self.threshold
        }

        fn write(&self, line: &str) -> io::Result<()> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    pub fn memory_logger(threshold: LevelFilter) -> (Logger, Arc<MemorySink>) {
        let sink = MemorySink::new(threshold);
        let router = SeverityRouter::new(vec![sink.clone() as Arc<dyn Sink>]);
        (Arc::new(router), sink)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::memory_logger;
    use super::*;

    #[test]
    fn warning_threshold_receives_error_and_warning_only() {
        let (logger, sink) = memory_logger(LevelFilter::Warning);

        logger.error("e");
        logger.warning("w");
        logger.notice("n");
        logger.info("i");
        logger.debug("d");

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[ERROR] e"));
        assert!(lines[1].ends_with("[WARNING] w"));
    }

    #[test]
    fn all_threshold_receives_every_severity() {
        let (logger, sink) = memory_logger(LevelFilter::All);
        for severity in Severity::ALL {
            logger.log(severity, severity);
        }
        assert_eq!(sink.lines().len(), 5);
    }

    #[test]
    fn sinks_are_registered_per_severity_at_construction() {
        let quiet = testing::MemorySink::new(LevelFilter::Error);
        let loud = testing::MemorySink::new(LevelFilter::Debug);
        let router = SeverityRouter::new(vec![quiet as Arc<dyn Sink>, loud as Arc<dyn Sink>]);

        assert_eq!(router.sink_count(Severity::Error), 2);
        assert_eq!(router.sink_count(Severity::Warning), 1);
        assert_eq!(router.sink_count(Severity::Debug), 1);
    }

    #[test]
    fn router_without_sinks_drops_everything() {
        let router = SeverityRouter::new(Vec::new());
        for severity in Severity::ALL {
            assert_eq!(router.sink_count(severity), 0);
        }
        router.error("nobody listens");
    }

    #[test]
    fn line_format_has_timestamp_and_uppercase_label() {
        let line = format_line(Severity::Notice, "hello");
        // [YYYY-MM-DD HH:MM:SS][NOTICE] hello
        assert_eq!(&line[0..1], "[");
        assert_eq!(&line[20..21], "]");
        assert_eq!(&line[21..], "[NOTICE] hello");
    }

    #[test]
    fn level_filter_parses_names_and_numbers() {
        assert_eq!("warning".parse::<LevelFilter>().unwrap(), LevelFilter::Warning);
        assert_eq!("1".parse::<LevelFilter>().unwrap(), LevelFilter::Warning);
        assert_eq!("ALL".parse::<LevelFilter>().unwrap(), LevelFilter::All);
        assert_eq!("4".parse::<LevelFilter>().unwrap(), LevelFilter::Debug);
        assert!("verbose".parse::<LevelFilter>().is_err());
        assert!("6".parse::<LevelFilter>().is_err());
    }
}

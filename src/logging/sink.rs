use super::LevelFilter;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// A log destination. Receives fully formatted lines.
pub trait Sink: Send + Sync {
    fn threshold(&self) -> LevelFilter;
    fn write(&self, line: &str) -> io::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("can't access log file directory {0}")]
    DirectoryInaccessible(PathBuf),
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct ConsoleSink {
    threshold: LevelFilter,
}

impl ConsoleSink {
    pub fn new(threshold: LevelFilter) -> Self {
        Self { threshold }
    }
}

impl Sink for ConsoleSink {
    fn threshold(&self) -> LevelFilter {
        self.threshold
    }

    fn write(&self, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()
    }
}

/// Appends lines to a file from a background writer thread; `write` never
/// blocks on disk. The file is created if missing; its directory must
/// already exist.
pub struct FileSink {
    threshold: LevelFilter,
    writer: NonBlocking,
    // Flushes pending lines when the sink is dropped.
    _guard: WorkerGuard,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>, threshold: LevelFilter) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(SinkError::DirectoryInaccessible(dir)),
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return Err(SinkError::Open {
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a file name"),
                path,
            });
        };
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(&dir)
            .map_err(|e| SinkError::Open {
                path,
                source: io::Error::other(e),
            })?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        Ok(Self {
            threshold,
            writer,
            _guard: guard,
        })
    }
}

impl Sink for FileSink {
    fn threshold(&self) -> LevelFilter {
        self.threshold
    }

    fn write(&self, line: &str) -> io::Result<()> {
        // One write per line: concurrent lines never interleave.
        let mut writer = self.writer.clone();
        writer.write_all(format!("{line}\n").as_bytes())
    }
}

use crate::LoggingConfig;
use parking_lot::{Mutex, MutexGuard};
use std::io::{self, Write};
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber described by `config`.
///
/// Safe to call more than once: only the first call installs a subscriber, and it is a no-op
/// if the host process already installed its own.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config
            .file
            .as_ref()
            .and_then(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            })
            .map(|file| Arc::new(Mutex::new(file)));
        let file_open_failed = config.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if config.stderr {
            // Test harness output capture only sees `eprint!`; `TestWriter` keeps unit tests
            // quiet in debug builds.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::debug!(
                target: "kestrel.config",
                level = %config.level,
                json = config.json,
                "tracing initialized"
            );
            if file_open_failed {
                if let Some(path) = config.file.as_ref() {
                    tracing::warn!(
                        target: "kestrel.config",
                        path = %path.display(),
                        "failed to open log file; file logging disabled"
                    );
                }
            }
        }
    });
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self.file.lock(),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

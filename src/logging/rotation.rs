// Size-based log rotation.
//
// Rotates `<name>` to `<name>.1`, `<name>.1` to `<name>.2`, and so on up to
// the configured generation count once the active file exceeds the byte
// threshold. Writes past the threshold trigger rotation before the write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::writer::MakeWriter;

struct Inner {
    file: File,
    written: u64,
}

/// Append-mode file writer with size-based generational rotation.
pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    max_generations: usize,
    inner: Mutex<Inner>,
}

impl RotatingFileWriter {
    pub fn open(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        max_generations: usize,
    ) -> io::Result<Arc<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Arc::new(Self {
            path,
            max_bytes,
            max_generations,
            inner: Mutex::new(Inner { file, written }),
        }))
    }

    fn generation_path(&self, generation: usize) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(format!(".{}", generation));
        PathBuf::from(os)
    }

    fn rotate(&self, inner: &mut Inner) -> io::Result<()> {
        inner.file.flush()?;

        // Shift generations upward, dropping the oldest.
        for generation in (1..self.max_generations).rev() {
            let from = self.generation_path(generation);
            if from.exists() {
                let _ = fs::rename(&from, self.generation_path(generation + 1));
            }
        }
        let _ = fs::rename(&self.path, self.generation_path(1));

        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        inner.written = 0;
        Ok(())
    }

    pub fn write_bytes(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if inner.written >= self.max_bytes {
            self.rotate(&mut inner)?;
        }
        let written = inner.file.write(buf)?;
        inner.written += written as u64;
        Ok(written)
    }

    pub fn flush_all(&self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

/// Per-event handle returned by the `MakeWriter` adapter.
pub struct RotatingWriterHandle(Arc<RotatingFileWriter>);

impl Write for RotatingWriterHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_bytes(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush_all()
    }
}

/// Adapter so a rotating writer can back a `tracing_subscriber` fmt layer.
#[derive(Clone)]
pub struct RotatingMakeWriter(Arc<RotatingFileWriter>);

impl RotatingMakeWriter {
    pub fn new(writer: Arc<RotatingFileWriter>) -> Self {
        Self(writer)
    }
}

impl<'a> MakeWriter<'a> for RotatingMakeWriter {
    type Writer = RotatingWriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterHandle(self.0.clone())
    }
}

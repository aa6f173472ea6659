//! Destinations that receive a copy of captured output.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// A sink that receives captured output.
///
/// Readers hand every destination the same ordered sequence of chunks.
/// A destination may accept less than it was given; whatever it refuses is
/// reported as a diagnostic and is never retried.
pub trait Destination: Send {
    /// Write some prefix of `data`, returning how many bytes were accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Flush buffered data to the underlying resource.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Release the underlying resource. Later writes should fail.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Short human-readable name for logs.
    fn describe(&self) -> String {
        "destination".to_string()
    }
}

/// A destination shared between reader threads.
pub type SharedDestination = Arc<Mutex<dyn Destination>>;

/// Wrap a destination for sharing.
pub fn shared_destination<D: Destination + 'static>(destination: D) -> SharedDestination {
    Arc::new(Mutex::new(destination))
}

/// In-memory destination. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<BufferState>>,
}

#[derive(Default)]
struct BufferState {
    data: Vec<u8>,
    closed: bool,
}

impl SharedBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Everything written so far as text (invalid UTF-8 is replaced).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().data).into_owned()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Refuse all further writes.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Returns true once the buffer has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SharedBuffer")
            .field("len", &state.data.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Destination for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to closed buffer",
            ));
        }
        state.data.extend_from_slice(data);
        Ok(data.len())
    }

    fn close(&mut self) -> io::Result<()> {
        SharedBuffer::close(self);
        Ok(())
    }

    fn describe(&self) -> String {
        "buffer".to_string()
    }
}

/// File destination.
#[derive(Debug)]
pub struct FileDestination {
    path: PathBuf,
    file: Option<File>,
}

impl FileDestination {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Open the file at `path` for appending, creating it if needed.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "file destination closed"))
    }
}

impl Destination for FileDestination {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file()?.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Adapter for any [`Write`] implementation.
pub struct WriterDestination<W> {
    writer: W,
    label: String,
}

impl<W: Write + Send> WriterDestination<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            label: "writer".to_string(),
        }
    }

    /// Set the name used in logs.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Destination for WriterDestination<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(unix)]
pub use self::original::OriginalStream;

#[cfg(unix)]
mod original {
    use std::fs::File;
    use std::io::{self, Write};

    use teestream_types::Channel;

    use super::Destination;
    use crate::platform;

    /// The process's current OUT or ERR target, duplicated at creation.
    ///
    /// Create it before a session redirects the channel; afterwards the
    /// duplicate would point back into the session's own pipe.
    #[derive(Debug)]
    pub struct OriginalStream {
        channel: Channel,
        file: File,
    }

    impl OriginalStream {
        /// Duplicate the descriptor currently behind `channel`.
        pub fn new(channel: Channel) -> io::Result<Self> {
            let fd = platform::dup_channel(channel)?;
            Ok(Self {
                channel,
                file: File::from(fd),
            })
        }

        /// Duplicate the current stdout.
        pub fn stdout() -> io::Result<Self> {
            Self::new(Channel::Out)
        }

        /// Duplicate the current stderr.
        pub fn stderr() -> io::Result<Self> {
            Self::new(Channel::Err)
        }
    }

    impl Destination for OriginalStream {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.file.write(data)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }

        fn describe(&self) -> String {
            format!("original {}", self.channel)
        }
    }
}

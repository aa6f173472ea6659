//! Writable per-channel handles.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};

use parking_lot::Mutex;
use teestream_types::{Channel, TextEncoding};

use crate::error::CaptureError;
use crate::CaptureResult;

/// The write end of one channel's pipe.
///
/// Everything written here is read back by the channel's reader, decoded and
/// delivered to the session's destinations. Writes fail with
/// [`CaptureError::ClosedHandle`] once the session is released.
#[derive(Debug)]
pub struct ChannelHandle {
    channel: Channel,
    encoding: Option<TextEncoding>,
    writer: Mutex<Option<File>>,
}

impl ChannelHandle {
    pub(crate) fn new(
        channel: Channel,
        encoding: Option<TextEncoding>,
        write_end: OwnedFd,
    ) -> Self {
        Self {
            channel,
            encoding,
            writer: Mutex::new(Some(File::from(write_end))),
        }
    }

    /// Channel this handle feeds.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Session encoding, or None for binary sessions.
    pub fn encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    /// Write raw bytes into the channel.
    pub fn write_bytes(&self, data: &[u8]) -> CaptureResult<()> {
        let mut writer = self.writer.lock();
        let file = writer.as_mut().ok_or(CaptureError::ClosedHandle)?;
        file.write_all(data)
            .map_err(CaptureError::os("writing to stream handle"))
    }

    /// Write text, encoded in the session encoding (UTF-8 for binary sessions).
    pub fn write_str(&self, text: &str) -> CaptureResult<()> {
        match self.encoding {
            Some(encoding) => self.write_bytes(&encoding.encode(text)),
            None => self.write_bytes(text.as_bytes()),
        }
    }

    /// Flush the handle. Pipe writes are unbuffered, so this only checks
    /// that the handle is still open.
    pub fn flush(&self) -> CaptureResult<()> {
        let mut writer = self.writer.lock();
        let file = writer.as_mut().ok_or(CaptureError::ClosedHandle)?;
        file.flush().map_err(CaptureError::os("flushing stream handle"))
    }

    /// Raw writable descriptor.
    pub fn fileno(&self) -> CaptureResult<RawFd> {
        self.writer
            .lock()
            .as_ref()
            .map(|file| file.as_raw_fd())
            .ok_or(CaptureError::ClosedHandle)
    }

    /// Owned duplicate of the writable descriptor, e.g. for a child's stdio.
    pub fn try_clone_fd(&self) -> CaptureResult<OwnedFd> {
        let writer = self.writer.lock();
        let file = writer.as_ref().ok_or(CaptureError::ClosedHandle)?;
        file.as_fd()
            .try_clone_to_owned()
            .map_err(CaptureError::os("duplicating stream handle"))
    }

    /// Returns true once the session has closed this handle.
    pub fn is_closed(&self) -> bool {
        self.writer.lock().is_none()
    }

    /// Close the write end. Idempotent.
    pub(crate) fn close(&self) {
        self.writer.lock().take();
    }
}

fn to_io_error(err: CaptureError) -> io::Error {
    match err {
        CaptureError::Os { source, .. } => source,
        CaptureError::ClosedHandle => io::Error::new(io::ErrorKind::BrokenPipe, err),
        other => io::Error::other(other),
    }
}

impl Write for &ChannelHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(to_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        ChannelHandle::flush(*self).map_err(to_io_error)
    }
}

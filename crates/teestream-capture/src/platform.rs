//! Unix pipe and descriptor redirection primitives.

use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use teestream_types::Channel;
use tracing::{debug, warn};

use crate::error::CaptureError;
use crate::CaptureResult;

/// Redirection claims, indexed by [`Channel::index`].
static CLAIMED: [AtomicBool; 2] = [AtomicBool::new(false), AtomicBool::new(false)];

static PEEK_SUPPORTED: OnceLock<bool> = OnceLock::new();

/// The process descriptor behind a channel.
pub(crate) fn channel_fd(channel: Channel) -> RawFd {
    match channel {
        Channel::Out => libc::STDOUT_FILENO,
        Channel::Err => libc::STDERR_FILENO,
    }
}

/// Create a pipe; both ends are close-on-exec.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by us.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Duplicate whatever the channel's descriptor currently points at.
pub(crate) fn dup_channel(channel: Channel) -> io::Result<OwnedFd> {
    // SAFETY: the borrow lives only for the duration of the dup call.
    let fd = unsafe { BorrowedFd::borrow_raw(channel_fd(channel)) };
    fd.try_clone_to_owned()
}

fn dup2(src: RawFd, dst: RawFd) -> io::Result<()> {
    loop {
        if unsafe { libc::dup2(src, dst) } >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Number of bytes queued in a pipe, without consuming them.
pub(crate) fn pending_bytes(fd: BorrowedFd<'_>) -> io::Result<usize> {
    let mut count: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::FIONREAD, &mut count as *mut libc::c_int) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Whether pending pipe bytes can be counted on this platform.
///
/// Probed once per process: one byte goes into a scratch pipe and the probe
/// passes only if exactly one byte is reported.
pub fn peek_supported() -> bool {
    *PEEK_SUPPORTED.get_or_init(|| {
        let supported = probe_pending_bytes().unwrap_or(false);
        debug!(supported, "Probed pending-byte inspection");
        supported
    })
}

fn probe_pending_bytes() -> io::Result<bool> {
    let (read, write) = pipe()?;
    let mut writer = std::fs::File::from(write);
    writer.write_all(b"x")?;
    Ok(pending_bytes(read.as_fd())? == 1)
}

fn flush_std(channel: Channel) {
    let result = match channel {
        Channel::Out => io::stdout().flush(),
        Channel::Err => io::stderr().flush(),
    };
    if let Err(e) = result {
        debug!(channel = channel.name(), "Flushing std stream failed: {}", e);
    }
}

/// Exclusive claim on redirecting one process channel.
#[derive(Debug)]
pub(crate) struct ChannelClaim {
    channel: Channel,
}

impl ChannelClaim {
    pub(crate) fn acquire(channel: Channel) -> Option<Self> {
        CLAIMED[channel.index()]
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { channel })
    }
}

impl Drop for ChannelClaim {
    fn drop(&mut self) {
        CLAIMED[self.channel.index()].store(false, Ordering::SeqCst);
    }
}

/// A process channel pointed at a pipe, with the previous target saved.
///
/// The previous target is restored exactly once, by [`restore`](Self::restore)
/// or on drop.
#[derive(Debug)]
pub(crate) struct Redirection {
    channel: Channel,
    saved: Option<OwnedFd>,
    _claim: ChannelClaim,
}

impl Redirection {
    pub(crate) fn install(channel: Channel, target: BorrowedFd<'_>) -> CaptureResult<Self> {
        let claim = ChannelClaim::acquire(channel).ok_or(CaptureError::ChannelBusy(channel))?;

        flush_std(channel);
        let saved = dup_channel(channel).map_err(CaptureError::os("saving output channel"))?;
        dup2(target.as_raw_fd(), channel_fd(channel))
            .map_err(CaptureError::os("redirecting output channel"))?;

        debug!(channel = channel.name(), "Redirected output channel");

        Ok(Self {
            channel,
            saved: Some(saved),
            _claim: claim,
        })
    }

    pub(crate) fn channel(&self) -> Channel {
        self.channel
    }

    pub(crate) fn restore(&mut self) -> CaptureResult<()> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };

        flush_std(self.channel);
        dup2(saved.as_raw_fd(), channel_fd(self.channel))
            .map_err(CaptureError::os("restoring output channel"))?;

        debug!(channel = self.channel.name(), "Restored output channel");
        Ok(())
    }
}

impl Drop for Redirection {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!(channel = self.channel.name(), "Failed to restore output channel: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn test_pipe_round_trip() {
        let (read, write) = pipe().unwrap();
        let mut writer = std::fs::File::from(write);
        writer.write_all(b"abc").unwrap();
        assert_eq!(pending_bytes(read.as_fd()).unwrap(), 3);

        drop(writer);
        let mut out = String::new();
        std::fs::File::from(read).read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_pipe_is_close_on_exec() {
        let (read, _write) = pipe().unwrap();
        let flags = unsafe { libc::fcntl(read.as_raw_fd(), libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_peek_supported_on_linux() {
        assert!(peek_supported());
        assert!(peek_supported());
    }

    #[test]
    fn test_channel_claim_is_exclusive() {
        let claim = ChannelClaim::acquire(Channel::Err).unwrap();
        assert!(ChannelClaim::acquire(Channel::Err).is_none());
        drop(claim);
        assert!(ChannelClaim::acquire(Channel::Err).is_some());
    }
}

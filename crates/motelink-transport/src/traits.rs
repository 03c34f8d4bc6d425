use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// A connected, message-preserving duplex channel.
///
/// Every `send_packet` is delivered as exactly one `recv_packet` on the far
/// side. A `recv_packet` returning `Ok(0)` means the peer closed the channel.
pub trait PacketChannel: Send + Sync {
    /// Send one packet. Returns the number of bytes accepted.
    fn send_packet(&self, packet: &[u8]) -> io::Result<usize>;

    /// Receive one packet into `buf` (blocking). Excess bytes are truncated.
    fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Shut down both directions, waking any blocked receiver.
    fn shutdown(&self) -> io::Result<()>;
}

impl<T: PacketChannel + ?Sized> PacketChannel for Arc<T> {
    fn send_packet(&self, packet: &[u8]) -> io::Result<usize> {
        (**self).send_packet(packet)
    }

    fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv_packet(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        (**self).shutdown()
    }
}

impl<T: PacketChannel + ?Sized> PacketChannel for Box<T> {
    fn send_packet(&self, packet: &[u8]) -> io::Result<usize> {
        (**self).send_packet(packet)
    }

    fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv_packet(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        (**self).shutdown()
    }
}

/// A connected `SOCK_SEQPACKET` socket: L2CAP on Bluetooth, or `AF_UNIX` for
/// bridges and tests.
pub struct ReportStream {
    fd: OwnedFd,
}

impl ReportStream {
    /// Adopt an already-connected seqpacket descriptor.
    ///
    /// This is the hand-off point from whatever established the Bluetooth
    /// link (BlueZ L2CAP `connect` on PSM 0x11 / 0x13).
    pub fn from_fd(fd: OwnedFd) -> Result<Self> {
        let kind = socket_type(fd.as_fd())?;
        if kind != libc::SOCK_SEQPACKET {
            return Err(TransportError::NotSeqPacket(kind));
        }
        Ok(Self { fd })
    }

    pub(crate) fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create a connected pair of in-process seqpacket sockets.
    pub fn pair() -> Result<(Self, Self)> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` is a valid writable array of two c_ints, as required by socketpair(2).
        let rc = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                seqpacket_type(),
                0,
                fds.as_mut_ptr(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: socketpair succeeded, so both descriptors are open and owned by us alone.
        let left = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        // SAFETY: see above.
        let right = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        Ok((Self::from_owned(left), Self::from_owned(right)))
    }

    /// Set the receive timeout. `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.set_timeout(libc::SO_RCVTIMEO, timeout)
    }

    /// Set the send timeout. `None` blocks indefinitely.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.set_timeout(libc::SO_SNDTIMEO, timeout)
    }

    /// Try to clone this stream (duplicates the file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::from_owned(self.fd.try_clone()?))
    }

    fn set_timeout(&self, option: libc::c_int, timeout: Option<Duration>) -> Result<()> {
        let tv = match timeout {
            Some(d) if d.is_zero() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot set a zero duration timeout",
                )
                .into());
            }
            Some(d) => libc::timeval {
                tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
                tv_usec: d.subsec_micros() as libc::suseconds_t,
            },
            None => libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
        };
        // SAFETY: `tv` is a valid timeval and the length matches its size; the fd is open.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                (&tv as *const libc::timeval).cast::<libc::c_void>(),
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl PacketChannel for ReportStream {
    fn send_packet(&self, packet: &[u8]) -> io::Result<usize> {
        loop {
            // SAFETY: `packet` is a valid readable buffer of `packet.len()` bytes.
            let n = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    packet.as_ptr().cast::<libc::c_void>(),
                    packet.len(),
                    send_flags(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: `buf` is a valid writable buffer of `buf.len()` bytes.
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        // SAFETY: the fd is open for the lifetime of `self`.
        let rc = unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RDWR) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOTCONN) {
            return Ok(());
        }
        Err(err)
    }
}

impl AsFd for ReportStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl std::fmt::Debug for ReportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStream")
            .field("fd", &self.fd.as_raw_fd())
            .field("type", &"seqpacket")
            .finish()
    }
}

pub(crate) fn seqpacket_type() -> libc::c_int {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        libc::SOCK_SEQPACKET
    }
}

fn send_flags() -> libc::c_int {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        libc::MSG_NOSIGNAL
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        0
    }
}

fn socket_type(fd: BorrowedFd<'_>) -> Result<libc::c_int> {
    let mut kind: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `kind` and `len` are valid writable pointers for the provided sizes.
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            (&mut kind as *mut libc::c_int).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(kind)
}

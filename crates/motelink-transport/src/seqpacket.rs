use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{seqpacket_type, ReportStream};

/// Listening `AF_UNIX` / `SOCK_SEQPACKET` socket.
///
/// Used to bridge a controller connection across processes: one listener per
/// channel (control and interrupt), each accepting a single peer. The path is
/// removed on drop if it still refers to the socket this listener created.
pub struct SeqPacketListener {
    fd: OwnedFd,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl SeqPacketListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length (`sockaddr_un.sun_path`).
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem path.
    ///
    /// If the path already exists and is a socket, it is removed first.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on a filesystem path with an explicit mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |source: io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        let (addr, addr_len) = sockaddr_un(&path)?;

        // Remove stale socket if it exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            } else {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let fd = new_socket().map_err(bind_err)?;
        // SAFETY: `addr` is a fully initialized sockaddr_un of length `addr_len`.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
                addr_len,
            )
        };
        if rc != 0 {
            return Err(bind_err(io::Error::last_os_error()));
        }
        // SAFETY: the fd is a bound socket owned by us.
        if unsafe { libc::listen(fd.as_raw_fd(), 4) } != 0 {
            return Err(bind_err(io::Error::last_os_error()));
        }

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on seqpacket socket");

        Ok(Self {
            fd,
            created_inode: Some((created.dev(), created.ino())),
            path,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<ReportStream> {
        loop {
            // SAFETY: passing null address pointers is permitted by accept(2).
            let raw = unsafe {
                libc::accept(
                    self.fd.as_raw_fd(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            if raw >= 0 {
                debug!(path = ?self.path, "accepted connection");
                // SAFETY: accept returned a fresh descriptor we now own.
                let fd = unsafe { OwnedFd::from_raw_fd(raw) };
                return Ok(ReportStream::from_owned(fd));
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(TransportError::Accept(err));
            }
        }
    }

    /// Connect to a listening seqpacket socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<ReportStream> {
        let path = path.as_ref();
        let connect_err = |source: io::Error| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        };
        let (addr, addr_len) = sockaddr_un(path)?;
        let fd = new_socket().map_err(connect_err)?;
        // SAFETY: `addr` is a fully initialized sockaddr_un of length `addr_len`.
        let rc = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
                addr_len,
            )
        };
        if rc != 0 {
            return Err(connect_err(io::Error::last_os_error()));
        }
        debug!(?path, "connected to seqpacket socket");
        Ok(ReportStream::from_owned(fd))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SeqPacketListener {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

impl std::fmt::Debug for SeqPacketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqPacketListener")
            .field("path", &self.path)
            .finish()
    }
}

fn new_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call with constant arguments.
    let raw = unsafe { libc::socket(libc::AF_UNIX, seqpacket_type(), 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: socket returned a fresh descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

fn sockaddr_un(path: &Path) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= SeqPacketListener::MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len: bytes.len(),
            max: SeqPacketListener::MAX_PATH_LEN,
        });
    }

    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    let base = std::mem::size_of::<libc::sa_family_t>();
    Ok((addr, (base + bytes.len() + 1) as libc::socklen_t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::PacketChannel;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("motelink-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_bind_accept_connect() {
        let dir = temp_dir("seqpacket");
        let sock_path = dir.join("control.sock");

        let listener = SeqPacketListener::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let handle = std::thread::spawn(move || {
            let client = SeqPacketListener::connect(&path_clone).unwrap();
            client.send_packet(&[0x52, 0x15, 0x00]).unwrap();
        });

        let server = listener.accept().unwrap();
        let mut buf = [0u8; 32];
        let n = server.recv_packet(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x52, 0x15, 0x00]);

        handle.join().unwrap();

        drop(listener);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = SeqPacketListener::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn test_bind_default_permissions_hardened() {
        let dir = temp_dir("seqpacket-perms");
        let sock_path = dir.join("perm.sock");

        let listener = SeqPacketListener::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bind_rejects_existing_non_socket_file() {
        let dir = temp_dir("seqpacket-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = SeqPacketListener::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_connect_missing_path_fails() {
        let dir = temp_dir("seqpacket-missing");
        let result = SeqPacketListener::connect(dir.join("absent.sock"));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }
}

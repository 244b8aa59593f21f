//! Service-manager notification over `$NOTIFY_SOCKET`.
//!
//! When the variable is unset every call is a no-op. Failures are logged
//! and otherwise ignored.

use std::env;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

/// Environment variable naming the notification socket.
pub const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

/// Announces that the process is ready.
pub fn ready() {
    notify("READY=1");
}

/// Announces that the process is shutting down.
pub fn stopping() {
    notify("STOPPING=1");
}

fn notify(state: &str) {
    let Some(socket) = env::var_os(NOTIFY_SOCKET) else {
        return;
    };

    match send(Path::new(&socket), state) {
        Ok(()) => debug!(state, "Service manager notified"),
        Err(e) => warn!(state, error = %e, "Failed to notify service manager"),
    }
}

/// Sends one state datagram to `socket`. A leading `@` names a Linux
/// abstract socket.
#[cfg(unix)]
pub fn send(socket: &Path, state: &str) -> io::Result<()> {
    use std::os::unix::net::UnixDatagram;

    let datagram = UnixDatagram::unbound()?;

    #[cfg(target_os = "linux")]
    {
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::ffi::OsStrExt;
        use std::os::unix::net::SocketAddr;

        if let Some(name) = socket.as_os_str().as_bytes().strip_prefix(b"@") {
            let addr = SocketAddr::from_abstract_name(name)?;
            datagram.send_to_addr(state.as_bytes(), &addr)?;
            return Ok(());
        }
    }

    datagram.send_to(state.as_bytes(), socket)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn send(_socket: &Path, _state: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "service notification requires unix sockets",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixDatagram;

    #[test]
    fn test_send_delivers_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let listener = UnixDatagram::bind(&path).unwrap();

        send(&path, "READY=1").unwrap();

        let mut buf = [0u8; 64];
        let n = listener.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1");
    }

    #[test]
    fn test_send_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(send(&dir.path().join("absent.sock"), "STOPPING=1").is_err());
    }
}

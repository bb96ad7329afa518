// watchdog.rs

use std::{env, io, os::unix::net::UnixDatagram};

use crate::*;

/// Process liveness towards an external supervisor.
pub trait Liveness: Send {
    /// Supervisor timeout, `None` when nobody is watching.
    fn interval(&self) -> Option<Duration>;

    fn notify(&mut self) -> io::Result<()>;
}

/// `sd_notify(3)` over the `NOTIFY_SOCKET` datagram socket.
pub struct SdNotify {
    socket_path: String,
    watchdog: Option<Duration>,
}

impl SdNotify {
    /// `None` when not started by systemd with `Type=notify`.
    pub fn from_env() -> Option<Self> {
        let socket_path = env::var("NOTIFY_SOCKET").ok().filter(|s| !s.is_empty())?;
        let watchdog = watchdog_from_env(
            env::var("WATCHDOG_USEC").ok().as_deref(),
            env::var("WATCHDOG_PID").ok().as_deref(),
            std::process::id(),
        );
        Some(Self { socket_path, watchdog })
    }

    pub fn ready(&self) -> io::Result<()> {
        self.send("READY=1")
    }

    fn send(&self, msg: &str) -> io::Result<()> {
        let sock = UnixDatagram::unbound()?;
        if let Some(name) = self.socket_path.strip_prefix('@') {
            send_abstract(&sock, name, msg)?;
        } else {
            sock.send_to(msg.as_bytes(), &self.socket_path)?;
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn send_abstract(sock: &UnixDatagram, name: &str, msg: &str) -> io::Result<()> {
    use std::os::{linux::net::SocketAddrExt, unix::net::SocketAddr};

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    sock.send_to_addr(msg.as_bytes(), &addr)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_sock: &UnixDatagram, name: &str, _msg: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("abstract notify socket @{name}"),
    ))
}

fn watchdog_from_env(usec: Option<&str>, pid: Option<&str>, my_pid: u32) -> Option<Duration> {
    if let Some(pid) = pid {
        if pid.parse::<u32>().ok() != Some(my_pid) {
            return None;
        }
    }
    let usec = usec?.parse::<u64>().ok()?;
    if usec == 0 {
        return None;
    }
    Some(Duration::from_micros(usec))
}

impl Liveness for SdNotify {
    fn interval(&self) -> Option<Duration> {
        self.watchdog
    }

    fn notify(&mut self) -> io::Result<()> {
        self.send("WATCHDOG=1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_env_parsing() {
        assert_eq!(watchdog_from_env(Some("10000000"), None, 42), Some(Duration::from_secs(10)));
        assert_eq!(watchdog_from_env(Some("10000000"), Some("42"), 42), Some(Duration::from_secs(10)));
        assert_eq!(watchdog_from_env(Some("10000000"), Some("41"), 42), None);
        assert_eq!(watchdog_from_env(Some("0"), None, 42), None);
        assert_eq!(watchdog_from_env(Some("soon"), None, 42), None);
        assert_eq!(watchdog_from_env(None, None, 42), None);
    }

    #[test]
    fn sends_to_socket_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notify.sock");
        let server = UnixDatagram::bind(&path).unwrap();

        let mut sd = SdNotify {
            socket_path: path.to_string_lossy().into_owned(),
            watchdog: Some(Duration::from_secs(4)),
        };
        sd.ready().unwrap();
        sd.notify().unwrap();

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1");
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"WATCHDOG=1");
        assert_eq!(sd.interval(), Some(Duration::from_secs(4)));
    }
}
// EOF

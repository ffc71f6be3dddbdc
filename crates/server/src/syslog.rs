//! Delivery of formatted log records to the local syslog daemon.
//!
//! [`Syslog`] plugs into `tracing_subscriber::fmt` as a writer: every event
//! becomes one datagram on the daemon's unix socket, prefixed with the
//! priority derived from the event level.

use std::io;
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

const SOCKET_PATHS: [&str; 2] = ["/dev/log", "/var/run/syslog"];

/// `user` facility
const FACILITY: u8 = 1;

#[derive(Debug, Clone)]
pub struct Syslog {
    socket: Arc<UnixDatagram>,
    identity: Arc<str>,
    pid: u32,
}

impl Syslog {
    /// Connect to the first syslog socket found on this host.
    pub fn connect(identity: &str) -> io::Result<Self> {
        let mut last = io::Error::new(io::ErrorKind::NotFound, "no syslog socket");
        for path in SOCKET_PATHS {
            let socket = UnixDatagram::unbound()?;
            match socket.connect(path) {
                Ok(()) => return Ok(Self::with_socket(socket, identity)),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    pub fn with_socket(socket: UnixDatagram, identity: &str) -> Self {
        Self {
            socket: Arc::new(socket),
            identity: identity.into(),
            pid: std::process::id(),
        }
    }
}

pub struct SyslogWriter<'a> {
    syslog: &'a Syslog,
    severity: u8,
}

impl io::Write for SyslogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let record = String::from_utf8_lossy(buf);
        let message = format!(
            "<{}>{}[{}]: {}",
            FACILITY * 8 + self.severity,
            self.syslog.identity,
            self.syslog.pid,
            record.trim_end()
        );
        self.syslog.socket.send(message.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Syslog {
    type Writer = SyslogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter {
            syslog: self,
            severity: severity(&Level::INFO),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogWriter {
            syslog: self,
            severity: severity(meta.level()),
        }
    }
}

fn severity(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        _ => 7,
    }
}

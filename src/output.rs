//! `Output` (§6): transport for formatted lines. Every variant is lossy on
//! congestion rather than blocking — an interceptor's job is to wrap one
//! libc call quickly, not to guarantee delivery of telemetry (§1 Non-goals,
//! §5 "Output.send is required to be non-blocking or bounded").

use std::fs::OpenOptions;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};

use spin::Mutex;

use crate::config::{TransportConfig, TransportKind};
use crate::error::{ShimError, ShimResult};

enum Sink {
    Udp(UdpSocket),
    Tcp(Mutex<TcpStream>),
    File(Mutex<std::fs::File>),
}

pub struct Output {
    sink: Sink,
}

impl Output {
    /// `Output::init(cfg)`. Socket/file setup happens once, in the
    /// constructor; failures here are logged and the transport degrades to
    /// a no-op sink rather than aborting library load.
    pub fn init(cfg: &TransportConfig) -> ShimResult<Output> {
        let sink = match cfg.kind {
            TransportKind::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0")
                    .map_err(|_| ShimError::OsQueryFailed("udp bind"))?;
                socket
                    .set_nonblocking(true)
                    .map_err(|_| ShimError::OsQueryFailed("udp set_nonblocking"))?;
                let addr = resolve(&cfg.destination)?;
                socket
                    .connect(addr)
                    .map_err(|_| ShimError::OsQueryFailed("udp connect"))?;
                Sink::Udp(socket)
            }
            TransportKind::Tcp => {
                let addr = resolve(&cfg.destination)?;
                let stream = TcpStream::connect(addr)
                    .map_err(|_| ShimError::OsQueryFailed("tcp connect"))?;
                stream
                    .set_nonblocking(true)
                    .map_err(|_| ShimError::OsQueryFailed("tcp set_nonblocking"))?;
                Sink::Tcp(Mutex::new(stream))
            }
            TransportKind::File => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&cfg.destination)
                    .map_err(|_| ShimError::OsQueryFailed("file open"))?;
                Sink::File(Mutex::new(file))
            }
        };
        Ok(Output { sink })
    }

    /// `Output.send(out, text)` — best-effort, never blocks the caller
    /// beyond a single non-blocking syscall. A `WouldBlock`/congested
    /// destination silently drops the line (§1 Non-goals: no guaranteed
    /// delivery).
    pub fn send(&self, text: &str) -> ShimResult<()> {
        let bytes = text.as_bytes();
        let result = match &self.sink {
            Sink::Udp(socket) => socket.send(bytes).map(|_| ()),
            Sink::Tcp(stream) => stream.lock().write_all(bytes),
            Sink::File(file) => file.lock().write_all(bytes),
        };
        result.map_err(|_| ShimError::EmitFailed)
    }

    /// `Output.send_event(out, event)` — identical transport, just named
    /// separately in §6 because the source distinguishes the statsd metric
    /// path from the structured-event path at the API boundary even though
    /// both end up as bytes on the same sink.
    pub fn send_event(&self, text: &str) -> ShimResult<()> {
        self.send(text)
    }
}

fn resolve(destination: &str) -> ShimResult<std::net::SocketAddr> {
    destination
        .to_socket_addrs()
        .map_err(|_| ShimError::OsQueryFailed("resolve destination"))?
        .next()
        .ok_or(ShimError::OsQueryFailed("resolve destination"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_appends_lines() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cfg = TransportConfig {
            kind: TransportKind::File,
            destination: file.path().to_string_lossy().into_owned(),
        };
        let out = Output::init(&cfg).unwrap();
        out.send("net.port:1|g\n").unwrap();
        out.send("net.tcp:1|g\n").unwrap();
        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(contents, "net.port:1|g\nnet.tcp:1|g\n");
    }

    #[test]
    fn udp_sink_does_not_block_without_a_listener() {
        let cfg = TransportConfig {
            kind: TransportKind::Udp,
            destination: "127.0.0.1:1".to_string(),
        };
        let out = Output::init(&cfg).unwrap();
        // No listener on port 1; a non-blocking connected UDP send should
        // still return promptly rather than hang the test.
        let _ = out.send("net.port:1|g\n");
    }
}

//! apcaccess.rs
//!
//! Client for the apcupsd Network Information Server (NIS).

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, warn};

use crate::frame::{self, FrameError, LENGTH_SIZE};
use crate::status::{self, StatusMap};

/// Command to request status from apcupsd
pub const CMD_STATUS: &str = "status";

/// Error type for apcaccess operations
#[derive(Debug, thiserror::Error)]
pub enum NisError {
    /// The daemon could not be reached; there is no data to report.
    #[error("cannot connect to apcupsd at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Read or write failed once connected, including timeouts.
    #[error("apcupsd I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NisError {
    /// Whether the daemon was unreachable, as opposed to failing mid-exchange.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// Result of one NIS exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub map: StatusMap,
    /// The stream ended before the zero-length terminator. `map` holds
    /// whatever arrived before that.
    pub truncated: bool,
}

/// Raw response bytes and whether the terminator was missing.
struct Response {
    blob: Vec<u8>,
    truncated: bool,
}

/// Send `command` to the apcupsd NIS at `host:port` and parse the reply.
///
/// The connection lives only for this call and is closed on every return
/// path. `timeout` bounds connecting, each write and each read.
pub fn query(host: &str, port: u16, command: &str, timeout: Duration) -> Result<Status, NisError> {
    let request = frame::encode_command(command.as_bytes())?;

    let mut stream = connect(host, port, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    stream.write_all(&request)?;
    let response = read_response(&mut stream)?;

    if response.truncated {
        warn!(
            "apcupsd at {}:{} stopped before the end of the response ({} bytes kept)",
            host,
            port,
            response.blob.len()
        );
    }

    let raw_status = String::from_utf8_lossy(&response.blob);
    let map = status::parse(&raw_status);
    debug!("Parsed {} status fields from {}:{}", map.len(), host, port);

    Ok(Status {
        map,
        truncated: response.truncated,
    })
}

/// Fetch and parse the UPS status from the given host and port.
pub fn fetch_status(host: &str, port: u16, timeout: Duration) -> Result<Status, NisError> {
    query(host, port, CMD_STATUS, timeout)
}

fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, NisError> {
    let addr = format!("{}:{}", host, port);
    let connect_err = |source| NisError::Connect {
        addr: addr.clone(),
        source,
    };

    let mut last_err = None;
    for socket_addr in (host, port).to_socket_addrs().map_err(connect_err)? {
        debug!("Connecting to apcupsd at {}", socket_addr);
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(connect_err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    })))
}

/// Read length-prefixed frames until a zero-length frame or end of stream.
///
/// A timeout or reset once the exchange is under way counts as end of stream:
/// bytes already received are kept and the response is marked truncated.
fn read_response<R: Read>(reader: &mut R) -> Result<Response, NisError> {
    let mut blob = Vec::new();

    loop {
        let mut header = Vec::with_capacity(LENGTH_SIZE);
        if let Err(e) = reader.by_ref().take(LENGTH_SIZE as u64).read_to_end(&mut header) {
            return cut_off(e, blob);
        }
        if header.len() < LENGTH_SIZE {
            return Ok(Response { blob, truncated: true });
        }

        let len = frame::decode_length(&header)?;
        if len == 0 {
            return Ok(Response { blob, truncated: false });
        }

        // read_to_end leaves whatever arrived before an error in `blob`.
        let before = blob.len();
        if let Err(e) = reader.by_ref().take(u64::from(len)).read_to_end(&mut blob) {
            return cut_off(e, blob);
        }
        if blob.len() - before < usize::from(len) {
            return Ok(Response { blob, truncated: true });
        }
    }
}

/// Map a read error to a truncated response, or pass it on.
fn cut_off(err: io::Error, blob: Vec<u8>) -> Result<Response, NisError> {
    match err.kind() {
        io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => {
            debug!("Treating read error as end of response: {}", err);
            Ok(Response { blob, truncated: true })
        }
        _ => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    fn frames(payloads: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for payload in payloads {
            out.extend_from_slice(&frame::encode_command(payload.as_bytes()).unwrap());
        }
        out
    }

    /// Accept one connection, capture the request and answer with `reply`.
    fn fake_apcupsd(reply: Vec<u8>) -> (u16, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut header = [0u8; 2];
            conn.read_exact(&mut header).unwrap();
            let mut command = vec![0u8; usize::from(u16::from_be_bytes(header))];
            conn.read_exact(&mut command).unwrap();
            conn.write_all(&reply).unwrap();
            let mut request = header.to_vec();
            request.extend_from_slice(&command);
            request
        });
        (port, handle)
    }

    /// Reader that yields `data` and then fails with `kind`.
    struct FailingReader {
        data: Cursor<Vec<u8>>,
        kind: io::ErrorKind,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::from(self.kind)),
                n => Ok(n),
            }
        }
    }

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_read_response_until_terminator() {
        let mut wire = frames(&["a: 1\n", "b: 2\n", ""]);
        wire.extend_from_slice(b"ignored");
        let response = read_response(&mut Cursor::new(wire)).unwrap();
        assert_eq!(response.blob, b"a: 1\nb: 2\n");
        assert!(!response.truncated);
    }

    #[test]
    fn test_read_response_eof_before_terminator() {
        let wire = frames(&["a: 1\n"]);
        let response = read_response(&mut Cursor::new(wire)).unwrap();
        assert_eq!(response.blob, b"a: 1\n");
        assert!(response.truncated);
    }

    #[test]
    fn test_read_response_eof_inside_frame() {
        let mut wire = frames(&["a: 1\n"]);
        wire.extend_from_slice(&[0x00, 0x10]);
        wire.extend_from_slice(b"b: 2");
        let response = read_response(&mut Cursor::new(wire)).unwrap();
        assert_eq!(response.blob, b"a: 1\nb: 2");
        assert!(response.truncated);
    }

    #[test]
    fn test_read_response_half_header() {
        let response = read_response(&mut Cursor::new(vec![0x00])).unwrap();
        assert!(response.blob.is_empty());
        assert!(response.truncated);
    }

    #[test]
    fn test_fetch_status_line_per_frame() {
        let reply = frames(&[
            "APC      : 001,036,0876\n",
            "STATUS   : ONLINE\n",
            "BCHARGE  : 100.0 Percent\n",
            "END APC  : 2024-01-02 03:04:05 +0000  \n",
            "",
        ]);
        let (port, server) = fake_apcupsd(reply);
        let status = fetch_status("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        server.join().unwrap();

        let entries: Vec<_> = status.map.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("apc", "001,036,0876"),
                ("status", "ONLINE"),
                ("bcharge", "100.0 Percent"),
                ("end apc", "2024-01-02 03:04:05 +0000"),
            ]
        );
    }

    #[test]
    fn test_query_two_line_frames() {
        let (port, server) = fake_apcupsd(frames(&["a: 1\n", "b: 2\n", ""]));
        let status = query("127.0.0.1", port, CMD_STATUS, Duration::from_secs(5)).unwrap();
        server.join().unwrap();
        let entries: Vec<_> = status.map.iter().collect();
        assert_eq!(entries, vec![("a", "1"), ("b", "2")]);
    }

    #[test]
    fn test_query_truncated_stream_keeps_data() {
        let (port, server) = fake_apcupsd(frames(&["linestatus: ONLINE\n"]));
        let status = query("127.0.0.1", port, CMD_STATUS, Duration::from_secs(5)).unwrap();
        server.join().unwrap();
        assert!(status.truncated);
        assert_eq!(status.map.get("linestatus"), Some("ONLINE"));
    }

    #[test]
    fn test_query_connect_failure() {
        let err = query("127.0.0.1", closed_port(), CMD_STATUS, Duration::from_secs(1)).unwrap_err();
        assert!(err.is_unreachable());
    }

    #[test]
    fn test_query_empty_command() {
        let (port, server) = fake_apcupsd(frames(&[""]));
        let status = query("127.0.0.1", port, "", Duration::from_secs(5)).unwrap();
        assert_eq!(server.join().unwrap(), vec![0x00, 0x00]);
        assert!(status.map.is_empty());
    }

    #[test]
    fn test_query_command_too_long() {
        let command = "x".repeat(usize::from(u16::MAX) + 1);
        let err = query("127.0.0.1", closed_port(), &command, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, NisError::Frame(FrameError::CommandTooLong { .. })));
    }

    #[test]
    fn test_read_response_timeout_keeps_data() {
        for kind in [io::ErrorKind::WouldBlock, io::ErrorKind::TimedOut, io::ErrorKind::ConnectionReset] {
            let mut wire = frames(&["a: 1\n"]);
            wire.extend_from_slice(&[0x00, 0x10]);
            wire.extend_from_slice(b"b: 2");
            let mut reader = FailingReader {
                data: Cursor::new(wire),
                kind,
            };
            let response = read_response(&mut reader).unwrap();
            assert_eq!(response.blob, b"a: 1\nb: 2");
            assert!(response.truncated);
        }
    }

    #[test]
    fn test_read_response_other_errors_abort() {
        let mut reader = FailingReader {
            data: Cursor::new(frames(&["a: 1\n"])),
            kind: io::ErrorKind::InvalidData,
        };
        assert!(matches!(read_response(&mut reader), Err(NisError::Io(_))));
    }

    #[test]
    fn test_query_daemon_stalls_after_first_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut request = [0u8; 8];
            conn.read_exact(&mut request).unwrap();
            conn.write_all(&frames(&["STATUS : ONLINE\n"])).unwrap();
            thread::sleep(Duration::from_secs(3));
        });

        let status = query("127.0.0.1", port, CMD_STATUS, Duration::from_secs(1)).unwrap();
        assert!(status.truncated);
        assert_eq!(status.map.get("status"), Some("ONLINE"));
        server.join().unwrap();
    }
}

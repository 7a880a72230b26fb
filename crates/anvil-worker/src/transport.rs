// Deadline-bounded TCP transport to the controller.
//
// Every blocking operation takes an absolute `Instant` deadline rather than a
// duration: the caller decides how wide the timeout window is and whether
// several operations share it. Exceeding the deadline is a `Timeout`, a peer
// hangup is `Closed`; the session treats both as recoverable but they stay
// distinguishable for diagnostics.

use std::net::SocketAddr;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{timeout_at, Instant};

/// Chunk size for file streaming.
const STREAM_CHUNK: usize = 64 * 1024;

/// Read size for the internal line buffer.
const FILL_CHUNK: usize = 4 * 1024;

/// Transport-level failures. All of them are recoverable by reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("operation exceeded its deadline")]
    Timeout,
    #[error("connection closed by peer")]
    Closed,
    #[error("request line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("cannot allocate a {0}-byte payload buffer")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Socket tuning profile, applied once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneProfile {
    /// Small, frequent control messages: disable Nagle batching.
    Interactive,
    /// Large transfers: leave batching to the kernel.
    Bulk,
}

/// An owned connection to exactly one controller.
///
/// There is no pooling and no multiplexing: the session holds at most one
/// `Connection` and drops it on any failure. Closing is by drop.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    /// Bytes read from the socket but not yet consumed by `read_line`.
    buffer: Vec<u8>,
}

impl Connection {
    /// Resolve `host:port` and connect within `deadline`.
    ///
    /// `window`, when given, sizes the socket send/receive buffers before the
    /// connect so the kernel negotiates the matching TCP window.
    pub async fn connect(
        host: &str,
        port: u16,
        window: Option<u32>,
        deadline: Instant,
    ) -> Result<Connection> {
        let target = format!("{host}:{port}");

        // The resolver iterator is scoped so it does not outlive this block.
        let addr = {
            let mut addrs = timeout_at(deadline, lookup_host(&target))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::Connect {
                    addr: target.clone(),
                    source: e,
                })?;
            addrs.next().ok_or_else(|| TransportError::Connect {
                addr: target.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
            })?
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(size) = window {
            socket.set_recv_buffer_size(size)?;
            socket.set_send_buffer_size(size)?;
        }

        let stream = timeout_at(deadline, socket.connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect {
                addr: target,
                source: e,
            })?;

        tracing::debug!(%addr, "connected to controller");
        Ok(Connection {
            stream,
            peer: addr,
            buffer: Vec::new(),
        })
    }

    /// The controller's address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Apply a tuning profile.
    pub fn tune(&self, profile: TuneProfile) -> Result<()> {
        match profile {
            TuneProfile::Interactive => self.stream.set_nodelay(true)?,
            TuneProfile::Bulk => self.stream.set_nodelay(false)?,
        }
        Ok(())
    }

    /// Write a full text line (the caller includes the trailing newline).
    pub async fn write_line(&mut self, line: &str, deadline: Instant) -> Result<()> {
        self.write_bytes(line.as_bytes(), deadline).await
    }

    /// Write a buffer in full.
    pub async fn write_bytes(&mut self, buf: &[u8], deadline: Instant) -> Result<()> {
        timeout_at(deadline, async {
            self.stream.write_all(buf).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| TransportError::Timeout)??;
        Ok(())
    }

    /// Read one newline-terminated line of at most `max_len` bytes.
    ///
    /// The terminator (and a preceding carriage return, if any) is stripped.
    pub async fn read_line(&mut self, max_len: usize, deadline: Instant) -> Result<String> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                if pos > max_len {
                    return Err(TransportError::LineTooLong(max_len));
                }
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if self.buffer.len() > max_len {
                return Err(TransportError::LineTooLong(max_len));
            }
            self.fill(deadline).await?;
        }
    }

    /// Read exactly `len` raw bytes.
    ///
    /// `len` comes off the wire, so the buffer is reserved fallibly: a length
    /// the host cannot allocate is a `PayloadTooLarge` error, not an abort.
    pub async fn read_bytes(&mut self, len: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut out: Vec<u8> = Vec::new();
        out.try_reserve_exact(len)
            .map_err(|_| TransportError::PayloadTooLarge(len))?;

        let buffered = len.min(self.buffer.len());
        out.extend(self.buffer.drain(..buffered));
        out.resize(len, 0);

        if buffered < len {
            timeout_at(deadline, self.stream.read_exact(&mut out[buffered..]))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
                    _ => TransportError::Io(e),
                })?;
        }
        Ok(out)
    }

    /// Copy up to `length` bytes from the connection into `file`, returning
    /// the number of bytes actually moved. A shortfall (peer hangup) is
    /// reported through the count so the caller can decide; a deadline miss
    /// is a `Timeout`.
    pub async fn stream_to_file(
        &mut self,
        file: &mut File,
        length: u64,
        deadline: Instant,
    ) -> Result<u64> {
        let mut moved: u64 = 0;

        // Payload bytes may already sit in the line buffer.
        if !self.buffer.is_empty() {
            let take = (self.buffer.len() as u64).min(length) as usize;
            let head: Vec<u8> = self.buffer.drain(..take).collect();
            file.write_all(&head).await?;
            moved += take as u64;
        }

        let mut chunk = vec![0u8; STREAM_CHUNK];
        while moved < length {
            let want = ((length - moved) as usize).min(STREAM_CHUNK);
            let n = timeout_at(deadline, self.stream.read(&mut chunk[..want]))
                .await
                .map_err(|_| TransportError::Timeout)??;
            if n == 0 {
                break;
            }
            file.write_all(&chunk[..n]).await?;
            moved += n as u64;
        }

        file.flush().await?;
        Ok(moved)
    }

    /// Copy up to `length` bytes from `file` to the connection, returning the
    /// number of bytes actually moved.
    pub async fn stream_from_file(
        &mut self,
        file: &mut File,
        length: u64,
        deadline: Instant,
    ) -> Result<u64> {
        let mut moved: u64 = 0;
        let mut chunk = vec![0u8; STREAM_CHUNK];

        while moved < length {
            let want = ((length - moved) as usize).min(STREAM_CHUNK);
            let n = file.read(&mut chunk[..want]).await?;
            if n == 0 {
                break;
            }
            timeout_at(deadline, self.stream.write_all(&chunk[..n]))
                .await
                .map_err(|_| TransportError::Timeout)??;
            moved += n as u64;
        }

        timeout_at(deadline, self.stream.flush())
            .await
            .map_err(|_| TransportError::Timeout)??;
        Ok(moved)
    }

    /// Pull more bytes from the socket into the internal buffer.
    async fn fill(&mut self, deadline: Instant) -> Result<()> {
        let mut chunk = [0u8; FILL_CHUNK];
        let n = timeout_at(deadline, self.stream.read(&mut chunk))
            .await
            .map_err(|_| TransportError::Timeout)??;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let deadline = Instant::now() + Duration::from_secs(5);
        let (conn, accepted) = tokio::join!(
            Connection::connect("127.0.0.1", port, None, deadline),
            listener.accept()
        );
        (conn.unwrap(), accepted.unwrap().0)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn read_line_splits_lines() {
        let (mut conn, mut peer) = pair().await;
        peer.write_all(b"first line\nsecond\n").await.unwrap();

        let line = conn.read_line(4096, deadline()).await.unwrap();
        assert_eq!(line, "first line");
        let line = conn.read_line(4096, deadline()).await.unwrap();
        assert_eq!(line, "second");
    }

    #[tokio::test]
    async fn read_line_strips_carriage_return() {
        let (mut conn, mut peer) = pair().await;
        peer.write_all(b"ready\r\n").await.unwrap();
        let line = conn.read_line(4096, deadline()).await.unwrap();
        assert_eq!(line, "ready");
    }

    #[tokio::test]
    async fn read_line_times_out_without_data() {
        let (mut conn, _peer) = pair().await;
        let short = Instant::now() + Duration::from_millis(50);
        let err = conn.read_line(4096, short).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn read_line_reports_closed_on_eof() {
        let (mut conn, peer) = pair().await;
        drop(peer);
        let err = conn.read_line(4096, deadline()).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn read_line_rejects_oversized_line() {
        let (mut conn, mut peer) = pair().await;
        peer.write_all(&[b'x'; 64]).await.unwrap();
        peer.write_all(b"\n").await.unwrap();
        let err = conn.read_line(16, deadline()).await.unwrap_err();
        assert!(matches!(err, TransportError::LineTooLong(16)));
    }

    #[tokio::test]
    async fn read_bytes_drains_line_buffer_first() {
        let (mut conn, mut peer) = pair().await;
        // Header line and payload arrive in one segment.
        peer.write_all(b"work 5\nhello").await.unwrap();

        let line = conn.read_line(4096, deadline()).await.unwrap();
        assert_eq!(line, "work 5");
        let payload = conn.read_bytes(5, deadline()).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn read_bytes_rejects_unallocatable_length() {
        let (mut conn, _peer) = pair().await;
        let err = conn.read_bytes(usize::MAX, deadline()).await.unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn stream_to_file_is_byte_exact() {
        let (mut conn, mut peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let body = vec![7u8; 100_000];
        let expected = body.clone();
        let writer = tokio::spawn(async move {
            peer.write_all(&body).await.unwrap();
            peer
        });

        let mut file = File::create(&path).await.unwrap();
        let moved = conn
            .stream_to_file(&mut file, expected.len() as u64, deadline())
            .await
            .unwrap();
        assert_eq!(moved, expected.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), expected);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn stream_to_file_reports_shortfall() {
        let (mut conn, mut peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");

        peer.write_all(b"abc").await.unwrap();
        drop(peer);

        let mut file = File::create(&path).await.unwrap();
        let moved = conn.stream_to_file(&mut file, 10, deadline()).await.unwrap();
        assert_eq!(moved, 3);
    }

    #[tokio::test]
    async fn stream_from_file_round_trips() {
        let (mut conn, mut peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        let body: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &body).unwrap();

        let len = body.len();
        let reader = tokio::spawn(async move {
            let mut got = vec![0u8; len];
            peer.read_exact(&mut got).await.unwrap();
            got
        });

        let mut file = File::open(&path).await.unwrap();
        let moved = conn
            .stream_from_file(&mut file, len as u64, deadline())
            .await
            .unwrap();
        assert_eq!(moved, len as u64);
        assert_eq!(reader.await.unwrap(), body);
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        // Bind and immediately drop to get a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Connection::connect("127.0.0.1", port, None, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}

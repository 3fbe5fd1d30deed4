/*!
Transport layer.

A [`Transport`] moves whole frames: `send` writes one encoded request completely,
`receive` blocks until one complete reply frame (header plus declared data) has
arrived. [`TcpTransport`] is the production implementation; the simulated
controller in [`crate::sim`] implements the same trait in memory.

[`TcpTransport`] assembles frames in a receive buffer. Bytes that arrive before
a timeout stay buffered, so a reply split across the timeout is completed by
the next `receive` instead of leaving the stream misaligned.
*/

use crate::error::{Result, SnpxError};
use crate::packet::declared_data_len;
use crate::protocol::HEADER_LEN;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

const READ_CHUNK: usize = 4096;

/// Frame-level transport for device communication
pub trait Transport: Send {
    /// Write one complete frame
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Block until one complete frame has been read
    fn receive(&mut self) -> Result<Vec<u8>>;

    /// Close the underlying connection; later calls fail with `ConnectionClosed`
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Read one frame: the fixed header, then the data length it declares
pub fn read_frame<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut frame = vec![0u8; HEADER_LEN];
    reader.read_exact(&mut frame)?;

    let data_len = declared_data_len(&frame);
    if data_len > 0 {
        frame.resize(HEADER_LEN + data_len, 0);
        reader.read_exact(&mut frame[HEADER_LEN..])?;
    }
    Ok(frame)
}

/// Remove the first complete frame from `buffer`, if one is there
pub fn split_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    if buffer.len() < HEADER_LEN {
        return None;
    }
    let total = HEADER_LEN + declared_data_len(&buffer[..HEADER_LEN]);
    if buffer.len() < total {
        return None;
    }
    Some(buffer.drain(..total).collect())
}

/// TCP transport, one socket per session
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    read_timeout: Duration,
    buffer: Vec<u8>,
}

impl TcpTransport {
    /// Open a TCP connection to the controller
    pub fn connect(peer: SocketAddr, connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        info!("🔌 Connecting to {}", peer);

        let socket = Socket::new(Domain::for_address(peer), Type::STREAM, Some(Protocol::TCP))
            .map_err(SnpxError::Connection)?;
        socket
            .connect_timeout(&peer.into(), connect_timeout)
            .map_err(SnpxError::Connection)?;

        let stream: TcpStream = socket.into();
        Self::configure(&stream, read_timeout).map_err(SnpxError::Connection)?;

        info!("✅ Connected to {}", peer);
        Ok(Self {
            stream: Some(stream),
            peer,
            read_timeout,
            buffer: Vec::new(),
        })
    }

    fn configure(stream: &TcpStream, read_timeout: Duration) -> std::io::Result<()> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_write_timeout(Some(read_timeout))?;

        let sock_ref = SockRef::from(stream);
        sock_ref.set_keepalive(true)?;
        Ok(())
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(SnpxError::ConnectionClosed)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let timeout = self.read_timeout;
        trace!("→ {}", hex::encode(frame));
        let stream = self.stream()?;
        stream
            .write_all(frame)
            .and_then(|_| stream.flush())
            .map_err(|e| SnpxError::from_io(e, timeout))
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let timeout = self.read_timeout;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(frame) = split_frame(&mut self.buffer) {
                trace!("← {}", hex::encode(&frame));
                return Ok(frame);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("Timed out with {} bytes of a frame buffered", self.buffer.len());
                return Err(SnpxError::Timeout(timeout));
            }

            let stream = self.stream.as_mut().ok_or(SnpxError::ConnectionClosed)?;
            stream.set_read_timeout(Some(remaining)).map_err(SnpxError::Connection)?;
            match stream.read(&mut chunk) {
                Ok(0) => return Err(SnpxError::ConnectionClosed),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    if !self.buffer.is_empty() {
                        debug!("Keeping {} bytes of a partial frame", self.buffer.len());
                    }
                    return Err(SnpxError::from_io(e, timeout));
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        if let Some(stream) = self.stream.take() {
            debug!("Closing connection to {}", self.peer);
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                // Peer already gone
                Err(e) if e.kind() == ErrorKind::NotConnected => {}
                Err(e) => return Err(SnpxError::Connection(e)),
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Reply;
    use std::io::Cursor;

    #[test]
    fn test_read_frame_with_trailing_data() {
        let mut wire = Reply::ack(1, vec![7u8; 12]).encode().to_vec();
        wire.extend_from_slice(&Reply::ack(2, vec![1]).encode());

        let mut cursor = Cursor::new(wire);
        let first = read_frame(&mut cursor).unwrap();
        assert_eq!(first.len(), HEADER_LEN + 12);
        let second = read_frame(&mut cursor).unwrap();
        assert_eq!(second.len(), HEADER_LEN);
        assert_eq!(second[2], 2);
    }

    #[test]
    fn test_split_frame_waits_for_whole_frame() {
        let first = Reply::ack(1, vec![7u8; 12]).encode().to_vec();
        let second = Reply::ack(2, vec![1]).encode().to_vec();

        let mut buffer = first[..20].to_vec();
        assert!(split_frame(&mut buffer).is_none());
        buffer.extend_from_slice(&first[20..HEADER_LEN + 4]);
        assert!(split_frame(&mut buffer).is_none());

        buffer.extend_from_slice(&first[HEADER_LEN + 4..]);
        buffer.extend_from_slice(&second[..10]);
        assert_eq!(split_frame(&mut buffer).unwrap(), first);
        assert_eq!(buffer, second[..10].to_vec());
    }

    #[test]
    fn test_read_frame_eof_mid_frame() {
        let wire = Reply::ack(1, vec![7u8; 12]).encode();
        let mut cursor = Cursor::new(wire[..HEADER_LEN + 4].to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(
            SnpxError::from_io(err, Duration::from_secs(1)),
            SnpxError::ConnectionClosed
        ));
    }
}

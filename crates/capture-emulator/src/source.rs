//! Frame Source Client
//!
//! Frames arrive over a Unix stream socket, one connection per frame. The
//! peer writes the encoded frame and closes the connection; there is no
//! length prefix, so the end of a frame is the end of the stream.

use std::io::{ErrorKind, Read};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::SourceError;

/// Result of a successful fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetched {
    /// Bytes written into the destination
    pub bytes: usize,
    /// Time from connect to end of frame
    pub latency: Duration,
}

/// Anything that can fill a capture buffer with one frame
pub trait FrameSource: Send {
    /// Fill `dest` with the next frame
    fn fetch(&mut self, dest: &mut [u8]) -> Result<Fetched, SourceError>;
}

/// Frame source backed by a Unix stream socket
#[derive(Debug, Clone)]
pub struct SocketSource {
    path: PathBuf,
    timeout: Duration,
}

impl SocketSource {
    /// Create a source for the given endpoint and per-read timeout
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// Socket endpoint
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn connect(&self) -> Result<UnixStream, SourceError> {
        let stream = UnixStream::connect(&self.path).map_err(|e| {
            error!("Failed to connect to {}: {}", self.path.display(), e);
            SourceError::Connect {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        // A zero duration is rejected by set_read_timeout
        let timeout = self.timeout.max(Duration::from_millis(1));
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        debug!("Connected to socket {}", self.path.display());
        Ok(stream)
    }
}

impl FrameSource for SocketSource {
    fn fetch(&mut self, dest: &mut [u8]) -> Result<Fetched, SourceError> {
        let started = Instant::now();
        let mut stream = self.connect()?;

        let bytes = read_frame(&mut stream, dest, self.timeout_ms()).map_err(|e| {
            error!("Failed to read frame data: {}", e);
            e
        })?;

        let latency = started.elapsed();
        debug!("Fetched frame: {} bytes in {} ms", bytes, latency.as_millis());
        Ok(Fetched { bytes, latency })
    }
}

/// Read one frame: until `dest` is full or the peer closes
///
/// Once `dest` is full a single extra byte is probed for. Extra data is an
/// overflow; end of stream or an idle peer both accept the frame.
pub fn read_frame<R: Read>(reader: &mut R, dest: &mut [u8], timeout_ms: u64) -> Result<usize, SourceError> {
    let mut total = 0;

    while total < dest.len() {
        match reader.read(&mut dest[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(SourceError::Timeout(timeout_ms));
            }
            Err(e) => return Err(SourceError::Connection(e.to_string())),
        }
    }

    if total == 0 {
        return Err(SourceError::Empty);
    }

    if total == dest.len() {
        let mut probe = [0u8; 1];
        loop {
            match reader.read(&mut probe) {
                Ok(0) => break,
                Ok(_) => return Err(SourceError::Overflow { capacity: dest.len() }),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    Ok(total)
}

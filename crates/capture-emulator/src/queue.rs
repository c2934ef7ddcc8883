//! Completion Queue
//!
//! Bounded FIFO of buffer indices whose capture has completed. Never blocks:
//! an empty queue is reported, not waited on. An eventfd in semaphore mode
//! mirrors the queue length so callers can poll() for readiness.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::warn;

use crate::error::DeviceError;

/// Readiness descriptor: one count per queued index
#[derive(Debug)]
struct Readiness {
    fd: OwnedFd,
}

impl Readiness {
    fn new() -> io::Result<Self> {
        // SAFETY: eventfd has no pointer arguments; the result is checked before use
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK | libc::EFD_SEMAPHORE) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd is a freshly created descriptor owned by nobody else
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn signal(&self) -> io::Result<()> {
        let one: u64 = 1;
        // SAFETY: writes exactly 8 bytes from a live u64
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n != std::mem::size_of::<u64>() as isize {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn consume(&self) -> io::Result<()> {
        let mut value: u64 = 0;
        // SAFETY: reads at most 8 bytes into a live u64
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            // A zero count reads as EAGAIN
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Bounded non-blocking queue of completed buffer indices
#[derive(Debug)]
pub struct CompletionQueue {
    tx: mpsc::Sender<usize>,
    rx: mpsc::Receiver<usize>,
    ready: Readiness,
}

impl CompletionQueue {
    /// Create a queue holding at most `capacity` indices
    pub fn new(capacity: usize) -> Result<Self, DeviceError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Ok(Self {
            tx,
            rx,
            ready: Readiness::new()?,
        })
    }

    /// Pollable descriptor, readable while the queue is non-empty
    pub fn raw_fd(&self) -> RawFd {
        self.ready.fd.as_raw_fd()
    }

    /// Entries currently queued
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an index; fails when saturated or closed
    pub fn publish(&self, index: usize) -> Result<(), DeviceError> {
        self.tx.try_send(index).map_err(|e| match e {
            TrySendError::Full(i) => DeviceError::Io(format!("completion queue full, dropping buffer {}", i)),
            TrySendError::Closed(i) => DeviceError::Io(format!("completion queue closed, dropping buffer {}", i)),
        })?;

        if let Err(e) = self.ready.signal() {
            warn!("Failed to signal readiness for buffer {}: {}", index, e);
        }
        Ok(())
    }

    /// Take the oldest index, or None when empty
    pub fn try_pop(&mut self) -> Option<usize> {
        match self.rx.try_recv() {
            Ok(index) => {
                if let Err(e) = self.ready.consume() {
                    warn!("Failed to consume readiness for buffer {}: {}", index, e);
                }
                Some(index)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Remove and return every queued index
    pub fn drain_all(&mut self) -> Vec<usize> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(index) = self.try_pop() {
            drained.push(index);
        }
        drained
    }

    /// Refuse further publishes; queued entries can still be popped
    pub fn close(&mut self) {
        self.rx.close();
    }
}

//! Device State Machine
//!
//! `Emulator` is the context object owning the single emulated device. All
//! operations take one lock, including the socket round trip made by
//! `dequeue`, so the device services one request at a time like real
//! hardware would.

use std::os::fd::RawFd;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::error::DeviceError;
use crate::format::{fourcc_str, FrameFormat};
use crate::pool::{BufferPool, Mapping};
use crate::queue::CompletionQueue;
use crate::source::{FrameSource, SocketSource};

/// Opaque reference to the open device (a pollable descriptor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(RawFd);

impl DeviceHandle {
    pub fn from_raw(fd: RawFd) -> Self {
        Self(fd)
    }

    pub fn as_raw(self) -> RawFd {
        self.0
    }
}

/// Coarse device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    Open,
    Buffered(usize),
    Streaming,
}

/// Snapshot of one buffer's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: usize,
    pub length: usize,
    pub offset: usize,
    pub bytes_used: usize,
    pub mapped: bool,
    pub queued: bool,
    pub sequence: u32,
    pub timestamp: Duration,
}

struct Device {
    handle: DeviceHandle,
    format: FrameFormat,
    pool: BufferPool,
    queue: CompletionQueue,
    streaming: bool,
    sequence: u32,
}

impl Device {
    fn info(&self, index: usize) -> Result<BufferInfo, DeviceError> {
        let buffer = self.pool.get(index)?;
        Ok(BufferInfo {
            index,
            length: buffer.length(),
            offset: buffer.offset(),
            bytes_used: buffer.bytes_used(),
            mapped: buffer.is_mapped(),
            queued: buffer.is_queued(),
            sequence: buffer.sequence(),
            timestamp: buffer.timestamp(),
        })
    }
}

struct Inner {
    source: Box<dyn FrameSource>,
    device: Option<Device>,
}

/// The emulated capture device and everything it owns
pub struct Emulator {
    config: DeviceConfig,
    inner: Mutex<Inner>,
}

impl Emulator {
    /// Build an emulator around an arbitrary frame source
    pub fn new(config: DeviceConfig, source: Box<dyn FrameSource>) -> Result<Self, DeviceError> {
        let config = config.validate()?;
        info!(
            "Emulator configured: device={} {}x{} format={} socket={} timeout={}ms",
            config.device,
            config.width,
            config.height,
            config.pixel_format,
            config.socket_path.display(),
            config.timeout.as_millis()
        );
        Ok(Self {
            config,
            inner: Mutex::new(Inner { source, device: None }),
        })
    }

    /// Build an emulator fed by the configured Unix socket
    pub fn with_socket(config: DeviceConfig) -> Result<Self, DeviceError> {
        let source = SocketSource::new(config.socket_path.clone(), config.timeout);
        Self::new(config, Box::new(source))
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn device_mut<'a>(inner: &'a mut Inner, handle: DeviceHandle) -> Result<&'a mut Device, DeviceError> {
        inner
            .device
            .as_mut()
            .filter(|d| d.handle == handle)
            .ok_or(DeviceError::BadHandle(handle.as_raw()))
    }

    /// Current state of the device
    pub fn state(&self) -> DeviceState {
        match &self.lock().device {
            None => DeviceState::Closed,
            Some(d) if d.streaming => DeviceState::Streaming,
            Some(d) if !d.pool.is_empty() => DeviceState::Buffered(d.pool.len()),
            Some(_) => DeviceState::Open,
        }
    }

    /// Handle of the open device, if any
    pub fn handle(&self) -> Option<DeviceHandle> {
        self.lock().device.as_ref().map(|d| d.handle)
    }

    /// Fail with BadHandle unless `handle` is the open device
    pub fn check_handle(&self, handle: DeviceHandle) -> Result<(), DeviceError> {
        let mut inner = self.lock();
        Self::device_mut(&mut inner, handle).map(|_| ())
    }

    /// Open the device node at `path`
    pub fn open(&self, path: &str) -> Result<DeviceHandle, DeviceError> {
        let mut inner = self.lock();

        if !self.config.matches_device(path) {
            debug!("open({}): not target device {}", path, self.config.device);
            return Err(DeviceError::NotFound {
                path: path.to_string(),
                target: self.config.device.clone(),
            });
        }

        if let Some(device) = &inner.device {
            error!("open({}): already open (handle {})", path, device.handle.as_raw());
            return Err(DeviceError::Busy(device.handle.as_raw()));
        }

        let queue = CompletionQueue::new(self.config.max_buffers)?;
        let handle = DeviceHandle(queue.raw_fd());
        inner.device = Some(Device {
            handle,
            format: self.config.format(),
            pool: BufferPool::new(self.config.max_buffers),
            queue,
            streaming: false,
            sequence: 0,
        });

        debug!("open({}) -> handle {}", path, handle.as_raw());
        Ok(handle)
    }

    /// Close the device; a foreign handle is ignored
    pub fn close(&self, handle: DeviceHandle) -> Result<(), DeviceError> {
        let mut inner = self.lock();
        let matches = inner.device.as_ref().map(|d| d.handle == handle).unwrap_or(false);
        if !matches {
            debug!("close({}): not the emulated device", handle.as_raw());
            return Ok(());
        }

        if let Some(mut device) = inner.device.take() {
            device.streaming = false;
            device.queue.close();
            device.queue.drain_all();
            device.pool.reset();
        }
        debug!("close({})", handle.as_raw());
        Ok(())
    }

    /// Report the configured format
    pub fn query_format(&self, handle: DeviceHandle) -> Result<FrameFormat, DeviceError> {
        let mut inner = self.lock();
        let device = Self::device_mut(&mut inner, handle)?;
        let format = device.format;
        if format.checked_size_image().is_none() {
            error!("G_FMT: sizeimage overflow");
            return Err(DeviceError::invalid("image size exceeds buffer limit"));
        }
        Ok(format)
    }

    /// Validate a requested format against the configured one
    pub fn set_format(&self, handle: DeviceHandle, width: u32, height: u32, fourcc: u32) -> Result<FrameFormat, DeviceError> {
        let mut inner = self.lock();
        let format = Self::device_mut(&mut inner, handle)?.format;

        if width != format.width || height != format.height {
            error!(
                "S_FMT: requested {}x{} but configured {}x{}",
                width, height, format.width, format.height
            );
            return Err(DeviceError::invalid(format!(
                "resolution {}x{} not supported, device is {}x{}",
                width, height, format.width, format.height
            )));
        }

        let configured = format.pixel_format.fourcc();
        if fourcc != configured {
            error!(
                "S_FMT: requested format {} but configured {}",
                fourcc_str(fourcc),
                fourcc_str(configured)
            );
            return Err(DeviceError::invalid(format!("pixel format {} not supported", fourcc_str(fourcc))));
        }

        if format.checked_size_image().is_none() {
            error!("S_FMT: sizeimage overflow");
            return Err(DeviceError::invalid("image size exceeds buffer limit"));
        }
        Ok(format)
    }

    /// Reset the pool and declare up to `count` buffers; returns the clamped count
    pub fn request_buffers(&self, handle: DeviceHandle, count: usize) -> Result<usize, DeviceError> {
        let mut inner = self.lock();
        let device = Self::device_mut(&mut inner, handle)?;

        device.pool.reset();
        let stale = device.queue.drain_all();
        if !stale.is_empty() {
            warn!("REQBUFS: discarded {} pending completions", stale.len());
        }

        if count == 0 {
            debug!("REQBUFS: released all buffers");
            return Ok(0);
        }

        let size = device.format.checked_size_image().ok_or_else(|| {
            error!("REQBUFS: buffer size overflow");
            DeviceError::invalid("buffer size exceeds limit")
        })?;

        let declared = device.pool.declare(count, size);
        debug!("REQBUFS: allocated {} buffers ({} bytes each)", declared, size);
        Ok(declared)
    }

    /// Capacity, offset and flags of buffer `index`
    pub fn query_buffer(&self, handle: DeviceHandle, index: usize) -> Result<BufferInfo, DeviceError> {
        let mut inner = self.lock();
        let device = Self::device_mut(&mut inner, handle)?;
        let info = device.info(index)?;
        debug!("QUERYBUF: index={} offset=0x{:x} length={}", index, info.offset, info.length);
        Ok(info)
    }

    /// Hand buffer `index` to the device; returns its state once queued
    pub fn enqueue(&self, handle: DeviceHandle, index: usize) -> Result<BufferInfo, DeviceError> {
        let mut inner = self.lock();
        let device = Self::device_mut(&mut inner, handle)?;
        let buffer = device.pool.get_mut(index)?;

        if !buffer.is_mapped() {
            debug!("QBUF: buffer {} not allocated", index);
            return Err(DeviceError::invalid(format!("buffer {} not mapped", index)));
        }
        if buffer.is_queued() {
            debug!("QBUF: buffer {} already queued", index);
            return Err(DeviceError::invalid(format!("buffer {} already queued", index)));
        }

        buffer.set_queued(true);

        if device.streaming {
            if let Err(e) = device.queue.publish(index) {
                debug!("QBUF: publish failed: {}", e);
                buffer.set_queued(false);
                return Err(e);
            }
        }

        debug!("QBUF: index={}", index);
        device.info(index)
    }

    /// Start servicing queued buffers
    pub fn start_streaming(&self, handle: DeviceHandle) -> Result<(), DeviceError> {
        let mut inner = self.lock();
        let device = Self::device_mut(&mut inner, handle)?;

        if device.streaming {
            debug!("STREAMON: already streaming");
            return Err(DeviceError::invalid("already streaming"));
        }

        let ready: Vec<usize> = device
            .pool
            .iter()
            .filter(|b| b.is_mapped() && b.is_queued())
            .map(|b| b.index())
            .collect();

        for &index in &ready {
            if let Err(e) = device.queue.publish(index) {
                debug!("STREAMON: publish failed: {}", e);
                device.queue.drain_all();
                return Err(e);
            }
        }

        device.streaming = true;
        device.sequence = 0;
        debug!("STREAMON: {} buffers pending", ready.len());
        Ok(())
    }

    /// Stop streaming and return every pending buffer to the caller
    pub fn stop_streaming(&self, handle: DeviceHandle) -> Result<(), DeviceError> {
        let mut inner = self.lock();
        let device = Self::device_mut(&mut inner, handle)?;

        if !device.streaming {
            debug!("STREAMOFF: not streaming");
            return Err(DeviceError::invalid("not streaming"));
        }

        device.streaming = false;
        for index in device.queue.drain_all() {
            if let Ok(buffer) = device.pool.get_mut(index) {
                buffer.set_queued(false);
            }
        }

        debug!("STREAMOFF");
        Ok(())
    }

    /// Take the next completed buffer, fetching its frame from the source
    pub fn dequeue(&self, handle: DeviceHandle) -> Result<BufferInfo, DeviceError> {
        let mut inner = self.lock();
        let Inner { source, device } = &mut *inner;
        let device = device
            .as_mut()
            .filter(|d| d.handle == handle)
            .ok_or(DeviceError::BadHandle(handle.as_raw()))?;

        if !device.streaming {
            debug!("DQBUF: not streaming");
            return Err(DeviceError::invalid("not streaming"));
        }

        let index = device.queue.try_pop().ok_or_else(|| {
            debug!("DQBUF: no queued buffer");
            DeviceError::WouldBlock
        })?;

        if index >= device.pool.len() {
            debug!("DQBUF: invalid index {} from queue", index);
            return Err(DeviceError::Io(format!("invalid buffer index {} in completion queue", index)));
        }

        let buffer = device.pool.get_mut(index)?;
        if !buffer.is_queued() {
            debug!("DQBUF: buffer {} not queued", index);
            return Err(DeviceError::invalid(format!("buffer {} not queued", index)));
        }

        if !buffer.is_mapped() {
            buffer.set_queued(false);
            return Err(DeviceError::Io(format!("buffer {} lost its region", index)));
        }
        let region = buffer
            .region_mut()
            .ok_or_else(|| DeviceError::Io(format!("buffer {} lost its region", index)))?;

        let fetched = match source.fetch(region) {
            Ok(fetched) => fetched,
            Err(e) => {
                if let Err(requeue) = device.queue.publish(index) {
                    error!("DQBUF: failed to re-queue buffer {}: {}", index, requeue);
                    buffer.set_queued(false);
                }
                return Err(DeviceError::Fetch { index, source: e });
            }
        };

        let sequence = device.sequence;
        device.sequence = device.sequence.wrapping_add(1);
        buffer.set_queued(false);
        buffer.complete(fetched.bytes, sequence, monotonic_now());

        debug!(
            "DQBUF: index={} bytesused={} latency={}ms",
            index,
            fetched.bytes,
            fetched.latency.as_millis()
        );
        device.info(index)
    }

    /// Map the buffer at `offset`; repeated maps return the same region
    pub fn map(&self, handle: DeviceHandle, offset: usize, length: usize) -> Result<Mapping, DeviceError> {
        let mut inner = self.lock();
        let device = Self::device_mut(&mut inner, handle)?;
        let index = device.pool.find_by_offset(offset, length)?;
        let mapping = device.pool.allocate_region(index)?;
        debug!("mmap: buffer {} at {:p}", index, mapping.as_ptr());
        Ok(mapping)
    }

    /// Release the region of buffer `index`
    pub fn unmap(&self, handle: DeviceHandle, index: usize) -> Result<(), DeviceError> {
        let mut inner = self.lock();
        Self::device_mut(&mut inner, handle)?.pool.release_region(index)
    }

    /// Release the region starting at `addr`
    pub fn unmap_address(&self, addr: *const u8) -> Result<(), DeviceError> {
        let mut inner = self.lock();
        let device = inner
            .device
            .as_mut()
            .ok_or_else(|| DeviceError::invalid("device not open"))?;
        let index = device
            .pool
            .index_for_address(addr)
            .ok_or_else(|| DeviceError::invalid(format!("{:p} is not a device buffer", addr)))?;
        device.pool.release_region(index)
    }

    /// Copy of the last frame captured into buffer `index`
    pub fn frame_data(&self, handle: DeviceHandle, index: usize) -> Result<Vec<u8>, DeviceError> {
        let mut inner = self.lock();
        let device = Self::device_mut(&mut inner, handle)?;
        let buffer = device.pool.get(index)?;
        buffer
            .data()
            .map(|d| d.to_vec())
            .ok_or_else(|| DeviceError::invalid(format!("buffer {} not mapped", index)))
    }
}

/// CLOCK_MONOTONIC as a duration since boot
pub fn monotonic_now() -> Duration {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: clock_gettime writes into the live timespec
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::Fetched;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Source replaying scripted outcomes
    #[derive(Clone, Default)]
    struct ScriptedSource {
        script: Arc<StdMutex<VecDeque<Result<Vec<u8>, ()>>>>,
    }

    impl ScriptedSource {
        fn push_frame(&self, bytes: &[u8]) {
            self.script.lock().unwrap().push_back(Ok(bytes.to_vec()));
        }

        fn push_failure(&self) {
            self.script.lock().unwrap().push_back(Err(()));
        }
    }

    impl FrameSource for ScriptedSource {
        fn fetch(&mut self, dest: &mut [u8]) -> Result<Fetched, SourceError> {
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(frame)) => {
                    dest[..frame.len()].copy_from_slice(&frame);
                    Ok(Fetched {
                        bytes: frame.len(),
                        latency: Duration::ZERO,
                    })
                }
                Some(Err(())) | None => Err(SourceError::Timeout(10)),
            }
        }
    }

    fn small_config() -> DeviceConfig {
        DeviceConfig {
            width: 64,
            height: 48,
            ..Default::default()
        }
    }

    fn emulator() -> (Emulator, ScriptedSource) {
        let source = ScriptedSource::default();
        let emulator = Emulator::new(small_config(), Box::new(source.clone())).unwrap();
        (emulator, source)
    }

    fn mapped(emulator: &Emulator, count: usize) -> DeviceHandle {
        let handle = emulator.open("/dev/video0").unwrap();
        assert_eq!(emulator.request_buffers(handle, count).unwrap(), count);
        for index in 0..count {
            let info = emulator.query_buffer(handle, index).unwrap();
            emulator.map(handle, info.offset, info.length).unwrap();
        }
        handle
    }

    #[test]
    fn test_open_wrong_path() {
        let (emulator, _) = emulator();
        assert!(matches!(emulator.open("/dev/video3"), Err(DeviceError::NotFound { .. })));
        assert_eq!(emulator.state(), DeviceState::Closed);
    }

    #[test]
    fn test_second_open_is_busy() {
        let (emulator, _) = emulator();
        let handle = emulator.open("/dev/video0").unwrap();
        assert!(matches!(emulator.open("/dev/video0"), Err(DeviceError::Busy(_))));

        emulator.close(handle).unwrap();
        assert_eq!(emulator.state(), DeviceState::Closed);
        emulator.open("/dev/video0").unwrap();
    }

    #[test]
    fn test_close_foreign_handle_is_silent() {
        let (emulator, _) = emulator();
        let handle = emulator.open("/dev/video0").unwrap();
        emulator.close(DeviceHandle::from_raw(handle.as_raw() + 100)).unwrap();
        assert_eq!(emulator.state(), DeviceState::Open);
    }

    #[test]
    fn test_bad_handle() {
        let (emulator, _) = emulator();
        let handle = emulator.open("/dev/video0").unwrap();
        let other = DeviceHandle::from_raw(handle.as_raw() + 1);
        assert!(matches!(emulator.request_buffers(other, 2), Err(DeviceError::BadHandle(_))));
        assert!(matches!(emulator.dequeue(other), Err(DeviceError::BadHandle(_))));
    }

    #[test]
    fn test_set_format_mismatch() {
        let (emulator, _) = emulator();
        let handle = emulator.open("/dev/video0").unwrap();
        let fourcc = emulator.config().pixel_format.fourcc();

        assert!(emulator.set_format(handle, 64, 48, fourcc).is_ok());
        assert!(matches!(
            emulator.set_format(handle, 640, 480, fourcc),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            emulator.set_format(handle, 64, 48, crate::format::fourcc(b"YUYV")),
            Err(DeviceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_request_zero_then_query_fails() {
        let (emulator, _) = emulator();
        let handle = mapped(&emulator, 2);
        assert_eq!(emulator.request_buffers(handle, 0).unwrap(), 0);
        assert!(matches!(emulator.query_buffer(handle, 0), Err(DeviceError::InvalidArgument(_))));
        assert_eq!(emulator.state(), DeviceState::Open);
    }

    #[test]
    fn test_request_clamps() {
        let (emulator, _) = emulator();
        let handle = emulator.open("/dev/video0").unwrap();
        assert_eq!(emulator.request_buffers(handle, 9).unwrap(), 4);
        for index in 0..4 {
            let info = emulator.query_buffer(handle, index).unwrap();
            assert_eq!(info.length, 64 * 48 * 2);
            assert_eq!(info.offset, index * 64 * 48 * 2);
        }
        assert_eq!(emulator.state(), DeviceState::Buffered(4));
    }

    #[test]
    fn test_enqueue_requires_mapping() {
        let (emulator, _) = emulator();
        let handle = emulator.open("/dev/video0").unwrap();
        emulator.request_buffers(handle, 1).unwrap();
        assert!(matches!(emulator.enqueue(handle, 0), Err(DeviceError::InvalidArgument(_))));
        assert!(matches!(emulator.enqueue(handle, 4), Err(DeviceError::InvalidArgument(_))));
    }

    #[test]
    fn test_oversized_format_rejected_after_open() {
        let config = DeviceConfig {
            width: 2048,
            height: 1080,
            ..Default::default()
        };
        let emulator = Emulator::new(config, Box::new(ScriptedSource::default())).unwrap();
        let handle = emulator.open("/dev/video0").unwrap();
        let fourcc = emulator.config().pixel_format.fourcc();

        assert!(matches!(emulator.query_format(handle), Err(DeviceError::InvalidArgument(_))));
        assert!(matches!(
            emulator.set_format(handle, 2048, 1080, fourcc),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            emulator.request_buffers(handle, 2),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert_eq!(emulator.state(), DeviceState::Open);
        emulator.close(handle).unwrap();
    }

    #[test]
    fn test_double_enqueue_rejected() {
        let (emulator, _) = emulator();
        let handle = mapped(&emulator, 1);
        let info = emulator.enqueue(handle, 0).unwrap();
        assert!(info.queued);
        assert!(info.mapped);
        assert!(matches!(emulator.enqueue(handle, 0), Err(DeviceError::InvalidArgument(_))));
    }

    #[test]
    fn test_dequeue_empty_would_block() {
        let (emulator, _) = emulator();
        let handle = mapped(&emulator, 2);
        assert!(matches!(emulator.dequeue(handle), Err(DeviceError::InvalidArgument(_))));
        emulator.start_streaming(handle).unwrap();
        assert!(matches!(emulator.dequeue(handle), Err(DeviceError::WouldBlock)));
    }

    #[test]
    fn test_queue_dequeue_round() {
        let (emulator, source) = emulator();
        let handle = mapped(&emulator, 2);
        emulator.start_streaming(handle).unwrap();

        source.push_frame(b"first");
        emulator.enqueue(handle, 1).unwrap();
        let info = emulator.dequeue(handle).unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(info.bytes_used, 5);
        assert!(!info.queued);
        assert_eq!(emulator.frame_data(handle, 1).unwrap(), b"first");
    }

    #[test]
    fn test_streamon_publishes_prequeued() {
        let (emulator, source) = emulator();
        let handle = mapped(&emulator, 3);
        emulator.enqueue(handle, 2).unwrap();
        emulator.enqueue(handle, 0).unwrap();
        emulator.start_streaming(handle).unwrap();
        assert!(matches!(emulator.start_streaming(handle), Err(DeviceError::InvalidArgument(_))));

        source.push_frame(b"a");
        source.push_frame(b"b");
        // Published in index order
        assert_eq!(emulator.dequeue(handle).unwrap().index, 0);
        assert_eq!(emulator.dequeue(handle).unwrap().index, 2);
    }

    #[test]
    fn test_sequence_counts_frames() {
        let (emulator, source) = emulator();
        let handle = mapped(&emulator, 1);
        emulator.start_streaming(handle).unwrap();

        let mut last = Duration::ZERO;
        for expected in 0..3 {
            source.push_frame(b"xx");
            emulator.enqueue(handle, 0).unwrap();
            let info = emulator.dequeue(handle).unwrap();
            assert_eq!(info.sequence, expected);
            assert!(info.timestamp >= last);
            last = info.timestamp;
        }
    }

    #[test]
    fn test_stop_drains_and_clears() {
        let (emulator, _) = emulator();
        let handle = mapped(&emulator, 2);
        emulator.enqueue(handle, 0).unwrap();
        emulator.enqueue(handle, 1).unwrap();
        emulator.start_streaming(handle).unwrap();
        emulator.stop_streaming(handle).unwrap();

        assert!(!emulator.query_buffer(handle, 0).unwrap().queued);
        assert!(!emulator.query_buffer(handle, 1).unwrap().queued);
        assert!(matches!(emulator.stop_streaming(handle), Err(DeviceError::InvalidArgument(_))));

        // Nothing left to service after a restart
        emulator.start_streaming(handle).unwrap();
        assert!(matches!(emulator.dequeue(handle), Err(DeviceError::WouldBlock)));
    }

    #[test]
    fn test_failed_fetch_redelivers() {
        let (emulator, source) = emulator();
        let handle = mapped(&emulator, 1);
        emulator.enqueue(handle, 0).unwrap();
        emulator.start_streaming(handle).unwrap();

        source.push_failure();
        assert!(matches!(
            emulator.dequeue(handle),
            Err(DeviceError::Fetch { index: 0, .. })
        ));
        assert!(emulator.query_buffer(handle, 0).unwrap().queued);

        source.push_frame(b"later");
        let info = emulator.dequeue(handle).unwrap();
        assert_eq!(info.index, 0);
        assert_eq!(info.bytes_used, 5);
    }

    #[test]
    fn test_unmap_rules() {
        let (emulator, _) = emulator();
        let handle = mapped(&emulator, 1);
        let info = emulator.query_buffer(handle, 0).unwrap();
        let first = emulator.map(handle, info.offset, info.length).unwrap();

        emulator.enqueue(handle, 0).unwrap();
        assert!(matches!(emulator.unmap(handle, 0), Err(DeviceError::InvalidArgument(_))));

        emulator.start_streaming(handle).unwrap();
        emulator.stop_streaming(handle).unwrap();
        emulator.unmap_address(first.as_ptr()).unwrap();
        assert!(!emulator.query_buffer(handle, 0).unwrap().mapped);

        emulator.map(handle, info.offset, info.length).unwrap();
        assert!(emulator.query_buffer(handle, 0).unwrap().mapped);
    }

    #[test]
    fn test_map_length_mismatch() {
        let (emulator, _) = emulator();
        let handle = emulator.open("/dev/video0").unwrap();
        emulator.request_buffers(handle, 1).unwrap();
        let info = emulator.query_buffer(handle, 0).unwrap();
        assert!(matches!(
            emulator.map(handle, info.offset, info.length + 1),
            Err(DeviceError::InvalidArgument(_))
        ));
    }
}

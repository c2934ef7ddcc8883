//! End-to-end capture against a Unix socket frame server

use std::io::Write;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use capture_emulator::{DeviceConfig, DeviceError, DeviceState, Emulator, PixelFormat, SourceError};

fn serve_frames(listener: UnixListener, frames: Vec<Vec<u8>>) -> JoinHandle<()> {
    thread::spawn(move || {
        for frame in frames {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(&frame).unwrap();
        }
    })
}

fn config(socket: &Path, width: u32, height: u32) -> DeviceConfig {
    DeviceConfig {
        device: "/dev/video0".to_string(),
        width,
        height,
        pixel_format: PixelFormat::Mjpeg,
        socket_path: PathBuf::from(socket),
        timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

#[test]
fn full_hd_capture_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("camera.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    let mut jpeg = vec![0xff, 0xd8];
    jpeg.extend(std::iter::repeat(0x42).take(100_000));
    jpeg.extend([0xff, 0xd9]);
    let server = serve_frames(listener, vec![jpeg.clone()]);

    let emulator = Emulator::with_socket(config(&socket, 1920, 1080)).unwrap();
    let handle = emulator.open("/dev/video0").unwrap();

    assert_eq!(emulator.request_buffers(handle, 4).unwrap(), 4);
    let info = emulator.query_buffer(handle, 0).unwrap();
    assert_eq!(info.length, 1920 * 1080 * 2);
    assert_eq!(info.offset, 0);

    let mapping = emulator.map(handle, info.offset, info.length).unwrap();
    assert_eq!(mapping.index, 0);

    emulator.enqueue(handle, 0).unwrap();
    emulator.start_streaming(handle).unwrap();
    assert_eq!(emulator.state(), DeviceState::Streaming);

    let before = capture_emulator::device::monotonic_now();
    let done = emulator.dequeue(handle).unwrap();
    server.join().unwrap();

    assert_eq!(done.index, 0);
    assert_eq!(done.bytes_used, jpeg.len());
    assert!(done.bytes_used <= info.length);
    assert!(done.timestamp >= before);
    assert!(!done.queued);

    // The caller reads through its mapping
    let mapped = unsafe { std::slice::from_raw_parts(mapping.as_ptr(), done.bytes_used) };
    assert_eq!(mapped, &jpeg[..]);

    emulator.stop_streaming(handle).unwrap();
    emulator.unmap(handle, 0).unwrap();
    emulator.close(handle).unwrap();
    assert_eq!(emulator.state(), DeviceState::Closed);
}

#[test]
fn failed_fetch_is_redelivered() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("camera.sock");

    let emulator = Emulator::with_socket(config(&socket, 64, 48)).unwrap();
    let handle = emulator.open("/dev/video0").unwrap();
    emulator.request_buffers(handle, 2).unwrap();
    let info = emulator.query_buffer(handle, 1).unwrap();
    emulator.map(handle, info.offset, info.length).unwrap();
    emulator.enqueue(handle, 1).unwrap();
    emulator.start_streaming(handle).unwrap();

    // Bound but silent: the read window expires
    let idle = UnixListener::bind(&socket).unwrap();
    match emulator.dequeue(handle) {
        Err(DeviceError::Fetch { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(source, SourceError::Timeout(100)));
        }
        other => panic!("expected fetch failure, got {:?}", other),
    }
    drop(idle);
    std::fs::remove_file(&socket).unwrap();

    // Nobody listening at all
    let err = emulator.dequeue(handle).unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
    assert!(emulator.query_buffer(handle, 1).unwrap().queued);

    let server = serve_frames(UnixListener::bind(&socket).unwrap(), vec![b"recovered".to_vec()]);
    let done = emulator.dequeue(handle).unwrap();
    server.join().unwrap();

    assert_eq!(done.index, 1);
    assert_eq!(done.bytes_used, 9);
    assert!(matches!(emulator.dequeue(handle), Err(DeviceError::WouldBlock)));
}

#[test]
fn oversized_frame_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("camera.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    // 16x16x2 = 512 byte buffers
    let server = serve_frames(listener, vec![vec![0u8; 600]]);
    let emulator = Emulator::with_socket(config(&socket, 16, 16)).unwrap();
    let handle = emulator.open("/dev/video0").unwrap();
    emulator.request_buffers(handle, 1).unwrap();
    emulator.map(handle, 0, 512).unwrap();
    emulator.enqueue(handle, 0).unwrap();
    emulator.start_streaming(handle).unwrap();

    match emulator.dequeue(handle) {
        Err(DeviceError::Fetch { source, .. }) => {
            assert!(matches!(source, SourceError::Overflow { capacity: 512 }))
        }
        other => panic!("expected overflow, got {:?}", other),
    }
    // The peer may see a reset once we hang up mid-frame
    let _ = server.join();
}

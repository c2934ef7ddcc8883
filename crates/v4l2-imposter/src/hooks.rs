//! libv4l2 entry points over an `Emulator`
//!
//! Each hook returns the errno to report on failure; the exported C symbols
//! in the crate root only translate that into `-1`/`MAP_FAILED` + errno.

use std::ffi::CStr;
use std::os::raw::{c_int, c_ulong, c_void};

use capture_emulator::{DeviceError, DeviceHandle, Emulator};
use tracing::{debug, error};

use crate::abi;

/// errno value carried back to the C caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub c_int);

impl From<DeviceError> for Errno {
    fn from(err: DeviceError) -> Self {
        Errno(err.errno())
    }
}

fn active(emulator: Option<&Emulator>) -> Result<&Emulator, Errno> {
    emulator.ok_or_else(|| DeviceError::Inactive("emulation not active in this process".to_string()).into())
}

/// `v4l2_open`: returns the device descriptor
pub fn open(emulator: Option<&Emulator>, path: &CStr) -> Result<c_int, Errno> {
    let emulator = active(emulator)?;
    let path = path.to_string_lossy();
    let handle = emulator.open(&path).map_err(|e| {
        debug!("v4l2_open({}): {}", path, e);
        Errno::from(e)
    })?;
    Ok(handle.as_raw())
}

/// `v4l2_close`: descriptors other than the device are accepted untouched
pub fn close(emulator: Option<&Emulator>, fd: c_int) -> Result<(), Errno> {
    let emulator = active(emulator)?;
    emulator.close(DeviceHandle::from_raw(fd))?;
    Ok(())
}

/// `v4l2_ioctl`
///
/// # Safety
/// `arg` must point to the structure the request code names.
pub unsafe fn ioctl(emulator: Option<&Emulator>, fd: c_int, request: c_ulong, arg: *mut c_void) -> Result<c_int, Errno> {
    let emulator = active(emulator)?;
    let handle = DeviceHandle::from_raw(fd);
    emulator.check_handle(handle)?;

    if arg.is_null() {
        return Err(Errno(libc::EFAULT));
    }

    let code = (request & 0xffff_ffff) as u32;
    let control = abi::read_request(code, arg);
    let reply = emulator.control(handle, control).map_err(|e| {
        debug!("ioctl 0x{:08x} failed: {}", code, e);
        Errno::from(e)
    })?;
    abi::write_reply(code, arg, &reply);
    Ok(0)
}

/// `v4l2_mmap`: returns the base address of the buffer at `offset`
pub fn mmap(emulator: Option<&Emulator>, start: *mut c_void, length: usize, fd: c_int, offset: i64) -> Result<*mut c_void, Errno> {
    let emulator = active(emulator)?;
    debug!("v4l2_mmap(fd={}, start={:p}, length={}, offset=0x{:x})", fd, start, length, offset);

    if !start.is_null() {
        return Err(Errno(libc::EINVAL));
    }
    let offset = usize::try_from(offset).map_err(|_| Errno(libc::EINVAL))?;

    let mapping = emulator
        .map(DeviceHandle::from_raw(fd), offset, length)
        .map_err(|e| {
            error!("v4l2_mmap: {}", e);
            Errno::from(e)
        })?;
    Ok(mapping.as_ptr() as *mut c_void)
}

/// `v4l2_munmap`
pub fn munmap(emulator: Option<&Emulator>, start: *mut c_void) -> Result<(), Errno> {
    let emulator = active(emulator)?;
    emulator.unmap_address(start as *const u8).map_err(|e| {
        debug!("v4l2_munmap({:p}): {}", start, e);
        Errno::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture_emulator::{DeviceConfig, SocketSource};
    use std::time::Duration;

    fn video(path: &[u8]) -> &CStr {
        CStr::from_bytes_with_nul(path).unwrap()
    }

    fn emulator() -> Emulator {
        let config = DeviceConfig {
            width: 32,
            height: 32,
            ..Default::default()
        };
        let source = SocketSource::new("/nonexistent/frames.sock", Duration::from_millis(10));
        Emulator::new(config, Box::new(source)).unwrap()
    }

    #[test]
    fn test_inactive_is_einval() {
        assert_eq!(open(None, video(b"/dev/video0\0")), Err(Errno(libc::EINVAL)));
        assert_eq!(close(None, 3), Err(Errno(libc::EINVAL)));
    }

    #[test]
    fn test_open_errors() {
        let emulator = emulator();
        assert_eq!(open(Some(&emulator), video(b"/dev/video1\0")), Err(Errno(libc::ENOENT)));
        let fd = open(Some(&emulator), video(b"/dev/video0\0")).unwrap();
        assert!(fd >= 0);
        assert_eq!(open(Some(&emulator), video(b"/dev/video0\0")), Err(Errno(libc::EBUSY)));
        close(Some(&emulator), fd).unwrap();
    }

    #[test]
    fn test_ioctl_bad_fd_and_null() {
        let emulator = emulator();
        let fd = open(Some(&emulator), video(b"/dev/video0\0")).unwrap();
        let mut value: c_int = 0;
        let arg = &mut value as *mut c_int as *mut c_void;

        let err = unsafe { ioctl(Some(&emulator), fd + 1, abi::VIDIOC_G_INPUT as c_ulong, arg) };
        assert_eq!(err, Err(Errno(libc::EBADF)));

        let err = unsafe { ioctl(Some(&emulator), fd, abi::VIDIOC_G_INPUT as c_ulong, std::ptr::null_mut()) };
        assert_eq!(err, Err(Errno(libc::EFAULT)));

        let err = unsafe { ioctl(Some(&emulator), fd, 0xdead_beef, arg) };
        assert_eq!(err, Err(Errno(libc::ENOTTY)));
    }

    #[test]
    fn test_mmap_rules() {
        let emulator = emulator();
        let fd = open(Some(&emulator), video(b"/dev/video0\0")).unwrap();
        let handle = DeviceHandle::from_raw(fd);
        emulator.request_buffers(handle, 2).unwrap();
        let length = 32 * 32 * 2;

        let mut hint = 0u8;
        assert_eq!(
            mmap(Some(&emulator), &mut hint as *mut u8 as *mut c_void, length, fd, 0),
            Err(Errno(libc::EINVAL))
        );
        assert_eq!(
            mmap(Some(&emulator), std::ptr::null_mut(), length, fd + 1, 0),
            Err(Errno(libc::EBADF))
        );
        assert_eq!(
            mmap(Some(&emulator), std::ptr::null_mut(), length - 1, fd, 0),
            Err(Errno(libc::EINVAL))
        );

        let first = mmap(Some(&emulator), std::ptr::null_mut(), length, fd, length as i64).unwrap();
        let again = mmap(Some(&emulator), std::ptr::null_mut(), length, fd, length as i64).unwrap();
        assert_eq!(first, again);

        munmap(Some(&emulator), first).unwrap();
        assert_eq!(munmap(Some(&emulator), first), Err(Errno(libc::EINVAL)));
    }
}

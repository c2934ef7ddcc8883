//! Preloadable libv4l2 replacement
//!
//! Exports `v4l2_open`, `v4l2_close`, `v4l2_ioctl`, `v4l2_mmap` and
//! `v4l2_munmap`. A capture application linked against libv4l2 and started
//! with this library preloaded talks to an emulated device whose frames are
//! read from a Unix stream socket (`V4L2_IMPOSTER_SOCKET_PATH`).
//!
//! The emulator is built once, on the first hook call, from the
//! `V4L2_IMPOSTER_*` environment. When the process is not the configured
//! target or the configuration is invalid every hook fails with `EINVAL`.

pub mod abi;
pub mod hooks;
pub mod logging;
pub mod settings;

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_ulong, c_void};
use std::sync::OnceLock;

use capture_emulator::Emulator;
use tracing::{error, info, warn};

pub use hooks::Errno;
pub use settings::{Activation, Settings, SettingsError};

static EMULATOR: OnceLock<Option<Emulator>> = OnceLock::new();

fn emulator() -> Option<&'static Emulator> {
    EMULATOR.get_or_init(activate).as_ref()
}

fn activate() -> Option<Emulator> {
    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            logging::init_logging(false);
            error!("v4l2-imposter: {}", e);
            return None;
        }
    };
    logging::init_logging(settings.debug_enabled());

    let exe = settings::current_exe_name();
    if let Activation::Disabled(reason) = settings.activation(exe.as_deref()) {
        info!("v4l2-imposter disabled: {}", reason);
        return None;
    }

    let config = match settings.device_config() {
        Ok(c) => c,
        Err(e) => {
            error!("v4l2-imposter: {}", e);
            return None;
        }
    };
    if config.socket_path.as_os_str().is_empty() {
        warn!("V4L2_IMPOSTER_SOCKET_PATH is not set; every frame fetch will fail");
    }

    match Emulator::with_socket(config) {
        Ok(emulator) => {
            let c = emulator.config();
            info!(
                "Emulating {} as {}x{} {} from {}",
                c.device,
                c.width,
                c.height,
                c.pixel_format,
                c.socket_path.display()
            );
            Some(emulator)
        }
        Err(e) => {
            error!("v4l2-imposter: {}", e);
            None
        }
    }
}

fn set_errno(Errno(code): Errno) {
    // SAFETY: __errno_location returns the calling thread's errno slot
    unsafe { *libc::__errno_location() = code };
}

/// # Safety
/// `file` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn v4l2_open(file: *const c_char, _oflag: c_int) -> c_int {
    if file.is_null() {
        set_errno(Errno(libc::EFAULT));
        return -1;
    }
    match hooks::open(emulator(), CStr::from_ptr(file)) {
        Ok(fd) => fd,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn v4l2_close(fd: c_int) -> c_int {
    match hooks::close(emulator(), fd) {
        Ok(()) => 0,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

/// # Safety
/// `arg` must point to the structure `request` names.
#[no_mangle]
pub unsafe extern "C" fn v4l2_ioctl(fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
    match hooks::ioctl(emulator(), fd, request, arg) {
        Ok(ret) => ret,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn v4l2_mmap(
    start: *mut c_void,
    length: libc::size_t,
    _prot: c_int,
    _flags: c_int,
    fd: c_int,
    offset: i64,
) -> *mut c_void {
    match hooks::mmap(emulator(), start, length, fd, offset) {
        Ok(addr) => addr,
        Err(e) => {
            set_errno(e);
            libc::MAP_FAILED
        }
    }
}

#[no_mangle]
pub extern "C" fn v4l2_munmap(start: *mut c_void, _length: libc::size_t) -> c_int {
    match hooks::munmap(emulator(), start) {
        Ok(()) => 0,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

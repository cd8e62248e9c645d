//! Pushing appended bytes out of the process
//!
//! Both the log and the data file call [`commit_append`] after every write so
//! the flush-before-return contract lives in one place.

use std::fs::File;
use std::io::{self, Write};

use crate::config::SyncMode;

/// Flush `file` and, under [`SyncMode::Durable`], force it to persistent media.
pub fn commit_append(file: &mut File, mode: SyncMode) -> io::Result<()> {
    file.flush()?;
    match mode {
        SyncMode::Flush => Ok(()),
        SyncMode::Durable => durable_sync(file),
    }
}

/// Strongest data sync the platform offers.
///
/// May block for a long time under heavy I/O; callers already hold the
/// exclusive section, so nothing else waits on an index lock meanwhile.
#[cfg(target_os = "linux")]
pub fn durable_sync(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor comes from a live `File` borrowed for the call.
    let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

/// Plain fsync on Apple platforms only reaches the drive's volatile cache.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn durable_sync(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor comes from a live `File` borrowed for the call.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(target_os = "windows")]
pub fn durable_sync(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::FlushFileBuffers;
    // SAFETY: the handle comes from a live `File` borrowed for the call.
    let ok = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
    if ok != 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
pub fn durable_sync(file: &File) -> io::Result<()> {
    file.sync_data()
}

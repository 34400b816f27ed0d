//! POSIX shared memory and process operations
//!
//! Thin wrappers over `nix` that fix the flags used by the handoff. Each
//! function maps to exactly one system call so callers can attribute a
//! failure to the step that produced it.

use handoff_common::consts::REGION_MODE;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::signal::{Signal, kill};
use nix::sys::stat::Mode;
use nix::unistd::{ForkResult, Pid, fork, ftruncate, getpid};
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::fd::{IntoRawFd, OwnedFd};
use std::ptr::NonNull;

/// Create the named object if absent and open it read/write.
pub fn open_region(name: &str) -> nix::Result<OwnedFd> {
    shm_open(
        name,
        OFlag::O_CREAT | OFlag::O_RDWR,
        Mode::from_bits_truncate(REGION_MODE as libc::mode_t),
    )
}

/// Open an existing named object without creating it.
pub fn open_existing(name: &str) -> nix::Result<OwnedFd> {
    shm_open(name, OFlag::O_RDWR, Mode::empty())
}

/// Set the backing object to exactly `len` bytes.
pub fn resize_region(fd: &OwnedFd, len: usize) -> nix::Result<()> {
    let len = libc::off_t::try_from(len).map_err(|_| Errno::EFBIG)?;
    ftruncate(fd, len)
}

/// Map `len` bytes of the object shared and read/write.
pub fn map_region(fd: &OwnedFd, len: usize) -> nix::Result<NonNull<c_void>> {
    let length = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;

    // Safety: a fresh mapping at a kernel-chosen address aliases no Rust object.
    unsafe {
        mmap(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            0,
        )
    }
}

/// Remove a mapping created by [`map_region`].
///
/// # Safety
///
/// `addr`/`len` must describe a live mapping, and no reference into it may
/// outlive this call.
pub unsafe fn unmap_region(addr: NonNull<c_void>, len: usize) -> nix::Result<()> {
    unsafe { munmap(addr, len) }
}

/// Close a descriptor, reporting the OS error that dropping would discard.
pub fn close_descriptor(fd: OwnedFd) -> nix::Result<()> {
    // Safety: ownership of the raw descriptor is transferred to close().
    Errno::result(unsafe { libc::close(fd.into_raw_fd()) }).map(drop)
}

/// Remove the name from the shared memory namespace.
pub fn unlink_region(name: &str) -> nix::Result<()> {
    shm_unlink(name)
}

/// Duplicate the calling process.
///
/// # Safety
///
/// In a multi-threaded program the child may only perform
/// async-signal-safe operations before it exits.
pub unsafe fn fork_process() -> nix::Result<ForkResult> {
    unsafe { fork() }
}

/// Terminate the calling process without running destructors or atexit
/// handlers. Used by the child so parent-owned resources stay untouched.
pub fn exit_immediately(status: i32) -> ! {
    // Safety: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(status) }
}

/// Forcefully terminate a process.
pub fn kill_process(pid: Pid) -> nix::Result<()> {
    kill(pid, Signal::SIGKILL)
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: Pid) -> bool {
    match kill(pid, None) {
        Ok(_) => true,
        Err(Errno::ESRCH) => false, // No such process
        Err(Errno::EPERM) => true,  // Process exists but no permission to signal
        Err(_) => false,
    }
}

/// Get current process ID
pub fn current_pid() -> Pid {
    getpid()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/shm_handoff_platform_{}_{tag}", std::process::id())
    }

    #[test]
    fn test_open_existing_missing_object() {
        let result = open_existing(&unique_name("missing"));
        assert_eq!(result.err(), Some(Errno::ENOENT));
    }

    #[test]
    fn test_open_resize_map_unlink() {
        let name = unique_name("cycle");
        let fd = open_region(&name).unwrap();
        resize_region(&fd, 4).unwrap();
        let addr = map_region(&fd, 4).unwrap();

        // Safety: the mapping is 4 bytes and exclusively used here.
        unsafe {
            addr.cast::<u32>().as_ptr().write_volatile(7);
            assert_eq!(addr.cast::<u32>().as_ptr().read_volatile(), 7);
            unmap_region(addr, 4).unwrap();
        }

        close_descriptor(fd).unwrap();
        unlink_region(&name).unwrap();
        assert_eq!(open_existing(&name).err(), Some(Errno::ENOENT));
    }

    #[test]
    fn test_zero_length_mapping_rejected() {
        let name = unique_name("zero");
        let fd = open_region(&name).unwrap();
        assert_eq!(map_region(&fd, 0).err(), Some(Errno::EINVAL));
        close_descriptor(fd).unwrap();
        unlink_region(&name).unwrap();
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(current_pid()));
    }
}

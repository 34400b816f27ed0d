//! Handoff constants.
//!
//! Single source of truth for the value exchanged between parent and child
//! and for the size and default name of the shared region.

use static_assertions::const_assert_eq;

/// Machine word exchanged through the shared region.
pub type SentinelValue = u32;

/// Fixed pattern the child writes and the parent expects to read back.
pub const SENTINEL_VALUE: SentinelValue = 0xDEAD_BEEF;

/// Size of the shared region in bytes: exactly one [`SentinelValue`].
pub const REGION_SIZE: usize = core::mem::size_of::<SentinelValue>();

const_assert_eq!(REGION_SIZE, 4);

/// Default name of the shared memory object in the POSIX namespace.
pub const DEFAULT_REGION_NAME: &str = "/shm_handoff";

/// Permission bits passed to `shm_open` (masked by the process umask).
pub const REGION_MODE: u32 = 0o666;

/// Default polling interval for a bounded wait, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

/// Exit status the child reports after writing the sentinel.
pub const CHILD_EXIT_SUCCESS: i32 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_fits_exactly_one_value() {
        assert_eq!(REGION_SIZE, core::mem::size_of::<SentinelValue>());
    }

    #[test]
    fn test_sentinel_hex_rendering() {
        assert_eq!(format!("{SENTINEL_VALUE:X}"), "DEADBEEF");
    }

    #[test]
    fn test_default_name_is_posix_shm_name() {
        assert!(DEFAULT_REGION_NAME.starts_with('/'));
        assert!(!DEFAULT_REGION_NAME[1..].contains('/'));
    }
}

//! Platform-specific OS calls

mod posix;

pub use posix::*;

//! # Shared Memory Value Handoff
//!
//! A parent process creates a named POSIX shared memory object sized for
//! one `u32`, forks a child, the child stores a sentinel value in it, the
//! parent waits for the child to terminate, reads the value back and tears
//! the object down.
//!
//! ## Sequence
//!
//! ```text
//!  parent                                   child
//!  ──────                                   ─────
//!  shm_open(O_CREAT|O_RDWR)
//!  ftruncate(4)
//!  mmap(MAP_SHARED)
//!  fork ──────────────────────────────────► store 0xDEADBEEF
//!  waitpid ◄─────────────────────────────── _exit(0)
//!  load → "The child wrote 0xDEADBEEF"
//!  munmap / close / shm_unlink
//! ```
//!
//! The wait is the only synchronization: no lock or fence is needed because
//! the region is written once before the child exits and read once after
//! the parent has reaped it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use handoff_common::config::HandoffConfig;
//! use shm_handoff::Handoff;
//!
//! # fn main() -> Result<(), shm_handoff::HandoffError> {
//! let mut handoff = Handoff::new(HandoffConfig::default());
//! let report = handoff.run()?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every OS step is fatal. Errors name the failing system call:
//!
//! ```rust,no_run
//! use handoff_common::config::HandoffConfig;
//! use shm_handoff::{Handoff, HandoffError};
//!
//! match Handoff::new(HandoffConfig::default()).run() {
//!     Ok(report) => println!("{report}"),
//!     Err(HandoffError::Resource { op, source, .. }) => eprintln!("{op}: {source}"),
//!     Err(HandoffError::Timeout { pid, .. }) => eprintln!("child {pid} hung"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handoff;
pub mod launcher;
pub mod platform;
pub mod region;
pub mod wait;

pub use error::{HandoffError, HandoffResult, ResourceOp};
pub use handoff::{Handoff, HandoffReport, HandoffState};
pub use launcher::{ChildLauncher, ForkLauncher};
pub use region::{CleanupStep, RegionName, ReleaseReport, SharedRegion, ShmObject};
pub use wait::{ChildExit, WaitPolicy, wait_for_child};

use handoff_common::config::LogLevel;
use tracing::Level;

/// Map a configured log level onto a tracing level.
pub fn tracing_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// Initialize tracing on stderr.
///
/// Stdout is reserved for the report line. `RUST_LOG` directives are
/// honored in addition to `level`. A second call is a no-op.
pub fn init_tracing(level: Level, json: bool) {
    use std::io::IsTerminal;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder
            .with_ansi(std::io::stderr().is_terminal())
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_level_mapping() {
        assert_eq!(tracing_level(LogLevel::Trace), Level::TRACE);
        assert_eq!(tracing_level(LogLevel::Info), Level::INFO);
        assert_eq!(tracing_level(LogLevel::Error), Level::ERROR);
    }
}

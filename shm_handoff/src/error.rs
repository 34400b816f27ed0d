//! Error types for the shared value handoff

use handoff_common::config::ConfigError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// OS call that a [`HandoffError::Resource`] failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOp {
    /// Create or open the named shared memory object.
    Create,
    /// Size the backing object.
    Resize,
    /// Map the object into the address space.
    Map,
    /// Duplicate the process.
    Spawn,
    /// Wait for the child to terminate.
    Wait,
}

impl ResourceOp {
    /// Name of the underlying system call.
    pub const fn syscall(self) -> &'static str {
        match self {
            Self::Create => "shm_open",
            Self::Resize => "ftruncate",
            Self::Map => "mmap",
            Self::Spawn => "fork",
            Self::Wait => "waitpid",
        }
    }
}

impl fmt::Display for ResourceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.syscall())
    }
}

/// Errors that can occur during the handoff
#[derive(Error, Debug)]
pub enum HandoffError {
    /// An OS call failed; fatal, never retried
    #[error("{op} failed for {name}: {source}")]
    Resource {
        /// Failing operation
        op: ResourceOp,
        /// Region name the operation targeted
        name: String,
        /// Underlying OS error
        #[source]
        source: nix::Error,
    },

    /// Bounded wait expired before the child terminated
    #[error("child {pid} did not terminate within {timeout:?}")]
    Timeout {
        /// Child process ID
        pid: i32,
        /// Configured bound
        timeout: Duration,
    },

    /// Child terminated without reporting success
    #[error("child {pid} terminated abnormally: {status}")]
    ChildFailed {
        /// Child process ID
        pid: i32,
        /// Human-readable termination status
        status: String,
    },

    /// Region name rejected before reaching the OS
    #[error("Invalid region name {name:?}: {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HandoffError {
    /// Build a resource error for `op` on region `name`.
    pub fn resource(op: ResourceOp, name: &str, source: nix::Error) -> Self {
        Self::Resource {
            op,
            name: name.to_string(),
            source,
        }
    }

    /// Failing OS operation, if this is a resource error.
    pub fn op(&self) -> Option<ResourceOp> {
        match self {
            Self::Resource { op, .. } => Some(*op),
            _ => None,
        }
    }
}

/// Result type for handoff operations
pub type HandoffResult<T> = Result<T, HandoffError>;

//! Child process launch
//!
//! [`ChildLauncher`] is the seam between the handoff sequence and the way a
//! child comes into existence. [`ForkLauncher`] duplicates the process; the
//! child inherits the `MAP_SHARED` mapping, stores the value and exits.

use crate::error::{HandoffError, HandoffResult, ResourceOp};
use crate::platform;
use crate::region::SharedRegion;
use handoff_common::consts::{CHILD_EXIT_SUCCESS, SENTINEL_VALUE, SentinelValue};
use nix::unistd::{ForkResult, Pid};
use tracing::debug;

/// Starts the child that writes into the region.
pub trait ChildLauncher {
    /// Start a child sharing `region` and return its pid.
    ///
    /// Only returns in the parent. A failure means no child exists, so the
    /// caller must not wait.
    fn launch(&mut self, region: &mut SharedRegion) -> HandoffResult<Pid>;
}

/// Launches the child with `fork`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkLauncher {
    value: SentinelValue,
}

impl ForkLauncher {
    /// Launcher whose child writes `value`.
    pub const fn new(value: SentinelValue) -> Self {
        Self { value }
    }

    /// Value the child writes.
    pub const fn value(&self) -> SentinelValue {
        self.value
    }
}

impl Default for ForkLauncher {
    fn default() -> Self {
        Self::new(SENTINEL_VALUE)
    }
}

impl ChildLauncher for ForkLauncher {
    fn launch(&mut self, region: &mut SharedRegion) -> HandoffResult<Pid> {
        // Safety: the child only performs a volatile store and _exit.
        match unsafe { platform::fork_process() } {
            Ok(ForkResult::Child) => {
                region.write_value(self.value);
                platform::exit_immediately(CHILD_EXIT_SUCCESS)
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(region = %region.name(), child = child.as_raw(), "fork ok");
                Ok(child)
            }
            Err(e) => Err(HandoffError::resource(
                ResourceOp::Spawn,
                region.name().as_str(),
                e,
            )),
        }
    }
}

//! Waiting for the child
//!
//! The wait is the only synchronization point of the handoff: the child's
//! store happens-before the parent's load because `waitpid` only reports a
//! child after it has fully terminated.

use crate::error::{HandoffError, HandoffResult, ResourceOp};
use crate::platform;
use handoff_common::config::WaitConfig;
use handoff_common::consts::CHILD_EXIT_SUCCESS;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long the parent is willing to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Block until the child terminates, however long that takes.
    #[default]
    Unbounded,
    /// Poll until `timeout` elapses, then kill and reap the child.
    Bounded {
        /// Upper bound on the wait.
        timeout: Duration,
        /// Delay between status polls.
        poll_interval: Duration,
    },
}

impl WaitPolicy {
    /// Policy described by the `[wait]` configuration section.
    pub fn from_config(config: &WaitConfig) -> Self {
        match config.timeout() {
            Some(timeout) => Self::Bounded {
                timeout,
                poll_interval: config.poll_interval(),
            },
            None => Self::Unbounded,
        }
    }
}

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
}

impl ChildExit {
    fn from_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled(signal)),
            _ => None,
        }
    }

    /// True for a normal exit with the success status.
    pub fn is_success(&self) -> bool {
        *self == Self::Exited(CHILD_EXIT_SUCCESS)
    }

    /// Turn an unsuccessful termination into [`HandoffError::ChildFailed`].
    pub fn ensure_success(self, pid: Pid) -> HandoffResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(HandoffError::ChildFailed {
                pid: pid.as_raw(),
                status: self.to_string(),
            })
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(signal) => write!(f, "killed by {signal}"),
        }
    }
}

/// Wait for `pid` according to `policy`.
///
/// `region` only labels errors. A bounded wait that expires kills and reaps
/// the child before returning [`HandoffError::Timeout`].
pub fn wait_for_child(pid: Pid, policy: WaitPolicy, region: &str) -> HandoffResult<ChildExit> {
    match policy {
        WaitPolicy::Unbounded => wait_blocking(pid, region),
        WaitPolicy::Bounded {
            timeout,
            poll_interval,
        } => wait_bounded(pid, timeout, poll_interval, region),
    }
}

fn wait_blocking(pid: Pid, region: &str) -> HandoffResult<ChildExit> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(exit) = ChildExit::from_status(status) {
                    debug!(child = pid.as_raw(), "waitpid: {exit}");
                    return Ok(exit);
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => return Err(HandoffError::resource(ResourceOp::Wait, region, e)),
        }
    }
}

fn wait_bounded(
    pid: Pid,
    timeout: Duration,
    poll_interval: Duration,
    region: &str,
) -> HandoffResult<ChildExit> {
    let deadline = Instant::now() + timeout;

    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => {}
            Ok(status) => {
                if let Some(exit) = ChildExit::from_status(status) {
                    debug!(child = pid.as_raw(), "waitpid: {exit}");
                    return Ok(exit);
                }
            }
            Err(e) => return Err(HandoffError::resource(ResourceOp::Wait, region, e)),
        }

        let now = Instant::now();
        if now >= deadline {
            terminate(pid);
            return Err(HandoffError::Timeout {
                pid: pid.as_raw(),
                timeout,
            });
        }
        std::thread::sleep(poll_interval.min(deadline - now));
    }
}

/// Kill and reap a child that outlived its wait bound.
fn terminate(pid: Pid) {
    warn!(child = pid.as_raw(), "wait bound expired, killing child");
    if let Err(e) = platform::kill_process(pid) {
        warn!(child = pid.as_raw(), "kill failed: {e}");
    }
    if let Err(e) = wait_blocking(pid, "") {
        warn!(child = pid.as_raw(), "reaping killed child failed: {e}");
    }
}

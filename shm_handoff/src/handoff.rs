//! The handoff sequence
//!
//! create → size → map → spawn → wait → read → release, with every OS step
//! fatal on failure. Progress is tracked in [`HandoffState`] so a failure
//! can be attributed to the last state reached.

use crate::error::HandoffResult;
use crate::launcher::{ChildLauncher, ForkLauncher};
use crate::region::{RegionName, ReleaseReport, ShmObject};
use crate::wait::{WaitPolicy, wait_for_child};
use handoff_common::config::HandoffConfig;
use handoff_common::consts::{REGION_SIZE, SentinelValue};
use std::fmt;
use tracing::{debug, info};

/// Parent-side progress through the handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandoffState {
    /// Nothing acquired yet.
    #[default]
    Idle,
    /// Shared memory object created or opened.
    Created,
    /// Object sized to one value.
    Sized,
    /// Object mapped into the parent.
    Mapped,
    /// Child running.
    ChildSpawned,
    /// Child terminated and reaped.
    ChildAwaited,
    /// Value loaded from the region.
    ValueRead,
    /// Region unmapped, closed and unlinked.
    Released,
    /// An OS call failed.
    Failed,
}

impl HandoffState {
    /// State that follows `self` on the success path.
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Created),
            Self::Created => Some(Self::Sized),
            Self::Sized => Some(Self::Mapped),
            Self::Mapped => Some(Self::ChildSpawned),
            Self::ChildSpawned => Some(Self::ChildAwaited),
            Self::ChildAwaited => Some(Self::ValueRead),
            Self::ValueRead => Some(Self::Released),
            Self::Released | Self::Failed => None,
        }
    }

    /// True for `Released` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Failed)
    }
}

/// Result of a successful handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffReport {
    /// Value the parent read after the child terminated.
    pub value: SentinelValue,
    /// Pid of the child that wrote it.
    pub child_pid: i32,
    /// Teardown outcome; failures here are not fatal.
    pub release: ReleaseReport,
}

impl fmt::Display for HandoffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "The child wrote 0x{:X}", self.value)
    }
}

/// One parent/child value handoff over a named shared region.
#[derive(Debug)]
pub struct Handoff<L = ForkLauncher> {
    config: HandoffConfig,
    launcher: L,
    state: HandoffState,
    failed_at: Option<HandoffState>,
}

impl Handoff<ForkLauncher> {
    /// Handoff whose child is forked and writes the sentinel.
    pub fn new(config: HandoffConfig) -> Self {
        Self::with_launcher(config, ForkLauncher::default())
    }
}

impl<L: ChildLauncher> Handoff<L> {
    /// Handoff using a custom child launcher.
    pub fn with_launcher(config: HandoffConfig, launcher: L) -> Self {
        Self {
            config,
            launcher,
            state: HandoffState::Idle,
            failed_at: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandoffState {
        self.state
    }

    /// Last state reached before a failure, if the run failed.
    pub fn failed_at(&self) -> Option<HandoffState> {
        self.failed_at
    }

    /// The launcher, e.g. to inspect a test double after a run.
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Run the full sequence once.
    ///
    /// Regions acquired before a failure are released on the way out.
    pub fn run(&mut self) -> HandoffResult<HandoffReport> {
        let result = self.execute();
        if result.is_err() {
            self.failed_at = Some(self.state);
            self.state = HandoffState::Failed;
        }
        result
    }

    fn execute(&mut self) -> HandoffResult<HandoffReport> {
        debug_assert_eq!(self.state, HandoffState::Idle, "a handoff runs once");

        self.config.validate()?;
        let name = RegionName::new(&self.config.region.name)?;
        let policy = WaitPolicy::from_config(&self.config.wait);

        let mut object = ShmObject::create(name)?;
        self.advance(HandoffState::Created);

        object.resize(REGION_SIZE)?;
        self.advance(HandoffState::Sized);

        let mut region = object.map()?;
        self.advance(HandoffState::Mapped);

        let child = self.launcher.launch(&mut region)?;
        self.advance(HandoffState::ChildSpawned);
        info!(region = %region.name(), child = child.as_raw(), "child spawned, waiting");

        let exit = wait_for_child(child, policy, region.name().as_str())?;
        self.advance(HandoffState::ChildAwaited);
        exit.ensure_success(child)?;

        let value = region.read_value();
        self.advance(HandoffState::ValueRead);
        info!(region = %region.name(), value = format_args!("{value:#X}"), "value read");

        let release = region.release();
        self.advance(HandoffState::Released);

        Ok(HandoffReport {
            value,
            child_pid: child.as_raw(),
            release,
        })
    }

    fn advance(&mut self, next: HandoffState) {
        debug_assert_eq!(self.state.successor(), Some(next));
        debug!("handoff state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_order() {
        let mut state = HandoffState::default();
        let mut visited = vec![state];
        while let Some(next) = state.successor() {
            visited.push(next);
            state = next;
        }

        assert_eq!(
            visited,
            vec![
                HandoffState::Idle,
                HandoffState::Created,
                HandoffState::Sized,
                HandoffState::Mapped,
                HandoffState::ChildSpawned,
                HandoffState::ChildAwaited,
                HandoffState::ValueRead,
                HandoffState::Released,
            ]
        );
        assert!(state.is_terminal());
        assert!(HandoffState::Failed.is_terminal());
        assert!(!HandoffState::Mapped.is_terminal());
    }

    #[test]
    fn test_report_line() {
        let report = HandoffReport {
            value: 0xDEAD_BEEF,
            child_pid: 1,
            release: ReleaseReport::default(),
        };
        assert_eq!(report.to_string(), "The child wrote 0xDEADBEEF");
    }

    #[test]
    fn test_invalid_name_fails_before_create() {
        let mut config = HandoffConfig::default();
        config.region.name = "/a/b".to_string();

        let mut handoff = Handoff::new(config);
        assert!(handoff.run().is_err());
        assert_eq!(handoff.state(), HandoffState::Failed);
        assert_eq!(handoff.failed_at(), Some(HandoffState::Idle));
    }
}

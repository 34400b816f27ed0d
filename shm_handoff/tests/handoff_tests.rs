//! Handoff sequence tests.
//!
//! Uses `fork()` through the real launcher for the success path, and
//! custom launchers to drive the failure paths: spawn refused, child
//! exiting non-zero, child that never terminates under a bounded wait.

use handoff_common::config::HandoffConfig;
use handoff_common::consts::SENTINEL_VALUE;
use nix::errno::Errno;
use nix::unistd::{ForkResult, Pid};
use shm_handoff::platform;
use shm_handoff::{
    ChildLauncher, Handoff, HandoffError, HandoffResult, HandoffState, ResourceOp, SharedRegion,
};
use std::time::{Duration, Instant};

fn config_for(tag: &str) -> HandoffConfig {
    let mut config = HandoffConfig::default();
    config.region.name = format!("/shm_handoff_it_{}_{tag}", std::process::id());
    config
}

fn region_exists(name: &str) -> bool {
    match platform::open_existing(name) {
        Ok(_) => true,
        Err(Errno::ENOENT) => false,
        Err(e) => panic!("unexpected shm_open error for {name}: {e}"),
    }
}

/// Refuses to create a child, as fork does under EAGAIN.
#[derive(Default)]
struct RefusingLauncher {
    attempts: u32,
}

impl ChildLauncher for RefusingLauncher {
    fn launch(&mut self, region: &mut SharedRegion) -> HandoffResult<Pid> {
        self.attempts += 1;
        Err(HandoffError::resource(
            ResourceOp::Spawn,
            region.name().as_str(),
            Errno::EAGAIN,
        ))
    }
}

/// Forks a child that writes `value` and exits with `status`.
struct ExitingLauncher {
    value: u32,
    status: i32,
}

impl ChildLauncher for ExitingLauncher {
    fn launch(&mut self, region: &mut SharedRegion) -> HandoffResult<Pid> {
        // Safety: the child only stores a word and calls _exit.
        match unsafe { platform::fork_process() } {
            Ok(ForkResult::Child) => {
                region.write_value(self.value);
                platform::exit_immediately(self.status)
            }
            Ok(ForkResult::Parent { child }) => Ok(child),
            Err(e) => Err(HandoffError::resource(
                ResourceOp::Spawn,
                region.name().as_str(),
                e,
            )),
        }
    }
}

/// Forks a child that sleeps far past any test timeout.
#[derive(Default)]
struct StallingLauncher {
    child: Option<Pid>,
}

impl ChildLauncher for StallingLauncher {
    fn launch(&mut self, region: &mut SharedRegion) -> HandoffResult<Pid> {
        // Safety: the child only sleeps (nanosleep) and calls _exit.
        match unsafe { platform::fork_process() } {
            Ok(ForkResult::Child) => {
                std::thread::sleep(Duration::from_secs(60));
                platform::exit_immediately(0)
            }
            Ok(ForkResult::Parent { child }) => {
                self.child = Some(child);
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

#[test]
fn child_write_is_observed_by_parent() {
    let config = config_for("success");
    let name = config.region.name.clone();

    let mut handoff = Handoff::new(config);
    let report = handoff.run().expect("handoff");

    assert_eq!(report.value, SENTINEL_VALUE);
    assert_eq!(report.to_string(), "The child wrote 0xDEADBEEF");
    assert!(report.child_pid > 0);
    assert!(report.release.is_clean(), "{:?}", report.release);
    assert_eq!(handoff.state(), HandoffState::Released);
    assert_eq!(handoff.failed_at(), None);
    assert!(!region_exists(&name), "region must be unlinked after release");
}

#[test]
fn repeated_runs_with_same_name_succeed() {
    for _ in 0..2 {
        let mut handoff = Handoff::new(config_for("repeat"));
        let report = handoff.run().expect("handoff");
        assert_eq!(report.value, SENTINEL_VALUE);
    }
}

#[test]
fn pre_existing_object_is_reused() {
    let config = config_for("preexisting");
    let name = config.region.name.clone();
    let fd = platform::open_region(&name).expect("pre-create");
    platform::close_descriptor(fd).expect("close");

    let report = Handoff::new(config).run().expect("handoff");
    assert_eq!(report.value, SENTINEL_VALUE);
    assert!(!region_exists(&name));
}

#[test]
fn spawn_failure_skips_wait_and_releases_region() {
    let config = config_for("refused");
    let name = config.region.name.clone();

    let mut handoff = Handoff::with_launcher(config, RefusingLauncher::default());
    let err = handoff.run().unwrap_err();

    assert_eq!(err.op(), Some(ResourceOp::Spawn));
    assert!(err.to_string().starts_with("fork failed"));
    assert_eq!(handoff.launcher().attempts, 1);
    assert_eq!(handoff.state(), HandoffState::Failed);
    // Never reached ChildSpawned, so the wait step never ran.
    assert_eq!(handoff.failed_at(), Some(HandoffState::Mapped));
    assert!(!region_exists(&name));
}

#[test]
fn create_failure_happens_before_spawn() {
    let mut config = config_for("toolong");
    config.region.name = format!("/{}", "x".repeat(300));

    let mut handoff = Handoff::with_launcher(config, RefusingLauncher::default());
    let err = handoff.run().unwrap_err();

    assert_eq!(err.op(), Some(ResourceOp::Create));
    assert_eq!(handoff.launcher().attempts, 0);
    assert_eq!(handoff.failed_at(), Some(HandoffState::Idle));
}

#[test]
fn custom_value_written_by_child_is_read() {
    let launcher = ExitingLauncher {
        value: 0x0123_4567,
        status: 0,
    };
    let report = Handoff::with_launcher(config_for("custom"), launcher)
        .run()
        .expect("handoff");

    assert_eq!(report.value, 0x0123_4567);
    assert_eq!(report.to_string(), "The child wrote 0x1234567");
}

#[test]
fn child_failure_is_reported() {
    let config = config_for("childfail");
    let name = config.region.name.clone();
    let launcher = ExitingLauncher {
        value: SENTINEL_VALUE,
        status: 3,
    };

    let mut handoff = Handoff::with_launcher(config, launcher);
    let err = handoff.run().unwrap_err();

    assert!(matches!(err, HandoffError::ChildFailed { .. }), "{err}");
    assert_eq!(handoff.failed_at(), Some(HandoffState::ChildAwaited));
    assert!(!region_exists(&name));
}

#[test]
fn bounded_wait_times_out_and_reaps_child() {
    let mut config = config_for("timeout");
    config.wait.timeout_ms = Some(200);
    config.wait.poll_interval_ms = 10;
    let name = config.region.name.clone();

    let start = Instant::now();
    let mut handoff = Handoff::with_launcher(config, StallingLauncher::default());
    let err = handoff.run().unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, HandoffError::Timeout { .. }), "{err}");
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(30));
    assert_eq!(handoff.failed_at(), Some(HandoffState::ChildSpawned));

    let child = handoff.launcher().child.expect("child pid");
    assert!(!platform::is_process_alive(child), "child must be killed and reaped");
    assert!(!region_exists(&name));
}

#[test]
fn bounded_wait_succeeds_for_prompt_child() {
    let mut config = config_for("bounded_ok");
    config.wait.timeout_ms = Some(10_000);

    let report = Handoff::new(config).run().expect("handoff");
    assert_eq!(report.value, SENTINEL_VALUE);
}

//! Named shared memory region holding a single value
//!
//! The region is built in two stages. [`ShmObject`] owns the descriptor and
//! the name; [`ShmObject::map`] turns it into a [`SharedRegion`] that also
//! owns the mapping. Both stages release whatever they hold on drop, so an
//! early failure never leaves the name behind in the parent.
//!
//! A forked child inherits the mapping and must leave through
//! [`crate::platform::exit_immediately`], otherwise its copy of these
//! destructors would unlink the region under the parent.

use crate::error::{HandoffError, HandoffResult, ResourceOp};
use crate::platform;
use handoff_common::consts::SentinelValue;
use std::ffi::c_void;
use std::fmt;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;
use tracing::{debug, warn};

/// Validated POSIX shared memory object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionName(String);

impl RegionName {
    /// Normalize `raw` to the `/name` form.
    ///
    /// A missing leading slash is added. Length limits are left to the OS.
    pub fn new(raw: &str) -> HandoffResult<Self> {
        let invalid = |reason| HandoffError::InvalidName {
            name: raw.to_string(),
            reason,
        };

        let body = raw.strip_prefix('/').unwrap_or(raw);
        if body.is_empty() {
            return Err(invalid("name is empty"));
        }
        if body.contains('/') {
            return Err(invalid("only a single leading '/' is allowed"));
        }
        if body.contains('\0') {
            return Err(invalid("name contains a NUL byte"));
        }

        Ok(Self(format!("/{body}")))
    }

    /// Name as passed to `shm_open`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Teardown step that can fail without aborting the handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    /// Remove the mapping.
    Unmap,
    /// Close the descriptor.
    Close,
    /// Remove the name from the namespace.
    Unlink,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unmap => "munmap",
            Self::Close => "close",
            Self::Unlink => "shm_unlink",
        })
    }
}

/// Outcome of releasing a region: the teardown steps that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Failed steps with their OS errors, in teardown order.
    pub failures: Vec<(CleanupStep, nix::Error)>,
}

impl ReleaseReport {
    /// True if every teardown step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: CleanupStep, name: &RegionName, result: nix::Result<()>) {
        match result {
            Ok(()) => debug!(region = %name, "{step} ok"),
            Err(e) => {
                warn!(region = %name, "{step} failed: {e}");
                self.failures.push((step, e));
            }
        }
    }
}

/// Named, sized but not yet mapped shared memory object.
#[derive(Debug)]
pub struct ShmObject {
    name: RegionName,
    fd: Option<OwnedFd>,
    len: usize,
    linked: bool,
}

impl ShmObject {
    /// Create the object if absent and open it read/write.
    pub fn create(name: RegionName) -> HandoffResult<Self> {
        let fd = platform::open_region(name.as_str())
            .map_err(|e| HandoffError::resource(ResourceOp::Create, name.as_str(), e))?;
        debug!(region = %name, "shm_open ok");

        Ok(Self {
            name,
            fd: Some(fd),
            len: 0,
            linked: true,
        })
    }

    /// Set the object to exactly `len` bytes.
    pub fn resize(&mut self, len: usize) -> HandoffResult<()> {
        let fd = self.descriptor(ResourceOp::Resize)?;
        platform::resize_region(fd, len)
            .map_err(|e| HandoffError::resource(ResourceOp::Resize, self.name.as_str(), e))?;
        self.len = len;
        debug!(region = %self.name, len, "ftruncate ok");
        Ok(())
    }

    /// Map the whole object shared and read/write.
    ///
    /// On failure the object is dropped, which closes and unlinks it.
    pub fn map(self) -> HandoffResult<SharedRegion> {
        if self.len < size_of::<SentinelValue>() {
            return Err(HandoffError::resource(
                ResourceOp::Map,
                self.name.as_str(),
                nix::Error::EINVAL,
            ));
        }

        let fd = self.descriptor(ResourceOp::Map)?;
        let addr = platform::map_region(fd, self.len)
            .map_err(|e| HandoffError::resource(ResourceOp::Map, self.name.as_str(), e))?;
        debug!(region = %self.name, addr = ?addr, "mmap ok");

        Ok(SharedRegion {
            object: self,
            addr,
            mapped: true,
        })
    }

    /// Object name.
    pub fn name(&self) -> &RegionName {
        &self.name
    }

    /// Current size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True until the object has been sized.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn descriptor(&self, op: ResourceOp) -> HandoffResult<&OwnedFd> {
        self.fd
            .as_ref()
            .ok_or_else(|| HandoffError::resource(op, self.name.as_str(), nix::Error::EBADF))
    }

    fn close_and_unlink(&mut self, report: &mut ReleaseReport) {
        if let Some(fd) = self.fd.take() {
            report.record(CleanupStep::Close, &self.name, platform::close_descriptor(fd));
        }
        if self.linked {
            self.linked = false;
            report.record(
                CleanupStep::Unlink,
                &self.name,
                platform::unlink_region(self.name.as_str()),
            );
        }
    }
}

impl Drop for ShmObject {
    fn drop(&mut self) {
        self.close_and_unlink(&mut ReleaseReport::default());
    }
}

/// Mapped region exactly one [`SentinelValue`] wide.
#[derive(Debug)]
pub struct SharedRegion {
    object: ShmObject,
    addr: NonNull<c_void>,
    mapped: bool,
}

impl SharedRegion {
    /// Region name.
    pub fn name(&self) -> &RegionName {
        self.object.name()
    }

    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.object.len()
    }

    /// Always false: a region is never mapped with zero length.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Store `value` in the region.
    ///
    /// Performs no allocation or locking, so it is usable in a forked child.
    pub fn write_value(&mut self, value: SentinelValue) {
        // Safety: the mapping is live, at least one aligned word long
        // (mmap returns page-aligned addresses) and owned by self.
        unsafe { self.word().as_ptr().write_volatile(value) }
    }

    /// Load the value currently stored in the region.
    pub fn read_value(&self) -> SentinelValue {
        // Safety: see write_value.
        unsafe { self.word().as_ptr().read_volatile() }
    }

    /// Unmap, close and unlink, logging each failed step as a warning.
    pub fn release(mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        self.unmap(&mut report);
        self.object.close_and_unlink(&mut report);
        report
    }

    fn word(&self) -> NonNull<SentinelValue> {
        self.addr.cast()
    }

    fn unmap(&mut self, report: &mut ReleaseReport) {
        if self.mapped {
            self.mapped = false;
            // Safety: the mapping is live and no reference into it escapes self.
            let result = unsafe { platform::unmap_region(self.addr, self.object.len()) };
            report.record(CleanupStep::Unmap, self.object.name(), result);
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // The inner ShmObject closes and unlinks after this.
        self.unmap(&mut ReleaseReport::default());
    }
}

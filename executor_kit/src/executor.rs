//! Executor contract
//!
//! An executor is layered from independent capabilities:
//!
//! - [`StorageExecutor`]: required base functions (instance ID, next device,
//!   local devices)
//! - [`SupportedProbe`]: optional check that the executor applies to this host
//! - [`MountExecutor`]: optional mount/unmount extension
//! - [`ExecutorCli`]: the composite a command-line tool or client library is
//!   built against; adds [`ExecutorCli::wait_for_device`] and the capability
//!   query
//!
//! Optional capabilities are discovered through [`StorageExecutor::as_supported`]
//! and [`StorageExecutor::as_mount`], never through a type hierarchy.
//!
//! ```text
//! client ──► supported_ops() ──► CapabilityMask
//!    │                               │
//!    │        bit set? ◄─────────────┘
//!    ▼
//! wait_for_device() ──► local_devices() ─┬─ token found ──► Found(snapshot)
//!         ▲                              ├─ deadline hit ──► TimedOut(snapshot)
//!         └──── sleep(poll_interval) ◄───┤
//!                                        └─ error ────────► Err(e)
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capabilities::CapabilityMask;
use crate::context::Context;
use crate::devices::{
    DeviceMountOptions, InstanceId, LocalDevices, LocalDevicesOptions, WaitForDeviceOptions,
};
use crate::error::{ExecutorError, ExecutorResult};
use crate::store::Store;

/// Default interval between two device enumerations while waiting
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Functions required of every storage executor
///
/// Implementations must be thread-safe (`Send + Sync`); independent callers
/// may wait on devices concurrently.
pub trait StorageExecutor: Send + Sync {
    /// Driver name, used as the prefix of text output
    fn name(&self) -> &str;

    /// The local host's instance ID
    fn instance_id(&self, ctx: &Context, opts: &Store) -> ExecutorResult<InstanceId>;

    /// The next available device name for attaching a new volume
    fn next_device(&self, ctx: &Context, opts: &Store) -> ExecutorResult<String>;

    /// A fresh snapshot of the devices visible to the operating system
    fn local_devices(
        &self,
        ctx: &Context,
        opts: &LocalDevicesOptions,
    ) -> ExecutorResult<LocalDevices>;

    /// The supported-platform probe, if this executor provides one
    fn as_supported(&self) -> Option<&dyn SupportedProbe> {
        None
    }

    /// The mount extension, if this executor provides one
    fn as_mount(&self) -> Option<&dyn MountExecutor> {
        None
    }
}

/// Optional probe: is this executor applicable to the current host?
pub trait SupportedProbe: Send + Sync {
    /// `true` when the base functions may be trusted on this host
    fn supported(&self, ctx: &Context, opts: &Store) -> ExecutorResult<bool>;
}

/// Optional mount/unmount extension
pub trait MountExecutor: Send + Sync {
    /// Mount `device` at `mount_point`
    fn mount(
        &self,
        ctx: &Context,
        device: &str,
        mount_point: &Path,
        opts: &DeviceMountOptions,
    ) -> ExecutorResult<()>;

    /// Unmount whatever is mounted at `mount_point`
    fn unmount(&self, ctx: &Context, mount_point: &Path, opts: &Store) -> ExecutorResult<()>;
}

/// The interface a command-line tool or higher-level client is built against
pub trait ExecutorCli: StorageExecutor + MountExecutor {
    /// Block until the attach token appears in a local devices snapshot or
    /// the timeout expires, whichever comes first
    fn wait_for_device(
        &self,
        ctx: &Context,
        opts: &WaitForDeviceOptions,
    ) -> ExecutorResult<WaitOutcome>;

    /// Which of the six operations this executor supports on this host
    fn supported_ops(&self, ctx: &Context, opts: &Store) -> ExecutorResult<CapabilityMask>;
}

/// Terminal, non-error states of a device wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The token matched; carries the matching snapshot
    Found(LocalDevices),
    /// The timeout expired; carries the last snapshot taken
    TimedOut(LocalDevices),
}

impl WaitOutcome {
    pub fn matched(&self) -> bool {
        matches!(self, WaitOutcome::Found(_))
    }

    pub fn devices(&self) -> &LocalDevices {
        match self {
            WaitOutcome::Found(d) | WaitOutcome::TimedOut(d) => d,
        }
    }

    pub fn into_devices(self) -> LocalDevices {
        match self {
            WaitOutcome::Found(d) | WaitOutcome::TimedOut(d) => d,
        }
    }
}

/// Tuning for the device wait loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    poll_interval: Duration,
}

impl WaitPolicy {
    /// Intervals below one millisecond are raised to one millisecond
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

/// Poll `enumerate` until the token appears, the timeout expires, the
/// enumeration fails, or the context ends
///
/// - token found: `Ok(Found(snapshot))`
/// - timeout expired: `Ok(TimedOut(last snapshot))`; a zero timeout polls
///   exactly once
/// - enumeration failed: the error, immediately, with no retry
/// - context cancelled or past its deadline: `Cancelled`/`DeadlineExceeded`
pub fn wait_for_device<F>(
    ctx: &Context,
    opts: &WaitForDeviceOptions,
    policy: &WaitPolicy,
    mut enumerate: F,
) -> ExecutorResult<WaitOutcome>
where
    F: FnMut(&Context, &LocalDevicesOptions) -> ExecutorResult<LocalDevices>,
{
    let started = Instant::now();
    let deadline = started.checked_add(opts.timeout);
    let mut attempt: u32 = 0;

    loop {
        ctx.check()?;
        attempt += 1;

        let devices = enumerate(ctx, &opts.local_devices).map_err(|e| {
            if e.is_context_error() {
                log::debug!("Wait for '{}' interrupted: {}", opts.token, e);
            } else {
                log::warn!(
                    "Device enumeration failed while waiting for '{}' (attempt {}): {}",
                    opts.token,
                    attempt,
                    e
                );
            }
            e
        })?;

        if devices.matches(&opts.token) {
            log::info!(
                "Device for '{}' found after {} attempt(s) in {:?}",
                opts.token,
                attempt,
                started.elapsed()
            );
            return Ok(WaitOutcome::Found(devices));
        }

        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        };
        if remaining.is_zero() {
            log::info!(
                "Timed out waiting for '{}' after {} attempt(s)",
                opts.token,
                attempt
            );
            return Ok(WaitOutcome::TimedOut(devices));
        }

        log::debug!(
            "Device for '{}' not present ({} devices visible), retrying",
            opts.token,
            devices.len()
        );
        ctx.sleep(policy.poll_interval().min(remaining))?;
    }
}

/// In-process [`ExecutorCli`] over any [`StorageExecutor`]
#[derive(Clone)]
pub struct Lsx {
    executor: Arc<dyn StorageExecutor>,
    policy: WaitPolicy,
}

impl Lsx {
    pub fn new(executor: Arc<dyn StorageExecutor>) -> Self {
        Self {
            executor,
            policy: WaitPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl StorageExecutor for Lsx {
    fn name(&self) -> &str {
        self.executor.name()
    }

    fn instance_id(&self, ctx: &Context, opts: &Store) -> ExecutorResult<InstanceId> {
        ctx.check()?;
        self.executor.instance_id(ctx, opts)
    }

    fn next_device(&self, ctx: &Context, opts: &Store) -> ExecutorResult<String> {
        ctx.check()?;
        self.executor.next_device(ctx, opts)
    }

    fn local_devices(
        &self,
        ctx: &Context,
        opts: &LocalDevicesOptions,
    ) -> ExecutorResult<LocalDevices> {
        ctx.check()?;
        self.executor.local_devices(ctx, opts)
    }

    fn as_supported(&self) -> Option<&dyn SupportedProbe> {
        self.executor.as_supported()
    }

    fn as_mount(&self) -> Option<&dyn MountExecutor> {
        self.executor.as_mount()
    }
}

impl MountExecutor for Lsx {
    fn mount(
        &self,
        ctx: &Context,
        device: &str,
        mount_point: &Path,
        opts: &DeviceMountOptions,
    ) -> ExecutorResult<()> {
        ctx.check()?;
        match self.executor.as_mount() {
            Some(m) => m.mount(ctx, device, mount_point, opts),
            None => Err(ExecutorError::not_supported("mount")),
        }
    }

    fn unmount(&self, ctx: &Context, mount_point: &Path, opts: &Store) -> ExecutorResult<()> {
        ctx.check()?;
        match self.executor.as_mount() {
            Some(m) => m.unmount(ctx, mount_point, opts),
            None => Err(ExecutorError::not_supported("umount")),
        }
    }
}

impl ExecutorCli for Lsx {
    fn wait_for_device(
        &self,
        ctx: &Context,
        opts: &WaitForDeviceOptions,
    ) -> ExecutorResult<WaitOutcome> {
        wait_for_device(ctx, opts, &self.policy, |ctx, ld_opts| {
            self.executor.local_devices(ctx, ld_opts)
        })
    }

    fn supported_ops(&self, ctx: &Context, opts: &Store) -> ExecutorResult<CapabilityMask> {
        ctx.check()?;
        if let Some(probe) = self.executor.as_supported() {
            if !probe.supported(ctx, opts)? {
                log::debug!("Executor '{}' is not supported on this host", self.name());
                return Ok(CapabilityMask::NONE);
            }
        }

        let mut mask = CapabilityMask::ALL_NO_MOUNT;
        if self.executor.as_mount().is_some() {
            mask |= CapabilityMask::MOUNT | CapabilityMask::UMOUNT;
        }
        Ok(mask)
    }
}

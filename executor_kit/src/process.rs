//! Subprocess-backed executor client
//!
//! Invokes an executor binary as `<binary> <driver> <command> [args...]` and
//! translates the reserved exit codes:
//!
//! | exit code | meaning                                           |
//! |-----------|---------------------------------------------------|
//! | 0         | success, result on stdout                         |
//! | 2         | not implemented → `ExecutorError::NotSupported`   |
//! | 255       | `wait` timed out → `WaitOutcome::TimedOut`        |
//! | other     | hard failure → `ExecutorError::CommandFailed`     |
//!
//! Every call is an independent process; nothing is shared between polls
//! except the cached capability mask. The call's `Store` travels to the
//! child as JSON in the `LSX_OPTS` environment variable.
//!
//! On Unix each child leads its own process group, and cancellation kills
//! the whole group so helpers the executor spawned cannot hold its pipes open.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capabilities::CapabilityMask;
use crate::commands::{Command, ExitStatusKind};
use crate::context::Context;
use crate::devices::{
    DeviceMountOptions, InstanceId, LocalDevices, LocalDevicesOptions, WaitForDeviceOptions,
};
use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{ExecutorCli, MountExecutor, StorageExecutor, SupportedProbe, WaitOutcome};
use crate::store::Store;

/// Environment variable carrying the call's options to the executor binary
pub const OPTS_ENV_VAR: &str = "LSX_OPTS";

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of one executor invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: Command,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn status(&self) -> ExitStatusKind {
        ExitStatusKind::from_code(self.exit_code)
    }

    /// Stdout on success; not-implemented and failures become errors
    fn into_success(self) -> ExecutorResult<String> {
        match self.status() {
            ExitStatusKind::Success => Ok(self.stdout),
            ExitStatusKind::NotImplemented => Err(ExecutorError::not_supported(self.command.as_str())),
            ExitStatusKind::TimedOut | ExitStatusKind::Failed(_) => {
                Err(ExecutorError::CommandFailed {
                    command: self.command.to_string(),
                    code: self.exit_code,
                    stderr: self.stderr.trim().to_string(),
                })
            }
        }
    }
}

/// [`ExecutorCli`] that drives an executor binary
pub struct ProcessExecutor {
    binary: PathBuf,
    driver: String,
    command_timeout: Option<Duration>,
    capabilities: OnceLock<CapabilityMask>,
}

impl ProcessExecutor {
    pub fn new(binary: impl Into<PathBuf>, driver: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            driver: driver.into(),
            command_timeout: None,
            capabilities: OnceLock::new(),
        }
    }

    /// Bound every invocation except `wait`, which carries its own timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Capability mask from the last successful `supported` call, if any
    pub fn cached_capabilities(&self) -> Option<CapabilityMask> {
        self.capabilities.get().copied()
    }

    /// Run one executor command and capture its output
    pub fn run(
        &self,
        ctx: &Context,
        command: Command,
        args: &[String],
        opts: &Store,
    ) -> ExecutorResult<CommandOutput> {
        ctx.check()?;

        let ctx = match (command, self.command_timeout) {
            (Command::WaitForDevice, _) | (_, None) => ctx.clone(),
            (_, Some(timeout)) => ctx.with_timeout(timeout),
        };

        let mut process = ProcessCommand::new(&self.binary);
        process
            .arg(&self.driver)
            .arg(command.as_str())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            process.process_group(0);
        }
        if !opts.is_empty() {
            let json = serde_json::to_string(opts)
                .map_err(|e| ExecutorError::InvalidArgument(format!("unencodable options: {}", e)))?;
            process.env(OPTS_ENV_VAR, json);
        }

        log::debug!(
            "Running executor: {} {} {} {:?}",
            self.binary.display(),
            self.driver,
            command,
            args
        );

        let mut child = process.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit_code = wait_child(&ctx, &mut child)?;

        Ok(CommandOutput {
            command,
            exit_code,
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        })
    }

    /// Fail with `NotSupported` unless the executor advertises `required`
    fn require(
        &self,
        ctx: &Context,
        opts: &Store,
        required: CapabilityMask,
        op: &str,
    ) -> ExecutorResult<()> {
        let mask = self.supported_ops(ctx, opts)?;
        if mask.contains(required) {
            Ok(())
        } else {
            log::debug!(
                "Executor '{}' does not advertise '{}' (mask: {})",
                self.driver,
                op,
                mask
            );
            Err(ExecutorError::not_supported(op))
        }
    }

    fn parse_devices(&self, stdout: &str) -> ExecutorResult<LocalDevices> {
        let text = stdout.trim();
        if text.is_empty() {
            return Ok(LocalDevices::new(self.driver.clone(), Default::default()));
        }
        text.parse()
    }
}

/// Wait for the child to exit, killing it if the context ends first
fn wait_child(ctx: &Context, child: &mut Child) -> ExecutorResult<i32> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.code().unwrap_or(-1));
        }
        if let Err(e) = ctx.sleep(CHILD_POLL_INTERVAL) {
            log::warn!("Killing executor process {}: {}", child.id(), e);
            kill_process_group(child);
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    // SAFETY: the child leads its own group (`process_group(0)`) and has not
    // been reaped yet, so the negated pid names only that group.
    let rc = unsafe { libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        log::debug!(
            "Failed to kill process group {}: {}",
            child.id(),
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

impl StorageExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        &self.driver
    }

    fn instance_id(&self, ctx: &Context, opts: &Store) -> ExecutorResult<InstanceId> {
        let stdout = self.run(ctx, Command::InstanceId, &[], opts)?.into_success()?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| ExecutorError::InvalidOutput(format!("instance ID: {}", e)))
    }

    fn next_device(&self, ctx: &Context, opts: &Store) -> ExecutorResult<String> {
        let stdout = self.run(ctx, Command::NextDevice, &[], opts)?.into_success()?;
        let device = stdout.trim();
        if device.is_empty() {
            return Err(ExecutorError::InvalidOutput("empty next device".to_string()));
        }
        Ok(device.to_string())
    }

    fn local_devices(
        &self,
        ctx: &Context,
        opts: &LocalDevicesOptions,
    ) -> ExecutorResult<LocalDevices> {
        let args = [opts.scan_type.to_string()];
        let stdout = self
            .run(ctx, Command::LocalDevices, &args, &opts.opts)?
            .into_success()?;
        self.parse_devices(&stdout)
    }

    fn as_supported(&self) -> Option<&dyn SupportedProbe> {
        Some(self)
    }

    fn as_mount(&self) -> Option<&dyn MountExecutor> {
        Some(self)
    }
}

impl SupportedProbe for ProcessExecutor {
    fn supported(&self, ctx: &Context, opts: &Store) -> ExecutorResult<bool> {
        Ok(!self.supported_ops(ctx, opts)?.is_empty())
    }
}

impl MountExecutor for ProcessExecutor {
    fn mount(
        &self,
        ctx: &Context,
        device: &str,
        mount_point: &Path,
        opts: &DeviceMountOptions,
    ) -> ExecutorResult<()> {
        self.require(ctx, &opts.opts, CapabilityMask::MOUNT, Command::Mount.as_str())?;

        let mut args = vec![device.to_string(), mount_point.display().to_string()];
        for option in &opts.mount_options {
            args.push("--option".to_string());
            args.push(option.clone());
        }
        if let Some(label) = &opts.mount_label {
            args.push("--label".to_string());
            args.push(label.clone());
        }

        self.run(ctx, Command::Mount, &args, &opts.opts)?
            .into_success()
            .map(|_| ())
    }

    fn unmount(&self, ctx: &Context, mount_point: &Path, opts: &Store) -> ExecutorResult<()> {
        self.require(ctx, opts, CapabilityMask::UMOUNT, Command::Umount.as_str())?;

        let args = [mount_point.display().to_string()];
        self.run(ctx, Command::Umount, &args, opts)?
            .into_success()
            .map(|_| ())
    }
}

impl ExecutorCli for ProcessExecutor {
    fn wait_for_device(
        &self,
        ctx: &Context,
        opts: &WaitForDeviceOptions,
    ) -> ExecutorResult<WaitOutcome> {
        let store = &opts.local_devices.opts;
        self.require(
            ctx,
            store,
            CapabilityMask::WAIT_FOR_DEVICE,
            Command::WaitForDevice.as_str(),
        )?;

        let args = [
            opts.local_devices.scan_type.to_string(),
            opts.token.clone(),
            format!("{}ms", opts.timeout.as_millis()),
        ];
        let output = self.run(ctx, Command::WaitForDevice, &args, store)?;

        match output.status() {
            ExitStatusKind::Success => Ok(WaitOutcome::Found(self.parse_devices(&output.stdout)?)),
            ExitStatusKind::TimedOut => {
                Ok(WaitOutcome::TimedOut(self.parse_devices(&output.stdout)?))
            }
            _ => Err(output
                .into_success()
                .err()
                .unwrap_or_else(|| ExecutorError::InvalidOutput("unexpected exit status".into()))),
        }
    }

    fn supported_ops(&self, ctx: &Context, opts: &Store) -> ExecutorResult<CapabilityMask> {
        if let Some(mask) = self.cached_capabilities() {
            return Ok(mask);
        }

        let output = self.run(ctx, Command::Supported, &[], opts)?;
        let mask = match output.status() {
            // No probe: trust the base functions, as the in-process adapter does
            ExitStatusKind::NotImplemented => CapabilityMask::ALL_NO_MOUNT,
            _ => {
                let stdout = output.into_success()?;
                let text = stdout.trim();
                match text {
                    "true" => CapabilityMask::ALL_NO_MOUNT,
                    "false" => CapabilityMask::NONE,
                    _ => text.parse::<u32>().map(CapabilityMask::from_bits).map_err(|_| {
                        ExecutorError::InvalidOutput(format!("invalid capability mask: {}", text))
                    })?,
                }
            }
        };

        log::debug!("Executor '{}' capabilities: {}", self.driver, mask);
        Ok(*self.capabilities.get_or_init(|| mask))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_success_maps_reserved_codes() {
        let output = |code| CommandOutput {
            command: Command::Mount,
            exit_code: code,
            stdout: "ok".to_string(),
            stderr: "boom\n".to_string(),
        };

        assert_eq!(output(0).into_success().unwrap(), "ok");
        assert!(output(2).into_success().unwrap_err().is_not_supported());
        match output(32).into_success().unwrap_err() {
            ExecutorError::CommandFailed {
                command,
                code,
                stderr,
            } => {
                assert_eq!(command, "mount");
                assert_eq!(code, 32);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let exec = ProcessExecutor::new("/definitely/not/an/executor", "vfs");
        let err = exec
            .next_device(&Context::background(), &Store::new())
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Io(_)));
    }

    #[cfg(unix)]
    mod unix_tests {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        /// Write a fake executor script; `$2` is the command name
        fn fake_executor(name: &str, body: &str) -> PathBuf {
            let dir = std::env::temp_dir().join(format!(
                "lsx_process_test_{}_{}",
                std::process::id(),
                name
            ));
            let _ = fs::create_dir_all(&dir);
            let path = dir.join("lsx");
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn cleanup(path: &Path) {
            if let Some(dir) = path.parent() {
                let _ = fs::remove_dir_all(dir);
            }
        }

        const FULL_SCRIPT: &str = r#"
case "$2" in
  instanceID) echo '{"id":"host-1","driver":"vfs"}' ;;
  nextDevice) echo "/dev/xvdc" ;;
  localDevices) echo "vfs=/dev/xvdb::vol-1" ;;
  supported) echo 15 ;;
  wait)
    if [ "$4" = "vol-1" ]; then echo "vfs=/dev/xvdb::vol-1"; exit 0; fi
    echo "vfs=/dev/xvdb::vol-1"; exit 255 ;;
  mount|umount) exit 2 ;;
  *) echo "unknown" >&2; exit 1 ;;
esac
"#;

        #[test]
        fn test_base_functions() {
            let bin = fake_executor("base", FULL_SCRIPT);
            let exec = ProcessExecutor::new(&bin, "vfs");
            let ctx = Context::background();

            let iid = exec.instance_id(&ctx, &Store::new()).unwrap();
            assert_eq!(iid, InstanceId::new("vfs", "host-1"));

            assert_eq!(exec.next_device(&ctx, &Store::new()).unwrap(), "/dev/xvdc");

            let devices = exec
                .local_devices(&ctx, &LocalDevicesOptions::default())
                .unwrap();
            assert!(devices.matches("vol-1"));

            cleanup(&bin);
        }

        #[test]
        fn test_supported_ops_parsed_and_cached() {
            let bin = fake_executor("supported", FULL_SCRIPT);
            let exec = ProcessExecutor::new(&bin, "vfs");
            let ctx = Context::background();

            assert!(exec.cached_capabilities().is_none());
            let mask = exec.supported_ops(&ctx, &Store::new()).unwrap();
            assert_eq!(mask, CapabilityMask::ALL_NO_MOUNT);
            assert_eq!(exec.cached_capabilities(), Some(mask));
            assert!(exec.supported(&ctx, &Store::new()).unwrap());

            cleanup(&bin);
        }

        #[test]
        fn test_wait_found_and_timed_out() {
            let bin = fake_executor("wait", FULL_SCRIPT);
            let exec = ProcessExecutor::new(&bin, "vfs");
            let ctx = Context::background();

            let found = exec
                .wait_for_device(&ctx, &WaitForDeviceOptions::new("vol-1", Duration::ZERO))
                .unwrap();
            assert!(found.matched());

            let timed_out = exec
                .wait_for_device(&ctx, &WaitForDeviceOptions::new("vol-2", Duration::ZERO))
                .unwrap();
            assert!(!timed_out.matched());
            assert_eq!(timed_out.devices().len(), 1);

            cleanup(&bin);
        }

        #[test]
        fn test_mount_refused_without_capability_bit() {
            let bin = fake_executor("mount", FULL_SCRIPT);
            let exec = ProcessExecutor::new(&bin, "vfs");

            let err = exec
                .mount(
                    &Context::background(),
                    "/dev/xvdb",
                    Path::new("/mnt/data"),
                    &DeviceMountOptions::default(),
                )
                .unwrap_err();
            assert!(err.is_not_supported());

            cleanup(&bin);
        }

        #[test]
        fn test_not_implemented_exit_code() {
            let bin = fake_executor("notimpl", "exit 2");
            let exec = ProcessExecutor::new(&bin, "vfs");
            let ctx = Context::background();

            assert!(exec
                .instance_id(&ctx, &Store::new())
                .unwrap_err()
                .is_not_supported());
            assert_eq!(
                exec.supported_ops(&ctx, &Store::new()).unwrap(),
                CapabilityMask::ALL_NO_MOUNT
            );

            cleanup(&bin);
        }

        #[test]
        fn test_missing_probe_still_allows_wait() {
            let script = r#"
case "$2" in
  supported) exit 2 ;;
  wait) echo "vfs=/dev/xvdb::vol-1"; exit 0 ;;
  *) exit 2 ;;
esac
"#;
            let bin = fake_executor("noprobe", script);
            let exec = ProcessExecutor::new(&bin, "vfs");
            let ctx = Context::background();

            let outcome = exec
                .wait_for_device(&ctx, &WaitForDeviceOptions::new("vol-1", Duration::ZERO))
                .unwrap();
            assert!(outcome.matched());
            assert!(exec.supported(&ctx, &Store::new()).unwrap());

            let err = exec
                .unmount(&ctx, Path::new("/mnt/data"), &Store::new())
                .unwrap_err();
            assert!(err.is_not_supported());

            cleanup(&bin);
        }

        #[test]
        fn test_hard_failure_is_command_failed() {
            let bin = fake_executor("fail", "echo 'no such driver' >&2\nexit 3");
            let exec = ProcessExecutor::new(&bin, "vfs");

            let err = exec
                .local_devices(&Context::background(), &LocalDevicesOptions::default())
                .unwrap_err();
            match err {
                ExecutorError::CommandFailed { code, stderr, .. } => {
                    assert_eq!(code, 3);
                    assert_eq!(stderr, "no such driver");
                }
                other => panic!("unexpected error: {:?}", other),
            }

            cleanup(&bin);
        }

        #[test]
        fn test_options_passed_through_environment() {
            let bin = fake_executor("env", "printf 'vfs=/dev/xvdb::%s' \"$LSX_OPTS\"");
            let exec = ProcessExecutor::new(&bin, "vfs");
            let opts = LocalDevicesOptions::default().with_opts(Store::new().with("k", "v"));

            let devices = exec.local_devices(&Context::background(), &opts).unwrap();
            assert!(devices.matches("{\"k\":\"v\"}"));

            cleanup(&bin);
        }

        #[test]
        fn test_cancel_kills_child() {
            let bin = fake_executor("slow", "sleep 30");
            let exec = ProcessExecutor::new(&bin, "vfs");
            let ctx = Context::background();
            let canceller = ctx.clone();
            let handle = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                canceller.cancel();
            });

            let start = Instant::now();
            let err = exec.next_device(&ctx, &Store::new()).unwrap_err();
            handle.join().unwrap();

            assert!(matches!(err, ExecutorError::Cancelled));
            assert!(start.elapsed() < Duration::from_secs(10));

            cleanup(&bin);
        }

        /// Running and not a zombie
        #[cfg(target_os = "linux")]
        fn process_alive(pid: &str) -> bool {
            match fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Ok(stat) => !stat
                    .rsplit_once(')')
                    .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                    .unwrap_or(false),
                Err(_) => false,
            }
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn test_cancel_kills_spawned_helpers() {
            let script = r#"
sleep 30 &
echo $! > "$(dirname "$0")/helper.pid"
wait
"#;
            let bin = fake_executor("helpers", script);
            let pid_file = bin.parent().unwrap().join("helper.pid");
            let exec =
                ProcessExecutor::new(&bin, "vfs").with_command_timeout(Duration::from_millis(200));

            let err = exec
                .next_device(&Context::background(), &Store::new())
                .unwrap_err();
            assert!(matches!(err, ExecutorError::DeadlineExceeded));

            let pid = fs::read_to_string(&pid_file).unwrap().trim().to_string();
            let deadline = Instant::now() + Duration::from_secs(5);
            while process_alive(&pid) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            assert!(!process_alive(&pid), "helper {} outlived its executor", pid);

            cleanup(&bin);
        }

        #[test]
        fn test_command_timeout_applies() {
            let bin = fake_executor("timeout", "sleep 30");
            let exec =
                ProcessExecutor::new(&bin, "vfs").with_command_timeout(Duration::from_millis(100));

            let err = exec
                .next_device(&Context::background(), &Store::new())
                .unwrap_err();
            assert!(matches!(err, ExecutorError::DeadlineExceeded));

            cleanup(&bin);
        }
    }
}

//! Command vocabulary and exit-code protocol for out-of-process executors
//!
//! These values are a fixed, bit-exact protocol between a client and an
//! executor binary. Only the process-boundary adapters (`lsx` binary and
//! [`crate::process::ProcessExecutor`]) translate between exit codes and
//! [`crate::error::ExecutorError`].

use std::fmt;
use std::str::FromStr;

use crate::error::ExecutorError;

/// Exit code for "function not implemented on this platform"
pub const EXIT_CODE_NOT_IMPLEMENTED: i32 = 2;

/// Exit code for "operation timed out"
pub const EXIT_CODE_TIMED_OUT: i32 = 255;

/// Exit code for success
pub const EXIT_CODE_SUCCESS: i32 = 0;

/// Commands an executor binary must recognise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    InstanceId,
    LocalDevices,
    NextDevice,
    WaitForDevice,
    Supported,
    Mount,
    Umount,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::InstanceId,
        Command::LocalDevices,
        Command::NextDevice,
        Command::WaitForDevice,
        Command::Supported,
        Command::Mount,
        Command::Umount,
    ];

    /// Name used on the executor command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::InstanceId => "instanceID",
            Command::LocalDevices => "localDevices",
            Command::NextDevice => "nextDevice",
            Command::WaitForDevice => "wait",
            Command::Supported => "supported",
            Command::Mount => "mount",
            Command::Umount => "umount",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ExecutorError::InvalidArgument(format!("unknown command: {}", s)))
    }
}

/// How a client should read an executor's exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatusKind {
    Success,
    NotImplemented,
    TimedOut,
    Failed(i32),
}

impl ExitStatusKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            EXIT_CODE_SUCCESS => ExitStatusKind::Success,
            EXIT_CODE_NOT_IMPLEMENTED => ExitStatusKind::NotImplemented,
            EXIT_CODE_TIMED_OUT => ExitStatusKind::TimedOut,
            other => ExitStatusKind::Failed(other),
        }
    }
}

/// Exit code an executor binary reports for a failed operation
///
/// `NotSupported` maps to the reserved not-implemented code; everything else
/// is a generic failure.
pub fn exit_code_for_error(err: &ExecutorError) -> i32 {
    match err {
        ExecutorError::NotSupported { .. } => EXIT_CODE_NOT_IMPLEMENTED,
        ExecutorError::CommandFailed { code, .. }
            if *code != EXIT_CODE_SUCCESS
                && *code != EXIT_CODE_NOT_IMPLEMENTED
                && *code != EXIT_CODE_TIMED_OUT =>
        {
            *code
        }
        _ => 1,
    }
}

//! Command-line interface parsing
//!
//! The command names are protocol constants shared with
//! `executor_kit::commands::Command`; clients invoke this binary as
//! `lsx <driver> <command> [args...]`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use executor_kit::Command;

/// Storage executor: host identity, local devices, and mounts
#[derive(Debug, Parser)]
#[command(name = "lsx", version, about)]
pub struct Cli {
    /// Configuration file (defaults to $LSX_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Storage driver to execute
    pub driver: String,

    #[command(subcommand)]
    pub command: LsxCommand,
}

/// Executor commands
#[derive(Debug, Subcommand)]
pub enum LsxCommand {
    /// Print the local instance ID as JSON
    #[command(name = "instanceID")]
    InstanceId,

    /// Print the next available device name
    #[command(name = "nextDevice")]
    NextDevice,

    /// Print the local devices as driver=dev::vol,...
    #[command(name = "localDevices")]
    LocalDevices {
        /// quick | deep | 0 | 1 (anything else means quick)
        #[arg(default_value = "quick")]
        scan_type: String,
    },

    /// Wait for a device to appear; exits 255 on timeout
    #[command(name = "wait")]
    Wait {
        /// quick | deep | 0 | 1 (anything else means quick)
        scan_type: String,

        /// Attach token returned by the remote attach call
        token: String,

        /// Maximum wait, e.g. 30s, 500ms, 1m
        timeout: String,
    },

    /// Print the supported operations bitmask
    #[command(name = "supported")]
    Supported,

    /// Mount a device to a path
    #[command(name = "mount")]
    Mount {
        device: String,

        path: PathBuf,

        /// Mount option, repeatable
        #[arg(long = "option", short = 'o')]
        options: Vec<String>,

        /// Security label for the mount
        #[arg(long)]
        label: Option<String>,
    },

    /// Unmount a path
    #[command(name = "umount")]
    Umount { path: PathBuf },
}

impl LsxCommand {
    /// Protocol command this invocation runs
    pub fn command(&self) -> Command {
        match self {
            LsxCommand::InstanceId => Command::InstanceId,
            LsxCommand::NextDevice => Command::NextDevice,
            LsxCommand::LocalDevices { .. } => Command::LocalDevices,
            LsxCommand::Wait { .. } => Command::WaitForDevice,
            LsxCommand::Supported => Command::Supported,
            LsxCommand::Mount { .. } => Command::Mount,
            LsxCommand::Umount { .. } => Command::Umount,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_protocol_command_names() {
        assert!(matches!(
            parse(&["lsx", "vfs", "instanceID"]).command,
            LsxCommand::InstanceId
        ));
        assert!(matches!(
            parse(&["lsx", "vfs", "nextDevice"]).command,
            LsxCommand::NextDevice
        ));
        assert!(matches!(
            parse(&["lsx", "vfs", "supported"]).command,
            LsxCommand::Supported
        ));
    }

    #[test]
    fn test_local_devices_default_scan_type() {
        match parse(&["lsx", "vfs", "localDevices"]).command {
            LsxCommand::LocalDevices { scan_type } => assert_eq!(scan_type, "quick"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_wait_arguments() {
        let cli = parse(&["lsx", "-v", "vfs", "wait", "deep", "vol-1", "30s"]);
        assert!(cli.verbose);
        assert_eq!(cli.driver, "vfs");
        match cli.command {
            LsxCommand::Wait {
                scan_type,
                token,
                timeout,
            } => {
                assert_eq!(scan_type, "deep");
                assert_eq!(token, "vol-1");
                assert_eq!(timeout, "30s");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_mount_options() {
        let cli = parse(&[
            "lsx", "vfs", "mount", "/dev/xvdb", "/mnt/data", "--option", "ro", "-o", "noatime",
            "--label", "svirt",
        ]);
        match cli.command {
            LsxCommand::Mount {
                device,
                path,
                options,
                label,
            } => {
                assert_eq!(device, "/dev/xvdb");
                assert_eq!(path, PathBuf::from("/mnt/data"));
                assert_eq!(options, vec!["ro", "noatime"]);
                assert_eq!(label.as_deref(), Some("svirt"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_names_match_protocol() {
        for command in Command::ALL {
            let extra: &[&str] = match command {
                Command::WaitForDevice => &["quick", "vol-1", "1s"],
                Command::Mount => &["/dev/xvdb", "/mnt/data"],
                Command::Umount => &["/mnt/data"],
                _ => &[],
            };
            let mut args = vec!["lsx", "vfs", command.as_str()];
            args.extend_from_slice(extra);
            assert_eq!(parse(&args).command.command(), command);
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["lsx", "vfs", "attach"]).is_err());
        assert!(Cli::try_parse_from(["lsx", "vfs", "instanceid"]).is_err());
    }
}

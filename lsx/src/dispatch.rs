//! Command dispatch
//!
//! Runs one executor command and turns the result into stdout text and an
//! exit code. This is the only place in the binary that knows the reserved
//! exit codes.

use std::io::Write;

use executor_kit::commands::{
    exit_code_for_error, EXIT_CODE_NOT_IMPLEMENTED, EXIT_CODE_SUCCESS, EXIT_CODE_TIMED_OUT,
};
use executor_kit::process::OPTS_ENV_VAR;
use executor_kit::store::parse_duration;
use executor_kit::{
    CapabilityMask, Command, Context, DeviceMountOptions, ExecutorCli, ExecutorError,
    ExecutorRegistry, LocalDevicesOptions, Lsx, MountExecutor, RegistryError, ScanType,
    StorageExecutor, Store, WaitForDeviceOptions, WaitOutcome, WaitPolicy,
};

use crate::cli::{Cli, LsxCommand};
use crate::config::LsxConfig;

/// Exit code for failures outside the executor (bad config, bad arguments)
pub const EXIT_CODE_USAGE: i32 = 1;

/// Run the parsed command line, writing results to `out`
pub fn run(cli: &Cli, out: &mut dyn Write) -> i32 {
    let config = match LsxConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CODE_USAGE;
        }
    };

    let call_opts = match call_options() {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return EXIT_CODE_USAGE;
        }
    };

    let registry = ExecutorRegistry::with_builtin();
    let mut driver_config = config.driver_store(&cli.driver);
    driver_config.merge(&call_opts);

    let executor = match registry.create(&cli.driver, &driver_config) {
        Ok(e) => e,
        Err(e @ RegistryError::UnknownDriver { .. }) => {
            log::warn!("{}", e);
            return EXIT_CODE_NOT_IMPLEMENTED;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CODE_USAGE;
        }
    };

    let lsx = Lsx::new(executor).with_policy(WaitPolicy::new(config.poll_interval()));
    let ctx = Context::background();

    match execute(&lsx, &ctx, &cli.command, &call_opts, out) {
        Ok(code) => code,
        Err(e) => {
            let code = exit_code_for_error(&e);
            if code == EXIT_CODE_NOT_IMPLEMENTED {
                log::info!("{}", e);
            } else {
                eprintln!("Error: {}", e);
            }
            code
        }
    }
}

/// Options passed by a client through `$LSX_OPTS`
fn call_options() -> Result<Store, String> {
    match std::env::var(OPTS_ENV_VAR) {
        Ok(json) if !json.trim().is_empty() => serde_json::from_str(&json)
            .map_err(|e| format!("invalid {}: {}", OPTS_ENV_VAR, e)),
        _ => Ok(Store::new()),
    }
}

/// Execute one command against an executor, returning the exit code
pub fn execute(
    lsx: &dyn ExecutorCli,
    ctx: &Context,
    command: &LsxCommand,
    opts: &Store,
    out: &mut dyn Write,
) -> Result<i32, ExecutorError> {
    let mask = lsx.supported_ops(ctx, opts)?;
    let op = command.command();
    log::debug!("Driver '{}' supports: {}", lsx.name(), mask);

    match command {
        LsxCommand::Supported => {
            emit(out, &mask.bits().to_string())?;
        }
        LsxCommand::InstanceId => {
            require(mask, CapabilityMask::INSTANCE_ID, op)?;
            let iid = lsx.instance_id(ctx, opts)?;
            let json = serde_json::to_string(&iid)
                .map_err(|e| ExecutorError::InvalidOutput(e.to_string()))?;
            emit(out, &json)?;
        }
        LsxCommand::NextDevice => {
            require(mask, CapabilityMask::NEXT_DEVICE, op)?;
            emit(out, &lsx.next_device(ctx, opts)?)?;
        }
        LsxCommand::LocalDevices { scan_type } => {
            require(mask, CapabilityMask::LOCAL_DEVICES, op)?;
            let ld_opts =
                LocalDevicesOptions::new(ScanType::parse(scan_type)).with_opts(opts.clone());
            emit(out, &lsx.local_devices(ctx, &ld_opts)?.to_string())?;
        }
        LsxCommand::Wait {
            scan_type,
            token,
            timeout,
        } => {
            require(mask, CapabilityMask::WAIT_FOR_DEVICE, op)?;
            let timeout = parse_duration(timeout).ok_or_else(|| {
                ExecutorError::InvalidArgument(format!("invalid timeout: {}", timeout))
            })?;
            let wait_opts = WaitForDeviceOptions::new(token.clone(), timeout)
                .with_scan_type(ScanType::parse(scan_type))
                .with_opts(opts.clone());

            return match lsx.wait_for_device(ctx, &wait_opts)? {
                WaitOutcome::Found(devices) => {
                    emit(out, &devices.to_string())?;
                    Ok(EXIT_CODE_SUCCESS)
                }
                WaitOutcome::TimedOut(devices) => {
                    emit(out, &devices.to_string())?;
                    Ok(EXIT_CODE_TIMED_OUT)
                }
            };
        }
        LsxCommand::Mount {
            device,
            path,
            options,
            label,
        } => {
            require(mask, CapabilityMask::MOUNT, op)?;
            let mount_opts = DeviceMountOptions {
                mount_options: options.clone(),
                mount_label: label.clone(),
                opts: opts.clone(),
            };
            lsx.mount(ctx, device, path, &mount_opts)?;
        }
        LsxCommand::Umount { path } => {
            require(mask, CapabilityMask::UMOUNT, op)?;
            lsx.unmount(ctx, path, opts)?;
        }
    }

    Ok(EXIT_CODE_SUCCESS)
}

fn require(mask: CapabilityMask, bit: CapabilityMask, op: Command) -> Result<(), ExecutorError> {
    if mask.contains(bit) {
        Ok(())
    } else {
        Err(ExecutorError::not_supported(op.as_str()))
    }
}

fn emit(out: &mut dyn Write, text: &str) -> Result<(), ExecutorError> {
    writeln!(out, "{}", text)?;
    Ok(())
}

//! # Executor Kit
//!
//! Contract between a storage-orchestration client and pluggable, per-platform
//! storage executors: small components that identify the host, enumerate
//! locally attached block devices, and mount/unmount them.
//!
//! ## Modules
//!
//! - `scan_type` - Scan depth with a parser that never fails
//! - `capabilities` - Bitmask of the operations an executor supports
//! - `executor` - Executor traits, the device wait loop, and the in-process `Lsx` adapter
//! - `process` - Client for executors running as a separate binary
//! - `commands` - Command vocabulary and reserved exit codes
//! - `devices` - Instance ID, local devices snapshots, and per-call options
//! - `context` - Cancellation and deadlines
//! - `store` - Key/value options bag
//! - `registry` - Driver name to executor factory
//! - `executors` - Bundled executor implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use executor_kit::{Context, ExecutorCli, ExecutorRegistry, Lsx, Store, WaitForDeviceOptions};
//!
//! let registry = ExecutorRegistry::with_builtin();
//! let executor = registry.create("vfs", &Store::new().with("vfs.root", "/var/lib/vfs"))?;
//! let lsx = Lsx::new(executor);
//!
//! // Ask first, then rely on the operation
//! let ctx = Context::background();
//! if lsx.supported_ops(&ctx, &Store::new())?.wait_for_device() {
//!     let opts = WaitForDeviceOptions::new("vol-0123", Duration::from_secs(30));
//!     let outcome = lsx.wait_for_device(&ctx, &opts)?;
//!     println!("attached: {}", outcome.matched());
//! }
//! ```

pub mod capabilities;
pub mod commands;
pub mod context;
pub mod devices;
pub mod error;
pub mod executor;
pub mod executors;
pub mod process;
pub mod registry;
pub mod scan_type;
pub mod store;

pub use capabilities::CapabilityMask;
pub use commands::Command;
pub use context::Context;
pub use devices::{
    DeviceMountOptions, InstanceId, LocalDevices, LocalDevicesOptions, WaitForDeviceOptions,
};
pub use error::{ExecutorError, ExecutorResult};
pub use executor::{
    wait_for_device, ExecutorCli, Lsx, MountExecutor, StorageExecutor, SupportedProbe,
    WaitOutcome, WaitPolicy,
};
pub use process::ProcessExecutor;
pub use registry::{ExecutorRegistry, RegistryError};
pub use scan_type::ScanType;
pub use store::Store;

//! # VFS Executor
//!
//! Directory-backed executor for development and tests. Nothing touches real
//! block devices; the "platform" is a directory tree:
//!
//! ```text
//! <root>/
//!   dev          device=volume lines (quick scan)
//!   dev.d/<name> one file per device, content is the volume (deep scan only)
//!   mounts       device<TAB>mount_point<TAB>options, one mount per line
//! ```
//!
//! Deep scans see everything a quick scan sees plus `dev.d/`; `dev.d/<name>`
//! is reported as `/dev/<name>`.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::context::Context;
use crate::devices::{DeviceMountOptions, InstanceId, LocalDevices, LocalDevicesOptions};
use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{MountExecutor, StorageExecutor, SupportedProbe};
use crate::scan_type::ScanType;
use crate::store::Store;

/// Driver name
pub const NAME: &str = "vfs";

/// Store key for the root directory
pub const ROOT_KEY: &str = "vfs.root";

/// Store key overriding the reported instance ID
pub const INSTANCE_ID_KEY: &str = "vfs.instanceID";

const DEVICES_FILE: &str = "dev";
const DEVICES_DIR: &str = "dev.d";
const MOUNTS_FILE: &str = "mounts";
const NEXT_DEVICE_PREFIX: &str = "/dev/xvd";

/// One entry of the mounts table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub options: Vec<String>,
}

/// Executor over a plain directory tree
pub struct VfsExecutor {
    root: PathBuf,
    instance_id: Option<String>,
    mounts_lock: Mutex<()>,
}

impl VfsExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            instance_id: None,
            mounts_lock: Mutex::new(()),
        }
    }

    /// Build from a driver configuration store (`vfs.root`, `vfs.instanceID`)
    pub fn from_store(config: &Store) -> ExecutorResult<Self> {
        let root = config.get_string(ROOT_KEY).ok_or_else(|| {
            ExecutorError::InvalidArgument(format!("missing required option '{}'", ROOT_KEY))
        })?;
        let mut executor = Self::new(root);
        executor.instance_id = config.get_string(INSTANCE_ID_KEY);
        Ok(executor)
    }

    /// Current mounts table
    pub fn mounts(&self) -> ExecutorResult<Vec<MountEntry>> {
        let content = match fs::read_to_string(self.root.join(MOUNTS_FILE)) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\t');
                let device = parts.next()?.trim();
                let mount_point = parts.next()?.trim();
                if device.is_empty() || mount_point.is_empty() {
                    return None;
                }
                let options = parts
                    .next()
                    .map(|o| {
                        o.split(',')
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Some(MountEntry {
                    device: device.to_string(),
                    mount_point: PathBuf::from(mount_point),
                    options,
                })
            })
            .collect())
    }

    fn write_mounts(&self, entries: &[MountEntry]) -> ExecutorResult<()> {
        let mut content = String::new();
        for entry in entries {
            content.push_str(&format!(
                "{}\t{}\t{}\n",
                entry.device,
                entry.mount_point.display(),
                entry.options.join(",")
            ));
        }
        fs::write(self.root.join(MOUNTS_FILE), content)?;
        Ok(())
    }

    /// Read `device=volume` lines; blank lines and `#` comments are skipped
    fn read_devices_file(&self, map: &mut BTreeMap<String, String>) -> ExecutorResult<()> {
        let content = match fs::read_to_string(self.root.join(DEVICES_FILE)) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((device, volume)) => {
                    map.insert(device.trim().to_string(), volume.trim().to_string());
                }
                None => log::warn!("Skipping malformed vfs device line: {}", line),
            }
        }
        Ok(())
    }

    fn read_devices_dir(&self, map: &mut BTreeMap<String, String>) -> ExecutorResult<()> {
        let entries = match fs::read_dir(self.root.join(DEVICES_DIR)) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) if !n.starts_with('.') => n.to_string(),
                _ => continue,
            };
            let volume = fs::read_to_string(&path)?.trim().to_string();
            map.insert(format!("/dev/{}", name), volume);
        }
        Ok(())
    }

    fn scan(&self, scan_type: ScanType) -> ExecutorResult<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        self.read_devices_file(&mut map)?;
        if scan_type == ScanType::Deep {
            self.read_devices_dir(&mut map)?;
        }
        Ok(map)
    }

    fn hostname() -> String {
        if let Ok(h) = std::env::var("HOSTNAME") {
            if !h.trim().is_empty() {
                return h.trim().to_string();
            }
        }
        fs::read_to_string("/etc/hostname")
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

impl StorageExecutor for VfsExecutor {
    fn name(&self) -> &str {
        NAME
    }

    fn instance_id(&self, ctx: &Context, opts: &Store) -> ExecutorResult<InstanceId> {
        ctx.check()?;
        let id = opts
            .get_string(INSTANCE_ID_KEY)
            .or_else(|| self.instance_id.clone())
            .unwrap_or_else(Self::hostname);
        Ok(InstanceId::new(NAME, id).with_field("root", self.root.display().to_string()))
    }

    fn next_device(&self, ctx: &Context, _opts: &Store) -> ExecutorResult<String> {
        ctx.check()?;
        let used = self.scan(ScanType::Deep)?;
        ('b'..='z')
            .map(|c| format!("{}{}", NEXT_DEVICE_PREFIX, c))
            .find(|candidate| !used.contains_key(candidate))
            .ok_or_else(|| ExecutorError::Platform("no available device names".to_string()))
    }

    fn local_devices(
        &self,
        ctx: &Context,
        opts: &LocalDevicesOptions,
    ) -> ExecutorResult<LocalDevices> {
        ctx.check()?;
        let map = self.scan(opts.scan_type)?;
        log::debug!(
            "vfs {} scan of {} found {} device(s)",
            opts.scan_type,
            self.root.display(),
            map.len()
        );
        Ok(LocalDevices::new(NAME, map))
    }

    fn as_supported(&self) -> Option<&dyn SupportedProbe> {
        Some(self)
    }

    fn as_mount(&self) -> Option<&dyn MountExecutor> {
        Some(self)
    }
}

impl SupportedProbe for VfsExecutor {
    fn supported(&self, ctx: &Context, _opts: &Store) -> ExecutorResult<bool> {
        ctx.check()?;
        Ok(self.root.is_dir())
    }
}

impl MountExecutor for VfsExecutor {
    fn mount(
        &self,
        ctx: &Context,
        device: &str,
        mount_point: &Path,
        opts: &DeviceMountOptions,
    ) -> ExecutorResult<()> {
        ctx.check()?;
        let _guard = self
            .mounts_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.scan(ScanType::Deep)?.contains_key(device) {
            return Err(ExecutorError::Platform(format!("device not found: {}", device)));
        }

        let mut entries = self.mounts()?;
        if entries.iter().any(|e| e.mount_point == mount_point) {
            return Err(ExecutorError::Platform(format!(
                "mount point busy: {}",
                mount_point.display()
            )));
        }

        fs::create_dir_all(mount_point)?;

        let mut options = opts.mount_options.clone();
        if let Some(label) = &opts.mount_label {
            options.push(format!("context=\"{}\"", label));
        }
        entries.push(MountEntry {
            device: device.to_string(),
            mount_point: mount_point.to_path_buf(),
            options,
        });
        self.write_mounts(&entries)?;

        log::info!("vfs mounted {} at {}", device, mount_point.display());
        Ok(())
    }

    fn unmount(&self, ctx: &Context, mount_point: &Path, _opts: &Store) -> ExecutorResult<()> {
        ctx.check()?;
        let _guard = self
            .mounts_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut entries = self.mounts()?;
        let before = entries.len();
        entries.retain(|e| e.mount_point != mount_point);
        if entries.len() == before {
            return Err(ExecutorError::Platform(format!(
                "not mounted: {}",
                mount_point.display()
            )));
        }
        self.write_mounts(&entries)?;

        log::info!("vfs unmounted {}", mount_point.display());
        Ok(())
    }
}

//! Data shapes exchanged with an executor
//!
//! Every value here is created per call and passed by value or shared
//! reference. A `LocalDevices` snapshot is never mutated after the executor
//! returns it; the next enumeration produces a fresh one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;
use crate::scan_type::ScanType;
use crate::store::Store;

/// Identifier of the local host, as reported by an executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceId {
    /// Opaque host identifier
    pub id: String,

    /// Driver that produced the identifier
    pub driver: String,

    /// Additional driver-specific fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl InstanceId {
    pub fn new(driver: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            driver: driver.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Text form is `driver=id`, followed by `,{json}` when fields are present
impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.driver, self.id)?;
        if !self.fields.is_empty() {
            let json = serde_json::to_string(&self.fields).map_err(|_| fmt::Error)?;
            write!(f, ",{}", json)?;
        }
        Ok(())
    }
}

impl FromStr for InstanceId {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (driver, rest) = s
            .trim()
            .split_once('=')
            .ok_or_else(|| ExecutorError::InvalidOutput(format!("invalid instance ID: {}", s)))?;

        let (id, fields) = match rest.split_once(",{") {
            Some((id, json)) => {
                let fields: BTreeMap<String, String> = serde_json::from_str(&format!("{{{}", json))
                    .map_err(|e| {
                        ExecutorError::InvalidOutput(format!("invalid instance ID fields: {}", e))
                    })?;
                (id, fields)
            }
            None => (rest, BTreeMap::new()),
        };

        if driver.is_empty() || id.is_empty() {
            return Err(ExecutorError::InvalidOutput(format!(
                "invalid instance ID: {}",
                s
            )));
        }

        Ok(Self {
            id: id.to_string(),
            driver: driver.to_string(),
            fields,
        })
    }
}

/// Snapshot of the devices visible to the operating system
///
/// Keys are platform device identifiers (`/dev/xvdb`), values are the volume
/// identifiers the devices carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDevices {
    /// Driver that produced the snapshot
    pub driver: String,

    /// Device identifier to volume identifier
    #[serde(default)]
    pub device_map: BTreeMap<String, String>,
}

impl LocalDevices {
    pub fn new(driver: impl Into<String>, device_map: BTreeMap<String, String>) -> Self {
        Self {
            driver: driver.into(),
            device_map,
        }
    }

    pub fn len(&self) -> usize {
        self.device_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.device_map.is_empty()
    }

    /// Whether a device key or volume value equals the attach token
    pub fn matches(&self, token: &str) -> bool {
        self.find(token).is_some()
    }

    /// The `(device, volume)` entry identified by the attach token
    pub fn find(&self, token: &str) -> Option<(&str, &str)> {
        self.device_map
            .iter()
            .find(|(device, volume)| device.as_str() == token || volume.as_str() == token)
            .map(|(device, volume)| (device.as_str(), volume.as_str()))
    }
}

/// Text form is `driver=dev::vol,dev::vol`
///
/// `%`, `=`, `,` and `:` inside a driver, device or volume are written as
/// `%XX` so any identifier survives the trip through stdout.
impl fmt::Display for LocalDevices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", escape(&self.driver))?;
        for (i, (device, volume)) in self.device_map.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}::{}", escape(device), escape(volume))?;
        }
        Ok(())
    }
}

impl FromStr for LocalDevices {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (driver, entries) = s.trim().split_once('=').ok_or_else(|| {
            ExecutorError::InvalidOutput(format!("invalid local devices: {}", s))
        })?;

        let mut device_map = BTreeMap::new();
        for entry in entries.split(',').filter(|e| !e.is_empty()) {
            let (device, volume) = entry.split_once("::").ok_or_else(|| {
                ExecutorError::InvalidOutput(format!("invalid device entry: {}", entry))
            })?;
            device_map.insert(unescape(device)?, unescape(volume)?);
        }

        Ok(Self {
            driver: unescape(driver)?,
            device_map,
        })
    }
}

const ESCAPED: [char; 5] = ['%', '=', ',', ':', '\n'];

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        if ESCAPED.contains(&c) {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape(field: &str) -> Result<String, ExecutorError> {
    let invalid = || ExecutorError::InvalidOutput(format!("invalid escape in: {}", field));

    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let hex: String = chars.by_ref().take(2).collect();
        if hex.len() != 2 {
            return Err(invalid());
        }
        let code = u8::from_str_radix(&hex, 16).map_err(|_| invalid())?;
        out.push(char::from(code));
    }
    Ok(out)
}

/// Options for a local device enumeration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalDevicesOptions {
    #[serde(default)]
    pub scan_type: ScanType,

    #[serde(default)]
    pub opts: Store,
}

impl LocalDevicesOptions {
    pub fn new(scan_type: ScanType) -> Self {
        Self {
            scan_type,
            opts: Store::new(),
        }
    }

    pub fn with_opts(mut self, opts: Store) -> Self {
        self.opts = opts;
        self
    }
}

/// Options for waiting on a device to appear
#[derive(Debug, Clone, PartialEq)]
pub struct WaitForDeviceOptions {
    /// Options forwarded to every enumeration
    pub local_devices: LocalDevicesOptions,

    /// Value returned by a remote attach call; expected to appear as a key or
    /// value of a future `LocalDevices` snapshot
    pub token: String,

    /// Upper bound on the wait; zero means a single poll
    pub timeout: Duration,
}

impl WaitForDeviceOptions {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            local_devices: LocalDevicesOptions::default(),
            token: token.into(),
            timeout,
        }
    }

    pub fn with_scan_type(mut self, scan_type: ScanType) -> Self {
        self.local_devices.scan_type = scan_type;
        self
    }

    pub fn with_opts(mut self, opts: Store) -> Self {
        self.local_devices.opts = opts;
        self
    }
}

/// Options for mounting a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMountOptions {
    /// Options passed through to the mount call (`ro`, `noatime`, ...)
    #[serde(default)]
    pub mount_options: Vec<String>,

    /// Security label applied to the mount, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_label: Option<String>,

    #[serde(default)]
    pub opts: Store,
}

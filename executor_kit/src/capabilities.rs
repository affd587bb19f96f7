//! Capability mask advertised by an executor's `supported` probe
//!
//! Each of the six executor operations owns one power-of-two bit. The raw
//! integer is what an out-of-process executor prints for the `supported`
//! command, so the bit values are fixed protocol constants.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

/// Set of executor operations supported on the current host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMask(u32);

impl CapabilityMask {
    /// `InstanceID` is supported
    pub const INSTANCE_ID: Self = Self(1 << 0);
    /// `NextDevice` is supported
    pub const NEXT_DEVICE: Self = Self(1 << 1);
    /// `LocalDevices` is supported
    pub const LOCAL_DEVICES: Self = Self(1 << 2);
    /// `WaitForDevice` is supported
    pub const WAIT_FOR_DEVICE: Self = Self(1 << 3);
    /// `Mount` is supported
    pub const MOUNT: Self = Self(1 << 4);
    /// `Umount` is supported
    pub const UMOUNT: Self = Self(1 << 5);

    /// The executor is not supported for the platform
    pub const NONE: Self = Self(0);

    /// The executor supports every operation
    pub const ALL: Self = Self(
        Self::INSTANCE_ID.0
            | Self::NEXT_DEVICE.0
            | Self::LOCAL_DEVICES.0
            | Self::WAIT_FOR_DEVICE.0
            | Self::MOUNT.0
            | Self::UMOUNT.0,
    );

    /// Every operation except mount and unmount, for executors running
    /// without mount privileges
    pub const ALL_NO_MOUNT: Self = Self(Self::ALL.0 & !Self::MOUNT.0 & !Self::UMOUNT.0);

    const NAMED: [(Self, &'static str); 6] = [
        (Self::INSTANCE_ID, "instanceID"),
        (Self::NEXT_DEVICE, "nextDevice"),
        (Self::LOCAL_DEVICES, "localDevices"),
        (Self::WAIT_FOR_DEVICE, "wait"),
        (Self::MOUNT, "mount"),
        (Self::UMOUNT, "umount"),
    ];

    /// Build a mask from raw bits, discarding bits that name no operation
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bits
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every bit in `other` is set in `self`
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn instance_id(&self) -> bool {
        self.contains(Self::INSTANCE_ID)
    }

    pub fn next_device(&self) -> bool {
        self.contains(Self::NEXT_DEVICE)
    }

    pub fn local_devices(&self) -> bool {
        self.contains(Self::LOCAL_DEVICES)
    }

    pub fn wait_for_device(&self) -> bool {
        self.contains(Self::WAIT_FOR_DEVICE)
    }

    pub fn mount(&self) -> bool {
        self.contains(Self::MOUNT)
    }

    pub fn umount(&self) -> bool {
        self.contains(Self::UMOUNT)
    }

    /// Names of the operations present in the mask, in bit order
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for CapabilityMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CapabilityMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CapabilityMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for CapabilityMask {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }
}

impl fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}

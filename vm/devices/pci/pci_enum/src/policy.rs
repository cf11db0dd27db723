// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tunables for a single enumeration run.

use crate::error::AlignmentOverrideError;
use pci_core::DevFn;
use pci_core::spec::hwid::HardwareIds;
use std::str::FromStr;
use std::time::Duration;

/// Default order for alignment overrides that do not specify one (4K).
const DEFAULT_ALIGNMENT_ORDER: u32 = 12;

/// Whether the release/retry coordinator may tear down bridge windows
/// through the full depth of the tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ReallocPolicy {
    /// Use the fixed pass budget.
    Off,
    /// Allow one pass per tree level plus one.
    On,
    /// Turn reallocation on if a device behind a bridge has a resource
    /// firmware did not assign within the bridge's windows.
    #[default]
    Auto,
}

/// A device selected by an alignment override.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceMatch {
    /// A device address.
    Address {
        /// Bus number.
        bus: u8,
        /// Device/function number.
        devfn: DevFn,
    },
    /// A vendor/device ID pair.
    Id {
        /// Vendor ID.
        vendor_id: u16,
        /// Device ID.
        device_id: u16,
    },
}

impl DeviceMatch {
    fn matches(&self, bus: u8, devfn: DevFn, ids: &HardwareIds) -> bool {
        match *self {
            Self::Address { bus: b, devfn: d } => b == bus && d == devfn,
            Self::Id {
                vendor_id,
                device_id,
            } => ids.vendor_id == vendor_id && ids.device_id == device_id,
        }
    }
}

/// Forces the memory BARs of matching devices to be aligned (and padded) to
/// `1 << order` bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AlignmentOverride {
    /// Alignment as a power of two.
    pub order: u32,
    /// Devices affected.
    pub device: DeviceMatch,
}

/// A list of [`AlignmentOverride`]s in the form
/// `[<order>@]<bus>:<dev>.<fn>` or `[<order>@]pci:<vendor>:<device>`,
/// separated by `;`. All numbers except the order are hex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentOverrides(pub Vec<AlignmentOverride>);

impl FromStr for AlignmentOverride {
    type Err = AlignmentOverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (order, target) = match s.split_once('@') {
            Some((order, target)) => {
                let order = order
                    .parse::<u32>()
                    .ok()
                    .filter(|&order| order < 64)
                    .ok_or_else(|| AlignmentOverrideError::InvalidOrder(order.to_owned()))?;
                (order, target)
            }
            None => (DEFAULT_ALIGNMENT_ORDER, s),
        };

        let device = if let Some(id) = target.strip_prefix("pci:") {
            let invalid = || AlignmentOverrideError::InvalidId(target.to_owned());
            let (vendor, device) = id.split_once(':').ok_or_else(invalid)?;
            DeviceMatch::Id {
                vendor_id: u16::from_str_radix(vendor, 16).map_err(|_| invalid())?,
                device_id: u16::from_str_radix(device, 16).map_err(|_| invalid())?,
            }
        } else {
            let invalid = || AlignmentOverrideError::InvalidAddress(target.to_owned());
            let (bus, slot) = target.split_once(':').ok_or_else(invalid)?;
            let (device, function) = slot.split_once('.').ok_or_else(invalid)?;
            let bus = u8::from_str_radix(bus, 16).map_err(|_| invalid())?;
            let device = u8::from_str_radix(device, 16)
                .ok()
                .filter(|&d| d < 32)
                .ok_or_else(invalid)?;
            let function = function
                .parse::<u8>()
                .ok()
                .filter(|&f| f < 8)
                .ok_or_else(invalid)?;
            DeviceMatch::Address {
                bus,
                devfn: DevFn::new(device, function),
            }
        };
        Ok(Self { order, device })
    }
}

impl FromStr for AlignmentOverrides {
    type Err = AlignmentOverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(';')
            .filter(|entry| !entry.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl AlignmentOverrides {
    /// The requested alignment for the device, if any override matches.
    pub fn alignment_for(&self, bus: u8, devfn: DevFn, ids: &HardwareIds) -> Option<u64> {
        self.0
            .iter()
            .find(|o| o.device.matches(bus, devfn, ids))
            .map(|o| 1u64 << o.order)
    }
}

/// Configuration for one enumeration and assignment run.
#[derive(Debug, Clone)]
pub struct AllocationPolicy {
    /// Reallocation mode of the release/retry coordinator.
    pub realloc: ReallocPolicy,
    /// Pass budget when reallocation is off.
    pub fixed_passes: u32,
    /// Give up on a function returning CRS after this long.
    pub crs_timeout: Duration,
    /// First CRS backoff delay; doubles on each retry.
    pub crs_initial_delay: Duration,
    /// Minimum I/O window for hotplug bridges.
    pub hotplug_io_size: u64,
    /// Minimum memory window for hotplug bridges.
    pub hotplug_mmio_size: u64,
    /// Minimum prefetchable window for hotplug bridges.
    pub hotplug_mmio_pref_size: u64,
    /// Lowest bus address handed out for I/O.
    pub min_io_base: u64,
    /// Lowest bus address handed out for memory.
    pub min_mem_base: u64,
    /// Width of the platform's physical address space.
    pub address_bits: u32,
    /// Claim firmware-assigned BARs and windows before sizing.
    pub claim_firmware: bool,
    /// Enable ARI forwarding on bridges that support it.
    pub enable_ari: bool,
    /// Probe all 32 slots behind PCIe downstream ports.
    pub scan_all_slots: bool,
    /// Account for ISA aliasing of small I/O ranges.
    pub isa_io_aliasing: bool,
    /// Set the VGA enable bit on bridges leading to the first VGA device.
    pub route_vga: bool,
    /// Enable decode and bus mastering on bridges that forward windows.
    pub enable_bridges: bool,
    /// Per-device BAR alignment overrides.
    pub alignment_overrides: AlignmentOverrides,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            realloc: ReallocPolicy::Auto,
            fixed_passes: 2,
            crs_timeout: Duration::from_secs(60),
            crs_initial_delay: Duration::from_millis(1),
            hotplug_io_size: 256,
            hotplug_mmio_size: 2 << 20,
            hotplug_mmio_pref_size: 2 << 20,
            min_io_base: 0x1000,
            min_mem_base: 0,
            address_bits: 64,
            claim_firmware: true,
            enable_ari: true,
            scan_all_slots: false,
            isa_io_aliasing: false,
            route_vga: true,
            enable_bridges: true,
            alignment_overrides: AlignmentOverrides::default(),
        }
    }
}

impl AllocationPolicy {
    /// Sets the reallocation mode.
    pub fn with_realloc(mut self, realloc: ReallocPolicy) -> Self {
        self.realloc = realloc;
        self
    }

    /// Sets the pass budget used when reallocation is off.
    pub fn with_fixed_passes(mut self, passes: u32) -> Self {
        self.fixed_passes = passes;
        self
    }

    /// Sets the CRS timeout.
    pub fn with_crs_timeout(mut self, timeout: Duration) -> Self {
        self.crs_timeout = timeout;
        self
    }

    /// Sets the hotplug window reserves.
    pub fn with_hotplug_sizes(mut self, io: u64, mmio: u64, mmio_pref: u64) -> Self {
        self.hotplug_io_size = io;
        self.hotplug_mmio_size = mmio;
        self.hotplug_mmio_pref_size = mmio_pref;
        self
    }

    /// Sets the platform address width.
    pub fn with_address_bits(mut self, bits: u32) -> Self {
        self.address_bits = bits;
        self
    }

    /// Enables or disables claiming of firmware assignments.
    pub fn with_claim_firmware(mut self, claim: bool) -> Self {
        self.claim_firmware = claim;
        self
    }

    /// Enables or disables ARI forwarding.
    pub fn with_enable_ari(mut self, enable: bool) -> Self {
        self.enable_ari = enable;
        self
    }

    /// Enables or disables probing every slot behind downstream ports.
    pub fn with_scan_all_slots(mut self, scan: bool) -> Self {
        self.scan_all_slots = scan;
        self
    }

    /// Enables or disables ISA alias accounting.
    pub fn with_isa_io_aliasing(mut self, aliasing: bool) -> Self {
        self.isa_io_aliasing = aliasing;
        self
    }

    /// Parses and sets the alignment overrides.
    pub fn with_alignment_overrides(mut self, s: &str) -> Result<Self, AlignmentOverrideError> {
        self.alignment_overrides = s.parse()?;
        Ok(self)
    }

    /// The highest address representable on the platform.
    pub fn max_address(&self) -> u64 {
        if self.address_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.address_bits) - 1
        }
    }

    /// The pass budget for a tree of the given depth.
    pub(crate) fn pass_budget(&self, max_depth: u32, realloc: bool) -> u32 {
        if realloc {
            max_depth + 1
        } else {
            self.fixed_passes.clamp(1, max_depth + 2)
        }
    }
}

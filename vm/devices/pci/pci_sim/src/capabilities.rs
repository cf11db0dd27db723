// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Simulated PCI capabilities.

use pci_core::spec::caps::CapabilityId;
use pci_core::spec::caps::ExtendedCapabilityHeader;
use pci_core::spec::caps::ExtendedCapabilityId;
use pci_core::spec::caps::ari::AriCapability;
use pci_core::spec::caps::pci_express::DeviceCapabilities2;
use pci_core::spec::caps::pci_express::DeviceControl2;
use pci_core::spec::caps::pci_express::DevicePortType;
use pci_core::spec::caps::pci_express::PciExpressCapabilities;
use pci_core::spec::caps::pci_express::PciExpressCapabilityHeader;
use pci_core::spec::caps::pci_express::SlotCapabilities;
use std::fmt::Debug;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// A classic PCI capability structure in simulated configuration space.
///
/// The containing header owns the first two bytes (capability ID and next
/// pointer); bits 15:0 of the dword at offset 0 returned by
/// [`read_u32`](Self::read_u32) are ignored.
pub trait PciCapability: Send {
    /// A descriptive label for logging.
    fn label(&self) -> &str;

    /// Returns the PCI capability ID for this capability
    fn capability_id(&self) -> CapabilityId;

    /// Length of the capability structure
    fn len(&self) -> usize;

    /// Read a u32 at the given offset
    fn read_u32(&self, offset: u16) -> u32;

    /// Write a u32 at the given offset
    fn write_u32(&mut self, offset: u16, val: u32);

    /// Reset the capability
    fn reset(&mut self);

    /// Downcast to the PCI Express capability, if this is one.
    fn as_pci_express(&self) -> Option<&PciExpressCapability> {
        None
    }
}

/// Helper to define a read-only [`PciCapability`] from an [`IntoBytes`] type.
#[derive(Debug)]
pub struct ReadOnlyCapability<T> {
    label: String,
    capability_id: CapabilityId,
    data: T,
}

impl<T: IntoBytes + Immutable + KnownLayout> ReadOnlyCapability<T> {
    /// Create a new [`ReadOnlyCapability`] with VENDOR_SPECIFIC capability ID
    pub fn new(label: impl Into<String>, data: T) -> Self {
        Self::new_with_capability_id(label, CapabilityId::VENDOR_SPECIFIC, data)
    }

    /// Create a new [`ReadOnlyCapability`] with a specific capability ID
    pub fn new_with_capability_id(
        label: impl Into<String>,
        capability_id: CapabilityId,
        data: T,
    ) -> Self {
        Self {
            label: label.into(),
            capability_id,
            data,
        }
    }
}

impl<T> PciCapability for ReadOnlyCapability<T>
where
    T: IntoBytes + Send + Debug + Immutable + KnownLayout + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn capability_id(&self) -> CapabilityId {
        self.capability_id
    }

    fn len(&self) -> usize {
        size_of::<T>()
    }

    fn read_u32(&self, offset: u16) -> u32 {
        let bytes = self.data.as_bytes();
        let offset = offset as usize;
        match bytes.get(offset..offset + 4) {
            Some(dword) => u32::from_le_bytes([dword[0], dword[1], dword[2], dword[3]]),
            None => !0,
        }
    }

    fn write_u32(&mut self, offset: u16, val: u32) {
        tracing::debug!(
            label = ?self.label,
            ?offset,
            ?val,
            "write to read-only capability"
        );
    }

    fn reset(&mut self) {}
}

/// Register block of a power management capability, starting at the
/// capability header.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout)]
pub struct PowerManagementRegisters {
    /// Capability ID and next pointer, filled in by the containing header.
    pub header: u16,
    /// Power Management Capabilities.
    pub pmc: u16,
    /// Power Management Control/Status.
    pub pmcsr: u16,
    /// Bridge support extensions and data.
    pub data: u16,
}

/// Creates a version 3 power management capability reporting D0.
pub fn power_management() -> ReadOnlyCapability<PowerManagementRegisters> {
    ReadOnlyCapability::new_with_capability_id(
        "power-management",
        CapabilityId::POWER_MANAGEMENT,
        PowerManagementRegisters {
            header: 0,
            pmc: 0x0003,
            pmcsr: 0,
            data: 0,
        },
    )
}

/// A PCI Express capability with just enough behavior for enumeration:
/// device/port type, slot hotplug capability, and ARI forwarding.
#[derive(Debug)]
pub struct PciExpressCapability {
    pcie_capabilities: PciExpressCapabilities,
    slot_capabilities: SlotCapabilities,
    device_capabilities_2: DeviceCapabilities2,
    device_control_2: DeviceControl2,
}

impl PciExpressCapability {
    /// Creates a version 2 PCI Express capability for the given port type.
    pub fn new(port_type: DevicePortType) -> Self {
        Self {
            pcie_capabilities: PciExpressCapabilities::new()
                .with_capability_version(2)
                .with_device_port_type(port_type),
            slot_capabilities: SlotCapabilities::new(),
            device_capabilities_2: DeviceCapabilities2::new(),
            device_control_2: DeviceControl2::new(),
        }
    }

    /// Marks the port as having a hot-plug capable slot.
    pub fn with_hotplug_slot(mut self, slot_number: u32) -> Self {
        self.pcie_capabilities.set_slot_implemented(true);
        self.slot_capabilities = SlotCapabilities::new()
            .with_hot_plug_capable(true)
            .with_hot_plug_surprise(true)
            .with_physical_slot_number(slot_number);
        self
    }

    /// Advertises ARI forwarding support in Device Capabilities 2.
    pub fn with_ari_forwarding(mut self) -> Self {
        self.device_capabilities_2.set_ari_forwarding_supported(true);
        self
    }

    /// Returns whether software enabled ARI forwarding.
    pub fn ari_forwarding_enabled(&self) -> bool {
        self.device_control_2.ari_forwarding_enable()
    }
}

impl PciCapability for PciExpressCapability {
    fn label(&self) -> &str {
        "pci-express"
    }

    fn capability_id(&self) -> CapabilityId {
        CapabilityId::PCI_EXPRESS
    }

    fn len(&self) -> usize {
        0x3C
    }

    fn read_u32(&self, offset: u16) -> u32 {
        match PciExpressCapabilityHeader(offset) {
            PciExpressCapabilityHeader::PCIE_CAPS => {
                (self.pcie_capabilities.into_bits() as u32) << 16
            }
            PciExpressCapabilityHeader::SLOT_CAPS => self.slot_capabilities.into_bits(),
            PciExpressCapabilityHeader::DEVICE_CAPS_2 => self.device_capabilities_2.into_bits(),
            PciExpressCapabilityHeader::DEVICE_CTL_STS_2 => {
                self.device_control_2.into_bits() as u32
            }
            _ => 0,
        }
    }

    fn write_u32(&mut self, offset: u16, val: u32) {
        if PciExpressCapabilityHeader(offset) == PciExpressCapabilityHeader::DEVICE_CTL_STS_2 {
            let requested = DeviceControl2::from_bits(val as u16);
            // Only ARI forwarding is modelled, and only when supported.
            self.device_control_2.set_ari_forwarding_enable(
                requested.ari_forwarding_enable()
                    && self.device_capabilities_2.ari_forwarding_supported(),
            );
        }
    }

    fn reset(&mut self) {
        self.device_control_2 = DeviceControl2::new();
    }

    fn as_pci_express(&self) -> Option<&PciExpressCapability> {
        Some(self)
    }
}

/// A PCI Express extended capability, laid out back to back from 0x100.
#[derive(Debug, Clone)]
pub struct ExtendedCapability {
    id: ExtendedCapabilityId,
    version: u8,
    /// Register contents after the header dword.
    body: Vec<u32>,
}

impl ExtendedCapability {
    /// Creates a read-only extended capability from raw register contents.
    pub fn new(id: ExtendedCapabilityId, version: u8, body: Vec<u32>) -> Self {
        Self { id, version, body }
    }

    /// Creates an ARI capability whose Next Function Number field is
    /// `next_function`.
    pub fn ari(next_function: u8) -> Self {
        let cap = AriCapability::new().with_next_function_number(next_function);
        Self::new(
            ExtendedCapabilityId::ALTERNATIVE_ROUTING_ID,
            1,
            vec![cap.into_bits() as u32],
        )
    }

    /// Length in bytes, including the header.
    pub fn len(&self) -> u16 {
        4 + 4 * self.body.len() as u16
    }

    /// Reads the dword at `offset` within the capability, with the next
    /// pointer of the header set to `next`.
    pub fn read_u32(&self, offset: u16, next: u16) -> u32 {
        if offset == 0 {
            return ExtendedCapabilityHeader::new()
                .with_capability_id(self.id.0)
                .with_version(self.version)
                .with_next_offset(next)
                .into_bits();
        }
        self.body
            .get(offset as usize / 4 - 1)
            .copied()
            .unwrap_or(0)
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hardware ID helpers for building simulated topologies.

use crate::VENDOR_ID;
use pci_core::spec::hwid::ClassCode;
use pci_core::spec::hwid::HardwareIds;
use pci_core::spec::hwid::ProgrammingInterface;
use pci_core::spec::hwid::Subclass;

/// IDs of a generic PCI-to-PCI bridge.
pub fn bridge_ids() -> HardwareIds {
    HardwareIds {
        vendor_id: VENDOR_ID,
        device_id: 0xC030,
        revision_id: 0,
        prog_if: ProgrammingInterface::NONE,
        sub_class: Subclass::BRIDGE_PCI_TO_PCI,
        base_class: ClassCode::BRIDGE,
        type0_sub_vendor_id: 0,
        type0_sub_system_id: 0,
    }
}

/// IDs of a CardBus bridge.
pub fn cardbus_ids() -> HardwareIds {
    HardwareIds {
        device_id: 0xC040,
        sub_class: Subclass::BRIDGE_CARDBUS,
        ..bridge_ids()
    }
}

/// IDs of a generic endpoint with the given device ID.
pub fn endpoint_ids(device_id: u16) -> HardwareIds {
    HardwareIds {
        vendor_id: VENDOR_ID,
        device_id,
        revision_id: 0,
        prog_if: ProgrammingInterface::NONE,
        sub_class: Subclass::NONE,
        base_class: ClassCode::MASS_STORAGE_CONTROLLER,
        type0_sub_vendor_id: VENDOR_ID,
        type0_sub_system_id: device_id,
    }
}

/// IDs of a VGA-compatible display controller.
pub fn vga_ids() -> HardwareIds {
    HardwareIds {
        sub_class: Subclass::DISPLAY_CONTROLLER_VGA,
        base_class: ClassCode::DISPLAY_CONTROLLER,
        ..endpoint_ids(0x0A00)
    }
}

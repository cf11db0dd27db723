// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register state shared by the simulated type 0 and type 1 headers: hardware
//! IDs, command/status, BARs, and the capability lists.

use crate::capabilities::ExtendedCapability;
use crate::capabilities::PciCapability;
use crate::capabilities::PciExpressCapability;
use anyhow::bail;
use pci_core::ConfigAccessError;
use pci_core::spec::caps::CAPABILITY_LIST_START;
use pci_core::spec::caps::EXTENDED_CAPABILITY_START;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::BarEncodingBits;
use pci_core::spec::cfg_space::HeaderLayout;
use pci_core::spec::hwid::HardwareIds;
use std::collections::BTreeMap;

const SUPPORTED_COMMAND_BITS: u16 = cfg_space::Command::new()
    .with_pio_enabled(true)
    .with_mmio_enabled(true)
    .with_bus_master(true)
    .with_special_cycles(true)
    .with_enable_memory_write_invalidate(true)
    .with_vga_palette_snoop(true)
    .with_parity_error_response(true)
    .with_enable_serr(true)
    .with_enable_fast_b2b(true)
    .with_intx_disable(true)
    .into_bits();

/// Value returned by a Vendor/Device ID read that completed with
/// Configuration Request Retry Status.
const CRS_COMPLETION: u32 = 0xFFFF_0001;

/// The type and size of one simulated base address register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarKind {
    /// An I/O BAR decoding `size` bytes (a power of two, at least 4).
    Io {
        /// Size in bytes.
        size: u32,
    },
    /// A 32-bit memory BAR decoding `size` bytes (a power of two, at least
    /// 16).
    Memory32 {
        /// Size in bytes.
        size: u32,
        /// Whether the BAR reports itself as prefetchable.
        prefetchable: bool,
    },
    /// A 64-bit memory BAR occupying this and the next BAR register.
    Memory64 {
        /// Size in bytes.
        size: u64,
        /// Whether the BAR reports itself as prefetchable.
        prefetchable: bool,
    },
    /// A BAR whose writable bits are exactly `mask` and whose low bits carry
    /// no type information. Used to model broken hardware.
    Raw {
        /// Writable bits.
        mask: u32,
    },
}

/// A bank of `N` BAR registers.
#[derive(Debug, Clone)]
pub(crate) struct BarBank<const N: usize> {
    masks: [u32; N],
    type_bits: [u32; N],
    io: [bool; N],
    values: [u32; N],
}

impl<const N: usize> BarBank<N> {
    pub fn new() -> Self {
        Self {
            masks: [0; N],
            type_bits: [0; N],
            io: [false; N],
            values: [0; N],
        }
    }

    pub fn set(&mut self, index: usize, kind: BarKind) -> anyhow::Result<()> {
        if index >= N {
            bail!("bar index {index} out of range");
        }
        match kind {
            BarKind::Io { size } => {
                if !size.is_power_of_two() || size < 4 {
                    bail!("invalid i/o bar size {size:#x}");
                }
                self.masks[index] = !(size - 1) & cfg_space::BAR_IO_ADDRESS_MASK;
                self.type_bits[index] = BarEncodingBits::new().with_use_pio(true).into_bits();
                self.io[index] = true;
            }
            BarKind::Memory32 { size, prefetchable } => {
                if !size.is_power_of_two() || size < 16 {
                    bail!("invalid memory bar size {size:#x}");
                }
                self.masks[index] = !(size - 1) & cfg_space::BAR_MEMORY_ADDRESS_MASK;
                self.type_bits[index] = BarEncodingBits::new()
                    .with_prefetchable(prefetchable)
                    .into_bits();
            }
            BarKind::Memory64 { size, prefetchable } => {
                if index + 1 >= N {
                    bail!("64-bit bar at index {index} has no upper half");
                }
                if !size.is_power_of_two() || size < 16 {
                    bail!("invalid memory bar size {size:#x}");
                }
                let mask64 = !(size - 1);
                self.masks[index] = mask64 as u32 & cfg_space::BAR_MEMORY_ADDRESS_MASK;
                self.type_bits[index] = BarEncodingBits::new()
                    .with_type_64_bit(true)
                    .with_prefetchable(prefetchable)
                    .into_bits();
                self.masks[index + 1] = (mask64 >> 32) as u32;
                self.type_bits[index + 1] = 0;
            }
            BarKind::Raw { mask } => {
                self.masks[index] = mask;
                self.type_bits[index] = 0;
            }
        }
        Ok(())
    }

    /// Presets a firmware-programmed value.
    pub fn preset(&mut self, index: usize, value: u32) {
        self.values[index] = value & self.masks[index];
    }

    pub fn read(&self, index: usize) -> u32 {
        self.values[index] | self.type_bits[index]
    }

    pub fn write(&mut self, index: usize, value: u32, command: cfg_space::Command) {
        // Address changes are ignored while the BAR is decoding.
        let decoding = if self.io[index] {
            command.pio_enabled()
        } else {
            command.mmio_enabled()
        };
        if decoding {
            tracing::debug!(index, value, "bar write ignored while decode is enabled");
            return;
        }
        self.values[index] = value & self.masks[index];
    }

    pub fn reset(&mut self) {
        self.values = [0; N];
    }
}

/// The expansion ROM base address register.
#[derive(Debug, Clone, Default)]
pub(crate) struct RomBar {
    mask: u32,
    value: u32,
}

impl RomBar {
    pub fn set_size(&mut self, size: u32) -> anyhow::Result<()> {
        if !size.is_power_of_two() || size < 0x800 {
            bail!("invalid expansion rom size {size:#x}");
        }
        self.mask = (!(size - 1) & cfg_space::ROM_ADDRESS_MASK) | cfg_space::ROM_ADDRESS_ENABLE;
        Ok(())
    }

    pub fn read(&self) -> u32 {
        self.value
    }

    pub fn write(&mut self, value: u32) {
        self.value = value & self.mask;
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }
}

/// Classic and extended capability lists.
#[derive(Default)]
pub(crate) struct CapabilityList {
    classic: Vec<Box<dyn PciCapability>>,
    extended: Vec<ExtendedCapability>,
}

impl CapabilityList {
    pub fn push(&mut self, cap: Box<dyn PciCapability>) -> anyhow::Result<()> {
        let used: usize = self.classic.iter().map(|cap| cap.len()).sum();
        if CAPABILITY_LIST_START as usize + used + cap.len() > 0x100 {
            bail!("capability {} does not fit in configuration space", cap.label());
        }
        self.classic.push(cap);
        Ok(())
    }

    pub fn push_extended(&mut self, cap: ExtendedCapability) -> anyhow::Result<()> {
        let used: u16 = self.extended.iter().map(|cap| cap.len()).sum();
        if EXTENDED_CAPABILITY_START + used + cap.len() > 0x1000 {
            bail!("extended capability does not fit in configuration space");
        }
        self.extended.push(cap);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.classic.is_empty()
    }

    pub fn pci_express(&self) -> Option<&PciExpressCapability> {
        self.classic.iter().find_map(|cap| cap.as_pci_express())
    }

    fn classic_index_and_offset(&self, offset: u16) -> Option<(usize, u16)> {
        let mut cap_offset = 0;
        for (i, cap) in self.classic.iter().enumerate() {
            let cap_size = cap.len() as u16;
            if offset < cap_offset + cap_size {
                return Some((i, offset - cap_offset));
            }
            cap_offset += cap_size;
        }
        None
    }

    fn extended_index_and_offset(&self, offset: u16) -> Option<(usize, u16, u16)> {
        let mut cap_offset = EXTENDED_CAPABILITY_START;
        for (i, cap) in self.extended.iter().enumerate() {
            let next = cap_offset + cap.len();
            if offset < next {
                let next = if i + 1 < self.extended.len() { next } else { 0 };
                return Some((i, offset - cap_offset, next));
            }
            cap_offset = next;
        }
        None
    }

    pub fn read(&self, offset: u16) -> u32 {
        if offset < EXTENDED_CAPABILITY_START {
            let Some((index, cap_offset)) =
                self.classic_index_and_offset(offset - CAPABILITY_LIST_START)
            else {
                return 0;
            };
            let cap = &self.classic[index];
            let mut value = cap.read_u32(cap_offset);
            if cap_offset == 0 {
                let next = if index + 1 < self.classic.len() {
                    offset as u32 + cap.len() as u32
                } else {
                    0
                };
                value = (value & 0xffff_0000) | next << 8 | cap.capability_id().0 as u32;
            }
            value
        } else {
            match self.extended_index_and_offset(offset) {
                Some((index, cap_offset, next)) => self.extended[index].read_u32(cap_offset, next),
                None => 0,
            }
        }
    }

    pub fn write(&mut self, offset: u16, value: u32) {
        if offset < EXTENDED_CAPABILITY_START {
            if let Some((index, cap_offset)) =
                self.classic_index_and_offset(offset - CAPABILITY_LIST_START)
            {
                self.classic[index].write_u32(cap_offset, value);
            }
        }
    }

    pub fn reset(&mut self) {
        for cap in &mut self.classic {
            cap.reset();
        }
    }
}

/// Registers common to all header layouts, plus the knobs used to model
/// misbehaving functions.
pub(crate) struct CommonRegisters {
    pub hardware_ids: HardwareIds,
    pub layout: HeaderLayout,
    pub multi_function: bool,
    pub command: cfg_space::Command,
    pub latency_timer: u8,
    pub interrupt_pin: u8,
    pub interrupt_line: u8,
    pub capabilities: CapabilityList,
    /// Raw register values that take precedence over the modelled ones.
    pub overrides: BTreeMap<u16, u32>,
    /// Error returned for every access, if set.
    pub access_error: Option<ConfigAccessError>,
    /// Number of Vendor ID reads that still complete with CRS.
    pub crs_reads: u32,
}

impl CommonRegisters {
    pub fn new(hardware_ids: HardwareIds, layout: HeaderLayout) -> Self {
        Self {
            hardware_ids,
            layout,
            multi_function: false,
            command: cfg_space::Command::new(),
            latency_timer: 0,
            interrupt_pin: 0,
            interrupt_line: 0,
            capabilities: CapabilityList::default(),
            overrides: BTreeMap::new(),
            access_error: None,
            crs_reads: 0,
        }
    }

    /// Handles the accesses that take priority over any register decoding:
    /// injected errors, raw overrides and CRS completions.
    pub fn intercept_read(&mut self, offset: u16) -> Option<Result<u32, ConfigAccessError>> {
        if let Some(err) = self.access_error {
            return Some(Err(err));
        }
        if offset == cfg_space::CommonHeader::DEVICE_VENDOR.0 && self.crs_reads > 0 {
            self.crs_reads -= 1;
            return Some(Ok(CRS_COMPLETION));
        }
        self.overrides.get(&offset).map(|&value| Ok(value))
    }

    pub fn intercept_write(&self) -> Option<ConfigAccessError> {
        self.access_error
    }

    pub fn read(&self, offset: u16) -> Option<u32> {
        use cfg_space::CommonHeader;

        let value = match CommonHeader(offset) {
            CommonHeader::DEVICE_VENDOR => {
                (self.hardware_ids.device_id as u32) << 16 | self.hardware_ids.vendor_id as u32
            }
            CommonHeader::STATUS_COMMAND => {
                let status = cfg_space::Status::new()
                    .with_capabilities_list(!self.capabilities.is_empty());
                (status.into_bits() as u32) << 16 | self.command.into_bits() as u32
            }
            CommonHeader::CLASS_REVISION => self.hardware_ids.class_revision(),
            CommonHeader::BIST_HEADER => {
                let header = cfg_space::HeaderTypeRegister::new()
                    .with_layout(self.layout.0)
                    .with_multi_function(self.multi_function);
                (header.into_bits() as u32) << 16 | (self.latency_timer as u32) << 8
            }
            CommonHeader::RESERVED_CAP_PTR => {
                if self.capabilities.is_empty() {
                    0
                } else {
                    CAPABILITY_LIST_START as u32
                }
            }
            _ if (CAPABILITY_LIST_START..0x1000).contains(&offset) => {
                self.capabilities.read(offset)
            }
            _ => return None,
        };
        Some(value)
    }

    pub fn write(&mut self, offset: u16, val: u32) -> bool {
        use cfg_space::CommonHeader;

        match CommonHeader(offset) {
            CommonHeader::STATUS_COMMAND => {
                let mut command = cfg_space::Command::from_bits(val as u16);
                if command.into_bits() & !SUPPORTED_COMMAND_BITS != 0 {
                    tracing::warn!(offset, val, "setting invalid command bits");
                    // still do our best
                    command =
                        cfg_space::Command::from_bits(command.into_bits() & SUPPORTED_COMMAND_BITS);
                };
                self.command = command;
            }
            CommonHeader::BIST_HEADER => {
                // allow writes to the latency timer
                self.latency_timer = (val >> 8) as u8;
            }
            _ if (CAPABILITY_LIST_START..0x1000).contains(&offset) => {
                self.capabilities.write(offset, val)
            }
            _ => return false,
        }
        true
    }

    /// The Interrupt Line / Interrupt Pin half of the dword at 0x3C.
    pub fn interrupt_register(&self) -> u32 {
        self.interrupt_line as u32 | (self.interrupt_pin as u32) << 8
    }

    pub fn reset(&mut self) {
        self.command = cfg_space::Command::new();
        self.latency_timer = 0;
        self.interrupt_line = 0;
        self.capabilities.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_bank_sizes() {
        let mut bars = BarBank::<6>::new();
        bars.set(0, BarKind::Memory32 {
            size: 0x2000,
            prefetchable: false,
        })
        .unwrap();
        bars.set(2, BarKind::Memory64 {
            size: 0x1_0000_0000,
            prefetchable: true,
        })
        .unwrap();
        bars.set(4, BarKind::Io { size: 0x100 }).unwrap();

        let command = cfg_space::Command::new();
        for i in 0..6 {
            bars.write(i, !0, command);
        }
        assert_eq!(bars.read(0), 0xFFFF_E000);
        assert_eq!(bars.read(1), 0);
        assert_eq!(bars.read(2), 0x0000_000C);
        assert_eq!(bars.read(3), 0xFFFF_FFFF);
        assert_eq!(bars.read(4), 0xFFFF_FF01);
    }

    #[test]
    fn bar_write_ignored_while_decoding() {
        let mut bars = BarBank::<2>::new();
        bars.set(0, BarKind::Memory32 {
            size: 0x1000,
            prefetchable: false,
        })
        .unwrap();
        let enabled = cfg_space::Command::new().with_mmio_enabled(true);
        bars.write(0, 0x8000_0000, enabled);
        assert_eq!(bars.read(0), 0);
        bars.write(0, 0x8000_0000, cfg_space::Command::new());
        assert_eq!(bars.read(0), 0x8000_0000);
    }

    #[test]
    fn invalid_bars_rejected() {
        let mut bars = BarBank::<2>::new();
        assert!(bars.set(1, BarKind::Memory64 {
            size: 0x1000,
            prefetchable: false
        })
        .is_err());
        assert!(bars.set(0, BarKind::Io { size: 3 }).is_err());
        assert!(bars.set(2, BarKind::Raw { mask: !0 }).is_err());
    }
}

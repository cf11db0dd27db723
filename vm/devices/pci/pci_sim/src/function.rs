// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Simulated endpoint functions (type 00h headers) and CardBus bridges (type
//! 02h headers).

use crate::capabilities::ExtendedCapability;
use crate::capabilities::PciCapability;
use crate::config_space::BarBank;
use crate::config_space::BarKind;
use crate::config_space::CommonRegisters;
use crate::config_space::RomBar;
use pci_core::ConfigAccessError;
use pci_core::PciInterruptPin;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::HeaderLayout;
use pci_core::spec::cfg_space::HeaderType00;
use pci_core::spec::cfg_space::HeaderType02;
use pci_core::spec::hwid::HardwareIds;

/// A simulated PCI function with a type 00h header, or a CardBus bridge with
/// a type 02h header.
pub struct SimFunction {
    common: CommonRegisters,
    bars: BarBank<{ cfg_space::HEADER_TYPE_00_BAR_COUNT }>,
    bar_kinds: [Option<BarKind>; cfg_space::HEADER_TYPE_00_BAR_COUNT],
    rom: RomBar,
    cardbus_bus_numbers: u32,
}

impl SimFunction {
    /// Creates a function with no BARs or capabilities.
    pub fn new(hardware_ids: HardwareIds) -> Self {
        Self {
            common: CommonRegisters::new(hardware_ids, HeaderLayout::NORMAL),
            bars: BarBank::new(),
            bar_kinds: [None; cfg_space::HEADER_TYPE_00_BAR_COUNT],
            rom: RomBar::default(),
            cardbus_bus_numbers: 0,
        }
    }

    /// Creates a CardBus bridge with a 4K socket register BAR.
    pub fn cardbus(hardware_ids: HardwareIds) -> Self {
        let mut this = Self::new(hardware_ids);
        this.common.layout = HeaderLayout::CARDBUS;
        this.bar_kinds[0] = Some(BarKind::Memory32 {
            size: 0x1000,
            prefetchable: false,
        });
        // Infallible: index 0 with a valid size.
        let _ = this.bars.set(0, BarKind::Memory32 {
            size: 0x1000,
            prefetchable: false,
        });
        this
    }

    /// Adds a BAR at `index`.
    pub fn with_bar(mut self, index: usize, kind: BarKind) -> anyhow::Result<Self> {
        self.bars.set(index, kind)?;
        self.bar_kinds[index] = Some(kind);
        Ok(self)
    }

    /// Adds an expansion ROM of `size` bytes.
    pub fn with_rom(mut self, size: u32) -> anyhow::Result<Self> {
        self.rom.set_size(size)?;
        Ok(self)
    }

    /// Presets the address firmware left in BAR `index`. For 64-bit BARs the
    /// upper half is written to the next register.
    pub fn with_firmware_bar(mut self, index: usize, address: u64) -> Self {
        self.bars.preset(index, address as u32);
        if let Some(BarKind::Memory64 { .. }) = self.bar_kinds[index] {
            self.bars.preset(index + 1, (address >> 32) as u32);
        }
        self
    }

    /// Presets the address firmware left in the expansion ROM BAR.
    pub fn with_firmware_rom(mut self, address: u32) -> Self {
        self.rom.write(address);
        self
    }

    /// Presets the command register.
    pub fn with_command(mut self, command: cfg_space::Command) -> Self {
        self.common.command = command;
        self
    }

    /// Sets the multi-function bit of the header type register.
    pub fn multi_function(mut self) -> Self {
        self.common.multi_function = true;
        self
    }

    /// Sets the interrupt pin register.
    pub fn with_interrupt_pin(mut self, pin: PciInterruptPin) -> Self {
        self.common.interrupt_pin = pin as u8;
        self
    }

    /// Appends a classic capability.
    pub fn with_capability(mut self, cap: Box<dyn PciCapability>) -> anyhow::Result<Self> {
        self.common.capabilities.push(cap)?;
        Ok(self)
    }

    /// Appends an extended capability.
    pub fn with_extended_capability(mut self, cap: ExtendedCapability) -> anyhow::Result<Self> {
        self.common.capabilities.push_extended(cap)?;
        Ok(self)
    }

    /// Completes the next `count` Vendor ID reads with CRS.
    pub fn with_crs_reads(mut self, count: u32) -> Self {
        self.common.crs_reads = count;
        self
    }

    /// Fails every access to this function with `err`.
    pub fn with_access_error(mut self, err: ConfigAccessError) -> Self {
        self.common.access_error = Some(err);
        self
    }

    /// Returns `value` for every read of the dword at `offset`.
    pub fn with_register(mut self, offset: u16, value: u32) -> Self {
        self.common.overrides.insert(offset, value);
        self
    }

    /// The hardware IDs of this function.
    pub fn hardware_ids(&self) -> HardwareIds {
        self.common.hardware_ids
    }

    /// The current command register.
    pub fn command(&self) -> cfg_space::Command {
        self.common.command
    }

    /// The current value of BAR register `index`, type bits included.
    pub fn bar(&self, index: usize) -> u32 {
        self.bars.read(index)
    }

    /// The address programmed into BAR `index`, combining both halves of a
    /// 64-bit BAR.
    pub fn bar_address(&self, index: usize) -> u64 {
        match self.bar_kinds[index] {
            Some(BarKind::Io { .. }) => {
                (self.bars.read(index) & cfg_space::BAR_IO_ADDRESS_MASK) as u64
            }
            Some(BarKind::Memory64 { .. }) => {
                (self.bars.read(index) & cfg_space::BAR_MEMORY_ADDRESS_MASK) as u64
                    | (self.bars.read(index + 1) as u64) << 32
            }
            Some(BarKind::Memory32 { .. }) => {
                (self.bars.read(index) & cfg_space::BAR_MEMORY_ADDRESS_MASK) as u64
            }
            Some(BarKind::Raw { .. }) | None => self.bars.read(index) as u64,
        }
    }

    /// The expansion ROM BAR value.
    pub fn rom(&self) -> u32 {
        self.rom.read()
    }

    /// The interrupt line register.
    pub fn interrupt_line(&self) -> u8 {
        self.common.interrupt_line
    }

    /// The primary/secondary/subordinate bytes of a CardBus bridge.
    pub fn cardbus_bus_numbers(&self) -> (u8, u8, u8) {
        let [primary, secondary, subordinate, _] = self.cardbus_bus_numbers.to_le_bytes();
        (primary, secondary, subordinate)
    }

    /// Returns the function to its power-on state.
    pub fn reset(&mut self) {
        self.common.reset();
        self.bars.reset();
        self.rom.reset();
        self.cardbus_bus_numbers = 0;
    }

    pub(crate) fn read_u32(&mut self, offset: u16) -> Result<u32, ConfigAccessError> {
        if let Some(result) = self.common.intercept_read(offset) {
            return result;
        }
        if self.common.layout == HeaderLayout::CARDBUS {
            return Ok(self.read_cardbus(offset));
        }
        let value = match HeaderType00(offset) {
            HeaderType00::BAR0
            | HeaderType00::BAR1
            | HeaderType00::BAR2
            | HeaderType00::BAR3
            | HeaderType00::BAR4
            | HeaderType00::BAR5 => self.bars.read((offset - HeaderType00::BAR0.0) as usize / 4),
            HeaderType00::CARDBUS_CIS_PTR => 0,
            HeaderType00::SUBSYSTEM_ID => {
                let ids = &self.common.hardware_ids;
                (ids.type0_sub_system_id as u32) << 16 | ids.type0_sub_vendor_id as u32
            }
            HeaderType00::EXPANSION_ROM_BASE => self.rom.read(),
            HeaderType00::RESERVED => 0,
            HeaderType00::LATENCY_INTERRUPT => self.common.interrupt_register(),
            _ => self.common.read(offset).unwrap_or_else(|| {
                tracing::trace!(offset, "read of unimplemented register");
                0
            }),
        };
        Ok(value)
    }

    fn read_cardbus(&self, offset: u16) -> u32 {
        match HeaderType02(offset) {
            HeaderType02::SOCKET_BASE => self.bars.read(0),
            HeaderType02::BUS_NUMBERS => self.cardbus_bus_numbers,
            _ if offset == cfg_space::INTERRUPT_LINE => self.common.interrupt_register(),
            _ => self.common.read(offset).unwrap_or(0),
        }
    }

    pub(crate) fn write_u32(&mut self, offset: u16, val: u32) -> Result<(), ConfigAccessError> {
        if let Some(err) = self.common.intercept_write() {
            return Err(err);
        }
        if self.common.layout == HeaderLayout::CARDBUS {
            match HeaderType02(offset) {
                HeaderType02::SOCKET_BASE => self.bars.write(0, val, self.common.command),
                HeaderType02::BUS_NUMBERS => self.cardbus_bus_numbers = val,
                _ if offset == cfg_space::INTERRUPT_LINE => {
                    self.common.interrupt_line = val as u8;
                }
                _ => {
                    self.common.write(offset, val);
                }
            }
            return Ok(());
        }
        match HeaderType00(offset) {
            HeaderType00::BAR0
            | HeaderType00::BAR1
            | HeaderType00::BAR2
            | HeaderType00::BAR3
            | HeaderType00::BAR4
            | HeaderType00::BAR5 => {
                let index = (offset - HeaderType00::BAR0.0) as usize / 4;
                self.bars.write(index, val, self.common.command);
            }
            HeaderType00::EXPANSION_ROM_BASE => self.rom.write(val),
            HeaderType00::LATENCY_INTERRUPT => self.common.interrupt_line = val as u8,
            // read-only registers
            HeaderType00::DEVICE_VENDOR
            | HeaderType00::CLASS_REVISION
            | HeaderType00::CARDBUS_CIS_PTR
            | HeaderType00::SUBSYSTEM_ID
            | HeaderType00::RESERVED_CAP_PTR
            | HeaderType00::RESERVED => {}
            _ => {
                if !self.common.write(offset, val) {
                    tracing::trace!(offset, val, "write to unimplemented register");
                }
            }
        }
        Ok(())
    }
}

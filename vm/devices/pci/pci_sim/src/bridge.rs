// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Simulated PCI-to-PCI bridges (type 01h headers) and the bus segments
//! behind them.

use crate::capabilities::ExtendedCapability;
use crate::capabilities::PciCapability;
use crate::capabilities::PciExpressCapability;
use crate::config_space::BarBank;
use crate::config_space::BarKind;
use crate::config_space::CommonRegisters;
use crate::config_space::RomBar;
use crate::function::SimFunction;
use anyhow::bail;
use pci_core::ConfigAccessError;
use pci_core::DevFn;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::BridgeControl;
use pci_core::spec::cfg_space::HeaderLayout;
use pci_core::spec::cfg_space::HeaderType01;
use pci_core::spec::cfg_space::bridge::IO_RANGE_MASK;
use pci_core::spec::cfg_space::bridge::IO_RANGE_TYPE_32;
use pci_core::spec::cfg_space::bridge::MEMORY_RANGE_MASK;
use pci_core::spec::cfg_space::bridge::PREFETCH_RANGE_TYPE_64;
use pci_core::spec::hwid::HardwareIds;
use pci_core::spec::hwid::ProgrammingInterface;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

const BRIDGE_CONTROL_MASK: u16 = 0x0FFF;

/// Addressing capability of a bridge's I/O window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoDecode {
    /// 16-bit I/O addresses only.
    Bits16,
    /// 32-bit I/O addresses via the upper 16-bit registers.
    Bits32,
}

/// Addressing capability of a bridge's prefetchable window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PrefetchDecode {
    /// 32-bit addresses only.
    Bits32,
    /// 64-bit addresses via the upper 32-bit registers.
    Bits64,
}

/// A device attached to a simulated bus.
pub enum SimDevice {
    /// A type 00h or type 02h function.
    Function(SimFunction),
    /// A PCI-to-PCI bridge.
    Bridge(Box<SimBridge>),
}

impl From<SimFunction> for SimDevice {
    fn from(function: SimFunction) -> Self {
        Self::Function(function)
    }
}

impl From<SimBridge> for SimDevice {
    fn from(bridge: SimBridge) -> Self {
        Self::Bridge(Box::new(bridge))
    }
}

impl SimDevice {
    /// Returns the function, if this is not a bridge.
    pub fn as_function(&self) -> Option<&SimFunction> {
        match self {
            Self::Function(f) => Some(f),
            Self::Bridge(_) => None,
        }
    }

    /// Returns the bridge, if this is one.
    pub fn as_bridge(&self) -> Option<&SimBridge> {
        match self {
            Self::Function(_) => None,
            Self::Bridge(b) => Some(b),
        }
    }

    /// Mutable variant of [`Self::as_bridge`].
    pub fn as_bridge_mut(&mut self) -> Option<&mut SimBridge> {
        match self {
            Self::Function(_) => None,
            Self::Bridge(b) => Some(b),
        }
    }

    fn read_u32(&mut self, offset: u16) -> Result<u32, ConfigAccessError> {
        match self {
            Self::Function(f) => f.read_u32(offset),
            Self::Bridge(b) => b.read_u32(offset),
        }
    }

    fn write_u32(&mut self, offset: u16, val: u32) -> Result<(), ConfigAccessError> {
        match self {
            Self::Function(f) => f.write_u32(offset, val),
            Self::Bridge(b) => b.write_u32(offset, val),
        }
    }
}

/// The devices on one bus segment, keyed by device/function number.
#[derive(Default)]
pub struct SimBus {
    devices: BTreeMap<DevFn, SimDevice>,
}

impl SimBus {
    /// Attaches `device` at `devfn`.
    pub fn add(&mut self, devfn: DevFn, device: impl Into<SimDevice>) -> anyhow::Result<()> {
        if self.devices.contains_key(&devfn) {
            bail!("slot {devfn} is already occupied");
        }
        self.devices.insert(devfn, device.into());
        Ok(())
    }

    /// Detaches and returns the device at `devfn`, simulating a surprise
    /// removal.
    pub fn remove(&mut self, devfn: DevFn) -> Option<SimDevice> {
        self.devices.remove(&devfn)
    }

    /// The device at `devfn`.
    pub fn get(&self, devfn: DevFn) -> Option<&SimDevice> {
        self.devices.get(&devfn)
    }

    /// The device at `devfn`.
    pub fn get_mut(&mut self, devfn: DevFn) -> Option<&mut SimDevice> {
        self.devices.get_mut(&devfn)
    }

    /// The function at `devfn`, if present and not a bridge.
    pub fn function(&self, devfn: DevFn) -> Option<&SimFunction> {
        self.get(devfn).and_then(|d| d.as_function())
    }

    /// The bridge at `devfn`, if present.
    pub fn bridge(&self, devfn: DevFn) -> Option<&SimBridge> {
        self.get(devfn).and_then(|d| d.as_bridge())
    }

    /// The bridge at `devfn`, if present.
    pub fn bridge_mut(&mut self, devfn: DevFn) -> Option<&mut SimBridge> {
        self.get_mut(devfn).and_then(|d| d.as_bridge_mut())
    }

    /// Iterates over the attached devices in devfn order.
    pub fn devices(&self) -> impl Iterator<Item = (DevFn, &SimDevice)> {
        self.devices.iter().map(|(&devfn, d)| (devfn, d))
    }

    /// Routes a configuration read. `this_bus` is the bus number of this
    /// segment. Returns `None` if no device claims the access.
    pub(crate) fn route_read(
        &mut self,
        this_bus: u8,
        bus: u8,
        devfn: DevFn,
        offset: u16,
    ) -> Option<Result<u32, ConfigAccessError>> {
        if bus == this_bus {
            return self.devices.get_mut(&devfn).map(|d| d.read_u32(offset));
        }
        let bridge = self.routing_bridge(bus)?;
        let secondary = bridge.secondary;
        bridge.downstream.route_read(secondary, bus, devfn, offset)
    }

    /// Routes a configuration write. Returns `None` if no device claims the
    /// access.
    pub(crate) fn route_write(
        &mut self,
        this_bus: u8,
        bus: u8,
        devfn: DevFn,
        offset: u16,
        value: u32,
    ) -> Option<Result<(), ConfigAccessError>> {
        if bus == this_bus {
            return self
                .devices
                .get_mut(&devfn)
                .map(|d| d.write_u32(offset, value));
        }
        let bridge = self.routing_bridge(bus)?;
        let secondary = bridge.secondary;
        bridge
            .downstream
            .route_write(secondary, bus, devfn, offset, value)
    }

    fn routing_bridge(&mut self, bus: u8) -> Option<&mut SimBridge> {
        self.devices.values_mut().find_map(|d| match d {
            SimDevice::Bridge(b) if b.assigned_bus_range().contains(&bus) => Some(&mut **b),
            _ => None,
        })
    }
}

/// A simulated PCI-to-PCI bridge.
pub struct SimBridge {
    common: CommonRegisters,
    bars: BarBank<{ cfg_space::HEADER_TYPE_01_BAR_COUNT }>,
    rom: RomBar,
    primary: u8,
    secondary: u8,
    subordinate: u8,
    secondary_latency: u8,
    io_decode: Option<IoDecode>,
    io_base: u8,
    io_limit: u8,
    io_base_upper: u16,
    io_limit_upper: u16,
    memory_base: u16,
    memory_limit: u16,
    prefetch_decode: Option<PrefetchDecode>,
    prefetch_base: u16,
    prefetch_limit: u16,
    prefetch_base_upper: u32,
    prefetch_limit_upper: u32,
    bridge_control: BridgeControl,
    downstream: SimBus,
}

impl SimBridge {
    /// Creates a bridge with 32-bit I/O and 64-bit prefetchable windows, no
    /// BARs, and an empty secondary bus.
    pub fn new(hardware_ids: HardwareIds) -> Self {
        Self {
            common: CommonRegisters::new(hardware_ids, HeaderLayout::BRIDGE),
            bars: BarBank::new(),
            rom: RomBar::default(),
            primary: 0,
            secondary: 0,
            subordinate: 0,
            secondary_latency: 0,
            io_decode: Some(IoDecode::Bits32),
            io_base: 0,
            io_limit: 0,
            io_base_upper: 0,
            io_limit_upper: 0,
            memory_base: 0,
            memory_limit: 0,
            prefetch_decode: Some(PrefetchDecode::Bits64),
            prefetch_base: 0,
            prefetch_limit: 0,
            prefetch_base_upper: 0,
            prefetch_limit_upper: 0,
            bridge_control: BridgeControl::new(),
            downstream: SimBus::default(),
        }
    }

    /// Sets the I/O window addressing, or removes the window.
    pub fn with_io_decode(mut self, decode: Option<IoDecode>) -> Self {
        self.io_decode = decode;
        self
    }

    /// Sets the prefetchable window addressing, or removes the window.
    pub fn with_prefetch_decode(mut self, decode: Option<PrefetchDecode>) -> Self {
        self.prefetch_decode = decode;
        self
    }

    /// Marks the bridge as subtractive decode in its programming interface.
    pub fn subtractive_decode(mut self) -> Self {
        self.common.hardware_ids.prog_if =
            ProgrammingInterface::BRIDGE_PCI_TO_PCI_SUBTRACTIVE_DECODE;
        self
    }

    /// Sets the multi-function bit of the header type register.
    pub fn multi_function(mut self) -> Self {
        self.common.multi_function = true;
        self
    }

    /// Adds a BAR at `index` (0 or 1).
    pub fn with_bar(mut self, index: usize, kind: BarKind) -> anyhow::Result<Self> {
        self.bars.set(index, kind)?;
        Ok(self)
    }

    /// Adds an expansion ROM of `size` bytes.
    pub fn with_rom(mut self, size: u32) -> anyhow::Result<Self> {
        self.rom.set_size(size)?;
        Ok(self)
    }

    /// Appends a classic capability.
    pub fn with_capability(mut self, cap: Box<dyn PciCapability>) -> anyhow::Result<Self> {
        self.common.capabilities.push(cap)?;
        Ok(self)
    }

    /// Appends a PCI Express capability.
    pub fn with_pci_express(self, cap: PciExpressCapability) -> anyhow::Result<Self> {
        self.with_capability(Box::new(cap))
    }

    /// Appends an extended capability.
    pub fn with_extended_capability(mut self, cap: ExtendedCapability) -> anyhow::Result<Self> {
        self.common.capabilities.push_extended(cap)?;
        Ok(self)
    }

    /// Returns `value` for every read of the dword at `offset`.
    pub fn with_register(mut self, offset: u16, value: u32) -> Self {
        self.common.overrides.insert(offset, value);
        self
    }

    /// Presets the bus numbers as firmware would have left them.
    pub fn with_bus_numbers(mut self, primary: u8, secondary: u8, subordinate: u8) -> Self {
        self.primary = primary;
        self.secondary = secondary;
        self.subordinate = subordinate;
        self
    }

    /// Presets a firmware-programmed memory window covering `range`. The
    /// range must be 1M aligned.
    pub fn with_firmware_memory_window(mut self, range: RangeInclusive<u32>) -> Self {
        self.memory_base = (*range.start() >> 16) as u16 & MEMORY_RANGE_MASK;
        self.memory_limit = (*range.end() >> 16) as u16 & MEMORY_RANGE_MASK;
        self.common.command.set_mmio_enabled(true);
        self
    }

    /// Presets a firmware-programmed prefetchable window covering `range`.
    pub fn with_firmware_prefetch_window(mut self, range: RangeInclusive<u64>) -> Self {
        self.prefetch_base = (*range.start() >> 16) as u16 & MEMORY_RANGE_MASK;
        self.prefetch_limit = (*range.end() >> 16) as u16 & MEMORY_RANGE_MASK;
        if self.prefetch_decode == Some(PrefetchDecode::Bits64) {
            self.prefetch_base_upper = (*range.start() >> 32) as u32;
            self.prefetch_limit_upper = (*range.end() >> 32) as u32;
        }
        self.common.command.set_mmio_enabled(true);
        self
    }

    /// Presets a firmware-programmed I/O window covering `range`.
    pub fn with_firmware_io_window(mut self, range: RangeInclusive<u32>) -> Self {
        self.io_base = (*range.start() >> 8) as u8 & IO_RANGE_MASK;
        self.io_limit = (*range.end() >> 8) as u8 & IO_RANGE_MASK;
        if self.io_decode == Some(IoDecode::Bits32) {
            self.io_base_upper = (*range.start() >> 16) as u16;
            self.io_limit_upper = (*range.end() >> 16) as u16;
        }
        self.common.command.set_pio_enabled(true);
        self
    }

    /// Attaches a device to the secondary bus.
    pub fn with_device(
        mut self,
        devfn: DevFn,
        device: impl Into<SimDevice>,
    ) -> anyhow::Result<Self> {
        self.downstream.add(devfn, device)?;
        Ok(self)
    }

    /// The secondary bus segment.
    pub fn downstream(&self) -> &SimBus {
        &self.downstream
    }

    /// The secondary bus segment.
    pub fn downstream_mut(&mut self) -> &mut SimBus {
        &mut self.downstream
    }

    /// The hardware IDs of this bridge.
    pub fn hardware_ids(&self) -> HardwareIds {
        self.common.hardware_ids
    }

    /// The current command register.
    pub fn command(&self) -> cfg_space::Command {
        self.common.command
    }

    /// The current bridge control register.
    pub fn bridge_control(&self) -> BridgeControl {
        self.bridge_control
    }

    /// The primary, secondary and subordinate bus numbers.
    pub fn bus_numbers(&self) -> (u8, u8, u8) {
        (self.primary, self.secondary, self.subordinate)
    }

    /// Returns the range of bus numbers the bridge is programmed to accept.
    ///
    /// A value of `0..=0` is returned while the secondary bus number is
    /// unprogrammed.
    pub fn assigned_bus_range(&self) -> RangeInclusive<u8> {
        if self.secondary == 0 || self.secondary > self.subordinate {
            0..=0
        } else {
            self.secondary..=self.subordinate
        }
    }

    /// The decoded I/O window, or `None` if it is closed or not implemented.
    pub fn io_window(&self) -> Option<RangeInclusive<u64>> {
        self.io_decode?;
        let base = ((self.io_base & IO_RANGE_MASK) as u64) << 8 | (self.io_base_upper as u64) << 16;
        let limit = ((self.io_limit & IO_RANGE_MASK) as u64) << 8
            | 0xFFF
            | (self.io_limit_upper as u64) << 16;
        (base <= limit).then_some(base..=limit)
    }

    /// The decoded memory window, or `None` if it is closed.
    pub fn memory_window(&self) -> Option<RangeInclusive<u64>> {
        let base = ((self.memory_base & MEMORY_RANGE_MASK) as u64) << 16;
        let limit = ((self.memory_limit & MEMORY_RANGE_MASK) as u64) << 16 | 0xF_FFFF;
        (base <= limit).then_some(base..=limit)
    }

    /// The decoded prefetchable window, or `None` if it is closed or not
    /// implemented.
    pub fn prefetch_window(&self) -> Option<RangeInclusive<u64>> {
        self.prefetch_decode?;
        let base = ((self.prefetch_base & MEMORY_RANGE_MASK) as u64) << 16
            | (self.prefetch_base_upper as u64) << 32;
        let limit = ((self.prefetch_limit & MEMORY_RANGE_MASK) as u64) << 16
            | 0xF_FFFF
            | (self.prefetch_limit_upper as u64) << 32;
        (base <= limit).then_some(base..=limit)
    }

    /// The address programmed into BAR `index` (low dword only).
    pub fn bar(&self, index: usize) -> u32 {
        self.bars.read(index)
    }

    /// Returns whether ARI forwarding was enabled through the PCI Express
    /// capability.
    pub fn ari_forwarding_enabled(&self) -> bool {
        self.common
            .capabilities
            .pci_express()
            .is_some_and(|cap| cap.ari_forwarding_enabled())
    }

    /// Returns the bridge to its power-on state. Devices behind it are left
    /// attached.
    pub fn reset(&mut self) {
        self.common.reset();
        self.bars.reset();
        self.rom.reset();
        self.primary = 0;
        self.secondary = 0;
        self.subordinate = 0;
        self.secondary_latency = 0;
        self.io_base = 0;
        self.io_limit = 0;
        self.io_base_upper = 0;
        self.io_limit_upper = 0;
        self.memory_base = 0;
        self.memory_limit = 0;
        self.prefetch_base = 0;
        self.prefetch_limit = 0;
        self.prefetch_base_upper = 0;
        self.prefetch_limit_upper = 0;
        self.bridge_control = BridgeControl::new();
    }

    fn io_type_bits(&self) -> u8 {
        match self.io_decode {
            Some(IoDecode::Bits32) => IO_RANGE_TYPE_32,
            _ => 0,
        }
    }

    fn prefetch_type_bits(&self) -> u16 {
        match self.prefetch_decode {
            Some(PrefetchDecode::Bits64) => PREFETCH_RANGE_TYPE_64,
            _ => 0,
        }
    }

    pub(crate) fn read_u32(&mut self, offset: u16) -> Result<u32, ConfigAccessError> {
        if let Some(result) = self.common.intercept_read(offset) {
            return result;
        }
        let value = match HeaderType01(offset) {
            HeaderType01::BAR0 | HeaderType01::BAR1 => {
                self.bars.read((offset - HeaderType01::BAR0.0) as usize / 4)
            }
            HeaderType01::LATENCY_BUS_NUMBERS => u32::from_le_bytes([
                self.primary,
                self.secondary,
                self.subordinate,
                self.secondary_latency,
            ]),
            HeaderType01::SEC_STATUS_IO_RANGE => {
                if self.io_decode.is_some() {
                    let type_bits = self.io_type_bits();
                    ((self.io_limit | type_bits) as u32) << 8 | (self.io_base | type_bits) as u32
                } else {
                    0
                }
            }
            HeaderType01::MEMORY_RANGE => {
                (self.memory_limit as u32) << 16 | self.memory_base as u32
            }
            HeaderType01::PREFETCH_RANGE => {
                if self.prefetch_decode.is_some() {
                    let type_bits = self.prefetch_type_bits();
                    ((self.prefetch_limit | type_bits) as u32) << 16
                        | (self.prefetch_base | type_bits) as u32
                } else {
                    0
                }
            }
            HeaderType01::PREFETCH_BASE_UPPER => self.prefetch_base_upper,
            HeaderType01::PREFETCH_LIMIT_UPPER => self.prefetch_limit_upper,
            HeaderType01::IO_RANGE_UPPER => {
                (self.io_limit_upper as u32) << 16 | self.io_base_upper as u32
            }
            HeaderType01::EXPANSION_ROM_BASE => self.rom.read(),
            HeaderType01::BRIDGE_CTRL_INTERRUPT => {
                (self.bridge_control.into_bits() as u32) << 16 | self.common.interrupt_register()
            }
            _ => self.common.read(offset).unwrap_or_else(|| {
                tracing::trace!(offset, "read of unimplemented register");
                0
            }),
        };
        Ok(value)
    }

    pub(crate) fn write_u32(&mut self, offset: u16, val: u32) -> Result<(), ConfigAccessError> {
        if let Some(err) = self.common.intercept_write() {
            return Err(err);
        }
        match HeaderType01(offset) {
            HeaderType01::BAR0 | HeaderType01::BAR1 => {
                let index = (offset - HeaderType01::BAR0.0) as usize / 4;
                self.bars.write(index, val, self.common.command);
            }
            HeaderType01::LATENCY_BUS_NUMBERS => {
                let [primary, secondary, subordinate, latency] = val.to_le_bytes();
                self.primary = primary;
                self.secondary = secondary;
                self.subordinate = subordinate;
                self.secondary_latency = latency;
            }
            HeaderType01::SEC_STATUS_IO_RANGE => {
                if self.io_decode.is_some() {
                    self.io_base = val as u8 & IO_RANGE_MASK;
                    self.io_limit = (val >> 8) as u8 & IO_RANGE_MASK;
                }
            }
            HeaderType01::MEMORY_RANGE => {
                self.memory_base = val as u16 & MEMORY_RANGE_MASK;
                self.memory_limit = (val >> 16) as u16 & MEMORY_RANGE_MASK;
            }
            HeaderType01::PREFETCH_RANGE => {
                if self.prefetch_decode.is_some() {
                    self.prefetch_base = val as u16 & MEMORY_RANGE_MASK;
                    self.prefetch_limit = (val >> 16) as u16 & MEMORY_RANGE_MASK;
                }
            }
            HeaderType01::PREFETCH_BASE_UPPER => {
                if self.prefetch_decode == Some(PrefetchDecode::Bits64) {
                    self.prefetch_base_upper = val;
                }
            }
            HeaderType01::PREFETCH_LIMIT_UPPER => {
                if self.prefetch_decode == Some(PrefetchDecode::Bits64) {
                    self.prefetch_limit_upper = val;
                }
            }
            HeaderType01::IO_RANGE_UPPER => {
                if self.io_decode == Some(IoDecode::Bits32) {
                    self.io_base_upper = val as u16;
                    self.io_limit_upper = (val >> 16) as u16;
                }
            }
            HeaderType01::EXPANSION_ROM_BASE => self.rom.write(val),
            HeaderType01::BRIDGE_CTRL_INTERRUPT => {
                self.common.interrupt_line = val as u8;
                self.bridge_control =
                    BridgeControl::from_bits((val >> 16) as u16 & BRIDGE_CONTROL_MASK);
            }
            // read-only registers
            HeaderType01::DEVICE_VENDOR
            | HeaderType01::CLASS_REVISION
            | HeaderType01::RESERVED_CAP_PTR => {}
            _ => {
                if !self.common.write(offset, val) {
                    tracing::trace!(offset, val, "write to unimplemented register");
                }
            }
        }
        Ok(())
    }
}

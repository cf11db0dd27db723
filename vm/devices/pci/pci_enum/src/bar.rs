// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Probing and programming of BARs, expansion ROMs and bridge windows.
//!
//! Sizing a BAR is destructive: the register is overwritten with all ones
//! and read back. Decode is disabled in the command register for the
//! duration and every register touched is restored before returning.

use crate::error::BarRejectReason;
use crate::policy::AllocationPolicy;
use crate::resource::Resource;
use crate::resource::ResourceFlags;
use crate::tree::BRIDGE_WINDOW_COUNT;
use crate::tree::IO_WINDOW;
use crate::tree::MEMORY_WINDOW;
use crate::tree::PREFETCH_WINDOW;
use crate::tree::WindowSupport;
use pci_core::Bdf;
use pci_core::ConfigAccessError;
use pci_core::ConfigAccessor;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::BarEncodingBits;
use pci_core::spec::cfg_space::bridge;
use std::ops::RangeInclusive;

const MEMORY_TYPE_SHIFT: u32 = 1;
const MEMORY_TYPE_MASK: u32 = 0b11;
const MEMORY_TYPE_64: u32 = 0b10;

/// Highest bus address reachable through a 32-bit BAR or window.
pub const LIMIT_32: u64 = 0xFFFF_FFFF;
/// Highest port reachable through a 16-bit I/O BAR or window.
pub const LIMIT_IO_16: u64 = 0xFFFF;

/// The result of probing one BAR.
#[derive(Debug, Clone)]
pub struct DecodedBar {
    /// The resource, unassigned, or empty if the BAR is not implemented or
    /// was rejected.
    pub resource: Resource,
    /// The bus address firmware left in the BAR. Zero if none.
    pub firmware: u64,
    /// The BAR consumed the following register as its upper half.
    pub is_64: bool,
    /// Set when the BAR was rejected.
    pub rejected: Option<BarRejectReason>,
}

impl DecodedBar {
    fn empty(is_64: bool) -> Self {
        Self {
            resource: Resource::default(),
            firmware: 0,
            is_64,
            rejected: None,
        }
    }

    fn rejected(is_64: bool, reason: BarRejectReason) -> Self {
        Self {
            rejected: Some(reason),
            ..Self::empty(is_64)
        }
    }
}

/// Restores the command register when dropped, so that early returns on
/// access errors leave decode as it was found.
struct DecodeDisabled<'a> {
    cfg: &'a mut dyn ConfigAccessor,
    bdf: Bdf,
    command: Option<u16>,
}

impl<'a> DecodeDisabled<'a> {
    fn new(cfg: &'a mut dyn ConfigAccessor, bdf: Bdf) -> Result<Self, ConfigAccessError> {
        let command = cfg.read16(bdf.bus, bdf.devfn, cfg_space::COMMAND)?;
        let decode = cfg_space::Command::new()
            .with_pio_enabled(true)
            .with_mmio_enabled(true)
            .into_bits();
        let saved = if command & decode != 0 {
            cfg.write16(bdf.bus, bdf.devfn, cfg_space::COMMAND, command & !decode)?;
            Some(command)
        } else {
            None
        };
        Ok(Self {
            cfg,
            bdf,
            command: saved,
        })
    }

    /// Writes `probe` to the dword at `offset`, reads it back and restores
    /// the original value. Returns `(original, read back)`.
    fn probe(&mut self, offset: u16, probe: u32) -> Result<(u32, u32), ConfigAccessError> {
        let Bdf { bus, devfn } = self.bdf;
        let original = self.cfg.read32(bus, devfn, offset)?;
        self.cfg.write32(bus, devfn, offset, probe)?;
        let mask = self.cfg.read32(bus, devfn, offset);
        self.cfg.write32(bus, devfn, offset, original)?;
        Ok((original, mask?))
    }
}

impl Drop for DecodeDisabled<'_> {
    fn drop(&mut self) {
        if let Some(command) = self.command {
            let Bdf { bus, devfn } = self.bdf;
            if let Err(err) = self.cfg.write16(bus, devfn, cfg_space::COMMAND, command) {
                tracing::warn!(
                    bdf = %self.bdf,
                    error = &err as &dyn std::error::Error,
                    "failed to restore command register"
                );
            }
        }
    }
}

/// Probes the BAR register at `offset`. `last` is set for the last BAR
/// register of the header, which cannot hold a 64-bit BAR.
pub fn decode_bar(
    cfg: &mut dyn ConfigAccessor,
    policy: &AllocationPolicy,
    bdf: Bdf,
    offset: u16,
    last: bool,
) -> Result<DecodedBar, ConfigAccessError> {
    let mut guard = DecodeDisabled::new(cfg, bdf)?;
    let (original, mask) = guard.probe(offset, !0)?;
    let original = if original == !0 { 0 } else { original };
    let bits = BarEncodingBits::from_bits(original);

    if mask == 0 || mask == !0 {
        return Ok(DecodedBar::empty(false));
    }

    if bits.use_pio() {
        let size_bits = mask & cfg_space::BAR_IO_ADDRESS_MASK;
        // Devices that only decode 16 bits of I/O hardwire the upper half.
        let limit = if size_bits & 0xFFFF_0000 == 0 {
            LIMIT_IO_16
        } else {
            LIMIT_32
        };
        let Some(size) = lowest_bit(size_bits as u64) else {
            return Ok(DecodedBar::rejected(false, BarRejectReason::NoSizeBits));
        };
        let flags = ResourceFlags::new().with_io(true).with_size_align(true);
        return Ok(DecodedBar {
            resource: Resource::unassigned(size, size, flags, limit),
            firmware: (original & cfg_space::BAR_IO_ADDRESS_MASK) as u64,
            is_64: false,
            rejected: None,
        });
    }

    let is_64 = (original >> MEMORY_TYPE_SHIFT) & MEMORY_TYPE_MASK == MEMORY_TYPE_64
        || (mask >> MEMORY_TYPE_SHIFT) & MEMORY_TYPE_MASK == MEMORY_TYPE_64;
    let prefetch = bits.prefetchable() || BarEncodingBits::from_bits(mask).prefetchable();

    let mut address = (original & cfg_space::BAR_MEMORY_ADDRESS_MASK) as u64;
    let mut size_bits = (mask & cfg_space::BAR_MEMORY_ADDRESS_MASK) as u64;
    if is_64 {
        if last {
            return Ok(DecodedBar::rejected(true, BarRejectReason::NoUpperHalf));
        }
        let (upper, upper_mask) = guard.probe(offset + 4, !0)?;
        address |= (upper as u64) << 32;
        size_bits |= (upper_mask as u64) << 32;
    }
    drop(guard);

    let Some(size) = lowest_bit(size_bits) else {
        return Ok(DecodedBar::rejected(is_64, BarRejectReason::NoSizeBits));
    };
    let max = policy.max_address();
    if size - 1 > max {
        return Ok(DecodedBar::rejected(is_64, BarRejectReason::AddressWidth));
    }
    let firmware = if address.checked_add(size - 1).is_none_or(|end| end > max) {
        tracing::debug!(%bdf, offset, address, "firmware address beyond platform width");
        0
    } else {
        address
    };

    let flags = ResourceFlags::new()
        .with_mem(true)
        .with_mem_64(is_64)
        .with_prefetch(prefetch)
        .with_size_align(true);
    let limit = if is_64 { max } else { LIMIT_32.min(max) };
    Ok(DecodedBar {
        resource: Resource::unassigned(size, size, flags, limit),
        firmware,
        is_64,
        rejected: None,
    })
}

/// Probes the expansion ROM register at `offset`.
pub fn decode_rom(
    cfg: &mut dyn ConfigAccessor,
    policy: &AllocationPolicy,
    bdf: Bdf,
    offset: u16,
) -> Result<DecodedBar, ConfigAccessError> {
    let mut guard = DecodeDisabled::new(cfg, bdf)?;
    let original = guard.cfg.read32(bdf.bus, bdf.devfn, offset)?;
    let enable = original & cfg_space::ROM_ADDRESS_ENABLE;
    let (_, mask) = guard.probe(offset, cfg_space::ROM_ADDRESS_MASK | enable)?;
    drop(guard);

    let size_bits = mask & cfg_space::ROM_ADDRESS_MASK;
    if mask == !0 || size_bits == 0 {
        return Ok(DecodedBar::empty(false));
    }
    let Some(size) = lowest_bit(size_bits as u64) else {
        return Ok(DecodedBar::rejected(false, BarRejectReason::NoSizeBits));
    };
    let flags = ResourceFlags::new()
        .with_mem(true)
        .with_readonly(true)
        .with_size_align(true);
    let mut resource = Resource::unassigned(size, size, flags, LIMIT_32.min(policy.max_address()));
    resource.optional = true;
    Ok(DecodedBar {
        resource,
        firmware: (original & cfg_space::ROM_ADDRESS_MASK) as u64,
        is_64: false,
        rejected: None,
    })
}

/// The windows a bridge implements and the windows firmware left
/// programmed.
#[derive(Debug, Clone, Default)]
pub struct BridgeWindows {
    /// Implemented windows.
    pub support: WindowSupport,
    /// Firmware windows as bus addresses, indexed by window index.
    pub firmware: [Option<RangeInclusive<u64>>; BRIDGE_WINDOW_COUNT],
}

/// Determines which windows a type 1 bridge implements and reads the
/// windows firmware programmed.
pub fn probe_bridge_windows(
    cfg: &mut dyn ConfigAccessor,
    bdf: Bdf,
) -> Result<BridgeWindows, ConfigAccessError> {
    let Bdf { bus, devfn } = bdf;
    let mut support = WindowSupport {
        memory: true,
        ..Default::default()
    };

    let mut io = cfg.read16(bus, devfn, bridge::IO_BASE)?;
    if io == 0 {
        cfg.write16(bus, devfn, bridge::IO_BASE, 0xe0f0)?;
        io = cfg.read16(bus, devfn, bridge::IO_BASE)?;
        cfg.write16(bus, devfn, bridge::IO_BASE, 0)?;
    }
    if io != 0 {
        support.io = true;
        support.io_32 = io as u8 & bridge::IO_RANGE_TYPE_MASK == bridge::IO_RANGE_TYPE_32;
    }

    let mut pref = cfg.read32(bus, devfn, bridge::PREFETCH_BASE)?;
    if pref == 0 {
        cfg.write32(bus, devfn, bridge::PREFETCH_BASE, 0xffe0_fff0)?;
        pref = cfg.read32(bus, devfn, bridge::PREFETCH_BASE)?;
        cfg.write32(bus, devfn, bridge::PREFETCH_BASE, 0)?;
    }
    if pref != 0 {
        support.prefetch = true;
        if pref as u16 & bridge::PREFETCH_RANGE_TYPE_MASK == bridge::PREFETCH_RANGE_TYPE_64 {
            // The type bits can lie; make sure the upper half is writable.
            let upper = cfg.read32(bus, devfn, bridge::PREFETCH_BASE_UPPER)?;
            cfg.write32(bus, devfn, bridge::PREFETCH_BASE_UPPER, !0)?;
            let probe = cfg.read32(bus, devfn, bridge::PREFETCH_BASE_UPPER)?;
            cfg.write32(bus, devfn, bridge::PREFETCH_BASE_UPPER, upper)?;
            support.prefetch_64 = probe != 0;
        }
    }

    let firmware = read_bridge_windows(cfg, bdf, support)?;
    Ok(BridgeWindows { support, firmware })
}

/// Reads the windows a bridge currently forwards, as bus addresses.
pub fn read_bridge_windows(
    cfg: &mut dyn ConfigAccessor,
    bdf: Bdf,
    support: WindowSupport,
) -> Result<[Option<RangeInclusive<u64>>; BRIDGE_WINDOW_COUNT], ConfigAccessError> {
    let Bdf { bus, devfn } = bdf;
    let mut windows: [Option<RangeInclusive<u64>>; BRIDGE_WINDOW_COUNT] = Default::default();
    if support.io {
        let base_lo = cfg.read8(bus, devfn, bridge::IO_BASE)?;
        let limit_lo = cfg.read8(bus, devfn, bridge::IO_LIMIT)?;
        let mut base = ((base_lo & bridge::IO_RANGE_MASK) as u64) << 8;
        let mut limit = ((limit_lo & bridge::IO_RANGE_MASK) as u64) << 8;
        if support.io_32 {
            base |= (cfg.read16(bus, devfn, bridge::IO_BASE_UPPER)? as u64) << 16;
            limit |= (cfg.read16(bus, devfn, bridge::IO_LIMIT_UPPER)? as u64) << 16;
        }
        windows[IO_WINDOW] = window_range(base, limit, bridge::IO_WINDOW_GRANULARITY);
    }

    let base = cfg.read16(bus, devfn, bridge::MEMORY_BASE)?;
    let limit = cfg.read16(bus, devfn, bridge::MEMORY_LIMIT)?;
    windows[MEMORY_WINDOW] = window_range(
        ((base & bridge::MEMORY_RANGE_MASK) as u64) << 16,
        ((limit & bridge::MEMORY_RANGE_MASK) as u64) << 16,
        bridge::MEMORY_WINDOW_GRANULARITY,
    );

    if support.prefetch {
        let base_lo = cfg.read16(bus, devfn, bridge::PREFETCH_BASE)?;
        let limit_lo = cfg.read16(bus, devfn, bridge::PREFETCH_LIMIT)?;
        let mut base = ((base_lo & bridge::MEMORY_RANGE_MASK) as u64) << 16;
        let mut limit = ((limit_lo & bridge::MEMORY_RANGE_MASK) as u64) << 16;
        if support.prefetch_64 {
            base |= (cfg.read32(bus, devfn, bridge::PREFETCH_BASE_UPPER)? as u64) << 32;
            limit |= (cfg.read32(bus, devfn, bridge::PREFETCH_LIMIT_UPPER)? as u64) << 32;
        }
        windows[PREFETCH_WINDOW] = window_range(base, limit, bridge::MEMORY_WINDOW_GRANULARITY);
    }
    Ok(windows)
}

/// Programs a BAR with a bus address, keeping its type bits. Decode is
/// disabled while the register is written.
pub fn program_bar(
    cfg: &mut dyn ConfigAccessor,
    bdf: Bdf,
    offset: u16,
    address: u64,
) -> Result<(), ConfigAccessError> {
    let Bdf { bus, devfn } = bdf;
    let original = cfg.read32(bus, devfn, offset)?;
    let guard = DecodeDisabled::new(cfg, bdf)?;
    if BarEncodingBits::from_bits(original).use_pio() {
        let mask = cfg_space::BAR_IO_ADDRESS_MASK;
        return guard
            .cfg
            .write32(bus, devfn, offset, (address as u32 & mask) | (original & !mask));
    }
    let mask = cfg_space::BAR_MEMORY_ADDRESS_MASK;
    guard
        .cfg
        .write32(bus, devfn, offset, (address as u32 & mask) | (original & !mask))?;
    if (original >> MEMORY_TYPE_SHIFT) & MEMORY_TYPE_MASK == MEMORY_TYPE_64 {
        guard
            .cfg
            .write32(bus, devfn, offset + 4, (address >> 32) as u32)?;
    }
    Ok(())
}

/// Programs an expansion ROM BAR, leaving its enable bit alone.
pub fn program_rom(
    cfg: &mut dyn ConfigAccessor,
    bdf: Bdf,
    offset: u16,
    address: u64,
) -> Result<(), ConfigAccessError> {
    let Bdf { bus, devfn } = bdf;
    let original = cfg.read32(bus, devfn, offset)?;
    let value = (address as u32 & cfg_space::ROM_ADDRESS_MASK)
        | (original & cfg_space::ROM_ADDRESS_ENABLE);
    cfg.write32(bus, devfn, offset, value)
}

const IO_CLOSED: u16 = 0x00f0;
const MEMORY_CLOSED: u32 = 0x0000_fff0;

fn memory_range_register(range: &RangeInclusive<u64>) -> u32 {
    ((*range.start() >> 16) as u32 & 0xfff0) | (*range.end() as u32 & 0xfff0_0000)
}

fn narrows(current: &Option<RangeInclusive<u64>>, new: &Option<RangeInclusive<u64>>) -> bool {
    match (current, new) {
        (Some(cur), Some(new)) => new.start() > cur.start() || new.end() < cur.end(),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Programs a bridge's windows. `None` closes a window. A window that
/// shrinks is closed before the new range is written.
pub fn program_bridge_windows(
    cfg: &mut dyn ConfigAccessor,
    bdf: Bdf,
    support: WindowSupport,
    windows: &[Option<RangeInclusive<u64>>; BRIDGE_WINDOW_COUNT],
) -> Result<(), ConfigAccessError> {
    let Bdf { bus, devfn } = bdf;
    let current = read_bridge_windows(cfg, bdf, support)?;

    if support.io {
        let (low, upper) = match &windows[IO_WINDOW] {
            Some(range) => (
                ((*range.start() >> 8) as u16 & 0xf0) | (*range.end() as u16 & 0xf000),
                (*range.start() >> 16) as u32 | (*range.end() as u32 & 0xffff_0000),
            ),
            None => (IO_CLOSED, 0),
        };
        // Close the window while the upper half is inconsistent.
        if support.io_32 {
            cfg.write32(bus, devfn, bridge::IO_BASE_UPPER, 0x0000_ffff)?;
        }
        cfg.write16(bus, devfn, bridge::IO_BASE, low)?;
        if support.io_32 {
            cfg.write32(bus, devfn, bridge::IO_BASE_UPPER, upper)?;
        }
    }

    if narrows(&current[MEMORY_WINDOW], &windows[MEMORY_WINDOW]) {
        cfg.write32(bus, devfn, bridge::MEMORY_BASE, MEMORY_CLOSED)?;
    }
    let value = windows[MEMORY_WINDOW]
        .as_ref()
        .map_or(MEMORY_CLOSED, memory_range_register);
    cfg.write32(bus, devfn, bridge::MEMORY_BASE, value)?;

    if support.prefetch {
        if support.prefetch_64 {
            cfg.write32(bus, devfn, bridge::PREFETCH_LIMIT_UPPER, 0)?;
        }
        if narrows(&current[PREFETCH_WINDOW], &windows[PREFETCH_WINDOW]) {
            cfg.write32(bus, devfn, bridge::PREFETCH_BASE, MEMORY_CLOSED)?;
        }
        let (value, base_upper, limit_upper) = match &windows[PREFETCH_WINDOW] {
            Some(range) => (
                memory_range_register(range),
                (*range.start() >> 32) as u32,
                (*range.end() >> 32) as u32,
            ),
            None => (MEMORY_CLOSED, 0, 0),
        };
        cfg.write32(bus, devfn, bridge::PREFETCH_BASE, value)?;
        if support.prefetch_64 {
            cfg.write32(bus, devfn, bridge::PREFETCH_BASE_UPPER, base_upper)?;
            cfg.write32(bus, devfn, bridge::PREFETCH_LIMIT_UPPER, limit_upper)?;
        }
    }
    Ok(())
}

fn window_range(base: u64, limit: u64, granularity: u64) -> Option<RangeInclusive<u64>> {
    (base != 0 && base <= limit).then(|| base..=limit + granularity - 1)
}

fn lowest_bit(value: u64) -> Option<u64> {
    (value != 0).then(|| 1 << value.trailing_zeros())
}

/// Register offset of BAR `index` (the ROM is index
/// [`ROM_RESOURCE`](crate::tree::ROM_RESOURCE)).
pub fn resource_register(header: cfg_space::HeaderLayout, index: usize) -> u16 {
    if index == crate::tree::ROM_RESOURCE {
        if header == cfg_space::HeaderLayout::BRIDGE {
            cfg_space::HeaderType01::EXPANSION_ROM_BASE.0
        } else {
            cfg_space::HeaderType00::EXPANSION_ROM_BASE.0
        }
    } else {
        cfg_space::HeaderType00::BAR0.0 + 4 * index as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pci_core::DevFn;
    use pci_sim::BarKind;
    use pci_sim::SimBridge;
    use pci_sim::SimFunction;
    use pci_sim::SimRootComplex;
    use pci_sim::test_helpers::bridge_ids;
    use pci_sim::test_helpers::endpoint_ids;

    const BDF: Bdf = Bdf::new(0, DevFn::new(0, 0));

    fn root_with(f: SimFunction) -> SimRootComplex {
        SimRootComplex::new(0).with_device(DevFn::new(0, 0), f).unwrap()
    }

    #[test]
    fn memory_bars() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(
                0,
                BarKind::Memory32 {
                    size: 0x2000,
                    prefetchable: false,
                },
            )
            .unwrap()
            .with_bar(
                2,
                BarKind::Memory64 {
                    size: 0x1_0000_0000,
                    prefetchable: true,
                },
            )
            .unwrap();
        let mut root = root_with(f);
        let policy = AllocationPolicy::default();

        let bar = decode_bar(&mut root, &policy, BDF, 0x10, false).unwrap();
        assert!(!bar.is_64);
        assert_eq!(bar.resource.size(), 0x2000);
        assert_eq!(bar.resource.limit, LIMIT_32);
        assert!(bar.resource.flags.mem() && !bar.resource.flags.prefetch());

        let bar = decode_bar(&mut root, &policy, BDF, 0x18, false).unwrap();
        assert!(bar.is_64);
        assert_eq!(bar.resource.size(), 0x1_0000_0000);
        assert!(bar.resource.flags.mem_64() && bar.resource.flags.prefetch());
        assert_eq!(bar.resource.limit, u64::MAX);

        // Unimplemented.
        let bar = decode_bar(&mut root, &policy, BDF, 0x14, false).unwrap();
        assert!(bar.resource.is_empty());
    }

    #[test]
    fn sixty_four_bit_rejections() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(
                0,
                BarKind::Memory64 {
                    size: 0x2_0000_0000,
                    prefetchable: true,
                },
            )
            .unwrap()
            .with_bar(
                4,
                BarKind::Memory64 {
                    size: 0x1000,
                    prefetchable: false,
                },
            )
            .unwrap();
        let mut root = root_with(f);
        let policy = AllocationPolicy::default().with_address_bits(32);

        let bar = decode_bar(&mut root, &policy, BDF, 0x10, false).unwrap();
        assert_eq!(bar.rejected, Some(BarRejectReason::AddressWidth));
        assert!(bar.is_64 && bar.resource.is_empty());

        let bar = decode_bar(&mut root, &policy, BDF, 0x20, true).unwrap();
        assert_eq!(bar.rejected, Some(BarRejectReason::NoUpperHalf));
    }

    #[test]
    fn io_bars_and_all_ones() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(0, BarKind::Io { size: 0x20 })
            .unwrap()
            .with_bar(1, BarKind::Raw { mask: !0 })
            .unwrap()
            .with_firmware_bar(0, 0x2040);
        let mut root = root_with(f);
        let policy = AllocationPolicy::default();

        let bar = decode_bar(&mut root, &policy, BDF, 0x10, false).unwrap();
        assert!(bar.resource.flags.io());
        assert_eq!(bar.resource.size(), 0x20);
        assert_eq!(bar.firmware, 0x2040);

        let bar = decode_bar(&mut root, &policy, BDF, 0x14, false).unwrap();
        assert!(bar.resource.is_empty());
        assert_eq!(bar.rejected, None);
    }

    #[test]
    fn probe_restores_registers() {
        let command = cfg_space::Command::new().with_mmio_enabled(true);
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(
                0,
                BarKind::Memory32 {
                    size: 0x1000,
                    prefetchable: false,
                },
            )
            .unwrap()
            .with_firmware_bar(0, 0xc000_0000)
            .with_command(command);
        let mut root = root_with(f);
        let bar = decode_bar(&mut root, &AllocationPolicy::default(), BDF, 0x10, false).unwrap();
        assert_eq!(bar.firmware, 0xc000_0000);
        let f = root.function(&[DevFn::new(0, 0)]).unwrap();
        assert_eq!(f.bar_address(0), 0xc000_0000);
        assert_eq!(f.command(), command);
    }

    #[test]
    fn rom_probe() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_rom(0x1_0000)
            .unwrap()
            .with_firmware_rom(0xfeb0_0001);
        let mut root = root_with(f);
        let rom = decode_rom(&mut root, &AllocationPolicy::default(), BDF, 0x30).unwrap();
        assert_eq!(rom.resource.size(), 0x1_0000);
        assert!(rom.resource.optional);
        assert!(rom.resource.flags.readonly());
        assert_eq!(rom.firmware, 0xfeb0_0000);
        assert_eq!(root.function(&[DevFn::new(0, 0)]).unwrap().rom(), 0xfeb0_0001);
    }

    #[test]
    fn bridge_window_support() {
        let mut root = SimRootComplex::new(0)
            .with_device(
                DevFn::new(0, 0),
                SimBridge::new(bridge_ids())
                    .with_io_decode(None)
                    .with_firmware_memory_window(0xc000_0000..=0xc01f_ffff),
            )
            .unwrap()
            .with_device(
                DevFn::new(1, 0),
                SimBridge::new(bridge_ids())
                    .with_io_decode(Some(pci_sim::IoDecode::Bits16))
                    .with_prefetch_decode(Some(pci_sim::PrefetchDecode::Bits32)),
            )
            .unwrap();

        let w = probe_bridge_windows(&mut root, BDF).unwrap();
        assert!(!w.support.io);
        assert!(w.support.prefetch && w.support.prefetch_64);
        assert_eq!(w.firmware[MEMORY_WINDOW], Some(0xc000_0000..=0xc01f_ffff));
        assert_eq!(w.firmware[PREFETCH_WINDOW], None);

        let w = probe_bridge_windows(&mut root, Bdf::new(0, DevFn::new(1, 0))).unwrap();
        assert!(w.support.io && !w.support.io_32);
        assert!(w.support.prefetch && !w.support.prefetch_64);
        assert_eq!(w.firmware, [None, None, None]);
    }

    #[test]
    fn program_bars_and_rom() {
        let command = cfg_space::Command::new().with_mmio_enabled(true);
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(0, BarKind::Io { size: 0x20 })
            .unwrap()
            .with_bar(
                2,
                BarKind::Memory64 {
                    size: 0x10_0000,
                    prefetchable: true,
                },
            )
            .unwrap()
            .with_rom(0x1_0000)
            .unwrap()
            .with_firmware_rom(0x1)
            .with_command(command);
        let mut root = root_with(f);

        program_bar(&mut root, BDF, 0x10, 0x1020).unwrap();
        program_bar(&mut root, BDF, 0x18, 0x8_4000_0000).unwrap();
        program_rom(&mut root, BDF, 0x30, 0xc010_0000).unwrap();

        let f = root.function(&[DevFn::new(0, 0)]).unwrap();
        assert_eq!(f.bar_address(0), 0x1020);
        assert_eq!(f.bar_address(2), 0x8_4000_0000);
        assert_eq!(f.rom(), 0xc010_0001);
        assert_eq!(f.command(), command);
    }

    #[test]
    fn program_and_close_bridge_windows() {
        let mut root = SimRootComplex::new(0)
            .with_device(
                DevFn::new(0, 0),
                SimBridge::new(bridge_ids())
                    .with_firmware_memory_window(0xc000_0000..=0xc03f_ffff),
            )
            .unwrap();
        let support = probe_bridge_windows(&mut root, BDF).unwrap().support;
        let windows = [
            Some(0x2000..=0x2fff),
            Some(0xc000_0000..=0xc01f_ffff),
            Some(0x8_0000_0000..=0x8_000f_ffff),
        ];
        program_bridge_windows(&mut root, BDF, support, &windows).unwrap();
        let bridge = root.bridge(&[BDF.devfn]).unwrap();
        assert_eq!(bridge.io_window(), Some(0x2000..=0x2fff));
        assert_eq!(bridge.memory_window(), Some(0xc000_0000..=0xc01f_ffff));
        assert_eq!(bridge.prefetch_window(), Some(0x8_0000_0000..=0x8_000f_ffff));
        assert_eq!(read_bridge_windows(&mut root, BDF, support).unwrap(), windows);

        program_bridge_windows(&mut root, BDF, support, &[None, None, None]).unwrap();
        let bridge = root.bridge(&[BDF.devfn]).unwrap();
        assert_eq!(bridge.io_window(), None);
        assert_eq!(bridge.memory_window(), None);
        assert_eq!(bridge.prefetch_window(), None);
    }
}

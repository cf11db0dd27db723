// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bus scanning: function discovery, device probing and bus numbering.

use crate::Enumerator;
use crate::bar;
use crate::error::PciError;
use crate::hooks::QuirkPhase;
use crate::tree::BridgeInfo;
use crate::tree::BusId;
use crate::tree::Device;
use crate::tree::DeviceId;
use crate::tree::PciTree;
use crate::tree::PcieInfo;
use crate::tree::ROM_RESOURCE;
use crate::tree::ResourceRef;
use pci_core::Bdf;
use pci_core::ConfigAccessError;
use pci_core::DevFn;
use pci_core::PciInterruptPin;
use pci_core::capabilities::CAPABILITY_TTL;
use pci_core::capabilities::CapabilityWalker;
use pci_core::capabilities::find_extended_capability;
use pci_core::spec::caps::CapabilityId;
use pci_core::spec::caps::ExtendedCapabilityId;
use pci_core::spec::caps::ari;
use pci_core::spec::caps::pci_express::DeviceCapabilities2;
use pci_core::spec::caps::pci_express::DeviceControl2;
use pci_core::spec::caps::pci_express::PCIE_CAPS_REGISTER;
use pci_core::spec::caps::pci_express::PciExpressCapabilities;
use pci_core::spec::caps::pci_express::PciExpressCapabilityHeader;
use pci_core::spec::caps::pci_express::SlotCapabilities;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::HeaderLayout;
use pci_core::spec::cfg_space::HeaderTypeRegister;
use pci_core::spec::cfg_space::bridge;
use pci_core::spec::hwid::ClassCode;
use pci_core::spec::hwid::HardwareIds;
use pci_core::spec::hwid::ProgrammingInterface;
use pci_core::spec::hwid::Subclass;
use pci_core::spec::hwid::VENDOR_ID_CRS;
use std::time::Duration;

/// Bus numbers kept free behind a CardBus bridge for cards carrying a
/// bridge of their own.
const CARDBUS_RESERVE_BUSNR: u8 = 3;

/// Offset of the bus number dword in type 1 and type 2 headers.
const BUS_NUMBERS: u16 = cfg_space::HeaderType01::LATENCY_BUS_NUMBERS.0;

fn access_error(bus: u8, devfn: DevFn, err: ConfigAccessError) -> PciError {
    match err {
        ConfigAccessError::Timeout => PciError::ConfigAccessTimeout { bus, devfn },
        source => PciError::BusAccess { bus, devfn, source },
    }
}

fn is_absent(id: u32) -> bool {
    matches!(id, 0xFFFF_FFFF | 0 | 0x0000_FFFF | 0xFFFF_0000)
}

impl Enumerator<'_> {
    /// Scans `bus` and, recursively, every bus behind its bridges. Devices
    /// and child buses already in the tree are reused. Returns the highest
    /// bus number in use below `bus`.
    pub fn scan_bus(&mut self, tree: &mut PciTree, bus: BusId) -> u8 {
        let number = tree.bus(bus).number();
        tracing::debug!(bus = number, "scanning bus");

        for slot in (0..=u8::MAX).step_by(8) {
            if slot > 0 && self.only_one_child(tree, bus) {
                break;
            }
            if let Err(err) = self.scan_slot(tree, bus, DevFn::from_raw(slot)) {
                tracing::warn!(
                    bus = number,
                    error = &err as &dyn std::error::Error,
                    "aborting scan of the rest of the bus"
                );
                break;
            }
        }

        let bridges: Vec<DeviceId> = tree
            .bus(bus)
            .devices()
            .iter()
            .copied()
            .filter(|&id| {
                let d = tree.device(id);
                d.is_bridge() || d.is_cardbus()
            })
            .collect();

        let mut max = number;
        for pass in 0..2 {
            for &bridge in &bridges {
                max = match self.scan_bridge(tree, bus, bridge, max, pass) {
                    Ok(max) => max,
                    Err(err) => {
                        tracing::warn!(
                            bdf = %tree.device(bridge).bdf,
                            error = &err as &dyn std::error::Error,
                            "bridge scan failed"
                        );
                        max
                    }
                };
            }
        }
        max
    }

    /// Buses behind PCIe root and downstream ports have a single slot.
    fn only_one_child(&self, tree: &PciTree, bus: BusId) -> bool {
        let b = tree.bus(bus);
        if self.policy.scan_all_slots || b.ari_enabled() {
            return false;
        }
        b.bridge()
            .is_some_and(|bridge| tree.device(bridge).is_downstream_port())
    }

    fn scan_slot(&mut self, tree: &mut PciTree, bus: BusId, slot: DevFn) -> Result<(), PciError> {
        let mut devfn = slot;
        loop {
            let device = self.scan_function(tree, bus, devfn)?;
            match device {
                Some(id) if devfn != slot => tree.device_mut(id).multi_function = true,
                Some(_) => {}
                // The first function of a slot is mandatory.
                None if devfn == slot => break,
                None => {}
            }
            match self.next_function(tree, bus, device, devfn) {
                Some(next) => devfn = next,
                None => break,
            }
        }
        Ok(())
    }

    fn next_function(
        &mut self,
        tree: &PciTree,
        bus: BusId,
        device: Option<DeviceId>,
        devfn: DevFn,
    ) -> Option<DevFn> {
        if tree.bus(bus).ari_enabled() {
            let pos = tree.device(device?).ari_capability?;
            let number = tree.bus(bus).number();
            let cap = self
                .cfg
                .read16(number, devfn, pos + ari::ARI_CAPABILITY)
                .ok()?;
            let next = ari::AriCapability::from_bits(cap).next_function_number();
            if next <= devfn.raw() {
                if next != 0 {
                    tracing::warn!(bus = number, %devfn, next, "ari function chain loops back");
                }
                return None;
            }
            return Some(DevFn::from_raw(next));
        }
        if devfn.function() >= 7 {
            return None;
        }
        if let Some(id) = device {
            if !tree.device(id).multi_function {
                return None;
            }
        }
        Some(DevFn::new(devfn.device(), devfn.function() + 1))
    }

    /// Probes one function. `Ok(None)` means nothing usable is there; an
    /// error means the bus itself is failing.
    fn scan_function(
        &mut self,
        tree: &mut PciTree,
        bus: BusId,
        devfn: DevFn,
    ) -> Result<Option<DeviceId>, PciError> {
        if let Some(id) = tree.find_device(bus, devfn) {
            return Ok(Some(id));
        }
        let number = tree.bus(bus).number();
        let result = self
            .read_vendor_device(number, devfn)
            .and_then(|id| self.probe_device(tree, bus, devfn, id));
        match result {
            Ok(id) => Ok(id),
            Err(PciError::DeviceAbsent { .. }) => Ok(None),
            Err(err @ PciError::ConfigAccessTimeout { .. }) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "skipping unresponsive function"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Reads the vendor/device ID dword, waiting out configuration request
    /// retry status with exponential backoff.
    fn read_vendor_device(&mut self, bus: u8, devfn: DevFn) -> Result<u32, PciError> {
        let mut id = self
            .cfg
            .read32(bus, devfn, cfg_space::VENDOR_ID)
            .map_err(|err| access_error(bus, devfn, err))?;
        let mut delay = self
            .policy
            .crs_initial_delay
            .max(Duration::from_micros(1));
        while id as u16 == VENDOR_ID_CRS {
            if delay > self.policy.crs_timeout {
                tracing::warn!(bus, %devfn, "function not ready, giving up");
                return Err(PciError::ConfigAccessTimeout { bus, devfn });
            }
            if delay >= Duration::from_secs(1) {
                tracing::info!(bus, %devfn, ?delay, "function not ready, still waiting");
            }
            self.cfg.delay(delay);
            delay = delay.saturating_mul(2);
            id = self
                .cfg
                .read32(bus, devfn, cfg_space::VENDOR_ID)
                .map_err(|err| access_error(bus, devfn, err))?;
        }
        if is_absent(id) {
            return Err(PciError::DeviceAbsent { bus, devfn });
        }
        Ok(id)
    }

    fn probe_device(
        &mut self,
        tree: &mut PciTree,
        bus: BusId,
        devfn: DevFn,
        id: u32,
    ) -> Result<Option<DeviceId>, PciError> {
        let number = tree.bus(bus).number();
        let bdf = Bdf::new(number, devfn);
        let err = |err| access_error(number, devfn, err);

        let class_revision = self
            .cfg
            .read32(number, devfn, cfg_space::CommonHeader::CLASS_REVISION.0)
            .map_err(err)?;
        let header = HeaderTypeRegister::from_bits(
            self.cfg
                .read8(number, devfn, cfg_space::HEADER_TYPE)
                .map_err(err)?,
        );
        let layout = HeaderLayout(header.layout());
        let bar_count = match layout {
            HeaderLayout::NORMAL => cfg_space::HEADER_TYPE_00_BAR_COUNT,
            HeaderLayout::BRIDGE => cfg_space::HEADER_TYPE_01_BAR_COUNT,
            HeaderLayout::CARDBUS => cfg_space::HEADER_TYPE_02_BAR_COUNT,
            _ => {
                tracing::warn!(%bdf, layout = layout.0, "ignoring device with unknown header type");
                return Ok(None);
            }
        };

        let subsystem = if layout == HeaderLayout::NORMAL {
            self.cfg
                .read32(number, devfn, cfg_space::HeaderType00::SUBSYSTEM_ID.0)
                .map_err(err)?
        } else {
            0
        };
        let ids = HardwareIds {
            vendor_id: id as u16,
            device_id: (id >> 16) as u16,
            revision_id: 0,
            prog_if: ProgrammingInterface::NONE,
            sub_class: Subclass::NONE,
            base_class: ClassCode::UNCLASSIFIED,
            type0_sub_vendor_id: subsystem as u16,
            type0_sub_system_id: (subsystem >> 16) as u16,
        }
        .with_class_revision(class_revision);

        let mut device = Device::new(bus, bdf, ids, layout);
        device.multi_function = header.multi_function();

        let interrupt = self
            .cfg
            .read16(number, devfn, cfg_space::INTERRUPT_LINE)
            .map_err(err)?;
        device.interrupt_line = interrupt as u8;
        device.interrupt_pin = PciInterruptPin::from_register((interrupt >> 8) as u8);

        self.probe_capabilities(&mut device).map_err(err)?;

        let mut index = 0;
        while index < bar_count {
            let offset = bar::resource_register(layout, index);
            let decoded = bar::decode_bar(
                &mut *self.cfg,
                self.policy,
                bdf,
                offset,
                index + 1 == bar_count,
            )
            .map_err(err)?;
            if let Some(reason) = decoded.rejected {
                let err = PciError::BarDecodeRejected {
                    bus: number,
                    devfn,
                    offset,
                    reason,
                };
                tracing::warn!(error = &err as &dyn std::error::Error, "bar left unassigned");
            }
            device.resources[index] = decoded.resource;
            device.firmware[index] = decoded.firmware;
            index += if decoded.is_64 { 2 } else { 1 };
        }

        if layout != HeaderLayout::CARDBUS {
            let offset = bar::resource_register(layout, ROM_RESOURCE);
            let rom = bar::decode_rom(&mut *self.cfg, self.policy, bdf, offset).map_err(err)?;
            device.resources[ROM_RESOURCE] = rom.resource;
            device.firmware[ROM_RESOURCE] = rom.firmware;
        }

        if layout == HeaderLayout::BRIDGE {
            let windows = bar::probe_bridge_windows(&mut *self.cfg, bdf).map_err(err)?;
            device.bridge = Some(BridgeInfo {
                support: windows.support,
                firmware_windows: windows.firmware,
                subtractive: ids.prog_if
                    == ProgrammingInterface::BRIDGE_PCI_TO_PCI_SUBTRACTIVE_DECODE,
            });
        }

        if let Some(align) = self.policy.alignment_overrides.alignment_for(number, devfn, &ids) {
            realign(&mut device, align);
        }

        self.hooks
            .run_quirks(QuirkPhase::AfterProbe, &mut *self.cfg, &mut device);

        tracing::debug!(
            %bdf,
            vendor_id = device.ids.vendor_id,
            device_id = device.ids.device_id,
            class = ?device.ids.base_class,
            header = layout.0,
            "found device"
        );
        let id = tree.add_device(device);
        self.hooks.device_added(tree, id);
        if let Err(e) = self.configure_ari(tree, bus, id) {
            tracing::warn!(
                %bdf,
                error = &e as &dyn std::error::Error,
                "failed to configure ari forwarding"
            );
        }
        Ok(Some(id))
    }

    fn probe_capabilities(&mut self, device: &mut Device) -> Result<(), ConfigAccessError> {
        let Bdf { bus, devfn } = device.bdf;
        let caps: Vec<_> =
            CapabilityWalker::new(&mut *self.cfg, bus, devfn, CAPABILITY_TTL).collect();
        device.capability_pointer = caps.first().map(|cap| cap.offset);
        device.pm_capability = caps
            .iter()
            .find(|cap| cap.id == CapabilityId::POWER_MANAGEMENT)
            .map(|cap| cap.offset);

        let Some(pcie) = caps.iter().find(|cap| cap.id == CapabilityId::PCI_EXPRESS) else {
            return Ok(());
        };
        let base = pcie.offset as u16;
        let caps_reg = PciExpressCapabilities::from_bits(
            self.cfg.read16(bus, devfn, base + PCIE_CAPS_REGISTER)?,
        );
        let slot_hotplug = caps_reg.slot_implemented()
            && SlotCapabilities::from_bits(
                self.cfg
                    .read32(bus, devfn, base + PciExpressCapabilityHeader::SLOT_CAPS.0)?,
            )
            .hot_plug_capable();
        let caps2 = DeviceCapabilities2::from_bits(
            self.cfg
                .read32(bus, devfn, base + PciExpressCapabilityHeader::DEVICE_CAPS_2.0)?,
        );
        device.pcie = Some(PcieInfo {
            offset: pcie.offset,
            port_type: caps_reg.device_port_type(),
            slot_hotplug,
            ari_forwarding: caps2.ari_forwarding_supported(),
        });
        device.ari_capability = find_extended_capability(
            &mut *self.cfg,
            bus,
            devfn,
            ExtendedCapabilityId::ALTERNATIVE_ROUTING_ID,
        );
        Ok(())
    }

    /// Enables ARI forwarding on the bridge above function 0 of a bus when
    /// both ends support it.
    fn configure_ari(
        &mut self,
        tree: &mut PciTree,
        bus: BusId,
        id: DeviceId,
    ) -> Result<(), ConfigAccessError> {
        let device = tree.device(id);
        if !self.policy.enable_ari || device.devfn().raw() != 0 {
            return Ok(());
        }
        let ari_capable = device.ari_capability.is_some() && device.pcie.is_some();
        let Some(bridge) = tree.bus(bus).bridge() else {
            return Ok(());
        };
        let bridge = tree.device(bridge);
        let Some(pcie) = bridge.pcie.filter(|p| p.ari_forwarding) else {
            return Ok(());
        };
        let Bdf { bus: number, devfn } = bridge.bdf;
        let offset = pcie.offset as u16 + PciExpressCapabilityHeader::DEVICE_CTL_STS_2.0;
        let control = DeviceControl2::from_bits(self.cfg.read16(number, devfn, offset)?);
        self.cfg.write16(
            number,
            devfn,
            offset,
            control.with_ari_forwarding_enable(ari_capable).into_bits(),
        )?;
        if ari_capable {
            tracing::debug!(bdf = %bridge.bdf, "ari forwarding enabled");
        }
        tree.bus_mut(bus).ari_enabled = ari_capable;
        Ok(())
    }

    fn scan_bridge(
        &mut self,
        tree: &mut PciTree,
        bus: BusId,
        bridge: DeviceId,
        max: u8,
        pass: u32,
    ) -> Result<u8, PciError> {
        let number = tree.bus(bus).number();
        let device = tree.device(bridge);
        let devfn = device.devfn();
        let cardbus = device.is_cardbus();
        let err = |err| access_error(number, devfn, err);

        // Rescan of a bridge that already has its bus.
        if let Some(child) = device.subordinate() {
            if pass == 1 {
                return Ok(max);
            }
            let cmax = if cardbus {
                number
            } else {
                self.scan_bus(tree, child)
            };
            return Ok(max.max(cmax).max(tree.bus(child).subordinate()));
        }

        let buses = self.cfg.read32(number, devfn, BUS_NUMBERS).map_err(err)?;
        let [primary, secondary, subordinate, _] = buses.to_le_bytes();
        let configured = secondary != 0 || subordinate != 0;
        let broken = pass == 0
            && configured
            && (primary != number
                || secondary <= number
                || secondary > subordinate
                || range_claimed(tree, bus, secondary, subordinate));

        if configured && !broken && !cardbus {
            // Configured by firmware: note it in the first pass.
            if pass == 1 {
                return Ok(max);
            }
            tracing::debug!(
                bus = number,
                %devfn,
                secondary,
                subordinate,
                "reusing bridge bus numbers"
            );
            let child = tree.add_bus(bus, bridge, secondary, subordinate);
            self.setup_child_bus(tree, child, bridge);
            let cmax = self.scan_bus(tree, child);
            if cmax > subordinate {
                tracing::warn!(
                    bus = number,
                    %devfn,
                    subordinate,
                    cmax,
                    "bridge subordinate below highest bus behind it"
                );
            }
            return Ok(max.max(cmax).max(tree.bus(child).subordinate()));
        }

        if pass == 0 {
            if broken || cardbus {
                if broken {
                    let err = PciError::MalformedBridge {
                        bus: number,
                        devfn,
                        primary,
                        secondary,
                        subordinate,
                    };
                    tracing::warn!(error = &err as &dyn std::error::Error, "renumbering bridge");
                }
                // Stop forwarding until the second pass renumbers it.
                self.cfg
                    .write32(number, devfn, BUS_NUMBERS, buses & 0xFF00_0000)
                    .map_err(err)?;
            }
            return Ok(max);
        }

        let Some(next) = next_free_bus(tree, bus, max) else {
            return Err(PciError::BusNumbersExhausted { bus: number, devfn });
        };
        let child = tree.add_bus(bus, bridge, next, u8::MAX);
        let value = (buses & 0xFF00_0000)
            | number as u32
            | (next as u32) << 8
            | (u8::MAX as u32) << 16;
        self.cfg
            .write32(number, devfn, BUS_NUMBERS, value)
            .map_err(err)?;
        self.extend_ancestors(tree, bus, next)?;
        self.setup_child_bus(tree, child, bridge);

        let max = if cardbus {
            let reserve = (1..=CARDBUS_RESERVE_BUSNR)
                .take_while(|&i| {
                    next.checked_add(i)
                        .is_some_and(|n| !number_claimed(tree, child, n))
                })
                .last()
                .unwrap_or(0);
            next + reserve
        } else {
            self.scan_bus(tree, child)
        };

        tree.bus_mut(child).subordinate = max;
        self.cfg
            .write8(number, devfn, bridge::SUBORDINATE_BUS, max)
            .map_err(err)?;
        self.extend_ancestors(tree, bus, max)?;
        tracing::debug!(
            bus = number,
            %devfn,
            secondary = next,
            subordinate = max,
            "numbered bridge"
        );
        Ok(max)
    }

    fn setup_child_bus(&mut self, tree: &mut PciTree, child: BusId, bridge: DeviceId) {
        let device = tree.device(bridge);
        let support = device
            .bridge
            .as_ref()
            .map(|b| b.support)
            .unwrap_or_default();
        let subtractive = device.bridge.as_ref().is_some_and(|b| b.subtractive);
        let hotplug = device.pcie.is_some_and(|p| p.slot_hotplug);
        let parent = tree.device(bridge).bus();
        let inherited: Vec<ResourceRef> = if subtractive {
            let p = tree.bus(parent);
            (0..p.windows().len())
                .map(|index| ResourceRef::Window { bus: parent, index })
                .chain(p.inherited_windows().iter().copied())
                .collect()
        } else {
            Vec::new()
        };

        let b = tree.bus_mut(child);
        b.support = support;
        b.hotplug = hotplug;
        b.inherited = inherited;
        self.hooks.bus_added(tree, child);
    }

    /// Makes every bridge above `bus` forward bus numbers up to `max`.
    fn extend_ancestors(
        &mut self,
        tree: &mut PciTree,
        bus: BusId,
        max: u8,
    ) -> Result<(), PciError> {
        for id in tree.ancestors(bus) {
            let Some(bridge) = tree.bus(id).bridge() else {
                continue;
            };
            if tree.bus(id).subordinate() >= max {
                continue;
            }
            let bdf = tree.device(bridge).bdf;
            tracing::debug!(%bdf, subordinate = max, "extending bridge subordinate bus");
            self.cfg
                .write8(bdf.bus, bdf.devfn, bridge::SUBORDINATE_BUS, max)
                .map_err(|err| access_error(bdf.bus, bdf.devfn, err))?;
            tree.bus_mut(id).subordinate = max;
        }
        Ok(())
    }
}

/// Returns true if `n` is in use by a bus other than `bus` and its
/// ancestors, whose ranges necessarily contain it.
fn number_claimed(tree: &PciTree, bus: BusId, n: u8) -> bool {
    let ancestors = tree.ancestors(bus);
    let mut claimed = false;
    tree.for_each_bus(|id, b| {
        claimed |= if ancestors.contains(&id) {
            b.number() == n
        } else {
            (b.number()..=b.subordinate()).contains(&n)
        };
    });
    claimed
}

fn range_claimed(tree: &PciTree, bus: BusId, secondary: u8, subordinate: u8) -> bool {
    (secondary..=subordinate).any(|n| number_claimed(tree, bus, n))
}

fn next_free_bus(tree: &PciTree, bus: BusId, max: u8) -> Option<u8> {
    (max.checked_add(1)?..=u8::MAX).find(|&n| !number_claimed(tree, bus, n))
}

/// Pads the memory BARs of a device to `align`.
fn realign(device: &mut Device, align: u64) {
    for index in 0..=ROM_RESOURCE {
        let res = &mut device.resources[index];
        if !res.flags.mem() || res.size() >= align {
            continue;
        }
        res.end = align - 1;
        res.align = align;
        device.firmware[index] = 0;
        device.realigned = true;
    }
    if device.realigned {
        tracing::debug!(bdf = %device.bdf, align, "realigned memory bars");
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resource assignment.
//!
//! Firmware assignments are claimed first. Each pass then places the
//! remaining resources of a bus, largest alignment first, programs the
//! bridges below it and recurses, so parents are always placed before their
//! children.

use crate::Enumerator;
use crate::bar;
use crate::error::PciError;
use crate::hooks::QuirkPhase;
use crate::resource::Resource;
use crate::resource::ResourceClass;
use crate::resource::ResourceSnapshot;
use crate::size::route;
use crate::size::window_limit;
use crate::tree::BAR_COUNT;
use crate::tree::BRIDGE_WINDOW_COUNT;
use crate::tree::BusId;
use crate::tree::DEVICE_RESOURCE_COUNT;
use crate::tree::DeviceId;
use crate::tree::PciTree;
use crate::tree::ROM_RESOURCE;
use crate::tree::ResourceRef;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::BridgeControl;
use pci_core::spec::cfg_space::bridge;
use pci_core::spec::cfg_space::bridge::IO_WINDOW_GRANULARITY;
use pci_core::spec::cfg_space::bridge::MEMORY_WINDOW_GRANULARITY;
use std::cmp::Reverse;
use std::ops::RangeInclusive;

/// A resource that could not be placed in an assignment pass.
#[derive(Debug, Clone)]
pub(crate) struct FailedResource {
    pub resource: ResourceRef,
    /// The bus the resource was allocated on.
    pub bus: BusId,
    /// The window class it was routed to on that bus.
    pub class: Option<ResourceClass>,
    pub snapshot: ResourceSnapshot,
}

/// Unassigned resources on `bus`: device resources in device and index
/// order, then the windows of the child buses.
fn pending_resources(tree: &PciTree, bus: BusId) -> Vec<ResourceRef> {
    let b = tree.bus(bus);
    let bars = b.devices().iter().flat_map(|&device| {
        (0..DEVICE_RESOURCE_COUNT).map(move |index| ResourceRef::Bar { device, index })
    });
    let windows = b.children().iter().flat_map(|&child| {
        (0..BRIDGE_WINDOW_COUNT).map(move |index| ResourceRef::Window { bus: child, index })
    });
    bars.chain(windows)
        .filter(|&r| {
            tree.resource(r)
                .is_some_and(|res| !res.is_empty() && !res.is_assigned())
        })
        .collect()
}

impl Enumerator<'_> {
    /// Inserts the addresses firmware left in bridge windows and BARs into
    /// the resource tree. Conflicting or uncontained ranges are left
    /// unassigned for the allocator.
    pub(crate) fn claim_firmware(&mut self, tree: &mut PciTree) {
        if !self.policy.claim_firmware {
            return;
        }
        let mut buses = Vec::new();
        tree.for_each_bus(|id, _| buses.push(id));
        for bus in buses {
            self.claim_bridge_windows(tree, bus);
            let devices = tree.bus(bus).devices().to_vec();
            for device in devices {
                for index in 0..DEVICE_RESOURCE_COUNT {
                    self.claim_bar(tree, bus, device, index);
                }
            }
        }
    }

    fn claim_bridge_windows(&mut self, tree: &mut PciTree, bus: BusId) {
        let b = tree.bus(bus);
        let (Some(parent), Some(bridge)) = (b.parent(), b.bridge()) else {
            return;
        };
        let device = tree.device(bridge);
        let bdf = device.bdf;
        let Some(info) = device.bridge.clone() else {
            return;
        };

        for class in ResourceClass::ALL {
            let index = class.window_index();
            let Some(range) = info.firmware_windows[index].clone() else {
                continue;
            };
            if !class.supported(info.support) || tree.bus(bus).windows()[index].is_assigned() {
                continue;
            }
            let granularity = match class {
                ResourceClass::Io => IO_WINDOW_GRANULARITY,
                ResourceClass::Memory | ResourceClass::Prefetchable => MEMORY_WINDOW_GRANULARITY,
            };
            let flags = class.window_flags(info.support).with_start_align(true);
            let limit = window_limit(self.policy, info.support, class, flags.mem_64());
            let size = range.end() - range.start() + 1;
            tree.bus_mut(bus).windows[index] =
                Resource::unassigned(size, granularity, flags, limit);

            let r = ResourceRef::Window { bus, index };
            if claim_at(tree, parent, r, *range.start()) {
                tracing::debug!(
                    %bdf,
                    ?class,
                    start = range.start(),
                    end = range.end(),
                    "claimed firmware bridge window"
                );
            } else {
                tracing::warn!(
                    %bdf,
                    ?class,
                    start = range.start(),
                    end = range.end(),
                    "firmware bridge window conflicts, reassigning"
                );
            }
        }
    }

    fn claim_bar(&mut self, tree: &mut PciTree, bus: BusId, device: DeviceId, index: usize) {
        let d = tree.device(device);
        let firmware = d.firmware[index];
        let bdf = d.bdf;
        let res = &d.resources[index];
        if firmware == 0 || res.is_empty() || res.is_assigned() {
            return;
        }
        let r = ResourceRef::Bar { device, index };
        if claim_at(tree, bus, r, firmware) {
            tracing::debug!(%bdf, index, address = firmware, "claimed firmware bar");
        } else {
            tracing::warn!(%bdf, index, address = firmware, "firmware bar conflicts, reassigning");
        }
    }

    /// Places every unassigned resource on `bus` and below. Resources that
    /// do not fit are reset to empty and recorded in `failed`, except that
    /// optional resources are skipped on passes without growth and stay
    /// unassigned for a later growth pass.
    pub(crate) fn assign_bus(
        &mut self,
        tree: &mut PciTree,
        bus: BusId,
        growth: bool,
        failed: &mut Vec<FailedResource>,
    ) {
        let mut pending = pending_resources(tree, bus);
        pending.sort_by_key(|&r| Reverse(tree.resource(r).map_or(0, |res| res.align)));
        for r in pending {
            self.assign_resource(tree, bus, r, growth, failed);
        }

        let children = tree.bus(bus).children().to_vec();
        for child in children {
            self.program_bridge(tree, child);
            self.assign_bus(tree, child, growth, failed);
        }
    }

    fn assign_resource(
        &mut self,
        tree: &mut PciTree,
        bus: BusId,
        r: ResourceRef,
        growth: bool,
        failed: &mut Vec<FailedResource>,
    ) {
        let Some(res) = tree.resource(r) else {
            return;
        };
        let size = res.size();
        let align = res.align.max(1);
        let limit = res.limit;
        let flags = res.flags;
        let optional = res.optional;
        let class = route(tree, bus, res);
        let snapshot = res.snapshot();
        let min_base = if flags.io() {
            self.policy.min_io_base
        } else {
            self.policy.min_mem_base
        };

        let mut result = Err(PciError::NoFit {
            resource: r,
            size,
            align,
        });
        for window in tree.candidate_windows(bus, flags) {
            result = tree.allocate(window, r, size, align, min_base, limit);
            if result.is_ok() {
                break;
            }
        }

        match result {
            Ok(range) => {
                tracing::debug!(
                    resource = ?r,
                    start = range.start(),
                    end = range.end(),
                    "assigned resource"
                );
                if let ResourceRef::Bar { device, index } = r {
                    self.program_resource(tree, device, index);
                }
            }
            Err(err) => {
                if optional && !growth {
                    // Left unassigned with its size so a growth pass can
                    // still place it.
                    tracing::debug!(resource = ?r, size, "skipping optional resource");
                    return;
                }
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "failed to assign resource"
                );
                failed.push(FailedResource {
                    resource: r,
                    bus,
                    class,
                    snapshot,
                });
                if let Some(res) = tree.resource_mut(r) {
                    res.reset();
                }
            }
        }
    }

    /// Writes an assigned BAR or ROM address to the device.
    fn program_resource(&mut self, tree: &PciTree, device: DeviceId, index: usize) {
        let r = ResourceRef::Bar { device, index };
        let Some(res) = tree.resource(r) else {
            return;
        };
        let d = tree.device(device);
        let address = res.start - tree.bus_offset(r);
        let offset = bar::resource_register(d.header, index);
        let result = if index == ROM_RESOURCE {
            bar::program_rom(&mut *self.cfg, d.bdf, offset, address)
        } else {
            bar::program_bar(&mut *self.cfg, d.bdf, offset, address)
        };
        if let Err(err) = result {
            tracing::warn!(
                bdf = %d.bdf,
                offset,
                error = &err as &dyn std::error::Error,
                "failed to program bar"
            );
        }
    }

    /// Programs the windows of the bridge leading to `bus` from the tree.
    /// Unassigned windows are closed.
    pub(crate) fn program_bridge(&mut self, tree: &PciTree, bus: BusId) {
        let Some(bridge) = tree.bus(bus).bridge() else {
            return;
        };
        let device = tree.device(bridge);
        let Some(info) = &device.bridge else {
            return;
        };
        let bdf = device.bdf;
        // The bridge's own BARs are placed before anything behind it.
        let unplaced = device.resources[..BAR_COUNT]
            .iter()
            .any(|res| !res.is_empty() && !res.is_assigned());
        if unplaced {
            tracing::debug!(%bdf, "bridge bars not placed, leaving windows alone");
            return;
        }

        let mut windows: [Option<RangeInclusive<u64>>; BRIDGE_WINDOW_COUNT] = Default::default();
        for (index, window) in windows.iter_mut().enumerate() {
            let r = ResourceRef::Window { bus, index };
            if let Some(res) = tree.resource(r).filter(|res| res.is_assigned()) {
                let offset = tree.bus_offset(r);
                *window = Some(res.start - offset..=res.end - offset);
            }
        }
        tracing::debug!(%bdf, ?windows, "programming bridge windows");
        if let Err(err) = bar::program_bridge_windows(&mut *self.cfg, bdf, info.support, &windows) {
            tracing::warn!(
                %bdf,
                error = &err as &dyn std::error::Error,
                "failed to program bridge windows"
            );
            return;
        }

        if !self.policy.enable_bridges || windows.iter().all(Option::is_none) {
            return;
        }
        let result = self
            .cfg
            .read16(bdf.bus, bdf.devfn, cfg_space::COMMAND)
            .and_then(|command| {
                let mut command = cfg_space::Command::from_bits(command);
                if windows[crate::tree::IO_WINDOW].is_some() {
                    command.set_pio_enabled(true);
                }
                if windows[crate::tree::MEMORY_WINDOW].is_some()
                    || windows[crate::tree::PREFETCH_WINDOW].is_some()
                {
                    command.set_mmio_enabled(true);
                }
                command.set_bus_master(true);
                self.cfg
                    .write16(bdf.bus, bdf.devfn, cfg_space::COMMAND, command.into_bits())
            });
        if let Err(err) = result {
            tracing::warn!(
                %bdf,
                error = &err as &dyn std::error::Error,
                "failed to enable bridge"
            );
        }
    }

    /// Sets VGA forwarding on every bridge above the first VGA device.
    fn route_vga(&mut self, tree: &PciTree) {
        let mut vga = None;
        tree.for_each_device(|id, device| {
            if vga.is_none() && device.is_vga() {
                vga = Some(id);
            }
        });
        let Some(vga) = vga else {
            return;
        };
        for bus in tree.ancestors(tree.device(vga).bus()) {
            let Some(bridge) = tree.bus(bus).bridge() else {
                continue;
            };
            let bdf = tree.device(bridge).bdf;
            let result = self
                .cfg
                .read16(bdf.bus, bdf.devfn, bridge::BRIDGE_CONTROL)
                .and_then(|control| {
                    let control = BridgeControl::from_bits(control).with_vga_enable(true);
                    self.cfg
                        .write16(bdf.bus, bdf.devfn, bridge::BRIDGE_CONTROL, control.into_bits())
                });
            match result {
                Ok(()) => tracing::debug!(%bdf, "routing vga"),
                Err(err) => tracing::warn!(
                    %bdf,
                    error = &err as &dyn std::error::Error,
                    "failed to route vga"
                ),
            }
        }
    }

    /// Runs the after-assign quirks and reports `devices` as assigned.
    pub(crate) fn finish(&mut self, tree: &mut PciTree, devices: &[DeviceId]) {
        if self.policy.route_vga {
            self.route_vga(tree);
        }
        for &id in devices {
            if tree.get_device(id).is_none() {
                continue;
            }
            self.hooks
                .run_quirks(QuirkPhase::AfterAssign, &mut *self.cfg, tree.device_mut(id));
            self.hooks.resources_assigned(tree, id);
        }
    }
}

/// Claims `r` at bus address `address` in the first window of `bus` that
/// holds it. The resource is left unassigned if none does.
fn claim_at(tree: &mut PciTree, bus: BusId, r: ResourceRef, address: u64) -> bool {
    let Some(res) = tree.resource(r) else {
        return false;
    };
    let (size, flags) = (res.size(), res.flags);
    for window in tree.candidate_windows(bus, flags) {
        let Some(start) = address.checked_add(tree.bus_offset(window)) else {
            continue;
        };
        let Some(end) = start.checked_add(size - 1) else {
            continue;
        };
        if let Some(res) = tree.resource_mut(r) {
            res.start = start;
            res.end = end;
        }
        if tree.claim(window, r) {
            return true;
        }
    }
    if let Some(res) = tree.resource_mut(r) {
        res.unassign();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AllocationPolicy;
    use crate::tree::HostBridgeWindow;
    use crate::tree::MEMORY_WINDOW;
    use crate::tree::PlatformResourcePool;
    use crate::tree::WindowKind;
    use pci_core::DevFn;
    use pci_sim::BarKind;
    use pci_sim::SimBridge;
    use pci_sim::SimFunction;
    use pci_sim::SimRootComplex;
    use pci_sim::test_helpers::bridge_ids;
    use pci_sim::test_helpers::endpoint_ids;
    use pci_sim::test_helpers::vga_ids;

    fn pool() -> PlatformResourcePool {
        PlatformResourcePool {
            root_bus: 0,
            windows: vec![
                HostBridgeWindow {
                    kind: WindowKind::Io,
                    range: 0x1000..=0xffff,
                    bus_to_cpu: 0,
                },
                HostBridgeWindow {
                    kind: WindowKind::Memory,
                    range: 0xc000_0000..=0xcfff_ffff,
                    bus_to_cpu: 0,
                },
            ],
        }
    }

    fn mem(size: u32) -> BarKind {
        BarKind::Memory32 {
            size,
            prefetchable: false,
        }
    }

    /// Scans, claims and runs a single sizing and assignment pass.
    fn one_pass(
        root: &mut SimRootComplex,
        policy: &AllocationPolicy,
        pool: &PlatformResourcePool,
    ) -> (PciTree, Vec<FailedResource>) {
        let mut tree = PciTree::new(pool);
        let mut e = Enumerator::new(root, policy);
        let top = tree.root();
        e.scan_bus(&mut tree, top);
        e.claim_firmware(&mut tree);
        e.size_bridges(&mut tree, top, false);
        let mut failed = Vec::new();
        e.assign_bus(&mut tree, top, false, &mut failed);
        (tree, failed)
    }

    #[test]
    fn largest_alignment_first() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(0, mem(0x1000))
            .unwrap()
            .with_bar(1, mem(0x10_0000))
            .unwrap()
            .with_bar(2, BarKind::Io { size: 0x100 })
            .unwrap();
        let mut root = SimRootComplex::new(0).with_device(DevFn::new(0, 0), f).unwrap();
        let (tree, failed) = one_pass(&mut root, &AllocationPolicy::default(), &pool());
        assert!(failed.is_empty());

        let id = tree.find_device_at(pci_core::Bdf::new(0, DevFn::new(0, 0))).unwrap();
        assert_eq!(tree.resource_at(id, 1).unwrap().start, 0xc000_0000);
        assert_eq!(tree.resource_at(id, 0).unwrap().start, 0xc010_0000);
        assert_eq!(tree.resource_at(id, 2).unwrap().start, 0x1000);

        let f = root.function(&[DevFn::new(0, 0)]).unwrap();
        assert_eq!(f.bar_address(0), 0xc010_0000);
        assert_eq!(f.bar_address(1), 0xc000_0000);
        assert_eq!(f.bar_address(2), 0x1000);
    }

    #[test]
    fn firmware_bars_are_kept() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(0, mem(0x1000))
            .unwrap()
            .with_firmware_bar(0, 0xc080_0000);
        let g = SimFunction::new(endpoint_ids(2))
            .with_bar(0, mem(0x1000))
            .unwrap()
            // Collides with the first device.
            .with_firmware_bar(0, 0xc080_0000);
        let mut root = SimRootComplex::new(0)
            .with_device(DevFn::new(0, 0), f)
            .unwrap()
            .with_device(DevFn::new(1, 0), g)
            .unwrap();
        let (tree, failed) = one_pass(&mut root, &AllocationPolicy::default(), &pool());
        assert!(failed.is_empty());
        let first = tree.find_device(tree.root(), DevFn::new(0, 0)).unwrap();
        let second = tree.find_device(tree.root(), DevFn::new(1, 0)).unwrap();
        assert_eq!(tree.resource_at(first, 0).unwrap().start, 0xc080_0000);
        assert_eq!(tree.resource_at(second, 0).unwrap().start, 0xc000_0000);
        assert_eq!(
            root.function(&[DevFn::new(1, 0)]).unwrap().bar_address(0),
            0xc000_0000
        );
    }

    #[test]
    fn claim_disabled_reassigns() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(0, mem(0x1000))
            .unwrap()
            .with_firmware_bar(0, 0xc080_0000);
        let mut root = SimRootComplex::new(0).with_device(DevFn::new(0, 0), f).unwrap();
        let policy = AllocationPolicy::default().with_claim_firmware(false);
        let (tree, _) = one_pass(&mut root, &policy, &pool());
        let id = tree.find_device(tree.root(), DevFn::new(0, 0)).unwrap();
        assert_eq!(tree.resource_at(id, 0).unwrap().start, 0xc000_0000);
    }

    #[test]
    fn optional_rom_skipped_without_growth() {
        // Equal alignment: the BAR comes first and takes the whole window.
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(0, mem(0x1_0000))
            .unwrap()
            .with_rom(0x1_0000)
            .unwrap();
        let mut root = SimRootComplex::new(0).with_device(DevFn::new(0, 0), f).unwrap();
        let pool = PlatformResourcePool {
            root_bus: 0,
            windows: vec![HostBridgeWindow {
                kind: WindowKind::Memory,
                range: 0xc000_0000..=0xc000_ffff,
                bus_to_cpu: 0,
            }],
        };
        let (tree, failed) = one_pass(&mut root, &AllocationPolicy::default(), &pool);
        assert!(failed.is_empty());
        let id = tree.find_device(tree.root(), DevFn::new(0, 0)).unwrap();
        assert!(tree.resource_at(id, 0).unwrap().is_assigned());
        // Still sized for a growth pass.
        let rom = tree.resource_at(id, ROM_RESOURCE).unwrap();
        assert!(!rom.is_assigned());
        assert_eq!(rom.size(), 0x1_0000);
        assert!(rom.optional);
    }

    #[test]
    fn failure_records_snapshot() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(0, mem(0x2_0000))
            .unwrap();
        let mut root = SimRootComplex::new(0).with_device(DevFn::new(0, 0), f).unwrap();
        let pool = PlatformResourcePool {
            root_bus: 0,
            windows: vec![HostBridgeWindow {
                kind: WindowKind::Memory,
                range: 0xc000_0000..=0xc000_ffff,
                bus_to_cpu: 0,
            }],
        };
        let (tree, failed) = one_pass(&mut root, &AllocationPolicy::default(), &pool);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].class, Some(ResourceClass::Memory));
        assert_eq!(failed[0].snapshot.end, 0x1_ffff);
        assert!(tree.resource(failed[0].resource).unwrap().is_empty());
    }

    #[test]
    fn bus_offset_applied_to_registers() {
        let f = SimFunction::new(endpoint_ids(1))
            .with_bar(0, mem(0x1000))
            .unwrap();
        let bridge = SimBridge::new(bridge_ids())
            .with_device(DevFn::new(0, 0), f)
            .unwrap();
        let mut root = SimRootComplex::new(0)
            .with_device(DevFn::new(1, 0), bridge)
            .unwrap();
        let pool = PlatformResourcePool {
            root_bus: 0,
            windows: vec![HostBridgeWindow {
                kind: WindowKind::Memory,
                range: 0x1_c000_0000..=0x1_cfff_ffff,
                bus_to_cpu: 0x1_0000_0000,
            }],
        };
        let (tree, failed) = one_pass(&mut root, &AllocationPolicy::default(), &pool);
        assert!(failed.is_empty());
        let bus = tree.find_bus(1).unwrap();
        assert_eq!(tree.bus(bus).windows()[MEMORY_WINDOW].start, 0x1_c000_0000);

        let bridge = root.bridge(&[DevFn::new(1, 0)]).unwrap();
        assert_eq!(bridge.memory_window(), Some(0xc000_0000..=0xc00f_ffff));
        assert!(bridge.command().mmio_enabled());
        assert!(bridge.command().bus_master());
        assert!(!bridge.command().pio_enabled());
        assert_eq!(
            root.function(&[DevFn::new(1, 0), DevFn::new(0, 0)])
                .unwrap()
                .bar_address(0),
            0xc000_0000
        );
    }

    #[test]
    fn bridge_windows_wait_for_bridge_bars() {
        let bridge = SimBridge::new(bridge_ids())
            .with_bar(0, mem(0x1000))
            .unwrap()
            .with_device(
                DevFn::new(0, 0),
                SimFunction::new(endpoint_ids(1))
                    .with_bar(0, mem(0x1000))
                    .unwrap(),
            )
            .unwrap();
        let mut root = SimRootComplex::new(0)
            .with_device(DevFn::new(1, 0), bridge)
            .unwrap();
        let policy = AllocationPolicy::default();
        let mut tree = PciTree::new(&pool());
        let top = tree.root();
        let host = ResourceRef::Window {
            bus: top,
            index: BRIDGE_WINDOW_COUNT + 1,
        };
        let mut e = Enumerator::new(&mut root, &policy);
        e.scan_bus(&mut tree, top);
        e.size_bridges(&mut tree, top, false);

        let bus = tree.find_bus(1).unwrap();
        let window = ResourceRef::Window {
            bus,
            index: MEMORY_WINDOW,
        };
        let (size, align) = {
            let res = tree.resource(window).unwrap();
            (res.size(), res.align)
        };
        let range = tree.allocate(host, window, size, align, 0, !0).unwrap();
        e.program_bridge(&tree, bus);
        drop(e);
        let programmed = root.bridge(&[DevFn::new(1, 0)]).unwrap().memory_window();
        assert_ne!(programmed, Some(range.clone()));

        let bridge = tree.bus(bus).bridge().unwrap();
        let bar = ResourceRef::Bar {
            device: bridge,
            index: 0,
        };
        tree.allocate(host, bar, 0x1000, 0x1000, 0, !0).unwrap();
        Enumerator::new(&mut root, &policy).program_bridge(&tree, bus);
        let programmed = root.bridge(&[DevFn::new(1, 0)]).unwrap().memory_window();
        assert_eq!(programmed, Some(range));
    }

    #[test]
    fn vga_routed_through_bridges() {
        let vga = SimFunction::new(vga_ids()).with_bar(0, mem(0x1000)).unwrap();
        let lower = SimBridge::new(bridge_ids())
            .with_device(DevFn::new(0, 0), vga)
            .unwrap();
        let upper = SimBridge::new(bridge_ids())
            .with_device(DevFn::new(0, 0), lower)
            .unwrap();
        let other = SimBridge::new(bridge_ids());
        let mut root = SimRootComplex::new(0)
            .with_device(DevFn::new(1, 0), upper)
            .unwrap()
            .with_device(DevFn::new(2, 0), other)
            .unwrap();
        let policy = AllocationPolicy::default();
        let (mut tree, _) = one_pass(&mut root, &policy, &pool());
        let mut e = Enumerator::new(&mut root, &policy);
        let ids = tree.device_ids();
        e.finish(&mut tree, &ids);
        drop(e);

        let upper = DevFn::new(1, 0);
        let lower = DevFn::new(0, 0);
        assert!(root.bridge(&[upper]).unwrap().bridge_control().vga_enable());
        assert!(root.bridge(&[upper, lower]).unwrap().bridge_control().vga_enable());
        assert!(!root.bridge(&[DevFn::new(2, 0)]).unwrap().bridge_control().vga_enable());
    }
}

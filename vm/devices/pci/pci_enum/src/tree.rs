// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The bus/device hierarchy and the resource tree built on top of it.
//!
//! Buses and devices live in arenas and refer to each other by index. The
//! back edges (device to bus, bus to bridge device, bus to parent bus) are
//! plain index lookups and never own anything.

use crate::error::PciError;
use crate::resource::Allocation;
use crate::resource::Resource;
use crate::resource::ResourceClass;
use crate::resource::ResourceFlags;
use crate::resource::align_up;
use pci_core::Bdf;
use pci_core::DevFn;
use pci_core::PciInterruptPin;
use pci_core::spec::caps::pci_express::DevicePortType;
use pci_core::spec::cfg_space::HeaderLayout;
use pci_core::spec::hwid::ClassCode;
use pci_core::spec::hwid::HardwareIds;
use pci_core::spec::hwid::Subclass;
use slab::Slab;
use std::ops::RangeInclusive;

/// Window index of the I/O window on a bus.
pub const IO_WINDOW: usize = 0;
/// Window index of the non-prefetchable memory window on a bus.
pub const MEMORY_WINDOW: usize = 1;
/// Window index of the prefetchable memory window on a bus.
pub const PREFETCH_WINDOW: usize = 2;
/// Number of bridge windows. Host bridge apertures follow them on the root
/// bus.
pub const BRIDGE_WINDOW_COUNT: usize = 3;

/// Number of BAR resource slots on a device.
pub const BAR_COUNT: usize = 6;
/// Resource index of the expansion ROM.
pub const ROM_RESOURCE: usize = 6;
/// Number of resource slots on a device.
pub const DEVICE_RESOURCE_COUNT: usize = 7;

/// Stable index of a bus in a [`PciTree`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(usize);

/// Stable index of a device in a [`PciTree`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(usize);

/// Identifies a [`Resource`] in a [`PciTree`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// A BAR (0..6) or the expansion ROM (6) of a device.
    Bar {
        /// The owning device.
        device: DeviceId,
        /// The resource slot.
        index: usize,
    },
    /// A window of a bus: the bridge windows (0..3) or a host bridge
    /// aperture (3..).
    Window {
        /// The bus the window forwards to.
        bus: BusId,
        /// The window slot.
        index: usize,
    },
}

/// The kind of a host bridge aperture.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WindowKind {
    /// I/O ports.
    Io,
    /// Memory.
    Memory,
    /// Prefetchable memory.
    Prefetchable,
}

/// One aperture of the host bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBridgeWindow {
    /// The kind of address space.
    pub kind: WindowKind,
    /// The CPU address range.
    pub range: RangeInclusive<u64>,
    /// Offset added to a bus address to form the CPU address.
    pub bus_to_cpu: u64,
}

/// The platform resources available to the root bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformResourcePool {
    /// Bus number of the root bus.
    pub root_bus: u8,
    /// Host bridge apertures.
    pub windows: Vec<HostBridgeWindow>,
}

/// Window decoding implemented by a bridge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct WindowSupport {
    /// The bridge has an I/O window.
    pub io: bool,
    /// The I/O window decodes 32-bit addresses.
    pub io_32: bool,
    /// The bridge has a memory window.
    pub memory: bool,
    /// The bridge has a prefetchable window.
    pub prefetch: bool,
    /// The prefetchable window decodes 64-bit addresses.
    pub prefetch_64: bool,
}

/// Bridge-specific state probed at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeInfo {
    /// Windows the bridge implements.
    pub support: WindowSupport,
    /// The I/O, memory and prefetchable windows firmware left programmed,
    /// as bus addresses.
    pub firmware_windows: [Option<RangeInclusive<u64>>; BRIDGE_WINDOW_COUNT],
    /// The bridge forwards unclaimed cycles (subtractive decode).
    pub subtractive: bool,
}

/// PCI Express capability fields relevant to enumeration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PcieInfo {
    /// Capability offset.
    pub offset: u8,
    /// Device/port type.
    pub port_type: DevicePortType,
    /// The port's slot is hot-plug capable.
    pub slot_hotplug: bool,
    /// The port supports ARI forwarding.
    pub ari_forwarding: bool,
}

/// One PCI function.
#[derive(Debug, Clone)]
pub struct Device {
    pub(crate) bus: BusId,
    pub(crate) subordinate: Option<BusId>,
    /// The function's address.
    pub bdf: Bdf,
    /// Vendor, device and class IDs.
    pub ids: HardwareIds,
    /// Configuration header layout.
    pub header: HeaderLayout,
    /// The multi-function bit was set, or a function other than 0 exists.
    pub multi_function: bool,
    /// BARs 0..6 and the expansion ROM.
    pub resources: [Resource; DEVICE_RESOURCE_COUNT],
    /// Bus addresses firmware left in each BAR.
    pub firmware: [u64; DEVICE_RESOURCE_COUNT],
    /// Head of the classic capability list.
    pub capability_pointer: Option<u8>,
    /// Power management capability offset.
    pub pm_capability: Option<u8>,
    /// PCI Express capability.
    pub pcie: Option<PcieInfo>,
    /// ARI extended capability offset.
    pub ari_capability: Option<u16>,
    /// Interrupt pin.
    pub interrupt_pin: Option<PciInterruptPin>,
    /// Interrupt line, as left by firmware.
    pub interrupt_line: u8,
    /// Bridge windows, for type 1 headers.
    pub bridge: Option<BridgeInfo>,
    /// The BARs have been realigned by an alignment override.
    pub realigned: bool,
}

impl Device {
    pub(crate) fn new(bus: BusId, bdf: Bdf, ids: HardwareIds, header: HeaderLayout) -> Self {
        Self {
            bus,
            subordinate: None,
            bdf,
            ids,
            header,
            multi_function: false,
            resources: Default::default(),
            firmware: [0; DEVICE_RESOURCE_COUNT],
            capability_pointer: None,
            pm_capability: None,
            pcie: None,
            ari_capability: None,
            interrupt_pin: None,
            interrupt_line: 0,
            bridge: None,
            realigned: false,
        }
    }

    /// The bus the device sits on.
    pub fn bus(&self) -> BusId {
        self.bus
    }

    /// The bus behind this bridge, if any.
    pub fn subordinate(&self) -> Option<BusId> {
        self.subordinate
    }

    /// Device/function number.
    pub fn devfn(&self) -> DevFn {
        self.bdf.devfn
    }

    /// Returns true for PCI-to-PCI bridges.
    pub fn is_bridge(&self) -> bool {
        self.header == HeaderLayout::BRIDGE
    }

    /// Returns true for CardBus bridges.
    pub fn is_cardbus(&self) -> bool {
        self.header == HeaderLayout::CARDBUS
    }

    /// Returns true for VGA compatible display controllers.
    pub fn is_vga(&self) -> bool {
        self.ids.base_class == ClassCode::DISPLAY_CONTROLLER
            && self.ids.sub_class == Subclass::DISPLAY_CONTROLLER_VGA
    }

    /// Returns true if this is a PCIe root port or switch downstream port.
    pub fn is_downstream_port(&self) -> bool {
        self.pcie.is_some_and(|p| p.port_type.is_downstream_port())
    }
}

/// One bus segment.
#[derive(Debug, Clone)]
pub struct Bus {
    pub(crate) number: u8,
    pub(crate) primary: u8,
    pub(crate) subordinate: u8,
    pub(crate) parent: Option<BusId>,
    pub(crate) bridge: Option<DeviceId>,
    pub(crate) devices: Vec<DeviceId>,
    pub(crate) children: Vec<BusId>,
    pub(crate) windows: Vec<Resource>,
    pub(crate) inherited: Vec<ResourceRef>,
    pub(crate) support: WindowSupport,
    pub(crate) ari_enabled: bool,
    pub(crate) hotplug: bool,
}

impl Bus {
    fn new(number: u8, primary: u8, subordinate: u8) -> Self {
        Self {
            number,
            primary,
            subordinate,
            parent: None,
            bridge: None,
            devices: Vec::new(),
            children: Vec::new(),
            windows: vec![Resource::default(); BRIDGE_WINDOW_COUNT],
            inherited: Vec::new(),
            support: WindowSupport::default(),
            ari_enabled: false,
            hotplug: false,
        }
    }

    /// Bus number (the bridge's secondary bus number).
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Bus number of the upstream side of the bridge.
    pub fn primary(&self) -> u8 {
        self.primary
    }

    /// Highest bus number behind this bus.
    pub fn subordinate(&self) -> u8 {
        self.subordinate
    }

    /// The parent bus.
    pub fn parent(&self) -> Option<BusId> {
        self.parent
    }

    /// The bridge leading to this bus. `None` for the root bus.
    pub fn bridge(&self) -> Option<DeviceId> {
        self.bridge
    }

    /// Devices in scan order.
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Child buses in scan order.
    pub fn children(&self) -> &[BusId] {
        &self.children
    }

    /// Bridge windows followed by host bridge apertures.
    pub fn windows(&self) -> &[Resource] {
        &self.windows
    }

    /// Parent windows usable through a subtractive decode bridge.
    pub fn inherited_windows(&self) -> &[ResourceRef] {
        &self.inherited
    }

    /// Windows the bridge leading to this bus implements.
    pub fn window_support(&self) -> WindowSupport {
        self.support
    }

    /// ARI forwarding is enabled on the bridge leading to this bus.
    pub fn ari_enabled(&self) -> bool {
        self.ari_enabled
    }

    /// The bridge's slot is hot-plug capable.
    pub fn is_hotplug(&self) -> bool {
        self.hotplug
    }

    /// Returns true for the root bus.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// The enumerated hierarchy.
#[derive(Debug, Clone)]
pub struct PciTree {
    buses: Slab<Bus>,
    devices: Slab<Device>,
    root: BusId,
}

impl PciTree {
    /// Creates a tree containing only the root bus, with the pool's host
    /// bridge apertures as its windows.
    pub fn new(pool: &PlatformResourcePool) -> Self {
        let mut buses = Slab::new();
        let mut root = Bus::new(pool.root_bus, pool.root_bus, u8::MAX);
        for window in &pool.windows {
            let flags = match window.kind {
                WindowKind::Io => ResourceFlags::new().with_io(true),
                WindowKind::Memory => ResourceFlags::new().with_mem(true).with_mem_64(true),
                WindowKind::Prefetchable => ResourceFlags::new()
                    .with_mem(true)
                    .with_mem_64(true)
                    .with_prefetch(true),
            };
            root.windows
                .push(Resource::window(window.range.clone(), flags, window.bus_to_cpu));
        }
        let root = BusId(buses.insert(root));
        Self {
            buses,
            devices: Slab::new(),
            root,
        }
    }

    /// The root bus.
    pub fn root(&self) -> BusId {
        self.root
    }

    /// Returns the bus with the given index.
    pub fn bus(&self, id: BusId) -> &Bus {
        &self.buses[id.0]
    }

    pub(crate) fn bus_mut(&mut self, id: BusId) -> &mut Bus {
        &mut self.buses[id.0]
    }

    /// Returns the device with the given index.
    pub fn device(&self, id: DeviceId) -> &Device {
        &self.devices[id.0]
    }

    pub(crate) fn device_mut(&mut self, id: DeviceId) -> &mut Device {
        &mut self.devices[id.0]
    }

    /// Returns the device with the given index, if it still exists.
    pub fn get_device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0)
    }

    /// Number of devices in the tree.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of buses in the tree.
    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub(crate) fn add_bus(
        &mut self,
        parent: BusId,
        bridge: DeviceId,
        number: u8,
        subordinate: u8,
    ) -> BusId {
        let primary = self.bus(parent).number;
        let mut bus = Bus::new(number, primary, subordinate);
        bus.parent = Some(parent);
        bus.bridge = Some(bridge);
        let id = BusId(self.buses.insert(bus));
        self.bus_mut(parent).children.push(id);
        self.device_mut(bridge).subordinate = Some(id);
        id
    }

    pub(crate) fn add_device(&mut self, device: Device) -> DeviceId {
        let bus = device.bus;
        let id = DeviceId(self.devices.insert(device));
        self.bus_mut(bus).devices.push(id);
        id
    }

    /// Finds a bus by number.
    pub fn find_bus(&self, number: u8) -> Option<BusId> {
        self.buses
            .iter()
            .find(|(_, bus)| bus.number == number)
            .map(|(id, _)| BusId(id))
    }

    /// Finds a device on `bus` by devfn.
    pub fn find_device(&self, bus: BusId, devfn: DevFn) -> Option<DeviceId> {
        self.bus(bus)
            .devices
            .iter()
            .copied()
            .find(|&id| self.device(id).devfn() == devfn)
    }

    /// Finds a device by bus number and devfn.
    pub fn find_device_at(&self, bdf: Bdf) -> Option<DeviceId> {
        self.find_device(self.find_bus(bdf.bus)?, bdf.devfn)
    }

    /// The number of bus levels below `bus`.
    pub fn max_depth(&self, bus: BusId) -> u32 {
        self.bus(bus)
            .children
            .iter()
            .map(|&child| self.max_depth(child) + 1)
            .max()
            .unwrap_or(0)
    }

    /// The chain of buses from `bus` up to the root, inclusive.
    pub fn ancestors(&self, bus: BusId) -> Vec<BusId> {
        let mut chain = vec![bus];
        let mut cur = bus;
        while let Some(parent) = self.bus(cur).parent {
            chain.push(parent);
            cur = parent;
        }
        chain
    }

    /// Returns true if `bus` is `ancestor` or below it.
    pub fn is_descendant(&self, bus: BusId, ancestor: BusId) -> bool {
        self.ancestors(bus).contains(&ancestor)
    }

    /// Calls `f` for every bus, depth first in scan order.
    pub fn for_each_bus(&self, mut f: impl FnMut(BusId, &Bus)) {
        self.walk_buses(self.root, &mut f);
    }

    fn walk_buses(&self, bus: BusId, f: &mut impl FnMut(BusId, &Bus)) {
        f(bus, self.bus(bus));
        for &child in &self.bus(bus).children {
            self.walk_buses(child, f);
        }
    }

    /// Calls `f` for every device, depth first in scan order: each bridge is
    /// followed by the devices behind it.
    pub fn for_each_device(&self, mut f: impl FnMut(DeviceId, &Device)) {
        self.walk_devices(self.root, &mut f);
    }

    fn walk_devices(&self, bus: BusId, f: &mut impl FnMut(DeviceId, &Device)) {
        for &id in &self.bus(bus).devices {
            let device = self.device(id);
            f(id, device);
            if let Some(child) = device.subordinate {
                self.walk_devices(child, f);
            }
        }
    }

    /// All device IDs, depth first in scan order.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids = Vec::new();
        self.for_each_device(|id, _| ids.push(id));
        ids
    }

    /// Resource slot `index` of a device (6 is the expansion ROM).
    pub fn resource_at(&self, device: DeviceId, index: usize) -> Option<&Resource> {
        self.devices.get(device.0)?.resources.get(index)
    }

    /// Looks up a resource.
    pub fn resource(&self, r: ResourceRef) -> Option<&Resource> {
        match r {
            ResourceRef::Bar { device, index } => self.resource_at(device, index),
            ResourceRef::Window { bus, index } => self.buses.get(bus.0)?.windows.get(index),
        }
    }

    pub(crate) fn resource_mut(&mut self, r: ResourceRef) -> Option<&mut Resource> {
        match r {
            ResourceRef::Bar { device, index } => {
                self.devices.get_mut(device.0)?.resources.get_mut(index)
            }
            ResourceRef::Window { bus, index } => {
                self.buses.get_mut(bus.0)?.windows.get_mut(index)
            }
        }
    }

    /// The device that decodes a resource: the BAR's owner, or the bridge
    /// leading to a window's bus.
    pub fn resource_owner(&self, r: ResourceRef) -> Option<DeviceId> {
        match r {
            ResourceRef::Bar { device, .. } => Some(device),
            ResourceRef::Window { bus, .. } => self.buses.get(bus.0)?.bridge,
        }
    }

    /// The bus-to-CPU offset that applies to a resource, found on the host
    /// bridge aperture it was (transitively) allocated from.
    pub fn bus_offset(&self, r: ResourceRef) -> u64 {
        let mut cur = r;
        loop {
            let Some(res) = self.resource(cur) else {
                return 0;
            };
            match res.parent {
                Some(parent) => cur = parent,
                None => return res.bus_to_cpu,
            }
        }
    }

    /// Windows of `bus` that resources on the bus may be allocated from,
    /// in preference order for a request with `flags`.
    pub fn candidate_windows(&self, bus: BusId, flags: ResourceFlags) -> Vec<ResourceRef> {
        let b = self.bus(bus);
        let mut all: Vec<ResourceRef> = (0..b.windows.len())
            .map(|index| ResourceRef::Window { bus, index })
            .chain(b.inherited.iter().copied())
            .filter(|&w| self.is_allocatable(w))
            .filter(|&w| self.resource(w).is_some_and(|res| flags.fits_in(res.flags)))
            .collect();
        // Prefetchable requests try prefetchable windows first.
        if flags.prefetch() {
            all.sort_by_key(|&w| !self.resource(w).is_some_and(|res| res.flags.prefetch()));
        }
        all
    }

    /// Returns true if `window` is usable as an allocation parent: a host
    /// aperture, or a non-empty window that has itself been placed.
    pub fn is_allocatable(&self, window: ResourceRef) -> bool {
        let Some(res) = self.resource(window) else {
            return false;
        };
        if res.is_empty() {
            return false;
        }
        match window {
            ResourceRef::Window { bus, index } => {
                res.is_assigned() || (self.bus(bus).is_root() && index >= BRIDGE_WINDOW_COUNT)
            }
            ResourceRef::Bar { .. } => false,
        }
    }

    /// Finds the lowest `size`-byte range aligned to `align` in `parent`
    /// that starts at or above `min_base` (a bus address) and ends at or
    /// below `limit` (a bus address), and allocates it to `child`.
    pub fn allocate(
        &mut self,
        parent: ResourceRef,
        child: ResourceRef,
        size: u64,
        align: u64,
        min_base: u64,
        limit: u64,
    ) -> Result<RangeInclusive<u64>, PciError> {
        let no_fit = PciError::NoFit {
            resource: child,
            size,
            align,
        };
        if size == 0 {
            return Err(no_fit);
        }
        let offset = self.bus_offset(parent);
        let Some(p) = self.resource(parent) else {
            return Err(no_fit);
        };
        let Some(c) = self.resource(child) else {
            return Err(no_fit);
        };
        if !c.flags.fits_in(p.flags) {
            return Err(no_fit);
        }
        // A limit past the end of the CPU address space means no limit.
        let min_cpu = min_base.saturating_add(offset);
        let max_cpu = limit.saturating_add(offset).max(min_cpu);

        let mut gaps = Vec::with_capacity(p.children.len() + 1);
        let mut cursor = Some(p.start);
        for alloc in &p.children {
            if let Some(start) = cursor {
                if alloc.start > start {
                    gaps.push((start, alloc.start - 1));
                }
            }
            cursor = alloc.end.checked_add(1);
        }
        if let Some(start) = cursor {
            if start <= p.end {
                gaps.push((start, p.end));
            }
        }

        let found = gaps.into_iter().find_map(|(gap_start, gap_end)| {
            // Alignment applies to the bus address.
            let bus_start = gap_start.max(min_cpu).checked_sub(offset)?;
            let start = align_up(bus_start, align)?.checked_add(offset)?;
            let end = start.checked_add(size - 1)?;
            (end <= gap_end && end <= max_cpu).then_some(start..=end)
        });
        let range = found.ok_or(no_fit)?;
        self.insert(parent, child, range.clone());
        Ok(range)
    }

    /// Inserts `child` into `parent` at the child's current address, if it is
    /// contained and conflict-free. Returns false otherwise.
    pub fn claim(&mut self, parent: ResourceRef, child: ResourceRef) -> bool {
        let (Some(p), Some(c)) = (self.resource(parent), self.resource(child)) else {
            return false;
        };
        if c.is_assigned() || c.is_empty() || !c.flags.fits_in(p.flags) {
            return false;
        }
        let (start, end) = (c.start, c.end);
        if start < p.start || end > p.end || start > end {
            return false;
        }
        if p
            .children
            .iter()
            .any(|alloc| alloc.start <= end && start <= alloc.end)
        {
            return false;
        }
        self.insert(parent, child, start..=end);
        true
    }

    fn insert(&mut self, parent: ResourceRef, child: ResourceRef, range: RangeInclusive<u64>) {
        let (start, end) = (*range.start(), *range.end());
        if let Some(c) = self.resource_mut(child) {
            c.start = start;
            c.end = end;
            c.parent = Some(parent);
        }
        if let Some(p) = self.resource_mut(parent) {
            let pos = p.children.partition_point(|alloc| alloc.start < start);
            p.children.insert(
                pos,
                Allocation {
                    start,
                    end,
                    resource: child,
                },
            );
        }
    }

    /// Removes `child` from its parent and moves it back to
    /// `[0, size - 1]`. Refused while the child still has children of its
    /// own.
    pub fn release(&mut self, child: ResourceRef) -> bool {
        let Some(c) = self.resource(child) else {
            return false;
        };
        let Some(parent) = c.parent else {
            return true;
        };
        if !c.children.is_empty() {
            tracing::error!(?child, "refusing to release a resource with children");
            return false;
        }
        if let Some(p) = self.resource_mut(parent) {
            p.children.retain(|alloc| alloc.resource != child);
        }
        if let Some(c) = self.resource_mut(child) {
            c.parent = None;
            c.unassign();
        }
        true
    }

    /// Releases everything allocated below `r`, bottom-up, and then `r`.
    pub fn release_subtree(&mut self, r: ResourceRef) {
        self.release_children(r);
        self.release(r);
    }

    /// Releases everything allocated below `r`, bottom-up.
    pub fn release_children(&mut self, r: ResourceRef) {
        let children: Vec<_> = match self.resource(r) {
            Some(res) => res.children().collect(),
            None => return,
        };
        for child in children {
            self.release_subtree(child);
        }
    }

    /// Removes a device. A bridge's subordinate bus and everything behind it
    /// is removed first; every resource is released before the node is
    /// freed.
    pub fn remove_device(&mut self, id: DeviceId) {
        if let Some(child) = self.device(id).subordinate {
            self.remove_bus(child);
        }
        for index in 0..DEVICE_RESOURCE_COUNT {
            self.release_subtree(ResourceRef::Bar { device: id, index });
        }
        let bus = self.device(id).bus;
        self.bus_mut(bus).devices.retain(|&d| d != id);
        let device = self.devices.remove(id.0);
        tracing::debug!(bdf = %device.bdf, "removed device");
    }

    fn remove_bus(&mut self, bus: BusId) {
        let devices = self.bus(bus).devices.clone();
        for device in devices {
            self.remove_device(device);
        }
        for index in 0..self.bus(bus).windows.len() {
            self.release_subtree(ResourceRef::Window { bus, index });
        }
        if let Some(parent) = self.bus(bus).parent {
            self.bus_mut(parent).children.retain(|&b| b != bus);
        }
        if let Some(bridge) = self.bus(bus).bridge {
            if let Some(device) = self.devices.get_mut(bridge.0) {
                device.subordinate = None;
            }
        }
        self.buses.remove(bus.0);
    }

    /// Every resource that is placed in the tree, with its parent.
    pub fn allocations(&self) -> Vec<(ResourceRef, ResourceRef)> {
        let mut out = Vec::new();
        for (id, bus) in &self.buses {
            for index in 0..bus.windows.len() {
                let r = ResourceRef::Window {
                    bus: BusId(id),
                    index,
                };
                if let Some(parent) = bus.windows[index].parent {
                    out.push((r, parent));
                }
            }
        }
        for (id, device) in &self.devices {
            for (index, res) in device.resources.iter().enumerate() {
                if let Some(parent) = res.parent {
                    out.push((
                        ResourceRef::Bar {
                            device: DeviceId(id),
                            index,
                        },
                        parent,
                    ));
                }
            }
        }
        out
    }
}

impl ResourceClass {
    pub(crate) fn window_flags(self, support: WindowSupport) -> ResourceFlags {
        match self {
            Self::Io => ResourceFlags::new().with_io(true),
            Self::Memory => ResourceFlags::new().with_mem(true),
            Self::Prefetchable => ResourceFlags::new()
                .with_mem(true)
                .with_prefetch(true)
                .with_mem_64(support.prefetch_64),
        }
    }

    pub(crate) fn supported(self, support: WindowSupport) -> bool {
        match self {
            Self::Io => support.io,
            Self::Memory => support.memory,
            Self::Prefetchable => support.prefetch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pci_core::spec::hwid::ProgrammingInterface;

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

    fn ids() -> HardwareIds {
        HardwareIds {
            vendor_id: 0x1414,
            device_id: 1,
            revision_id: 0,
            prog_if: ProgrammingInterface::NONE,
            sub_class: Subclass::NONE,
            base_class: ClassCode::MASS_STORAGE_CONTROLLER,
            type0_sub_vendor_id: 0,
            type0_sub_system_id: 0,
        }
    }

    fn mem() -> ResourceFlags {
        ResourceFlags::new().with_mem(true).with_size_align(true)
    }

    fn device_with_bars(tree: &mut PciTree, devfn: DevFn, sizes: &[u64]) -> DeviceId {
        let root = tree.root();
        let mut device = Device::new(
            root,
            Bdf::new(0, devfn),
            ids(),
            HeaderLayout::NORMAL,
        );
        for (i, &size) in sizes.iter().enumerate() {
            device.resources[i] = Resource::unassigned(size, size, mem(), u32::MAX.into());
        }
        tree.add_device(device)
    }

    const MEM_HOST: ResourceRef = ResourceRef::Window {
        bus: BusId(0),
        index: BRIDGE_WINDOW_COUNT + 1,
    };

    #[test]
    fn first_fit_fills_gaps_in_address_order() {
        let mut tree = PciTree::new(&pool());
        let d = device_with_bars(&mut tree, DevFn::new(0, 0), &[0x1000, 0x4000, 0x1000]);
        let bar = |index| ResourceRef::Bar { device: d, index };

        let r0 = tree.allocate(MEM_HOST, bar(0), 0x1000, 0x1000, 0, !0).unwrap();
        assert_eq!(r0, 0xc000_0000..=0xc000_0fff);
        let r1 = tree.allocate(MEM_HOST, bar(1), 0x4000, 0x4000, 0, !0).unwrap();
        assert_eq!(r1, 0xc000_4000..=0xc000_7fff);
        // The hole left by alignment is used first.
        let r2 = tree.allocate(MEM_HOST, bar(2), 0x1000, 0x1000, 0, !0).unwrap();
        assert_eq!(r2, 0xc000_1000..=0xc000_1fff);

        let host = tree.resource(MEM_HOST).unwrap();
        let starts: Vec<_> = host.children.iter().map(|a| a.start).collect();
        assert_eq!(starts, vec![0xc000_0000, 0xc000_1000, 0xc000_4000]);
    }

    #[test]
    fn allocation_respects_min_base_and_limit() {
        let mut tree = PciTree::new(&pool());
        let d = device_with_bars(&mut tree, DevFn::new(0, 0), &[0x1000, 0x1000]);
        let bar = |index| ResourceRef::Bar { device: d, index };
        let r = tree
            .allocate(MEM_HOST, bar(0), 0x1000, 0x1000, 0xc800_0000, !0)
            .unwrap();
        assert_eq!(*r.start(), 0xc800_0000);
        let err = tree
            .allocate(MEM_HOST, bar(1), 0x1000, 0x1000, 0, 0xbfff_ffff)
            .unwrap_err();
        assert!(matches!(err, PciError::NoFit { size: 0x1000, .. }));
    }

    #[test]
    fn offset_window_places_unlimited_requests() {
        let pool = PlatformResourcePool {
            root_bus: 0,
            windows: vec![HostBridgeWindow {
                kind: WindowKind::Memory,
                range: 0x1_c000_0000..=0x1_cfff_ffff,
                bus_to_cpu: 0x1_0000_0000,
            }],
        };
        let mut tree = PciTree::new(&pool);
        let d = device_with_bars(&mut tree, DevFn::new(0, 0), &[0x1000, 0x1000]);
        let bar = |index| ResourceRef::Bar { device: d, index };
        let host = ResourceRef::Window {
            bus: tree.root(),
            index: BRIDGE_WINDOW_COUNT,
        };
        let r = tree.allocate(host, bar(0), 0x1000, 0x1000, 0, u64::MAX).unwrap();
        assert_eq!(r, 0x1_c000_0000..=0x1_c000_0fff);
        // Bus limits still apply after translation.
        assert!(tree.allocate(host, bar(1), 0x1000, 0x1000, 0, 0xbfff_ffff).is_err());
        let r = tree.allocate(host, bar(1), 0x1000, 0x1000, 0, 0xcfff_ffff).unwrap();
        assert_eq!(r, 0x1_c000_1000..=0x1_c000_1fff);
    }

    #[test]
    fn type_mismatch_refused() {
        let mut tree = PciTree::new(&pool());
        let d = device_with_bars(&mut tree, DevFn::new(0, 0), &[0x1000]);
        let io_host = ResourceRef::Window {
            bus: tree.root(),
            index: BRIDGE_WINDOW_COUNT,
        };
        let bar = ResourceRef::Bar { device: d, index: 0 };
        assert!(tree.allocate(io_host, bar, 0x1000, 0x1000, 0, !0).is_err());
        assert!(!tree.resource(bar).unwrap().is_assigned());
    }

    #[test]
    fn claim_and_release() {
        let mut tree = PciTree::new(&pool());
        let d = device_with_bars(&mut tree, DevFn::new(0, 0), &[0x1000, 0x1000]);
        let bar = |index| ResourceRef::Bar { device: d, index };
        for (index, start) in [(0, 0xc000_0000u64), (1, 0xc000_0800)] {
            let r = tree.resource_mut(bar(index)).unwrap();
            r.start = start;
            r.end = start + 0xfff;
        }
        assert!(tree.claim(MEM_HOST, bar(0)));
        // Overlaps bar 0.
        assert!(!tree.claim(MEM_HOST, bar(1)));

        assert!(tree.release(bar(0)));
        let r = tree.resource(bar(0)).unwrap();
        assert_eq!(r.range(), 0..=0xfff);
        assert!(!r.is_assigned());
        assert!(tree.resource(MEM_HOST).unwrap().children.is_empty());
    }

    #[test]
    fn release_refused_with_children() {
        let mut tree = PciTree::new(&pool());
        let d = device_with_bars(&mut tree, DevFn::new(0, 0), &[0x10_0000, 0x1000]);
        let bar = |index| ResourceRef::Bar { device: d, index };
        tree.allocate(MEM_HOST, bar(0), 0x10_0000, 0x10_0000, 0, !0)
            .unwrap();
        // Nest bar 1 inside bar 0 to build a two-level tree.
        tree.resource_mut(bar(0)).unwrap().flags = mem();
        tree.allocate(bar(0), bar(1), 0x1000, 0x1000, 0, !0).unwrap();

        assert!(!tree.release(bar(0)));
        tree.release_subtree(bar(0));
        assert!(!tree.resource(bar(0)).unwrap().is_assigned());
        assert!(!tree.resource(bar(1)).unwrap().is_assigned());
    }

    #[test]
    fn remove_device_releases_resources() {
        let mut tree = PciTree::new(&pool());
        let d = device_with_bars(&mut tree, DevFn::new(0, 0), &[0x1000]);
        tree.allocate(
            MEM_HOST,
            ResourceRef::Bar { device: d, index: 0 },
            0x1000,
            0x1000,
            0,
            !0,
        )
        .unwrap();
        tree.remove_device(d);
        assert_eq!(tree.device_count(), 0);
        assert!(tree.resource(MEM_HOST).unwrap().children.is_empty());
        assert!(tree.bus(tree.root()).devices().is_empty());
    }
}

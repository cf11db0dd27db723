// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bridge window sizing.
//!
//! Windows are sized bottom-up: a bus's windows must hold every unassigned
//! resource of the devices on the bus plus the windows of the bridges below
//! it, so child buses are sized first.

use crate::Enumerator;
use crate::bar;
use crate::bar::LIMIT_32;
use crate::bar::LIMIT_IO_16;
use crate::error::BarRejectReason;
use crate::error::PciError;
use crate::hooks::QuirkPhase;
use crate::policy::AllocationPolicy;
use crate::resource::Resource;
use crate::resource::ResourceClass;
use crate::resource::align_up;
use crate::tree::BRIDGE_WINDOW_COUNT;
use crate::tree::BusId;
use crate::tree::DEVICE_RESOURCE_COUNT;
use crate::tree::PciTree;
use crate::tree::ResourceRef;
use crate::tree::WindowSupport;
use pci_core::spec::cfg_space::bridge::IO_WINDOW_GRANULARITY;
use pci_core::spec::cfg_space::bridge::MEMORY_WINDOW_GRANULARITY;

/// I/O resources below this size go in the small bucket, which is subject to
/// ISA aliasing.
const IO_SMALL: u64 = 0x400;
/// Number of alignment orders tracked for memory windows, starting at 1M.
const MEM_ORDERS: usize = 12;
const MEM_ORDER_SHIFT: u32 = 20;

/// The computed requirements of one bridge window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct WindowSize {
    /// Minimum size, excluding optional resources.
    pub size: u64,
    /// Minimum alignment, excluding optional resources.
    pub align: u64,
    /// Additional size needed to also hold the optional resources.
    pub growth: u64,
    /// Alignment when the optional resources are included.
    pub growth_align: u64,
    /// Every contributor may be placed above 4G.
    pub mem_64: bool,
}

#[derive(Debug, Copy, Clone)]
struct Contributor {
    size: u64,
    align: u64,
    optional: bool,
    mem_64: bool,
}

/// The window class a resource on `bus` is allocated from.
pub(crate) fn route(tree: &PciTree, bus: BusId, res: &Resource) -> Option<ResourceClass> {
    match res.class()? {
        ResourceClass::Prefetchable if !tree.bus(bus).window_support().prefetch => {
            Some(ResourceClass::Memory)
        }
        class => Some(class),
    }
}

/// Unassigned resources on `bus` that belong in the `class` window.
fn contributors(tree: &PciTree, bus: BusId, class: ResourceClass) -> Vec<Contributor> {
    let b = tree.bus(bus);
    let bars = b.devices().iter().flat_map(|&device| {
        (0..DEVICE_RESOURCE_COUNT).map(move |index| ResourceRef::Bar { device, index })
    });
    let windows = b.children().iter().flat_map(|&child| {
        (0..BRIDGE_WINDOW_COUNT).map(move |index| ResourceRef::Window { bus: child, index })
    });
    bars.chain(windows)
        .filter_map(|r| {
            let res = tree.resource(r)?;
            if res.is_empty() || res.is_assigned() || route(tree, bus, res) != Some(class) {
                return None;
            }
            Some(Contributor {
                size: res.size(),
                align: res.align.max(1),
                optional: res.optional,
                mem_64: res.flags.mem_64(),
            })
        })
        .collect()
}

fn mem_order(align: u64) -> usize {
    align.trailing_zeros().saturating_sub(MEM_ORDER_SHIFT) as usize
}

fn size_io(policy: &AllocationPolicy, contributors: &[Contributor], floor: u64) -> (u64, u64) {
    let mut small = 0u64;
    let mut large = 0u64;
    let mut align = IO_WINDOW_GRANULARITY;
    for c in contributors {
        if c.size < IO_SMALL {
            small += c.size;
        } else {
            large += c.size;
        }
        align = align.max(c.align);
    }
    if small == 0 && large == 0 && floor == 0 {
        return (0, align);
    }
    if policy.isa_io_aliasing {
        // Each 1K block only has 256 usable ports.
        small = (small & 0xff) + ((small & !0xff) << 2);
    }
    let size = align_up((small + large).max(floor), align).unwrap_or(u64::MAX);
    (size, align)
}

/// Picks the smallest window alignment that still packs the resources
/// without waste.
fn mem_align(aligns: &[u64; MEM_ORDERS], max_order: usize) -> u64 {
    let mut total = 0u64;
    let mut min_align = 0u64;
    for (order, &sum) in aligns.iter().enumerate().take(max_order + 1) {
        let align = 1u64 << (order as u32 + MEM_ORDER_SHIFT);
        if total == 0 {
            min_align = align;
        } else if align_up(total + min_align, min_align).is_some_and(|v| v < align) {
            min_align = align >> 1;
        }
        total += sum;
    }
    min_align
}

fn size_mem(contributors: &[Contributor], floor: u64) -> (u64, u64) {
    let mut aligns = [0u64; MEM_ORDERS];
    let mut max_order = 0;
    let mut size = 0u64;
    for c in contributors {
        let order = mem_order(c.align);
        if order >= MEM_ORDERS {
            continue;
        }
        size = size.saturating_add(c.size.max(c.align));
        // Resources larger than their alignment do not help packing.
        if c.size <= c.align {
            aligns[order] += c.align;
        }
        max_order = max_order.max(order);
    }
    let align = mem_align(&aligns, max_order).max(MEMORY_WINDOW_GRANULARITY);
    if size == 0 && floor == 0 {
        return (0, align);
    }
    let size = align_up(size.max(floor), align).unwrap_or(u64::MAX);
    (size, align)
}

/// Computes the size and alignment the `class` window of `bus` needs for
/// its current unassigned contributors.
pub fn size_bus_window(
    tree: &PciTree,
    policy: &AllocationPolicy,
    bus: BusId,
    class: ResourceClass,
) -> WindowSize {
    let contributors = contributors(tree, bus, class);
    let floor = if tree.bus(bus).is_hotplug() {
        match class {
            ResourceClass::Io => policy.hotplug_io_size,
            ResourceClass::Memory => policy.hotplug_mmio_size,
            ResourceClass::Prefetchable => policy.hotplug_mmio_pref_size,
        }
    } else {
        0
    };

    let required: Vec<Contributor> = contributors.iter().copied().filter(|c| !c.optional).collect();
    let compute = |list: &[Contributor]| match class {
        ResourceClass::Io => size_io(policy, list, floor),
        ResourceClass::Memory | ResourceClass::Prefetchable => size_mem(list, floor),
    };
    let (size, align) = compute(&required);
    let (full, growth_align) = compute(&contributors);
    WindowSize {
        size,
        align,
        growth: full.saturating_sub(size),
        growth_align,
        mem_64: contributors.iter().all(|c| c.mem_64),
    }
}

/// Highest bus address a bridge window of `class` can decode.
pub(crate) fn window_limit(
    policy: &AllocationPolicy,
    support: WindowSupport,
    class: ResourceClass,
    mem_64: bool,
) -> u64 {
    let limit = match class {
        ResourceClass::Io if support.io_32 => LIMIT_32,
        ResourceClass::Io => LIMIT_IO_16,
        ResourceClass::Memory => LIMIT_32,
        ResourceClass::Prefetchable if mem_64 => u64::MAX,
        ResourceClass::Prefetchable => LIMIT_32,
    };
    limit.min(policy.max_address())
}

impl Enumerator<'_> {
    /// Sizes the windows of every bridge at or below `bus`, children first.
    /// With `growth` set, optional resources are included.
    pub(crate) fn size_bridges(&mut self, tree: &mut PciTree, bus: BusId, growth: bool) {
        let children = tree.bus(bus).children().to_vec();
        for child in children {
            self.size_bridges(tree, child, growth);
        }

        self.disable_misaligned(tree, bus);
        if !tree.bus(bus).is_root() {
            for class in ResourceClass::ALL {
                self.size_window(tree, bus, class, growth);
            }
        }

        let devices = tree.bus(bus).devices().to_vec();
        for id in devices {
            self.hooks
                .run_quirks(QuirkPhase::AfterSize, &mut *self.cfg, tree.device_mut(id));
        }
    }

    /// Disables memory BARs whose alignment no window can honor.
    fn disable_misaligned(&mut self, tree: &mut PciTree, bus: BusId) {
        let devices = tree.bus(bus).devices().to_vec();
        for id in devices {
            let device = tree.device_mut(id);
            for index in 0..DEVICE_RESOURCE_COUNT {
                let res = &mut device.resources[index];
                if !res.flags.mem() || res.is_assigned() || mem_order(res.align.max(1)) < MEM_ORDERS
                {
                    continue;
                }
                let err = PciError::BarDecodeRejected {
                    bus: device.bdf.bus,
                    devfn: device.bdf.devfn,
                    offset: bar::resource_register(device.header, index),
                    reason: BarRejectReason::AlignmentTooLarge,
                };
                tracing::warn!(
                    align = res.align,
                    error = &err as &dyn std::error::Error,
                    "disabling bar"
                );
                res.reset();
            }
        }
    }

    fn size_window(&mut self, tree: &mut PciTree, bus: BusId, class: ResourceClass, growth: bool) {
        let index = class.window_index();
        let b = tree.bus(bus);
        let number = b.number();
        let support = b.window_support();
        if b.windows()[index].is_assigned() {
            return;
        }

        let window = if class.supported(support) {
            let ws = size_bus_window(tree, self.policy, bus, class);
            let (size, align) = if growth {
                (ws.size.saturating_add(ws.growth), ws.growth_align)
            } else {
                (ws.size, ws.align)
            };
            if size == 0 {
                None
            } else {
                let mut flags = class.window_flags(support).with_start_align(true);
                if class == ResourceClass::Prefetchable {
                    flags.set_mem_64(support.prefetch_64 && ws.mem_64);
                }
                let limit = window_limit(self.policy, support, class, flags.mem_64());
                tracing::debug!(bus = number, ?class, size, align, "sized bridge window");
                Some(Resource::unassigned(size, align, flags, limit))
            }
        } else {
            None
        };

        tree.bus_mut(bus).windows[index] = window.unwrap_or_default();
    }
}

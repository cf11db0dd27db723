// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tree-wide properties of enumeration and assignment.

mod common;

use common::MB;
use common::check_invariants;
use common::init_tracing;
use common::mem;
use common::memory_pool;
use common::pool;
use common::pref64;
use pci_core::ConfigAccessor;
use pci_core::DevFn;
use pci_enum::AllocationPolicy;
use pci_enum::Enumerator;
use pci_enum::Hooks;
use pci_enum::PciError;
use pci_enum::PciTree;
use pci_enum::QuirkHook;
use pci_enum::QuirkPhase;
use pci_enum::ReallocPolicy;
use pci_enum::ResourceClass;
use pci_enum::size::size_bus_window;
use pci_enum::tree::Device;
use pci_enum::tree::ROM_RESOURCE;
use pci_sim::BarKind;
use pci_sim::SimBridge;
use pci_sim::SimDevice;
use pci_sim::SimFunction;
use pci_sim::SimRootComplex;
use pci_sim::test_helpers::bridge_ids;
use pci_sim::test_helpers::endpoint_ids;

fn mixed_topology() -> SimRootComplex {
    let root_endpoint = SimFunction::new(endpoint_ids(1))
        .with_bar(0, mem(0x4000))
        .unwrap()
        .with_bar(1, BarKind::Io { size: 0x40 })
        .unwrap()
        .with_bar(2, pref64(MB))
        .unwrap()
        .with_rom(0x1_0000)
        .unwrap();
    let inner = SimBridge::new(bridge_ids())
        .with_device(
            DevFn::new(0, 0),
            SimFunction::new(endpoint_ids(3))
                .with_bar(0, mem(0x2000))
                .unwrap()
                .with_bar(2, pref64(2 * MB))
                .unwrap(),
        )
        .unwrap();
    let a = SimBridge::new(bridge_ids())
        .with_device(
            DevFn::new(0, 0),
            SimFunction::new(endpoint_ids(2))
                .with_bar(0, mem(MB as u32))
                .unwrap()
                .with_bar(1, BarKind::Io { size: 0x100 })
                .unwrap(),
        )
        .unwrap()
        .with_device(DevFn::new(1, 0), inner)
        .unwrap();
    let b = SimBridge::new(bridge_ids())
        .with_device(
            DevFn::new(0, 0),
            SimFunction::new(endpoint_ids(4))
                .with_bar(
                    0,
                    BarKind::Memory32 {
                        size: MB as u32,
                        prefetchable: true,
                    },
                )
                .unwrap()
                .with_rom(0x8000)
                .unwrap(),
        )
        .unwrap();
    SimRootComplex::new(0)
        .with_device(DevFn::new(0, 0), root_endpoint)
        .unwrap()
        .with_device(DevFn::new(1, 0), a)
        .unwrap()
        .with_device(DevFn::new(2, 0), b)
        .unwrap()
}

#[test]
fn assignment_is_contained_aligned_and_disjoint() {
    init_tracing();
    let mut root = mixed_topology();
    let policy = AllocationPolicy::default();
    let enumeration = pci_enum::enumerate(&mut root, &pool(), &policy, Hooks::new());
    enumeration.result.unwrap();
    let tree = &enumeration.tree;
    check_invariants(tree);

    // Every required BAR is placed, and the hardware agrees with the tree.
    tree.for_each_device(|_, device| {
        for (index, res) in device.resources.iter().enumerate() {
            if index != ROM_RESOURCE && !res.is_empty() {
                assert!(res.is_assigned(), "{} bar {index} unassigned", device.bdf);
            }
        }
    });
    let id = tree.find_device(tree.root(), DevFn::new(0, 0)).unwrap();
    let f = root.function(&[DevFn::new(0, 0)]).unwrap();
    for index in [0, 1, 2] {
        assert_eq!(f.bar_address(index), tree.resource_at(id, index).unwrap().start);
    }
    let pref = tree.resource_at(id, 2).unwrap();
    assert!(pref.start >= 0x8_0000_0000);
}

/// Counts sizing passes through the after-size quirk of one device.
struct SizingPasses<'a> {
    device_id: u16,
    count: &'a mut u32,
}

impl QuirkHook for SizingPasses<'_> {
    fn fixup(&mut self, phase: QuirkPhase, _cfg: &mut dyn ConfigAccessor, device: &mut Device) {
        if phase == QuirkPhase::AfterSize && device.ids.device_id == self.device_id {
            *self.count += 1;
        }
    }
}

fn chain(depth: usize, bar: BarKind) -> SimRootComplex {
    let mut device: SimDevice = SimFunction::new(endpoint_ids(1))
        .with_bar(0, bar)
        .unwrap()
        .into();
    for _ in 0..depth {
        device = SimBridge::new(bridge_ids())
            .with_device(DevFn::new(0, 0), device)
            .unwrap()
            .into();
    }
    SimRootComplex::new(0)
        .with_device(DevFn::new(0, 0), device)
        .unwrap()
}

#[test]
fn retries_terminate_within_depth_plus_two() {
    init_tracing();
    for realloc in [ReallocPolicy::Auto, ReallocPolicy::On, ReallocPolicy::Off] {
        for depth in 0..4 {
            // Twice the size of the only aperture.
            let mut root = chain(depth, mem(0x2000_0000));
            let policy = AllocationPolicy::default()
                .with_realloc(realloc)
                .with_fixed_passes(10);
            let mut passes = 0;
            let hooks = Hooks::new().with_quirk(SizingPasses {
                device_id: 1,
                count: &mut passes,
            });
            let enumeration = pci_enum::enumerate(
                &mut root,
                &memory_pool(0xc000_0000..=0xcfff_ffff),
                &policy,
                hooks,
            );
            let Err(PciError::RetryBudgetExhausted { unassigned }) = enumeration.result else {
                panic!("{realloc:?} depth {depth}: expected give up");
            };
            assert!(!unassigned.is_empty());
            assert!(passes >= 1);
            assert!(
                passes <= depth as u32 + 2,
                "{realloc:?} depth {depth}: {passes} passes"
            );
            check_invariants(&enumeration.tree);
        }
    }
}

#[test]
fn rescan_of_unchanged_tree_is_stable() {
    init_tracing();
    let mut root = mixed_topology();
    let policy = AllocationPolicy::default();
    let mut tree = pci_enum::enumerate(&mut root, &pool(), &policy, Hooks::new()).tree;

    let buses = |tree: &PciTree| {
        let mut out = Vec::new();
        tree.for_each_bus(|_, b| out.push((b.number(), b.subordinate())));
        out
    };
    let devices = |tree: &PciTree| {
        let mut out = Vec::new();
        tree.for_each_device(|_, d| out.push(d.bdf));
        out
    };
    let before = (buses(&tree), devices(&tree), tree.allocations().len());
    root.clear_write_log();

    let added = Enumerator::new(&mut root, &policy).rescan(&mut tree).unwrap();
    assert!(added.is_empty());
    assert_eq!(before, (buses(&tree), devices(&tree), tree.allocations().len()));
    assert!(root.write_log().is_empty());

    // And again.
    let added = Enumerator::new(&mut root, &policy).rescan(&mut tree).unwrap();
    assert!(added.is_empty());
    assert_eq!(before.0, buses(&tree));
}

#[test]
fn window_size_never_shrinks_as_devices_are_added() {
    let bars = [
        mem(0x1000),
        BarKind::Io { size: 0x100 },
        mem(4 * MB as u32),
        pref64(MB),
        BarKind::Io { size: 0x800 },
        mem(0x10_0000),
        pref64(0x4000),
        mem(0x20),
    ];
    let policy = AllocationPolicy::default();
    let mut last = [(0u64, 0u64); 3];
    for count in 0..=bars.len() {
        let mut bridge = SimBridge::new(bridge_ids());
        for (slot, bar) in bars[..count].iter().enumerate() {
            let f = SimFunction::new(endpoint_ids(slot as u16))
                .with_bar(0, *bar)
                .unwrap()
                .with_rom(0x1_0000)
                .unwrap();
            bridge = bridge.with_device(DevFn::new(slot as u8, 0), f).unwrap();
        }
        let mut root = SimRootComplex::new(0)
            .with_device(DevFn::new(1, 0), bridge)
            .unwrap();
        let mut tree = PciTree::new(&pool());
        let top = tree.root();
        Enumerator::new(&mut root, &policy).scan_bus(&mut tree, top);
        let bus = tree.find_bus(1).unwrap();

        for class in ResourceClass::ALL {
            let ws = size_bus_window(&tree, &policy, bus, class);
            let sizes = (ws.size, ws.size + ws.growth);
            let prev = last[class.window_index()];
            assert!(
                sizes.0 >= prev.0 && sizes.1 >= prev.1,
                "{class:?} shrank from {prev:#x?} to {sizes:#x?} at {count} devices"
            );
            last[class.window_index()] = sizes;
        }
    }
    assert!(last[ResourceClass::Memory.window_index()].0 >= 5 * MB);
}

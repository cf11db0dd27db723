// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end enumeration of small simulated topologies.

mod common;

use common::MB;
use common::check_invariants;
use common::init_tracing;
use common::mem;
use common::memory_pool;
use common::pool;
use pci_core::Bdf;
use pci_core::DevFn;
use pci_core::spec::cfg_space::ROM_ADDRESS_MASK;
use pci_enum::AllocationPolicy;
use pci_enum::AssignmentReport;
use pci_enum::Hooks;
use pci_enum::HostBridgeWindow;
use pci_enum::PlatformResourcePool;
use pci_enum::ResourceFlags;
use pci_enum::WindowKind;
use pci_enum::tree::ROM_RESOURCE;
use pci_enum::tree::MEMORY_WINDOW;
use pci_sim::BarKind;
use pci_sim::SimBridge;
use pci_sim::SimFunction;
use pci_sim::SimRootComplex;
use pci_sim::test_helpers::bridge_ids;
use pci_sim::test_helpers::endpoint_ids;

#[test]
fn single_bar_on_root_bus() {
    init_tracing();
    let f = SimFunction::new(endpoint_ids(1))
        .with_bar(0, mem(0x2000))
        .unwrap();
    let mut root = SimRootComplex::new(0)
        .with_device(DevFn::new(0, 0), f)
        .unwrap();
    // The aperture base is only 4K aligned.
    let pool = memory_pool(0xc000_1000..=0xcfff_ffff);
    let policy = AllocationPolicy::default();
    let enumeration = pci_enum::enumerate(&mut root, &pool, &policy, Hooks::new());

    assert_eq!(
        enumeration.result.unwrap(),
        AssignmentReport {
            passes: 1,
            realloc: false
        }
    );
    let tree = &enumeration.tree;
    let id = tree.find_device_at(Bdf::new(0, DevFn::new(0, 0))).unwrap();
    assert_eq!(tree.resource_at(id, 0).unwrap().range(), 0xc000_2000..=0xc000_3fff);
    assert_eq!(
        root.function(&[DevFn::new(0, 0)]).unwrap().bar_address(0),
        0xc000_2000
    );
}

#[test]
fn bridge_window_packs_at_smaller_alignment() {
    init_tracing();
    let bridge = SimBridge::new(bridge_ids())
        .with_device(
            DevFn::new(0, 0),
            SimFunction::new(endpoint_ids(1))
                .with_bar(0, mem(MB as u32))
                .unwrap(),
        )
        .unwrap()
        .with_device(
            DevFn::new(1, 0),
            SimFunction::new(endpoint_ids(2))
                .with_bar(0, mem(MB as u32))
                .unwrap(),
        )
        .unwrap();
    let mut root = SimRootComplex::new(0)
        .with_device(DevFn::new(1, 0), bridge)
        .unwrap();
    // 1M aligned but not 2M aligned.
    let pool = memory_pool(0xc010_0000..=0xcfff_ffff);
    let policy = AllocationPolicy::default();
    let enumeration = pci_enum::enumerate(&mut root, &pool, &policy, Hooks::new());
    enumeration.result.unwrap();

    let tree = &enumeration.tree;
    check_invariants(tree);
    let bus = tree.find_bus(1).unwrap();
    let window = &tree.bus(bus).windows()[MEMORY_WINDOW];
    assert_eq!(window.range(), 0xc010_0000..=0xc02f_ffff);
    assert_eq!(window.align, MB);

    let first = tree.find_device(bus, DevFn::new(0, 0)).unwrap();
    let second = tree.find_device(bus, DevFn::new(1, 0)).unwrap();
    assert_eq!(tree.resource_at(first, 0).unwrap().start, 0xc010_0000);
    assert_eq!(tree.resource_at(second, 0).unwrap().start, 0xc020_0000);

    let b = root.bridge(&[DevFn::new(1, 0)]).unwrap();
    assert_eq!(b.memory_window(), Some(0xc010_0000..=0xc02f_ffff));
}

#[test]
fn undersized_firmware_window_is_regrown() {
    init_tracing();
    let bridge = SimBridge::new(bridge_ids())
        .with_firmware_memory_window(0xc000_0000..=0xc00f_ffff)
        .with_device(
            DevFn::new(0, 0),
            SimFunction::new(endpoint_ids(1))
                .with_bar(0, mem(MB as u32))
                .unwrap(),
        )
        .unwrap()
        .with_device(
            DevFn::new(1, 0),
            SimFunction::new(endpoint_ids(2))
                .with_bar(0, mem(0x1_0000))
                .unwrap(),
        )
        .unwrap();
    let mut root = SimRootComplex::new(0)
        .with_device(DevFn::new(1, 0), bridge)
        .unwrap();
    let policy = AllocationPolicy::default();
    let enumeration = pci_enum::enumerate(&mut root, &pool(), &policy, Hooks::new());

    // The first pass fits only the 1M BAR in the firmware window; the leaf
    // window is released and regrown on the second.
    assert_eq!(
        enumeration.result.unwrap(),
        AssignmentReport {
            passes: 2,
            realloc: true
        }
    );
    let tree = &enumeration.tree;
    check_invariants(tree);
    let bus = tree.find_bus(1).unwrap();
    let window = &tree.bus(bus).windows()[MEMORY_WINDOW];
    assert_eq!(window.range(), 0xc000_0000..=0xc01f_ffff);

    let big = tree.find_device(bus, DevFn::new(0, 0)).unwrap();
    let small = tree.find_device(bus, DevFn::new(1, 0)).unwrap();
    assert_eq!(tree.resource_at(big, 0).unwrap().start, 0xc000_0000);
    assert_eq!(tree.resource_at(small, 0).unwrap().start, 0xc010_0000);

    let bridge = [DevFn::new(1, 0)];
    assert_eq!(
        root.bridge(&bridge).unwrap().memory_window(),
        Some(0xc000_0000..=0xc01f_ffff)
    );
    assert_eq!(
        root.function(&[bridge[0], DevFn::new(1, 0)])
            .unwrap()
            .bar_address(0),
        0xc010_0000
    );
}

#[test]
fn all_ones_bar_is_ignored() {
    init_tracing();
    let f = SimFunction::new(endpoint_ids(1))
        .with_bar(1, mem(0x1000))
        .unwrap()
        .with_register(0x10, !0);
    let mut root = SimRootComplex::new(0)
        .with_device(DevFn::new(0, 0), f)
        .unwrap();
    let policy = AllocationPolicy::default();
    let enumeration = pci_enum::enumerate(&mut root, &pool(), &policy, Hooks::new());
    enumeration.result.unwrap();

    let tree = &enumeration.tree;
    let id = tree.find_device(tree.root(), DevFn::new(0, 0)).unwrap();
    let bar0 = tree.resource_at(id, 0).unwrap();
    assert!(bar0.is_empty());
    assert_eq!(bar0.size(), 0);
    assert_eq!(bar0.flags, ResourceFlags::new());
    assert!(!bar0.is_assigned());

    let bar1 = tree.resource_at(id, 1).unwrap();
    assert_eq!(bar1.start, 0xc000_0000);
    assert_eq!(
        root.function(&[DevFn::new(0, 0)]).unwrap().bar_address(1),
        0xc000_0000
    );
}

#[test]
fn sibling_bridges_get_disjoint_bus_ranges() {
    init_tracing();
    let nested = |id| {
        SimBridge::new(bridge_ids())
            .with_device(
                DevFn::new(0, 0),
                SimBridge::new(bridge_ids())
                    .with_device(DevFn::new(0, 0), SimFunction::new(endpoint_ids(id)))
                    .unwrap(),
            )
            .unwrap()
    };
    let mut root = SimRootComplex::new(0)
        .with_device(DevFn::new(1, 0), nested(1))
        .unwrap()
        .with_device(DevFn::new(2, 0), nested(2))
        .unwrap();
    let policy = AllocationPolicy::default();
    let enumeration = pci_enum::enumerate(&mut root, &pool(), &policy, Hooks::new());
    let tree = &enumeration.tree;

    let (a, b) = (DevFn::new(1, 0), DevFn::new(2, 0));
    let inner = DevFn::new(0, 0);
    assert_eq!(root.bridge(&[a]).unwrap().bus_numbers(), (0, 1, 2));
    assert_eq!(root.bridge(&[a, inner]).unwrap().bus_numbers(), (1, 2, 2));
    assert_eq!(root.bridge(&[b]).unwrap().bus_numbers(), (0, 3, 4));
    assert_eq!(root.bridge(&[b, inner]).unwrap().bus_numbers(), (3, 4, 4));

    assert_eq!(tree.bus_count(), 5);
    assert_eq!(tree.bus(tree.root()).subordinate(), 4);
    let bus1 = tree.find_bus(1).unwrap();
    let bus3 = tree.find_bus(3).unwrap();
    assert_eq!(tree.bus(bus1).subordinate(), 2);
    assert_eq!(tree.bus(bus3).subordinate(), 4);

    // Every bus range lies inside its parent's and is disjoint from its
    // siblings'.
    tree.for_each_bus(|_, bus| {
        let children: Vec<_> = bus.children().iter().map(|&c| tree.bus(c)).collect();
        for (i, child) in children.iter().enumerate() {
            assert!(child.number() > bus.number());
            assert!(child.subordinate() <= bus.subordinate());
            for other in &children[i + 1..] {
                assert!(
                    child.subordinate() < other.number() || other.subordinate() < child.number()
                );
            }
        }
    });

    let endpoint = root
        .function(&[b, inner, DevFn::new(0, 0)])
        .unwrap()
        .hardware_ids();
    assert_eq!(endpoint.device_id, 2);
    let bus4 = tree.find_bus(4).unwrap();
    assert_eq!(tree.bus(bus4).devices().len(), 1);
}

#[test]
fn bars_are_programmed_with_bus_addresses_behind_offset_window() {
    init_tracing();
    let f = SimFunction::new(endpoint_ids(1))
        .with_bar(
            0,
            BarKind::Memory64 {
                size: 0x1000,
                prefetchable: false,
            },
        )
        .unwrap()
        .with_bar(2, mem(0x1000))
        .unwrap();
    let mut root = SimRootComplex::new(0)
        .with_device(DevFn::new(0, 0), f)
        .unwrap();
    // Bus 0xc000_0000 appears to the CPU at 0x1_c000_0000.
    let pool = PlatformResourcePool {
        root_bus: 0,
        windows: vec![HostBridgeWindow {
            kind: WindowKind::Memory,
            range: 0x1_c000_0000..=0x1_cfff_ffff,
            bus_to_cpu: 0x1_0000_0000,
        }],
    };
    let policy = AllocationPolicy::default();
    let enumeration = pci_enum::enumerate(&mut root, &pool, &policy, Hooks::new());
    assert_eq!(
        enumeration.result.unwrap(),
        AssignmentReport {
            passes: 1,
            realloc: false
        }
    );

    let tree = &enumeration.tree;
    check_invariants(tree);
    let id = tree.find_device(tree.root(), DevFn::new(0, 0)).unwrap();
    assert_eq!(tree.resource_at(id, 0).unwrap().start, 0x1_c000_0000);
    assert_eq!(tree.resource_at(id, 2).unwrap().start, 0x1_c000_1000);
    let f = root.function(&[DevFn::new(0, 0)]).unwrap();
    assert_eq!(f.bar_address(0), 0xc000_0000);
    assert_eq!(f.bar_address(2), 0xc000_1000);
}

#[test]
fn rom_is_placed_once_the_window_regrows() {
    init_tracing();
    let bridge = SimBridge::new(bridge_ids())
        .with_firmware_memory_window(0xc000_0000..=0xc00f_ffff)
        .with_device(
            DevFn::new(0, 0),
            SimFunction::new(endpoint_ids(1))
                .with_bar(0, mem(MB as u32))
                .unwrap()
                .with_rom(0x1_0000)
                .unwrap(),
        )
        .unwrap()
        .with_device(
            DevFn::new(1, 0),
            SimFunction::new(endpoint_ids(2))
                .with_bar(0, mem(0x1_0000))
                .unwrap(),
        )
        .unwrap();
    let mut root = SimRootComplex::new(0)
        .with_device(DevFn::new(1, 0), bridge)
        .unwrap();
    let policy = AllocationPolicy::default();
    let enumeration = pci_enum::enumerate(&mut root, &pool(), &policy, Hooks::new());

    // The first pass has no room for the ROM or the second BAR. The regrown
    // window holds both.
    assert_eq!(
        enumeration.result.unwrap(),
        AssignmentReport {
            passes: 2,
            realloc: true
        }
    );
    let tree = &enumeration.tree;
    check_invariants(tree);
    let bus = tree.find_bus(1).unwrap();
    let window = &tree.bus(bus).windows()[MEMORY_WINDOW];
    assert_eq!(window.range(), 0xc000_0000..=0xc01f_ffff);

    let first = tree.find_device(bus, DevFn::new(0, 0)).unwrap();
    let second = tree.find_device(bus, DevFn::new(1, 0)).unwrap();
    let rom = tree.resource_at(first, ROM_RESOURCE).unwrap();
    assert!(rom.is_assigned());
    assert_eq!(rom.range(), 0xc010_0000..=0xc010_ffff);
    assert_eq!(tree.resource_at(second, 0).unwrap().start, 0xc011_0000);

    let f = root.function(&[DevFn::new(1, 0), DevFn::new(0, 0)]).unwrap();
    assert_eq!(f.rom() & ROM_ADDRESS_MASK, 0xc010_0000);
}

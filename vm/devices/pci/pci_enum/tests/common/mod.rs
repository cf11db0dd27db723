// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared fixtures for the enumeration tests.

#![allow(dead_code)]

use pci_enum::HostBridgeWindow;
use pci_enum::PciTree;
use pci_enum::PlatformResourcePool;
use pci_enum::WindowKind;
use pci_sim::BarKind;
use std::collections::HashSet;

pub const MB: u64 = 1 << 20;

/// Routes engine logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// I/O, 32-bit memory and 64-bit prefetchable apertures on bus 0.
pub fn pool() -> PlatformResourcePool {
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
            HostBridgeWindow {
                kind: WindowKind::Prefetchable,
                range: 0x8_0000_0000..=0x8_ffff_ffff,
                bus_to_cpu: 0,
            },
        ],
    }
}

/// A pool with a single memory aperture.
pub fn memory_pool(range: std::ops::RangeInclusive<u64>) -> PlatformResourcePool {
    PlatformResourcePool {
        root_bus: 0,
        windows: vec![HostBridgeWindow {
            kind: WindowKind::Memory,
            range,
            bus_to_cpu: 0,
        }],
    }
}

pub fn mem(size: u32) -> BarKind {
    BarKind::Memory32 {
        size,
        prefetchable: false,
    }
}

pub fn pref64(size: u64) -> BarKind {
    BarKind::Memory64 {
        size,
        prefetchable: true,
    }
}

/// Checks containment, alignment and sibling disjointness of every placed
/// resource.
pub fn check_invariants(tree: &PciTree) {
    let mut parents = HashSet::new();
    for (child, parent) in tree.allocations() {
        let c = tree.resource(child).unwrap();
        let p = tree.resource(parent).unwrap();
        assert_eq!(c.parent(), Some(parent));
        assert!(
            p.start <= c.start && c.end <= p.end,
            "{child:?} {:#x?} outside {parent:?} {:#x?}",
            c.range(),
            p.range()
        );
        if (c.flags.size_align() || c.flags.start_align()) && c.align > 1 {
            let bus_start = c.start - tree.bus_offset(child);
            assert_eq!(bus_start % c.align, 0, "{child:?} misaligned");
        }
        parents.insert(parent);
    }
    for parent in parents {
        let p = tree.resource(parent).unwrap();
        let mut ranges: Vec<_> = p
            .children()
            .map(|c| tree.resource(c).unwrap().range())
            .collect();
        ranges.sort_by_key(|r| *r.start());
        for pair in ranges.windows(2) {
            assert!(
                pair[0].end() < pair[1].start(),
                "overlap under {parent:?}: {:#x?}",
                pair
            );
        }
    }
}

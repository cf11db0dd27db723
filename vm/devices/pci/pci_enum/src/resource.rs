// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Address ranges decoded by BARs and bridge windows.

use crate::tree::ResourceRef;
use bitfield_struct::bitfield;
use std::ops::RangeInclusive;

/// Flags describing a [`Resource`].
///
/// A resource with no flags set is empty.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ResourceFlags {
    /// I/O port space.
    pub io: bool,
    /// Memory space.
    pub mem: bool,
    /// Memory that may be placed above 4G.
    pub mem_64: bool,
    /// Prefetchable memory.
    pub prefetch: bool,
    /// The resource must be aligned to its size.
    pub size_align: bool,
    /// The resource must be aligned to its `align` value.
    pub start_align: bool,
    /// Read-only memory (expansion ROMs).
    pub readonly: bool,
    #[bits(25)]
    _reserved: u32,
}

impl ResourceFlags {
    /// Returns true if no flags are set.
    pub fn is_empty(&self) -> bool {
        self.into_bits() == 0
    }

    /// The class of window this resource is allocated from.
    pub fn class(&self) -> Option<ResourceClass> {
        if self.io() {
            Some(ResourceClass::Io)
        } else if self.mem() && self.prefetch() {
            Some(ResourceClass::Prefetchable)
        } else if self.mem() {
            Some(ResourceClass::Memory)
        } else {
            None
        }
    }

    /// Returns true if a resource with these flags may be allocated from a
    /// window with flags `window`.
    pub fn fits_in(&self, window: ResourceFlags) -> bool {
        if self.io() {
            window.io()
        } else if self.mem() {
            // Non-prefetchable memory never goes in a prefetchable window.
            window.mem() && (self.prefetch() || !window.prefetch())
        } else {
            false
        }
    }
}

/// The three kinds of bridge window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// I/O port window.
    Io,
    /// Non-prefetchable memory window.
    Memory,
    /// Prefetchable memory window.
    Prefetchable,
}

impl ResourceClass {
    /// All classes, in window index order.
    pub const ALL: [ResourceClass; 3] = [Self::Io, Self::Memory, Self::Prefetchable];

    /// The index of this class's window on a bus.
    pub fn window_index(self) -> usize {
        match self {
            Self::Io => crate::tree::IO_WINDOW,
            Self::Memory => crate::tree::MEMORY_WINDOW,
            Self::Prefetchable => crate::tree::PREFETCH_WINDOW,
        }
    }
}

/// A child range allocated from a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Allocation {
    pub start: u64,
    pub end: u64,
    pub resource: ResourceRef,
}

/// The `(start, end, flags)` triple saved before a failed assignment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// Start address.
    pub start: u64,
    /// Inclusive end address.
    pub end: u64,
    /// Flags.
    pub flags: ResourceFlags,
}

/// An inclusive address range with a type, alignment and placement in the
/// resource tree.
///
/// An unassigned resource has no parent and holds its size as
/// `[0, size - 1]`. Once assigned, `[start, end]` lies within its parent and
/// does not overlap any sibling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    /// Start address (CPU view once assigned).
    pub start: u64,
    /// Inclusive end address.
    pub end: u64,
    /// Type and alignment flags.
    pub flags: ResourceFlags,
    /// Required alignment of `start`.
    pub align: u64,
    /// Highest bus address the resource may decode.
    pub limit: u64,
    /// Optional resources (expansion ROMs) are only sized into windows on
    /// growth passes and never block assignment of other resources.
    pub optional: bool,
    /// Bus-to-CPU address offset. Only set on host bridge windows.
    pub(crate) bus_to_cpu: u64,
    pub(crate) parent: Option<ResourceRef>,
    pub(crate) children: Vec<Allocation>,
}

impl Resource {
    /// Creates an unassigned resource of `size` bytes.
    pub fn unassigned(size: u64, align: u64, flags: ResourceFlags, limit: u64) -> Self {
        Self {
            start: 0,
            end: size.saturating_sub(1),
            flags,
            align,
            limit,
            ..Default::default()
        }
    }

    /// Creates a fixed window, such as a host bridge aperture.
    pub fn window(range: RangeInclusive<u64>, flags: ResourceFlags, bus_to_cpu: u64) -> Self {
        Self {
            start: *range.start(),
            end: *range.end(),
            flags,
            align: 1,
            limit: u64::MAX,
            bus_to_cpu,
            ..Default::default()
        }
    }

    /// Returns true if the resource has no flags and so decodes nothing.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Size in bytes. Zero for empty resources.
    pub fn size(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end.wrapping_sub(self.start).wrapping_add(1)
        }
    }

    /// Returns true if the resource has been placed in the tree.
    pub fn is_assigned(&self) -> bool {
        self.parent.is_some()
    }

    /// The resource this one was allocated from.
    pub fn parent(&self) -> Option<ResourceRef> {
        self.parent
    }

    /// The resources allocated from this one, in address order.
    pub fn children(&self) -> impl Iterator<Item = ResourceRef> + '_ {
        self.children.iter().map(|c| c.resource)
    }

    /// The address range.
    pub fn range(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }

    /// The class of window this resource belongs in.
    pub fn class(&self) -> Option<ResourceClass> {
        self.flags.class()
    }

    pub(crate) fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            start: self.start,
            end: self.end,
            flags: self.flags,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: ResourceSnapshot) {
        self.start = snapshot.start;
        self.end = snapshot.end;
        self.flags = snapshot.flags;
    }

    /// Moves the resource back to `[0, size - 1]`.
    pub(crate) fn unassign(&mut self) {
        let size = self.size();
        self.start = 0;
        self.end = size.saturating_sub(1);
    }

    /// Makes the resource empty. Alignment and limit survive, so restoring a
    /// snapshot brings back a placeable resource.
    pub(crate) fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.flags = ResourceFlags::new();
    }
}

/// Rounds `value` up to a multiple of the power of two `align`.
pub(crate) fn align_up(value: u64, align: u64) -> Option<u64> {
    if align <= 1 {
        return Some(value);
    }
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_classes() {
        let io = ResourceFlags::new().with_io(true);
        let mem = ResourceFlags::new().with_mem(true);
        let pref = mem.with_prefetch(true);

        assert_eq!(io.class(), Some(ResourceClass::Io));
        assert_eq!(mem.class(), Some(ResourceClass::Memory));
        assert_eq!(pref.class(), Some(ResourceClass::Prefetchable));
        assert_eq!(ResourceFlags::new().class(), None);

        assert!(pref.fits_in(mem));
        assert!(pref.fits_in(pref));
        assert!(!mem.fits_in(pref));
        assert!(!io.fits_in(mem));
        assert!(!mem.fits_in(io));
    }

    #[test]
    fn unassigned_holds_size() {
        let r = Resource::unassigned(0x2000, 0x2000, ResourceFlags::new().with_mem(true), !0);
        assert_eq!(r.range(), 0..=0x1fff);
        assert_eq!(r.size(), 0x2000);
        assert!(!r.is_assigned());

        let mut r = r;
        let snapshot = r.snapshot();
        r.reset();
        assert!(r.is_empty());
        assert_eq!(r.size(), 0);
        r.restore(snapshot);
        assert_eq!(r.size(), 0x2000);
        assert_eq!(r.align, 0x2000);
    }

    #[test]
    fn align_up_edges() {
        assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
        assert_eq!(align_up(0x1000, 0x1000), Some(0x1000));
        assert_eq!(align_up(5, 0), Some(5));
        assert_eq!(align_up(u64::MAX, 0x1000), None);
    }
}

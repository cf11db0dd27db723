// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI capability list walking.
//!
//! Both the classic list (rooted at the Capabilities Pointer register) and
//! the PCI Express extended list (rooted at offset 0x100) are linked lists
//! stored in device registers. Nothing guarantees they are well formed, so
//! every walk is bounded by a time-to-live counter supplied by the caller.

use crate::config_access::ConfigAccessor;
use crate::config_access::DevFn;
use crate::spec::caps::CAPABILITY_LIST_START;
use crate::spec::caps::CapabilityId;
use crate::spec::caps::EXTENDED_CAPABILITY_START;
use crate::spec::caps::ExtendedCapabilityHeader;
use crate::spec::caps::ExtendedCapabilityId;
use crate::spec::cfg_space;

/// Default TTL of a classic capability walk: the number of 4-byte entries
/// that fit between 0x40 and 0x100.
pub const CAPABILITY_TTL: u32 = 48;

/// Default TTL of an extended capability walk: the number of 8-byte entries
/// that fit in the extended configuration space.
pub const EXTENDED_CAPABILITY_TTL: u32 = (0x1000 - 0x100) / 8;

/// A classic capability found in configuration space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Capability {
    /// The capability ID.
    pub id: CapabilityId,
    /// Offset of the capability header.
    pub offset: u8,
}

/// An extended capability found in extended configuration space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtendedCapability {
    /// The extended capability ID.
    pub id: ExtendedCapabilityId,
    /// The capability structure version.
    pub version: u8,
    /// Offset of the capability header.
    pub offset: u16,
}

/// Iterator over the classic capability list of one function.
pub struct CapabilityWalker<'a, A: ?Sized> {
    cfg: &'a mut A,
    bus: u8,
    devfn: DevFn,
    pos: u8,
    ttl: u32,
}

impl<'a, A: ConfigAccessor + ?Sized> CapabilityWalker<'a, A> {
    /// Walks the list starting at the Capabilities Pointer register, if the
    /// Status register advertises a capability list.
    pub fn new(cfg: &'a mut A, bus: u8, devfn: DevFn, ttl: u32) -> Self {
        let pos = match cfg.read16(bus, devfn, cfg_space::STATUS) {
            Ok(status) if cfg_space::Status::from_bits(status).capabilities_list() => cfg
                .read8(bus, devfn, cfg_space::CommonHeader::RESERVED_CAP_PTR.0)
                .unwrap_or(0),
            Ok(_) => 0,
            Err(err) => {
                tracing::debug!(
                    bus,
                    %devfn,
                    error = &err as &dyn std::error::Error,
                    "failed to read status register"
                );
                0
            }
        };
        Self::from_pointer(cfg, bus, devfn, pos, ttl)
    }

    /// Walks the list starting at an arbitrary pointer value, e.g. the next
    /// pointer of a capability that was already found.
    pub fn from_pointer(cfg: &'a mut A, bus: u8, devfn: DevFn, pos: u8, ttl: u32) -> Self {
        Self {
            cfg,
            bus,
            devfn,
            pos,
            ttl,
        }
    }
}

impl<A: ConfigAccessor + ?Sized> Iterator for CapabilityWalker<'_, A> {
    type Item = Capability;

    fn next(&mut self) -> Option<Capability> {
        if self.ttl == 0 {
            if self.pos as u16 >= CAPABILITY_LIST_START {
                tracing::warn!(
                    bus = self.bus,
                    devfn = %self.devfn,
                    pos = self.pos,
                    "capability list walk exhausted its ttl"
                );
            }
            return None;
        }
        self.ttl -= 1;

        if (self.pos as u16) < CAPABILITY_LIST_START {
            return None;
        }
        let offset = self.pos & !3;
        let entry = match self.cfg.read16(self.bus, self.devfn, offset as u16) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(
                    bus = self.bus,
                    devfn = %self.devfn,
                    offset,
                    error = &err as &dyn std::error::Error,
                    "capability read failed"
                );
                self.pos = 0;
                return None;
            }
        };
        let id = entry as u8;
        if id == 0xff {
            self.pos = 0;
            return None;
        }
        self.pos = (entry >> 8) as u8;
        Some(Capability {
            id: CapabilityId(id),
            offset,
        })
    }
}

/// Iterator over the extended capability list of one function.
pub struct ExtendedCapabilityWalker<'a, A: ?Sized> {
    cfg: &'a mut A,
    bus: u8,
    devfn: DevFn,
    pos: u16,
    ttl: u32,
}

impl<'a, A: ConfigAccessor + ?Sized> ExtendedCapabilityWalker<'a, A> {
    /// Walks the list starting at offset 0x100.
    pub fn new(cfg: &'a mut A, bus: u8, devfn: DevFn, ttl: u32) -> Self {
        Self {
            cfg,
            bus,
            devfn,
            pos: EXTENDED_CAPABILITY_START,
            ttl,
        }
    }
}

impl<A: ConfigAccessor + ?Sized> Iterator for ExtendedCapabilityWalker<'_, A> {
    type Item = ExtendedCapability;

    fn next(&mut self) -> Option<ExtendedCapability> {
        if self.pos < EXTENDED_CAPABILITY_START {
            return None;
        }
        if self.ttl == 0 {
            tracing::warn!(
                bus = self.bus,
                devfn = %self.devfn,
                pos = self.pos,
                "extended capability list walk exhausted its ttl"
            );
            return None;
        }
        self.ttl -= 1;

        let offset = self.pos & !3;
        let header = match self.cfg.read32(self.bus, self.devfn, offset) {
            Ok(header) => header,
            Err(_) => {
                // Conventional PCI functions have no extended space.
                self.pos = 0;
                return None;
            }
        };
        // An all-zero header means there are no extended capabilities; an
        // all-ones header means nothing is decoding extended space.
        if header == 0 || header == !0 {
            self.pos = 0;
            return None;
        }
        let header = ExtendedCapabilityHeader::from_bits(header);
        self.pos = header.next_offset();
        Some(ExtendedCapability {
            id: ExtendedCapabilityId(header.capability_id()),
            version: header.version(),
            offset,
        })
    }
}

/// Finds the first classic capability with the given ID.
pub fn find_capability<A: ConfigAccessor + ?Sized>(
    cfg: &mut A,
    bus: u8,
    devfn: DevFn,
    id: CapabilityId,
) -> Option<u8> {
    CapabilityWalker::new(cfg, bus, devfn, CAPABILITY_TTL)
        .find(|cap| cap.id == id)
        .map(|cap| cap.offset)
}

/// Finds the next classic capability with the given ID after the capability
/// at `after`.
pub fn find_next_capability<A: ConfigAccessor + ?Sized>(
    cfg: &mut A,
    bus: u8,
    devfn: DevFn,
    after: u8,
    id: CapabilityId,
) -> Option<u8> {
    let next = cfg.read8(bus, devfn, after as u16 + 1).ok()?;
    CapabilityWalker::from_pointer(cfg, bus, devfn, next, CAPABILITY_TTL)
        .find(|cap| cap.id == id)
        .map(|cap| cap.offset)
}

/// Finds the first extended capability with the given ID.
pub fn find_extended_capability<A: ConfigAccessor + ?Sized>(
    cfg: &mut A,
    bus: u8,
    devfn: DevFn,
    id: ExtendedCapabilityId,
) -> Option<u16> {
    ExtendedCapabilityWalker::new(cfg, bus, devfn, EXTENDED_CAPABILITY_TTL)
        .find(|cap| cap.id == id)
        .map(|cap| cap.offset)
}

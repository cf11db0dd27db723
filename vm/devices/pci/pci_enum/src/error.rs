// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Enumeration and allocation errors.

use crate::tree::ResourceRef;
use pci_core::ConfigAccessError;
use pci_core::DevFn;
use std::fmt;
use thiserror::Error;

/// Why a BAR could not be decoded into a usable resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarRejectReason {
    /// The writable bits contain no size information.
    NoSizeBits,
    /// A 64-bit BAR occupies the last BAR register, so it has no upper half.
    NoUpperHalf,
    /// The BAR's size or address does not fit the platform address width.
    AddressWidth,
    /// The BAR requires an alignment larger than any window can provide.
    AlignmentTooLarge,
}

impl fmt::Display for BarRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoSizeBits => "no size bits",
            Self::NoUpperHalf => "64-bit bar in the last bar register",
            Self::AddressWidth => "exceeds the platform address width",
            Self::AlignmentTooLarge => "alignment too large",
        };
        f.write_str(s)
    }
}

/// Errors produced while enumerating buses and assigning resources.
///
/// Apart from [`PciError::RetryBudgetExhausted`], these are absorbed and
/// logged where they occur; they never abort enumeration of other devices.
#[derive(Debug, Error)]
pub enum PciError {
    /// No function responded at the address.
    #[error("no device at {bus:02x}:{devfn}")]
    DeviceAbsent {
        /// Bus number.
        bus: u8,
        /// Device/function number.
        devfn: DevFn,
    },
    /// The function kept returning configuration request retry status, or
    /// the access timed out.
    #[error("configuration access to {bus:02x}:{devfn} timed out")]
    ConfigAccessTimeout {
        /// Bus number.
        bus: u8,
        /// Device/function number.
        devfn: DevFn,
    },
    /// A persistent fabric error. Enumeration of the rest of the bus stops.
    #[error("bus error accessing {bus:02x}:{devfn}")]
    BusAccess {
        /// Bus number.
        bus: u8,
        /// Device/function number.
        devfn: DevFn,
        /// The accessor error.
        #[source]
        source: ConfigAccessError,
    },
    /// The bridge's bus numbers are inconsistent with its position.
    #[error(
        "bridge {bus:02x}:{devfn} has inconsistent bus numbers \
         (primary {primary:#04x}, secondary {secondary:#04x}, subordinate {subordinate:#04x})"
    )]
    MalformedBridge {
        /// Bus number of the bridge.
        bus: u8,
        /// Device/function number of the bridge.
        devfn: DevFn,
        /// Programmed primary bus number.
        primary: u8,
        /// Programmed secondary bus number.
        secondary: u8,
        /// Programmed subordinate bus number.
        subordinate: u8,
    },
    /// No bus number is left for the bridge's secondary bus.
    #[error("no bus numbers left for bridge {bus:02x}:{devfn}")]
    BusNumbersExhausted {
        /// Bus number of the bridge.
        bus: u8,
        /// Device/function number of the bridge.
        devfn: DevFn,
    },
    /// A BAR was rejected at decode time and left unassigned.
    #[error("bar at {bus:02x}:{devfn} offset {offset:#x} rejected: {reason}")]
    BarDecodeRejected {
        /// Bus number.
        bus: u8,
        /// Device/function number.
        devfn: DevFn,
        /// Register offset of the BAR.
        offset: u16,
        /// Why the BAR was rejected.
        reason: BarRejectReason,
    },
    /// No window had a suitably aligned gap for the resource.
    #[error("no space for {resource:?} (size {size:#x}, align {align:#x})")]
    NoFit {
        /// The resource that did not fit.
        resource: ResourceRef,
        /// Requested size.
        size: u64,
        /// Requested alignment.
        align: u64,
    },
    /// Every allowed reallocation pass was used and some resources remain
    /// unassigned. The rest of the tree is usable.
    #[error("resource assignment gave up with {} resources unassigned", unassigned.len())]
    RetryBudgetExhausted {
        /// The resources left unassigned.
        unassigned: Vec<ResourceRef>,
    },
}

/// Errors parsing a resource alignment override string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlignmentOverrideError {
    /// The alignment order is not a number, or too large.
    #[error("invalid alignment order {0:?}")]
    InvalidOrder(String),
    /// The device address is not `bus:dev.fn`.
    #[error("invalid device address {0:?}")]
    InvalidAddress(String),
    /// The device ID is not `pci:vendor:device`.
    #[error("invalid device id {0:?}")]
    InvalidId(String),
}

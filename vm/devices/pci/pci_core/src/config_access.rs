// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration space access.
//!
//! [`ConfigAccessor`] is the platform mechanism (ECAM, port 0xCF8/0xCFC,
//! firmware call, or a simulation) through which every register of every
//! function is read and written. Everything above it treats it as opaque.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Size of the conventional PCI configuration space.
pub const CONFIG_SPACE_SIZE: u16 = 0x100;
/// Size of the PCI Express extended configuration space.
pub const EXTENDED_CONFIG_SPACE_SIZE: u16 = 0x1000;

const DEVFN_DEVICE_SHIFT: u8 = 3;
const DEVFN_FUNCTION_MASK: u8 = 0x7;

/// Number of device slots on a bus.
pub const DEVICES_PER_BUS: u8 = 32;
/// Number of functions per device without ARI.
pub const FUNCTIONS_PER_DEVICE: u8 = 8;

/// The device/function number of a function on a bus.
///
/// Without ARI the high 5 bits are the device number and the low 3 bits are
/// the function number. With ARI the whole byte is the function number of
/// device 0.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DevFn(u8);

impl DevFn {
    /// Builds a devfn from a device number (0..32) and a function number
    /// (0..8). Out of range bits are discarded.
    pub const fn new(device: u8, function: u8) -> Self {
        Self(((device & 0x1f) << DEVFN_DEVICE_SHIFT) | (function & DEVFN_FUNCTION_MASK))
    }

    /// Wraps a raw 8-bit devfn value.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// The raw 8-bit value.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// The device (slot) number.
    pub const fn device(self) -> u8 {
        self.0 >> DEVFN_DEVICE_SHIFT
    }

    /// The function number.
    pub const fn function(self) -> u8 {
        self.0 & DEVFN_FUNCTION_MASK
    }
}

impl fmt::Display for DevFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{}", self.device(), self.function())
    }
}

impl fmt::Debug for DevFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A full bus/device/function address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bdf {
    /// Bus number.
    pub bus: u8,
    /// Device and function number.
    pub devfn: DevFn,
}

impl Bdf {
    /// Creates a new address.
    pub const fn new(bus: u8, devfn: DevFn) -> Self {
        Self { bus, devfn }
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{}", self.bus, self.devfn)
    }
}

impl fmt::Debug for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error returned by a [`ConfigAccessor`].
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum ConfigAccessError {
    /// The function did not complete the access in time.
    #[error("configuration access timed out")]
    Timeout,
    /// The fabric reported a persistent error (e.g. a master abort storm or a
    /// dead link). Further accesses on the same bus are unlikely to succeed.
    #[error("configuration access bus error")]
    BusError,
    /// The register offset is outside of the configuration space.
    #[error("invalid configuration space offset {0:#x}")]
    InvalidOffset(u16),
    /// The register offset is not aligned to the access width.
    #[error("unaligned {width}-byte configuration access at {offset:#x}")]
    Unaligned {
        /// The requested offset.
        offset: u16,
        /// The access width in bytes.
        width: u16,
    },
}

/// Checks that an access of `width` bytes at `offset` is naturally aligned
/// and inside the extended configuration space.
pub fn check_access(offset: u16, width: u16) -> Result<(), ConfigAccessError> {
    if offset >= EXTENDED_CONFIG_SPACE_SIZE {
        return Err(ConfigAccessError::InvalidOffset(offset));
    }
    if !offset.is_multiple_of(width) {
        return Err(ConfigAccessError::Unaligned { offset, width });
    }
    Ok(())
}

/// Byte/word/dword access to the configuration registers of any function.
///
/// Implementors must provide the dword accessors; byte and word accesses
/// default to the containing dword (writes are read-modify-write, which is
/// fine for every register the enumerator touches).
pub trait ConfigAccessor {
    /// Reads the dword at `offset` of function `devfn` on `bus`.
    fn read32(&mut self, bus: u8, devfn: DevFn, offset: u16) -> Result<u32, ConfigAccessError>;

    /// Writes the dword at `offset` of function `devfn` on `bus`.
    fn write32(
        &mut self,
        bus: u8,
        devfn: DevFn,
        offset: u16,
        value: u32,
    ) -> Result<(), ConfigAccessError>;

    /// Reads the word at `offset`.
    fn read16(&mut self, bus: u8, devfn: DevFn, offset: u16) -> Result<u16, ConfigAccessError> {
        check_access(offset, 2)?;
        let dword = self.read32(bus, devfn, offset & !3)?;
        Ok((dword >> ((offset & 2) * 8)) as u16)
    }

    /// Reads the byte at `offset`.
    fn read8(&mut self, bus: u8, devfn: DevFn, offset: u16) -> Result<u8, ConfigAccessError> {
        check_access(offset, 1)?;
        let dword = self.read32(bus, devfn, offset & !3)?;
        Ok((dword >> ((offset & 3) * 8)) as u8)
    }

    /// Writes the word at `offset`.
    fn write16(
        &mut self,
        bus: u8,
        devfn: DevFn,
        offset: u16,
        value: u16,
    ) -> Result<(), ConfigAccessError> {
        check_access(offset, 2)?;
        let shift = (offset & 2) * 8;
        let dword = self.read32(bus, devfn, offset & !3)?;
        let dword = (dword & !(0xffff << shift)) | ((value as u32) << shift);
        self.write32(bus, devfn, offset & !3, dword)
    }

    /// Writes the byte at `offset`.
    fn write8(
        &mut self,
        bus: u8,
        devfn: DevFn,
        offset: u16,
        value: u8,
    ) -> Result<(), ConfigAccessError> {
        check_access(offset, 1)?;
        let shift = (offset & 3) * 8;
        let dword = self.read32(bus, devfn, offset & !3)?;
        let dword = (dword & !(0xff << shift)) | ((value as u32) << shift);
        self.write32(bus, devfn, offset & !3, dword)
    }

    /// Waits for `duration` before the next access, e.g. while a function is
    /// returning Configuration Request Retry Status.
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<T: ConfigAccessor + ?Sized> ConfigAccessor for &mut T {
    fn read32(&mut self, bus: u8, devfn: DevFn, offset: u16) -> Result<u32, ConfigAccessError> {
        (**self).read32(bus, devfn, offset)
    }

    fn write32(
        &mut self,
        bus: u8,
        devfn: DevFn,
        offset: u16,
        value: u32,
    ) -> Result<(), ConfigAccessError> {
        (**self).write32(bus, devfn, offset, value)
    }

    fn read16(&mut self, bus: u8, devfn: DevFn, offset: u16) -> Result<u16, ConfigAccessError> {
        (**self).read16(bus, devfn, offset)
    }

    fn read8(&mut self, bus: u8, devfn: DevFn, offset: u16) -> Result<u8, ConfigAccessError> {
        (**self).read8(bus, devfn, offset)
    }

    fn write16(
        &mut self,
        bus: u8,
        devfn: DevFn,
        offset: u16,
        value: u16,
    ) -> Result<(), ConfigAccessError> {
        (**self).write16(bus, devfn, offset, value)
    }

    fn write8(
        &mut self,
        bus: u8,
        devfn: DevFn,
        offset: u16,
        value: u8,
    ) -> Result<(), ConfigAccessError> {
        (**self).write8(bus, devfn, offset, value)
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }
}

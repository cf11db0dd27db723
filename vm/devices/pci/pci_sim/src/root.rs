// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A simulated root complex: the [`ConfigAccessor`] that the enumerator
//! drives in tests.

use crate::bridge::SimBridge;
use crate::bridge::SimBus;
use crate::bridge::SimDevice;
use crate::function::SimFunction;
use pci_core::Bdf;
use pci_core::ConfigAccessError;
use pci_core::ConfigAccessor;
use pci_core::DevFn;
use pci_core::config_access::check_access;
use std::time::Duration;

/// A configuration write observed by the root complex.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConfigWrite {
    /// Target function.
    pub bdf: Bdf,
    /// Dword-aligned register offset.
    pub offset: u16,
    /// Value written.
    pub value: u32,
}

/// A root complex with a single root bus.
///
/// Accesses to functions that do not exist read as all-ones and writes to
/// them are dropped. Time passes only through [`ConfigAccessor::delay`].
pub struct SimRootComplex {
    bus_number: u8,
    bus: SimBus,
    elapsed: Duration,
    write_log: Vec<ConfigWrite>,
}

impl SimRootComplex {
    /// Creates an empty root complex whose root bus is `bus_number`.
    pub fn new(bus_number: u8) -> Self {
        Self {
            bus_number,
            bus: SimBus::default(),
            elapsed: Duration::ZERO,
            write_log: Vec::new(),
        }
    }

    /// Attaches `device` to the root bus at `devfn`.
    pub fn add(&mut self, devfn: DevFn, device: impl Into<SimDevice>) -> anyhow::Result<()> {
        self.bus.add(devfn, device)
    }

    /// Builder variant of [`Self::add`].
    pub fn with_device(
        mut self,
        devfn: DevFn,
        device: impl Into<SimDevice>,
    ) -> anyhow::Result<Self> {
        self.add(devfn, device)?;
        Ok(self)
    }

    /// The root bus number.
    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    /// The root bus segment.
    pub fn root_bus(&self) -> &SimBus {
        &self.bus
    }

    /// The root bus segment.
    pub fn root_bus_mut(&mut self) -> &mut SimBus {
        &mut self.bus
    }

    /// Looks up a bridge by the path of devfns leading to it from the root
    /// bus.
    pub fn bridge(&self, path: &[DevFn]) -> Option<&SimBridge> {
        let (&first, rest) = path.split_first()?;
        let mut bridge = self.bus.bridge(first)?;
        for &devfn in rest {
            bridge = bridge.downstream().bridge(devfn)?;
        }
        Some(bridge)
    }

    /// Mutable variant of [`Self::bridge`].
    pub fn bridge_mut(&mut self, path: &[DevFn]) -> Option<&mut SimBridge> {
        let (&first, rest) = path.split_first()?;
        let mut bridge = self.bus.bridge_mut(first)?;
        for &devfn in rest {
            bridge = bridge.downstream_mut().bridge_mut(devfn)?;
        }
        Some(bridge)
    }

    /// Looks up a function by the path of bridge devfns leading to its bus,
    /// followed by its own devfn.
    pub fn function(&self, path: &[DevFn]) -> Option<&SimFunction> {
        let (&last, bridges) = path.split_last()?;
        if bridges.is_empty() {
            self.bus.function(last)
        } else {
            self.bridge(bridges)?.downstream().function(last)
        }
    }

    /// Total time spent in [`ConfigAccessor::delay`].
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Every configuration write accepted so far, in order.
    pub fn write_log(&self) -> &[ConfigWrite] {
        &self.write_log
    }

    /// Clears the write log.
    pub fn clear_write_log(&mut self) {
        self.write_log.clear();
    }
}

impl ConfigAccessor for SimRootComplex {
    fn read32(&mut self, bus: u8, devfn: DevFn, offset: u16) -> Result<u32, ConfigAccessError> {
        check_access(offset, 4)?;
        match self.bus.route_read(self.bus_number, bus, devfn, offset) {
            Some(result) => result,
            None => Ok(!0),
        }
    }

    fn write32(
        &mut self,
        bus: u8,
        devfn: DevFn,
        offset: u16,
        value: u32,
    ) -> Result<(), ConfigAccessError> {
        check_access(offset, 4)?;
        match self
            .bus
            .route_write(self.bus_number, bus, devfn, offset, value)
        {
            Some(result) => {
                result?;
                self.write_log.push(ConfigWrite {
                    bdf: Bdf::new(bus, devfn),
                    offset,
                    value,
                });
                Ok(())
            }
            None => {
                tracing::trace!(bus, %devfn, offset, "write to absent function dropped");
                Ok(())
            }
        }
    }

    fn delay(&mut self, duration: Duration) {
        self.elapsed += duration;
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core PCI infrastructure shared by the enumerator and the simulated
//! fabric: register definitions, the configuration space access interface,
//! and capability list walking.

#![forbid(unsafe_code)]

pub mod capabilities;
pub mod config_access;
pub mod spec;

pub use config_access::Bdf;
pub use config_access::ConfigAccessError;
pub use config_access::ConfigAccessor;
pub use config_access::DevFn;

/// The four legacy INTx pins, as encoded in the Interrupt Pin register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PciInterruptPin {
    /// INTA#
    IntA = 1,
    /// INTB#
    IntB = 2,
    /// INTC#
    IntC = 3,
    /// INTD#
    IntD = 4,
}

impl PciInterruptPin {
    /// Decodes the Interrupt Pin register. Zero (no pin) and reserved values
    /// decode to `None`.
    pub fn from_register(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::IntA),
            2 => Some(Self::IntB),
            3 => Some(Self::IntC),
            4 => Some(Self::IntD),
            _ => None,
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A simulated PCI fabric for exercising bus enumeration.
//!
//! Functions, bridges and buses are modelled at the register level: BARs
//! report their size when written with all-ones, bridges route type 1
//! configuration cycles by their programmed bus numbers, and windows decode
//! from their base/limit registers. The root complex implements
//! [`pci_core::ConfigAccessor`].

#![forbid(unsafe_code)]

pub mod bridge;
pub mod capabilities;
mod config_space;
pub mod function;
pub mod root;
pub mod test_helpers;

pub use bridge::IoDecode;
pub use bridge::PrefetchDecode;
pub use bridge::SimBridge;
pub use bridge::SimBus;
pub use bridge::SimDevice;
pub use config_space::BarKind;
pub use function::SimFunction;
pub use root::ConfigWrite;
pub use root::SimRootComplex;

/// Vendor ID used by the simulated devices.
pub const VENDOR_ID: u16 = 0x1414;

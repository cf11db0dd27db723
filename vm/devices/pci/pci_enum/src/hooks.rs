// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device quirk hooks and enumeration event listeners.

use crate::tree::BusId;
use crate::tree::Device;
use crate::tree::DeviceId;
use crate::tree::PciTree;
use crate::tree::ResourceRef;
use pci_core::ConfigAccessor;

/// The point in enumeration at which a [`QuirkHook`] runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QuirkPhase {
    /// After the device's header, BARs and capabilities were read.
    AfterProbe,
    /// After the windows of the device's bus were sized.
    AfterSize,
    /// After the final assignment pass.
    AfterAssign,
}

/// Device-specific fixups applied at well-defined points of enumeration.
pub trait QuirkHook {
    /// Called once per device for each phase.
    fn fixup(&mut self, phase: QuirkPhase, cfg: &mut dyn ConfigAccessor, device: &mut Device);
}

impl<F> QuirkHook for F
where
    F: FnMut(QuirkPhase, &mut dyn ConfigAccessor, &mut Device),
{
    fn fixup(&mut self, phase: QuirkPhase, cfg: &mut dyn ConfigAccessor, device: &mut Device) {
        self(phase, cfg, device)
    }
}

/// Receives enumeration events.
pub trait EventListener {
    /// A bus was added to the tree.
    fn bus_added(&mut self, tree: &PciTree, bus: BusId) {
        let _ = (tree, bus);
    }

    /// A device was added to the tree.
    fn device_added(&mut self, tree: &PciTree, device: DeviceId) {
        let _ = (tree, device);
    }

    /// Resource assignment finished for a device.
    fn resources_assigned(&mut self, tree: &PciTree, device: DeviceId) {
        let _ = (tree, device);
    }

    /// A resource of a device was left unassigned.
    fn assignment_failed(&mut self, tree: &PciTree, device: DeviceId, resource: ResourceRef) {
        let _ = (tree, device, resource);
    }
}

impl<T: EventListener + ?Sized> EventListener for &mut T {
    fn bus_added(&mut self, tree: &PciTree, bus: BusId) {
        (**self).bus_added(tree, bus)
    }

    fn device_added(&mut self, tree: &PciTree, device: DeviceId) {
        (**self).device_added(tree, device)
    }

    fn resources_assigned(&mut self, tree: &PciTree, device: DeviceId) {
        (**self).resources_assigned(tree, device)
    }

    fn assignment_failed(&mut self, tree: &PciTree, device: DeviceId, resource: ResourceRef) {
        (**self).assignment_failed(tree, device, resource)
    }
}

/// The quirks and listeners attached to an enumeration run.
#[derive(Default)]
pub struct Hooks<'a> {
    quirks: Vec<Box<dyn QuirkHook + 'a>>,
    listeners: Vec<Box<dyn EventListener + 'a>>,
}

impl<'a> Hooks<'a> {
    /// Creates an empty set of hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a quirk hook.
    pub fn with_quirk(mut self, quirk: impl QuirkHook + 'a) -> Self {
        self.quirks.push(Box::new(quirk));
        self
    }

    /// Adds an event listener.
    pub fn with_listener(mut self, listener: impl EventListener + 'a) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub(crate) fn run_quirks(
        &mut self,
        phase: QuirkPhase,
        cfg: &mut dyn ConfigAccessor,
        device: &mut Device,
    ) {
        for quirk in &mut self.quirks {
            quirk.fixup(phase, cfg, device);
        }
    }

    pub(crate) fn bus_added(&mut self, tree: &PciTree, bus: BusId) {
        for l in &mut self.listeners {
            l.bus_added(tree, bus);
        }
    }

    pub(crate) fn device_added(&mut self, tree: &PciTree, device: DeviceId) {
        for l in &mut self.listeners {
            l.device_added(tree, device);
        }
    }

    pub(crate) fn resources_assigned(&mut self, tree: &PciTree, device: DeviceId) {
        for l in &mut self.listeners {
            l.resources_assigned(tree, device);
        }
    }

    pub(crate) fn assignment_failed(
        &mut self,
        tree: &PciTree,
        device: DeviceId,
        resource: ResourceRef,
    ) {
        for l in &mut self.listeners {
            l.assignment_failed(tree, device, resource);
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI bus enumeration and resource allocation.
//!
//! [`Enumerator`] walks a PCI hierarchy through a [`ConfigAccessor`], builds
//! a [`PciTree`] of buses and devices, and assigns conflict-free I/O and
//! memory ranges to every BAR and bridge window, retrying with released and
//! regrown windows when the first layout does not fit.
//!
//! ```no_run
//! # use pci_core::ConfigAccessor;
//! # fn run(cfg: &mut dyn ConfigAccessor) {
//! use pci_enum::AllocationPolicy;
//! use pci_enum::HostBridgeWindow;
//! use pci_enum::Hooks;
//! use pci_enum::PlatformResourcePool;
//! use pci_enum::WindowKind;
//!
//! let pool = PlatformResourcePool {
//!     root_bus: 0,
//!     windows: vec![HostBridgeWindow {
//!         kind: WindowKind::Memory,
//!         range: 0xc000_0000..=0xdfff_ffff,
//!         bus_to_cpu: 0,
//!     }],
//! };
//! let policy = AllocationPolicy::default();
//! let enumeration = pci_enum::enumerate(cfg, &pool, &policy, Hooks::new());
//! if let Err(err) = &enumeration.result {
//!     eprintln!("some resources are unassigned: {err}");
//! }
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod assign;
pub mod bar;
pub mod error;
pub mod hooks;
pub mod policy;
pub mod realloc;
pub mod resource;
pub mod scan;
pub mod size;
pub mod tree;

pub use error::AlignmentOverrideError;
pub use error::BarRejectReason;
pub use error::PciError;
pub use hooks::EventListener;
pub use hooks::Hooks;
pub use hooks::QuirkHook;
pub use hooks::QuirkPhase;
pub use policy::AllocationPolicy;
pub use policy::ReallocPolicy;
pub use realloc::AssignmentReport;
pub use realloc::ReleaseType;
pub use realloc::RetryState;
pub use resource::Resource;
pub use resource::ResourceClass;
pub use resource::ResourceFlags;
pub use tree::BusId;
pub use tree::DeviceId;
pub use tree::HostBridgeWindow;
pub use tree::PciTree;
pub use tree::PlatformResourcePool;
pub use tree::ResourceRef;
pub use tree::WindowKind;

use pci_core::ConfigAccessor;
use std::collections::HashSet;

/// Drives scanning and resource assignment against one configuration
/// space.
///
/// The enumerator holds exclusive access to the accessor for its lifetime;
/// callers serialize it against any other configuration traffic.
pub struct Enumerator<'a> {
    cfg: &'a mut dyn ConfigAccessor,
    policy: &'a AllocationPolicy,
    hooks: Hooks<'a>,
}

/// The result of [`enumerate`].
#[derive(Debug)]
pub struct Enumeration {
    /// The enumerated hierarchy. Complete even if assignment failed.
    pub tree: PciTree,
    /// The outcome of resource assignment.
    pub result: Result<AssignmentReport, PciError>,
}

impl<'a> Enumerator<'a> {
    /// Creates an enumerator with no hooks.
    pub fn new(cfg: &'a mut dyn ConfigAccessor, policy: &'a AllocationPolicy) -> Self {
        Self {
            cfg,
            policy,
            hooks: Hooks::new(),
        }
    }

    /// Attaches quirks and event listeners.
    pub fn with_hooks(mut self, hooks: Hooks<'a>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Scans the hierarchy below the pool's root bus, claims firmware
    /// assignments and assigns everything else.
    pub fn enumerate(&mut self, pool: &PlatformResourcePool) -> Enumeration {
        let mut tree = PciTree::new(pool);
        let root = tree.root();
        tracing::debug!(root_bus = pool.root_bus, "enumerating");
        let max = self.scan_bus(&mut tree, root);
        tree.bus_mut(root).subordinate = max;
        tracing::info!(
            buses = tree.bus_count(),
            devices = tree.device_count(),
            "scan complete"
        );
        self.claim_firmware(&mut tree);
        let result = self.assign_resources(&mut tree);
        Enumeration { tree, result }
    }

    /// Scans for devices that are not yet in `tree` and assigns their
    /// resources in a single pass. Windows that are already assigned are not
    /// moved, so new devices must fit in the space left behind their
    /// bridges.
    ///
    /// Returns the devices that were added. Resources that did not fit are
    /// reported through
    /// [`EventListener::assignment_failed`] and
    /// [`PciError::RetryBudgetExhausted`].
    pub fn rescan(&mut self, tree: &mut PciTree) -> Result<Vec<DeviceId>, PciError> {
        let known: HashSet<DeviceId> = tree.device_ids().into_iter().collect();
        let root = tree.root();
        let max = self.scan_bus(tree, root);
        tree.bus_mut(root).subordinate = max;

        let added: Vec<DeviceId> = tree
            .device_ids()
            .into_iter()
            .filter(|id| !known.contains(id))
            .collect();
        if added.is_empty() {
            tracing::debug!("rescan found no new devices");
            return Ok(added);
        }
        tracing::info!(count = added.len(), "rescan found new devices");

        self.claim_firmware(tree);
        self.size_bridges(tree, root, true);
        let mut failed = Vec::new();
        self.assign_bus(tree, root, true, &mut failed);
        let unassigned = self.give_up(tree, &failed);
        self.finish(tree, &added);
        if unassigned.is_empty() {
            Ok(added)
        } else {
            Err(PciError::RetryBudgetExhausted { unassigned })
        }
    }
}

/// Enumerates the hierarchy behind `pool` and assigns its resources.
///
/// Per-device failures are logged and skipped. The returned tree is always
/// complete; `result` reports whether every resource could be placed.
pub fn enumerate<'a>(
    cfg: &'a mut dyn ConfigAccessor,
    pool: &PlatformResourcePool,
    policy: &'a AllocationPolicy,
    hooks: Hooks<'a>,
) -> Enumeration {
    Enumerator::new(cfg, policy).with_hooks(hooks).enumerate(pool)
}

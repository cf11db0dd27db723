// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The release/retry coordinator.
//!
//! Assignment runs as a sequence of passes. When a pass leaves resources
//! unplaced, the bridge windows around them are released so the next pass
//! can size them again, this time including optional resources. The number
//! of passes is bounded by the depth of the tree.

use crate::Enumerator;
use crate::assign::FailedResource;
use crate::error::PciError;
use crate::policy::ReallocPolicy;
use crate::resource::ResourceClass;
use crate::tree::BusId;
use crate::tree::PciTree;
use crate::tree::ResourceRef;

/// How much of the hierarchy a failed pass releases.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReleaseType {
    /// Only windows of bridges without bridges below them.
    LeafOnly,
    /// Windows of every bridge at and below the failing bus.
    WholeSubtree,
}

/// States of the coordinator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RetryState {
    /// Bridge windows are being sized.
    Sizing {
        /// Zero-based pass number.
        pass: u32,
    },
    /// Resources are being placed.
    Assigning {
        /// Zero-based pass number.
        pass: u32,
    },
    /// The pass left resources unplaced.
    PartialFailure {
        /// Zero-based pass number.
        pass: u32,
    },
    /// Windows around the failures are being released.
    Releasing {
        /// The pass that failed.
        pass: u32,
        /// How much to release.
        release: ReleaseType,
    },
    /// Every resource was placed.
    Success,
    /// The pass budget ran out.
    GiveUp,
}

impl RetryState {
    /// The state after this one, given the number of resources the last
    /// assignment pass failed to place and the pass budget.
    pub fn next(self, failures: usize, budget: u32) -> Self {
        match self {
            Self::Sizing { pass } => Self::Assigning { pass },
            Self::Assigning { .. } if failures == 0 => Self::Success,
            Self::Assigning { pass } => Self::PartialFailure { pass },
            Self::PartialFailure { pass } if pass + 1 >= budget => Self::GiveUp,
            Self::PartialFailure { pass } => Self::Releasing {
                pass,
                // The first retry only frees leaf bridges.
                release: if pass == 0 {
                    ReleaseType::LeafOnly
                } else {
                    ReleaseType::WholeSubtree
                },
            },
            Self::Releasing { pass, .. } => Self::Sizing { pass: pass + 1 },
            Self::Success | Self::GiveUp => self,
        }
    }
}

/// The outcome of a successful assignment run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AssignmentReport {
    /// Number of assignment passes run.
    pub passes: u32,
    /// Reallocation was enabled for the run.
    pub realloc: bool,
}

/// Returns true if a device behind a bridge has a required resource that
/// firmware did not place inside the bridge's windows.
fn realloc_detect(tree: &PciTree) -> bool {
    let mut unplaced = false;
    tree.for_each_device(|_, device| {
        if tree.bus(device.bus()).is_root() {
            return;
        }
        unplaced |= device
            .resources
            .iter()
            .any(|res| !res.is_empty() && !res.optional && !res.is_assigned());
    });
    unplaced
}

impl Enumerator<'_> {
    /// Sizes and assigns every unassigned resource in the tree, releasing
    /// and retrying on failure.
    ///
    /// Resources still unplaced when the pass budget runs out are restored
    /// to their pre-assignment state, reported through
    /// [`EventListener::assignment_failed`](crate::EventListener::assignment_failed)
    /// and returned in [`PciError::RetryBudgetExhausted`]. The rest of the
    /// tree is assigned and usable either way.
    pub fn assign_resources(&mut self, tree: &mut PciTree) -> Result<AssignmentReport, PciError> {
        let root = tree.root();
        let realloc = match self.policy.realloc {
            ReallocPolicy::Off => false,
            ReallocPolicy::On => true,
            ReallocPolicy::Auto => realloc_detect(tree),
        };
        let budget = self.policy.pass_budget(tree.max_depth(root), realloc);
        tracing::debug!(realloc, budget, "assigning resources");

        let mut state = RetryState::Sizing { pass: 0 };
        let mut failed: Vec<FailedResource> = Vec::new();
        let mut passes = 0;
        loop {
            match state {
                RetryState::Sizing { pass } => {
                    self.size_bridges(tree, root, pass > 0);
                }
                RetryState::Assigning { pass } => {
                    failed.clear();
                    self.assign_bus(tree, root, pass > 0, &mut failed);
                    passes = pass + 1;
                }
                RetryState::PartialFailure { pass } => {
                    tracing::debug!(pass, failures = failed.len(), "assignment pass incomplete");
                }
                RetryState::Releasing { release, .. } => {
                    self.release_failed(tree, &failed, release);
                }
                RetryState::Success => {
                    let devices = tree.device_ids();
                    self.finish(tree, &devices);
                    tracing::info!(passes, realloc, "resource assignment complete");
                    return Ok(AssignmentReport { passes, realloc });
                }
                RetryState::GiveUp => {
                    let unassigned = self.give_up(tree, &failed);
                    let devices = tree.device_ids();
                    self.finish(tree, &devices);
                    let err = PciError::RetryBudgetExhausted { unassigned };
                    tracing::info!(
                        passes,
                        realloc,
                        error = &err as &dyn std::error::Error,
                        "resource assignment incomplete"
                    );
                    return Err(err);
                }
            }
            state = state.next(failed.len(), budget);
        }
    }

    /// Releases the windows around each failure and puts the failed device
    /// resources back into their pre-assignment state. Failed windows stay
    /// empty to be sized again.
    fn release_failed(
        &mut self,
        tree: &mut PciTree,
        failed: &[FailedResource],
        release: ReleaseType,
    ) {
        for f in failed {
            if let Some(class) = f.class {
                self.release_bus(tree, f.bus, class, release);
            }
        }
        for f in failed {
            if let ResourceRef::Bar { .. } = f.resource {
                if let Some(res) = tree.resource_mut(f.resource) {
                    res.restore(f.snapshot);
                }
            }
        }
    }

    fn release_bus(
        &mut self,
        tree: &mut PciTree,
        bus: BusId,
        class: ResourceClass,
        release: ReleaseType,
    ) {
        let children = tree.bus(bus).children().to_vec();
        let leaf = children.is_empty();
        if release == ReleaseType::WholeSubtree {
            for child in children {
                self.release_bus(tree, child, class, release);
            }
        }
        if tree.bus(bus).is_root() || !(leaf || release == ReleaseType::WholeSubtree) {
            return;
        }

        let r = ResourceRef::Window {
            bus,
            index: class.window_index(),
        };
        if !tree.resource(r).is_some_and(|res| res.is_assigned()) {
            return;
        }
        tree.release_subtree(r);
        if let Some(res) = tree.resource_mut(r) {
            res.reset();
        }
        tracing::debug!(bus = tree.bus(bus).number(), ?class, "released bridge window");
        self.program_bridge(tree, bus);
    }

    /// Restores every failed resource and reports it.
    pub(crate) fn give_up(
        &mut self,
        tree: &mut PciTree,
        failed: &[FailedResource],
    ) -> Vec<ResourceRef> {
        let mut unassigned = Vec::with_capacity(failed.len());
        for f in failed {
            if let Some(res) = tree.resource_mut(f.resource) {
                res.restore(f.snapshot);
            }
            tracing::warn!(
                resource = ?f.resource,
                size = f.snapshot.end.wrapping_sub(f.snapshot.start).wrapping_add(1),
                "resource left unassigned"
            );
            if let Some(owner) = tree.resource_owner(f.resource) {
                self.hooks.assignment_failed(tree, owner, f.resource);
            }
            unassigned.push(f.resource);
        }
        unassigned
    }
}

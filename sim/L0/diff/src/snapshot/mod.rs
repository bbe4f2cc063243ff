//! World-level gradients of one timestep.
//!
//! A [`StepGradientSnapshot`] is built right after a step from the pre-step
//! state, the post-step state and the constraint groups the solver recorded.
//! It stitches the group-local matrices into world-sized ones and derives the
//! four step Jacobians from them:
//!
//! | Jacobian | Meaning |
//! |----------|---------|
//! | force-vel | `dv⁺/dτ` |
//! | vel-vel | `dv⁺/dv` |
//! | pos-vel | `dv⁺/dq` |
//! | pos-pos | `dq⁺/dq` |
//!
//! plus `dq⁺/dv = dt · pos-pos`. Everything the snapshot needs from the
//! dynamics (mass matrices, Coriolis terms) is re-queried from the live world,
//! temporarily rewound to the pre-step state under a
//! [`StateGuard`](crate::restore::StateGuard).
//!
//! The implementation is split by concern:
//!
//! - `assembly` - world-sized matrices and vectors from the groups.
//! - `jacobians` - the analytic step Jacobians.
//! - `wrt` - derivatives with respect to positions or inertial parameters.
//! - `backprop` - implicit reverse-mode pass.
//! - `finite_difference` - the same Jacobians by re-stepping the world.

mod assembly;
mod backprop;
mod finite_difference;
mod jacobians;
mod wrt;

use nalgebra::DVector;
use sim_types::{GradientConfig, Result};
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::group::ConstraintGroupMatrices;
use crate::restore::{ScopedSolverFlags, StateGuard};
use crate::world::{DifferentiableWorld, Skeleton};

/// Positions, velocities and applied torques at one instant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepState {
    /// Generalized positions.
    pub position: DVector<f64>,
    /// Generalized velocities.
    pub velocity: DVector<f64>,
    /// Applied generalized forces.
    pub torque: DVector<f64>,
}

impl StepState {
    /// Read the state from a world.
    #[must_use]
    pub fn capture<W: DifferentiableWorld + ?Sized>(world: &W) -> Self {
        Self {
            position: world.positions(),
            velocity: world.velocities(),
            torque: world.forces(),
        }
    }

    /// Write the state into a world.
    pub fn apply<W: DifferentiableWorld + ?Sized>(&self, world: &mut W) {
        world.set_positions(&self.position);
        world.set_velocities(&self.velocity);
        world.set_forces(&self.torque);
    }

    /// Number of DOFs.
    #[must_use]
    pub fn dofs(&self) -> usize {
        self.position.len()
    }
}

/// Which state a dynamics query is evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Evaluation {
    /// Rewind the world to the stored pre-step state, query, and restore.
    /// Projection matrices use the mass-weighted columns measured during the
    /// step, which are only valid there.
    #[default]
    PreStep,
    /// Query whatever state the world holds now. Used while finite
    /// differencing perturbs the world.
    Current,
}

/// Who owns a slice of the world DOF vector during backprop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SegmentOwner {
    /// The constraint group at this index in [`StepGradientSnapshot::groups`].
    Group(usize),
    /// No active constraint touches the skeleton.
    Free,
}

/// One skeleton's slice of the world DOF vector.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DofSegment {
    /// World index of the skeleton.
    pub skeleton: usize,
    /// First world DOF.
    pub offset: usize,
    /// First DOF within the owning group's vectors (0 for free skeletons).
    pub group_offset: usize,
    /// DOF count.
    pub num_dofs: usize,
    /// Owner.
    pub owner: SegmentOwner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SkeletonSlot {
    name: String,
    offset: usize,
    num_dofs: usize,
    mobile: bool,
}

/// Gradients of one constrained timestep.
#[derive(Debug, Clone)]
pub struct StepGradientSnapshot {
    time_step: f64,
    pre_step: StepState,
    post_step: StepState,
    num_dofs: usize,
    num_constraint_dims: usize,
    num_clamping: usize,
    num_upper_bound: usize,
    num_bouncing: usize,
    skeletons: Vec<SkeletonSlot>,
    groups: Vec<ConstraintGroupMatrices>,
    partition: Vec<DofSegment>,
    config: GradientConfig,
}

impl StepGradientSnapshot {
    /// Build a snapshot right after `world` stepped from `pre_step`.
    ///
    /// The post-step state is read from the world. Groups are ordered by
    /// their first member in world order; exact duplicates are dropped.
    ///
    /// # Panics
    ///
    /// If `pre_step` does not have one entry per world DOF, a group is not
    /// finalized, names an unknown skeleton, or shares a skeleton with a
    /// different group.
    #[must_use]
    pub fn new<W: DifferentiableWorld + ?Sized>(
        world: &W,
        pre_step: StepState,
        groups: Vec<ConstraintGroupMatrices>,
        config: GradientConfig,
    ) -> Self {
        let mut skeletons = Vec::with_capacity(world.num_skeletons());
        let mut num_dofs = 0;
        for i in 0..world.num_skeletons() {
            let skel = world.skeleton(i);
            skeletons.push(SkeletonSlot {
                name: skel.name().to_owned(),
                offset: num_dofs,
                num_dofs: skel.num_dofs(),
                mobile: skel.is_mobile(),
            });
            num_dofs += skel.num_dofs();
        }
        assert_eq!(pre_step.position.len(), num_dofs, "pre-step position needs one entry per DOF");
        assert_eq!(pre_step.velocity.len(), num_dofs, "pre-step velocity needs one entry per DOF");
        assert_eq!(pre_step.torque.len(), num_dofs, "pre-step torque needs one entry per DOF");

        let groups = order_groups(&skeletons, groups);

        let mut snapshot = Self {
            time_step: world.time_step(),
            pre_step,
            post_step: StepState::capture(world),
            num_dofs,
            num_constraint_dims: 0,
            num_clamping: 0,
            num_upper_bound: 0,
            num_bouncing: 0,
            skeletons,
            groups,
            partition: Vec::new(),
            config,
        };
        for group in &mut snapshot.groups {
            group.assign_keys(snapshot.num_clamping, snapshot.num_upper_bound);
            snapshot.num_constraint_dims += group.num_constraint_dims();
            snapshot.num_clamping += group.num_clamping();
            snapshot.num_upper_bound += group.num_upper_bound();
            snapshot.num_bouncing += group.num_bouncing();
        }
        snapshot.partition = snapshot.build_partition();

        debug!(
            dofs = snapshot.num_dofs,
            groups = snapshot.groups.len(),
            clamping = snapshot.num_clamping,
            upper_bound = snapshot.num_upper_bound,
            bouncing = snapshot.num_bouncing,
            "built step gradient snapshot"
        );
        snapshot
    }

    fn slot_index(&self, name: &str) -> usize {
        self.skeletons
            .iter()
            .position(|s| s.name == name)
            .unwrap_or_else(|| panic!("skeleton {name} is not part of this snapshot"))
    }

    fn build_partition(&self) -> Vec<DofSegment> {
        let mut visited = vec![false; self.skeletons.len()];
        let mut partition = Vec::with_capacity(self.skeletons.len());
        for (g, group) in self.groups.iter().enumerate() {
            let mut group_offset = 0;
            for member in group.skeletons() {
                let index = self.slot_index(&member.name);
                let slot = &self.skeletons[index];
                assert_eq!(
                    slot.num_dofs, member.num_dofs,
                    "group and world disagree on the DOF count of {}",
                    member.name
                );
                visited[index] = true;
                partition.push(DofSegment {
                    skeleton: index,
                    offset: slot.offset,
                    group_offset,
                    num_dofs: slot.num_dofs,
                    owner: SegmentOwner::Group(g),
                });
                group_offset += slot.num_dofs;
            }
        }
        for (index, slot) in self.skeletons.iter().enumerate() {
            if !visited[index] {
                partition.push(DofSegment {
                    skeleton: index,
                    offset: slot.offset,
                    group_offset: 0,
                    num_dofs: slot.num_dofs,
                    owner: SegmentOwner::Free,
                });
            }
        }
        partition
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Step length.
    #[must_use]
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Total world DOFs.
    #[must_use]
    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    /// Constraint dimensions over every group, classified or not.
    #[must_use]
    pub fn num_constraint_dims(&self) -> usize {
        self.num_constraint_dims
    }

    /// Clamping columns over every group.
    #[must_use]
    pub fn num_clamping(&self) -> usize {
        self.num_clamping
    }

    /// Upper-bound columns over every group.
    #[must_use]
    pub fn num_upper_bound(&self) -> usize {
        self.num_upper_bound
    }

    /// Bouncing columns over every group.
    #[must_use]
    pub fn num_bouncing(&self) -> usize {
        self.num_bouncing
    }

    /// Whether any constraint bounced.
    #[must_use]
    pub fn has_bounces(&self) -> bool {
        self.num_bouncing > 0
    }

    /// State the step started from.
    #[must_use]
    pub fn pre_step(&self) -> &StepState {
        &self.pre_step
    }

    /// State the step ended in.
    #[must_use]
    pub fn post_step(&self) -> &StepState {
        &self.post_step
    }

    /// Pre-step positions.
    #[must_use]
    pub fn pre_step_position(&self) -> &DVector<f64> {
        &self.pre_step.position
    }

    /// Pre-step velocities.
    #[must_use]
    pub fn pre_step_velocity(&self) -> &DVector<f64> {
        &self.pre_step.velocity
    }

    /// Pre-step torques.
    #[must_use]
    pub fn pre_step_torque(&self) -> &DVector<f64> {
        &self.pre_step.torque
    }

    /// Post-step positions.
    #[must_use]
    pub fn post_step_position(&self) -> &DVector<f64> {
        &self.post_step.position
    }

    /// Post-step velocities.
    #[must_use]
    pub fn post_step_velocity(&self) -> &DVector<f64> {
        &self.post_step.velocity
    }

    /// Post-step torques.
    #[must_use]
    pub fn post_step_torque(&self) -> &DVector<f64> {
        &self.post_step.torque
    }

    /// First world DOF of a skeleton.
    #[must_use]
    pub fn skeleton_offset(&self, name: &str) -> Option<usize> {
        self.skeletons.iter().find(|s| s.name == name).map(|s| s.offset)
    }

    /// Constraint groups in assembly order.
    #[must_use]
    pub fn groups(&self) -> &[ConstraintGroupMatrices] {
        &self.groups
    }

    /// Which owner covers each skeleton's DOFs: grouped skeletons first, in
    /// group order, then free skeletons in world order.
    #[must_use]
    pub fn dof_partition(&self) -> &[DofSegment] {
        &self.partition
    }

    /// Configuration the snapshot was built with.
    #[must_use]
    pub fn config(&self) -> &GradientConfig {
        &self.config
    }

    /// Run `f` with the world rewound to the pre-step state, restoring it afterwards.
    pub(crate) fn at_pre_step<W, T, F>(&self, world: &mut W, f: F) -> T
    where
        W: DifferentiableWorld + ?Sized,
        F: FnOnce(&mut W) -> T,
    {
        let mut guard = StateGuard::new(world);
        self.pre_step.apply(&mut *guard);
        f(&mut *guard)
    }
}

/// Order groups by their first member's world index, dropping exact duplicates.
fn order_groups(
    skeletons: &[SkeletonSlot],
    groups: Vec<ConstraintGroupMatrices>,
) -> Vec<ConstraintGroupMatrices> {
    let index_of = |name: &str| {
        skeletons
            .iter()
            .position(|s| s.name == name)
            .unwrap_or_else(|| panic!("constraint group names unknown skeleton {name}"))
    };

    let mut keyed: Vec<(usize, ConstraintGroupMatrices)> = Vec::with_capacity(groups.len());
    for group in groups {
        assert!(group.is_finalized(), "constraint groups must be finalized before assembly");
        if keyed.iter().any(|(_, g)| *g == group) {
            continue;
        }
        let first = group
            .skeletons()
            .iter()
            .map(|s| index_of(&s.name))
            .min()
            .unwrap_or(usize::MAX);
        keyed.push((first, group));
    }
    keyed.sort_by_key(|(first, _)| *first);

    let mut owner: Vec<Option<usize>> = vec![None; skeletons.len()];
    for (g, (_, group)) in keyed.iter().enumerate() {
        for member in group.skeletons() {
            let index = index_of(&member.name);
            assert!(
                owner[index].is_none(),
                "skeleton {} appears in more than one constraint group",
                member.name
            );
            owner[index] = Some(g);
        }
    }
    keyed.into_iter().map(|(_, group)| group).collect()
}

// ============================================================================
// Forward pass
// ============================================================================

/// Step `world` once with gradients enabled and build the snapshot.
///
/// # Errors
///
/// Propagates errors from stepping the world.
pub fn forward_pass<W: DifferentiableWorld + ?Sized>(world: &mut W) -> Result<StepGradientSnapshot> {
    forward_pass_with_config(world, GradientConfig::default())
}

/// [`forward_pass`] with an explicit gradient configuration.
///
/// # Errors
///
/// Returns an error for an invalid configuration, or propagates errors from
/// stepping the world.
pub fn forward_pass_with_config<W: DifferentiableWorld + ?Sized>(
    world: &mut W,
    config: GradientConfig,
) -> Result<StepGradientSnapshot> {
    config.validate()?;
    let pre_step = StepState::capture(world);
    let flags = world.solver_flags().with_gradient(true);
    let groups = {
        let mut scoped = ScopedSolverFlags::new(world, flags);
        scoped.step()?;
        scoped.take_constraint_groups()
    };
    Ok(StepGradientSnapshot::new(world, pre_step, groups, config))
}

/// [`forward_pass`], then put the world back where it started.
///
/// # Errors
///
/// Propagates errors from stepping the world. The world is restored either way.
pub fn forward_pass_idempotent<W: DifferentiableWorld + ?Sized>(
    world: &mut W,
) -> Result<StepGradientSnapshot> {
    let mut guard = StateGuard::new(world);
    forward_pass(&mut *guard)
}

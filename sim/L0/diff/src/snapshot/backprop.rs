//! Reverse-mode pass through one step.

use nalgebra::DVector;
use sim_types::LossGradient;

use super::{SegmentOwner, StepGradientSnapshot};
use crate::world::{DifferentiableWorld, Skeleton};

impl StepGradientSnapshot {
    /// Turn the loss gradient at the next step into the gradient at this one.
    ///
    /// Grouped skeletons go through their group's implicit backprop. Free
    /// mobile skeletons use the unconstrained relations
    ///
    /// ```text
    /// dL/dτ = dt · M^-1 · dL/dv⁺
    /// dL/dq = dL/dq⁺ - (dC/dq)ᵀ · dL/dτ
    /// dL/dv = dL/dv⁺ - (dC/dv)ᵀ · dL/dτ + dt · dL/dq
    /// ```
    ///
    /// and immobile ones get zeros. The world is rewound to the pre-step
    /// state for the duration and restored before returning.
    ///
    /// # Panics
    ///
    /// If `next` does not have one entry per DOF, or a skeleton would be
    /// visited twice.
    #[must_use]
    pub fn backprop<W: DifferentiableWorld + ?Sized>(&self, world: &mut W, next: &LossGradient) -> LossGradient {
        assert_eq!(next.dofs(), self.num_dofs, "loss gradient needs one entry per DOF");
        let dt = self.time_step;
        self.at_pre_step(world, |w| {
            let mut this = LossGradient::zeros(self.num_dofs);
            let mut visited = vec![false; self.skeletons.len()];

            for (g, group) in self.groups.iter().enumerate() {
                let segments: Vec<_> = self
                    .partition
                    .iter()
                    .filter(|s| s.owner == SegmentOwner::Group(g))
                    .collect();
                let mut group_next = LossGradient::zeros(group.num_dofs());
                for s in &segments {
                    assert!(!visited[s.skeleton], "skeleton visited twice during backprop");
                    visited[s.skeleton] = true;
                    group_next
                        .loss_wrt_position
                        .rows_mut(s.group_offset, s.num_dofs)
                        .copy_from(&next.loss_wrt_position.rows(s.offset, s.num_dofs));
                    group_next
                        .loss_wrt_velocity
                        .rows_mut(s.group_offset, s.num_dofs)
                        .copy_from(&next.loss_wrt_velocity.rows(s.offset, s.num_dofs));
                }

                let group_this = group.backprop(&*w, &group_next);

                for s in &segments {
                    this.loss_wrt_position
                        .rows_mut(s.offset, s.num_dofs)
                        .copy_from(&group_this.loss_wrt_position.rows(s.group_offset, s.num_dofs));
                    this.loss_wrt_velocity
                        .rows_mut(s.offset, s.num_dofs)
                        .copy_from(&group_this.loss_wrt_velocity.rows(s.group_offset, s.num_dofs));
                    this.loss_wrt_torque
                        .rows_mut(s.offset, s.num_dofs)
                        .copy_from(&group_this.loss_wrt_torque.rows(s.group_offset, s.num_dofs));
                }
            }

            for s in self.partition.iter().filter(|s| s.owner == SegmentOwner::Free) {
                if visited[s.skeleton] || !self.skeletons[s.skeleton].mobile {
                    continue;
                }
                visited[s.skeleton] = true;
                let skel = w.skeleton(s.skeleton);
                let next_vel: DVector<f64> = next.loss_wrt_velocity.rows(s.offset, s.num_dofs).into_owned();
                let next_pos: DVector<f64> = next.loss_wrt_position.rows(s.offset, s.num_dofs).into_owned();

                let torque = skel.multiply_by_inv_mass(&next_vel) * dt;
                let position = next_pos - skel.pos_c_jacobian().tr_mul(&torque);
                let velocity =
                    next_vel - skel.vel_c_jacobian().tr_mul(&torque) + &position * dt;

                this.loss_wrt_torque.rows_mut(s.offset, s.num_dofs).copy_from(&torque);
                this.loss_wrt_position.rows_mut(s.offset, s.num_dofs).copy_from(&position);
                this.loss_wrt_velocity.rows_mut(s.offset, s.num_dofs).copy_from(&velocity);
            }
            this
        })
    }
}

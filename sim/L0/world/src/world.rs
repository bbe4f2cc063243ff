//! The steppable world.
//!
//! One step of semi-implicit Euler with velocity-level constraints:
//!
//! 1. Unconstrained velocity `v* = v + dt · M^-1 · (τ - C)` for every mobile skeleton.
//! 2. Detect contacts and joint limits at the current positions.
//! 3. Split mobile skeletons into islands connected by constraints.
//! 4. Per island, solve the boxed LCP for impulses, apply `v⁺ = v* + M^-1 · Jᵀ · λ`
//!    and, when gradients are enabled, record a [`ConstraintGroupMatrices`].
//! 5. Integrate `q⁺ = q + dt · v⁺`.

use nalgebra::{DMatrix, DVector};
use sim_diff::linalg::block_diagonal;
use sim_diff::{
    ConstraintDimension, ConstraintGroupMatrices, DifferentiableWorld, GroupSkeleton, ImpulseTest,
    Skeleton,
};
use sim_types::{Result, SimError, SolverFlags};
use tracing::debug;

use crate::collision::{Constraint, detect_contacts, detect_limits};
use crate::config::WorldConfig;
use crate::lcp::{BoxedLcp, UnionFind};
use crate::skeleton::ChainSkeleton;

/// Summary of the most recent step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    /// Contacts detected.
    pub contacts: usize,
    /// Joint limits detected.
    pub limits: usize,
    /// Constraint islands solved.
    pub groups: usize,
    /// Most PGS sweeps any island needed.
    pub lcp_iterations: usize,
}

/// A world of [`ChainSkeleton`]s.
#[derive(Debug, Clone)]
pub struct World {
    config: WorldConfig,
    skeletons: Vec<ChainSkeleton>,
    flags: SolverFlags,
    recorded: Vec<ConstraintGroupMatrices>,
    stats: StepStats,
}

/// One island of the constraint graph.
struct Island {
    members: Vec<usize>,
    constraints: Vec<Constraint>,
}

impl World {
    /// Empty world.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: WorldConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            skeletons: Vec::new(),
            flags: SolverFlags::default(),
            recorded: Vec::new(),
            stats: StepStats::default(),
        })
    }

    /// Add a skeleton and return its index.
    ///
    /// # Errors
    ///
    /// Returns an error if a skeleton with the same name already exists.
    pub fn add_skeleton(&mut self, mut skeleton: ChainSkeleton) -> Result<usize> {
        if self.skeleton_index(skeleton.name()).is_some() {
            return Err(SimError::invalid_config(format!(
                "duplicate skeleton name {}",
                skeleton.name()
            )));
        }
        skeleton.set_gravity(self.config.gravity);
        self.skeletons.push(skeleton);
        Ok(self.skeletons.len() - 1)
    }

    /// Add a skeleton, builder style.
    ///
    /// # Errors
    ///
    /// Returns an error if a skeleton with the same name already exists.
    pub fn with_skeleton(mut self, skeleton: ChainSkeleton) -> Result<Self> {
        self.add_skeleton(skeleton)?;
        Ok(self)
    }

    /// Skeleton by name.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SkeletonNotFound`] if no skeleton has that name.
    pub fn skeleton_by_name(&self, name: &str) -> Result<&ChainSkeleton> {
        self.skeleton_index(name)
            .map(|i| &self.skeletons[i])
            .ok_or_else(|| SimError::skeleton_not_found(name))
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Statistics of the last step.
    #[must_use]
    pub fn last_step(&self) -> StepStats {
        self.stats
    }

    /// Total kinetic and potential energy.
    #[must_use]
    pub fn energy(&self) -> f64 {
        self.skeletons.iter().map(ChainSkeleton::energy).sum()
    }

    fn offsets(&self) -> Vec<usize> {
        sim_diff::world::skeleton_offsets(self)
    }

    /// Split constraints into islands of mobile skeletons.
    fn islands(&self, constraints: Vec<Constraint>) -> Vec<Island> {
        let n = self.skeletons.len();
        let mobile = |s: usize| self.skeletons[s].is_mobile() && self.skeletons[s].num_dofs() > 0;
        let mut uf = UnionFind::new(n);
        for c in &constraints {
            let touched: Vec<usize> = c.skeletons().into_iter().filter(|&s| mobile(s)).collect();
            for pair in touched.windows(2) {
                uf.union(pair[0], pair[1]);
            }
        }

        let mut islands: Vec<(usize, Island)> = Vec::new();
        for c in constraints {
            let Some(&first) = c.skeletons().iter().find(|&&s| mobile(s)) else {
                continue;
            };
            let root = uf.find(first);
            let slot = match islands.iter().position(|(r, _)| *r == root) {
                Some(slot) => slot,
                None => {
                    islands.push((
                        root,
                        Island {
                            members: Vec::new(),
                            constraints: Vec::new(),
                        },
                    ));
                    islands.len() - 1
                }
            };
            islands[slot].1.constraints.push(c);
        }
        for (root, island) in &mut islands {
            island.members = (0..n).filter(|&s| mobile(s) && uf.find(s) == *root).collect();
        }
        islands.into_iter().map(|(_, island)| island).collect()
    }

    /// Solve one island in place on `velocities` (world-sized, holding `v*`).
    fn solve_island(
        &mut self,
        island: &Island,
        offsets: &[usize],
        velocities: &mut DVector<f64>,
    ) -> Result<usize> {
        let dt = self.config.time_step;
        let members = &island.members;
        let group_dofs: usize = members.iter().map(|&s| self.skeletons[s].num_dofs()).sum();
        let gather = |world: &DVector<f64>| {
            let mut out = DVector::zeros(group_dofs);
            let mut cursor = 0;
            for &s in members {
                let k = self.skeletons[s].num_dofs();
                out.rows_mut(cursor, k).copy_from(&world.rows(offsets[s], k));
                cursor += k;
            }
            out
        };

        let minv_blocks: Vec<DMatrix<f64>> = members
            .iter()
            .map(|&s| self.skeletons[s].inv_mass_matrix())
            .collect();
        let minv = block_diagonal(&minv_blocks);
        let v_star = gather(&*velocities);

        // One row per LCP dimension.
        let mut rows: Vec<DVector<f64>> = Vec::new();
        let mut dimensions: Vec<ConstraintDimension> = Vec::new();
        let mut hi = Vec::new();
        let mut lo = Vec::new();
        let mut friction_index = Vec::new();
        let mut targets = Vec::new();

        for constraint in &island.constraints {
            let normal_dim = rows.len();
            let (restitution, depth, friction) = match constraint {
                Constraint::Contact(c) => (c.restitution, c.depth, c.friction),
                Constraint::Limit(l) => (0.0, l.depth, 0.0),
            };
            for gradient in constraint.dimensions(&self.skeletons) {
                let row = gather(&gradient.world_constraint_forces(&*self));
                let is_normal = gradient.index() == 0;
                let approach = row.dot(&v_star);
                let bouncing = is_normal
                    && restitution > 0.0
                    && -approach > self.config.bounce_velocity_threshold;
                let penetration = if is_normal && self.flags.penetration_correction_enabled {
                    self.config.penetration_correction.velocity(depth, dt)
                } else {
                    0.0
                };
                let bounce_target = if bouncing { -restitution * approach } else { 0.0 };
                targets.push(if is_normal { bounce_target.max(penetration) } else { 0.0 });

                if is_normal {
                    hi.push(f64::INFINITY);
                    lo.push(0.0);
                    friction_index.push(None);
                } else {
                    hi.push(friction);
                    lo.push(-friction);
                    friction_index.push(Some(normal_dim));
                }
                rows.push(row);
                dimensions.push(ConstraintDimension {
                    gradient,
                    restitution,
                    bouncing,
                    penetration_correction_velocity: penetration,
                });
            }
        }

        let m = rows.len();
        let mut jacobian = DMatrix::zeros(m, group_dofs);
        for (i, row) in rows.iter().enumerate() {
            jacobian.set_row(i, &row.transpose());
        }
        let minv_jt = &minv * jacobian.transpose();
        let lcp = BoxedLcp {
            a: &jacobian * &minv_jt,
            b: &jacobian * &v_star - DVector::from_vec(targets),
            hi: DVector::from_vec(hi),
            lo: DVector::from_vec(lo),
            friction_index,
        };
        let solution = lcp.solve_pgs(&self.config.lcp);
        if !solution.x.iter().all(|x| x.is_finite()) {
            return Err(SimError::solver_failure("non-finite impulse from PGS"));
        }

        let v_next = v_star + &minv_jt * &solution.x;
        let mut cursor = 0;
        for &s in members {
            let k = self.skeletons[s].num_dofs();
            velocities
                .rows_mut(offsets[s], k)
                .copy_from(&v_next.rows(cursor, k));
            cursor += k;
        }

        if self.flags.gradient_enabled {
            let skeletons = members
                .iter()
                .map(|&s| GroupSkeleton::new(self.skeletons[s].name(), self.skeletons[s].num_dofs()))
                .collect();
            let mut group =
                ConstraintGroupMatrices::new(skeletons, m, dt, self.config.gradient_strategy);
            for (j, dimension) in dimensions.into_iter().enumerate() {
                let impulse = rows[j].clone();
                let velocity_change = &minv * &impulse;
                group.measure_impulse(
                    j,
                    dimension,
                    ImpulseTest {
                        impulse,
                        velocity_change,
                    },
                );
            }
            group.finalize(
                &solution.x,
                &lcp.hi,
                &lcp.lo,
                &lcp.friction_index,
                self.config.clamping_threshold,
            );
            self.recorded.push(group);
        }
        Ok(solution.iterations)
    }
}

impl DifferentiableWorld for World {
    type Skeleton = ChainSkeleton;

    fn num_skeletons(&self) -> usize {
        self.skeletons.len()
    }

    fn skeleton(&self, index: usize) -> &ChainSkeleton {
        &self.skeletons[index]
    }

    fn positions(&self) -> DVector<f64> {
        sim_diff::world::concat_skeletons(self, |s| s.positions())
    }

    fn set_positions(&mut self, positions: &DVector<f64>) {
        let offsets = self.offsets();
        for (skel, offset) in self.skeletons.iter_mut().zip(offsets) {
            let k = skel.num_dofs();
            skel.set_positions(&positions.rows(offset, k).into_owned());
        }
    }

    fn velocities(&self) -> DVector<f64> {
        sim_diff::world::concat_skeletons(self, |s| s.velocities())
    }

    fn set_velocities(&mut self, velocities: &DVector<f64>) {
        let offsets = self.offsets();
        for (skel, offset) in self.skeletons.iter_mut().zip(offsets) {
            let k = skel.num_dofs();
            skel.set_velocities(&velocities.rows(offset, k).into_owned());
        }
    }

    fn forces(&self) -> DVector<f64> {
        sim_diff::world::concat_skeletons(self, |s| s.forces())
    }

    fn set_forces(&mut self, forces: &DVector<f64>) {
        let offsets = self.offsets();
        for (skel, offset) in self.skeletons.iter_mut().zip(offsets) {
            let k = skel.num_dofs();
            skel.set_forces(&forces.rows(offset, k).into_owned());
        }
    }

    fn time_step(&self) -> f64 {
        self.config.time_step
    }

    fn set_time_step(&mut self, time_step: f64) {
        self.config.time_step = time_step;
    }

    fn step(&mut self) -> Result<()> {
        let dt = self.config.time_step;
        if dt <= 0.0 || !dt.is_finite() {
            return Err(SimError::InvalidTimestep(dt));
        }
        self.recorded.clear();

        let offsets = self.offsets();
        let mut velocities = self.velocities();
        for (s, skel) in self.skeletons.iter().enumerate() {
            if !skel.is_mobile() || skel.num_dofs() == 0 {
                continue;
            }
            let free_force = skel.forces() - skel.coriolis_and_gravity_forces();
            let accel = skel.factor_mass_matrix()?.solve(&free_force);
            let k = skel.num_dofs();
            let v_star = velocities.rows(offsets[s], k) + accel * dt;
            velocities.rows_mut(offsets[s], k).copy_from(&v_star);
        }

        let margin = self.config.contact_margin;
        let contacts = detect_contacts(&self.skeletons, margin);
        let limits = detect_limits(&self.skeletons, margin);
        let stats_contacts = contacts.len();
        let stats_limits = limits.len();
        let constraints: Vec<Constraint> = contacts
            .into_iter()
            .map(Constraint::Contact)
            .chain(limits.into_iter().map(Constraint::Limit))
            .collect();
        let islands = self.islands(constraints);

        let mut lcp_iterations = 0;
        for island in &islands {
            lcp_iterations = lcp_iterations.max(self.solve_island(island, &offsets, &mut velocities)?);
        }

        if !velocities.iter().all(|v| v.is_finite()) {
            return Err(SimError::diverged("non-finite velocity after constraint solve"));
        }

        let positions = self.positions() + &velocities * dt;
        for (s, skel) in self.skeletons.iter_mut().enumerate() {
            if !skel.is_mobile() {
                continue;
            }
            let k = skel.num_dofs();
            skel.set_velocities(&velocities.rows(offsets[s], k).into_owned());
            skel.set_positions(&positions.rows(offsets[s], k).into_owned());
        }

        self.stats = StepStats {
            contacts: stats_contacts,
            limits: stats_limits,
            groups: islands.len(),
            lcp_iterations,
        };
        debug!(
            contacts = stats_contacts,
            limits = stats_limits,
            groups = islands.len(),
            lcp_iterations,
            "stepped world"
        );
        Ok(())
    }

    fn take_constraint_groups(&mut self) -> Vec<ConstraintGroupMatrices> {
        std::mem::take(&mut self.recorded)
    }

    fn solver_flags(&self) -> SolverFlags {
        self.flags
    }

    fn set_solver_flags(&mut self, flags: SolverFlags) {
        self.flags = flags;
    }

    fn link_masses(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.skeletons.iter().map(|s| s.links().len()).sum(),
            self.skeletons.iter().flat_map(|s| s.link_masses()),
        )
    }

    fn set_link_masses(&mut self, masses: &DVector<f64>) {
        let mut i = 0;
        for skel in &mut self.skeletons {
            for link in skel.links_mut() {
                link.mass = masses[i];
                i += 1;
            }
        }
    }

    fn link_coms(&self) -> DVector<f64> {
        let values: Vec<f64> = self
            .skeletons
            .iter()
            .flat_map(|s| s.links().iter().flat_map(|l| l.com.iter().copied()))
            .collect();
        DVector::from_vec(values)
    }

    fn set_link_coms(&mut self, coms: &DVector<f64>) {
        let mut i = 0;
        for skel in &mut self.skeletons {
            for link in skel.links_mut() {
                link.com.copy_from(&coms.rows(i, 3));
                i += 3;
            }
        }
    }

    fn link_mois(&self) -> DVector<f64> {
        let values: Vec<f64> = self
            .skeletons
            .iter()
            .flat_map(|s| s.links().iter().flat_map(|l| l.moi.iter().copied()))
            .collect();
        DVector::from_vec(values)
    }

    fn set_link_mois(&mut self, mois: &DVector<f64>) {
        let mut i = 0;
        for skel in &mut self.skeletons {
            for link in skel.links_mut() {
                link.moi.copy_from(&mois.rows(i, 3));
                i += 3;
            }
        }
    }
}

//! Scoped mutation of the live world.
//!
//! Every probe the gradient core runs (finite differences, brute-force contact
//! checks, evaluating mass matrices at the pre-step state) temporarily
//! overwrites world state. Those probes hold one of the guards below, and the
//! guard's `Drop` puts the world back on every exit path, including `?`.

use std::ops::{Deref, DerefMut};

use nalgebra::DVector;
use sim_types::SolverFlags;

use crate::world::DifferentiableWorld;

/// Everything a probe may touch: state vectors, timestep, solver flags and
/// link inertial parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorableSnapshot {
    positions: DVector<f64>,
    velocities: DVector<f64>,
    forces: DVector<f64>,
    time_step: f64,
    solver_flags: SolverFlags,
    link_masses: DVector<f64>,
    link_coms: DVector<f64>,
    link_mois: DVector<f64>,
}

impl RestorableSnapshot {
    /// Capture the current world state.
    #[must_use]
    pub fn capture<W: DifferentiableWorld + ?Sized>(world: &W) -> Self {
        Self {
            positions: world.positions(),
            velocities: world.velocities(),
            forces: world.forces(),
            time_step: world.time_step(),
            solver_flags: world.solver_flags(),
            link_masses: world.link_masses(),
            link_coms: world.link_coms(),
            link_mois: world.link_mois(),
        }
    }

    /// Write the captured state back into the world.
    pub fn restore<W: DifferentiableWorld + ?Sized>(&self, world: &mut W) {
        world.set_link_masses(&self.link_masses);
        world.set_link_coms(&self.link_coms);
        world.set_link_mois(&self.link_mois);
        world.set_positions(&self.positions);
        world.set_velocities(&self.velocities);
        world.set_forces(&self.forces);
        world.set_time_step(self.time_step);
        world.set_solver_flags(self.solver_flags);
    }

    /// Captured positions.
    #[must_use]
    pub fn positions(&self) -> &DVector<f64> {
        &self.positions
    }

    /// Captured velocities.
    #[must_use]
    pub fn velocities(&self) -> &DVector<f64> {
        &self.velocities
    }

    /// Captured forces.
    #[must_use]
    pub fn forces(&self) -> &DVector<f64> {
        &self.forces
    }

    /// Captured timestep.
    #[must_use]
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Captured solver flags.
    #[must_use]
    pub fn solver_flags(&self) -> SolverFlags {
        self.solver_flags
    }

    /// Whether the world currently matches this snapshot bit for bit.
    #[must_use]
    pub fn matches<W: DifferentiableWorld + ?Sized>(&self, world: &W) -> bool {
        *self == Self::capture(world)
    }
}

/// Restores the world to its state at construction when dropped.
///
/// Derefs to the world so probes can mutate it freely.
pub struct StateGuard<'a, W: DifferentiableWorld + ?Sized> {
    world: &'a mut W,
    saved: RestorableSnapshot,
}

impl<'a, W: DifferentiableWorld + ?Sized> StateGuard<'a, W> {
    /// Capture the world and take exclusive access to it.
    pub fn new(world: &'a mut W) -> Self {
        let saved = RestorableSnapshot::capture(world);
        Self { world, saved }
    }

    /// The state that will be restored.
    #[must_use]
    pub fn saved(&self) -> &RestorableSnapshot {
        &self.saved
    }
}

impl<W: DifferentiableWorld + ?Sized> Deref for StateGuard<'_, W> {
    type Target = W;

    fn deref(&self) -> &W {
        self.world
    }
}

impl<W: DifferentiableWorld + ?Sized> DerefMut for StateGuard<'_, W> {
    fn deref_mut(&mut self) -> &mut W {
        self.world
    }
}

impl<W: DifferentiableWorld + ?Sized> Drop for StateGuard<'_, W> {
    fn drop(&mut self) {
        self.saved.restore(self.world);
    }
}

/// Sets solver flags for a scope and puts the previous flags back on drop.
pub struct ScopedSolverFlags<'a, W: DifferentiableWorld + ?Sized> {
    world: &'a mut W,
    previous: SolverFlags,
}

impl<'a, W: DifferentiableWorld + ?Sized> ScopedSolverFlags<'a, W> {
    /// Apply `flags` until the returned guard is dropped.
    pub fn new(world: &'a mut W, flags: SolverFlags) -> Self {
        let previous = world.solver_flags();
        world.set_solver_flags(flags);
        Self { world, previous }
    }

    /// Flags that will be restored.
    #[must_use]
    pub fn previous(&self) -> SolverFlags {
        self.previous
    }
}

impl<W: DifferentiableWorld + ?Sized> Deref for ScopedSolverFlags<'_, W> {
    type Target = W;

    fn deref(&self) -> &W {
        self.world
    }
}

impl<W: DifferentiableWorld + ?Sized> DerefMut for ScopedSolverFlags<'_, W> {
    fn deref_mut(&mut self) -> &mut W {
        self.world
    }
}

impl<W: DifferentiableWorld + ?Sized> Drop for ScopedSolverFlags<'_, W> {
    fn drop(&mut self) {
        self.world.set_solver_flags(self.previous);
    }
}

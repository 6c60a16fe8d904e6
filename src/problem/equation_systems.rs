//! The container tying systems to one mesh, plus the shared simulation clock.

use crate::coupling_error::CouplingError;
use crate::mesh::Mesh;
use crate::system::FieldSystem;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Simulation time state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationClock {
    pub time: f64,
    pub t_step: u64,
    pub dt: f64,
    pub dt_old: f64,
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self {
            time: 0.0,
            t_step: 0,
            dt: 1.0,
            dt_old: 1.0,
        }
    }
}

impl SimulationClock {
    /// Advance one step of the current `dt`.
    pub fn advance(&mut self) {
        self.time += self.dt;
        self.t_step += 1;
    }

    /// Replace `dt`, remembering the previous value.
    pub fn set_dt(&mut self, dt: f64) {
        self.dt_old = self.dt;
        self.dt = dt;
    }
}

/// One clock seen by every problem holding a handle.
pub type SharedClock = Arc<RwLock<SimulationClock>>;

/// Systems registered on one mesh and the clock they advance with.
#[derive(Debug, Default)]
pub struct EquationSystems {
    clock: SharedClock,
    systems: BTreeMap<String, usize>,
    n_reinits: u64,
}

impl EquationSystems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }

    /// Follow `clock` instead of the private one.
    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = clock;
    }

    pub fn time(&self) -> f64 {
        self.clock.read().time
    }

    pub fn dt(&self) -> f64 {
        self.clock.read().dt
    }

    /// Distribute dofs of every system on `mesh`.
    pub fn init(&mut self, mesh: &Mesh, systems: &mut [&mut FieldSystem]) -> Result<(), CouplingError> {
        self.systems.clear();
        for sys in systems.iter_mut() {
            sys.init(mesh)?;
            self.systems.insert(sys.name().to_string(), sys.n_dofs());
        }
        Ok(())
    }

    /// Redistribute dofs of every system after a topology change.
    pub fn reinit(&mut self, mesh: &Mesh, systems: &mut [&mut FieldSystem]) -> Result<(), CouplingError> {
        for sys in systems.iter_mut() {
            sys.reinit_dofs(mesh)?;
            self.systems.insert(sys.name().to_string(), sys.n_dofs());
        }
        self.n_reinits += 1;
        Ok(())
    }

    /// Record `name` with `n_dofs` without owning the system itself.
    pub fn register_system(&mut self, name: impl Into<String>, n_dofs: usize) {
        self.systems.insert(name.into(), n_dofs);
    }

    /// Names of every registered system, in name order.
    pub fn system_names(&self) -> impl Iterator<Item = &str> {
        self.systems.keys().map(String::as_str)
    }

    pub fn n_systems(&self) -> usize {
        self.systems.len()
    }

    pub fn has_system(&self, name: &str) -> bool {
        self.systems.contains_key(name)
    }

    /// Dof count recorded for `name` at the last init/reinit.
    pub fn n_dofs(&self, name: &str) -> Option<usize> {
        self.systems.get(name).copied()
    }

    pub fn n_reinits(&self) -> u64 {
        self.n_reinits
    }
}

/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The lattice-Boltzmann iterator.
//!
//! One call to [`Lbm::step`] advances the lattice by a time step using the
//! halo protocol: receives are posted first, the inter-site ranges are
//! collided and streamed (filling the peer send regions of `f_new`), the
//! sends go out, the inner-site ranges overlap with the wire, and after
//! the wait the received distributions are copied to their streaming
//! targets and the buffers swap.
//!
//! Instability (any negative distribution anywhere) triggers the restart
//! policy: double the steps per cycle, convert the iolet pressures to
//! lattice units under the new time step, re-initialise the lattice at the
//! average minimum outlet density and start over. The policy is bounded;
//! past the bound the run fails with [`Error::Instability`].

pub mod iolets;
pub mod kernels;

pub use iolets::{BoundaryDensities, UnitConverter};
pub use kernels::{default_kernels, CollisionKernel, FlowStats, KernelContext};

use std::ops::Range;

use log::{info, warn};

use crate::comm::Communicator;
use crate::config::{IoletConfig, Monitoring, SimConfig};
use crate::domain::{LocalDomain, SiteRegion};
use crate::error::{Error, Result};
use crate::geometry::StressType;
use crate::lattice::{
    equilibrium, moments, CollisionClass, BLOOD_DENSITY_KG_PER_M3, BLOOD_VISCOSITY_PA_S, CS2,
    NUM_VECTORS, PULSATILE_PERIOD_S,
};

/// Relaxation and stress parameters derived from the discretisation.
#[derive(Debug, Clone, Copy)]
pub struct LbParameters {
    /// Seconds per time step.
    pub time_step: f64,
    pub tau: f64,
    pub omega: f64,
    pub stress_parameter: f64,
    pub beta: f64,
    pub stress_type: StressType,
}

impl LbParameters {
    pub fn new(steps_per_cycle: usize, voxel_size: f64, stress_type: StressType) -> Self {
        let time_step = PULSATILE_PERIOD_S / steps_per_cycle as f64;
        let tau = 0.5
            + (time_step * BLOOD_VISCOSITY_PA_S / BLOOD_DENSITY_KG_PER_M3)
                / (CS2 * voxel_size * voxel_size);
        LbParameters {
            time_step,
            tau,
            omega: -1.0 / tau,
            stress_parameter: (1.0 - 1.0 / (2.0 * tau)) / 2.0f64.sqrt(),
            beta: -1.0 / (2.0 * tau),
            stress_type,
        }
    }
}

/// Outcome of one time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable,
    StableAndConverged,
    Unstable,
}

/// Hook through which a step feeds rendered site values to the image
/// pipeline.
pub trait SiteRegister {
    fn register_site(&mut self, site: usize, density: f64, velocity: f64, stress: f64);
}

impl<F: FnMut(usize, f64, f64, f64)> SiteRegister for F {
    fn register_site(&mut self, site: usize, density: f64, velocity: f64, stress: f64) {
        self(site, density, velocity, stress)
    }
}

/// Restarts permitted before the run is declared lost.
pub const DEFAULT_MAX_RESTARTS: usize = 4;

pub struct Lbm {
    inlets: Vec<IoletConfig>,
    outlets: Vec<IoletConfig>,
    voxel_size: f64,
    stress_type: StressType,
    monitoring: Monitoring,

    pub steps_per_cycle: usize,
    pub params: LbParameters,
    pub densities: BoundaryDensities,
    kernels: [Box<dyn CollisionKernel>; 6],
    /// Extrema of the last completed step.
    pub stats: FlowStats,

    /// Velocity magnitudes of the previous step, for the convergence
    /// check.
    prev_velocity: Vec<f64>,
    restarts: usize,
    max_restarts: usize,
    initial_density: f64,
}

impl Lbm {
    pub fn new(config: &SimConfig, voxel_size: f64) -> Self {
        let converter = UnitConverter {
            voxel_size,
            steps_per_cycle: config.steps_per_cycle,
        };
        Lbm {
            inlets: config.inlets.clone(),
            outlets: config.outlets.clone(),
            voxel_size,
            stress_type: config.stress_type,
            monitoring: config.monitoring,
            steps_per_cycle: config.steps_per_cycle,
            params: LbParameters::new(config.steps_per_cycle, voxel_size, config.stress_type),
            densities: BoundaryDensities::new(&config.inlets, &config.outlets, &converter),
            kernels: default_kernels(),
            stats: FlowStats::default(),
            prev_velocity: Vec::new(),
            restarts: 0,
            max_restarts: DEFAULT_MAX_RESTARTS,
            initial_density: converter.pressure_to_lattice_density(config.initial_pressure_mmhg),
        }
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Equilibrium initial conditions at the configured pressure.
    pub fn set_initial_conditions(&mut self, domain: &mut LocalDomain) {
        domain.set_initial_conditions(self.initial_density);
        self.prev_velocity.clear();
    }

    /// Advances one time step and reports its stability.
    pub fn step(
        &mut self,
        domain: &mut LocalDomain,
        comm: &mut dyn Communicator,
        mut register: Option<&mut dyn SiteRegister>,
        cycle: usize,
        step: usize,
    ) -> Result<Stability> {
        self.densities.update(cycle, step);
        self.stats = FlowStats::default();

        let requests = domain.post_halo_receives(comm);
        self.collide(domain, SiteRegion::Inter);
        domain.post_halo_sends(comm)?;
        self.collide(domain, SiteRegion::Inner);
        domain.complete_halo(comm, &requests)?;
        domain.swap_buffers();

        if let Some(register) = register.as_mut() {
            self.render(domain, &mut **register);
        }

        let unstable = comm.all_reduce_max(domain.has_negative_distribution() as u64)? != 0;
        if unstable {
            warn!("rank {}: negative distribution detected", domain.rank());
            return Ok(Stability::Unstable);
        }

        if self.monitoring.convergence_enabled {
            if self.converged(domain, comm)? {
                return Ok(Stability::StableAndConverged);
            }
        }
        Ok(Stability::Stable)
    }

    /// The restart policy: twice the steps per cycle, lattice back to a
    /// uniform equilibrium. Fails once the policy is exhausted.
    pub fn restart(&mut self, domain: &mut LocalDomain) -> Result<()> {
        if self.restarts >= self.max_restarts {
            return Err(Error::Instability {
                restarts: self.restarts,
            });
        }
        self.restarts += 1;
        self.steps_per_cycle *= 2;
        info!(
            "instability restart {}: {} steps per cycle",
            self.restarts, self.steps_per_cycle
        );
        let converter = UnitConverter {
            voxel_size: self.voxel_size,
            steps_per_cycle: self.steps_per_cycle,
        };
        self.params = LbParameters::new(self.steps_per_cycle, self.voxel_size, self.stress_type);
        self.densities = BoundaryDensities::new(&self.inlets, &self.outlets, &converter);
        domain.set_initial_conditions(self.densities.mean_minimum_outlet_density());
        self.prev_velocity.clear();
        Ok(())
    }

    fn collide(&mut self, domain: &mut LocalDomain, region: SiteRegion) {
        let ranges: Vec<Range<usize>> = CollisionClass::ALL
            .iter()
            .map(|&class| domain.class_range(region, class))
            .collect();
        let mut ctx = KernelContext {
            f_old: &domain.f_old,
            f_new: &mut domain.f_new,
            stream_map: &domain.stream_map,
            site_data: &domain.site_data,
            surfaces: &domain.surfaces,
            params: &self.params,
            densities: &self.densities,
            stats: &mut self.stats,
        };
        for (kernel, range) in self.kernels.iter().zip(ranges) {
            if !range.is_empty() {
                kernel.collide(range, &mut ctx);
            }
        }
    }

    /// Emits (density, velocity magnitude, stress) of every site into the
    /// image pipeline.
    fn render(&self, domain: &LocalDomain, register: &mut dyn SiteRegister) {
        for site in 0..domain.site_count {
            let f = &domain.f_old[site * NUM_VECTORS..(site + 1) * NUM_VECTORS];
            let (density, momentum) = moments(f);
            let velocity = (momentum[0] * momentum[0]
                + momentum[1] * momentum[1]
                + momentum[2] * momentum[2])
                .sqrt()
                / density;
            let f_eq = equilibrium(density, momentum);
            let stress = kernels::von_mises_stress(&self.params, f, f_eq.as_slice());
            register.register_site(site, density, velocity, stress);
        }
    }

    /// Global convergence test on the velocity field.
    fn converged(&mut self, domain: &LocalDomain, comm: &mut dyn Communicator) -> Result<bool> {
        let mut velocities = Vec::with_capacity(domain.site_count);
        for site in 0..domain.site_count {
            let (density, momentum) = domain.moments_at(site);
            let speed = (momentum[0] * momentum[0]
                + momentum[1] * momentum[1]
                + momentum[2] * momentum[2])
                .sqrt()
                / density;
            velocities.push(speed);
        }

        let mut max_relative = 0.0f64;
        if self.prev_velocity.len() == velocities.len() {
            for (new, old) in velocities.iter().zip(&self.prev_velocity) {
                let scale = new.abs().max(1e-30);
                max_relative = max_relative.max((new - old).abs() / scale);
            }
        } else {
            max_relative = f64::INFINITY;
        }
        self.prev_velocity = velocities;

        // Relative differences are non-negative, so the IEEE bit pattern
        // orders like the value and a u64 max-reduction suffices.
        let global = f64::from_bits(comm.all_reduce_max(max_relative.to_bits())?);
        Ok(global < self.monitoring.relative_tolerance)
    }
}

/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Inlet and outlet density models.
//!
//! Each iolet prescribes a pulsatile pressure profile; converted to
//! lattice units it becomes a per-step boundary density the collision
//! kernels read. The conversion depends on the time-step length, so after
//! an instability restart the whole table is rebuilt under the doubled
//! cycle length.

use crate::config::IoletConfig;
use crate::lattice::{
    SiteType, BLOOD_DENSITY_KG_PER_M3, CS2, MMHG_TO_PASCAL, PULSATILE_PERIOD_S,
    REFERENCE_PRESSURE_MMHG,
};

/// Physical ↔ lattice unit conversions for a given discretisation.
#[derive(Debug, Clone, Copy)]
pub struct UnitConverter {
    pub voxel_size: f64,
    pub steps_per_cycle: usize,
}

impl UnitConverter {
    /// Seconds per time step.
    pub fn time_step(&self) -> f64 {
        PULSATILE_PERIOD_S / self.steps_per_cycle as f64
    }

    fn pressure_factor(&self) -> f64 {
        let dt_over_dx = self.time_step() / self.voxel_size;
        MMHG_TO_PASCAL * dt_over_dx * dt_over_dx / BLOOD_DENSITY_KG_PER_M3
    }

    /// Absolute pressure in mmHg to lattice density, relative to the
    /// reference pressure which maps to unit density.
    pub fn pressure_to_lattice_density(&self, mmhg: f64) -> f64 {
        (CS2 + (mmhg - REFERENCE_PRESSURE_MMHG) * self.pressure_factor()) / CS2
    }

    /// Pressure difference in mmHg to a lattice density amplitude.
    pub fn pressure_diff_to_lattice_density(&self, mmhg: f64) -> f64 {
        mmhg * self.pressure_factor() / CS2
    }
}

/// One iolet's cosine profile in lattice units.
#[derive(Debug, Clone, Copy)]
struct DensityProfile {
    avg: f64,
    amp: f64,
    phase: f64,
}

/// The per-step boundary densities of all iolets.
pub struct BoundaryDensities {
    inlets: Vec<DensityProfile>,
    outlets: Vec<DensityProfile>,
    steps_per_cycle: usize,
    inlet_density: Vec<f64>,
    outlet_density: Vec<f64>,
}

impl BoundaryDensities {
    pub fn new(
        inlets: &[IoletConfig],
        outlets: &[IoletConfig],
        converter: &UnitConverter,
    ) -> Self {
        let convert = |iolet: &IoletConfig| DensityProfile {
            avg: converter.pressure_to_lattice_density(iolet.pressure_avg_mmhg),
            amp: converter.pressure_diff_to_lattice_density(iolet.pressure_amp_mmhg),
            phase: iolet.phase_rad,
        };
        let inlets: Vec<_> = inlets.iter().map(convert).collect();
        let outlets: Vec<_> = outlets.iter().map(convert).collect();
        let mut densities = BoundaryDensities {
            inlet_density: vec![0.0; inlets.len()],
            outlet_density: vec![0.0; outlets.len()],
            inlets,
            outlets,
            steps_per_cycle: converter.steps_per_cycle,
        };
        densities.update(1, 0);
        densities
    }

    /// Refreshes the cached density tables for one time step of one
    /// cycle.
    pub fn update(&mut self, _cycle: usize, step: usize) {
        let w = 2.0 * std::f64::consts::PI / self.steps_per_cycle as f64;
        for (profile, density) in self.inlets.iter().zip(self.inlet_density.iter_mut()) {
            *density = profile.avg + profile.amp * (w * step as f64 + profile.phase).cos();
        }
        for (profile, density) in self.outlets.iter().zip(self.outlet_density.iter_mut()) {
            *density = profile.avg + profile.amp * (w * step as f64 + profile.phase).cos();
        }
    }

    /// The current density of one boundary, called from the iolet
    /// collision kernels.
    pub fn density_at(&self, site_type: SiteType, boundary_id: usize) -> f64 {
        match site_type {
            SiteType::Inlet => self.inlet_density[boundary_id],
            SiteType::Outlet => self.outlet_density[boundary_id],
            _ => panic!("only iolet sites carry a boundary id"),
        }
    }

    /// Average over outlets of the cycle-minimum density, the uniform
    /// state the lattice is re-initialised to after a restart. Unit
    /// density when the system has no outlets.
    pub fn mean_minimum_outlet_density(&self) -> f64 {
        if self.outlets.is_empty() {
            return 1.0;
        }
        self.outlets.iter().map(|p| p.avg - p.amp).sum::<f64>() / self.outlets.len() as f64
    }
}

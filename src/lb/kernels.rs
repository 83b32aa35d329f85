/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Collision kernels, one per site class.
//!
//! The iterator calls each kernel twice per step: once over its inter-site
//! range, once over its inner-site range. A kernel computes the
//! post-collision distributions of each site in the range and writes them
//! through the stream map, so streaming and the halo send region are
//! filled in the same pass.
//!
//! The closures here are the simple ones: BGK relaxation in the bulk,
//! half-way bounce-back on wall links, and an equilibrium reset to the
//! prescribed boundary density at iolets. Richer wall and iolet models
//! plug in through the same trait.

use std::ops::Range;

use super::iolets::BoundaryDensities;
use super::LbParameters;
use crate::geometry::SurfaceData;
use crate::lattice::{equilibrium, moments, SiteData, CX, CY, CZ, INVERSE, NUM_VECTORS};

/// Flow-field extrema accumulated while colliding, for reporting and the
/// incompressibility check.
#[derive(Debug, Clone, Copy)]
pub struct FlowStats {
    pub min_density: f64,
    pub max_density: f64,
    pub max_velocity: f64,
    pub max_stress: f64,
}

impl Default for FlowStats {
    fn default() -> Self {
        Self {
            min_density: f64::INFINITY,
            max_density: f64::NEG_INFINITY,
            max_velocity: 0.0,
            max_stress: 0.0,
        }
    }
}

impl FlowStats {
    fn record(&mut self, density: f64, velocity: f64, stress: f64) {
        self.min_density = self.min_density.min(density);
        self.max_density = self.max_density.max(density);
        self.max_velocity = self.max_velocity.max(velocity);
        self.max_stress = self.max_stress.max(stress);
    }
}

/// Everything a kernel may touch during one range sweep.
pub struct KernelContext<'a> {
    pub f_old: &'a [f64],
    pub f_new: &'a mut [f64],
    pub stream_map: &'a [usize],
    pub site_data: &'a [SiteData],
    pub surfaces: &'a [Option<SurfaceData>],
    pub params: &'a LbParameters,
    pub densities: &'a BoundaryDensities,
    pub stats: &'a mut FlowStats,
}

pub trait CollisionKernel {
    fn collide(&self, sites: Range<usize>, ctx: &mut KernelContext<'_>);
}

/// The kernel set in collision-class order.
pub fn default_kernels() -> [Box<dyn CollisionKernel>; 6] {
    [
        Box::new(BulkCollision),
        Box::new(WallCollision),
        Box::new(IoletCollision { bounce_back: false }),
        Box::new(IoletCollision { bounce_back: false }),
        Box::new(IoletCollision { bounce_back: true }),
        Box::new(IoletCollision { bounce_back: true }),
    ]
}

/// Plain BGK relaxation towards the local equilibrium.
pub struct BulkCollision;

impl CollisionKernel for BulkCollision {
    fn collide(&self, sites: Range<usize>, ctx: &mut KernelContext<'_>) {
        let f_old = ctx.f_old;
        for site in sites {
            let f = &f_old[site * NUM_VECTORS..(site + 1) * NUM_VECTORS];
            let (density, momentum) = moments(f);
            let f_eq = equilibrium(density, momentum);
            let omega = ctx.params.omega;
            record_site(ctx, density, momentum, f, &f_eq);
            for l in 0..NUM_VECTORS {
                ctx.f_new[ctx.stream_map[site * NUM_VECTORS + l]] =
                    f[l] + omega * (f[l] - f_eq[l]);
            }
        }
    }
}

/// BGK with half-way bounce-back on the directions that cross the wall
/// surface.
pub struct WallCollision;

impl CollisionKernel for WallCollision {
    fn collide(&self, sites: Range<usize>, ctx: &mut KernelContext<'_>) {
        let f_old = ctx.f_old;
        for site in sites {
            let f = &f_old[site * NUM_VECTORS..(site + 1) * NUM_VECTORS];
            let (density, momentum) = moments(f);
            let f_eq = equilibrium(density, momentum);
            let omega = ctx.params.omega;
            record_site(ctx, density, momentum, f, &f_eq);
            let data = ctx.site_data[site];
            ctx.f_new[ctx.stream_map[site * NUM_VECTORS]] = f[0] + omega * (f[0] - f_eq[0]);
            for l in 1..NUM_VECTORS {
                let post = f[l] + omega * (f[l] - f_eq[l]);
                if data.has_wall_link(l) {
                    // Reflected into the opposite direction of the same
                    // site; the rubbish slot swallows the stream target.
                    ctx.f_new[site * NUM_VECTORS + INVERSE[l]] = post;
                } else {
                    ctx.f_new[ctx.stream_map[site * NUM_VECTORS + l]] = post;
                }
            }
        }
    }
}

/// Equilibrium reset to the prescribed iolet density, with bounce-back on
/// wall links for the iolet-and-wall classes.
pub struct IoletCollision {
    bounce_back: bool,
}

impl CollisionKernel for IoletCollision {
    fn collide(&self, sites: Range<usize>, ctx: &mut KernelContext<'_>) {
        let f_old = ctx.f_old;
        for site in sites {
            let data = ctx.site_data[site];
            let f = &f_old[site * NUM_VECTORS..(site + 1) * NUM_VECTORS];
            let (_, momentum) = moments(f);
            let density = ctx.densities.density_at(data.site_type(), data.boundary_id());
            let f_eq = equilibrium(density, momentum);
            record_site(ctx, density, momentum, f, &f_eq);
            for l in 0..NUM_VECTORS {
                if self.bounce_back && l > 0 && data.has_wall_link(l) {
                    ctx.f_new[site * NUM_VECTORS + INVERSE[l]] = f_eq[l];
                } else {
                    ctx.f_new[ctx.stream_map[site * NUM_VECTORS + l]] = f_eq[l];
                }
            }
        }
    }
}

fn record_site(
    ctx: &mut KernelContext<'_>,
    density: f64,
    momentum: [f64; 3],
    f: &[f64],
    f_eq: &[f64],
) {
    let velocity =
        (momentum[0] * momentum[0] + momentum[1] * momentum[1] + momentum[2] * momentum[2]).sqrt()
            / density;
    let stress = von_mises_stress(ctx.params, f, f_eq);
    ctx.stats.record(density, velocity, stress);
}

/// Von Mises effective stress from the non-equilibrium second moment.
pub fn von_mises_stress(params: &LbParameters, f: &[f64], f_eq: &[f64]) -> f64 {
    let mut pi = [0.0f64; 6]; // xx, yy, zz, xy, yz, xz
    for l in 0..NUM_VECTORS {
        let neq = f[l] - f_eq[l];
        let (cx, cy, cz) = (CX[l] as f64, CY[l] as f64, CZ[l] as f64);
        pi[0] += neq * cx * cx;
        pi[1] += neq * cy * cy;
        pi[2] += neq * cz * cz;
        pi[3] += neq * cx * cy;
        pi[4] += neq * cy * cz;
        pi[5] += neq * cx * cz;
    }
    let deviator = (pi[0] - pi[1]).powi(2) + (pi[1] - pi[2]).powi(2) + (pi[2] - pi[0]).powi(2);
    let shear = pi[3] * pi[3] + pi[4] * pi[4] + pi[5] * pi[5];
    params.stress_parameter * (0.5 * (deviator + 6.0 * shear)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::StressType;
    use crate::lattice::WEIGHTS;

    fn context_fixture<'a>(
        f_old: &'a [f64],
        f_new: &'a mut [f64],
        stream_map: &'a [usize],
        site_data: &'a [SiteData],
        surfaces: &'a [Option<SurfaceData>],
        params: &'a LbParameters,
        densities: &'a BoundaryDensities,
        stats: &'a mut FlowStats,
    ) -> KernelContext<'a> {
        KernelContext {
            f_old,
            f_new,
            stream_map,
            site_data,
            surfaces,
            params,
            densities,
            stats,
        }
    }

    #[test]
    fn bulk_collision_preserves_equilibrium() {
        let params = LbParameters::new(1000, 1e-4, StressType::IgnoreStress);
        let densities = BoundaryDensities::new(
            &[],
            &[],
            &super::super::iolets::UnitConverter {
                voxel_size: 1e-4,
                steps_per_cycle: 1000,
            },
        );
        // One site streaming onto itself plus a rubbish slot.
        let f_old: Vec<f64> = WEIGHTS.to_vec();
        let mut f_new = vec![0.0; NUM_VECTORS + 1];
        let stream_map: Vec<usize> = (0..NUM_VECTORS).collect();
        let site_data = vec![SiteData(1)];
        let surfaces = vec![None];
        let mut stats = FlowStats::default();
        let mut ctx = context_fixture(
            &f_old,
            &mut f_new,
            &stream_map,
            &site_data,
            &surfaces,
            &params,
            &densities,
            &mut stats,
        );
        BulkCollision.collide(0..1, &mut ctx);
        for l in 0..NUM_VECTORS {
            assert!((f_new[l] - WEIGHTS[l]).abs() < 1e-15);
        }
        assert!((stats.min_density - 1.0).abs() < 1e-12);
        assert!(stats.max_velocity < 1e-12);
    }
}

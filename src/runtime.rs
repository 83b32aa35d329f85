/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The per-rank runtime aggregate.
//!
//! [`run`] wires the subsystems in dependency order (geometry file, block
//! decomposition, partition refinement, local lattice data, LB iterator,
//! image reducer) and owns the simulation loop, including the restart
//! policy and the single-line fatal diagnostic. There is no global state:
//! every component receives its configuration explicitly and lives for
//! one run.

use log::{error, info, warn};

use crate::comm::Communicator;
use crate::config::SimConfig;
use crate::decomposition::{assign_blocks, refine, PropagationPartitioner};
use crate::domain::LocalDomain;
use crate::error::Result;
use crate::geometry::GeometryFile;
use crate::image::{ImageReducer, PixelSet, PixelValue, ReducerConfig};
use crate::lb::{FlowStats, Lbm, SiteRegister, Stability};

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Keep rank 0 free of fluid sites for steering and composition.
    pub reserve_leader: bool,
    pub reducer: ReducerConfig,
    /// Request a rendering every this many iterations.
    pub render_period: Option<u64>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            reserve_leader: false,
            reducer: ReducerConfig::default(),
            render_period: None,
        }
    }
}

/// What one rank saw of a completed run.
pub struct RuntimeReport {
    /// Iterations of the final, stable attempt.
    pub steps: u64,
    pub restarts: usize,
    /// Composites emitted on this rank (root only).
    pub composites: Vec<(u64, PixelSet)>,
    /// Flow extrema of the last step.
    pub stats: FlowStats,
    pub converged: bool,
}

/// Runs the whole simulation on this rank. Collective: every rank of the
/// world must call it with identical configuration.
pub fn run(
    comm: &mut dyn Communicator,
    config: &SimConfig,
    options: &RuntimeOptions,
) -> Result<RuntimeReport> {
    match run_inner(comm, config, options) {
        Ok(report) => Ok(report),
        Err(e) => {
            // The single user-visible diagnostic line before the abort.
            error!("{} on rank {}: {}", e.kind(), comm.rank(), e);
            Err(e)
        }
    }
}

fn run_inner(
    comm: &mut dyn Communicator,
    config: &SimConfig,
    options: &RuntimeOptions,
) -> Result<RuntimeReport> {
    let rank = comm.rank();

    let file = GeometryFile::open(&config.data_file_path)?;
    let proc_for_block = assign_blocks(
        &file.preamble,
        &file.sites_per_block,
        comm.size(),
        options.reserve_leader,
    );
    let store = file.read_blocks(rank, &proc_for_block)?;
    let partitioner = PropagationPartitioner::default();
    let (store, moves) = refine(
        &file,
        store,
        &proc_for_block,
        &partitioner,
        comm,
        options.reserve_leader,
    )?;
    if rank == 0 {
        info!("decomposition settled after {} site moves", moves.len());
    }

    let mut domain = LocalDomain::build(&store, comm)?;
    drop(store);

    if !config.property_outputs.is_empty() && rank == 0 {
        // Field extraction formats live outside the core.
        warn!(
            "{} property outputs requested but no extractor is attached",
            config.property_outputs.len()
        );
    }

    let mut lbm = Lbm::new(config, file.preamble.voxel_size);
    lbm.set_initial_conditions(&mut domain);
    let mut reducer = ImageReducer::new(
        rank,
        comm.size(),
        config.total_time_steps as u64,
        options.reducer,
    );

    let total_steps = config.total_time_steps as u64;
    let payload_bytes = options.reducer.payload_bytes;
    let coords = domain.coords.clone();

    let mut iteration = 0u64;
    let mut cycle = 1usize;
    let mut step = 1usize;
    let mut converged = false;

    while iteration < total_steps {
        iteration += 1;
        let render_now = options
            .render_period
            .is_some_and(|period| iteration % period == 0);

        let mut pixels = PixelSet::new(payload_bytes);
        let stability = if render_now {
            // Minimal projection along z: screen coordinates are the site
            // column, depth is the site's z.
            let mut project = |site: usize, density: f64, velocity: f64, stress: f64| {
                let [i, j, k] = coords[site];
                let mut payload = Vec::with_capacity(payload_bytes);
                payload.extend_from_slice(&(density as f32).to_ne_bytes());
                payload.extend_from_slice(&(velocity as f32).to_ne_bytes());
                payload.extend_from_slice(&(stress as f32).to_ne_bytes());
                payload.resize(payload_bytes, 0);
                pixels.insert(
                    (i as u32, j as u32),
                    PixelValue {
                        depth: k as f64,
                        source_rank: rank as u32,
                        payload,
                    },
                );
            };
            lbm.step(
                &mut domain,
                comm,
                {
                    let project: &mut dyn SiteRegister = &mut project;
                    Some(project)
                },
                cycle,
                step,
            )?
        } else {
            lbm.step(&mut domain, comm, None, cycle, step)?
        };

        match stability {
            Stability::Unstable => {
                lbm.restart(&mut domain)?;
                reducer.reset();
                iteration = 0;
                cycle = 1;
                step = 1;
                continue;
            }
            Stability::StableAndConverged => {
                converged = true;
            }
            Stability::Stable => {}
        }

        if render_now {
            reducer.start(iteration, pixels, comm)?;
        }
        reducer.advance(iteration, comm)?;

        if converged && config.monitoring.terminate_on_convergence {
            info!("rank {}: converged on iteration {}", rank, iteration);
            break;
        }

        if config.monitoring.incompressibility_check && step == lbm.steps_per_cycle {
            report_density_spread(comm, &lbm.stats)?;
        }

        step += 1;
        if step > lbm.steps_per_cycle {
            step = 1;
            cycle += 1;
        }
    }

    Ok(RuntimeReport {
        steps: iteration,
        restarts: lbm.restarts(),
        composites: std::mem::take(&mut reducer.completed),
        stats: lbm.stats,
        converged,
    })
}

/// Once per cycle, the global density spread as an incompressibility
/// indicator.
fn report_density_spread(comm: &mut dyn Communicator, stats: &FlowStats) -> Result<()> {
    let extrema = comm.all_gather(crate::comm::bytes::from_f64s(&[
        stats.min_density,
        stats.max_density,
    ]))?;
    if comm.rank() == 0 {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for payload in &extrema {
            let pair = crate::comm::bytes::to_f64s(payload);
            min = min.min(pair[0]);
            max = max.max(pair[1]);
        }
        if min.is_finite() && max.is_finite() {
            let spread = (max - min) / min.max(f64::MIN_POSITIVE);
            info!("density spread over the cycle: {:.3e}", spread);
        }
    }
    Ok(())
}

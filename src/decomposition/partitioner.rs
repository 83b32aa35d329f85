/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The graph partitioner seam.
//!
//! The optimiser talks to a [`Partitioner`] the way the legacy code talked
//! to an external k-way partitioning library: uniform vertex and edge
//! weights, a target part count and an imbalance tolerance in, one part
//! per local vertex out. The default implementation is a deterministic
//! k-way label propagation: every rank assembles the full site graph (one
//! all-gather; the graph was built to be partitioned once, at start-up)
//! and runs identical sweeps, so the outcome is bitwise reproducible
//! across runs and ranks.

use dsi_progress_logger::prelude::*;
use log::{debug, info};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::graph::SiteGraph;
use crate::comm::{bytes, Communicator};
use crate::error::{Error, Result};

/// Imbalance tolerance used by the optimiser: no part may exceed the ideal
/// share by more than half a percent.
pub const DEFAULT_IMBALANCE_TOLERANCE: f64 = 1.005;

pub trait Partitioner {
    /// Computes a part in `0..nparts` for every local vertex of `graph`.
    ///
    /// Collective: every rank must call with the same `nparts` and
    /// `imbalance`.
    fn partition(
        &self,
        graph: &SiteGraph,
        comm: &mut dyn Communicator,
        nparts: usize,
        imbalance: f64,
    ) -> Result<Vec<usize>>;
}

/// Deterministic k-way label propagation over the gathered site graph.
pub struct PropagationPartitioner {
    /// Upper bound on refinement sweeps; propagation usually settles much
    /// earlier.
    pub max_sweeps: usize,
    /// Seed of the per-sweep visit-order shuffle.
    pub seed: u64,
}

impl Default for PropagationPartitioner {
    fn default() -> Self {
        Self {
            max_sweeps: 16,
            seed: 0x4c42,
        }
    }
}

impl Partitioner for PropagationPartitioner {
    fn partition(
        &self,
        graph: &SiteGraph,
        comm: &mut dyn Communicator,
        nparts: usize,
        imbalance: f64,
    ) -> Result<Vec<usize>> {
        let rank = comm.rank();
        let total = graph.total_vertices();
        if nparts == 0 || total == 0 {
            return Err(Error::Partition(format!(
                "cannot split {} vertices into {} parts",
                total, nparts
            )));
        }

        let (offsets, adjacency) = gather_graph(graph, comm)?;
        debug_assert_eq!(offsets.len(), total + 1);

        // Seed labels with balanced contiguous ranges of the global
        // numbering; sites are numbered rank-by-rank, so this starts close
        // to the region-grown assignment.
        let mut labels: Vec<usize> = (0..total)
            .map(|v| ((v * nparts) / total).min(nparts - 1))
            .collect();
        let mut volumes = vec![0usize; nparts];
        for &label in &labels {
            volumes[label] += 1;
        }
        let cap = (((total as f64 / nparts as f64) * imbalance).ceil() as usize).max(1);

        let mut order: Vec<usize> = (0..total).collect();
        let mut counts = vec![0usize; nparts];
        let mut touched = Vec::new();

        let mut pl = progress_logger!(
            item_name = "sweep",
            expected_updates = Some(self.max_sweeps),
        );
        pl.start("Refining the site partition...");
        for sweep in 0..self.max_sweeps {
            let mut rng = SmallRng::seed_from_u64(self.seed.wrapping_add(sweep as u64));
            order.shuffle(&mut rng);

            let mut moved = 0usize;
            for &v in &order {
                let current = labels[v];
                for &n in &adjacency[offsets[v]..offsets[v + 1]] {
                    let label = labels[n];
                    if counts[label] == 0 {
                        touched.push(label);
                    }
                    counts[label] += 1;
                }

                let mut best = current;
                let mut best_count = counts[current];
                for &label in &touched {
                    // Strictly better neighbourhoods only; ties go to the
                    // smaller part id for determinism.
                    if counts[label] > best_count
                        || (counts[label] == best_count && label < best)
                    {
                        best = label;
                        best_count = counts[label];
                    }
                }
                for &label in &touched {
                    counts[label] = 0;
                }
                touched.clear();

                if best != current
                    && counts_allow_move(&volumes, current, best, cap)
                {
                    volumes[current] -= 1;
                    volumes[best] += 1;
                    labels[v] = best;
                    moved += 1;
                }
            }
            debug!("partition sweep {}: {} moves", sweep, moved);
            pl.update();
            if moved == 0 {
                break;
            }
        }
        pl.done();

        if rank == 0 {
            info!(
                "partition volumes: min {}, max {} (cap {})",
                volumes.iter().min().unwrap(),
                volumes.iter().max().unwrap(),
                cap
            );
        }

        let range = graph.local_range(rank);
        Ok(labels[range].to_vec())
    }
}

/// A move must keep the target under the imbalance cap and may not drain a
/// part empty.
fn counts_allow_move(volumes: &[usize], from: usize, to: usize, cap: usize) -> bool {
    volumes[to] < cap && volumes[from] > 1
}

/// All-gathers the per-rank adjacency shares into one graph.
fn gather_graph(
    graph: &SiteGraph,
    comm: &mut dyn Communicator,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut share: Vec<u64> = Vec::with_capacity(graph.offsets.len() + graph.adjacency.len() + 1);
    share.push(graph.offsets.len() as u64 - 1);
    share.extend(graph.offsets.iter().map(|&o| o as u64));
    share.extend(graph.adjacency.iter().map(|&a| a as u64));

    let gathered = comm.all_gather(bytes::from_u64s(&share))?;

    let total = graph.total_vertices();
    let mut offsets = Vec::with_capacity(total + 1);
    offsets.push(0usize);
    let mut adjacency = Vec::new();
    for payload in &gathered {
        let words = bytes::to_u64s(payload);
        let local_count = words[0] as usize;
        let local_offsets = &words[1..local_count + 2];
        let local_adjacency = &words[local_count + 2..];
        debug_assert_eq!(local_adjacency.len(), local_offsets[local_count] as usize);
        for v in 0..local_count {
            let begin = local_offsets[v] as usize;
            let end = local_offsets[v + 1] as usize;
            adjacency.extend(local_adjacency[begin..end].iter().map(|&n| n as usize));
            offsets.push(adjacency.len());
        }
    }
    if offsets.len() != total + 1 {
        return Err(Error::Partition(format!(
            "gathered {} vertices, expected {}",
            offsets.len() - 1,
            total
        )));
    }
    Ok((offsets, adjacency))
}

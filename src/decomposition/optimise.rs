/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Refinement of the block decomposition into per-site assignments.
//!
//! The fluid-site graph is handed to the [`Partitioner`]; every vertex the
//! partitioner moves off its rank becomes a `(global site, target rank)`
//! move. Move lists are all-gathered so each rank applies the identical
//! update, then the geometry is re-read under the new assignment: blocks
//! with freshly owned sites are decoded, and sites that stay put keep
//! their original numbering because both the re-read and the numbering
//! walk blocks in the same row-major order.

use itertools::Itertools;
use log::info;

use super::block_map_rank;
use super::graph::{self, fluid_ordinals, SiteNumbering};
use super::partitioner::{Partitioner, DEFAULT_IMBALANCE_TOLERANCE};
use crate::comm::{bytes, Communicator, Rank};
use crate::error::{Error, Result};
use crate::geometry::{GeometryFile, GeometryStore, SiteRank};

/// A site assignment change produced by the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub global_site: usize,
    pub target: Rank,
}

/// Runs the partitioner and applies its verdict, returning the re-read
/// store and the applied moves (identical on every rank).
pub fn refine(
    file: &GeometryFile,
    store: GeometryStore,
    proc_for_block: &[Option<Rank>],
    partitioner: &dyn Partitioner,
    comm: &mut dyn Communicator,
    reserve_leader: bool,
) -> Result<(GeometryStore, Vec<Move>)> {
    let rank = comm.rank();
    let size = comm.size();
    let first_rank = block_map_rank(reserve_leader, size);
    let nparts = size - first_rank;

    let numbering = SiteNumbering::new(
        &store.preamble,
        &store.sites_per_block,
        proc_for_block,
        size,
    );
    let site_graph = graph::build(&store, proc_for_block, &numbering, rank);

    let parts = partitioner.partition(
        &site_graph,
        comm,
        nparts,
        DEFAULT_IMBALANCE_TOLERANCE,
    )?;
    let local_range = site_graph.local_range(rank);
    if parts.len() != local_range.len() {
        return Err(Error::Partition(format!(
            "partitioner returned {} parts for {} local vertices",
            parts.len(),
            local_range.len()
        )));
    }

    // Collect and share the local moves.
    let mut local_moves = Vec::new();
    for (offset, &part) in parts.iter().enumerate() {
        if part >= nparts {
            return Err(Error::Partition(format!(
                "part {} out of range for {} parts",
                part, nparts
            )));
        }
        let target = part + first_rank;
        if target != rank {
            local_moves.push((local_range.start + offset) as u64);
            local_moves.push(target as u64);
        }
    }
    let gathered = comm.all_gather(bytes::from_u64s(&local_moves))?;
    let mut moves = Vec::new();
    for payload in &gathered {
        for (global_site, target) in bytes::to_u64s(payload).into_iter().tuples() {
            moves.push(Move {
                global_site: global_site as usize,
                target: target as usize,
            });
        }
    }

    validate_counts(&numbering, &moves, size, first_rank)?;
    info!(
        "partition refinement: {} of {} sites move",
        moves.len(),
        site_graph.total_vertices()
    );

    // Re-read with freshly owned blocks added to this rank's set.
    let mut read_map = proc_for_block.to_vec();
    for mv in moves.iter().filter(|mv| mv.target == rank) {
        let (block, _) = numbering
            .locate(&store.sites_per_block, proc_for_block, mv.global_site)
            .ok_or_else(|| {
                Error::Partition(format!(
                    "move targets unknown global site {}",
                    mv.global_site
                ))
            })?;
        read_map[block] = Some(rank);
    }
    let mut new_store = file.read_blocks(rank, &read_map)?;

    // The re-read tagged sites with the overlay map; restore the original
    // block-level assignment, then lay the moves on top.
    for block in 0..new_store.blocks.len() {
        if new_store.blocks[block].is_none() {
            continue;
        }
        let original = proc_for_block[block];
        let data = new_store.blocks[block].as_mut().unwrap();
        for site_rank in data.site_ranks.iter_mut() {
            if *site_rank != SiteRank::Solid {
                *site_rank = match original {
                    Some(owner) => SiteRank::Rank(owner),
                    None => SiteRank::Unassigned,
                };
            }
        }
    }
    for mv in &moves {
        let (block, ordinal) = numbering
            .locate(&new_store.sites_per_block, proc_for_block, mv.global_site)
            .expect("validated move lost its block");
        if new_store.blocks[block].is_none() {
            continue;
        }
        let within = nth_fluid_site(&new_store, block, ordinal);
        new_store.set_site_rank(block, within, SiteRank::Rank(mv.target));
    }

    Ok((new_store, moves))
}

/// Checks that the moved assignment leaves no participating rank without
/// fluid sites and conserves the total.
fn validate_counts(
    numbering: &SiteNumbering,
    moves: &[Move],
    size: usize,
    first_rank: Rank,
) -> Result<()> {
    let mut per_rank: Vec<i64> = (0..size)
        .map(|r| (numbering.vtxdist[r + 1] - numbering.vtxdist[r]) as i64)
        .collect();
    for mv in moves {
        let owner = (0..size)
            .find(|&r| {
                mv.global_site >= numbering.vtxdist[r] && mv.global_site < numbering.vtxdist[r + 1]
            })
            .ok_or_else(|| {
                Error::Partition(format!("global site {} outside vtxdist", mv.global_site))
            })?;
        per_rank[owner] -= 1;
        per_rank[mv.target] += 1;
    }
    for (rank, &count) in per_rank.iter().enumerate() {
        if rank >= first_rank && count <= 0 {
            return Err(Error::Partition(format!(
                "rank {} left with no fluid sites",
                rank
            )));
        }
    }
    Ok(())
}

/// Site index within `block` of its `ordinal`-th fluid site.
fn nth_fluid_site(store: &GeometryStore, block: usize, ordinal: usize) -> usize {
    let ordinals = fluid_ordinals(store, block).expect("resident block");
    ordinals
        .iter()
        .position(|&o| o == ordinal as u32)
        .expect("fluid ordinal out of range")
}

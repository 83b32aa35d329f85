/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The distributed fluid-site graph fed to the partitioner.
//!
//! Fluid sites are numbered globally: ranks hold consecutive ranges
//! (`vtxdist`), and within a rank sites follow the row-major order of its
//! blocks and, inside each block, the row-major order of sites with solids
//! skipped. Adjacency edges go to the fluid lattice neighbours; weights
//! are uniform and self-links do not arise.

use std::ops::Range;

use crate::comm::Rank;
use crate::geometry::{GeometryStore, Preamble};
use crate::lattice::{CX, CY, CZ, NUM_VECTORS};

/// One rank's share of the site graph.
pub struct SiteGraph {
    /// `vtxdist[r]..vtxdist[r + 1]` is the global vertex range of rank
    /// `r`; `vtxdist.len()` is the world size plus one.
    pub vtxdist: Vec<usize>,
    /// Cumulative adjacency counts of the local vertices, with a leading
    /// zero.
    pub offsets: Vec<usize>,
    /// Flattened adjacency, as global vertex ids.
    pub adjacency: Vec<usize>,
}

impl SiteGraph {
    pub fn total_vertices(&self) -> usize {
        *self.vtxdist.last().unwrap()
    }

    pub fn local_range(&self, rank: Rank) -> Range<usize> {
        self.vtxdist[rank]..self.vtxdist[rank + 1]
    }

    pub fn neighbours(&self, local_vertex: usize) -> &[usize] {
        &self.adjacency[self.offsets[local_vertex]..self.offsets[local_vertex + 1]]
    }
}

/// Global numbering support: `vtxdist` plus the first global site index of
/// every fluid block (`None` for solid blocks).
pub struct SiteNumbering {
    pub vtxdist: Vec<usize>,
    pub first_site_of_block: Vec<Option<usize>>,
}

impl SiteNumbering {
    pub fn new(
        preamble: &Preamble,
        sites_per_block: &[u32],
        proc_for_block: &[Option<Rank>],
        size: usize,
    ) -> Self {
        let mut sites_per_proc = vec![0usize; size];
        for (block, proc) in proc_for_block.iter().enumerate() {
            if let Some(rank) = proc {
                sites_per_proc[*rank] += sites_per_block[block] as usize;
            }
        }

        let mut vtxdist = vec![0usize; size + 1];
        for rank in 0..size {
            vtxdist[rank + 1] = vtxdist[rank] + sites_per_proc[rank];
        }

        // Within a rank, blocks are numbered in the order the row-major
        // walk encounters them.
        let mut cursor: Vec<usize> = vtxdist[..size].to_vec();
        let mut first_site_of_block = vec![None; preamble.block_count()];
        for block in 0..preamble.block_count() {
            if let Some(rank) = proc_for_block[block] {
                first_site_of_block[block] = Some(cursor[rank]);
                cursor[rank] += sites_per_block[block] as usize;
            }
        }

        SiteNumbering {
            vtxdist,
            first_site_of_block,
        }
    }

    /// Finds the block containing global site `vertex` and the number of
    /// fluid sites of that block preceding it.
    pub fn locate(
        &self,
        sites_per_block: &[u32],
        proc_for_block: &[Option<Rank>],
        vertex: usize,
    ) -> Option<(usize, usize)> {
        for block in 0..self.first_site_of_block.len() {
            if proc_for_block[block].is_none() {
                continue;
            }
            let first = self.first_site_of_block[block]?;
            if vertex >= first && vertex < first + sites_per_block[block] as usize {
                return Some((block, vertex - first));
            }
        }
        None
    }
}

/// For every site of a resident block, its fluid ordinal within the block,
/// or `u32::MAX` for solids.
pub fn fluid_ordinals(store: &GeometryStore, block: usize) -> Option<Box<[u32]>> {
    let data = store.block(block)?;
    let mut ordinals = vec![u32::MAX; data.site_data.len()];
    let mut next = 0u32;
    for (site, word) in data.site_data.iter().enumerate() {
        if !word.is_solid() {
            ordinals[site] = next;
            next += 1;
        }
    }
    Some(ordinals.into_boxed_slice())
}

/// Builds the local share of the site graph.
///
/// All blocks of `local_rank` plus their fluid 26-neighbours must be
/// resident in `store`, which the reader's retention rule guarantees.
pub fn build(
    store: &GeometryStore,
    proc_for_block: &[Option<Rank>],
    numbering: &SiteNumbering,
    local_rank: Rank,
) -> SiteGraph {
    let preamble = &store.preamble;
    let size = preamble.block_size;
    let shift = preamble.log2_block_size();

    let ordinals: Vec<Option<Box<[u32]>>> = (0..preamble.block_count())
        .map(|block| fluid_ordinals(store, block))
        .collect();

    let local_count = numbering.vtxdist[local_rank + 1] - numbering.vtxdist[local_rank];
    let mut offsets = Vec::with_capacity(local_count + 1);
    offsets.push(0);
    let mut adjacency = Vec::new();

    for block in 0..preamble.block_count() {
        if proc_for_block[block] != Some(local_rank) {
            continue;
        }
        let data = store
            .block(block)
            .expect("own block not resident while building the site graph");
        let (bi, bj, bk) = preamble.block_coords(block);

        let mut within = 0;
        for ii in 0..size {
            for jj in 0..size {
                for kk in 0..size {
                    let word = data.site_data[within];
                    within += 1;
                    if word.is_solid() {
                        continue;
                    }
                    let site_i = ((bi << shift) + ii) as i64;
                    let site_j = ((bj << shift) + jj) as i64;
                    let site_k = ((bk << shift) + kk) as i64;

                    for l in 1..NUM_VECTORS {
                        let ni = site_i + CX[l] as i64;
                        let nj = site_j + CY[l] as i64;
                        let nk = site_k + CZ[l] as i64;
                        if let Some(global) =
                            global_site_id(store, numbering, &ordinals, ni, nj, nk)
                        {
                            adjacency.push(global);
                        }
                    }
                    offsets.push(adjacency.len());
                }
            }
        }
    }
    debug_assert_eq!(offsets.len(), local_count + 1);

    SiteGraph {
        vtxdist: numbering.vtxdist.clone(),
        offsets,
        adjacency,
    }
}

/// Global id of the fluid site at the given coordinates, or `None` when
/// the coordinates leave the lattice or land on a solid.
fn global_site_id(
    store: &GeometryStore,
    numbering: &SiteNumbering,
    ordinals: &[Option<Box<[u32]>>],
    i: i64,
    j: i64,
    k: i64,
) -> Option<usize> {
    if !store.preamble.site_in_lattice(i, j, k) {
        return None;
    }
    let (block, within) = store
        .preamble
        .site_to_block(i as usize, j as usize, k as usize);
    let ordinal = ordinals[block].as_ref()?[within];
    if ordinal == u32::MAX {
        return None;
    }
    Some(numbering.first_site_of_block[block]? + ordinal as usize)
}

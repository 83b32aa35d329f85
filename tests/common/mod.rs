/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Shared fixtures: synthetic box geometries in the on-disk layout the
//! setup tool produces.

#![allow(dead_code)]

use std::path::PathBuf;

use hemoflow::geometry::{
    Boundary, GeometryStore, Preamble, SiteRank, StressType, SurfaceData,
};
use hemoflow::lattice::{pack_site_data, SiteType, CX, CY, CZ, NUM_VECTORS};

pub fn preamble(blocks: (usize, usize, usize), block_size: usize) -> Preamble {
    Preamble {
        stress_type: StressType::ShearStress,
        blocks_x: blocks.0,
        blocks_y: blocks.1,
        blocks_z: blocks.2,
        block_size,
        voxel_size: 1e-4,
        origin: [0.0; 3],
    }
}

/// A fully fluid box. Sites whose lattice vectors leave the box carry the
/// matching wall links and a wall surface, as the setup tool would write
/// them.
pub fn box_geometry(blocks: (usize, usize, usize), block_size: usize) -> GeometryStore {
    let preamble = preamble(blocks, block_size);
    let extent = [
        preamble.sites_x() as i64,
        preamble.sites_y() as i64,
        preamble.sites_z() as i64,
    ];
    GeometryStore::from_sites(preamble, |i, j, k| {
        let mut wall_links = 0u32;
        for l in 1..NUM_VECTORS {
            let ni = i as i64 + CX[l] as i64;
            let nj = j as i64 + CY[l] as i64;
            let nk = k as i64 + CZ[l] as i64;
            let outside = ni < 0
                || nj < 0
                || nk < 0
                || ni >= extent[0]
                || nj >= extent[1]
                || nk >= extent[2];
            if outside {
                wall_links |= 1 << (l - 1);
            }
        }
        let data = pack_site_data(SiteType::Fluid, wall_links, 0, 0, false);
        let surface = (wall_links != 0).then(|| SurfaceData {
            iolet: None,
            wall: Some(Boundary {
                normal: [0.0, 0.0, 1.0],
                distance: 0.5,
            }),
            cut_distances: [0.5; NUM_VECTORS - 1],
        });
        (data, surface)
    })
}

/// Tags every fluid site of every resident block with its block's rank.
pub fn assign_by_block(store: &mut GeometryStore, proc_for_block: &[Option<usize>]) {
    for block in 0..store.blocks.len() {
        let rank = proc_for_block[block];
        if let Some(data) = store.blocks[block].as_mut() {
            for site_rank in data.site_ranks.iter_mut() {
                if *site_rank != SiteRank::Solid {
                    *site_rank = match rank {
                        Some(rank) => SiteRank::Rank(rank),
                        None => SiteRank::Unassigned,
                    };
                }
            }
        }
    }
}

/// Blocks owned by rank 0 everywhere (solid blocks excepted).
pub fn all_on_rank_zero(store: &GeometryStore) -> Vec<Option<usize>> {
    store
        .sites_per_block
        .iter()
        .map(|&sites| (sites > 0).then_some(0))
        .collect()
}

/// Writes the store into `dir` and returns the file path.
pub fn write_geometry(dir: &std::path::Path, store: &GeometryStore) -> PathBuf {
    let path = dir.join("geometry.dat");
    hemoflow::geometry::save(store, &path).expect("could not write fixture geometry");
    path
}

/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! In-memory representation of the geometry file.
//!
//! The lattice is a Cartesian grid of cubic blocks of `B³` sites, `B` a
//! power of two. A block is either fully solid, in which case no storage is
//! allocated for it, or resident with per-site data. Each rank keeps only
//! the blocks it owns plus the 26-connected neighbour blocks that contain
//! fluid; everything else stays `None`.

mod reader;
mod writer;
pub mod xdr;

pub use reader::{GeometryFile, READ_BLOCKS_PER_BATCH};
pub use writer::save;

use crate::lattice::{SiteData, NUM_VECTORS};

/// How the effective stress is derived from the stress tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StressType {
    VonMises = 0,
    ShearStress = 1,
    IgnoreStress = 2,
}

impl StressType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(StressType::VonMises),
            1 => Some(StressType::ShearStress),
            2 => Some(StressType::IgnoreStress),
            _ => None,
        }
    }
}

/// The fixed-size section at the head of a geometry file.
#[derive(Debug, Clone)]
pub struct Preamble {
    pub stress_type: StressType,
    pub blocks_x: usize,
    pub blocks_y: usize,
    pub blocks_z: usize,
    pub block_size: usize,
    pub voxel_size: f64,
    pub origin: [f64; 3],
}

impl Preamble {
    pub fn block_count(&self) -> usize {
        self.blocks_x * self.blocks_y * self.blocks_z
    }

    pub fn sites_per_block(&self) -> usize {
        self.block_size * self.block_size * self.block_size
    }

    pub fn sites_x(&self) -> usize {
        self.blocks_x * self.block_size
    }

    pub fn sites_y(&self) -> usize {
        self.blocks_y * self.block_size
    }

    pub fn sites_z(&self) -> usize {
        self.blocks_z * self.block_size
    }

    /// `log2(block_size)`, used to split site coordinates into block and
    /// within-block parts by shifting.
    pub fn log2_block_size(&self) -> u32 {
        self.block_size.trailing_zeros()
    }

    /// Row-major block id from block coordinates.
    pub fn block_id(&self, bi: usize, bj: usize, bk: usize) -> usize {
        (bi * self.blocks_y + bj) * self.blocks_z + bk
    }

    /// Block coordinates from a row-major block id.
    pub fn block_coords(&self, block: usize) -> (usize, usize, usize) {
        let bk = block % self.blocks_z;
        let rest = block / self.blocks_z;
        (rest / self.blocks_y, rest % self.blocks_y, bk)
    }

    pub fn site_in_lattice(&self, i: i64, j: i64, k: i64) -> bool {
        i >= 0
            && j >= 0
            && k >= 0
            && (i as usize) < self.sites_x()
            && (j as usize) < self.sites_y()
            && (k as usize) < self.sites_z()
    }

    /// Splits global site coordinates into `(block id, site index within
    /// the block)`, both row-major.
    pub fn site_to_block(&self, i: usize, j: usize, k: usize) -> (usize, usize) {
        let shift = self.log2_block_size();
        let (bi, bj, bk) = (i >> shift, j >> shift, k >> shift);
        let (ii, jj, kk) = (
            i - (bi << shift),
            j - (bj << shift),
            k - (bk << shift),
        );
        let within = (((ii << shift) + jj) << shift) + kk;
        (self.block_id(bi, bj, bk), within)
    }
}

/// Owner of one block site during and after decomposition.
///
/// The legacy representation overloaded one sentinel for both "solid" and
/// "off-rank unknown"; here a solid site is always `Solid` and a fluid
/// site is `Unassigned` only until the block decomposition has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteRank {
    Solid,
    Unassigned,
    Rank(usize),
}

impl SiteRank {
    pub fn rank(self) -> Option<usize> {
        match self {
            SiteRank::Rank(r) => Some(r),
            _ => None,
        }
    }
}

/// An iolet or wall surface element: unit normal plus distance in lattice
/// units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundary {
    pub normal: [f64; 3],
    pub distance: f64,
}

/// Surface payload of a site whose record carries more than the packed
/// word.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceData {
    pub iolet: Option<Boundary>,
    pub wall: Option<Boundary>,
    /// Cut distances along the non-rest lattice vectors, each in `[0, 1]`
    /// where the surface cuts the vector.
    pub cut_distances: [f64; NUM_VECTORS - 1],
}

/// Per-site storage of one resident block.
pub struct BlockData {
    pub site_data: Box<[SiteData]>,
    pub site_ranks: Box<[SiteRank]>,
    pub surfaces: Box<[Option<SurfaceData>]>,
}

/// The blocks of the lattice as seen by one rank.
pub struct GeometryStore {
    pub preamble: Preamble,
    /// Fluid sites per block, from the file header. Zero means fully
    /// solid.
    pub sites_per_block: Vec<u32>,
    /// Record length per block in the file body, from the header.
    pub bytes_per_block: Vec<u32>,
    pub blocks: Vec<Option<BlockData>>,
}

impl GeometryStore {
    /// Builds a fully resident store from a per-site description, used by
    /// tooling and tests that synthesise lattices.
    ///
    /// `site` receives global site coordinates and returns the packed word
    /// plus the surface payload where the word requires one.
    pub fn from_sites(
        preamble: Preamble,
        mut site: impl FnMut(usize, usize, usize) -> (SiteData, Option<SurfaceData>),
    ) -> Self {
        let block_count = preamble.block_count();
        let sites = preamble.sites_per_block();
        let size = preamble.block_size;
        let mut blocks = Vec::with_capacity(block_count);
        let mut sites_per_block = Vec::with_capacity(block_count);
        let mut bytes_per_block = Vec::with_capacity(block_count);

        for block in 0..block_count {
            let (bi, bj, bk) = preamble.block_coords(block);
            let mut site_data = Vec::with_capacity(sites);
            let mut site_ranks = Vec::with_capacity(sites);
            let mut surfaces = Vec::with_capacity(sites);
            let mut fluid = 0u32;
            let mut bytes = 0u32;
            for ii in 0..size {
                for jj in 0..size {
                    for kk in 0..size {
                        let (data, surface) =
                            site(bi * size + ii, bj * size + jj, bk * size + kk);
                        bytes += 4;
                        if data.is_solid() {
                            site_ranks.push(SiteRank::Solid);
                        } else {
                            fluid += 1;
                            site_ranks.push(SiteRank::Unassigned);
                        }
                        if data.has_surface_payload() {
                            let surface = surface.as_ref()
                                .expect("wall-adjacent site without surface payload");
                            let scalars = 4 * usize::from(surface.iolet.is_some())
                                + 4 * usize::from(surface.wall.is_some())
                                + (NUM_VECTORS - 1);
                            bytes += 8 * scalars as u32;
                        }
                        site_data.push(data);
                        surfaces.push(surface);
                    }
                }
            }
            sites_per_block.push(fluid);
            if fluid == 0 {
                bytes_per_block.push(0);
                blocks.push(None);
            } else {
                bytes_per_block.push(bytes);
                blocks.push(Some(BlockData {
                    site_data: site_data.into_boxed_slice(),
                    site_ranks: site_ranks.into_boxed_slice(),
                    surfaces: surfaces.into_boxed_slice(),
                }));
            }
        }

        GeometryStore {
            preamble,
            sites_per_block,
            bytes_per_block,
            blocks,
        }
    }

    /// Total fluid sites in the whole lattice, from the header.
    pub fn total_fluid_sites(&self) -> usize {
        self.sites_per_block.iter().map(|&n| n as usize).sum()
    }

    pub fn block(&self, block: usize) -> Option<&BlockData> {
        self.blocks[block].as_ref()
    }

    /// The owner of the site at global coordinates, or `None` when the
    /// site lies outside the lattice or in a block this rank does not
    /// hold.
    pub fn site_rank(&self, i: i64, j: i64, k: i64) -> Option<SiteRank> {
        if !self.preamble.site_in_lattice(i, j, k) {
            return None;
        }
        let (block, within) = self
            .preamble
            .site_to_block(i as usize, j as usize, k as usize);
        self.blocks[block]
            .as_ref()
            .map(|data| data.site_ranks[within])
    }

    pub fn site_data(&self, i: i64, j: i64, k: i64) -> Option<SiteData> {
        if !self.preamble.site_in_lattice(i, j, k) {
            return None;
        }
        let (block, within) = self
            .preamble
            .site_to_block(i as usize, j as usize, k as usize);
        self.blocks[block]
            .as_ref()
            .map(|data| data.site_data[within])
    }

    pub fn set_site_rank(&mut self, block: usize, within: usize, rank: SiteRank) {
        if let Some(data) = self.blocks[block].as_mut() {
            data.site_ranks[within] = rank;
        }
    }

    /// Drops blocks that `keep` rejects, as when pruning after the local
    /// lattice data has been built.
    pub fn retain_blocks(&mut self, mut keep: impl FnMut(usize) -> bool) {
        for (block, slot) in self.blocks.iter_mut().enumerate() {
            if slot.is_some() && !keep(block) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preamble() -> Preamble {
        Preamble {
            stress_type: StressType::IgnoreStress,
            blocks_x: 2,
            blocks_y: 3,
            blocks_z: 4,
            block_size: 8,
            voxel_size: 1e-4,
            origin: [0.0; 3],
        }
    }

    #[test]
    fn block_ids_are_row_major() {
        let preamble = preamble();
        let mut expected = 0;
        for bi in 0..2 {
            for bj in 0..3 {
                for bk in 0..4 {
                    assert_eq!(preamble.block_id(bi, bj, bk), expected);
                    assert_eq!(preamble.block_coords(expected), (bi, bj, bk));
                    expected += 1;
                }
            }
        }
    }

    #[test]
    fn site_to_block_splits_by_shifting() {
        let preamble = preamble();
        let (block, within) = preamble.site_to_block(9, 2, 17);
        assert_eq!(block, preamble.block_id(1, 0, 2));
        assert_eq!(within, (((1 << 3) + 2) << 3) + 1);
    }
}

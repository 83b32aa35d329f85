/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Geometry file reader.
//!
//! The file is XDR-encoded: a fixed-size preamble, a header with a
//! `(site count, byte length)` pair per block, and a body holding the
//! per-site records of every non-empty block in row-major block order.
//!
//! Every rank opens the file and reads the preamble and full header; the
//! body is then streamed in fixed-size batches of blocks, and each rank
//! retains only the blocks assigned to it plus the 26-connected neighbour
//! blocks that contain fluid. Blocks outside that set are skipped by their
//! header byte length without being decoded.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use dsi_progress_logger::prelude::*;
use log::{debug, info};

use super::xdr::XdrReader;
use super::{BlockData, Boundary, GeometryStore, Preamble, SiteRank, StressType, SurfaceData};
use crate::error::{Error, Result};
use crate::lattice::{SiteData, NUM_VECTORS};

/// Number of blocks fetched by one body read.
pub const READ_BLOCKS_PER_BATCH: usize = 10;

/// Bytes of the preamble: five `u32` followed by four `f64`.
const PREAMBLE_BYTES: usize = 5 * 4 + 4 * 8;

/// A geometry file whose preamble and header have been read and
/// validated.
pub struct GeometryFile {
    path: PathBuf,
    pub preamble: Preamble,
    pub sites_per_block: Vec<u32>,
    pub bytes_per_block: Vec<u32>,
    body_offset: u64,
}

impl GeometryFile {
    /// Opens the file and reads the preamble and the per-block header.
    ///
    /// Fails with [`Error::Io`] when the path cannot be opened and with
    /// [`Error::Format`] on a short preamble or header, or when the body
    /// length implied by the header does not match the file size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| Error::io(&path, e))?;

        let mut preamble_buf = [0u8; PREAMBLE_BYTES];
        file.read_exact(&mut preamble_buf)
            .map_err(|_| Error::Format("short read in preamble".into()))?;
        let preamble = parse_preamble(&preamble_buf)?;

        let block_count = preamble.block_count();
        let mut header_buf = vec![0u8; 2 * 4 * block_count];
        file.read_exact(&mut header_buf)
            .map_err(|_| Error::Format("short read in block header".into()))?;

        let mut reader = XdrReader::new(&header_buf);
        let mut sites_per_block = Vec::with_capacity(block_count);
        let mut bytes_per_block = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            sites_per_block.push(reader.read_u32()?);
            bytes_per_block.push(reader.read_u32()?);
        }

        let body_offset = (PREAMBLE_BYTES + header_buf.len()) as u64;
        let body_bytes: u64 = bytes_per_block.iter().map(|&b| b as u64).sum();
        let file_len = file
            .metadata()
            .map_err(|e| Error::io(&path, e))?
            .len();
        if body_offset + body_bytes != file_len {
            return Err(Error::Format(format!(
                "header declares {} body bytes but the file holds {}",
                body_bytes,
                file_len - body_offset.min(file_len)
            )));
        }

        info!(
            "geometry: {}x{}x{} blocks of {}^3 sites, {} fluid sites",
            preamble.blocks_x,
            preamble.blocks_y,
            preamble.blocks_z,
            preamble.block_size,
            sites_per_block.iter().map(|&n| n as u64).sum::<u64>()
        );

        Ok(Self {
            path,
            preamble,
            sites_per_block,
            bytes_per_block,
            body_offset,
        })
    }

    /// Streams the body and decodes the blocks `local_rank` must hold
    /// under the given block-to-rank assignment: its own blocks plus every
    /// 26-connected neighbour block with fluid sites.
    ///
    /// `proc_for_block[b]` is `None` for fully solid blocks. Fluid sites
    /// of decoded blocks are tagged with their block's assigned rank.
    pub fn read_blocks(
        &self,
        local_rank: usize,
        proc_for_block: &[Option<usize>],
    ) -> Result<GeometryStore> {
        let block_count = self.preamble.block_count();
        debug_assert_eq!(proc_for_block.len(), block_count);
        let resident = self.resident_set(local_rank, proc_for_block);

        let mut blocks: Vec<Option<BlockData>> = Vec::with_capacity(block_count);
        blocks.resize_with(block_count, || None);

        let file = File::open(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let mut body = BufReader::new(file);
        body.seek(SeekFrom::Start(self.body_offset))
            .map_err(|e| Error::io(&self.path, e))?;

        let mut pl = progress_logger!(
            item_name = "block",
            expected_updates = Some(block_count),
        );
        pl.start("Reading geometry blocks...");

        let mut batch = Vec::new();
        for batch_start in (0..block_count).step_by(READ_BLOCKS_PER_BATCH) {
            let batch_end = (batch_start + READ_BLOCKS_PER_BATCH).min(block_count);
            let batch_bytes: usize = self.bytes_per_block[batch_start..batch_end]
                .iter()
                .map(|&b| b as usize)
                .sum();
            if batch_bytes == 0 {
                pl.update_with_count(batch_end - batch_start);
                continue;
            }

            batch.resize(batch_bytes, 0);
            body.read_exact(&mut batch)
                .map_err(|_| Error::Format("short read in block body".into()))?;

            let mut reader = XdrReader::new(&batch);
            for block in batch_start..batch_end {
                let length = self.bytes_per_block[block] as usize;
                if length == 0 {
                    continue;
                }
                if resident[block] {
                    let start = reader.position();
                    blocks[block] = Some(self.parse_block(
                        &mut reader,
                        proc_for_block[block],
                    )?);
                    if reader.position() - start != length {
                        return Err(Error::Format(format!(
                            "block {} decoded {} bytes but the header declares {}",
                            block,
                            reader.position() - start,
                            length
                        )));
                    }
                } else {
                    reader.skip(length)?;
                }
            }
            pl.update_with_count(batch_end - batch_start);
        }
        pl.done();

        let kept = blocks.iter().filter(|b| b.is_some()).count();
        debug!("rank {}: {} of {} blocks resident", local_rank, kept, block_count);

        Ok(GeometryStore {
            preamble: self.preamble.clone(),
            sites_per_block: self.sites_per_block.clone(),
            bytes_per_block: self.bytes_per_block.clone(),
            blocks,
        })
    }

    /// Marks the blocks this rank has to decode: every fluid block
    /// assigned to it and all 26-connected neighbours of those that
    /// contain fluid.
    fn resident_set(&self, local_rank: usize, proc_for_block: &[Option<usize>]) -> Vec<bool> {
        let preamble = &self.preamble;
        let mut resident = vec![false; preamble.block_count()];
        for bi in 0..preamble.blocks_x {
            for bj in 0..preamble.blocks_y {
                for bk in 0..preamble.blocks_z {
                    let block = preamble.block_id(bi, bj, bk);
                    if self.bytes_per_block[block] == 0
                        || proc_for_block[block] != Some(local_rank)
                    {
                        continue;
                    }
                    for ni in bi.saturating_sub(1)..=(bi + 1).min(preamble.blocks_x - 1) {
                        for nj in bj.saturating_sub(1)..=(bj + 1).min(preamble.blocks_y - 1) {
                            for nk in bk.saturating_sub(1)..=(bk + 1).min(preamble.blocks_z - 1) {
                                let neighbour = preamble.block_id(ni, nj, nk);
                                if self.bytes_per_block[neighbour] > 0 {
                                    resident[neighbour] = true;
                                }
                            }
                        }
                    }
                }
            }
        }
        resident
    }

    fn parse_block(
        &self,
        reader: &mut XdrReader<'_>,
        block_rank: Option<usize>,
    ) -> Result<BlockData> {
        let sites = self.preamble.sites_per_block();
        let mut site_data = Vec::with_capacity(sites);
        let mut site_ranks = Vec::with_capacity(sites);
        let mut surfaces: Vec<Option<SurfaceData>> = Vec::with_capacity(sites);

        for _ in 0..sites {
            let data = SiteData(reader.read_u32()?);
            if data.is_solid() {
                site_data.push(data);
                site_ranks.push(SiteRank::Solid);
                surfaces.push(None);
                continue;
            }

            site_data.push(data);
            site_ranks.push(match block_rank {
                Some(rank) => SiteRank::Rank(rank),
                None => SiteRank::Unassigned,
            });

            if !data.has_surface_payload() {
                surfaces.push(None);
                continue;
            }

            let iolet = if data.has_iolet_payload() {
                Some(read_boundary(reader)?)
            } else {
                None
            };
            let wall = if data.has_wall_payload() {
                Some(read_boundary(reader)?)
            } else {
                None
            };
            let mut cut_distances = [0.0; NUM_VECTORS - 1];
            for cut in cut_distances.iter_mut() {
                *cut = reader.read_f64()?;
            }
            surfaces.push(Some(SurfaceData {
                iolet,
                wall,
                cut_distances,
            }));
        }

        Ok(BlockData {
            site_data: site_data.into_boxed_slice(),
            site_ranks: site_ranks.into_boxed_slice(),
            surfaces: surfaces.into_boxed_slice(),
        })
    }
}

fn parse_preamble(buf: &[u8]) -> Result<Preamble> {
    let mut reader = XdrReader::new(buf);
    let stress_raw = reader.read_u32()?;
    let stress_type = StressType::from_u32(stress_raw)
        .ok_or_else(|| Error::Format(format!("unknown stress type {}", stress_raw)))?;
    let blocks_x = reader.read_u32()? as usize;
    let blocks_y = reader.read_u32()? as usize;
    let blocks_z = reader.read_u32()? as usize;
    let block_size = reader.read_u32()? as usize;
    if blocks_x == 0 || blocks_y == 0 || blocks_z == 0 {
        return Err(Error::Format("empty block grid".into()));
    }
    if block_size == 0 || !block_size.is_power_of_two() {
        return Err(Error::Format(format!(
            "block size {} is not a power of two",
            block_size
        )));
    }
    let voxel_size = reader.read_f64()?;
    let origin = [reader.read_f64()?, reader.read_f64()?, reader.read_f64()?];
    Ok(Preamble {
        stress_type,
        blocks_x,
        blocks_y,
        blocks_z,
        block_size,
        voxel_size,
        origin,
    })
}

fn read_boundary(reader: &mut XdrReader<'_>) -> Result<Boundary> {
    let normal = [reader.read_f64()?, reader.read_f64()?, reader.read_f64()?];
    let distance = reader.read_f64()?;
    Ok(Boundary { normal, distance })
}

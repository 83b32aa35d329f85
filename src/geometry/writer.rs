/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Geometry file writer, byte-compatible with the reader.
//!
//! Mainly used by tests and tooling to produce fixtures; a load → save
//! round trip of a file is byte-identical.

use std::io::Write;
use std::path::Path;

use super::xdr::XdrWriter;
use super::{BlockData, GeometryStore};
use crate::error::{Error, Result};

/// Serialises a fully resident store to `path`.
///
/// Every block with fluid sites must be resident; a store that has been
/// pruned to one rank's resident set cannot be written back.
pub fn save(store: &GeometryStore, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let preamble = &store.preamble;

    let mut bodies = Vec::with_capacity(store.blocks.len());
    let mut header = XdrWriter::new();
    for (block, slot) in store.blocks.iter().enumerate() {
        let body = match slot {
            Some(data) => encode_block(data),
            None if store.sites_per_block[block] == 0 => XdrWriter::new(),
            None => {
                return Err(Error::Format(format!(
                    "cannot save: block {} has fluid sites but is not resident",
                    block
                )))
            }
        };
        let site_count = slot
            .as_ref()
            .map(|data| data.site_data.iter().filter(|d| !d.is_solid()).count())
            .unwrap_or(0);
        header.write_u32(site_count as u32);
        header.write_u32(body.len() as u32);
        bodies.push(body);
    }

    let mut out = XdrWriter::new();
    out.write_u32(preamble.stress_type as u32);
    out.write_u32(preamble.blocks_x as u32);
    out.write_u32(preamble.blocks_y as u32);
    out.write_u32(preamble.blocks_z as u32);
    out.write_u32(preamble.block_size as u32);
    out.write_f64(preamble.voxel_size);
    for &component in &preamble.origin {
        out.write_f64(component);
    }

    let mut file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
    file.write_all(&out.into_bytes())
        .map_err(|e| Error::io(path, e))?;
    file.write_all(&header.into_bytes())
        .map_err(|e| Error::io(path, e))?;
    for body in bodies {
        file.write_all(&body.into_bytes())
            .map_err(|e| Error::io(path, e))?;
    }
    Ok(())
}

fn encode_block(data: &BlockData) -> XdrWriter {
    let mut body = XdrWriter::new();
    for (site, &word) in data.site_data.iter().enumerate() {
        body.write_u32(word.0);
        if !word.has_surface_payload() {
            continue;
        }
        let surface = data.surfaces[site]
            .as_ref()
            .expect("surface payload missing for a wall-adjacent site");
        if let Some(iolet) = &surface.iolet {
            for &component in &iolet.normal {
                body.write_f64(component);
            }
            body.write_f64(iolet.distance);
        }
        if let Some(wall) = &surface.wall {
            for &component in &wall.normal {
                body.write_f64(component);
            }
            body.write_f64(wall.distance);
        }
        for &cut in &surface.cut_distances {
            body.write_f64(cut);
        }
    }
    body
}

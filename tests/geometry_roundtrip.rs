/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

mod common;

use anyhow::Result;
use hemoflow::error::Error;
use hemoflow::geometry::{save, GeometryFile, SiteRank};
use tempfile::TempDir;

#[test]
fn load_save_load_is_byte_identical() -> Result<()> {
    let tmp = TempDir::new()?;
    let store = common::box_geometry((2, 1, 1), 4);
    let original = common::write_geometry(tmp.path(), &store);

    let file = GeometryFile::open(&original)?;
    let proc_for_block = common::all_on_rank_zero(&store);
    let loaded = file.read_blocks(0, &proc_for_block)?;

    let copy = tmp.path().join("copy.dat");
    save(&loaded, &copy)?;

    let first = std::fs::read(&original)?;
    let second = std::fs::read(&copy)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn header_counts_match_the_body() -> Result<()> {
    let tmp = TempDir::new()?;
    let store = common::box_geometry((2, 2, 1), 4);
    let path = common::write_geometry(tmp.path(), &store);

    let file = GeometryFile::open(&path)?;
    assert_eq!(file.preamble.block_count(), 4);
    let per_block = file.preamble.sites_per_block() as u32;
    assert!(file.sites_per_block.iter().all(|&n| n == per_block));

    let loaded = file.read_blocks(0, &common::all_on_rank_zero(&store))?;
    assert_eq!(loaded.total_fluid_sites(), 4 * per_block as usize);
    // Fluid sites of a decoded block carry the block's assigned rank.
    let block = loaded.block(0).unwrap();
    assert!(block
        .site_ranks
        .iter()
        .all(|&rank| rank == SiteRank::Rank(0)));
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let outcome = GeometryFile::open("/nonexistent/geometry.dat");
    assert!(matches!(outcome, Err(Error::Io { .. })));
}

#[test]
fn truncated_body_is_a_format_error() -> Result<()> {
    let tmp = TempDir::new()?;
    let store = common::box_geometry((1, 1, 1), 4);
    let path = common::write_geometry(tmp.path(), &store);

    let full = std::fs::read(&path)?;
    let truncated = tmp.path().join("truncated.dat");
    std::fs::write(&truncated, &full[..full.len() - 8])?;

    let outcome = GeometryFile::open(&truncated);
    assert!(matches!(outcome, Err(Error::Format(_))));
    Ok(())
}

#[test]
fn short_preamble_is_a_format_error() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = tmp.path().join("stub.dat");
    std::fs::write(&path, [0u8; 12])?;
    let outcome = GeometryFile::open(&path);
    assert!(matches!(outcome, Err(Error::Format(_))));
    Ok(())
}

#[test]
fn non_resident_blocks_are_skipped() -> Result<()> {
    let tmp = TempDir::new()?;
    // Two blocks apart on the x axis cannot be halo neighbours.
    let store = common::box_geometry((3, 1, 1), 4);
    let path = common::write_geometry(tmp.path(), &store);

    let file = GeometryFile::open(&path)?;
    let proc_for_block = vec![Some(0), Some(1), Some(1)];
    let loaded = file.read_blocks(0, &proc_for_block)?;
    assert!(loaded.block(0).is_some());
    assert!(loaded.block(1).is_some(), "halo neighbour must be resident");
    assert!(loaded.block(2).is_none());
    Ok(())
}

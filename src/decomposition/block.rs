/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Initial block-to-process map.
//!
//! A fast region-growing pass over blocks: pick an unassigned fluid block,
//! give it to the rank under consideration, then breadth-first grow the
//! region through lattice-connected neighbour blocks until the rank has
//! its target share or the region is bounded by solids and visited blocks.
//! Neighbouring blocks with any fluid are assumed to share lattice links,
//! so no site data has to be read at this stage.

use log::debug;

use crate::comm::Rank;
use crate::geometry::Preamble;
use crate::lattice::{CX, CY, CZ, NUM_VECTORS};

/// Computes the owning rank of every block.
///
/// Fully solid blocks map to `None`. When `reserve_leader` is set and more
/// than one rank exists, rank 0 receives no blocks and assignment starts
/// at rank 1. The whole pass is deterministic: blocks are seeded in
/// row-major order and the growth front examines candidate neighbours in
/// lexicographic `(i, j, k)` order.
pub fn assign_blocks(
    preamble: &Preamble,
    fluid_sites_per_block: &[u32],
    topology_size: usize,
    reserve_leader: bool,
) -> Vec<Option<Rank>> {
    assert!(topology_size > 0);
    let block_count = preamble.block_count();
    debug_assert_eq!(fluid_sites_per_block.len(), block_count);

    let mut assignment: Vec<Option<Rank>> = vec![None; block_count];
    let mut assigned = vec![false; block_count];

    let mut unassigned_blocks = fluid_sites_per_block.iter().filter(|&&n| n > 0).count();
    let first_rank = if reserve_leader && topology_size > 1 { 1 } else { 0 };
    let mut current_rank = first_rank;
    let mut target = unassigned_blocks.div_ceil(topology_size - first_rank);
    let mut on_current_rank = 0usize;

    let mut front: Vec<(usize, usize, usize)> = Vec::new();
    let mut next_front: Vec<(usize, usize, usize)> = Vec::new();
    let mut candidates: Vec<(usize, usize, usize)> = Vec::new();

    for seed_i in 0..preamble.blocks_x {
        for seed_j in 0..preamble.blocks_y {
            for seed_k in 0..preamble.blocks_z {
                let seed = preamble.block_id(seed_i, seed_j, seed_k);
                if fluid_sites_per_block[seed] == 0 || assigned[seed] {
                    continue;
                }

                assigned[seed] = true;
                assignment[seed] = Some(current_rank);
                on_current_rank += 1;

                front.clear();
                front.push((seed_i, seed_j, seed_k));

                // Grow until the rank is full or the region is bounded.
                let mut growing = true;
                while on_current_rank < target && growing {
                    growing = false;
                    next_front.clear();
                    for index in 0..front.len() {
                        if on_current_rank >= target {
                            break;
                        }
                        let (i, j, k) = front[index];
                        candidates.clear();
                        for l in 1..NUM_VECTORS {
                            let ni = i as i64 + CX[l] as i64;
                            let nj = j as i64 + CY[l] as i64;
                            let nk = k as i64 + CZ[l] as i64;
                            if ni < 0
                                || nj < 0
                                || nk < 0
                                || ni as usize >= preamble.blocks_x
                                || nj as usize >= preamble.blocks_y
                                || nk as usize >= preamble.blocks_z
                            {
                                continue;
                            }
                            let (ni, nj, nk) = (ni as usize, nj as usize, nk as usize);
                            let neighbour = preamble.block_id(ni, nj, nk);
                            if fluid_sites_per_block[neighbour] == 0 || assigned[neighbour] {
                                continue;
                            }
                            candidates.push((ni, nj, nk));
                        }
                        candidates.sort_unstable();
                        for &(ni, nj, nk) in candidates.iter() {
                            if on_current_rank >= target {
                                break;
                            }
                            let neighbour = preamble.block_id(ni, nj, nk);
                            if assigned[neighbour] {
                                continue;
                            }
                            assigned[neighbour] = true;
                            assignment[neighbour] = Some(current_rank);
                            on_current_rank += 1;
                            growing = true;
                            next_front.push((ni, nj, nk));
                        }
                    }
                    std::mem::swap(&mut front, &mut next_front);
                }

                if on_current_rank >= target {
                    debug!(
                        "block decomposition: rank {} took {} blocks",
                        current_rank, on_current_rank
                    );
                    unassigned_blocks -= on_current_rank;
                    on_current_rank = 0;
                    if current_rank + 1 < topology_size {
                        current_rank += 1;
                        target = unassigned_blocks.div_ceil(topology_size - current_rank);
                    }
                }
                // Otherwise the region was bounded: keep filling the same
                // rank from the next unvisited seed.
            }
        }
    }

    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::StressType;

    fn grid(blocks: (usize, usize, usize)) -> Preamble {
        Preamble {
            stress_type: StressType::IgnoreStress,
            blocks_x: blocks.0,
            blocks_y: blocks.1,
            blocks_z: blocks.2,
            block_size: 8,
            voxel_size: 1.0,
            origin: [0.0; 3],
        }
    }

    #[test]
    fn splits_a_bar_of_blocks_evenly() {
        let preamble = grid((4, 1, 1));
        let fluid = vec![1, 1, 1, 1];
        let assignment = assign_blocks(&preamble, &fluid, 2, false);
        assert_eq!(assignment, vec![Some(0), Some(0), Some(1), Some(1)]);
    }

    #[test]
    fn solid_blocks_stay_unassigned() {
        let preamble = grid((3, 1, 1));
        let fluid = vec![5, 0, 5];
        let assignment = assign_blocks(&preamble, &fluid, 2, false);
        assert_eq!(assignment, vec![Some(0), None, Some(1)]);
    }

    #[test]
    fn reserved_leader_gets_nothing() {
        let preamble = grid((2, 2, 1));
        let fluid = vec![1; 4];
        let assignment = assign_blocks(&preamble, &fluid, 3, true);
        assert!(assignment.iter().all(|a| *a != Some(0)));
        assert!(assignment.iter().any(|a| *a == Some(1)));
        assert!(assignment.iter().any(|a| *a == Some(2)));
    }

    #[test]
    fn assignment_is_deterministic() {
        let preamble = grid((4, 4, 4));
        let fluid: Vec<u32> = (0..64).map(|b| (b % 3 != 0) as u32).collect();
        let first = assign_blocks(&preamble, &fluid, 5, false);
        let second = assign_blocks(&preamble, &fluid, 5, false);
        assert_eq!(first, second);
    }
}

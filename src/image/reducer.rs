/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Phased tree reduction of per-rank pixel sets.
//!
//! Renderings are keyed by the iteration on which they were requested and
//! climb a static broadcast tree of fan-out `K` rooted at rank 0. Each
//! tree level takes two splays: splay 0 exchanges pixel counts, splay 1
//! the pixel payloads. Which edge of the tree is active on iteration `i`
//! for the rendering started at `start` follows deterministically from
//! `i - start` and the rank's tree position, so several renderings may be
//! in flight at once without their messages mixing.
//!
//! A rendering requested too late for a full round trip is folded in a
//! single iteration by an ad-hoc butterfly instead and never enters the
//! in-flight register.

use std::collections::BTreeMap;

use itertools::Itertools;
use log::debug;

use super::PixelSet;
use crate::comm::{image_tag, Communicator, Rank};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct ReducerConfig {
    /// Fan-out `K` of the reduction tree.
    pub fan_out: usize,
    /// Bound on simultaneously in-flight renderings.
    pub max_inflight: usize,
    /// Largest pixel count a peer may announce.
    pub max_pixels: usize,
    /// Opaque payload bytes per pixel.
    pub payload_bytes: usize,
    /// Idle iterations appended to the round trip.
    pub overlap: u64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            fan_out: 2,
            max_inflight: 4,
            max_pixels: 1 << 20,
            payload_bytes: 12,
            overlap: 0,
        }
    }
}

/// A rank's place in the reduction tree.
#[derive(Debug, Clone)]
struct TreePosition {
    parent: Option<Rank>,
    children: Vec<Rank>,
    depth: u64,
    /// Number of levels of the whole tree, root inclusive.
    levels: u64,
}

fn tree_position(rank: Rank, size: usize, fan_out: usize) -> TreePosition {
    let depth_of = |mut r: usize| {
        let mut depth = 0u64;
        while r > 0 {
            r = (r - 1) / fan_out;
            depth += 1;
        }
        depth
    };
    TreePosition {
        parent: (rank > 0).then(|| (rank - 1) / fan_out),
        children: (fan_out * rank + 1..=fan_out * rank + fan_out)
            .filter(|&child| child < size)
            .collect(),
        depth: depth_of(rank),
        levels: depth_of(size - 1) + 1,
    }
}

/// One in-flight rendering.
struct Rendering {
    pixels: PixelSet,
    /// Counts announced by the children on splay 0, in child order.
    child_counts: Vec<u64>,
}

pub struct ImageReducer {
    config: ReducerConfig,
    rank: Rank,
    size: usize,
    position: TreePosition,
    total_steps: u64,
    in_flight: BTreeMap<u64, Rendering>,
    /// Composites finished on this rank, in completion order. Only the
    /// root produces any.
    pub completed: Vec<(u64, PixelSet)>,
}

impl ImageReducer {
    pub fn new(rank: Rank, size: usize, total_steps: u64, config: ReducerConfig) -> Self {
        assert!(config.fan_out >= 1);
        let position = tree_position(rank, size, config.fan_out);
        Self {
            config,
            rank,
            size,
            position,
            total_steps,
            in_flight: BTreeMap::new(),
            completed: Vec::new(),
        }
    }

    /// Iterations one rendering occupies: two splays per tree level plus
    /// the configured overlap.
    pub fn round_trip_length(&self) -> u64 {
        2 * self.position.levels + self.config.overlap
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Registers the rendering requested on `iteration` with this rank's
    /// pixels and returns the iteration on which the root will emit the
    /// composite.
    ///
    /// When fewer iterations remain than a round trip, the reduction is
    /// folded immediately by the butterfly fallback and `iteration`
    /// itself is returned.
    pub fn start(
        &mut self,
        iteration: u64,
        local: PixelSet,
        comm: &mut dyn Communicator,
    ) -> Result<u64> {
        if local.len() > self.config.max_pixels {
            return Err(Error::Protocol(format!(
                "local rendering has {} pixels, the maximum is {}",
                local.len(),
                self.config.max_pixels
            )));
        }
        let finish = iteration + self.round_trip_length() - 1;
        if finish > self.total_steps {
            debug!(
                "rendering at {} cannot finish by {}, folding instantly",
                iteration, self.total_steps
            );
            return self.instant_broadcast(iteration, local, comm).map(|_| iteration);
        }
        if self.in_flight.contains_key(&iteration) {
            return Ok(finish);
        }
        if self.in_flight.len() >= self.config.max_inflight {
            return Err(Error::Protocol(format!(
                "{} renderings already in flight, the maximum is {}",
                self.in_flight.len(),
                self.config.max_inflight
            )));
        }
        let child_count = self.position.children.len();
        self.in_flight.insert(
            iteration,
            Rendering {
                pixels: local,
                child_counts: vec![0; child_count],
            },
        );
        Ok(finish)
    }

    /// Runs every in-flight rendering's communications due on iteration
    /// `i`, in rendering order.
    pub fn advance(&mut self, i: u64, comm: &mut dyn Communicator) -> Result<()> {
        let levels = self.position.levels;
        let depth = self.position.depth;
        let round_trip = self.round_trip_length();
        let mut finished = Vec::new();

        let starts = self.in_flight.keys().copied().collect_vec();
        for start in starts {
            if i < start {
                continue;
            }
            let progress = i - start;
            let rendering = self.in_flight.get_mut(&start).unwrap();

            // Upward pass of this rank: two splays per level, deepest
            // level first.
            if self.position.parent.is_some() {
                let send_base = 2 * (levels - 1 - depth) + 1;
                let parent = self.position.parent.unwrap();
                if progress == send_base {
                    let count = rendering.pixels.len() as u64;
                    comm.send(parent, image_tag(start, 0), count.to_ne_bytes().to_vec())?;
                } else if progress == send_base + 1 {
                    comm.send(parent, image_tag(start, 1), rendering.pixels.to_bytes())?;
                }
            }

            // The children sit one level deeper, so their splays land two
            // iterations earlier than this rank's own.
            if !self.position.children.is_empty() {
                let recv_base = 2 * (levels - 2 - depth) + 1;
                if progress == recv_base {
                    for (slot, &child) in self.position.children.iter().enumerate() {
                        let payload = comm.receive(child, image_tag(start, 0))?;
                        let count =
                            u64::from_ne_bytes(payload.as_slice().try_into().map_err(|_| {
                                Error::Protocol("malformed pixel count".into())
                            })?);
                        if count as usize > self.config.max_pixels {
                            return Err(Error::Protocol(format!(
                                "rank {} announced {} pixels, the maximum is {}",
                                child, count, self.config.max_pixels
                            )));
                        }
                        rendering.child_counts[slot] = count;
                    }
                } else if progress == recv_base + 1 {
                    for (slot, &child) in self.position.children.iter().enumerate() {
                        let payload = comm.receive(child, image_tag(start, 1))?;
                        let set = PixelSet::from_bytes(&payload, self.config.payload_bytes)?;
                        if set.len() as u64 != rendering.child_counts[slot] {
                            return Err(Error::Protocol(format!(
                                "rank {} sent {} pixels after announcing {}",
                                child,
                                set.len(),
                                rendering.child_counts[slot]
                            )));
                        }
                        rendering.pixels.merge(set);
                    }
                }
            }

            if progress == round_trip - 1 {
                finished.push(start);
            }
        }

        for start in finished {
            let rendering = self.in_flight.remove(&start).unwrap();
            if self.rank == 0 {
                debug!("composite for start {} emitted on iteration {}", start, i);
                self.completed.push((start, rendering.pixels));
            }
        }
        Ok(())
    }

    /// Releases every outstanding rendering without finishing it.
    pub fn reset(&mut self) {
        self.in_flight.clear();
    }

    /// Single-iteration fold: for growing strides, every rank
    /// `r ≡ 1 (mod 2Δ)` absorbs rank `r + Δ`, then the surviving set walks
    /// from rank 1 to the root.
    fn instant_broadcast(
        &mut self,
        start: u64,
        local: PixelSet,
        comm: &mut dyn Communicator,
    ) -> Result<()> {
        let mut mine = local;
        if self.rank == 0 {
            if self.size > 1 {
                let payload = comm.receive(1, image_tag(start, 3))?;
                mine.merge(PixelSet::from_bytes(&payload, self.config.payload_bytes)?);
            }
            self.completed.push((start, mine));
            return Ok(());
        }

        let mut stride = 1;
        while stride < self.size {
            let pair = 2 * stride;
            if self.rank % pair == 1 {
                let sender = self.rank + stride;
                if sender < self.size {
                    let payload = comm.receive(sender, image_tag(start, 2))?;
                    mine.merge(PixelSet::from_bytes(&payload, self.config.payload_bytes)?);
                }
            } else if self.rank >= stride && (self.rank - stride) % pair == 1 {
                comm.send(self.rank - stride, image_tag(start, 2), mine.to_bytes())?;
                return Ok(());
            }
            stride = pair;
        }
        // Only rank 1 falls through with the folded set.
        comm.send(0, image_tag(start, 3), mine.to_bytes())
    }
}

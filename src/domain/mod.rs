/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Local lattice data: the per-rank compacted form of the geometry.
//!
//! Fluid sites owned by this rank live in two contiguous ranges, inner
//! sites (no off-rank neighbour) first and inter sites second, each
//! grouped by collision class in a fixed order. The distribution arrays `f_old`
//! and `f_new` hold `N·Q` values for the local sites, one rubbish slot at
//! index `N·Q` absorbing streams that would leave the domain, and the
//! shared send/receive area beyond it, one contiguous region per peer in
//! rank order.
//!
//! For every `(site, direction)` the stream map gives the `f_new` index
//! the post-collision value streams to; it is produced here from a tagged
//! [`StreamTarget`] and consumed as a plain index by the kernels, so no
//! per-step boundary branches remain.

mod neighbour;

pub use neighbour::{Peer, MAX_NEIGHBOUR_PROCS};

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use log::debug;

use crate::comm::{bytes, Communicator, Rank, RecvRequest, TAG_HALO, TAG_SHARED_SETUP};
use crate::error::{Error, Result};
use crate::geometry::{GeometryStore, SiteRank, SurfaceData};
use crate::lattice::{
    equilibrium, CollisionClass, SiteData, CX, CY, CZ, COLLISION_CLASSES, INVERSE, NUM_VECTORS,
};

/// Where a distribution streamed along one direction ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTarget {
    /// The stream would exit the fluid domain; it lands in the single
    /// rubbish slot.
    Rubbish,
    /// Another fluid site on this rank.
    Local { site: usize, direction: usize },
    /// A slot in the shared area reserved for a peer rank.
    OffRank { peer: usize, shared: usize },
}

/// Inner sites have all their neighbours on this rank; inter sites have
/// at least one off-rank neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteRegion {
    Inner = 0,
    Inter = 1,
}

/// One site noted during the first scan, before numbering.
struct ScannedSite {
    coords: [usize; 3],
    data: SiteData,
    surface: Option<SurfaceData>,
    class: CollisionClass,
    region: SiteRegion,
}

/// The per-rank lattice state.
pub struct LocalDomain {
    rank: Rank,
    /// Local fluid sites, `N`.
    pub site_count: usize,
    inner_count: usize,
    class_counts: [[usize; COLLISION_CLASSES]; 2],
    class_offsets: [[usize; COLLISION_CLASSES]; 2],

    pub f_old: Vec<f64>,
    pub f_new: Vec<f64>,
    /// `f_new` index each `(site, direction)` streams to, `N·Q` entries.
    pub stream_map: Vec<usize>,
    /// Packed word per local site.
    pub site_data: Vec<SiteData>,
    /// Wall payload of wall-adjacent sites.
    pub surfaces: Vec<Option<SurfaceData>>,
    /// Global lattice coordinates per local site.
    pub coords: Vec<[usize; 3]>,

    pub peers: Vec<Peer>,
    /// Total shared distributions, `S`.
    pub shared_count: usize,
    /// `f_new` index each received shared value is copied to, `S` entries
    /// in peer-region order.
    recv_targets: Vec<usize>,

    /// Fluid sites of every rank, all-gathered at build time.
    pub fluid_sites_per_rank: Vec<usize>,

    site_lookup: HashMap<[usize; 3], usize>,
}

impl LocalDomain {
    /// Compacts this rank's sites out of the decomposed geometry and runs
    /// the one-shot shared-distribution identification exchange with every
    /// peer.
    pub fn build(store: &GeometryStore, comm: &mut dyn Communicator) -> Result<Self> {
        let rank = comm.rank();
        let scanned = scan_sites(store, rank);
        let site_count = scanned.len();

        // Group sizes and offsets: inner range first, then inter, each in
        // collision-class order.
        let mut class_counts = [[0usize; COLLISION_CLASSES]; 2];
        for site in &scanned {
            class_counts[site.region as usize][site.class as usize] += 1;
        }
        let inner_count: usize = class_counts[0].iter().sum();
        let mut class_offsets = [[0usize; COLLISION_CLASSES]; 2];
        let mut running = 0;
        for region in 0..2 {
            for class in 0..COLLISION_CLASSES {
                class_offsets[region][class] = running;
                running += class_counts[region][class];
            }
        }
        debug_assert_eq!(running, site_count);

        // Number the sites and build the coordinate lookup.
        let mut cursors = class_offsets;
        let mut order = vec![0usize; site_count];
        let mut site_lookup = HashMap::with_capacity(site_count);
        for (scan_index, site) in scanned.iter().enumerate() {
            let cursor = &mut cursors[site.region as usize][site.class as usize];
            order[scan_index] = *cursor;
            site_lookup.insert(site.coords, *cursor);
            *cursor += 1;
        }

        let mut site_data = vec![SiteData::default(); site_count];
        let mut surfaces: Vec<Option<SurfaceData>> = vec![None; site_count];
        let mut coords = vec![[0usize; 3]; site_count];
        for (scan_index, site) in scanned.iter().enumerate() {
            let local = order[scan_index];
            site_data[local] = site.data;
            surfaces[local] = site.surface.clone();
            coords[local] = site.coords;
        }

        // Peer discovery: count shared distributions per neighbouring
        // rank, in rank order.
        let mut shared_per_peer: BTreeMap<Rank, usize> = BTreeMap::new();
        for site in &scanned {
            for l in 1..NUM_VECTORS {
                if let Some(other) = off_rank_neighbour(store, rank, site.coords, l) {
                    *shared_per_peer.entry(other).or_insert(0) += 1;
                }
            }
        }
        if shared_per_peer.len() > MAX_NEIGHBOUR_PROCS {
            return Err(Error::Topology(format!(
                "rank {} has {} neighbouring ranks, the maximum is {}",
                rank,
                shared_per_peer.len(),
                MAX_NEIGHBOUR_PROCS
            )));
        }
        let mut peers = Vec::with_capacity(shared_per_peer.len());
        let mut first_shared = 0;
        for (&peer_rank, &count) in &shared_per_peer {
            peers.push(Peer {
                rank: peer_rank,
                shared_count: count,
                first_shared,
            });
            first_shared += count;
        }
        let shared_count = first_shared;
        debug!(
            "rank {}: {} sites ({} inner), {} peers, {} shared distributions",
            rank,
            site_count,
            inner_count,
            peers.len(),
            shared_count
        );

        // Stream map; off-rank targets are filled in after the exchange
        // settles the shared ordering.
        let distribution_count = site_count * NUM_VECTORS;
        let mut stream_map = vec![distribution_count; distribution_count];
        let mut tuples: Vec<Vec<u64>> = peers.iter().map(|_| Vec::new()).collect();
        let peer_index: HashMap<Rank, usize> = peers
            .iter()
            .enumerate()
            .map(|(index, peer)| (peer.rank, index))
            .collect();

        for (scan_index, site) in scanned.iter().enumerate() {
            let local = order[scan_index];
            stream_map[local * NUM_VECTORS] = local * NUM_VECTORS;
            for l in 1..NUM_VECTORS {
                let target = stream_target(store, rank, &site_lookup, &peer_index, site.coords, l);
                match target {
                    StreamTarget::Rubbish => {}
                    StreamTarget::Local { site: nb, direction } => {
                        stream_map[local * NUM_VECTORS + l] = nb * NUM_VECTORS + direction;
                    }
                    StreamTarget::OffRank { peer, .. } => {
                        let [i, j, k] = site.coords;
                        tuples[peer].extend([i as u64, j as u64, k as u64, l as u64]);
                    }
                }
            }
        }

        // Ordered point-to-point identification: the lower rank of each
        // pair sends its tuples, the higher one derives its own view by
        // displacing the coordinates and inverting the direction.
        for (index, peer) in peers.iter().enumerate() {
            if rank < peer.rank {
                comm.send(peer.rank, TAG_SHARED_SETUP, bytes::from_u64s(&tuples[index]))?;
            }
        }
        for (index, peer) in peers.iter().enumerate() {
            if rank > peer.rank {
                let payload = comm.receive(peer.rank, TAG_SHARED_SETUP)?;
                let mut received = bytes::to_u64s(&payload);
                if received.len() != 4 * peer.shared_count {
                    return Err(Error::Topology(format!(
                        "rank {} expected {} shared distributions with rank {}, peer lists {}",
                        rank,
                        peer.shared_count,
                        peer.rank,
                        received.len() / 4
                    )));
                }
                for tuple in received.chunks_exact_mut(4) {
                    let l = tuple[3] as usize;
                    tuple[0] = (tuple[0] as i64 + CX[l] as i64) as u64;
                    tuple[1] = (tuple[1] as i64 + CY[l] as i64) as u64;
                    tuple[2] = (tuple[2] as i64 + CZ[l] as i64) as u64;
                    tuple[3] = INVERSE[l] as u64;
                }
                tuples[index] = received;
            }
        }

        // Both ends of a pair now hold the same ordered list; slot n of
        // the region is the send slot of (site, direction) and the
        // received value n belongs at the inverse direction of that site.
        let mut recv_targets = vec![0usize; shared_count];
        for (index, peer) in peers.iter().enumerate() {
            for (n, tuple) in tuples[index].chunks_exact(4).enumerate() {
                let key = [tuple[0] as usize, tuple[1] as usize, tuple[2] as usize];
                let l = tuple[3] as usize;
                let site = *site_lookup.get(&key).ok_or_else(|| {
                    Error::Topology(format!(
                        "rank {} told to share site ({}, {}, {}) it does not own",
                        rank, key[0], key[1], key[2]
                    ))
                })?;
                stream_map[site * NUM_VECTORS + l] =
                    distribution_count + 1 + peer.first_shared + n;
                recv_targets[peer.first_shared + n] = site * NUM_VECTORS + INVERSE[l];
            }
        }

        let allocation = distribution_count + 1 + shared_count;
        let fluid_sites_per_rank = comm
            .all_gather(bytes::from_u64s(&[site_count as u64]))?
            .iter()
            .map(|payload| bytes::to_u64s(payload)[0] as usize)
            .collect();

        Ok(LocalDomain {
            rank,
            site_count,
            inner_count,
            class_counts,
            class_offsets,
            f_old: vec![0.0; allocation],
            f_new: vec![0.0; allocation],
            stream_map,
            site_data,
            surfaces,
            coords,
            peers,
            shared_count,
            recv_targets,
            fluid_sites_per_rank,
            site_lookup,
        })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Index of the rubbish slot, `N·Q`.
    pub fn rubbish_slot(&self) -> usize {
        self.site_count * NUM_VECTORS
    }

    pub fn inner_sites(&self) -> Range<usize> {
        0..self.inner_count
    }

    pub fn inter_sites(&self) -> Range<usize> {
        self.inner_count..self.site_count
    }

    /// The contiguous run of sites of one collision class within one
    /// region.
    pub fn class_range(&self, region: SiteRegion, class: CollisionClass) -> Range<usize> {
        let offset = self.class_offsets[region as usize][class as usize];
        offset..offset + self.class_counts[region as usize][class as usize]
    }

    /// Local index of the site at global coordinates, if owned here.
    pub fn site_index(&self, i: usize, j: usize, k: usize) -> Option<usize> {
        self.site_lookup.get(&[i, j, k]).copied()
    }

    /// Initialises both distribution buffers to the equilibrium at the
    /// given density and zero velocity.
    pub fn set_initial_conditions(&mut self, density: f64) {
        let f_eq = equilibrium(density, [0.0; 3]);
        for site in 0..self.site_count {
            for l in 0..NUM_VECTORS {
                self.f_old[site * NUM_VECTORS + l] = f_eq[l];
                self.f_new[site * NUM_VECTORS + l] = f_eq[l];
            }
        }
    }

    /// Posts the non-blocking halo receives, one per peer, targeting the
    /// shared region of `f_old`.
    pub fn post_halo_receives(&self, comm: &mut dyn Communicator) -> Vec<RecvRequest> {
        self.peers
            .iter()
            .map(|peer| comm.post_receive(peer.rank, TAG_HALO))
            .collect()
    }

    /// Posts the halo sends out of the shared region of `f_new`, which the
    /// inter-site collide-stream has just filled.
    pub fn post_halo_sends(&self, comm: &mut dyn Communicator) -> Result<()> {
        let base = self.rubbish_slot() + 1;
        for peer in &self.peers {
            let region = &self.f_new[base + peer.first_shared..][..peer.shared_count];
            comm.send(peer.rank, TAG_HALO, bytes::from_f64s(region))?;
        }
        Ok(())
    }

    /// Waits on the outstanding halo requests, lands the received values
    /// in the shared region of `f_old` and copies them to their streaming
    /// targets in `f_new`.
    pub fn complete_halo(
        &mut self,
        comm: &mut dyn Communicator,
        requests: &[RecvRequest],
    ) -> Result<()> {
        let payloads = comm.wait_all(requests)?;
        let base = self.rubbish_slot() + 1;
        for (peer, payload) in self.peers.iter().zip(&payloads) {
            let values = bytes::to_f64s(payload);
            if values.len() != peer.shared_count {
                return Err(Error::Topology(format!(
                    "rank {} received {} shared values from rank {}, expected {}",
                    self.rank,
                    values.len(),
                    peer.rank,
                    peer.shared_count
                )));
            }
            self.f_old[base + peer.first_shared..][..peer.shared_count].copy_from_slice(&values);
        }
        for shared in 0..self.shared_count {
            self.f_new[self.recv_targets[shared]] = self.f_old[base + shared];
        }
        Ok(())
    }

    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.f_old, &mut self.f_new);
    }

    /// Whether any local distribution has gone negative, the local half of
    /// the stability check.
    pub fn has_negative_distribution(&self) -> bool {
        self.f_old[..self.site_count * NUM_VECTORS]
            .iter()
            .any(|&f| f < 0.0)
    }

    /// Density and momentum at one local site, from `f_old`.
    pub fn moments_at(&self, site: usize) -> (f64, [f64; 3]) {
        crate::lattice::moments(&self.f_old[site * NUM_VECTORS..(site + 1) * NUM_VECTORS])
    }
}

/// Collects this rank's sites in scan order: blocks row-major, sites
/// row-major within each block.
fn scan_sites(store: &GeometryStore, rank: Rank) -> Vec<ScannedSite> {
    let preamble = &store.preamble;
    let size = preamble.block_size;
    let shift = preamble.log2_block_size();
    let mut scanned = Vec::new();

    for block in 0..preamble.block_count() {
        let Some(data) = store.block(block) else {
            continue;
        };
        let (bi, bj, bk) = preamble.block_coords(block);
        let mut within = 0;
        for ii in 0..size {
            for jj in 0..size {
                for kk in 0..size {
                    let owner = data.site_ranks[within];
                    let word = data.site_data[within];
                    let surface = data.surfaces[within].clone();
                    within += 1;
                    if owner != SiteRank::Rank(rank) {
                        continue;
                    }
                    let coords = [
                        (bi << shift) + ii,
                        (bj << shift) + jj,
                        (bk << shift) + kk,
                    ];
                    let region = if (1..NUM_VECTORS)
                        .any(|l| off_rank_neighbour(store, rank, coords, l).is_some())
                    {
                        SiteRegion::Inter
                    } else {
                        SiteRegion::Inner
                    };
                    scanned.push(ScannedSite {
                        coords,
                        data: word,
                        surface,
                        class: word.collision_class(),
                        region,
                    });
                }
            }
        }
    }
    scanned
}

/// The rank of the fluid neighbour along `l`, when it lives elsewhere.
fn off_rank_neighbour(
    store: &GeometryStore,
    rank: Rank,
    coords: [usize; 3],
    l: usize,
) -> Option<Rank> {
    let ni = coords[0] as i64 + CX[l] as i64;
    let nj = coords[1] as i64 + CY[l] as i64;
    let nk = coords[2] as i64 + CZ[l] as i64;
    match store.site_rank(ni, nj, nk) {
        Some(SiteRank::Rank(other)) if other != rank => Some(other),
        _ => None,
    }
}

/// Classifies the streaming destination of `(coords, l)`.
fn stream_target(
    store: &GeometryStore,
    rank: Rank,
    site_lookup: &HashMap<[usize; 3], usize>,
    peer_index: &HashMap<Rank, usize>,
    coords: [usize; 3],
    l: usize,
) -> StreamTarget {
    let ni = coords[0] as i64 + CX[l] as i64;
    let nj = coords[1] as i64 + CY[l] as i64;
    let nk = coords[2] as i64 + CZ[l] as i64;
    match store.site_rank(ni, nj, nk) {
        Some(SiteRank::Rank(other)) if other == rank => {
            let key = [ni as usize, nj as usize, nk as usize];
            let site = site_lookup[&key];
            StreamTarget::Local { site, direction: l }
        }
        Some(SiteRank::Rank(other)) => StreamTarget::OffRank {
            // The shared slot is assigned after the identification
            // exchange; only the peer matters here.
            peer: peer_index[&other],
            shared: 0,
        },
        _ => StreamTarget::Rubbish,
    }
}

/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

mod common;

use hemoflow::comm::{Communicator, World};
use hemoflow::decomposition::{
    assign_blocks, refine, Move, Partitioner, PropagationPartitioner,
};
use hemoflow::domain::LocalDomain;
use hemoflow::error::Error;
use hemoflow::geometry::GeometryFile;
use tempfile::TempDir;

struct RankOutcome {
    moves: Vec<Move>,
    fluid_sites_per_rank: Vec<usize>,
    peers: Vec<(usize, usize)>,
}

fn run_pipeline(path: &std::path::Path, size: usize, reserve_leader: bool) -> Vec<RankOutcome> {
    World::run(size, |mut comm| {
        let rank = comm.rank();
        let file = GeometryFile::open(path).unwrap();
        let proc_for_block = assign_blocks(
            &file.preamble,
            &file.sites_per_block,
            comm.size(),
            reserve_leader,
        );
        let store = file.read_blocks(rank, &proc_for_block).unwrap();
        let partitioner = PropagationPartitioner::default();
        let (store, moves) = refine(
            &file,
            store,
            &proc_for_block,
            &partitioner,
            &mut comm,
            reserve_leader,
        )
        .unwrap();
        let domain = LocalDomain::build(&store, &mut comm).unwrap();
        RankOutcome {
            moves,
            fluid_sites_per_rank: domain.fluid_sites_per_rank.clone(),
            peers: domain
                .peers
                .iter()
                .map(|peer| (peer.rank, peer.shared_count))
                .collect(),
        }
    })
}

/// Fluid sites are conserved by the refinement, no participating rank
/// ends up empty, and every rank applied the identical move list.
#[test]
fn refinement_conserves_and_balances_sites() {
    let tmp = TempDir::new().unwrap();
    let store = common::box_geometry((4, 2, 1), 4);
    let total = store.total_fluid_sites();
    let path = common::write_geometry(tmp.path(), &store);

    let outcomes = run_pipeline(&path, 4, false);

    for outcome in &outcomes {
        assert_eq!(outcome.moves, outcomes[0].moves);
        assert_eq!(outcome.fluid_sites_per_rank, outcomes[0].fluid_sites_per_rank);
    }
    let per_rank = &outcomes[0].fluid_sites_per_rank;
    assert_eq!(per_rank.iter().sum::<usize>(), total);
    assert!(per_rank.iter().all(|&count| count > 0));
}

/// Two identical runs produce bitwise identical decompositions.
#[test]
fn decomposition_is_reproducible() {
    let tmp = TempDir::new().unwrap();
    let store = common::box_geometry((4, 2, 1), 4);
    let path = common::write_geometry(tmp.path(), &store);

    let first = run_pipeline(&path, 4, false);
    let second = run_pipeline(&path, 4, false);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.moves, b.moves);
        assert_eq!(a.fluid_sites_per_rank, b.fluid_sites_per_rank);
    }
}

/// For every peer pair, both sides agree on the number of shared
/// distributions.
#[test]
fn peer_counts_are_symmetric() {
    let tmp = TempDir::new().unwrap();
    let store = common::box_geometry((4, 2, 1), 4);
    let path = common::write_geometry(tmp.path(), &store);

    let outcomes = run_pipeline(&path, 4, false);
    for (rank, outcome) in outcomes.iter().enumerate() {
        for &(peer, count) in &outcome.peers {
            let mirrored = outcomes[peer]
                .peers
                .iter()
                .find(|&&(other, _)| other == rank)
                .unwrap_or_else(|| panic!("rank {} missing from rank {}'s peers", rank, peer));
            assert_eq!(mirrored.1, count);
        }
    }
}

/// With a reserved leader, rank 0 holds nothing and everyone else holds
/// something.
#[test]
fn reserved_leader_stays_empty() {
    let tmp = TempDir::new().unwrap();
    let store = common::box_geometry((4, 2, 1), 4);
    let total = store.total_fluid_sites();
    let path = common::write_geometry(tmp.path(), &store);

    let outcomes = run_pipeline(&path, 3, true);
    let per_rank = &outcomes[0].fluid_sites_per_rank;
    assert_eq!(per_rank[0], 0);
    assert!(per_rank[1..].iter().all(|&count| count > 0));
    assert_eq!(per_rank.iter().sum::<usize>(), total);
}

/// A partitioner emitting out-of-range parts aborts the refinement.
#[test]
fn invalid_partition_is_rejected() {
    struct Broken;
    impl Partitioner for Broken {
        fn partition(
            &self,
            graph: &hemoflow::decomposition::graph::SiteGraph,
            comm: &mut dyn Communicator,
            nparts: usize,
            _imbalance: f64,
        ) -> hemoflow::error::Result<Vec<usize>> {
            let local = graph.local_range(comm.rank()).len();
            Ok(vec![nparts + 7; local])
        }
    }

    let tmp = TempDir::new().unwrap();
    let store = common::box_geometry((4, 1, 1), 4);
    let path = common::write_geometry(tmp.path(), &store);

    let failures = World::run(2, |mut comm| {
        let file = GeometryFile::open(&path).unwrap();
        let proc_for_block =
            assign_blocks(&file.preamble, &file.sites_per_block, comm.size(), false);
        let store = file.read_blocks(comm.rank(), &proc_for_block).unwrap();
        refine(&file, store, &proc_for_block, &Broken, &mut comm, false).err()
    });
    for failure in failures {
        assert!(matches!(failure, Some(Error::Partition(_))));
    }
}

/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

mod common;

use hemoflow::comm::{Communicator, World};
use hemoflow::config::{Monitoring, SimConfig};
use hemoflow::domain::LocalDomain;
use hemoflow::geometry::StressType;
use hemoflow::lattice::{equilibrium, moments, NUM_VECTORS, WEIGHTS};
use hemoflow::lb::Lbm;

fn quiescent_config() -> SimConfig {
    SimConfig {
        total_time_steps: 4,
        steps_per_cycle: 4,
        data_file_path: "unused".into(),
        stress_type: StressType::ShearStress,
        inlets: Vec::new(),
        outlets: Vec::new(),
        monitoring: Monitoring::default(),
        property_outputs: Vec::new(),
        initial_pressure_mmhg: 80.0,
    }
}

/// An 8x4x4 bar split at i = 4 across two ranks. A perturbation on the
/// +x distribution of rank 0's boundary site must arrive, exactly once
/// and exactly collided, at rank 1's mirror site after one step; the
/// mirror slot on rank 0 must hold the unperturbed inverse-direction
/// value from rank 1.
#[test]
fn perturbation_crosses_the_rank_boundary() {
    let mut store = common::box_geometry((2, 1, 1), 4);
    let proc_for_block = vec![Some(0), Some(1)];
    common::assign_by_block(&mut store, &proc_for_block);
    let delta = 1e-3;

    World::run(2, |mut comm| {
        let rank = comm.rank();
        let mut domain = LocalDomain::build(&store, &mut comm).unwrap();
        assert_eq!(domain.site_count, 64);

        // Peer bookkeeping is symmetric: one peer each, and the i = 3
        // plane shares 16 axial plus 36 diagonal distributions.
        assert_eq!(domain.peers.len(), 1);
        assert_eq!(domain.peers[0].rank, 1 - rank);
        assert_eq!(domain.peers[0].shared_count, 52);
        assert_eq!(domain.inter_sites().len(), 16);

        let mut lbm = Lbm::new(&quiescent_config(), 1e-4);
        lbm.set_initial_conditions(&mut domain);

        if rank == 0 {
            let site = domain.site_index(3, 2, 2).unwrap();
            domain.f_old[site * NUM_VECTORS + 1] += delta;
        }

        lbm.step(&mut domain, &mut comm, None, 1, 1).unwrap();

        if rank == 1 {
            // The value that crossed is the post-collision +x
            // distribution of the perturbed site.
            let mut f = WEIGHTS;
            f[1] += delta;
            let (density, momentum) = moments(&f);
            let f_eq = equilibrium(density, momentum);
            let expected = f[1] + lbm.params.omega * (f[1] - f_eq[1]);

            let site = domain.site_index(4, 2, 2).unwrap();
            let received = domain.f_old[site * NUM_VECTORS + 1];
            assert!(
                (received - expected).abs() < 1e-15,
                "received {} expected {}",
                received,
                expected
            );
            assert!((received - WEIGHTS[1]).abs() > delta / 2.0);
        }

        if rank == 0 {
            // The inverse direction came back from rank 1, unperturbed.
            let site = domain.site_index(3, 2, 2).unwrap();
            let received = domain.f_old[site * NUM_VECTORS + 2];
            assert!((received - WEIGHTS[2]).abs() < 1e-15);
        }
    });
}

/// With both ranks at equilibrium, the exchange is invisible: every
/// shared slot carries the weight of its direction.
#[test]
fn quiescent_halo_is_lossless() {
    let mut store = common::box_geometry((2, 1, 1), 4);
    let proc_for_block = vec![Some(0), Some(1)];
    common::assign_by_block(&mut store, &proc_for_block);

    World::run(2, |mut comm| {
        let mut domain = LocalDomain::build(&store, &mut comm).unwrap();
        let mut lbm = Lbm::new(&quiescent_config(), 1e-4);
        lbm.set_initial_conditions(&mut domain);
        for step in 1..=4 {
            lbm.step(&mut domain, &mut comm, None, 1, step).unwrap();
        }
        for site in 0..domain.site_count {
            let (density, momentum) = domain.moments_at(site);
            assert!((density - 1.0).abs() < 1e-12);
            for component in momentum {
                assert!(component.abs() < 1e-12);
            }
        }
    });
}

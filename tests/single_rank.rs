/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

mod common;

use hemoflow::comm::World;
use hemoflow::config::{Monitoring, SimConfig};
use hemoflow::domain::LocalDomain;
use hemoflow::geometry::StressType;
use hemoflow::lattice::NUM_VECTORS;
use hemoflow::lb::{Lbm, Stability};

fn quiescent_config() -> SimConfig {
    SimConfig {
        total_time_steps: 10,
        steps_per_cycle: 10,
        data_file_path: "unused".into(),
        stress_type: StressType::ShearStress,
        inlets: Vec::new(),
        outlets: Vec::new(),
        monitoring: Monitoring::default(),
        property_outputs: Vec::new(),
        initial_pressure_mmhg: 80.0,
    }
}

/// A 4x4x4 all-fluid cube at uniform equilibrium must reproduce itself:
/// density 1 and zero velocity everywhere, for every step.
#[test]
fn uniform_equilibrium_is_a_fixed_point() {
    let mut store = common::box_geometry((1, 1, 1), 4);
    let proc_for_block = common::all_on_rank_zero(&store);
    common::assign_by_block(&mut store, &proc_for_block);

    World::run(1, |mut comm| {
        let mut domain = LocalDomain::build(&store, &mut comm).unwrap();
        assert_eq!(domain.site_count, 64);
        assert!(domain.peers.is_empty());
        assert_eq!(domain.inner_sites().len(), 64);

        let mut lbm = Lbm::new(&quiescent_config(), 1e-4);
        lbm.set_initial_conditions(&mut domain);

        for step in 1..=10 {
            let stability = lbm.step(&mut domain, &mut comm, None, 1, step).unwrap();
            assert_eq!(stability, Stability::Stable);
        }

        for site in 0..domain.site_count {
            let (density, momentum) = domain.moments_at(site);
            assert!((density - 1.0).abs() < 1e-12, "density drifted: {}", density);
            for component in momentum {
                assert!(component.abs() < 1e-12, "velocity drifted: {}", component);
            }
        }
    });
}

/// Every stream target lies in the local distribution array, on the
/// rubbish slot, or in the shared area.
#[test]
fn stream_targets_stay_in_bounds() {
    let mut store = common::box_geometry((1, 1, 1), 4);
    let proc_for_block = common::all_on_rank_zero(&store);
    common::assign_by_block(&mut store, &proc_for_block);

    World::run(1, |mut comm| {
        let domain = LocalDomain::build(&store, &mut comm).unwrap();
        let rubbish = domain.site_count * NUM_VECTORS;
        assert_eq!(domain.rubbish_slot(), rubbish);
        let upper = rubbish + 1 + domain.shared_count;
        for &target in &domain.stream_map {
            assert!(target < upper);
        }
        // A corner site streams its outward diagonals into the rubbish
        // slot.
        let corner = domain.site_index(0, 0, 0).unwrap();
        assert_eq!(domain.stream_map[corner * NUM_VECTORS + 8], rubbish);
    });
}

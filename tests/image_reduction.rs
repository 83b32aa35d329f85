/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use hemoflow::comm::{Communicator, World};
use hemoflow::error::Error;
use hemoflow::image::{ImageProducer, ImageReducer, PixelSet, PixelValue, ReducerConfig};

const PAYLOAD: usize = 12;

/// Renders one pixel of the rank's own plus a contested pixel at the
/// origin whose depth decreases with the rank, so the composite must take
/// the origin from the highest rank.
struct RankProducer {
    rank: usize,
    size: usize,
}

impl ImageProducer for RankProducer {
    fn render(&mut self, _start_iteration: u64) -> PixelSet {
        let mut set = PixelSet::new(PAYLOAD);
        set.insert(
            (self.rank as u32 + 1, 0),
            PixelValue {
                depth: 1.0,
                source_rank: self.rank as u32,
                payload: vec![self.rank as u8; PAYLOAD],
            },
        );
        set.insert(
            (0, 0),
            PixelValue {
                depth: (self.size - self.rank) as f64,
                source_rank: self.rank as u32,
                payload: vec![0x40 | self.rank as u8; PAYLOAD],
            },
        );
        set
    }
}

fn local_pixels(rank: usize, size: usize) -> PixelSet {
    RankProducer { rank, size }.render(0)
}

fn expected_composite(size: usize) -> PixelSet {
    let mut expected = PixelSet::new(PAYLOAD);
    for rank in 0..size {
        expected.merge(local_pixels(rank, size));
    }
    expected
}

/// Two overlapping reductions on four ranks: the composite for start 10
/// arrives on iteration 15 and the one for start 12 on iteration 17.
#[test]
fn overlapping_reductions_complete_in_order() {
    let emitted = World::run(4, |mut comm| {
        let rank = comm.rank();
        let config = ReducerConfig::default();
        let mut reducer = ImageReducer::new(rank, 4, 1000, config);
        let mut producer = RankProducer { rank, size: 4 };
        assert_eq!(reducer.round_trip_length(), 6);

        let mut emitted = Vec::new();
        for i in 10..=20 {
            if i == 10 || i == 12 {
                let finish = reducer
                    .start(i, producer.render(i), &mut comm)
                    .unwrap();
                assert_eq!(finish, i + 5);
            }
            reducer.advance(i, &mut comm).unwrap();
            for (start, set) in reducer.completed.drain(..) {
                emitted.push((start, i, set));
            }
        }
        assert_eq!(reducer.in_flight(), 0);
        emitted
    });

    let expected = expected_composite(4);
    let root = &emitted[0];
    assert_eq!(root.len(), 2);
    assert_eq!((root[0].0, root[0].1), (10, 15));
    assert_eq!((root[1].0, root[1].1), (12, 17));
    assert_eq!(root[0].2, expected);
    assert_eq!(root[1].2, expected);
    for rank in 1..4 {
        assert!(emitted[rank].is_empty(), "only the root composes");
    }
}

/// A rendering requested three iterations before the end cannot make the
/// six-iteration round trip; the butterfly fold must deliver the same
/// composite immediately.
#[test]
fn late_request_falls_back_to_instant_broadcast() {
    let emitted = World::run(4, |mut comm| {
        let rank = comm.rank();
        let mut reducer = ImageReducer::new(rank, 4, 20, ReducerConfig::default());
        let finish = reducer
            .start(18, local_pixels(rank, 4), &mut comm)
            .unwrap();
        assert_eq!(finish, 18);
        assert_eq!(reducer.in_flight(), 0);
        std::mem::take(&mut reducer.completed)
    });

    assert_eq!(emitted[0].len(), 1);
    assert_eq!(emitted[0][0].0, 18);
    assert_eq!(emitted[0][0].1, expected_composite(4));
    for rank in 1..4 {
        assert!(emitted[rank].is_empty());
    }
}

/// The in-flight register is bounded.
#[test]
fn too_many_renderings_in_flight_is_a_protocol_error() {
    World::run(1, |mut comm| {
        let config = ReducerConfig {
            max_inflight: 2,
            ..ReducerConfig::default()
        };
        let mut reducer = ImageReducer::new(0, 1, 1000, config);
        reducer.start(1, PixelSet::new(PAYLOAD), &mut comm).unwrap();
        reducer.start(2, PixelSet::new(PAYLOAD), &mut comm).unwrap();
        let outcome = reducer.start(3, PixelSet::new(PAYLOAD), &mut comm);
        assert!(matches!(outcome, Err(Error::Protocol(_))));

        // A reset releases everything outstanding.
        reducer.reset();
        assert_eq!(reducer.in_flight(), 0);
    });
}

/// An oversized local rendering is rejected up front.
#[test]
fn oversized_rendering_is_a_protocol_error() {
    World::run(1, |mut comm| {
        let config = ReducerConfig {
            max_pixels: 1,
            ..ReducerConfig::default()
        };
        let mut reducer = ImageReducer::new(0, 1, 1000, config);
        let mut set = PixelSet::new(PAYLOAD);
        for x in 0..3 {
            set.insert(
                (x, 0),
                PixelValue {
                    depth: 1.0,
                    source_rank: 0,
                    payload: vec![0; PAYLOAD],
                },
            );
        }
        let outcome = reducer.start(5, set, &mut comm);
        assert!(matches!(outcome, Err(Error::Protocol(_))));
    });
}

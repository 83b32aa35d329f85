/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! In-process message-passing world.
//!
//! [`World::run`] spawns one OS thread per rank and hands each a
//! [`MemCommunicator`] endpoint. Point-to-point messages travel over
//! unbounded channels, one inbox per rank, preserving per-sender order;
//! collectives synchronise on a shared barrier with one payload slot per
//! rank. There is no threading *inside* a rank.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{bytes, Communicator, Rank, RecvRequest, Tag};
use crate::error::{Error, Result};

struct Envelope {
    from: Rank,
    tag: Tag,
    payload: Vec<u8>,
}

struct Collectives {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<u8>>>,
}

/// The SPMD world. Ranks are threads of the calling process.
pub struct World;

impl World {
    /// Runs `body` on `size` ranks and returns the per-rank results in
    /// rank order. A panicking rank propagates its panic to the caller.
    pub fn run<T, F>(size: usize, body: F) -> Vec<T>
    where
        T: Send,
        F: Fn(MemCommunicator) -> T + Sync,
    {
        assert!(size > 0, "a world needs at least one rank");
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let shared = Arc::new(Collectives {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });

        let mut results: Vec<Option<T>> = (0..size).map(|_| None).collect();
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(size);
            for (rank, inbox) in inboxes.into_iter().enumerate() {
                let endpoint = MemCommunicator {
                    rank,
                    size,
                    senders: senders.clone(),
                    inbox,
                    stash: HashMap::new(),
                    shared: Arc::clone(&shared),
                };
                let body = &body;
                handles.push(
                    std::thread::Builder::new()
                        .name(format!("rank-{}", rank))
                        .spawn_scoped(scope, move || body(endpoint))
                        .expect("could not spawn rank thread"),
                );
            }
            for (rank, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(result) => results[rank] = Some(result),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });
        results.into_iter().map(|r| r.unwrap()).collect()
    }
}

/// One rank's endpoint of an in-process world.
pub struct MemCommunicator {
    rank: Rank,
    size: usize,
    senders: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    /// Messages pulled from the inbox before their receive was redeemed,
    /// keyed by `(sender, tag)` and kept in arrival order.
    stash: HashMap<(Rank, Tag), VecDeque<Vec<u8>>>,
    shared: Arc<Collectives>,
}

impl MemCommunicator {
    fn pull(&mut self, from: Rank, tag: Tag) -> Result<Vec<u8>> {
        if let Some(queue) = self.stash.get_mut(&(from, tag)) {
            if let Some(payload) = queue.pop_front() {
                return Ok(payload);
            }
        }
        loop {
            let envelope = self.inbox.recv().map_err(|_| {
                Error::Topology(format!(
                    "rank {} waiting on {} tag {} but the world is gone",
                    self.rank, from, tag
                ))
            })?;
            if envelope.from == from && envelope.tag == tag {
                return Ok(envelope.payload);
            }
            self.stash
                .entry((envelope.from, envelope.tag))
                .or_default()
                .push_back(envelope.payload);
        }
    }
}

impl Communicator for MemCommunicator {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&mut self, to: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        if to >= self.size {
            return Err(Error::Topology(format!(
                "send to rank {} in a world of {}",
                to, self.size
            )));
        }
        self.senders[to]
            .send(Envelope {
                from: self.rank,
                tag,
                payload,
            })
            .map_err(|_| Error::Topology(format!("rank {} is unreachable", to)))
    }

    fn post_receive(&mut self, from: Rank, tag: Tag) -> RecvRequest {
        // Reception is eager into the inbox; the request only records what
        // to match at the wait.
        RecvRequest { from, tag }
    }

    fn wait_all(&mut self, requests: &[RecvRequest]) -> Result<Vec<Vec<u8>>> {
        requests
            .iter()
            .map(|request| self.pull(request.from, request.tag))
            .collect()
    }

    fn barrier(&mut self) {
        self.shared.barrier.wait();
    }

    fn all_gather(&mut self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        {
            let mut slots = self.shared.slots.lock().unwrap();
            slots[self.rank] = payload;
        }
        self.shared.barrier.wait();
        let gathered = self.shared.slots.lock().unwrap().clone();
        // Nobody may overwrite a slot until every rank has taken its copy.
        self.shared.barrier.wait();
        Ok(gathered)
    }

    fn all_reduce_max(&mut self, value: u64) -> Result<u64> {
        let gathered = self.all_gather(bytes::from_u64s(&[value]))?;
        Ok(gathered
            .iter()
            .map(|payload| bytes::to_u64s(payload)[0])
            .max()
            .unwrap())
    }

    fn all_reduce_sum(&mut self, value: u64) -> Result<u64> {
        let gathered = self.all_gather(bytes::from_u64s(&[value]))?;
        Ok(gathered
            .iter()
            .map(|payload| bytes::to_u64s(payload)[0])
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_point_is_ordered_per_sender() {
        let totals = World::run(2, |mut comm| {
            if comm.rank() == 0 {
                comm.send(1, 7, vec![1]).unwrap();
                comm.send(1, 7, vec![2]).unwrap();
                comm.send(1, 8, vec![3]).unwrap();
                0
            } else {
                // Redeem out of posting order; the late tag must not steal
                // the earlier messages.
                let r_late = comm.post_receive(0, 8);
                let r_a = comm.post_receive(0, 7);
                let r_b = comm.post_receive(0, 7);
                let got = comm.wait_all(&[r_late, r_a, r_b]).unwrap();
                assert_eq!(got, vec![vec![3], vec![1], vec![2]]);
                1
            }
        });
        assert_eq!(totals, vec![0, 1]);
    }

    #[test]
    fn collectives_agree_on_every_rank() {
        World::run(4, |mut comm| {
            let rank = comm.rank() as u64;
            let gathered = comm.all_gather(vec![rank as u8]).unwrap();
            assert_eq!(gathered, vec![vec![0], vec![1], vec![2], vec![3]]);
            assert_eq!(comm.all_reduce_max(rank).unwrap(), 3);
            assert_eq!(comm.all_reduce_sum(rank).unwrap(), 6);
            // Back-to-back collectives must not race each other's slots.
            let again = comm.all_gather(vec![rank as u8 + 10]).unwrap();
            assert_eq!(again[comm.rank()], vec![rank as u8 + 10]);
        });
    }
}

/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Message-passing runtime abstraction.
//!
//! One single-threaded process per partition, single-program-multiple-data;
//! the only suspension points a rank may hit are [`Communicator::wait_all`]
//! and the collectives. Sends are buffered eagerly, so a matching receive
//! posted later still completes; the per-step halo protocol relies on this
//! to overlap collide-stream work with the wire.
//!
//! Message payloads are opaque byte vectors; the [`bytes`] helpers convert
//! scalar slices at the endpoints. Tags separate concurrent conversations
//! (halo exchange, set-up exchanges, one tag pair per in-flight image
//! reduction), and messages between one `(sender, tag)` pair are delivered
//! in order.

pub mod mem;

pub use mem::{MemCommunicator, World};

use crate::error::Result;

/// Index of a process in the world, `0..size`.
pub type Rank = usize;

/// Conversation identifier carried by every message.
pub type Tag = u64;

/// Tag of the per-step halo distribution exchange.
pub const TAG_HALO: Tag = 10;
/// Tag of the one-shot shared-distribution identification exchange.
pub const TAG_SHARED_SETUP: Tag = 11;
/// First tag of the image-reduction range; see [`image_tag`].
pub const TAG_IMAGE_BASE: Tag = 1 << 20;

/// Tag of one phase of the reduction started at `start`: splay 0 and 1 of
/// the tree schedule, then the butterfly fold and its final hop.
/// Concurrent in-flight reductions must not share tags.
pub fn image_tag(start: u64, phase: u64) -> Tag {
    debug_assert!(phase < 4);
    TAG_IMAGE_BASE + 4 * start + phase
}

/// Handle of a posted non-blocking receive, redeemed at [`wait_all`].
///
/// [`wait_all`]: Communicator::wait_all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvRequest {
    pub from: Rank,
    pub tag: Tag,
}

/// A message-passing endpoint owned by one rank.
///
/// Collectives must be entered by every rank of the world; the runtime has
/// no sub-communicators.
pub trait Communicator {
    fn rank(&self) -> Rank;
    fn size(&self) -> usize;

    /// Posts a buffered non-blocking send. The payload is owned by the
    /// runtime from here on.
    fn send(&mut self, to: Rank, tag: Tag, payload: Vec<u8>) -> Result<()>;

    /// Posts a non-blocking receive for one message from `from` with
    /// `tag`.
    fn post_receive(&mut self, from: Rank, tag: Tag) -> RecvRequest;

    /// Blocks until every request has a message, returning payloads in
    /// request order. Outstanding sends are buffered, so this is also the
    /// send-completion point.
    fn wait_all(&mut self, requests: &[RecvRequest]) -> Result<Vec<Vec<u8>>>;

    fn barrier(&mut self);

    /// Gathers one byte vector from every rank, in rank order, on every
    /// rank.
    fn all_gather(&mut self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>>;

    /// Global maximum of one `u64` per rank.
    fn all_reduce_max(&mut self, value: u64) -> Result<u64>;

    /// Global sum of one `u64` per rank.
    fn all_reduce_sum(&mut self, value: u64) -> Result<u64>;

    /// Convenience blocking receive of a single message.
    fn receive(&mut self, from: Rank, tag: Tag) -> Result<Vec<u8>> {
        let request = self.post_receive(from, tag);
        Ok(self.wait_all(&[request])?.pop().unwrap())
    }
}

/// Scalar slice ↔ byte vector conversions for message payloads.
///
/// Everything is native-endian: payloads never leave the process group.
pub mod bytes {
    pub fn from_f64s(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    pub fn to_f64s(payload: &[u8]) -> Vec<f64> {
        payload
            .chunks_exact(8)
            .map(|c| f64::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    }

    pub fn from_u64s(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    pub fn to_u64s(payload: &[u8]) -> Vec<u64> {
        payload
            .chunks_exact(8)
            .map(|c| u64::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    }
}

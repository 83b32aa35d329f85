/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Peer bookkeeping for the halo exchange.

use crate::comm::Rank;

/// Upper bound on the number of neighbouring ranks of one rank. Exceeding
/// it is a fatal configuration error.
pub const MAX_NEIGHBOUR_PROCS: usize = 52;

/// A rank sharing at least one distribution with this one.
///
/// `first_shared` indexes the per-rank contiguous send/receive area
/// appended beyond the `N·Q` distribution array; peers are laid out there
/// in rank order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub rank: Rank,
    pub shared_count: usize,
    pub first_shared: usize,
}

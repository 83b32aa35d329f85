/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]

pub mod comm;
pub mod config;
pub mod decomposition;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod image;
pub mod lattice;
pub mod lb;
pub mod runtime;

/// Prelude module to import everything from this crate
pub mod prelude {
    pub use crate::comm::{Communicator, MemCommunicator, Rank, World};
    pub use crate::config::SimConfig;
    pub use crate::decomposition::{assign_blocks, refine, Partitioner, PropagationPartitioner};
    pub use crate::domain::{LocalDomain, Peer, StreamTarget, MAX_NEIGHBOUR_PROCS};
    pub use crate::error::{Error, Result};
    pub use crate::geometry::{GeometryFile, GeometryStore, Preamble, StressType};
    pub use crate::image::{ImageReducer, PixelSet, ReducerConfig};
    pub use crate::lattice::{SiteData, SiteType, NUM_VECTORS};
    pub use crate::lb::{Lbm, Stability};
    pub use crate::runtime::{run, RuntimeOptions};
}

/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Error kinds of the simulation core.
//!
//! All kinds are fatal at the core level: the [`Runtime`](crate::runtime)
//! logs a single diagnostic line naming the kind, the rank that first
//! detected it and a short context string, then aborts the collective.
//! The only local recovery mechanisms are the instability restart policy
//! of the LB iterator and the image reducer's instant-broadcast fallback.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// File open, short read, short write, invalid path.
    #[error("i/o failure on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Preamble or header of the wrong size, byte-length sum mismatch,
    /// bit-layout contradiction in a site record.
    #[error("malformed geometry file: {0}")]
    Format(String),

    /// The partitioner returned an invalid assignment or left a rank with
    /// no fluid sites.
    #[error("invalid partition: {0}")]
    Partition(String),

    /// Peer count exceeded [`MAX_NEIGHBOUR_PROCS`], or an edge site claims
    /// a neighbour on an unreachable rank.
    ///
    /// [`MAX_NEIGHBOUR_PROCS`]: crate::domain::MAX_NEIGHBOUR_PROCS
    #[error("rank topology error: {0}")]
    Topology(String),

    /// A negative distribution was detected after the restart policy had
    /// been exhausted.
    #[error("simulation still unstable after {restarts} restarts")]
    Instability { restarts: usize },

    /// The image reducer received a pixel count it cannot honour.
    #[error("image reduction protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    /// Opens `path`-flavoured I/O errors with less ceremony at call sites.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// The short kind name used in the fatal diagnostic line.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io { .. } => "IoError",
            Error::Format(_) => "FormatError",
            Error::Partition(_) => "PartitionError",
            Error::Topology(_) => "TopologyError",
            Error::Instability { .. } => "InstabilityError",
            Error::Protocol(_) => "ProtocolError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

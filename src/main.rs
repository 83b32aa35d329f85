/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Thin driver around [`hemoflow::runtime::run`]: one positional input
//! directory, exit code 0 on stable termination, 1 on misuse or on
//! instability past the restart limit.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::info;

use hemoflow::comm::World;
use hemoflow::config::SimConfig;
use hemoflow::image::ReducerConfig;
use hemoflow::runtime::{self, RuntimeOptions};

#[derive(Parser, Debug)]
#[command(
    name = "hemoflow",
    about = "Parallel lattice-Boltzmann blood-flow simulator."
)]
struct Args {
    /// Input directory holding config.properties and the geometry file.
    input_dir: PathBuf,

    /// Number of ranks to run in this process.
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Keep rank 0 free of fluid sites.
    #[arg(long)]
    reserve_leader: bool,

    /// Request an image rendering every N iterations.
    #[arg(long)]
    render_every: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.ranks == 0 {
        eprintln!("hemoflow: at least one rank is required");
        return ExitCode::FAILURE;
    }

    let config = match SimConfig::load(&args.input_dir)
        .with_context(|| format!("loading configuration from {}", args.input_dir.display()))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hemoflow: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = RuntimeOptions {
        reserve_leader: args.reserve_leader,
        reducer: ReducerConfig::default(),
        render_period: args.render_every,
    };

    let reports = World::run(args.ranks, |mut comm| {
        runtime::run(&mut comm, &config, &options)
    });

    let mut failed = false;
    for (rank, report) in reports.into_iter().enumerate() {
        match report {
            Ok(report) => {
                if rank == 0 {
                    info!(
                        "finished after {} steps, {} restarts, {} composites",
                        report.steps,
                        report.restarts,
                        report.composites.len()
                    );
                }
            }
            Err(_) => failed = true,
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

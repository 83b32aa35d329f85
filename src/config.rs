/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Simulation configuration.
//!
//! One flat record replaces the two legacy loaders; the core consumes only
//! the fields below. The CLI driver fills it from a java-properties file
//! in the input directory (the XML surface of the legacy tooling is
//! outside the core), and tests construct it directly.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::geometry::StressType;
use crate::lattice::REFERENCE_PRESSURE_MMHG;

/// Pressure profile of one inlet or outlet: a cosine over the cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoletConfig {
    pub pressure_avg_mmhg: f64,
    pub pressure_amp_mmhg: f64,
    pub phase_rad: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Monitoring {
    pub convergence_enabled: bool,
    pub relative_tolerance: f64,
    pub terminate_on_convergence: bool,
    pub incompressibility_check: bool,
}

impl Default for Monitoring {
    fn default() -> Self {
        Self {
            convergence_enabled: false,
            relative_tolerance: 1e-9,
            terminate_on_convergence: false,
            incompressibility_check: false,
        }
    }
}

/// A requested field extraction: which property to emit and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyOutput {
    pub field: String,
    pub period: usize,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub total_time_steps: usize,
    pub steps_per_cycle: usize,
    pub data_file_path: PathBuf,
    pub stress_type: StressType,
    pub inlets: Vec<IoletConfig>,
    pub outlets: Vec<IoletConfig>,
    pub monitoring: Monitoring,
    pub property_outputs: Vec<PropertyOutput>,
    pub initial_pressure_mmhg: f64,
}

impl SimConfig {
    /// Loads the configuration from `<input_dir>/config.properties`,
    /// resolving a relative data file path against the input directory.
    pub fn load(input_dir: impl AsRef<Path>) -> Result<Self> {
        let input_dir = input_dir.as_ref();
        let path = input_dir.join("config.properties");
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let map = java_properties::read(BufReader::new(file))
            .map_err(|e| Error::Format(format!("config: {}", e)))?;

        let mut data_file_path = PathBuf::from(require(&map, "data_file_path")?);
        if data_file_path.is_relative() {
            data_file_path = input_dir.join(data_file_path);
        }

        let stress_raw: u32 = parse(&map, "stress_type")?;
        let stress_type = StressType::from_u32(stress_raw)
            .ok_or_else(|| Error::Format(format!("config: unknown stress type {}", stress_raw)))?;

        Ok(SimConfig {
            total_time_steps: parse(&map, "total_time_steps")?,
            steps_per_cycle: parse(&map, "steps_per_cycle")?,
            data_file_path,
            stress_type,
            inlets: parse_iolets(&map, "inlet")?,
            outlets: parse_iolets(&map, "outlet")?,
            monitoring: Monitoring {
                convergence_enabled: parse_or(&map, "monitoring.convergence_enabled", false)?,
                relative_tolerance: parse_or(&map, "monitoring.relative_tolerance", 1e-9)?,
                terminate_on_convergence: parse_or(
                    &map,
                    "monitoring.terminate_on_convergence",
                    false,
                )?,
                incompressibility_check: parse_or(
                    &map,
                    "monitoring.incompressibility_check",
                    false,
                )?,
            },
            property_outputs: parse_property_outputs(&map)?,
            initial_pressure_mmhg: parse_or(
                &map,
                "initial_pressure_mmhg",
                REFERENCE_PRESSURE_MMHG,
            )?,
        })
    }
}

fn require<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::Format(format!("config: missing key {}", key)))
}

fn parse<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str) -> Result<T> {
    require(map, key)?
        .parse()
        .map_err(|_| Error::Format(format!("config: bad value for {}", key)))
}

fn parse_or<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T> {
    match map.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Format(format!("config: bad value for {}", key))),
        None => Ok(default),
    }
}

fn parse_iolets(map: &HashMap<String, String>, prefix: &str) -> Result<Vec<IoletConfig>> {
    let count: usize = parse_or(map, &format!("{}s", prefix), 0)?;
    (0..count)
        .map(|index| {
            Ok(IoletConfig {
                pressure_avg_mmhg: parse(map, &format!("{}.{}.pressure_avg_mmhg", prefix, index))?,
                pressure_amp_mmhg: parse_or(
                    map,
                    &format!("{}.{}.pressure_amp_mmhg", prefix, index),
                    0.0,
                )?,
                phase_rad: parse_or(map, &format!("{}.{}.phase_rad", prefix, index), 0.0)?,
            })
        })
        .collect()
}

fn parse_property_outputs(map: &HashMap<String, String>) -> Result<Vec<PropertyOutput>> {
    let count: usize = parse_or(map, "property_outputs", 0)?;
    (0..count)
        .map(|index| {
            Ok(PropertyOutput {
                field: require(map, &format!("property_output.{}.field", index))?.to_string(),
                period: parse(map, &format!("property_output.{}.period", index))?,
            })
        })
        .collect()
}

/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Result;
use hemoflow::config::SimConfig;
use hemoflow::error::Error;
use hemoflow::geometry::StressType;
use tempfile::TempDir;

fn write_config(dir: &std::path::Path, body: &str) -> Result<()> {
    std::fs::write(dir.join("config.properties"), body)?;
    Ok(())
}

#[test]
fn full_configuration_round_trips() -> Result<()> {
    let tmp = TempDir::new()?;
    write_config(
        tmp.path(),
        "total_time_steps=1000\n\
         steps_per_cycle=200\n\
         data_file_path=vessel.dat\n\
         stress_type=1\n\
         inlets=1\n\
         inlet.0.pressure_avg_mmhg=82.0\n\
         inlet.0.pressure_amp_mmhg=1.5\n\
         inlet.0.phase_rad=0.7853981633974483\n\
         outlets=2\n\
         outlet.0.pressure_avg_mmhg=80.0\n\
         outlet.1.pressure_avg_mmhg=79.5\n\
         outlet.1.pressure_amp_mmhg=0.25\n\
         monitoring.convergence_enabled=true\n\
         monitoring.relative_tolerance=1e-7\n\
         monitoring.terminate_on_convergence=true\n\
         property_outputs=1\n\
         property_output.0.field=velocity\n\
         property_output.0.period=100\n\
         initial_pressure_mmhg=81.0\n",
    )?;

    let config = SimConfig::load(tmp.path())?;
    assert_eq!(config.total_time_steps, 1000);
    assert_eq!(config.steps_per_cycle, 200);
    assert_eq!(config.data_file_path, tmp.path().join("vessel.dat"));
    assert_eq!(config.stress_type, StressType::ShearStress);
    assert_eq!(config.inlets.len(), 1);
    assert!((config.inlets[0].pressure_amp_mmhg - 1.5).abs() < 1e-12);
    assert_eq!(config.outlets.len(), 2);
    assert_eq!(config.outlets[0].pressure_amp_mmhg, 0.0);
    assert!(config.monitoring.convergence_enabled);
    assert!(config.monitoring.terminate_on_convergence);
    assert!(!config.monitoring.incompressibility_check);
    assert_eq!(config.property_outputs.len(), 1);
    assert_eq!(config.property_outputs[0].field, "velocity");
    assert!((config.initial_pressure_mmhg - 81.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn missing_keys_are_format_errors() -> Result<()> {
    let tmp = TempDir::new()?;
    write_config(tmp.path(), "total_time_steps=10\n")?;
    let outcome = SimConfig::load(tmp.path());
    assert!(matches!(outcome, Err(Error::Format(_))));
    Ok(())
}

#[test]
fn missing_directory_is_an_io_error() {
    let outcome = SimConfig::load("/nonexistent/input");
    assert!(matches!(outcome, Err(Error::Io { .. })));
}

#[test]
fn unknown_stress_type_is_rejected() -> Result<()> {
    let tmp = TempDir::new()?;
    write_config(
        tmp.path(),
        "total_time_steps=10\n\
         steps_per_cycle=10\n\
         data_file_path=vessel.dat\n\
         stress_type=9\n",
    )?;
    let outcome = SimConfig::load(tmp.path());
    assert!(matches!(outcome, Err(Error::Format(_))));
    Ok(())
}

// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Loader for the workload file
//!
//! The first token is the number of workloads `N`, followed by `N` groups of four lines:
//!
//! ```text
//! description
//! mode        (C for a native command, D for a container)
//! target      (command line or container name)
//! directory   (working directory, empty means the current one)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::workload::{ExecutionMode, WorkloadSpec, CURRENT_DIR};
use crate::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./config/cmds.conf";
const HOME_CONFIG_PATH: &str = ".sermn/cmds.conf";

/// Locations searched, in order, when no config file is given on the command line
pub fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(DEFAULT_CONFIG_PATH)];
    if let Some(home) = std::env::var_os("HOME") {
        locations.push(PathBuf::from(home).join(HOME_CONFIG_PATH));
    }
    locations
}

/// Picks the explicit path if given, otherwise the first default location that exists
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, Error> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::config(format!(
            "configuration file not found: {}",
            path.display()
        )));
    }

    let locations = default_locations();
    locations
        .iter()
        .find(|path| path.exists())
        .cloned()
        .ok_or_else(|| {
            let searched = locations
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            Error::config(format!(
                "configuration file not found, searched: {}; use --config to specify one",
                searched
            ))
        })
}

pub fn load(path: &Path) -> Result<Vec<WorkloadSpec>, Error> {
    let input = fs::read_to_string(path).map_err(|e| {
        Error::config(format!("failed to read {}: {}", path.display(), e))
    })?;

    let specs = parse(&input)?;
    info!(path = %path.display(), count = specs.len(), "loaded workload configuration");
    Ok(specs)
}

pub fn parse(input: &str) -> Result<Vec<WorkloadSpec>, Error> {
    let mut lines = input.lines().map(|line| line.trim_end_matches('\r'));

    let count_line = lines
        .by_ref()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| Error::config("missing workload count"))?;
    let count_token = count_line.split_whitespace().next().unwrap_or_default();
    let count = count_token
        .parse::<usize>()
        .map_err(|_| Error::config(format!("invalid workload count: {:?}", count_token)))?;

    let mut specs = Vec::new();
    for index in 0..count {
        let mut field = |name: &str| {
            lines
                .next()
                .map(str::trim)
                .ok_or_else(|| Error::config(format!("missing {} for workload {}", name, index)))
        };

        let description = field("description")?;
        let mode = field("mode")?;
        let target = field("target")?;
        let directory = field("working directory")?;

        let mode = ExecutionMode::from_code(mode).ok_or_else(|| {
            Error::config(format!(
                "invalid mode {:?} for workload {}, must be 'C' (command) or 'D' (container)",
                mode, index
            ))
        })?;

        if description.is_empty() {
            return Err(Error::config(format!(
                "empty description for workload {}",
                index
            )));
        }
        if target.is_empty() {
            return Err(Error::config(format!("empty target for workload {}", index)));
        }

        let directory = if directory.is_empty() {
            CURRENT_DIR
        } else {
            directory
        };

        debug!(index, description, %mode, "parsed workload");
        specs.push(WorkloadSpec::new(description, mode, target, directory));
    }

    Ok(specs)
}

// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Workload descriptors and their runtime state

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

pub const CURRENT_DIR: &str = ".";

/// How a workload is launched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExecutionMode {
    /// A command started directly as a child process
    #[serde(rename = "C")]
    Native,
    /// A named container driven through the container runtime's CLI
    #[serde(rename = "D")]
    Container,
}

impl ExecutionMode {
    /// Parses the single character used in the configuration file
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "C" => Some(ExecutionMode::Native),
            "D" => Some(ExecutionMode::Container),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Native => f.write_str("native"),
            ExecutionMode::Container => f.write_str("container"),
        }
    }
}

/// Immutable description of a managed workload, loaded once at startup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub description: String,
    pub mode: ExecutionMode,
    /// Command line for native workloads, container name for container workloads
    pub target: String,
    pub working_directory: PathBuf,
}

impl WorkloadSpec {
    pub fn new(
        description: impl Into<String>,
        mode: ExecutionMode,
        target: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            description: description.into(),
            mode,
            target: target.into(),
            working_directory: working_directory.into(),
        }
    }

    pub fn native(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(description, ExecutionMode::Native, command, CURRENT_DIR)
    }

    pub fn container(description: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(description, ExecutionMode::Container, name, CURRENT_DIR)
    }

    /// The working directory, or None when the workload runs in the server's own directory
    pub fn chdir(&self) -> Option<&PathBuf> {
        if self.working_directory.as_os_str().is_empty()
            || self.working_directory == PathBuf::from(CURRENT_DIR)
        {
            None
        } else {
            Some(&self.working_directory)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Dead,
    Running,
}

/// Mutable state of a workload, the pid only exists while it runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Runtime {
    Dead,
    Running { pid: libc::pid_t },
}

impl Runtime {
    pub fn status(&self) -> Status {
        match self {
            Runtime::Dead => Status::Dead,
            Runtime::Running { .. } => Status::Running,
        }
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        match *self {
            Runtime::Dead => None,
            Runtime::Running { pid } => Some(pid),
        }
    }

    /// The pid as reported on the wire, -1 when dead
    pub fn wire_pid(&self) -> libc::pid_t {
        self.pid().unwrap_or(-1)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Runtime::Running { .. })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::Dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_codes() {
        assert_eq!(ExecutionMode::from_code("C"), Some(ExecutionMode::Native));
        assert_eq!(ExecutionMode::from_code("D"), Some(ExecutionMode::Container));
        assert_eq!(ExecutionMode::from_code("X"), None);
        assert_eq!(ExecutionMode::from_code("CD"), None);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&ExecutionMode::Native).unwrap(),
            "\"C\""
        );
        assert_eq!(serde_json::to_string(&Status::Running).unwrap(), "\"RUNNING\"");
        assert_eq!(serde_json::to_string(&Status::Dead).unwrap(), "\"DEAD\"");
    }

    #[test]
    fn test_runtime_pid() {
        assert_eq!(Runtime::Dead.wire_pid(), -1);
        assert_eq!(Runtime::Running { pid: 42 }.wire_pid(), 42);
        assert_eq!(Runtime::default().status(), Status::Dead);
    }

    #[test]
    fn test_chdir() {
        assert_eq!(WorkloadSpec::native("a", "true").chdir(), None);
        let spec = WorkloadSpec::new("a", ExecutionMode::Native, "true", "/tmp");
        assert_eq!(spec.chdir(), Some(&PathBuf::from("/tmp")));
    }
}

// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The two ways a workload can be launched, a native command or a named container

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::supervisor::SupervisorConfig;
use crate::workload::{ExecutionMode, WorkloadSpec};
use crate::Error;

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

/// Result of asking whether a workload is still alive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Exited,
    /// The check itself failed, nothing should be concluded from it
    Unknown,
}

/// Operations every launch target supports
#[async_trait]
pub trait Launch: Send + Sync {
    /// Starts the workload, or the helper that starts it, without waiting for it
    fn spawn(&self) -> io::Result<Child>;

    /// Requests termination of the workload running as (or started by) `pid`
    async fn terminate(&self, pid: libc::pid_t, force: bool) -> Result<(), Error>;

    /// Checks if the workload is alive, reclaiming `child` if it has exited
    async fn probe(&self, pid: libc::pid_t, child: Option<&mut Child>) -> Liveness;

    /// Whether the exit of the spawned child means the workload itself is gone
    fn exit_ends_workload(&self, status: ExitStatus) -> bool;

    fn get_stdio(&self) -> StdIoConf {
        StdIoConf {
            stdin: Stdio::null(),
            stderr: Stdio::inherit(),
            stdout: Stdio::inherit(),
        }
    }
}

/// Splits a command line on whitespace, quoting is not supported
pub fn tokenize(command_line: &str) -> Vec<String> {
    command_line.split_whitespace().map(String::from).collect()
}

/// A command executed directly as a child of the server
#[derive(Clone, Debug)]
pub struct NativeTarget {
    id: usize,
    argv: Vec<String>,
    chdir: Option<PathBuf>,
}

impl NativeTarget {
    pub fn new(id: usize, spec: &WorkloadSpec) -> Self {
        Self {
            id,
            argv: tokenize(&spec.target),
            chdir: spec.chdir().cloned(),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

#[async_trait]
impl Launch for NativeTarget {
    fn spawn(&self) -> io::Result<Child> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let stdio = self.get_stdio();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(stdio.stdin)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr);

        if let Some(dir) = &self.chdir {
            command.current_dir(dir);
        }

        command.spawn()
    }

    async fn terminate(&self, pid: libc::pid_t, force: bool) -> Result<(), Error> {
        let signal = if force {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };

        debug!(id = self.id, pid, ?signal, "delivering signal");
        kill(Pid::from_raw(pid), signal).map_err(|errno| {
            Error::termination(
                self.id,
                format!("failed to deliver {:?} to pid {}: {}", signal, pid, errno),
            )
        })
    }

    async fn probe(&self, pid: libc::pid_t, child: Option<&mut Child>) -> Liveness {
        if let Some(child) = child {
            match child.try_wait() {
                Ok(Some(_)) => return Liveness::Exited,
                Ok(None) => return Liveness::Alive,
                Err(e) => warn!(id = self.id, pid, "failed to poll child: {}", e),
            }
        }

        // not our child anymore, fall back to a null signal
        match kill(Pid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => Liveness::Alive,
            Err(Errno::ESRCH) => Liveness::Exited,
            Err(_) => Liveness::Unknown,
        }
    }

    fn exit_ends_workload(&self, _status: ExitStatus) -> bool {
        true
    }
}

/// A named container, controlled through the container runtime's command line
#[derive(Clone, Debug)]
pub struct ContainerTarget {
    id: usize,
    runtime: String,
    name: String,
    chdir: Option<PathBuf>,
    helper_timeout: Duration,
}

impl ContainerTarget {
    pub fn new(id: usize, spec: &WorkloadSpec, config: &SupervisorConfig) -> Self {
        Self {
            id,
            runtime: config.container_runtime.clone(),
            name: spec.target.clone(),
            chdir: spec.chdir().cloned(),
            helper_timeout: config.helper_timeout,
        }
    }

    fn helper(&self, action: &str) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.runtime);
        command.arg(action);
        if let Some(dir) = &self.chdir {
            command.current_dir(dir);
        }
        command
    }

    fn describe(&self, action: &str) -> String {
        format!("{} {} {}", self.runtime, action, self.name)
    }
}

#[async_trait]
impl Launch for ContainerTarget {
    fn spawn(&self) -> io::Result<Child> {
        let stdio = self.get_stdio();
        let mut command = Command::new(&self.runtime);
        command
            .arg("start")
            .arg(&self.name)
            .stdin(stdio.stdin)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr);

        if let Some(dir) = &self.chdir {
            command.current_dir(dir);
        }

        command.spawn()
    }

    async fn terminate(&self, _pid: libc::pid_t, force: bool) -> Result<(), Error> {
        let action = if force { "kill" } else { "stop" };
        let mut command = self.helper(action);
        command.arg(&self.name);

        debug!(id = self.id, helper = %self.describe(action), "running helper");
        match run_helper(command, self.helper_timeout).await {
            Ok(Some(output)) if output.status.success() => Ok(()),
            Ok(Some(output)) => Err(Error::termination(
                self.id,
                format!(
                    "`{}` exited with {}: {}",
                    self.describe(action),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )),
            Ok(None) => Err(ErrorKind::TerminationTimeout {
                id: self.id,
                timeout: self.helper_timeout,
            }
            .into()),
            Err(e) => Err(Error::termination(
                self.id,
                format!("failed to run `{}`: {}", self.describe(action), e),
            )),
        }
    }

    async fn probe(&self, _pid: libc::pid_t, child: Option<&mut Child>) -> Liveness {
        // reclaim the start helper if it is done, the container outlives it
        if let Some(child) = child {
            child.try_wait().ok();
        }

        let mut command = self.helper("inspect");
        command.arg("--format").arg("{{.State.Running}}").arg(&self.name);

        match run_helper(command, self.helper_timeout).await {
            Ok(Some(output)) if output.status.success() => {
                match String::from_utf8_lossy(&output.stdout).trim() {
                    "true" => Liveness::Alive,
                    "false" => Liveness::Exited,
                    other => {
                        warn!(id = self.id, "unexpected inspect output: {:?}", other);
                        Liveness::Unknown
                    }
                }
            }
            Ok(Some(output)) => {
                warn!(id = self.id, status = %output.status, "inspect failed");
                Liveness::Unknown
            }
            Ok(None) => {
                warn!(id = self.id, "inspect timed out");
                Liveness::Unknown
            }
            Err(e) => {
                warn!(id = self.id, "failed to run inspect: {}", e);
                Liveness::Unknown
            }
        }
    }

    /// The start helper exits once the container is up, only a failed start ends the workload
    fn exit_ends_workload(&self, status: ExitStatus) -> bool {
        !status.success()
    }

    fn get_stdio(&self) -> StdIoConf {
        StdIoConf {
            stdin: Stdio::null(),
            stderr: Stdio::inherit(),
            // the runtime echoes the container name
            stdout: Stdio::null(),
        }
    }
}

/// Launch target of a workload, chosen from its execution mode
#[derive(Clone, Debug)]
pub enum LaunchTarget {
    Native(NativeTarget),
    Container(ContainerTarget),
}

impl LaunchTarget {
    pub fn new(id: usize, spec: &WorkloadSpec, config: &SupervisorConfig) -> Self {
        match spec.mode {
            ExecutionMode::Native => LaunchTarget::Native(NativeTarget::new(id, spec)),
            ExecutionMode::Container => {
                LaunchTarget::Container(ContainerTarget::new(id, spec, config))
            }
        }
    }

    fn inner(&self) -> &dyn Launch {
        match self {
            LaunchTarget::Native(native) => native,
            LaunchTarget::Container(container) => container,
        }
    }
}

#[async_trait]
impl Launch for LaunchTarget {
    fn spawn(&self) -> io::Result<Child> {
        self.inner().spawn()
    }

    async fn terminate(&self, pid: libc::pid_t, force: bool) -> Result<(), Error> {
        self.inner().terminate(pid, force).await
    }

    async fn probe(&self, pid: libc::pid_t, child: Option<&mut Child>) -> Liveness {
        self.inner().probe(pid, child).await
    }

    fn exit_ends_workload(&self, status: ExitStatus) -> bool {
        self.inner().exit_ends_workload(status)
    }
}

/// Runs a helper subprocess to completion on a worker task
///
/// Returns `None` if the helper did not finish within `timeout`, in which case it is killed.
pub(crate) async fn run_helper(
    mut command: tokio::process::Command,
    timeout: Duration,
) -> io::Result<Option<Output>> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn()?;
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        // dropping the timed out future drops the child, which kills it
        let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
        tx.send(result).ok();
    });

    match rx.await {
        Ok(Ok(output)) => output.map(Some),
        Ok(Err(_elapsed)) => Ok(None),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::Other,
            "helper task ended without a result",
        )),
    }
}

// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::process::Child;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::registry::{Registry, Workload};
use crate::target::{Launch, LaunchTarget, Liveness};
use crate::workload::Runtime;
use crate::Error;

pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Program used for container workloads, i.e. `docker` or `podman`
    pub container_runtime: String,
    /// Upper bound on any wait for a helper subprocess
    pub helper_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            container_runtime: DEFAULT_CONTAINER_RUNTIME.to_string(),
            helper_timeout: DEFAULT_HELPER_TIMEOUT,
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }
}

/// Outcome of a start request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Started {
    Spawned(libc::pid_t),
    /// Nothing was spawned, the workload was already running as this pid
    AlreadyRunning(libc::pid_t),
}

impl Started {
    pub fn pid(self) -> libc::pid_t {
        match self {
            Started::Spawned(pid) | Started::AlreadyRunning(pid) => pid,
        }
    }
}

struct Slot {
    target: LaunchTarget,
    /// The spawned child, kept until it has been waited on
    child: Option<Child>,
}

/// Owns the OS side of every workload and is the only writer of runtime state
///
/// Each workload has its own transition lock, held for the whole of a start or stop, so that
/// checking the state and acting on it can not interleave with another request for the same id.
pub struct ProcessSupervisor {
    registry: Arc<Registry>,
    slots: Vec<Mutex<Slot>>,
    /// Children that were stopped but not yet waited on
    detached: parking_lot::Mutex<Vec<(usize, Child)>>,
}

impl ProcessSupervisor {
    pub fn new(registry: Arc<Registry>, config: &SupervisorConfig) -> Self {
        let slots = registry
            .list()
            .iter()
            .map(|workload| {
                Mutex::new(Slot {
                    target: LaunchTarget::new(workload.id, &workload.spec, config),
                    child: None,
                })
            })
            .collect();

        Self {
            registry,
            slots,
            detached: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn slot(&self, id: usize) -> Result<&Mutex<Slot>, Error> {
        self.slots
            .get(id)
            .ok_or_else(|| ErrorKind::NotFound(id).into())
    }

    /// Current state as recorded, this never touches the OS
    pub fn status(&self, id: usize) -> Result<Workload, Error> {
        self.registry.get(id)
    }

    /// Starts the workload unless it is already running
    pub async fn start(&self, id: usize) -> Result<Started, Error> {
        let mut slot = self.slot(id)?.lock().await;
        self.reap_slot(id, &mut slot);

        if let Runtime::Running { pid } = self.registry.get(id)?.runtime {
            debug!(id, pid, "workload already running");
            return Ok(Started::AlreadyRunning(pid));
        }

        let child = slot
            .target
            .spawn()
            .map_err(|source| ErrorKind::Spawn { id, source })?;
        let pid = child.id() as libc::pid_t;

        if let Some(previous) = slot.child.replace(child) {
            self.detach(id, previous);
        }
        self.registry.set_runtime(id, Runtime::Running { pid })?;

        info!(id, pid, "workload started");
        Ok(Started::Spawned(pid))
    }

    /// Stops a running workload, gracefully unless `force` is set
    ///
    /// Native workloads are signaled and not waited for, the reaper collects them. Container
    /// workloads wait for the runtime's stop or kill helper, bounded by the helper timeout.
    pub async fn stop(&self, id: usize, force: bool) -> Result<(), Error> {
        let mut slot = self.slot(id)?.lock().await;
        self.reap_slot(id, &mut slot);

        let pid = match self.registry.get(id)?.runtime {
            Runtime::Running { pid } => pid,
            Runtime::Dead => return Err(ErrorKind::NotRunning(id).into()),
        };

        info!(id, pid, force, "stopping workload");
        let terminated = slot.target.terminate(pid, force).await;
        match terminated {
            Ok(()) => {
                self.registry.set_runtime(id, Runtime::Dead)?;
                if let Some(child) = slot.child.take() {
                    self.detach(id, child);
                }

                info!(id, pid, "workload stopped");
                Ok(())
            }
            Err(err) => {
                warn!(id, pid, "termination failed: {}", err);
                self.reconcile(id, pid, &mut slot).await?;
                Err(err)
            }
        }
    }

    /// Stops every running workload, used when the server shuts down
    pub async fn shutdown(&self) {
        let running = self
            .registry
            .list()
            .into_iter()
            .filter(|workload| workload.runtime.is_running())
            .map(|workload| async move {
                info!(
                    id = workload.id,
                    description = %workload.spec.description,
                    "terminating workload for shutdown"
                );
                if let Err(err) = self.stop(workload.id, false).await {
                    warn!(id = workload.id, "failed to stop workload: {}", err);
                }
            });

        join_all(running).await;
    }

    /// One reaper pass, returns the number of children reclaimed
    ///
    /// Workloads in the middle of a start or stop are skipped, the next pass will see them.
    pub fn reap(&self) -> usize {
        let mut reaped = 0;

        for (id, slot) in self.slots.iter().enumerate() {
            let mut slot = match slot.try_lock() {
                Ok(slot) => slot,
                Err(_) => continue,
            };

            if self.reap_slot(id, &mut slot) {
                reaped += 1;
            }
        }

        let mut detached = self.detached.lock();
        let before = detached.len();
        detached.retain_mut(|(id, child)| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(id = *id, pid = child.id(), %status, "reclaimed stopped child");
                false
            }
            Err(e) => {
                warn!(id = *id, pid = child.id(), "failed to wait on stopped child: {}", e);
                false
            }
        });

        reaped + (before - detached.len())
    }

    /// Number of stopped children still waiting to be reclaimed
    pub fn pending_children(&self) -> usize {
        self.detached.lock().len()
    }

    /// Polls the slot's child, marking the workload dead if its exit ends the workload
    fn reap_slot(&self, id: usize, slot: &mut Slot) -> bool {
        let child = match slot.child.as_mut() {
            Some(child) => child,
            None => return false,
        };

        let status = match child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return false,
            Err(e) => {
                warn!(id, pid = child.id(), "failed to poll child: {}", e);
                return false;
            }
        };

        let pid = child.id() as libc::pid_t;
        slot.child = None;

        if !slot.target.exit_ends_workload(status) {
            debug!(id, pid, %status, "start helper finished");
            return true;
        }

        let recorded = self.registry.get(id).map(|w| w.runtime.pid());
        if let Ok(Some(recorded)) = recorded {
            if recorded == pid {
                info!(id, pid, %status, "workload exited on its own");
                self.registry.set_runtime(id, Runtime::Dead).ok();
            }
        }

        true
    }

    /// Settles the recorded state with an explicit liveness check after a failed termination
    async fn reconcile(&self, id: usize, pid: libc::pid_t, slot: &mut Slot) -> Result<(), Error> {
        let Slot { target, child } = slot;

        let liveness = target.probe(pid, child.as_mut()).await;
        match liveness {
            Liveness::Exited => {
                info!(id, pid, "workload is gone, marking it dead");
                self.registry.set_runtime(id, Runtime::Dead)?;
                if let Some(child) = child.take() {
                    self.detach(id, child);
                }
            }
            Liveness::Alive => info!(id, pid, "workload is still running"),
            Liveness::Unknown => warn!(id, pid, "liveness unknown, keeping workload as running"),
        }

        Ok(())
    }

    fn detach(&self, id: usize, child: Child) {
        self.detached.lock().push((id, child));
    }
}

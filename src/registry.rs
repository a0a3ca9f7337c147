// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ErrorKind;
use crate::workload::{Runtime, WorkloadSpec};
use crate::Error;

/// A point in time view of one workload
#[derive(Clone, Debug)]
pub struct Workload {
    pub id: usize,
    pub spec: Arc<WorkloadSpec>,
    pub runtime: Runtime,
}

/// Ordered table of workloads and their runtime state
///
/// The ids are the positions in the table, they are assigned once and never change. Only the
/// supervisor may change runtime state, everything else reads snapshots.
#[derive(Debug)]
pub struct Registry {
    specs: Vec<Arc<WorkloadSpec>>,
    runtimes: RwLock<Vec<Runtime>>,
}

impl Registry {
    pub fn new(specs: Vec<WorkloadSpec>) -> Self {
        let runtimes = vec![Runtime::Dead; specs.len()];

        Self {
            specs: specs.into_iter().map(Arc::new).collect(),
            runtimes: RwLock::new(runtimes),
        }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn spec(&self, id: usize) -> Result<&Arc<WorkloadSpec>, Error> {
        self.specs
            .get(id)
            .ok_or_else(|| ErrorKind::NotFound(id).into())
    }

    pub fn get(&self, id: usize) -> Result<Workload, Error> {
        let spec = self.spec(id)?;
        let runtime = self.runtimes.read()[id];

        Ok(Workload {
            id,
            spec: Arc::clone(spec),
            runtime,
        })
    }

    /// Snapshot of all workloads, taken under a single read lock
    pub fn list(&self) -> Vec<Workload> {
        let runtimes = self.runtimes.read();

        self.specs
            .iter()
            .zip(runtimes.iter())
            .enumerate()
            .map(|(id, (spec, runtime))| Workload {
                id,
                spec: Arc::clone(spec),
                runtime: *runtime,
            })
            .collect()
    }

    pub(crate) fn set_runtime(&self, id: usize, runtime: Runtime) -> Result<(), Error> {
        let mut runtimes = self.runtimes.write();
        let slot = runtimes
            .get_mut(id)
            .ok_or_else(|| Error::from(ErrorKind::NotFound(id)))?;

        *slot = runtime;
        Ok(())
    }
}

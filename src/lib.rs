// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Common library functions for sermn, a small HTTP controlled service manager

pub mod api;
pub mod config;
mod error;
pub mod reaper;
pub mod registry;
pub mod supervisor;
pub mod target;
pub mod workload;

pub use error::{Error, ErrorKind};
pub use registry::{Registry, Workload};
pub use supervisor::{ProcessSupervisor, Started, SupervisorConfig};
pub use workload::{ExecutionMode, Runtime, Status, WorkloadSpec};

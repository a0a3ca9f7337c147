// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reclaims exited children and notices workloads that died on their own

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::supervisor::ProcessSupervisor;

/// Spawns the reaper task, it runs a pass on every SIGCHLD and at least once per `interval`
pub fn spawn_reaper(supervisor: Arc<ProcessSupervisor>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sigchld = match signal(SignalKind::child()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("SIGCHLD unavailable, reaping on interval only: {}", e);
                None
            }
        };

        loop {
            match sigchld.as_mut() {
                Some(sigchld) => {
                    tokio::select! {
                        _ = ticker.tick() => (),
                        _ = sigchld.recv() => (),
                    }
                }
                None => {
                    ticker.tick().await;
                }
            }

            let reaped = supervisor.reap();
            if reaped > 0 {
                debug!(reaped, "reaper pass");
            }
        }
    })
}

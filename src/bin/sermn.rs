// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{value_parser, Arg, ArgMatches, Command};
use tokio::net::TcpListener;
use tokio::runtime;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sermn::reaper::spawn_reaper;
use sermn::supervisor::DEFAULT_CONTAINER_RUNTIME;
use sermn::{api, config, Error, ProcessSupervisor, Registry, SupervisorConfig};

const CONFIG: &str = "config";
const PORT: &str = "port";
const BIND: &str = "bind";
const CONTAINER_RUNTIME: &str = "container-runtime";
const HELPER_TIMEOUT: &str = "helper-timeout";
const REAP_INTERVAL: &str = "reap-interval";

const DEFAULT_PORT: &str = "6755";
const LOG_JSON_ENV: &str = "SERMN_LOG_JSON";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
    fn server_opts(self) -> Self;
}

impl SetupClapApp for Command {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }

    fn server_opts(self) -> Self {
        self.arg(
            Arg::new(CONFIG)
                .short('c')
                .long(CONFIG)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("workload configuration file (default: ./config/cmds.conf, then ~/.sermn/cmds.conf)"),
        )
        .arg(
            Arg::new(PORT)
                .short('p')
                .long(PORT)
                .value_name("PORT")
                .value_parser(value_parser!(u16).range(1..))
                .default_value(DEFAULT_PORT)
                .help("HTTP server port"),
        )
        .arg(
            Arg::new(BIND)
                .short('b')
                .long(BIND)
                .value_name("ADDR")
                .value_parser(value_parser!(IpAddr))
                .default_value("0.0.0.0")
                .help("address to listen on"),
        )
        .arg(
            Arg::new(CONTAINER_RUNTIME)
                .long(CONTAINER_RUNTIME)
                .value_name("PROGRAM")
                .default_value(DEFAULT_CONTAINER_RUNTIME)
                .help("container runtime used for container workloads"),
        )
        .arg(
            Arg::new(HELPER_TIMEOUT)
                .long(HELPER_TIMEOUT)
                .value_name("SECS")
                .value_parser(value_parser!(u64).range(1..))
                .default_value("30")
                .help("how long to wait for a container runtime command to finish"),
        )
        .arg(
            Arg::new(REAP_INTERVAL)
                .long(REAP_INTERVAL)
                .value_name("MILLIS")
                .value_parser(value_parser!(u64).range(1..))
                .default_value("1000")
                .help("how often exited workloads are looked for, besides SIGCHLD"),
        )
    }
}

fn main() -> Result<(), Error> {
    let args = Command::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .server_opts()
        .get_matches();

    init_tracing();

    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(run(&args)).map_err(|err| {
        error!("sermn exited: {}", err);
        err
    })
}

/// RUST_LOG selects the level (default info), SERMN_LOG_JSON=1 switches to JSON lines
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(LOG_JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if use_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).compact())
            .init();
    }
}

fn supervisor_config(args: &ArgMatches) -> SupervisorConfig {
    let mut settings = SupervisorConfig::default();

    if let Some(runtime) = args.get_one::<String>(CONTAINER_RUNTIME) {
        settings.container_runtime = runtime.clone();
    }
    if let Some(secs) = args.get_one::<u64>(HELPER_TIMEOUT) {
        settings.helper_timeout = Duration::from_secs(*secs);
    }
    if let Some(millis) = args.get_one::<u64>(REAP_INTERVAL) {
        settings.reap_interval = Duration::from_millis(*millis);
    }

    settings
}

async fn run(args: &ArgMatches) -> Result<(), Error> {
    let path = config::resolve_path(args.get_one::<PathBuf>(CONFIG).map(PathBuf::as_path))?;
    info!(path = %path.display(), "using configuration file");

    let specs = config::load(&path)?;
    for (id, spec) in specs.iter().enumerate() {
        info!(id, description = %spec.description, mode = %spec.mode, "loaded workload");
    }

    let settings = supervisor_config(args);
    let registry = Arc::new(Registry::new(specs));
    let supervisor = Arc::new(ProcessSupervisor::new(Arc::clone(&registry), &settings));
    let reaper = spawn_reaper(Arc::clone(&supervisor), settings.reap_interval);

    let ip = args
        .get_one::<IpAddr>(BIND)
        .copied()
        .ok_or("bind address is required")?;
    let port = args.get_one::<u16>(PORT).copied().ok_or("port is required")?;
    let addr = SocketAddr::new(ip, port);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to listen on {}, port in use or insufficient permissions: {}", addr, e))?;

    info!(%addr, workloads = registry.len(), "sermn listening");
    info!("endpoints: GET /process/list, POST /process/control, GET /health");

    let served = api::serve(listener, Arc::clone(&supervisor), shutdown_signal()).await;

    info!("stopping running workloads");
    supervisor.shutdown().await;
    reaper.abort();
    supervisor.reap();

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received Ctrl-C"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }
}

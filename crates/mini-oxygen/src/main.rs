// MiniOxygen - local edge worker emulation
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! MiniOxygen - local edge worker emulation
//!
//! Serves a worker running in a local worker host the way the production
//! edge does, with static assets, live reload and a DevTools debug bridge.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{ArgAction, Parser};
use eyre::{Result, WrapErr};
use minioxygen_common::init_logging;
use minioxygen_inspector::{InspectorBridge, InspectorProxy, TracingSink};
use minioxygen_runtime::{Dispatcher, HttpWorker, RuntimeConfig};
use minioxygen_server::{MiniOxygenServer, ServerOptions};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

mod config;
mod watch;

use config::{parse_key_value, ConfigFile, Settings};

/// Picked up from the working directory when `--config` is not given
const DEFAULT_CONFIG_FILE: &str = "mini-oxygen.toml";

/// Command-line interface for MiniOxygen
#[derive(Debug, Parser)]
#[command(name = "mini-oxygen")]
#[command(about = "MiniOxygen - local edge worker emulation with a DevTools debug bridge")]
#[command(version)]
pub struct Cli {
    /// Port for the front server
    #[arg(long, short = 'p', env = "MINIOXYGEN_PORT")]
    pub port: Option<u16>,

    /// Address the front server binds to (default: 127.0.0.1)
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Directory of static assets served before the worker
    #[arg(long)]
    pub assets_dir: Option<PathBuf>,

    /// Inject the live reload script into HTML responses
    #[arg(long)]
    pub auto_reload: bool,

    /// Origin of the running worker host, e.g. http://127.0.0.1:8787
    #[arg(long, env = "MINIOXYGEN_WORKER_URL")]
    pub worker_url: Option<String>,

    /// Port of the worker host's own inspector, used to discover the worker
    #[arg(long, env = "MINIOXYGEN_RUNTIME_INSPECTOR_PORT")]
    pub runtime_inspector_port: Option<u16>,

    /// Websocket URL of the worker's inspector, skips discovery
    #[arg(long)]
    pub runtime_inspector_url: Option<String>,

    /// Worker name to discover (default: mini-oxygen)
    #[arg(long)]
    pub worker_name: Option<String>,

    /// Expose the debugger endpoint for DevTools and editors
    #[arg(long)]
    pub debug: bool,

    /// Port of the public debugger endpoint (default: 9229)
    #[arg(long, env = "MINIOXYGEN_INSPECTOR_PORT")]
    pub inspector_port: Option<u16>,

    /// Source map of the worker bundle
    #[arg(long)]
    pub source_map: Option<PathBuf>,

    /// Reload whenever this file changes
    #[arg(long)]
    pub watch: Option<PathBuf>,

    /// Worker binding, repeatable
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// TOML config file (default: ./mini-oxygen.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Also write logs to a daily rotated file in the temp directory
    #[arg(long)]
    pub log_file: bool,

    /// More output, repeat for more (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// `RUST_LOG` value for a given `-v` count
fn verbosity_filter(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some(
            "info,mini_oxygen=debug,minioxygen_runtime=debug,minioxygen_server=debug,minioxygen_inspector=debug",
        ),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

fn load_config(path: Option<&Path>) -> Result<ConfigFile> {
    match path {
        Some(path) => ConfigFile::load(path),
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => ConfigFile::load(Path::new(DEFAULT_CONFIG_FILE)),
        None => Ok(ConfigFile::default()),
    }
}

fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Still single threaded here, so touching the environment is fine
    if std::env::var_os("RUST_LOG").is_none() {
        if let Some(filter) = verbosity_filter(cli.verbose) {
            std::env::set_var("RUST_LOG", filter);
        }
    }
    init_logging("mini-oxygen", cli.log_file)?;

    let settings = Settings::resolve(&cli, load_config(cli.config.as_deref())?)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("Failed to start the async runtime")?
        .block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    let worker = HttpWorker::new(&settings.worker_url)?;
    let mut runtime = RuntimeConfig::new(worker).with_bindings(settings.bindings.clone());
    if let Some(endpoint) = settings.runtime_inspector.clone() {
        runtime = runtime.with_inspector(endpoint);
    }
    if let Some(source_map) = &settings.source_map {
        runtime = runtime.with_source_map(source_map);
    }
    let dispatcher = Dispatcher::new(runtime);

    let mut tasks = vec![spawn_request_logger(&dispatcher)];

    let proxy = if settings.debug {
        let proxy = InspectorProxy::builder()
            .port(settings.inspector_port)
            .start(None)
            .await
            .wrap_err("Failed to start the debugger endpoint")?;
        tracing::info!(
            "Debugger listening on ws://localhost:{}/ws, open http://localhost:{} for DevTools",
            proxy.port(),
            proxy.port()
        );
        Some(proxy)
    } else {
        None
    };

    tasks.push(spawn_bridge(&dispatcher, proxy.as_ref()));

    let mut options = ServerOptions::default().with_auto_reload(settings.auto_reload);
    if let Some(dir) = &settings.assets_dir {
        options = options.with_assets_dir(dir);
    }
    for (name, value) in &settings.default_headers {
        options = options.with_default_header(name, value);
    }

    let server = MiniOxygenServer::new(dispatcher.clone(), options);
    let addr = server
        .bind(SocketAddr::new(settings.host, settings.port))
        .await
        .wrap_err_with(|| format!("Failed to bind {}:{}", settings.host, settings.port))?;
    tracing::info!("MiniOxygen serving {} on http://{}", settings.worker_url, addr);

    if let Some(path) = settings.watch.clone() {
        tasks.push(watch::spawn_watcher(dispatcher.clone(), path, watch::WatchOptions::default()));
    }

    tracing::info!("Press Ctrl+C to exit.");
    tokio::signal::ctrl_c().await.wrap_err("Failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down...");

    server.shutdown();
    if let Some(proxy) = &proxy {
        proxy.shutdown();
    }
    for task in tasks {
        task.abort();
    }

    Ok(())
}

/// Worker errors are reported whether or not a runtime inspector is
/// configured. Console output and the debugger need one.
fn spawn_bridge(dispatcher: &Dispatcher, proxy: Option<&InspectorProxy>) -> JoinHandle<()> {
    let mut bridge = InspectorBridge::new(Arc::new(TracingSink::new()));
    if let Some(proxy) = proxy {
        bridge = bridge.with_proxy(proxy.clone());
    }
    Arc::new(bridge).spawn(dispatcher.clone())
}

/// Log one line per dispatched request
fn spawn_request_logger(dispatcher: &Dispatcher) -> JoinHandle<()> {
    let mut requests = dispatcher.subscribe_requests();
    tokio::spawn(async move {
        loop {
            match requests.recv().await {
                Ok(event) => tracing::info!(target: "mini_oxygen::requests", "{}", event.request_line()),
                Err(RecvError::Lagged(skipped)) => tracing::debug!("Request logger skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

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

//! Startup settings: the optional TOML file merged under the CLI flags

use std::{
    collections::BTreeMap,
    fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};

use eyre::{eyre, Result, WrapErr};
use minioxygen_common::OXYGEN_DEFAULT_HEADERS;
use minioxygen_runtime::{Bindings, InspectorEndpoint};
use serde::Deserialize;

use crate::Cli;

/// Front server port
pub const DEFAULT_PORT: u16 = 3000;
/// Public debugger port
pub const DEFAULT_INSPECTOR_PORT: u16 = 9229;
/// Worker looked up in the runtime's target list
pub const DEFAULT_WORKER_NAME: &str = "mini-oxygen";

/// Layout of `mini-oxygen.toml`
///
/// ```toml
/// worker-url = "http://127.0.0.1:8787"
/// assets-dir = "dist/client"
///
/// [inspector]
/// debug = true
/// runtime-port = 9222
///
/// [env]
/// PUBLIC_STORE_DOMAIN = "shop.example.com"
///
/// [headers]
/// oxygen-buyer-country = "FR"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConfigFile {
    /// `--host`
    pub host: Option<IpAddr>,
    /// `--port`
    pub port: Option<u16>,
    /// `--assets-dir`
    pub assets_dir: Option<PathBuf>,
    /// `--auto-reload`
    pub auto_reload: Option<bool>,
    /// `--worker-url`
    pub worker_url: Option<String>,
    /// `--source-map`
    pub source_map: Option<PathBuf>,
    /// `--watch`
    pub watch: Option<PathBuf>,
    /// `[inspector]`
    pub inspector: InspectorSection,
    /// `[env]`, worker bindings
    pub env: BTreeMap<String, String>,
    /// `[headers]`, default request headers
    pub headers: BTreeMap<String, String>,
}

/// `[inspector]` table of the config file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct InspectorSection {
    /// `--debug`
    pub debug: Option<bool>,
    /// `--inspector-port`
    pub port: Option<u16>,
    /// `--runtime-inspector-port`
    pub runtime_port: Option<u16>,
    /// `--runtime-inspector-url`
    pub runtime_url: Option<String>,
    /// `--worker-name`
    pub worker_name: Option<String>,
}

impl ConfigFile {
    /// Read and parse `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).wrap_err_with(|| format!("Invalid config file {}", path.display()))
    }
}

/// Fully resolved settings the binary runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Front server address
    pub host: IpAddr,
    /// Front server port
    pub port: u16,
    /// Static assets served before the worker
    pub assets_dir: Option<PathBuf>,
    /// Live reload on
    pub auto_reload: bool,
    /// Origin of the worker host
    pub worker_url: String,
    /// The worker host's own inspector
    pub runtime_inspector: Option<InspectorEndpoint>,
    /// Expose the public debugger endpoint
    pub debug: bool,
    /// Port of the public debugger endpoint
    pub inspector_port: u16,
    /// Source map of the worker bundle
    pub source_map: Option<PathBuf>,
    /// File whose changes trigger a reload
    pub watch: Option<PathBuf>,
    /// Worker bindings, CLI entries over file entries
    pub bindings: Bindings,
    /// Default request headers, file entries over the built-in ones
    pub default_headers: Vec<(String, String)>,
}

impl Settings {
    /// Merge `file` under `cli`. Flags win; `--env` entries override
    /// same-named `[env]` entries.
    pub fn resolve(cli: &Cli, file: ConfigFile) -> Result<Self> {
        let worker_url = cli
            .worker_url
            .clone()
            .or(file.worker_url)
            .ok_or_else(|| eyre!("No worker host configured, pass --worker-url or set worker-url in the config file"))?;

        let inspector = file.inspector;
        let runtime_url = cli.runtime_inspector_url.clone().or(inspector.runtime_url);
        let runtime_port = cli.runtime_inspector_port.or(inspector.runtime_port);
        let worker_name =
            cli.worker_name.clone().or(inspector.worker_name).unwrap_or_else(|| DEFAULT_WORKER_NAME.to_string());
        let runtime_inspector = match (runtime_url, runtime_port) {
            (Some(url), _) => Some(InspectorEndpoint::Url(url)),
            (None, Some(port)) => Some(InspectorEndpoint::Discover { port, worker_name }),
            (None, None) => None,
        };

        let debug = cli.debug || inspector.debug.unwrap_or(false);
        if debug && runtime_inspector.is_none() {
            return Err(eyre!("--debug needs the runtime inspector, pass --runtime-inspector-port or --runtime-inspector-url"));
        }

        let mut bindings = file.env;
        bindings.extend(cli.env.iter().cloned());

        let mut default_headers: Vec<(String, String)> =
            OXYGEN_DEFAULT_HEADERS.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect();
        for (name, value) in file.headers {
            match default_headers.iter_mut().find(|(existing, _)| existing.eq_ignore_ascii_case(&name)) {
                Some(entry) => entry.1 = value,
                None => default_headers.push((name, value)),
            }
        }

        Ok(Self {
            host: cli.host.or(file.host).unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            assets_dir: cli.assets_dir.clone().or(file.assets_dir),
            auto_reload: cli.auto_reload || file.auto_reload.unwrap_or(false),
            worker_url,
            runtime_inspector,
            debug,
            inspector_port: cli.inspector_port.or(inspector.port).unwrap_or(DEFAULT_INSPECTOR_PORT),
            source_map: cli.source_map.clone().or(file.source_map),
            watch: cli.watch.clone().or(file.watch),
            bindings,
            default_headers,
        })
    }
}

/// Parse a `KEY=VALUE` pair for `--env`
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

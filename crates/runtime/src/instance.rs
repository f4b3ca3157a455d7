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

//! Runtime configuration and the immutable instances built from it

use std::{fmt, path::PathBuf, sync::Arc};

use crate::{Bindings, Worker};

/// Where the runtime's own V8 inspector can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectorEndpoint {
    /// A known websocket URL (e.g. `ws://127.0.0.1:9222/core:user:hydrogen`)
    Url(String),
    /// Look the URL up from the runtime's `/json` target list.
    Discover {
        /// Port of the runtime's inspector HTTP endpoint
        port: u16,
        /// Worker name, matched against the `core:user:<name>` target id
        worker_name: String,
    },
}

/// Everything a reload may change.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// The code that handles requests
    pub worker: Arc<dyn Worker>,
    /// Environment variables and secrets
    pub bindings: Bindings,
    /// Runtime inspector, when debugging is enabled
    pub inspector: Option<InspectorEndpoint>,
    /// Source map for the worker bundle
    pub source_map_path: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Config with no bindings, inspector or source map
    pub fn new(worker: impl Worker) -> Self {
        Self { worker: Arc::new(worker), bindings: Bindings::new(), inspector: None, source_map_path: None }
    }

    /// Replace the bindings
    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Attach the runtime inspector
    pub fn with_inspector(mut self, inspector: InspectorEndpoint) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Source map of the worker bundle
    pub fn with_source_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_map_path = Some(path.into());
        self
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("inspector", &self.inspector)
            .field("source_map_path", &self.source_map_path)
            .finish_non_exhaustive()
    }
}

/// One loaded generation of the runtime. Never mutated after creation;
/// a reload builds a new instance instead.
#[derive(Debug)]
pub struct RuntimeInstance {
    generation: u64,
    config: RuntimeConfig,
}

impl RuntimeInstance {
    pub(crate) fn new(generation: u64, config: RuntimeConfig) -> Self {
        Self { generation, config }
    }

    /// Starts at 0 and increases by one per reload
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Worker handling this generation's requests
    pub fn worker(&self) -> &dyn Worker {
        self.config.worker.as_ref()
    }

    /// Bindings passed to every fetch
    pub fn bindings(&self) -> &Bindings {
        &self.config.bindings
    }

    /// Runtime inspector endpoint, if debugging is configured
    pub fn inspector(&self) -> Option<&InspectorEndpoint> {
        self.config.inspector.as_ref()
    }

    /// Source map of this generation's bundle
    pub fn source_map_path(&self) -> Option<&PathBuf> {
        self.config.source_map_path.as_ref()
    }

    /// Config this instance was built from
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

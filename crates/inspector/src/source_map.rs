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

//! Source map loading and lookups
//!
//! A [`SourceMapResolver`] belongs to exactly one runtime generation. It
//! parses the map the first time an exception needs it, keeps the parsed
//! consumer for every later lookup, and is invalidated when the runtime is
//! reloaded so a rebuilt bundle is never mapped through a stale map.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use sourcemap::SourceMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::SourceMapError;

/// Original location of a generated position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    /// Source path, resolved against the map's directory
    pub source: String,
    /// 1-based line
    pub line: u32,
    /// 0-based column
    pub column: u32,
    /// Original identifier at this position, if recorded
    pub name: Option<String>,
    source_id: u32,
}

/// A parsed source map.
#[derive(Debug)]
pub struct SourceMapConsumer {
    map: SourceMap,
    source_root: Option<PathBuf>,
}

impl SourceMapConsumer {
    /// Parse a map; relative sources are resolved against `source_root`.
    pub fn from_slice(bytes: &[u8], source_root: Option<PathBuf>) -> Result<Self, sourcemap::Error> {
        Ok(Self { map: SourceMap::from_slice(bytes)?, source_root })
    }

    /// Look up a generated position. `line` is 1-based, `column` 0-based.
    ///
    /// Only mappings on the same generated line count, the nearest one at
    /// or before `column` wins.
    pub fn original_position_for(&self, line: u32, column: u32) -> Option<OriginalPosition> {
        let line = line.checked_sub(1)?;
        let token = self.map.lookup_token(line, column)?;
        if token.get_dst_line() != line {
            return None;
        }

        let source = token.get_source()?;
        Some(OriginalPosition {
            source: self.resolve_source(source),
            line: token.get_src_line() + 1,
            column: token.get_src_col(),
            name: token.get_name().map(str::to_string),
            source_id: token.get_src_id(),
        })
    }

    /// Embedded source text for the file a position was mapped to
    pub fn source_content_for(&self, position: &OriginalPosition) -> Option<&str> {
        self.map.get_source_contents(position.source_id)
    }

    fn resolve_source(&self, source: &str) -> String {
        match &self.source_root {
            Some(root) if !source.contains("://") && !Path::new(source).is_absolute() => {
                normalize(&root.join(source)).to_string_lossy().into_owned()
            }
            _ => source.to_string(),
        }
    }
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug)]
enum CacheState {
    Unloaded,
    Loaded(Option<Arc<SourceMapConsumer>>),
    Invalidated,
}

/// Lazily loads and caches the consumer for one build.
#[derive(Debug)]
pub struct SourceMapResolver {
    path: Option<PathBuf>,
    state: Mutex<CacheState>,
}

impl SourceMapResolver {
    /// Resolver for `path`; `None` resolves nothing
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, state: Mutex::new(CacheState::Unloaded) }
    }

    /// Path of the map this resolver reads
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The parsed map, loading it on first use.
    ///
    /// Returns `None` when there is no map, it cannot be read or parsed, or
    /// the resolver was invalidated.
    pub async fn consumer(&self) -> Option<Arc<SourceMapConsumer>> {
        let mut state = self.state.lock().await;
        match &*state {
            CacheState::Loaded(consumer) => return consumer.clone(),
            CacheState::Invalidated => return None,
            CacheState::Unloaded => {}
        }

        let consumer = match self.load().await {
            Ok(consumer) => consumer.map(Arc::new),
            Err(e) => {
                debug!("Source mapping disabled: {e}");
                None
            }
        };
        *state = CacheState::Loaded(consumer.clone());
        consumer
    }

    /// Drop the parsed map; later lookups return `None`.
    pub async fn invalidate(&self) {
        *self.state.lock().await = CacheState::Invalidated;
    }

    /// Raw map text, as served to the DevTools frontend
    pub async fn raw(&self) -> Result<Option<String>, SourceMapError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        tokio::fs::read_to_string(path)
            .await
            .map(Some)
            .map_err(|source| SourceMapError::Io { path: path.clone(), source })
    }

    async fn load(&self) -> Result<Option<SourceMapConsumer>, SourceMapError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| SourceMapError::Io { path: path.clone(), source })?;
        let root = path.parent().map(Path::to_path_buf);

        SourceMapConsumer::from_slice(&bytes, root)
            .map(Some)
            .map_err(|source| SourceMapError::Parse { path: path.clone(), source })
    }
}

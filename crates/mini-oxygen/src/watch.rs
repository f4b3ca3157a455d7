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

//! Reload the worker runtime when the build output changes
//!
//! Polls the modification time of a single file (usually the bundled
//! worker script). A burst of writes produces one reload once the file has
//! been quiet for the debounce period.

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime},
};

use minioxygen_runtime::Dispatcher;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Polling cadence of the watcher
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// How often the modification time is read
    pub poll_interval: Duration,
    /// Quiet time required after the last change
    pub debounce: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(250), debounce: Duration::from_millis(300) }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.and_then(|meta| meta.modified()).ok()
}

/// Reload `dispatcher` after every settled change to `path`. Runs forever.
pub async fn watch(dispatcher: Dispatcher, path: PathBuf, options: WatchOptions) {
    let mut seen = modified(&path).await;
    let mut pending: Option<Instant> = None;

    let mut ticker = interval(options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Watching {} for changes", path.display());

    loop {
        ticker.tick().await;

        let current = modified(&path).await;
        if current != seen {
            seen = current;
            pending = Some(Instant::now());
            continue;
        }

        let Some(since) = pending else { continue };
        if since.elapsed() < options.debounce {
            continue;
        }
        pending = None;

        // Deleted mid-build; the next write brings it back
        if seen.is_none() {
            debug!("{} is gone, skipping reload", path.display());
            continue;
        }

        info!("{} changed, reloading", path.display());
        if let Err(e) = dispatcher.reload(|config| async move { Ok::<_, eyre::Report>(config) }).await {
            error!("Reload failed: {:?}", e);
        }
    }
}

/// [`watch`] on its own task
pub fn spawn_watcher(dispatcher: Dispatcher, path: PathBuf, options: WatchOptions) -> JoinHandle<()> {
    tokio::spawn(watch(dispatcher, path, options))
}

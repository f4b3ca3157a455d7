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

//! Logging configuration for MiniOxygen components
//!
//! Every binary and test in the workspace goes through this module so that
//! worker console output, dispatcher request lines and inspector relay
//! diagnostics all end up in the same subscriber:
//! - Colorful console output with timestamps and source locations
//! - Optional daily-rotated log files in the system temp directory
//! - `RUST_LOG` support, defaulting to `info`

use eyre::Result;
use std::{env, fs, path::PathBuf, sync::Once};
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Crates whose HTTP chatter is capped at `warn` on the console.
const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "tower_http", "tungstenite"];

/// Initialize logging for a MiniOxygen component
///
/// Installs a global `tracing` subscriber made of:
/// - a pretty, colored console layer
/// - when `enable_file_logging` is set, a plain-text file layer rotated daily
///   under `<tmp>/minioxygen-logs/<component_name>/`
///
/// # Arguments
/// * `component_name` - Name of the component (e.g., "mini-oxygen")
/// * `enable_file_logging` - Whether to mirror the logs into a file
///
/// # Examples
/// ```rust
/// use minioxygen_common::logging;
///
/// #[tokio::main]
/// async fn main() -> eyre::Result<()> {
///     logging::init_logging("mini-oxygen", false)?;
///
///     tracing::info!("MiniOxygen started");
///     Ok(())
/// }
/// ```
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true)
        .pretty()
        .with_filter(filter_for_console());

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;
        let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
        let (writer, guard) = non_blocking(file_appender);

        // The writer must outlive every span; the process owns it until exit.
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter_for_file());

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(component = component_name, "Logging initialized with console output only");
    }

    tracing::debug!(
        component = component_name,
        rust_log = %env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        args = ?env::args().collect::<Vec<_>>(),
        "Environment information"
    );

    Ok(())
}

/// Create the log directory in the system temp folder
fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = env::temp_dir().join("minioxygen-logs").join(component_name);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Console output hides transport noise unless it is a warning
fn filter_for_console() -> EnvFilter {
    NOISY_TARGETS.iter().fold(default_env_filter(), |filter, target| {
        match format!("{target}=warn").parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    })
}

/// File output keeps everything `RUST_LOG` asks for
fn filter_for_file() -> EnvFilter {
    default_env_filter()
}

/// Initialize compact console-only logging
///
/// Used by tests and small utilities that do not need file output.
///
/// # Arguments
/// * `level` - Level used when `RUST_LOG` is not set
pub fn init_simple_logging(level: Level) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {}", e))?;

    Ok(())
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Idempotent logging setup for tests
///
/// Safe to call from every test in every test binary: the subscriber is only
/// installed once per process and a failure (another subscriber already set)
/// is ignored.
///
/// # Usage
/// ```rust
/// use minioxygen_common::logging;
///
/// #[test]
/// fn my_test() {
///     logging::ensure_test_logging(None);
///     tracing::info!("logging is ready");
/// }
/// ```
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        let _ = init_simple_logging(default_level.unwrap_or(Level::INFO));
    });
}

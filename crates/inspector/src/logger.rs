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

//! Console and exception logger
//!
//! Consumes `Runtime.consoleAPICalled` and `Runtime.exceptionThrown` events
//! from the runtime inspector and prints them in the terminal, doing a small
//! part of what the DevTools console would do: previews are rendered,
//! errors are rebuilt from their properties and stacks are source-mapped.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use minioxygen_common::strip_console_sentinels;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Level};

use crate::{
    format_stack, format_structured_error,
    protocol::{
        CallFunctionOnResponse, ConsoleApiCalledEvent, ExceptionDetails, GetPropertiesResponse,
        InspectorEvent, RemoteObject,
    },
    remote_object::RemoteValue,
    InspectorConnection, SourceMapConsumer, SourceMapResolver,
};

/// Invokes an accessor on the object it is called on
const INVOKE_GETTER: &str = "function invokeGetter(getter) { return Reflect.apply(getter, this, []); }";

/// Host console methods the protocol's console types map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMethod {
    /// `console.log`
    Log,
    /// `console.debug`
    Debug,
    /// `console.info`
    Info,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
    /// `console.dir`
    Dir,
    /// `console.dirxml`
    Dirxml,
    /// `console.table`
    Table,
    /// `console.trace`
    Trace,
    /// `console.clear`
    Clear,
    /// `console.count`
    Count,
    /// `console.assert`
    Assert,
    /// `console.profile`
    Profile,
    /// `console.profileEnd`
    ProfileEnd,
    /// `console.timeEnd`
    TimeEnd,
    /// `console.group`
    Group,
    /// `console.groupCollapsed`
    GroupCollapsed,
    /// `console.groupEnd`
    GroupEnd,
}

impl ConsoleMethod {
    /// Map a `Runtime.consoleAPICalled` type
    pub fn from_protocol(kind: &str) -> Option<Self> {
        Some(match kind {
            "log" => Self::Log,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warning" => Self::Warn,
            "error" => Self::Error,
            "dir" => Self::Dir,
            "dirxml" => Self::Dirxml,
            "table" => Self::Table,
            "trace" => Self::Trace,
            "clear" => Self::Clear,
            "count" => Self::Count,
            "assert" => Self::Assert,
            "profile" => Self::Profile,
            "profileEnd" => Self::ProfileEnd,
            "timeEnd" => Self::TimeEnd,
            "startGroup" => Self::Group,
            "startGroupCollapsed" => Self::GroupCollapsed,
            "endGroup" => Self::GroupEnd,
            _ => return None,
        })
    }

    /// Method name as written in worker code
    pub fn name(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Dir => "dir",
            Self::Dirxml => "dirxml",
            Self::Table => "table",
            Self::Trace => "trace",
            Self::Clear => "clear",
            Self::Count => "count",
            Self::Assert => "assert",
            Self::Profile => "profile",
            Self::ProfileEnd => "profileEnd",
            Self::TimeEnd => "timeEnd",
            Self::Group => "group",
            Self::GroupCollapsed => "groupCollapsed",
            Self::GroupEnd => "groupEnd",
        }
    }

    /// Log level used by [`TracingSink`]
    ///
    /// `console.debug` stays at INFO so it shows under the default filter.
    pub fn level(&self) -> Level {
        match self {
            Self::Error | Self::Assert => Level::ERROR,
            Self::Warn => Level::WARN,
            _ => Level::INFO,
        }
    }
}

/// An error rebuilt from the runtime's remote objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructedError {
    /// `Name: message`
    pub message: String,
    /// Stack with frames mapped back to the sources, when there is one
    pub stack: Option<String>,
    /// Rendered `cause` chain
    pub cause: Option<String>,
}

impl fmt::Display for ReconstructedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stack.as_deref().filter(|s| !s.is_empty()) {
            Some(stack) => f.write_str(stack)?,
            None => f.write_str(&self.message)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, "\n  [cause]: {cause}")?;
        }
        Ok(())
    }
}

/// One printable console argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleArg {
    /// Already formatted value
    Text(String),
    /// An error object, printed with its stack
    Error(ReconstructedError),
}

impl fmt::Display for ConsoleArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Error(error) => error.fmt(f),
        }
    }
}

/// Where reconstructed worker output goes.
pub trait ConsoleSink: Send + Sync + 'static {
    /// A console call from worker code
    fn console(&self, method: ConsoleMethod, args: &[ConsoleArg]);

    /// An uncaught exception or a worker error
    fn exception(&self, error: &ReconstructedError);
}

/// Default sink: one `tracing` event per console call, target `worker`.
#[derive(Debug, Default)]
pub struct TracingSink {
    group_depth: AtomicUsize,
}

impl TracingSink {
    /// Sink with no open console group
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, level: Level, text: &str) {
        let indent = "  ".repeat(self.group_depth.load(Ordering::Relaxed));
        let text = if indent.is_empty() { text.to_string() } else { text.replace('\n', &format!("\n{indent}")) };

        match level {
            Level::ERROR => tracing::error!(target: "worker", "{indent}{text}"),
            Level::WARN => tracing::warn!(target: "worker", "{indent}{text}"),
            _ => tracing::info!(target: "worker", "{indent}{text}"),
        }
    }
}

impl ConsoleSink for TracingSink {
    fn console(&self, method: ConsoleMethod, args: &[ConsoleArg]) {
        let text = join_args(args);
        match method {
            ConsoleMethod::Clear => {}
            ConsoleMethod::Group | ConsoleMethod::GroupCollapsed => {
                if !text.is_empty() {
                    self.emit(method.level(), &text);
                }
                self.group_depth.fetch_add(1, Ordering::Relaxed);
            }
            ConsoleMethod::GroupEnd => {
                let _ = self.group_depth.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
            }
            _ => self.emit(method.level(), &text),
        }
    }

    fn exception(&self, error: &ReconstructedError) {
        self.emit(Level::ERROR, &error.to_string());
    }
}

/// Space-separated, the way a JS console joins its arguments
pub fn join_args(args: &[ConsoleArg]) -> String {
    args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

/// Spawn the logger for one runtime connection.
///
/// Subscribes before returning so no event sent after
/// [`InspectorConnection::enable`] is missed. The task ends when the
/// connection closes.
pub fn spawn_console_logger(
    connection: Arc<InspectorConnection>,
    resolver: Arc<SourceMapResolver>,
    sink: Arc<dyn ConsoleSink>,
) -> JoinHandle<()> {
    let mut frames = connection.subscribe();
    let logger = ConsoleLogger { connection, resolver, sink };

    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            logger.handle_frame(&frame).await;
        }
        debug!("Console logger stopped");
    })
}

/// Renders inspector events through a [`ConsoleSink`].
pub struct ConsoleLogger {
    connection: Arc<InspectorConnection>,
    resolver: Arc<SourceMapResolver>,
    sink: Arc<dyn ConsoleSink>,
}

impl ConsoleLogger {
    /// Logger for one runtime connection
    pub fn new(
        connection: Arc<InspectorConnection>,
        resolver: Arc<SourceMapResolver>,
        sink: Arc<dyn ConsoleSink>,
    ) -> Self {
        Self { connection, resolver, sink }
    }

    /// Render one raw inspector frame. Frames other than console and
    /// exception events are ignored.
    pub async fn handle_frame(&self, frame: &str) {
        match InspectorEvent::parse(frame) {
            Ok(InspectorEvent::ConsoleApiCalled(event)) => self.log_console_message(&event).await,
            Ok(InspectorEvent::ExceptionThrown(event)) => {
                let error = self.error_from_exception(&event.exception_details).await;
                self.sink.exception(&error);
            }
            Ok(InspectorEvent::Other) => {}
            Err(e) => warn!("Dropping malformed inspector frame: {}", e),
        }
    }

    async fn log_console_message(&self, event: &ConsoleApiCalledEvent) {
        let Some(method) = ConsoleMethod::from_protocol(&event.kind) else {
            warn!("Unsupported console method: {}", event.kind);
            return;
        };

        let mut args = Vec::with_capacity(event.args.len());
        for ro in &event.args {
            match RemoteValue::classify(ro) {
                RemoteValue::Error(ro) => args.push(ConsoleArg::Error(self.error_from_log(&ro).await)),
                RemoteValue::Primitive(text) => args.push(ConsoleArg::Text(strip_console_sentinels(&text))),
                value => args.extend(value.render().into_iter().map(ConsoleArg::Text)),
            }
        }

        self.sink.console(method, &args);
    }

    /// Build an error from an uncaught exception.
    pub async fn error_from_exception(&self, details: &ExceptionDetails) -> ReconstructedError {
        let description = details.exception.as_ref().and_then(|e| e.description.as_deref());
        let consumer = self.resolver.consumer().await;

        let initial = match &consumer {
            Some(consumer) => {
                let message = description.and_then(|d| d.split('\n').next());
                let frames = details.stack_trace.as_ref().map(|s| s.call_frames.as_slice()).unwrap_or_default();
                ReconstructedError {
                    message: details.text.clone(),
                    stack: Some(format_structured_error(consumer, message, frames)),
                    cause: None,
                }
            }
            None => ReconstructedError {
                message: format!("{} {}", details.text, description.unwrap_or_default()),
                ..Default::default()
            },
        };

        self.reconstruct_error(initial, details.exception.as_ref(), consumer.as_deref()).await
    }

    /// Build an error from a logged `Error` object.
    pub async fn error_from_log(&self, ro: &RemoteObject) -> ReconstructedError {
        let preview = ro.preview.as_ref();
        let preview_description = preview.and_then(|p| p.description.as_deref());

        let message = preview_description
            .map(|d| d.lines().filter(|l| !is_call_site(l)).collect::<Vec<_>>().join("\n"))
            .or_else(|| preview.and_then(|p| p.property("message")).map(str::to_string))
            .unwrap_or_default();
        let stack = preview_description
            .or(ro.description.as_deref())
            .or_else(|| preview.and_then(|p| p.property("stack")))
            .map(str::to_string);
        let cause = preview.and_then(|p| p.property("cause")).map(str::to_string);

        let consumer = self.resolver.consumer().await;
        self.reconstruct_error(ReconstructedError { message, stack, cause }, Some(ro), consumer.as_deref())
            .await
    }

    /// Refine preview-derived properties with untruncated ones fetched from
    /// the runtime. Failed round trips keep what we already have.
    async fn reconstruct_error(
        &self,
        mut error: ReconstructedError,
        ro: Option<&RemoteObject>,
        consumer: Option<&SourceMapConsumer>,
    ) -> ReconstructedError {
        let Some(ro) = ro else { return error };
        let Some(object_id) = ro.object_id.as_deref() else { return error };

        let params = json!({
            "objectId": object_id,
            "ownProperties": false,
            "accessorPropertiesOnly": false,
            "generatePreview": false,
            "nonIndexedPropertiesOnly": false,
        });
        let properties = match self.connection.send_command("Runtime.getProperties", Some(params)).await {
            Ok(result) => serde_json::from_value::<GetPropertiesResponse>(result).unwrap_or_default(),
            Err(e) => {
                debug!("Could not fetch error properties: {}", e);
                return error;
            }
        };

        let value_of = |name: &str| properties.find(name).and_then(|p| p.value.as_ref());

        if let Some(message) = value_of("message").and_then(string_value) {
            error.message = message.to_string();
        }
        if let Some(stack) = value_of("stack").and_then(string_value) {
            error.stack = Some(map_stack(consumer, stack));
        }
        if let Some(cause) = value_of("cause") {
            let text = cause.description.clone().or_else(|| cause.value.as_ref().map(value_text));
            error.cause = match (cause.subtype.as_deref(), text) {
                (Some("error"), Some(text)) => Some(map_stack(consumer, &text)),
                (_, text) => text,
            };
        }

        // A DOMException's useful stack sits behind the `stack` getter
        if ro.class_name.as_deref() == Some("DOMException") {
            let getter = properties.find("stack").and_then(|p| p.get.as_ref()).and_then(|g| g.object_id.clone());
            if let Some(getter) = getter {
                let params = json!({
                    "objectId": object_id,
                    "functionDeclaration": INVOKE_GETTER,
                    "arguments": [{ "objectId": getter }],
                    "silent": true,
                });
                if let Ok(result) = self.connection.send_command("Runtime.callFunctionOn", Some(params)).await {
                    if let Ok(response) = serde_json::from_value::<CallFunctionOnResponse>(result) {
                        error.stack = match response.result.value {
                            Some(Value::String(stack)) => Some(map_stack(consumer, &stack)),
                            Some(other) => Some(other.to_string()),
                            None => error.stack,
                        };
                    }
                }
            }
        }

        error
    }
}

fn map_stack(consumer: Option<&SourceMapConsumer>, stack: &str) -> String {
    match consumer {
        Some(consumer) => format_stack(consumer, stack),
        None => stack.to_string(),
    }
}

fn string_value(ro: &RemoteObject) -> Option<&str> {
    ro.value.as_ref().and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_call_site(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.len() < line.len() && trimmed.starts_with("at ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_method_mapping() {
        assert_eq!(ConsoleMethod::from_protocol("warning"), Some(ConsoleMethod::Warn));
        assert_eq!(ConsoleMethod::from_protocol("startGroup"), Some(ConsoleMethod::Group));
        assert_eq!(ConsoleMethod::from_protocol("startGroupCollapsed"), Some(ConsoleMethod::GroupCollapsed));
        assert_eq!(ConsoleMethod::from_protocol("endGroup"), Some(ConsoleMethod::GroupEnd));
        assert_eq!(ConsoleMethod::from_protocol("timeEnd").map(|m| m.name()), Some("timeEnd"));
        assert_eq!(ConsoleMethod::from_protocol("time"), None);
    }

    #[test]
    fn test_levels() {
        assert_eq!(ConsoleMethod::Error.level(), Level::ERROR);
        assert_eq!(ConsoleMethod::Warn.level(), Level::WARN);
        assert_eq!(ConsoleMethod::Log.level(), Level::INFO);
        assert_eq!(ConsoleMethod::Debug.level(), Level::INFO);
    }

    #[test]
    fn test_reconstructed_error_display() {
        let error = ReconstructedError {
            message: "boom".into(),
            stack: Some("Error: boom\n    at handler (src/app.ts:3:5)".into()),
            cause: Some("Error: root".into()),
        };
        assert_eq!(error.to_string(), "Error: boom\n    at handler (src/app.ts:3:5)\n  [cause]: Error: root");

        let bare = ReconstructedError { message: "Uncaught Error: boom".into(), ..Default::default() };
        assert_eq!(bare.to_string(), "Uncaught Error: boom");
    }

    #[test]
    fn test_join_args() {
        let args = vec![ConsoleArg::Text("count".into()), ConsoleArg::Text("3".into())];
        assert_eq!(join_args(&args), "count 3");
    }

    #[test]
    fn test_is_call_site() {
        assert!(is_call_site("    at handler (index.js:1:1)"));
        assert!(!is_call_site("at the top"));
        assert!(!is_call_site("Error: boom"));
    }
}

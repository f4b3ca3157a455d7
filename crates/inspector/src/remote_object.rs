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

//! Printable reconstruction of remote objects
//!
//! Console arguments arrive as `Runtime.RemoteObject`s with a shallow
//! preview. [`RemoteValue::classify`] sorts them into the shapes the
//! terminal knows how to print; [`RemoteValue::render`] produces the
//! strings handed to the console, mimicking what a JS console prints for
//! the same value.

use serde_json::Value;

use crate::protocol::{ObjectPreview, RemoteObject};

/// A console argument, classified by `type`/`subtype`.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteValue {
    /// string, number, boolean, undefined, symbol or bigint
    Primitive(String),
    /// `null`
    Null,
    /// `[Function: <description>]`
    Function(String),
    /// Object without a preview, printed by description
    Described(String),
    /// Array with previewed items
    Array {
        /// `Array(n)`
        description: Option<String>,
        /// Rendered items, in index order
        items: Vec<String>,
        /// More items exist than previewed
        overflow: bool,
    },
    /// Map, entries missing when the preview has none
    Map {
        /// `Map(n)`
        description: Option<String>,
        /// Rendered key and value pairs
        entries: Option<Vec<(String, String)>>,
        /// More entries exist than previewed
        overflow: bool,
    },
    /// Set, values missing when the preview has none
    Set {
        /// `Set(n)`
        description: Option<String>,
        /// Rendered members
        values: Option<Vec<String>>,
        /// More members exist than previewed
        overflow: bool,
    },
    /// Promise with its internal state and result
    Promise {
        /// `Promise`
        description: Option<String>,
        /// `[[PromiseState]]`
        state: Option<String>,
        /// `[[PromiseResult]]`
        result: Option<String>,
    },
    /// Generator, printed by its first preview property
    Generator {
        /// Constructor description
        description: Option<String>,
        /// First previewed property
        first: String,
    },
    /// Error objects need extra round trips; see the logger
    Error(Box<RemoteObject>),
    /// Previews with nothing useful beyond their description
    /// (regexp, date, typed arrays, proxies, ...)
    Opaque {
        /// Printed as is
        description: Option<String>,
    },
    /// Plain object with previewed properties
    Object {
        /// Class name, `Object` for plain objects
        description: Option<String>,
        /// Rendered key and value pairs
        properties: Vec<(String, String)>,
        /// More properties exist than previewed
        overflow: bool,
    },
    /// Unrecognised `type`
    Unknown(String),
}


impl RemoteValue {
    /// Sort a remote object by its `type`, `subtype` and preview
    pub fn classify(ro: &RemoteObject) -> Self {
        match ro.kind.as_str() {
            "string" | "number" | "boolean" | "undefined" | "symbol" | "bigint" => {
                Self::Primitive(primitive_text(ro))
            }
            "function" => {
                Self::Function(ro.description.clone().unwrap_or_else(|| "<no-description>".into()))
            }
            "object" => match &ro.preview {
                None if ro.subtype.as_deref() == Some("null") => Self::Null,
                None => Self::Described(ro.description.clone().unwrap_or_else(|| "<no-description>".into())),
                Some(preview) => classify_preview(ro, preview),
            },
            _ => Self::Unknown(
                ro.description.clone().or_else(|| ro.unserializable_value.clone()).unwrap_or_else(|| "🦋".into()),
            ),
        }
    }

    /// Strings to print for this argument. Previews print their description
    /// first, followed by the formatted contents.
    pub fn render(&self) -> Vec<String> {
        match self {
            Self::Primitive(text) | Self::Described(text) | Self::Unknown(text) => vec![text.clone()],
            Self::Null => vec!["null".into()],
            Self::Function(description) => vec![format!("[Function: {description}]")],
            Self::Array { description, items, overflow } => {
                let more = if *overflow { "..." } else { "" };
                with_description(description, format!("[ {}{more} ]", items.join(", ")))
            }
            Self::Map { description, entries, overflow } => {
                let body = match entries {
                    None => "{}".to_string(),
                    Some(entries) => {
                        let lines: Vec<_> = entries.iter().map(|(k, v)| format!("  {k} => {v}")).collect();
                        let more = if *overflow { "\n  ..." } else { "" };
                        format!("{{\n{}{more}\n}}", lines.join(",\n"))
                    }
                };
                with_description(description, body)
            }
            Self::Set { description, values, overflow } => {
                let body = match values {
                    None => "{}".to_string(),
                    Some(values) => {
                        let more = if *overflow { ", ..." } else { "" };
                        format!("{{ {}{more} }}", values.join(", "))
                    }
                };
                with_description(description, body)
            }
            Self::Promise { description, state, result } => {
                let state = state.as_deref().unwrap_or("undefined");
                let body = if state == "pending" {
                    "{<pending>}".to_string()
                } else {
                    format!("{{<{state}>: {}}}", result.as_deref().unwrap_or("undefined"))
                };
                with_description(description, body)
            }
            Self::Generator { description, first } => with_description(description, first.clone()),
            Self::Opaque { description } => description.iter().cloned().collect(),
            Self::Object { description, properties, overflow } => {
                let lines: Vec<_> = properties.iter().map(|(k, v)| format!("  {k}: {v}")).collect();
                let more = if *overflow { "\n  ..." } else { "" };
                with_description(description, format!("{{\n{}{more}\n}}", lines.join(",\n")))
            }
            Self::Error(ro) => vec![ro.description.clone().unwrap_or_else(|| "Error".into())],
        }
    }
}

fn classify_preview(ro: &RemoteObject, preview: &ObjectPreview) -> RemoteValue {
    let description = preview.description.clone();
    let overflow = preview.overflow;

    match preview.subtype.as_deref() {
        Some("array") => RemoteValue::Array {
            description,
            items: preview.properties.iter().map(|p| p.value.clone().unwrap_or_default()).collect(),
            overflow,
        },
        Some("map" | "weakmap") => RemoteValue::Map {
            description,
            entries: preview.entries.as_ref().map(|entries| {
                entries
                    .iter()
                    .map(|e| {
                        let key = e.key.as_ref().and_then(|k| k.description.clone());
                        (key.unwrap_or_else(|| "<unknown>".into()), or_undefined(&e.value.description))
                    })
                    .collect()
            }),
            overflow,
        },
        Some("set" | "weakset") => RemoteValue::Set {
            description,
            values: preview
                .entries
                .as_ref()
                .map(|entries| entries.iter().map(|e| or_undefined(&e.value.description)).collect()),
            overflow,
        },
        Some("generator") => RemoteValue::Generator {
            description,
            first: preview.properties.first().and_then(|p| p.value.clone()).unwrap_or_default(),
        },
        Some("promise") => RemoteValue::Promise {
            description,
            state: preview.properties.first().and_then(|p| p.value.clone()),
            result: preview.properties.get(1).and_then(|p| p.value.clone()),
        },
        Some("error") => RemoteValue::Error(Box::new(ro.clone())),
        Some(
            "regexp" | "date" | "node" | "iterator" | "proxy" | "typedarray" | "arraybuffer" | "dataview"
            | "webassemblymemory" | "wasmvalue",
        ) => RemoteValue::Opaque { description },
        _ => RemoteValue::Object {
            description,
            properties: preview.properties.iter().map(|p| (p.name.clone(), or_undefined(&p.value))).collect(),
            overflow,
        },
    }
}

fn primitive_text(ro: &RemoteObject) -> String {
    match &ro.value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => ro
            .unserializable_value
            .clone()
            .or_else(|| ro.description.clone())
            .unwrap_or_else(|| "undefined".into()),
        Some(other) => other.to_string(),
    }
}

fn or_undefined(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "undefined".into())
}

fn with_description(description: &Option<String>, body: String) -> Vec<String> {
    description.iter().cloned().chain(std::iter::once(body)).collect()
}

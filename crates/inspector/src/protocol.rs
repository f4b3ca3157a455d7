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

//! Chrome DevTools Protocol payloads handled by MiniOxygen
//!
//! Only the fields the logger and the proxy read are modelled. Everything
//! else in a frame is ignored on input and relayed untouched as raw text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `Debugger.disable`, sent with a fixed id whenever a debugger attaches so
/// the runtime re-emits `Debugger.scriptParsed` once the client re-enables.
pub const DEBUGGER_DISABLE: &str = r#"{"id":100000000,"method":"Debugger.disable"}"#;

/// Outer shape of every inspector frame: a command response (`id`) or an
/// event (`method` + `params`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InspectorMessage {
    /// Command id, absent on events
    pub id: Option<i64>,
    /// Event name, absent on responses
    pub method: Option<String>,
    /// Event payload
    pub params: Option<Value>,
    /// Command result
    pub result: Option<Value>,
    /// Command error
    pub error: Option<Value>,
}

/// Events the console logger reacts to.
#[derive(Debug, Clone)]
pub enum InspectorEvent {
    /// `Runtime.consoleAPICalled`
    ConsoleApiCalled(ConsoleApiCalledEvent),
    /// `Runtime.exceptionThrown`
    ExceptionThrown(ExceptionThrownEvent),
    /// Anything else, including command responses
    Other,
}

impl InspectorEvent {
    /// Parse a raw frame. Responses and unhandled events map to `Other`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let message: InspectorMessage = serde_json::from_str(text)?;
        let params = message.params.unwrap_or(Value::Null);

        Ok(match message.method.as_deref() {
            Some("Runtime.consoleAPICalled") => Self::ConsoleApiCalled(serde_json::from_value(params)?),
            Some("Runtime.exceptionThrown") => Self::ExceptionThrown(serde_json::from_value(params)?),
            _ => Self::Other,
        })
    }
}

/// `Runtime.RemoteObject`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// Object type: `object`, `string`, `number`, `undefined`...
    #[serde(rename = "type")]
    pub kind: String,
    /// Refinement of `object`, e.g. `error`, `array`, `null`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Constructor name of objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Primitive value, or JSON for objects serialized by value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// `NaN`, `-0`, `Infinity` and bigint literals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unserializable_value: Option<String>,
    /// Display string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Handle for follow-up calls, only on non-primitive values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Abbreviated view of the object properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<ObjectPreview>,
}

/// `Runtime.ObjectPreview`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPreview {
    /// Protocol `type`
    #[serde(rename = "type")]
    pub kind: String,
    /// Protocol `subtype`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Display string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// More properties exist than listed
    #[serde(default)]
    pub overflow: bool,
    /// Previewed properties, in order
    #[serde(default)]
    pub properties: Vec<PropertyPreview>,
    /// Map and set entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EntryPreview>>,
}

impl ObjectPreview {
    /// Value of the named preview property, if present
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.iter().find(|p| p.name == name).and_then(|p| p.value.as_deref())
    }
}

/// `Runtime.PropertyPreview`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPreview {
    /// Property name
    pub name: String,
    /// Protocol `type`
    #[serde(rename = "type")]
    pub kind: String,
    /// Abbreviated value text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Protocol `subtype`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

/// `Runtime.EntryPreview`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPreview {
    /// Absent for sets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ObjectPreview>,
    /// Entry value
    pub value: ObjectPreview,
}

/// `Runtime.consoleAPICalled` params
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalledEvent {
    /// Console method as the protocol names it
    #[serde(rename = "type")]
    pub kind: String,
    /// Arguments passed to the console call
    #[serde(default)]
    pub args: Vec<RemoteObject>,
    /// Context the call happened in
    #[serde(default)]
    pub execution_context_id: i64,
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: f64,
}

/// `Runtime.exceptionThrown` params
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrownEvent {
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: f64,
    /// Where and what was thrown
    pub exception_details: ExceptionDetails,
}

/// `Runtime.ExceptionDetails`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    /// Short summary, usually `Uncaught`
    #[serde(default)]
    pub text: String,
    /// Stack at the throw site
    #[serde(default)]
    pub stack_trace: Option<StackTrace>,
    /// The thrown value
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

/// `Runtime.StackTrace`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    /// Innermost frame first
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
}

/// `Runtime.CallFrame`. Line and column are 0-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Empty for anonymous functions
    #[serde(default)]
    pub function_name: String,
    /// Script URL
    #[serde(default)]
    pub url: String,
    /// 0-based line
    pub line_number: u32,
    /// 0-based column
    pub column_number: u32,
}

/// `Runtime.PropertyDescriptor`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name
    pub name: String,
    /// Data property value
    #[serde(default)]
    pub value: Option<RemoteObject>,
    /// Getter function, for accessor properties
    #[serde(default)]
    pub get: Option<RemoteObject>,
}

/// `Runtime.getProperties` result
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetPropertiesResponse {
    /// Own and internal properties of the object
    #[serde(default)]
    pub result: Vec<PropertyDescriptor>,
}

impl GetPropertiesResponse {
    /// Descriptor of the named property
    pub fn find(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.result.iter().find(|p| p.name == name)
    }
}

/// `Runtime.callFunctionOn` result
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallFunctionOnResponse {
    /// Return value of the function
    pub result: RemoteObject,
}

/// Entry of the `/json` target list.
///
/// See <https://chromedevtools.github.io/devtools-protocol/#endpoints>
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorTarget {
    /// Target id
    pub id: String,
    /// Target title
    #[serde(default)]
    pub title: String,
    /// `node` for the worker target
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Display string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where a debugger connects
    pub web_socket_debugger_url: String,
    /// `devtools://` URL for Chromium based browsers
    #[serde(default)]
    pub devtools_frontend_url: String,
    /// Same frontend over plain `https://`
    #[serde(default)]
    pub devtools_frontend_url_compat: String,
    /// Icon DevTools shows in its target list
    #[serde(default)]
    pub favicon_url: String,
    /// Page URL DevTools shows for the target
    #[serde(default)]
    pub url: String,
}

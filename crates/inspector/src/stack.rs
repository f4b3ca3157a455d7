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

//! Source-mapped stack trace formatting

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{protocol::CallFrame, SourceMapConsumer};

/// One V8 call site line: `    at fn (file:line:col)`, `    at file:line:col`
/// or `    at fn (native)`.
static CALL_SITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"at (?:(.+?)\s+\()?(?:(.+?):(\d+)(?::(\d+))?|([^)]+))\)?").expect("valid call site regex")
});

/// Turn protocol call frames into a friendly, source-mapped stack string.
///
/// The first mapped frame also prints the offending original source line
/// with a caret under the mapped column. Frames without a mapping are
/// omitted.
pub fn format_structured_error(
    consumer: &SourceMapConsumer,
    message: Option<&str>,
    frames: &[CallFrame],
) -> String {
    let mut lines = Vec::new();
    if let Some(message) = message {
        lines.push(message.to_string());
    }

    for (i, frame) in frames.iter().enumerate() {
        // Protocol lines are 0-based, lookups take 1-based lines
        let Some(pos) = consumer.original_position_for(frame.line_number + 1, frame.column_number) else {
            continue;
        };

        if i == 0 {
            let source_line = consumer
                .source_content_for(&pos)
                .and_then(|content| content.split('\n').nth(pos.line as usize - 1))
                .unwrap_or_default();
            lines.push(source_line.trim().to_string());

            if pos.column > 0 {
                let indent = source_line.find(|c: char| !c.is_whitespace()).map_or(-1, |i| i as i64);
                let pad = (i64::from(pos.column) - indent).max(0) as usize;
                lines.push(format!("{}^", " ".repeat(pad)));
            }
        }

        let name = pos.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&frame.function_name);
        let location = format!("{}:{}:{}", pos.source, pos.line, pos.column + 1);
        if name.is_empty() {
            lines.push(format!("    at {location}"));
        } else {
            lines.push(format!("    at {name} ({location})"));
        }
    }

    lines.join("\n")
}

/// Source-map an `Error#stack` string.
///
/// The first line is kept as the message; every call site line is parsed
/// and mapped like a protocol frame.
pub fn format_stack(consumer: &SourceMapConsumer, stack: &str) -> String {
    let mut lines = stack.split('\n');
    let message = lines.next();
    let frames: Vec<CallFrame> = lines.filter_map(parse_call_site).collect();

    format_structured_error(consumer, message, &frames)
}

fn parse_call_site(line: &str) -> Option<CallFrame> {
    let caps = CALL_SITE.captures(line)?;

    let function_name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
    let url = caps.get(2).or_else(|| caps.get(5)).map(|m| m.as_str().to_string()).unwrap_or_default();
    // Call sites are 1-based on both axes
    let line_number = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(1);
    let column_number = caps.get(4).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(1);

    Some(CallFrame {
        function_name,
        url,
        line_number: line_number.saturating_sub(1),
        column_number: column_number.saturating_sub(1),
    })
}

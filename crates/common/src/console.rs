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

//! Console formatting sentinels
//!
//! The worker host may tag a console string with the stream it was written
//! to, so terminal output can be routed. The tag is wrapped in
//! [`CONSOLE_SENTINEL`] characters and appended to the message. Humans must
//! never see it: both the terminal logger and the browser relay strip it.

/// U+2063 INVISIBLE SEPARATOR, delimits an injected console tag.
pub const CONSOLE_SENTINEL: char = '\u{2063}';

/// Append a stream tag to a console message.
pub fn tag_console_message(message: &str, tag: &str) -> String {
    format!("{message}{CONSOLE_SENTINEL}{tag}{CONSOLE_SENTINEL}")
}

/// Split a console string into its stream tag (the first one found) and the
/// text with every sentinel-delimited tag removed.
///
/// An unpaired sentinel is dropped on its own; the text after it is kept.
pub fn extract_console_message(value: &str) -> (Option<&str>, String) {
    if !value.contains(CONSOLE_SENTINEL) {
        return (None, value.to_string());
    }

    let mut tag = None;
    let mut text = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find(CONSOLE_SENTINEL) {
        text.push_str(&rest[..start]);
        let after = &rest[start + CONSOLE_SENTINEL.len_utf8()..];
        match after.find(CONSOLE_SENTINEL) {
            Some(end) => {
                tag.get_or_insert(&after[..end]);
                rest = &after[end + CONSOLE_SENTINEL.len_utf8()..];
            }
            None => {
                rest = after;
            }
        }
    }
    text.push_str(rest);

    (tag, text)
}

/// Remove every injected tag from a console string.
pub fn strip_console_sentinels(value: &str) -> String {
    extract_console_message(value).1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_message_is_unchanged() {
        assert_eq!(extract_console_message("hello"), (None, "hello".to_string()));
    }

    #[test]
    fn test_tag_is_extracted_and_stripped() {
        let tagged = tag_console_message("Listening on :3000", "stdout");
        let (tag, text) = extract_console_message(&tagged);

        assert_eq!(tag, Some("stdout"));
        assert_eq!(text, "Listening on :3000");
    }

    #[test]
    fn test_multiple_tags_keep_first() {
        let value = format!("{}{}", tag_console_message("a", "stderr"), tag_console_message("b", "x"));
        let (tag, text) = extract_console_message(&value);

        assert_eq!(tag, Some("stderr"));
        assert_eq!(text, "ab");
    }

    #[test]
    fn test_unpaired_sentinel_is_dropped() {
        let value = format!("broken{CONSOLE_SENTINEL}tail");
        assert_eq!(strip_console_sentinels(&value), "brokentail");
    }
}

//! Turns raw provider stream chunks into user-facing text fragments.
//!
//! Plain token chunks pass through unchanged. Chunks in the structured
//! tool-call delta format (`[{"id","type","function":{"name","arguments"}}]`)
//! become a spoiler-wrapped "running tool" announcement that the
//! orchestrator closes once every call of the round-trip has run.

use std::fmt;

use serde::Deserialize;
use tracing::debug;

pub const TOOL_OPEN_PREFIX: &str = "||*** Running tool: [";
pub const TOOL_OPEN_SUFFIX: &str = "] with arguments: *** `";
pub const TOOL_CLOSE: &str = "`||\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFragment {
    Text(String),
    /// First delta of a tool call: its name plus any arguments already sent.
    ToolOpen { name: String, arguments: String },
    /// Continuation of the current call's argument text.
    ToolArguments(String),
    /// Seals the announcement block after all calls were dispatched.
    ToolClose,
}

impl fmt::Display for StreamFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFragment::Text(text) | StreamFragment::ToolArguments(text) => f.write_str(text),
            StreamFragment::ToolOpen { name, arguments } => {
                write!(f, "{TOOL_OPEN_PREFIX}{name}{TOOL_OPEN_SUFFIX}{arguments}")
            }
            StreamFragment::ToolClose => f.write_str(TOOL_CLOSE),
        }
    }
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    function: FunctionDelta,
}

#[derive(Deserialize, Default)]
struct FunctionDelta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Classify one raw chunk, or produce the closing marker when `terminal`
/// is set (the chunk is ignored in that case).
///
/// Anything that is not a well-formed tool-call delta falls back to its
/// literal text.
pub fn transcode(chunk: &[u8], terminal: bool) -> StreamFragment {
    if terminal {
        return StreamFragment::ToolClose;
    }

    let raw = || StreamFragment::Text(String::from_utf8_lossy(chunk).into_owned());

    let deltas: Vec<ToolCallDelta> = match serde_json::from_slice(chunk) {
        Ok(deltas) => deltas,
        Err(_) => return raw(),
    };
    debug!(chunk = %String::from_utf8_lossy(chunk), "tool call delta");

    match deltas.into_iter().next() {
        Some(ToolCallDelta { function }) if !function.name.is_empty() => StreamFragment::ToolOpen {
            name: function.name,
            arguments: function.arguments,
        },
        Some(ToolCallDelta { function }) if !function.arguments.is_empty() => {
            StreamFragment::ToolArguments(function.arguments)
        }
        _ => raw(),
    }
}

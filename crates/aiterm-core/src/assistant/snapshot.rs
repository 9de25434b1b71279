//! Bounded context snapshots built from session state.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Default character budget for `recent_output`.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 4000;

/// Default number of commands kept in `recent_commands`.
pub const DEFAULT_MAX_COMMANDS: usize = 20;

/// CSI sequences, OSC sequences (BEL or ST terminated) and two-byte escapes.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][0-9A-Za-z]|\x1b[0-Z\\-_]",
    )
    .unwrap()
});

/// Session context attached to a query. Every field is optional; an empty
/// snapshot adds nothing to the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Most recent last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

impl ContextSnapshot {
    pub fn is_empty(&self) -> bool {
        self.recent_output.is_none()
            && self.working_directory.is_none()
            && self.recent_commands.is_none()
            && self.selected_text.is_none()
    }
}

/// What can be observed about a session at a point in time, unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionObservation {
    pub recent_output: String,
    pub working_directory: Option<String>,
    pub recent_commands: Vec<String>,
    pub selected_text: Option<String>,
}

/// Turns a [`SessionObservation`] into a bounded [`ContextSnapshot`].
///
/// Pure: never blocks, never touches the session or the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAssembler {
    pub max_output_chars: usize,
    pub max_commands: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            max_commands: DEFAULT_MAX_COMMANDS,
        }
    }
}

impl ContextAssembler {
    pub fn new(max_output_chars: usize, max_commands: usize) -> Self {
        Self {
            max_output_chars,
            max_commands,
        }
    }

    pub fn assemble(&self, observation: &SessionObservation) -> ContextSnapshot {
        let output = strip_ansi(&observation.recent_output);
        let output = tail_chars(&output, self.max_output_chars);

        let commands = &observation.recent_commands;
        let keep_from = commands.len().saturating_sub(self.max_commands);
        let commands: Vec<String> = commands[keep_from..].to_vec();

        ContextSnapshot {
            recent_output: non_blank(output),
            working_directory: observation
                .working_directory
                .as_deref()
                .and_then(non_blank),
            recent_commands: (!commands.is_empty()).then_some(commands),
            selected_text: observation.selected_text.as_deref().and_then(non_blank),
        }
    }
}

/// Remove terminal escape sequences and carriage returns.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").replace('\r', "")
}

/// The last `max` characters of `text`.
fn tail_chars(text: &str, max: usize) -> &str {
    if max == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

fn non_blank(text: &str) -> Option<String> {
    (!text.trim().is_empty()).then(|| text.to_string())
}
